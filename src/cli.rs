//! CLI for this application
//!
use crate::settings::{self, RetryPolicy};

#[derive(Clone, Debug, clap::Parser)]
#[command(name = settings::APP_NAME, version = settings::APP_VERSION)]
pub struct Cli {
    // Server listen address
    #[clap(
        long,
        default_value = "0.0.0.0",
        env("BLOOMCACHE_LISTEN_ADDRESS"),
        help = "IP Address to listen on"
    )]
    pub listen_address: String,

    // TCP listen port
    #[clap(
        long,
        default_value = settings::DEFAULT_PORT_TCP,
        env("BLOOMCACHE_LISTEN_PORT"),
        help = "Port to bind the command server to"
    )]
    pub listen_port: u16,

    #[clap(
        long,
        env("BLOOMCACHE_ADVERTISE_ADDRESS"),
        help = "host:port other nodes use to reach this node"
    )]
    pub advertise_address: Option<String>,

    // Cluster configuration information: initial peers
    #[clap(
        long,
        env("BLOOMCACHE_REMOTE_PEERS"),
        value_delimiter = ',',
        help = "Initial peers as host:port (e.g., node1:5454,node2:5454)"
    )]
    pub remote_peers: Vec<String>,

    #[clap(
        long,
        env("BLOOMCACHE_BASE_NODE"),
        help = "Start as the base node of a cluster (no outbound connections)"
    )]
    pub base_node: bool,

    #[clap(
        long,
        default_value = "1000",
        env("BLOOMCACHE_EXPECTED_ITEMS"),
        help = "Expected number of keys, used to size the Bloom filter"
    )]
    pub expected_items: usize,

    #[clap(
        long,
        default_value = "0.01",
        env("BLOOMCACHE_FALSE_POSITIVE_RATE"),
        help = "Target Bloom filter false-positive rate"
    )]
    pub false_positive_rate: f64,

    #[clap(
        long,
        env("BLOOMCACHE_STRICT_ROUTING"),
        help = "Only route lookups to peers matching every hashed position"
    )]
    pub strict_routing: bool,

    #[clap(
        long,
        default_value = "1000",
        env("BLOOMCACHE_REQUEST_TIMEOUT_MS"),
        help = "Timeout in milliseconds for a single remote GET"
    )]
    pub request_timeout_ms: u64,

    #[clap(
        long,
        default_value = "1000",
        env("BLOOMCACHE_EVICTION_INTERVAL_MS"),
        help = "Interval in milliseconds between expiration sweeps"
    )]
    pub eviction_interval_ms: u64,

    #[clap(
        long,
        default_value = "5000",
        env("BLOOMCACHE_FILTER_REFRESH_INTERVAL_MS"),
        help = "Interval in milliseconds between peer filter refreshes"
    )]
    pub filter_refresh_interval_ms: u64,

    #[clap(
        long,
        default_value = "5",
        env("BLOOMCACHE_CONNECT_ATTEMPTS"),
        help = "Connection attempts before giving up on the initial peers"
    )]
    pub connect_attempts: u32,

    #[clap(
        long,
        default_value = "2000",
        env("BLOOMCACHE_CONNECT_DELAY_MS"),
        help = "Initial delay in milliseconds between connection attempts"
    )]
    pub connect_delay_ms: u64,
}

impl Cli {
    pub fn into_settings(self) -> settings::Settings {
        settings::Settings {
            listen_address: self.listen_address,
            listen_port: self.listen_port,
            advertise_address: self.advertise_address,
            remote_peers: self.remote_peers,
            base_node: self.base_node,
            testing: false,
            expected_items: self.expected_items,
            false_positive_rate: self.false_positive_rate,
            strict_routing: self.strict_routing,
            request_timeout_ms: self.request_timeout_ms,
            eviction_interval_ms: self.eviction_interval_ms,
            filter_refresh_interval_ms: self.filter_refresh_interval_ms,
            schedule_capacity: settings::DEFAULT_SCHEDULE_CAPACITY,
            retry: RetryPolicy {
                max_attempts: self.connect_attempts,
                initial_delay_ms: self.connect_delay_ms,
                ..RetryPolicy::default()
            },
        }
    }
}
