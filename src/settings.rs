//! bloomcache node settings
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config_error;
use crate::error::Result;

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const STANDARD_PORT_TCP: u16 = 5454;
pub const DEFAULT_PORT_TCP: &str = "5454";

pub const DEFAULT_EXPECTED_ITEMS: usize = 1000;
pub const DEFAULT_FALSE_POSITIVE_RATE: f64 = 0.01;
pub const DEFAULT_SCHEDULE_CAPACITY: usize = 100;

/// Bounded retry with exponential backoff for `connect_with_retry`
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 2000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(32);
        let delay = self
            .initial_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Settings {
    // Server listen address
    pub listen_address: String,

    // TCP listen port for the command server
    pub listen_port: u16,

    // Address other nodes know us by ("host:port"); never gossiped back to us
    pub advertise_address: Option<String>,

    // Initial remote peers ("host:port")
    pub remote_peers: Vec<String>,

    // First node of a cluster: do not dial out
    pub base_node: bool,

    // No outbound connections and no retry sleeps
    pub testing: bool,

    // Bloom filter sizing
    pub expected_items: usize,
    pub false_positive_rate: f64,

    // Only route to peers whose filter has every hashed position set
    pub strict_routing: bool,

    // Max wait for one peer to answer a remote GET
    pub request_timeout_ms: u64,

    // Interval between expiration sweeps
    pub eviction_interval_ms: u64,

    // Interval between re-fetches of every connected peer's filter
    pub filter_refresh_interval_ms: u64,

    // Initial backing capacity of the expiration schedule
    pub schedule_capacity: usize,

    pub retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            listen_port: STANDARD_PORT_TCP,
            advertise_address: None,
            remote_peers: Vec::new(),
            base_node: false,
            testing: true,
            expected_items: DEFAULT_EXPECTED_ITEMS,
            false_positive_rate: DEFAULT_FALSE_POSITIVE_RATE,
            strict_routing: false,
            request_timeout_ms: 1000,
            eviction_interval_ms: 1000,
            filter_refresh_interval_ms: 5000,
            schedule_capacity: DEFAULT_SCHEDULE_CAPACITY,
            retry: RetryPolicy::default(),
        }
    }
}

impl Settings {
    /// Outbound connections are suppressed for base nodes and in testing
    pub fn dials_out(&self) -> bool {
        !self.base_node && !self.testing
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms)
    }

    pub fn filter_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.filter_refresh_interval_ms)
    }

    pub fn listen_socket(&self) -> String {
        format!("{}:{}", self.listen_address, self.listen_port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.expected_items == 0 {
            return Err(config_error!("expected_items must be greater than zero"));
        }
        if !(self.false_positive_rate > 0.0 && self.false_positive_rate < 1.0) {
            return Err(config_error!(
                "false_positive_rate must be in (0, 1), got {}",
                self.false_positive_rate
            ));
        }
        if self.schedule_capacity == 0 {
            return Err(config_error!("schedule_capacity must be greater than zero"));
        }
        for peer in &self.remote_peers {
            validate_address(peer)?;
        }
        if let Some(addr) = &self.advertise_address {
            validate_address(addr)?;
        }
        Ok(())
    }
}

/// Peer addresses are "host:port" strings
pub fn validate_address(address: &str) -> Result<()> {
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
        _ => Err(config_error!("Invalid peer address: {}", address)),
    }
}
