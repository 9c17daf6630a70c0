pub mod peer;
pub mod registry;
pub mod status;

pub use peer::{Peer, PeerSnapshot};
pub use registry::{PeerRegistry, Placement, ACTIVE_PEER_LIMIT, INITIAL_BACKUP_CAPACITY};
pub use status::ConnectionStatus;
