use std::fmt;

/// Main error type for the bloomcache node
#[derive(Debug)]
pub enum CacheError {
    /// Key missed locally and on every peer that was asked
    NotFound(String),

    /// A remote lookup was attempted before any routing index existed
    UninitializedRouting,

    /// A single peer could not be connected
    ConnectionFailure(String),

    /// Every active peer failed to connect
    AllPeersUnreachable,

    /// Serialized filter text was malformed or had the wrong size
    Decode(String),

    /// Index past the populated part of the expiration schedule
    OutOfRange { index: usize, len: usize },

    /// Peer lookup or state transition errors
    Peer(String),

    /// Transport layer errors
    Transport(String),

    /// Unparseable command text
    Protocol(String),

    /// Configuration or CLI argument errors
    Config(String),

    /// Internal lock poisoning or concurrency errors
    Concurrency(String),

    /// An operation was abandoned through its cancellation token
    Cancelled,

    /// System I/O errors
    Io(std::io::Error),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::NotFound(key) => write!(f, "Key not found in cache: {}", key),
            CacheError::UninitializedRouting => write!(f, "Routing index is uninitialized"),
            CacheError::ConnectionFailure(msg) => write!(f, "Connection failure: {}", msg),
            CacheError::AllPeersUnreachable => write!(f, "No connectable peers"),
            CacheError::Decode(msg) => write!(f, "Decode error: {}", msg),
            CacheError::OutOfRange { index, len } => {
                write!(f, "Index {} out of range for schedule of length {}", index, len)
            }
            CacheError::Peer(msg) => write!(f, "Peer error: {}", msg),
            CacheError::Transport(msg) => write!(f, "Transport error: {}", msg),
            CacheError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            CacheError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CacheError::Concurrency(msg) => write!(f, "Concurrency error: {}", msg),
            CacheError::Cancelled => write!(f, "Operation cancelled"),
            CacheError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io(err) => Some(err),
            _ => None,
        }
    }
}

// Convenient type alias for Results using our error type
pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    /// Get the error type identifier
    pub fn error_type(&self) -> &'static str {
        match self {
            CacheError::NotFound(_) => "not_found",
            CacheError::UninitializedRouting => "uninitialized_routing",
            CacheError::ConnectionFailure(_) => "connection_failure",
            CacheError::AllPeersUnreachable => "all_peers_unreachable",
            CacheError::Decode(_) => "decode_failure",
            CacheError::OutOfRange { .. } => "out_of_range",
            CacheError::Peer(_) => "peer_error",
            CacheError::Transport(_) => "transport_error",
            CacheError::Protocol(_) => "protocol_error",
            CacheError::Config(_) => "configuration_error",
            CacheError::Concurrency(_) => "concurrency_error",
            CacheError::Cancelled => "cancelled",
            CacheError::Io(_) => "io_error",
        }
    }

    /// Per-peer failures that a caller should skip past rather than surface
    pub fn is_peer_local(&self) -> bool {
        matches!(
            self,
            CacheError::ConnectionFailure(_) | CacheError::Transport(_) | CacheError::Io(_)
        )
    }
}

// Conversions from common error types
impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err)
    }
}

impl From<base64::DecodeError> for CacheError {
    fn from(err: base64::DecodeError) -> Self {
        CacheError::Decode(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for CacheError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        CacheError::Concurrency(format!("Lock poisoned: {}", err))
    }
}

// Helper macros for common error construction patterns
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::CacheError::Config($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::CacheError::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! decode_error {
    ($msg:expr) => {
        $crate::error::CacheError::Decode($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::CacheError::Decode(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! peer_error {
    ($msg:expr) => {
        $crate::error::CacheError::Peer($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::CacheError::Peer(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! protocol_error {
    ($msg:expr) => {
        $crate::error::CacheError::Protocol($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::CacheError::Protocol(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! transport_error {
    ($msg:expr) => {
        $crate::error::CacheError::Transport($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::CacheError::Transport(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::NotFound("a".to_string());
        assert_eq!(err.to_string(), "Key not found in cache: a");

        let io_err = CacheError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "File not found",
        ));
        assert!(io_err.to_string().contains("I/O error"));

        let err = CacheError::OutOfRange { index: 4, len: 2 };
        assert_eq!(
            err.to_string(),
            "Index 4 out of range for schedule of length 2"
        );
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let cache_err: CacheError = io_err.into();
        assert!(matches!(cache_err, CacheError::Io(_)));
        assert!(cache_err.is_peer_local());
        assert_eq!(cache_err.error_type(), "io_error");
    }

    #[test]
    fn test_macros() {
        let err = config_error!("Port {} is invalid", 65536);
        assert_eq!(
            err.to_string(),
            "Configuration error: Port 65536 is invalid"
        );

        let err = decode_error!("size mismatch");
        assert_eq!(err.to_string(), "Decode error: size mismatch");
        assert!(!err.is_peer_local());
    }
}
