//! RPC Error Types

use thiserror::Error;

/// Errors that can occur during a remote call
#[derive(Debug, Error)]
pub enum RpcError {
    /// No reply within the deadline
    #[error("Timeout waiting for RPC reply after {0}ms")]
    Timeout(u64),

    /// Serial port or stream fault
    #[error("Serial link error: {0}")]
    Link(String),

    /// Reply could not be parsed as the expected frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Bulk transfer ended before the announced length
    #[error("Short read: expected {expected} bytes, got {received}")]
    ShortRead { expected: usize, received: usize },

    /// Link was already marked disconnected
    #[error("Serial link is disconnected")]
    Disconnected,
}

impl RpcError {
    /// Whether this error means the link is gone and must be reopened
    pub fn is_link_loss(&self) -> bool {
        matches!(self, RpcError::Link(_) | RpcError::Disconnected)
    }
}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::Link(err.to_string())
    }
}

impl From<tokio_serial::Error> for RpcError {
    fn from(err: tokio_serial::Error) -> Self {
        RpcError::Link(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_loss_classification() {
        assert!(RpcError::Link("gone".into()).is_link_loss());
        assert!(RpcError::Disconnected.is_link_loss());
        assert!(!RpcError::Timeout(1000).is_link_loss());
        assert!(!RpcError::ShortRead { expected: 4, received: 2 }.is_link_loss());
    }

    #[test]
    fn test_io_error_maps_to_link() {
        let err: RpcError =
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed").into();
        assert!(matches!(err, RpcError::Link(_)));
    }
}
