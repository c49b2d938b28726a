// Error types and retry policy for default gateway discovery

use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;

/// Main error type for every discovery stage
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Netlink protocol error: {0}")]
    Protocol(String),

    #[error("No default route in the main routing table")]
    NotFound,

    #[error("No up interface with index {0}")]
    NoMatchingAdapter(i32),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No ARP reply from {target} within {elapsed_ms}ms")]
    Timeout { target: Ipv4Addr, elapsed_ms: u64 },
}

/// Result type alias using DiscoveryError
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

impl DiscoveryError {
    /// Convert error to user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            DiscoveryError::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                "Permission denied. Raw sockets need root or CAP_NET_RAW.".to_string()
            }
            DiscoveryError::Io(_) => {
                "Socket error occurred. Check that the network stack is available.".to_string()
            }
            DiscoveryError::Protocol(_) => {
                "The kernel returned an unexpected routing reply. This might be a bug, please report it."
                    .to_string()
            }
            DiscoveryError::NotFound => {
                "No default route is configured. Check your network connection.".to_string()
            }
            DiscoveryError::NoMatchingAdapter(index) => {
                format!("The default route uses interface {} but it is down or has no IPv4 address.", index)
            }
            DiscoveryError::InvalidArgument(msg) => {
                format!("Cannot resolve the gateway address: {}.", msg)
            }
            DiscoveryError::Timeout { target, .. } => {
                format!("Gateway {} did not answer ARP. Is it reachable on this segment?", target)
            }
        }
    }
}

/// Retry policy for request/response exchanges over an unreliable channel.
///
/// `deadline` bounds the whole exchange, `socket_timeout` is the ceiling of a
/// single blocking send or receive, and `max_attempts` optionally caps the
/// number of requests sent regardless of the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub deadline: Duration,
    pub socket_timeout: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            deadline: Duration::from_millis(1000),
            socket_timeout: Duration::from_millis(100),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    pub fn with_deadline(deadline: Duration) -> Self {
        RetryPolicy {
            deadline,
            ..Default::default()
        }
    }

    /// Decide whether another attempt may be made after `attempts` requests
    /// have been sent and `elapsed` time has passed.
    pub fn allows_another(&self, attempts: u32, elapsed: Duration) -> bool {
        if elapsed > self.deadline {
            return false;
        }
        match self.max_attempts {
            Some(max) => attempts < max,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.deadline, Duration::from_millis(1000));
        assert_eq!(policy.socket_timeout, Duration::from_millis(100));
        assert_eq!(policy.max_attempts, None);
    }

    #[test]
    fn test_retry_policy_deadline() {
        let policy = RetryPolicy::with_deadline(Duration::from_millis(50));
        assert!(policy.allows_another(1000, Duration::from_millis(50)));
        assert!(!policy.allows_another(1, Duration::from_millis(51)));
    }

    #[test]
    fn test_retry_policy_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: Some(3),
            ..Default::default()
        };
        assert!(policy.allows_another(2, Duration::ZERO));
        assert!(!policy.allows_another(3, Duration::ZERO));
    }

    #[test]
    fn test_user_message_names_target() {
        let err = DiscoveryError::Timeout {
            target: Ipv4Addr::new(10, 0, 0, 1),
            elapsed_ms: 1001,
        };
        assert!(err.user_message().contains("10.0.0.1"));
        assert!(err.to_string().contains("1001ms"));
    }

    #[test]
    fn test_user_message_permission_denied() {
        let err = DiscoveryError::Io(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(err.user_message().contains("CAP_NET_RAW"));
    }
}
