// Routes module - route table entries and default gateway selection

#[cfg(target_os = "linux")]
pub mod netlink;
pub mod wire;

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::error::{DiscoveryError, DiscoveryResult};

/// One IPv4 route from the main routing table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub destination: Ipv4Addr, // unspecified for the default route
    pub gateway: Ipv4Addr,
    pub preferred_source: Ipv4Addr,
    pub egress_index: i32,
    pub metric: u32,
}

impl Default for RouteEntry {
    fn default() -> Self {
        RouteEntry {
            destination: Ipv4Addr::UNSPECIFIED,
            gateway: Ipv4Addr::UNSPECIFIED,
            preferred_source: Ipv4Addr::UNSPECIFIED,
            egress_index: 0,
            metric: 0,
        }
    }
}

impl RouteEntry {
    pub fn is_default(&self) -> bool {
        self.destination.is_unspecified()
    }
}

/// The gateway and egress interface of the default route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultGateway {
    pub gateway: Ipv4Addr,
    pub egress_index: i32,
}

/// Find the default route. When several entries have an unspecified
/// destination the last one in table order wins.
pub fn find_default(entries: &[RouteEntry]) -> DiscoveryResult<DefaultGateway> {
    let mut found = None;

    for entry in entries {
        if entry.is_default() {
            found = Some(DefaultGateway {
                gateway: entry.gateway,
                egress_index: entry.egress_index,
            });
        }
    }

    found.ok_or(DiscoveryError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(dst: [u8; 4], gw: [u8; 4], idx: i32) -> RouteEntry {
        RouteEntry {
            destination: Ipv4Addr::from(dst),
            gateway: Ipv4Addr::from(gw),
            egress_index: idx,
            ..Default::default()
        }
    }

    #[test]
    fn test_find_default_last_match_wins() {
        let entries = vec![
            route([0, 0, 0, 0], [192, 168, 1, 1], 1),
            route([10, 0, 0, 0], [10, 0, 0, 1], 2),
            route([0, 0, 0, 0], [172, 16, 0, 1], 3),
        ];

        let found = find_default(&entries).unwrap();
        assert_eq!(found.gateway, Ipv4Addr::new(172, 16, 0, 1));
        assert_eq!(found.egress_index, 3);
    }

    #[test]
    fn test_find_default_missing() {
        let entries = vec![
            route([10, 0, 0, 0], [10, 0, 0, 1], 2),
            route([192, 168, 0, 0], [0, 0, 0, 0], 4),
        ];

        assert!(matches!(find_default(&entries), Err(DiscoveryError::NotFound)));
        assert!(matches!(find_default(&[]), Err(DiscoveryError::NotFound)));
    }

    #[test]
    fn test_find_default_onlink_route() {
        // A default route without a gateway attribute still selects the interface
        let entries = vec![route([0, 0, 0, 0], [0, 0, 0, 0], 7)];

        let found = find_default(&entries).unwrap();
        assert!(found.gateway.is_unspecified());
        assert_eq!(found.egress_index, 7);
    }
}
