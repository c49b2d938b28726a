//! Default gateway discovery for the local host.
//!
//! Finds the default IPv4 route through a netlink route dump, the local
//! adapter it leaves through, and the gateway's hardware address via a raw
//! ARP exchange. [`NetworkInfo::get`] runs the whole pipeline once per
//! process and caches the result.

pub mod adapter;
pub mod arp;
pub mod error;
pub mod network_info;
pub mod routes;
#[cfg(target_os = "linux")]
mod sys;

pub use adapter::{AdapterInfo, DEFAULT_INTERFACE_CAPACITY, MacAddr};
pub use error::{DiscoveryError, DiscoveryResult, RetryPolicy};
pub use network_info::{
    DiscoveryBackend, DiscoveryCell, DiscoveryOptions, DiscoveryStatus, NetworkInfo, Stage,
    SystemBackend, default_adapter, discover,
};
pub use routes::{DefaultGateway, RouteEntry, find_default};
