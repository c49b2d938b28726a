// Adapter module - local interface discovery for the default route

#[cfg(target_os = "linux")]
pub mod ioctl;

use serde::{Serialize, Serializer};
use std::fmt;
use std::io;
use std::net::Ipv4Addr;

use crate::error::{DiscoveryError, DiscoveryResult};

/// Interface names are at most IFNAMSIZ bytes
pub const MAX_NAME_LEN: usize = 16;

/// Default number of interfaces requested from the kernel
pub const DEFAULT_INTERFACE_CAPACITY: usize = 40;

const IFF_UP: u32 = 0x1;

/// A 6-byte Ethernet hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const ZERO: MacAddr = MacAddr([0; 6]);
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(octets: [u8; 6]) -> Self {
        MacAddr(octets)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The local adapter used by the default route, plus its gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterInfo {
    pub index: i32,
    pub name: String,
    pub local_ipv4: Ipv4Addr,
    pub netmask_ipv4: Ipv4Addr,
    pub gateway_ipv4: Ipv4Addr,
    pub local_mac: MacAddr,
    pub gateway_mac: MacAddr, // zero until ARP resolution succeeds
}

impl Default for AdapterInfo {
    fn default() -> Self {
        AdapterInfo {
            index: 0,
            name: String::new(),
            local_ipv4: Ipv4Addr::UNSPECIFIED,
            netmask_ipv4: Ipv4Addr::UNSPECIFIED,
            gateway_ipv4: Ipv4Addr::UNSPECIFIED,
            local_mac: MacAddr::ZERO,
            gateway_mac: MacAddr::ZERO,
        }
    }
}

impl AdapterInfo {
    /// True once the gateway's hardware address has been resolved
    pub fn is_complete(&self) -> bool {
        self.index != 0 && !self.gateway_mac.is_zero()
    }
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "adapter:     {} (index {})", self.name, self.index)?;
        writeln!(f, "local ip:    {}", self.local_ipv4)?;
        writeln!(f, "netmask:     {}", self.netmask_ipv4)?;
        writeln!(f, "local mac:   {}", self.local_mac)?;
        writeln!(f, "gateway ip:  {}", self.gateway_ipv4)?;
        write!(f, "gateway mac: {}", self.gateway_mac)
    }
}

/// Interface names returned by one enumeration request
#[derive(Debug, Clone, Default)]
pub struct InterfaceList {
    pub names: Vec<String>,
    /// Every slot was filled, so the kernel may have had more to report
    pub truncated: bool,
}

/// Per-interface queries against the OS
pub trait InterfaceSource {
    fn list(&mut self, capacity: usize) -> io::Result<InterfaceList>;
    fn flags(&mut self, name: &str) -> io::Result<u32>;
    fn index(&mut self, name: &str) -> io::Result<i32>;
    fn ipv4(&mut self, name: &str) -> io::Result<Ipv4Addr>;
    fn hardware_addr(&mut self, name: &str) -> io::Result<MacAddr>;
    fn netmask(&mut self, name: &str) -> io::Result<Ipv4Addr>;
}

fn truncate_name(name: &str) -> String {
    let mut end = name.len().min(MAX_NAME_LEN);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

/// Find the up interface whose index equals `egress_index` and read its
/// addresses. Interfaces are scanned from the last enumerated backward and
/// the first match wins. Address lookups that fail leave the field unset.
pub fn resolve_adapter<S: InterfaceSource>(
    source: &mut S,
    egress_index: i32,
    capacity: usize,
) -> DiscoveryResult<AdapterInfo> {
    let list = source.list(capacity)?;
    if list.truncated {
        tracing::warn!(
            "Interface list filled all {} slots and may be truncated",
            capacity
        );
    }

    for name in list.names.iter().rev() {
        match source.flags(name) {
            Ok(flags) if flags & IFF_UP != 0 => {}
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!("Failed to read flags of {}: {}", name, e);
                continue;
            }
        }

        match source.index(name) {
            Ok(index) if index == egress_index => {}
            _ => continue,
        }

        let mut adapter = AdapterInfo {
            index: egress_index,
            name: truncate_name(name),
            ..Default::default()
        };

        match source.ipv4(name) {
            Ok(ip) => adapter.local_ipv4 = ip,
            Err(e) => tracing::warn!("Failed to read IPv4 address of {}: {}", name, e),
        }
        match source.hardware_addr(name) {
            Ok(mac) => adapter.local_mac = mac,
            Err(e) => tracing::warn!("Failed to read hardware address of {}: {}", name, e),
        }
        match source.netmask(name) {
            Ok(mask) => adapter.netmask_ipv4 = mask,
            Err(e) => tracing::warn!("Failed to read netmask of {}: {}", name, e),
        }

        return Ok(adapter);
    }

    Err(DiscoveryError::NoMatchingAdapter(egress_index))
}
