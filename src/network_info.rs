// Process-wide default gateway state, discovered once on first access

use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::OnceLock;
use std::time::Duration;

use crate::adapter::{AdapterInfo, DEFAULT_INTERFACE_CAPACITY, MacAddr};
use crate::error::{DiscoveryError, DiscoveryResult, RetryPolicy};
use crate::routes::{self, RouteEntry};

/// Pipeline stage at which discovery stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    RouteTable,
    DefaultGateway,
    Adapter,
    GatewayMac,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::RouteTable => "route table",
            Stage::DefaultGateway => "default gateway",
            Stage::Adapter => "adapter",
            Stage::GatewayMac => "gateway mac",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum DiscoveryStatus {
    Complete,
    Partial {
        stage: Stage,
        reason: String,
        hint: String,
    },
}

/// Tunables for a discovery run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// Policy for the ARP exchange with the gateway
    pub retry: RetryPolicy,
    /// Number of interfaces requested from the kernel
    pub interface_capacity: usize,
    /// Receive timeout for the route dump
    pub netlink_timeout: Duration,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        DiscoveryOptions {
            retry: RetryPolicy::default(),
            interface_capacity: DEFAULT_INTERFACE_CAPACITY,
            netlink_timeout: Duration::from_secs(1),
        }
    }
}

/// The OS-facing stages of discovery
pub trait DiscoveryBackend {
    fn route_table(&mut self) -> DiscoveryResult<Vec<RouteEntry>>;
    fn local_adapter(&mut self, egress_index: i32) -> DiscoveryResult<AdapterInfo>;
    fn gateway_mac(&mut self, gateway: Ipv4Addr, adapter: &AdapterInfo) -> DiscoveryResult<MacAddr>;
}

/// Backend talking to the running kernel
pub struct SystemBackend {
    options: DiscoveryOptions,
}

impl SystemBackend {
    pub fn new(options: DiscoveryOptions) -> Self {
        SystemBackend { options }
    }
}

#[cfg(target_os = "linux")]
impl DiscoveryBackend for SystemBackend {
    fn route_table(&mut self) -> DiscoveryResult<Vec<RouteEntry>> {
        routes::netlink::read_route_table(self.options.netlink_timeout)
    }

    fn local_adapter(&mut self, egress_index: i32) -> DiscoveryResult<AdapterInfo> {
        crate::adapter::ioctl::resolve_local_adapter(egress_index, self.options.interface_capacity)
    }

    fn gateway_mac(&mut self, gateway: Ipv4Addr, adapter: &AdapterInfo) -> DiscoveryResult<MacAddr> {
        crate::arp::resolve_mac(gateway, adapter, &self.options.retry)
    }
}

#[cfg(not(target_os = "linux"))]
impl DiscoveryBackend for SystemBackend {
    fn route_table(&mut self) -> DiscoveryResult<Vec<RouteEntry>> {
        Err(std::io::Error::from(std::io::ErrorKind::Unsupported).into())
    }

    fn local_adapter(&mut self, _egress_index: i32) -> DiscoveryResult<AdapterInfo> {
        Err(std::io::Error::from(std::io::ErrorKind::Unsupported).into())
    }

    fn gateway_mac(&mut self, _gateway: Ipv4Addr, _adapter: &AdapterInfo) -> DiscoveryResult<MacAddr> {
        Err(std::io::Error::from(std::io::ErrorKind::Unsupported).into())
    }
}

/// Discovered adapter and gateway of the default route
#[derive(Debug, Clone, Serialize)]
pub struct NetworkInfo {
    pub adapter: AdapterInfo,
    pub hostname: String,
    pub discovered_at: String,
    pub status: DiscoveryStatus,
}

fn run_stages<B: DiscoveryBackend>(
    backend: &mut B,
    adapter: &mut AdapterInfo,
) -> Result<(), (Stage, DiscoveryError)> {
    let table = backend.route_table().map_err(|e| (Stage::RouteTable, e))?;
    let default = routes::find_default(&table).map_err(|e| (Stage::DefaultGateway, e))?;
    tracing::info!(
        "Default route via {} on interface {}",
        default.gateway,
        default.egress_index
    );

    *adapter = backend
        .local_adapter(default.egress_index)
        .map_err(|e| (Stage::Adapter, e))?;
    adapter.gateway_ipv4 = default.gateway;
    tracing::info!("Default adapter {} ({})", adapter.name, adapter.local_ipv4);

    adapter.gateway_mac = backend
        .gateway_mac(default.gateway, adapter)
        .map_err(|e| (Stage::GatewayMac, e))?;
    tracing::info!("Gateway {} is at {}", adapter.gateway_ipv4, adapter.gateway_mac);

    Ok(())
}

/// Run the whole pipeline. A failing stage stops it and leaves the fields
/// it would have filled at their zero values.
pub fn discover<B: DiscoveryBackend>(backend: &mut B) -> NetworkInfo {
    let mut adapter = AdapterInfo::default();

    let status = match run_stages(backend, &mut adapter) {
        Ok(()) => DiscoveryStatus::Complete,
        Err((stage, e)) => {
            tracing::warn!("Discovery stopped at {}: {}", stage, e);
            DiscoveryStatus::Partial {
                stage,
                reason: e.to_string(),
                hint: e.user_message(),
            }
        }
    };

    NetworkInfo {
        adapter,
        hostname: get_hostname(),
        discovered_at: chrono::Utc::now().to_rfc3339(),
        status,
    }
}

fn get_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// A write-once slot for discovery state. Concurrent first accesses run
/// discovery exactly once; every caller sees the same value.
pub struct DiscoveryCell {
    cell: OnceLock<NetworkInfo>,
}

impl DiscoveryCell {
    pub const fn new() -> Self {
        DiscoveryCell {
            cell: OnceLock::new(),
        }
    }

    pub fn get_or_discover<B, F>(&self, make_backend: F) -> &NetworkInfo
    where
        B: DiscoveryBackend,
        F: FnOnce() -> B,
    {
        self.cell.get_or_init(|| discover(&mut make_backend()))
    }

    pub fn get(&self) -> Option<&NetworkInfo> {
        self.cell.get()
    }
}

impl Default for DiscoveryCell {
    fn default() -> Self {
        Self::new()
    }
}

static NETWORK_INFO: DiscoveryCell = DiscoveryCell::new();

impl NetworkInfo {
    /// Process-wide state, discovered with default options on first call
    pub fn get() -> &'static NetworkInfo {
        Self::init_with(DiscoveryOptions::default())
    }

    /// Like `get`, but the first caller chooses the options. Once the state
    /// exists `options` is ignored.
    pub fn init_with(options: DiscoveryOptions) -> &'static NetworkInfo {
        NETWORK_INFO.get_or_discover(|| SystemBackend::new(options))
    }

    pub fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    pub fn is_complete(&self) -> bool {
        self.status == DiscoveryStatus::Complete
    }
}

/// The default-route adapter of this process
pub fn default_adapter() -> &'static AdapterInfo {
    NetworkInfo::get().adapter()
}

impl fmt::Display for NetworkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "host:        {}", self.hostname)?;
        writeln!(f, "discovered:  {}", self.discovered_at)?;
        writeln!(f, "{}", self.adapter)?;
        match &self.status {
            DiscoveryStatus::Complete => write!(f, "status:      complete"),
            DiscoveryStatus::Partial { stage, reason, hint } => {
                writeln!(f, "status:      stopped at {} ({})", stage, reason)?;
                write!(f, "hint:        {}", hint)
            }
        }
    }
}
