//! Network interface model and per-interface HTTP client pools.
//!
//! Each selected interface owns a fixed pool of `reqwest` clients whose
//! sockets bind to the interface's source IPv4, so downloads spread across
//! every NIC the operator selected.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum InterfaceError {
    #[error("invalid interface spec '{0}' (expected NAME=IPV4 or NAME=IPV4@SPEED)")]
    InvalidSpec(String),

    #[error("invalid IPv4 address '{0}'")]
    InvalidAddress(String),

    #[error("no usable network interfaces")]
    NoInterfaces,

    #[error("failed to build HTTP client for {name}: {source}")]
    ClientBuild {
        name: String,
        source: reqwest::Error,
    },
}

/// Link speed class, used to derive each interface's worker share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSpeed {
    Unknown,
    Gigabit,
    TenGigabit,
}

impl LinkSpeed {
    /// Target worker share for this speed class.
    pub fn worker_share(self) -> usize {
        match self {
            LinkSpeed::TenGigabit => 2000,
            LinkSpeed::Gigabit => 500,
            LinkSpeed::Unknown => 200,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LinkSpeed::TenGigabit => "10GbE",
            LinkSpeed::Gigabit => "1GbE",
            LinkSpeed::Unknown => "unknown",
        }
    }

    fn from_mbit(mbit: i64) -> Self {
        if mbit >= 10_000 {
            LinkSpeed::TenGigabit
        } else if mbit >= 1_000 {
            LinkSpeed::Gigabit
        } else {
            LinkSpeed::Unknown
        }
    }

    fn parse(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "10g" | "10gbe" => LinkSpeed::TenGigabit,
            "1g" | "1gbe" => LinkSpeed::Gigabit,
            _ => LinkSpeed::Unknown,
        }
    }
}

/// A selected local interface with its bound client pool. Immutable for the
/// run once built.
pub struct NetworkInterface {
    pub name: String,
    pub ip: Ipv4Addr,
    pub is_up: bool,
    pub speed: LinkSpeed,
    pub worker_share: usize,
    pub clients: Vec<reqwest::Client>,
}

impl NetworkInterface {
    /// Parse an operator-supplied spec of the form `NAME=IPV4` or
    /// `NAME=IPV4@SPEED`. Speed falls back to the sysfs probe, up/running to
    /// `operstate`.
    pub fn from_spec(spec: &str) -> Result<Self, InterfaceError> {
        let (name, rest) = spec
            .split_once('=')
            .ok_or_else(|| InterfaceError::InvalidSpec(spec.to_string()))?;

        let (addr, speed_tag) = match rest.split_once('@') {
            Some((a, s)) => (a, Some(s)),
            None => (rest, None),
        };

        let ip: Ipv4Addr = addr
            .parse()
            .map_err(|_| InterfaceError::InvalidAddress(addr.to_string()))?;

        let speed = match speed_tag {
            Some(tag) => LinkSpeed::parse(tag),
            None => probe_speed(name),
        };

        Ok(Self {
            name: name.to_string(),
            ip,
            is_up: probe_operstate(name),
            speed,
            worker_share: speed.worker_share(),
            clients: Vec::new(),
        })
    }

    /// Build this interface's client pool. Connection limits divide the
    /// global budget by interface count and pool size.
    pub fn build_clients(
        &mut self,
        interface_count: usize,
        clients_per_interface: usize,
        user_agent: &str,
    ) -> Result<(), InterfaceError> {
        let per_host = idle_pool_share(interface_count, clients_per_interface);

        let mut clients = Vec::with_capacity(clients_per_interface);
        for _ in 0..clients_per_interface {
            let client = reqwest::Client::builder()
                .user_agent(user_agent)
                .local_address(IpAddr::V4(self.ip))
                .timeout(Config::REQUEST_TIMEOUT)
                .connect_timeout(Config::CONNECTION_TIMEOUT)
                .pool_idle_timeout(Config::KEEP_ALIVE_TIMEOUT)
                .pool_max_idle_per_host(per_host)
                .tcp_keepalive(Duration::from_secs(60))
                .tcp_nodelay(true)
                .http2_adaptive_window(true)
                .build()
                .map_err(|source| InterfaceError::ClientBuild {
                    name: self.name.clone(),
                    source,
                })?;
            clients.push(client);
        }

        self.clients = clients;
        Ok(())
    }
}

/// Resolve the operator's interface specs into fully configured interfaces.
/// Interfaces reported down are skipped with a warning; an empty result is a
/// startup error.
pub fn configure_interfaces(
    specs: &[String],
    clients_per_interface: usize,
    user_agent: &str,
) -> Result<Vec<NetworkInterface>, InterfaceError> {
    let mut interfaces = Vec::new();

    for spec in specs {
        let iface = NetworkInterface::from_spec(spec)?;
        if !iface.is_up {
            tracing::warn!(name = %iface.name, "interface is not up, skipping");
            continue;
        }
        interfaces.push(iface);
    }

    if interfaces.is_empty() {
        return Err(InterfaceError::NoInterfaces);
    }

    let count = interfaces.len();
    for iface in &mut interfaces {
        iface.build_clients(count, clients_per_interface, user_agent)?;
        tracing::info!(
            name = %iface.name,
            ip = %iface.ip,
            speed = iface.speed.label(),
            clients = iface.clients.len(),
            "interface configured"
        );
    }

    Ok(interfaces)
}

/// Idle-connection pool size per client and host: the per-host cap divided
/// by interface count and pool size, clamped by the same slice of the global
/// connection budget. reqwest caps idle connections per host only, so both
/// budgets collapse onto that one knob.
fn idle_pool_share(interface_count: usize, clients_per_interface: usize) -> usize {
    let per_host =
        (Config::MAX_CONNECTIONS_PER_HOST / interface_count / clients_per_interface).max(1);
    let global_share =
        (Config::MAX_CONNECTIONS_TOTAL / interface_count / clients_per_interface).max(1);
    per_host.min(global_share)
}

/// Read the link speed from sysfs. Missing or unreadable entries (virtual
/// interfaces, non-Linux hosts) classify as unknown.
fn probe_speed(name: &str) -> LinkSpeed {
    let path = format!("/sys/class/net/{}/speed", name);
    match std::fs::read_to_string(path) {
        Ok(raw) => raw
            .trim()
            .parse::<i64>()
            .map(LinkSpeed::from_mbit)
            .unwrap_or(LinkSpeed::Unknown),
        Err(_) => LinkSpeed::Unknown,
    }
}

/// Read operstate from sysfs. A missing entry (containers, test hosts) is
/// treated as up.
fn probe_operstate(name: &str) -> bool {
    let path = format!("/sys/class/net/{}/operstate", name);
    match std::fs::read_to_string(path) {
        Ok(state) => {
            let state = state.trim();
            state == "up" || state == "unknown"
        }
        Err(_) => true,
    }
}
