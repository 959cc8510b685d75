//! Devices and interfaces
//!
//! A [`Device`] exclusively owns its routing table, policy index and
//! resolution cache. Interfaces keep their insertion order, which is the
//! order the forwarding engine drains them in and the order egress
//! selection scans them in.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use iosim_core::{DeviceError, Packet};
use iosim_routing::{Policy, PolicyIndex, PolicyStats, RoutingTable, TreeStats};
use iosim_storage::{DeviceConfig, InterfaceConfig, RouteConfig, config::DEFAULT_MASK};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Kind of a simulated device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Router,
    Switch,
    Host,
    Firewall,
}

impl DeviceKind {
    /// Interfaces a freshly added device of this kind starts with
    pub fn default_interfaces(&self) -> Vec<String> {
        match self {
            Self::Router => vec!["g0/0".to_string(), "g0/1".to_string()],
            Self::Switch => (0..8).map(|i| format!("g0/{i}")).collect(),
            Self::Host => vec!["eth0".to_string()],
            Self::Firewall => Vec::new(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Router => "router",
            Self::Switch => "switch",
            Self::Host => "host",
            Self::Firewall => "firewall",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "router" => Ok(Self::Router),
            "switch" => Ok(Self::Switch),
            "host" => Ok(Self::Host),
            "firewall" => Ok(Self::Firewall),
            _ => Err(DeviceError::UnknownKind(s.to_string())),
        }
    }
}

/// Far end of a link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEnd {
    pub device: String,
    pub interface: String,
}

/// A network interface on a device
#[derive(Debug, Clone)]
pub struct Interface {
    pub name: String,
    pub ip: Option<Ipv4Addr>,
    pub mask: Ipv4Addr,
    /// Administrative state (`no shutdown` brings it up)
    pub up: bool,
    /// Peer interface, set while connected
    pub link: Option<LinkEnd>,
    pub input_queue: VecDeque<Packet>,
    pub output_queue: VecDeque<Packet>,
}

impl Interface {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ip: None,
            mask: DEFAULT_MASK,
            up: false,
            link: None,
            input_queue: VecDeque::new(),
            output_queue: VecDeque::new(),
        }
    }

    /// Assign an address, the mask defaults to /24
    pub fn set_address(&mut self, ip: Ipv4Addr, mask: Option<Ipv4Addr>) {
        self.ip = Some(ip);
        self.mask = mask.unwrap_or(DEFAULT_MASK);
    }

    pub fn is_linked(&self) -> bool {
        self.link.is_some()
    }

    /// Up and linked, i.e. eligible as an egress interface
    pub fn is_usable(&self) -> bool {
        self.up && self.link.is_some()
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.up { "UP" } else { "DOWN" };
        match self.ip {
            Some(ip) => write!(f, "{}: {} ({})", self.name, ip, status),
            None => write!(f, "{}: No IP ({})", self.name, status),
        }
    }
}

/// Per-device packet counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketCounters {
    pub sent: u64,
    pub received: u64,
    pub dropped: u64,
}

/// Statistics reported by [`Device::statistics`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub routing_table_entries: usize,
    pub interfaces_count: usize,
    pub routing: TreeStats,
    pub policies: PolicyStats,
}

/// A simulated device
#[derive(Debug)]
pub struct Device {
    name: String,
    kind: DeviceKind,
    online: bool,
    interfaces: Vec<Interface>,
    routing_table: RoutingTable,
    policies: PolicyIndex,
    /// Next hop to egress interface, learned lazily
    resolution_cache: BTreeMap<Ipv4Addr, String>,
    /// Received packets, oldest first
    history: Vec<Packet>,
    pub(crate) counters: PacketCounters,
}

impl Device {
    /// Create an online device with the default interfaces of its kind
    pub fn new(name: impl Into<String>, kind: DeviceKind) -> Self {
        let mut device = Self::bare(name, kind);
        for iface in kind.default_interfaces() {
            device.add_interface(iface);
        }
        device
    }

    /// Create an online device without any interfaces
    pub fn bare(name: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            online: true,
            interfaces: Vec::new(),
            routing_table: RoutingTable::new(),
            policies: PolicyIndex::new(),
            resolution_cache: BTreeMap::new(),
            history: Vec::new(),
            counters: PacketCounters::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn set_online(&mut self, online: bool) {
        if self.online != online {
            debug!(device = %self.name, online, "device status changed");
        }
        self.online = online;
    }

    /// Add an interface, returns false if the name is taken
    pub fn add_interface(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.interface(&name).is_some() {
            return false;
        }
        self.interfaces.push(Interface::new(name));
        true
    }

    pub fn interface(&self, name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.name == name)
    }

    pub fn interface_mut(&mut self, name: &str) -> Option<&mut Interface> {
        self.interfaces.iter_mut().find(|i| i.name == name)
    }

    /// Interfaces in insertion order
    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    pub(crate) fn interfaces_mut(&mut self) -> &mut [Interface] {
        &mut self.interfaces
    }

    fn require_interface(&mut self, name: &str) -> Result<&mut Interface, DeviceError> {
        let device = self.name.clone();
        self.interface_mut(name).ok_or(DeviceError::InterfaceNotFound {
            device,
            interface: name.to_string(),
        })
    }

    /// Set the address and/or administrative state of an interface
    ///
    /// A mask given without an address is ignored.
    pub fn configure_interface(
        &mut self,
        name: &str,
        ip: Option<Ipv4Addr>,
        mask: Option<Ipv4Addr>,
        up: Option<bool>,
    ) -> Result<(), DeviceError> {
        let iface = self.require_interface(name)?;
        if let Some(ip) = ip {
            iface.set_address(ip, mask);
        }
        if let Some(up) = up {
            iface.up = up;
        }
        Ok(())
    }

    /// Interface that owns `ip`, if any
    pub fn interface_with_address(&self, ip: Ipv4Addr) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.ip == Some(ip))
    }

    /// Add or overwrite a static route, returns the route key
    pub fn add_route(&mut self, prefix: Ipv4Addr, mask: Ipv4Addr, next_hop: Ipv4Addr, metric: u32) -> String {
        self.routing_table.add_route(prefix, mask, next_hop, metric)
    }

    pub fn remove_route(&mut self, prefix: Ipv4Addr, mask: Ipv4Addr) -> bool {
        self.routing_table.remove_route(prefix, mask)
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    /// Attach a policy to a prefix, returns the policy it replaced
    pub fn set_policy(&mut self, prefix: Ipv4Addr, mask: Ipv4Addr, policy: Policy) -> Option<Policy> {
        debug!(device = %self.name, %prefix, %mask, %policy, "setting policy");
        self.policies.insert(prefix, mask, policy)
    }

    pub fn remove_policy(&mut self, prefix: Ipv4Addr, mask: Ipv4Addr) -> Option<Policy> {
        self.policies.delete(prefix, mask)
    }

    pub fn policies(&self) -> &PolicyIndex {
        &self.policies
    }

    pub fn resolution_cache(&self) -> &BTreeMap<Ipv4Addr, String> {
        &self.resolution_cache
    }

    pub(crate) fn resolution_cache_mut(&mut self) -> &mut BTreeMap<Ipv4Addr, String> {
        &mut self.resolution_cache
    }

    /// Accept a packet addressed to this device
    ///
    /// Offline devices refuse packets and return false.
    pub fn receive_packet(&mut self, mut packet: Packet) -> bool {
        if !self.online {
            return false;
        }
        self.counters.received += 1;
        packet.add_to_path(&self.name);
        packet.mark_arrived();
        self.history.push(packet);
        true
    }

    /// Received packets, newest first, at most `limit` of them
    pub fn history(&self, limit: Option<usize>) -> Vec<&Packet> {
        let limit = limit.unwrap_or(self.history.len());
        self.history.iter().rev().take(limit).collect()
    }

    pub fn counters(&self) -> PacketCounters {
        self.counters
    }

    pub fn statistics(&self) -> DeviceStats {
        DeviceStats {
            packets_sent: self.counters.sent,
            packets_received: self.counters.received,
            packets_dropped: self.counters.dropped,
            routing_table_entries: self.routing_table.len(),
            interfaces_count: self.interfaces.len(),
            routing: self.routing_table.stats(),
            policies: self.policies.stats(),
        }
    }

    /// Packets waiting in output queues
    pub fn queued_packets(&self) -> usize {
        self.interfaces.iter().map(|i| i.output_queue.len()).sum()
    }

    /// Snapshot view of this device
    pub fn to_config(&self) -> DeviceConfig {
        let mut config = DeviceConfig::new(self.name.clone(), self.kind.as_str());
        config.interfaces = self
            .interfaces
            .iter()
            .map(|i| InterfaceConfig {
                name: i.name.clone(),
                ip: i.ip,
                mask: i.mask,
                up: i.up,
            })
            .collect();
        config.routes = self
            .routing_table
            .all()
            .into_iter()
            .filter_map(|(key, route)| {
                let (prefix, _) = key.split_once('/')?;
                Some(RouteConfig {
                    prefix: prefix.parse().ok()?,
                    mask: route.mask,
                    next_hop: route.next_hop,
                    metric: route.metric,
                })
            })
            .collect();
        config
    }

    /// Build a device from its snapshot view
    ///
    /// Only the interfaces listed in the snapshot are created.
    pub fn from_config(config: &DeviceConfig) -> Result<Self, DeviceError> {
        let kind: DeviceKind = config.device_type.parse()?;
        let mut device = Self::bare(config.hostname.clone(), kind);
        for iface in &config.interfaces {
            device.add_interface(iface.name.clone());
            device.configure_interface(&iface.name, iface.ip, Some(iface.mask), Some(iface.up))?;
        }
        for route in &config.routes {
            device.add_route(route.prefix, route.mask, route.next_hop, route.metric);
        }
        Ok(device)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.online { "ONLINE" } else { "OFFLINE" };
        write!(f, "{} ({}) - {}", self.name, self.kind, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_default_interfaces() {
        assert_eq!(Device::new("R1", DeviceKind::Router).interfaces().len(), 2);
        let switch = Device::new("SW1", DeviceKind::Switch);
        assert_eq!(switch.interfaces().len(), 8);
        assert_eq!(switch.interfaces()[7].name, "g0/7");
        assert_eq!(Device::new("PC1", DeviceKind::Host).interfaces()[0].name, "eth0");
        assert!(Device::new("FW1", DeviceKind::Firewall).interfaces().is_empty());
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("Router".parse::<DeviceKind>().unwrap(), DeviceKind::Router);
        assert_eq!("firewall".parse::<DeviceKind>().unwrap(), DeviceKind::Firewall);
        assert!(matches!("hub".parse::<DeviceKind>(), Err(DeviceError::UnknownKind(_))));
    }

    #[test]
    fn test_add_interface_rejects_duplicates() {
        let mut fw = Device::new("FW1", DeviceKind::Firewall);
        assert!(fw.add_interface("outside"));
        assert!(!fw.add_interface("outside"));
        assert_eq!(fw.interfaces().len(), 1);
    }

    #[test]
    fn test_configure_interface() {
        let mut r1 = Device::new("R1", DeviceKind::Router);
        r1.configure_interface("g0/0", Some(ip("10.0.0.1")), None, Some(true)).unwrap();
        let iface = r1.interface("g0/0").unwrap();
        assert_eq!(iface.ip, Some(ip("10.0.0.1")));
        assert_eq!(iface.mask, DEFAULT_MASK);
        assert!(iface.up);
        assert!(!iface.is_usable());
        assert_eq!(iface.to_string(), "g0/0: 10.0.0.1 (UP)");

        let err = r1.configure_interface("g0/5", None, None, Some(true)).unwrap_err();
        assert_eq!(
            err,
            DeviceError::InterfaceNotFound {
                device: "R1".into(),
                interface: "g0/5".into()
            }
        );
    }

    #[test]
    fn test_routes_and_policies() {
        let mut r1 = Device::new("R1", DeviceKind::Router);
        let key = r1.add_route(ip("10.1.2.3"), ip("255.255.0.0"), ip("192.168.1.2"), 5);
        assert_eq!(key, "10.1.0.0/16");
        assert_eq!(r1.routing_table().len(), 1);
        assert!(r1.remove_route(ip("10.1.0.0"), ip("255.255.0.0")));
        assert!(r1.routing_table().is_empty());

        assert_eq!(r1.set_policy(ip("10.0.0.0"), ip("255.0.0.0"), Policy::Block), None);
        assert_eq!(
            r1.set_policy(ip("10.0.0.0"), ip("255.0.0.0"), Policy::TtlMin(4)),
            Some(Policy::Block)
        );
        assert_eq!(r1.remove_policy(ip("10.0.0.0"), ip("255.0.0.0")), Some(Policy::TtlMin(4)));
        assert!(r1.policies().is_empty());
    }

    #[test]
    fn test_receive_packet_and_history() {
        let mut pc = Device::new("PC1", DeviceKind::Host);
        for i in 0..3 {
            let packet = Packet::new(ip("10.0.0.1"), ip("10.0.0.2"), format!("msg {i}"), 8);
            assert!(pc.receive_packet(packet));
        }
        let history = pc.history(Some(2));
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].message, "msg 2");
        assert_eq!(history[1].message, "msg 1");
        assert!(history[0].arrived_at.is_some());
        assert_eq!(history[0].path, vec!["PC1"]);
        assert_eq!(pc.history(None).len(), 3);

        pc.set_online(false);
        assert!(!pc.receive_packet(Packet::new(ip("10.0.0.1"), ip("10.0.0.2"), "late", 8)));
        assert_eq!(pc.statistics().packets_received, 3);
    }

    #[test]
    fn test_config_conversion() {
        let mut r1 = Device::new("R1", DeviceKind::Router);
        r1.configure_interface("g0/0", Some(ip("192.168.1.1")), Some(ip("255.255.255.0")), Some(true))
            .unwrap();
        r1.add_route(ip("10.0.0.0"), ip("255.0.0.0"), ip("192.168.1.254"), 10);

        let config = r1.to_config();
        assert_eq!(config.device_type, "router");
        assert_eq!(config.routes[0].prefix, ip("10.0.0.0"));
        assert_eq!(config.routes[0].metric, 10);

        let rebuilt = Device::from_config(&config).unwrap();
        assert_eq!(rebuilt.to_config(), config);
        assert!(rebuilt.interface("g0/0").unwrap().up);
    }
}
