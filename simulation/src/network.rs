//! Network controller
//!
//! [`Network`] is the single owner of every device, the connection list, the
//! snapshot store and the event log. It advances the simulation one tick at a
//! time by running the forwarding engine over each online device in
//! insertion order.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use iosim_core::{DeviceError, EventKind, EventLog, NetworkEvent, Packet, PacketId, Severity};
use iosim_storage::{ConnectionConfig, SnapshotConfig, SnapshotStore};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SimConfig;
use crate::device::{Device, DeviceKind, LinkEnd};
use crate::engine::{ForwardingEngine, TickReport};
use crate::error::NetworkError;

/// Network-wide statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkStats {
    pub total_packets_sent: u64,
    pub total_packets_received: u64,
    pub total_packets_dropped: u64,
    /// Mean hop count over every received packet
    pub average_hops: f64,
    /// Device with the most sent plus received packets
    pub top_talker: Option<String>,
    pub devices_online: usize,
    pub total_devices: usize,
    pub queued_packets: usize,
    pub ticks: u64,
}

/// The simulated network
#[derive(Debug)]
pub struct Network {
    config: SimConfig,
    devices: Vec<Device>,
    connections: Vec<ConnectionConfig>,
    snapshots: SnapshotStore,
    events: EventLog,
    engine: ForwardingEngine,
    tick: u64,
}

impl Network {
    /// Create an empty network
    ///
    /// Snapshot files already present in the configured directory are
    /// indexed.
    pub fn new(config: SimConfig) -> Result<Self, NetworkError> {
        let snapshots = SnapshotStore::open(&config.snapshot_dir, config.snapshot_order)?;
        Ok(Self {
            events: EventLog::new(config.event_log_capacity),
            engine: ForwardingEngine::new(config.trace_forwarding),
            devices: Vec::new(),
            connections: Vec::new(),
            snapshots,
            config,
            tick: 0,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Ticks run so far
    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Add a device with the default interfaces of its kind
    pub fn add_device(&mut self, name: &str, kind: DeviceKind) -> Result<&mut Device, DeviceError> {
        if self.device(name).is_some() {
            return Err(DeviceError::DeviceExists(name.to_string()));
        }
        debug!(device = name, %kind, "adding device");
        self.devices.push(Device::new(name, kind));
        let idx = self.devices.len() - 1;
        Ok(&mut self.devices[idx])
    }

    /// Remove a device and every link attached to it
    pub fn remove_device(&mut self, name: &str) -> Result<Device, DeviceError> {
        let idx = self.index_of(name)?;
        let attached: Vec<ConnectionConfig> = self
            .connections
            .iter()
            .filter(|c| c.device1 == name || c.device2 == name)
            .cloned()
            .collect();
        for conn in attached {
            self.disconnect(&conn.device1, &conn.interface1, &conn.device2, &conn.interface2)?;
        }
        debug!(device = name, "removed device");
        Ok(self.devices.remove(idx))
    }

    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.name() == name)
    }

    pub fn device_mut(&mut self, name: &str) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.name() == name)
    }

    /// Devices in insertion order
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device_names(&self) -> Vec<&str> {
        self.devices.iter().map(|d| d.name()).collect()
    }

    fn index_of(&self, name: &str) -> Result<usize, DeviceError> {
        self.devices
            .iter()
            .position(|d| d.name() == name)
            .ok_or_else(|| DeviceError::DeviceNotFound(name.to_string()))
    }

    /// Bring a device online or take it offline
    pub fn set_device_status(&mut self, name: &str, online: bool) -> Result<(), DeviceError> {
        let idx = self.index_of(name)?;
        self.devices[idx].set_online(online);
        Ok(())
    }

    /// Link two interfaces on different devices
    ///
    /// Both interfaces must exist, be shut down, and not already be linked.
    pub fn connect(&mut self, device1: &str, interface1: &str, device2: &str, interface2: &str) -> Result<(), DeviceError> {
        let a = self.index_of(device1)?;
        let b = self.index_of(device2)?;
        if a == b {
            return Err(DeviceError::SelfConnection(device1.to_string()));
        }
        for (idx, iface) in [(a, interface1), (b, interface2)] {
            let device = &self.devices[idx];
            let Some(found) = device.interface(iface) else {
                return Err(DeviceError::InterfaceNotFound {
                    device: device.name().to_string(),
                    interface: iface.to_string(),
                });
            };
            if found.up {
                return Err(DeviceError::InterfaceUp {
                    device: device.name().to_string(),
                    interface: iface.to_string(),
                });
            }
            if found.is_linked() {
                return Err(DeviceError::InterfaceLinked {
                    device: device.name().to_string(),
                    interface: iface.to_string(),
                });
            }
        }

        self.link(a, interface1, device2, interface2);
        self.link(b, interface2, device1, interface1);
        self.connections.push(ConnectionConfig {
            device1: device1.to_string(),
            interface1: interface1.to_string(),
            device2: device2.to_string(),
            interface2: interface2.to_string(),
        });
        info!(%device1, %interface1, %device2, %interface2, "connected");
        Ok(())
    }

    fn link(&mut self, idx: usize, iface: &str, peer: &str, peer_iface: &str) {
        if let Some(found) = self.devices[idx].interface_mut(iface) {
            found.link = Some(LinkEnd {
                device: peer.to_string(),
                interface: peer_iface.to_string(),
            });
        }
    }

    /// Remove the link between two interfaces
    ///
    /// Returns whether such a connection existed. Either orientation matches.
    pub fn disconnect(&mut self, device1: &str, interface1: &str, device2: &str, interface2: &str) -> Result<bool, DeviceError> {
        let a = self.index_of(device1)?;
        let b = self.index_of(device2)?;
        for (idx, iface) in [(a, interface1), (b, interface2)] {
            if self.devices[idx].interface(iface).is_none() {
                return Err(DeviceError::InterfaceNotFound {
                    device: self.devices[idx].name().to_string(),
                    interface: iface.to_string(),
                });
            }
        }

        let position = self.connections.iter().position(|c| {
            (c.device1 == device1 && c.interface1 == interface1 && c.device2 == device2 && c.interface2 == interface2)
                || (c.device1 == device2 && c.interface1 == interface2 && c.device2 == device1 && c.interface2 == interface1)
        });
        let Some(position) = position else {
            return Ok(false);
        };

        self.connections.remove(position);
        for (idx, iface) in [(a, interface1), (b, interface2)] {
            if let Some(found) = self.devices[idx].interface_mut(iface) {
                found.link = None;
            }
        }
        info!(%device1, %interface1, %device2, %interface2, "disconnected");
        Ok(true)
    }

    pub fn connections(&self) -> &[ConnectionConfig] {
        &self.connections
    }

    /// Queue a packet on the output queue of the interface owning `source`
    ///
    /// `ttl` defaults to the configured TTL.
    pub fn send_packet(
        &mut self,
        source: Ipv4Addr,
        destination: Ipv4Addr,
        message: &str,
        ttl: Option<u8>,
    ) -> Result<PacketId, NetworkError> {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let owner = self.devices.iter().enumerate().find_map(|(d, device)| {
            device
                .interfaces()
                .iter()
                .position(|iface| iface.ip == Some(source))
                .map(|i| (d, i))
        });
        let Some((d, i)) = owner else {
            self.record_error(format!("source address {source} not found"), format!("send {source} -> {destination}"));
            return Err(DeviceError::SourceNotFound(source.to_string()).into());
        };

        let packet = Packet::new(source, destination, message, ttl);
        let id = packet.id.clone();
        let device = &mut self.devices[d];
        debug!(device = %device.name(), packet = %id, %destination, ttl, "packet queued");
        let iface = &mut device.interfaces_mut()[i];
        iface.output_queue.push_back(packet);
        Ok(id)
    }

    /// Advance the simulation by one tick
    ///
    /// Every online device drains its output queues once, in insertion
    /// order. Drops are recorded in the event log.
    pub fn tick(&mut self) -> TickReport {
        self.tick += 1;
        let mut report = TickReport {
            tick: self.tick,
            ..Default::default()
        };

        for device in &mut self.devices {
            if !device.is_online() {
                report.devices_skipped += 1;
                continue;
            }
            report.devices_processed += 1;
            report.outcomes.extend(self.engine.process_device(device));
        }

        for outcome in &report.outcomes {
            if let Some(reason) = outcome.drop {
                self.events.record(NetworkEvent::drop(
                    self.tick,
                    reason,
                    outcome.detail.clone().unwrap_or_default(),
                    format!(
                        "{}: packet from {} to {}",
                        outcome.device, outcome.packet.source, outcome.packet.destination
                    ),
                ));
            }
        }

        info!(
            tick = self.tick,
            packets = report.outcomes.len(),
            transmitted = report.transmitted(),
            dropped = report.dropped(),
            "tick complete"
        );
        report
    }

    /// Run `ticks` ticks and collect their reports
    pub fn run_ticks(&mut self, ticks: u64) -> Vec<TickReport> {
        (0..ticks).map(|_| self.tick()).collect()
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventLog {
        &mut self.events
    }

    fn record_error(&mut self, message: String, context: String) {
        warn!(tick = self.tick, %context, "{message}");
        self.events.record(NetworkEvent::new(
            self.tick,
            EventKind::NetworkError,
            Severity::Error,
            message,
            context,
        ));
    }

    pub fn network_stats(&self) -> NetworkStats {
        let mut stats = NetworkStats {
            total_packets_sent: 0,
            total_packets_received: 0,
            total_packets_dropped: 0,
            average_hops: 0.0,
            top_talker: None,
            devices_online: 0,
            total_devices: self.devices.len(),
            queued_packets: 0,
            ticks: self.tick,
        };

        let mut total_hops = 0usize;
        let mut received = 0usize;
        let mut busiest = 0u64;
        for device in &self.devices {
            let counters = device.counters();
            stats.total_packets_sent += counters.sent;
            stats.total_packets_received += counters.received;
            stats.total_packets_dropped += counters.dropped;
            stats.queued_packets += device.queued_packets();
            if device.is_online() {
                stats.devices_online += 1;
            }

            for packet in device.history(None) {
                total_hops += packet.hops();
                received += 1;
            }

            let activity = counters.sent + counters.received;
            if activity > busiest {
                busiest = activity;
                stats.top_talker = Some(device.name().to_string());
            }
        }

        if received > 0 {
            stats.average_hops = total_hops as f64 / received as f64;
        }
        stats
    }

    /// Snapshot view of the current topology
    pub fn to_config(&self) -> SnapshotConfig {
        SnapshotConfig {
            devices: self.devices.iter().map(Device::to_config).collect(),
            connections: self.connections.clone(),
        }
    }

    /// Save the topology under `key`, or a time-based key
    ///
    /// Returns the key and the file written.
    pub fn save_snapshot(&mut self, key: Option<&str>) -> Result<(String, PathBuf), NetworkError> {
        let key = key.map(str::to_string).unwrap_or_else(SnapshotStore::generate_key);
        let config = self.to_config();
        match self.snapshots.save(&key, &config) {
            Ok(path) => Ok((key, path)),
            Err(e) => {
                self.record_error(format!("failed to save snapshot: {e}"), format!("snapshot {key}"));
                Err(e.into())
            }
        }
    }

    /// Replace the topology with a saved snapshot
    ///
    /// The current topology is left untouched if the snapshot cannot be
    /// read or does not describe a consistent topology.
    pub fn load_snapshot(&mut self, key: &str) -> Result<(), NetworkError> {
        let result = self
            .snapshots
            .load(key)
            .map_err(NetworkError::from)
            .and_then(|config| self.apply_config(&config));
        if let Err(e) = &result {
            self.record_error(format!("failed to load snapshot: {e}"), format!("snapshot {key}"));
        }
        result
    }

    /// Replace the topology with `config`
    pub fn apply_config(&mut self, config: &SnapshotConfig) -> Result<(), NetworkError> {
        let mut devices: Vec<Device> = Vec::with_capacity(config.devices.len());
        for dev in &config.devices {
            if devices.iter().any(|d| d.name() == dev.hostname) {
                return Err(DeviceError::DeviceExists(dev.hostname.clone()).into());
            }
            devices.push(Device::from_config(dev)?);
        }

        // Saved interfaces may already be up, so links are restored without
        // the shutdown check that `connect` applies.
        for conn in &config.connections {
            let ends = [
                (&conn.device1, &conn.interface1, &conn.device2, &conn.interface2),
                (&conn.device2, &conn.interface2, &conn.device1, &conn.interface1),
            ];
            for (device, iface, peer, peer_iface) in ends {
                let Some(found) = devices
                    .iter_mut()
                    .find(|d| d.name() == device.as_str())
                    .and_then(|d| d.interface_mut(iface))
                else {
                    return Err(DeviceError::InterfaceNotFound {
                        device: device.clone(),
                        interface: iface.clone(),
                    }
                    .into());
                };
                found.link = Some(LinkEnd {
                    device: peer.clone(),
                    interface: peer_iface.clone(),
                });
            }
        }

        self.devices = devices;
        self.connections = config.connections.clone();
        info!(devices = self.devices.len(), connections = self.connections.len(), "topology loaded");
        Ok(())
    }

    /// Indexed snapshot keys and file paths, in key order
    pub fn snapshots(&self) -> Vec<(&str, &str)> {
        self.snapshots.list()
    }

    pub fn snapshot_store(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// One-line status summary
    pub fn state_summary(&self) -> String {
        let stats = self.network_stats();
        format!(
            "Tick {}: {}/{} devices online, {} links, {} queued, sent={} dropped={} events={}",
            self.tick,
            stats.devices_online,
            stats.total_devices,
            self.connections.len(),
            stats.queued_packets,
            stats.total_packets_sent,
            stats.total_packets_dropped,
            self.events.len()
        )
    }
}
