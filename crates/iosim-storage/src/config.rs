//! Textual snapshot configuration
//!
//! A snapshot is a plain-text, line-oriented description of a topology:
//!
//! ```text
//! hostname R1
//! device-type router
//! interface g0/0
//!   ip address 192.168.1.1 255.255.255.0
//!   no shutdown
//! exit
//! ip route 10.0.0.0 255.0.0.0 via 192.168.1.254 metric 10
//!
//! connect R1 g0/0 SW1 g0/1
//! ```
//!
//! Device blocks are separated by blank lines, connections come last. Lines
//! starting with `#` are comments.

use std::fmt::Write;
use std::net::Ipv4Addr;

use iosim_core::parse_ipv4;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Mask assumed when an `ip address` line omits it
pub const DEFAULT_MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub name: String,
    pub ip: Option<Ipv4Addr>,
    pub mask: Ipv4Addr,
    pub up: bool,
}

impl InterfaceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ip: None,
            mask: DEFAULT_MASK,
            up: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub prefix: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    pub metric: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub hostname: String,
    /// Lower-case device kind (`router`, `switch`, `host`, `firewall`)
    pub device_type: String,
    pub interfaces: Vec<InterfaceConfig>,
    pub routes: Vec<RouteConfig>,
}

impl DeviceConfig {
    pub fn new(hostname: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            device_type: device_type.into(),
            interfaces: Vec::new(),
            routes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub device1: String,
    pub interface1: String,
    pub device2: String,
    pub interface2: String,
}

/// A complete topology snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    pub devices: Vec<DeviceConfig>,
    pub connections: Vec<ConnectionConfig>,
}

impl SnapshotConfig {
    /// Render to the textual format
    pub fn render(&self) -> String {
        let mut out = String::new();
        for device in &self.devices {
            let _ = writeln!(out, "hostname {}", device.hostname);
            let _ = writeln!(out, "device-type {}", device.device_type);
            for iface in &device.interfaces {
                let _ = writeln!(out, "interface {}", iface.name);
                if let Some(ip) = iface.ip {
                    let _ = writeln!(out, "  ip address {} {}", ip, iface.mask);
                }
                let _ = writeln!(out, "  {}shutdown", if iface.up { "no " } else { "" });
                let _ = writeln!(out, "exit");
            }
            for route in &device.routes {
                let _ = writeln!(
                    out,
                    "ip route {} {} via {} metric {}",
                    route.prefix, route.mask, route.next_hop, route.metric
                );
            }
            out.push('\n');
        }
        for conn in &self.connections {
            let _ = writeln!(
                out,
                "connect {} {} {} {}",
                conn.device1, conn.interface1, conn.device2, conn.interface2
            );
        }
        out
    }

    /// Parse the textual format
    pub fn parse(text: &str) -> Result<Self, StorageError> {
        let mut config = SnapshotConfig::default();
        let mut device: Option<DeviceConfig> = None;
        let mut iface: Option<InterfaceConfig> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.starts_with('#') {
                continue;
            }
            let words: Vec<&str> = line.split_whitespace().collect();
            let addr = |s: &str| parse_ipv4(s).map_err(|source| StorageError::Address { line: line_no, source });

            match words.as_slice() {
                [] => flush(&mut config, &mut device, &mut iface),
                ["hostname", name] => {
                    flush(&mut config, &mut device, &mut iface);
                    device = Some(DeviceConfig::new(*name, "router"));
                }
                ["device-type", kind] => {
                    current(&mut device, line_no)?.device_type = kind.to_lowercase();
                }
                ["interface", name] => {
                    let dev = current(&mut device, line_no)?;
                    dev.interfaces.extend(iface.take());
                    iface = Some(InterfaceConfig::new(*name));
                }
                ["ip", "address", ip, rest @ ..] if rest.len() <= 1 => {
                    let Some(current_iface) = iface.as_mut() else {
                        return Err(StorageError::parse(line_no, "ip address outside interface"));
                    };
                    current_iface.ip = Some(addr(*ip)?);
                    if let Some(mask) = rest.first() {
                        current_iface.mask = addr(*mask)?;
                    }
                }
                ["shutdown"] | ["no", "shutdown"] => {
                    let Some(current_iface) = iface.as_mut() else {
                        return Err(StorageError::parse(line_no, "shutdown outside interface"));
                    };
                    current_iface.up = words[0] == "no";
                }
                ["exit"] => {
                    let dev = current(&mut device, line_no)?;
                    dev.interfaces.extend(iface.take());
                }
                ["ip", "route", prefix, mask, "via", next_hop, "metric", metric] => {
                    let route = RouteConfig {
                        prefix: addr(*prefix)?,
                        mask: addr(*mask)?,
                        next_hop: addr(*next_hop)?,
                        metric: metric
                            .parse()
                            .map_err(|_| StorageError::parse(line_no, format!("invalid metric '{metric}'")))?,
                    };
                    current(&mut device, line_no)?.routes.push(route);
                }
                ["connect", d1, i1, d2, i2] => {
                    flush(&mut config, &mut device, &mut iface);
                    config.connections.push(ConnectionConfig {
                        device1: d1.to_string(),
                        interface1: i1.to_string(),
                        device2: d2.to_string(),
                        interface2: i2.to_string(),
                    });
                }
                _ => {
                    return Err(StorageError::parse(line_no, format!("unknown directive '{line}'")));
                }
            }
        }

        flush(&mut config, &mut device, &mut iface);
        Ok(config)
    }
}

/// Close the open device block, if any
fn flush(config: &mut SnapshotConfig, device: &mut Option<DeviceConfig>, iface: &mut Option<InterfaceConfig>) {
    if let Some(mut dev) = device.take() {
        dev.interfaces.extend(iface.take());
        config.devices.push(dev);
    }
}

fn current(device: &mut Option<DeviceConfig>, line: usize) -> Result<&mut DeviceConfig, StorageError> {
    device
        .as_mut()
        .ok_or_else(|| StorageError::parse(line, "directive before any hostname"))
}
