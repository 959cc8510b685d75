//! Per-device forwarding pipeline
//!
//! Once per tick the engine drains every output queue of a device, in
//! interface order, and runs each packet through a fixed sequence of stages:
//!
//! 1. Longest-prefix policy lookup on the destination
//! 2. Policy evaluation (block, or TTL below the floor) → `PolicyViolation`
//! 3. Route lookup, /32 down to /0 → `NoRouteToHost` on a miss
//! 4. Egress selection: the first interface that is up and linked
//! 5. Address resolution through the device cache, learning on a miss;
//!    the packet is transmitted and its TTL decremented
//! 6. Post-transmit TTL check → `TtlExpired`
//!
//! Egress selection does not check that the chosen interface can reach the
//! next hop. Transmitted packets are handed back in the outcome; nothing is
//! delivered to neighbors.

use std::net::Ipv4Addr;

use iosim_core::{DropReason, Packet, Severity};
use iosim_logging::DeviceContextGuard;
use iosim_routing::Policy;
use serde::Serialize;
use tracing::{debug_span, info, trace, warn};

use crate::device::Device;

/// How a transmitted packet left the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transmission {
    /// Egress interface name
    pub interface: String,
    pub next_hop: Ipv4Addr,
    /// Whether the next hop was already in the resolution cache
    pub cache_hit: bool,
}

/// Disposition of one packet
///
/// A packet can be both transmitted and dropped: a transmit that takes the
/// TTL to zero expires in the same tick.
#[derive(Debug, Clone, Serialize)]
pub struct ForwardOutcome {
    /// Device that processed the packet
    pub device: String,
    pub packet: Packet,
    pub transmission: Option<Transmission>,
    pub drop: Option<DropReason>,
    /// Human-readable drop explanation
    pub detail: Option<String>,
}

impl ForwardOutcome {
    pub fn is_transmitted(&self) -> bool {
        self.transmission.is_some()
    }

    pub fn is_dropped(&self) -> bool {
        self.drop.is_some()
    }
}

/// Everything that happened during one tick
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub outcomes: Vec<ForwardOutcome>,
    /// Online devices whose queues were drained
    pub devices_processed: usize,
    /// Offline devices left untouched
    pub devices_skipped: usize,
}

impl TickReport {
    pub fn transmitted(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_transmitted()).count()
    }

    pub fn dropped(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_dropped()).count()
    }

    /// Number of drops with a specific reason
    pub fn drops(&self, reason: DropReason) -> usize {
        self.outcomes.iter().filter(|o| o.drop == Some(reason)).count()
    }

    pub fn summary(&self) -> String {
        format!(
            "Tick {}: {} packets, {} transmitted, {} dropped, {} devices ({} offline)",
            self.tick,
            self.outcomes.len(),
            self.transmitted(),
            self.dropped(),
            self.devices_processed,
            self.devices_skipped
        )
    }
}

/// Stateless forwarding engine
///
/// All state lives in the [`Device`] being processed.
#[derive(Debug, Clone, Default)]
pub struct ForwardingEngine {
    trace: bool,
}

impl ForwardingEngine {
    /// Create an engine, `trace` enables per-stage trace events
    pub fn new(trace: bool) -> Self {
        Self { trace }
    }

    /// Drain every output queue of `device`
    ///
    /// Offline devices are left untouched and produce no outcomes.
    pub fn process_device(&self, device: &mut Device) -> Vec<ForwardOutcome> {
        if !device.is_online() {
            return Vec::new();
        }

        let _ctx = DeviceContextGuard::new(device.name(), device.kind().as_str());
        let span = debug_span!("drain", device = %device.name());
        let _enter = span.enter();

        let mut outcomes = Vec::new();
        for idx in 0..device.interfaces().len() {
            while let Some(packet) = device.interfaces_mut()[idx].output_queue.pop_front() {
                outcomes.push(self.forward(device, packet));
            }
        }
        outcomes
    }

    /// Run a single packet through the pipeline
    pub fn forward(&self, device: &mut Device, mut packet: Packet) -> ForwardOutcome {
        packet.add_to_path(device.name());
        let destination = packet.destination;

        let matched = device
            .policies()
            .search_longest_prefix(destination)
            .map(|(prefix, policy)| (prefix.to_string(), policy));
        if self.trace {
            trace!(packet = %packet.id, %destination, policy = ?matched, "policy lookup");
        }
        if let Some((prefix, policy)) = matched.filter(|(_, policy)| policy.rejects(packet.ttl)) {
            let detail = match policy {
                Policy::Block => format!("blocked by policy on prefix {prefix}"),
                Policy::TtlMin(min) => {
                    format!("TTL {} below minimum {min} for prefix {prefix}", packet.ttl)
                }
            };
            return self.dropped(device, packet, None, DropReason::PolicyViolation, detail);
        }

        let route = device
            .routing_table()
            .lookup(destination)
            .map(|(key, route)| (key.to_string(), route.next_hop));
        let Some((route_key, next_hop)) = route else {
            let detail = format!("no route to {destination}");
            return self.dropped(device, packet, None, DropReason::NoRouteToHost, detail);
        };
        if self.trace {
            trace!(packet = %packet.id, route = %route_key, %next_hop, "route lookup");
        }

        let egress = device
            .interfaces()
            .iter()
            .find(|iface| iface.is_usable())
            .map(|iface| iface.name.clone());
        let Some(interface) = egress else {
            let detail = format!("no usable interface towards {destination}");
            return self.dropped(device, packet, None, DropReason::NoRouteToHost, detail);
        };

        let cache = device.resolution_cache_mut();
        let cache_hit = cache.contains_key(&next_hop);
        if !cache_hit {
            cache.insert(next_hop, interface.clone());
        }
        device.counters.sent += 1;
        // Saturates, so a packet queued with TTL 0 is sent and then expires
        packet.decrement_ttl();
        if self.trace {
            trace!(packet = %packet.id, %interface, %next_hop, cache_hit, ttl = packet.ttl, "transmitted");
        }

        let transmission = Transmission {
            interface,
            next_hop,
            cache_hit,
        };
        if packet.ttl == 0 {
            let detail = format!("TTL expired for packet from {} to {destination}", packet.source);
            return self.dropped(device, packet, Some(transmission), DropReason::TtlExpired, detail);
        }

        ForwardOutcome {
            device: device.name().to_string(),
            packet,
            transmission: Some(transmission),
            drop: None,
            detail: None,
        }
    }

    fn dropped(
        &self,
        device: &mut Device,
        packet: Packet,
        transmission: Option<Transmission>,
        reason: DropReason,
        detail: String,
    ) -> ForwardOutcome {
        device.counters.dropped += 1;
        match reason.severity() {
            Severity::Info => info!(device = %device.name(), packet = %packet.id, %reason, "{detail}"),
            _ => warn!(device = %device.name(), packet = %packet.id, %reason, "{detail}"),
        }
        ForwardOutcome {
            device: device.name().to_string(),
            packet,
            transmission,
            drop: Some(reason),
            detail: Some(detail),
        }
    }
}
