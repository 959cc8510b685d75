//! Packet types for the forwarding pipeline

use std::fmt::Display;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default time-to-live for new packets
pub const DEFAULT_TTL: u8 = 64;

/// Short unique packet identifier (8 hex characters)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PacketId(pub String);

impl PacketId {
    /// Generate a fresh identifier
    pub fn generate() -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(8);
        Self(id)
    }
}

impl Display for PacketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A simulated IPv4 packet
///
/// Owned by whichever interface queue currently holds it. The forwarding
/// engine takes it out of the queue, decides its disposition, and hands it
/// back to the caller inside the tick report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    /// Unique packet identifier
    pub id: PacketId,
    /// Sender address
    pub source: Ipv4Addr,
    /// Destination address
    pub destination: Ipv4Addr,
    /// Message payload
    pub message: String,
    /// Remaining hops before the packet expires
    pub ttl: u8,
    /// Device names this packet has visited, in order
    pub path: Vec<String>,
    /// When the packet was created
    pub created_at: DateTime<Utc>,
    /// When the packet reached its destination
    pub arrived_at: Option<DateTime<Utc>>,
    /// Set once the TTL has reached zero
    pub ttl_expired: bool,
}

impl Packet {
    /// Create a new packet
    pub fn new(source: Ipv4Addr, destination: Ipv4Addr, message: impl Into<String>, ttl: u8) -> Self {
        Self {
            id: PacketId::generate(),
            source,
            destination,
            message: message.into(),
            ttl,
            path: Vec::new(),
            created_at: Utc::now(),
            arrived_at: None,
            ttl_expired: ttl == 0,
        }
    }

    /// Record that a device handled this packet (no duplicates)
    pub fn add_to_path(&mut self, device: &str) {
        if !self.path.iter().any(|d| d == device) {
            self.path.push(device.to_string());
        }
    }

    /// Decrement TTL, returns false once the packet has expired
    pub fn decrement_ttl(&mut self) -> bool {
        self.ttl = self.ttl.saturating_sub(1);
        if self.ttl == 0 {
            self.ttl_expired = true;
        }
        self.ttl > 0
    }

    /// Mark the packet as arrived at its destination
    pub fn mark_arrived(&mut self) {
        self.arrived_at = Some(Utc::now());
    }

    /// Number of hops taken so far
    pub fn hops(&self) -> usize {
        self.path.len().saturating_sub(1)
    }

    /// Summary used by reports
    pub fn summary(&self) -> PacketSummary {
        let message = if self.message.chars().count() > 50 {
            let head: String = self.message.chars().take(50).collect();
            format!("{head}...")
        } else {
            self.message.clone()
        };

        PacketSummary {
            id: self.id.clone(),
            source: self.source,
            destination: self.destination,
            message,
            ttl: self.ttl,
            ttl_expired: self.ttl_expired,
            hops: self.hops(),
            path: self.path.clone(),
            timestamp: self.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

impl Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ttl = if self.ttl_expired {
            "EXPIRED".to_string()
        } else {
            format!("TTL={}", self.ttl)
        };
        let path = if self.path.is_empty() {
            "No path".to_string()
        } else {
            self.path.join(" -> ")
        };
        write!(
            f,
            "Packet {}: {} -> {} | {} | Hops: {} | Path: {}",
            self.id,
            self.source,
            self.destination,
            ttl,
            self.hops(),
            path
        )
    }
}

/// Flattened packet view for reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketSummary {
    pub id: PacketId,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub message: String,
    pub ttl: u8,
    pub ttl_expired: bool,
    pub hops: usize,
    pub path: Vec<String>,
    pub timestamp: String,
}
