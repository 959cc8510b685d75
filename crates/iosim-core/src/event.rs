//! Network events and the bounded event log

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of entries retained by an [`EventLog`]
pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 1000;

/// Why the forwarding engine dropped a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DropReason {
    /// A block rule or TTL floor matched the destination
    PolicyViolation,
    /// Route lookup (or egress selection) found nothing
    NoRouteToHost,
    /// TTL reached zero after transmission
    TtlExpired,
}

impl DropReason {
    /// Log severity used when recording this drop
    pub fn severity(&self) -> Severity {
        match self {
            Self::PolicyViolation => Severity::Warning,
            Self::NoRouteToHost => Severity::Error,
            Self::TtlExpired => Severity::Info,
        }
    }
}

impl Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PolicyViolation => write!(f, "PolicyViolation"),
            Self::NoRouteToHost => write!(f, "NoRouteToHost"),
            Self::TtlExpired => write!(f, "TTLExpired"),
        }
    }
}

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Kind of a recorded event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A packet was dropped by the forwarding engine
    Drop(DropReason),
    /// A network-level operation failed (unknown source, bad snapshot, ...)
    NetworkError,
}

impl Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Drop(reason) => write!(f, "{reason}"),
            Self::NetworkError => write!(f, "NetworkError"),
        }
    }
}

/// A single entry in the event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkEvent {
    /// Simulation tick the event happened on
    pub tick: u64,
    /// Wall-clock time the event was recorded
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub severity: Severity,
    pub message: String,
    /// Free-form context (device, packet endpoints, command)
    pub context: String,
}

impl NetworkEvent {
    /// Create an event stamped with the current time
    pub fn new(
        tick: u64,
        kind: EventKind,
        severity: Severity,
        message: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            tick,
            timestamp: Utc::now(),
            kind,
            severity,
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a drop event with the severity of its reason
    pub fn drop(
        tick: u64,
        reason: DropReason,
        message: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self::new(tick, EventKind::Drop(reason), reason.severity(), message, context)
    }
}

impl Display for NetworkEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} - {}: {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.severity,
            self.kind,
            self.message
        )?;
        if !self.context.is_empty() {
            write!(f, " | {}", self.context)?;
        }
        Ok(())
    }
}

/// Counts of events by kind and severity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventCounts {
    pub by_kind: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    pub total: usize,
}

/// Bounded FIFO event log
///
/// Once `capacity` entries are held, recording a new event evicts the oldest.
#[derive(Debug, Clone)]
pub struct EventLog {
    events: VecDeque<NetworkEvent>,
    capacity: usize,
}

impl EventLog {
    /// Create an event log retaining at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(DEFAULT_EVENT_LOG_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    /// Record an event
    pub fn record(&mut self, event: NetworkEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// All retained events, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &NetworkEvent> {
        self.events.iter()
    }

    /// The most recent `limit` events, oldest first
    pub fn recent(&self, limit: usize) -> Vec<&NetworkEvent> {
        let skip = self.events.len().saturating_sub(limit);
        self.events.iter().skip(skip).collect()
    }

    /// Events of a specific kind
    pub fn by_kind(&self, kind: EventKind) -> Vec<&NetworkEvent> {
        self.events.iter().filter(|e| e.kind == kind).collect()
    }

    /// Events of a specific severity
    pub fn by_severity(&self, severity: Severity) -> Vec<&NetworkEvent> {
        self.events.iter().filter(|e| e.severity == severity).collect()
    }

    /// Count events by kind and severity
    pub fn counts(&self) -> EventCounts {
        let mut counts = EventCounts {
            total: self.events.len(),
            ..Default::default()
        };
        for event in &self.events {
            *counts.by_kind.entry(event.kind.to_string()).or_default() += 1;
            *counts.by_severity.entry(event.severity.to_string()).or_default() += 1;
        }
        counts
    }

    /// Drop all events
    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_LOG_CAPACITY)
    }
}
