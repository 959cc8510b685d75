//! Error types for iosim

use thiserror::Error;

/// Top-level error type for iosim
#[derive(Debug, Error)]
pub enum IosimError {
    #[error("Address error: {0}")]
    Address(#[from] AddressError),

    #[error("Invariant violated: {0}")]
    Invariant(#[from] InvariantError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
}

/// Errors related to IPv4 address and mask parsing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Invalid IPv4 address: {0}")]
    InvalidAddress(String),

    #[error("Invalid prefix length: {0}")]
    InvalidPrefixLength(u8),
}

/// Structural invariant violations
///
/// These are defects, never runtime conditions: the balanced structures
/// report them from `check_invariants()` and assert on them in debug builds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantError {
    #[error("Balance factor {balance} out of range at node {key}")]
    Unbalanced { key: String, balance: i64 },

    #[error("Stored height {stored} differs from computed height {computed} at node {key}")]
    HeightMismatch {
        key: String,
        stored: usize,
        computed: usize,
    },

    #[error("Keys out of order at {key}")]
    OutOfOrder { key: String },

    #[error("Node holds {keys} keys, allowed range is {min}..={max}")]
    Occupancy { keys: usize, min: usize, max: usize },

    #[error("Internal node has {children} children for {keys} keys")]
    ChildCount { keys: usize, children: usize },

    #[error("Leaves found at depths {first} and {other}")]
    UnevenLeaves { first: usize, other: usize },

    #[error("Counted {counted} nodes, bookkeeping says {tracked}")]
    NodeCount { counted: usize, tracked: usize },

    #[error("Dangling node with no children and no terminus at depth {depth}")]
    Unpruned { depth: usize },
}

/// Errors related to device and network bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device already exists: {0}")]
    DeviceExists(String),

    #[error("Interface not found: {device}.{interface}")]
    InterfaceNotFound { device: String, interface: String },

    #[error("Interface {device}.{interface} must be shut down before connecting")]
    InterfaceUp { device: String, interface: String },

    #[error("Interface {device}.{interface} is already connected")]
    InterfaceLinked { device: String, interface: String },

    #[error("Cannot connect device {0} to itself")]
    SelfConnection(String),

    #[error("No interface owns source address {0}")]
    SourceNotFound(String),

    #[error("Unknown device type: {0}")]
    UnknownKind(String),
}
