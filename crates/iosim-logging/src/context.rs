//! Device context injection
//!
//! The forwarding engine processes one device at a time. This module keeps
//! the device currently being processed in thread-local storage so spans
//! opened inside that scope can be stamped with its name.

use std::cell::RefCell;

use uuid::Uuid;

/// Device context data stored in thread-local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceContextData {
    /// Hostname of the device
    pub device: String,
    /// Device kind (`router`, `switch`, ...)
    pub kind: String,
    /// Unique id of this processing scope
    pub instance_id: Uuid,
}

thread_local! {
    static DEVICE_CONTEXT: RefCell<Option<DeviceContextData>> = const { RefCell::new(None) };
}

/// RAII guard for device context
///
/// Sets the device context for the current thread on creation and restores
/// the previous context (if any) on drop.
///
/// # Example
///
/// ```ignore
/// use iosim_logging::DeviceContextGuard;
///
/// let _guard = DeviceContextGuard::new("Router1", "router");
/// tracing::info!("draining queues");
/// ```
pub struct DeviceContextGuard {
    previous: Option<DeviceContextData>,
}

impl DeviceContextGuard {
    /// Enter the context of `device`
    pub fn new(device: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::with_instance_id(device, kind, Uuid::new_v4())
    }

    /// Enter the context of `device` with a caller-chosen instance id
    pub fn with_instance_id(device: impl Into<String>, kind: impl Into<String>, instance_id: Uuid) -> Self {
        let new_ctx = DeviceContextData {
            device: device.into(),
            kind: kind.into(),
            instance_id,
        };
        let previous = DEVICE_CONTEXT.with(|ctx| ctx.borrow_mut().replace(new_ctx));
        Self { previous }
    }

    /// Get the current device context (if any)
    pub fn current() -> Option<DeviceContextData> {
        DEVICE_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    /// Get the current device name (if set)
    pub fn current_device() -> Option<String> {
        Self::current().map(|ctx| ctx.device)
    }
}

impl Drop for DeviceContextGuard {
    fn drop(&mut self) {
        DEVICE_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}

/// Run a block inside a device context scope
///
/// # Example
///
/// ```ignore
/// with_device_context!("Router1", "router", {
///     tracing::info!("draining queues");
/// });
/// ```
#[macro_export]
macro_rules! with_device_context {
    ($device:expr, $kind:expr, $body:block) => {{
        let _guard = $crate::context::DeviceContextGuard::new($device, $kind);
        $body
    }};
}
