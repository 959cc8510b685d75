//! Custom tracing layers for iosim
//!
//! [`DeviceContextLayer`] copies the active [`DeviceContextGuard`] onto every
//! span created while it is in scope.

use tracing::{Subscriber, span};
use tracing_subscriber::{
    layer::{Context, Layer},
    registry::LookupSpan,
};

use crate::context::{DeviceContextData, DeviceContextGuard};

/// Layer that attaches the current device context to new spans
#[derive(Debug, Default)]
pub struct DeviceContextLayer;

impl DeviceContextLayer {
    pub fn new() -> Self {
        Self
    }
}

/// Extension data stored on spans
#[derive(Debug, Clone)]
pub struct DeviceContextExtension {
    pub data: DeviceContextData,
}

impl<S> Layer<S> for DeviceContextLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            if let Some(device_ctx) = DeviceContextGuard::current() {
                span.extensions_mut()
                    .insert(DeviceContextExtension { data: device_ctx });
            }
        }
    }
}

/// Device context attached to the innermost span that carries one
pub fn span_device_context<S>(ctx: &Context<'_, S>) -> Option<DeviceContextData>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    let scope = ctx.lookup_current()?.scope();
    scope
        .into_iter()
        .find_map(|span| span.extensions().get::<DeviceContextExtension>().map(|ext| ext.data.clone()))
}
