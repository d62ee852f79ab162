//! Hierarchical publish/subscribe channels
//!
//! Producers (instrumented host primitives) emit named lifecycle events on
//! their own child channel; consumers listen on whichever scope they need.

mod channel;
mod context;
mod drain;

pub use channel::{
    listener, BacklogEntry, Channel, EventArgs, Listener, API_GROUP, DEFAULT_GROUP,
};
pub use context::Context;
pub use drain::Registry;

use serde_json::json;

use crate::error::TrackerError;

/// Event name used to report failures raised by listeners
pub const INTERNAL_ERROR: &str = "internal-error";

/// Report a listener failure as an `internal-error` emit on `channel`.
///
/// Failures of the report itself are only logged, so a broken
/// `internal-error` listener cannot loop.
pub fn report_internal_error(channel: &Channel, event: &str, err: &TrackerError) {
    tracing::warn!(channel = channel.name(), event, error = %err, "Listener failed");
    if event == INTERNAL_ERROR {
        return;
    }
    let mut args = vec![json!(err.to_string()), json!(event)];
    if let Err(nested) = channel.emit_with(INTERNAL_ERROR, &mut args, None, true, true) {
        tracing::warn!(error = %nested, "internal-error listener failed");
    }
}

/// Emit and reroute any listener failure to `internal-error`.
/// Returns the resolved emission context either way.
pub fn emit_reported(
    channel: &Channel,
    event: &str,
    args: &mut EventArgs,
    context: Option<&Context>,
    force: bool,
    bubble: bool,
) -> Context {
    let ctx = context.cloned().unwrap_or_default();
    if let Err(err) = channel.emit_with(event, args, Some(&ctx), force, bubble) {
        report_internal_error(channel, event, &err);
    }
    ctx
}
