//! Late consumer registration with backlog replay

use std::collections::HashMap;

use serde_json::json;

use super::channel::{Channel, Listener};
use super::report_internal_error;
use crate::error::TrackerError;

struct Registration {
    channel: Channel,
    event: String,
    listener: Listener,
}

/// Listeners staged per group until the group is drained.
///
/// A consumer that attaches after events were already buffered registers
/// here instead of calling [`Channel::on`] directly; [`Registry::drain`] then
/// replays the backlog to the matching registrations in original order and
/// only afterwards installs them as live listeners.
#[derive(Default)]
pub struct Registry {
    groups: HashMap<String, Vec<Registration>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, channel: &Channel, event: &str, listener: Listener, group: &str) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .push(Registration {
                channel: channel.clone(),
                event: event.to_string(),
                listener,
            });
    }

    pub fn pending(&self, group: &str) -> usize {
        self.groups.get(group).map_or(0, Vec::len)
    }

    /// Replay `group`'s backlog, go live, and emit `drain-<group>` on `bus`.
    /// Returns the number of listener invocations made during replay.
    pub fn drain(&mut self, bus: &Channel, group: &str) -> usize {
        let registrations = self.groups.remove(group).unwrap_or_default();
        let entries = bus.take_backlog(group).unwrap_or_default();

        let mut replayed = 0;
        for entry in &entries {
            for registration in registrations
                .iter()
                .filter(|r| r.event == entry.event && r.channel.ptr_eq(&entry.channel))
            {
                let mut args = entry.args.clone();
                replayed += 1;
                if let Err(err) = (registration.listener)(&mut args, &entry.context) {
                    let err = TrackerError::listener(&entry.event, &err);
                    report_internal_error(&entry.channel, &entry.event, &err);
                }
            }
        }

        for registration in registrations {
            registration
                .channel
                .on(&registration.event, registration.listener);
        }

        tracing::debug!(group, replayed, backlog = entries.len(), "Drained backlog group");

        let event = format!("drain-{group}");
        if let Err(err) = bus.emit(&event, &mut vec![json!(group)], None) {
            report_internal_error(bus, &event, &err);
        }
        replayed
    }
}
