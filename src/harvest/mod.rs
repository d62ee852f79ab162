//! Consumers of finished interactions and callback errors
//!
//! [`Harvest::attach`] is a late consumer: it registers its listeners in the
//! feature group and drains the backlog the tracker buffered since install,
//! so interactions saved before attach are harvested like later ones.

mod errors;
mod queue;

pub use errors::{ErrorCollector, ErrorRecord};
pub use queue::HarvestQueue;

use serde_json::Value;

use crate::bus::{listener, Context, EventArgs, Registry, DEFAULT_GROUP};
use crate::error::TrackerError;
use crate::tracer::{ErrorNode, Tracker, INTERACTION_DISCARDED, INTERACTION_SAVED};
use crate::tree::InteractionPayload;

const ERROR_EVENTS: &[&str] = &["fn-err", "cb-err", "tracer-err"];

#[derive(Clone)]
pub struct Harvest {
    queue: HarvestQueue,
    errors: ErrorCollector,
}

impl Harvest {
    /// Subscribe to `tracker`'s bus and replay its backlog
    pub fn attach(tracker: &Tracker) -> Self {
        let config = tracker.config();
        let scheduler = tracker.host().scheduler();
        let harvest = Self {
            queue: HarvestQueue::new(
                scheduler.clone(),
                config.max_harvest_queue,
                config.harvest_interval_ms,
            ),
            errors: ErrorCollector::new(),
        };

        let bus = tracker.bus();
        let mut registry = Registry::new();

        let queue = harvest.queue.clone();
        let errors = harvest.errors.clone();
        registry.register(
            bus,
            INTERACTION_SAVED,
            listener(move |args, _| {
                let id = interaction_id(args, INTERACTION_SAVED)?;
                errors.on_saved(id);
                let payload: InteractionPayload = serde_json::from_value(
                    args.get(1).cloned().unwrap_or(Value::Null),
                )
                .map_err(TrackerError::from)?;
                queue.push(payload);
                Ok(())
            }),
            DEFAULT_GROUP,
        );

        let errors = harvest.errors.clone();
        registry.register(
            bus,
            INTERACTION_DISCARDED,
            listener(move |args, _| {
                errors.on_discarded(interaction_id(args, INTERACTION_DISCARDED)?);
                Ok(())
            }),
            DEFAULT_GROUP,
        );

        for event in ERROR_EVENTS {
            let errors = harvest.errors.clone();
            let scheduler = scheduler.clone();
            let name = (*event).to_string();
            registry.register(
                bus,
                event,
                listener(move |args, ctx| {
                    let (record, interaction) = error_record(&name, args, ctx, scheduler.now());
                    errors.record(record, interaction);
                    Ok(())
                }),
                DEFAULT_GROUP,
            );
        }

        let replayed = registry.drain(bus, DEFAULT_GROUP);
        tracing::debug!(replayed, "Harvest attached");
        harvest
    }

    pub fn queue(&self) -> &HarvestQueue {
        &self.queue
    }

    pub fn errors(&self) -> &ErrorCollector {
        &self.errors
    }
}

fn interaction_id(args: &EventArgs, event: &str) -> Result<u64, TrackerError> {
    args.first()
        .and_then(Value::as_u64)
        .ok_or_else(|| TrackerError::invalid_args(event, "missing interaction id"))
}

fn error_record(
    event: &str,
    args: &EventArgs,
    ctx: &Context,
    timestamp: u64,
) -> (ErrorRecord, Option<u64>) {
    let message = args
        .get(2)
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    let interaction = match ctx.get::<ErrorNode>() {
        Some(ErrorNode(Some(node))) if !node.interaction().is_finished() => {
            Some(node.interaction().id())
        }
        _ => None,
    };
    let record = ErrorRecord {
        message,
        event: event.to_string(),
        timestamp,
        browser_interaction_id: None,
    };
    (record, interaction)
}
