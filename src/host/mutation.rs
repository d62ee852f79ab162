//! DOM mutation observers

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::{json, Value};

use super::Core;
use crate::bus::{Channel, Context};
use crate::wrap::{Callable, Instrumenter, WrapOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(u64);

struct Batch {
    ctx: Context,
    records: Vec<Value>,
}

#[derive(Default)]
struct MutationState {
    next_id: u64,
    observers: Vec<(ObserverId, Callable)>,
    batch: Option<Batch>,
}

/// Mutation observers on the `mutation` channel.
///
/// Records made in one task are delivered together from a microtask.
/// The first record of a batch emits `dom-mutation [record]` on the batch's
/// context, and every observer callback (`fn-start/-err/-end`) runs under it.
pub struct MutationObservers {
    core: Weak<Core>,
    instrumenter: Instrumenter,
    state: Arc<Mutex<MutationState>>,
}

impl MutationObservers {
    pub(crate) fn new(core: &Arc<Core>, channel: &Channel) -> Self {
        Self {
            core: Arc::downgrade(core),
            instrumenter: Instrumenter::new(channel),
            state: Arc::new(Mutex::new(MutationState::default())),
        }
    }

    pub fn observe(&self, callback: &Callable) -> ObserverId {
        let wrapped = self
            .instrumenter
            .wrap(callback, WrapOptions::prefix("fn-").with_label("MutationObserver"));
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = ObserverId(state.next_id);
        state.observers.push((id, wrapped));
        id
    }

    pub fn disconnect(&self, id: ObserverId) -> bool {
        let mut state = self.state.lock();
        let before = state.observers.len();
        state.observers.retain(|(observer, _)| *observer != id);
        state.observers.len() != before
    }

    /// Record a DOM change
    pub fn mutate(&self, record: Value) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        let opened = {
            let mut state = self.state.lock();
            if state.observers.is_empty() {
                return;
            }
            match &mut state.batch {
                Some(batch) => {
                    batch.records.push(record.clone());
                    None
                }
                None => {
                    let ctx = Context::new();
                    state.batch = Some(Batch {
                        ctx: ctx.clone(),
                        records: vec![record.clone()],
                    });
                    Some(ctx)
                }
            }
        };
        let Some(ctx) = opened else {
            return;
        };

        self.instrumenter
            .emit("dom-mutation", &mut vec![record], &ctx, true);

        let state = Arc::downgrade(&self.state);
        let weak = Arc::downgrade(&core);
        core.event_loop.queue_microtask(Box::new(move || {
            let Some(state) = state.upgrade() else {
                return;
            };
            let (batch, observers) = {
                let mut state = state.lock();
                (state.batch.take(), state.observers.clone())
            };
            let Some(batch) = batch else {
                return;
            };
            for (_, observer) in observers {
                let mut args = vec![json!(batch.records)];
                if let Err(err) = observer.call(&Value::Null, &mut args, &batch.ctx) {
                    if let Some(core) = weak.upgrade() {
                        core.report_uncaught("MutationObserver", &err);
                    }
                }
            }
        }));
    }
}
