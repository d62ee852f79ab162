//! `setTimeout` / `clearTimeout`

use std::sync::{Arc, Weak};

use serde_json::{json, Value};

use super::{Core, PendingCallback, Scheduler};
use crate::bus::{Channel, Context};
use crate::context::AsyncId;
use crate::wrap::{CallError, Callable, Instrumenter, MethodTable, WrapOptions};

/// Timer primitives on the `timer` channel.
///
/// Events: `setTimeout-start/-end` (`[[delay], null, "setTimeout"]`, end
/// result is the timer id), `clearTimeout-start/-end`, and the callback's
/// `fn-start/-err/-end`, all sharing the context of the `setTimeout` call.
pub struct Timers {
    instrumenter: Instrumenter,
    window: MethodTable,
}

impl Timers {
    pub(crate) fn new(core: &Arc<Core>, channel: &Channel) -> Self {
        let window = MethodTable::new();
        let weak = Arc::downgrade(core);
        window.define("setTimeout", raw_set_timeout(weak.clone()));
        window.define("clearTimeout", raw_clear_timeout(weak));

        let instrumenter = Instrumenter::new(channel);
        instrumenter.in_place(&window, &["setTimeout", "clearTimeout"], "-", None, true);
        Self {
            instrumenter,
            window,
        }
    }

    /// Schedule `callback` after `delay_ms` of virtual time
    pub fn set_timeout(&self, callback: &Callable, delay_ms: u64) -> Result<AsyncId, CallError> {
        let ctx = Context::new();
        let wrapped = self.instrumenter.wrap(
            callback,
            WrapOptions::prefix("fn-")
                .with_context(&ctx)
                .with_label("setTimeout"),
        );
        ctx.insert(PendingCallback(wrapped));
        let id = self
            .window
            .call("setTimeout", &Value::Null, &mut vec![json!(delay_ms)], &ctx)?;
        AsyncId::from_value(&id).ok_or_else(|| CallError::new("setTimeout returned no id"))
    }

    pub fn clear_timeout(&self, id: AsyncId) -> Result<(), CallError> {
        self.window
            .call("clearTimeout", &Value::Null, &mut vec![json!(id.0)], &Context::new())
            .map(|_| ())
    }
}

fn raw_set_timeout(core: Weak<Core>) -> Callable {
    Callable::named("setTimeout", move |_, args, ctx| {
        let core = core
            .upgrade()
            .ok_or_else(|| CallError::new("host is gone"))?;
        let delay = args.first().and_then(Value::as_u64).unwrap_or(0);
        let PendingCallback(callback) = ctx
            .get::<PendingCallback>()
            .ok_or_else(|| CallError::new("setTimeout requires a callback"))?;

        let weak = Arc::downgrade(&core);
        let id = core.event_loop.set_timeout(
            delay,
            Box::new(move || {
                if let Err(err) = callback.invoke(&mut Vec::new()) {
                    if let Some(core) = weak.upgrade() {
                        core.report_uncaught("setTimeout", &err);
                    }
                }
            }),
        );
        Ok(json!(id.0))
    })
}

fn raw_clear_timeout(core: Weak<Core>) -> Callable {
    Callable::named("clearTimeout", move |_, args, _| {
        if let (Some(core), Some(id)) = (core.upgrade(), args.first().and_then(AsyncId::from_value)) {
            core.event_loop.clear_timeout(id);
        }
        Ok(Value::Null)
    })
}
