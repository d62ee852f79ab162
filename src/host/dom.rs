//! DOM event targets and dispatch

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::{json, Value};

use super::{Core, Scheduler};
use crate::bus::{Channel, Context};
use crate::context::AsyncId;
use crate::wrap::{Callable, Instrumenter, Resolver, WrapOptions};

struct DomListener {
    target: String,
    event_type: String,
    original: Callable,
    callback: Callable,
}

/// Event listeners on the `events` channel.
///
/// Instrumented listeners emit `fn-start/-err/-end` with `[[event], target,
/// "addEventListener"]`. All listeners of one dispatched event share the
/// event's context. Events bubble from the target to `document` to `window`.
pub struct Dom {
    core: Weak<Core>,
    instrumenter: Instrumenter,
    listeners: Mutex<Vec<DomListener>>,
    raw: Mutex<Vec<DomListener>>,
}

impl Dom {
    pub(crate) fn new(core: &Arc<Core>, channel: &Channel) -> Self {
        Self {
            core: Arc::downgrade(core),
            instrumenter: Instrumenter::new(channel),
            listeners: Mutex::new(Vec::new()),
            raw: Mutex::new(Vec::new()),
        }
    }

    pub fn add_event_listener(&self, target: &str, event_type: &str, callback: &Callable) {
        let core = self.core.clone();
        let resolver = Resolver::dynamic(move |args, _| {
            let id = args
                .first()
                .and_then(|event| event.get("id"))
                .and_then(AsyncId::from_value);
            match (core.upgrade(), id) {
                (Some(core), Some(id)) => core.contexts.context_for(id),
                _ => Context::new(),
            }
        });
        let wrapped = self.instrumenter.wrap(
            callback,
            WrapOptions::prefix("fn-")
                .with_resolver(resolver)
                .with_label("addEventListener"),
        );
        self.listeners.lock().push(DomListener {
            target: target.to_string(),
            event_type: event_type.to_string(),
            original: callback.clone(),
            callback: wrapped,
        });
    }

    /// Listener that bypasses instrumentation; runs before instrumented ones
    pub fn add_raw_listener(&self, target: &str, event_type: &str, callback: &Callable) {
        self.raw.lock().push(DomListener {
            target: target.to_string(),
            event_type: event_type.to_string(),
            original: callback.clone(),
            callback: callback.clone(),
        });
    }

    pub fn remove_event_listener(&self, target: &str, event_type: &str, callback: &Callable) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| {
            !(l.target == target && l.event_type == event_type && l.original.ptr_eq(callback))
        });
        listeners.len() != before
    }

    fn propagation_path(target: &str) -> Vec<&str> {
        match target {
            "window" => vec!["window"],
            "document" => vec!["document", "window"],
            other => vec![other, "document", "window"],
        }
    }

    /// Dispatch synchronously and return the event object
    pub fn dispatch_event(&self, target: &str, event_type: &str, text: Option<&str>) -> Value {
        let Some(core) = self.core.upgrade() else {
            return Value::Null;
        };
        let id = core.ids.next();
        let event = json!({
            "id": id.0,
            "type": event_type,
            "target": target,
            "text": text,
        });

        let path = Self::propagation_path(target);
        let select = |list: &Mutex<Vec<DomListener>>| -> Vec<(String, Callable)> {
            let guard = list.lock();
            let entries: &[DomListener] = &guard;
            path.iter()
                .flat_map(|hop| {
                    entries
                        .iter()
                        .filter(move |l| l.target == *hop && l.event_type == event_type)
                        .map(|l| (l.target.clone(), l.callback.clone()))
                })
                .collect()
        };
        let mut listeners = select(&self.raw);
        listeners.extend(select(&self.listeners));

        for (current_target, callback) in listeners {
            let result = callback.call(
                &json!(current_target),
                &mut vec![event.clone()],
                &Context::new(),
            );
            if let Err(err) = result {
                core.report_uncaught(event_type, &err);
            }
        }
        core.contexts.evict(id);
        event
    }

    /// Dispatch from a fresh macrotask
    pub fn dispatch_event_async(self: &Arc<Self>, target: &str, event_type: &str, text: Option<&str>) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        let dom = Arc::downgrade(self);
        let target = target.to_string();
        let event_type = event_type.to_string();
        let text = text.map(str::to_string);
        core.event_loop.set_timeout(
            0,
            Box::new(move || {
                if let Some(dom) = dom.upgrade() {
                    dom.dispatch_event(&target, &event_type, text.as_deref());
                }
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use crate::host::Host;
    use crate::wrap::{CallError, Callable};
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::sync::Arc;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> Callable {
        let log = Arc::clone(log);
        let tag = tag.to_string();
        Callable::new(move |this, args, _| {
            let ty = args[0]["type"].as_str().unwrap_or_default().to_string();
            log.lock().push(format!("{tag}:{ty}@{}", this.as_str().unwrap_or_default()));
            Ok(Value::Null)
        })
    }

    #[test]
    fn bubbles_target_document_window() {
        let host = Host::new("https://app.test/");
        let log = Arc::new(Mutex::new(Vec::new()));
        host.dom().add_event_listener("window", "click", &recorder(&log, "w"));
        host.dom().add_event_listener("#buy", "click", &recorder(&log, "b"));
        host.dom().add_event_listener("document", "click", &recorder(&log, "d"));
        host.dom().add_event_listener("#buy", "submit", &recorder(&log, "x"));

        let event = host.dom().dispatch_event("#buy", "click", Some("Buy"));
        assert_eq!(event["text"], "Buy");
        assert_eq!(
            *log.lock(),
            vec!["b:click@#buy", "d:click@document", "w:click@window"]
        );
        assert!(host.contexts().is_empty());
    }

    #[test]
    fn listeners_share_one_context_per_event() {
        let host = Host::new("https://app.test/");
        let events = host.bus().get("events");
        events.on_fn("fn-start", |_, ctx| {
            ctx.update::<u32, _>(|n| *n += 1);
            Ok(())
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        events.on_fn("fn-end", move |_, ctx| {
            sink.lock().push(ctx.get::<u32>().unwrap_or_default());
            Ok(())
        });
        let noop = Callable::from_fn(|_| Ok(Value::Null));
        host.dom().add_event_listener("#a", "click", &noop);
        host.dom().add_event_listener("#a", "click", &Callable::from_fn(|_| Ok(Value::Null)));

        host.dom().dispatch_event("#a", "click", None);
        host.dom().dispatch_event("#a", "click", None);
        assert_eq!(*seen.lock(), vec![1, 2, 1, 2]);
    }

    #[test]
    fn failing_listener_does_not_stop_dispatch() {
        let host = Host::new("https://app.test/");
        let log = Arc::new(Mutex::new(Vec::new()));
        host.dom().add_event_listener(
            "#a",
            "click",
            &Callable::from_fn(|_| Err(CallError::new("handler broke"))),
        );
        host.dom().add_event_listener("#a", "click", &recorder(&log, "ok"));
        host.dom().dispatch_event("#a", "click", None);
        assert_eq!(log.lock().len(), 1);
        assert_eq!(host.uncaught_errors(), vec!["click: handler broke".to_string()]);
    }

    #[test]
    fn removed_listeners_stop_firing_and_async_dispatch_waits_a_turn() {
        let host = Host::new("https://app.test/");
        let log = Arc::new(Mutex::new(Vec::new()));
        let cb = recorder(&log, "r");
        host.dom().add_event_listener("window", "hashchange", &cb);
        host.dom().dispatch_event_async("window", "hashchange", None);
        assert!(log.lock().is_empty());
        host.run_until_idle();
        assert_eq!(log.lock().len(), 1);

        assert!(host.dom().remove_event_listener("window", "hashchange", &cb));
        host.dom().dispatch_event("window", "hashchange", None);
        assert_eq!(log.lock().len(), 1);
    }
}
