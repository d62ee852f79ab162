//! XMLHttpRequest-style requests

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use super::network::RequestRecord;
use super::{Core, Scheduler};
use crate::bus::{Channel, Context};
use crate::context::AsyncId;
use crate::util::url::resolve;
use crate::wrap::{CallError, CallResult, Callable, Instrumenter, MethodTable, Resolver, WrapOptions};

#[derive(Default)]
struct XhrRecord {
    method: String,
    url: String,
    headers: Map<String, Value>,
    status: Option<u16>,
    load_listeners: Vec<Callable>,
}

/// Requests on the `xhr` channel.
///
/// Each request is identified by its [`AsyncId`], which is also the receiver
/// of its methods; every event of one request shares the request's context.
/// Events: `new-xhr [id]`, `open-xhr-start/-end`, `send-xhr-start/-end`,
/// load callbacks `fn-start/-err/-end`, then `xhr-resolved
/// [{method, url, status, end}]` once all load callbacks ran.
pub struct Xhrs {
    core: Weak<Core>,
    instrumenter: Instrumenter,
    proto: MethodTable,
    records: Mutex<HashMap<AsyncId, XhrRecord>>,
}

impl Xhrs {
    pub(crate) fn new(core: &Arc<Core>, channel: &Channel) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Xhrs>| {
            let proto = MethodTable::new();
            proto.define("open", raw_open(weak.clone()));
            proto.define("send", raw_send(weak.clone()));

            let instrumenter = Instrumenter::new(channel);
            let contexts = Arc::downgrade(core);
            let resolver = Resolver::dynamic(move |_, this| {
                match (contexts.upgrade(), AsyncId::from_value(this)) {
                    (Some(core), Some(id)) => core.contexts.context_for(id),
                    _ => Context::new(),
                }
            });
            instrumenter.in_place(&proto, &["open", "send"], "-xhr-", Some(resolver), true);

            Self {
                core: Arc::downgrade(core),
                instrumenter,
                proto,
                records: Mutex::new(HashMap::new()),
            }
        })
    }

    /// Construct a request and announce it with `new-xhr`
    pub fn create(&self) -> AsyncId {
        let Some(core) = self.core.upgrade() else {
            return AsyncId::default();
        };
        let id = core.ids.next();
        let ctx = core.contexts.context_for(id);
        self.records.lock().insert(id, XhrRecord::default());
        self.instrumenter
            .emit("new-xhr", &mut vec![json!(id.0)], &ctx, true);
        id
    }

    pub fn open(&self, id: AsyncId, method: &str, url: &str) -> CallResult {
        self.proto.call(
            "open",
            &json!(id.0),
            &mut vec![json!(method), json!(url)],
            &Context::new(),
        )
    }

    pub fn set_request_header(&self, id: AsyncId, name: &str, value: &str) {
        if let Some(record) = self.records.lock().get_mut(&id) {
            record.headers.insert(name.to_string(), json!(value));
        }
    }

    pub fn add_load_listener(&self, id: AsyncId, callback: &Callable) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        let ctx = core.contexts.context_for(id);
        let wrapped = self.instrumenter.wrap(
            callback,
            WrapOptions::prefix("fn-").with_context(&ctx).with_label("onload"),
        );
        if let Some(record) = self.records.lock().get_mut(&id) {
            record.load_listeners.push(wrapped);
        }
    }

    pub fn send(&self, id: AsyncId, body: Option<Value>) -> CallResult {
        self.proto.call(
            "send",
            &json!(id.0),
            &mut vec![body.unwrap_or(Value::Null)],
            &Context::new(),
        )
    }

    /// Final status, `Some(0)` for transport failures, `None` while pending
    pub fn status(&self, id: AsyncId) -> Option<u16> {
        self.records.lock().get(&id).and_then(|r| r.status)
    }

    fn complete(&self, id: AsyncId, status: u16) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        let (method, url, listeners) = {
            let mut records = self.records.lock();
            let Some(record) = records.get_mut(&id) else {
                return;
            };
            record.status = Some(status);
            (
                record.method.clone(),
                record.url.clone(),
                record.load_listeners.clone(),
            )
        };

        let ctx = core.contexts.context_for(id);
        for listener in listeners {
            let event = json!({"type": "load", "status": status});
            if let Err(err) = listener.call(&json!(id.0), &mut vec![event], &ctx) {
                core.report_uncaught("xhr load", &err);
            }
        }

        let mut args = vec![json!({
            "method": method,
            "url": url,
            "status": status,
            "end": core.now(),
        })];
        self.instrumenter.emit("xhr-resolved", &mut args, &ctx, true);
        core.contexts.evict(id);
        if let Some(record) = self.records.lock().get_mut(&id) {
            record.load_listeners.clear();
        }
    }
}

fn receiver(this: &Value) -> Result<AsyncId, CallError> {
    AsyncId::from_value(this).ok_or_else(|| CallError::new("receiver is not an XMLHttpRequest"))
}

fn raw_open(xhrs: Weak<Xhrs>) -> Callable {
    Callable::named("open", move |this, args, _| {
        let id = receiver(this)?;
        let xhrs = xhrs.upgrade().ok_or_else(|| CallError::new("host is gone"))?;
        let core = xhrs.core.upgrade().ok_or_else(|| CallError::new("host is gone"))?;
        let method = args.first().and_then(Value::as_str).unwrap_or("GET");
        let url = args.get(1).and_then(Value::as_str).unwrap_or_default();
        let url = resolve(&core.location(), url);

        let mut records = xhrs.records.lock();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| CallError::new("unknown request"))?;
        record.method = method.to_uppercase();
        record.url = url;
        Ok(Value::Null)
    })
}

fn raw_send(xhrs: Weak<Xhrs>) -> Callable {
    Callable::named("send", move |this, _, _| {
        let id = receiver(this)?;
        let xhrs_strong = xhrs.upgrade().ok_or_else(|| CallError::new("host is gone"))?;
        let core = xhrs_strong
            .core
            .upgrade()
            .ok_or_else(|| CallError::new("host is gone"))?;

        let (method, url, headers) = {
            let records = xhrs_strong.records.lock();
            let record = records
                .get(&id)
                .ok_or_else(|| CallError::new("unknown request"))?;
            if record.url.is_empty() {
                return Err(CallError::new("send called before open"));
            }
            (record.method.clone(), record.url.clone(), record.headers.clone())
        };

        core.network.record(RequestRecord {
            kind: "xhr".into(),
            method,
            url: url.clone(),
            headers,
            at: core.now(),
        });
        let route = core.network.resolve(&url);
        let latency = core.network.route_for(&url).latency_ms;
        let status = route.map_or(0, |r| r.status);

        let weak = xhrs.clone();
        core.event_loop.set_timeout(
            latency,
            Box::new(move || {
                if let Some(xhrs) = weak.upgrade() {
                    xhrs.complete(id, status);
                }
            }),
        );
        Ok(Value::Null)
    })
}
