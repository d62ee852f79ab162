//! `fetch`

use std::sync::{Arc, Weak};

use serde_json::{json, Map, Value};

use super::network::RequestRecord;
use super::promise::{Promise, Promises};
use super::{Core, Scheduler};
use crate::bus::{Channel, Context};
use crate::util::url::resolve;
use crate::wrap::{CallError, Callable, Instrumenter, WrapOptions};

/// `fetch` on the `fetch` channel.
///
/// `fetch-start [url, init]` is emitted before the request leaves, and
/// listeners may rewrite both (the network log records the final headers).
/// Completion runs a callback instrumented with `fn-`, inside which
/// `fetch-done [error, status]` is emitted before the returned promise
/// settles.
pub struct Fetcher {
    core: Weak<Core>,
    instrumenter: Instrumenter,
    promises: Arc<Promises>,
}

impl Fetcher {
    pub(crate) fn new(core: &Arc<Core>, channel: &Channel, promises: &Arc<Promises>) -> Self {
        Self {
            core: Arc::downgrade(core),
            instrumenter: Instrumenter::new(channel),
            promises: Arc::clone(promises),
        }
    }

    pub fn fetch(&self, url: &str, init: Option<Value>) -> Promise {
        let deferred = self.promises.deferred();
        let Some(core) = self.core.upgrade() else {
            deferred.reject(CallError::new("host is gone"));
            return deferred.promise().clone();
        };

        let ctx = Context::new();
        let init = match init {
            Some(Value::Object(map)) => Value::Object(map),
            _ => json!({}),
        };
        let mut args = vec![json!(resolve(&core.location(), url)), init];
        self.instrumenter.emit("fetch-start", &mut args, &ctx, true);

        let url = args
            .first()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let init = args.get(1).cloned().unwrap_or_else(|| json!({}));
        let method = init
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();
        let headers = init
            .get("headers")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_else(Map::new);
        core.network.record(RequestRecord {
            kind: "fetch".into(),
            method,
            url: url.clone(),
            headers,
            at: core.now(),
        });

        let route = core.network.resolve(&url);
        let latency = core.network.route_for(&url).latency_ms;

        let instrumenter = self.instrumenter.clone();
        let done_ctx = ctx.clone();
        let settle = deferred.clone();
        let response_url = url.clone();
        let complete = Callable::named("fetch", move |_, args, _| {
            match args.first().and_then(Value::as_u64) {
                Some(status) => {
                    instrumenter.emit(
                        "fetch-done",
                        &mut vec![Value::Null, json!(status)],
                        &done_ctx,
                        true,
                    );
                    settle.resolve(json!({"status": status, "url": response_url}));
                }
                None => {
                    instrumenter.emit(
                        "fetch-done",
                        &mut vec![json!("Failed to fetch"), Value::Null],
                        &done_ctx,
                        true,
                    );
                    settle.reject(CallError::new("Failed to fetch"));
                }
            }
            Ok(Value::Null)
        });
        let wrapped = self.instrumenter.wrap(
            &complete,
            WrapOptions::prefix("fn-").with_context(&ctx).with_label("fetch"),
        );

        let weak = Arc::downgrade(&core);
        core.event_loop.set_timeout(
            latency,
            Box::new(move || {
                let status = route.map_or(Value::Null, |r| json!(r.status));
                if let Err(err) = wrapped.invoke(&mut vec![status]) {
                    if let Some(core) = weak.upgrade() {
                        core.report_uncaught("fetch", &err);
                    }
                }
            }),
        );
        deferred.promise().clone()
    }
}
