//! JSONP script requests

use std::sync::{Arc, Weak};

use serde_json::{json, Map};

use super::network::RequestRecord;
use super::{Core, Scheduler};
use crate::bus::{Channel, Context};
use crate::util::url::resolve;
use crate::wrap::{Callable, Instrumenter, WrapOptions};

/// JSONP requests on the `jsonp` channel.
///
/// Events: `new-jsonp [url]`, then either the callback's `cb-start/-err/-end`
/// followed by `jsonp-end [url]`, or `jsonp-error [url]` when the script
/// fails and the callback never runs.
pub struct Jsonp {
    core: Weak<Core>,
    instrumenter: Instrumenter,
}

impl Jsonp {
    pub(crate) fn new(core: &Arc<Core>, channel: &Channel) -> Self {
        Self {
            core: Arc::downgrade(core),
            instrumenter: Instrumenter::new(channel),
        }
    }

    pub fn request(&self, url: &str, callback: &Callable) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        let url = resolve(&core.location(), url);
        let ctx = Context::new();
        self.instrumenter
            .emit("new-jsonp", &mut vec![json!(url)], &ctx, true);

        core.network.record(RequestRecord {
            kind: "jsonp".into(),
            method: "GET".into(),
            url: url.clone(),
            headers: Map::new(),
            at: core.now(),
        });
        let route = core.network.resolve(&url);
        let latency = core.network.route_for(&url).latency_ms;

        let wrapped = self.instrumenter.wrap(
            callback,
            WrapOptions::prefix("cb-").with_context(&ctx).with_label("jsonp"),
        );
        let instrumenter = self.instrumenter.clone();
        let weak = Arc::downgrade(&core);
        core.event_loop.set_timeout(
            latency,
            Box::new(move || match route {
                Some(route) if route.status < 400 => {
                    let payload = json!({"url": url, "status": route.status});
                    if let Err(err) = wrapped.invoke(&mut vec![payload]) {
                        if let Some(core) = weak.upgrade() {
                            core.report_uncaught("jsonp", &err);
                        }
                    }
                    instrumenter.emit("jsonp-end", &mut vec![json!(url)], &ctx, true);
                }
                _ => {
                    instrumenter.emit("jsonp-error", &mut vec![json!(url)], &ctx, true);
                }
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use crate::host::Host;
    use crate::wrap::Callable;
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::sync::Arc;

    fn track(host: &Host) -> Arc<Mutex<Vec<&'static str>>> {
        let channel = host.bus().get("jsonp");
        let log = Arc::new(Mutex::new(Vec::new()));
        for event in ["new-jsonp", "cb-start", "cb-end", "jsonp-end", "jsonp-error"] {
            let sink = Arc::clone(&log);
            channel.on_fn(event, move |_, _| {
                sink.lock().push(event);
                Ok(())
            });
        }
        log
    }

    #[test]
    fn successful_script_runs_callback_then_ends() {
        let host = Host::new("https://app.test/");
        let log = track(&host);
        host.jsonp()
            .request("/feed.js", &Callable::from_fn(|_| Ok(Value::Null)));
        host.run_until_idle();
        assert_eq!(*log.lock(), vec!["new-jsonp", "cb-start", "cb-end", "jsonp-end"]);
    }

    #[test]
    fn failed_script_never_calls_back() {
        let host = Host::new("https://app.test/");
        host.network().route("https://app.test/broken", 404, 3);
        let log = track(&host);
        host.jsonp()
            .request("/broken.js", &Callable::from_fn(|_| Ok(Value::Null)));
        host.run_until_idle();
        assert_eq!(*log.lock(), vec!["new-jsonp", "jsonp-error"]);
    }
}
