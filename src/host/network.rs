//! Simulated network: per-prefix routes, offline switch, request log

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};

/// How a request to a matching URL completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub status: u16,
    pub latency_ms: u64,
}

impl Default for Route {
    fn default() -> Self {
        Self {
            status: 200,
            latency_ms: 10,
        }
    }
}

/// One request as it left the host, after instrumentation ran
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestRecord {
    pub kind: String,
    pub method: String,
    pub url: String,
    pub headers: Map<String, Value>,
    pub at: u64,
}

#[derive(Default)]
pub struct Network {
    routes: Mutex<Vec<(String, Route)>>,
    fallback: Mutex<Route>,
    offline: AtomicBool,
    log: Mutex<Vec<RequestRecord>>,
}

impl Network {
    /// Route every URL starting with `prefix`; the longest matching prefix wins
    pub fn route(&self, prefix: &str, status: u16, latency_ms: u64) {
        self.routes
            .lock()
            .push((prefix.to_string(), Route { status, latency_ms }));
    }

    pub fn set_fallback(&self, route: Route) {
        *self.fallback.lock() = route;
    }

    /// While offline every request fails at the transport level
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// The configured route for `url`, regardless of the offline switch
    pub fn route_for(&self, url: &str) -> Route {
        self.routes
            .lock()
            .iter()
            .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, route)| *route)
            .unwrap_or_else(|| *self.fallback.lock())
    }

    /// The route a request will take; `None` when the transport fails
    pub fn resolve(&self, url: &str) -> Option<Route> {
        (!self.is_offline()).then(|| self.route_for(url))
    }

    pub(crate) fn record(&self, request: RequestRecord) {
        self.log.lock().push(request);
    }

    pub fn requests(&self) -> Vec<RequestRecord> {
        self.log.lock().clone()
    }
}
