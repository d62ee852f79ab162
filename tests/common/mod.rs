//! Shared fixtures for integration tests
//!
//! A [`Page`] is a fresh host with a tracker and a harvest attached. The
//! default fixture skips the initial page load so the first user
//! interaction gets id 1 and root node 1.

#![allow(dead_code)]

use std::sync::Arc;

use interaction_tracker::{
    Callable, CallResult, Config, Harvest, Host, InteractionPayload, NodePayload, NodeType,
    Tracker,
};
use parking_lot::Mutex;
use serde_json::Value;

pub const PAGE_URL: &str = "http://app.test/";

/// Config with no initial page load and no load timeout
pub fn quiet_config() -> Config {
    Config {
        initial_page_load: false,
        load_timeout_ms: 0,
        ..Config::default()
    }
}

pub struct Page {
    pub host: Host,
    pub tracker: Tracker,
    pub harvest: Harvest,
}

impl Page {
    pub fn new() -> Self {
        Self::with_config(quiet_config())
    }

    pub fn with_config(config: Config) -> Self {
        let host = Host::new(PAGE_URL);
        host.network().route("http://app.test/api/", 200, 30);
        let tracker = Tracker::install(&host, config);
        let harvest = Harvest::attach(&tracker);
        Self {
            host,
            tracker,
            harvest,
        }
    }

    /// Register a click listener on `target`
    pub fn on_click<F>(&self, target: &str, f: F)
    where
        F: Fn(&Page) -> CallResult + Send + Sync + 'static,
    {
        let page = self.handle();
        self.host.dom().add_event_listener(
            target,
            "click",
            &Callable::named("onClick", move |_, _, _| f(&page)),
        );
    }

    /// A second handle onto the same host, tracker and harvest
    pub fn handle(&self) -> Page {
        Page {
            host: self.host.clone(),
            tracker: self.tracker.clone(),
            harvest: self.harvest.clone(),
        }
    }

    /// Start an XHR to `url` and return its id
    pub fn send_xhr(&self, url: &str) -> CallResult {
        let xhr = self.host.xhr();
        let id = xhr.create();
        xhr.open(id, "GET", url)?;
        xhr.send(id, None)
    }

    /// Flush the harvest queue and take every saved payload
    pub fn saved(&self) -> Vec<InteractionPayload> {
        self.harvest.queue().flush();
        self.harvest.queue().take()
    }

    /// Run until idle, then take every saved payload
    pub fn settle(&self) -> Vec<InteractionPayload> {
        self.host.run_until_idle();
        self.saved()
    }
}

/// Shared slot a callback can record into
pub fn recorder<T: Send + 'static>() -> Arc<Mutex<Vec<T>>> {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn children_of_type(node: &NodePayload, node_type: NodeType) -> Vec<&NodePayload> {
    node.children
        .iter()
        .filter(|child| child.node_type == node_type)
        .collect()
}

pub fn attr<'a>(node: &'a NodePayload, key: &str) -> Option<&'a Value> {
    node.attributes.get(key)
}
