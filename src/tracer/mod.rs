//! Orchestrator: lifecycle events in, interaction trees out
//!
//! [`Tracker::install`] subscribes to the event contract of every host
//! primitive and keeps the ambient current node in step with the callbacks
//! the host runs. Finished interactions are announced on the host bus as
//! [`INTERACTION_SAVED`] or [`INTERACTION_DISCARDED`] with
//! `[interaction id, payload]`; both are buffered for late consumers.

mod api;
mod attributes;
mod handlers;

pub use api::{InteractionHandle, Span};
pub use attributes::AttributeStore;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;

use crate::bus::{Channel, DEFAULT_GROUP};
use crate::config::Config;
use crate::context::{Ambient, AsyncId};
use crate::host::Host;
use crate::tree::{Interaction, NodeRef, TreeEnv};
use crate::wrap::{Callable, Instrumenter};

pub const INITIAL_PAGE_LOAD: &str = "initialPageLoad";
pub const INTERACTION_SAVED: &str = "interactionSaved";
pub const INTERACTION_DISCARDED: &str = "interactionDiscarded";
/// Request header carrying `<interaction id>:<node id>` on tracked fetches
pub const TRACE_HEADER: &str = "x-interaction-node";

/// Events kept for consumers that attach after the tracker
pub const BUFFERED_EVENTS: &[&str] = &[
    INTERACTION_SAVED,
    INTERACTION_DISCARDED,
    "fn-err",
    "cb-err",
    "tracer-err",
];

/// Node that was current when a callback failed, stamped on the error's context
#[derive(Debug, Clone)]
pub struct ErrorNode(pub Option<NodeRef>);

pub(crate) struct TrackerInner {
    host: Host,
    config: Config,
    env: TreeEnv,
    ambient: Mutex<Ambient>,
    triggers: Mutex<HashSet<String>>,
    /// Tracked timers still pending, with the interaction they hold open
    timers: Mutex<HashMap<AsyncId, Interaction>>,
    initial: Mutex<Option<Interaction>>,
    initial_url: String,
    loaded: AtomicBool,
    api: Instrumenter,
}

/// Handle to an installed tracker. Cheap to clone.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<TrackerInner>,
}

impl Tracker {
    /// Subscribe to `host` and, unless disabled, open the initial page load
    /// interaction. A disabled config leaves the host uninstrumented.
    pub fn install(host: &Host, config: Config) -> Self {
        let attributes = AttributeStore::default();
        let mut env = TreeEnv::new(host.scheduler());
        env.max_nodes = config.max_nodes;
        env.finish_delays = config.finish_delays_ms;
        env.bus = Some(host.bus().clone());
        env.attributes = attributes;

        let location = host.location();
        let mut triggers: HashSet<String> = config.interaction_events.iter().cloned().collect();
        if !config.initial_page_load {
            triggers.insert("popstate".into());
        }

        let inner = Arc::new(TrackerInner {
            host: host.clone(),
            ambient: Mutex::new(Ambient::new(&location, config.max_timer_budget)),
            triggers: Mutex::new(triggers),
            timers: Mutex::new(HashMap::new()),
            initial: Mutex::new(None),
            initial_url: location,
            loaded: AtomicBool::new(false),
            api: Instrumenter::always(host.bus()),
            env,
            config,
        });
        let tracker = Self { inner };
        if !tracker.inner.config.enabled {
            tracing::debug!("Tracker disabled, host left uninstrumented");
            return tracker;
        }

        handlers::register(&tracker.inner);
        host.bus().buffer(BUFFERED_EVENTS, Some(DEFAULT_GROUP));
        tracker.inner.arm_load_timeout();
        if tracker.inner.config.initial_page_load {
            tracker.inner.open_initial_page_load();
        }
        tracing::debug!(url = %tracker.inner.initial_url, "Tracker installed");
        tracker
    }

    pub fn host(&self) -> &Host {
        &self.inner.host
    }

    pub fn bus(&self) -> &Channel {
        self.inner.host.bus()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.config.enabled
    }

    /// Global custom attributes merged into every finishing interaction
    pub fn attributes(&self) -> &AttributeStore {
        &self.inner.env.attributes
    }

    pub fn set_custom_attribute(&self, key: &str, value: Value) {
        self.inner.env.attributes.set(key, value);
    }

    /// The page load interaction, if one was opened
    pub fn initial_page_load(&self) -> Option<Interaction> {
        self.inner.initial.lock().clone()
    }

    /// Abort the bus when no consumer drained the buffered events
    pub fn abort_if_undrained(&self) -> bool {
        self.inner.abort_if_undrained()
    }

    pub(crate) fn downgrade(&self) -> Weak<TrackerInner> {
        Arc::downgrade(&self.inner)
    }
}

impl TrackerInner {
    fn abort_if_undrained(&self) -> bool {
        let aborted = self.host.bus().abort();
        if aborted {
            tracing::warn!(
                timeout_ms = self.config.load_timeout_ms,
                "No consumer drained the bus in time, tracking stopped"
            );
        }
        aborted
    }

    fn arm_load_timeout(self: &Arc<Self>) {
        if self.config.load_timeout_ms == 0 {
            return;
        }
        let weak = Arc::downgrade(self);
        self.host.scheduler().set_timeout(
            self.config.load_timeout_ms,
            Box::new(move || {
                if let Some(tracker) = weak.upgrade() {
                    tracker.abort_if_undrained();
                }
            }),
        );
    }

    /// Held open until window `load`; current for top-level work until then
    fn open_initial_page_load(self: &Arc<Self>) {
        let now = self.host.now();
        let interaction = {
            let mut ambient = self.ambient.lock();
            let interaction = self.start_interaction(&mut ambient, INITIAL_PAGE_LOAD, now);
            interaction.hold();
            ambient.set_current(Some(interaction.root()));
            interaction
        };
        *self.initial.lock() = Some(interaction);

        let weak = Arc::downgrade(self);
        self.host.dom().add_raw_listener(
            "window",
            "load",
            &Callable::named("pageLoaded", move |_, _, _| {
                if let Some(tracker) = weak.upgrade() {
                    tracker.on_window_load();
                }
                Ok(Value::Null)
            }),
        );
    }

    fn on_window_load(&self) {
        if self.loaded.swap(true, Ordering::SeqCst) {
            return;
        }
        self.triggers.lock().insert("popstate".into());
        let Some(initial) = self.initial.lock().clone() else {
            return;
        };
        {
            let mut ambient = self.ambient.lock();
            let top_level = ambient.depth() == 0
                && ambient
                    .current()
                    .is_some_and(|node| node.interaction().ptr_eq(&initial));
            if top_level {
                ambient.set_current(None);
            }
        }
        tracing::debug!(interaction_id = initial.id(), "Window loaded");
        initial.release();
    }
}
