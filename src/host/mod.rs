//! Simulated single-threaded browser host
//!
//! The host owns a virtual-time [`EventLoop`] and the async primitives an
//! application schedules work through. Each primitive is instrumented once,
//! at construction, and reports its lifecycle on its own child channel of
//! the host bus:
//!
//! | channel    | primitive                                   |
//! |------------|---------------------------------------------|
//! | `timer`    | [`Timers`]                                  |
//! | `events`   | [`Dom`] event listeners                     |
//! | `xhr`      | [`Xhrs`]                                    |
//! | `fetch`    | [`Fetcher`]                                 |
//! | `jsonp`    | [`Jsonp`]                                   |
//! | `promise`  | [`Promises`]                                |
//! | `mutation` | [`MutationObservers`]                       |
//! | `history`  | [`History`] `pushState`/`replaceState`      |

mod dom;
mod fetch;
mod history;
mod jsonp;
mod mutation;
mod network;
mod promise;
mod scheduler;
mod timer;
mod xhr;

pub use dom::Dom;
pub use fetch::Fetcher;
pub use history::History;
pub use jsonp::Jsonp;
pub use mutation::{MutationObservers, ObserverId};
pub use network::{Network, RequestRecord, Route};
pub use promise::{Deferred, Promise, Promises};
pub use scheduler::{EventLoop, Scheduler, Task};
pub use timer::Timers;
pub use xhr::Xhrs;

pub use crate::wrap::CallError;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::bus::Channel;
use crate::context::{AsyncIdAllocator, ContextStore};
use crate::wrap::Callable;

/// Name of the host's root channel
pub const BUS_NAME: &str = "host";

/// Callback handed to a raw timer through the `setTimeout` call context
#[derive(Clone)]
pub struct PendingCallback(pub Callable);

/// State shared by every primitive. Primitives hold it weakly.
pub(crate) struct Core {
    pub(crate) bus: Channel,
    pub(crate) event_loop: Arc<EventLoop>,
    pub(crate) ids: Arc<AsyncIdAllocator>,
    pub(crate) contexts: ContextStore,
    pub(crate) network: Network,
    location: Mutex<String>,
    uncaught: Mutex<Vec<String>>,
}

impl Core {
    pub(crate) fn now(&self) -> u64 {
        self.event_loop.now()
    }

    pub(crate) fn location(&self) -> String {
        self.location.lock().clone()
    }

    pub(crate) fn set_location(&self, url: &str) {
        *self.location.lock() = url.to_string();
    }

    /// An exception escaped a callback to the top of a task
    pub(crate) fn report_uncaught(&self, source: &str, err: &CallError) {
        tracing::debug!(source, error = %err, "Uncaught error in host callback");
        self.uncaught.lock().push(format!("{source}: {err}"));
    }
}

#[derive(Clone)]
pub struct Host {
    core: Arc<Core>,
    timers: Arc<Timers>,
    dom: Arc<Dom>,
    xhr: Arc<Xhrs>,
    fetch: Arc<Fetcher>,
    jsonp: Arc<Jsonp>,
    promises: Arc<Promises>,
    mutations: Arc<MutationObservers>,
    history: Arc<History>,
}

impl Host {
    /// A host whose document is at `url`, with the clock at 0
    pub fn new(url: &str) -> Self {
        let ids = Arc::new(AsyncIdAllocator::default());
        let bus = Channel::root(BUS_NAME);
        let core = Arc::new(Core {
            bus: bus.clone(),
            event_loop: Arc::new(EventLoop::new(Arc::clone(&ids))),
            ids,
            contexts: ContextStore::new(),
            network: Network::default(),
            location: Mutex::new(url.to_string()),
            uncaught: Mutex::new(Vec::new()),
        });

        let dom = Arc::new(Dom::new(&core, &bus.get("events")));
        let promises = Promises::new(&core, &bus.get("promise"));
        let host = Self {
            timers: Arc::new(Timers::new(&core, &bus.get("timer"))),
            xhr: Xhrs::new(&core, &bus.get("xhr")),
            fetch: Arc::new(Fetcher::new(&core, &bus.get("fetch"), &promises)),
            jsonp: Arc::new(Jsonp::new(&core, &bus.get("jsonp"))),
            mutations: Arc::new(MutationObservers::new(&core, &bus.get("mutation"))),
            history: Arc::new(History::new(&core, &bus.get("history"), &dom)),
            dom,
            promises,
            core,
        };
        tracing::debug!(url, "Host created");
        host
    }

    pub fn bus(&self) -> &Channel {
        &self.core.bus
    }

    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    pub fn dom(&self) -> &Arc<Dom> {
        &self.dom
    }

    pub fn xhr(&self) -> &Xhrs {
        &self.xhr
    }

    pub fn fetch(&self) -> &Fetcher {
        &self.fetch
    }

    pub fn jsonp(&self) -> &Jsonp {
        &self.jsonp
    }

    pub fn promises(&self) -> &Arc<Promises> {
        &self.promises
    }

    pub fn mutations(&self) -> &MutationObservers {
        &self.mutations
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn network(&self) -> &Network {
        &self.core.network
    }

    pub fn contexts(&self) -> &ContextStore {
        &self.core.contexts
    }

    pub fn event_loop(&self) -> &Arc<EventLoop> {
        &self.core.event_loop
    }

    pub fn scheduler(&self) -> Arc<dyn Scheduler> {
        self.core.event_loop.clone()
    }

    pub fn now(&self) -> u64 {
        self.core.now()
    }

    pub fn location(&self) -> String {
        self.core.location()
    }

    pub fn run_until_idle(&self) -> usize {
        self.core.event_loop.run_until_idle()
    }

    pub fn run_microtasks(&self) -> usize {
        self.core.event_loop.run_microtasks()
    }

    pub fn advance(&self, ms: u64) -> usize {
        self.core.event_loop.advance(ms)
    }

    /// Spend `ms` of virtual time in the running callback
    pub fn busy(&self, ms: u64) {
        self.core.event_loop.busy(ms);
    }

    /// Fire the window `load` event from a fresh task
    pub fn fire_load(&self) {
        self.dom.dispatch_event_async("window", "load", None);
    }

    /// Click `target` (synchronously, as if from the input task)
    pub fn click(&self, target: &str, text: Option<&str>) {
        self.dom.dispatch_event(target, "click", text);
    }

    /// Errors that escaped callbacks, as `"<source>: <message>"`
    pub fn uncaught_errors(&self) -> Vec<String> {
        self.core.uncaught.lock().clone()
    }
}
