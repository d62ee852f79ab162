//! Interaction bookkeeping and finish detection
//!
//! An interaction stays ACTIVE while `remaining > 0`. When the count drops
//! to zero it schedules a 0ms timer, which in turn schedules a second short
//! timer; only if `remaining` is still zero when that one fires does the
//! interaction finish. Work enqueued between the two turns cancels the check.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::node::{IdAllocator, Node, NodeId, NodeRef, NodeType};
use super::payload::InteractionPayload;
use crate::bus::{self, Channel, Context};
use crate::context::AsyncId;
use crate::host::Scheduler;
use crate::tracer::AttributeStore;

/// Event emitted on [`TreeEnv::bus`] when an interaction finishes
pub const INTERACTION_FINISHED: &str = "interaction";

/// Default cap on nodes per interaction, root excluded
pub const MAX_NODES: usize = 128;

pub type CompletionHandler = Box<dyn FnOnce(&Interaction) + Send>;

/// Collaborators shared by every interaction of one tracker
#[derive(Clone)]
pub struct TreeEnv {
    pub scheduler: Arc<dyn Scheduler>,
    pub ids: Arc<IdAllocator>,
    pub max_nodes: usize,
    /// Delays of the two quiescence turns
    pub finish_delays: [u64; 2],
    pub bus: Option<Channel>,
    pub attributes: AttributeStore,
}

impl TreeEnv {
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            ids: Arc::new(IdAllocator::default()),
            max_nodes: MAX_NODES,
            finish_delays: [0, 1],
            bus: None,
            attributes: AttributeStore::default(),
        }
    }
}

/// Attributes recorded on the root of an interaction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RootAttributes {
    pub trigger: String,
    pub initial_page_url: Option<String>,
    pub old_url: Option<String>,
    pub new_url: Option<String>,
    pub old_route: Option<String>,
    pub new_route: Option<String>,
    pub custom_name: Option<String>,
    pub custom: Map<String, Value>,
}

impl RootAttributes {
    pub fn url_changed(&self) -> bool {
        matches!((&self.old_url, &self.new_url), (Some(old), Some(new)) if old != new)
    }

    pub fn route_changed(&self) -> bool {
        self.new_route.is_some() && self.old_route != self.new_route
    }
}

struct State {
    root: NodeId,
    nodes: HashMap<NodeId, Node>,
    node_count: usize,
    remaining: usize,
    finish_timer: Option<AsyncId>,
    checking_finish: bool,
    last_cb: u64,
    last_finish: u64,
    handlers: Vec<CompletionHandler>,
    finished: bool,
    ignored: bool,
    save: bool,
    attrs: RootAttributes,
    store: Map<String, Value>,
}

struct Inner {
    id: u64,
    env: TreeEnv,
    state: Mutex<State>,
}

/// One tracked unit of work and its node tree. Cheap to clone.
#[derive(Clone)]
pub struct Interaction {
    inner: Arc<Inner>,
}

impl Interaction {
    pub fn new(env: &TreeEnv, trigger: &str, timestamp: u64, url: Option<&str>) -> Self {
        let id = env.ids.next_interaction();
        let root = env.ids.next_node();
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            Node::new(root, NodeType::Interaction, None, None, timestamp, false),
        );
        let attrs = RootAttributes {
            trigger: trigger.to_string(),
            initial_page_url: url.map(str::to_string),
            old_url: url.map(str::to_string),
            ..RootAttributes::default()
        };
        debug!(interaction_id = id, trigger, root = %root, "Interaction created");
        Self {
            inner: Arc::new(Inner {
                id,
                env: env.clone(),
                state: Mutex::new(State {
                    root,
                    nodes,
                    node_count: 0,
                    remaining: 0,
                    finish_timer: None,
                    checking_finish: false,
                    last_cb: timestamp,
                    last_finish: timestamp,
                    handlers: Vec::new(),
                    finished: false,
                    ignored: false,
                    save: false,
                    attrs,
                    store: Map::new(),
                }),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn root_id(&self) -> NodeId {
        self.inner.state.lock().root
    }

    pub fn root(&self) -> NodeRef {
        NodeRef::new(self.clone(), self.root_id())
    }

    pub fn env(&self) -> &TreeEnv {
        &self.inner.env
    }

    pub fn is_finished(&self) -> bool {
        self.inner.state.lock().finished
    }

    pub fn remaining(&self) -> usize {
        self.inner.state.lock().remaining
    }

    /// Nodes created so far, root excluded
    pub fn node_count(&self) -> usize {
        self.inner.state.lock().node_count
    }

    pub fn is_checking_finish(&self) -> bool {
        self.inner.state.lock().checking_finish
    }

    /// `root.end`, set once the interaction finishes
    pub fn end(&self) -> Option<u64> {
        let state = self.inner.state.lock();
        state.nodes.get(&state.root).and_then(|root| root.end)
    }

    pub fn last_callback(&self) -> u64 {
        self.inner.state.lock().last_cb
    }

    pub fn last_finish(&self) -> u64 {
        self.inner.state.lock().last_finish
    }

    pub fn node(&self, id: NodeId) -> Option<Node> {
        self.inner.state.lock().nodes.get(&id).cloned()
    }

    pub fn ptr_eq(&self, other: &Interaction) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn child(
        &self,
        parent: NodeId,
        node_type: NodeType,
        timestamp: u64,
        name: Option<&str>,
        dont_wait: bool,
    ) -> Option<NodeRef> {
        let mut state = self.inner.state.lock();
        if state.finished || !state.nodes.contains_key(&parent) {
            return None;
        }
        if state.node_count >= self.inner.env.max_nodes {
            debug!(
                interaction_id = self.inner.id,
                node_count = state.node_count,
                "Node budget exhausted, not tracking"
            );
            return None;
        }
        let id = self.inner.env.ids.next_node();
        state.nodes.insert(
            id,
            Node::new(
                id,
                node_type,
                name.map(str::to_string),
                Some(parent),
                timestamp,
                !dont_wait,
            ),
        );
        state.node_count += 1;
        if !dont_wait {
            state.remaining += 1;
        }
        Some(NodeRef::new(self.clone(), id))
    }

    pub(crate) fn finish_node(&self, id: NodeId, timestamp: u64) {
        {
            let mut state = self.inner.state.lock();
            if state.finished || id == state.root {
                return;
            }
            let (parent, holds) = match state.nodes.get_mut(&id) {
                Some(node) if node.end.is_none() && !node.cancelled => {
                    node.end = Some(timestamp);
                    let holds = std::mem::replace(&mut node.holds, false);
                    (node.parent, holds)
                }
                _ => return,
            };

            let mut target = parent;
            while let Some(pid) = target {
                match state.nodes.get(&pid) {
                    Some(ancestor) if ancestor.cancelled => target = ancestor.parent,
                    _ => break,
                }
            }
            if let Some(ancestor) = target.and_then(|pid| state.nodes.get_mut(&pid)) {
                ancestor.children.push(id);
            }

            if holds {
                state.remaining = state.remaining.saturating_sub(1);
            }
            state.last_finish = timestamp;
            debug!(
                interaction_id = self.inner.id,
                node_id = %id,
                remaining = state.remaining,
                "Node finished"
            );
        }
        self.check_finish();
    }

    pub(crate) fn cancel_node(&self, id: NodeId) {
        {
            let mut state = self.inner.state.lock();
            if state.finished || id == state.root {
                return;
            }
            let holds = match state.nodes.get_mut(&id) {
                Some(node) if node.end.is_none() && !node.cancelled => {
                    node.cancelled = true;
                    std::mem::replace(&mut node.holds, false)
                }
                _ => return,
            };
            if holds {
                state.remaining = state.remaining.saturating_sub(1);
            }
            debug!(
                interaction_id = self.inner.id,
                node_id = %id,
                remaining = state.remaining,
                "Node cancelled"
            );
        }
        self.check_finish();
    }

    pub(crate) fn set_node_attribute(&self, id: NodeId, key: &str, value: Value) {
        if let Some(node) = self.inner.state.lock().nodes.get_mut(&id) {
            node.attrs.insert(key.to_string(), value);
        }
    }

    pub(crate) fn add_callback_time(&self, id: NodeId, ms: u64) {
        if let Some(node) = self.inner.state.lock().nodes.get_mut(&id) {
            node.callback_time += ms;
        }
    }

    /// Keep the interaction open for work that has no node of its own
    pub fn hold(&self) {
        let mut state = self.inner.state.lock();
        if !state.finished {
            state.remaining += 1;
        }
    }

    /// Undo one [`Interaction::hold`] and re-check for quiescence
    pub fn release(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.finished {
                return;
            }
            state.remaining = state.remaining.saturating_sub(1);
        }
        self.check_finish();
    }

    pub fn set_last_callback(&self, timestamp: u64) {
        let mut state = self.inner.state.lock();
        state.last_cb = state.last_cb.max(timestamp);
    }

    /// Start or cancel the two-turn quiescence check
    pub fn check_finish(&self) {
        let mut state = self.inner.state.lock();
        if state.remaining > 0 {
            self.reset_finish_check(&mut state);
            return;
        }
        if state.checking_finish || state.finished {
            return;
        }
        self.reset_finish_check(&mut state);
        state.checking_finish = true;

        let [first, second] = self.inner.env.finish_delays;
        let interaction = self.clone();
        state.finish_timer = Some(self.inner.env.scheduler.set_timeout(
            first,
            Box::new(move || interaction.quiescence_turn(second)),
        ));
        debug!(interaction_id = self.inner.id, "Awaiting quiescence");
    }

    fn reset_finish_check(&self, state: &mut State) {
        if let Some(timer) = state.finish_timer.take() {
            self.inner.env.scheduler.clear_timeout(timer);
            state.checking_finish = false;
        }
    }

    fn quiescence_turn(&self, delay: u64) {
        let mut state = self.inner.state.lock();
        state.checking_finish = false;
        if state.finished {
            return;
        }
        let interaction = self.clone();
        state.finish_timer = Some(
            self.inner
                .env
                .scheduler
                .set_timeout(delay, Box::new(move || interaction.quiescence_settle())),
        );
    }

    fn quiescence_settle(&self) {
        let quiet = {
            let mut state = self.inner.state.lock();
            state.finish_timer = None;
            state.remaining == 0
        };
        if quiet {
            self.finish();
        }
    }

    /// Mark the interaction finished. Idempotent.
    ///
    /// `root.end` becomes the last observed activity, global attributes fill
    /// in custom keys not already set, completion handlers run, and
    /// [`INTERACTION_FINISHED`] is emitted with the interaction in the context.
    pub fn finish(&self) {
        let (handlers, end) = {
            let mut state = self.inner.state.lock();
            if state.finished {
                return;
            }
            state.finished = true;
            self.reset_finish_check(&mut state);
            state.checking_finish = false;

            let end = state.last_cb.max(state.last_finish);
            let root = state.root;
            if let Some(node) = state.nodes.get_mut(&root) {
                node.end = Some(end);
            }
            for (key, value) in self.inner.env.attributes.snapshot() {
                state.attrs.custom.entry(key).or_insert(value);
            }
            (std::mem::take(&mut state.handlers), end)
        };
        debug!(interaction_id = self.inner.id, end, "Interaction finished");

        for handler in handlers {
            handler(self);
        }

        if let Some(channel) = &self.inner.env.bus {
            let ctx = Context::new();
            ctx.insert(self.clone());
            bus::emit_reported(
                channel,
                INTERACTION_FINISHED,
                &mut vec![json!(self.inner.id)],
                Some(&ctx),
                false,
                true,
            );
        }
    }

    /// Run `handler` on finish, or right away if already finished
    pub fn on_finish(&self, handler: CompletionHandler) {
        let handler = {
            let mut state = self.inner.state.lock();
            if state.finished {
                Some(handler)
            } else {
                state.handlers.push(handler);
                None
            }
        };
        if let Some(handler) = handler {
            handler(self);
        }
    }

    pub fn attrs(&self) -> RootAttributes {
        self.inner.state.lock().attrs.clone()
    }

    pub fn update_attrs<R>(&self, f: impl FnOnce(&mut RootAttributes) -> R) -> R {
        f(&mut self.inner.state.lock().attrs)
    }

    pub fn ignore(&self) {
        self.inner.state.lock().ignored = true;
    }

    pub fn is_ignored(&self) -> bool {
        self.inner.state.lock().ignored
    }

    pub fn save(&self) {
        self.inner.state.lock().save = true;
    }

    pub fn is_saved(&self) -> bool {
        self.inner.state.lock().save
    }

    /// Run `f` on the per-interaction store. The lock is released during `f`.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        let mut store = std::mem::take(&mut self.inner.state.lock().store);
        let out = f(&mut store);
        let mut state = self.inner.state.lock();
        for (key, value) in std::mem::take(&mut state.store) {
            store.entry(key).or_insert(value);
        }
        state.store = store;
        out
    }

    pub fn payload(&self) -> InteractionPayload {
        let state = self.inner.state.lock();
        InteractionPayload::from_tree(self.inner.id, &state.attrs, state.root, &state.nodes)
    }
}

impl fmt::Debug for Interaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Interaction")
            .field("id", &self.inner.id)
            .field("trigger", &state.attrs.trigger)
            .field("remaining", &state.remaining)
            .field("node_count", &state.node_count)
            .field("finished", &state.finished)
            .finish()
    }
}
