//! The ambient "current node" and its save/restore discipline

use crate::bus::Context;
use crate::tree::NodeRef;
use crate::util::url::strip_hash;

/// Saved state of one callback span
pub struct Frame {
    token: Context,
    prev: Option<NodeRef>,
    start: u64,
    prev_child_time: u64,
    prev_timer_budget: i64,
}

/// What leaving a callback span measured
#[derive(Debug, Clone)]
pub struct FrameExit {
    pub total: u64,
    pub exclusive: u64,
    /// Node that was current before the span began
    pub prev: Option<NodeRef>,
}

/// Mutable ambient state shared by every instrumented callback.
///
/// Callback spans are entered and left in pairs keyed by their emission
/// context; nested spans accumulate into `child_time` so each span only
/// attributes its exclusive time to the node that was current.
pub struct Ambient {
    current: Option<NodeRef>,
    prev: Option<NodeRef>,
    frames: Vec<Frame>,
    child_time: u64,
    max_timer_budget: i64,
    pub timer_budget: i64,
    pub node_on_last_hash_update: Option<NodeRef>,
    pub last_seen_url: String,
    pub last_route: Option<String>,
}

impl Ambient {
    pub fn new(url: &str, max_timer_budget: i64) -> Self {
        Self {
            current: None,
            prev: None,
            frames: Vec::new(),
            child_time: 0,
            max_timer_budget,
            timer_budget: max_timer_budget,
            node_on_last_hash_update: None,
            last_seen_url: url.to_string(),
            last_route: None,
        }
    }

    /// The current node, if its interaction is still running
    pub fn current(&self) -> Option<NodeRef> {
        self.current.clone().filter(NodeRef::is_live)
    }

    pub fn prev(&self) -> Option<NodeRef> {
        self.prev.clone()
    }

    /// Number of callback spans currently open
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Replace the current node, checking the replaced one for quiescence.
    /// Nodes of finished interactions are stored as `None`.
    pub fn set_current(&mut self, node: Option<NodeRef>) {
        if let Some(replaced) = &self.current {
            replaced.interaction().check_finish();
        }
        self.prev = self.current.take();
        self.current = node.filter(NodeRef::is_live);
    }

    /// Open a callback span and make `node` current.
    /// Every span starts a new synchronous turn with a full timer budget.
    pub fn enter(&mut self, token: &Context, node: Option<NodeRef>, now: u64) {
        self.frames.push(Frame {
            token: token.clone(),
            prev: self.current.clone(),
            start: now,
            prev_child_time: self.child_time,
            prev_timer_budget: self.timer_budget,
        });
        self.child_time = 0;
        self.timer_budget = self.max_timer_budget;
        self.set_current(node);
    }

    /// Close the innermost span opened with `token`.
    ///
    /// Exclusive time goes to the node current at exit and the interaction's
    /// last callback time moves to `now`. Spans opened after it and never
    /// closed are discarded. The caller restores `prev` once done with the
    /// current node.
    pub fn leave(&mut self, token: &Context, now: u64) -> Option<FrameExit> {
        let idx = self.frames.iter().rposition(|f| f.token.ptr_eq(token))?;
        let frame = self.frames.drain(idx..).next()?;
        let total = now.saturating_sub(frame.start);
        let exclusive = total.saturating_sub(self.child_time);
        if let Some(node) = self.current() {
            node.add_callback_time(exclusive);
            node.interaction().set_last_callback(now);
        }
        self.child_time = frame.prev_child_time + total;
        self.timer_budget = frame.prev_timer_budget;
        Some(FrameExit {
            total,
            exclusive,
            prev: frame.prev,
        })
    }

    /// Record a location change seen while `current` runs.
    ///
    /// The URL becomes the interaction's `newURL`; a hash-only change also
    /// remembers the node for the `hashchange` event the host fires later.
    pub fn note_url(&mut self, url: &str) -> bool {
        if url == self.last_seen_url {
            return false;
        }
        if let Some(node) = self.current() {
            node.interaction()
                .update_attrs(|attrs| attrs.new_url = Some(url.to_string()));
            if strip_hash(url) == strip_hash(&self.last_seen_url) {
                self.node_on_last_hash_update = Some(node);
            }
        }
        self.last_seen_url = url.to_string();
        true
    }
}
