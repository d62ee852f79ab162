//! Hierarchical named event channels with per-type buffering
//!
//! A [`Channel`] dispatches events to listeners registered for an event type.
//! Channels form a tree through [`Channel::get`]; an emission on a child
//! bubbles to its ancestors first, so listeners on the root observe every
//! raw event before channel-local listeners do.
//!
//! Event types can be marked as buffered into a named group. Every emission
//! of a buffered type is appended to the group's backlog (after live
//! dispatch) until a late consumer drains it, see [`super::Registry`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;

use super::context::Context;
use crate::error::{Result, TrackerError};

/// Positional event arguments. Listeners may mutate them in place.
pub type EventArgs = Vec<Value>;

/// Listener callback: receives the (mutable) arguments and the emission context
pub type Listener = Arc<dyn Fn(&mut EventArgs, &Context) -> anyhow::Result<()> + Send + Sync>;

/// Backlog group used when [`Channel::buffer`] is given no explicit group
pub const DEFAULT_GROUP: &str = "feature";

/// Backlog group reserved for public API calls
pub const API_GROUP: &str = "api";

/// Wrap a closure as a [`Listener`]
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&mut EventArgs, &Context) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// One buffered emission awaiting replay
#[derive(Clone)]
pub struct BacklogEntry {
    pub channel: Channel,
    pub event: String,
    pub args: EventArgs,
    pub context: Context,
}

impl fmt::Debug for BacklogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BacklogEntry")
            .field("channel", &self.channel.name())
            .field("event", &self.event)
            .field("args", &self.args)
            .finish()
    }
}

/// State shared by every channel of one tree
#[derive(Default)]
struct Shared {
    /// group -> queue; `None` once the group has been drained
    backlog: Mutex<HashMap<String, Option<Vec<BacklogEntry>>>>,
    aborted: AtomicBool,
}

#[derive(Default)]
struct ChannelState {
    listeners: HashMap<String, Vec<Listener>>,
    buffer_groups: HashMap<String, String>,
    children: HashMap<String, Channel>,
}

struct ChannelInner {
    name: String,
    parent: Option<Weak<ChannelInner>>,
    shared: Arc<Shared>,
    state: Mutex<ChannelState>,
}

/// Handle to one channel of an event bus tree. Cheap to clone.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// Create the root of a new channel tree
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                name: name.into(),
                parent: None,
                shared: Arc::new(Shared::default()),
                state: Mutex::new(ChannelState::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The parent channel, if this is a child and the parent is still alive
    pub fn parent(&self) -> Option<Channel> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Channel { inner })
    }

    /// Get or create the named child channel. Memoized per (parent, name).
    pub fn get(&self, name: &str) -> Channel {
        let mut state = self.inner.state.lock();
        state
            .children
            .entry(name.to_string())
            .or_insert_with(|| Channel {
                inner: Arc::new(ChannelInner {
                    name: name.to_string(),
                    parent: Some(Arc::downgrade(&self.inner)),
                    shared: Arc::clone(&self.inner.shared),
                    state: Mutex::new(ChannelState::default()),
                }),
            })
            .clone()
    }

    /// Register a listener on this channel only
    pub fn on(&self, event: &str, listener: Listener) {
        self.inner
            .state
            .lock()
            .listeners
            .entry(event.to_string())
            .or_default()
            .push(listener);
    }

    /// Register a closure, returning the listener handle needed for [`Channel::off`]
    pub fn on_fn<F>(&self, event: &str, f: F) -> Listener
    where
        F: Fn(&mut EventArgs, &Context) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handle = listener(f);
        self.on(event, Arc::clone(&handle));
        handle
    }

    /// Remove a previously registered listener. Returns `true` if it was found.
    pub fn off(&self, event: &str, listener: &Listener) -> bool {
        let mut state = self.inner.state.lock();
        let Some(list) = state.listeners.get_mut(event) else {
            return false;
        };
        match list.iter().position(|l| Arc::ptr_eq(l, listener)) {
            Some(idx) => {
                list.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Snapshot of the listeners for `event`, in registration order
    pub fn listeners(&self, event: &str) -> Vec<Listener> {
        self.inner
            .state
            .lock()
            .listeners
            .get(event)
            .cloned()
            .unwrap_or_default()
    }

    /// Emit with bubbling and without forcing past an abort
    pub fn emit(
        &self,
        event: &str,
        args: &mut EventArgs,
        context: Option<&Context>,
    ) -> Result<Context> {
        self.emit_with(event, args, context, false, true)
    }

    /// Dispatch `event` to the ancestors (when `bubble`), then to this channel's
    /// listeners, then append it to its backlog group if the type is buffered.
    ///
    /// The first failing listener stops dispatch and its error is returned;
    /// recovering from it is the emission site's job.
    pub fn emit_with(
        &self,
        event: &str,
        args: &mut EventArgs,
        context: Option<&Context>,
        force: bool,
        bubble: bool,
    ) -> Result<Context> {
        let ctx = context.cloned().unwrap_or_default();
        if self.is_aborted() && !force {
            return Ok(ctx);
        }

        if bubble {
            if let Some(parent) = self.parent() {
                parent.emit_with(event, args, Some(&ctx), force, true)?;
            }
        }

        let listeners = self.listeners(event);
        tracing::trace!(
            channel = %self.inner.name,
            event,
            listeners = listeners.len(),
            "emit"
        );
        for listener in &listeners {
            listener(args, &ctx).map_err(|err| TrackerError::listener(event, &err))?;
        }

        let group = self.inner.state.lock().buffer_groups.get(event).cloned();
        if let Some(group) = group {
            if let Some(Some(queue)) = self.inner.shared.backlog.lock().get_mut(&group) {
                queue.push(BacklogEntry {
                    channel: self.clone(),
                    event: event.to_string(),
                    args: args.clone(),
                    context: ctx.clone(),
                });
            }
        }

        Ok(ctx)
    }

    /// Mark event types as buffered into `group` (default [`DEFAULT_GROUP`]).
    /// Creates the group's queue unless it already exists or was drained.
    pub fn buffer(&self, events: &[&str], group: Option<&str>) {
        if self.is_aborted() {
            return;
        }
        let group = group.unwrap_or(DEFAULT_GROUP);
        {
            let mut state = self.inner.state.lock();
            for event in events {
                state
                    .buffer_groups
                    .insert((*event).to_string(), group.to_string());
            }
        }
        self.inner
            .shared
            .backlog
            .lock()
            .entry(group.to_string())
            .or_insert_with(|| Some(Vec::new()));
    }

    pub fn is_buffering(&self, event: &str) -> bool {
        self.inner.state.lock().buffer_groups.contains_key(event)
    }

    /// Number of pending entries for `group`; `None` if the group has no open queue
    pub fn backlog_len(&self, group: &str) -> Option<usize> {
        match self.inner.shared.backlog.lock().get(group) {
            Some(Some(queue)) => Some(queue.len()),
            _ => None,
        }
    }

    /// Take the pending entries of `group` and close its queue
    pub fn take_backlog(&self, group: &str) -> Option<Vec<BacklogEntry>> {
        let mut backlog = self.inner.shared.backlog.lock();
        match backlog.get_mut(group) {
            Some(slot) => slot.take(),
            None => {
                backlog.insert(group.to_string(), None);
                None
            }
        }
    }

    /// Abort the whole channel tree if consumers never drained the api or
    /// feature backlog. Every later non-forced emit becomes a no-op.
    pub fn abort(&self) -> bool {
        let dropped = {
            let mut backlog = self.inner.shared.backlog.lock();
            let pending = [API_GROUP, DEFAULT_GROUP]
                .iter()
                .any(|group| matches!(backlog.get(*group), Some(Some(_))));
            if !pending {
                return false;
            }
            self.inner.shared.aborted.store(true, Ordering::SeqCst);
            std::mem::take(&mut *backlog)
        };
        let discarded: usize = dropped.values().flatten().map(Vec::len).sum();
        tracing::warn!(
            channel = %self.inner.name,
            discarded,
            "Event bus aborted with undrained backlog"
        );
        true
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.shared.aborted.load(Ordering::SeqCst)
    }

    pub fn ptr_eq(&self, other: &Channel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.inner.name)
            .field("aborted", &self.is_aborted())
            .finish()
    }
}
