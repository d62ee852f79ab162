//! Explicit tracer surface for application code and plugins

use serde_json::{json, Map, Value};

use super::handlers::TracerNode;
use super::Tracker;
use crate::bus::Context;
use crate::host::Host;
use crate::tree::{Interaction, NodeRef, NodeType};
use crate::wrap::{Callable, WrapOptions};

/// A named span under the node that was current when it started
#[derive(Clone)]
pub struct Span {
    node: NodeRef,
    host: Host,
}

impl Span {
    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    pub fn end(&self) {
        self.node.finish(self.host.now());
    }
}

/// Operations on one interaction, as handed out by [`Tracker::interaction`]
#[derive(Clone)]
pub struct InteractionHandle {
    interaction: Interaction,
    host: Host,
}

impl InteractionHandle {
    pub fn id(&self) -> u64 {
        self.interaction.id()
    }

    pub fn interaction(&self) -> &Interaction {
        &self.interaction
    }

    pub fn set_name(&self, name: &str) -> &Self {
        self.interaction
            .update_attrs(|attrs| attrs.custom_name = Some(name.to_string()));
        self
    }

    pub fn set_attribute(&self, key: &str, value: Value) -> &Self {
        self.interaction.update_attrs(|attrs| {
            attrs.custom.insert(key.to_string(), value);
        });
        self
    }

    pub fn action_text(&self, text: &str) -> &Self {
        self.set_attribute("actionText", json!(text))
    }

    /// Report as discarded whatever else happens
    pub fn ignore(&self) -> &Self {
        self.interaction.ignore();
        self
    }

    /// Report as saved even without a route or URL change
    pub fn save(&self) -> &Self {
        self.interaction.save();
        self
    }

    pub fn on_end<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&Interaction) + Send + 'static,
    {
        self.interaction.on_finish(Box::new(callback));
        self
    }

    /// Hand the per-interaction store to `callback` on a later task
    pub fn get_context<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&mut Map<String, Value>) + Send + 'static,
    {
        let interaction = self.interaction.clone();
        self.host.scheduler().set_timeout(
            0,
            Box::new(move || interaction.with_store(callback)),
        );
        self
    }

    /// Finish now, without waiting for outstanding work
    pub fn end(&self) {
        let now = self.host.now();
        if let Some(marker) = self
            .interaction
            .root()
            .child(NodeType::CustomEnd, now, None, true)
        {
            marker.finish(now);
        }
        self.interaction.finish();
    }
}

impl Tracker {
    pub fn current_node(&self) -> Option<NodeRef> {
        self.inner.ambient.lock().current()
    }

    /// Make `node` current, e.g. to resume a plugin's saved context
    pub fn set_current_node(&self, node: Option<NodeRef>) {
        self.inner.ambient.lock().set_current(node);
    }

    /// Start a `customTracer` span under the current node
    pub fn start_span(&self, name: &str) -> Option<Span> {
        let now = self.inner.host.now();
        let node = self
            .current_node()?
            .child(NodeType::CustomTracer, now, Some(name), false)?;
        Some(Span {
            node,
            host: self.inner.host.clone(),
        })
    }

    /// The interaction of the current node, or a new `api` interaction
    /// made current until the running task ends.
    pub fn interaction(&self) -> InteractionHandle {
        let now = self.inner.host.now();
        let mut ambient = self.inner.ambient.lock();
        let interaction = match ambient.current() {
            Some(node) => node.interaction().clone(),
            None => {
                let interaction = self.inner.start_interaction(&mut ambient, "api", now);
                ambient.set_current(Some(interaction.root()));
                if ambient.depth() == 0 {
                    self.release_at_task_end(&interaction);
                }
                interaction
            }
        };
        InteractionHandle {
            interaction,
            host: self.inner.host.clone(),
        }
    }

    fn release_at_task_end(&self, interaction: &Interaction) {
        let tracker = self.downgrade();
        let root = interaction.root();
        self.inner.host.event_loop().queue_microtask(Box::new(move || {
            let Some(tracker) = tracker.upgrade() else {
                return;
            };
            let mut ambient = tracker.ambient.lock();
            let still_current = ambient
                .current()
                .is_some_and(|node| node.ptr_eq(&root));
            if still_current && ambient.depth() == 0 {
                ambient.set_current(None);
            }
        }));
    }

    /// Wrap `callback` as a `customTracer` child of the current node.
    ///
    /// The node stays open until the returned callable runs, and work the
    /// callback starts is attributed to it. Without a current node the
    /// callback comes back unwrapped.
    pub fn create_tracer(&self, name: &str, callback: Option<Callable>) -> Callable {
        let body = callback.unwrap_or_else(|| Callable::named(name, |_, _, _| Ok(Value::Null)));
        let now = self.inner.host.now();
        let Some(node) = self
            .current_node()
            .and_then(|parent| parent.child(NodeType::CustomTracer, now, Some(name), false))
        else {
            return body;
        };

        let ctx = Context::new();
        ctx.insert(TracerNode(node));
        let target = body.clone();
        let fresh = Callable::named(name, move |this, args, ctx| target.call(this, args, ctx));
        self.inner.api.wrap(
            &fresh,
            WrapOptions::prefix("tracer-").with_context(&ctx).with_label(name),
        )
    }

    /// Name the route the application just moved to
    pub fn set_current_route_name(&self, name: Option<&str>) {
        let mut ambient = self.inner.ambient.lock();
        if let Some(node) = ambient.current() {
            let route = name.map(str::to_string);
            node.interaction()
                .update_attrs(|attrs| attrs.new_route = route);
        }
        ambient.last_route = name.map(str::to_string);
    }
}
