//! Lifecycle events of the instrumented primitives, mapped onto tree operations

use std::sync::{Arc, Weak};

use serde_json::{json, Value};
use tracing::debug;

use super::{
    ErrorNode, TrackerInner, INITIAL_PAGE_LOAD, INTERACTION_DISCARDED, INTERACTION_SAVED,
    TRACE_HEADER,
};
use crate::bus::{self, listener, Channel, Context, EventArgs, Listener};
use crate::context::{Ambient, AsyncId};
use crate::error::TrackerError;
use crate::tree::{Interaction, NodeRef, NodeType, INTERACTION_FINISHED};
use crate::util::url::{host_of, resolve};

type Handler = fn(&TrackerInner, &mut EventArgs, &Context) -> anyhow::Result<()>;

/// Node chosen for a dispatched DOM event, shared by all of its listeners
#[derive(Clone)]
struct EventNode(Option<NodeRef>);

#[derive(Clone, Copy)]
struct TimerDelay(u64);

/// A timer scheduled while a node was current
#[derive(Clone)]
struct TimerInfo {
    id: AsyncId,
    node: NodeRef,
    /// Budget the callback starts with
    budget: i64,
}

/// Hold taken by a tracked timer, released when its callback ends
#[derive(Clone)]
struct HeldTimer(Interaction);

#[derive(Clone, Default)]
struct XhrState {
    parent: Option<NodeRef>,
    node: Option<NodeRef>,
    method: String,
    url: String,
}

#[derive(Clone)]
struct AjaxNode(Option<NodeRef>);

/// Node current when a promise or mutation batch was created
#[derive(Clone)]
struct CapturedNode(Option<NodeRef>);

#[derive(Clone)]
pub(super) struct TracerNode(pub(super) NodeRef);

fn bind(tracker: &Weak<TrackerInner>, handler: Handler) -> Listener {
    let tracker = tracker.clone();
    listener(move |args, ctx| match tracker.upgrade() {
        Some(tracker) => handler(&tracker, args, ctx),
        None => Ok(()),
    })
}

fn on(channel: &Channel, tracker: &Weak<TrackerInner>, event: &str, handler: Handler) {
    channel.on(event, bind(tracker, handler));
}

pub(super) fn register(tracker: &Arc<TrackerInner>) {
    let weak = Arc::downgrade(tracker);
    let bus = tracker.host.bus();

    on(bus, &weak, INTERACTION_FINISHED, TrackerInner::on_interaction_finished);
    for event in ["fn-err", "cb-err", "tracer-err"] {
        on(bus, &weak, event, TrackerInner::on_callback_error);
    }
    on(bus, &weak, "tracer-start", TrackerInner::on_tracer_start);
    on(bus, &weak, "tracer-end", TrackerInner::on_tracer_end);

    let events = bus.get("events");
    on(&events, &weak, "fn-start", TrackerInner::on_event_start);
    on(&events, &weak, "fn-end", TrackerInner::on_callback_end);

    let timer = bus.get("timer");
    on(&timer, &weak, "setTimeout-start", TrackerInner::on_set_timeout_start);
    on(&timer, &weak, "setTimeout-end", TrackerInner::on_set_timeout_end);
    on(&timer, &weak, "clearTimeout-start", TrackerInner::on_clear_timeout);
    on(&timer, &weak, "fn-start", TrackerInner::on_timer_start);
    on(&timer, &weak, "fn-end", TrackerInner::on_timer_end);

    let xhr = bus.get("xhr");
    on(&xhr, &weak, "new-xhr", TrackerInner::on_new_xhr);
    on(&xhr, &weak, "open-xhr-start", TrackerInner::on_xhr_open);
    on(&xhr, &weak, "send-xhr-start", TrackerInner::on_xhr_send);
    on(&xhr, &weak, "send-xhr-err", TrackerInner::on_xhr_send_failed);
    on(&xhr, &weak, "fn-start", TrackerInner::on_xhr_callback_start);
    on(&xhr, &weak, "fn-end", TrackerInner::on_callback_end);
    on(&xhr, &weak, "xhr-resolved", TrackerInner::on_xhr_resolved);

    let fetch = bus.get("fetch");
    on(&fetch, &weak, "fetch-start", TrackerInner::on_fetch_start);
    on(&fetch, &weak, "fetch-done", TrackerInner::on_fetch_done);
    on(&fetch, &weak, "fn-start", TrackerInner::on_ajax_callback_start);
    on(&fetch, &weak, "fn-end", TrackerInner::on_callback_end);

    let jsonp = bus.get("jsonp");
    on(&jsonp, &weak, "new-jsonp", TrackerInner::on_new_jsonp);
    on(&jsonp, &weak, "cb-start", TrackerInner::on_ajax_callback_start);
    on(&jsonp, &weak, "cb-end", TrackerInner::on_callback_end);
    on(&jsonp, &weak, "jsonp-end", TrackerInner::on_jsonp_end);
    on(&jsonp, &weak, "jsonp-error", TrackerInner::on_jsonp_error);

    let promise = bus.get("promise");
    on(&promise, &weak, "executor-start", TrackerInner::capture_current);
    on(&promise, &weak, "propagate", TrackerInner::on_propagate);
    on(&promise, &weak, "cb-start", TrackerInner::on_captured_start);
    on(&promise, &weak, "cb-end", TrackerInner::on_callback_end);

    let mutation = bus.get("mutation");
    on(&mutation, &weak, "dom-mutation", TrackerInner::capture_current);
    on(&mutation, &weak, "fn-start", TrackerInner::on_captured_start);
    on(&mutation, &weak, "fn-end", TrackerInner::on_callback_end);

    let history = bus.get("history");
    on(&history, &weak, "pushState-end", TrackerInner::on_history_change);
    on(&history, &weak, "replaceState-end", TrackerInner::on_history_change);
}

/// First positional argument of a wrapped call, `[[a, ..], this, label]`
fn call_arg(args: &EventArgs, idx: usize) -> Option<&Value> {
    args.first().and_then(|call| call.get(idx))
}

impl TrackerInner {
    fn enter(&self, ctx: &Context, node: Option<NodeRef>) {
        let now = self.host.now();
        self.ambient.lock().enter(ctx, node, now);
    }

    /// Close the callback span opened under `ctx` and restore the previous node
    fn leave(&self, ctx: &Context) {
        let now = self.host.now();
        let url = self.host.location();
        let mut ambient = self.ambient.lock();
        if let Some(exit) = ambient.leave(ctx, now) {
            ambient.note_url(&url);
            ambient.set_current(exit.prev);
        }
    }

    fn on_callback_end(&self, _args: &mut EventArgs, ctx: &Context) -> anyhow::Result<()> {
        self.leave(ctx);
        Ok(())
    }

    fn is_denied(&self, url: &str) -> bool {
        host_of(url).is_some_and(|host| self.config.is_denied(host))
    }

    pub(super) fn start_interaction(&self, ambient: &mut Ambient, trigger: &str, now: u64) -> Interaction {
        let location = self.host.location();
        // popstate fires after the location already moved
        let old_url = if trigger == "popstate" {
            ambient.last_seen_url.clone()
        } else {
            ambient.note_url(&location);
            location
        };
        let interaction = Interaction::new(&self.env, trigger, now, Some(&old_url));
        let route = ambient.last_route.clone();
        interaction.update_attrs(|attrs| {
            attrs.initial_page_url = Some(self.initial_url.clone());
            attrs.old_route = route;
        });
        interaction
    }

    fn node_for_event(&self, ambient: &mut Ambient, event: &Value, now: u64) -> Option<NodeRef> {
        if let Some(current) = ambient.current() {
            return Some(current);
        }
        let event_type = event.get("type").and_then(Value::as_str).unwrap_or_default();
        let target = event.get("target").and_then(Value::as_str).unwrap_or_default();

        if event_type == "hashchange" {
            if let Some(node) = ambient.node_on_last_hash_update.take().filter(NodeRef::is_live) {
                return Some(node);
            }
        }
        if event_type == "load" && target == "window" {
            let initial = self.initial.lock().clone();
            if let Some(interaction) = initial.filter(|i| !i.is_finished()) {
                return Some(interaction.root());
            }
        }
        if !self.triggers.lock().contains(event_type) {
            return None;
        }

        let interaction = self.start_interaction(ambient, event_type, now);
        if event_type == "click" {
            if let Some(text) = event.get("text").and_then(Value::as_str) {
                interaction.update_attrs(|attrs| {
                    attrs.custom.insert("actionText".into(), json!(text));
                });
            }
        }
        Some(interaction.root())
    }

    fn on_event_start(&self, args: &mut EventArgs, ctx: &Context) -> anyhow::Result<()> {
        let now = self.host.now();
        let mut ambient = self.ambient.lock();
        let node = match ctx.get::<EventNode>() {
            Some(EventNode(node)) => node,
            None => {
                let event = call_arg(args, 0).cloned().unwrap_or(Value::Null);
                let node = self.node_for_event(&mut ambient, &event, now);
                ctx.insert(EventNode(node.clone()));
                node
            }
        };
        ambient.enter(ctx, node, now);
        Ok(())
    }

    fn on_set_timeout_start(&self, args: &mut EventArgs, ctx: &Context) -> anyhow::Result<()> {
        let delay = call_arg(args, 0).and_then(Value::as_u64).unwrap_or(0);
        ctx.insert(TimerDelay(delay));
        Ok(())
    }

    fn on_set_timeout_end(&self, args: &mut EventArgs, ctx: &Context) -> anyhow::Result<()> {
        let Some(id) = args.get(2).and_then(AsyncId::from_value) else {
            return Ok(());
        };
        let delay = ctx
            .get::<TimerDelay>()
            .map_or(0, |TimerDelay(delay)| i64::try_from(delay).unwrap_or(i64::MAX));

        let mut ambient = self.ambient.lock();
        let Some(node) = ambient.current() else {
            return Ok(());
        };
        let budget = ambient.timer_budget.saturating_sub(delay);
        if budget < 0 {
            debug!(
                interaction_id = node.interaction().id(),
                timer = %id,
                delay,
                "Timer exceeds budget, not tracking"
            );
            return Ok(());
        }
        node.interaction().hold();
        ambient.timer_budget -= self.config.timer_cost;
        self.timers.lock().insert(id, node.interaction().clone());
        ctx.insert(TimerInfo {
            id,
            node,
            budget: budget - self.config.timer_cost,
        });
        Ok(())
    }

    fn on_clear_timeout(&self, args: &mut EventArgs, _ctx: &Context) -> anyhow::Result<()> {
        let held = call_arg(args, 0)
            .and_then(AsyncId::from_value)
            .and_then(|id| self.timers.lock().remove(&id));
        if let Some(interaction) = held {
            interaction.release();
        }
        Ok(())
    }

    fn on_timer_start(&self, _args: &mut EventArgs, ctx: &Context) -> anyhow::Result<()> {
        let now = self.host.now();
        let info = ctx.get::<TimerInfo>();
        let mut ambient = self.ambient.lock();
        match info {
            Some(info) if self.timers.lock().remove(&info.id).is_some() => {
                ctx.insert(HeldTimer(info.node.interaction().clone()));
                ambient.enter(ctx, Some(info.node), now);
                ambient.timer_budget = info.budget;
            }
            _ => ambient.enter(ctx, None, now),
        }
        Ok(())
    }

    fn on_timer_end(&self, _args: &mut EventArgs, ctx: &Context) -> anyhow::Result<()> {
        self.leave(ctx);
        if let Some(HeldTimer(interaction)) = ctx.remove::<HeldTimer>() {
            interaction.release();
        }
        Ok(())
    }

    fn start_ajax(&self, parent: Option<NodeRef>, kind: &str, method: &str, url: &str) -> Option<NodeRef> {
        let node = parent?.child(NodeType::Ajax, self.host.now(), None, false)?;
        node.set_attribute("ajaxType", json!(kind));
        node.set_attribute("method", json!(method));
        node.set_attribute("url", json!(url));
        debug!(
            interaction_id = node.interaction().id(),
            node_id = %node.id(),
            kind,
            url,
            "Ajax node started"
        );
        Some(node)
    }

    fn end_ajax(&self, node: &NodeRef, status: Option<u64>, at: u64) {
        if let Some(status) = status {
            node.set_attribute("status", json!(status));
        }
        let url = node
            .snapshot()
            .and_then(|n| n.attrs.get("url").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default();
        if self.is_denied(&url) {
            debug!(node_id = %node.id(), url, "Ajax to deny-listed host, cancelling");
            node.cancel();
        } else {
            node.finish(at);
        }
    }

    fn on_new_xhr(&self, _args: &mut EventArgs, ctx: &Context) -> anyhow::Result<()> {
        let parent = self.ambient.lock().current();
        ctx.insert(XhrState {
            parent,
            ..XhrState::default()
        });
        Ok(())
    }

    fn on_xhr_open(&self, args: &mut EventArgs, ctx: &Context) -> anyhow::Result<()> {
        let method = call_arg(args, 0)
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();
        let url = call_arg(args, 1).and_then(Value::as_str).unwrap_or_default();
        let url = resolve(&self.host.location(), url);
        ctx.update::<XhrState, _>(|state| {
            state.method = method;
            state.url = url;
        });
        Ok(())
    }

    fn on_xhr_send(&self, _args: &mut EventArgs, ctx: &Context) -> anyhow::Result<()> {
        let state = ctx.get::<XhrState>().unwrap_or_default();
        let parent = self.ambient.lock().current().or(state.parent);
        let node = self.start_ajax(parent, "xhr", &state.method, &state.url);
        ctx.update::<XhrState, _>(|state| state.node = node);
        Ok(())
    }

    fn on_xhr_send_failed(&self, _args: &mut EventArgs, ctx: &Context) -> anyhow::Result<()> {
        if let Some(node) = ctx.update::<XhrState, _>(|state| state.node.take()) {
            node.cancel();
        }
        Ok(())
    }

    fn on_xhr_callback_start(&self, _args: &mut EventArgs, ctx: &Context) -> anyhow::Result<()> {
        let node = ctx.get::<XhrState>().and_then(|state| state.node.or(state.parent));
        self.enter(ctx, node);
        Ok(())
    }

    fn on_xhr_resolved(&self, args: &mut EventArgs, ctx: &Context) -> anyhow::Result<()> {
        let Some(node) = ctx.get::<XhrState>().and_then(|state| state.node) else {
            return Ok(());
        };
        let detail = args
            .first()
            .ok_or_else(|| TrackerError::invalid_args("xhr-resolved", "missing request detail"))?;
        let end = detail.get("end").and_then(Value::as_u64).unwrap_or_else(|| self.host.now());
        self.end_ajax(&node, detail.get("status").and_then(Value::as_u64), end);
        Ok(())
    }

    fn on_fetch_start(&self, args: &mut EventArgs, ctx: &Context) -> anyhow::Result<()> {
        let url = args.first().and_then(Value::as_str).unwrap_or_default().to_string();
        let method = args
            .get(1)
            .and_then(|init| init.get("method"))
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();
        let parent = self.ambient.lock().current();
        let node = self.start_ajax(parent, "fetch", &method, &url);

        if let Some(node) = node.as_ref().filter(|_| !self.is_denied(&url)) {
            if let Some(init) = args.get_mut(1).and_then(Value::as_object_mut) {
                let headers = init.entry("headers").or_insert_with(|| json!({}));
                if let Some(headers) = headers.as_object_mut() {
                    headers.insert(
                        TRACE_HEADER.into(),
                        json!(format!("{}:{}", node.interaction().id(), node.id())),
                    );
                }
            }
        }
        ctx.insert(AjaxNode(node));
        Ok(())
    }

    fn on_fetch_done(&self, args: &mut EventArgs, ctx: &Context) -> anyhow::Result<()> {
        let Some(AjaxNode(Some(node))) = ctx.get::<AjaxNode>() else {
            return Ok(());
        };
        if args.first().is_some_and(|err| !err.is_null()) {
            node.cancel();
        } else {
            let status = args.get(1).and_then(Value::as_u64);
            self.end_ajax(&node, status, self.host.now());
        }
        Ok(())
    }

    fn on_ajax_callback_start(&self, _args: &mut EventArgs, ctx: &Context) -> anyhow::Result<()> {
        let node = ctx.get::<AjaxNode>().and_then(|AjaxNode(node)| node);
        self.enter(ctx, node);
        Ok(())
    }

    fn on_new_jsonp(&self, args: &mut EventArgs, ctx: &Context) -> anyhow::Result<()> {
        let url = args.first().and_then(Value::as_str).unwrap_or_default().to_string();
        let parent = self.ambient.lock().current();
        ctx.insert(AjaxNode(self.start_ajax(parent, "jsonp", "GET", &url)));
        Ok(())
    }

    fn on_jsonp_end(&self, _args: &mut EventArgs, ctx: &Context) -> anyhow::Result<()> {
        if let Some(AjaxNode(Some(node))) = ctx.get::<AjaxNode>() {
            self.end_ajax(&node, None, self.host.now());
        }
        Ok(())
    }

    fn on_jsonp_error(&self, _args: &mut EventArgs, ctx: &Context) -> anyhow::Result<()> {
        if let Some(AjaxNode(Some(node))) = ctx.get::<AjaxNode>() {
            node.cancel();
        }
        Ok(())
    }

    fn capture_current(&self, _args: &mut EventArgs, ctx: &Context) -> anyhow::Result<()> {
        if !ctx.contains::<CapturedNode>() {
            let node = self.ambient.lock().current();
            ctx.insert(CapturedNode(node));
        }
        Ok(())
    }

    /// `[source id, overwrite, trigger]` on the dependent promise's context.
    ///
    /// Attaching a reaction captures the current node (or the source's);
    /// settlement overwrites it with the source's node when it has one.
    fn on_propagate(&self, args: &mut EventArgs, ctx: &Context) -> anyhow::Result<()> {
        let source = args
            .first()
            .and_then(AsyncId::from_value)
            .ok_or_else(|| TrackerError::invalid_args("propagate", "missing source promise id"))?;
        let overwrite = args.get(1).and_then(Value::as_bool).unwrap_or(false);
        let source_node = self
            .host
            .contexts()
            .lookup(source)
            .and_then(|source| source.get::<CapturedNode>())
            .and_then(|CapturedNode(node)| node);

        if overwrite {
            if let Some(node) = source_node {
                ctx.insert(CapturedNode(Some(node)));
            }
        } else if !ctx.contains::<CapturedNode>() {
            let node = self.ambient.lock().current().or(source_node);
            ctx.insert(CapturedNode(node));
        }
        Ok(())
    }

    fn on_captured_start(&self, _args: &mut EventArgs, ctx: &Context) -> anyhow::Result<()> {
        let node = ctx.get::<CapturedNode>().and_then(|CapturedNode(node)| node);
        self.enter(ctx, node);
        Ok(())
    }

    fn on_history_change(&self, _args: &mut EventArgs, _ctx: &Context) -> anyhow::Result<()> {
        let url = self.host.location();
        self.ambient.lock().note_url(&url);
        Ok(())
    }

    fn on_callback_error(&self, args: &mut EventArgs, ctx: &Context) -> anyhow::Result<()> {
        let node = self.ambient.lock().current();
        let message = args.get(2).and_then(Value::as_str).unwrap_or_default();
        debug!(
            interaction_id = node.as_ref().map(|n| n.interaction().id()),
            error = message,
            "Callback failed"
        );
        ctx.insert(ErrorNode(node));
        Ok(())
    }

    fn on_tracer_start(&self, _args: &mut EventArgs, ctx: &Context) -> anyhow::Result<()> {
        let node = ctx.get::<TracerNode>().map(|TracerNode(node)| node);
        self.enter(ctx, node);
        Ok(())
    }

    fn on_tracer_end(&self, _args: &mut EventArgs, ctx: &Context) -> anyhow::Result<()> {
        self.leave(ctx);
        if let Some(TracerNode(node)) = ctx.get::<TracerNode>() {
            node.finish(self.host.now());
        }
        Ok(())
    }

    /// Route a finished interaction to `interactionSaved` or `interactionDiscarded`
    fn on_interaction_finished(&self, _args: &mut EventArgs, ctx: &Context) -> anyhow::Result<()> {
        let interaction = ctx.get::<Interaction>().ok_or_else(|| {
            TrackerError::invalid_args(INTERACTION_FINISHED, "no interaction in context")
        })?;
        let attrs = interaction.attrs();
        let saved = !interaction.is_ignored()
            && (interaction.is_saved()
                || attrs.trigger == INITIAL_PAGE_LOAD
                || attrs.url_changed()
                || attrs.route_changed());
        let event = if saved { INTERACTION_SAVED } else { INTERACTION_DISCARDED };
        debug!(
            interaction_id = interaction.id(),
            trigger = %attrs.trigger,
            event,
            "Routing finished interaction"
        );

        let payload = serde_json::to_value(interaction.payload()).map_err(TrackerError::from)?;
        bus::emit_reported(
            self.host.bus(),
            event,
            &mut vec![json!(interaction.id()), payload],
            Some(ctx),
            false,
            true,
        );
        Ok(())
    }
}
