//! Start/err/end instrumentation around host callables

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use super::callable::{Callable, MethodTable};
use crate::bus::{self, Channel, Context, EventArgs};

static NEXT_INSTRUMENTER: AtomicU64 = AtomicU64::new(1);

/// Chooses the context a wrapped invocation runs under
#[derive(Clone)]
pub enum Resolver {
    /// Every invocation shares this context
    Fixed(Context),
    /// Computed from the invocation's arguments and receiver
    Dynamic(Arc<dyn Fn(&EventArgs, &Value) -> Context + Send + Sync>),
}

impl Resolver {
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn(&EventArgs, &Value) -> Context + Send + Sync + 'static,
    {
        Resolver::Dynamic(Arc::new(f))
    }

    fn resolve(&self, args: &EventArgs, this: &Value) -> Context {
        match self {
            Resolver::Fixed(ctx) => ctx.clone(),
            Resolver::Dynamic(f) => f(args, this),
        }
    }
}

/// Options for [`Instrumenter::wrap`]
#[derive(Clone)]
pub struct WrapOptions {
    pub prefix: String,
    pub resolver: Option<Resolver>,
    pub label: Option<String>,
    pub bubble: bool,
}

impl WrapOptions {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            resolver: None,
            label: None,
            bubble: true,
        }
    }

    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_context(self, ctx: &Context) -> Self {
        self.with_resolver(Resolver::Fixed(ctx.clone()))
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn without_bubble(mut self) -> Self {
        self.bubble = false;
        self
    }
}

/// Wraps callables so every invocation emits `<prefix>start`, `<prefix>err`
/// (on failure) and `<prefix>end` on one channel.
///
/// Emission is guarded: while listeners of this instrumenter run, nested
/// emits from the same instrumenter are dropped unless it was built with
/// [`Instrumenter::always`], which also forces emits past an aborted bus.
#[derive(Clone)]
pub struct Instrumenter {
    id: u64,
    channel: Channel,
    depth: Arc<AtomicUsize>,
    always: bool,
}

impl Instrumenter {
    pub fn new(channel: &Channel) -> Self {
        Self::build(channel, false)
    }

    pub fn always(channel: &Channel) -> Self {
        Self::build(channel, true)
    }

    fn build(channel: &Channel, always: bool) -> Self {
        Self {
            id: NEXT_INSTRUMENTER.fetch_add(1, Ordering::Relaxed),
            channel: channel.clone(),
            depth: Arc::new(AtomicUsize::new(0)),
            always,
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// True while listeners of this instrumenter are running
    pub fn in_flight(&self) -> bool {
        self.depth.load(Ordering::SeqCst) > 0
    }

    /// Guarded emit. Listener failures are rerouted to `internal-error`.
    pub fn emit(&self, event: &str, args: &mut EventArgs, ctx: &Context, bubble: bool) {
        if self.in_flight() && !self.always {
            tracing::trace!(event, "Suppressed nested emit");
            return;
        }
        self.depth.fetch_add(1, Ordering::SeqCst);
        bus::emit_reported(&self.channel, event, args, Some(ctx), self.always, bubble);
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }

    /// Guarded emit with a fresh context, returned to the caller
    pub fn notify(&self, event: &str, args: &mut EventArgs) -> Context {
        let ctx = Context::new();
        self.emit(event, args, &ctx, true);
        ctx
    }

    /// Wrap `callable`. A wrapper this instrumenter made for the same
    /// prefix is returned as is; wrappers from elsewhere get another layer.
    ///
    /// Without a resolver, wrapping the same original twice with the same
    /// prefix yields the same wrapper; resolver-bound wrappers are per call
    /// since each carries its own context.
    pub fn wrap(&self, callable: &Callable, options: WrapOptions) -> Callable {
        let origin = (self.id, options.prefix.clone());
        if callable.is_wrapped_by(&origin) {
            return callable.clone();
        }
        let key = options.resolver.is_none().then(|| origin.clone());
        if let Some(existing) = key.as_ref().and_then(|key| callable.cached_wrapper(key)) {
            return existing;
        }

        let original = callable.clone();
        let instrumenter = self.clone();
        let start = format!("{}start", options.prefix);
        let err = format!("{}err", options.prefix);
        let end = format!("{}end", options.prefix);
        let label = options
            .label
            .clone()
            .map_or(Value::Null, Value::String);
        let resolver = options.resolver.clone();
        let bubble = options.bubble;

        let wrapper = Callable::wrapper(
            origin,
            callable.name().map(str::to_string),
            Box::new(move |this, args, caller_ctx| {
                let ctx = match &resolver {
                    Some(resolver) => resolver.resolve(args, this),
                    None => caller_ctx.clone(),
                };

                let mut start_args = vec![
                    Value::Array(std::mem::take(args)),
                    this.clone(),
                    label.clone(),
                ];
                instrumenter.emit(&start, &mut start_args, &ctx, bubble);
                *args = match start_args.into_iter().next() {
                    Some(Value::Array(mutated)) => mutated,
                    _ => Vec::new(),
                };

                let result = original.call(this, args, &ctx);

                if let Err(failure) = &result {
                    let mut err_args = vec![
                        Value::Array(args.clone()),
                        this.clone(),
                        json!(failure.message()),
                    ];
                    instrumenter.emit(&err, &mut err_args, &ctx, bubble);
                }

                let mut end_args = vec![
                    Value::Array(args.clone()),
                    this.clone(),
                    result.as_ref().cloned().unwrap_or(Value::Null),
                ];
                instrumenter.emit(&end, &mut end_args, &ctx, bubble);

                result
            }),
        );
        if let Some(key) = key {
            callable.remember_wrapper(key, &wrapper);
        }
        wrapper
    }

    /// Replace each named method of `table` with its wrapped form.
    ///
    /// A prefix starting with `-` is appended to the method name
    /// (`"-xhr-"` turns `send` into `send-xhr-`). Missing and already
    /// wrapped methods are skipped.
    pub fn in_place(
        &self,
        table: &MethodTable,
        names: &[&str],
        prefix: &str,
        resolver: Option<Resolver>,
        bubble: bool,
    ) {
        for name in names {
            let Some(method) = table.get(name) else {
                continue;
            };
            if method.is_wrapped() {
                continue;
            }
            let event_prefix = if prefix.starts_with('-') {
                format!("{name}{prefix}")
            } else {
                prefix.to_string()
            };
            let mut options = WrapOptions::prefix(event_prefix).with_label(*name);
            options.resolver = resolver.clone();
            options.bubble = bubble;
            table.define(name, self.wrap(&method, options));
        }
    }
}
