//! Promises with microtask reactions

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::{json, Value};

use super::Core;
use crate::bus::{Channel, Context};
use crate::context::{AsyncId, ContextStore};
use crate::wrap::{CallError, Callable, Instrumenter, WrapOptions};

type Settlement = Result<Value, CallError>;

struct Reaction {
    child: Promise,
    on_fulfilled: Option<Callable>,
    on_rejected: Option<Callable>,
}

enum PromiseState {
    Pending(Vec<Reaction>),
    Settled(Settlement),
}

struct PromiseCell {
    id: AsyncId,
    ctx: Context,
    owner: Arc<Promises>,
    store: ContextStore,
    state: Mutex<PromiseState>,
}

impl Drop for PromiseCell {
    fn drop(&mut self) {
        self.store.evict(self.id);
    }
}

/// Handle to one host promise. Its context stays registered in the host's
/// context store for as long as a handle is alive.
#[derive(Clone)]
pub struct Promise {
    cell: Arc<PromiseCell>,
}

/// Settles the promise it was created for
#[derive(Clone)]
pub struct Deferred {
    promise: Promise,
}

impl Deferred {
    pub fn resolve(&self, value: Value) {
        self.promise.settle(Ok(value));
    }

    pub fn reject(&self, error: CallError) {
        self.promise.settle(Err(error));
    }

    pub fn promise(&self) -> &Promise {
        &self.promise
    }
}

/// Promise primitives on the `promise` channel.
///
/// Events: the executor's `executor-start/-err/-end` (not bubbled),
/// `propagate [source id, overwrite, trigger]` on the dependent promise's
/// context (`then` when a reaction is attached, `resolve`/`reject` when the
/// source settles), and reaction callbacks' `cb-start/-err/-end`.
pub struct Promises {
    core: Weak<Core>,
    instrumenter: Instrumenter,
}

impl Promises {
    pub(crate) fn new(core: &Arc<Core>, channel: &Channel) -> Arc<Self> {
        Arc::new(Self {
            core: Arc::downgrade(core),
            instrumenter: Instrumenter::new(channel),
        })
    }

    fn allocate(self: &Arc<Self>) -> Promise {
        let (id, store) = match self.core.upgrade() {
            Some(core) => (core.ids.next(), core.contexts.clone()),
            None => (AsyncId::default(), ContextStore::new()),
        };
        let ctx = Context::new();
        store.attach(id, &ctx);
        Promise {
            cell: Arc::new(PromiseCell {
                id,
                ctx,
                owner: Arc::clone(self),
                store,
                state: Mutex::new(PromiseState::Pending(Vec::new())),
            }),
        }
    }

    /// `new Promise(executor)`. An executor error rejects the promise.
    pub fn create<F>(self: &Arc<Self>, executor: F) -> Promise
    where
        F: Fn(&Deferred) -> Result<(), CallError> + Send + Sync + 'static,
    {
        let promise = self.allocate();
        let deferred = Deferred {
            promise: promise.clone(),
        };
        let body = Callable::named("executor", move |_, _, _| {
            executor(&deferred).map(|_| Value::Null)
        });
        let wrapped = self.instrumenter.wrap(
            &body,
            WrapOptions::prefix("executor-")
                .with_context(&promise.cell.ctx)
                .with_label("Promise")
                .without_bubble(),
        );
        if let Err(err) = wrapped.call(&Value::Null, &mut Vec::new(), &promise.cell.ctx) {
            promise.settle(Err(err));
        }
        promise
    }

    /// A pending promise and the handle that settles it
    pub fn deferred(self: &Arc<Self>) -> Deferred {
        let promise = self.create(|_| Ok(()));
        Deferred { promise }
    }

    pub fn resolved(self: &Arc<Self>, value: Value) -> Promise {
        let deferred = self.deferred();
        deferred.resolve(value);
        deferred.promise
    }

    fn react(&self, source: AsyncId, reaction: Reaction, settlement: Settlement) {
        let trigger = if settlement.is_ok() { "resolve" } else { "reject" };
        self.instrumenter.emit(
            "propagate",
            &mut vec![json!(source.0), json!(true), json!(trigger)],
            &reaction.child.cell.ctx,
            true,
        );

        let Some(core) = self.core.upgrade() else {
            return;
        };
        core.event_loop.queue_microtask(Box::new(move || {
            let handler = match &settlement {
                Ok(_) => reaction.on_fulfilled,
                Err(_) => reaction.on_rejected,
            };
            let outcome = match handler {
                Some(handler) => {
                    let arg = match &settlement {
                        Ok(value) => value.clone(),
                        Err(err) => json!(err.message()),
                    };
                    handler.invoke(&mut vec![arg])
                }
                None => settlement,
            };
            reaction.child.settle(outcome);
        }));
    }
}

impl Promise {
    pub fn id(&self) -> AsyncId {
        self.cell.id
    }

    pub fn context(&self) -> &Context {
        &self.cell.ctx
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.cell.state.lock(), PromiseState::Pending(_))
    }

    /// The settled value or error, `None` while pending
    pub fn settlement(&self) -> Option<Result<Value, CallError>> {
        match &*self.cell.state.lock() {
            PromiseState::Pending(_) => None,
            PromiseState::Settled(result) => Some(result.clone()),
        }
    }

    /// Attach reactions; returns the dependent promise
    pub fn then(&self, on_fulfilled: Option<&Callable>, on_rejected: Option<&Callable>) -> Promise {
        let owner = Arc::clone(&self.cell.owner);
        let child = owner.allocate();
        let ctx = child.cell.ctx.clone();
        owner.instrumenter.emit(
            "propagate",
            &mut vec![json!(self.cell.id.0), json!(false), json!("then")],
            &ctx,
            true,
        );

        let wrap = |callback: &Callable| {
            owner.instrumenter.wrap(
                callback,
                WrapOptions::prefix("cb-").with_context(&ctx).with_label("then"),
            )
        };
        let reaction = Reaction {
            child: child.clone(),
            on_fulfilled: on_fulfilled.map(wrap),
            on_rejected: on_rejected.map(wrap),
        };

        let settled = {
            let mut state = self.cell.state.lock();
            match &mut *state {
                PromiseState::Pending(reactions) => {
                    reactions.push(reaction);
                    None
                }
                PromiseState::Settled(result) => Some((reaction, result.clone())),
            }
        };
        if let Some((reaction, result)) = settled {
            owner.react(self.cell.id, reaction, result);
        }
        child
    }

    pub fn catch(&self, on_rejected: &Callable) -> Promise {
        self.then(None, Some(on_rejected))
    }

    fn settle(&self, settlement: Settlement) {
        let reactions = {
            let mut state = self.cell.state.lock();
            match &mut *state {
                PromiseState::Pending(reactions) => {
                    let reactions = std::mem::take(reactions);
                    *state = PromiseState::Settled(settlement.clone());
                    reactions
                }
                PromiseState::Settled(_) => return,
            }
        };
        for reaction in reactions {
            self.cell
                .owner
                .react(self.cell.id, reaction, settlement.clone());
        }
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("id", &self.cell.id)
            .field("pending", &self.is_pending())
            .finish()
    }
}
