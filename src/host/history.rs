//! Session history and location

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::{json, Value};

use super::dom::Dom;
use super::Core;
use crate::bus::{Channel, Context};
use crate::util::url::{resolve, strip_hash};
use crate::wrap::{CallError, CallResult, Callable, Instrumenter, MethodTable};

/// `history.pushState`/`replaceState` on the `history` channel, plus hash
/// navigation and back, which fire `hashchange`/`popstate` on `window` from
/// a fresh task the way a browser does.
pub struct History {
    core: Weak<Core>,
    dom: Arc<Dom>,
    methods: MethodTable,
    stack: Arc<Mutex<Vec<String>>>,
}

impl History {
    pub(crate) fn new(core: &Arc<Core>, channel: &Channel, dom: &Arc<Dom>) -> Self {
        let stack = Arc::new(Mutex::new(vec![core.location()]));
        let methods = MethodTable::new();
        methods.define("pushState", raw_navigate(Arc::downgrade(core), Arc::clone(&stack), true));
        methods.define("replaceState", raw_navigate(Arc::downgrade(core), Arc::clone(&stack), false));
        Instrumenter::new(channel).in_place(&methods, &["pushState", "replaceState"], "-", None, true);
        Self {
            core: Arc::downgrade(core),
            dom: Arc::clone(dom),
            methods,
            stack,
        }
    }

    pub fn push_state(&self, url: &str) -> CallResult {
        self.methods
            .call("pushState", &Value::Null, &mut vec![Value::Null, json!(""), json!(url)], &Context::new())
    }

    pub fn replace_state(&self, url: &str) -> CallResult {
        self.methods
            .call("replaceState", &Value::Null, &mut vec![Value::Null, json!(""), json!(url)], &Context::new())
    }

    /// `location.hash = hash`. Fires `hashchange` when the hash differs.
    pub fn set_hash(&self, hash: &str) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        let current = core.location();
        let hash = hash.trim_start_matches('#');
        let next = format!("{}#{hash}", strip_hash(&current));
        if next == current {
            return;
        }
        core.set_location(&next);
        self.stack.lock().push(next);
        self.dom.dispatch_event_async("window", "hashchange", None);
    }

    /// `history.back()`. Returns `false` at the start of the session.
    pub fn back(&self) -> bool {
        let Some(core) = self.core.upgrade() else {
            return false;
        };
        let previous = {
            let mut stack = self.stack.lock();
            if stack.len() < 2 {
                return false;
            }
            stack.pop();
            stack.last().cloned()
        };
        let Some(previous) = previous else {
            return false;
        };
        let hash_only = strip_hash(&previous) == strip_hash(&core.location());
        core.set_location(&previous);
        let event = if hash_only { "hashchange" } else { "popstate" };
        self.dom.dispatch_event_async("window", event, None);
        true
    }

    pub fn len(&self) -> usize {
        self.stack.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.lock().is_empty()
    }
}

fn raw_navigate(core: Weak<Core>, stack: Arc<Mutex<Vec<String>>>, push: bool) -> Callable {
    let name = if push { "pushState" } else { "replaceState" };
    Callable::named(name, move |_, args, _| {
        let core = core.upgrade().ok_or_else(|| CallError::new("host is gone"))?;
        let Some(target) = args.get(2).and_then(Value::as_str) else {
            return Ok(Value::Null);
        };
        let url = resolve(&core.location(), target);
        core.set_location(&url);
        let mut stack = stack.lock();
        if push || stack.is_empty() {
            stack.push(url);
        } else if let Some(top) = stack.last_mut() {
            *top = url;
        }
        Ok(Value::Null)
    })
}
