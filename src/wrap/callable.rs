//! Host callables and named method tables

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;

use crate::bus::{Context, EventArgs};

/// Error raised by a host callable. Instrumentation passes it through untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CallError {
    message: String,
}

impl CallError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type CallResult = Result<Value, CallError>;

type CallFn = dyn Fn(&Value, &mut EventArgs, &Context) -> CallResult + Send + Sync;

/// Key under which a wrapper is memoized on its original: (instrumenter, prefix)
type WrapperKey = (u64, String);

struct CallableInner {
    name: Option<String>,
    f: Box<CallFn>,
    /// Instrumenter and prefix that produced this wrapper
    wrapped_by: Option<WrapperKey>,
    wrappers: Mutex<Vec<(WrapperKey, Weak<CallableInner>)>>,
}

/// A function value of the host: receiver, positional arguments, and the
/// context the invocation runs under.
///
/// Cloning shares the function; identity is compared with [`Callable::ptr_eq`].
#[derive(Clone)]
pub struct Callable {
    inner: Arc<CallableInner>,
}

impl Callable {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value, &mut EventArgs, &Context) -> CallResult + Send + Sync + 'static,
    {
        Self::build(None, None, Box::new(f))
    }

    pub fn named<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value, &mut EventArgs, &Context) -> CallResult + Send + Sync + 'static,
    {
        Self::build(Some(name.into()), None, Box::new(f))
    }

    /// Closure that ignores receiver and context
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&mut EventArgs) -> CallResult + Send + Sync + 'static,
    {
        Self::new(move |_, args, _| f(args))
    }

    pub(crate) fn wrapper(key: WrapperKey, name: Option<String>, f: Box<CallFn>) -> Self {
        Self::build(name, Some(key), f)
    }

    fn build(name: Option<String>, wrapped_by: Option<WrapperKey>, f: Box<CallFn>) -> Self {
        Self {
            inner: Arc::new(CallableInner {
                name,
                f,
                wrapped_by,
                wrappers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn call(&self, this: &Value, args: &mut EventArgs, ctx: &Context) -> CallResult {
        (self.inner.f)(this, args, ctx)
    }

    /// Call with a null receiver and a fresh context
    pub fn invoke(&self, args: &mut EventArgs) -> CallResult {
        self.call(&Value::Null, args, &Context::new())
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn is_wrapped(&self) -> bool {
        self.inner.wrapped_by.is_some()
    }

    pub(crate) fn is_wrapped_by(&self, key: &WrapperKey) -> bool {
        self.inner.wrapped_by.as_ref() == Some(key)
    }

    pub fn ptr_eq(&self, other: &Callable) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn cached_wrapper(&self, key: &WrapperKey) -> Option<Callable> {
        let mut wrappers = self.inner.wrappers.lock();
        wrappers.retain(|(_, weak)| weak.strong_count() > 0);
        wrappers
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, weak)| weak.upgrade())
            .map(|inner| Callable { inner })
    }

    pub(crate) fn remember_wrapper(&self, key: WrapperKey, wrapper: &Callable) {
        self.inner
            .wrappers
            .lock()
            .push((key, Arc::downgrade(&wrapper.inner)));
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("name", &self.inner.name)
            .field("wrapped", &self.inner.wrapped_by.is_some())
            .finish()
    }
}

/// A named set of callables standing in for a host object's methods
/// (`window.setTimeout`, `XMLHttpRequest.prototype.send`, ...).
#[derive(Default)]
pub struct MethodTable {
    methods: Mutex<HashMap<String, Callable>>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&self, name: &str, callable: Callable) -> Option<Callable> {
        self.methods.lock().insert(name.to_string(), callable)
    }

    pub fn get(&self, name: &str) -> Option<Callable> {
        self.methods.lock().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.methods.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Look up and invoke `name`. The table lock is released before the call.
    pub fn call(&self, name: &str, this: &Value, args: &mut EventArgs, ctx: &Context) -> CallResult {
        let method = self
            .get(name)
            .ok_or_else(|| CallError::new(format!("{name} is not a function")))?;
        method.call(this, args, ctx)
    }
}
