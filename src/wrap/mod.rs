//! Instrumentation combinators for host callables

mod callable;
mod instrument;

pub use callable::{CallError, CallResult, Callable, MethodTable};
pub use instrument::{Instrumenter, Resolver, WrapOptions};
