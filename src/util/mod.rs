//! Utility modules

pub mod url;

pub use url::{host_of, resolve, strip_hash};
