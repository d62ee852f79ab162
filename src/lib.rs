pub mod bus;
pub mod config;
pub mod context;
pub mod error;
pub mod harvest;
pub mod host;
pub mod scenario;
pub mod tracer;
pub mod tree;
pub mod util;
pub mod wrap;

pub use bus::{Channel, Context, Registry};
pub use config::Config;
pub use error::{Result, TrackerError};
pub use harvest::{ErrorCollector, ErrorRecord, Harvest, HarvestQueue};
pub use host::{CallError, Host};
pub use scenario::Scenario;
pub use tracer::{InteractionHandle, Span, Tracker};
pub use tree::{Interaction, InteractionPayload, NodeId, NodePayload, NodeRef, NodeType};
pub use wrap::{CallResult, Callable, Instrumenter, WrapOptions};
