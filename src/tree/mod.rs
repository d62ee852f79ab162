//! Interaction trees and their finish-detection state machine

mod interaction;
mod node;
pub mod payload;

pub use interaction::{
    CompletionHandler, Interaction, RootAttributes, TreeEnv, INTERACTION_FINISHED, MAX_NODES,
};
pub use node::{IdAllocator, Node, NodeId, NodeRef, NodeType};
pub use payload::{InteractionPayload, NodePayload};
