//! Nodes of an interaction tree

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::interaction::Interaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeType {
    Interaction,
    Ajax,
    CustomTracer,
    CustomEnd,
}

/// Node and interaction id counters, both starting at 1.
/// Node ids are unique across every interaction sharing the allocator.
#[derive(Debug)]
pub struct IdAllocator {
    nodes: AtomicU64,
    interactions: AtomicU64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self {
            nodes: AtomicU64::new(1),
            interactions: AtomicU64::new(1),
        }
    }
}

impl IdAllocator {
    pub fn next_node(&self) -> NodeId {
        NodeId(self.nodes.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_interaction(&self) -> u64 {
        self.interactions.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub node_type: NodeType,
    pub name: Option<String>,
    /// Creation-time parent; `None` only for the root
    pub parent: Option<NodeId>,
    /// Finished children in finish order
    pub children: Vec<NodeId>,
    pub start: u64,
    pub end: Option<u64>,
    /// Exclusive callback time spent while this node was current
    pub callback_time: u64,
    pub attrs: Map<String, Value>,
    pub cancelled: bool,
    /// Whether this node keeps its interaction's `remaining` count up
    pub(crate) holds: bool,
}

impl Node {
    pub(crate) fn new(
        id: NodeId,
        node_type: NodeType,
        name: Option<String>,
        parent: Option<NodeId>,
        start: u64,
        holds: bool,
    ) -> Self {
        Self {
            id,
            node_type,
            name,
            parent,
            children: Vec::new(),
            start,
            end: None,
            callback_time: 0,
            attrs: Map::new(),
            cancelled: false,
            holds,
        }
    }
}

/// Handle to one node of a live interaction
#[derive(Clone)]
pub struct NodeRef {
    interaction: Interaction,
    id: NodeId,
}

impl NodeRef {
    pub(crate) fn new(interaction: Interaction, id: NodeId) -> Self {
        Self { interaction, id }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn interaction(&self) -> &Interaction {
        &self.interaction
    }

    pub fn is_root(&self) -> bool {
        self.interaction.root_id() == self.id
    }

    /// A node is live while its interaction has not finished
    pub fn is_live(&self) -> bool {
        !self.interaction.is_finished()
    }

    /// Create a child node; `None` means tracking is unavailable
    pub fn child(
        &self,
        node_type: NodeType,
        timestamp: u64,
        name: Option<&str>,
        dont_wait: bool,
    ) -> Option<NodeRef> {
        self.interaction
            .child(self.id, node_type, timestamp, name, dont_wait)
    }

    pub fn finish(&self, timestamp: u64) {
        self.interaction.finish_node(self.id, timestamp);
    }

    pub fn cancel(&self) {
        self.interaction.cancel_node(self.id);
    }

    pub fn set_attribute(&self, key: &str, value: Value) {
        self.interaction.set_node_attribute(self.id, key, value);
    }

    pub fn add_callback_time(&self, ms: u64) {
        self.interaction.add_callback_time(self.id, ms);
    }

    /// Snapshot of the node's current data
    pub fn snapshot(&self) -> Option<Node> {
        self.interaction.node(self.id)
    }

    pub fn ptr_eq(&self, other: &NodeRef) -> bool {
        self.id == other.id && self.interaction.ptr_eq(&other.interaction)
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("interaction", &self.interaction.id())
            .field("id", &self.id)
            .finish()
    }
}
