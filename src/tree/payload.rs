//! Serialized form of a finished interaction

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::interaction::RootAttributes;
use super::node::{Node, NodeId, NodeType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionPayload {
    pub id: u64,
    pub trigger: String,
    pub start: u64,
    pub end: Option<u64>,
    #[serde(rename = "initialPageURL", default, skip_serializing_if = "Option::is_none")]
    pub initial_page_url: Option<String>,
    #[serde(rename = "oldURL", default, skip_serializing_if = "Option::is_none")]
    pub old_url: Option<String>,
    #[serde(rename = "newURL", default, skip_serializing_if = "Option::is_none")]
    pub new_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_route: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_route: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub custom: Map<String, Value>,
    pub root: NodePayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePayload {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub start: u64,
    pub end: Option<u64>,
    pub callback_duration: u64,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub children: Vec<NodePayload>,
}

impl NodePayload {
    fn from_node(node: &Node, nodes: &HashMap<NodeId, Node>) -> Self {
        Self {
            id: node.id,
            node_type: node.node_type,
            name: node.name.clone(),
            start: node.start,
            end: node.end,
            callback_duration: node.callback_time,
            attributes: node.attrs.clone(),
            children: node
                .children
                .iter()
                .filter_map(|id| nodes.get(id))
                .filter(|child| !child.cancelled)
                .map(|child| NodePayload::from_node(child, nodes))
                .collect(),
        }
    }

    /// Number of nodes in this subtree, itself included
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(NodePayload::count).sum::<usize>()
    }

    pub fn find(&self, id: NodeId) -> Option<&NodePayload> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    /// Depth-first list of descendants of the given type
    pub fn descendants(&self, node_type: NodeType) -> Vec<&NodePayload> {
        let mut out = Vec::new();
        for child in &self.children {
            if child.node_type == node_type {
                out.push(child);
            }
            out.extend(child.descendants(node_type));
        }
        out
    }
}

impl InteractionPayload {
    pub(crate) fn from_tree(
        id: u64,
        attrs: &RootAttributes,
        root: NodeId,
        nodes: &HashMap<NodeId, Node>,
    ) -> Self {
        let root = match nodes.get(&root) {
            Some(node) => NodePayload::from_node(node, nodes),
            None => NodePayload {
                id: root,
                node_type: NodeType::Interaction,
                name: None,
                start: 0,
                end: None,
                callback_duration: 0,
                attributes: Map::new(),
                children: Vec::new(),
            },
        };
        Self {
            id,
            trigger: attrs.trigger.clone(),
            start: root.start,
            end: root.end,
            initial_page_url: attrs.initial_page_url.clone(),
            old_url: attrs.old_url.clone(),
            new_url: attrs.new_url.clone(),
            old_route: attrs.old_route.clone(),
            new_route: attrs.new_route.clone(),
            custom_name: attrs.custom_name.clone(),
            custom: attrs.custom.clone(),
            root,
        }
    }

    pub fn to_json(&self) -> crate::error::Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}
