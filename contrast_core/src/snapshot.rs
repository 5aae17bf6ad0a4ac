// Copyright (C) 2025 aidan-es. Licensed under the GNU AGPLv3.
//! A serialisable snapshot of a rendered document: each node carries its
//! computed style, and corrections are recorded as `!important` overrides.
use crate::document::{CorrectedProperty, DocumentTree, StyleProperty, StyleReader, StyleWriter};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One element of a snapshot as it appears in JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub tag: String,
    /// Text owned directly by this element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Computed style values, keyed by CSS property name.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub style: IndexMap<String, String>,
    /// Values written with the highest precedence.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub important: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_owned(),
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = Some(text.to_owned());
        self
    }

    pub fn with_style(mut self, property: StyleProperty, value: &str) -> Self {
        self.style.insert(property.to_string(), value.to_owned());
        self
    }

    pub fn with_child(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }
}

/// Index of a node within a [`Snapshot`], in document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct Entry {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    node: Node,
}

/// A document tree flattened into an arena so elements can be addressed by id.
#[derive(Debug, Clone)]
pub struct Snapshot {
    entries: Vec<Entry>,
}

impl Snapshot {
    pub fn from_tree(root: Node) -> Self {
        let mut snapshot = Self {
            entries: Vec::new(),
        };
        snapshot.push(root, None);
        snapshot
    }

    fn push(&mut self, mut node: Node, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.entries.len());
        let children = std::mem::take(&mut node.children);
        self.entries.push(Entry {
            parent,
            children: Vec::with_capacity(children.len()),
            node,
        });
        for child in children {
            let child_id = self.push(child, Some(id));
            self.entries[id.0].children.push(child_id);
        }
        id
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::from_tree(serde_json::from_str(json)?))
    }

    /// Rebuilds the nested form, including any recorded corrections.
    pub fn to_tree(&self) -> Node {
        self.build(NodeId(0))
    }

    fn build(&self, id: NodeId) -> Node {
        let entry = &self.entries[id.0];
        Node {
            children: entry.children.iter().map(|&child| self.build(child)).collect(),
            ..entry.node.clone()
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.to_tree())
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.entries[id.0].node
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finds the first node in document order with the given tag.
    pub fn find(&self, tag: &str) -> Option<NodeId> {
        self.entries
            .iter()
            .position(|entry| entry.node.tag == tag)
            .map(NodeId)
    }

    /// Every recorded override, in document order.
    pub fn overrides(&self) -> impl Iterator<Item = (NodeId, &str, &str)> + '_ {
        self.entries.iter().enumerate().flat_map(|(index, entry)| {
            entry
                .node
                .important
                .iter()
                .map(move |(property, value)| (NodeId(index), property.as_str(), value.as_str()))
        })
    }

    fn own_value(&self, id: NodeId, name: &str) -> Option<&str> {
        let node = &self.entries[id.0].node;
        node.important
            .get(name)
            .or_else(|| node.style.get(name))
            .map(String::as_str)
    }
}

impl DocumentTree for Snapshot {
    type Element = NodeId;

    fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn parent(&self, element: NodeId) -> Option<NodeId> {
        self.entries[element.0].parent
    }

    fn text_elements(&self) -> Vec<NodeId> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| {
                entry
                    .node
                    .text
                    .as_deref()
                    .is_some_and(|text| !text.trim().is_empty())
            })
            .map(|(index, _)| NodeId(index))
            .collect()
    }
}

impl StyleReader<NodeId> for Snapshot {
    /// An `!important` override wins over the computed value. Inherited
    /// properties fall back to the parent's value, everything else to the
    /// CSS initial value.
    fn computed(&self, element: NodeId, property: StyleProperty) -> String {
        let name: &'static str = property.into();
        let mut current = Some(element);
        while let Some(id) = current {
            if let Some(value) = self.own_value(id, name) {
                return value.to_owned();
            }
            if !property.is_inherited() {
                break;
            }
            current = self.parent(id);
        }
        property.initial_value().to_owned()
    }
}

impl StyleWriter<NodeId> for Snapshot {
    fn set_important(&mut self, element: NodeId, property: CorrectedProperty, value: &str) {
        self.entries[element.0]
            .node
            .important
            .insert(property.to_string(), value.to_owned());
    }
}
