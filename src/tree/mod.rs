// src/tree/mod.rs

//! Phylogenetic guide tree.
//!
//! A rooted tree stored as an arena of nodes. Leaves are extant genomes and
//! must be named; internal nodes are ancestors and may carry an optional
//! label. Branch lengths are kept for the executor and for outgroup distance,
//! but play no part in scheduling.

pub mod newick;

use std::collections::HashSet;

use crate::errors::{ProgressiveError, Result};

/// Index of a node inside a [`GuideTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TreeNode {
    pub(crate) name: Option<String>,
    pub(crate) branch_length: Option<f64>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

/// Immutable rooted guide tree.
#[derive(Debug, Clone)]
pub struct GuideTree {
    nodes: Vec<TreeNode>,
    root: NodeId,
}

/// Distance used for edges without an explicit branch length.
pub const DEFAULT_BRANCH_LENGTH: f64 = 1.0;

impl GuideTree {
    /// Parse a tree from Newick text.
    pub fn parse(newick: &str) -> Result<Self> {
        newick::parse(newick)
    }

    /// Assemble and validate a tree from raw nodes.
    ///
    /// Rejects unnamed leaves and duplicate names (a taxon name must identify
    /// exactly one node).
    pub(crate) fn from_parts(nodes: Vec<TreeNode>, root: NodeId) -> Result<Self> {
        let mut seen = HashSet::new();
        for (idx, node) in nodes.iter().enumerate() {
            match &node.name {
                Some(name) => {
                    if !seen.insert(name.as_str()) {
                        return Err(ProgressiveError::config(format!(
                            "guide tree contains duplicate taxon name '{name}'"
                        )));
                    }
                }
                None if node.children.is_empty() => {
                    return Err(ProgressiveError::config(format!(
                        "guide tree leaf #{idx} has no name"
                    )));
                }
                None => {}
            }
        }

        Ok(Self { nodes, root })
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.nodes[id.0].name.as_deref()
    }

    /// Human-readable name: the label, or `<position path>` for unlabeled
    /// internal nodes.
    pub fn display_name(&self, id: NodeId) -> String {
        match self.name(id) {
            Some(name) => name.to_string(),
            None => format!("<{}>", self.position_id(id)),
        }
    }

    pub fn branch_length(&self, id: NodeId) -> Option<f64> {
        self.nodes[id.0].branch_length
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.nodes[id.0].children.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.name.as_deref() == Some(name))
            .map(NodeId)
    }

    /// Leaves in pre-order.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.pre_order()
            .into_iter()
            .filter(|id| self.is_leaf(*id))
            .collect()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.children.is_empty()).count()
    }

    /// Nodes in pre-order (parent before children, children left to right).
    pub fn pre_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        order
    }

    /// Nodes in post-order (children left to right, then parent).
    pub fn post_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(self.root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            stack.push((id, true));
            for child in self.children(id).iter().rev() {
                stack.push((*child, false));
            }
        }
        order
    }

    /// Whether `node` lies in the subtree rooted at `ancestor` (inclusive).
    pub fn in_subtree(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cur = Some(node);
        while let Some(id) = cur {
            if id == ancestor {
                return true;
            }
            cur = self.parent(id);
        }
        false
    }

    /// Path distance from `from` to every node, indexed by [`NodeId::index`].
    ///
    /// Each edge weighs the branch length of its lower endpoint, or
    /// [`DEFAULT_BRANCH_LENGTH`] when none was given.
    pub fn distances_from(&self, from: NodeId) -> Vec<f64> {
        let mut dist = vec![f64::INFINITY; self.nodes.len()];
        dist[from.0] = 0.0;
        let mut stack = vec![from];

        while let Some(id) = stack.pop() {
            let here = dist[id.0];
            let mut neighbours: Vec<(NodeId, f64)> = self
                .children(id)
                .iter()
                .map(|c| (*c, self.edge_weight(*c)))
                .collect();
            if let Some(p) = self.parent(id) {
                neighbours.push((p, self.edge_weight(id)));
            }
            for (next, w) in neighbours {
                if dist[next.0].is_infinite() {
                    dist[next.0] = here + w;
                    stack.push(next);
                }
            }
        }

        dist
    }

    fn edge_weight(&self, lower: NodeId) -> f64 {
        self.branch_length(lower).unwrap_or(DEFAULT_BRANCH_LENGTH)
    }

    /// Child-index path from the root, e.g. `[0, 1]` for the second child of
    /// the root's first child.
    pub fn position_path(&self, id: NodeId) -> Vec<usize> {
        let mut path = Vec::new();
        let mut cur = id;
        while let Some(parent) = self.parent(cur) {
            let idx = self
                .children(parent)
                .iter()
                .position(|c| *c == cur)
                .unwrap_or(0);
            path.push(idx);
            cur = parent;
        }
        path.reverse();
        path
    }

    /// Stable textual identifier for a node's position: `root`, `root.0`,
    /// `root.0.1`, ...
    pub fn position_id(&self, id: NodeId) -> String {
        let mut out = String::from("root");
        for idx in self.position_path(id) {
            out.push('.');
            out.push_str(&idx.to_string());
        }
        out
    }

    pub fn to_newick(&self) -> String {
        newick::write(self)
    }
}
