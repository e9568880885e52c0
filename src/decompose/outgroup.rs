// src/decompose/outgroup.rs

//! Outgroup selection.

use tracing::trace;

use crate::tree::{GuideTree, NodeId};

/// Chooses outgroups for one internal node.
///
/// The decomposer only offers candidates whose data is available by the
/// time the node is processed, so any choice keeps the graph acyclic; the
/// policy only decides which of them to use and in what order.
pub trait OutgroupPolicy {
    /// Pick at most `limit` outgroups for `node` out of `candidates`.
    fn select(
        &self,
        tree: &GuideTree,
        node: NodeId,
        candidates: &[NodeId],
        limit: usize,
    ) -> Vec<NodeId>;
}

/// Nearest candidates by summed branch length; pre-order position breaks
/// ties.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestOutgroups;

impl OutgroupPolicy for NearestOutgroups {
    fn select(
        &self,
        tree: &GuideTree,
        node: NodeId,
        candidates: &[NodeId],
        limit: usize,
    ) -> Vec<NodeId> {
        if candidates.is_empty() || limit == 0 {
            return Vec::new();
        }

        let dist = tree.distances_from(node);
        let mut pre_index = vec![0usize; tree.len()];
        for (pos, id) in tree.pre_order().into_iter().enumerate() {
            pre_index[id.index()] = pos;
        }

        let mut ranked: Vec<NodeId> = candidates.to_vec();
        ranked.sort_by(|a, b| {
            dist[a.index()]
                .total_cmp(&dist[b.index()])
                .then(pre_index[a.index()].cmp(&pre_index[b.index()]))
        });
        ranked.truncate(limit);

        trace!(
            node = %tree.display_name(node),
            chosen = ?ranked.iter().map(|id| tree.display_name(*id)).collect::<Vec<_>>(),
            "selected outgroups"
        );
        ranked
    }
}
