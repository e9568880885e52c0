// src/decompose/mod.rs

//! Project decomposition.
//!
//! Turns a guide tree, a genome set and topology options into the
//! subproblems of a [`ProjectRun`]: one per internal node, created in
//! post-order, each consuming the results of its children. Outgroups are
//! chosen by a replaceable [`OutgroupPolicy`].

pub mod outgroup;

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::dag::{
    now_ms, InputRef, ProjectRun, RunState, Subproblem, SubproblemGraph, SubproblemId,
    SubproblemState, Timestamps,
};
use crate::engine::RunStats;
use crate::errors::{ProgressiveError, Result};
use crate::tree::{GuideTree, NodeId};
use crate::types::{GenomeSet, TopologyOptions};

pub use outgroup::{NearestOutgroups, OutgroupPolicy};

/// Decompose with the default [`NearestOutgroups`] policy.
pub fn decompose(
    tree: &GuideTree,
    genomes: &GenomeSet,
    options: &TopologyOptions,
) -> Result<ProjectRun> {
    decompose_with(tree, genomes, options, &NearestOutgroups)
}

/// Decompose `tree` into subproblems.
///
/// Fails with a configuration error if a leaf has no genome data, a
/// declared outgroup is not a taxon of the tree, or outgroups are requested
/// with `max_outgroups == 0`.
pub fn decompose_with(
    tree: &GuideTree,
    genomes: &GenomeSet,
    options: &TopologyOptions,
    policy: &dyn OutgroupPolicy,
) -> Result<ProjectRun> {
    check_genomes(tree, genomes)?;
    let allowed = check_outgroups(tree, options)?;

    let post_order = tree.post_order();
    let mut post_index = vec![0usize; tree.len()];
    for (pos, id) in post_order.iter().enumerate() {
        post_index[id.index()] = pos;
    }

    let ids: HashMap<NodeId, SubproblemId> = post_order
        .iter()
        .filter(|id| !tree.is_leaf(**id))
        .map(|id| (*id, SubproblemId::new(tree.position_id(*id))))
        .collect();

    let input_for = |node: NodeId| -> InputRef {
        let taxon = tree.display_name(node);
        let branch_length = tree.branch_length(node);
        match ids.get(&node) {
            Some(id) => InputRef::Subproblem {
                taxon,
                id: id.clone(),
                branch_length,
            },
            None => InputRef::Genome {
                path: genomes.get(&taxon).cloned().unwrap_or_default(),
                taxon,
                branch_length,
            },
        }
    };

    let created = now_ms();
    let mut subproblems = Vec::with_capacity(ids.len());

    for &node in post_order.iter().filter(|id| !tree.is_leaf(**id)) {
        let id = ids[&node].clone();
        let ingroups: Vec<InputRef> = tree.children(node).iter().map(|c| input_for(*c)).collect();

        let mut outgroups = Vec::new();
        if options.use_outgroup && node != tree.root() {
            let candidates: Vec<NodeId> = tree
                .pre_order()
                .into_iter()
                .filter(|cand| !tree.in_subtree(node, *cand))
                .filter(|cand| tree.is_leaf(*cand) || post_index[cand.index()] < post_index[node.index()])
                .filter(|cand| match &allowed {
                    Some(names) => tree.name(*cand).map(|n| names.contains(n)).unwrap_or(false),
                    None => true,
                })
                .collect();

            for chosen in policy.select(tree, node, &candidates, options.max_outgroups) {
                if !candidates.contains(&chosen) {
                    return Err(ProgressiveError::config(format!(
                        "outgroup policy chose '{}' for '{}', which is not available there",
                        tree.display_name(chosen),
                        tree.display_name(node)
                    )));
                }
                outgroups.push(input_for(chosen));
            }
        }

        let mut depends_on: Vec<SubproblemId> = Vec::new();
        for dep in ingroups.iter().chain(outgroups.iter()).filter_map(InputRef::dependency) {
            if !depends_on.contains(dep) {
                depends_on.push(dep.clone());
            }
        }

        debug!(
            subproblem = %id,
            taxon = %tree.display_name(node),
            ingroups = ingroups.len(),
            outgroups = outgroups.len(),
            deps = depends_on.len(),
            "created subproblem"
        );

        subproblems.push(Subproblem {
            id,
            node,
            taxon: tree.display_name(node),
            ingroups,
            outgroups,
            self_alignment: options.self_alignment,
            depends_on,
            state: SubproblemState::Pending,
            attempt: 0,
            result: None,
            handle: None,
            last_failure: None,
            times: Timestamps {
                created_at_ms: created,
                updated_at_ms: created,
                dispatched_at_ms: None,
                finished_at_ms: None,
            },
        });
    }

    // Rejects cycles and dangling edges.
    SubproblemGraph::build(&subproblems)?;

    let mut run = ProjectRun {
        tree: tree.clone(),
        options: options.clone(),
        genomes: genomes.clone(),
        subproblems,
        state: RunState::Running,
        failing: Vec::new(),
        stats: RunStats::default(),
    };
    run.settle();

    info!(
        leaves = tree.leaf_count(),
        subproblems = run.subproblems.len(),
        use_outgroup = options.use_outgroup,
        self_alignment = options.self_alignment,
        "decomposed guide tree"
    );
    Ok(run)
}

fn check_genomes(tree: &GuideTree, genomes: &GenomeSet) -> Result<()> {
    let leaves: Vec<&str> = tree
        .leaves()
        .into_iter()
        .filter_map(|id| tree.name(id))
        .collect();

    let missing: Vec<&str> = leaves
        .iter()
        .copied()
        .filter(|name| !genomes.contains_key(*name))
        .collect();
    if !missing.is_empty() {
        return Err(ProgressiveError::config(format!(
            "no genome data for tree leaves: {}",
            missing.join(", ")
        )));
    }

    let in_tree: HashSet<&str> = leaves.into_iter().collect();
    for name in genomes.keys() {
        if !in_tree.contains(name.as_str()) {
            warn!(genome = %name, "genome is not a leaf of the guide tree; ignoring");
        }
    }
    Ok(())
}

/// Validate declared outgroups; returns the allowed names, if restricted.
fn check_outgroups(tree: &GuideTree, options: &TopologyOptions) -> Result<Option<HashSet<String>>> {
    if options.use_outgroup && options.max_outgroups == 0 {
        return Err(ProgressiveError::config(
            "use_outgroup is set but max_outgroups is 0",
        ));
    }

    for name in &options.outgroups {
        if tree.find(name).is_none() {
            return Err(ProgressiveError::config(format!(
                "declared outgroup '{name}' is not a taxon of the guide tree"
            )));
        }
    }

    if options.outgroups.is_empty() {
        return Ok(None);
    }
    if !options.use_outgroup {
        warn!("outgroups declared but use_outgroup is off; ignoring them");
    }
    Ok(Some(options.outgroups.iter().cloned().collect()))
}
