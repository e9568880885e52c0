// tests/properties.rs

use std::collections::HashMap;
use std::time::{Duration, Instant};

use proptest::prelude::*;

use progressive::dag::{InputRef, Scheduler, SubproblemGraph, SubproblemId, SubproblemState};
use progressive::engine::{Backoff, JobOutcome, RetryPolicy};
use progressive::exec::{BackendHandle, ExecutionFailure, ResourceRequirements};
use progressive::types::TopologyOptions;
use progressive_test_utils::project;
use progressive_test_utils::scenarios::random;

// Random guide trees: leaf count, shape seed, and the topology flags.
fn topology_strategy() -> impl Strategy<Value = (String, TopologyOptions)> {
    (2usize..32, any::<u64>(), any::<bool>(), any::<bool>(), 1usize..4).prop_map(
        |(leaves, seed, use_outgroup, self_alignment, max_outgroups)| {
            (
                random(leaves, seed),
                TopologyOptions {
                    use_outgroup,
                    self_alignment,
                    max_outgroups,
                    outgroups: Vec::new(),
                },
            )
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn decomposition_is_acyclic_and_post_ordered((newick, options) in topology_strategy()) {
        let run = project(&newick, options.clone());
        let tree = &run.tree;

        prop_assert_eq!(run.subproblems.len(), tree.len() - tree.leaf_count());
        prop_assert!(SubproblemGraph::build(&run.subproblems).is_ok());

        let position: HashMap<&SubproblemId, usize> = run
            .subproblems
            .iter()
            .enumerate()
            .map(|(i, sp)| (&sp.id, i))
            .collect();

        for (i, sp) in run.subproblems.iter().enumerate() {
            // Everything consumed comes earlier in post-order.
            for dep in &sp.depends_on {
                prop_assert!(position[dep] < i, "{} depends on later {}", sp.id, dep);
            }

            prop_assert_eq!(sp.ingroups.len(), tree.children(sp.node).len());
            prop_assert!(sp.outgroups.len() <= options.max_outgroups);
            if !options.use_outgroup || sp.node == tree.root() {
                prop_assert!(sp.outgroups.is_empty());
            }

            // Outgroups never come from inside the subtree.
            for out in &sp.outgroups {
                let node = match out {
                    InputRef::Genome { taxon, .. } => tree.find(taxon).unwrap(),
                    InputRef::Subproblem { id, .. } => run.subproblem(id).unwrap().node,
                };
                prop_assert!(!tree.in_subtree(sp.node, node));
            }
        }
    }
}

/// Outcome codes fed to the simulated backend, used cyclically.
#[derive(Debug, Clone, Copy)]
enum Sim {
    Ok,
    Transient,
    Permanent,
}

fn sim_strategy() -> impl Strategy<Value = Vec<Sim>> {
    proptest::collection::vec(
        prop_oneof![
            6 => Just(Sim::Ok),
            3 => Just(Sim::Transient),
            1 => Just(Sim::Permanent),
        ],
        1..24,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn scheduler_terminates_and_respects_dependencies(
        (newick, options) in topology_strategy(),
        outcomes in sim_strategy(),
        retry_limit in 1u32..4,
        slots in 1usize..5,
    ) {
        let run = project(&newick, options);
        let total = run.subproblems.len();
        let retry = RetryPolicy { retry_limit, backoff: Backoff::Fixed(Duration::ZERO) };
        let mut scheduler = Scheduler::new(run, retry, ResourceRequirements::default()).unwrap();

        let mut next_outcome = outcomes.iter().cycle();
        let mut handles = 0u64;
        let max_rounds = total * retry_limit as usize * 2 + 4;
        let mut rounds = 0;

        while !scheduler.is_finished() {
            rounds += 1;
            prop_assert!(rounds <= max_rounds, "no termination after {} rounds", rounds);

            let free = slots.saturating_sub(scheduler.in_flight().len());
            let step = scheduler.step_dispatch(Instant::now(), free);
            for job in &step.dispatched {
                let sp = scheduler.subproblem(&job.subproblem).unwrap();
                for dep in &sp.depends_on {
                    prop_assert_eq!(scheduler.state_of(dep), Some(SubproblemState::Succeeded));
                }
                prop_assert!(job.attempt <= retry_limit);

                handles += 1;
                let record = scheduler.mark_submitted(
                    &job.subproblem,
                    job.attempt,
                    BackendHandle(format!("sim-{handles}")),
                );
                prop_assert!(record.is_some());
            }
            prop_assert!(scheduler.in_flight().len() <= slots);

            // Finish every job in flight.
            for id in scheduler.in_flight() {
                let attempt = scheduler.subproblem(&id).unwrap().attempt;
                let outcome = match next_outcome.next().copied().unwrap_or(Sim::Ok) {
                    Sim::Ok => JobOutcome::Succeeded(progressive::dag::ResultRef::new(format!("sim://{id}"))),
                    Sim::Transient => JobOutcome::Failed(ExecutionFailure::transient("sim")),
                    Sim::Permanent => JobOutcome::Failed(ExecutionFailure::permanent("sim")),
                };
                scheduler.step_completion(&id, attempt, outcome, Instant::now());
            }
        }

        let run = scheduler.into_run();
        for sp in &run.subproblems {
            prop_assert!(sp.attempt <= retry_limit);
            let dep_states: Vec<SubproblemState> = sp
                .depends_on
                .iter()
                .filter_map(|d| run.state_of(d))
                .collect();
            match sp.state {
                SubproblemState::Succeeded => {
                    prop_assert!(sp.result.is_some());
                    prop_assert!(dep_states.iter().all(|s| *s == SubproblemState::Succeeded));
                }
                SubproblemState::Abandoned => {
                    prop_assert_eq!(sp.attempt, 0);
                    prop_assert!(dep_states
                        .iter()
                        .any(|s| matches!(s, SubproblemState::Failed | SubproblemState::Abandoned)));
                }
                SubproblemState::Failed => prop_assert!(sp.attempt >= 1),
                other => prop_assert!(false, "{} left in {:?}", sp.id, other),
            }
        }
    }
}
