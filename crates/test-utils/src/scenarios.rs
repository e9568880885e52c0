//! Named guide-tree fixtures by size tier, with the topology flag matrix.
//!
//! Kept out of the core crate: tests pick from this table instead of the
//! orchestrator knowing anything about test inputs.

use progressive::types::TopologyOptions;

/// Rough cost class of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Short,
    Medium,
    Long,
    VeryLong,
}

#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub tier: Tier,
    pub newick: String,
    pub options: TopologyOptions,
}

impl Scenario {
    pub fn leaf_count(&self) -> usize {
        progressive::tree::GuideTree::parse(&self.newick)
            .map(|t| t.leaf_count())
            .unwrap_or(0)
    }
}

const BLANCHETTE: &str = "((((HUMAN:0.006969,CHIMP:0.009727):0.025291,BABOON:0.044568):0.11,\
(MOUSE:0.072818,RAT:0.081244):0.260342):0.02326,((DOG:0.07,CAT:0.07):0.087381,\
(PIG:0.06,COW:0.06):0.104728):0.04);";

/// Balanced binary tree over `n` leaves named `t0`, `t1`, ...
pub fn balanced(n: usize) -> String {
    fn build(lo: usize, hi: usize) -> String {
        if hi - lo == 1 {
            return format!("t{lo}");
        }
        let mid = lo + (hi - lo) / 2;
        format!("({},{})", build(lo, mid), build(mid, hi))
    }
    format!("{};", build(0, n.max(1)))
}

/// Caterpillar (ladder) tree over `n` leaves: the deepest possible chain.
pub fn caterpillar(n: usize) -> String {
    let mut acc = "t0".to_string();
    for i in 1..n.max(1) {
        acc = format!("({acc},t{i}:0.{i})");
    }
    format!("{acc};")
}

/// Deterministic pseudo-random tree over `n` leaves.
pub fn random(n: usize, seed: u64) -> String {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    let mut next = move || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (state >> 33) as usize
    };

    let mut pool: Vec<String> = (0..n.max(1)).map(|i| format!("r{i}")).collect();
    while pool.len() > 1 {
        let a = pool.swap_remove(next() % pool.len());
        let b = pool.swap_remove(next() % pool.len());
        pool.push(format!("({a},{b}:{}.{})", next() % 3, next() % 100));
    }
    format!("{};", pool[0])
}

fn flags() -> [(&'static str, bool, bool); 4] {
    [
        ("", false, false),
        ("_outgroup", true, false),
        ("_self", false, true),
        ("_outgroup_self", true, true),
    ]
}

/// Every scenario, ordered by tier.
pub fn scenarios() -> Vec<Scenario> {
    let mut out = Vec::new();

    let mut push = |name: String, tier: Tier, newick: String| {
        for (suffix, use_outgroup, self_alignment) in flags() {
            out.push(Scenario {
                name: format!("{name}{suffix}"),
                tier,
                newick: newick.clone(),
                options: TopologyOptions {
                    use_outgroup,
                    self_alignment,
                    ..TopologyOptions::default()
                },
            });
        }
    };

    for seed in 0..5u64 {
        push(format!("random_{seed}"), Tier::Short, random(4 + seed as usize, seed));
    }
    push("balanced_4".to_string(), Tier::Short, balanced(4));
    push("blanchette".to_string(), Tier::Medium, BLANCHETTE.to_string());
    push("caterpillar_24".to_string(), Tier::Long, caterpillar(24));
    push("balanced_64".to_string(), Tier::VeryLong, balanced(64));

    out
}

/// Scenarios at or below `tier`.
pub fn up_to(tier: Tier) -> Vec<Scenario> {
    scenarios().into_iter().filter(|s| s.tier <= tier).collect()
}
