// tests/tree_newick.rs

use progressive::errors::ProgressiveError;
use progressive::tree::GuideTree;

#[test]
fn parses_balanced_tree_with_lengths_and_labels() {
    let tree = GuideTree::parse("((A:0.1,B:0.2)AB:0.3,(C,D)CD);").unwrap();

    assert_eq!(tree.leaf_count(), 4);
    assert_eq!(tree.len(), 7);

    let ab = tree.find("AB").expect("internal label should be kept");
    assert!(!tree.is_leaf(ab));
    assert_eq!(tree.branch_length(ab), Some(0.3));

    let a = tree.find("A").unwrap();
    assert_eq!(tree.branch_length(a), Some(0.1));
    assert_eq!(tree.parent(a), Some(ab));

    let c = tree.find("C").unwrap();
    assert_eq!(tree.branch_length(c), None);
}

#[test]
fn position_ids_follow_child_indices() {
    let tree = GuideTree::parse("((A,B),(C,(D,E)));").unwrap();

    assert_eq!(tree.position_id(tree.root()), "root");
    let d = tree.find("D").unwrap();
    let de = tree.parent(d).unwrap();
    assert_eq!(tree.position_id(de), "root.1.1");
    assert_eq!(tree.position_id(d), "root.1.1.0");
}

#[test]
fn traversal_orders() {
    let tree = GuideTree::parse("((A,B)X,C)R;").unwrap();
    let names = |ids: Vec<_>| -> Vec<String> {
        ids.into_iter().map(|id| tree.display_name(id)).collect()
    };

    assert_eq!(names(tree.pre_order()), ["R", "X", "A", "B", "C"]);
    assert_eq!(names(tree.post_order()), ["A", "B", "X", "C", "R"]);
    assert_eq!(names(tree.leaves()), ["A", "B", "C"]);
}

#[test]
fn distances_default_missing_lengths_to_one() {
    let tree = GuideTree::parse("((A:0.5,B)X:2,C);").unwrap();
    let a = tree.find("A").unwrap();
    let dist = tree.distances_from(a);

    let b = tree.find("B").unwrap();
    let c = tree.find("C").unwrap();
    assert_eq!(dist[b.index()], 1.5);
    // A -> X (0.5) -> root (2) -> C (1)
    assert_eq!(dist[c.index()], 3.5);
}

#[test]
fn quoted_labels_and_comments() {
    let tree = GuideTree::parse("('homo sapiens' [human], 'it''s':1e-2);").unwrap();
    assert!(tree.find("homo sapiens").is_some());
    let quoted = tree.find("it's").unwrap();
    assert_eq!(tree.branch_length(quoted), Some(0.01));
}

#[test]
fn canonical_newick_round_trips() {
    let text = "(('a b':0.1,c)d:0.5,e);";
    let tree = GuideTree::parse(text).unwrap();
    let written = tree.to_newick();
    assert_eq!(written, text);

    let again = GuideTree::parse(&written).unwrap();
    assert_eq!(again.to_newick(), written);
}

#[test]
fn single_leaf_and_unary_chain_are_accepted() {
    let single = GuideTree::parse("A;").unwrap();
    assert_eq!(single.leaf_count(), 1);
    assert!(single.is_leaf(single.root()));

    let chain = GuideTree::parse("((A));").unwrap();
    assert_eq!(chain.leaf_count(), 1);
    assert_eq!(chain.len(), 3);
}

#[test]
fn malformed_trees_are_configuration_errors() {
    let cases = [
        "",
        ";",
        "(A,B",
        "(A,B)",
        "(A,B);extra",
        "(A:abc,B);",
        "(A:-1,B);",
        "(A,);",
        "(A,A);",
        "('unterminated,B);",
    ];

    for case in cases {
        match GuideTree::parse(case) {
            Err(ProgressiveError::Configuration(_)) => {}
            other => panic!("expected configuration error for {case:?}, got {other:?}"),
        }
    }
}

#[test]
fn error_reports_offset() {
    let err = GuideTree::parse("(A,B;C);").unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("malformed guide tree at offset"), "{msg}");
}

fn ladder(depth: usize) -> String {
    let mut acc = "t0".to_string();
    for i in 1..=depth {
        acc = format!("({acc},t{i})");
    }
    format!("{acc};")
}

#[test]
fn deep_ladder_within_limit_parses() {
    let tree = GuideTree::parse(&ladder(400)).unwrap();
    assert_eq!(tree.leaf_count(), 401);
    assert_eq!(GuideTree::parse(&tree.to_newick()).unwrap().leaf_count(), 401);
}

#[test]
fn nesting_past_the_limit_is_a_configuration_error() {
    let too_deep = format!("{}A{};", "(".repeat(100_000), ")".repeat(100_000));
    match GuideTree::parse(&too_deep) {
        Err(ProgressiveError::Configuration(msg)) => assert!(msg.contains("nested deeper"), "{msg}"),
        other => panic!("expected configuration error, got {other:?}"),
    }

    let just_over = ladder(progressive::tree::newick::MAX_DEPTH + 1);
    assert!(matches!(
        GuideTree::parse(&just_over),
        Err(ProgressiveError::Configuration(_))
    ));
}
