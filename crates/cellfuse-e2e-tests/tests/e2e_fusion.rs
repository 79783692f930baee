mod common;

use cellfuse_ir::{CellType, DataType, PlanNode, UnaryType, dump_kernel};
use cellfuse_opt::{FusionConfig, FusionPlanner};

use common::{expr, fuse_fixture, input_names, parse_fixture};

#[test]
fn sum_exp_mult_becomes_one_full_agg_kernel() {
    let (graph, cache) = fuse_fixture("sum_exp_mult", FusionConfig::default());
    assert_eq!(cache.len(), 1);
    let kernel = &cache.kernels()[0];
    assert_eq!(kernel.root, graph.find("S").unwrap());
    assert_eq!(kernel.cell_type, CellType::FullAgg);
    assert_eq!(kernel.data_type, DataType::Scalar);
    assert!(!kernel.multiple_consumers);
    assert_eq!(input_names(kernel), vec!["X", "c"]);

    let expected = "\
Kernel TMP0 (root [4], full_agg, scalar):
  Inputs:
    a = X
    scalars[0] = c
  Nodes:
    [0] a
    [1] exp [0]
    [2] scalars[0]
    [3] mult [1] [2]
  Output: [3]
  Expr: mult(exp(a), scalars[0])
";
    assert_eq!(dump_kernel(kernel), expected);

    for name in ["E", "M", "S"] {
        assert!(cache.contains(graph.find(name).unwrap()), "{name}");
    }
    assert!(!cache.contains(graph.find("X").unwrap()));
}

#[test]
fn fusion_started_at_exp_finds_no_region() {
    // The region is discovered from the consumer side: an attempt rooted at
    // the first operator of the chain alone would be a single-node kernel.
    let graph = parse_fixture("sum_exp_mult");
    let planner = FusionPlanner::default();
    let mut cache = cellfuse_ir::PlanCache::new();
    let e = graph.find("E").unwrap();
    let m = graph.find("M").unwrap();
    assert!(planner.fuse_candidate(&graph, e, &mut cache).unwrap().is_none());
    let kernel = planner.fuse_candidate(&graph, m, &mut cache).unwrap().unwrap();
    assert_eq!(kernel.root, graph.find("S").unwrap());
    assert!(planner.fuse_candidate(&graph, m, &mut cache).unwrap().is_none());
}

#[test]
fn shared_vector_is_looked_up_once() {
    let (graph, cache) = fuse_fixture("shared_vector", FusionConfig::default());
    assert_eq!(cache.len(), 1);
    let kernel = &cache.kernels()[0];
    assert_eq!(kernel.root, graph.find("D").unwrap());
    assert_eq!(input_names(kernel), vec!["X", "v"]);
    assert_eq!(
        expr(kernel),
        "div(plus(a, lookup_r(b[0])), mult(a, lookup_r(b[0])))"
    );
    let lookups = kernel
        .nodes
        .iter()
        .filter(|(_, n)| {
            matches!(
                n,
                PlanNode::Unary {
                    op: UnaryType::LookupR,
                    ..
                }
            )
        })
        .count();
    assert_eq!(lookups, 1);
    assert_eq!(kernel.nodes.len(), 6);
}

#[test]
fn matrix_multiply_feeds_kernel_as_side_input() {
    let (_, cache) = fuse_fixture("matmul_side", FusionConfig::default());
    assert_eq!(cache.len(), 1);
    let kernel = &cache.kernels()[0];
    assert_eq!(input_names(kernel), vec!["X", "AB"]);
    assert_eq!(expr(kernel), "exp(plus(a, lookup_rc(b[0])))");
    assert_eq!(kernel.cell_type, CellType::NoAgg);
}

#[test]
fn literal_handling_follows_config() {
    let (_, cache) = fuse_fixture("literals", FusionConfig::default());
    let kernel = &cache.kernels()[0];
    assert_eq!(input_names(kernel), vec!["X", "half"]);
    assert_eq!(expr(kernel), "exp(mult(mult2(pow2(a)), scalars[0]))");

    let config = FusionConfig {
        compile_literals: true,
        ..FusionConfig::default()
    };
    let (_, cache) = fuse_fixture("literals", config);
    let kernel = &cache.kernels()[0];
    assert_eq!(input_names(kernel), vec!["X"]);
    assert_eq!(expr(kernel), "exp(mult(mult2(pow2(a)), 0.5))");
}

#[test]
fn row_sum_is_absorbed_unless_disabled() {
    let (graph, cache) = fuse_fixture("row_sum", FusionConfig::default());
    let kernel = &cache.kernels()[0];
    assert_eq!(kernel.root, graph.find("R").unwrap());
    assert_eq!(kernel.cell_type, CellType::RowAgg);
    assert_eq!(kernel.data_type, DataType::Matrix);
    assert_eq!(expr(kernel), "abs(exp(a))");

    let config: FusionConfig = toml::from_str("absorb_aggregations = false").unwrap();
    let (graph, cache) = fuse_fixture("row_sum", config);
    assert_eq!(cache.len(), 1);
    let kernel = &cache.kernels()[0];
    assert_eq!(kernel.root, graph.find("A").unwrap());
    assert_eq!(kernel.cell_type, CellType::NoAgg);
}

#[test]
fn unsupported_operator_leaves_graph_unfused() {
    let (_, cache) = fuse_fixture("unsupported", FusionConfig::default());
    assert!(cache.is_empty());
}

#[test]
fn independent_chains_are_numbered_in_visit_order() {
    let (graph, cache) = fuse_fixture("two_chains", FusionConfig::default());
    let kernels: Vec<_> = cache
        .kernels()
        .iter()
        .map(|k| (k.name.as_str(), graph.node(k.root).name.as_str()))
        .collect();
    assert_eq!(kernels, vec![("TMP0", "AX"), ("TMP1", "SY")]);
    assert!(!cache.contains(graph.find("T").unwrap()));
}

#[test]
fn disabled_fusion_produces_nothing() {
    let config: FusionConfig = toml::from_str("enabled = false").unwrap();
    let (_, cache) = fuse_fixture("sum_exp_mult", config);
    assert!(cache.is_empty());
}

#[test]
fn repeated_runs_are_identical() {
    let (_, a) = fuse_fixture("shared_vector", FusionConfig::default());
    let (_, b) = fuse_fixture("shared_vector", FusionConfig::default());
    let dumps = |cache: &cellfuse_ir::PlanCache| {
        cache.kernels().iter().map(dump_kernel).collect::<Vec<_>>()
    };
    assert_eq!(dumps(&a), dumps(&b));
}
