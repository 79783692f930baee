use cellfuse_ir::{FusedKernel, OpGraph, PlanCache, format_plan};
use cellfuse_opt::{FusionConfig, fuse_graph};

/// Load a graph fixture by name (without extension).
#[allow(dead_code)]
pub fn load_fixture(name: &str) -> String {
    let path = format!("{}/fixtures/{name}.json", env!("CARGO_MANIFEST_DIR"));
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("failed to load {path}: {e}"))
}

/// Parse a fixture into an operator graph.
#[allow(dead_code)]
pub fn parse_fixture(name: &str) -> OpGraph {
    cellfuse_parser::parse(&load_fixture(name)).expect("fixture parse failed")
}

/// Parse a fixture and run the planner over the whole graph.
#[allow(dead_code)]
pub fn fuse_fixture(name: &str, config: FusionConfig) -> (OpGraph, PlanCache) {
    let graph = parse_fixture(name);
    let cache = fuse_graph(&graph, config).expect("fusion failed");
    (graph, cache)
}

/// Nested expression of a kernel's output tree.
#[allow(dead_code)]
pub fn expr(kernel: &FusedKernel) -> String {
    format_plan(&kernel.nodes, kernel.output)
}

/// Operator-graph names of a kernel's captured inputs, in order.
#[allow(dead_code)]
pub fn input_names(kernel: &FusedKernel) -> Vec<&str> {
    kernel.inputs.iter().map(|i| i.name.as_str()).collect()
}
