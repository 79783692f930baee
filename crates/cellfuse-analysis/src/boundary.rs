//! Region detection for cell-wise fusion.
//!
//! Starting from a candidate, a memoized depth-first walk over eligible
//! operands finds the earliest fusable operator of the chain (the entry).
//! The region's exit is the candidate itself, or a row/full sum consuming
//! it, which the kernel then absorbs as its accumulation mode.

use std::collections::HashMap;

use cellfuse_ir::{NodeId, OpGraph, PlanCache};

use crate::eligibility::is_fusable;

/// A fusable region of the operator graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    /// Earliest fused operator in dataflow order.
    pub entry: NodeId,
    /// Region root; its value leaves the kernel.
    pub exit: NodeId,
    /// Matrix streamed cell by cell through the kernel.
    pub main_input: NodeId,
}

/// Finds the region rooted at `candidate`.
///
/// Returns `None` when `candidate` already completed a cached plan, when
/// nothing is fusable at `candidate`, or when the region would consist of a
/// single operator.
pub fn find_region(
    graph: &OpGraph,
    candidate: NodeId,
    cache: &PlanCache,
    absorb_aggregations: bool,
) -> Option<Region> {
    if cache.contains(candidate) {
        log::trace!("{candidate:?} already covered by a cached plan");
        return None;
    }

    let mut exit = candidate;
    if absorb_aggregations {
        for &consumer in graph.consumers(candidate) {
            if graph.node(consumer).kind.is_absorbable_sum() {
                exit = consumer;
            }
        }
    }

    let entry = find_entry(graph, candidate)?;
    if entry == exit {
        log::trace!("{candidate:?}: single-operator region, not fused");
        return None;
    }

    let main_input = select_main_input(graph, entry);
    log::debug!(
        "region at {candidate:?}: entry {entry:?} ({}), exit {exit:?} ({}), main input {}",
        graph.node(entry).name,
        graph.node(exit).name,
        graph.node(main_input).name,
    );
    Some(Region {
        entry,
        exit,
        main_input,
    })
}

/// Threads the entry bottom-up: every eligible node first claims itself,
/// then each operand hands back the entry found below it. Scalar and
/// ineligible nodes leave the current entry untouched.
fn find_entry(graph: &OpGraph, candidate: NodeId) -> Option<NodeId> {
    let mut memo: HashMap<NodeId, NodeId> = HashMap::new();
    let mut current = None;
    // `true` marks a node whose operands have all been walked.
    let mut stack = vec![(candidate, false)];
    while let Some((id, done)) = stack.pop() {
        if done {
            if let Some(entry) = current {
                memo.insert(id, entry);
            }
            continue;
        }
        if let Some(&entry) = memo.get(&id) {
            current = Some(entry);
            continue;
        }
        let node = graph.node(id);
        if node.is_scalar() || !is_fusable(graph, id) {
            continue;
        }
        current = Some(id);
        stack.push((id, true));
        stack.extend(node.inputs.iter().rev().map(|&input| (input, false)));
    }
    current
}

/// Picks the main input among the entry's operands.
///
/// Precedence: the operand of a unary entry; the non-scalar side; the
/// matrix side of a matrix-vector pair; otherwise the first operand.
pub fn select_main_input(graph: &OpGraph, entry: NodeId) -> NodeId {
    let inputs = &graph.node(entry).inputs;
    if inputs.len() < 2 {
        return inputs[0];
    }
    let (first, second) = (graph.node(inputs[0]), graph.node(inputs[1]));
    if first.is_scalar() {
        inputs[1]
    } else if second.is_scalar() {
        inputs[0]
    } else if first.is_matrix() && second.is_vector() {
        inputs[0]
    } else if second.is_matrix() && first.is_vector() {
        inputs[1]
    } else {
        inputs[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellfuse_ir::{
        AggOp, Arena, BinaryFn, CellType, DataLeaf, DataType, Direction, FusedKernel, LeafKind,
        PlanNode, Shape, UnaryFn,
    };

    /// `sum(exp(X) * c)`
    fn chain() -> (OpGraph, [NodeId; 5]) {
        let mut g = OpGraph::new();
        let x = g.matrix("X", 10, 5);
        let c = g.scalar("c");
        let e = g.unary(UnaryFn::Exp, x);
        let m = g.binary(BinaryFn::Mult, e, c);
        let s = g.aggregate(AggOp::Sum, Direction::RowCol, m);
        (g, [x, c, e, m, s])
    }

    #[test]
    fn chain_with_absorbed_sum() {
        let (g, [x, _, e, m, s]) = chain();
        let region = find_region(&g, m, &PlanCache::new(), true).unwrap();
        assert_eq!(
            region,
            Region {
                entry: e,
                exit: s,
                main_input: x,
            }
        );
    }

    #[test]
    fn absorption_can_be_disabled() {
        let (g, [x, _, e, m, _]) = chain();
        let region = find_region(&g, m, &PlanCache::new(), false).unwrap();
        assert_eq!(region.entry, e);
        assert_eq!(region.exit, m);
        assert_eq!(region.main_input, x);
    }

    #[test]
    fn column_sum_is_not_absorbed() {
        let mut g = OpGraph::new();
        let x = g.matrix("X", 10, 5);
        let e = g.unary(UnaryFn::Exp, x);
        let a = g.unary(UnaryFn::Abs, e);
        g.aggregate(AggOp::Sum, Direction::Col, a);
        let region = find_region(&g, a, &PlanCache::new(), true).unwrap();
        assert_eq!(region.exit, a);
    }

    #[test]
    fn single_operator_is_not_a_region() {
        let mut g = OpGraph::new();
        let x = g.matrix("X", 10, 5);
        let e = g.unary(UnaryFn::Exp, x);
        assert_eq!(find_region(&g, e, &PlanCache::new(), true), None);
    }

    #[test]
    fn single_operator_under_sum_is_a_region() {
        let mut g = OpGraph::new();
        let x = g.matrix("X", 10, 5);
        let e = g.unary(UnaryFn::Exp, x);
        let s = g.aggregate(AggOp::Sum, Direction::Row, e);
        let region = find_region(&g, e, &PlanCache::new(), true).unwrap();
        assert_eq!((region.entry, region.exit), (e, s));
    }

    #[test]
    fn ineligible_candidate_has_no_region() {
        let (g, [x, _, _, _, s]) = chain();
        assert_eq!(find_region(&g, s, &PlanCache::new(), true), None);
        assert_eq!(find_region(&g, x, &PlanCache::new(), true), None);
    }

    #[test]
    fn traversal_stops_at_ineligible_operators() {
        let mut g = OpGraph::new();
        let x = g.matrix("X", 10, 10);
        let e = g.unary(UnaryFn::Exp, x);
        let mm = g.other("ba+*", vec![e, x], DataType::Matrix, Shape::known(10, 10));
        let a = g.unary(UnaryFn::Abs, mm);
        let s = g.unary(UnaryFn::Sqrt, a);
        let region = find_region(&g, s, &PlanCache::new(), true).unwrap();
        assert_eq!(region.entry, a);
        assert_eq!(region.main_input, mm);
    }

    #[test]
    fn last_operand_determines_entry() {
        // plus(exp(X), abs(Y)): both operands are eligible chains; the entry
        // comes from the second operand's walk.
        let mut g = OpGraph::new();
        let x = g.matrix("X", 10, 5);
        let y = g.matrix("Y", 10, 5);
        let ex = g.unary(UnaryFn::Exp, x);
        let ay = g.unary(UnaryFn::Abs, y);
        let p = g.binary(BinaryFn::Plus, ex, ay);
        let region = find_region(&g, p, &PlanCache::new(), true).unwrap();
        assert_eq!(region.entry, ay);
        assert_eq!(region.main_input, y);
    }

    #[test]
    fn long_chain_is_walked_without_recursion() {
        let mut g = OpGraph::new();
        let x = g.matrix("X", 10, 5);
        let first = g.unary(UnaryFn::Exp, x);
        let mut last = first;
        for i in 0..50_000 {
            let f = if i % 2 == 0 { UnaryFn::Abs } else { UnaryFn::Exp };
            last = g.unary(f, last);
        }
        let region = find_region(&g, last, &PlanCache::new(), true).unwrap();
        assert_eq!((region.entry, region.exit, region.main_input), (first, last, x));
    }

    #[test]
    fn cached_candidate_is_skipped() {
        let (g, [_, _, _, m, _]) = chain();
        let mut cache = PlanCache::new();
        assert!(find_region(&g, m, &cache, true).is_some());

        let mut nodes = Arena::new();
        let output = nodes.append(PlanNode::Data(DataLeaf {
            node: m,
            name: "a".into(),
            kind: LeafKind::CurrentCell,
            data_type: DataType::Scalar,
            rows: 0,
            cols: 0,
        }));
        let kernel = FusedKernel {
            name: "TMP0".into(),
            root: m,
            inputs: Vec::new(),
            nodes,
            output,
            data_type: DataType::Matrix,
            cell_type: CellType::NoAgg,
            multiple_consumers: false,
        };
        cache.record([m], kernel);
        assert_eq!(find_region(&g, m, &cache, true), None);
    }

    #[test]
    fn main_input_scalar_side() {
        let mut g = OpGraph::new();
        let x = g.matrix("X", 10, 5);
        let c = g.scalar("c");
        let d = g.binary(BinaryFn::Minus, c, x);
        let e = g.unary(UnaryFn::Exp, d);
        let region = find_region(&g, e, &PlanCache::new(), true).unwrap();
        assert_eq!(region.entry, d);
        assert_eq!(region.main_input, x);
    }

    #[test]
    fn main_input_matrix_over_vector() {
        let mut g = OpGraph::new();
        let x = g.matrix("X", 10, 5);
        let v = g.matrix("v", 10, 1);
        let p = g.binary(BinaryFn::Plus, v, x);
        let e = g.unary(UnaryFn::Exp, p);
        let region = find_region(&g, e, &PlanCache::new(), true).unwrap();
        assert_eq!(region.main_input, x);
    }

    #[test]
    fn main_input_two_vectors_takes_first_operand() {
        let mut g = OpGraph::new();
        let u = g.matrix("u", 10, 1);
        let w = g.matrix("w", 10, 1);
        let p = g.binary(BinaryFn::Plus, w, u);
        let e = g.unary(UnaryFn::Exp, p);
        let region = find_region(&g, e, &PlanCache::new(), true).unwrap();
        assert_eq!(region.main_input, w);
    }

    #[test]
    fn main_input_two_matrices_takes_first_operand() {
        let mut g = OpGraph::new();
        let x = g.matrix("X", 10, 5);
        let y = g.matrix("Y", 10, 5);
        let p = g.binary(BinaryFn::Mult, y, x);
        assert_eq!(select_main_input(&g, p), y);
    }
}
