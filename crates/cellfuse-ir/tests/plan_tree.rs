//! Integration test: build the plan of `sum(exp(X) * c)` by hand, wrap it
//! into a kernel and verify the text dump.

use cellfuse_ir::*;

#[test]
fn build_full_aggregate_kernel() {
    // ---- Operator graph ----
    let mut graph = OpGraph::new();
    let x = graph.matrix("X", 10, 5);
    let c = graph.scalar("c");
    let exp = graph.unary(UnaryFn::Exp, x);
    let mult = graph.binary(BinaryFn::Mult, exp, c);
    let sum = graph.aggregate(AggOp::Sum, Direction::RowCol, mult);
    assert_eq!(graph.roots(), vec![sum]);
    assert!(graph.node(sum).kind.is_absorbable_sum());

    // ---- Plan ----
    let mut registry = PlanRegistry::new();
    let cell = registry.nodes.append(PlanNode::Data(DataLeaf {
        node: x,
        name: "X".into(),
        kind: LeafKind::CurrentCell,
        data_type: DataType::Scalar,
        rows: 0,
        cols: 0,
    }));
    let scalar = registry.nodes.append(PlanNode::Data(DataLeaf {
        node: c,
        name: "c".into(),
        kind: LeafKind::Input,
        data_type: DataType::Scalar,
        rows: 0,
        cols: 0,
    }));
    let e = registry.nodes.append(PlanNode::Unary {
        op: UnaryType::Exp,
        input: cell,
    });
    let m = registry.nodes.append(PlanNode::Binary {
        op: BinaryType::Mult,
        left: e,
        right: scalar,
    });
    let plan = |output, cell_type, data_type| CellPlan {
        output,
        data_type,
        cell_type,
        multiple_consumers: false,
    };
    registry.insert(
        exp,
        PlanEntry {
            inputs: vec![x],
            plan: plan(e, CellType::NoAgg, DataType::Matrix),
        },
    );
    registry.insert(
        mult,
        PlanEntry {
            inputs: vec![x, c],
            plan: plan(m, CellType::NoAgg, DataType::Matrix),
        },
    );
    registry.insert(
        sum,
        PlanEntry {
            inputs: vec![x, c],
            plan: plan(m, CellType::FullAgg, DataType::Scalar),
        },
    );

    let (root, top) = registry.top_level().expect("top-level entry");
    assert_eq!(root, sum);
    assert_eq!(top.plan.cell_type, CellType::FullAgg);
    assert_eq!(format_plan(&registry.nodes, top.plan.output), "mult(exp(X), c)");

    // ---- Kernel ----
    let mut nodes = Arena::new();
    let ka = nodes.append(PlanNode::Data(DataLeaf {
        node: x,
        name: Binding::CurrentCell.to_string(),
        kind: LeafKind::CurrentCell,
        data_type: DataType::Scalar,
        rows: 0,
        cols: 0,
    }));
    let ke = nodes.append(PlanNode::Unary {
        op: UnaryType::Exp,
        input: ka,
    });
    let ks = nodes.append(PlanNode::Data(DataLeaf {
        node: c,
        name: Binding::Scalar(0).to_string(),
        kind: LeafKind::Input,
        data_type: DataType::Scalar,
        rows: 0,
        cols: 0,
    }));
    let km = nodes.append(PlanNode::Binary {
        op: BinaryType::Mult,
        left: ke,
        right: ks,
    });
    let kernel = FusedKernel {
        name: "TMP0".into(),
        root: sum,
        inputs: vec![
            KernelInput {
                node: x,
                name: "X".into(),
                binding: Binding::CurrentCell,
            },
            KernelInput {
                node: c,
                name: "c".into(),
                binding: Binding::Scalar(0),
            },
        ],
        nodes,
        output: km,
        data_type: DataType::Scalar,
        cell_type: CellType::FullAgg,
        multiple_consumers: false,
    };
    assert_eq!(kernel.matrix_inputs().count(), 1);
    assert_eq!(kernel.scalar_inputs().count(), 1);

    let dump = dump_kernel(&kernel);
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
    assert_eq!(dump, expected);

    // ---- Cache ----
    let mut cache = PlanCache::new();
    cache.record(registry.keys(), kernel);
    assert!(cache.contains(sum));
    assert!(cache.contains(exp));
    assert!(!cache.contains(x));
    assert_eq!(cache.kernel_for(sum).map(|k| k.name.as_str()), Some("TMP0"));
}
