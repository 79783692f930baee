#![no_main]

use cellfuse_opt::{FusionConfig, fuse_graph};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(source) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(graph) = cellfuse_parser::parse(source) else {
        return;
    };
    // Planning over any well-formed graph must not panic, and a second
    // run must produce the same kernels.
    for compile_literals in [false, true] {
        let config = FusionConfig {
            compile_literals,
            ..FusionConfig::default()
        };
        let first = fuse_graph(&graph, config.clone());
        let second = fuse_graph(&graph, config);
        if let (Ok(a), Ok(b)) = (first, second) {
            let roots = |c: &cellfuse_ir::PlanCache| -> Vec<_> {
                c.kernels().iter().map(|k| k.root).collect()
            };
            assert_eq!(roots(&a), roots(&b));
        }
    }
});
