//! Cell-wise fusion planning.
//!
//! Provides a [`Template`] trait for fusion shapes, the cell-wise
//! [`CellTemplate`], and a [`FusionPlanner`] that walks an operator graph
//! top-down and records every fused kernel in a [`PlanCache`].

mod builder;
mod config;
mod cse;
mod error;

pub use builder::build_plan;
pub use config::FusionConfig;
pub use cse::export_kernel;
pub use error::FusionError;

use std::collections::HashSet;
use std::fmt::Debug;

use cellfuse_analysis::{Region, find_region, is_fusable};
use cellfuse_ir::{FusedKernel, NodeId, OpGraph, PlanCache, PlanRegistry};

/// A fusion shape: decides where a fused kernel may start, how far its
/// region extends, and how the region becomes plans.
pub trait Template: Debug {
    /// Human-readable name of the template.
    fn name(&self) -> &str;

    /// Returns `true` if a region of this shape may be rooted at `node`.
    fn open(&self, graph: &OpGraph, node: NodeId) -> bool;

    /// Computes the region rooted at `candidate`, if any.
    fn find_boundaries(
        &self,
        graph: &OpGraph,
        candidate: NodeId,
        cache: &PlanCache,
    ) -> Option<Region>;

    /// Builds the plans of a region.
    fn construct(&self, graph: &OpGraph, region: &Region) -> Result<PlanRegistry, FusionError>;
}

/// Template for element-wise chains, optionally closed by a full or row
/// sum.
#[derive(Clone, Debug, Default)]
pub struct CellTemplate {
    config: FusionConfig,
}

impl CellTemplate {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }
}

impl Template for CellTemplate {
    fn name(&self) -> &str {
        "cell"
    }

    fn open(&self, graph: &OpGraph, node: NodeId) -> bool {
        is_fusable(graph, node)
    }

    fn find_boundaries(
        &self,
        graph: &OpGraph,
        candidate: NodeId,
        cache: &PlanCache,
    ) -> Option<Region> {
        find_region(graph, candidate, cache, self.config.absorb_aggregations)
    }

    fn construct(&self, graph: &OpGraph, region: &Region) -> Result<PlanRegistry, FusionError> {
        build_plan(graph, region, &self.config)
    }
}

/// Runs templates over an operator graph.
#[derive(Debug)]
pub struct FusionPlanner {
    templates: Vec<Box<dyn Template>>,
    config: FusionConfig,
}

impl Default for FusionPlanner {
    fn default() -> Self {
        Self::new(FusionConfig::default())
    }
}

impl FusionPlanner {
    /// Creates a planner with the cell-wise template.
    pub fn new(config: FusionConfig) -> Self {
        Self {
            templates: vec![Box::new(CellTemplate::new(config.clone()))],
            config,
        }
    }

    /// Creates a planner without templates.
    pub fn empty(config: FusionConfig) -> Self {
        Self {
            templates: Vec::new(),
            config,
        }
    }

    /// Adds a template; templates are tried in insertion order.
    pub fn add_template(&mut self, template: Box<dyn Template>) {
        self.templates.push(template);
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Runs one fusion attempt rooted at `candidate`.
    ///
    /// On success the kernel is recorded in `cache` and a copy returned.
    /// `Ok(None)` means no template produced a plan. An error aborts this
    /// attempt only; `cache` is left unchanged.
    pub fn fuse_candidate(
        &self,
        graph: &OpGraph,
        candidate: NodeId,
        cache: &mut PlanCache,
    ) -> Result<Option<FusedKernel>, FusionError> {
        if !self.config.enabled {
            return Ok(None);
        }
        for template in &self.templates {
            if !template.open(graph, candidate) {
                continue;
            }
            let Some(region) = template.find_boundaries(graph, candidate, cache) else {
                continue;
            };
            let registry = template.construct(graph, &region)?;
            let name = format!("TMP{}", cache.len());
            let Some(kernel) = export_kernel(graph, &registry, name)? else {
                continue;
            };
            log::debug!(
                "{} template fused '{}' into {} ({} inputs, {})",
                template.name(),
                graph.node(kernel.root).name,
                kernel.name,
                kernel.inputs.len(),
                kernel.cell_type
            );
            cache.record(registry.keys(), kernel.clone());
            return Ok(Some(kernel));
        }
        Ok(None)
    }

    /// Fuses the whole graph, visiting consumers before their operands so
    /// the largest region around a node is found first.
    ///
    /// Attempts failing on an operator without a cell-wise primitive are
    /// skipped; any other error aborts the run.
    pub fn run(&self, graph: &OpGraph) -> Result<PlanCache, FusionError> {
        let mut cache = PlanCache::new();
        if !self.config.enabled {
            log::info!("cell-wise fusion disabled");
            return Ok(cache);
        }

        let mut visited = HashSet::new();
        let mut stack: Vec<NodeId> = graph.roots().into_iter().rev().collect();
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            match self.fuse_candidate(graph, id, &mut cache) {
                Ok(_) => {}
                Err(err @ FusionError::UnsupportedOperator { .. }) => {
                    log::warn!("skipping fusion at '{}': {err}", graph.node(id).name);
                }
                Err(err) => return Err(err),
            }
            for &input in graph.node(id).inputs.iter().rev() {
                if !visited.contains(&input) {
                    stack.push(input);
                }
            }
        }

        log::info!(
            "cell-wise fusion: {} kernel(s) over {} node(s)",
            cache.len(),
            graph.len()
        );
        Ok(cache)
    }
}

/// Convenience function: fuses `graph` with the cell-wise template.
pub fn fuse_graph(graph: &OpGraph, config: FusionConfig) -> Result<PlanCache, FusionError> {
    FusionPlanner::new(config).run(graph)
}
