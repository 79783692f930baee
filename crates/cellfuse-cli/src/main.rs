use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;
use miette::{Context, IntoDiagnostic};

use cellfuse_ir::{OpGraph, PlanCache};
use cellfuse_opt::{FusionConfig, FusionPlanner};
use cellfuse_runtime::FusedInstruction;

/// cellfuse: cell-wise operator fusion planner
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Input operator graph (JSON)
    input: PathBuf,

    /// Fusion configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Attempt fusion only at the node with this name
    #[arg(long)]
    candidate: Option<String>,

    /// Compile every literal into the kernel
    #[arg(long)]
    compile_literals: bool,

    /// Do not absorb trailing row/full sums into kernels
    #[arg(long)]
    no_absorb: bool,

    /// Disable fusion entirely
    #[arg(long)]
    disable: bool,

    /// Dump the operator graph to stderr before fusion
    #[arg(long)]
    emit_graph: bool,

    /// Print one dispatch instruction per kernel instead of kernel dumps
    #[arg(long)]
    instructions: bool,

    /// Thread-count hint written into dispatch instructions
    #[arg(short = 'k', long, default_value_t = 1)]
    threads: usize,

    /// Output path (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn fusion_config(&self) -> miette::Result<FusionConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .into_diagnostic()
                    .wrap_err_with(|| format!("failed to read {}", path.display()))?;
                toml::from_str::<FusionConfig>(&text)
                    .into_diagnostic()
                    .wrap_err_with(|| format!("invalid configuration in {}", path.display()))?
            }
            None => FusionConfig::default(),
        };
        if self.compile_literals {
            config.compile_literals = true;
        }
        if self.no_absorb {
            config.absorb_aggregations = false;
        }
        if self.disable {
            config.enabled = false;
        }
        Ok(config)
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    // 1. Read the graph description.
    let source = std::fs::read_to_string(&cli.input)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {}", cli.input.display()))?;

    // 2. Parse it into an operator graph.
    let graph = cellfuse_parser::parse(&source)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("graph parse failed")?;

    if cli.emit_graph {
        eprint!("{}", cellfuse_ir::dump_graph(&graph));
    }

    // 3. Fuse.
    let config = cli.fusion_config()?;
    let planner = FusionPlanner::new(config);
    let cache = match &cli.candidate {
        Some(name) => fuse_at(&planner, &graph, name)?,
        None => planner
            .run(&graph)
            .map_err(|e| miette::miette!("{e}"))
            .wrap_err("fusion failed")?,
    };

    // 4. Render.
    let mut text = String::new();
    for kernel in cache.kernels() {
        if cli.instructions {
            let inst = FusedInstruction::from_kernel(&graph, kernel, cli.threads)
                .map_err(|e| miette::miette!("{e}"))?;
            let _ = writeln!(text, "{inst}");
        } else {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&cellfuse_ir::dump_kernel(kernel));
        }
    }
    if cache.is_empty() {
        log::warn!("no kernels produced for {}", cli.input.display());
    }

    // 5. Write.
    match &cli.output {
        Some(path) => std::fs::write(path, text)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to write {}", path.display()))?,
        None => print!("{text}"),
    }
    Ok(())
}

fn fuse_at(planner: &FusionPlanner, graph: &OpGraph, name: &str) -> miette::Result<PlanCache> {
    let candidate = graph
        .find(name)
        .ok_or_else(|| miette::miette!("no node named '{name}' in the graph"))?;
    let mut cache = PlanCache::new();
    planner
        .fuse_candidate(graph, candidate, &mut cache)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err_with(|| format!("fusion at '{name}' failed"))?;
    Ok(cache)
}
