// Scenario Runner - Load and execute scenario YAML files
//
// Usage:
//   cargo run --bin scenario_runner scenarios/line.yaml
//   cargo run --bin scenario_runner scenarios/  (runs all .yaml files in directory)
//   cargo run --bin scenario_runner scenarios/regular.yaml --node-binary ../node/target/release/bitcoin
//   cargo run --bin scenario_runner scenarios/line.yaml --dry-run

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use log::{error, LevelFilter};
use simple_logger::SimpleLogger;

use mn_harness::{build_args, run_topology, HarnessError, RunConfig, ScenarioFile};

#[derive(Parser)]
#[command(name = "scenario_runner")]
#[command(about = "Run miner network topology scenarios", long_about = None)]
struct Cli {
    /// Scenario file, or a directory of .yaml/.yml scenarios
    path: PathBuf,

    /// Node executable, overrides the scenario's node_binary
    #[arg(long)]
    node_binary: Option<PathBuf>,

    /// Log level for the harness itself
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print the topology and node command lines without starting anything
    #[arg(long)]
    dry_run: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level: LevelFilter = cli
        .log_level
        .parse()
        .map_err(|_| anyhow!("invalid log level: {}", cli.log_level))?;
    SimpleLogger::new()
        .with_level(level)
        .init()
        .map_err(|e| anyhow!("logger: {}", e))?;

    let scenarios = if cli.path.is_file() {
        vec![cli.path.clone()]
    } else if cli.path.is_dir() {
        scenario_directory(&cli.path)?
    } else {
        bail!("path does not exist: {}", cli.path.display());
    };

    let mut rejected = Vec::new();
    for (i, path) in scenarios.iter().enumerate() {
        if scenarios.len() > 1 {
            println!("\n{}/{} Running: {}\n", i + 1, scenarios.len(), path.display());
        }
        match run_scenario_file(path, &cli) {
            Ok(()) => {}
            // a bad scenario spawns nothing, so the remaining ones still run
            Err(e) if e.downcast_ref::<HarnessError>().map_or(false, HarnessError::is_config) => {
                error!("{}: {:#}", path.display(), e);
                rejected.push(path.clone());
            }
            Err(e) => return Err(e),
        }
    }

    if !rejected.is_empty() {
        bail!("{} scenario(s) rejected: {:?}", rejected.len(), rejected);
    }
    Ok(())
}

fn scenario_directory(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut scenarios = Vec::new();

    for entry in fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        let ext = path.extension().and_then(|s| s.to_str());
        if ext == Some("yaml") || ext == Some("yml") {
            scenarios.push(path);
        }
    }

    scenarios.sort();

    if scenarios.is_empty() {
        bail!("no .yaml files found in {}", dir.display());
    }
    Ok(scenarios)
}

fn run_scenario_file(path: &Path, cli: &Cli) -> anyhow::Result<()> {
    println!("Loading scenario from: {}", path.display());

    let scenario = ScenarioFile::load(path)?;

    let name = scenario
        .meta
        .name
        .clone()
        .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_default();
    println!("\n=== {} ===", name);
    if let Some(ref desc) = scenario.meta.description {
        println!("{}", desc);
    }

    let mut config = scenario.run_config();
    if let Some(ref binary) = cli.node_binary {
        config.node_binary = binary.clone();
    }

    print_configuration(&config);

    if cli.dry_run {
        return dry_run(&config).with_context(|| format!("scenario {}", path.display()));
    }

    println!("\nStarting run...\n");
    let summary = run_topology(config).with_context(|| format!("scenario {}", path.display()))?;
    summary.print_summary();

    Ok(())
}

fn print_configuration(config: &RunConfig) {
    println!("\nConfiguration:");
    println!("  Node binary: {}", config.node_binary.display());
    println!("  Nodes: {}", config.node_count);
    println!("  Topology: {:?}", config.topology);
    println!("  Stagger: {:?} ({:?})", config.stagger, config.settle);
    println!("  Observation: {:?}", config.observation);
    println!("  Lambdas: {:?}", config.lambdas);
}

fn dry_run(config: &RunConfig) -> anyhow::Result<()> {
    let specs = config.build_specs()?;

    println!();
    for spec in &specs {
        let lambda = config
            .lambdas
            .lambda_for(spec.index)
            .map(|l| l.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "node {} (lambda {}): {} {}",
            spec.index,
            lambda,
            config.node_binary.display(),
            build_args(spec, config.verbosity).join(" ")
        );
    }
    Ok(())
}
