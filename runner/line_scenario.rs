// Line Topology Scenario
//
// Eight nodes in a chain, each dialing only its predecessor. Every launch is
// followed by a one second settle so the predecessor is listening before its
// dependent starts. All nodes mine at the same rate.
//
// Usage:
//   cargo run --example line_scenario [path/to/node-binary]

use std::time::Duration;

use log::{info, LevelFilter};
use simple_logger::SimpleLogger;

use mn_harness::{
    run_topology, BasePorts, LambdaPolicy, RunConfig, StaggerPolicy, TopologyKind,
};

fn main() {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .unwrap();

    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║  SCENARIO: Line Topology                               ║");
    println!("╚════════════════════════════════════════════════════════╝\n");

    let mut config = RunConfig {
        node_count: 8,
        topology: TopologyKind::Chain,
        ports: BasePorts {
            p2p: 6000,
            api: 7000,
        },
        verbosity: 2,
        stagger: StaggerPolicy::EveryLaunch,
        settle: Duration::from_secs(1),
        post_launch_settle: Duration::from_secs(1),
        observation: Duration::from_secs(60),
        lambdas: LambdaPolicy::Uniform { lambda: 10000 },
        log_dir: Some("logs/line".into()),
        ..RunConfig::default()
    };

    if let Some(binary) = std::env::args().nth(1) {
        config.node_binary = binary.into();
    }

    info!("Starting {} node line...", config.node_count);

    let summary = run_topology(config).unwrap();
    summary.print_summary();

    println!("\n✓ Scenario complete!\n");
}
