// Regular Topology Scenario
//
// Nodes are started back-to-back with a single trailing settle. The newest
// node joins the whole network by dialing every earlier node. It is the
// bootstrap node and mines at its own rate; the control call to it gates the
// observation window.
//
// Usage:
//   cargo run --example regular_scenario [path/to/node-binary]

use std::time::Duration;

use log::{info, LevelFilter};
use simple_logger::SimpleLogger;

use mn_harness::{
    run_topology, BasePorts, FanInAddresses, LambdaPolicy, RunConfig, StaggerPolicy,
    TopologyKind,
};

fn main() {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .unwrap();

    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║  SCENARIO: Regular Topology                            ║");
    println!("╚════════════════════════════════════════════════════════╝\n");

    let node_count = 4;
    let bootstrap = node_count - 1;

    let mut config = RunConfig {
        node_count,
        topology: TopologyKind::FanInToLast,
        fan_in_addresses: FanInAddresses::P2p,
        ports: BasePorts {
            p2p: 6000,
            api: 7000,
        },
        verbosity: 2,
        stagger: StaggerPolicy::Trailing,
        settle: Duration::from_secs(1),
        post_launch_settle: Duration::from_secs(1),
        observation: Duration::from_secs(60),
        lambdas: LambdaPolicy::Bootstrap {
            node: bootstrap,
            bootstrap: 0,
            others: 20000,
        },
        gate_node: bootstrap,
        log_dir: Some("logs/regular".into()),
        ..RunConfig::default()
    };

    if let Some(binary) = std::env::args().nth(1) {
        config.node_binary = binary.into();
    }

    info!(
        "Starting {} nodes, bootstrap node {}...",
        config.node_count, bootstrap
    );

    let summary = run_topology(config).unwrap();
    summary.print_summary();

    println!("\n✓ Scenario complete!\n");
}
