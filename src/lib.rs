//! # mn_harness - Miner Network Test Harness
//!
//! Stands up a local network of mining node processes, staggers their startup
//! so every node's peers are listening before it dials them, starts mining on
//! all of them over the HTTP control API, lets the network run for a fixed
//! window and tears everything down again.
//!
//! The node binary itself is opaque: it is started with a command line, poked
//! with `GET /miner/start?lambda=<n>` and eventually stopped.
//!
//! ## Core Components
//!
//! - **Topology** (`mn_topology`): ordered node specs for chain, fan-in and regular graphs
//! - **Launcher** (`mn_launcher`): spawns one child process per node spec
//! - **Stagger** (`mn_stagger`): settle delays between launches
//! - **Control** (`mn_control`): concurrent miner-start fan-out
//! - **Lifecycle** (`mn_lifecycle`): phase sequence and teardown of owned processes
//!
//! ## Usage
//!
//! ```no_run
//! use mn_harness::{run_topology, RunConfig, TopologyKind};
//!
//! let config = RunConfig {
//!     node_count: 4,
//!     topology: TopologyKind::Regular { degree: 2 },
//!     ..RunConfig::default()
//! };
//!
//! let summary = run_topology(config).expect("bad configuration");
//! summary.print_summary();
//! ```
//!
//! Declarative scenarios live in `scenarios/` and are run with the
//! `scenario_runner` binary.

pub mod mn_config;
pub mod mn_control;
pub mod mn_error;
pub mod mn_interface;
pub mod mn_launcher;
pub mod mn_lifecycle;
pub mod mn_stagger;
pub mod mn_topology;

// Re-export commonly used types
pub use mn_config::{RunConfig, ScenarioFile};
pub use mn_control::{ControlReport, HttpControlClient, LambdaPolicy};
pub use mn_error::{HarnessError, Result};
pub use mn_interface::{
    ControlClient, ControlRequest, Launcher, LogSink, NodeIndex, NodeSpec, ProcessHandle,
    Termination,
};
pub use mn_launcher::{build_args, ProcessLauncher};
pub use mn_lifecycle::{run_topology, RunPhase, RunSummary, TopologyRun};
pub use mn_stagger::StaggerPolicy;
pub use mn_topology::{BasePorts, FanInAddresses, TopologyBuilder, TopologyKind};
