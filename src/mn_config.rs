// Run Configuration

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::mn_control::LambdaPolicy;
use crate::mn_error::{HarnessError, Result};
use crate::mn_interface::{NodeIndex, NodeSpec};
use crate::mn_stagger::StaggerPolicy;
use crate::mn_topology::{BasePorts, FanInAddresses, TopologyBuilder, TopologyKind, DEFAULT_HOST};

// ============================================================================
// Main Configuration
// ============================================================================

/// Everything a single topology run needs
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Node executable, started once per node
    pub node_binary: PathBuf,

    /// Host every node binds on
    pub host: String,

    pub node_count: usize,
    pub topology: TopologyKind,
    pub fan_in_addresses: FanInAddresses,
    pub ports: BasePorts,

    /// Number of `-v` flags handed to each node
    pub verbosity: u8,

    pub stagger: StaggerPolicy,

    /// Delay after a launch before dependents start
    pub settle: Duration,

    /// Extra wait between the last launch and the control fan-out
    pub post_launch_settle: Duration,

    /// How long the network runs before teardown
    pub observation: Duration,

    /// Per control request, connect and total
    pub request_timeout: Duration,

    /// Time a node gets to exit after the termination request
    pub teardown_grace: Duration,

    pub lambdas: LambdaPolicy,

    /// The control call the run waits on before observing
    pub gate_node: NodeIndex,

    /// Node diagnostic logs go to `<log_dir>/node-<i>.log` when set
    pub log_dir: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            node_binary: PathBuf::from("target/release/bitcoin"),
            host: DEFAULT_HOST.to_string(),
            node_count: 8,
            topology: TopologyKind::Chain,
            fan_in_addresses: FanInAddresses::P2p,
            ports: BasePorts::default(),
            verbosity: 2,
            stagger: StaggerPolicy::EveryLaunch,
            settle: Duration::from_secs(1),
            post_launch_settle: Duration::from_secs(1),
            observation: Duration::from_secs(60),
            request_timeout: Duration::from_secs(5),
            teardown_grace: Duration::from_secs(3),
            lambdas: LambdaPolicy::default(),
            gate_node: 0,
            log_dir: None,
        }
    }
}

impl RunConfig {
    pub fn topology_builder(&self) -> TopologyBuilder {
        TopologyBuilder::new(self.topology, self.ports)
            .host(self.host.clone())
            .fan_in_addresses(self.fan_in_addresses)
            .log_dir(self.log_dir.clone())
    }

    /// Checks the whole configuration and builds the node specs. Nothing is
    /// spawned if this fails.
    pub fn build_specs(&self) -> Result<Vec<NodeSpec>> {
        let specs = self.topology_builder().build(self.node_count)?;

        self.lambdas.validate(self.node_count)?;

        if self.gate_node >= self.node_count {
            return Err(HarnessError::InvalidConfig(format!(
                "gate node {} is outside a {} node topology",
                self.gate_node, self.node_count
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(HarnessError::InvalidConfig(
                "request timeout must be positive".to_string(),
            ));
        }

        Ok(specs)
    }
}

// ============================================================================
// Scenario Files
// ============================================================================

/// Scenario file format
#[derive(Debug, Deserialize)]
pub struct ScenarioFile {
    /// Scenario metadata
    #[serde(default)]
    pub meta: ScenarioMeta,

    pub config: ScenarioConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScenarioMeta {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default = "default_node_binary")]
    node_binary: PathBuf,

    #[serde(default = "default_host")]
    host: String,

    node_count: usize,

    topology: TopologyKind,

    #[serde(default)]
    fan_in_addresses: FanInAddresses,

    #[serde(default)]
    ports: BasePorts,

    #[serde(default = "default_verbosity")]
    verbosity: u8,

    #[serde(default)]
    stagger: StaggerPolicy,

    #[serde(default = "default_settle_ms")]
    settle_ms: u64,

    #[serde(default = "default_settle_ms")]
    post_launch_settle_ms: u64,

    #[serde(default = "default_observation_secs")]
    observation_secs: u64,

    #[serde(default = "default_request_timeout_ms")]
    request_timeout_ms: u64,

    #[serde(default = "default_teardown_grace_ms")]
    teardown_grace_ms: u64,

    #[serde(default)]
    lambdas: LambdaPolicy,

    #[serde(default)]
    gate_node: NodeIndex,

    #[serde(default)]
    log_dir: Option<PathBuf>,
}

fn default_node_binary() -> PathBuf {
    RunConfig::default().node_binary
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_verbosity() -> u8 {
    2
}

fn default_settle_ms() -> u64 {
    1000
}

fn default_observation_secs() -> u64 {
    60
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_teardown_grace_ms() -> u64 {
    3000
}

impl ScenarioFile {
    pub fn load(path: &Path) -> Result<Self> {
        let yaml = fs::read_to_string(path).map_err(|e| {
            HarnessError::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_yaml::from_str(&yaml)
            .map_err(|e| HarnessError::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| HarnessError::InvalidConfig(e.to_string()))
    }

    pub fn run_config(&self) -> RunConfig {
        let c = &self.config;
        RunConfig {
            node_binary: c.node_binary.clone(),
            host: c.host.clone(),
            node_count: c.node_count,
            topology: c.topology,
            fan_in_addresses: c.fan_in_addresses,
            ports: c.ports,
            verbosity: c.verbosity,
            stagger: c.stagger,
            settle: Duration::from_millis(c.settle_ms),
            post_launch_settle: Duration::from_millis(c.post_launch_settle_ms),
            observation: Duration::from_secs(c.observation_secs),
            request_timeout: Duration::from_millis(c.request_timeout_ms),
            teardown_grace: Duration::from_millis(c.teardown_grace_ms),
            lambdas: c.lambdas.clone(),
            gate_node: c.gate_node,
            log_dir: c.log_dir.clone(),
        }
    }
}
