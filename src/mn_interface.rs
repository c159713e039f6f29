use std::path::PathBuf;
use std::process::ExitStatus;

use crate::mn_error::Result;

// all addresses are plain `host:port` strings, as the node CLI takes them
pub type NodeIndex = usize;
pub type Address = String;
pub type Lambda = u64;

// ============================================================================
// Node Specification
// ============================================================================

/// Where a node's diagnostic stream ends up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    Discard,
    File(PathBuf),
}

/// Everything needed to start one node. Immutable once the topology is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub index: NodeIndex,
    pub p2p_address: Address,
    pub api_address: Address,
    /// Addresses this node connects to at startup, in order
    pub peer_addresses: Vec<Address>,
    pub log_sink: LogSink,
}

/// A single fire-and-forget control call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    pub index: NodeIndex,
    pub api_address: Address,
    pub parameter_name: &'static str,
    pub parameter_value: Lambda,
}

impl ControlRequest {
    pub const LAMBDA: &'static str = "lambda";

    pub fn miner_start(spec: &NodeSpec, lambda: Lambda) -> Self {
        Self {
            index: spec.index,
            api_address: spec.api_address.clone(),
            parameter_name: Self::LAMBDA,
            parameter_value: lambda,
        }
    }

    pub fn url(&self) -> String {
        format!(
            "http://{}/miner/start?{}={}",
            self.api_address, self.parameter_name, self.parameter_value
        )
    }
}

// ============================================================================
// Seams
// ============================================================================

/// How a process ended up after teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Stopped on the termination request
    Terminated,
    /// Ignored the termination request and had to be killed
    Killed,
    /// Was already gone before teardown reached it
    AlreadyExited(Option<i32>),
}

impl Termination {
    pub fn from_status(status: ExitStatus) -> Self {
        Termination::AlreadyExited(status.code())
    }
}

/// A running node process owned by the run that spawned it
pub trait ProcessHandle {
    fn index(&self) -> NodeIndex;

    /// Stop the process. Only ever called once per handle.
    fn terminate(&mut self) -> Result<Termination>;
}

/// Starts node processes. Returns as soon as the process exists, there is no
/// readiness handshake.
pub trait Launcher {
    type Handle: ProcessHandle;

    fn launch(&mut self, spec: &NodeSpec) -> Result<Self::Handle>;
}

/// Issues control calls. Shared across the fan-out threads.
pub trait ControlClient: Send + Sync {
    fn send(&self, request: &ControlRequest) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_miner_start_url() {
        let spec = NodeSpec {
            index: 3,
            p2p_address: "127.0.0.1:6003".to_string(),
            api_address: "127.0.0.1:7003".to_string(),
            peer_addresses: vec![],
            log_sink: LogSink::Discard,
        };

        let request = ControlRequest::miner_start(&spec, 10000);
        assert_eq!(request.index, 3);
        assert_eq!(request.url(), "http://127.0.0.1:7003/miner/start?lambda=10000");
    }
}
