//! Concurrent control fan-out over the nodes' HTTP API.
//!
//! One thread per request. The caller only waits for the gate call, the rest
//! keep running in the background and are collected later with [`FanOut::poll`].

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Deserialize;

use crate::mn_error::{HarnessError, Result};
use crate::mn_interface::{ControlClient, ControlRequest, Lambda, NodeIndex, NodeSpec};

// ============================================================================
// Lambda Policy
// ============================================================================

/// Mining rate handed to each node
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum LambdaPolicy {
    /// Same rate everywhere
    Uniform { lambda: Lambda },

    /// One bootstrap node with its own rate, the others share one
    Bootstrap {
        node: NodeIndex,
        bootstrap: Lambda,
        others: Lambda,
    },

    /// Explicit rate per node, in node order
    PerNode { lambdas: Vec<Lambda> },
}

impl Default for LambdaPolicy {
    fn default() -> Self {
        LambdaPolicy::Uniform { lambda: 10000 }
    }
}

impl LambdaPolicy {
    pub fn validate(&self, node_count: usize) -> Result<()> {
        match self {
            LambdaPolicy::Uniform { .. } => Ok(()),
            LambdaPolicy::Bootstrap { node, .. } if *node >= node_count => {
                Err(HarnessError::InvalidConfig(format!(
                    "bootstrap node {} is outside a {} node topology",
                    node, node_count
                )))
            }
            LambdaPolicy::Bootstrap { .. } => Ok(()),
            LambdaPolicy::PerNode { lambdas } if lambdas.len() != node_count => {
                Err(HarnessError::InvalidConfig(format!(
                    "{} lambdas given for {} nodes",
                    lambdas.len(),
                    node_count
                )))
            }
            LambdaPolicy::PerNode { .. } => Ok(()),
        }
    }

    pub fn lambda_for(&self, index: NodeIndex) -> Option<Lambda> {
        match self {
            LambdaPolicy::Uniform { lambda } => Some(*lambda),
            LambdaPolicy::Bootstrap {
                node,
                bootstrap,
                others,
            } => Some(if index == *node { *bootstrap } else { *others }),
            LambdaPolicy::PerNode { lambdas } => lambdas.get(index).copied(),
        }
    }

    /// One miner-start request per spec
    pub fn requests(&self, specs: &[NodeSpec]) -> Result<Vec<ControlRequest>> {
        self.validate(specs.len())?;

        specs
            .iter()
            .map(|spec| {
                self.lambda_for(spec.index)
                    .map(|lambda| ControlRequest::miner_start(spec, lambda))
                    .ok_or_else(|| {
                        HarnessError::InvalidConfig(format!("no lambda for node {}", spec.index))
                    })
            })
            .collect()
    }
}

// ============================================================================
// HTTP Client
// ============================================================================

/// Blocking HTTP client for the node control API
#[derive(Debug, Clone)]
pub struct HttpControlClient {
    client: reqwest::blocking::Client,
}

impl HttpControlClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| HarnessError::InvalidConfig(format!("http client: {}", e)))?;

        Ok(Self { client })
    }
}

impl ControlClient for HttpControlClient {
    fn send(&self, request: &ControlRequest) -> Result<()> {
        let failed = |reason: String| HarnessError::ControlRequestFailed {
            index: request.index,
            address: request.api_address.clone(),
            reason,
        };

        // body is ignored, only the status matters
        self.client
            .get(request.url())
            .send()
            .and_then(|response| response.error_for_status())
            .map(|_| ())
            .map_err(|e| failed(e.to_string()))
    }
}

// ============================================================================
// Fan-out
// ============================================================================

type Outcome = (NodeIndex, Result<()>);

/// In-flight fan-out. Outcomes trickle in as the request threads finish.
pub struct FanOut {
    issued: Vec<NodeIndex>,
    gate: Option<NodeIndex>,
    receiver: Receiver<Outcome>,
    outcomes: BTreeMap<NodeIndex, Result<()>>,
}

/// Final state of a fan-out
#[derive(Debug, Clone, Default)]
pub struct ControlReport {
    pub issued: usize,
    pub succeeded: Vec<NodeIndex>,
    pub failures: Vec<HarnessError>,
    /// Calls that had not completed when the report was taken
    pub unresolved: Vec<NodeIndex>,
}

/// Issues every request concurrently and blocks until the gate call finishes.
/// The gate defaults to the first request when `gate` is not among them.
pub fn trigger<C>(client: Arc<C>, requests: Vec<ControlRequest>, gate: NodeIndex) -> FanOut
where
    C: ControlClient + ?Sized + 'static,
{
    let (sender, receiver) = mpsc::channel();
    let mut outcomes = BTreeMap::new();

    let gate = if requests.iter().any(|r| r.index == gate) {
        Some(gate)
    } else {
        requests.first().map(|r| r.index)
    };

    let issued: Vec<NodeIndex> = requests.iter().map(|r| r.index).collect();

    for request in requests {
        let client = Arc::clone(&client);
        let sender = sender.clone();
        let index = request.index;
        let address = request.api_address.clone();

        let spawned = thread::Builder::new()
            .name(format!("control-{}", index))
            .spawn(move || {
                debug!("GET {}", request.url());
                let result = client.send(&request);
                match &result {
                    Ok(()) => debug!("node {} mining at lambda {}", index, request.parameter_value),
                    Err(e) => warn!("{}", e),
                }
                // receiver may be gone once the run is over
                let _ = sender.send((index, result));
            });

        if let Err(e) = spawned {
            let err = HarnessError::ControlRequestFailed {
                index,
                address,
                reason: format!("could not start request thread: {}", e),
            };
            warn!("{}", err);
            outcomes.insert(index, Err(err));
        }
    }
    drop(sender);

    let mut fan_out = FanOut {
        issued,
        gate,
        receiver,
        outcomes,
    };
    fan_out.wait_for_gate();
    fan_out
}

impl FanOut {
    pub fn gate(&self) -> Option<NodeIndex> {
        self.gate
    }

    pub fn issued(&self) -> &[NodeIndex] {
        &self.issued
    }

    fn wait_for_gate(&mut self) {
        let gate = match self.gate {
            Some(gate) => gate,
            None => return,
        };

        while !self.outcomes.contains_key(&gate) {
            match self.receiver.recv() {
                Ok((index, result)) => {
                    self.outcomes.insert(index, result);
                }
                Err(_) => break,
            }
        }

        match self.outcomes.get(&gate) {
            Some(Ok(())) => info!("gate node {} triggered", gate),
            Some(Err(_)) => warn!("gate node {} did not respond, continuing", gate),
            None => warn!("gate node {} produced no outcome", gate),
        }
    }

    /// Collects whatever finished since the last call, without blocking
    pub fn poll(&mut self) -> usize {
        let mut collected = 0;
        loop {
            match self.receiver.try_recv() {
                Ok((index, result)) => {
                    self.outcomes.insert(index, result);
                    collected += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        collected
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.len() == self.issued.len()
    }

    pub fn report(&mut self) -> ControlReport {
        self.poll();

        let mut report = ControlReport {
            issued: self.issued.len(),
            ..Default::default()
        };

        for index in &self.issued {
            match self.outcomes.get(index) {
                Some(Ok(())) => report.succeeded.push(*index),
                Some(Err(e)) => report.failures.push(e.clone()),
                None => report.unresolved.push(*index),
            }
        }

        report
    }
}
