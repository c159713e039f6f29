//! Drives one topology run through its phases:
//! launch, settle, trigger, observe, teardown.
//!
//! Teardown always happens exactly once, and only touches the processes this
//! run spawned. If the run is abandoned part way (a panic in a phase), `Drop`
//! performs it instead.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::mn_config::RunConfig;
use crate::mn_control::{self, ControlReport, HttpControlClient};
use crate::mn_error::{HarnessError, Result};
use crate::mn_interface::{ControlClient, Launcher, NodeIndex, NodeSpec, ProcessHandle, Termination};
use crate::mn_launcher::ProcessLauncher;
use crate::mn_stagger::StaggerController;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Ready,
    Launching,
    Settling,
    Triggering,
    Observing,
    TearingDown,
    Finished,
}

/// Outcome of stopping the owned processes
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    pub terminated: Vec<NodeIndex>,
    pub killed: Vec<NodeIndex>,
    /// Nodes that were already gone, with their exit code if any
    pub exited_early: Vec<(NodeIndex, Option<i32>)>,
    pub failures: Vec<HarnessError>,
}

impl TeardownReport {
    pub fn stopped(&self) -> usize {
        self.terminated.len() + self.killed.len() + self.exited_early.len()
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub node_count: usize,
    pub launched: Vec<NodeIndex>,
    pub launch_failures: Vec<HarnessError>,
    pub control: ControlReport,
    pub teardown: TeardownReport,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.launch_failures.is_empty()
            && self.control.failures.is_empty()
            && self.control.unresolved.is_empty()
            && self.teardown.failures.is_empty()
            && self.teardown.exited_early.is_empty()
    }

    pub fn print_summary(&self) {
        println!("\n=== Topology Run Summary ===");
        println!("Nodes launched: {}/{}", self.launched.len(), self.node_count);
        for err in &self.launch_failures {
            println!("  launch failed: {}", err);
        }

        println!(
            "Control calls: {} issued, {} ok, {} failed, {} unresolved",
            self.control.issued,
            self.control.succeeded.len(),
            self.control.failures.len(),
            self.control.unresolved.len()
        );
        for err in &self.control.failures {
            println!("  control failed: {}", err);
        }
        if !self.control.unresolved.is_empty() {
            println!("  no response from nodes {:?}", self.control.unresolved);
        }

        println!(
            "Teardown: {} terminated, {} killed, {} exited early",
            self.teardown.terminated.len(),
            self.teardown.killed.len(),
            self.teardown.exited_early.len()
        );
        for (index, code) in &self.teardown.exited_early {
            println!("  node {} exited before teardown (code {:?})", index, code);
        }
        for err in &self.teardown.failures {
            println!("  teardown failed: {}", err);
        }

        println!("Elapsed: {:.1}s", self.elapsed.as_secs_f64());
        println!("============================\n");
    }
}

/// A single run over one topology. Owns every handle it spawns.
pub struct TopologyRun<L: Launcher, C: ControlClient + 'static> {
    config: RunConfig,
    specs: Vec<NodeSpec>,
    launcher: L,
    client: Arc<C>,
    handles: Vec<L::Handle>,
    phase: RunPhase,
    teardown: Option<TeardownReport>,
}

impl<L: Launcher, C: ControlClient + 'static> TopologyRun<L, C> {
    /// Validates the configuration and builds the topology. Fails without side
    /// effects on a bad configuration.
    pub fn new(config: RunConfig, launcher: L, client: Arc<C>) -> Result<Self> {
        let specs = config.build_specs()?;

        Ok(Self {
            config,
            specs,
            launcher,
            client,
            handles: Vec::new(),
            phase: RunPhase::Ready,
            teardown: None,
        })
    }

    pub fn specs(&self) -> &[NodeSpec] {
        &self.specs
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn enter(&mut self, phase: RunPhase) {
        info!("phase: {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Runs every phase. Per-node failures end up in the summary, they never
    /// cut the run short.
    pub fn run(mut self) -> RunSummary {
        let start = Instant::now();

        self.enter(RunPhase::Launching);
        let mut stagger = StaggerController::new(self.config.stagger, self.config.settle);
        let launch = stagger.launch_all(&mut self.launcher, &self.specs, &mut self.handles);

        self.enter(RunPhase::Settling);
        thread::sleep(self.config.post_launch_settle);

        self.enter(RunPhase::Triggering);
        let requests = match self.config.lambdas.requests(&self.specs) {
            Ok(requests) => requests,
            Err(e) => {
                // validated in new(), kept soft so teardown still runs
                warn!("{}", e);
                Vec::new()
            }
        };
        let mut fan_out = mn_control::trigger(Arc::clone(&self.client), requests, self.config.gate_node);
        info!(
            "miner start issued to nodes {:?}, gate {:?}",
            fan_out.issued(),
            fan_out.gate()
        );

        self.enter(RunPhase::Observing);
        info!("observing for {:?}", self.config.observation);
        thread::sleep(self.config.observation);
        let control = fan_out.report();

        let teardown = self.teardown();

        let summary = RunSummary {
            node_count: self.specs.len(),
            launched: launch.launched,
            launch_failures: launch.failures,
            control,
            teardown,
            elapsed: start.elapsed(),
        };
        info!(
            "run finished in {:.1}s: {}/{} launched, {}/{} triggered",
            summary.elapsed.as_secs_f64(),
            summary.launched.len(),
            summary.node_count,
            summary.control.succeeded.len(),
            summary.control.issued
        );
        summary
    }

    /// Stops every owned process, newest first. Runs once; later calls return
    /// the first report.
    pub fn teardown(&mut self) -> TeardownReport {
        if let Some(report) = &self.teardown {
            return report.clone();
        }

        self.enter(RunPhase::TearingDown);
        let mut report = TeardownReport::default();

        while let Some(mut handle) = self.handles.pop() {
            let index = handle.index();
            match handle.terminate() {
                Ok(Termination::Terminated) => report.terminated.push(index),
                Ok(Termination::Killed) => report.killed.push(index),
                Ok(Termination::AlreadyExited(code)) => report.exited_early.push((index, code)),
                Err(e) => {
                    warn!("{}", e);
                    report.failures.push(e);
                }
            }
        }

        info!("teardown: {} processes stopped", report.stopped());
        self.enter(RunPhase::Finished);
        self.teardown = Some(report.clone());
        report
    }
}

impl<L: Launcher, C: ControlClient + 'static> Drop for TopologyRun<L, C> {
    fn drop(&mut self) {
        if self.teardown.is_none() && !self.handles.is_empty() {
            warn!("run abandoned in {:?}, tearing down", self.phase);
            self.teardown();
        }
    }
}

/// Runs a topology against the real node binary over HTTP
pub fn run_topology(config: RunConfig) -> Result<RunSummary> {
    let client = Arc::new(HttpControlClient::new(config.request_timeout)?);
    let launcher = ProcessLauncher::new(
        config.node_binary.clone(),
        config.verbosity,
        config.teardown_grace,
    );

    let run = TopologyRun::new(config, launcher, client)?;
    for spec in run.specs() {
        debug!(
            "node {}: p2p {} api {} peers {:?}",
            spec.index, spec.p2p_address, spec.api_address, spec.peer_addresses
        );
    }
    Ok(run.run())
}
