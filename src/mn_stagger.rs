//! Paces launches so a node's listening sockets are up before the nodes that
//! dial it are started. There is no readiness probe, the settle delay stands in
//! for one.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Deserialize;

use crate::mn_error::HarnessError;
use crate::mn_interface::{Launcher, NodeIndex, NodeSpec};

/// Where the settle delay goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaggerPolicy {
    /// Settle after every launch, for strict dependency chains
    #[default]
    EveryLaunch,

    /// Launch back-to-back, then settle once
    Trailing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaggerState {
    Idle,
    Launching(NodeIndex),
    Settling(NodeIndex),
    AllLaunched,
}

/// What happened while launching
#[derive(Debug, Default)]
pub struct LaunchReport {
    /// Every attempt in order, with the instant the launcher was invoked
    pub attempts: Vec<(NodeIndex, Instant)>,
    pub launched: Vec<NodeIndex>,
    pub failures: Vec<HarnessError>,
}

pub struct StaggerController {
    policy: StaggerPolicy,
    settle: Duration,
    state: StaggerState,
}

impl StaggerController {
    pub fn new(policy: StaggerPolicy, settle: Duration) -> Self {
        Self {
            policy,
            settle,
            state: StaggerState::Idle,
        }
    }

    pub fn state(&self) -> StaggerState {
        self.state
    }

    fn transition(&mut self, next: StaggerState) {
        debug!("stagger: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Launches every spec in order. Handles are pushed into `handles` as soon
    /// as they exist so the caller can tear them down whatever happens next.
    /// A failed launch is recorded and the remaining nodes still start.
    pub fn launch_all<L: Launcher>(
        &mut self,
        launcher: &mut L,
        specs: &[NodeSpec],
        handles: &mut Vec<L::Handle>,
    ) -> LaunchReport {
        let mut report = LaunchReport::default();

        for spec in specs {
            self.transition(StaggerState::Launching(spec.index));
            report.attempts.push((spec.index, Instant::now()));

            match launcher.launch(spec) {
                Ok(handle) => {
                    handles.push(handle);
                    report.launched.push(spec.index);
                }
                Err(e) => {
                    warn!("{}", e);
                    report.failures.push(e);
                }
            }

            if self.policy == StaggerPolicy::EveryLaunch {
                self.settle_after(spec.index);
            }
        }

        if self.policy == StaggerPolicy::Trailing {
            if let Some(last) = specs.last() {
                self.settle_after(last.index);
            }
        }

        self.transition(StaggerState::AllLaunched);
        info!(
            "launched {}/{} nodes ({} failed)",
            report.launched.len(),
            specs.len(),
            report.failures.len()
        );

        report
    }

    fn settle_after(&mut self, index: NodeIndex) {
        self.transition(StaggerState::Settling(index));
        thread::sleep(self.settle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mn_error::Result;
    use crate::mn_interface::{ProcessHandle, Termination};
    use crate::mn_topology::{build, BasePorts, TopologyKind};

    struct FakeHandle(NodeIndex);

    impl ProcessHandle for FakeHandle {
        fn index(&self) -> NodeIndex {
            self.0
        }

        fn terminate(&mut self) -> Result<Termination> {
            Ok(Termination::Terminated)
        }
    }

    /// Fails the listed indices, records when each launch happened
    struct FakeLauncher {
        fail: Vec<NodeIndex>,
        launched_at: Vec<Instant>,
    }

    impl FakeLauncher {
        fn new(fail: Vec<NodeIndex>) -> Self {
            Self {
                fail,
                launched_at: Vec::new(),
            }
        }
    }

    impl Launcher for FakeLauncher {
        type Handle = FakeHandle;

        fn launch(&mut self, spec: &NodeSpec) -> Result<FakeHandle> {
            self.launched_at.push(Instant::now());
            if self.fail.contains(&spec.index) {
                return Err(HarnessError::SpawnFailed {
                    index: spec.index,
                    reason: "fake".to_string(),
                });
            }
            Ok(FakeHandle(spec.index))
        }
    }

    #[test]
    fn test_every_launch_spacing() {
        let settle = Duration::from_millis(30);
        let specs = build(4, TopologyKind::Chain, BasePorts::default()).unwrap();
        let mut launcher = FakeLauncher::new(vec![]);
        let mut handles = Vec::new();

        let mut stagger = StaggerController::new(StaggerPolicy::EveryLaunch, settle);
        let report = stagger.launch_all(&mut launcher, &specs, &mut handles);

        assert_eq!(stagger.state(), StaggerState::AllLaunched);
        assert_eq!(report.launched, vec![0, 1, 2, 3]);
        assert_eq!(handles.len(), 4);

        for pair in launcher.launched_at.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= settle);
        }
        let order: Vec<NodeIndex> = report.attempts.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_trailing_settles_once() {
        let settle = Duration::from_millis(200);
        let specs = build(4, TopologyKind::FanInToLast, BasePorts::default()).unwrap();
        let mut launcher = FakeLauncher::new(vec![]);
        let mut handles = Vec::new();

        let start = Instant::now();
        let mut stagger = StaggerController::new(StaggerPolicy::Trailing, settle);
        stagger.launch_all(&mut launcher, &specs, &mut handles);
        let elapsed = start.elapsed();

        let first = launcher.launched_at[0];
        let last = launcher.launched_at[3];
        assert!(last.duration_since(first) < settle);
        assert!(elapsed >= settle);
        assert!(elapsed < settle * 4);
    }

    #[test]
    fn test_failures_do_not_stop_launch() {
        let specs = build(5, TopologyKind::Chain, BasePorts::default()).unwrap();
        let mut launcher = FakeLauncher::new(vec![1, 3]);
        let mut handles = Vec::new();

        let mut stagger = StaggerController::new(StaggerPolicy::EveryLaunch, Duration::ZERO);
        let report = stagger.launch_all(&mut launcher, &specs, &mut handles);

        assert_eq!(report.attempts.len(), 5);
        assert_eq!(report.launched, vec![0, 2, 4]);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[1].node(), Some(3));
        let kept: Vec<NodeIndex> = handles.iter().map(|h| h.index()).collect();
        assert_eq!(kept, vec![0, 2, 4]);
    }
}
