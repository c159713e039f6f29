//! Spawns node processes from their specs.
//!
//! The command line is an explicit argument vector built from the node spec fields,
//! never a shell string.

use std::fs::{self, File};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::mn_error::{HarnessError, Result};
use crate::mn_interface::{Launcher, LogSink, NodeIndex, NodeSpec, ProcessHandle, Termination};

const EXIT_POLL: Duration = Duration::from_millis(20);

/// Node command line: `[-v..] --p2p <addr> --api <addr> [--connect <addr>]..`
pub fn build_args(spec: &NodeSpec, verbosity: u8) -> Vec<String> {
    let mut args = Vec::with_capacity(5 + 2 * spec.peer_addresses.len());

    if verbosity > 0 {
        args.push(format!("-{}", "v".repeat(verbosity as usize)));
    }
    args.push("--p2p".to_string());
    args.push(spec.p2p_address.clone());
    args.push("--api".to_string());
    args.push(spec.api_address.clone());

    for peer in &spec.peer_addresses {
        args.push("--connect".to_string());
        args.push(peer.clone());
    }

    args
}

/// Launches the real node binary as independent child processes
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    verbosity: u8,
    grace: Duration,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, verbosity: u8, grace: Duration) -> Self {
        Self {
            program: program.into(),
            verbosity,
            grace,
        }
    }

    pub fn command(&self, spec: &NodeSpec) -> Command {
        let mut command = Command::new(&self.program);
        command.args(build_args(spec, self.verbosity));
        command
    }

    fn diagnostic_stream(&self, spec: &NodeSpec) -> Result<Stdio> {
        match &spec.log_sink {
            LogSink::Discard => Ok(Stdio::null()),
            LogSink::File(path) => {
                let spawn_failed = |e: std::io::Error| HarnessError::SpawnFailed {
                    index: spec.index,
                    reason: format!("log file {}: {}", path.display(), e),
                };
                if let Some(dir) = path.parent() {
                    fs::create_dir_all(dir).map_err(spawn_failed)?;
                }
                let file = File::create(path).map_err(spawn_failed)?;
                Ok(Stdio::from(file))
            }
        }
    }
}

impl Launcher for ProcessLauncher {
    type Handle = ChildHandle;

    fn launch(&mut self, spec: &NodeSpec) -> Result<ChildHandle> {
        let stderr = self.diagnostic_stream(spec)?;
        let mut command = self.command(spec);

        debug!("node {}: {:?}", spec.index, command);

        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(stderr)
            .spawn()
            .map_err(|e| HarnessError::SpawnFailed {
                index: spec.index,
                reason: format!("{}: {}", self.program.display(), e),
            })?;

        let handle = ChildHandle::new(spec.index, child, self.grace);
        info!(
            "node {} started: pid {} p2p {} api {}",
            spec.index,
            handle.pid(),
            spec.p2p_address,
            spec.api_address
        );

        Ok(handle)
    }
}

/// A spawned node process. Teardown asks it to stop and kills it after the
/// grace period.
#[derive(Debug)]
pub struct ChildHandle {
    index: NodeIndex,
    child: Child,
    grace: Duration,
}

impl ChildHandle {
    pub fn new(index: NodeIndex, child: Child, grace: Duration) -> Self {
        Self {
            index,
            child,
            grace,
        }
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    fn teardown_error(&self, e: impl std::fmt::Display) -> HarnessError {
        HarnessError::Teardown {
            index: self.index,
            reason: e.to_string(),
        }
    }

    fn exited(&mut self) -> Result<bool> {
        match self.child.try_wait() {
            Ok(status) => Ok(status.is_some()),
            Err(e) => Err(self.teardown_error(e)),
        }
    }

    #[cfg(unix)]
    fn request_stop(&mut self) -> Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let pid = Pid::from_raw(self.pid() as i32);
        match kill(pid, Signal::SIGTERM) {
            Ok(()) => Ok(()),
            // exited between the status check and the signal
            Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(self.teardown_error(format!("SIGTERM: {}", e))),
        }
    }

    #[cfg(not(unix))]
    fn request_stop(&mut self) -> Result<()> {
        Ok(())
    }
}

impl ProcessHandle for ChildHandle {
    fn index(&self) -> NodeIndex {
        self.index
    }

    fn terminate(&mut self) -> Result<Termination> {
        if let Some(status) = self.child.try_wait().map_err(|e| self.teardown_error(e))? {
            warn!("node {} exited before teardown: {}", self.index, status);
            return Ok(Termination::from_status(status));
        }

        self.request_stop()?;

        let deadline = Instant::now() + self.grace;
        while Instant::now() < deadline {
            if self.exited()? {
                debug!("node {} stopped", self.index);
                return Ok(Termination::Terminated);
            }
            thread::sleep(EXIT_POLL);
        }

        if self.exited()? {
            return Ok(Termination::Terminated);
        }

        warn!(
            "node {} still running after {:?}, killing",
            self.index, self.grace
        );
        self.child.kill().map_err(|e| self.teardown_error(e))?;
        self.child.wait().map_err(|e| self.teardown_error(e))?;
        Ok(Termination::Killed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mn_topology::{build, BasePorts, TopologyBuilder, TopologyKind};
    use tempfile::TempDir;

    #[test]
    fn test_args_chain() {
        let specs = build(3, TopologyKind::Chain, BasePorts::default()).unwrap();

        assert_eq!(
            build_args(&specs[0], 2),
            vec!["-vv", "--p2p", "127.0.0.1:6000", "--api", "127.0.0.1:7000"]
        );
        assert_eq!(
            build_args(&specs[2], 0),
            vec![
                "--p2p",
                "127.0.0.1:6002",
                "--api",
                "127.0.0.1:7002",
                "--connect",
                "127.0.0.1:6001"
            ]
        );
    }

    #[test]
    fn test_args_fan_in() {
        let specs = build(4, TopologyKind::FanInToLast, BasePorts::default()).unwrap();
        let args = build_args(&specs[3], 1);

        assert_eq!(args[0], "-v");
        assert_eq!(args.iter().filter(|a| *a == "--connect").count(), 3);
    }

    #[test]
    fn test_args_are_not_shell_split() {
        let mut specs = build(1, TopologyKind::Chain, BasePorts::default()).unwrap();
        specs[0].p2p_address = "127.0.0.1:6000; rm -rf /".to_string();

        let args = build_args(&specs[0], 0);
        assert_eq!(args[1], "127.0.0.1:6000; rm -rf /");
    }

    #[test]
    fn test_missing_binary_fails() {
        let specs = build(1, TopologyKind::Chain, BasePorts::default()).unwrap();
        let mut launcher =
            ProcessLauncher::new("/nonexistent/node-binary", 0, Duration::from_millis(100));

        let result = launcher.launch(&specs[0]);
        assert!(matches!(result, Err(HarnessError::SpawnFailed { index: 0, .. })));
    }

    #[test]
    fn test_launch_writes_log_file() {
        let dir = TempDir::new().unwrap();
        let log_dir = dir.path().join("logs");
        let specs = TopologyBuilder::new(TopologyKind::Chain, BasePorts::default())
            .log_dir(Some(log_dir.clone()))
            .build(2)
            .unwrap();

        let mut launcher = ProcessLauncher::new("true", 0, Duration::from_millis(100));
        let mut handle = launcher.launch(&specs[1]).unwrap();
        assert_eq!(handle.index(), 1);
        assert!(log_dir.join("node-1.log").exists());

        thread::sleep(Duration::from_millis(300));
        assert_eq!(handle.terminate().unwrap(), Termination::AlreadyExited(Some(0)));
    }

    #[test]
    fn test_terminate_running_process() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        let mut handle = ChildHandle::new(4, child, Duration::from_secs(2));
        assert_eq!(handle.pid(), pid);

        assert_eq!(handle.terminate().unwrap(), Termination::Terminated);
    }

    #[cfg(unix)]
    #[test]
    fn test_kill_after_grace() {
        let child = Command::new("sh")
            .arg("-c")
            .arg("trap '' TERM; sleep 2")
            .spawn()
            .unwrap();
        thread::sleep(Duration::from_millis(200));

        let mut handle = ChildHandle::new(0, child, Duration::from_millis(100));
        assert_eq!(handle.terminate().unwrap(), Termination::Killed);
    }
}
