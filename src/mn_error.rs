use thiserror::Error;

use crate::mn_interface::NodeIndex;

pub type Result<T> = std::result::Result<T, HarnessError>;

/// Errors raised while building or driving a topology run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HarnessError {
    /// Bad topology parameters, raised before anything is spawned
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    /// Bad run configuration, raised before anything is spawned
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A node process could not be started
    #[error("node {index}: spawn failed: {reason}")]
    SpawnFailed { index: NodeIndex, reason: String },

    /// A control call did not succeed
    #[error("node {index}: control request to {address} failed: {reason}")]
    ControlRequestFailed {
        index: NodeIndex,
        address: String,
        reason: String,
    },

    /// A node process could not be stopped
    #[error("node {index}: teardown failed: {reason}")]
    Teardown { index: NodeIndex, reason: String },
}

impl HarnessError {
    /// Configuration errors abort the run; everything else is recorded per node
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            HarnessError::InvalidTopology(_) | HarnessError::InvalidConfig(_)
        )
    }

    pub fn node(&self) -> Option<NodeIndex> {
        match self {
            HarnessError::SpawnFailed { index, .. }
            | HarnessError::ControlRequestFailed { index, .. }
            | HarnessError::Teardown { index, .. } => Some(*index),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_are_fatal() {
        assert!(HarnessError::InvalidTopology("x".into()).is_config());
        assert!(HarnessError::InvalidConfig("x".into()).is_config());
        assert!(!HarnessError::SpawnFailed {
            index: 1,
            reason: "x".into()
        }
        .is_config());
    }

    #[test]
    fn test_display() {
        let err = HarnessError::ControlRequestFailed {
            index: 2,
            address: "127.0.0.1:7002".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(err.node(), Some(2));
        assert_eq!(
            err.to_string(),
            "node 2: control request to 127.0.0.1:7002 failed: connection refused"
        );
    }
}
