//! Virtualization engine capability.
//!
//! The engine actually runs containers (processes, namespaces, VMs). It is
//! outside this crate; drivers talk to it through [`Engine`] handles opened
//! by an [`EngineFactory`].

use crate::container::DriverKind;
use crate::errors::LxboxResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Engine-reported lifecycle state, with the engine's numeric codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
#[repr(i32)]
pub enum EngineState {
    Stopped = 1,
    Starting = 2,
    Running = 3,
    Stopping = 4,
    Aborting = 5,
    Freezing = 6,
    Frozen = 7,
    Thawed = 8,
}

impl EngineState {
    pub fn code(&self) -> i32 {
        *self as i32
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Stopped => "STOPPED",
            EngineState::Starting => "STARTING",
            EngineState::Running => "RUNNING",
            EngineState::Stopping => "STOPPING",
            EngineState::Aborting => "ABORTING",
            EngineState::Freezing => "FREEZING",
            EngineState::Frozen => "FROZEN",
            EngineState::Thawed => "THAWED",
        }
    }

    /// Anything but STOPPED holds engine resources.
    pub fn is_active(&self) -> bool {
        !matches!(self, EngineState::Stopped)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, EngineState::Running)
    }
}

impl From<EngineState> for i32 {
    fn from(state: EngineState) -> Self {
        state.code()
    }
}

impl TryFrom<i32> for EngineState {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Ok(match code {
            1 => EngineState::Stopped,
            2 => EngineState::Starting,
            3 => EngineState::Running,
            4 => EngineState::Stopping,
            5 => EngineState::Aborting,
            6 => EngineState::Freezing,
            7 => EngineState::Frozen,
            8 => EngineState::Thawed,
            other => return Err(format!("unknown engine state code {}", other)),
        })
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time status of a container. Recomputed on every query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub state: String,
    pub state_code: EngineState,
}

impl ContainerStatus {
    pub fn new(state: EngineState) -> Self {
        Self {
            state: state.as_str().to_string(),
            state_code: state,
        }
    }
}

impl From<EngineState> for ContainerStatus {
    fn from(state: EngineState) -> Self {
        Self::new(state)
    }
}

/// Handle on one container inside the engine.
///
/// All calls may block on I/O and are not cancellable.
pub trait Engine: Send + Sync {
    fn name(&self) -> &str;

    /// Start the container, restoring the checkpoint in `restore_from` if given.
    fn start(&self, restore_from: Option<&Path>) -> LxboxResult<()>;

    /// Stop the container, checkpointing into `checkpoint_to` if given.
    fn stop(&self, checkpoint_to: Option<&Path>) -> LxboxResult<()>;

    /// Ask the container to shut down cleanly within `timeout`.
    fn shutdown(&self, timeout: Duration) -> LxboxResult<()>;

    fn state(&self) -> LxboxResult<EngineState>;
}

/// Opens engine handles for containers.
pub trait EngineFactory: Send + Sync {
    /// Open the engine handle for `name`, run by the `kind` driver.
    fn open(&self, name: &str, kind: DriverKind) -> LxboxResult<Box<dyn Engine>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_codes() {
        assert_eq!(EngineState::Stopped.code(), 1);
        assert_eq!(EngineState::Running.code(), 3);
        assert_eq!(EngineState::Thawed.code(), 8);
        assert_eq!(EngineState::try_from(7), Ok(EngineState::Frozen));
        assert!(EngineState::try_from(0).is_err());
    }

    #[test]
    fn test_status_serialization() {
        let status = ContainerStatus::new(EngineState::Running);
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, r#"{"state":"RUNNING","state_code":3}"#);

        let back: ContainerStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
    }

    #[test]
    fn test_is_active() {
        assert!(!EngineState::Stopped.is_active());
        assert!(EngineState::Frozen.is_active());
        assert!(EngineState::Running.is_running());
    }
}
