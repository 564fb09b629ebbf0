//! Container run state and per-child status types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::spec::ChildRole;

/// Aggregate liveness of the launcher's children.
///
/// Created once per container start and torn down when the entrypoint
/// returns; never persisted across restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// Not all spawn requests issued yet.
    #[default]
    Starting,
    /// Both children alive.
    Running,
    /// One child down, the other still alive.
    Degraded,
    /// All children terminal.
    Stopped,
}

impl RunState {
    /// Derive the aggregate state from the tracked child statuses.
    pub fn aggregate<'a>(children: impl IntoIterator<Item = &'a ChildStatus>) -> RunState {
        let mut pending = 0usize;
        let mut running = 0usize;
        let mut terminal = 0usize;

        for status in children {
            match status {
                ChildStatus::Pending => pending += 1,
                ChildStatus::Running { .. } => running += 1,
                ChildStatus::Exited { .. } | ChildStatus::SpawnFailed { .. } => terminal += 1,
            }
        }

        if running == 0 && terminal == 0 {
            RunState::Starting
        } else if pending > 0 {
            RunState::Starting
        } else if terminal == 0 {
            RunState::Running
        } else if running == 0 {
            RunState::Stopped
        } else {
            RunState::Degraded
        }
    }
}

/// Status of one tracked child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChildStatus {
    /// Spawn not requested yet.
    Pending,
    Running {
        pid: u32,
    },
    /// Reaped. `code` is present for normal exits, `signal` for
    /// signal-terminated ones.
    Exited {
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        signal: Option<i32>,
    },
    /// The operating system rejected the spawn request.
    SpawnFailed {
        error: String,
    },
}

impl ChildStatus {
    /// Terminal status for a reaped child.
    pub fn exited(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        ChildStatus::Exited {
            code: status.code(),
            signal,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChildStatus::Exited { .. } | ChildStatus::SpawnFailed { .. }
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ChildStatus::Running { .. })
    }

    pub fn pid(&self) -> Option<u32> {
        match self {
            ChildStatus::Running { pid } => Some(*pid),
            _ => None,
        }
    }
}

/// One spawn request, recorded in request order.
///
/// Recorded even when the spawn fails, so start ordering stays observable
/// independently of spawn success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnEvent {
    pub role: ChildRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub at: DateTime<Utc>,
}

/// Aggregate status surface for callers of the supervisor.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state: RunState,
    pub server: ChildStatus,
    pub worker: ChildStatus,
    pub version: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exited(code: i32) -> ChildStatus {
        ChildStatus::Exited {
            code: Some(code),
            signal: None,
        }
    }

    fn running() -> ChildStatus {
        ChildStatus::Running { pid: 42 }
    }

    #[test]
    fn aggregate_empty_is_starting() {
        assert_eq!(RunState::aggregate([]), RunState::Starting);
    }

    #[test]
    fn aggregate_pending_is_starting() {
        assert_eq!(
            RunState::aggregate([&ChildStatus::Pending, &running()]),
            RunState::Starting
        );
    }

    #[test]
    fn aggregate_all_running() {
        assert_eq!(
            RunState::aggregate([&running(), &running()]),
            RunState::Running
        );
    }

    #[test]
    fn aggregate_one_down_is_degraded() {
        assert_eq!(
            RunState::aggregate([&exited(1), &running()]),
            RunState::Degraded
        );
    }

    #[test]
    fn aggregate_spawn_failure_counts_as_down() {
        let failed = ChildStatus::SpawnFailed {
            error: "no such file".to_string(),
        };
        assert_eq!(RunState::aggregate([&failed, &running()]), RunState::Degraded);
    }

    #[test]
    fn aggregate_all_terminal_is_stopped() {
        assert_eq!(
            RunState::aggregate([&exited(0), &exited(137)]),
            RunState::Stopped
        );
    }

    #[test]
    fn run_state_serializes_screaming_snake_case() {
        insta::assert_json_snapshot!(RunState::Starting, @r#""STARTING""#);
        insta::assert_json_snapshot!(RunState::Degraded, @r#""DEGRADED""#);
        insta::assert_json_snapshot!(RunState::Stopped, @r#""STOPPED""#);
    }

    #[test]
    fn run_state_deserializes_screaming_snake_case() {
        assert_eq!(
            serde_json::from_str::<RunState>("\"DEGRADED\"").unwrap(),
            RunState::Degraded
        );
        assert_eq!(
            serde_json::from_str::<RunState>("\"RUNNING\"").unwrap(),
            RunState::Running
        );
    }

    #[test]
    fn child_status_serializes_with_status_tag() {
        let status = ChildStatus::Running { pid: 42 };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            serde_json::json!({"status": "running", "pid": 42})
        );

        let status = exited(1);
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            serde_json::json!({"status": "exited", "code": 1})
        );
    }

    #[test]
    fn terminal_states() {
        assert!(!ChildStatus::Pending.is_terminal());
        assert!(!running().is_terminal());
        assert!(exited(0).is_terminal());
        assert!(
            ChildStatus::SpawnFailed {
                error: String::new()
            }
            .is_terminal()
        );
    }

    #[cfg(unix)]
    #[test]
    fn exited_maps_code_and_signal() {
        use std::os::unix::process::ExitStatusExt;
        use std::process::ExitStatus;

        // Wait-status encoding: exit code in the high byte, signal in the low.
        let clean = ExitStatus::from_raw(0x0100);
        assert_eq!(
            ChildStatus::exited(clean),
            ChildStatus::Exited {
                code: Some(1),
                signal: None
            }
        );

        let terminated = ExitStatus::from_raw(15);
        assert_eq!(
            ChildStatus::exited(terminated),
            ChildStatus::Exited {
                code: None,
                signal: Some(15)
            }
        );
    }
}
