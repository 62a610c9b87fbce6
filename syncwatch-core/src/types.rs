//! Domain types shared by the coordinator, the daemon and the CLI.
//!
//! All types serialize with serde so the daemon can hand them straight to the
//! JSON socket protocol.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Lifecycle phase
// ---------------------------------------------------------------------------

/// Host application visibility. Drives the polling cadence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    #[default]
    Foreground,
    Background,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Foreground => "foreground",
            Self::Background => "background",
        };
        f.write_str(s)
    }
}

impl FromStr for LifecyclePhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "foreground" | "active" => Ok(Self::Foreground),
            "background" | "inactive" => Ok(Self::Background),
            other => Err(format!(
                "unknown lifecycle phase '{other}'; expected: foreground, background"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Loop state
// ---------------------------------------------------------------------------

/// Coarse state of the adaptive check loop, as reported in status snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    /// Nothing armed and nothing in flight.
    #[default]
    Idle,
    /// A timer is armed for the next step.
    Scheduled,
    /// A bounded check is in flight.
    Checking,
    /// Torn down; accepts no more work.
    Closed,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Scheduled => "scheduled",
            Self::Checking => "checking",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Status snapshot
// ---------------------------------------------------------------------------

/// Point-in-time view of a coordinator, published after every state transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub enabled: bool,
    pub phase: LifecyclePhase,
    pub state: LoopState,
    /// Milliseconds until the armed timer fires, when `state == Scheduled`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_in_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check_at: Option<DateTime<Utc>>,
    /// Checks started (successful, failed and timed out).
    pub checks: u64,
    /// Sum of all positive change counts reported.
    pub changes_detected: u64,
    /// Fan-outs started.
    pub notifications: u64,
    /// Failed or timed-out checks.
    pub failures: u64,
    pub consecutive_failures: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub subscribers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_parses_host_aliases() {
        assert_eq!("active".parse::<LifecyclePhase>(), Ok(LifecyclePhase::Foreground));
        assert_eq!("Background".parse::<LifecyclePhase>(), Ok(LifecyclePhase::Background));
        let err = "paused".parse::<LifecyclePhase>().unwrap_err();
        assert!(err.contains("paused"));
    }

    #[test]
    fn status_omits_empty_optionals() {
        let yaml = to_yaml(&CoordinatorStatus::default());
        assert!(!yaml.contains("last_error"));
        assert!(!yaml.contains("next_run_in_ms"));
        assert!(yaml.contains("state: idle"));
        assert!(yaml.contains("phase: foreground"));
    }

    fn to_yaml(status: &CoordinatorStatus) -> String {
        serde_yaml::to_string(status).expect("serialize status")
    }
}
