//! YAML configuration for the coordinator and the daemon host.
//!
//! # Storage layout
//!
//! ```text
//! ~/.syncwatch/
//!   config.yaml   (mode 0600; absent means "all defaults")
//! ```
//!
//! # API pattern
//!
//! Every function touching disk has two forms:
//! - `fn_at(home: &Path, …)`: explicit home, used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};

pub const CONFIG_FILE: &str = "config.yaml";

// ---------------------------------------------------------------------------
// 1. Coordinator tuning
// ---------------------------------------------------------------------------

/// Timing parameters of the adaptive check loop.
///
/// The defaults are tuned values, not invariants; every one of them can be
/// overridden from the `coordinator:` section of `config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Delay between enabling and the first loop step.
    pub settle_delay_ms: u64,

    /// Delay before re-evaluating when a check is in flight or the host is
    /// backgrounded.
    pub retry_delay_ms: u64,

    /// Floor between the starts of two consecutive checks.
    pub min_check_interval_ms: u64,

    /// Cadence after a cycle while the host is in the foreground.
    pub foreground_interval_ms: u64,

    /// Cadence after a cycle while the host is in the background.
    pub background_interval_ms: u64,

    /// Upper bound on a single remote check.
    pub check_timeout_ms: u64,

    /// Delay before the re-check forced by a return to the foreground.
    pub resume_delay_ms: u64,

    /// Keep checking (at the background cadence) while backgrounded.
    pub poll_in_background: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 1_000,
            retry_delay_ms: 1_000,
            min_check_interval_ms: 2_000,
            foreground_interval_ms: 2_500,
            background_interval_ms: 10_000,
            check_timeout_ms: 5_000,
            resume_delay_ms: 100,
            poll_in_background: false,
        }
    }
}

impl CoordinatorConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn min_check_interval(&self) -> Duration {
        Duration::from_millis(self.min_check_interval_ms)
    }

    pub fn foreground_interval(&self) -> Duration {
        Duration::from_millis(self.foreground_interval_ms)
    }

    pub fn background_interval(&self) -> Duration {
        Duration::from_millis(self.background_interval_ms)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }

    pub fn resume_delay(&self) -> Duration {
        Duration::from_millis(self.resume_delay_ms)
    }

    /// Reject values that would turn the loop into a busy spin or make every
    /// check fail immediately.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("retry_delay_ms", self.retry_delay_ms),
            ("foreground_interval_ms", self.foreground_interval_ms),
            ("background_interval_ms", self.background_interval_ms),
            ("check_timeout_ms", self.check_timeout_ms),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{field} must be greater than 0")));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 2. Daemon host
// ---------------------------------------------------------------------------

/// Everything `syncwatch daemon start` needs: loop tuning plus the commands
/// that stand in for the sync extension and the refresh consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub coordinator: CoordinatorConfig,

    /// argv of the remote-change check; must print a change count on stdout.
    pub check_command: Vec<String>,

    /// argv that pushes local changes upstream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_command: Option<Vec<String>>,

    /// One argv per refresh consumer, spawned on every detected change.
    pub refresh_hooks: Vec<Vec<String>>,

    /// Enable the coordinator as soon as the daemon starts.
    pub start_enabled: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            check_command: Vec::new(),
            send_command: None,
            refresh_hooks: Vec::new(),
            start_enabled: true,
        }
    }
}

impl DaemonConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.coordinator.validate()?;
        if self.check_command.is_empty() {
            return Err(ConfigError::Invalid(
                "check_command must name a program".to_string(),
            ));
        }
        if matches!(&self.send_command, Some(argv) if argv.is_empty()) {
            return Err(ConfigError::Invalid(
                "send_command must name a program when present".to_string(),
            ));
        }
        if let Some(index) = self.refresh_hooks.iter().position(Vec::is_empty) {
            return Err(ConfigError::Invalid(format!(
                "refresh_hooks[{index}] must name a program"
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 3. Paths
// ---------------------------------------------------------------------------

/// `<home>/.syncwatch/`
pub fn syncwatch_root(home: &Path) -> PathBuf {
    home.join(".syncwatch")
}

/// `<home>/.syncwatch/config.yaml`. Pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    syncwatch_root(home).join(CONFIG_FILE)
}

// ---------------------------------------------------------------------------
// 4. Load / save
// ---------------------------------------------------------------------------

/// Load `<home>/.syncwatch/config.yaml`, falling back to defaults when absent.
///
/// Returns `ConfigError::Parse` (with path + line context) on malformed YAML.
/// The result is not validated; callers decide which checks apply.
pub fn load_config_at(home: &Path) -> Result<DaemonConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(DaemonConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    if contents.trim().is_empty() {
        return Ok(DaemonConfig::default());
    }
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
}

/// `load_config_at` convenience wrapper.
pub fn load_config() -> Result<DaemonConfig, ConfigError> {
    load_config_at(&home()?)
}

/// Write flow: serialize → `config.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_config_at(home: &Path, config: &DaemonConfig) -> Result<PathBuf, ConfigError> {
    let root = syncwatch_root(home);
    if !root.exists() {
        std::fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
        set_dir_permissions(&root)?;
    }
    let path = config_path_at(home);
    let tmp_path = path.with_file_name(format!("{CONFIG_FILE}.tmp"));

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml).map_err(|e| io_err(&tmp_path, e))?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path).map_err(|e| io_err(&path, e))?;
    Ok(path)
}

/// `save_config_at` convenience wrapper.
pub fn save_config(config: &DaemonConfig) -> Result<PathBuf, ConfigError> {
    save_config_at(&home()?, config)
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
