use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use syncwatch_core::config::save_config_at;
use syncwatch_core::{CoordinatorConfig, DaemonConfig};

fn syncwatch_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_syncwatch") {
        return PathBuf::from(path);
    }
    PathBuf::from(assert_cmd::cargo::cargo_bin!("syncwatch"))
}

fn syncwatch(binary: &Path, home: &Path, args: &[&str]) -> std::process::Output {
    Command::new(binary)
        .env("HOME", home)
        .env("USERPROFILE", home)
        .args(args)
        .output()
        .expect("run syncwatch")
}

struct DaemonProcess {
    child: Child,
    binary: PathBuf,
    home: PathBuf,
}

impl DaemonProcess {
    fn start(binary: PathBuf, home: PathBuf) -> Self {
        let child = Command::new(&binary)
            .env("HOME", &home)
            .env("USERPROFILE", &home)
            .args(["daemon", "start", "--log-json"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon");

        Self {
            child,
            binary,
            home,
        }
    }

    fn stop(&mut self) {
        let _ = syncwatch(&self.binary, &self.home, &["daemon", "stop"]);

        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            sleep(Duration::from_millis(50));
        }

        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

fn status(binary: &Path, home: &Path) -> Option<serde_json::Value> {
    let output = syncwatch(binary, home, &["daemon", "status"]);
    if !output.status.success() {
        return None;
    }
    serde_json::from_slice(&output.stdout).ok()
}

fn wait_for(what: &str, timeout: Duration, mut pred: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return;
        }
        sleep(Duration::from_millis(50));
    }
    panic!("timed out waiting for {what}");
}

#[test]
fn daemon_polls_runs_hooks_and_obeys_controls() {
    let home = TempDir::new().expect("home");
    let hook_log = home.path().join("refresh.log");

    let config = DaemonConfig {
        coordinator: CoordinatorConfig {
            settle_delay_ms: 50,
            min_check_interval_ms: 100,
            foreground_interval_ms: 200,
            ..CoordinatorConfig::default()
        },
        check_command: vec!["sh".into(), "-c".into(), "echo 1".into()],
        send_command: Some(vec!["true".into()]),
        refresh_hooks: vec![vec![
            "sh".into(),
            "-c".into(),
            format!("echo refreshed >> '{}'", hook_log.display()),
        ]],
        start_enabled: true,
    };
    save_config_at(home.path(), &config).expect("save config");

    let binary = syncwatch_bin_path();
    let mut daemon = DaemonProcess::start(binary.clone(), home.path().to_path_buf());

    wait_for("daemon status", Duration::from_secs(5), || {
        status(&binary, home.path()).is_some_and(|s| s["running"] == true)
    });
    wait_for("refresh hook output", Duration::from_secs(5), || {
        std::fs::read_to_string(&hook_log)
            .map(|s| s.lines().count() >= 1)
            .unwrap_or(false)
    });

    let send = syncwatch(&binary, home.path(), &["send"]);
    assert!(send.status.success(), "send failed: {send:?}");

    let disable = syncwatch(&binary, home.path(), &["disable"]);
    assert!(disable.status.success(), "disable failed: {disable:?}");
    let phase = syncwatch(&binary, home.path(), &["phase", "background"]);
    assert!(phase.status.success(), "phase failed: {phase:?}");

    wait_for("disabled + background", Duration::from_secs(5), || {
        status(&binary, home.path()).is_some_and(|s| {
            s["coordinator"]["enabled"] == false && s["coordinator"]["phase"] == "background"
        })
    });
    let snapshot = status(&binary, home.path()).expect("status");
    assert!(snapshot["coordinator"]["notifications"].as_u64().unwrap_or(0) >= 1);
    assert_eq!(snapshot["coordinator"]["subscribers"], 1);

    daemon.stop();
    assert!(
        !home.path().join(".syncwatch").join("daemon.sock").exists(),
        "socket removed after stop"
    );
}
