//! Refresh hooks: external commands run whenever the coordinator fans out.
//!
//! A trigger never blocks the fan-out. Triggers that arrive while the hook is
//! still running collapse into a single re-run once it exits. A hook still
//! running when the daemon's runtime shuts down is killed.

use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::process::Command;
use tokio::runtime::Handle;

use syncwatch_coordinator::RefreshResult;

#[derive(Debug, Default)]
struct HookState {
    running: bool,
    dirty: bool,
}

#[derive(Debug, Clone)]
pub struct RefreshHook {
    argv: Arc<Vec<String>>,
    state: Arc<Mutex<HookState>>,
    runtime: Handle,
}

impl RefreshHook {
    /// Must be called from within a Tokio runtime; runs are spawned onto it.
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv: Arc::new(argv),
            state: Arc::new(Mutex::new(HookState::default())),
            runtime: Handle::current(),
        }
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    /// Request a run. Called from the coordinator's fan-out.
    pub fn trigger(&self) -> RefreshResult {
        if self.argv.is_empty() {
            return Err("refresh hook has no program".into());
        }
        {
            let mut state = lock(&self.state);
            if state.running {
                state.dirty = true;
                return Ok(());
            }
            state.running = true;
        }

        let argv = Arc::clone(&self.argv);
        let state = Arc::clone(&self.state);
        self.runtime.spawn(async move {
            loop {
                run_once(&argv).await;
                let again = {
                    let mut state = lock(&state);
                    if state.dirty {
                        state.dirty = false;
                        true
                    } else {
                        state.running = false;
                        false
                    }
                };
                if !again {
                    break;
                }
            }
        });
        Ok(())
    }
}

async fn run_once(argv: &[String]) {
    let Some((program, args)) = argv.split_first() else {
        return;
    };
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await;
    match status {
        Ok(status) if status.success() => {
            tracing::debug!(hook = %program, "refresh hook completed");
        }
        Ok(status) => {
            tracing::warn!(hook = %program, status = %status, "refresh hook exited unsuccessfully");
        }
        Err(err) => {
            tracing::warn!(hook = %program, error = %err, "refresh hook could not be spawned");
        }
    }
}

fn lock(state: &Mutex<HookState>) -> MutexGuard<'_, HookState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
