use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Duration, Instant};

use syncwatch_core::{
    ChangeSource, ConfigError, CoordinatorConfig, CoordinatorStatus, LifecyclePhase, LoopState,
};

use crate::error::CheckError;
use crate::subscribers::{RefreshResult, SubscriberRegistry, Subscription};

type CheckFuture = Pin<Box<dyn Future<Output = Result<u64, CheckError>> + Send>>;

#[derive(Debug)]
enum Command {
    SetEnabled(bool),
    SetPhase(LifecyclePhase),
    Close,
}

/// Adaptive polling coordinator.
///
/// Owns one actor task that runs the check loop; this handle only sends it
/// commands, so every public method returns immediately and never fails.
/// Clones share the same actor. Once the last handle is dropped the actor
/// sees its command channel close and shuts down as if closed.
#[derive(Clone)]
pub struct SyncCoordinator {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<CoordinatorStatus>,
    subscribers: Arc<SubscriberRegistry>,
    /// Requested-enabled and not closed. Written here, read by fan-outs.
    live: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl SyncCoordinator {
    /// Validate `config` and spawn the loop actor, disabled.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        source: Arc<dyn ChangeSource>,
        config: CoordinatorConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(CoordinatorStatus::default());
        let subscribers = Arc::new(SubscriberRegistry::default());
        let live = Arc::new(AtomicBool::new(false));

        let actor = CoordinatorActor {
            config,
            source,
            subscribers: Arc::clone(&subscribers),
            live: Arc::clone(&live),
            status: status_tx,
            enabled: false,
            phase: LifecyclePhase::Foreground,
            activity: Activity::Idle,
            last_check: None,
            stats: Stats::default(),
        };
        tokio::spawn(actor.run(commands_rx));

        Ok(Self {
            commands: commands_tx,
            status: status_rx,
            subscribers,
            live,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Turn the loop on or off. Turning it on while on is a no-op; turning it
    /// off cancels the armed timer and lets an in-flight check finish quietly.
    pub fn set_enabled(&self, enabled: bool) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.live.store(enabled, Ordering::Release);
        self.send(Command::SetEnabled(enabled));
    }

    /// Report a host visibility change. Returning to the foreground forces a
    /// prompt re-check when the loop is enabled and idle.
    pub fn set_lifecycle_phase(&self, phase: LifecyclePhase) {
        self.send(Command::SetPhase(phase));
    }

    /// Register a refresh callback, invoked once per detected-change event.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() -> RefreshResult + Send + Sync + 'static,
    {
        self.subscribers.insert(Box::new(callback))
    }

    /// Tear down: cancel timers and any in-flight check, drop every
    /// subscription, stop the actor. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.live.store(false, Ordering::Release);
        self.subscribers.close();
        self.send(Command::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Latest published snapshot.
    pub fn status(&self) -> CoordinatorStatus {
        let mut status = self.status.borrow().clone();
        status.subscribers = self.subscribers.len();
        status
    }

    /// Receiver that observes every published snapshot.
    pub fn watch_status(&self) -> watch::Receiver<CoordinatorStatus> {
        self.status.clone()
    }

    /// Wait until the actor has published its final, closed snapshot.
    pub async fn closed(&self) {
        let mut status = self.status.clone();
        let _ = status
            .wait_for(|status| status.state == LoopState::Closed)
            .await;
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::trace!("coordinator actor already stopped");
        }
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// What the loop is doing right now. Exactly one of: nothing, waiting on a
/// timer, or waiting on a check, so a second concurrent check is
/// unrepresentable.
enum Activity {
    Idle,
    Scheduled { at: Instant },
    Checking { check: CheckFuture },
}

enum Event {
    Command(Command),
    TimerFired,
    CheckFinished(Result<u64, CheckError>),
}

#[derive(Debug, Default)]
struct Stats {
    checks: u64,
    changes_detected: u64,
    notifications: u64,
    failures: u64,
    consecutive_failures: u64,
    last_error: Option<String>,
    last_check_at: Option<chrono::DateTime<Utc>>,
}

struct CoordinatorActor {
    config: CoordinatorConfig,
    source: Arc<dyn ChangeSource>,
    subscribers: Arc<SubscriberRegistry>,
    live: Arc<AtomicBool>,
    status: watch::Sender<CoordinatorStatus>,
    enabled: bool,
    phase: LifecyclePhase,
    activity: Activity,
    last_check: Option<Instant>,
    stats: Stats,
}

impl CoordinatorActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        tracing::debug!("sync coordinator started");
        self.publish(false);

        loop {
            // Commands first: a disable or close that is already queued must win
            // against a timer that expired at the same instant.
            let event = tokio::select! {
                biased;
                command = commands.recv() => Event::Command(command.unwrap_or(Command::Close)),
                event = next_wake(&mut self.activity) => event,
            };

            match event {
                Event::Command(Command::Close) => break,
                Event::Command(Command::SetEnabled(enabled)) => self.on_set_enabled(enabled),
                Event::Command(Command::SetPhase(phase)) => self.on_set_phase(phase),
                Event::TimerFired => self.on_timer(),
                Event::CheckFinished(outcome) => self.on_check_finished(outcome),
            }
            self.publish(false);
        }

        // Drops an in-flight check future, cancelling it.
        self.activity = Activity::Idle;
        self.enabled = false;
        self.live.store(false, Ordering::Release);
        self.subscribers.close();
        self.publish(true);
        tracing::debug!("sync coordinator closed");
    }

    fn on_set_enabled(&mut self, enabled: bool) {
        if enabled == self.enabled {
            return;
        }
        self.enabled = enabled;

        if enabled {
            tracing::info!("sync polling enabled");
            match self.activity {
                Activity::Idle => self.arm(self.config.settle_delay(), "settle"),
                // The in-flight check reschedules itself when it completes.
                Activity::Checking { .. } | Activity::Scheduled { .. } => {}
            }
        } else {
            tracing::info!("sync polling disabled");
            if let Activity::Scheduled { .. } = self.activity {
                self.activity = Activity::Idle;
            }
        }
    }

    fn on_set_phase(&mut self, phase: LifecyclePhase) {
        if phase == self.phase {
            return;
        }
        let previous = std::mem::replace(&mut self.phase, phase);
        tracing::debug!(from = %previous, to = %phase, "lifecycle phase changed");

        if phase == LifecyclePhase::Foreground
            && self.enabled
            && !matches!(self.activity, Activity::Checking { .. })
        {
            self.arm(self.config.resume_delay(), "resume");
        }
    }

    fn on_timer(&mut self) {
        self.activity = Activity::Idle;
        if !self.enabled {
            return;
        }

        // Overlap guard. An in-flight check cannot coexist with an armed timer,
        // so only the lifecycle half of the guard can trip here.
        if !self.may_check() {
            tracing::trace!(phase = %self.phase, "check deferred while backgrounded");
            self.arm(self.config.retry_delay(), "retry");
            return;
        }

        // Throttle guard.
        let now = Instant::now();
        if let Some(last) = self.last_check {
            let earliest = last + self.config.min_check_interval();
            if now < earliest {
                self.arm(earliest - now, "throttle");
                return;
            }
        }

        self.start_check(now);
    }

    fn start_check(&mut self, now: Instant) {
        self.last_check = Some(now);
        self.stats.last_check_at = Some(Utc::now());
        self.stats.checks = self.stats.checks.saturating_add(1);

        let source = Arc::clone(&self.source);
        let timeout = self.config.check_timeout();
        tracing::debug!(check = self.stats.checks, "checking for remote changes");

        self.activity = Activity::Checking {
            check: Box::pin(async move {
                match tokio::time::timeout(timeout, source.check_for_remote_changes()).await {
                    Ok(Ok(count)) => Ok(count),
                    Ok(Err(err)) => Err(CheckError::Failed(err)),
                    Err(_) => Err(CheckError::Timeout { after: timeout }),
                }
            }),
        };
    }

    fn on_check_finished(&mut self, outcome: Result<u64, CheckError>) {
        self.activity = Activity::Idle;

        match outcome {
            Ok(count) => {
                self.stats.consecutive_failures = 0;
                if count > 0 {
                    self.stats.changes_detected = self.stats.changes_detected.saturating_add(count);
                    if self.enabled {
                        tracing::info!(changes = count, "remote changes detected");
                        self.notify();
                    } else {
                        tracing::debug!(changes = count, "changes detected after disable; not notifying");
                    }
                }
            }
            Err(err) => {
                self.stats.failures = self.stats.failures.saturating_add(1);
                self.stats.consecutive_failures = self.stats.consecutive_failures.saturating_add(1);
                self.stats.last_error = Some(err.to_string());
                tracing::warn!(
                    error = %err,
                    consecutive = self.stats.consecutive_failures,
                    "remote change check failed",
                );
            }
        }

        if self.enabled {
            let cadence = self.cadence();
            self.arm(cadence, "cadence");
        }
    }

    /// Fan out on a separate task so the loop's own bookkeeping never waits
    /// on subscribers.
    fn notify(&mut self) {
        self.stats.notifications = self.stats.notifications.saturating_add(1);
        let subscribers = Arc::clone(&self.subscribers);
        let live = Arc::clone(&self.live);
        let event = self.stats.notifications;
        tokio::spawn(async move {
            if !live.load(Ordering::Acquire) {
                tracing::debug!(event, "fan-out skipped; coordinator disabled");
                return;
            }
            let report = subscribers.fan_out();
            for failure in &report.failures {
                tracing::warn!(error = %failure, event, "refresh subscriber failed");
            }
            tracing::debug!(
                event,
                delivered = report.delivered,
                failed = report.failures.len(),
                "refresh fan-out finished",
            );
        });
    }

    fn may_check(&self) -> bool {
        self.phase == LifecyclePhase::Foreground || self.config.poll_in_background
    }

    fn cadence(&self) -> Duration {
        match self.phase {
            LifecyclePhase::Foreground => self.config.foreground_interval(),
            LifecyclePhase::Background => self.config.background_interval(),
        }
    }

    /// Replace whatever timer is armed. Callers only reach this while enabled.
    fn arm(&mut self, delay: Duration, reason: &'static str) {
        debug_assert!(self.enabled);
        tracing::trace!(delay_ms = delay.as_millis() as u64, reason, "next step armed");
        self.activity = Activity::Scheduled {
            at: Instant::now() + delay,
        };
    }

    fn publish(&self, closed: bool) {
        let (state, next_run_in_ms) = if closed {
            (LoopState::Closed, None)
        } else {
            match &self.activity {
                Activity::Idle => (LoopState::Idle, None),
                Activity::Scheduled { at } => (
                    LoopState::Scheduled,
                    Some(at.saturating_duration_since(Instant::now()).as_millis() as u64),
                ),
                Activity::Checking { .. } => (LoopState::Checking, None),
            }
        };

        self.status.send_replace(CoordinatorStatus {
            enabled: self.enabled,
            phase: self.phase,
            state,
            next_run_in_ms,
            last_check_at: self.stats.last_check_at,
            checks: self.stats.checks,
            changes_detected: self.stats.changes_detected,
            notifications: self.stats.notifications,
            failures: self.stats.failures,
            consecutive_failures: self.stats.consecutive_failures,
            last_error: self.stats.last_error.clone(),
            subscribers: self.subscribers.len(),
        });
    }
}

/// Resolve when the current activity needs attention. Cancel-safe: the check
/// future stays pinned inside `activity` between polls.
async fn next_wake(activity: &mut Activity) -> Event {
    match activity {
        Activity::Idle => std::future::pending().await,
        Activity::Scheduled { at } => {
            sleep_until(*at).await;
            Event::TimerFired
        }
        Activity::Checking { check } => Event::CheckFinished(check.as_mut().await),
    }
}
