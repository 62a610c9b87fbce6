//! Refresh-callback registry.
//!
//! Callbacks are keyed by an opaque [`SubscriptionId`]; removal never compares
//! closures. A fan-out walks a snapshot taken when it starts, so callbacks may
//! subscribe or unsubscribe (themselves or others) while it runs.
//!
//! Each slot carries a gate held for the duration of its invocation. Removing
//! a slot from outside a fan-out waits on that gate, so once
//! [`Subscription::unsubscribe`] returns the callback is neither running nor
//! going to run again. Removal from inside a callback skips the wait.

use std::any::Any;
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::error::SubscriberError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// What a refresh callback returns. `Err` is reported and isolated.
pub type RefreshResult = Result<(), BoxError>;

type Callback = Box<dyn Fn() -> RefreshResult + Send + Sync>;

/// Opaque handle identifying one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

thread_local! {
    static FANOUT_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Marks the current thread as running a subscriber callback.
struct InCallback;

impl InCallback {
    fn enter() -> Self {
        FANOUT_DEPTH.with(|depth| depth.set(depth.get() + 1));
        InCallback
    }

    fn active() -> bool {
        FANOUT_DEPTH.with(|depth| depth.get() > 0)
    }
}

impl Drop for InCallback {
    fn drop(&mut self) {
        FANOUT_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

struct Slot {
    id: SubscriptionId,
    callback: Callback,
    removed: AtomicBool,
    gate: Mutex<()>,
}

impl Slot {
    fn retire(&self) {
        self.removed.store(true, Ordering::Release);
        if !InCallback::active() {
            drop(lock(&self.gate));
        }
    }
}

/// Outcome of one fan-out pass.
#[derive(Debug, Default)]
pub(crate) struct FanOutReport {
    pub delivered: usize,
    pub failures: Vec<SubscriberError>,
}

#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    next_id: AtomicU64,
    slots: Mutex<HashMap<SubscriptionId, Arc<Slot>>>,
    closed: AtomicBool,
}

impl SubscriberRegistry {
    pub(crate) fn insert(self: &Arc<Self>, callback: Callback) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscription = Subscription {
            id,
            registry: Arc::downgrade(self),
        };
        if self.closed.load(Ordering::Acquire) {
            tracing::debug!(subscription = %id, "subscribe after close ignored");
            return subscription;
        }
        let slot = Arc::new(Slot {
            id,
            callback,
            removed: AtomicBool::new(false),
            gate: Mutex::new(()),
        });
        lock(&self.slots).insert(id, slot);
        subscription
    }

    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        // Taken out under the map lock, retired and dropped after it: dropping
        // a callback may drop a `Subscription`, which re-enters `remove`.
        let removed = lock(&self.slots).remove(&id);
        match removed {
            Some(slot) => {
                slot.retire();
                tracing::trace!(subscription = %id, "subscriber removed");
                true
            }
            None => false,
        }
    }

    /// Release every registration and refuse new ones.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let drained: Vec<Arc<Slot>> = lock(&self.slots).drain().map(|(_, slot)| slot).collect();
        for slot in &drained {
            slot.retire();
        }
        drop(drained);
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    /// Invoke every callback registered right now, once, in registration order.
    pub(crate) fn fan_out(&self) -> FanOutReport {
        let mut snapshot: Vec<Arc<Slot>> = lock(&self.slots).values().cloned().collect();
        snapshot.sort_by_key(|slot| slot.id);

        let mut report = FanOutReport::default();
        for slot in &snapshot {
            if self.closed.load(Ordering::Acquire) {
                break;
            }
            let _gate = lock(&slot.gate);
            if slot.removed.load(Ordering::Acquire) {
                continue;
            }
            let _in_callback = InCallback::enter();
            match catch_unwind(AssertUnwindSafe(|| (slot.callback)())) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(err)) => report.failures.push(SubscriberError::Failed {
                    id: slot.id,
                    message: err.to_string(),
                }),
                Err(payload) => report.failures.push(SubscriberError::Panicked {
                    id: slot.id,
                    message: panic_message(payload.as_ref()),
                }),
            }
        }
        report
    }
}

/// A live registration. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: SubscriptionId,
    registry: Weak<SubscriberRegistry>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the callback. Safe to call repeatedly and from inside any
    /// refresh callback, including this one.
    pub fn unsubscribe(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Barrier, OnceLock};
    use std::thread;
    use std::time::Duration;

    fn counting(counter: &Arc<AtomicUsize>) -> Callback {
        let counter = Arc::clone(counter);
        Box::new(move || -> RefreshResult {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn each_registered_callback_runs_once_per_fan_out() {
        let registry = Arc::new(SubscriberRegistry::default());
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let _sa = registry.insert(counting(&a));
        let _sb = registry.insert(counting(&b));

        let report = registry.fan_out();
        assert_eq!(report.delivered, 2);
        assert!(report.failures.is_empty());
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent_and_drop_unsubscribes() {
        let registry = Arc::new(SubscriberRegistry::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let sub = registry.insert(counting(&hits));
        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(registry.len(), 0);

        {
            let _scoped = registry.insert(counting(&hits));
            assert_eq!(registry.len(), 1);
        }
        assert_eq!(registry.len(), 0);
        registry.fan_out();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failing_and_panicking_callbacks_do_not_starve_siblings() {
        let registry = Arc::new(SubscriberRegistry::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let _bad = registry.insert(Box::new(|| -> RefreshResult { Err("store locked".into()) }));
        let _boom = registry.insert(Box::new(|| -> RefreshResult { panic!("render thread gone") }));
        let _good = registry.insert(counting(&hits));

        let report = registry.fan_out();
        assert_eq!(report.delivered, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(report.failures.len(), 2);
        assert!(matches!(report.failures[0], SubscriberError::Failed { .. }));
        match &report.failures[1] {
            SubscriberError::Panicked { message, .. } => {
                assert!(message.contains("render thread gone"))
            }
            other => panic!("expected panic failure, got {other:?}"),
        }
    }

    #[test]
    fn callback_can_unsubscribe_itself_mid_fan_out() {
        let registry = Arc::new(SubscriberRegistry::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let own: Arc<OnceLock<Subscription>> = Arc::new(OnceLock::new());

        let sub = {
            let own = Arc::clone(&own);
            let hits = Arc::clone(&hits);
            registry.insert(Box::new(move || -> RefreshResult {
                hits.fetch_add(1, Ordering::SeqCst);
                if let Some(me) = own.get() {
                    me.unsubscribe();
                }
                Ok(())
            }))
        };
        own.set(sub).expect("set once");

        registry.fan_out();
        registry.fan_out();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn callback_removing_a_later_sibling_prevents_its_invocation() {
        let registry = Arc::new(SubscriberRegistry::default());
        let later_hits = Arc::new(AtomicUsize::new(0));
        let later_slot: Arc<OnceLock<Subscription>> = Arc::new(OnceLock::new());

        let _first = {
            let later_slot = Arc::clone(&later_slot);
            registry.insert(Box::new(move || -> RefreshResult {
                if let Some(later) = later_slot.get() {
                    later.unsubscribe();
                }
                Ok(())
            }))
        };
        later_slot
            .set(registry.insert(counting(&later_hits)))
            .expect("set once");

        let report = registry.fan_out();
        assert_eq!(report.delivered, 1);
        assert_eq!(later_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn subscribing_during_fan_out_waits_for_the_next_event() {
        let registry = Arc::new(SubscriberRegistry::default());
        let late_hits = Arc::new(AtomicUsize::new(0));
        let held: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(Vec::new()));

        let _adder = {
            let inner = Arc::clone(&registry);
            let late_hits = Arc::clone(&late_hits);
            let held = Arc::clone(&held);
            registry.insert(Box::new(move || -> RefreshResult {
                let mut held = lock(&held);
                if held.is_empty() {
                    held.push(inner.insert(counting(&late_hits)));
                }
                Ok(())
            }))
        };

        registry.fan_out();
        assert_eq!(late_hits.load(Ordering::SeqCst), 0);
        registry.fan_out();
        assert_eq!(late_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_from_another_thread_waits_for_running_callback() {
        let registry = Arc::new(SubscriberRegistry::default());
        let entered = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        let hits = Arc::new(AtomicUsize::new(0));
        let exited = Arc::new(AtomicBool::new(false));

        let sub = {
            let entered = Arc::clone(&entered);
            let release = Arc::clone(&release);
            let hits = Arc::clone(&hits);
            let exited = Arc::clone(&exited);
            registry.insert(Box::new(move || -> RefreshResult {
                hits.fetch_add(1, Ordering::SeqCst);
                entered.wait();
                release.wait();
                exited.store(true, Ordering::SeqCst);
                Ok(())
            }))
        };

        let fan_out = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.fan_out().delivered)
        };
        entered.wait();

        let unsubscriber = {
            let exited = Arc::clone(&exited);
            thread::spawn(move || {
                sub.unsubscribe();
                exited.load(Ordering::SeqCst)
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(
            !unsubscriber.is_finished(),
            "unsubscribe returned while the callback was still running"
        );

        release.wait();
        assert!(
            unsubscriber.join().expect("unsubscriber"),
            "unsubscribe returned before the callback exited"
        );
        assert_eq!(fan_out.join().expect("fan-out"), 1);

        assert_eq!(registry.fan_out().delivered, 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_releases_everything_and_rejects_new_subscribers() {
        let registry = Arc::new(SubscriberRegistry::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let _a = registry.insert(counting(&hits));
        registry.close();
        let _b = registry.insert(counting(&hits));

        assert_eq!(registry.len(), 0);
        assert_eq!(registry.fan_out().delivered, 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
