//! # syncwatch-coordinator
//!
//! Adaptive change-detection polling.
//!
//! [`SyncCoordinator::spawn`] starts a disabled loop around a
//! [`ChangeSource`](syncwatch_core::ChangeSource). Once enabled it asks the
//! source for remote changes on a lifecycle-aware cadence, never runs two
//! checks at once, bounds each check with a timeout, and fans out a refresh
//! signal to every [`Subscription`] when a check reports changes.

mod coordinator;
pub mod error;
mod subscribers;

pub use coordinator::SyncCoordinator;
pub use error::{CheckError, SubscriberError};
pub use subscribers::{BoxError, RefreshResult, Subscription, SubscriptionId};
