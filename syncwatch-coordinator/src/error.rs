//! Failures observed inside the check loop. None of these ever reach callers
//! of the public coordinator methods; they are logged and counted.

use std::time::Duration;

use thiserror::Error;

use syncwatch_core::SourceError;

use crate::subscribers::SubscriptionId;

/// Why a single bounded check produced no change count.
#[derive(Debug, Error)]
pub enum CheckError {
    /// The collaborator did not answer within the configured bound.
    #[error("remote change check timed out after {}ms", .after.as_millis())]
    Timeout { after: Duration },

    /// The collaborator answered with an error.
    #[error("remote change check failed: {0}")]
    Failed(#[from] SourceError),
}

/// A single refresh callback misbehaving during a fan-out.
#[derive(Debug, Error)]
pub enum SubscriberError {
    #[error("subscriber {id} failed: {message}")]
    Failed { id: SubscriptionId, message: String },

    #[error("subscriber {id} panicked: {message}")]
    Panicked { id: SubscriptionId, message: String },
}
