//! The collaborator boundary: whatever actually talks to the sync extension.

use async_trait::async_trait;

use crate::error::SourceError;

/// The external sync/storage layer the coordinator polls.
///
/// Implementations must be async all the way down: the coordinator drives the
/// check future on its own task, so a blocking implementation should hand its
/// work to `spawn_blocking` itself. Dropping the check future (on timeout or
/// teardown) must be safe.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Ask the remote whether anything changed. Applies detected changes to
    /// the local store as a side effect and returns how many there were.
    async fn check_for_remote_changes(&self) -> Result<u64, SourceError>;

    /// Push local changes upstream. Called by data-mutation paths, never by
    /// the coordinator itself.
    async fn send_local_changes(&self) -> Result<(), SourceError>;
}
