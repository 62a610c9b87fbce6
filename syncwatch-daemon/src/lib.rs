//! Long-running host for the sync coordinator.
//!
//! Wires a [`CommandSource`] into a [`syncwatch_coordinator::SyncCoordinator`],
//! runs refresh hooks on every notification, and exposes a small JSON control
//! protocol on a Unix socket.

pub mod command_source;
pub mod error;
pub mod hooks;
pub mod paths;
pub mod protocol;
pub mod runtime;

pub use command_source::CommandSource;
pub use error::DaemonError;
pub use hooks::RefreshHook;
pub use protocol::{Client, Request};
