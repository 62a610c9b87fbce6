//! syncwatch core library: configuration, domain types, collaborator trait, errors.
//!
//! - [`config`]: [`CoordinatorConfig`], [`DaemonConfig`] and their YAML persistence
//! - [`types`]: lifecycle phase and the coordinator status snapshot
//! - [`source`]: the [`ChangeSource`] collaborator trait
//! - [`error`]: [`ConfigError`], [`SourceError`]

pub mod config;
pub mod error;
pub mod source;
pub mod types;

pub use config::{CoordinatorConfig, DaemonConfig};
pub use error::{ConfigError, SourceError};
pub use source::ChangeSource;
pub use types::{CoordinatorStatus, LifecyclePhase, LoopState};
