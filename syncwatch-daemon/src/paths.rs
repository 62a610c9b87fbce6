use std::path::{Path, PathBuf};

pub use syncwatch_core::config::syncwatch_root;

pub const DAEMON_SOCKET: &str = "daemon.sock";

/// `<home>/.syncwatch/daemon.sock`
pub fn socket_path(home: &Path) -> PathBuf {
    syncwatch_root(home).join(DAEMON_SOCKET)
}
