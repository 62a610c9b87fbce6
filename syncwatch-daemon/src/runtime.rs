use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;

use syncwatch_coordinator::{Subscription, SyncCoordinator};
use syncwatch_core::{config, ChangeSource, DaemonConfig};

use crate::command_source::CommandSource;
use crate::error::{io_err, DaemonError};
use crate::hooks::RefreshHook;
use crate::paths::{socket_path, syncwatch_root};
use crate::protocol::{encode_line, DaemonStatus, Request, Response};

/// Shared by every control connection.
struct Daemon {
    socket: PathBuf,
    coordinator: SyncCoordinator,
    source: Arc<dyn ChangeSource>,
    started_at: DateTime<Utc>,
    stop: Notify,
}

impl Daemon {
    async fn handle(&self, request: Request) -> Result<Value, String> {
        match request {
            Request::Status => {}
            Request::Enable | Request::Disable => {
                let enabled = request == Request::Enable;
                self.coordinator.set_enabled(enabled);
                tracing::info!(enabled, "polling toggled over control socket");
            }
            Request::Phase { phase } => {
                self.coordinator.set_lifecycle_phase(phase);
                tracing::info!(%phase, "lifecycle phase set over control socket");
            }
            Request::Send => {
                self.source.send_local_changes().await.map_err(|err| {
                    tracing::warn!(error = %err, "sending local changes failed");
                    err.to_string()
                })?;
                return Ok(json!({ "sent": true }));
            }
            Request::Stop => return Ok(json!({ "stopping": true })),
        }
        self.status().map_err(|err| err.to_string())
    }

    fn status(&self) -> Result<Value, DaemonError> {
        let status = DaemonStatus {
            running: true,
            pid: std::process::id(),
            started_at: self.started_at,
            socket: self.socket.clone(),
            coordinator: self.coordinator.status(),
        };
        Ok(serde_json::to_value(status)?)
    }
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path, json_logs: bool) -> Result<(), DaemonError> {
    init_tracing(json_logs);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Load `~/.syncwatch/config.yaml` and serve until stopped.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let config = config::load_config_at(&home)?;
    config.validate()?;
    let source: Arc<dyn ChangeSource> = Arc::new(CommandSource::from_config(&config));
    serve(home, config, source).await
}

/// Run the coordinator around `source` and serve the control socket.
///
/// Returns once a `stop` request or ctrl-c arrives. The coordinator is closed
/// and the socket removed before returning.
pub async fn serve(
    home: PathBuf,
    config: DaemonConfig,
    source: Arc<dyn ChangeSource>,
) -> Result<(), DaemonError> {
    let root = syncwatch_root(&home);
    fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;

    let coordinator = SyncCoordinator::spawn(Arc::clone(&source), config.coordinator.clone())?;
    let socket = socket_path(&home);
    let listener = bind_control_socket(&socket)?;

    let _hooks = subscribe_hooks(&coordinator, &config.refresh_hooks);
    if config.start_enabled {
        coordinator.set_enabled(true);
    }

    let daemon = Arc::new(Daemon {
        socket: socket.clone(),
        coordinator: coordinator.clone(),
        source,
        started_at: Utc::now(),
        stop: Notify::new(),
    });
    tracing::info!(
        socket = %socket.display(),
        enabled = config.start_enabled,
        hooks = config.refresh_hooks.len(),
        "syncwatch daemon started",
    );

    let outcome = tokio::select! {
        result = accept_connections(&listener, &daemon) => result,
        () = daemon.stop.notified() => {
            tracing::info!("stop requested over control socket");
            Ok(())
        }
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => {
                tracing::info!("received ctrl-c, shutting down daemon");
                Ok(())
            }
            Err(err) => Err(io_err("ctrl-c handler", err)),
        },
    };

    drop(listener);
    coordinator.close();
    coordinator.closed().await;
    if let Err(err) = fs::remove_file(&socket) {
        if err.kind() != ErrorKind::NotFound {
            tracing::warn!(socket = %socket.display(), error = %err, "could not remove control socket");
        }
    }
    tracing::info!("syncwatch daemon stopped");
    outcome
}

fn subscribe_hooks(coordinator: &SyncCoordinator, hooks: &[Vec<String>]) -> Vec<Subscription> {
    hooks
        .iter()
        .map(|argv| {
            let hook = RefreshHook::new(argv.clone());
            tracing::debug!(hook = %hook.program(), "registered refresh hook");
            coordinator.subscribe(move || hook.trigger())
        })
        .collect()
}

async fn accept_connections(
    listener: &UnixListener,
    daemon: &Arc<Daemon>,
) -> Result<(), DaemonError> {
    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| io_err(&daemon.socket, e))?;
        let daemon = Arc::clone(daemon);
        tokio::spawn(async move {
            if let Err(err) = serve_connection(stream, &daemon).await {
                tracing::warn!(error = %err, "control connection failed");
            }
        });
    }
}

async fn serve_connection(stream: UnixStream, daemon: &Daemon) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err(&daemon.socket, e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let (reply, stop) = match serde_json::from_str::<Request>(&line) {
            Ok(request) => (
                Response::from(daemon.handle(request).await),
                request == Request::Stop,
            ),
            Err(err) => (Response::from(Err(format!("invalid request: {err}"))), false),
        };
        writer
            .write_all(&encode_line(&reply)?)
            .await
            .map_err(|e| io_err(&daemon.socket, e))?;

        // Only after the reply is on the wire, so the caller sees it.
        if stop {
            daemon.stop.notify_one();
            break;
        }
    }
    Ok(())
}

/// Bind `socket`, clearing a file left behind by a daemon that died.
fn bind_control_socket(socket: &Path) -> Result<UnixListener, DaemonError> {
    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::AlreadyRunning {
                socket: socket.to_path_buf(),
            })
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            tracing::warn!(socket = %socket.display(), error = %err, "clearing stale control socket");
            match fs::remove_file(socket) {
                Err(e) if e.kind() != ErrorKind::NotFound => return Err(io_err(socket, e)),
                _ => {}
            }
        }
    }

    let listener = UnixListener::bind(socket).map_err(|e| io_err(socket, e))?;
    fs::set_permissions(socket, fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(socket, e))?;
    Ok(listener)
}

/// Install the global subscriber. `RUST_LOG` overrides the `info` default.
pub fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
