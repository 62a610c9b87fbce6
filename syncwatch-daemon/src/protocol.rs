//! Control protocol: one JSON object per line in each direction.
//!
//! Requests are tagged by `cmd`:
//!
//! ```text
//! {"cmd":"status"}
//! {"cmd":"phase","phase":"background"}
//! ```
//!
//! Replies are `{"ok":true,"data":...}` or `{"ok":false,"error":"..."}`.

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use syncwatch_core::{CoordinatorStatus, LifecyclePhase};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// `status` is retried this many times while the socket is still coming up.
const STATUS_ATTEMPTS: u32 = 5;
const STATUS_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum Request {
    Status,
    Enable,
    Disable,
    Phase { phase: LifecyclePhase },
    Send,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<Value, String>> for Response {
    fn from(outcome: Result<Value, String>) -> Self {
        match outcome {
            Ok(data) => Self {
                ok: true,
                data: Some(data),
                error: None,
            },
            Err(message) => Self {
                ok: false,
                data: None,
                error: Some(message),
            },
        }
    }
}

impl Response {
    pub fn into_result(self) -> Result<Value, DaemonError> {
        if self.ok {
            return Ok(self.data.unwrap_or(Value::Null));
        }
        Err(DaemonError::Rejected(
            self.error.unwrap_or_else(|| "no reason given".to_string()),
        ))
    }
}

/// Payload of a successful `status` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub socket: PathBuf,
    pub coordinator: CoordinatorStatus,
}

/// Serialize `message` as a single newline-terminated frame.
pub(crate) fn encode_line<T: Serialize>(message: &T) -> Result<Vec<u8>, DaemonError> {
    let mut frame = serde_json::to_vec(message)?;
    frame.push(b'\n');
    Ok(frame)
}

/// Blocking client for the control socket. Opens one connection per call.
#[derive(Debug, Clone)]
pub struct Client {
    socket: PathBuf,
}

impl Client {
    pub fn new(home: &Path) -> Self {
        Self {
            socket: socket_path(home),
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Send `request` and return the reply's `data`.
    pub fn call(&self, request: Request) -> Result<Value, DaemonError> {
        self.exchange(request)?.into_result()
    }

    /// Query status, tolerating a daemon that is still binding its socket.
    pub fn status(&self) -> Result<DaemonStatus, DaemonError> {
        let mut attempt = 1;
        loop {
            match self.call(Request::Status) {
                Err(DaemonError::DaemonNotRunning { .. }) if attempt < STATUS_ATTEMPTS => {
                    attempt += 1;
                    std::thread::sleep(STATUS_RETRY_DELAY);
                }
                other => return Ok(serde_json::from_value(other?)?),
            }
        }
    }

    fn exchange(&self, request: Request) -> Result<Response, DaemonError> {
        let stream = UnixStream::connect(&self.socket).map_err(|err| match err.kind() {
            ErrorKind::NotFound | ErrorKind::ConnectionRefused => DaemonError::DaemonNotRunning {
                socket: self.socket.clone(),
            },
            _ => io_err(&self.socket, err),
        })?;

        (&stream)
            .write_all(&encode_line(&request)?)
            .map_err(|e| io_err(&self.socket, e))?;

        let mut line = String::new();
        let read = BufReader::new(&stream)
            .read_line(&mut line)
            .map_err(|e| io_err(&self.socket, e))?;
        if read == 0 {
            return Err(DaemonError::Protocol(format!(
                "daemon hung up without answering {request:?}"
            )));
        }
        Ok(serde_json::from_str(&line)?)
    }
}
