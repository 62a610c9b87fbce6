//! [`ChangeSource`] backed by external commands.
//!
//! The check command must print the number of changes it applied as the last
//! non-empty line of stdout. Empty output counts as zero, as does a negative
//! number. Child processes are killed if the check is abandoned (timeout or
//! coordinator teardown).

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use syncwatch_core::{ChangeSource, DaemonConfig, SourceError};

#[derive(Debug, Clone)]
pub struct CommandSource {
    check: Vec<String>,
    send: Option<Vec<String>>,
}

impl CommandSource {
    pub fn new(check: Vec<String>, send: Option<Vec<String>>) -> Self {
        Self { check, send }
    }

    pub fn from_config(config: &DaemonConfig) -> Self {
        Self::new(config.check_command.clone(), config.send_command.clone())
    }
}

#[async_trait]
impl ChangeSource for CommandSource {
    async fn check_for_remote_changes(&self) -> Result<u64, SourceError> {
        let stdout = run_captured(&self.check, "check_command").await?;
        parse_count(&stdout)
    }

    async fn send_local_changes(&self) -> Result<(), SourceError> {
        let argv = self
            .send
            .as_deref()
            .ok_or(SourceError::NotConfigured("send_command"))?;
        run_captured(argv, "send_command").await.map(|_| ())
    }
}

async fn run_captured(argv: &[String], what: &'static str) -> Result<String, SourceError> {
    let (program, args) = argv.split_first().ok_or(SourceError::NotConfigured(what))?;

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        return Err(SourceError::CommandFailed {
            program: program.clone(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Interpret check-command output as a change count.
pub fn parse_count(stdout: &str) -> Result<u64, SourceError> {
    let Some(line) = stdout.lines().map(str::trim).filter(|l| !l.is_empty()).last() else {
        return Ok(0);
    };
    line.parse::<i64>()
        .map(|n| u64::try_from(n).unwrap_or(0))
        .map_err(|_| SourceError::InvalidCount(line.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    #[test]
    fn parse_count_reads_last_line() {
        assert_eq!(parse_count("pulling...\napplied\n  12 \n").unwrap(), 12);
        assert_eq!(parse_count("").unwrap(), 0);
        assert_eq!(parse_count("  \n\n").unwrap(), 0);
        assert_eq!(parse_count("-3").unwrap(), 0);
        let err = parse_count("done").unwrap_err();
        assert!(matches!(err, SourceError::InvalidCount(ref s) if s == "done"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn check_command_stdout_becomes_count() {
        let source = CommandSource::new(sh("echo syncing >&2; echo 4"), None);
        assert_eq!(source.check_for_remote_changes().await.unwrap(), 4);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_check_reports_exit_and_stderr() {
        let source = CommandSource::new(sh("echo 'network down' >&2; exit 3"), None);
        let err = source.check_for_remote_changes().await.unwrap_err();
        match err {
            SourceError::CommandFailed { program, stderr, .. } => {
                assert_eq!(program, "sh");
                assert_eq!(stderr, "network down");
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_program_is_an_io_error() {
        let source = CommandSource::new(vec!["/nonexistent/syncwatch-check".into()], None);
        let err = source.check_for_remote_changes().await.unwrap_err();
        assert!(matches!(err, SourceError::Io(_)), "got: {err}");
    }

    #[tokio::test]
    async fn send_without_command_is_not_configured() {
        let source = CommandSource::new(sh("echo 0"), None);
        let err = source.send_local_changes().await.unwrap_err();
        assert!(err.to_string().contains("send_command"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn send_runs_configured_command() {
        let source = CommandSource::new(sh("echo 0"), Some(sh("exit 0")));
        source.send_local_changes().await.expect("send ok");
    }
}
