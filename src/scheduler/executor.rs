//! Alarm command execution.
//!
//! [`TaskExecutor`] is the seam between the scheduler loop and whatever
//! actually performs an alarm. [`ShellExecutor`] writes the command to a
//! helper script named after the alarm, runs it with `/bin/sh`, and removes
//! the script again during cleanup.

use crate::error::{AlarmError, Result};
use crate::scheduler::tasks::AlarmTask;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Interpreter used for alarm scripts.
const SHELL: &str = "/bin/sh";

/// Maximum number of stderr bytes carried into an execution error.
const MAX_STDERR_BYTES: usize = 512;

/// Runs due alarm tasks.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run the task's command to completion.
    async fn execute(&self, task: &AlarmTask) -> Result<()>;

    /// Remove artifacts left behind for `alarm_id`. Missing artifacts are not
    /// an error.
    async fn cleanup(&self, _alarm_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Executes alarm commands as shell scripts in a scratch directory.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    script_dir: PathBuf,
    timeout: Option<Duration>,
}

impl ShellExecutor {
    /// Create an executor that writes scripts into `script_dir`.
    pub fn new(script_dir: impl Into<PathBuf>) -> Self {
        Self {
            script_dir: script_dir.into(),
            timeout: None,
        }
    }

    /// Kill commands that run longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Default script directory: `$TMPDIR/alarm_scripts`.
    pub fn default_script_dir() -> PathBuf {
        std::env::temp_dir().join("alarm_scripts")
    }

    /// Directory holding generated scripts.
    pub fn script_dir(&self) -> &Path {
        &self.script_dir
    }

    /// Path of the helper script for `alarm_id`.
    pub fn script_path(&self, alarm_id: &str) -> PathBuf {
        self.script_dir.join(format!("alarm-{alarm_id}.sh"))
    }

    async fn write_script(&self, task: &AlarmTask) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.script_dir).await?;
        let path = self.script_path(&task.alarm_id);
        let body = format!("#!{SHELL}\n{}\n", task.command);
        tokio::fs::write(&path, body).await?;
        Ok(path)
    }
}

#[async_trait]
impl TaskExecutor for ShellExecutor {
    async fn execute(&self, task: &AlarmTask) -> Result<()> {
        let fail = |reason: String| AlarmError::Execution {
            alarm_id: task.alarm_id.clone(),
            reason,
        };

        let script = self
            .write_script(task)
            .await
            .map_err(|e| fail(format!("cannot write script: {e}")))?;

        debug!(alarm_id = %task.alarm_id, script = %script.display(), "running alarm command");

        let child = Command::new(SHELL)
            .arg(&script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| fail(format!("cannot spawn {SHELL}: {e}")))?;

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| fail(format!("timed out after {}s", limit.as_secs_f64())))?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| fail(format!("wait failed: {e}")))?;

        if !output.stdout.is_empty() {
            debug!(
                alarm_id = %task.alarm_id,
                stdout = %String::from_utf8_lossy(&output.stdout).trim_end(),
                "alarm command output"
            );
        }

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = tail(stderr.trim_end(), MAX_STDERR_BYTES);
        let status = match output.status.code() {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_owned(),
        };
        if stderr.is_empty() {
            Err(fail(status))
        } else {
            Err(fail(format!("{status}: {stderr}")))
        }
    }

    async fn cleanup(&self, alarm_id: &str) -> Result<()> {
        match tokio::fs::remove_file(self.script_path(alarm_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AlarmError::Cleanup {
                alarm_id: alarm_id.to_owned(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Last `max` bytes of `s`, cut on a char boundary.
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::Utc;

    fn task(id: &str, command: &str) -> AlarmTask {
        AlarmTask::new(id, Utc::now(), command).unwrap()
    }

    #[tokio::test]
    async fn successful_command_leaves_script_until_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let exec = ShellExecutor::new(dir.path().join("scripts"));
        let t = task("ok", &format!("touch '{}'", marker.display()));

        exec.execute(&t).await.expect("command succeeds");
        assert!(marker.exists());
        assert!(exec.script_path("ok").exists());

        exec.cleanup("ok").await.expect("cleanup");
        assert!(!exec.script_path("ok").exists());
    }

    #[tokio::test]
    async fn failing_command_reports_exit_code_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ShellExecutor::new(dir.path());
        let err = exec
            .execute(&task("bad", "echo boom >&2; exit 3"))
            .await
            .expect_err("non-zero exit");
        match err {
            AlarmError::Execution { alarm_id, reason } => {
                assert_eq!(alarm_id, "bad");
                assert!(reason.contains("exit code 3"), "{reason}");
                assert!(reason.contains("boom"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn timeout_kills_long_command() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ShellExecutor::new(dir.path()).with_timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let err = exec
            .execute(&task("slow", "sleep 5"))
            .await
            .expect_err("timeout");
        assert!(matches!(err, AlarmError::Execution { ref reason, .. } if reason.contains("timed out")));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn cleanup_of_missing_script_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ShellExecutor::new(dir.path());
        exec.cleanup("never-ran").await.expect("missing is fine");
    }

    #[tokio::test]
    async fn cleanup_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ShellExecutor::new(dir.path());
        // A directory in place of the script cannot be removed with remove_file.
        std::fs::create_dir_all(exec.script_path("stuck")).unwrap();
        let err = exec.cleanup("stuck").await.expect_err("cleanup fails");
        assert!(matches!(err, AlarmError::Cleanup { ref alarm_id, .. } if alarm_id == "stuck"));
    }

    #[test]
    fn script_path_is_keyed_by_alarm_id() {
        let exec = ShellExecutor::new("/tmp/x");
        assert_eq!(
            exec.script_path("a1"),
            PathBuf::from("/tmp/x/alarm-a1.sh")
        );
    }

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail("hello", 10), "hello");
        assert_eq!(tail("hello", 3), "llo");
        let s = "ééé";
        assert!(tail(s, 3).len() <= 3);
    }
}
