//! External tool execution.
//!
//! The unpack utility and the image-processing pipeline are black boxes run
//! as subprocesses. They report success only through their exit status and
//! the files they leave behind, so the runner captures output for the run
//! log and enforces a bounded wait.
//!
//! ```text
//! ToolRunner
//!     │
//!     └── spawn subprocess (kill_on_drop)
//!         ├── timeout: per tool, from config
//!         ├── stdout/stderr captured
//!         └── exit status → Ok / Failed
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Shown in logs in place of secret argument values.
pub const REDACTED: &str = "********";

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("{program} failed{}", .exit_code.map(|c| format!(" with exit code {}", c)).unwrap_or_default())]
    Failed {
        program: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

/// A configured tool: program, argument templates and time limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    /// Arguments with `{placeholder}` fields, see [`ToolVars`].
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, args: &[&str], timeout_secs: u64) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout_secs,
        }
    }

    /// Fill in the argument templates.
    pub fn invocation(&self, vars: &ToolVars) -> ToolInvocation {
        ToolInvocation {
            program: self.program.clone(),
            args: self.args.iter().map(|arg| vars.expand(arg)).collect(),
            secrets: vars.secrets(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

/// Values substituted into argument templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolVars {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub source: String,
    pub input: String,
    pub work_dir: String,
    pub output_dir: String,
    pub crash_dir: String,
}

impl ToolVars {
    fn expand(&self, template: &str) -> String {
        template
            .replace("{access_key_id}", &self.access_key_id)
            .replace("{secret_access_key}", &self.secret_access_key)
            .replace("{source}", &self.source)
            .replace("{input}", &self.input)
            .replace("{work_dir}", &self.work_dir)
            .replace("{output_dir}", &self.output_dir)
            .replace("{crash_dir}", &self.crash_dir)
    }

    fn secrets(&self) -> Vec<String> {
        [&self.access_key_id, &self.secret_access_key]
            .into_iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect()
    }
}

/// A fully expanded command line, ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    /// Values never written to logs.
    pub secrets: Vec<String>,
    pub timeout: Duration,
}

impl ToolInvocation {
    /// Command line with secrets masked.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&self.redact(arg));
        }
        line
    }

    fn redact(&self, text: &str) -> String {
        self.secrets
            .iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), REDACTED))
    }
}

/// Captured output of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// Runs external tools. The driver only talks to this trait.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError>;
}

/// Runs tools as real subprocesses.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        debug!(command = %invocation.display(), "Starting tool");

        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;

        // Dropping the wait future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(invocation.timeout, child.wait_with_output()).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(ToolError::Spawn {
                    program: invocation.program.clone(),
                    source,
                })
            }
            Err(_elapsed) => {
                warn!(program = %invocation.program, timeout = ?invocation.timeout, "Tool timed out, killed");
                return Err(ToolError::Timeout {
                    program: invocation.program.clone(),
                    timeout: invocation.timeout,
                });
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let stdout = invocation.redact(&String::from_utf8_lossy(&output.stdout));
        let stderr = invocation.redact(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(ToolError::Failed {
                program: invocation.program.clone(),
                exit_code: output.status.code(),
                stdout,
                stderr,
            });
        }

        debug!(program = %invocation.program, duration_ms, "Tool finished");
        Ok(ToolOutput {
            stdout,
            stderr,
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> ToolVars {
        ToolVars {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "s3cr3t".to_string(),
            source: "s3://NDAR_Central/sub/image.zip".to_string(),
            input: "/work/inputs/7.nii.gz".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_invocation_expands_templates() {
        let cmd = ToolCommand::new(
            "unpack",
            &["--key", "{access_key_id}", "--secret={secret_access_key}", "-o", "{input}", "{source}"],
            60,
        );
        let inv = cmd.invocation(&vars());
        assert_eq!(
            inv.args,
            vec![
                "--key",
                "AKIDEXAMPLE",
                "--secret=s3cr3t",
                "-o",
                "/work/inputs/7.nii.gz",
                "s3://NDAR_Central/sub/image.zip"
            ]
        );
        assert_eq!(inv.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_display_redacts_secrets() {
        let cmd = ToolCommand::new("unpack", &["{access_key_id}", "--secret={secret_access_key}"], 1);
        let shown = cmd.invocation(&vars()).display();
        assert!(!shown.contains("AKIDEXAMPLE"));
        assert!(!shown.contains("s3cr3t"));
        assert!(shown.contains("--secret=********"));
    }

    #[test]
    fn test_empty_secrets_are_not_redacted() {
        let cmd = ToolCommand::new("pipeline", &["{input}"], 1);
        let inv = cmd.invocation(&ToolVars {
            input: "in.nii.gz".to_string(),
            ..Default::default()
        });
        assert!(inv.secrets.is_empty());
        assert_eq!(inv.display(), "pipeline in.nii.gz");
    }

    #[test]
    fn test_failed_error_message() {
        let err = ToolError::Failed {
            program: "pipeline".to_string(),
            exit_code: Some(2),
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "pipeline failed with exit code 2");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_captures_output() {
        let inv = ToolCommand::new("sh", &["-c", "echo hello"], 10).invocation(&ToolVars::default());
        let out = ProcessRunner.run(&inv).await.unwrap();
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_reports_exit_code() {
        let inv = ToolCommand::new("sh", &["-c", "echo oops >&2; exit 3"], 10)
            .invocation(&ToolVars::default());
        match ProcessRunner.run(&inv).await.unwrap_err() {
            ToolError::Failed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr.trim(), "oops");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_times_out() {
        let mut inv = ToolCommand::new("sleep", &["5"], 0).invocation(&ToolVars::default());
        inv.timeout = Duration::from_millis(100);
        let err = ProcessRunner.run(&inv).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let inv = ToolCommand::new("/nonexistent/mindar-tool", &[], 1).invocation(&ToolVars::default());
        let err = ProcessRunner.run(&inv).await.unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }
}
