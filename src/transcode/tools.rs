//! External tool invocation.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::PipelineError;

/// Which pipeline step an invocation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStage {
    /// Downloader fetching the source.
    Fetch,
    /// Stage 1 resize encode.
    Resize,
    /// Stage 2 mirror/stack encode.
    Stack,
}

/// A fully built external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub stage: ToolStage,
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(stage: ToolStage, program: impl Into<String>) -> Self {
        Self {
            stage,
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Runs external tools to completion.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Runs the command and returns its exit code.
    async fn run(&self, command: &ToolCommand) -> Result<i32, PipelineError>;
}

/// Runs tools as OS subprocesses.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, command: &ToolCommand) -> Result<i32, PipelineError> {
        debug!(stage = ?command.stage, program = %command.program, args = ?command.args, "Running tool");

        let output = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| PipelineError::SpawnFailed {
                program: command.program.clone(),
                message: e.to_string(),
            })?;

        // Killed by a signal has no code.
        let code = output.status.code().unwrap_or(-1);
        if code != 0 {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                stage = ?command.stage,
                code,
                stderr = %tail(&stderr, 2000),
                "Tool exited with non-zero code"
            );
        }
        Ok(code)
    }
}

fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
