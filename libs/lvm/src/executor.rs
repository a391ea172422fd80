//! Command execution seam.
//!
//! Every interaction with the volume-manager toolchain goes through an
//! [`Executor`]. In production this is a [`HostExecutor`] that spawns real
//! processes; under test a [`FakeExecutor`] answers each invocation from a
//! caller-provided handler.

use std::fmt;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Errors from running an external command.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The process could not be spawned at all.
    #[error("failed to start `{command}`: {source}")]
    Start {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The process ran and exited unsuccessfully.
    #[error("`{command}` failed with exit code {}: {}", fmt_code(.code), .output.trim())]
    CommandFailure {
        command: String,
        code: Option<i32>,
        output: String,
    },
}

fn fmt_code(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string())
}

impl ExecutionError {
    /// Exit code of a failed command, if it ran.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecutionError::Start { .. } => None,
            ExecutionError::CommandFailure { code, .. } => *code,
        }
    }

    /// Combined stdout and stderr of a failed command.
    pub fn output(&self) -> &str {
        match self {
            ExecutionError::Start { .. } => "",
            ExecutionError::CommandFailure { output, .. } => output,
        }
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    /// A successful, silent command.
    pub fn success() -> Self {
        Self {
            code: Some(0),
            ..Default::default()
        }
    }

    /// A successful command printing `stdout`.
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed command with the given exit code and stderr.
    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// Stdout followed by stderr, the way `CombinedOutput` reads on a terminal.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }

    fn into_result(self, command: String) -> Result<Output, ExecutionError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(ExecutionError::CommandFailure {
            command,
            code: self.code,
            output: self.combined(),
        })
    }
}

/// Program and arguments of one command, detached from the process builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    fn from_command(command: &Command) -> Self {
        let std = command.as_std();
        Self {
            program: std.get_program().to_string_lossy().into_owned(),
            args: std
                .get_args()
                .map(|a| a.to_string_lossy().into_owned())
                .collect(),
        }
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Value following `flag`, e.g. `value_of("-n")` for `lvcreate -n name`.
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Last positional argument.
    pub fn last_arg(&self) -> Option<&str> {
        self.args.last().map(String::as_str)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Shared handle to an executor.
pub type BoxedExecutor = Arc<dyn Executor>;

/// Runs commands and returns their captured output.
///
/// Implementations must turn a non-zero exit into
/// [`ExecutionError::CommandFailure`] so callers can `?` on tool failures.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, command: &mut Command) -> Result<Output, ExecutionError>;
}

/// Executes commands on the local host.
#[derive(Debug, Default)]
pub struct HostExecutor {
    counter: AtomicU64,
}

impl HostExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn as_executor(self: Arc<Self>) -> BoxedExecutor {
        self
    }
}

#[async_trait]
impl Executor for HostExecutor {
    async fn execute(&self, command: &mut Command) -> Result<Output, ExecutionError> {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        let invocation = Invocation::from_command(command);
        info!(id, command = %invocation, "running command");

        let raw = command
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ExecutionError::Start {
                command: invocation.to_string(),
                source,
            })?;

        let output = Output {
            code: raw.status.code(),
            stdout: String::from_utf8_lossy(&raw.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&raw.stderr).into_owned(),
        };
        log_output(id, &output);
        output.into_result(invocation.to_string())
    }
}

fn log_output(id: u64, output: &Output) {
    info!(
        id,
        result = if output.is_success() { "OK" } else { "ERROR" },
        status = %fmt_code(&output.code),
        "finished running command"
    );
    if !output.stdout.is_empty() {
        debug!(id, stdout = %output.stdout, "command stdout");
    }
    if !output.stderr.is_empty() {
        debug!(id, stderr = %output.stderr, "command stderr");
    }
}

/// Handler answering a fake invocation.
pub type Handler = dyn FnMut(&Invocation) -> Output + Send;

/// An executor which records every invocation and answers it from a handler.
pub struct FakeExecutor {
    counter: AtomicU64,
    handler: Mutex<Box<Handler>>,
    invocations: Mutex<Vec<Invocation>>,
}

impl FakeExecutor {
    /// A fake where every command succeeds silently.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            counter: AtomicU64::new(0),
            handler: Mutex::new(Box::new(|_| Output::success())),
            invocations: Mutex::new(Vec::new()),
        })
    }

    /// Replace the handler.
    pub fn set_handler<F>(&self, f: F)
    where
        F: FnMut(&Invocation) -> Output + Send + 'static,
    {
        *self.handler.lock().unwrap() = Box::new(f);
    }

    /// Every invocation seen so far, in order.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// Invocations of one program.
    pub fn invocations_of(&self, program: &str) -> Vec<Invocation> {
        self.invocations()
            .into_iter()
            .filter(|i| i.program == program)
            .collect()
    }

    pub fn as_executor(self: Arc<Self>) -> BoxedExecutor {
        self
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn execute(&self, command: &mut Command) -> Result<Output, ExecutionError> {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        let invocation = Invocation::from_command(command);
        info!(id, command = %invocation, "running command via fake executor");

        self.invocations.lock().unwrap().push(invocation.clone());
        let output = (self.handler.lock().unwrap())(&invocation);
        log_output(id, &output);
        output.into_result(invocation.to_string())
    }
}
