//! Subprocess and remote shell execution.
//!
//! Local tools (`ssh-keygen`, `ssh`) run through the [`CommandRunner`]
//! abstraction so tests can script their outcomes without spawning
//! processes. [`RemoteShell`] wraps the system `ssh` client for one-shot,
//! non-interactive commands against freshly booted hosts.

use std::ffi::OsString;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::process::Stdio;

use camino::Utf8Path;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::warn;

/// Result of running an external command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Human readable exit status.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// Errors raised while running commands.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ExecError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when feeding stdin or collecting output fails.
    #[error("i/o failure while running {program}: {message}")]
    Io {
        /// Command being run.
        program: String,
        /// Operating system error string.
        message: String,
    },
}

/// Future returned by [`CommandRunner::run`].
pub type CommandFuture<'a> =
    Pin<Box<dyn Future<Output = Result<CommandOutput, ExecError>> + Send + 'a>>;

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args`, optionally feeding `stdin`, and captures
    /// stdout and stderr.
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
        stdin: Option<&'a [u8]>,
    ) -> CommandFuture<'a>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
        stdin: Option<&'a [u8]>,
    ) -> CommandFuture<'a> {
        Box::pin(async move {
            let io_error = |err: std::io::Error| ExecError::Io {
                program: program.to_owned(),
                message: err.to_string(),
            };

            let mut child = Command::new(program)
                .args(args)
                .stdin(if stdin.is_some() {
                    Stdio::piped()
                } else {
                    Stdio::null()
                })
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|err| ExecError::Spawn {
                    program: program.to_owned(),
                    message: err.to_string(),
                })?;

            if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
                pipe.write_all(input).await.map_err(io_error)?;
                pipe.shutdown().await.map_err(io_error)?;
            }

            let output = child.wait_with_output().await.map_err(io_error)?;
            Ok(CommandOutput {
                code: output.status.code(),
                stdout: decode_stream(program, "stdout", output.stdout),
                stderr: decode_stream(program, "stderr", output.stderr),
            })
        })
    }
}

/// Decodes captured output as UTF-8, replacing invalid sequences with
/// U+FFFD and logging a warning when any were found.
fn decode_stream(program: &str, stream: &'static str, bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            let invalid_at = err.utf8_error().valid_up_to();
            warn!(
                program,
                stream,
                invalid_at,
                "output is not valid UTF-8; invalid bytes were replaced"
            );
            String::from_utf8_lossy(err.as_bytes()).into_owned()
        }
    }
}

/// SSH client settings shared by every remote invocation in a run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshSettings {
    /// Path to the `ssh` executable.
    pub ssh_bin: String,
    /// Remote user to connect as.
    pub user: String,
    /// Port exposed by the instance.
    pub port: u16,
    /// Seconds `ssh` waits for the TCP connection.
    pub connect_timeout_secs: u64,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            user: String::from("root"),
            port: 22,
            connect_timeout_secs: 10,
        }
    }
}

/// Host and credential used for one remote shell session.
#[derive(Clone, Copy, Debug)]
pub struct RemoteTarget<'a> {
    /// Network address of the host.
    pub address: IpAddr,
    /// Private key used to authenticate.
    pub identity: &'a Utf8Path,
}

/// Runs non-interactive commands over the system `ssh` client.
#[derive(Debug)]
pub struct RemoteShell<'a, R: CommandRunner> {
    runner: &'a R,
    settings: &'a SshSettings,
}

impl<'a, R: CommandRunner> RemoteShell<'a, R> {
    /// Creates a remote shell using `runner` to spawn `ssh`.
    #[must_use]
    pub const fn new(runner: &'a R, settings: &'a SshSettings) -> Self {
        Self { runner, settings }
    }

    /// Executes `command` on `target`, optionally streaming `stdin` to the
    /// remote process.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError`] when `ssh` cannot be spawned. A non-zero remote
    /// exit status is reported in the returned [`CommandOutput`].
    pub async fn exec(
        &self,
        target: RemoteTarget<'_>,
        command: &str,
        stdin: Option<&[u8]>,
    ) -> Result<CommandOutput, ExecError> {
        let args = self.build_ssh_args(target, command);
        self.runner.run(&self.settings.ssh_bin, &args, stdin).await
    }

    pub(crate) fn build_ssh_args(&self, target: RemoteTarget<'_>, command: &str) -> Vec<OsString> {
        vec![
            OsString::from("-i"),
            OsString::from(target.identity.as_str()),
            OsString::from("-p"),
            OsString::from(self.settings.port.to_string()),
            OsString::from("-o"),
            OsString::from("BatchMode=yes"),
            OsString::from("-o"),
            OsString::from("IdentitiesOnly=yes"),
            OsString::from("-o"),
            OsString::from("StrictHostKeyChecking=no"),
            OsString::from("-o"),
            OsString::from("UserKnownHostsFile=/dev/null"),
            OsString::from("-o"),
            OsString::from(format!(
                "ConnectTimeout={}",
                self.settings.connect_timeout_secs
            )),
            OsString::from(format!("{}@{}", self.settings.user, target.address)),
            OsString::from(command),
        ]
    }
}
