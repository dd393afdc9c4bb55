//! Run the `git` executable as a subprocess and capture its output.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use eyre::Context;
use itertools::Itertools;
use tracing::instrument;

/// Path to the `git` executable on disk to be executed.
#[derive(Clone)]
pub struct GitRunInfo {
    /// The path to the Git executable on disk.
    pub path_to_git: PathBuf,

    /// The environment variables that should be passed to the Git process.
    pub env: HashMap<OsString, OsString>,
}

impl std::fmt::Debug for GitRunInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<GitRunInfo path_to_git={:?} env=not shown>",
            self.path_to_git
        )
    }
}

/// The result of invoking Git.
#[must_use]
pub struct GitRunResult {
    /// The exit code of the process.
    pub exit_code: i32,

    /// The stdout contents written by the invocation.
    pub stdout: Vec<u8>,

    /// The stderr contents written by the invocation.
    pub stderr: Vec<u8>,
}

impl std::fmt::Debug for GitRunResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<GitRunResult exit_code={:?} stdout={:?} stderr={:?}>",
            self.exit_code,
            String::from_utf8_lossy(&self.stdout),
            String::from_utf8_lossy(&self.stderr),
        )
    }
}

impl GitRunInfo {
    /// Construct from the ambient environment, locating `git` via `PATH`.
    pub fn from_environment() -> Self {
        GitRunInfo {
            path_to_git: PathBuf::from("git"),
            env: std::env::vars_os().collect(),
        }
    }

    fn make_command(&self, working_directory: &Path) -> Command {
        let mut command = Command::new(&self.path_to_git);
        command.arg("-C").arg(working_directory);
        command.env_clear();
        command.envs(self.env.iter());
        command
    }

    /// Run Git silently (don't display output to the user), with the provided
    /// directory as the repository to operate on.
    ///
    /// A non-zero exit code is treated as an error. Returns the captured
    /// stdout and stderr of the Git invocation.
    #[instrument]
    pub fn run_silent(&self, working_directory: &Path, args: &[&str]) -> eyre::Result<GitRunResult> {
        let mut command = self.make_command(working_directory);
        command.args(args);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let child = command.spawn().wrap_err("Spawning Git subprocess")?;
        let output = child
            .wait_with_output()
            .wrap_err("Waiting for Git subprocess to complete")?;
        let result = GitRunResult {
            // On Unix, if the child process was terminated by a signal, we need to call
            // some Unix-specific functions to access the signal that terminated it. For
            // simplicity, just return `1` in those cases.
            exit_code: output.status.code().unwrap_or(1),
            stdout: output.stdout,
            stderr: output.stderr,
        };
        if !output.status.success() {
            eyre::bail!(
                "Git subprocess failed: git {} {:?}",
                args.iter().join(" "),
                result
            );
        }
        Ok(result)
    }

    /// Run two Git subprocesses with the stdout of the first wired into the
    /// stdin of the second, as in `git show <commit> | git patch-id --stable`.
    ///
    /// The consumer's stdout is read to completion before either process is
    /// waited for, so that neither can block on a full pipe; both processes
    /// are then reaped. The returned exit code is the producer's if it failed,
    /// and the consumer's otherwise.
    #[instrument]
    pub fn run_piped(
        &self,
        working_directory: &Path,
        producer_args: &[&str],
        consumer_args: &[&str],
    ) -> eyre::Result<GitRunResult> {
        let mut producer_command = self.make_command(working_directory);
        producer_command.args(producer_args);
        producer_command.stdin(Stdio::null());
        producer_command.stdout(Stdio::piped());
        producer_command.stderr(Stdio::null());
        let mut producer = producer_command
            .spawn()
            .wrap_err("Spawning producer Git subprocess")?;
        let producer_stdout = producer
            .stdout
            .take()
            .ok_or_else(|| eyre::eyre!("Producer Git subprocess had no stdout handle"))?;

        let mut consumer_command = self.make_command(working_directory);
        consumer_command.args(consumer_args);
        consumer_command.stdin(Stdio::from(producer_stdout));
        consumer_command.stdout(Stdio::piped());
        consumer_command.stderr(Stdio::piped());
        let consumer = consumer_command
            .spawn()
            .wrap_err("Spawning consumer Git subprocess")?;

        let output = consumer
            .wait_with_output()
            .wrap_err("Waiting for consumer Git subprocess to complete")?;
        let producer_status = producer
            .wait()
            .wrap_err("Waiting for producer Git subprocess to complete")?;

        let exit_code = if !producer_status.success() {
            producer_status.code().unwrap_or(1)
        } else {
            output.status.code().unwrap_or(1)
        };
        Ok(GitRunResult {
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
