//! Deadline-bounded execution of external commands.
//!
//! Every collaborator the harness talks to is a CLI. Calls go through a
//! [`CommandRunner`] so the control-plane client and the image tools can be
//! exercised against a scripted runner in tests.

use std::fmt;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use crestore_common::constants::{COMMAND_POLL_INTERVAL_MS, PIPE_DRAIN_GRACE_MS};
use crestore_common::error::{CrestoreError, Result};

/// A fully specified external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Binary name or path.
    pub program: String,
    /// Arguments, excluding the program.
    pub args: Vec<String>,
    /// Hard deadline for the process.
    pub timeout: Duration,
}

impl CommandSpec {
    /// Creates a command with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout,
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Output from a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Standard output from the command.
    pub stdout: String,
    /// Standard error from the command.
    pub stderr: String,
    /// Exit code returned by the command, -1 if killed by a signal.
    pub exit_code: i32,
}

impl ExecOutput {
    /// Returns true if the command exited with status 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the non-empty lines of standard output.
    #[must_use]
    pub fn stdout_lines(&self) -> Vec<String> {
        self.stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Executes external commands.
pub trait CommandRunner: Send + Sync {
    /// Runs the command to completion or until its deadline.
    ///
    /// A non-zero exit status is not an error at this level.
    ///
    /// # Errors
    ///
    /// Returns `CrestoreError::Io` if the process cannot be spawned and
    /// `CrestoreError::Timeout` if the deadline elapses.
    fn run(&self, command: &CommandSpec) -> Result<ExecOutput>;

    /// Runs the command and treats a non-zero exit status as a failure.
    ///
    /// # Errors
    ///
    /// Returns `CrestoreError::CommandFailed` on non-zero exit, plus every
    /// error [`CommandRunner::run`] can return.
    fn run_checked(&self, command: &CommandSpec) -> Result<ExecOutput> {
        let output = self.run(command)?;
        if output.success() {
            Ok(output)
        } else {
            Err(CrestoreError::CommandFailed {
                command: command.to_string(),
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs commands as host processes.
///
/// Each child leads its own process group. At the deadline the whole group
/// is killed, so a helper the command left running in the background cannot
/// hold the output pipes open past the timeout.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, command: &CommandSpec) -> Result<ExecOutput> {
        tracing::debug!(cmd = %command, timeout = ?command.timeout, "running command");
        let deadline = Instant::now() + command.timeout;

        let mut cmd = Command::new(&command.program);
        let _ = cmd
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        own_process_group(&mut cmd);
        let mut child = cmd.spawn().map_err(|e| CrestoreError::Io {
            path: command.program.clone().into(),
            source: e,
        })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = wait_until(&mut child, command, deadline)?;

        // The direct child is gone; anything it spawned may still hold the pipes.
        let mut stdout = stdout.collect_until(deadline);
        let mut stderr = stderr.collect_until(deadline);
        if stdout.is_pending() || stderr.is_pending() {
            tracing::warn!(cmd = %command, "output pipes held open past deadline, killing process group");
            kill_group(&child);
            let grace = Instant::now() + Duration::from_millis(PIPE_DRAIN_GRACE_MS);
            stdout = stdout.collect_until(grace);
            stderr = stderr.collect_until(grace);
        }

        let output = ExecOutput {
            stdout: stdout.into_text(),
            stderr: stderr.into_text(),
            exit_code: status.code().unwrap_or(-1),
        };
        tracing::debug!(cmd = %command, exit_code = output.exit_code, "command finished");
        Ok(output)
    }
}

/// Polls the child until it exits, killing its group once `deadline` passes.
fn wait_until(
    child: &mut Child,
    command: &CommandSpec,
    deadline: Instant,
) -> Result<std::process::ExitStatus> {
    loop {
        let polled = child.try_wait().map_err(|e| CrestoreError::Io {
            path: command.program.clone().into(),
            source: e,
        })?;
        if let Some(status) = polled {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            kill_group(child);
            let _ = child.kill();
            let _ = child.wait();
            tracing::warn!(cmd = %command, timeout = ?command.timeout, "command killed at deadline");
            return Err(CrestoreError::Timeout {
                command: command.to_string(),
                timeout: command.timeout,
            });
        }
        std::thread::sleep(Duration::from_millis(COMMAND_POLL_INTERVAL_MS));
    }
}

#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    let _ = cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn kill_group(child: &Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(pgid) = i32::try_from(child.id()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        tracing::debug!(pgid, error = %e, "process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

/// Output of one pipe, read on its own thread.
enum Drain {
    Pending(Receiver<String>),
    Done(String),
}

impl Drain {
    fn collect_until(self, deadline: Instant) -> Self {
        match self {
            Self::Pending(rx) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(remaining) {
                    Ok(text) => Self::Done(text),
                    Err(RecvTimeoutError::Timeout) => Self::Pending(rx),
                    Err(RecvTimeoutError::Disconnected) => Self::Done(String::new()),
                }
            }
            done @ Self::Done(_) => done,
        }
    }

    const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    fn into_text(self) -> String {
        match self {
            Self::Done(text) => text,
            Self::Pending(_) => String::new(),
        }
    }
}

/// Reads a pipe to the end on a separate thread so the child never blocks.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Drain {
    let Some(mut pipe) = pipe else {
        return Drain::Done(String::new());
    };
    let (tx, rx) = mpsc::channel();
    let _reader = std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    Drain::Pending(rx)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str, timeout: Duration) -> CommandSpec {
        CommandSpec::new("sh", timeout).arg("-c").arg(script)
    }

    #[test]
    fn captures_stdout_and_exit_code() {
        let out = SystemRunner
            .run(&sh("echo one; echo two; echo err >&2", Duration::from_secs(5)))
            .expect("run");
        assert!(out.success());
        assert_eq!(out.stdout_lines(), vec!["one", "two"]);
        assert_eq!(out.stderr.trim(), "err");
    }

    #[test]
    fn non_zero_exit_is_output_not_error() {
        let out = SystemRunner
            .run(&sh("exit 3", Duration::from_secs(5)))
            .expect("run");
        assert_eq!(out.exit_code, 3);
        assert!(!out.success());
    }

    #[test]
    fn run_checked_maps_non_zero_to_command_failed() {
        let err = SystemRunner
            .run_checked(&sh("echo nope >&2; exit 1", Duration::from_secs(5)))
            .expect_err("must fail");
        match err {
            CrestoreError::CommandFailed { code, stderr, .. } => {
                assert_eq!(code, 1);
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn deadline_kills_slow_command() {
        let start = Instant::now();
        let err = SystemRunner
            .run(&sh("sleep 10", Duration::from_millis(200)))
            .expect_err("must time out");
        assert!(matches!(err, CrestoreError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn background_child_cannot_hold_pipes_past_deadline() {
        let start = Instant::now();
        let out = SystemRunner
            .run(&sh("sleep 6 & echo started", Duration::from_millis(300)))
            .expect("direct child exits in time");
        let elapsed = start.elapsed();
        assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
        assert_eq!(out.stdout_lines(), vec!["started"]);
        assert!(out.success());
    }

    #[test]
    fn deadline_kills_whole_process_group() {
        let start = Instant::now();
        let err = SystemRunner
            .run(&sh("sleep 6 & sleep 6", Duration::from_millis(200)))
            .expect_err("must time out");
        assert!(matches!(err, CrestoreError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn missing_binary_is_io_error() {
        let err = SystemRunner
            .run(&CommandSpec::new("/nonexistent/crestore-bin", Duration::from_secs(1)))
            .expect_err("must fail");
        assert!(matches!(err, CrestoreError::Io { .. }));
    }

    #[test]
    fn display_renders_command_line() {
        let spec = CommandSpec::new("crictl", Duration::from_secs(1)).args(["rmp", "-fa"]);
        assert_eq!(spec.to_string(), "crictl rmp -fa");
    }
}

/// Scripted runner for tests: records every command and answers from rules.
#[cfg(any(test, feature = "test-util"))]
pub mod scripted {
    use std::sync::Mutex;

    use super::{CommandRunner, CommandSpec, ExecOutput};
    use crestore_common::error::{CrestoreError, Result};

    enum Reply {
        Output(ExecOutput),
        Timeout,
    }

    /// Records commands and replies with the first rule whose pattern occurs
    /// in the rendered command line. Unmatched commands succeed silently.
    #[derive(Default)]
    pub struct ScriptedRunner {
        rules: Mutex<Vec<(String, Reply)>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        /// Creates a runner with no rules.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Answers matching commands with `stdout` and exit code 0.
        pub fn stdout(&self, pattern: &str, stdout: &str) {
            self.push(
                pattern,
                Reply::Output(ExecOutput {
                    stdout: stdout.into(),
                    ..ExecOutput::default()
                }),
            );
        }

        /// Answers matching commands with a failure.
        pub fn fail(&self, pattern: &str, code: i32, stderr: &str) {
            self.push(
                pattern,
                Reply::Output(ExecOutput {
                    stdout: String::new(),
                    stderr: stderr.into(),
                    exit_code: code,
                }),
            );
        }

        /// Answers matching commands with a deadline error.
        pub fn time_out(&self, pattern: &str) {
            self.push(pattern, Reply::Timeout);
        }

        /// Returns every command line run so far.
        #[must_use]
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }

        fn push(&self, pattern: &str, reply: Reply) {
            if let Ok(mut rules) = self.rules.lock() {
                rules.push((pattern.into(), reply));
            }
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, command: &CommandSpec) -> Result<ExecOutput> {
            let line = command.to_string();
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(line.clone());
            }
            let rules = self.rules.lock().map_err(|_| CrestoreError::Config {
                message: "scripted runner lock poisoned".into(),
            })?;
            match rules.iter().find(|(pattern, _)| line.contains(pattern.as_str())) {
                Some((_, Reply::Output(out))) => Ok(out.clone()),
                Some((_, Reply::Timeout)) => Err(CrestoreError::Timeout {
                    command: line,
                    timeout: command.timeout,
                }),
                None => Ok(ExecOutput::default()),
            }
        }
    }
}
