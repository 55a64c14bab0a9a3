//! Supervised child processes for the external MySQL tools.
//!
//! A [`ManagedProcess`] owns the child and all three of its pipes. stderr is
//! always drained by a background thread so the child can never block on a
//! full pipe while we are still feeding its stdin. stdout is either drained
//! into a bounded ring of recent lines ([`OutputMode::Capture`]) or handed to
//! the caller as a raw reader ([`OutputMode::Stream`]).

use crate::copier::TransferSink;
use crate::error::{ChildFailure, CloneError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Default number of stdout lines kept for error reports.
pub const DEFAULT_MAX_OUTPUT_LINES: usize = 1024;

/// Program and arguments for one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
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

    /// The command line exactly as invoked.
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// The command line with `-p<password>` arguments masked, for logs.
    pub fn masked(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            if arg.len() > 2 && arg.starts_with("-p") {
                line.push_str("-p****");
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

/// What to do with the child's stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Drain into a ring that keeps the `max_lines` most recent lines.
    Capture { max_lines: usize },
    /// Leave stdout for the caller to read via [`ManagedProcess::take_stdout`].
    Stream,
}

/// Lines collected by a drain thread and read by the owning thread.
#[derive(Debug, Clone)]
pub struct LineBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
    max_lines: Option<usize>,
}

impl LineBuffer {
    pub fn bounded(max_lines: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::new())),
            max_lines: Some(max_lines),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::new())),
            max_lines: None,
        }
    }

    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock();
        if let Some(max) = self.max_lines {
            if max == 0 {
                return;
            }
            while lines.len() >= max {
                lines.pop_front();
            }
        }
        lines.push_back(line);
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn spawn_drain<R>(name: &str, reader: R, buffer: LineBuffer) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut reader = BufReader::new(reader);
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        while matches!(line.last(), Some(b'\n' | b'\r')) {
                            line.pop();
                        }
                        buffer.push(String::from_utf8_lossy(&line).into_owned());
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "output drain stopped");
                        break;
                    }
                }
            }
        })
}

fn exit_code(status: ExitStatus) -> i32 {
    // Killed by a signal: no code of its own.
    status.code().unwrap_or(1)
}

/// A spawned tool plus its pipes and captured output.
pub struct ManagedProcess {
    child: Child,
    command: CommandSpec,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    output: LineBuffer,
    errors: LineBuffer,
    drains: Vec<JoinHandle<()>>,
    exit_code: Option<i32>,
}

impl ManagedProcess {
    pub fn start(command: CommandSpec, mode: OutputMode) -> Result<Self> {
        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CloneError::io(format!("starting {}", command.program.display()), e))?;
        tracing::info!(command = %command.masked(), pid = child.id(), "spawned");

        let output = match mode {
            OutputMode::Capture { max_lines } => LineBuffer::bounded(max_lines),
            OutputMode::Stream => LineBuffer::bounded(0),
        };
        let mut process = Self {
            child,
            command,
            stdin: None,
            stdout: None,
            output,
            errors: LineBuffer::unbounded(),
            drains: Vec::new(),
            exit_code: None,
        };
        process.stdin = process.child.stdin.take();

        if let Some(stderr) = process.child.stderr.take() {
            let drain = spawn_drain("stderr-drain", stderr, process.errors.clone())
                .map_err(|e| CloneError::io("starting stderr drain", e))?;
            process.drains.push(drain);
        }

        let stdout = process.child.stdout.take();
        match mode {
            OutputMode::Capture { .. } => {
                if let Some(stdout) = stdout {
                    let drain = spawn_drain("stdout-drain", stdout, process.output.clone())
                        .map_err(|e| CloneError::io("starting stdout drain", e))?;
                    process.drains.push(drain);
                }
            }
            OutputMode::Stream => process.stdout = stdout,
        }

        Ok(process)
    }

    pub fn command(&self) -> &CommandSpec {
        &self.command
    }

    /// Take the raw stdout reader. Only available in [`OutputMode::Stream`].
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// A sink bound to the child's stdin.
    pub fn stdin(&mut self) -> ProcessStdin<'_> {
        ProcessStdin { process: self }
    }

    /// Close stdin so the child sees end of input.
    pub fn close_stdin(&mut self) {
        self.stdin.take();
    }

    /// Write a line to stdin, flush, and check the child is still healthy.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        let mut stdin = self.stdin();
        if let Err(e) = stdin
            .write_all(line.as_bytes())
            .and_then(|_| stdin.write_all(b"\n"))
            .and_then(|_| stdin.flush())
        {
            return Err(stdin.write_failed(e));
        }
        self.check()
    }

    /// Most recent stdout lines (capture mode).
    pub fn stdout_lines(&self) -> Vec<String> {
        self.output.snapshot()
    }

    /// Everything the child wrote to stderr so far.
    pub fn stderr_lines(&self) -> Vec<String> {
        self.errors.snapshot()
    }

    /// Exit code if the child has already terminated. Never blocks.
    pub fn try_exit_code(&mut self) -> Result<Option<i32>> {
        if let Some(code) = self.exit_code {
            return Ok(Some(code));
        }
        let status = self
            .child
            .try_wait()
            .map_err(|e| CloneError::io("polling child process", e))?;
        self.exit_code = status.map(exit_code);
        Ok(self.exit_code)
    }

    /// Fail if the child has exited non-zero; a running child passes.
    pub fn check(&mut self) -> Result<()> {
        match self.try_exit_code()? {
            Some(code) if code != 0 => Err(self.failure(code).into()),
            _ => Ok(()),
        }
    }

    /// Close our ends of the pipes and block until the child exits.
    ///
    /// There is no timeout: a hung tool hangs the run.
    pub fn wait(&mut self) -> Result<i32> {
        self.close_stdin();
        self.stdout.take();
        if self.exit_code.is_none() {
            let status = self
                .child
                .wait()
                .map_err(|e| CloneError::io("waiting for child process", e))?;
            self.exit_code = Some(exit_code(status));
        }
        self.join_drains();
        let code = self.exit_code.unwrap_or(1);
        tracing::debug!(command = %self.command.masked(), code, "exited");
        Ok(code)
    }

    /// Wait, then turn a non-zero exit into a [`ChildFailure`].
    pub fn wait_success(&mut self) -> Result<()> {
        match self.wait()? {
            0 => Ok(()),
            code => Err(self.failure(code).into()),
        }
    }

    /// Close the pipes, kill the child if it is still running and reap it.
    pub fn kill(&mut self) {
        self.stdin.take();
        self.stdout.take();
        if self.exit_code.is_none() {
            if let Ok(None) = self.child.try_wait() {
                tracing::debug!(command = %self.command.masked(), "killing child");
                let _ = self.child.kill();
            }
            self.exit_code = self.child.wait().ok().map(exit_code);
        }
        self.join_drains();
    }

    fn failure(&mut self, code: i32) -> ChildFailure {
        // The child is gone, so the drains are about to hit end of file.
        self.join_drains();
        ChildFailure {
            code,
            command: self.command.command_line(),
            stderr: self.errors.snapshot(),
            output: self.output.snapshot(),
        }
    }

    fn join_drains(&mut self) {
        for drain in self.drains.drain(..) {
            if drain.join().is_err() {
                tracing::warn!("output drain thread panicked");
            }
        }
    }

    fn write_error(&mut self, err: io::Error) -> CloneError {
        if err.kind() == io::ErrorKind::BrokenPipe {
            match self.wait() {
                Ok(0) => {}
                Ok(code) => return self.failure(code).into(),
                Err(e) => return e,
            }
        }
        CloneError::io(
            format!("writing to {}", self.command.program.display()),
            err,
        )
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Writable sink bound to a child's stdin.
pub struct ProcessStdin<'a> {
    process: &'a mut ManagedProcess,
}

impl Write for ProcessStdin<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.process.stdin.as_mut() {
            Some(stdin) => stdin.write(buf),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stdin already closed",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.process.stdin.as_mut() {
            Some(stdin) => stdin.flush(),
            None => Ok(()),
        }
    }
}

impl TransferSink for ProcessStdin<'_> {
    fn check(&mut self) -> Result<()> {
        self.process.check()
    }

    fn write_failed(&mut self, err: io::Error) -> CloneError {
        self.process.write_error(err)
    }
}
