use crate::process::CrossotopeError;

use crossbeam_channel::{bounded, RecvTimeoutError};
use log::{debug, warn};
use std::env;
use std::ffi::{OsStr, OsString};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A single call of an external program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub working_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Invocation {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Working directory of the child only; the caller's stays untouched.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// File name of the program, for messages.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    pub fn arg_strings(&self) -> Vec<String> {
        self.args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }
}

/// Runs external programs. Implementations return the captured stdout and
/// turn every failure into an error.
pub trait ToolRunner {
    fn run(&self, invocation: &Invocation) -> Result<String, CrossotopeError>;

    /// Finds a required tool; the default searches `PATH`.
    fn locate(&self, tool: &str) -> Result<PathBuf, CrossotopeError> {
        find_on_path(tool).ok_or_else(|| CrossotopeError::MissingDependency(tool.to_string()))
    }
}

/// Blocking runner backed by `std::process`, with an optional time limit.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        ProcessRunner { timeout }
    }

    fn wait(&self, child: &mut Child, program: &str, started: Instant) -> Result<ExitStatus, CrossotopeError> {
        let limit = match self.timeout {
            Some(limit) => limit,
            None => return Ok(child.wait()?),
        };
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if started.elapsed() >= limit {
                warn!("{} exceeded {}s, killing it", program, limit.as_secs());
                kill_process_group(child);
                return Err(self.timeout_error(program, limit));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn timeout_error(&self, program: &str, limit: Duration) -> CrossotopeError {
        CrossotopeError::Timeout {
            program: program.to_string(),
            seconds: limit.as_secs(),
        }
    }
}

impl ToolRunner for ProcessRunner {
    fn run(&self, invocation: &Invocation) -> Result<String, CrossotopeError> {
        let program = invocation.program_name();
        debug!("Running {} {:?}", invocation.program.display(), invocation.arg_strings());

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(dir) = &invocation.working_dir {
            if !dir.is_dir() {
                return Err(CrossotopeError::NotFound(dir.clone()));
            }
            command.current_dir(dir);
        }
        // With a time limit the tool leads its own process group, so a kill
        // also reaches whatever it started
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            if self.timeout.is_some() {
                command.process_group(0);
            }
        }

        let mut child = command.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                CrossotopeError::MissingDependency(invocation.program.display().to_string())
            }
            _ => CrossotopeError::Io(e),
        })?;
        let started = Instant::now();

        // Drain stdout on a separate thread so a chatty child never blocks
        // on a full pipe while we poll for its exit.
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "child stdout was not captured"))?;
        let (sender, receiver) = bounded(1);
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let result = stdout.read_to_end(&mut buffer).map(|_| buffer);
            let _ = sender.send(result);
        });

        let status = self.wait(&mut child, &program, started)?;
        let vanished = || io::Error::new(io::ErrorKind::Other, "stdout reader thread vanished");
        let captured = match self.timeout {
            None => receiver.recv().map_err(|_| vanished())??,
            // Leftover grandchildren can hold stdout open after the tool exits
            Some(limit) => match receiver.recv_timeout(limit.saturating_sub(started.elapsed())) {
                Ok(result) => result?,
                Err(RecvTimeoutError::Timeout) => {
                    warn!("{} left processes holding its output open, killing them", program);
                    kill_process_group(&mut child);
                    return Err(self.timeout_error(&program, limit));
                }
                Err(RecvTimeoutError::Disconnected) => return Err(vanished().into()),
            },
        };
        let captured = String::from_utf8_lossy(&captured).into_owned();

        if !status.success() {
            for line in captured.lines() {
                debug!("[{}] {}", program, line);
            }
            return Err(CrossotopeError::ExternalTool {
                program,
                status: describe_status(&status),
            });
        }
        Ok(captured)
    }
}

/// Kills the group led by `child`, then the child itself, and reaps it.
/// Only called for children spawned as group leaders.
#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    let status = Command::new("kill")
        .args(["-s", "KILL", "--"])
        .arg(format!("-{}", child.id()))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = status {
        debug!("Could not signal process group {}: {}", child.id(), e);
    }
    // The child may already have exited on its own
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn describe_status(status: &ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by a signal)".to_string(),
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Looks `tool` up in the directories of `PATH`, like `which`.
pub fn find_on_path(tool: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(tool))
        .find(|candidate| is_executable(candidate))
}
