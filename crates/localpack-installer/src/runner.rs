use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::{self, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

/// Time budgets for the three kinds of subprocess the installer starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub extract: Duration,
    pub validate: Duration,
    pub cache_refresh: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            extract: Duration::from_secs(600),
            validate: Duration::from_secs(10),
            cache_refresh: Duration::from_secs(30),
        }
    }
}

/// Shared flag that aborts in-flight subprocesses when set.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: OsString,
    args: Vec<OsString>,
    timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl AsRef<OsStr>, timeout: Duration) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("'{program}' was not found on PATH")]
    NotFound { program: String },

    #[error("'{program}' timed out after {}s", timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },

    #[error("'{program}' was cancelled")]
    Cancelled { program: String },

    #[error("'{program}' exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("failed to run '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Subprocess capability injected into the engine; tests substitute fakes.
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError>;

    fn exists(&self, program: &str) -> bool;
}

/// Runs real processes, enforcing each command's timeout and the shared
/// cancellation token by killing the child.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    cancel: CancellationToken,
    poll_interval: Duration,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            poll_interval: Duration::from_millis(25),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let program = spec.program_name();
        if self.cancel.is_cancelled() {
            return Err(CommandError::Cancelled { program });
        }

        let mut command = Command::new(spec.program());
        command
            .args(spec.arguments())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(command = %spec, timeout_secs = spec.timeout().as_secs(), "spawning");
        let mut child = command.spawn().map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                CommandError::NotFound {
                    program: program.clone(),
                }
            } else {
                CommandError::Io {
                    program: program.clone(),
                    source,
                }
            }
        })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let deadline = Instant::now() + spec.timeout();

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(source) => {
                    kill_and_reap(&mut child);
                    return Err(CommandError::Io { program, source });
                }
            }
            if self.cancel.is_cancelled() {
                kill_and_reap(&mut child);
                return Err(CommandError::Cancelled { program });
            }
            if Instant::now() >= deadline {
                kill_and_reap(&mut child);
                return Err(CommandError::TimedOut {
                    program,
                    timeout: spec.timeout(),
                });
            }
            thread::sleep(self.poll_interval);
        };

        let output = CommandOutput {
            stdout: collect(stdout),
            stderr: collect(stderr),
        };
        if status.success() {
            return Ok(output);
        }

        Err(CommandError::Failed {
            program,
            status: status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    fn exists(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

fn drain<R>(stream: Option<R>) -> Option<JoinHandle<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    stream.map(|mut stream| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = stream.read_to_end(&mut buffer);
            buffer
        })
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
