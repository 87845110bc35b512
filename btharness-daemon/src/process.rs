/*!
 * Auxiliary Processes
 * Handle-scoped ownership of the OBEX receiver and the audio player
 */

use std::io;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, warn};

const TERMINATE_GRACE: Duration = Duration::from_secs(2);
const REAP_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to stop {program}: {source}")]
    Stop {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Program and argument template; placeholders such as `{dir}` are filled at spawn time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl ProgramSpec {
    pub fn new(program: &str, args: &[String]) -> Self {
        Self {
            program: program.to_string(),
            args: args.to_vec(),
        }
    }

    pub fn render_args(&self, placeholder: &str, value: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(placeholder, value))
            .collect()
    }

    pub fn spawn(&self, placeholder: &str, value: &str) -> Result<ManagedProcess, ProcessError> {
        ManagedProcess::spawn(&self.program, &self.render_args(placeholder, value))
    }
}

/// A child process this daemon started and is responsible for stopping.
///
/// Only the exact pid spawned here is ever signalled.
#[derive(Debug)]
pub struct ManagedProcess {
    program: String,
    child: Child,
}

impl ManagedProcess {
    pub fn spawn(program: &str, args: &[String]) -> Result<Self, ProcessError> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: program.to_string(),
                source,
            })?;

        debug!("Started {} (pid {})", program, child.id());
        Ok(Self {
            program: program.to_string(),
            child,
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// SIGTERM, wait for the grace period, then SIGKILL. Always reaps the child.
    pub fn terminate(&mut self) -> Result<(), ProcessError> {
        if !self.is_running() {
            return Ok(());
        }

        let pid = Pid::from_raw(self.child.id() as i32);
        if let Err(err) = kill(pid, Signal::SIGTERM) {
            warn!("SIGTERM to {} (pid {}) failed: {}", self.program, pid, err);
        }

        let deadline = Instant::now() + TERMINATE_GRACE;
        while Instant::now() < deadline {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    debug!("{} exited with {}", self.program, status);
                    return Ok(());
                }
                Ok(None) => thread::sleep(REAP_INTERVAL),
                Err(source) => return Err(self.stop_error(source)),
            }
        }

        warn!("{} ignored SIGTERM, killing", self.program);
        self.child.kill().map_err(|source| self.stop_error(source))?;
        self.child.wait().map_err(|source| self.stop_error(source))?;
        Ok(())
    }

    fn stop_error(&self, source: io::Error) -> ProcessError {
        ProcessError::Stop {
            program: self.program.clone(),
            source,
        }
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if let Err(err) = self.terminate() {
            warn!("{}", err);
        }
    }
}
