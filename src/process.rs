//! Two-phase subprocess execution.
//!
//! [`start`] spawns the child with piped output and returns immediately;
//! [`RunningProcess::wait`] blocks until the child exits or the scenario's
//! [`CancelToken`] fires, in which case the whole process group is killed.
use crate::sandbox::Environment;
use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long the output pipes may stay open once the child is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub fn elapsed_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Scenario-scoped cancellation: an explicit flag plus an optional deadline.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// Token that cancels itself once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    #[cfg(test)]
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// How a waited-on child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Exited(ExitStatus),
    Cancelled,
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub exit: Exit,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// A spawned child whose output is being drained in the background.
#[derive(Debug)]
pub struct RunningProcess {
    child: Child,
    program: String,
    started: Instant,
    stdout: Option<JoinHandle<Vec<u8>>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
}

/// Spawn `program` with exactly `env` as its environment.
pub fn start(program: &Path, args: &[String], env: &Environment, cwd: &Path) -> Result<RunningProcess> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .env_clear()
        .envs(env.iter())
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawn {}", program.display()))?;
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);
    tracing::debug!(program = %program.display(), pid = child.id(), "spawned subprocess");
    Ok(RunningProcess {
        child,
        program: program.display().to_string(),
        started: Instant::now(),
        stdout,
        stderr,
    })
}

impl RunningProcess {
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Block until the child exits or `cancel` fires.
    ///
    /// Whatever is left of the child's process group is killed either way, so
    /// a backgrounded descendant cannot keep the output pipes open.
    pub fn wait(mut self, cancel: &CancelToken) -> Result<ProcessOutput> {
        let exit = loop {
            if let Some(status) = self
                .child
                .try_wait()
                .with_context(|| format!("check status of {}", self.program))?
            {
                self.kill_group();
                break Exit::Exited(status);
            }
            if cancel.is_cancelled() {
                tracing::warn!(program = %self.program, pid = self.child.id(), "cancelling subprocess");
                self.terminate();
                break Exit::Cancelled;
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let drain_deadline = Instant::now() + DRAIN_GRACE;
        let (stdout, stderr) = (self.stdout.take(), self.stderr.take());
        let stdout = self.collect(stdout, drain_deadline);
        let stderr = self.collect(stderr, drain_deadline);
        let duration = self.started.elapsed();
        tracing::debug!(
            program = %self.program,
            elapsed_ms = elapsed_millis(duration),
            ?exit,
            "subprocess finished"
        );
        Ok(ProcessOutput {
            exit,
            stdout,
            stderr,
            duration,
        })
    }

    fn terminate(&mut self) {
        self.kill_group();
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    // The child leads its own process group; this takes its descendants down too.
    fn kill_group(&self) {
        #[cfg(unix)]
        {
            if let Ok(pid) = libc::pid_t::try_from(self.child.id()) {
                unsafe {
                    libc::kill(-pid, libc::SIGKILL);
                }
            }
        }
    }

    /// Join a drain thread, giving up once `deadline` passes.
    fn collect(&self, handle: Option<JoinHandle<Vec<u8>>>, deadline: Instant) -> String {
        let Some(handle) = handle else {
            return String::new();
        };
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!(program = %self.program, "output pipe still open; dropping its output");
                return String::new();
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        let bytes = handle.join().unwrap_or_default();
        String::from_utf8_lossy(&bytes).to_string()
    }
}

impl Drop for RunningProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            self.terminate();
        }
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}
