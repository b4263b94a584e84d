//! Child process execution with a wall-clock deadline
//!
//! Both executors go through `run_with_deadline`: spawn in a fresh process
//! group, feed stdin then close it, race the wait against a timer, and kill
//! the whole group once the leader has exited (before it is reaped) or the
//! deadline passes.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitid, Id, WaitPidFlag};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default cap on captured bytes per stream
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Raw result of one child process
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessOutput {
    /// Exit code, -1 when killed by a signal or timed out
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Limits for one child process
#[derive(Debug, Clone, Copy)]
pub struct ProcessLimits {
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl ProcessLimits {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn with_max_output(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }
}

/// Spawn `cmd`, write `stdin` and close it, then wait at most `limits.timeout`.
///
/// The deadline covers the whole run, including draining stdout/stderr, so a
/// descendant that escapes the process group while holding a pipe open cannot
/// stall the caller. On timeout the process group is killed and the output is
/// discarded. Spawn failures are returned as-is so callers can tell a missing
/// binary (`ErrorKind::NotFound`) from other I/O problems.
pub async fn run_with_deadline(
    mut cmd: Command,
    stdin: &[u8],
    limits: ProcessLimits,
) -> io::Result<ProcessOutput> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    let pid = child.id();

    let mut stdout_task = child
        .stdout
        .take()
        .map(|out| spawn_reader(out, limits.max_output_bytes));
    let mut stderr_task = child
        .stderr
        .take()
        .map(|err| spawn_reader(err, limits.max_output_bytes));
    let stdin_pipe = child.stdin.take();
    let mut reaped = false;

    let run = async {
        let feed = async {
            // Dropping the handle closes the pipe, the program sees EOF even with no input
            if let Some(mut pipe) = stdin_pipe {
                if !stdin.is_empty() {
                    match pipe.write_all(stdin).await {
                        Ok(()) => {}
                        // Program exited or closed stdin without reading everything
                        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
                        Err(e) => return Err(e),
                    }
                }
            }
            Ok::<(), io::Error>(())
        };
        let (fed, exited) = tokio::join!(feed, wait_exited(pid));
        fed?;
        exited?;

        // The leader is a zombie until reaped, so its pid still names our group
        kill_group(pid);
        let status = child.wait().await?;
        reaped = true;

        let stdout = join_reader(&mut stdout_task).await?;
        let stderr = join_reader(&mut stderr_task).await?;
        Ok::<_, io::Error>((status, stdout, stderr))
    };

    let outcome = tokio::time::timeout(limits.timeout, run).await;

    match outcome {
        Ok(Ok((status, stdout, stderr))) => Ok(ProcessOutput {
            exit_code: exit_code(status),
            stdout,
            stderr,
            timed_out: false,
        }),
        Ok(Err(e)) => {
            if !reaped {
                kill_tree(&mut child, pid).await;
            }
            abort_reader(&stdout_task);
            abort_reader(&stderr_task);
            Err(e)
        }
        Err(_) if reaped => {
            // Something outside the group still holds the output pipes
            warn!(
                "Process {:?} exited but its output stayed open past {:?}",
                pid, limits.timeout
            );
            abort_reader(&stdout_task);
            abort_reader(&stderr_task);
            Ok(ProcessOutput {
                exit_code: -1,
                timed_out: true,
                ..Default::default()
            })
        }
        Err(_) => {
            debug!("Process {:?} exceeded {:?}, killing", pid, limits.timeout);
            kill_tree(&mut child, pid).await;
            abort_reader(&stdout_task);
            abort_reader(&stderr_task);
            Ok(ProcessOutput {
                exit_code: -1,
                timed_out: true,
                ..Default::default()
            })
        }
    }
}

/// Wait until the child has exited without reaping it
async fn wait_exited(pid: Option<u32>) -> io::Result<()> {
    let Some(pid) = pid else {
        return Ok(());
    };
    let pid = Pid::from_raw(pid as i32);

    tokio::task::spawn_blocking(move || {
        let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT;
        loop {
            match waitid(Id::Pid(pid), flags) {
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) => continue,
                // Already reaped by a kill on another path
                Err(Errno::ECHILD) => return Ok(()),
                Err(e) => return Err(io::Error::from(e)),
            }
        }
    })
    .await
    .map_err(io::Error::other)?
}

fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    match status.code() {
        Some(code) => code,
        None => {
            if let Some(signal) = status.signal() {
                debug!("Process terminated by signal {}", signal);
            }
            -1
        }
    }
}

fn kill_group(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill process group {}: {}", pid, e),
    }
}

async fn kill_tree(child: &mut Child, pid: Option<u32>) {
    kill_group(pid);
    // kill() also reaps the child
    if let Err(e) = child.kill().await {
        debug!("Child already gone: {}", e);
    }
}

fn spawn_reader<R>(mut reader: R, limit: usize) -> JoinHandle<io::Result<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut kept = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            // Keep draining past the cap so the writer never blocks on a full pipe
            let room = limit.saturating_sub(kept.len());
            kept.extend_from_slice(&buf[..n.min(room)]);
        }
        Ok(String::from_utf8_lossy(&kept).into_owned())
    })
}

async fn join_reader(task: &mut Option<JoinHandle<io::Result<String>>>) -> io::Result<String> {
    match task {
        Some(task) => task.await.map_err(io::Error::other)?,
        None => Ok(String::new()),
    }
}

fn abort_reader(task: &Option<JoinHandle<io::Result<String>>>) {
    if let Some(task) = task {
        task.abort();
    }
}
