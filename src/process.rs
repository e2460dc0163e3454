//! Bounded subprocess execution.
//!
//! Children are spawned in their own process group. Once the direct child
//! exits, or the deadline passes, the whole group is killed so background
//! descendants cannot keep the output pipes open.

use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long to keep collecting output after the process group is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Captured output of a completed subprocess.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// How a bounded execution ended.
#[derive(Debug, Clone)]
pub enum ExecOutcome {
    Completed(ProcessOutput),
    /// Exceeded the deadline; the process group was killed
    TimedOut { elapsed: Duration },
}

/// Run `cmd` to completion or until `timeout`, capturing stdout and stderr.
///
/// Pipes are drained on reader threads while waiting so a chatty child cannot
/// block on a full pipe. Output collection is itself bounded: a descendant
/// that escaped the group and still holds a pipe costs at most `DRAIN_GRACE`.
pub fn run_with_timeout(mut cmd: Command, timeout: Duration) -> std::io::Result<ExecOutcome> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    isolate_process_group(&mut cmd);

    let start = Instant::now();
    let mut child = cmd.spawn()?;

    let stdout_rx = spawn_reader(child.stdout.take());
    let stderr_rx = spawn_reader(child.stderr.take());

    loop {
        if let Some(status) = child.try_wait()? {
            kill_group(&child);
            let deadline = Instant::now() + DRAIN_GRACE;
            return Ok(ExecOutcome::Completed(ProcessOutput {
                status,
                stdout: drain(&stdout_rx, deadline),
                stderr: drain(&stderr_rx, deadline),
            }));
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            terminate(&mut child);
            let deadline = Instant::now() + DRAIN_GRACE;
            drain(&stdout_rx, deadline);
            drain(&stderr_rx, deadline);
            return Ok(ExecOutcome::TimedOut { elapsed });
        }

        thread::sleep(POLL_INTERVAL.min(timeout - elapsed));
    }
}

/// Run `cmd` without a deadline, capturing output. Used for provisioning steps.
pub fn run_captured(mut cmd: Command) -> std::io::Result<ProcessOutput> {
    let out = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()?;
    Ok(ProcessOutput {
        status: out.status,
        stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
    })
}

/// Forward everything read from `pipe` in chunks; the channel disconnects at EOF.
fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = channel::unbounded();
    if let Some(mut pipe) = pipe {
        thread::spawn(move || {
            let mut buf = [0u8; 8192];
            loop {
                match pipe.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }
    rx
}

/// Collect chunks until the reader hits EOF or `deadline` passes.
fn drain(rx: &Receiver<Vec<u8>>, deadline: Instant) -> String {
    let mut buf = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(chunk) => buf.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                log::debug!("output pipe still open after the process exited; truncating");
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(unix)]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_cmd: &mut Command) {}

/// SIGKILL whatever is left in the child's process group. ESRCH (group already
/// empty) is the normal case.
#[cfg(unix)]
fn kill_group(child: &Child) -> bool {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    // The child leads its own group, so its pid is the group id.
    let pgid = Pid::from_raw(child.id() as i32);
    match killpg(pgid, Signal::SIGKILL) {
        Ok(()) => {
            log::debug!("killed leftover processes in group {}", pgid);
            true
        }
        Err(nix::errno::Errno::ESRCH) => true,
        Err(e) => {
            log::debug!("killpg({}) failed: {}", pgid, e);
            false
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) -> bool {
    false
}

fn terminate(child: &mut Child) {
    if !kill_group(child) {
        let _ = child.kill();
    }
    let _ = child.wait();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_captures_output_and_status() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err 1>&2; exit 3"]);

        match run_with_timeout(cmd, Duration::from_secs(10)).unwrap() {
            ExecOutcome::Completed(out) => {
                assert_eq!(out.status.code(), Some(3));
                assert_eq!(out.stdout.trim(), "out");
                assert_eq!(out.stderr.trim(), "err");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_large_output_is_not_truncated() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "i=0; while [ $i -lt 20000 ]; do echo line$i; i=$((i+1)); done"]);

        match run_with_timeout(cmd, Duration::from_secs(20)).unwrap() {
            ExecOutcome::Completed(out) => {
                assert!(out.success());
                assert_eq!(out.stdout.lines().count(), 20000);
                assert_eq!(out.stdout.lines().last(), Some("line19999"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_timeout_kills_process_group() {
        // The background sleep holds the stdout pipe open; only a group kill
        // lets the reader threads finish.
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 30 & sleep 30"]);

        let start = Instant::now();
        let outcome = run_with_timeout(cmd, Duration::from_millis(300)).unwrap();
        assert!(matches!(outcome, ExecOutcome::TimedOut { .. }));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_background_descendant_does_not_hold_up_completion() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo done; sleep 6 & exit 0"]);

        let start = Instant::now();
        let outcome = run_with_timeout(cmd, Duration::from_millis(500)).unwrap();
        let elapsed = start.elapsed();

        assert!(elapsed < Duration::from_secs(3), "returned after {:?}", elapsed);
        match outcome {
            ExecOutcome::Completed(out) => {
                assert!(out.success());
                assert_eq!(out.stdout.trim(), "done");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_spawn_failure_is_io_error() {
        let cmd = Command::new("/definitely/not/a/binary");
        assert!(run_with_timeout(cmd, Duration::from_secs(1)).is_err());
    }
}
