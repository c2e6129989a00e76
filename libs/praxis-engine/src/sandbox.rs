/// Sandbox Runner - Bounded Execution of One Untrusted Program
///
/// **Core Responsibility:**
/// Run one compiled program with one input stream under CPU, wall-clock,
/// memory, and output limits, and report raw results.
///
/// **Critical Architectural Boundary:**
/// - Knows nothing about test cases, problems, or verdicts
/// - A nonzero exit code is data for the caller, not a sandbox failure
///
/// **Enforcement model (Linux):**
/// - Each run gets a private scratch directory, removed on return
/// - The child starts its own session, so the entire process tree dies
///   from a single `kill(-pgid, SIGKILL)` - no orphans on any return path
/// - The child is moved into a private network namespace before exec, so
///   untrusted code has no network reachability at all
/// - `RLIMIT_FSIZE` of zero denies regular-file writes everywhere; the
///   program's output flows through stdout/stderr pipes, which the limit
///   does not touch
/// - `RLIMIT_CPU` catches CPU-bound loops even while the wall clock is idle;
///   a tokio deadline catches blocked-on-I/O waits the CPU limit never sees
/// - Memory is watched via `/proc/<pid>/status` (VmHWM) and breaching the
///   ceiling kills the group, which also yields peak usage for the verdict
/// - stdout/stderr are captured up to the output cap; the rest is drained
///   and discarded with an explicit truncation flag
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use praxis_common::types::ResourceLimits;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::SandboxError;

const MEM_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Raw outcome of one sandboxed run.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: bool,
    /// None when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub duration_ms: u64,
    pub peak_memory_bytes: u64,
    pub timed_out: bool,
    pub memory_exceeded: bool,
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Execute `binary` feeding it `input`, under `limits`. Cancellation
    /// tears the process tree down immediately.
    async fn run(
        &self,
        binary: &Path,
        input: &[u8],
        limits: &ResourceLimits,
        cancel: &CancelToken,
    ) -> Result<RunOutput, SandboxError>;
}

/// Production sandbox: direct child processes in their own session with
/// rlimits and a proc-status memory watchdog.
pub struct ProcessSandbox {
    scratch_root: PathBuf,
}

impl ProcessSandbox {
    pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            scratch_root: scratch_root.into(),
        }
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    #[tracing::instrument(skip(self, binary, input, cancel), fields(input_bytes = input.len()))]
    async fn run(
        &self,
        binary: &Path,
        input: &[u8],
        limits: &ResourceLimits,
        cancel: &CancelToken,
    ) -> Result<RunOutput, SandboxError> {
        if cancel.is_cancelled() {
            return Err(SandboxError::Cancelled);
        }

        std::fs::create_dir_all(&self.scratch_root).map_err(SandboxError::Scratch)?;
        let scratch = tempfile::Builder::new()
            .prefix("praxis-run-")
            .tempdir_in(&self.scratch_root)
            .map_err(SandboxError::Scratch)?;

        let mut cmd = Command::new(binary);
        cmd.current_dir(scratch.path())
            .env_clear()
            .env("PATH", "/usr/bin:/bin")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let cpu_limit_secs = limits.cpu_time_ms.div_ceil(1000).max(1);
        unsafe {
            cmd.pre_exec(move || {
                // New session: the child and everything it forks share one
                // process group we can kill in a single shot.
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                // Private network namespace: unprivileged via a user
                // namespace pair, plain net namespace when already
                // privileged. Fails the spawn rather than running the
                // program with network access.
                if libc::unshare(libc::CLONE_NEWUSER | libc::CLONE_NEWNET) != 0
                    && libc::unshare(libc::CLONE_NEWNET) != 0
                {
                    return Err(std::io::Error::last_os_error());
                }
                // No regular-file writes anywhere. Pipes are exempt, so
                // stdout/stderr still flow.
                let fsize = libc::rlimit {
                    rlim_cur: 0,
                    rlim_max: 0,
                };
                if libc::setrlimit(libc::RLIMIT_FSIZE, &fsize) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                let cpu = libc::rlimit {
                    rlim_cur: cpu_limit_secs,
                    rlim_max: cpu_limit_secs + 1,
                };
                if libc::setrlimit(libc::RLIMIT_CPU, &cpu) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                let core = libc::rlimit {
                    rlim_cur: 0,
                    rlim_max: 0,
                };
                libc::setrlimit(libc::RLIMIT_CORE, &core);
                Ok(())
            });
        }

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(SandboxError::Spawn)?;
        let pid = child.id().map(|p| p as i32);

        // Feed input and close stdin from a separate task: a program that
        // never reads would otherwise block this write once the pipe buffer
        // fills, stalling the deadline loop below. The program may also exit
        // without reading; a dead reader is not a fault.
        if let Some(mut stdin) = child.stdin.take() {
            let input = input.to_vec();
            tokio::spawn(async move {
                let _ = stdin.write_all(&input).await;
                let _ = stdin.shutdown().await;
            });
        }

        let cap = limits.output_byte_cap as usize;
        let stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Io(other_io("stdout pipe not captured")))?;
        let stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::Io(other_io("stderr pipe not captured")))?;
        let stdout_task = tokio::spawn(read_capped(stdout_pipe, cap));
        let stderr_task = tokio::spawn(read_capped(stderr_pipe, cap));

        let deadline = started + Duration::from_millis(limits.wall_time_ms);
        let mut poll = tokio::time::interval(MEM_POLL_INTERVAL);
        let mut timed_out = false;
        let mut memory_exceeded = false;
        let mut cancelled = false;
        // Peak memory is sampled at spawn and on every poll tick; once the
        // child is reaped /proc/<pid> is gone, so a run shorter than one
        // tick reports only the spawn sample. Best effort.
        let mut peak_memory_bytes = pid.and_then(vm_hwm_bytes).unwrap_or(0);

        let status = loop {
            tokio::select! {
                status = child.wait() => break status?,
                _ = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    debug!("run cancelled, killing process group");
                    kill_group(pid);
                }
                _ = poll.tick() => {
                    if let Some(pid) = pid {
                        if let Some(rss) = vm_hwm_bytes(pid) {
                            peak_memory_bytes = peak_memory_bytes.max(rss);
                            if rss > limits.memory_bytes && !memory_exceeded {
                                memory_exceeded = true;
                                warn!(memory_bytes = limits.memory_bytes, "memory ceiling exceeded, killing process group");
                                kill_group(Some(pid));
                            }
                        }
                    }
                    if Instant::now() >= deadline && !timed_out && !memory_exceeded && !cancelled {
                        timed_out = true;
                        warn!(wall_time_ms = limits.wall_time_ms, "wall clock budget exceeded, killing process group");
                        kill_group(pid);
                    }
                }
            }
        };

        // The direct child is reaped; sweep any stragglers it forked so
        // nothing outlives this call.
        kill_group(pid);

        let (stdout, stdout_truncated) = stdout_task.await.unwrap_or_default();
        let (stderr, _) = stderr_task.await.unwrap_or_default();

        if cancelled {
            return Err(SandboxError::Cancelled);
        }

        let exit_code = status.code();
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };

        // RLIMIT_CPU delivers SIGXCPU at the soft limit and SIGKILL at the
        // hard limit; either way the CPU budget was exhausted.
        if let Some(sig) = signal {
            if sig == libc::SIGXCPU || (sig == libc::SIGKILL && !memory_exceeded && !timed_out) {
                timed_out = true;
            }
        }

        Ok(RunOutput {
            stdout,
            stderr,
            stdout_truncated,
            exit_code,
            signal,
            duration_ms: started.elapsed().as_millis() as u64,
            peak_memory_bytes,
            timed_out,
            memory_exceeded,
        })
    }
}

fn other_io(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, msg.to_string())
}

/// SIGKILL the whole process group. Best effort: the group may already be
/// gone.
fn kill_group(pid: Option<i32>) {
    if let Some(pid) = pid {
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }
}

/// Peak resident set size of `pid` in bytes, from /proc/<pid>/status.
fn vm_hwm_bytes(pid: i32) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmHWM:") {
            let kb: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

/// Read up to `cap` bytes, then keep draining so the writer never blocks on
/// a full pipe; drained bytes are discarded and flagged.
async fn read_capped<R: AsyncRead + Unpin>(mut pipe: R, cap: usize) -> (Vec<u8>, bool) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut truncated = false;
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if buf.len() < cap {
                    let take = n.min(cap - buf.len());
                    buf.extend_from_slice(&chunk[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }
    (buf, truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn limits() -> ResourceLimits {
        ResourceLimits {
            cpu_time_ms: 2_000,
            wall_time_ms: 2_000,
            memory_bytes: 256 * 1024 * 1024,
            output_byte_cap: 64 * 1024,
        }
    }

    /// Write an executable shell script to use as a stand-in artifact.
    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("prog.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[tokio::test]
    async fn test_echoes_stdin() {
        let sandbox = ProcessSandbox::new(std::env::temp_dir().join("praxis-test"));
        let output = sandbox
            .run(Path::new("/bin/cat"), b"hello\n", &limits(), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(output.stdout, b"hello\n");
        assert_eq!(output.exit_code, Some(0));
        assert!(!output.timed_out);
        assert!(!output.memory_exceeded);
        assert!(!output.stdout_truncated);
    }

    #[tokio::test]
    async fn test_empty_input_is_valid() {
        let sandbox = ProcessSandbox::new(std::env::temp_dir().join("praxis-test"));
        let output = sandbox
            .run(Path::new("/bin/cat"), b"", &limits(), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(output.stdout, b"");
        assert_eq!(output.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_forwarded_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let prog = script(dir.path(), "exit 3");

        let sandbox = ProcessSandbox::new(std::env::temp_dir().join("praxis-test"));
        let output = sandbox
            .run(&prog, b"", &limits(), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert!(!output.timed_out);
    }

    #[tokio::test]
    async fn test_wall_clock_timeout_kills_blocked_process() {
        let dir = tempfile::tempdir().unwrap();
        let prog = script(dir.path(), "sleep 30");

        let mut tight = limits();
        tight.wall_time_ms = 200;

        let sandbox = ProcessSandbox::new(std::env::temp_dir().join("praxis-test"));
        let started = Instant::now();
        let output = sandbox
            .run(&prog, b"", &tight, &CancelToken::new())
            .await
            .unwrap();

        assert!(output.timed_out);
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "timeout must return within bounded overhead, took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn test_output_capped_and_flagged() {
        let dir = tempfile::tempdir().unwrap();
        // ~60KB of output against a 1KB cap.
        let prog = script(
            dir.path(),
            "i=0\nwhile [ $i -lt 6000 ]; do echo xxxxxxxxx; i=$((i+1)); done",
        );

        let mut capped = limits();
        capped.output_byte_cap = 1024;

        let sandbox = ProcessSandbox::new(std::env::temp_dir().join("praxis-test"));
        let output = sandbox
            .run(&prog, b"", &capped, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(output.stdout.len(), 1024);
        assert!(output.stdout_truncated);
        assert_eq!(output.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_large_input_to_deaf_program_still_hits_deadline() {
        let dir = tempfile::tempdir().unwrap();
        // Never reads stdin; 1 MiB of input overflows the pipe buffer.
        let prog = script(dir.path(), "sleep 8");
        let input = vec![b'x'; 1024 * 1024];

        let mut tight = limits();
        tight.wall_time_ms = 300;

        let sandbox = ProcessSandbox::new(std::env::temp_dir().join("praxis-test"));
        let started = Instant::now();
        let output = sandbox
            .run(&prog, &input, &tight, &CancelToken::new())
            .await
            .unwrap();

        assert!(output.timed_out);
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "deadline must stay armed while input is fed, took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn test_memory_hog_is_killed_not_throttled() {
        let dir = tempfile::tempdir().unwrap();
        // Shell string doubling grows the process itself past any ceiling
        // within milliseconds.
        let prog = script(
            dir.path(),
            "s=xxxxxxxxxxxxxxxx\nwhile true; do s=\"$s$s\"; done",
        );

        let mut tight = limits();
        tight.memory_bytes = 64 * 1024 * 1024;
        tight.cpu_time_ms = 10_000;
        tight.wall_time_ms = 10_000;

        let sandbox = ProcessSandbox::new(std::env::temp_dir().join("praxis-test"));
        let started = Instant::now();
        let output = sandbox
            .run(&prog, b"", &tight, &CancelToken::new())
            .await
            .unwrap();

        assert!(output.memory_exceeded);
        assert!(output.peak_memory_bytes > tight.memory_bytes);
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "breach must kill, not throttle, took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn test_file_writes_outside_scratch_are_denied() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let target = outside.path().join("escape.txt");
        let prog = script(
            dir.path(),
            &format!("echo forbidden > {}\necho done", target.display()),
        );

        let sandbox = ProcessSandbox::new(std::env::temp_dir().join("praxis-test"));
        let output = sandbox
            .run(&prog, b"", &limits(), &CancelToken::new())
            .await
            .unwrap();

        let written = std::fs::metadata(&target).map(|m| m.len()).unwrap_or(0);
        assert_eq!(written, 0, "sandboxed program wrote {written} bytes outside its scratch");
        // The write attempt kills the program before it reaches the echo.
        assert!(!String::from_utf8_lossy(&output.stdout).contains("done"));
    }

    #[tokio::test]
    async fn test_no_network_interfaces_beyond_loopback() {
        let dir = tempfile::tempdir().unwrap();
        // /proc/net reflects the reader's own network namespace.
        let prog = script(dir.path(), "cat /proc/net/dev");

        let sandbox = ProcessSandbox::new(std::env::temp_dir().join("praxis-test"));
        let output = sandbox
            .run(&prog, b"", &limits(), &CancelToken::new())
            .await
            .unwrap();

        let stdout = String::from_utf8_lossy(&output.stdout);
        let interfaces: Vec<&str> = stdout
            .lines()
            .filter(|line| line.contains(':'))
            .map(|line| line.split(':').next().unwrap_or("").trim())
            .collect();
        assert_eq!(interfaces, vec!["lo"], "child sees interfaces {interfaces:?}");
    }

    #[tokio::test]
    async fn test_cancellation_tears_down_run() {
        let dir = tempfile::tempdir().unwrap();
        let prog = script(dir.path(), "sleep 30");

        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let sandbox = ProcessSandbox::new(std::env::temp_dir().join("praxis-test"));
        let started = Instant::now();
        let result = sandbox.run(&prog, b"", &limits(), &cancel).await;

        assert!(matches!(result, Err(SandboxError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_already_cancelled_never_spawns() {
        let cancel = CancelToken::new();
        cancel.cancel();

        let sandbox = ProcessSandbox::new(std::env::temp_dir().join("praxis-test"));
        let result = sandbox
            .run(Path::new("/bin/cat"), b"", &limits(), &cancel)
            .await;

        assert!(matches!(result, Err(SandboxError::Cancelled)));
    }

    #[test]
    fn test_vm_hwm_parses_own_status() {
        let own = std::process::id() as i32;
        let hwm = vm_hwm_bytes(own).expect("own VmHWM should be readable");
        assert!(hwm > 0);
    }
}
