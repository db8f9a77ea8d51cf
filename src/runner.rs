use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::config::{CheckSpec, CheckTable};
use crate::probe::DetectedToolchain;
use crate::report::{CheckResult, CheckStatus, ToolchainResults};

/// Captured output is tail-truncated to this many bytes per stream so a
/// runaway process cannot balloon the report.
pub const TAIL_BYTES: usize = 4096;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Process-group leaders of every check currently in flight, so an external
/// kill of the CLI can take the whole invocation down with it.
static LIVE_GROUPS: Mutex<Vec<u32>> = Mutex::new(Vec::new());

fn track_group(pid: u32) {
    if let Ok(mut live) = LIVE_GROUPS.lock() {
        live.push(pid);
    }
}

fn untrack_group(pid: u32) {
    if let Ok(mut live) = LIVE_GROUPS.lock() {
        live.retain(|p| *p != pid);
    }
}

/// Terminate every in-flight check's process group. Used by the timeout
/// path indirectly and by the external-cancellation handler directly.
#[cfg(unix)]
pub fn cancel_all_live() {
    let pids: Vec<u32> = LIVE_GROUPS
        .lock()
        .map(|live| live.clone())
        .unwrap_or_default();
    for pid in pids {
        terminate_group(pid);
    }
}

/// Forward an external SIGTERM/SIGINT to all in-flight subprocesses before
/// exiting, so a host killing the hook cannot orphan a stuck check. Exits
/// with the conventional 128+signal code.
#[cfg(unix)]
pub fn install_cancel_handler() -> std::io::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            cancel_all_live();
            std::process::exit(128 + signal);
        }
    });
    Ok(())
}

/// Run every detected toolchain's check chain and collect results in
/// detection order. Chains fan out across toolchains (they touch disjoint
/// tool invocations); `sequential` forces the fallback, which must produce
/// an identical report.
pub fn run_all(
    toolchains: &[DetectedToolchain],
    table: &CheckTable,
    sequential: bool,
    verbose: u8,
) -> Vec<ToolchainResults> {
    let run_one = |tc: &DetectedToolchain| ToolchainResults {
        kind: tc.kind,
        checks: run_chain(table.specs_for(tc.kind), &tc.root, verbose),
    };

    if sequential || toolchains.len() <= 1 {
        toolchains.iter().map(run_one).collect()
    } else {
        toolchains.par_iter().map(run_one).collect()
    }
}

/// Run one toolchain's checks sequentially in declared order. A failure
/// never stops the chain — every configured check gets a result so the
/// caller sees the full picture.
pub fn run_chain(specs: &[CheckSpec], cwd: &Path, verbose: u8) -> Vec<CheckResult> {
    specs
        .iter()
        .map(|spec| {
            let result = run_check(spec, cwd, verbose);
            if verbose > 0 {
                eprintln!(
                    "check: {} {} in {}ms",
                    spec.tag.as_str(),
                    result.status.as_str(),
                    result.duration_ms
                );
            }
            result
        })
        .collect()
}

/// Execute a single check as an isolated subprocess.
///
/// Never returns an error: a nonzero exit is the normal `failed` signal,
/// a missing binary is `skipped-missing-tool` (no spawn attempted), a spawn
/// failure is `error`, and exceeding the timeout kills the process group
/// and yields `timed-out`.
pub fn run_check(spec: &CheckSpec, cwd: &Path, verbose: u8) -> CheckResult {
    if which::which(&spec.required_binary).is_err() {
        return CheckResult {
            tag: spec.tag,
            status: CheckStatus::SkippedMissingTool,
            exit_code: None,
            duration_ms: 0,
            stdout_tail: String::new(),
            stderr_tail: format!("{} not found on PATH", spec.required_binary),
        };
    }

    let started = Instant::now();

    let mut cmd = Command::new(&spec.argv[0]);
    cmd.args(&spec.argv[1..])
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Own process group so a timeout kill reaches grandchildren too
    // (npm/flutter wrappers spawn the real tool as a child).
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return CheckResult {
                tag: spec.tag,
                status: CheckStatus::Error,
                exit_code: None,
                duration_ms: started.elapsed().as_millis() as u64,
                stdout_tail: String::new(),
                stderr_tail: format!("failed to spawn {}: {}", spec.argv[0], e),
            };
        }
    };

    let stdout_drain = spawn_drain(child.stdout.take());
    let stderr_drain = spawn_drain(child.stderr.take());

    track_group(child.id());
    let deadline = started + spec.timeout;
    let outcome = wait_with_deadline(&mut child, deadline);
    untrack_group(child.id());

    if matches!(outcome, WaitOutcome::TimedOut) && verbose > 0 {
        eprintln!(
            "check: {} exceeded {}s, killed",
            spec.tag.as_str(),
            spec.timeout.as_secs()
        );
    }

    let stdout_tail = join_drain(stdout_drain);
    let stderr_tail = join_drain(stderr_drain);
    let duration_ms = started.elapsed().as_millis() as u64;

    let (status, exit_code) = match outcome {
        WaitOutcome::Exited(st) if st.success() => (CheckStatus::Passed, st.code()),
        WaitOutcome::Exited(st) => (CheckStatus::Failed, st.code()),
        WaitOutcome::TimedOut => (CheckStatus::TimedOut, None),
        WaitOutcome::WaitFailed => (CheckStatus::Error, None),
    };

    CheckResult {
        tag: spec.tag,
        status,
        exit_code,
        duration_ms,
        stdout_tail,
        stderr_tail,
    }
}

enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut,
    WaitFailed,
}

fn wait_with_deadline(child: &mut Child, deadline: Instant) -> WaitOutcome {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return WaitOutcome::Exited(status),
            Ok(None) => {
                if Instant::now() >= deadline {
                    kill_group(child);
                    let _ = child.wait(); // reap, and let the drains hit EOF
                    return WaitOutcome::TimedOut;
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(_) => {
                kill_group(child);
                let _ = child.wait();
                return WaitOutcome::WaitFailed;
            }
        }
    }
}

/// Terminate the child and, on unix, its whole process group.
fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    terminate_group(child.id());
    let _ = child.kill();
}

/// Signal a whole process group directly, no PATH lookup involved.
/// TERM first, then KILL for anything that ignores it and could otherwise
/// hold the output pipes open forever.
#[cfg(unix)]
fn terminate_group(pid: u32) {
    // Negative pid addresses the group created by process_group(0).
    let group = -(pid as i32);
    unsafe {
        libc::kill(group, libc::SIGTERM);
        libc::kill(group, libc::SIGKILL);
    }
}

/// Drain a pipe on its own thread, keeping only the last TAIL_BYTES.
fn spawn_drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut r| {
        thread::spawn(move || {
            let mut tail = Vec::new();
            let mut chunk = [0u8; 8192];
            loop {
                match r.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        tail.extend_from_slice(&chunk[..n]);
                        if tail.len() > TAIL_BYTES {
                            let cut = tail.len() - TAIL_BYTES;
                            tail.drain(..cut);
                        }
                    }
                }
            }
            tail
        })
    })
}

fn join_drain(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ToolTag;

    fn spec(argv: &[&str], required_binary: &str, timeout: Duration) -> CheckSpec {
        CheckSpec {
            tag: ToolTag::Test,
            argv: argv.iter().map(|s| s.to_string()).collect(),
            required_binary: required_binary.to_string(),
            timeout,
        }
    }

    fn cwd() -> std::path::PathBuf {
        std::env::temp_dir()
    }

    #[test]
    fn missing_binary_is_skipped_without_spawn() {
        let s = spec(
            &["verihook-no-such-tool-2f9c"],
            "verihook-no-such-tool-2f9c",
            Duration::from_secs(5),
        );
        let r = run_check(&s, &cwd(), 0);
        assert_eq!(r.status, CheckStatus::SkippedMissingTool);
        assert_eq!(r.exit_code, None);
        assert!(r.stderr_tail.contains("not found on PATH"));
    }

    #[cfg(unix)]
    #[test]
    fn zero_exit_is_passed() {
        let s = spec(&["true"], "true", Duration::from_secs(5));
        let r = run_check(&s, &cwd(), 0);
        assert_eq!(r.status, CheckStatus::Passed);
        assert_eq!(r.exit_code, Some(0));
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_failed_not_error() {
        let s = spec(&["false"], "false", Duration::from_secs(5));
        let r = run_check(&s, &cwd(), 0);
        assert_eq!(r.status, CheckStatus::Failed);
        assert_eq!(r.exit_code, Some(1));
    }

    #[cfg(unix)]
    #[test]
    fn slow_process_times_out_and_dies() {
        let s = spec(&["sh", "-c", "sleep 30"], "sh", Duration::from_millis(200));
        let started = Instant::now();
        let r = run_check(&s, &cwd(), 0);
        assert_eq!(r.status, CheckStatus::TimedOut);
        assert_eq!(r.exit_code, None);
        assert!(started.elapsed() < Duration::from_secs(10), "kill was slow");
    }

    #[cfg(unix)]
    #[test]
    fn output_capture_is_tail_bounded() {
        let s = spec(
            &["sh", "-c", "i=0; while [ $i -lt 5000 ]; do echo 0123456789abcdef; i=$((i+1)); done"],
            "sh",
            Duration::from_secs(30),
        );
        let r = run_check(&s, &cwd(), 0);
        assert_eq!(r.status, CheckStatus::Passed);
        assert!(r.stdout_tail.len() <= TAIL_BYTES);
        assert!(r.stdout_tail.contains("0123456789abcdef"));
    }

    #[cfg(unix)]
    #[test]
    fn stderr_is_captured_separately() {
        let s = spec(
            &["sh", "-c", "echo out; echo err >&2; exit 3"],
            "sh",
            Duration::from_secs(5),
        );
        let r = run_check(&s, &cwd(), 0);
        assert_eq!(r.status, CheckStatus::Failed);
        assert_eq!(r.exit_code, Some(3));
        assert!(r.stdout_tail.contains("out"));
        assert!(r.stderr_tail.contains("err"));
    }

    #[cfg(unix)]
    #[test]
    fn unspawnable_argv_is_an_error() {
        // Required binary resolves, but argv[0] is a directory.
        let s = spec(&["/"], "sh", Duration::from_secs(5));
        let r = run_check(&s, &cwd(), 0);
        assert_eq!(r.status, CheckStatus::Error);
        assert!(r.stderr_tail.contains("failed to spawn"));
    }

    // "pid (comm) STATE ..." — a Z entry is already dead, just unreaped.
    #[cfg(target_os = "linux")]
    fn pid_running(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .map(|rest| !rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn timeout_kill_reaches_grandchildren() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pid_file = tmp.path().join("grandchild.pid");
        let script = format!("sleep 30 & echo $! > {}; wait", pid_file.display());
        let s = spec(&["sh", "-c", script.as_str()], "sh", Duration::from_millis(300));

        let r = run_check(&s, &cwd(), 0);
        assert_eq!(r.status, CheckStatus::TimedOut);

        let pid: u32 = std::fs::read_to_string(&pid_file)
            .expect("grandchild pid recorded before the timeout")
            .trim()
            .parse()
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while pid_running(pid) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        assert!(!pid_running(pid), "grandchild {} outlived the group kill", pid);
    }

    #[cfg(unix)]
    #[test]
    fn chain_keeps_going_after_a_failure() {
        let specs = vec![
            spec(&["false"], "false", Duration::from_secs(5)),
            spec(&["true"], "true", Duration::from_secs(5)),
        ];
        let results = run_chain(&specs, &cwd(), 0);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, CheckStatus::Failed);
        assert_eq!(results[1].status, CheckStatus::Passed);
    }
}
