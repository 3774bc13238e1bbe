use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::compile::{self, Artifact};
use crate::sandbox::{self, SandboxLimits};
use crate::schema::{JudgeMode, Status, TestCase, TestCaseResult};

/// Per-execution resource limits, distilled from the submission and the
/// global config by the judge pipeline.
#[derive(Debug, Clone, Copy)]
pub struct ExecLimits {
    pub time_limit: Duration,
    pub memory_limit_mb: u64,
    pub max_processes: u64,
    pub max_output_bytes: u64,
}

impl ExecLimits {
    fn sandbox(&self) -> SandboxLimits {
        SandboxLimits {
            time_limit: self.time_limit,
            memory_bytes: self.memory_limit_mb * 1024 * 1024,
            max_processes: self.max_processes,
            max_output_bytes: self.max_output_bytes,
        }
    }
}

/// Fraction of the memory limit the peak RSS must have reached for a SIGKILL
/// to be read as the memory limit rather than the time limit.
const OOM_ATTRIBUTION_THRESHOLD: f64 = 0.9;

/// How often the memory monitor samples the child's RSS.
const RSS_SAMPLE_INTERVAL: Duration = Duration::from_millis(10);

/// Run one test case against a compiled artifact and classify the outcome.
///
/// Tentative ACCEPTED results still need the output comparator (acm mode);
/// every other status is final.
pub async fn execute(
    artifact: &Artifact,
    mode: JudgeMode,
    case_index: usize,
    case: &TestCase,
    limits: &ExecLimits,
    working_dir: &Path,
) -> TestCaseResult {
    match artifact {
        Artifact::PythonScript(path) => {
            let mut cmd = Command::new("python3");
            cmd.arg(path);
            run_with_limits(cmd, case.input_text().into_bytes(), limits, working_dir).await
        }
        Artifact::Binary(path) => {
            let cmd = Command::new(path);
            run_with_limits(cmd, case.input_text().into_bytes(), limits, working_dir).await
        }
        Artifact::LeetcodeSolution {
            code,
            entry_point,
            has_solution_class,
        } => {
            debug_assert_eq!(mode, JudgeMode::Leetcode);
            let driver = compile::render_driver(
                code,
                entry_point,
                *has_solution_class,
                &case.input,
                &case.expected,
            );
            let driver_path = working_dir.join(format!("driver_{case_index}.py"));
            if let Err(e) = tokio::fs::write(&driver_path, driver).await {
                return TestCaseResult::system_error(format!("failed to write driver: {e}"));
            }
            let mut cmd = Command::new("python3");
            cmd.arg(&driver_path);
            let raw = run_with_limits(cmd, Vec::new(), limits, working_dir).await;
            interpret_driver_result(raw, case)
        }
    }
}

/// Spawn a sandboxed child, feed it stdin, capture capped stdout/stderr, and
/// classify by exit status under a parent-side watchdog of the time limit
/// plus one second.
async fn run_with_limits(
    mut cmd: Command,
    stdin_data: Vec<u8>,
    limits: &ExecLimits,
    working_dir: &Path,
) -> TestCaseResult {
    let start = Instant::now();

    cmd.current_dir(working_dir)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());
    sandbox::apply(&mut cmd, limits.sandbox());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return TestCaseResult::system_error(format!("failed to spawn process: {e}"));
        }
    };

    let Some(pid) = child.id() else {
        return TestCaseResult::system_error("spawned process has no pid");
    };
    sandbox::register_child(pid);

    let monitor_token = CancellationToken::new();
    let monitor = spawn_rss_monitor(pid, monitor_token.clone());

    // Stdin is written from its own task. Awaiting write_all inline can
    // deadlock when the input exceeds the pipe buffer and the child is
    // already producing output.
    {
        let mut stdin = match child.stdin.take() {
            Some(stdin) => stdin,
            None => {
                sandbox::kill_tree(pid);
                sandbox::unregister_child(pid);
                monitor_token.cancel();
                return TestCaseResult::system_error("child stdin was not piped");
            }
        };
        tokio::spawn(async move {
            let _ = stdin.write_all(&stdin_data).await;
            // drop closes the pipe; the child sees EOF
        });
    }

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    // Read one byte past the cap so "exactly at the limit" and "over the
    // limit" are distinguishable.
    let read_limit = limits.max_output_bytes + 1;

    let mut stdout_task = tokio::spawn(read_capped(stdout_pipe, read_limit));
    let mut stderr_task = tokio::spawn(read_capped(stderr_pipe, read_limit));

    let read_future = async {
        // Whichever stream finishes first: if it hit the cap the child may be
        // blocked writing into a full pipe nobody drains anymore, so kill the
        // tree to unblock the other reader (which waits for EOF).
        let kill_on_cap = |buf: &[u8]| {
            if buf.len() as u64 > limits.max_output_bytes {
                sandbox::kill_tree(pid);
            }
        };
        let (stdout, stderr) = tokio::select! {
            res = &mut stdout_task => {
                let stdout = res.unwrap_or_default();
                kill_on_cap(&stdout);
                let stderr = stderr_task.await.unwrap_or_default();
                kill_on_cap(&stderr);
                (stdout, stderr)
            }
            res = &mut stderr_task => {
                let stderr = res.unwrap_or_default();
                kill_on_cap(&stderr);
                let stdout = stdout_task.await.unwrap_or_default();
                kill_on_cap(&stdout);
                (stdout, stderr)
            }
        };
        let status = child.wait().await;
        (stdout, stderr, status)
    };

    let watchdog = limits.time_limit + Duration::from_secs(1);
    let outcome = tokio::time::timeout(watchdog, read_future).await;

    monitor_token.cancel();
    let peak_rss_mb = monitor.await.unwrap_or(0.0);
    sandbox::unregister_child(pid);

    let (stdout, stderr, status) = match outcome {
        Ok((stdout, stderr, Ok(status))) => (stdout, stderr, status),
        Ok((_, _, Err(e))) => {
            sandbox::kill_tree(pid);
            return TestCaseResult::system_error(format!("failed to wait for process: {e}"));
        }
        Err(_) => {
            sandbox::kill_tree(pid);
            return TestCaseResult {
                status: Status::TimeLimitExceeded,
                execution_time_sec: limits.time_limit.as_secs_f64(),
                memory_usage_mb: peak_rss_mb,
                error_message: Some("Time limit exceeded".to_string()),
                expected_output: None,
                actual_output: None,
            };
        }
    };

    let execution_time = start.elapsed().as_secs_f64();

    if stdout.len() as u64 > limits.max_output_bytes || stderr.len() as u64 > limits.max_output_bytes
    {
        sandbox::kill_tree(pid);
        return TestCaseResult {
            status: Status::RuntimeError,
            execution_time_sec: execution_time,
            memory_usage_mb: peak_rss_mb,
            error_message: Some("Output limit exceeded".to_string()),
            expected_output: None,
            actual_output: None,
        };
    }

    let stdout_str = String::from_utf8_lossy(&stdout).trim().to_string();
    let stderr_str = String::from_utf8_lossy(&stderr).trim().to_string();

    let status = classify_exit(status, &stderr_str, peak_rss_mb, limits.memory_limit_mb);
    let error_message = match status {
        Status::Accepted => None,
        Status::TimeLimitExceeded => Some("Time limit exceeded".to_string()),
        Status::MemoryLimitExceeded => Some("Memory limit exceeded".to_string()),
        _ => Some(stderr_str.clone()),
    };

    TestCaseResult {
        status,
        execution_time_sec: execution_time,
        memory_usage_mb: peak_rss_mb,
        error_message,
        expected_output: None,
        actual_output: Some(stdout_str),
    }
}

/// Classify a finished child by signal and exit code.
///
/// SIGKILL is ambiguous between the CPU watchdog and the kernel OOM path, so
/// the peak RSS breaks the tie: a kill after memory climbed to the limit is
/// reported as MEMORY_LIMIT_EXCEEDED.
pub fn classify_exit(
    status: ExitStatus,
    stderr: &str,
    peak_rss_mb: f64,
    memory_limit_mb: u64,
) -> Status {
    if status.success() {
        return Status::Accepted;
    }

    let signal = status.signal();
    let code = status.code();

    if signal == Some(libc::SIGSEGV) || code == Some(139) {
        return Status::MemoryLimitExceeded;
    }
    if signal == Some(libc::SIGKILL) || code == Some(137) {
        if peak_rss_mb >= memory_limit_mb as f64 * OOM_ATTRIBUTION_THRESHOLD {
            return Status::MemoryLimitExceeded;
        }
        return Status::TimeLimitExceeded;
    }
    // RLIMIT_CPU delivers SIGXCPU before escalating to SIGKILL.
    if signal == Some(libc::SIGXCPU) {
        return Status::TimeLimitExceeded;
    }
    if code == Some(1) && stderr.contains("MemoryError") {
        return Status::MemoryLimitExceeded;
    }
    if code == Some(1) && stderr.contains("AssertionError") {
        return Status::WrongAnswer;
    }
    Status::RuntimeError
}

/// Interpret the leetcode driver protocol: first stdout line `True` means
/// the entry point's return value matched, `False` carries the actual value
/// on the following line. Anything else from a zero-exit driver is a broken
/// submission (e.g. it printed from the solution body).
fn interpret_driver_result(mut raw: TestCaseResult, case: &TestCase) -> TestCaseResult {
    if raw.status != Status::Accepted {
        // Non-zero driver exits already classified; attach context for
        // runtime errors so the verdict shows the traceback.
        if raw.status == Status::RuntimeError {
            raw.expected_output = Some(case.expected_text());
        }
        raw.actual_output = None;
        return raw;
    }

    let stdout = raw.actual_output.as_deref().unwrap_or("");
    let mut lines = stdout.lines();
    match lines.next() {
        Some("True") => {
            raw.actual_output = None;
            raw
        }
        Some("False") => {
            let actual = lines.collect::<Vec<_>>().join("\n");
            TestCaseResult {
                status: Status::WrongAnswer,
                error_message: Some(format!(
                    "Expected:\n{}\nActual:\n{}",
                    truncate_for_message(&case.expected_text()),
                    truncate_for_message(&actual),
                )),
                expected_output: Some(case.expected_text()),
                actual_output: Some(actual),
                ..raw
            }
        }
        _ => TestCaseResult {
            status: Status::RuntimeError,
            error_message: Some("solution produced no verdict (did it print to stdout?)".to_string()),
            ..raw
        },
    }
}

fn truncate_for_message(text: &str) -> String {
    const CAP: usize = 100;
    if text.len() <= CAP {
        return text.to_string();
    }
    let mut end = CAP;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

/// Read a pipe to EOF, keeping at most `limit` bytes.
async fn read_capped(
    pipe: Option<impl tokio::io::AsyncRead + Unpin>,
    limit: u64,
) -> Vec<u8> {
    let Some(pipe) = pipe else {
        return Vec::new();
    };
    let mut buf = Vec::with_capacity(64 * 1024);
    let mut capped = pipe.take(limit);
    if let Err(e) = capped.read_to_end(&mut buf).await {
        tracing::warn!("pipe read error: {e}");
    }
    buf
}

/// Sample the child's RSS every 10 ms until cancelled, returning the peak in
/// MB. Samples silently stop resolving once the process exits.
fn spawn_rss_monitor(pid: u32, token: CancellationToken) -> tokio::task::JoinHandle<f64> {
    tokio::spawn(async move {
        let mut peak: f64 = 0.0;
        loop {
            if let Some(rss) = sandbox::rss_mb(pid) {
                peak = peak.max(rss);
            }
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(RSS_SAMPLE_INTERVAL) => {}
            }
        }
        peak
    })
}
