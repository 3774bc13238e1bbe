use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;

use gavel::compile::Artifact;
use gavel::exec::{ExecLimits, classify_exit, execute};
use gavel::schema::{JudgeMode, Status, TestCase};
use serde_json::json;

// ---------------------------------------------------------------------------
// Exit classification table
// ---------------------------------------------------------------------------

fn exited(code: i32) -> ExitStatus {
    ExitStatus::from_raw(code << 8)
}

fn signalled(signal: i32) -> ExitStatus {
    ExitStatus::from_raw(signal)
}

#[test]
fn clean_exit_is_tentative_accepted() {
    assert_eq!(classify_exit(exited(0), "", 1.0, 256), Status::Accepted);
}

#[test]
fn sigsegv_is_memory_limit() {
    assert_eq!(
        classify_exit(signalled(libc::SIGSEGV), "", 1.0, 256),
        Status::MemoryLimitExceeded
    );
    assert_eq!(
        classify_exit(exited(139), "", 1.0, 256),
        Status::MemoryLimitExceeded
    );
}

#[test]
fn sigkill_with_low_rss_is_time_limit() {
    assert_eq!(
        classify_exit(signalled(libc::SIGKILL), "", 10.0, 256),
        Status::TimeLimitExceeded
    );
    assert_eq!(
        classify_exit(exited(137), "", 10.0, 256),
        Status::TimeLimitExceeded
    );
}

#[test]
fn sigkill_near_memory_limit_is_memory_limit() {
    // RSS climbed to the limit before the kill: attribute to memory.
    assert_eq!(
        classify_exit(signalled(libc::SIGKILL), "", 250.0, 256),
        Status::MemoryLimitExceeded
    );
}

#[test]
fn assertion_failure_is_wrong_answer() {
    let stderr = "Traceback (most recent call last):\n  ...\nAssertionError";
    assert_eq!(
        classify_exit(exited(1), stderr, 1.0, 256),
        Status::WrongAnswer
    );
}

#[test]
fn memory_error_is_memory_limit() {
    let stderr = "Traceback (most recent call last):\n  ...\nMemoryError";
    assert_eq!(
        classify_exit(exited(1), stderr, 1.0, 256),
        Status::MemoryLimitExceeded
    );
}

#[test]
fn other_nonzero_exit_is_runtime_error() {
    assert_eq!(
        classify_exit(exited(1), "ZeroDivisionError: division by zero", 1.0, 256),
        Status::RuntimeError
    );
    assert_eq!(classify_exit(exited(3), "", 1.0, 256), Status::RuntimeError);
}

#[test]
fn sigxcpu_is_time_limit() {
    assert_eq!(
        classify_exit(signalled(libc::SIGXCPU), "", 1.0, 256),
        Status::TimeLimitExceeded
    );
}

// ---------------------------------------------------------------------------
// Live sandboxed execution
//
// These use /bin/cat and tiny shell scripts rather than the judged
// languages, so they run anywhere with a POSIX userland. The process limit
// is kept high: RLIMIT_NPROC counts the invoking user's processes.
// ---------------------------------------------------------------------------

fn test_limits(time_limit: Duration) -> ExecLimits {
    ExecLimits {
        time_limit,
        memory_limit_mb: 4096,
        max_processes: 4096,
        max_output_bytes: 1024 * 1024,
    }
}

fn text_case(input: &str, expected: &str) -> TestCase {
    TestCase {
        input: json!(input),
        expected: json!(expected),
    }
}

fn write_script(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[tokio::test]
async fn cat_round_trips_stdin() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = Artifact::Binary("/bin/cat".into());
    let result = execute(
        &artifact,
        JudgeMode::Acm,
        0,
        &text_case("hello judge\n", "hello judge"),
        &test_limits(Duration::from_secs(5)),
        dir.path(),
    )
    .await;

    assert_eq!(result.status, Status::Accepted, "{:?}", result.error_message);
    assert_eq!(result.actual_output.as_deref(), Some("hello judge"));
    assert!(result.execution_time_sec < 5.0);
}

#[tokio::test]
async fn busy_loop_hits_the_watchdog() {
    let dir = tempfile::tempdir().unwrap();
    // Shell builtins only: no fork needed inside the sandbox.
    let script = write_script(dir.path(), "spin.sh", "#!/bin/sh\nwhile :; do :; done\n");
    let artifact = Artifact::Binary(script);

    let result = execute(
        &artifact,
        JudgeMode::Acm,
        0,
        &text_case("", ""),
        &test_limits(Duration::from_secs(1)),
        dir.path(),
    )
    .await;

    // Either the parent watchdog fired (reported time = the limit) or
    // RLIMIT_CPU delivered the kill first; both classify as TLE.
    assert_eq!(result.status, Status::TimeLimitExceeded);
    assert!(result.execution_time_sec <= 2.5);
}

#[tokio::test]
async fn nonzero_exit_is_runtime_error() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "fail.sh",
        "#!/bin/sh\necho boom >&2\nexit 3\n",
    );
    let artifact = Artifact::Binary(script);

    let result = execute(
        &artifact,
        JudgeMode::Fullcode,
        0,
        &text_case("", ""),
        &test_limits(Duration::from_secs(5)),
        dir.path(),
    )
    .await;

    assert_eq!(result.status, Status::RuntimeError);
    assert!(result.error_message.as_deref().unwrap_or("").contains("boom"));
}

#[tokio::test]
async fn assertion_error_in_stderr_is_wrong_answer() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "assert.sh",
        "#!/bin/sh\necho AssertionError: 2 != 3 >&2\nexit 1\n",
    );
    let artifact = Artifact::Binary(script);

    let result = execute(
        &artifact,
        JudgeMode::Fullcode,
        0,
        &text_case("", ""),
        &test_limits(Duration::from_secs(5)),
        dir.path(),
    )
    .await;

    assert_eq!(result.status, Status::WrongAnswer);
}

#[tokio::test]
async fn memory_usage_is_observed() {
    let dir = tempfile::tempdir().unwrap();
    // cat blocks on stdin long enough for at least one RSS sample.
    let artifact = Artifact::Binary("/bin/cat".into());
    let big_input = "x".repeat(256 * 1024);
    let result = execute(
        &artifact,
        JudgeMode::Acm,
        0,
        &text_case(&big_input, ""),
        &test_limits(Duration::from_secs(5)),
        dir.path(),
    )
    .await;

    assert_eq!(result.status, Status::Accepted);
    assert!(result.memory_usage_mb >= 0.0);
}
