use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::future::join_all;
use uuid::Uuid;

use crate::compare;
use crate::compile;
use crate::config::Config;
use crate::error::JudgeError;
use crate::exec::{self, ExecLimits};
use crate::schema::{
    JudgeMode, Status, Submission, TestCaseResult, Verdict, VerdictMetadata,
};
use crate::security;

/// Most failing cases a verdict reports, outside execution mode.
pub const MAX_REPORTED_FAILURES: usize = 3;

/// Cap on expected/actual snippets attached to failing cases. Execution-mode
/// results are exempt and carry full output.
const OUTPUT_SNIPPET_CAP: usize = 4096;

/// Drive one submission through screen → compile → execute → aggregate.
///
/// Never fails: every error path collapses into a verdict so the waiting
/// caller always gets an answer.
pub async fn judge(submission: &Submission, config: &Config) -> Verdict {
    let task_id = submission.task_id.clone();
    let total = submission.test_cases.len();
    tracing::info!(
        task_id,
        language = submission.language.as_str(),
        mode = ?submission.mode,
        cases = total,
        "judging submission"
    );

    // The screen runs unless disabled globally or opted out per submission.
    if config.security_check
        && submission.security_check
        && !security::is_code_safe(&submission.code, submission.language)
    {
        tracing::warn!(task_id, "submission rejected by safety screen");
        return Verdict::system_error(task_id, JudgeError::UnsafeCode.user_message(), total);
    }

    let working_dir = match create_working_dir(config).await {
        Ok(dir) => dir,
        Err(e) => {
            tracing::error!(task_id, "failed to create working directory: {e}");
            return Verdict::system_error(task_id, e.user_message(), total);
        }
    };

    let verdict = judge_in_dir(submission, config, &working_dir).await;

    if let Err(e) = tokio::fs::remove_dir_all(&working_dir).await {
        tracing::warn!(task_id = verdict.task_id, "failed to clean working directory: {e}");
    }

    verdict
}

async fn judge_in_dir(submission: &Submission, config: &Config, working_dir: &Path) -> Verdict {
    let task_id = submission.task_id.clone();
    let total = submission.test_cases.len();

    let artifact = match compile::compile(submission, working_dir).await {
        Ok(artifact) => artifact,
        Err(JudgeError::Compile(stderr)) => {
            tracing::info!(task_id, "compilation failed");
            return Verdict::compilation_error(task_id, stderr, total);
        }
        Err(e) => {
            tracing::error!(task_id, "compile step error: {e}");
            return Verdict::system_error(task_id, e.user_message(), total);
        }
    };
    tracing::debug!(task_id, "compilation succeeded");

    let limits = ExecLimits {
        time_limit: Duration::from_secs(submission.time_limit_sec.min(config.max_execution_time)),
        memory_limit_mb: submission.memory_limit_mb.min(config.max_memory_mb),
        max_processes: config.max_processes,
        max_output_bytes: config.max_output_size,
    };

    // All test cases run concurrently; each child is individually bounded by
    // the sandbox, and results are reassembled in input order below.
    let executions = submission.test_cases.iter().enumerate().map(|(i, case)| {
        let artifact = &artifact;
        async move {
            exec::execute(artifact, submission.mode, i, case, &limits, working_dir).await
        }
    });
    let mut results: Vec<TestCaseResult> = join_all(executions).await;

    if submission.mode.compares_output() {
        for (case, result) in submission.test_cases.iter().zip(results.iter_mut()) {
            if result.status != Status::Accepted {
                continue;
            }
            let actual = result.actual_output.clone().unwrap_or_default();
            let expected = case.expected_text();
            if !compare::outputs_match(&actual, &expected) {
                result.status = Status::WrongAnswer;
                result.error_message = Some("Wrong answer".to_string());
                result.expected_output = Some(expected);
            }
        }
    }

    let summary = aggregate(&results);
    tracing::info!(
        task_id,
        status = summary.status.as_str(),
        passed = summary.passed,
        total,
        "judging complete"
    );

    let error_message = results
        .iter()
        .find(|r| r.status != Status::Accepted)
        .and_then(|r| r.error_message.clone());

    Verdict {
        status: summary.status,
        task_id,
        execution_time_sec: summary.max_execution_time,
        memory_usage_mb: summary.max_memory_usage,
        test_case_results: select_reported(results, submission.mode),
        error_message,
        metadata: VerdictMetadata {
            passed: summary.passed,
            total,
        },
    }
}

/// Aggregated per-case statistics.
pub struct Aggregate {
    pub status: Status,
    pub max_execution_time: f64,
    pub max_memory_usage: f64,
    pub passed: usize,
}

/// Overall status is the minimum-severity case status; time and memory are
/// maxima over cases.
pub fn aggregate(results: &[TestCaseResult]) -> Aggregate {
    Aggregate {
        status: Status::worst(results.iter().map(|r| r.status)),
        max_execution_time: results
            .iter()
            .map(|r| r.execution_time_sec)
            .fold(0.0, f64::max),
        max_memory_usage: results
            .iter()
            .map(|r| r.memory_usage_mb)
            .fold(0.0, f64::max),
        passed: results
            .iter()
            .filter(|r| r.status == Status::Accepted)
            .count(),
    }
}

/// Choose the per-case results a verdict carries: every case with full
/// output in execution mode, otherwise at most three failing cases with
/// capped output snippets.
pub fn select_reported(results: Vec<TestCaseResult>, mode: JudgeMode) -> Vec<TestCaseResult> {
    if mode == JudgeMode::Execution {
        return results;
    }
    results
        .into_iter()
        .filter(|r| r.status != Status::Accepted)
        .take(MAX_REPORTED_FAILURES)
        .map(|mut r| {
            r.actual_output = r.actual_output.map(|s| truncate_output(&s));
            r.expected_output = r.expected_output.map(|s| truncate_output(&s));
            r
        })
        .collect()
}

fn truncate_output(text: &str) -> String {
    if text.len() <= OUTPUT_SNIPPET_CAP {
        return text.to_string();
    }
    let mut end = OUTPUT_SNIPPET_CAP;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… (truncated)", &text[..end])
}

/// Unique 0o700 working directory for one judge invocation.
async fn create_working_dir(config: &Config) -> Result<PathBuf, JudgeError> {
    let dir = config
        .code_execution_dir
        .join(Uuid::new_v4().to_string());
    tokio::fs::create_dir_all(&dir).await?;
    tokio::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700)).await?;
    Ok(dir)
}
