use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Languages the judge can compile and run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    C,
    Cpp,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::C => "c",
            Language::Cpp => "cpp",
        }
    }
}

/// Judging modes.
///
/// `acm` compares stdout against expected output, `leetcode` invokes a named
/// entry point with structured arguments, `fullcode` relies on assertions in
/// the submitted code, and `execution` just runs the code and reports output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JudgeMode {
    Acm,
    Leetcode,
    Fullcode,
    Execution,
}

impl JudgeMode {
    /// Modes whose tentative-ACCEPTED cases go through the output comparator.
    pub fn compares_output(&self) -> bool {
        matches!(self, JudgeMode::Acm)
    }
}

/// Judge status, including the transient queue states.
///
/// Terminal statuses carry a total severity order (lower = worse) so a
/// verdict aggregates as a plain min over per-case statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Running,
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    CompilationError,
    SystemError,
}

impl Status {
    /// Severity rank for verdict aggregation. Transient states rank above
    /// ACCEPTED; they never appear in per-case results.
    pub fn severity(&self) -> u8 {
        match self {
            Status::SystemError => 1,
            Status::CompilationError => 2,
            Status::RuntimeError => 3,
            Status::TimeLimitExceeded => 4,
            Status::MemoryLimitExceeded => 5,
            Status::WrongAnswer => 6,
            Status::Accepted => 7,
            Status::Pending | Status::Running => 8,
        }
    }

    /// Minimum-severity status over an iterator, defaulting to ACCEPTED for
    /// an empty input.
    pub fn worst(statuses: impl IntoIterator<Item = Status>) -> Status {
        statuses
            .into_iter()
            .min_by_key(Status::severity)
            .unwrap_or(Status::Accepted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Accepted => "accepted",
            Status::WrongAnswer => "wrong_answer",
            Status::TimeLimitExceeded => "time_limit_exceeded",
            Status::MemoryLimitExceeded => "memory_limit_exceeded",
            Status::RuntimeError => "runtime_error",
            Status::CompilationError => "compilation_error",
            Status::SystemError => "system_error",
        }
    }
}

/// One test case. `input` and `expected` are plain strings for every mode
/// except `leetcode`, which admits structured JSON (argument lists, numbers,
/// nested arrays).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub input: Value,
    pub expected: Value,
}

impl TestCase {
    /// The input as text fed to the child's stdin. Structured inputs are
    /// serialized back to JSON (only reachable in leetcode mode, which does
    /// not use stdin).
    pub fn input_text(&self) -> String {
        match &self.input {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub fn expected_text(&self) -> String {
        match &self.expected {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

fn generate_task_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_time_limit() -> u64 {
    30
}

fn default_memory_limit() -> u64 {
    4096
}

fn default_security_check() -> bool {
    true
}

/// A request to judge one piece of code. Immutable after creation; this is
/// the exact payload stored in the submissions list and the task hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    #[serde(default = "generate_task_id")]
    pub task_id: String,
    pub code: String,
    pub language: Language,
    pub mode: JudgeMode,
    pub test_cases: Vec<TestCase>,
    #[serde(default = "default_time_limit")]
    pub time_limit_sec: u64,
    #[serde(default = "default_memory_limit")]
    pub memory_limit_mb: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    #[serde(default = "default_security_check")]
    pub security_check: bool,
}

impl Submission {
    /// Semantic validation beyond what deserialization enforces. Violations
    /// are rejected at the HTTP boundary with a 4xx, never turned into a
    /// verdict.
    pub fn validate(&self) -> Result<(), String> {
        if self.code.trim().is_empty() {
            return Err("code must not be empty".into());
        }
        if self.test_cases.is_empty() {
            return Err("at least one test case is required".into());
        }
        if self.time_limit_sec == 0 {
            return Err("time_limit_sec must be positive".into());
        }
        if self.memory_limit_mb == 0 {
            return Err("memory_limit_mb must be positive".into());
        }
        if self.mode == JudgeMode::Leetcode {
            match &self.entry_point {
                Some(ep) if !ep.trim().is_empty() => {}
                _ => return Err("entry_point is required for leetcode mode".into()),
            }
        } else {
            for (i, case) in self.test_cases.iter().enumerate() {
                if !case.input.is_string() || !case.expected.is_string() {
                    return Err(format!(
                        "test case {i}: structured input/expected is only allowed in leetcode mode"
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Outcome of one test case execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub status: Status,
    pub execution_time_sec: f64,
    pub memory_usage_mb: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_output: Option<String>,
}

impl TestCaseResult {
    pub fn system_error(message: impl Into<String>) -> Self {
        TestCaseResult {
            status: Status::SystemError,
            execution_time_sec: 0.0,
            memory_usage_mb: 0.0,
            error_message: Some(message.into()),
            expected_output: None,
            actual_output: None,
        }
    }
}

/// Pass/total counts attached to every verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerdictMetadata {
    pub passed: usize,
    pub total: usize,
}

/// Final result of judging one submission. This is the payload pushed onto
/// the per-task results list and returned to the HTTP caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub status: Status,
    pub task_id: String,
    pub execution_time_sec: f64,
    pub memory_usage_mb: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub test_case_results: Vec<TestCaseResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub metadata: VerdictMetadata,
}

impl Verdict {
    /// A SYSTEM_ERROR verdict with zeroed stats. Used on every failure path
    /// that must still unblock the waiter.
    pub fn system_error(task_id: impl Into<String>, message: impl Into<String>, total: usize) -> Self {
        Verdict {
            status: Status::SystemError,
            task_id: task_id.into(),
            execution_time_sec: 0.0,
            memory_usage_mb: 0.0,
            test_case_results: Vec::new(),
            error_message: Some(message.into()),
            metadata: VerdictMetadata { passed: 0, total },
        }
    }

    pub fn compilation_error(task_id: impl Into<String>, message: impl Into<String>, total: usize) -> Self {
        Verdict {
            status: Status::CompilationError,
            task_id: task_id.into(),
            execution_time_sec: 0.0,
            memory_usage_mb: 0.0,
            test_case_results: Vec::new(),
            error_message: Some(message.into()),
            metadata: VerdictMetadata { passed: 0, total },
        }
    }
}
