use gavel::schema::{JudgeMode, Language, Status, Submission, TestCase};
use serde_json::json;

// ---------------------------------------------------------------------------
// Status severity ordering
// ---------------------------------------------------------------------------

#[test]
fn severity_is_a_total_order() {
    let ranked = [
        Status::SystemError,
        Status::CompilationError,
        Status::RuntimeError,
        Status::TimeLimitExceeded,
        Status::MemoryLimitExceeded,
        Status::WrongAnswer,
        Status::Accepted,
    ];
    for window in ranked.windows(2) {
        assert!(
            window[0].severity() < window[1].severity(),
            "{:?} must rank below {:?}",
            window[0],
            window[1]
        );
    }
}

#[test]
fn worst_picks_minimum_severity() {
    let statuses = vec![
        Status::Accepted,
        Status::WrongAnswer,
        Status::TimeLimitExceeded,
        Status::Accepted,
    ];
    assert_eq!(Status::worst(statuses), Status::TimeLimitExceeded);
}

#[test]
fn worst_of_all_accepted_is_accepted() {
    assert_eq!(
        Status::worst(vec![Status::Accepted, Status::Accepted]),
        Status::Accepted
    );
}

#[test]
fn worst_of_empty_is_accepted() {
    assert_eq!(Status::worst(Vec::new()), Status::Accepted);
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[test]
fn status_serializes_snake_case() {
    assert_eq!(
        serde_json::to_string(&Status::WrongAnswer).unwrap(),
        "\"wrong_answer\""
    );
    assert_eq!(
        serde_json::to_string(&Status::TimeLimitExceeded).unwrap(),
        "\"time_limit_exceeded\""
    );
    let parsed: Status = serde_json::from_str("\"accepted\"").unwrap();
    assert_eq!(parsed, Status::Accepted);
}

#[test]
fn submission_fills_defaults() {
    let raw = json!({
        "code": "print(1)",
        "language": "python",
        "mode": "acm",
        "test_cases": [{"input": "", "expected": "1"}],
    });
    let submission: Submission = serde_json::from_value(raw).unwrap();

    assert!(!submission.task_id.is_empty());
    assert_eq!(submission.time_limit_sec, 30);
    assert_eq!(submission.memory_limit_mb, 4096);
    assert!(submission.security_check);
    assert_eq!(submission.language, Language::Python);
    assert_eq!(submission.mode, JudgeMode::Acm);
}

#[test]
fn generated_task_ids_are_unique() {
    let raw = json!({
        "code": "print(1)",
        "language": "python",
        "mode": "acm",
        "test_cases": [{"input": "", "expected": "1"}],
    });
    let a: Submission = serde_json::from_value(raw.clone()).unwrap();
    let b: Submission = serde_json::from_value(raw).unwrap();
    assert_ne!(a.task_id, b.task_id);
}

// ---------------------------------------------------------------------------
// Semantic validation
// ---------------------------------------------------------------------------

fn base_submission() -> Submission {
    serde_json::from_value(json!({
        "code": "print(1)",
        "language": "python",
        "mode": "acm",
        "test_cases": [{"input": "1 2", "expected": "3"}],
    }))
    .unwrap()
}

#[test]
fn valid_submission_passes() {
    assert!(base_submission().validate().is_ok());
}

#[test]
fn empty_code_is_rejected() {
    let mut submission = base_submission();
    submission.code = "   \n".to_string();
    assert!(submission.validate().is_err());
}

#[test]
fn empty_test_cases_are_rejected() {
    let mut submission = base_submission();
    submission.test_cases.clear();
    assert!(submission.validate().is_err());
}

#[test]
fn zero_limits_are_rejected() {
    let mut submission = base_submission();
    submission.time_limit_sec = 0;
    assert!(submission.validate().is_err());

    let mut submission = base_submission();
    submission.memory_limit_mb = 0;
    assert!(submission.validate().is_err());
}

#[test]
fn leetcode_requires_entry_point() {
    let mut submission = base_submission();
    submission.mode = JudgeMode::Leetcode;
    submission.entry_point = None;
    assert!(submission.validate().is_err());

    submission.entry_point = Some("countSeniors".to_string());
    assert!(submission.validate().is_ok());
}

#[test]
fn structured_cases_only_in_leetcode_mode() {
    let mut submission = base_submission();
    submission.test_cases = vec![TestCase {
        input: json!([["a", "b"]]),
        expected: json!(2),
    }];
    assert!(submission.validate().is_err());

    submission.mode = JudgeMode::Leetcode;
    submission.entry_point = Some("count".to_string());
    assert!(submission.validate().is_ok());
}

#[test]
fn structured_input_serializes_back_to_text() {
    let case = TestCase {
        input: json!("1 2"),
        expected: json!("3"),
    };
    assert_eq!(case.input_text(), "1 2");
    assert_eq!(case.expected_text(), "3");

    let structured = TestCase {
        input: json!([1, 2]),
        expected: json!([3]),
    };
    assert_eq!(structured.input_text(), "[1,2]");
}
