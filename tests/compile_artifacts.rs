use gavel::compile::{Artifact, compile, render_driver};
use gavel::error::JudgeError;
use gavel::schema::Submission;
use serde_json::json;

fn submission(raw: serde_json::Value) -> Submission {
    serde_json::from_value(raw).unwrap()
}

// ---------------------------------------------------------------------------
// Python artifacts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn python_acm_writes_solution_file() {
    let dir = tempfile::tempdir().unwrap();
    let sub = submission(json!({
        "code": "print(input())",
        "language": "python",
        "mode": "acm",
        "test_cases": [{"input": "hi", "expected": "hi"}],
    }));

    let artifact = compile(&sub, dir.path()).await.unwrap();
    match artifact {
        Artifact::PythonScript(path) => {
            assert_eq!(path, dir.path().join("solution.py"));
            let written = std::fs::read_to_string(&path).unwrap();
            assert_eq!(written, "print(input())");
        }
        other => panic!("expected PythonScript, got {other:?}"),
    }
}

#[tokio::test]
async fn leetcode_binds_solution_method() {
    let dir = tempfile::tempdir().unwrap();
    let sub = submission(json!({
        "code": "class Solution:\n    def countSeniors(self, details):\n        return 0\n",
        "language": "python",
        "mode": "leetcode",
        "entry_point": "countSeniors",
        "test_cases": [{"input": [["a"]], "expected": 0}],
    }));

    let artifact = compile(&sub, dir.path()).await.unwrap();
    match artifact {
        Artifact::LeetcodeSolution {
            entry_point,
            has_solution_class,
            ..
        } => {
            assert_eq!(entry_point, "countSeniors");
            assert!(has_solution_class);
        }
        other => panic!("expected LeetcodeSolution, got {other:?}"),
    }
}

#[tokio::test]
async fn leetcode_binds_free_function() {
    let dir = tempfile::tempdir().unwrap();
    let sub = submission(json!({
        "code": "def twice(x):\n    return x * 2\n",
        "language": "python",
        "mode": "leetcode",
        "entry_point": "twice",
        "test_cases": [{"input": 2, "expected": 4}],
    }));

    let artifact = compile(&sub, dir.path()).await.unwrap();
    match artifact {
        Artifact::LeetcodeSolution {
            has_solution_class, ..
        } => assert!(!has_solution_class),
        other => panic!("expected LeetcodeSolution, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_entry_point_is_a_compile_error() {
    let dir = tempfile::tempdir().unwrap();
    let sub = submission(json!({
        "code": "class Solution:\n    def other(self):\n        return 0\n",
        "language": "python",
        "mode": "leetcode",
        "entry_point": "countSeniors",
        "test_cases": [{"input": [], "expected": 0}],
    }));

    match compile(&sub, dir.path()).await {
        Err(JudgeError::Compile(message)) => {
            assert!(message.contains("countSeniors"), "got: {message}");
        }
        other => panic!("expected Compile error, got {other:?}"),
    }
}

#[tokio::test]
async fn hostile_entry_point_is_a_compile_error() {
    let dir = tempfile::tempdir().unwrap();
    let sub = submission(json!({
        "code": "def f(x):\n    return x\n",
        "language": "python",
        "mode": "leetcode",
        "entry_point": "f(); import os #",
        "test_cases": [{"input": 1, "expected": 1}],
    }));

    assert!(matches!(
        compile(&sub, dir.path()).await,
        Err(JudgeError::Compile(_))
    ));
}

// ---------------------------------------------------------------------------
// Driver rendering
// ---------------------------------------------------------------------------

#[test]
fn driver_embeds_solution_and_payloads() {
    let driver = render_driver(
        "class Solution:\n    def addTwo(self, a, b):\n        return a + b\n",
        "addTwo",
        true,
        &json!([1, 2]),
        &json!(3),
    );

    assert!(driver.contains("class Solution:"));
    assert!(driver.contains("getattr(Solution(), \"addTwo\")"));
    assert!(driver.contains("json.loads(\"[1,2]\")"));
    assert!(driver.contains("json.loads(\"3\")"));
}

#[test]
fn driver_uses_free_function_without_class() {
    let driver = render_driver("def twice(x):\n    return x * 2\n", "twice", false, &json!(2), &json!(4));
    assert!(driver.contains("fn = twice"));
    assert!(!driver.contains("Solution()"));
}

#[test]
fn driver_escapes_hostile_payload_strings() {
    // A payload that would break out of a naive string literal.
    let hostile = json!(["\"); import os; os.system(\"id\"); (\""]);
    let driver = render_driver("def f(x):\n    return x\n", "f", false, &hostile, &json!(0));

    // The payload only ever appears inside a JSON-escaped string literal
    // handed to json.loads, never as bare Python source: every interior
    // quote stays backslash-escaped.
    assert!(!driver.contains("os.system(\"id\")"));
    assert!(driver.contains("json.loads"));
}
