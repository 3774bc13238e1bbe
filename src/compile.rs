use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tokio::process::Command;

use crate::error::JudgeError;
use crate::preamble;
use crate::schema::{JudgeMode, Language, Submission};

/// What compilation produced. Executors run artifacts; they never look at
/// the original submission source again.
#[derive(Debug, Clone)]
pub enum Artifact {
    /// Plain Python program read from stdin (acm/fullcode/execution modes).
    PythonScript(PathBuf),
    /// Leetcode-mode solution: executed through a generated driver that
    /// binds the entry point and prints a verdict line.
    LeetcodeSolution {
        code: String,
        entry_point: String,
        has_solution_class: bool,
    },
    /// Compiled C/C++ executable.
    Binary(PathBuf),
}

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_]\w*$").unwrap());
static SOLUTION_CLASS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*class\s+Solution\b").unwrap());

/// Materialize the submission into something executable inside
/// `working_dir`. Compiler failures come back as `JudgeError::Compile` with
/// the compiler's stderr; everything else is an infrastructure error.
pub async fn compile(submission: &Submission, working_dir: &Path) -> Result<Artifact, JudgeError> {
    match submission.language {
        Language::Python => {
            let path = working_dir.join("solution.py");
            tokio::fs::write(&path, &submission.code).await?;
            if submission.mode == JudgeMode::Leetcode {
                compile_leetcode(submission)
            } else {
                Ok(Artifact::PythonScript(path))
            }
        }
        Language::C => {
            compile_c_family(&submission.code, working_dir, "solution.c", "gcc", &[]).await
        }
        Language::Cpp => {
            compile_c_family(
                &submission.code,
                working_dir,
                "solution.cpp",
                "g++",
                &["-std=c++17"],
            )
            .await
        }
    }
}

/// Leetcode "compilation": bind the named entry point. The solution is not
/// loaded in-process; execution goes through a per-case driver, so all that
/// can fail here is locating the entry point.
fn compile_leetcode(submission: &Submission) -> Result<Artifact, JudgeError> {
    let entry_point = submission
        .entry_point
        .as_deref()
        .unwrap_or_default()
        .trim()
        .to_string();
    if !IDENTIFIER.is_match(&entry_point) {
        return Err(JudgeError::Compile(format!(
            "Entry point '{entry_point}' is not a valid identifier"
        )));
    }

    let def_pattern = Regex::new(&format!(r"(?m)^\s*def\s+{}\s*\(", regex::escape(&entry_point)))
        .map_err(|e| JudgeError::Other(format!("entry point pattern: {e}")))?;
    if !def_pattern.is_match(&submission.code) {
        return Err(JudgeError::Compile(format!(
            "Entry point '{entry_point}' not found"
        )));
    }

    Ok(Artifact::LeetcodeSolution {
        // Solutions written against the leetcode prelude get their missing
        // imports restored before the driver embeds them.
        code: preamble::augment_imports(&submission.code),
        entry_point,
        has_solution_class: SOLUTION_CLASS.is_match(&submission.code),
    })
}

async fn compile_c_family(
    code: &str,
    working_dir: &Path,
    source_name: &str,
    compiler: &str,
    extra_args: &[&str],
) -> Result<Artifact, JudgeError> {
    let source_path = working_dir.join(source_name);
    let executable_path = working_dir.join("solution");
    tokio::fs::write(&source_path, code).await?;

    let output = Command::new(compiler)
        .arg("-o")
        .arg(&executable_path)
        .arg(&source_path)
        .arg("-Wall")
        .arg("-O2")
        .args(extra_args)
        .output()
        .await?;

    if !output.status.success() {
        return Err(JudgeError::Compile(
            String::from_utf8_lossy(&output.stderr).to_string(),
        ));
    }

    Ok(Artifact::Binary(executable_path))
}

// ---------------------------------------------------------------------------
// Leetcode driver generation
// ---------------------------------------------------------------------------

/// Render the per-case driver program for a leetcode artifact.
///
/// The driver embeds the solution verbatim, decodes the JSON-encoded input
/// and expected value, invokes the entry point (spreading a list input as
/// positional arguments), and prints a one-line verdict: `True` on a match,
/// `False` followed by the JSON-encoded actual value on a mismatch. Floats
/// compare with absolute tolerance 1e-6; tuples coerce to lists through the
/// JSON round-trip.
pub fn render_driver(
    code: &str,
    entry_point: &str,
    has_solution_class: bool,
    input: &Value,
    expected: &Value,
) -> String {
    // JSON string literals are valid Python string literals, so embedding
    // json.loads("<escaped>") is injection-free for arbitrary payloads.
    let input_literal = Value::String(input.to_string()).to_string();
    let expected_literal = Value::String(expected.to_string()).to_string();
    let target = if has_solution_class {
        format!("getattr(Solution(), \"{entry_point}\")")
    } else {
        entry_point.to_string()
    };

    format!(
        r#"import json

{code}

def _is_float_like(x):
    if isinstance(x, float):
        return True
    if isinstance(x, (list, tuple)):
        return len(x) > 0 and all(isinstance(i, float) for i in x)
    return False

def _close(a, b, atol):
    try:
        if isinstance(a, (list, tuple)) and isinstance(b, (list, tuple)):
            return len(a) == len(b) and all(_close(x, y, atol) for x, y in zip(a, b))
        return abs(float(a) - float(b)) <= atol + 1e-07 * abs(float(b))
    except (TypeError, ValueError):
        return False

def _matches(out, exp):
    if isinstance(out, tuple):
        out = list(out)
    if out == exp:
        return True
    if _is_float_like(exp):
        return _close(out, exp, 1e-06)
    return False

def _main():
    input_data = json.loads({input_literal})
    expected = json.loads({expected_literal})
    fn = {target}
    if isinstance(input_data, list):
        result = fn(*input_data)
    else:
        result = fn(input_data)
    if _matches(result, expected):
        print("True")
    else:
        print("False")
        print(json.dumps(result, default=str))

_main()
"#
    )
}
