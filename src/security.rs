use once_cell::sync::Lazy;
use regex::Regex;

use crate::schema::Language;

/// Verdict message used for every screen rejection.
pub const UNSAFE_CODE_MESSAGE: &str = "Code contains potentially unsafe operations";

/// Python modules whose import or use is denied. An empty deny list means the
/// whole module is blacklisted; `os` is special-cased below with a function
/// deny list plus an attribute allowlist.
const OS_DENIED_FUNCTIONS: &[&str] = &[
    "system", "popen", "spawn", "exec", "execl", "execlp", "execle", "execv", "execvp", "execve",
    "kill", "killpg", "pclose", "putenv", "remove", "removedirs", "rmdir", "setuid", "setsid",
    "spawnl", "spawnle", "spawnlp", "spawnlpe", "spawnv", "spawnve", "spawnvp", "unlink", "fork",
    "forkpty",
];

/// Modules rejected outright, in imports and in attribute calls.
const BLACKLISTED_MODULES: &[&str] = &["subprocess", "pty", "importlib", "pickle", "socket", "requests"];

/// shutil is allowed except for its filesystem-mutating helpers.
const SHUTIL_DENIED_FUNCTIONS: &[&str] =
    &["rmtree", "move", "copy", "copyfile", "copytree", "make_archive"];

/// `os.` attributes that plain submissions legitimately touch.
const ALLOWED_OS_ATTRS: &[&str] = &[
    "path", "environ", "read", "write", "fstat", "getcwd", "listdir", "mkdir", "makedirs",
    "stat", "access", "name", "sep", "linesep", "curdir", "pardir", "pathsep", "devnull",
    "altsep", "extsep",
];

static PY_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)#.*$").unwrap());
static EXEC_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(eval|exec)\s*\(").unwrap());
static FUNC_DEF: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)def\s+(\w+)\s*\(").unwrap());
static VAR_ASSIGN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\w+)\s*=\s*(?:eval|exec)\b").unwrap());
static INDIRECT_EXEC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"__builtins__\s*(\[|\.)['"]?(eval|exec)['"]?(\]|\))"#).unwrap()
});
static DANGEROUS_GETATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"getattr\s*\(\s*os\s*,\s*['"](\w+)['"]|\w+\s*=\s*getattr\s*\(\s*os\s*,"#).unwrap()
});

static IMPORT_PLAIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*import\s+(\w+(?:\s*,\s*\w+)*)").unwrap());
static IMPORT_FROM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*from\s+(\w+)(?:\.\w+)*\s+import\s+([^#\n]+)").unwrap());
static IMPORT_DUNDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"__import__\s*\(\s*['"](\w+)['"]"#).unwrap());
static IMPORT_LIB: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"importlib\.import_module\s*\(\s*['"](\w+)['"]"#).unwrap());

static OS_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bos\.(\w+)\s*\(").unwrap());
static OS_ATTR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bos\.(\w+)").unwrap());
static SHUTIL_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bshutil\.(\w+)\s*\(").unwrap());
static MODULE_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(subprocess|pty|importlib|pickle|socket|requests)\.\w+\s*\(").unwrap()
});

static C_LINE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)//.*$").unwrap());
static C_BLOCK_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());
static C_DANGEROUS_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(system|popen|fork|exec\w*|socket)\s*\(").unwrap());
static C_WRITE_OPEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\b(fopen|open|ofstream|ifstream)\s*\([^)]*,\s*["']w"#).unwrap()
});

/// Advisory pre-compilation screen. The sandbox is the authoritative
/// defense; this rejects the obviously hostile patterns cheaply, before a
/// working directory or compiler run is spent on them.
pub fn is_code_safe(code: &str, language: Language) -> bool {
    match language {
        Language::Python => is_python_code_safe(code),
        Language::C | Language::Cpp => is_c_family_code_safe(code),
    }
}

fn is_python_code_safe(code: &str) -> bool {
    // Fullcode check harnesses are appended by trusted tooling; screen only
    // the solution itself.
    let code = code.split("def check(candidate):").next().unwrap_or(code);
    let code = PY_COMMENT.replace_all(code, "");

    // Names the submission defines itself; an `eval` the user wrote shadows
    // the builtin and is fine to call.
    let mut user_defined: Vec<&str> = FUNC_DEF
        .captures_iter(&code)
        .map(|c| c.get(1).unwrap().as_str())
        .collect();
    user_defined.extend(
        VAR_ASSIGN
            .captures_iter(&code)
            .map(|c| c.get(1).unwrap().as_str()),
    );

    for m in EXEC_CALL.captures_iter(&code) {
        let name = m.get(1).unwrap().as_str();
        if user_defined.contains(&name) {
            continue;
        }
        let pos = m.get(0).unwrap().start();
        if pos > 0 {
            let prev = code.as_bytes()[pos - 1];
            // Method call (obj.eval) or part of a longer identifier.
            if prev == b'.' || prev.is_ascii_alphanumeric() || prev == b'_' {
                continue;
            }
        }
        tracing::warn!(function = name, "dangerous builtin call detected");
        return false;
    }

    if INDIRECT_EXEC.is_match(&code) {
        tracing::warn!("indirect access to eval/exec detected");
        return false;
    }

    if DANGEROUS_GETATTR.is_match(&code) {
        tracing::warn!("dynamic access to os attributes detected");
        return false;
    }

    if !imports_are_safe(&code) {
        return false;
    }

    // Direct os.X( calls against the deny list, then any os attribute
    // outside the allowlist.
    for m in OS_CALL.captures_iter(&code) {
        let func = m.get(1).unwrap().as_str();
        if OS_DENIED_FUNCTIONS.contains(&func) {
            tracing::warn!(function = func, "dangerous os call detected");
            return false;
        }
    }
    for m in OS_ATTR.captures_iter(&code) {
        let attr = m.get(1).unwrap().as_str();
        if !ALLOWED_OS_ATTRS.contains(&attr) {
            tracing::warn!(attr, "disallowed os attribute access");
            return false;
        }
    }

    if MODULE_CALL.is_match(&code) {
        tracing::warn!("blacklisted module usage detected");
        return false;
    }

    for m in SHUTIL_CALL.captures_iter(&code) {
        let func = m.get(1).unwrap().as_str();
        if SHUTIL_DENIED_FUNCTIONS.contains(&func) {
            tracing::warn!(function = func, "dangerous shutil call detected");
            return false;
        }
    }

    true
}

fn imports_are_safe(code: &str) -> bool {
    for m in IMPORT_PLAIN.captures_iter(code) {
        for module in m.get(1).unwrap().as_str().split(',') {
            let module = module.trim().split(" as ").next().unwrap_or("").trim();
            // `import os` itself is allowed; its calls are checked separately.
            if BLACKLISTED_MODULES.contains(&module) {
                tracing::warn!(module, "blacklisted import detected");
                return false;
            }
        }
    }

    for m in IMPORT_FROM.captures_iter(code) {
        let module = m.get(1).unwrap().as_str();
        let names = m.get(2).unwrap().as_str();
        if BLACKLISTED_MODULES.contains(&module) {
            tracing::warn!(module, "blacklisted from-import detected");
            return false;
        }
        if module == "os" {
            for name in names.split(',') {
                let name = name.trim().split(" as ").next().unwrap_or("").trim();
                if name == "*" {
                    tracing::warn!("wildcard import from os is not allowed");
                    return false;
                }
                if OS_DENIED_FUNCTIONS.contains(&name) {
                    tracing::warn!(function = name, "dangerous os import detected");
                    return false;
                }
            }
        }
        if module == "shutil" {
            for name in names.split(',') {
                let name = name.trim().split(" as ").next().unwrap_or("").trim();
                if name == "*" || SHUTIL_DENIED_FUNCTIONS.contains(&name) {
                    tracing::warn!(function = name, "dangerous shutil import detected");
                    return false;
                }
            }
        }
    }

    for pattern in [&IMPORT_DUNDER, &IMPORT_LIB] {
        for m in pattern.captures_iter(code) {
            let module = m.get(1).unwrap().as_str();
            if BLACKLISTED_MODULES.contains(&module) {
                tracing::warn!(module, "dynamic import of blacklisted module detected");
                return false;
            }
        }
    }

    true
}

fn is_c_family_code_safe(code: &str) -> bool {
    let code = C_LINE_COMMENT.replace_all(code, "");
    let code = C_BLOCK_COMMENT.replace_all(&code, "");

    if C_DANGEROUS_CALL.is_match(&code) {
        tracing::warn!("dangerous C function call detected");
        return false;
    }
    if C_WRITE_OPEN.is_match(&code) {
        tracing::warn!("write-mode file open detected");
        return false;
    }
    true
}
