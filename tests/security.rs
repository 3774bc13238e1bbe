use gavel::schema::Language;
use gavel::security::is_code_safe;

// ---------------------------------------------------------------------------
// Python: benign submissions
// ---------------------------------------------------------------------------

#[test]
fn plain_python_solution_is_safe() {
    let code = r#"
def add(a, b):
    return a + b

a, b = map(int, input().split())
print(add(a, b))
"#;
    assert!(is_code_safe(code, Language::Python));
}

#[test]
fn algorithmic_imports_are_safe() {
    let code = r#"
import collections
import math
from functools import lru_cache
from heapq import heappush, heappop

print(math.sqrt(2))
"#;
    assert!(is_code_safe(code, Language::Python));
}

#[test]
fn allowed_os_attributes_are_safe() {
    let code = "import os\nprint(os.path.join('a', 'b'))\nprint(os.getcwd())";
    assert!(is_code_safe(code, Language::Python));
}

#[test]
fn user_defined_eval_is_safe() {
    // A user function named `eval` shadows the builtin.
    let code = r#"
def eval(expr):
    return expr + 1

print(eval(41))
"#;
    assert!(is_code_safe(code, Language::Python));
}

#[test]
fn method_named_eval_is_safe() {
    let code = r#"
class Calc:
    def run(self, e):
        return self.eval_inner(e)

c = Calc()
print(c.eval(1))
"#;
    assert!(is_code_safe(code, Language::Python));
}

#[test]
fn commented_out_danger_is_safe() {
    let code = "# os.system('rm -rf /')\nprint('ok')";
    assert!(is_code_safe(code, Language::Python));
}

#[test]
fn fullcode_check_harness_is_not_screened() {
    // Everything after the check harness marker belongs to trusted tooling.
    let code = r#"
def solve(n):
    return n * 2

def check(candidate):
    import subprocess
    assert candidate(2) == 4
"#;
    assert!(is_code_safe(code, Language::Python));
}

// ---------------------------------------------------------------------------
// Python: rejected submissions
// ---------------------------------------------------------------------------

#[test]
fn direct_eval_call_is_rejected() {
    assert!(!is_code_safe("eval(input())", Language::Python));
}

#[test]
fn direct_exec_call_is_rejected() {
    assert!(!is_code_safe("exec('print(1)')", Language::Python));
}

#[test]
fn builtins_indirection_is_rejected() {
    assert!(!is_code_safe(
        "__builtins__[\"eval\"](\"1+1\")",
        Language::Python
    ));
}

#[test]
fn getattr_on_os_is_rejected() {
    assert!(!is_code_safe(
        "import os\nf = getattr(os, \"system\")\nf(\"ls\")",
        Language::Python
    ));
}

#[test]
fn subprocess_import_is_rejected() {
    assert!(!is_code_safe("import subprocess", Language::Python));
    assert!(!is_code_safe(
        "from subprocess import Popen",
        Language::Python
    ));
}

#[test]
fn socket_and_pickle_imports_are_rejected() {
    assert!(!is_code_safe("import socket", Language::Python));
    assert!(!is_code_safe("import pickle", Language::Python));
}

#[test]
fn dunder_import_of_blacklisted_module_is_rejected() {
    assert!(!is_code_safe(
        "sp = __import__(\"subprocess\")",
        Language::Python
    ));
}

#[test]
fn importlib_dynamic_import_is_rejected() {
    assert!(!is_code_safe(
        "import importlib\nm = importlib.import_module(\"socket\")",
        Language::Python
    ));
}

#[test]
fn os_system_call_is_rejected() {
    assert!(!is_code_safe("import os\nos.system(\"ls\")", Language::Python));
}

#[test]
fn os_fork_import_is_rejected() {
    assert!(!is_code_safe("from os import fork", Language::Python));
}

#[test]
fn wildcard_os_import_is_rejected() {
    assert!(!is_code_safe("from os import *", Language::Python));
}

#[test]
fn non_whitelisted_os_attribute_is_rejected() {
    assert!(!is_code_safe(
        "import os\nos.execve('/bin/sh', [], {})",
        Language::Python
    ));
}

#[test]
fn shutil_rmtree_is_rejected() {
    assert!(!is_code_safe(
        "import shutil\nshutil.rmtree('/tmp/x')",
        Language::Python
    ));
}

// ---------------------------------------------------------------------------
// C / C++
// ---------------------------------------------------------------------------

#[test]
fn plain_c_solution_is_safe() {
    let code = r#"
#include <stdio.h>
int main() {
    int a, b;
    scanf("%d %d", &a, &b);
    printf("%d\n", a + b);
    return 0;
}
"#;
    assert!(is_code_safe(code, Language::C));
}

#[test]
fn c_system_call_is_rejected() {
    let code = "#include <stdlib.h>\nint main() { system(\"ls\"); }";
    assert!(!is_code_safe(code, Language::C));
}

#[test]
fn c_fork_and_exec_are_rejected() {
    assert!(!is_code_safe("int main() { fork(); }", Language::C));
    assert!(!is_code_safe(
        "int main() { execve(\"/bin/sh\", 0, 0); }",
        Language::Cpp
    ));
}

#[test]
fn c_socket_is_rejected() {
    assert!(!is_code_safe(
        "int main() { int s = socket(2, 1, 0); }",
        Language::C
    ));
}

#[test]
fn c_write_mode_fopen_is_rejected() {
    assert!(!is_code_safe(
        "int main() { FILE *f = fopen(\"x\", \"w\"); }",
        Language::C
    ));
}

#[test]
fn c_commented_danger_is_safe() {
    let code = "// system(\"ls\")\n/* fork(); */\nint main() { return 0; }";
    assert!(is_code_safe(code, Language::C));
}

#[test]
fn cpp_read_mode_fstream_is_safe() {
    let code = r#"
#include <iostream>
int main() {
    int a, b;
    std::cin >> a >> b;
    std::cout << a + b << std::endl;
}
"#;
    assert!(is_code_safe(code, Language::Cpp));
}
