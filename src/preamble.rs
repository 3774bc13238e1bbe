//! Import augmentation for leetcode-mode solutions.
//!
//! Leetcode submissions are habitually written against a prelude the site
//! injects (`List`, `deque`, `Counter`, …) and arrive here without their
//! imports. Rather than failing them with a NameError, the missing imports
//! are detected and prepended before the solution is embedded in the
//! driver. Detection is textual; a false positive only adds an unused
//! import, which is harmless.

use once_cell::sync::Lazy;
use regex::Regex;

/// `typing` names that appear in annotations without an import.
const TYPING_NAMES: &[&str] = &[
    "List", "Dict", "Tuple", "Set", "FrozenSet", "Optional", "Union", "Any", "Callable",
    "Iterable", "Iterator", "Generator", "Sequence", "Mapping", "Type",
];

/// Names with a dedicated from-import.
const DIRECT_IMPORTS: &[(&str, &str)] = &[
    ("deque", "from collections import deque"),
    ("defaultdict", "from collections import defaultdict"),
    ("Counter", "from collections import Counter"),
    ("OrderedDict", "from collections import OrderedDict"),
    ("namedtuple", "from collections import namedtuple"),
    ("lru_cache", "from functools import lru_cache"),
    ("cache", "from functools import cache"),
    ("reduce", "from functools import reduce"),
];

/// Names that resolve by importing a whole module.
const MODULE_IMPORTS: &[(&str, &str)] = &[
    ("collections", "collections"),
    ("math", "math"),
    ("heapq", "heapq"),
    ("bisect", "bisect"),
    ("itertools", "itertools"),
    ("functools", "functools"),
    ("re", "re"),
    ("json", "json"),
    ("string", "string"),
];

static IMPORT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:import|from)\s+(\w+)").unwrap());
static DEF_OR_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:def|class)\s+(\w+)").unwrap());
static FROM_IMPORT_NAMES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*from\s+\w+(?:\.\w+)*\s+import\s+([^#\n]+)").unwrap());

/// Prepend the imports a solution uses but never declares. Returns the code
/// unchanged when nothing is missing.
pub fn augment_imports(code: &str) -> String {
    let imported_modules: Vec<&str> = IMPORT_LINE
        .captures_iter(code)
        .map(|c| c.get(1).unwrap().as_str())
        .collect();

    let mut bound_names: Vec<&str> = DEF_OR_CLASS
        .captures_iter(code)
        .map(|c| c.get(1).unwrap().as_str())
        .collect();
    for m in FROM_IMPORT_NAMES.captures_iter(code) {
        for name in m.get(1).unwrap().as_str().split(',') {
            // Both the source name and any alias count as bound: the import
            // line itself mentions the source name, and the alias is what
            // the body uses.
            for part in name.split(" as ") {
                let part = part.trim();
                if !part.is_empty() {
                    bound_names.push(part);
                }
            }
        }
    }

    let mut missing: Vec<String> = Vec::new();

    let mut typing_needed: Vec<&str> = TYPING_NAMES
        .iter()
        .copied()
        .filter(|name| {
            uses_name(code, name)
                && !bound_names.contains(name)
                && !imported_modules.contains(&"typing")
        })
        .collect();
    if !typing_needed.is_empty() {
        typing_needed.sort_unstable();
        missing.push(format!("from typing import {}", typing_needed.join(", ")));
    }

    for (name, import_line) in DIRECT_IMPORTS {
        if uses_name(code, name) && !bound_names.contains(name) {
            missing.push((*import_line).to_string());
        }
    }

    for (name, module) in MODULE_IMPORTS {
        if uses_attribute(code, name)
            && !imported_modules.contains(module)
            && !bound_names.contains(name)
        {
            missing.push(format!("import {module}"));
        }
    }

    if missing.is_empty() {
        return code.to_string();
    }
    format!("{}\n\n{}", missing.join("\n"), code)
}

/// Whole-word usage check.
fn uses_name(code: &str, name: &str) -> bool {
    Regex::new(&format!(r"\b{}\b", regex::escape(name)))
        .map(|re| re.is_match(code))
        .unwrap_or(false)
}

/// `module.something` usage check. Bare mentions of a module name without
/// an attribute access do not need the import.
fn uses_attribute(code: &str, module: &str) -> bool {
    Regex::new(&format!(r"\b{}\.\w", regex::escape(module)))
        .map(|re| re.is_match(code))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untouched_when_nothing_is_missing() {
        let code = "class Solution:\n    def f(self, x):\n        return x\n";
        assert_eq!(augment_imports(code), code);
    }

    #[test]
    fn typing_names_get_one_import() {
        let code = "def f(xs: List[int]) -> Optional[int]:\n    return xs[0]\n";
        let out = augment_imports(code);
        assert!(out.starts_with("from typing import List, Optional\n"));
        assert!(out.ends_with(code));
    }

    #[test]
    fn existing_typing_import_is_respected() {
        let code = "from typing import List\ndef f(xs: List[int]):\n    return xs\n";
        assert_eq!(augment_imports(code), code);
    }

    #[test]
    fn deque_gets_a_from_import() {
        let code = "def f():\n    q = deque()\n    return q\n";
        let out = augment_imports(code);
        assert!(out.contains("from collections import deque"));
    }

    #[test]
    fn module_attribute_use_imports_the_module() {
        let code = "def f(x):\n    return math.sqrt(x)\n";
        let out = augment_imports(code);
        assert!(out.starts_with("import math\n"));
    }

    #[test]
    fn imported_module_is_not_duplicated() {
        let code = "import math\ndef f(x):\n    return math.sqrt(x)\n";
        assert_eq!(augment_imports(code), code);
    }

    #[test]
    fn user_defined_name_shadows_the_prelude() {
        let code = "def Counter():\n    return 0\n\nprint(Counter())\n";
        assert_eq!(augment_imports(code), code);
    }

    #[test]
    fn from_import_binding_is_respected() {
        let code = "from collections import deque as dq, Counter\nc = Counter()\n";
        assert_eq!(augment_imports(code), code);
    }
}
