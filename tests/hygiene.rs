//! Hygiene — source scan for patterns that can take down a relay or a
//! session loop, or that swallow errors.
//!
//! Every pattern has a budget. Budgets only ever shrink: adding a hit means
//! removing another one first. `_test.rs` siblings are exempt.

use std::fs;
use std::path::{Path, PathBuf};

struct Budget {
    pattern: &'static str,
    max: usize,
}

/// Calls that abort the task.
const PANICS: &[Budget] = &[
    Budget { pattern: ".unwrap()", max: 0 },
    Budget { pattern: ".expect(", max: 0 },
    Budget { pattern: "panic!(", max: 0 },
    Budget { pattern: "unreachable!(", max: 0 },
    Budget { pattern: "todo!(", max: 0 },
    Budget { pattern: "unimplemented!(", max: 0 },
];

/// Errors discarded without a look. The `.ok()` hits are env lookups in
/// config, the optional `.env` load, and the optional join display name.
const DISCARDS: &[Budget] = &[
    Budget { pattern: "let _ =", max: 0 },
    Budget { pattern: ".ok()", max: 5 },
];

const LINT_ESCAPES: &[Budget] = &[Budget { pattern: "#[allow(dead_code)]", max: 0 }];

fn production_sources() -> Vec<(PathBuf, String)> {
    let mut pending = vec![PathBuf::from("src")];
    let mut sources = Vec::new();
    while let Some(dir) = pending.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for path in entries.flatten().map(|e| e.path()) {
            if path.is_dir() {
                pending.push(path);
            } else if is_production_rs(&path) {
                if let Ok(text) = fs::read_to_string(&path) {
                    sources.push((path, text));
                }
            }
        }
    }
    sources
}

fn is_production_rs(path: &Path) -> bool {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    name.ends_with(".rs") && !name.ends_with("_test.rs")
}

fn check(budgets: &[Budget]) {
    let sources = production_sources();
    assert!(!sources.is_empty(), "no sources under src/; run from the crate root");

    let mut failures = Vec::new();
    for budget in budgets {
        let hits = sources
            .iter()
            .map(|(path, text)| (path, text.lines().filter(|l| l.contains(budget.pattern)).count()))
            .filter(|(_, n)| *n > 0)
            .collect::<Vec<_>>();
        let found: usize = hits.iter().map(|(_, n)| n).sum();
        if found > budget.max {
            let detail = hits
                .iter()
                .map(|(path, n)| format!("    {}: {n}", path.display()))
                .collect::<Vec<_>>()
                .join("\n");
            failures.push(format!("  `{}`: found {found}, max {}\n{detail}", budget.pattern, budget.max));
        }
    }
    assert!(failures.is_empty(), "hygiene budget exceeded:\n{}", failures.join("\n"));
}

#[test]
fn no_panicking_calls() {
    check(PANICS);
}

#[test]
fn no_silently_discarded_errors() {
    check(DISCARDS);
}

#[test]
fn no_dead_code_escapes() {
    check(LINT_ESCAPES);
}
