//! Language-aware extraction of high-signal diagnostics from raw test output.
//!
//! The summarizer is a pure function over captured bytes so it can be
//! exercised without a container backend. Matched lines keep their
//! source order; adjacent duplicates collapse to one.

use std::collections::HashSet;

use regex::Regex;

use crate::tasks::Language;

/// Maximum matched lines kept in a summary.
pub const DEFAULT_MAX_LINES: usize = 8;

/// Lines kept when no pattern matches.
const FALLBACK_LINES: usize = 20;

/// Compiled per-language diagnostic patterns.
pub struct Summarizer {
    max_lines: usize,
    go: Vec<Regex>,
    /// `=== RUN   <name>` line, capturing the test name.
    go_run: Regex,
    /// `--- FAIL: <name>` line, capturing the failing test name.
    go_fail_name: Regex,
    rust: Vec<Regex>,
    typescript: Vec<Regex>,
    kotlin: Vec<Regex>,
    dart: Vec<Regex>,
    zig: Vec<Regex>,
}

impl Summarizer {
    /// Builds the summarizer with the default line cap.
    pub fn new() -> Self {
        Self::with_max_lines(DEFAULT_MAX_LINES)
    }

    /// Builds the summarizer with a custom line cap.
    pub fn with_max_lines(max_lines: usize) -> Self {
        let compile = |patterns: &[&str]| -> Vec<Regex> {
            patterns
                .iter()
                .map(|p| Regex::new(p).expect("static diagnostic pattern"))
                .collect()
        };

        Self {
            max_lines,
            go: compile(&[
                r"DATA RACE",
                r"--- FAIL:",
                r"^\s*FAIL\b",
                r"cannot use .+ as .+",
                r"undefined:",
                r"panic:",
            ]),
            go_run: Regex::new(r"^=== RUN\s+(\S+)").expect("static diagnostic pattern"),
            go_fail_name: Regex::new(r"--- FAIL: (\S+)").expect("static diagnostic pattern"),
            rust: compile(&[
                r"error\[E\d{4}\]",
                r"^error(\[|:)",
                r"panicked at",
                r"test .+ \.\.\. FAILED",
                r"^failures:",
            ]),
            typescript: compile(&[
                r"\bTS\d{4,5}:",
                r"AssertionError",
                r"^not ok\b",
            ]),
            kotlin: compile(&[
                r"^e: .*error:",
                r"^e: ",
                r"AssertionFailedError",
            ]),
            dart: compile(&[
                r"Expected:",
                r"Actual:",
                r"type '.+' is not a subtype of type '.+'",
                r"\[E\]",
            ]),
            zig: compile(&[
                r"\berror:",
                r"expected .+ found .+",
                r"FAIL \(.+\)",
            ]),
        }
    }

    fn patterns(&self, language: Language) -> &[Regex] {
        match language {
            Language::Go => &self.go,
            Language::Rust => &self.rust,
            Language::TypeScript => &self.typescript,
            Language::Kotlin => &self.kotlin,
            Language::Dart => &self.dart,
            Language::Zig => &self.zig,
        }
    }

    /// Extracts up to `max_lines` diagnostic lines from `output`.
    ///
    /// Falls back to the last [`FALLBACK_LINES`] non-empty lines when no
    /// pattern matches. Idempotent over its own output: summary lines
    /// still match the pattern that selected them.
    pub fn summarize(&self, language: Language, output: &str) -> Vec<String> {
        let patterns = self.patterns(language);

        // Go interleaves `=== RUN` markers for every test; only the
        // ones whose test later fails carry signal.
        let failing_go_tests: HashSet<&str> = if language == Language::Go {
            self.go_fail_name
                .captures_iter(output)
                .filter_map(|c| c.get(1).map(|m| m.as_str()))
                .collect()
        } else {
            HashSet::new()
        };
        let run_of_failing_test = |line: &str| {
            self.go_run
                .captures(line)
                .and_then(|c| c.get(1))
                .is_some_and(|name| failing_go_tests.contains(name.as_str()))
        };

        let mut matched: Vec<String> = Vec::new();
        for line in output.lines() {
            let trimmed = line.trim_end();
            if trimmed.trim().is_empty() {
                continue;
            }
            if patterns.iter().any(|p| p.is_match(trimmed)) || run_of_failing_test(trimmed) {
                // Collapse adjacent identical diagnostics.
                if matched.last().map(String::as_str) == Some(trimmed) {
                    continue;
                }
                matched.push(trimmed.to_string());
                if matched.len() == self.max_lines {
                    break;
                }
            }
        }

        if !matched.is_empty() {
            return matched;
        }

        let non_empty: Vec<&str> = output
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.trim().is_empty())
            .collect();
        non_empty
            .iter()
            .rev()
            .take(FALLBACK_LINES)
            .rev()
            .map(|l| l.to_string())
            .collect()
    }
}

impl Default for Summarizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_go_race_and_fail() {
        let output = "\
=== RUN   TestWithdraw
--- PASS: TestWithdraw (0.00s)
=== RUN   TestDeposit
WARNING: DATA RACE
Read at 0x00c00001 by goroutine 7:
--- FAIL: TestDeposit (0.01s)
    bank_account_test.go:42: balance mismatch
FAIL
FAIL\tbank 0.012s";
        let summary = Summarizer::new().summarize(Language::Go, output);
        assert!(summary.iter().any(|l| l.contains("DATA RACE")));
        assert!(summary.iter().any(|l| l.contains("--- FAIL: TestDeposit")));
        // The RUN marker of the failing test is kept, passing ones are not.
        assert!(summary.iter().any(|l| l.contains("=== RUN   TestDeposit")));
        assert!(!summary.iter().any(|l| l.contains("TestWithdraw")));
    }

    #[test]
    fn test_go_type_errors() {
        let output = "\
./bank_account.go:10:6: cannot use balance (variable of type string) as int value
./bank_account.go:14:2: undefined: mutex";
        let summary = Summarizer::new().summarize(Language::Go, output);
        assert_eq!(summary.len(), 2);
    }

    #[test]
    fn test_rust_borrowck_codes() {
        let output = "\
error[E0382]: use of moved value: `buf`
  --> src/lib.rs:12:9
error[E0499]: cannot borrow `v` as mutable more than once at a time
warning: unused variable `x`
thread 'tests::split' panicked at src/lib.rs:40:5:
assertion failed";
        let summary = Summarizer::new().summarize(Language::Rust, output);
        assert!(summary.iter().any(|l| l.contains("E0382")));
        assert!(summary.iter().any(|l| l.contains("E0499")));
        assert!(summary.iter().any(|l| l.contains("panicked at")));
        assert!(!summary.iter().any(|l| l.contains("warning")));
    }

    #[test]
    fn test_typescript_codes_and_tap() {
        let output = "\
src/emitter.ts(8,5): error TS2345: Argument of type 'string' is not assignable.
not ok 1 - emits typed payloads
AssertionError [ERR_ASSERTION]: Expected values to be strictly equal";
        let summary = Summarizer::new().summarize(Language::TypeScript, output);
        assert_eq!(summary.len(), 3);
    }

    #[test]
    fn test_kotlin_and_dart() {
        let kotlin = "e: file.kt:3:10 error: unresolved reference: chan\norg.opentest4j.AssertionFailedError: expected: <3> but was: <2>";
        let summary = Summarizer::new().summarize(Language::Kotlin, kotlin);
        assert_eq!(summary.len(), 2);

        let dart = "\
Expected: <42>
  Actual: <0>
type 'Null' is not a subtype of type 'int'";
        let summary = Summarizer::new().summarize(Language::Dart, dart);
        assert_eq!(summary.len(), 3);
    }

    #[test]
    fn test_zig_errors() {
        let output = "\
src/main.zig:4:11: error: expected type 'u32' found 'i64'
test \"arena reuse\"... FAIL (TestUnexpectedResult)";
        let summary = Summarizer::new().summarize(Language::Zig, output);
        assert_eq!(summary.len(), 2);
    }

    #[test]
    fn test_cap_and_adjacent_dedup() {
        let line = "--- FAIL: TestX (0.00s)\n";
        let output = line.repeat(30);
        let summary = Summarizer::new().summarize(Language::Go, &output);
        // Adjacent duplicates collapse before the cap applies.
        assert_eq!(summary.len(), 1);

        let alternating = "--- FAIL: TestA (0.00s)\n--- FAIL: TestB (0.00s)\n".repeat(30);
        let summary = Summarizer::new().summarize(Language::Go, &alternating);
        assert_eq!(summary.len(), DEFAULT_MAX_LINES);
    }

    #[test]
    fn test_fallback_last_nonempty_lines() {
        let mut output = String::new();
        for i in 0..40 {
            output.push_str(&format!("line {i}\n\n"));
        }
        let summary = Summarizer::new().summarize(Language::Go, &output);
        assert_eq!(summary.len(), 20);
        assert_eq!(summary[0], "line 20");
        assert_eq!(summary[19], "line 39");
    }

    #[test]
    fn test_idempotent_on_own_output() {
        let output = "\
error[E0507]: cannot move out of `self.inner`
test split ... FAILED
thread 'split' panicked at src/lib.rs:9:5:";
        let summarizer = Summarizer::new();
        let once = summarizer.summarize(Language::Rust, output);
        let twice = summarizer.summarize(Language::Rust, &once.join("\n"));
        assert_eq!(once, twice);
    }
}
