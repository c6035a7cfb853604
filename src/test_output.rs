//! Best-effort parser for test runner output
//!
//! The runner that produced the text is not known up front, so each line is
//! classified by an ordered list of recognizer rules (first match wins).
//! Output that matches nothing yields an empty summary; parsing never fails.

use crate::data::{TestCase, TestStatus, TestSummary};
use regex::Regex;
use std::sync::OnceLock;

/// Upper bound on error lines attributed to a single failing case
pub const MAX_ERROR_LINES: usize = 30;

/// Whether a blank line ends error collection, given the next non-blank
/// line. Only a marker or summary line closes the block.
pub fn ends_error_block(next: Option<&str>) -> bool {
    next.is_some_and(|l| matches!(classify(l), LineKind::Marker(_) | LineKind::Summary))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Marker(TestStatus),
    Summary,
    Duration,
    Other,
}

struct Rule {
    name: &'static str,
    pattern: Regex,
    kind: LineKind,
}

fn rule(name: &'static str, pattern: &str, kind: LineKind) -> Rule {
    Rule {
        name,
        pattern: Regex::new(pattern).expect("valid regex"),
        kind,
    }
}

/// Ordered recognizers. TAP `not ok` precedes `ok`, and count summaries
/// precede the bare PASS/FAIL words so "3 passed" is not read as a case.
fn rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            rule("pass_glyph", r"[✓✔]", LineKind::Marker(TestStatus::Passed)),
            rule("fail_glyph", r"[✗✘✕×]", LineKind::Marker(TestStatus::Failed)),
            rule("tap_not_ok", r"(?i)^\s*not ok\s+\d", LineKind::Marker(TestStatus::Failed)),
            rule("tap_ok", r"(?i)^\s*ok\s+\d", LineKind::Marker(TestStatus::Passed)),
            rule(
                "count_summary",
                r"(?i)\b\d+\s+(?:passing|passed|failing|failed)\b",
                LineKind::Summary,
            ),
            rule("duration", r"(?i)(?:Time|Duration):\s*[\d.]+\s*s", LineKind::Duration),
            rule("fail_word", r"(?i)\bfail(?:ed)?\b", LineKind::Marker(TestStatus::Failed)),
            rule("pass_word", r"(?i)\bpass(?:ed)?\b", LineKind::Marker(TestStatus::Passed)),
        ]
    })
}

fn classify(line: &str) -> LineKind {
    rules()
        .iter()
        .find(|r| r.pattern.is_match(line))
        .map(|r| r.kind)
        .unwrap_or(LineKind::Other)
}

/// Name of the recognizer rule a line matches, if any
pub fn recognizer_for(line: &str) -> Option<&'static str> {
    rules().iter().find(|r| r.pattern.is_match(line)).map(|r| r.name)
}

fn marker_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:[✓✔✗✘✕×]|not ok\s+\d+|ok\s+\d+|pass(?:ed)?\b|fail(?:ed)?\b)\s*(?:-\s+)?")
            .expect("valid regex")
    })
}

fn case_duration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\((\d+(?:\.\d+)?)\s*(ms|s)\)").expect("valid regex"))
}

fn passed_count_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d+)\s+(?:passing|passed)\b").expect("valid regex"))
}

fn failed_count_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d+)\s+(?:failing|failed)\b").expect("valid regex"))
}

fn total_duration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(?:Time|Duration):\s*([\d.]+)\s*s").expect("valid regex"))
}

/// Duration annotation of a case line, normalised to seconds
fn case_duration(line: &str) -> f64 {
    case_duration_re()
        .captures(line)
        .and_then(|c| {
            let value: f64 = c.get(1)?.as_str().parse().ok()?;
            match c.get(2)?.as_str() {
                "ms" => Some(value / 1000.0),
                _ => Some(value),
            }
        })
        .unwrap_or(0.0)
}

fn case_name(line: &str) -> String {
    let without_prefix = marker_prefix_re().replace(line, "");
    case_duration_re()
        .replace(&without_prefix, "")
        .trim()
        .to_string()
}

fn capture_count(re: &Regex, line: &str) -> Option<usize> {
    re.captures(line)?.get(1)?.as_str().parse().ok()
}

/// Error text being gathered for the most recent failing case
struct ErrorCollector {
    case_index: usize,
    lines: Vec<String>,
}

impl ErrorCollector {
    fn flush(self, cases: &mut [TestCase]) {
        if self.lines.is_empty() {
            return;
        }
        let text = self.lines.join("\n").trim_end().to_string();
        if let Some(case) = cases.get_mut(self.case_index) {
            case.error = Some(text);
        }
    }
}

/// Parse test runner output into a summary
pub fn parse(output: &str) -> TestSummary {
    let lines: Vec<&str> = output.lines().collect();
    let mut cases: Vec<TestCase> = Vec::new();
    let mut collecting: Option<ErrorCollector> = None;

    let mut summary_passed: Option<usize> = None;
    let mut summary_failed: Option<usize> = None;
    let mut duration = 0.0;

    for (i, line) in lines.iter().enumerate() {
        let kind = classify(line);

        if let LineKind::Marker(status) = kind {
            if let Some(pending) = collecting.take() {
                pending.flush(&mut cases);
            }

            let name = case_name(line);
            if name.is_empty() {
                continue;
            }
            cases.push(TestCase {
                name,
                status,
                duration: case_duration(line),
                error: None,
            });
            if status == TestStatus::Failed {
                collecting = Some(ErrorCollector {
                    case_index: cases.len() - 1,
                    lines: Vec::new(),
                });
            }
            continue;
        }

        if let Some(collector) = collecting.as_mut() {
            let blank = line.trim().is_empty();

            if blank && !collector.lines.is_empty() {
                let next = lines[i + 1..].iter().find(|l| !l.trim().is_empty());
                if ends_error_block(next.copied()) {
                    if let Some(done) = collecting.take() {
                        done.flush(&mut cases);
                    }
                    continue;
                }
            }

            if !blank || !collector.lines.is_empty() {
                collector.lines.push(line.to_string());
            }

            if collector.lines.len() >= MAX_ERROR_LINES {
                if let Some(done) = collecting.take() {
                    done.flush(&mut cases);
                }
            }
            continue;
        }

        match kind {
            LineKind::Summary => {
                if let Some(n) = capture_count(passed_count_re(), line) {
                    summary_passed.get_or_insert(n);
                }
                if let Some(n) = capture_count(failed_count_re(), line) {
                    summary_failed = Some(n);
                }
                if let Some(d) = total_duration_from(line) {
                    duration = d;
                }
            }
            LineKind::Duration => {
                if let Some(d) = total_duration_from(line) {
                    duration = d;
                }
            }
            _ => {}
        }
    }

    if let Some(pending) = collecting.take() {
        pending.flush(&mut cases);
    }

    let (total, passed, failed) = if cases.is_empty() {
        let passed = summary_passed.unwrap_or(0);
        let failed = summary_failed.unwrap_or(0);
        (passed + failed, passed, failed)
    } else {
        let failed = cases
            .iter()
            .filter(|c| c.status == TestStatus::Failed)
            .count();
        (cases.len(), cases.len() - failed, failed)
    };

    TestSummary {
        total,
        passed,
        failed,
        duration,
        cases,
    }
}

fn total_duration_from(line: &str) -> Option<f64> {
    total_duration_re()
        .captures(line)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_passing_case_with_ms_duration() {
        let summary = parse("  ✓ creates user (42ms)\n");
        assert_eq!(summary.total, 1);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.cases.len(), 1);
        assert_eq!(summary.cases[0].name, "creates user");
        assert_eq!(summary.cases[0].status, TestStatus::Passed);
        assert!((summary.cases[0].duration - 0.042).abs() < 1e-9);
    }

    #[test]
    fn failing_case_collects_error_until_blank_then_marker() {
        let output = "✗ rejects invalid email\nExpected: 400\nReceived: 200\nat handler.ts:12\n\n✓ lists users\n";
        let summary = parse(output);

        assert_eq!(summary.total, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.passed, 1);
        let failed = &summary.cases[0];
        assert_eq!(failed.name, "rejects invalid email");
        assert_eq!(failed.status, TestStatus::Failed);
        assert_eq!(
            failed.error.as_deref(),
            Some("Expected: 400\nReceived: 200\nat handler.ts:12")
        );
        assert_eq!(summary.cases[1].error, None);
    }

    #[test]
    fn marker_directly_after_error_flushes_first() {
        let output = "✗ first\n  boom\n✗ second\n  bang\n";
        let summary = parse(output);
        assert_eq!(summary.cases[0].error.as_deref(), Some("  boom"));
        assert_eq!(summary.cases[1].error.as_deref(), Some("  bang"));
    }

    #[test]
    fn error_collection_is_bounded() {
        let mut output = String::from("✗ noisy\n");
        for n in 0..50 {
            output.push_str(&format!("trace line {}\n", n));
        }
        let summary = parse(&output);
        let error = summary.cases[0].error.as_deref().unwrap();
        assert_eq!(error.lines().count(), MAX_ERROR_LINES);
        assert!(error.ends_with("trace line 29"));
    }

    #[test]
    fn blank_line_inside_error_is_kept_when_not_followed_by_marker() {
        let output = "✗ multi\nfirst part\n\nsecond part\n";
        let summary = parse(output);
        assert_eq!(
            summary.cases[0].error.as_deref(),
            Some("first part\n\nsecond part")
        );
    }

    #[test]
    fn blank_then_summary_ends_error() {
        let output = "✗ broken\nstack\n\n  1 passing\n  1 failing\n";
        let summary = parse(output);
        assert_eq!(summary.cases[0].error.as_deref(), Some("stack"));
        // Per-case lines win over summary counts
        assert_eq!(summary.total, 1);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn only_markers_and_summaries_end_error_block() {
        assert!(ends_error_block(Some("✓ next case")));
        assert!(ends_error_block(Some("not ok 2 - rejects email")));
        assert!(ends_error_block(Some("  3 passing")));
        assert!(!ends_error_block(Some("    at Object.<anonymous> (signup.test.ts:12:5)")));
        assert!(!ends_error_block(Some("Duration: 0.4s")));
        assert!(!ends_error_block(None));
    }

    #[test]
    fn summary_counts_seed_totals_without_cases() {
        let output = "collected 7 items\n\n===== 5 passed, 2 failed in 0.31s =====\nDuration: 1.5s\n";
        let summary = parse(output);
        assert!(summary.cases.is_empty());
        assert_eq!(summary.passed, 5);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.total, 7);
        assert!((summary.duration - 1.5).abs() < 1e-9);
    }

    #[test]
    fn tap_output() {
        let output = "TAP version 13\nok 1 - adds numbers\nnot ok 2 - divides by zero\n  ---\n  message: boom\n";
        let summary = parse(output);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.cases[0].name, "adds numbers");
        assert_eq!(summary.cases[0].status, TestStatus::Passed);
        assert_eq!(summary.cases[1].name, "divides by zero");
        assert_eq!(summary.cases[1].status, TestStatus::Failed);
        assert_eq!(
            summary.cases[1].error.as_deref(),
            Some("  ---\n  message: boom")
        );
    }

    #[test]
    fn seconds_duration_suffix() {
        let summary = parse("✓ slow import (1.2s)");
        assert!((summary.cases[0].duration - 1.2).abs() < 1e-9);
        assert_eq!(summary.cases[0].name, "slow import");
    }

    #[test]
    fn rule_order_prefers_not_ok_over_ok() {
        assert_eq!(recognizer_for("not ok 3 - x"), Some("tap_not_ok"));
        assert_eq!(recognizer_for("ok 3 - x"), Some("tap_ok"));
        assert_eq!(recognizer_for("12 passing (3s)"), Some("count_summary"));
        assert_eq!(recognizer_for("PASS src/user.test.ts"), Some("pass_word"));
    }

    #[test]
    fn malformed_input_yields_empty_summary() {
        for input in ["", "\n\n\n", "random noise\nwithout markers", "✓", "(12ms)"] {
            let summary = parse(input);
            assert_eq!(summary.total, 0, "input: {:?}", input);
        }
    }
}
