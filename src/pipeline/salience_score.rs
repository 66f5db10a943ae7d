// src/pipeline/salience_score.rs
// Heuristic salience scoring: a pure function of the message text and an
// optional affect intensity. Precompiled regexes keep this sub-millisecond.

use crate::similarity::estimate_tokens;
use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static PROBLEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(error|bug|broken|failed|crash|issue|problem|wrong|fix)\b")
        .expect("valid regex")
});

#[allow(clippy::expect_used)]
static RESOLUTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(decided|solution|solved|fixed|resolved|answer|figured out)\b")
        .expect("valid regex")
});

#[allow(clippy::expect_used)]
static INSIGHT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(learned|realized|discovered|understand|now i know)\b")
        .expect("valid regex")
});

#[allow(clippy::expect_used)]
static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("valid regex"));

/// List-line prefixes: bullets or numbered items at line start
#[allow(clippy::expect_used)]
static LIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:[-*\u{2022}]|\d+[.)])\s+").expect("valid regex"));

/// Score how memorable a message is, in [0, 1].
///
/// Additive signals: length, questions, problem/resolution/insight
/// language, emotional intensity, code, links, and list structure.
pub fn score_salience(content: &str, affect_intensity: Option<f32>) -> f32 {
    let mut score = 0.0f32;

    let tokens = estimate_tokens(content);
    if tokens > 100 {
        score += 0.1;
    }
    if tokens > 500 {
        score += 0.1;
    }

    let questions = content.matches('?').count().min(2);
    score += 0.1 * questions as f32;

    if PROBLEM_RE.is_match(content) {
        score += 0.3;
    }
    if RESOLUTION_RE.is_match(content) {
        score += 0.25;
    }
    if INSIGHT_RE.is_match(content) {
        score += 0.2;
    }

    if let Some(intensity) = affect_intensity {
        if intensity > 0.5 {
            score += intensity * 0.2;
        }
    }

    if content.contains('`') {
        score += 0.15;
    }
    if URL_RE.is_match(content) {
        score += 0.1;
    }
    if LIST_RE.is_match(content) {
        score += 0.1;
    }

    score.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bland_text_scores_near_zero() {
        assert_eq!(score_salience("ok", None), 0.0);
        assert_eq!(score_salience("sounds good to me", None), 0.0);
    }

    #[test]
    fn problem_language_scores_high() {
        let score = score_salience("the build failed with a weird error, probably a bug", None);
        assert!((score - 0.3).abs() < 1e-6);
    }

    #[test]
    fn resolution_and_insight_stack() {
        let score = score_salience("finally fixed it, and I learned why it broke", None);
        // fixed (resolution 0.25) + learned (insight 0.2) + broke... "broke"
        // is not in the problem set ("broken" is, with word boundary)
        assert!((score - 0.45).abs() < 1e-6);
    }

    #[test]
    fn question_marks_cap_at_two() {
        assert!((score_salience("why?", None) - 0.1).abs() < 1e-6);
        assert!((score_salience("why? how? when? where?", None) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn length_thresholds_add_up() {
        let medium = "word ".repeat(90); // ~112 tokens
        assert!((score_salience(&medium, None) - 0.1).abs() < 1e-6);

        let long = "word ".repeat(450); // ~562 tokens
        assert!((score_salience(&long, None) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn affect_intensity_counts_only_above_half() {
        assert_eq!(score_salience("hello there", Some(0.5)), 0.0);
        let boosted = score_salience("hello there", Some(0.8));
        assert!((boosted - 0.16).abs() < 1e-6);
    }

    #[test]
    fn code_url_and_lists_add_signals() {
        assert!((score_salience("use `cargo test`", None) - 0.15).abs() < 1e-6);
        assert!((score_salience("see https://example.com/docs", None) - 0.1).abs() < 1e-6);
        assert!((score_salience("steps:\n- first\n- second", None) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn score_is_capped_at_one() {
        let loaded = format!(
            "{} error fixed learned ` https://x.dev ?\n- item\n? {}",
            "w".repeat(2500),
            "w".repeat(100)
        );
        assert_eq!(score_salience(&loaded, Some(1.0)), 1.0);
    }
}
