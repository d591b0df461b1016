//! Score extraction from free-text judgements.
//!
//! Judges are asked to finish with `Score: N`, but they decorate it freely
//! (`**Total score**: 7/10`, `Final score = 6.5`). The last labelled number
//! wins, so a judge that revises its mark mid-text is read correctly.

use std::sync::OnceLock;

use regex::Regex;

fn score_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\bscore\b[^0-9\n-]{0,10}(-?\d+(?:\.\d+)?)")
            .expect("score pattern is a valid regex")
    })
}

/// Returns the judged score, or `None` when the text carries no score.
pub fn extract_score(text: &str) -> Option<f64> {
    score_pattern()
        .captures_iter(text)
        .last()
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
