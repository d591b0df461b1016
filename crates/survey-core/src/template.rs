use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::error::{SurveyError, SurveyResult};

const DEFAULT_TEMPLATE: &str = "\
You are marking an answer to the problem below against a marking scheme.

# Problem

{problem}

# Marking scheme

{marking_scheme}

# Answer to mark

{answer}

# Instructions

Apply the marking scheme strictly and explain briefly how each mark was \
awarded or withheld. Finish with a final line of the form `Score: N`, where \
N is the total number of marks awarded.
";

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{(problem|marking_scheme|answer)\}")
            .expect("placeholder pattern is a valid regex")
    })
}

/// Text sent to the evaluation model for one candidate answer.
#[derive(Debug, Clone)]
pub struct EvaluationTemplate {
    text: String,
}

impl EvaluationTemplate {
    pub fn new(text: impl Into<String>) -> SurveyResult<Self> {
        let text = text.into();
        if !text.contains("{answer}") {
            return Err(SurveyError::Config(
                "evaluation template must contain an {answer} placeholder".into(),
            ));
        }
        Ok(Self { text })
    }

    /// Fills every placeholder in one pass. Substituted text is never
    /// scanned again, so braces inside any of the three values are kept.
    pub fn render(&self, problem: &str, marking_scheme: &str, answer: &str) -> String {
        placeholder_pattern()
            .replace_all(&self.text, |caps: &Captures| match &caps[1] {
                "problem" => problem,
                "marking_scheme" => marking_scheme,
                _ => answer,
            })
            .into_owned()
    }
}

impl Default for EvaluationTemplate {
    fn default() -> Self {
        Self {
            text: DEFAULT_TEMPLATE.to_string(),
        }
    }
}
