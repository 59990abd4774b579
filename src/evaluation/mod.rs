//! Evaluator protocol: what the evaluator is shown and how its judgment is read.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::artifacts::truncate_chars;

/// Stdout plus figure descriptions, each labeled, joined by a blank line and
/// capped at `max_chars`.
pub fn combine_output(stdout: &str, figure_details: &str, max_chars: usize) -> String {
    let mut parts = Vec::new();
    if !stdout.is_empty() {
        parts.push(stdout.to_string());
    }
    if !figure_details.is_empty() {
        parts.push(format!("Figure Details:\n{}", figure_details));
    }
    truncate_chars(
        parts.join("\n\n"),
        max_chars,
        &format!("\n\n[Output truncated to {} characters]", max_chars),
    )
}

pub fn evaluation_prompt(question: &str, code: &str, output: &str) -> String {
    format!(
        "This is the user question: {}\n\nThis is the code: {}\n\nOutput of Executed Code:\n{}",
        question, code, output
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub regenerate: bool,
    /// Evaluator's reasoning; only meaningful when `regenerate` is set.
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("evaluator reply carries no `necessary_code_regenerate` judgment")]
pub struct VerdictError;

fn judgment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)["']?necessary_code_regenerate["']?\s*[:=]\s*["']?(true|false)\b"#)
            .expect("valid judgment regex")
    })
}

fn explanation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)"explanation"\s*:\s*("(?:[^"\\]|\\.)*")"#).expect("valid explanation regex")
    })
}

/// Read the evaluator's judgment.
///
/// Strict mode requires a `necessary_code_regenerate: true|false` field
/// (any case, quoted or not) and fails otherwise. Lenient mode keeps the
/// old behavior: any case-insensitive occurrence of "true" means regenerate.
pub fn parse_verdict(text: &str, strict: bool) -> Result<Verdict, VerdictError> {
    let regenerate = match judgment_re().captures(text) {
        Some(caps) => caps[1].eq_ignore_ascii_case("true"),
        None if strict => return Err(VerdictError),
        None => text.to_lowercase().contains("true"),
    };
    let explanation = if regenerate {
        explanation_re()
            .captures(text)
            .and_then(|c| serde_json::from_str::<String>(&c[1]).ok())
            .filter(|s| !s.trim().is_empty())
            .or_else(|| Some(text.trim().to_string()))
    } else {
        None
    };
    Ok(Verdict { regenerate, explanation })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn judgment_true_in_any_case_and_context() {
        for text in [
            r#"{"necessary_code_regenerate": true, "explanation": "df has 0 rows"}"#,
            "Looks off.\n\"necessary_code_regenerate\": TRUE\nThe sum is NaN for all 503 tickers.",
            "necessary_code_regenerate: True",
        ] {
            let v = parse_verdict(text, true).unwrap();
            assert!(v.regenerate, "{}", text);
            assert!(v.explanation.is_some());
        }
    }

    #[test]
    fn judgment_false_is_accepted() {
        let v = parse_verdict(r#""necessary_code_regenerate": FALSE"#, true).unwrap();
        assert_eq!(v, Verdict { regenerate: false, explanation: None });
        let v = parse_verdict(r#""necessary_code_regenerate": FALSE"#, false).unwrap();
        assert!(!v.regenerate);
    }

    #[test]
    fn strict_mode_rejects_free_text() {
        assert_eq!(parse_verdict("Is this true? Hard to say.", true), Err(VerdictError));
    }

    #[test]
    fn lenient_mode_matches_substring() {
        // the documented fragility: a stray "true" triggers regeneration
        assert!(parse_verdict("Is this true? Hard to say.", false).unwrap().regenerate);
        assert!(!parse_verdict("All fine.", false).unwrap().regenerate);
    }

    #[test]
    fn explanation_is_unescaped() {
        let v = parse_verdict(
            r#"{"necessary_code_regenerate": true, "explanation": "column \"revenue\" is empty"}"#,
            true,
        )
        .unwrap();
        assert_eq!(v.explanation.as_deref(), Some("column \"revenue\" is empty"));
    }

    #[test]
    fn combined_output_labels_and_caps() {
        assert_eq!(combine_output("a", "", 100), "a");
        assert_eq!(combine_output("", "Figure 1: f", 100), "Figure Details:\nFigure 1: f");
        assert_eq!(combine_output("a", "fig", 100), "a\n\nFigure Details:\nfig");
        let capped = combine_output(&"x".repeat(50), "", 10);
        assert_eq!(capped, format!("{}\n\n[Output truncated to 10 characters]", "x".repeat(10)));
    }
}
