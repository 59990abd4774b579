//! Turning an outcome into the answer the user sees.

use tracing::warn;

use super::{CodeGenResult, Outcome};
use crate::conversation::Conversation;
use crate::extract::strip_code_fences;
use crate::llm::ModelClient;
use crate::logging::timed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    German,
    English,
}

impl Locale {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" | "english" => Locale::English,
            _ => Locale::German,
        }
    }
}

/// Fixed apology for a failed outcome; `None` for success.
pub fn fallback_message(result: CodeGenResult, locale: Locale) -> Option<&'static str> {
    match (result, locale) {
        (CodeGenResult::Success, _) => None,
        (CodeGenResult::FailedError, Locale::German) => Some(
            "Entschuldigung, es ist mir mehrmals in Folge nicht gelungen, die erforderliche Analyse durchzuführen, \
             um Ihre Frage beantworten zu können. Könnten Sie bitte Ihre Frage umformulieren oder weitere Details angeben?",
        ),
        (CodeGenResult::FailedError, Locale::English) => Some(
            "Sorry, I repeatedly failed to run the analysis needed to answer your question. \
             Could you rephrase it or add more details?",
        ),
        (CodeGenResult::FailedEvaluation, Locale::German) => Some(
            "Ich habe Schwierigkeiten, eine zufriedenstellende Antwort auf Ihre Anfrage zu generieren. \
             Der letzte Versuch hat meine Qualitätsstandards nicht erfüllt. \
             Könnten Sie bitte mehr Kontext geben oder Ihre Frage umformulieren?",
        ),
        (CodeGenResult::FailedEvaluation, Locale::English) => Some(
            "I had trouble producing a satisfactory answer to your request. \
             The last attempt did not meet my quality standards. \
             Could you give more context or rephrase your question?",
        ),
    }
}

pub fn summary_prompt(question: &str, outcome: &Outcome) -> String {
    format!(
        "This is the user question: {}.\n\nThis is the code that was developed:{}\n\nThis is the result of the code:{}",
        question, outcome.raw_code, outcome.output
    )
}

/// Model-written answer for a successful outcome, the fixed apology
/// otherwise. Code fences never reach the user; a reply that is empty once
/// they are removed, or a failed model call, also falls back to the apology.
pub async fn summarize(
    model: &dyn ModelClient,
    conv: &Conversation,
    question: &str,
    outcome: &Outcome,
    locale: Locale,
) -> String {
    if let Some(message) = fallback_message(outcome.result, locale) {
        return message.to_string();
    }
    let apology = fallback_message(CodeGenResult::FailedError, locale).unwrap_or_default();

    let messages = conv.snapshot_for_prompt(Some(&summary_prompt(question, outcome)));
    match timed("generate answer", model.generate(&messages)).await {
        Ok(text) => {
            let answer = strip_code_fences(&text);
            if answer.is_empty() {
                warn!("summarizer reply held nothing but code");
                apology.to_string()
            } else {
                answer
            }
        }
        Err(e) => {
            warn!("summarizer call failed: {}", e);
            apology.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_map_to_fixed_messages() {
        assert!(fallback_message(CodeGenResult::Success, Locale::German).is_none());
        let de = fallback_message(CodeGenResult::FailedError, Locale::German).unwrap();
        assert!(de.starts_with("Entschuldigung"));
        let en = fallback_message(CodeGenResult::FailedEvaluation, Locale::English).unwrap();
        assert!(en.contains("rephrase"));
    }

    #[test]
    fn locale_parsing_defaults_to_german() {
        assert_eq!(Locale::parse("EN"), Locale::English);
        assert_eq!(Locale::parse("de"), Locale::German);
        assert_eq!(Locale::parse("fr"), Locale::German);
    }
}
