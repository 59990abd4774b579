//! One question, one answer.

use anyhow::{Context, Result};

use super::OutputMode;
use crate::printer::print_answer;
use crate::service::{AnalysisService, AnswerEnvelope};

pub struct AskHandler;

impl AskHandler {
    pub async fn run(service: &AnalysisService, user_id: &str, question: &str, mode: OutputMode) -> Result<AnswerEnvelope> {
        let env = service
            .answer(user_id, question)
            .await
            .context("analysis request failed")?;
        emit(&env, mode)?;
        Ok(env)
    }
}

pub(crate) fn emit(env: &AnswerEnvelope, mode: OutputMode) -> Result<()> {
    match mode {
        OutputMode::Json => println!("{}", serde_json::to_string_pretty(env)?),
        OutputMode::Markdown => print_answer(env, true),
        OutputMode::Text => print_answer(env, false),
    }
    Ok(())
}
