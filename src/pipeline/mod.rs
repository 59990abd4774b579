//! The generate -> execute -> evaluate -> rewrite loop.
//!
//! Two independent signals send an attempt back to the rewriter: the code
//! raised (hard failure) or the evaluator judged the output unusable (soft
//! failure). Either way partial artifacts are cleared first and the rewriter
//! sees the exact code and reason of the attempt that just failed. The loop
//! ends after `max_attempts` attempts at the latest.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::artifacts::{figure_details, ArtifactError, ArtifactStore, OutputDirs};
use crate::conversation::{Conversation, Turn, TurnError};
use crate::dataset::DatasetError;
use crate::evaluation::{combine_output, evaluation_prompt, parse_verdict};
use crate::execution::{prepare_code, Bindings, CodeExecutor, ExecutionResult, ExecutorError};
use crate::extract::extract_code;
use crate::llm::{ModelClient, ModelError};
use crate::logging::timed;
use crate::role::{AgentRole, TemplateError};
use crate::session::SessionBundle;

pub mod summary;

pub use summary::{fallback_message, summarize, Locale};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_attempts: usize,
    pub max_output_chars: usize,
    /// Require a parseable `necessary_code_regenerate` field from the evaluator.
    pub strict_verdict: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { max_attempts: 3, max_output_chars: 100_000, strict_verdict: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeGenResult {
    Success,
    FailedError,
    FailedEvaluation,
}

/// Terminal value of the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub result: CodeGenResult,
    /// Last model text the code was extracted from.
    pub raw_code: String,
    pub output: String,
    pub feedback: Option<String>,
    pub error: Option<String>,
    pub attempts: usize,
}

/// Working state of one iteration.
#[derive(Debug, Clone, Default)]
pub struct Attempt {
    pub index: usize,
    /// The message that produced `raw_code`: the question or a rewrite request.
    pub prompt: String,
    pub raw_code: String,
    pub code: String,
    pub output: String,
    pub error: Option<String>,
    pub feedback: Option<String>,
}

impl Attempt {
    fn finish(self, result: CodeGenResult) -> Outcome {
        Outcome {
            result,
            raw_code: self.raw_code,
            output: self.output,
            feedback: self.feedback,
            error: self.error,
            attempts: self.index + 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("question is empty")]
    EmptyQuestion,
    #[error("{role} model call failed: {source}")]
    Model { role: &'static str, source: ModelError },
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    Artifacts(#[from] ArtifactError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Turn(#[from] TurnError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

enum Retry {
    Error(String),
    Evaluation(String),
}

pub fn error_rewrite_request(detail: &str) -> String {
    format!(
        "Please correct the code: {}\n\nThere is an error in the code highlighted by '<-- Error'. \
         Find that error and then change your code to fix that error. \
         Do not give out anything else (no description), but the new complete and fixed code!",
        detail
    )
}

pub fn feedback_rewrite_request(feedback: &str) -> String {
    format!(
        "A colleague of mine evaluated your code and did not like it. \
         Please change it in regards to this feedback: {}\n\n\
         Do not give out anything else (no description), but the new complete and fixed code!",
        feedback
    )
}

fn code_and_output(raw_code: &str, output: &str) -> String {
    format!("{}\n\nOutput of Executed Code:\n{}", raw_code, output)
}

pub struct Orchestrator<'a> {
    model: &'a dyn ModelClient,
    executor: &'a dyn CodeExecutor,
    artifacts: &'a dyn ArtifactStore,
    config: &'a PipelineConfig,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        model: &'a dyn ModelClient,
        executor: &'a dyn CodeExecutor,
        artifacts: &'a dyn ArtifactStore,
        config: &'a PipelineConfig,
    ) -> Self {
        Self { model, executor, artifacts, config }
    }

    /// Ask `role` for a reply. Transient model failures come back as the
    /// inner `Err` so the loop can spend an attempt on them; anything else
    /// aborts the request.
    async fn call(
        &self,
        role: AgentRole,
        conv: &Conversation,
        message: &str,
    ) -> Result<Result<String, ModelError>, PipelineError> {
        match self.model.generate(&conv.snapshot_for_prompt(Some(message))).await {
            Ok(text) => Ok(Ok(text)),
            Err(e) if e.is_transient() => {
                warn!("{} model call failed, counting as a failed attempt: {}", role.name(), e);
                Ok(Err(e))
            }
            Err(source) => Err(PipelineError::Model { role: role.name(), source }),
        }
    }

    pub async fn run(
        &self,
        session: &mut SessionBundle,
        question: &str,
        dirs: &OutputDirs,
        bindings: &Bindings,
    ) -> Result<Outcome, PipelineError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut prompt = question.to_string();
        let mut generated = timed("generate code", self.call(AgentRole::Analyst, &session.analyst, question)).await?;
        let mut last_feedback: Option<String> = None;

        for index in 0..max_attempts {
            let is_last = index + 1 == max_attempts;
            let mut attempt = Attempt {
                index,
                prompt: prompt.clone(),
                feedback: last_feedback.clone(),
                ..Attempt::default()
            };
            info!("attempt {}/{}", index + 1, max_attempts);

            let retry = match generated {
                Err(e) => Retry::Error(format!("The code could not be generated: {}", e)),
                Ok(raw) => {
                    attempt.raw_code = raw;
                    attempt.code = prepare_code(&extract_code(&attempt.raw_code), dirs);
                    debug!("extracted code:\n{}", attempt.code);

                    let exec = timed("execute code", self.executor.execute(&attempt.code, bindings, dirs)).await?;
                    let stdout = exec.output().unwrap_or_default();
                    attempt.output = combine_output(stdout, &figure_details(&dirs.json), self.config.max_output_chars);
                    debug!("output of executed code:\n{}", attempt.output);

                    match exec {
                        ExecutionResult::Error { detail } => Retry::Error(detail),
                        ExecutionResult::Success { .. } => {
                            let message = evaluation_prompt(question, &attempt.raw_code, &attempt.output);
                            let evaluation =
                                timed("evaluation", self.call(AgentRole::Evaluator, &session.evaluator, &message)).await?;
                            match evaluation {
                                Err(e) => Retry::Evaluation(format!("The output could not be evaluated: {}", e)),
                                Ok(text) => {
                                    info!("evaluation: {}", text);
                                    attempt.feedback = Some(text.clone());
                                    last_feedback = Some(text.clone());
                                    match parse_verdict(&text, self.config.strict_verdict) {
                                        Ok(v) if !v.regenerate => {
                                            info!("attempt {} accepted", index + 1);
                                            return Ok(attempt.finish(CodeGenResult::Success));
                                        }
                                        Ok(v) => Retry::Evaluation(v.explanation.unwrap_or(text)),
                                        Err(e) => {
                                            warn!("{}", e);
                                            Retry::Evaluation(text)
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            };

            self.artifacts.clear(dirs)?;

            let request = match retry {
                Retry::Error(detail) => {
                    info!("execution failed on attempt {}", index + 1);
                    debug!("error detail:\n{}", detail);
                    let request = error_rewrite_request(&detail);
                    attempt.error = Some(detail);
                    if is_last {
                        return Ok(attempt.finish(CodeGenResult::FailedError));
                    }
                    request
                }
                Retry::Evaluation(feedback) => {
                    info!("evaluator requested regeneration on attempt {}", index + 1);
                    if is_last {
                        return Ok(attempt.finish(CodeGenResult::FailedEvaluation));
                    }
                    feedback_rewrite_request(&feedback)
                }
            };

            // Ground the rewriter in the attempt that just failed.
            session.rewriter.append(Turn::user(attempt.prompt.clone())?)?;
            session
                .rewriter
                .append(Turn::assistant(code_and_output(&attempt.raw_code, &attempt.output))?)?;
            session.rewriter.trim();

            generated = timed("rewrite code", self.call(AgentRole::Rewriter, &session.rewriter, &request)).await?;
            prompt = request;
        }

        unreachable!("the final attempt always returns")
    }
}

/// Fold a finished request into the per-role histories.
pub fn record_exchange(
    session: &mut SessionBundle,
    question: &str,
    outcome: &Outcome,
    answer: &str,
) -> Result<(), TurnError> {
    if !outcome.raw_code.trim().is_empty() {
        session.analyst.append(Turn::user(question)?)?;
        session
            .analyst
            .append(Turn::assistant(code_and_output(&outcome.raw_code, &outcome.output))?)?;

        if let Some(feedback) = outcome.feedback.as_deref().filter(|f| !f.trim().is_empty()) {
            session.evaluator.append(Turn::user(format!(
                "This is the user_query: {}.\n\nThis is the analysis that the bot has conducted:\n{}.\n\nAnd this is the result of the analysis:\n{}",
                question, outcome.raw_code, outcome.output
            ))?)?;
            session.evaluator.append(Turn::assistant(feedback)?)?;
        }
    }

    session.summarizer.append(Turn::user(question)?)?;
    session.summarizer.append(Turn::assistant(answer)?)?;

    session.analyst.trim();
    session.evaluator.trim();
    session.summarizer.trim();
    session.rewriter.replace_history_from(&session.analyst)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::PromptContext;

    fn bundle() -> SessionBundle {
        let ctx = PromptContext {
            today_date: "01 Jan 2024".into(),
            dataset_name: "df".into(),
            description: "d".into(),
        };
        SessionBundle::new(&ctx, 2).unwrap()
    }

    fn outcome(result: CodeGenResult, raw_code: &str) -> Outcome {
        Outcome {
            result,
            raw_code: raw_code.into(),
            output: "42\n".into(),
            feedback: Some(r#"{"necessary_code_regenerate": false}"#.into()),
            error: None,
            attempts: 1,
        }
    }

    #[test]
    fn rewrite_requests_carry_the_reason() {
        assert!(error_rewrite_request("  1: x  <-- Error: NameError").contains("<-- Error: NameError"));
        assert!(feedback_rewrite_request("0 rows").contains("feedback: 0 rows"));
    }

    #[test]
    fn exchange_is_recorded_per_role() {
        let mut s = bundle();
        record_exchange(&mut s, "q1", &outcome(CodeGenResult::Success, "```python\nprint(42)\n```"), "It is 42.").unwrap();
        assert_eq!(s.analyst.len(), 2);
        assert_eq!(s.evaluator.len(), 2);
        assert_eq!(s.summarizer.len(), 2);
        assert_eq!(s.rewriter.len(), 2);
        let last = s.analyst.turns().last().unwrap();
        assert!(last.content().ends_with("Output of Executed Code:\n42\n"));

        // windows stay at memory size
        record_exchange(&mut s, "q2", &outcome(CodeGenResult::Success, "```python\nprint(43)\n```"), "43.").unwrap();
        assert_eq!(s.analyst.len(), 2);
        assert_eq!(s.analyst.turns().next().unwrap().content(), "q2");
    }

    #[test]
    fn codeless_outcome_only_reaches_summarizer() {
        let mut s = bundle();
        record_exchange(&mut s, "q", &outcome(CodeGenResult::FailedError, ""), "Sorry.").unwrap();
        assert!(s.analyst.is_empty());
        assert!(s.evaluator.is_empty());
        assert_eq!(s.summarizer.len(), 2);
    }
}
