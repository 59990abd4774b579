//! Agent roles and their system instructions.
//!
//! Each role renders its template with strict undefined handling: a template
//! that references a variable the context does not provide is an error, not
//! a silently blank prompt.

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use thiserror::Error;

use crate::conversation::Conversation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    Analyst,
    Evaluator,
    Rewriter,
    Summarizer,
}

impl AgentRole {
    pub const ALL: [AgentRole; 4] = [
        AgentRole::Analyst,
        AgentRole::Evaluator,
        AgentRole::Rewriter,
        AgentRole::Summarizer,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AgentRole::Analyst => "analyst",
            AgentRole::Evaluator => "evaluator",
            AgentRole::Rewriter => "rewriter",
            AgentRole::Summarizer => "summarizer",
        }
    }

    pub fn default_template(&self) -> &'static str {
        match self {
            AgentRole::Analyst => ANALYST_TEMPLATE,
            AgentRole::Evaluator => EVALUATOR_TEMPLATE,
            AgentRole::Rewriter => REWRITER_TEMPLATE,
            AgentRole::Summarizer => SUMMARIZER_TEMPLATE,
        }
    }

    /// Fresh conversational context for this role with the rendered system
    /// instruction.
    pub fn conversation(&self, ctx: &PromptContext, memory_size: usize) -> Result<Conversation, TemplateError> {
        let system = render(self.default_template(), ctx)?;
        let roles = match self {
            AgentRole::Analyst | AgentRole::Rewriter => Conversation::CODE_ROLES,
            AgentRole::Evaluator | AgentRole::Summarizer => Conversation::CHAT_ROLES,
        };
        Ok(Conversation::with_roles(system, roles, memory_size))
    }
}

/// Variables available to every role template.
#[derive(Debug, Clone, Serialize)]
pub struct PromptContext {
    pub today_date: String,
    pub dataset_name: String,
    pub description: String,
}

#[derive(Debug, Error)]
#[error("failed to render prompt template: {0}")]
pub struct TemplateError(#[from] minijinja::Error);

pub fn render<S: Serialize>(template: &str, ctx: &S) -> Result<String, TemplateError> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    Ok(env.render_str(template, ctx)?)
}

const ANALYST_TEMPLATE: &str = "You are a financial data analyst writing Python.
Today is {{ today_date }}.
A pandas DataFrame named `{{ dataset_name }}` is already loaded, together with `pd`, `np`, `plt` and, when installed, `px` and `go`.
Dataset description:
{{ description }}

Answer the user's question by writing one complete Python code block fenced with ```python.
Print every number the answer depends on.
Save charts with `fig.write_html('graphics_output/<name>.html')` and tables with `df.to_html('tables_output/<name>.html')`.
Do not read or write files anywhere else.";

const EVALUATOR_TEMPLATE: &str = "You review the output of analysis code written for a user question. Today is {{ today_date }}.
Judge only technical validity: empty results, wrong shapes, NaN-only columns, nonsensical magnitudes, missing figures.
Reply with a JSON object: {\"necessary_code_regenerate\": true|false, \"explanation\": \"...\"}.
Only when regeneration is necessary, explain it using concrete observed values such as dimensions, dtypes or specific numbers. Never give a generic complaint.";

const REWRITER_TEMPLATE: &str = "You correct Python analysis code over the pandas DataFrame `{{ dataset_name }}`. Today is {{ today_date }}.
You receive the previous code, what it printed, and either an execution error or reviewer feedback.
Return only the complete corrected code in one ```python block, with no explanation.";

const SUMMARIZER_TEMPLATE: &str = "You explain analysis results to a business user. Today is {{ today_date }}.
You receive the question, the code that was run and its output.
Answer in plain language using the numbers from the output. Never show code.";
