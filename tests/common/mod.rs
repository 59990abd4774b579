#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use data_analyst::artifacts::{FsArtifactStore, OutputDirs};
use data_analyst::dataset::{DatasetError, DatasetProvider};
use data_analyst::execution::{Binding, Bindings, CodeExecutor, ExecutionResult, ExecutorError};
use data_analyst::llm::{ChatMessage, ModelClient, ModelError};
use data_analyst::pipeline::{Locale, PipelineConfig};
use data_analyst::role::PromptContext;
use data_analyst::service::AnalysisService;
use data_analyst::session::InMemorySessionStore;

pub const ANALYST: &str = "analyst";
pub const EVALUATOR: &str = "evaluator";
pub const REWRITER: &str = "rewriter";
pub const SUMMARIZER: &str = "summarizer";

/// Role of a request, read from its system instruction.
fn role_of(messages: &[ChatMessage]) -> &'static str {
    let system = messages.first().map(|m| m.content.as_str()).unwrap_or("");
    if system.starts_with("You are a financial data analyst") {
        ANALYST
    } else if system.starts_with("You review") {
        EVALUATOR
    } else if system.starts_with("You correct") {
        REWRITER
    } else if system.starts_with("You explain") {
        SUMMARIZER
    } else {
        panic!("unknown system instruction: {}", system)
    }
}

pub fn fenced(code: &str) -> String {
    format!("Here is the analysis:\n```python\n{}\n```", code)
}

/// Replies queued per role; every request is recorded.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<HashMap<&'static str, VecDeque<Result<String, ModelError>>>>,
    calls: Mutex<Vec<(&'static str, Vec<ChatMessage>)>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, role: &'static str, text: impl Into<String>) -> &Self {
        self.push(role, Ok(text.into()))
    }

    pub fn fail(&self, role: &'static str, err: ModelError) -> &Self {
        self.push(role, Err(err))
    }

    fn push(&self, role: &'static str, r: Result<String, ModelError>) -> &Self {
        self.replies.lock().unwrap().entry(role).or_default().push_back(r);
        self
    }

    pub fn calls_for(&self, role: &str) -> Vec<Vec<ChatMessage>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == role)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        let role = role_of(messages);
        self.calls.lock().unwrap().push((role, messages.to_vec()));
        // let other requests on the same task make progress
        tokio::task::yield_now().await;
        self.replies
            .lock()
            .unwrap()
            .get_mut(role)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| panic!("no scripted reply left for {}", role))
    }
}

/// Returns queued results in order. Each run writes `attempt_<n>.html` into
/// the graphics directory before answering.
#[derive(Default)]
pub struct ScriptedExecutor {
    results: Mutex<VecDeque<ExecutionResult>>,
    pub codes: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new(results: impl IntoIterator<Item = ExecutionResult>) -> Self {
        Self { results: Mutex::new(results.into_iter().collect()), codes: Mutex::new(Vec::new()) }
    }

    pub fn runs(&self) -> usize {
        self.codes.lock().unwrap().len()
    }
}

#[async_trait]
impl CodeExecutor for ScriptedExecutor {
    async fn run(&self, code: &str, _bindings: &Bindings, dirs: &OutputDirs) -> Result<ExecutionResult, ExecutorError> {
        let n = {
            let mut codes = self.codes.lock().unwrap();
            codes.push(code.to_string());
            codes.len()
        };
        std::fs::write(dirs.graphics.join(format!("attempt_{}.html", n)), format!("<div>{}</div>", n))?;
        let next = self.results.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| panic!("no scripted execution result for run {}", n)))
    }
}

pub struct StaticDataset;

impl DatasetProvider for StaticDataset {
    fn bindings(&self) -> Result<Bindings, DatasetError> {
        let mut b = Bindings::new();
        b.insert("sp_500_df", Binding::Json { value: serde_json::json!({"revenue": [1000000]}) });
        Ok(b)
    }

    fn description(&self) -> &str {
        "Yearly revenue of listed companies."
    }
}

pub fn prompt_context() -> PromptContext {
    PromptContext {
        today_date: "01 Mar 2024".into(),
        dataset_name: "sp_500_df".into(),
        description: StaticDataset.description().into(),
    }
}

pub fn service(
    model: Arc<ScriptedModel>,
    executor: Arc<ScriptedExecutor>,
    base: &Path,
    max_attempts: usize,
) -> AnalysisService {
    AnalysisService::new(
        Arc::new(InMemorySessionStore::new(prompt_context(), 2)),
        model,
        executor,
        Arc::new(FsArtifactStore::new(base)),
        Arc::new(StaticDataset),
    )
    .with_pipeline_config(PipelineConfig { max_attempts, ..PipelineConfig::default() })
    .with_locale(Locale::German)
}

pub fn last_user_message(messages: &[ChatMessage]) -> &str {
    messages.last().map(|m| m.content.as_str()).unwrap_or("")
}
