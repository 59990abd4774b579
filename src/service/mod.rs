//! Request entry point: one question in, one answer envelope out.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use anyhow::Context;
use chrono::Local;
use serde::Serialize;
use tracing::info;

use crate::artifacts::{request_id, ArtifactStore, FsArtifactStore};
use crate::config::Config;
use crate::dataset::{DatasetProvider, FileDataset};
use crate::execution::{CodeExecutor, PythonExecutor};
use crate::llm::{LlmClient, ModelClient};
use crate::pipeline::{record_exchange, summarize, CodeGenResult, Locale, Orchestrator, PipelineConfig, PipelineError};
use crate::session::{InMemorySessionStore, SessionStore};

/// What the caller gets back. Only the first four fields are serialized.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerEnvelope {
    pub status: String,
    pub message: String,
    pub html_files: BTreeMap<String, String>,
    pub table_files: BTreeMap<String, String>,
    #[serde(skip)]
    pub result: Option<CodeGenResult>,
    #[serde(skip)]
    pub attempts: usize,
    #[serde(skip)]
    pub output_dir: PathBuf,
}

pub struct AnalysisService {
    sessions: Arc<dyn SessionStore>,
    model: Arc<dyn ModelClient>,
    executor: Arc<dyn CodeExecutor>,
    artifacts: Arc<dyn ArtifactStore>,
    dataset: Arc<dyn DatasetProvider>,
    pipeline: PipelineConfig,
    locale: Locale,
}

impl AnalysisService {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        model: Arc<dyn ModelClient>,
        executor: Arc<dyn CodeExecutor>,
        artifacts: Arc<dyn ArtifactStore>,
        dataset: Arc<dyn DatasetProvider>,
    ) -> Self {
        Self {
            sessions,
            model,
            executor,
            artifacts,
            dataset,
            pipeline: PipelineConfig::default(),
            locale: Locale::default(),
        }
    }

    pub fn with_pipeline_config(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    /// Wire the production collaborators from configuration.
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let dataset = FileDataset::from_config(cfg).context("dataset setup failed")?;
        let prompt = cfg.prompt_context(dataset.description());
        let sessions = InMemorySessionStore::new(prompt, cfg.memory_size());
        let model = LlmClient::from_config(cfg)?;
        let executor = PythonExecutor::new(cfg.executor_config());
        let artifacts = FsArtifactStore::new(cfg.output_base_dir());
        info!("writing request outputs under {}", artifacts.base().display());

        Ok(Self::new(
            Arc::new(sessions),
            Arc::new(model),
            Arc::new(executor),
            Arc::new(artifacts),
            Arc::new(dataset),
        )
        .with_pipeline_config(cfg.pipeline_config())
        .with_locale(cfg.locale()))
    }

    /// Answer `query` for `user_id`. Requests of the same user run one after
    /// another; the session lock is held until the history is recorded.
    pub async fn answer(&self, user_id: &str, query: &str) -> Result<AnswerEnvelope, PipelineError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PipelineError::EmptyQuestion);
        }
        info!("user {} asked: {}", user_id, query);

        let dirs = self.artifacts.provision(&request_id(query, Local::now()))?;
        let bindings = self.dataset.bindings()?;
        let handle = self.sessions.get_or_create(user_id).await?;
        let mut session = handle.lock().await;

        let orchestrator = Orchestrator::new(
            self.model.as_ref(),
            self.executor.as_ref(),
            self.artifacts.as_ref(),
            &self.pipeline,
        );
        let outcome = orchestrator.run(&mut session, query, &dirs, &bindings).await?;
        info!("loop finished with {:?} after {} attempt(s)", outcome.result, outcome.attempts);

        let message = summarize(self.model.as_ref(), &session.summarizer, query, &outcome, self.locale).await;
        record_exchange(&mut session, query, &outcome, &message)?;
        drop(session);

        let html_files = self.artifacts.read_all(&dirs.graphics, ".html")?;
        let table_files = self.artifacts.read_all(&dirs.tables, ".html")?;

        Ok(AnswerEnvelope {
            status: "success".into(),
            message,
            html_files,
            table_files,
            result: Some(outcome.result),
            attempts: outcome.attempts,
            output_dir: dirs.root,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_public_fields_only() {
        let env = AnswerEnvelope {
            status: "success".into(),
            message: "Total revenue was 1,000,000.".into(),
            html_files: BTreeMap::from([("chart.html".to_string(), "<html/>".to_string())]),
            table_files: BTreeMap::new(),
            result: Some(CodeGenResult::Success),
            attempts: 1,
            output_dir: PathBuf::from("/tmp/x"),
        };
        let v = serde_json::to_value(&env).unwrap();
        let obj = v.as_object().unwrap();
        assert_eq!(obj.len(), 4);
        assert_eq!(v["status"], "success");
        assert_eq!(v["html_files"]["chart.html"], "<html/>");
    }
}
