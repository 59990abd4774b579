//! Line-by-line question loop for one user.

use anyhow::Result;
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::error;

use super::{ask::emit, OutputMode};
use crate::service::AnalysisService;

pub struct ReplHandler;

impl ReplHandler {
    /// Runs until EOF or `exit`/`quit`. A failed request is reported and the
    /// loop continues; the session keeps its history across questions.
    pub async fn run(service: &AnalysisService, user_id: &str, init_question: Option<&str>, mode: OutputMode) -> Result<()> {
        let interactive = std::io::stdin().is_terminal();
        if interactive {
            eprintln!("{}", format!("Session for user '{}'. Type exit to quit.", user_id).cyan());
        }
        if let Some(q) = init_question.filter(|q| !q.trim().is_empty()) {
            Self::one(service, user_id, q, mode).await;
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            if interactive {
                let mut out = tokio::io::stderr();
                out.write_all(b">>> ").await?;
                out.flush().await?;
            }
            let Some(line) = lines.next_line().await? else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if matches!(line, "exit" | "quit") {
                break;
            }
            Self::one(service, user_id, line, mode).await;
        }
        Ok(())
    }

    async fn one(service: &AnalysisService, user_id: &str, question: &str, mode: OutputMode) {
        match service.answer(user_id, question).await {
            Ok(env) => {
                if let Err(e) = emit(&env, mode) {
                    error!("failed to print answer: {}", e);
                }
            }
            Err(e) => eprintln!("{} {}", "error:".red(), e),
        }
    }
}
