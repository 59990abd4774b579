mod cli;

use std::io::{self, Read};

use anyhow::{bail, Result};
use data_analyst::config::Config;
use data_analyst::handlers::{ask::AskHandler, repl::ReplHandler, OutputMode};
use data_analyst::logging;
use data_analyst::service::AnalysisService;
use is_terminal::IsTerminal;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    let mut cfg = Config::load();
    for (key, value) in args.overrides() {
        cfg.set(key, value);
    }
    logging::init(&cfg.get("LOG_LEVEL").unwrap_or_else(|| "info".into()));

    // stdin handling (pipe support with __analyst__eof__ delimiter); the REPL
    // reads stdin itself.
    let mut question_from_stdin = String::new();
    let stdin_is_tty = io::stdin().is_terminal();
    if !stdin_is_tty && !args.repl {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        question_from_stdin = match buf.split_once("__analyst__eof__") {
            Some((before, _after)) => before.to_string(),
            None => buf,
        };
    }

    let arg_question = args.question.clone().unwrap_or_default();
    let question = if !question_from_stdin.trim().is_empty() && !arg_question.is_empty() {
        format!("{}\n\n{}", question_from_stdin.trim(), arg_question)
    } else if !question_from_stdin.trim().is_empty() {
        question_from_stdin.trim().to_string()
    } else {
        arg_question
    };

    let markdown = if args.no_md {
        false
    } else if args.md {
        true
    } else {
        cfg.get_bool("PRETTIFY_MARKDOWN") && io::stdout().is_terminal()
    };
    let mode = if args.json {
        OutputMode::Json
    } else if markdown {
        OutputMode::Markdown
    } else {
        OutputMode::Text
    };

    let service = AnalysisService::from_config(&cfg)?;

    if args.repl {
        let init = if question.is_empty() { None } else { Some(question.as_str()) };
        return ReplHandler::run(&service, &args.user, init, mode).await;
    }
    if question.trim().is_empty() {
        bail!("Provide a question as an argument or via stdin, or start --repl");
    }
    AskHandler::run(&service, &args.user, &question, mode).await?;
    Ok(())
}
