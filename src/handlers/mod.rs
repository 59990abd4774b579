//! CLI flows over `AnalysisService`.

pub mod ask;
pub mod repl;

/// How an answer is written to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Json,
    Markdown,
    Text,
}
