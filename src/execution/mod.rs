//! Execution engine: protocol, result types and error formatting.

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifacts::{truncate_chars, OutputDirs};

pub mod prepare;
pub mod python;

pub use prepare::prepare_code;
pub use python::PythonExecutor;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub python_bin: String,
    pub timeout: Duration,
    pub max_traceback_length: usize,
    pub display_max_rows: usize,
    pub display_max_columns: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            python_bin: "python3".into(),
            timeout: Duration::from_secs(120),
            max_traceback_length: 5000,
            display_max_rows: 100,
            display_max_columns: 50,
        }
    }
}

/// A named value injected into the interpreter namespace before the code runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Binding {
    Json { value: serde_json::Value },
    Text { value: String },
    Csv { path: PathBuf },
    Pickle { path: PathBuf },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bindings(BTreeMap<String, Binding>);

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, binding: Binding) -> &mut Self {
        self.0.insert(name.into(), binding);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.0.get(name)
    }
}

/// Either captured stdout or a detailed error, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    Success {
        output: String,
        variables: BTreeMap<String, String>,
    },
    Error {
        detail: String,
    },
}

impl ExecutionResult {
    pub fn success(output: impl Into<String>) -> Self {
        ExecutionResult::Success { output: output.into(), variables: BTreeMap::new() }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        ExecutionResult::Error { detail: detail.into() }
    }

    /// What the executor reports when the model produced no code at all.
    pub fn no_code() -> Self {
        Self::error(
            "No code was produced. The response did not contain a fenced ```python code block. \
             Return the complete code inside one fenced block.",
        )
    }

    pub fn output(&self) -> Option<&str> {
        match self {
            ExecutionResult::Success { output, .. } => Some(output),
            ExecutionResult::Error { .. } => None,
        }
    }

    pub fn error_detail(&self) -> Option<&str> {
        match self {
            ExecutionResult::Success { .. } => None,
            ExecutionResult::Error { detail } => Some(detail),
        }
    }
}

/// Exception as reported by the interpreter, before formatting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawError {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    /// 1-based lines of the executed code that appear in the traceback.
    #[serde(default)]
    pub lines: Vec<usize>,
    #[serde(default)]
    pub traceback: String,
}

/// Numbered source with the failing lines annotated, the error headline and a
/// traceback capped at `max_traceback_length` characters.
pub fn format_error_detail(code: &str, err: &RawError, max_traceback_length: usize) -> String {
    let mut numbered: Vec<String> = code
        .split('\n')
        .enumerate()
        .map(|(i, line)| format!("{:3}: {}", i + 1, line))
        .collect();
    for &line in &err.lines {
        if let Some(slot) = line.checked_sub(1).and_then(|i| numbered.get_mut(i)) {
            slot.push_str(&format!("  <-- Error: {}: {}", err.kind, err.message));
        }
    }

    let traceback = truncate_chars(
        err.traceback.clone(),
        max_traceback_length,
        "\n... [Traceback truncated] ...",
    );

    format!(
        "{}\nError Details:\n{}: {}\n\nTraceback (up to {} characters):\n{}",
        numbered.join("\n"),
        err.kind,
        err.message,
        max_traceback_length,
        traceback
    )
}

/// The interpreter itself is unusable. Unlike a failing script this is not
/// something a rewrite can fix.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to start interpreter `{bin}`: {source}")]
    Spawn { bin: String, source: std::io::Error },
    #[error("interpreter I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("interpreter protocol error: {0}")]
    Protocol(String),
}

#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Run non-empty code against `bindings`, allowing writes only into `dirs`.
    async fn run(&self, code: &str, bindings: &Bindings, dirs: &OutputDirs) -> Result<ExecutionResult, ExecutorError>;

    async fn execute(&self, code: &str, bindings: &Bindings, dirs: &OutputDirs) -> Result<ExecutionResult, ExecutorError> {
        if code.trim().is_empty() {
            return Ok(ExecutionResult::no_code());
        }
        self.run(code, bindings, dirs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotates_failing_line() {
        let code = "x = 1\ny = x / 0\nprint(y)";
        let err = RawError {
            kind: "ZeroDivisionError".into(),
            message: "division by zero".into(),
            lines: vec![2],
            traceback: "Traceback (most recent call last):\n  File \"<analysis>\", line 2".into(),
        };
        let detail = format_error_detail(code, &err, 5000);
        assert!(detail.starts_with("  1: x = 1\n  2: y = x / 0  <-- Error: ZeroDivisionError: division by zero\n  3: print(y)"));
        assert!(detail.contains("Error Details:\nZeroDivisionError: division by zero"));
        assert!(detail.contains("Traceback (up to 5000 characters):"));
        assert!(!detail.contains("[Traceback truncated]"));
    }

    #[test]
    fn truncates_long_traceback_and_ignores_bad_lines() {
        let err = RawError {
            kind: "KeyError".into(),
            message: "'revenue'".into(),
            lines: vec![0, 99],
            traceback: "t".repeat(6000),
        };
        let detail = format_error_detail("df['revenue']", &err, 5000);
        assert!(detail.ends_with("\n... [Traceback truncated] ..."));
        assert!(!detail.contains("<-- Error"));
        let tb_len = detail.matches('t').count();
        assert!(tb_len >= 5000 && tb_len < 5100);
    }

    #[test]
    fn results_are_exclusive() {
        let ok = ExecutionResult::success("");
        assert_eq!(ok.output(), Some(""));
        assert_eq!(ok.error_detail(), None);
        let bad = ExecutionResult::no_code();
        assert_eq!(bad.output(), None);
        assert!(bad.error_detail().is_some());
    }

    #[test]
    fn bindings_serialize_tagged() {
        let mut b = Bindings::new();
        b.insert("sp_500_df", Binding::Csv { path: "/data/sp.csv".into() });
        let v = serde_json::to_value(&b).unwrap();
        assert_eq!(v["sp_500_df"]["kind"], "csv");
        assert_eq!(v["sp_500_df"]["path"], "/data/sp.csv");
    }
}
