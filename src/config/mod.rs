//! Key/value configuration: defaults, `.analystrc`, then environment.

use std::{
    collections::HashMap,
    env,
    fs,
    io::{BufRead, BufReader},
    path::PathBuf,
    time::Duration,
};

use directories::BaseDirs;

use crate::execution::ExecutorConfig;
use crate::pipeline::{Locale, PipelineConfig};
use crate::role::PromptContext;

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        let mut map = default_map();
        let config_path = default_config_path();

        if config_path.exists() {
            if let Ok(file) = fs::File::open(&config_path) {
                let reader = BufReader::new(file);
                for line in reader.lines().map_while(Result::ok) {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    if let Some((k, v)) = line.split_once('=') {
                        map.insert(k.trim().to_string(), v.trim().to_string());
                    }
                }
            }
        }

        // Environment takes precedence over the rc file.
        for (k, v) in env::vars() {
            if is_config_key(&k) {
                map.insert(k, v);
            }
        }

        Self { inner: map, config_path }
    }

    /// Build a config from explicit pairs on top of the defaults. Never reads
    /// the rc file or the environment.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut inner = default_map();
        for (k, v) in pairs {
            inner.insert(k.into(), v.into());
        }
        Self { inner, config_path: default_config_path() }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).cloned()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.inner.insert(key.to_string(), value.into());
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse::<usize>().ok())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse::<u64>().ok())
    }

    pub fn get_f32(&self, key: &str) -> Option<f32> {
        self.get(key).and_then(|v| v.parse::<f32>().ok())
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).filter(|v| !v.is_empty()).map(PathBuf::from)
    }

    pub fn output_base_dir(&self) -> PathBuf {
        self.get_path("OUTPUT_BASE_DIR")
            .unwrap_or_else(|| env::temp_dir().join("data_analyst").join("user_outputs"))
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        let defaults = PipelineConfig::default();
        PipelineConfig {
            max_attempts: self.get_usize("MAX_ATTEMPTS").unwrap_or(defaults.max_attempts).max(1),
            max_output_chars: self
                .get_usize("MAX_OUTPUT_CHARS")
                .unwrap_or(defaults.max_output_chars),
            strict_verdict: self.get_bool("STRICT_VERDICT"),
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        let defaults = ExecutorConfig::default();
        ExecutorConfig {
            python_bin: self.get("PYTHON_BIN").unwrap_or(defaults.python_bin),
            timeout: self
                .get_u64("EXECUTION_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_traceback_length: self
                .get_usize("MAX_TRACEBACK_LENGTH")
                .unwrap_or(defaults.max_traceback_length),
            display_max_rows: self
                .get_usize("DISPLAY_MAX_ROWS")
                .unwrap_or(defaults.display_max_rows),
            display_max_columns: self
                .get_usize("DISPLAY_MAX_COLUMNS")
                .unwrap_or(defaults.display_max_columns),
        }
    }

    /// Prompt variables shared by every role. `description` is the dataset
    /// description text supplied by the dataset provider.
    pub fn prompt_context(&self, description: impl Into<String>) -> PromptContext {
        PromptContext {
            today_date: chrono::Local::now().format("%d %b %Y").to_string(),
            dataset_name: self.get("DATASET_NAME").unwrap_or_else(|| "sp_500_df".into()),
            description: description.into(),
        }
    }

    pub fn memory_size(&self) -> usize {
        self.get_usize("MEMORY_SIZE").unwrap_or(2)
    }

    /// Language of the fixed fallback answers.
    pub fn locale(&self) -> Locale {
        self.get("LANGUAGE").map(|l| Locale::parse(&l)).unwrap_or_default()
    }
}

fn is_config_key(k: &str) -> bool {
    const KEYS: &[&str] = &[
        "OPENAI_API_KEY",
        "API_BASE_URL",
        "DEFAULT_MODEL",
        "REQUEST_TIMEOUT",
        "TEMPERATURE",
        "MAX_TOKENS",
        "MAX_ATTEMPTS",
        "MEMORY_SIZE",
        "OUTPUT_BASE_DIR",
        "PYTHON_BIN",
        "EXECUTION_TIMEOUT",
        "MAX_TRACEBACK_LENGTH",
        "MAX_OUTPUT_CHARS",
        "DISPLAY_MAX_ROWS",
        "DISPLAY_MAX_COLUMNS",
        "DATASET_PATH",
        "DATASET_NAME",
        "DATASET_DESCRIPTION_PATH",
        "STRICT_VERDICT",
        "LOG_LEVEL",
        "LANGUAGE",
        "PRETTIFY_MARKDOWN",
    ];

    KEYS.contains(&k) || k.starts_with("ANALYST_")
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("data_analyst").join(".analystrc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();
    let temp = env::temp_dir().join("data_analyst");

    m.insert(
        "OUTPUT_BASE_DIR".into(),
        temp.join("user_outputs").to_string_lossy().into_owned(),
    );

    // Numbers
    m.insert("REQUEST_TIMEOUT".into(), "60".into());
    m.insert("TEMPERATURE".into(), "0".into());
    m.insert("MAX_TOKENS".into(), "4096".into());
    m.insert("MAX_ATTEMPTS".into(), "3".into());
    m.insert("MEMORY_SIZE".into(), "2".into());
    m.insert("EXECUTION_TIMEOUT".into(), "120".into());
    m.insert("MAX_TRACEBACK_LENGTH".into(), "5000".into());
    m.insert("MAX_OUTPUT_CHARS".into(), "100000".into());
    m.insert("DISPLAY_MAX_ROWS".into(), "100".into());
    m.insert("DISPLAY_MAX_COLUMNS".into(), "50".into());

    // Strings
    m.insert("DEFAULT_MODEL".into(), "gpt-4o".into());
    m.insert("API_BASE_URL".into(), "default".into());
    m.insert("PYTHON_BIN".into(), "python3".into());
    m.insert("DATASET_NAME".into(), "sp_500_df".into());
    m.insert("LOG_LEVEL".into(), "info".into());
    m.insert("LANGUAGE".into(), "de".into());

    // Bools as strings
    m.insert("STRICT_VERDICT".into(), "true".into());
    m.insert("PRETTIFY_MARKDOWN".into(), "true".into());

    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_feed_typed_configs() {
        let cfg = Config::from_pairs(Vec::<(String, String)>::new());
        let pipeline = cfg.pipeline_config();
        assert_eq!(pipeline.max_attempts, 3);
        assert_eq!(pipeline.max_output_chars, 100_000);
        assert!(pipeline.strict_verdict);

        let exec = cfg.executor_config();
        assert_eq!(exec.max_traceback_length, 5000);
        assert_eq!(exec.display_max_rows, 100);
        assert_eq!(exec.display_max_columns, 50);
        assert_eq!(cfg.memory_size(), 2);
        assert_eq!(cfg.locale(), Locale::German);
        assert_eq!(Config::from_pairs([("LANGUAGE", "en")]).locale(), Locale::English);
    }

    #[test]
    fn explicit_pairs_override_defaults() {
        let cfg = Config::from_pairs([("MAX_ATTEMPTS", "0"), ("STRICT_VERDICT", "false")]);
        // zero attempts is clamped so the loop always runs once
        assert_eq!(cfg.pipeline_config().max_attempts, 1);
        assert!(!cfg.pipeline_config().strict_verdict);
    }

    #[test]
    fn config_keys_are_filtered() {
        assert!(is_config_key("OPENAI_API_KEY"));
        assert!(is_config_key("ANALYST_ANYTHING"));
        assert!(!is_config_key("HOME"));
    }
}
