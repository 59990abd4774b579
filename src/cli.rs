use clap::{ArgGroup, Parser};

#[derive(Parser, Debug, Clone)]
#[command(name = "analyst", about = "Ask questions about a table; answers come from generated, executed and checked analysis code", version)]
#[command(group(ArgGroup::new("md_switch").args(["md", "no_md"]).multiple(false)))]
#[command(group(ArgGroup::new("output").args(["json", "md"]).multiple(false)))]
pub struct Cli {
    /// The question to answer. Read from stdin when piped.
    #[arg(value_name = "QUESTION")]
    pub question: Option<String>,

    /// User id whose session the question belongs to.
    #[arg(long, short = 'u', default_value = "local")]
    pub user: String,

    /// Dataset file (.csv, .pkl) bound into the interpreter.
    #[arg(long)]
    pub dataset: Option<String>,

    /// Name the dataset is bound under.
    #[arg(long = "dataset-name")]
    pub dataset_name: Option<String>,

    /// Text file describing the dataset for the analyst.
    #[arg(long)]
    pub description: Option<String>,

    /// Large language model to use.
    #[arg(long)]
    pub model: Option<String>,

    /// Maximum number of code attempts per question.
    #[arg(long = "max-attempts")]
    pub max_attempts: Option<usize>,

    /// Print the response envelope as JSON.
    #[arg(long)]
    pub json: bool,

    /// Render the answer as Markdown.
    #[arg(long)]
    pub md: bool,
    /// Print the answer as plain text.
    #[arg(long = "no-md")]
    pub no_md: bool,

    /// Read questions line by line until EOF or `exit`.
    #[arg(long)]
    pub repl: bool,

    /// Log level when RUST_LOG is not set.
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Config overrides carried by the flags.
    pub fn overrides(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if let Some(v) = &self.dataset {
            out.push(("DATASET_PATH", v.clone()));
        }
        if let Some(v) = &self.dataset_name {
            out.push(("DATASET_NAME", v.clone()));
        }
        if let Some(v) = &self.description {
            out.push(("DATASET_DESCRIPTION_PATH", v.clone()));
        }
        if let Some(v) = &self.model {
            out.push(("DEFAULT_MODEL", v.clone()));
        }
        if let Some(v) = self.max_attempts {
            out.push(("MAX_ATTEMPTS", v.to_string()));
        }
        if let Some(v) = &self.log_level {
            out.push(("LOG_LEVEL", v.clone()));
        }
        out
    }
}
