//! Dataset binding provider.

use std::{
    fs, io,
    path::{self, PathBuf},
};

use thiserror::Error;

use crate::config::Config;
use crate::execution::{Binding, Bindings};

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("no dataset configured; set DATASET_PATH or pass --dataset")]
    NotConfigured,
    #[error("dataset file not found: {0}")]
    Missing(PathBuf),
    #[error("unsupported dataset format: {0} (expected .csv, .pkl or .pickle)")]
    Unsupported(PathBuf),
    #[error("failed to read dataset description {path}: {source}")]
    Description { path: PathBuf, source: io::Error },
}

/// Supplies what is bound into the interpreter before every run.
pub trait DatasetProvider: Send + Sync {
    fn bindings(&self) -> Result<Bindings, DatasetError>;

    /// Free text shown to the analyst describing the data.
    fn description(&self) -> &str;
}

/// A single table file bound under one name.
#[derive(Debug, Clone)]
pub struct FileDataset {
    name: String,
    path: PathBuf,
    description: String,
}

impl FileDataset {
    /// A relative `path` is resolved against the current directory here; the
    /// interpreter runs in the request directory and would resolve it there.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, description: impl Into<String>) -> Self {
        let path = path.into();
        let path = path::absolute(&path).unwrap_or(path);
        Self { name: name.into(), path, description: description.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn from_config(cfg: &Config) -> Result<Self, DatasetError> {
        let path = cfg.get_path("DATASET_PATH").ok_or(DatasetError::NotConfigured)?;
        let name = cfg.get("DATASET_NAME").unwrap_or_else(|| "sp_500_df".into());
        let description = match cfg.get_path("DATASET_DESCRIPTION_PATH") {
            Some(p) => fs::read_to_string(&p).map_err(|source| DatasetError::Description { path: p, source })?,
            None => format!("Table loaded from {}.", path.display()),
        };
        Ok(Self::new(name, path, description))
    }
}

impl DatasetProvider for FileDataset {
    fn bindings(&self) -> Result<Bindings, DatasetError> {
        if !self.path.is_file() {
            return Err(DatasetError::Missing(self.path.clone()));
        }
        let ext = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        let binding = match ext.as_str() {
            "csv" => Binding::Csv { path: self.path.clone() },
            "pkl" | "pickle" => Binding::Pickle { path: self.path.clone() },
            _ => return Err(DatasetError::Unsupported(self.path.clone())),
        };
        let mut bindings = Bindings::new();
        bindings.insert(self.name.clone(), binding);
        Ok(bindings)
    }

    fn description(&self) -> &str {
        &self.description
    }
}
