//! Per-request output directories and the files generated code writes there.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{error, info, warn};

pub const GRAPHICS_DIR: &str = "graphics_output";
pub const TABLES_DIR: &str = "tables_output";
pub const JSON_DIR: &str = "json_output";

const FIGURE_DETAILS_CAP: usize = 100_000;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to create output directory {path}: {source}")]
    Provision { path: PathBuf, source: io::Error },
    #[error("failed to clear output directory {path}: {source}")]
    Clear { path: PathBuf, source: io::Error },
    #[error("failed to read artifacts from {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
}

/// The three directories one request may write into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDirs {
    pub root: PathBuf,
    pub graphics: PathBuf,
    pub tables: PathBuf,
    pub json: PathBuf,
}

impl OutputDirs {
    pub fn under(base: &Path, request_id: &str) -> Self {
        let root = base.join(request_id);
        Self {
            graphics: root.join(GRAPHICS_DIR),
            tables: root.join(TABLES_DIR),
            json: root.join(JSON_DIR),
            root,
        }
    }

    pub fn all(&self) -> [&Path; 3] {
        [&self.graphics, &self.tables, &self.json]
    }
}

/// Directory-safe request identifier: the first 50 characters of the query
/// with non-alphanumerics replaced, a timestamp and a short random suffix.
pub fn request_id(query: &str, now: DateTime<Local>) -> String {
    let clean: String = query
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .take(50)
        .collect();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", clean, now.format("%Y%m%d_%H%M%S"), &suffix[..8])
}

pub trait ArtifactStore: Send + Sync {
    /// Create (if needed) and return the directories for `request_id`.
    fn provision(&self, request_id: &str) -> Result<OutputDirs, ArtifactError>;

    /// Remove everything written into the directories so far.
    fn clear(&self, dirs: &OutputDirs) -> Result<(), ArtifactError>;

    /// Filename -> content for every file in `dir` ending with `extension`.
    fn read_all(&self, dir: &Path, extension: &str) -> Result<BTreeMap<String, String>, ArtifactError>;
}

#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    base: PathBuf,
}

impl FsArtifactStore {
    /// Generated code runs inside the request directory, so the base is made
    /// absolute before any request path is derived from it.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self { base: std::path::absolute(&base).unwrap_or(base) }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}

impl ArtifactStore for FsArtifactStore {
    fn provision(&self, request_id: &str) -> Result<OutputDirs, ArtifactError> {
        let dirs = OutputDirs::under(&self.base, request_id);
        for dir in dirs.all() {
            fs::create_dir_all(dir).map_err(|source| ArtifactError::Provision {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        Ok(dirs)
    }

    fn clear(&self, dirs: &OutputDirs) -> Result<(), ArtifactError> {
        for dir in dirs.all() {
            if !dir.exists() {
                warn!("output directory does not exist, nothing to clear: {}", dir.display());
                continue;
            }
            let clear_err = |source| ArtifactError::Clear { path: dir.to_path_buf(), source };
            for entry in fs::read_dir(dir).map_err(clear_err)? {
                let path = entry.map_err(clear_err)?.path();
                let meta = fs::symlink_metadata(&path).map_err(clear_err)?;
                if meta.is_dir() {
                    fs::remove_dir_all(&path).map_err(clear_err)?;
                    info!("deleted directory {}", path.display());
                } else {
                    fs::remove_file(&path).map_err(clear_err)?;
                    info!("deleted file {}", path.display());
                }
            }
        }
        Ok(())
    }

    fn read_all(&self, dir: &Path, extension: &str) -> Result<BTreeMap<String, String>, ArtifactError> {
        read_files_with_extension(dir, extension)
    }
}

fn read_files_with_extension(dir: &Path, extension: &str) -> Result<BTreeMap<String, String>, ArtifactError> {
    let read_err = |source| ArtifactError::Read { path: dir.to_path_buf(), source };
    let mut files = BTreeMap::new();
    for entry in fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        if !path.is_file() || !name.ends_with(extension) {
            continue;
        }
        let content = fs::read_to_string(&path).map_err(|source| ArtifactError::Read {
            path: path.clone(),
            source,
        })?;
        files.insert(name.to_string(), content);
    }
    Ok(files)
}

/// Describe every figure dump in `json_dir`: `data` plus `layout` without its
/// `template`, numbered in filename order. Returns an empty string when there
/// is nothing to describe.
pub fn figure_details(json_dir: &Path) -> String {
    let mut names: Vec<PathBuf> = match fs::read_dir(json_dir) {
        Ok(rd) => rd
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect(),
        Err(_) => return String::new(),
    };
    names.sort();

    let mut figures = Vec::new();
    for path in names {
        let fig: Value = match fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str(&s).map_err(|e| e.to_string()))
        {
            Ok(v) => v,
            Err(e) => {
                error!("error reading figure dump {}: {}", path.display(), e);
                continue;
            }
        };
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();

        let mut filtered = Map::new();
        filtered.insert("data".into(), fig.get("data").cloned().unwrap_or_else(|| Value::Array(vec![])));
        if let Some(layout) = fig.get("layout").and_then(Value::as_object) {
            let layout: Map<String, Value> = layout
                .iter()
                .filter(|(k, _)| k.as_str() != "template")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if !layout.is_empty() {
                filtered.insert("layout".into(), Value::Object(layout));
            }
        }
        let body = serde_json::to_string_pretty(&Value::Object(filtered)).unwrap_or_default();
        figures.push(format!("Figure {}: {}\n{}\n\n", figures.len() + 1, stem, body));
    }

    truncate_chars(
        figures.join("\n"),
        FIGURE_DETAILS_CAP,
        "\n\n[Output truncated to 100,000 characters]",
    )
}

/// Cut `text` to at most `max` characters and append `marker` when cut.
pub fn truncate_chars(text: String, max: usize, marker: &str) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => {
            let mut cut = text[..idx].to_string();
            cut.push_str(marker);
            cut
        }
        None => text,
    }
}
