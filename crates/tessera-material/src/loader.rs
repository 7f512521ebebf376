use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tessera_core::{Capabilities, RendererConfig};

use crate::text_index::{ScriptFile, TextIndex};

/// Extension of material script files.
pub const SCRIPT_EXTENSION: &str = "shader";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to parse config RON: {0}")]
    ConfigParseError(String),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Renderer settings plus the device capabilities they run against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub renderer: RendererConfig,
    pub capabilities: Capabilities,
}

/// Parse an engine config from a RON string. Missing fields keep their
/// defaults.
pub fn load_config_from_str(ron_str: &str) -> Result<EngineConfig, LoadError> {
    let options = ron::Options::default();
    options
        .from_str(ron_str)
        .map_err(|e| LoadError::ConfigParseError(e.to_string()))
}

pub fn load_config(path: &Path) -> Result<EngineConfig, LoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_config_from_str(&text)
}

/// Read every script file in `dir` (not recursive), sorted by file name.
pub fn read_scripts(dir: &Path) -> Result<Vec<ScriptFile>, LoadError> {
    let io = |source: std::io::Error| LoadError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io)? {
        let path = entry.map_err(io)?.path();
        let is_script = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(SCRIPT_EXTENSION));
        if is_script && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let text = std::fs::read_to_string(&path).map_err(|source| LoadError::Io {
            path: path.clone(),
            source,
        })?;
        let name = path
            .file_name()
            .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
        files.push(ScriptFile::new(name, text));
    }
    Ok(files)
}

/// Load and index the scripts in `dir`. An empty directory only warns.
pub fn load_text_index(dir: &Path) -> Result<TextIndex, LoadError> {
    let files = read_scripts(dir)?;
    if files.is_empty() {
        log::warn!("no material files found in {}", dir.display());
    } else {
        log::info!("loaded {} material files from {}", files.len(), dir.display());
    }
    Ok(TextIndex::build(files))
}
