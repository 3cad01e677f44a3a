/// Agent-Spec style import/export
///
/// Assistant files are JSON or YAML, chosen by file extension.

use crate::assistant::types::Assistant;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Serialisation format of an assistant file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
}

impl Format {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Some(Format::Json),
            Some("yaml") | Some("yml") => Some(Format::Yaml),
            _ => None,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "json" => Some(Format::Json),
            "yaml" | "yml" => Some(Format::Yaml),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Format::Json => "application/json",
            Format::Yaml => "application/yaml",
        }
    }
}

pub fn from_str(text: &str, format: Format) -> Result<Assistant> {
    Ok(match format {
        Format::Json => serde_json::from_str(text)?,
        Format::Yaml => serde_yaml::from_str(text)?,
    })
}

pub fn to_string(assistant: &Assistant, format: Format) -> Result<String> {
    Ok(match format {
        Format::Json => serde_json::to_string_pretty(assistant)?,
        Format::Yaml => serde_yaml::to_string(assistant)?,
    })
}

/// Load one assistant file
pub fn load_file(path: &Path) -> Result<Assistant> {
    let format = Format::from_path(path)
        .ok_or_else(|| anyhow::anyhow!("Unsupported assistant file extension: {}", path.display()))?;
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    from_str(&text, format).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Assistant files (`.json`, `.yaml`, `.yml`) of a directory, sorted by name
pub fn assistant_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && Format::from_path(&path).is_some() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Load every assistant file of a directory
pub fn load_dir(dir: &Path) -> Result<Vec<Assistant>> {
    assistant_files(dir)?
        .iter()
        .map(|path| load_file(path))
        .collect()
}
