//! Workspace configuration (`registrar.toml`).
//!
//! Every key is optional; a workspace without the file runs on defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "registrar.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchoolConfig {
    pub school_year: String,
    pub default_adviser: String,
}

impl Default for SchoolConfig {
    fn default() -> Self {
        Self {
            school_year: "2025-2026".to_string(),
            default_adviser: String::new(),
        }
    }
}

/// Cell addresses on the SF9 front sheet. The template treats these
/// coordinates as its schema.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Sf9Cells {
    pub name: String,
    pub age: String,
    pub sex: String,
    pub lrn: String,
    pub grade: String,
    pub section: String,
}

impl Default for Sf9Cells {
    fn default() -> Self {
        Self {
            name: "Q12".to_string(),
            age: "Q13".to_string(),
            sex: "U13".to_string(),
            lrn: "X13".to_string(),
            grade: "R14".to_string(),
            section: "V14".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Sf9Config {
    pub template: PathBuf,
    pub front_sheet: String,
    pub inside_sheet: String,
    pub cells: Sf9Cells,
}

impl Default for Sf9Config {
    fn default() -> Self {
        Self {
            template: PathBuf::from("templates/sf9.xlsx"),
            front_sheet: "K-12 Front".to_string(),
            inside_sheet: "Grade 5 Inside".to_string(),
            cells: Sf9Cells::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdCardConfig {
    pub assets_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub avatar_fallback_url: String,
}

impl Default for IdCardConfig {
    fn default() -> Self {
        Self {
            assets_dir: PathBuf::from("assets/id"),
            uploads_dir: PathBuf::from("uploads"),
            avatar_fallback_url:
                "https://ui-avatars.com/api/?background=EBF4FF&color=7F9CF5&size=512&name="
                    .to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GradingConfig {
    pub workbook: PathBuf,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            workbook: PathBuf::from("templates/grading.xlsx"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub school: SchoolConfig,
    pub sf9: Sf9Config,
    pub id_card: IdCardConfig,
    pub grading: GradingConfig,
}

impl PortalConfig {
    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Loads `registrar.toml` from the workspace root, falling back to defaults
    /// when the file does not exist.
    pub fn load(workspace: &Path) -> Result<Self, ConfigError> {
        let path = workspace.join(CONFIG_FILE_NAME);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_toml(&raw).map_err(|source| ConfigError::Parse { path, source })
    }
}

/// Resolves a configured path against the workspace root unless it is already absolute.
pub fn resolve(workspace: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        workspace.join(p)
    }
}
