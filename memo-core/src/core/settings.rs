//! Where exports and backups go by default.
//!
//! The host application decides where the settings file lives and passes its
//! path in; this module only knows the JSON shape and the default names.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::export::dated_file_name;
use crate::Result;

/// Persisted user settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Directory that exports and backups are offered into by default.
    pub backups_directory: PathBuf,
}

impl Default for Settings {
    /// `Memo Backups` inside the user's documents folder.
    fn default() -> Self {
        let documents = dirs::document_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join("Documents")))
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            backups_directory: documents.join("Memo Backups"),
        }
    }
}

impl Settings {
    /// Reads settings from `path`; a missing or unreadable file yields the
    /// defaults.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                log::warn!("Ignoring unreadable settings file {}: {e}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Writes settings to `path`, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// `<backups>/<db stem>-<timestamp>.zip`
    pub fn default_export_path(&self, db_path: &Path, at: NaiveDateTime) -> PathBuf {
        self.backups_directory
            .join(dated_file_name(&db_stem(db_path), "zip", at))
    }

    /// `<backups>/<db stem>-<timestamp>.<db extension>`
    pub fn default_backup_path(&self, db_path: &Path, at: NaiveDateTime) -> PathBuf {
        let extension = db_path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "db".to_string());
        self.backups_directory
            .join(dated_file_name(&db_stem(db_path), &extension, at))
    }
}

fn db_stem(db_path: &Path) -> String {
    db_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "memo".to_string())
}
