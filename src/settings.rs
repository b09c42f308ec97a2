//! Persisted default algorithm choices.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::format::Choices;
use crate::storage::Storage;

const FILE_NAME: &str = "settings.json";

/// Algorithm choices stored as JSON in the platform configuration
/// directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    path: PathBuf,
    choices: Choices,
}

impl Settings {
    /// `<config dir>/cryptic/settings.json` for the current platform.
    pub fn default_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "cryptic")
            .context("could not determine platform directories")?;
        Ok(dirs.config_dir().join(FILE_NAME))
    }

    /// Loads settings from `path`; a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self {
                path,
                choices: Choices::default(),
            });
        }

        let raw = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let choices = serde_json::from_slice(&raw)
            .with_context(|| format!("malformed settings file {}", path.display()))?;
        debug!(path = %path.display(), "loaded settings");
        Ok(Self { path, choices })
    }

    /// Writes the settings back to their file.
    pub fn save(&self) -> Result<()> {
        let mut json = serde_json::to_vec_pretty(&self.choices)?;
        json.push(b'\n');
        Storage::new(self.path.clone()).save(&json)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn choices(&self) -> &Choices {
        &self.choices
    }

    pub fn choices_mut(&mut self) -> &mut Choices {
        &mut self.choices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::Compression;
    use crate::crypto::{CipherAlgorithm, Operation};
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let settings = Settings::load(dir.path().join("settings.json")).unwrap();
        assert_eq!(settings.choices(), &Choices::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf").join("settings.json");

        let mut settings = Settings::load(path.clone()).unwrap();
        settings.choices_mut().cipher = CipherAlgorithm::Camellia;
        settings.choices_mut().operation = Operation::Eax;
        settings.choices_mut().compression = Compression::ZLib;
        settings.save().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"Camellia\""));

        let loaded = Settings::load(path).unwrap();
        assert_eq!(loaded.choices().cipher, CipherAlgorithm::Camellia);
        assert_eq!(loaded.choices().operation, Operation::Eax);
        assert_eq!(loaded.choices().compression, Compression::ZLib);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        let err = Settings::load(path).unwrap_err();
        assert!(err.to_string().contains("malformed settings file"));
    }

    #[test]
    fn default_path_ends_in_settings_file() {
        if let Ok(path) = Settings::default_path() {
            assert!(path.ends_with(FILE_NAME));
        }
    }
}
