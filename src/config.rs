use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// The environment settings object from spec §6: everything the core needs
/// to locate its persistence layers and its embedding model, with documented
/// defaults when a value is absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub metadata_db_path: PathBuf,
    pub vector_persist_dir: PathBuf,
    pub vector_collection_base: String,
    pub embedding_model_name: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            metadata_db_path: PathBuf::from("./data/jobs.db"),
            vector_persist_dir: PathBuf::from("./data/vector_index"),
            vector_collection_base: "jobs".to_string(),
            embedding_model_name: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SettingsUpdate {
    pub metadata_db_path: Option<PathBuf>,
    pub vector_persist_dir: Option<PathBuf>,
    pub vector_collection_base: Option<String>,
    pub embedding_model_name: Option<String>,
}

pub struct ConfigManager {
    config_path: PathBuf,
    settings: Settings,
}

impl ConfigManager {
    /// Loads from the default config path, creating a default config file if
    /// none exists yet.
    pub fn new() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::new_with_path(config_path)
    }

    pub fn new_with_path(config_path: PathBuf) -> Result<Self> {
        let settings = Self::load_or_create_default(&config_path)?;
        Ok(Self {
            config_path,
            settings,
        })
    }

    fn default_config_path() -> Result<PathBuf> {
        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
            .context("could not determine a config directory")?;
        let dir = base.join("job-matcher");
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
        Ok(dir.join("settings.json"))
    }

    fn load_or_create_default(path: &PathBuf) -> Result<Settings> {
        if path.exists() {
            Self::load(path)
        } else {
            let settings = Settings::default();
            Self::save_to_path(path, &settings)?;
            Ok(settings)
        }
    }

    fn load(path: &PathBuf) -> Result<Settings> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    fn save_to_path(path: &PathBuf, settings: &Settings) -> Result<()> {
        let json = serde_json::to_string_pretty(settings)?;
        fs::write(path, json)
            .with_context(|| format!("failed to write config file {}", path.display()))?;
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        Self::save_to_path(&self.config_path, &self.settings)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Non-fatal sanity checks, logged at startup; callers decide whether any
    /// of these should be treated as a fatal `MatcherError::Configuration`.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.settings.embedding_model_name.trim().is_empty() {
            warnings.push("embedding_model_name is empty".to_string());
        }
        if self.settings.vector_collection_base.trim().is_empty() {
            warnings.push("vector_collection_base is empty".to_string());
        }
        if let Some(parent) = self.settings.vector_persist_dir.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                warnings.push(format!(
                    "vector_persist_dir parent {} does not exist yet",
                    parent.display()
                ));
            }
        }

        for warning in &warnings {
            warn!("config validation: {warning}");
        }
        if warnings.is_empty() {
            info!("config validated with no warnings");
        }
        warnings
    }

    /// Applies `JOBMATCHER_*` environment overrides on top of the loaded
    /// settings, without touching the file on disk.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("JOBMATCHER_METADATA_DB_PATH") {
            self.settings.metadata_db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("JOBMATCHER_VECTOR_PERSIST_DIR") {
            self.settings.vector_persist_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("JOBMATCHER_VECTOR_COLLECTION_BASE") {
            self.settings.vector_collection_base = v;
        }
        if let Ok(v) = std::env::var("JOBMATCHER_EMBEDDING_MODEL_NAME") {
            self.settings.embedding_model_name = v;
        }
    }

    pub fn partial_update(&mut self, update: SettingsUpdate) -> Result<()> {
        if let Some(v) = update.metadata_db_path {
            self.settings.metadata_db_path = v;
        }
        if let Some(v) = update.vector_persist_dir {
            self.settings.vector_persist_dir = v;
        }
        if let Some(v) = update.vector_collection_base {
            self.settings.vector_collection_base = v;
        }
        if let Some(v) = update.embedding_model_name {
            self.settings.embedding_model_name = v;
        }
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let manager = ConfigManager::new_with_path(path.clone()).unwrap();
        assert!(path.exists());
        assert_eq!(manager.settings().vector_collection_base, "jobs");
    }

    #[test]
    fn test_env_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::env::set_var("JOBMATCHER_VECTOR_COLLECTION_BASE", "custom_jobs");
        let mut manager = ConfigManager::new_with_path(path).unwrap();
        manager.apply_env_overrides();
        assert_eq!(manager.settings().vector_collection_base, "custom_jobs");
        std::env::remove_var("JOBMATCHER_VECTOR_COLLECTION_BASE");
    }

    #[test]
    fn test_validate_reports_empty_model_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut manager = ConfigManager::new_with_path(path).unwrap();
        manager.partial_update(SettingsUpdate {
            embedding_model_name: Some(String::new()),
            ..Default::default()
        }).unwrap();
        let warnings = manager.validate();
        assert!(warnings.iter().any(|w| w.contains("embedding_model_name")));
    }
}
