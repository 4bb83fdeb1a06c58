use crate::config::{get_config_file_path, ConfigFile};
use crate::error::{Result, RetypeError};
use crate::rules::RuleSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{error, info, warn};

/// Where rules come from and go back to.
pub trait RuleSource {
    fn load(&self) -> Result<RuleSet>;
    fn save(&self, rules: &RuleSet) -> Result<()>;
}

/// Rules and settings kept together in one JSON file.
#[derive(Debug, Clone)]
pub struct JsonConfigStore {
    path: PathBuf,
}

impl JsonConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the platform config location.
    pub fn open_default() -> Self {
        Self::new(get_config_file_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the config file, failing on any problem.
    pub fn read_config(&self) -> Result<ConfigFile> {
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Err(RetypeError::InvalidConfig(format!(
                "{} is empty",
                self.path.display()
            )));
        }
        Ok(serde_json::from_str(&content)?)
    }

    /// Load the whole config file. A missing or unreadable file yields the
    /// defaults rather than an error.
    pub fn load_config(&self) -> ConfigFile {
        if !self.path.exists() {
            warn!(path = %self.path.display(), "Config file not found, using defaults");
            return ConfigFile::default();
        }

        match self.read_config() {
            Ok(config) => {
                info!(path = %self.path.display(), rules = config.rules.len(), "Loaded config");
                config
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to load config file, using defaults");
                ConfigFile::default()
            }
        }
    }

    /// Config to apply an edit to. A missing file starts from the defaults,
    /// an unreadable one is an error so it is not overwritten.
    fn load_for_edit(&self) -> Result<ConfigFile> {
        if self.path.exists() {
            self.read_config()
        } else {
            Ok(ConfigFile::default())
        }
    }

    /// Write the whole config file, creating its directory if needed. The
    /// file is replaced by a rename, so readers never see a partial write.
    pub fn save_config(&self, config: &ConfigFile) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let serialized = serde_json::to_string_pretty(config)?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, serialized)?;
        fs::rename(&staging, &self.path)?;
        info!(path = %self.path.display(), rules = config.rules.len(), "Saved config");
        Ok(())
    }

    /// Last modification time of the config file, if it exists.
    pub fn modified(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    /// Add a new rule
    pub fn add_rule(&self, keyword: &str, replacement: &str) -> Result<()> {
        let mut config = self.load_for_edit()?;
        if config.rules.contains(keyword) {
            return Err(RetypeError::RuleExists(keyword.to_string()));
        }
        config.rules.insert(keyword, replacement)?;
        self.save_config(&config)
    }

    /// Update an existing rule
    pub fn update_rule(&self, keyword: &str, replacement: &str) -> Result<()> {
        let mut config = self.load_for_edit()?;
        if !config.rules.contains(keyword) {
            return Err(RetypeError::RuleNotFound(keyword.to_string()));
        }
        config.rules.insert(keyword, replacement)?;
        self.save_config(&config)
    }

    /// Delete a rule by keyword
    pub fn delete_rule(&self, keyword: &str) -> Result<()> {
        let mut config = self.load_for_edit()?;
        if config.rules.remove(keyword).is_none() {
            return Err(RetypeError::RuleNotFound(keyword.to_string()));
        }
        self.save_config(&config)
    }
}

impl RuleSource for JsonConfigStore {
    fn load(&self) -> Result<RuleSet> {
        Ok(self.load_config().rules)
    }

    /// Replace the rules, keeping whatever settings are on disk.
    fn save(&self, rules: &RuleSet) -> Result<()> {
        let mut config = self.load_for_edit()?;
        config.rules = rules.clone();
        self.save_config(&config)
    }
}
