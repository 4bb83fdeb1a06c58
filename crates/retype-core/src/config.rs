use crate::error::Result;
use crate::keyboard::{parse_key, KeyBindings};
use crate::rules::RuleSet;
use crate::RetypeError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

pub const APP_DIR_NAME: &str = "retype";
pub const CONFIG_FILENAME: &str = "config.json";
pub const LOG_DIR_NAME: &str = "logs";
pub const LOG_FILENAME: &str = "retype.log";

/// Characters kept in the buffer beyond the longest keyword.
pub const BUFFER_MARGIN: usize = 5;
/// Buffer size used when there are no rules at all.
pub const DEFAULT_BUFFER_SIZE: usize = 10;

/// Get the retype configuration directory
pub fn get_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .unwrap_or_else(|| {
            env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(APP_DIR_NAME)
        })
}

/// Get the path to the config file holding rules and settings
pub fn get_config_file_path() -> PathBuf {
    get_config_dir().join(CONFIG_FILENAME)
}

/// Get the directory log files are written to
pub fn get_log_dir() -> PathBuf {
    get_config_dir().join(LOG_DIR_NAME)
}

/// Engine settings persisted next to the rules.
///
/// Every field falls back to its own default when missing from the file,
/// so older config files keep loading as settings are added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Keys that end a keyword and start matching.
    pub trigger_keys: Vec<String>,
    /// Key that stops the engine. `None` disables it.
    pub exit_key: Option<String>,
    /// Extra backward-selection steps on top of the keyword length.
    pub selection_padding: usize,
    /// Delay between individual selection steps.
    pub key_delay_ms: u64,
    /// Delay after the selection and after the delete.
    pub settle_delay_ms: u64,
    /// Log filter used when `RUST_LOG` is not set.
    pub log_level: String,
    /// Keys retype does not know, written back untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            trigger_keys: vec!["Space".to_string()],
            exit_key: Some("Escape".to_string()),
            selection_padding: 1,
            key_delay_ms: 10,
            settle_delay_ms: 20,
            log_level: "info".to_string(),
            extra: Map::new(),
        }
    }
}

impl Settings {
    /// Resolve the configured key names into rdev keys.
    pub fn key_bindings(&self) -> Result<KeyBindings> {
        let mut triggers = Vec::with_capacity(self.trigger_keys.len());
        for name in &self.trigger_keys {
            let key = parse_key(name).ok_or_else(|| {
                RetypeError::InvalidConfig(format!("unknown trigger key '{}'", name))
            })?;
            triggers.push(key);
        }
        if triggers.is_empty() {
            return Err(RetypeError::InvalidConfig(
                "at least one trigger key is required".to_string(),
            ));
        }

        let exit = match &self.exit_key {
            Some(name) => Some(parse_key(name).ok_or_else(|| {
                RetypeError::InvalidConfig(format!("unknown exit key '{}'", name))
            })?),
            None => None,
        };

        Ok(KeyBindings::new(triggers, exit))
    }

    pub fn key_delay(&self) -> Duration {
        Duration::from_millis(self.key_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// On-disk layout: `{"rules": {...}, "settings": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default = "RuleSet::sample", deserialize_with = "rules_or_sample")]
    pub rules: RuleSet,
    #[serde(default)]
    pub settings: Settings,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            rules: RuleSet::sample(),
            settings: Settings::default(),
        }
    }
}

/// A malformed `rules` section falls back to the sample rules instead of
/// failing the whole file, so the settings still load.
fn rules_or_sample<'de, D>(deserializer: D) -> std::result::Result<RuleSet, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match RuleSet::deserialize(value) {
        Ok(rules) => Ok(rules),
        Err(e) => {
            warn!(error = %e, "Invalid rules section, using the sample rules");
            Ok(RuleSet::sample())
        }
    }
}
