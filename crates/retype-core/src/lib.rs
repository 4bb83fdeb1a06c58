//! retype core: rules, the rolling keystroke buffer, and the replacement
//! executor that retypes matched keywords.

pub mod buffer;
pub mod config;
pub mod error;
pub mod expansion;
pub mod keyboard;
pub mod logging;
pub mod rules;
pub mod storage;
pub mod suppression;

// Re-export common items for convenience
pub use buffer::{BufferMatcher, Flow, MatcherState};
pub use config::{get_config_dir, get_config_file_path, ConfigFile, Settings};
pub use error::{Result, RetypeError};
pub use expansion::{
    Inject, InjectBackend, InjectKey, KeyDirection, RecordingBackend, ReplacementExecutor,
    ReplacementTiming,
};
pub use keyboard::{classify_event, EnigoBackend, KeyBindings, KeyEvent};
pub use rules::{Rule, RuleSet, RuleStore};
pub use storage::{JsonConfigStore, RuleSource};
pub use suppression::SuppressionFlag;
