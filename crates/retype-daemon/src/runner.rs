use crate::engine::Engine;
use retype_core::rules::RuleSet;
use retype_core::{JsonConfigStore, Result};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{error, info};

const TICK: Duration = Duration::from_millis(100);
const RELOAD_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Watches the config file and hands back new rules when it changes.
pub struct RuleReloader {
    store: JsonConfigStore,
    last_modified: Option<SystemTime>,
    last_failure: Option<SystemTime>,
}

impl RuleReloader {
    pub fn new(store: JsonConfigStore) -> Self {
        let last_modified = store.modified();
        Self {
            store,
            last_modified,
            last_failure: None,
        }
    }

    /// Reload if the file's modification time moved forward. A file that
    /// fails to parse keeps the active rules and is read again on the next
    /// poll, since a write with the same mtime may still complete it.
    pub fn poll(&mut self) -> Option<RuleSet> {
        let current = self.store.modified()?;
        if self.last_modified.is_some_and(|last| current <= last) {
            return None;
        }

        match self.store.read_config() {
            Ok(config) => {
                self.last_modified = Some(current);
                self.last_failure = None;
                info!(path = %self.store.path().display(), rules = config.rules.len(), "Config changed, reloading rules");
                Some(config.rules)
            }
            Err(e) => {
                // Logged once per modification
                if self.last_failure != Some(current) {
                    self.last_failure = Some(current);
                    error!(path = %self.store.path().display(), error = %e, "Failed to reload rules, keeping current ones");
                }
                None
            }
        }
    }
}

/// Block until the engine stops, applying rule file changes as they land.
pub fn run_until_stopped(
    engine: &Engine,
    reloader: &mut RuleReloader,
    tick: Duration,
    check_interval: Duration,
) {
    let mut last_check = Instant::now();
    while engine.is_running() {
        thread::sleep(tick);

        if last_check.elapsed() >= check_interval {
            last_check = Instant::now();
            if let Some(rules) = reloader.poll() {
                engine.update_rules(rules);
            }
        }
    }
}

/// Run the engine in the foreground until the exit key is pressed.
pub fn run_foreground(store: &JsonConfigStore) -> Result<()> {
    let config = store.load_config();
    let engine = Engine::from_settings(config.rules, &config.settings)?;
    engine.start()?;

    match &config.settings.exit_key {
        Some(key) => info!(exit_key = %key, "retype is running"),
        None => info!("retype is running"),
    }

    let mut reloader = RuleReloader::new(store.clone());
    run_until_stopped(&engine, &mut reloader, TICK, RELOAD_CHECK_INTERVAL);

    info!("retype stopped");
    Ok(())
}
