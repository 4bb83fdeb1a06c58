//! Replacing a typed keyword in the focused application.
//!
//! The keyword is selected with Shift+Left, deleted, and the replacement is
//! typed in its place. All of it runs with the [`SuppressionFlag`] raised so
//! the capture path ignores the keystrokes we generate ourselves.

use crate::config::Settings;
use crate::error::{Result, RetypeError};
use crate::suppression::SuppressionFlag;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info};

/// Keys the executor needs to simulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectKey {
    Shift,
    Left,
    Delete,
    Return,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDirection {
    Press,
    Release,
    Click,
}

/// Simulated keyboard input into whatever has focus.
pub trait Inject {
    fn key(&mut self, key: InjectKey, direction: KeyDirection) -> Result<()>;
    fn text(&mut self, text: &str) -> Result<()>;
}

/// Hands out an [`Inject`] connection for one replacement.
pub trait InjectBackend: Send + Sync {
    fn connect(&self) -> Result<Box<dyn Inject>>;
}

/// Delays and selection offset used while replacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplacementTiming {
    pub key_delay: Duration,
    pub settle_delay: Duration,
    pub selection_padding: usize,
}

impl ReplacementTiming {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            key_delay: settings.key_delay(),
            settle_delay: settings.settle_delay(),
            selection_padding: settings.selection_padding,
        }
    }

    /// No delays. Meant for backends that do not talk to a real display.
    pub fn immediate() -> Self {
        Self {
            key_delay: Duration::ZERO,
            settle_delay: Duration::ZERO,
            selection_padding: 1,
        }
    }
}

impl Default for ReplacementTiming {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

pub struct ReplacementExecutor {
    backend: Arc<dyn InjectBackend>,
    suppression: SuppressionFlag,
    timing: ReplacementTiming,
}

impl fmt::Debug for ReplacementExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplacementExecutor")
            .field("suppression", &self.suppression)
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

impl ReplacementExecutor {
    pub fn new(
        backend: Arc<dyn InjectBackend>,
        suppression: SuppressionFlag,
        timing: ReplacementTiming,
    ) -> Self {
        Self {
            backend,
            suppression,
            timing,
        }
    }

    pub fn suppression(&self) -> &SuppressionFlag {
        &self.suppression
    }

    /// Erase `keyword` before the caret and type `replacement`.
    ///
    /// Errors are logged and returned; nothing is retried, so a failure can
    /// leave a partial edit behind. The suppression flag is cleared on every
    /// path out of here, panics included.
    pub fn execute(&self, keyword: &str, replacement: &str) -> Result<()> {
        let _suppressed = self.suppression.engage();
        debug!(keyword, "Replacing keyword");

        let result = self
            .backend
            .connect()
            .and_then(|mut injector| self.replace(injector.as_mut(), keyword, replacement));

        match &result {
            Ok(()) => info!(keyword, "Replacement complete"),
            Err(e) => error!(keyword, error = %e, "Replacement failed"),
        }
        result
    }

    fn replace(&self, injector: &mut dyn Inject, keyword: &str, replacement: &str) -> Result<()> {
        // Padding is empirical; one extra step by default
        let steps = keyword.chars().count() + self.timing.selection_padding;
        self.select_backward(injector, steps)?;
        thread::sleep(self.timing.settle_delay);

        injector.key(InjectKey::Delete, KeyDirection::Click)?;
        thread::sleep(self.timing.settle_delay);

        self.type_text_with_formatting(injector, replacement)
    }

    fn select_backward(&self, injector: &mut dyn Inject, steps: usize) -> Result<()> {
        injector.key(InjectKey::Shift, KeyDirection::Press)?;

        let selected = (0..steps).try_for_each(|_| {
            injector.key(InjectKey::Left, KeyDirection::Click)?;
            thread::sleep(self.timing.key_delay);
            Ok(())
        });

        // Release even when a step failed so Shift is not left held down
        let released = injector.key(InjectKey::Shift, KeyDirection::Release);
        selected.and(released)
    }

    /// Type text line by line with real Return presses between lines.
    fn type_text_with_formatting(&self, injector: &mut dyn Inject, text: &str) -> Result<()> {
        // Keep single text injections small enough for slow input queues
        const CHUNK_SIZE: usize = 512;

        for (i, line) in text.split('\n').enumerate() {
            if i > 0 {
                injector.key(InjectKey::Return, KeyDirection::Click)?;
                thread::sleep(self.timing.key_delay);
            }

            let chars: Vec<char> = line.chars().collect();
            for chunk in chars.chunks(CHUNK_SIZE) {
                let chunk: String = chunk.iter().collect();
                injector.text(&chunk)?;
                if chars.len() > CHUNK_SIZE {
                    thread::sleep(self.timing.key_delay);
                }
            }
        }

        Ok(())
    }
}

/// One call made against a [`RecordingBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectAction {
    Key(InjectKey, KeyDirection),
    Text(String),
}

/// Backend that records what would have been typed instead of typing it.
/// Optionally fails at a given action to exercise error paths.
#[derive(Debug, Clone, Default)]
pub struct RecordingBackend {
    actions: Arc<Mutex<Vec<InjectAction>>>,
    calls: Arc<AtomicUsize>,
    fail_at: Option<usize>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the call with the given zero-based index. Later calls succeed.
    pub fn failing_at(index: usize) -> Self {
        Self {
            fail_at: Some(index),
            ..Self::default()
        }
    }

    pub fn actions(&self) -> Vec<InjectAction> {
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Everything passed to `text`, concatenated.
    pub fn typed_text(&self) -> String {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                InjectAction::Text(text) => Some(text),
                InjectAction::Key(..) => None,
            })
            .collect()
    }
}

impl InjectBackend for RecordingBackend {
    fn connect(&self) -> Result<Box<dyn Inject>> {
        Ok(Box::new(self.clone()))
    }
}

impl Inject for RecordingBackend {
    fn key(&mut self, key: InjectKey, direction: KeyDirection) -> Result<()> {
        self.record(InjectAction::Key(key, direction))
    }

    fn text(&mut self, text: &str) -> Result<()> {
        self.record(InjectAction::Text(text.to_string()))
    }
}

impl RecordingBackend {
    fn record(&mut self, action: InjectAction) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(call) {
            return Err(RetypeError::Simulation(format!(
                "injected failure at {:?}",
                action
            )));
        }
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(action);
        Ok(())
    }
}
