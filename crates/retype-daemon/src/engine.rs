use crate::keyboard_listener::{Capture, EventCapture, RdevCapture};
use retype_core::rules::RuleSet;
use retype_core::{
    BufferMatcher, EnigoBackend, InjectBackend, ReplacementExecutor, ReplacementTiming, Result,
    RuleStore, Settings, SuppressionFlag,
};
use std::sync::Arc;
use tracing::info;

/// The text-expansion engine and its control surface.
///
/// Every method takes `&self`, so an `Engine` can sit in an `Arc` and be
/// driven from any thread while the capture thread does the typing.
pub struct Engine {
    store: Arc<RuleStore>,
    capture: EventCapture,
    backend: Arc<dyn InjectBackend>,
    suppression: SuppressionFlag,
    timing: ReplacementTiming,
}

impl Engine {
    pub fn new(
        rules: RuleSet,
        timing: ReplacementTiming,
        capture: Box<dyn Capture>,
        backend: Arc<dyn InjectBackend>,
    ) -> Self {
        let store = Arc::new(RuleStore::new(rules));
        info!(
            rules = store.rules().len(),
            max_buffer_size = store.snapshot().max_buffer_size(),
            "Engine initialized"
        );
        Self {
            store,
            capture: EventCapture::new(capture),
            backend,
            suppression: SuppressionFlag::new(),
            timing,
        }
    }

    /// Engine wired to the OS: rdev for capture and enigo for typing.
    pub fn from_settings(rules: RuleSet, settings: &Settings) -> Result<Self> {
        let bindings = settings.key_bindings()?;
        Ok(Self::new(
            rules,
            ReplacementTiming::from_settings(settings),
            Box::new(RdevCapture::new(bindings)),
            Arc::new(EnigoBackend),
        ))
    }

    /// Start capturing keystrokes. A no-op with a warning when already
    /// running; fails with `HookInit` when the OS hook cannot be attached.
    pub fn start(&self) -> Result<()> {
        let executor = ReplacementExecutor::new(
            Arc::clone(&self.backend),
            self.suppression.clone(),
            self.timing,
        );
        let matcher = BufferMatcher::new(Arc::clone(&self.store), executor);
        self.capture.start(matcher)
    }

    /// Request a stop without waiting for it.
    pub fn stop(&self) {
        self.capture.stop();
    }

    pub fn is_running(&self) -> bool {
        self.capture.is_running()
    }

    /// Swap in new rules. The capture thread clears its buffer before it
    /// handles the next key.
    pub fn update_rules(&self, rules: RuleSet) {
        let snapshot = self.store.replace(rules);
        info!(
            rules = snapshot.rules().len(),
            max_buffer_size = snapshot.max_buffer_size(),
            "Rules updated"
        );
    }

    /// The active rules.
    pub fn rules(&self) -> Arc<RuleSet> {
        self.store.rules()
    }

    pub fn max_buffer_size(&self) -> usize {
        self.store.snapshot().max_buffer_size()
    }

    pub fn suppression(&self) -> &SuppressionFlag {
        &self.suppression
    }
}
