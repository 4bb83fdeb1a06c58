use crate::expansion::ReplacementExecutor;
use crate::keyboard::KeyEvent;
use crate::rules::{Rule, RuleSet, RuleSnapshot, RuleStore};
use crate::suppression::SuppressionFlag;
use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// What the capture loop should do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherState {
    Idle,
    Accumulating,
}

/// Rolling window over recently typed characters, checked against the rules
/// whenever a trigger key is pressed.
///
/// Lives on the capture thread. Rule changes made through the shared
/// [`RuleStore`] from other threads are picked up before the next event and
/// clear the buffer.
#[derive(Debug)]
pub struct BufferMatcher {
    store: Arc<RuleStore>,
    snapshot: Arc<RuleSnapshot>,
    buffer: VecDeque<char>,
    executor: ReplacementExecutor,
}

impl BufferMatcher {
    pub fn new(store: Arc<RuleStore>, executor: ReplacementExecutor) -> Self {
        let snapshot = store.snapshot();
        Self {
            buffer: VecDeque::with_capacity(snapshot.max_buffer_size()),
            store,
            snapshot,
            executor,
        }
    }

    pub fn state(&self) -> MatcherState {
        if self.buffer.is_empty() {
            MatcherState::Idle
        } else {
            MatcherState::Accumulating
        }
    }

    /// Current buffer contents, oldest first.
    pub fn buffer(&self) -> String {
        self.buffer.iter().collect()
    }

    pub fn max_buffer_size(&self) -> usize {
        self.snapshot.max_buffer_size()
    }

    pub fn rules(&self) -> &RuleSet {
        self.snapshot.rules()
    }

    pub fn suppression(&self) -> &SuppressionFlag {
        self.executor.suppression()
    }

    /// Apply one key event.
    pub fn handle(&mut self, event: KeyEvent) -> Flow {
        match event {
            KeyEvent::Character(c) => self.on_character(c),
            KeyEvent::Backspace => self.on_backspace(),
            KeyEvent::Trigger => {
                self.on_trigger();
            }
            KeyEvent::OtherSpecial => self.on_other_special_key(),
            KeyEvent::Exit => {
                info!("Exit key pressed");
                return Flow::Exit;
            }
        }
        Flow::Continue
    }

    pub fn on_character(&mut self, c: char) {
        self.sync_rules();
        self.buffer.push_back(c);

        let max = self.snapshot.max_buffer_size();
        if self.buffer.len() > max {
            let excess = self.buffer.len() - max;
            self.buffer.drain(..excess);
        }
        trace!(buffer = %self.buffer(), "Buffer updated");
    }

    pub fn on_backspace(&mut self) {
        self.sync_rules();
        if self.buffer.pop_back().is_some() {
            trace!(buffer = %self.buffer(), "Backspace applied");
        }
    }

    /// Check the buffer against the rules and clear it. Returns whether a
    /// rule matched; the buffer is empty afterwards either way.
    pub fn on_trigger(&mut self) -> bool {
        self.sync_rules();
        let candidate = mem::take(&mut self.buffer);

        let Some(rule) = self.find_match(&candidate) else {
            trace!("Trigger without a matching keyword");
            return false;
        };

        info!(keyword = %rule.keyword, "Keyword matched");
        if self
            .executor
            .execute(&rule.keyword, &rule.replacement)
            .is_err()
        {
            debug!(keyword = %rule.keyword, "Replacement abandoned");
        }
        true
    }

    /// Modifiers and navigation keys leave an in-progress keyword alone.
    pub fn on_other_special_key(&mut self) {
        self.sync_rules();
    }

    /// First rule, in rule-set order, whose keyword ends `text`.
    pub fn find_match(&self, text: &VecDeque<char>) -> Option<Rule> {
        self.snapshot
            .rules()
            .iter()
            .find(|rule| ends_with(text, &rule.keyword))
            .cloned()
    }

    /// Replace the rules, recompute the buffer bound and clear the buffer.
    pub fn update_rules(&mut self, rules: RuleSet) {
        self.store.replace(rules);
        self.sync_rules();
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    fn sync_rules(&mut self) {
        if self.store.generation() == self.snapshot.generation() {
            return;
        }

        self.snapshot = self.store.snapshot();
        self.buffer.clear();
        info!(
            rules = self.snapshot.rules().len(),
            max_buffer_size = self.snapshot.max_buffer_size(),
            "Rules updated, buffer cleared"
        );
    }
}

fn ends_with(buffer: &VecDeque<char>, keyword: &str) -> bool {
    let mut tail = buffer.iter().rev();
    keyword.chars().rev().all(|k| tail.next() == Some(&k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expansion::{InjectAction, RecordingBackend, ReplacementTiming};

    fn matcher_with(rules: RuleSet) -> (BufferMatcher, RecordingBackend) {
        let backend = RecordingBackend::new();
        let executor = ReplacementExecutor::new(
            Arc::new(backend.clone()),
            SuppressionFlag::new(),
            ReplacementTiming::immediate(),
        );
        let store = Arc::new(RuleStore::new(rules));
        (BufferMatcher::new(store, executor), backend)
    }

    fn type_str(matcher: &mut BufferMatcher, text: &str) {
        for c in text.chars() {
            matcher.handle(KeyEvent::Character(c));
        }
    }

    #[test]
    fn buffer_keeps_truncated_suffix() {
        let (mut matcher, _) = matcher_with(RuleSet::from_pairs([("!email", "a@b.com")]).unwrap());
        assert_eq!(matcher.max_buffer_size(), 11);

        let typed = "the quick brown fox jumps";
        let mut expected = String::new();
        for c in typed.chars() {
            matcher.handle(KeyEvent::Character(c));
            expected.push(c);
            let keep = expected.chars().count().min(11);
            let suffix: String = expected.chars().skip(expected.chars().count() - keep).collect();
            assert_eq!(matcher.buffer(), suffix);
        }
        assert_eq!(matcher.buffer(), "n fox jumps");
    }

    #[test]
    fn trigger_matches_and_clears() {
        let (mut matcher, backend) =
            matcher_with(RuleSet::from_pairs([("!email", "a@b.com")]).unwrap());

        type_str(&mut matcher, "hi !email");
        assert_eq!(matcher.state(), MatcherState::Accumulating);
        assert!(matcher.on_trigger());
        assert_eq!(matcher.buffer(), "");
        assert_eq!(matcher.state(), MatcherState::Idle);
        assert_eq!(backend.typed_text(), "a@b.com");
    }

    #[test]
    fn trigger_without_match_still_clears() {
        let (mut matcher, backend) =
            matcher_with(RuleSet::from_pairs([("!email", "a@b.com")]).unwrap());

        type_str(&mut matcher, "hello");
        assert!(!matcher.on_trigger());
        assert_eq!(matcher.buffer(), "");
        assert!(backend.actions().is_empty());
    }

    #[test]
    fn failed_replacement_still_counts_and_clears() {
        let backend = RecordingBackend::failing_at(0);
        let executor = ReplacementExecutor::new(
            Arc::new(backend.clone()),
            SuppressionFlag::new(),
            ReplacementTiming::immediate(),
        );
        let store = Arc::new(RuleStore::new(RuleSet::from_pairs([("kw", "A")]).unwrap()));
        let mut matcher = BufferMatcher::new(store, executor);

        type_str(&mut matcher, "kw");
        assert!(matcher.on_trigger());
        assert_eq!(matcher.buffer(), "");
        assert!(!matcher.suppression().is_active());
    }

    #[test]
    fn backspace_removes_last_character() {
        let (mut matcher, _) = matcher_with(RuleSet::sample());

        matcher.handle(KeyEvent::Backspace);
        assert_eq!(matcher.buffer(), "");

        type_str(&mut matcher, "abc");
        matcher.handle(KeyEvent::Backspace);
        assert_eq!(matcher.buffer(), "ab");
        matcher.handle(KeyEvent::Backspace);
        matcher.handle(KeyEvent::Backspace);
        matcher.handle(KeyEvent::Backspace);
        assert_eq!(matcher.buffer(), "");
    }

    #[test]
    fn corrected_keyword_still_matches() {
        let (mut matcher, backend) = matcher_with(RuleSet::from_pairs([("!addr", "Home")]).unwrap());

        type_str(&mut matcher, "!adf");
        matcher.handle(KeyEvent::Backspace);
        type_str(&mut matcher, "dr");
        matcher.handle(KeyEvent::Trigger);

        assert_eq!(backend.typed_text(), "Home");
    }

    #[test]
    fn special_keys_do_not_interrupt() {
        let (mut matcher, _) = matcher_with(RuleSet::sample());
        type_str(&mut matcher, "!em");
        assert_eq!(matcher.handle(KeyEvent::OtherSpecial), Flow::Continue);
        assert_eq!(matcher.buffer(), "!em");
    }

    #[test]
    fn exit_key_asks_to_stop_and_keeps_buffer() {
        let (mut matcher, _) = matcher_with(RuleSet::sample());
        type_str(&mut matcher, "ab");
        assert_eq!(matcher.handle(KeyEvent::Exit), Flow::Exit);
        assert_eq!(matcher.buffer(), "ab");
    }

    #[test]
    fn first_match_wins_over_longer_keyword() {
        let (mut matcher, backend) =
            matcher_with(RuleSet::from_pairs([("kw", "A"), ("longkw", "B")]).unwrap());

        type_str(&mut matcher, "longkw");
        assert!(matcher.on_trigger());
        assert_eq!(backend.typed_text(), "A");

        // Only "kw" plus padding was selected
        let lefts = backend
            .actions()
            .iter()
            .filter(|a| matches!(a, InjectAction::Key(crate::expansion::InjectKey::Left, _)))
            .count();
        assert_eq!(lefts, 3);
    }

    #[test]
    fn update_rules_resets_bound_and_buffer() {
        let (mut matcher, _) = matcher_with(RuleSet::sample());
        type_str(&mut matcher, "!gre");

        matcher.update_rules(RuleSet::new());
        assert_eq!(matcher.max_buffer_size(), 10);
        assert_eq!(matcher.buffer(), "");
        assert!(matcher.rules().is_empty());
    }

    #[test]
    fn store_replacement_from_elsewhere_clears_before_next_event() {
        let (mut matcher, backend) = matcher_with(RuleSet::from_pairs([("old", "x")]).unwrap());
        let store = Arc::clone(&matcher.store);

        type_str(&mut matcher, "ne");
        store.replace(RuleSet::from_pairs([("new", "fresh")]).unwrap());

        // "ne" was dropped with the rule change, so only "w" is in the buffer
        matcher.handle(KeyEvent::Character('w'));
        assert_eq!(matcher.buffer(), "w");
        assert!(!matcher.on_trigger());

        type_str(&mut matcher, "new");
        assert!(matcher.on_trigger());
        assert_eq!(backend.typed_text(), "fresh");
    }

    #[test]
    fn keyword_longer_than_buffer_never_matches() {
        assert!(!ends_with(&"kw".chars().collect(), "longkw"));
        assert!(ends_with(&"xlongkw".chars().collect(), "longkw"));
        assert!(ends_with(&"kw".chars().collect(), "kw"));
    }
}
