//! Global keyboard capture.
//!
//! Two threads are involved. The hook thread sits inside `rdev::listen`,
//! classifies each OS event into a [`KeyEvent`] and forwards it over a
//! channel. The capture thread owns the [`BufferMatcher`] and handles events
//! one at a time, replacements included. Events never get swallowed: the
//! hook only listens, so every keystroke still reaches the focused
//! application.

use retype_core::keyboard::{classify_event, KeyBindings, KeyEvent};
use retype_core::{BufferMatcher, Flow, Result, RetypeError, SuppressionFlag};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, trace, warn};

/// How often the capture thread checks for a stop request while idle.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long `rdev::listen` gets to report a failure before the hook counts
/// as attached. It blocks for as long as it is listening.
const HOOK_ATTACH_GRACE: Duration = Duration::from_millis(250);

/// Where a capture backend delivers classified key events.
///
/// The suppression flag is checked before anything is forwarded, so the
/// executor's own keystrokes pass through to the OS without reaching the
/// matcher.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: Sender<KeyEvent>,
    suppression: SuppressionFlag,
}

impl EventSink {
    pub fn new(sender: Sender<KeyEvent>, suppression: SuppressionFlag) -> Self {
        Self {
            sender,
            suppression,
        }
    }

    /// Forward an event. Returns `false` once the capture thread is gone.
    pub fn deliver(&self, event: KeyEvent) -> bool {
        if self.suppression.is_active() {
            trace!(?event, "Ignoring simulated key event");
            return true;
        }
        self.sender.send(event).is_ok()
    }
}

/// An OS-level source of key events.
pub trait Capture: Send {
    /// Start delivering events into `sink`, replacing any previous sink.
    fn attach(&mut self, sink: EventSink) -> Result<()>;
    /// Stop delivering events. May leave OS resources in place for reuse.
    fn detach(&mut self);
}

/// Capture backend built on `rdev::listen`.
///
/// rdev offers no way to unhook, so the hook thread is started once and kept
/// for the life of the process; attaching and detaching only swap the sink
/// it forwards into.
pub struct RdevCapture {
    bindings: KeyBindings,
    sink: Arc<Mutex<Option<EventSink>>>,
    hook: Option<JoinHandle<()>>,
}

impl RdevCapture {
    pub fn new(bindings: KeyBindings) -> Self {
        Self {
            bindings,
            sink: Arc::new(Mutex::new(None)),
            hook: None,
        }
    }

    fn hook_alive(&self) -> bool {
        self.hook
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    fn spawn_hook(&mut self) -> Result<()> {
        let (failed_tx, failed_rx) = mpsc::channel::<String>();
        let sink = Arc::clone(&self.sink);
        let hook_sink = Arc::clone(&self.sink);
        let bindings = self.bindings.clone();

        let handle = thread::Builder::new()
            .name("retype-hook".to_string())
            .spawn(move || {
                let callback = move |event: rdev::Event| {
                    let Some(key_event) = classify_event(&event, &bindings) else {
                        return;
                    };
                    let mut slot = lock(&sink);
                    if let Some(current) = slot.as_ref() {
                        if !current.deliver(key_event) {
                            *slot = None;
                        }
                    }
                };

                let message = match rdev::listen(callback) {
                    Ok(()) => "keyboard hook returned unexpectedly".to_string(),
                    Err(e) => format!("{:?}", e),
                };
                hook_finished(&hook_sink, &failed_tx, message);
            })?;

        match failed_rx.recv_timeout(HOOK_ATTACH_GRACE) {
            Err(RecvTimeoutError::Timeout) => {
                info!("Keyboard hook attached");
                self.hook = Some(handle);
                Ok(())
            }
            Ok(message) => Err(RetypeError::HookInit(message)),
            Err(RecvTimeoutError::Disconnected) => Err(RetypeError::HookInit(
                "keyboard hook thread exited".to_string(),
            )),
        }
    }
}

impl Capture for RdevCapture {
    fn attach(&mut self, sink: EventSink) -> Result<()> {
        *lock(&self.sink) = Some(sink);
        if self.hook_alive() {
            return Ok(());
        }

        self.spawn_hook().map_err(|e| {
            *lock(&self.sink) = None;
            e
        })
    }

    fn detach(&mut self) {
        *lock(&self.sink) = None;
    }
}

/// The hook thread is gone. Report it, and drop the sink so the capture
/// thread sees its channel disconnect and stops.
fn hook_finished(sink: &Mutex<Option<EventSink>>, failed: &Sender<String>, message: String) {
    error!(error = %message, "Keyboard hook stopped");
    *lock(sink) = None;
    // Nobody listens here once the attach grace period is over
    let _ = failed.send(message);
}

struct Worker {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

impl Worker {
    fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Runs the capture thread and feeds its events to a [`BufferMatcher`].
pub struct EventCapture {
    backend: Mutex<Box<dyn Capture>>,
    worker: Mutex<Option<Worker>>,
}

impl EventCapture {
    pub fn new(backend: Box<dyn Capture>) -> Self {
        Self {
            backend: Mutex::new(backend),
            worker: Mutex::new(None),
        }
    }

    /// Attach the hook and start handling events with `matcher`. Does
    /// nothing but warn when capture is already running.
    pub fn start(&self, matcher: BufferMatcher) -> Result<()> {
        let mut worker = lock(&self.worker);
        if worker.as_ref().map_or(false, Worker::is_alive) {
            warn!("Keyboard capture is already running");
            return Ok(());
        }

        info!("Starting keyboard capture...");
        let (sender, events) = mpsc::channel();
        let sink = EventSink::new(sender, matcher.suppression().clone());
        if let Err(e) = lock(&self.backend).attach(sink) {
            error!(error = %e, "Failed to attach keyboard hook");
            return Err(e);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let spawned = thread::Builder::new()
            .name("retype-capture".to_string())
            .spawn({
                let stop = Arc::clone(&stop);
                move || run_capture_loop(events, matcher, stop)
            });

        match spawned {
            Ok(handle) => {
                *worker = Some(Worker { handle, stop });
                info!("Keyboard capture started");
                Ok(())
            }
            Err(e) => {
                lock(&self.backend).detach();
                let e = RetypeError::HookInit(format!("failed to spawn capture thread: {}", e));
                error!(error = %e, "Failed to start keyboard capture");
                Err(e)
            }
        }
    }

    /// Ask the capture thread to finish. Returns without waiting; poll
    /// [`EventCapture::is_running`] to know when it is gone.
    pub fn stop(&self) {
        let worker = lock(&self.worker);
        match worker.as_ref() {
            Some(worker) if worker.is_alive() => {
                if worker.stop.swap(true, Ordering::SeqCst) {
                    warn!("Keyboard capture stop already requested");
                } else {
                    info!("Stopping keyboard capture...");
                }
            }
            _ => warn!("Keyboard capture stop requested, but it is not running"),
        }
        lock(&self.backend).detach();
    }

    /// Whether the capture thread is alive.
    pub fn is_running(&self) -> bool {
        lock(&self.worker)
            .as_ref()
            .map_or(false, Worker::is_alive)
    }
}

/// The per-event callback: suppressed events never reach the matcher.
pub fn dispatch(suppression: &SuppressionFlag, matcher: &mut BufferMatcher, event: KeyEvent) -> Flow {
    if suppression.is_active() {
        trace!(?event, "Ignoring key event while replacing");
        return Flow::Continue;
    }
    matcher.handle(event)
}

fn run_capture_loop(events: Receiver<KeyEvent>, mut matcher: BufferMatcher, stop: Arc<AtomicBool>) {
    info!("Keyboard capture thread running");
    let suppression = matcher.suppression().clone();

    while !stop.load(Ordering::SeqCst) {
        let event = match events.recv_timeout(POLL_INTERVAL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Keyboard hook disconnected");
                break;
            }
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            dispatch(&suppression, &mut matcher, event)
        }));
        match outcome {
            Ok(Flow::Continue) => {}
            Ok(Flow::Exit) => break,
            Err(payload) => {
                let e = RetypeError::Callback(panic_message(payload.as_ref()));
                error!(error = %e, "Key event handling failed, continuing");
                matcher.reset();
            }
        }
    }

    info!("Keyboard capture thread finished");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use retype_core::expansion::{InjectAction, InjectKey, KeyDirection};
    use retype_core::{RecordingBackend, ReplacementExecutor, ReplacementTiming, RuleSet, RuleStore};
    use std::time::Instant;

    /// Map what the executor injected to what an OS hook would report.
    fn as_observed(action: &InjectAction) -> Vec<KeyEvent> {
        match action {
            InjectAction::Key(InjectKey::Shift | InjectKey::Left | InjectKey::Delete, _) => {
                vec![KeyEvent::OtherSpecial]
            }
            InjectAction::Key(InjectKey::Return, KeyDirection::Release) => Vec::new(),
            InjectAction::Key(InjectKey::Return, _) => vec![KeyEvent::OtherSpecial],
            InjectAction::Text(text) => text.chars().map(KeyEvent::Character).collect(),
        }
    }

    fn matcher(rules: RuleSet, backend: &RecordingBackend) -> BufferMatcher {
        let executor = ReplacementExecutor::new(
            Arc::new(backend.clone()),
            SuppressionFlag::new(),
            ReplacementTiming::immediate(),
        );
        BufferMatcher::new(Arc::new(RuleStore::new(rules)), executor)
    }

    fn executor_sequence() -> Vec<KeyEvent> {
        let backend = RecordingBackend::new();
        let executor = ReplacementExecutor::new(
            Arc::new(backend.clone()),
            SuppressionFlag::new(),
            ReplacementTiming::immediate(),
        );
        executor.execute("!email", "a@b.com").unwrap();
        backend.actions().iter().flat_map(as_observed).collect()
    }

    #[test]
    fn suppressed_events_leave_buffer_unchanged() {
        let backend = RecordingBackend::new();
        let mut matcher = matcher(RuleSet::from_pairs([("!email", "a@b.com")]).unwrap(), &backend);
        for c in "hi !em".chars() {
            matcher.handle(KeyEvent::Character(c));
        }

        let suppression = matcher.suppression().clone();
        let _guard = suppression.engage();
        for event in executor_sequence() {
            assert_eq!(dispatch(&suppression, &mut matcher, event), Flow::Continue);
        }

        assert_eq!(matcher.buffer(), "hi !em");
        assert!(backend.actions().is_empty());
    }

    #[test]
    fn sink_drops_events_while_suppressed() {
        let suppression = SuppressionFlag::new();
        let (sender, events) = mpsc::channel();
        let sink = EventSink::new(sender, suppression.clone());

        {
            let _guard = suppression.engage();
            for event in executor_sequence() {
                assert!(sink.deliver(event));
            }
        }
        assert!(events.try_recv().is_err());

        assert!(sink.deliver(KeyEvent::Character('x')));
        assert_eq!(events.try_recv().unwrap(), KeyEvent::Character('x'));
    }

    #[test]
    fn sink_reports_closed_capture() {
        let (sender, events) = mpsc::channel();
        let sink = EventSink::new(sender, SuppressionFlag::new());
        drop(events);
        assert!(!sink.deliver(KeyEvent::Trigger));
    }

    #[test]
    fn unsuppressed_dispatch_reaches_matcher() {
        let backend = RecordingBackend::new();
        let mut matcher = matcher(RuleSet::sample(), &backend);
        let suppression = matcher.suppression().clone();

        dispatch(&suppression, &mut matcher, KeyEvent::Character('a'));
        assert_eq!(matcher.buffer(), "a");
        assert_eq!(
            dispatch(&suppression, &mut matcher, KeyEvent::Exit),
            Flow::Exit
        );
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn hook_loss_after_attach_stops_capture() {
        struct LosableCapture(Arc<Mutex<Option<EventSink>>>);
        impl Capture for LosableCapture {
            fn attach(&mut self, sink: EventSink) -> Result<()> {
                *lock(&self.0) = Some(sink);
                Ok(())
            }
            fn detach(&mut self) {
                *lock(&self.0) = None;
            }
        }

        let slot = Arc::new(Mutex::new(None));
        let capture = EventCapture::new(Box::new(LosableCapture(Arc::clone(&slot))));
        let backend = RecordingBackend::new();
        capture.start(matcher(RuleSet::sample(), &backend)).unwrap();
        assert!(capture.is_running());

        // Attach already returned, so the failure channel has no receiver
        let (failed_tx, failed_rx) = mpsc::channel();
        drop(failed_rx);
        hook_finished(&slot, &failed_tx, "X server connection lost".to_string());

        assert!(lock(&slot).is_none());
        let deadline = Instant::now() + Duration::from_secs(2);
        while capture.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!capture.is_running());
    }

    #[test]
    fn hook_failure_during_attach_is_reported() {
        let slot = Mutex::new(None);
        let (failed_tx, failed_rx) = mpsc::channel();
        hook_finished(&slot, &failed_tx, "no display".to_string());
        assert_eq!(failed_rx.try_recv().unwrap(), "no display");
    }

    #[test]
    fn capture_loop_ends_when_hook_disconnects() {
        let backend = RecordingBackend::new();
        let matcher = matcher(RuleSet::sample(), &backend);
        let (sender, events) = mpsc::channel();
        drop(sender);

        let started = Instant::now();
        run_capture_loop(events, matcher, Arc::new(AtomicBool::new(false)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
