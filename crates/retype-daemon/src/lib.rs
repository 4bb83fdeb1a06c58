//! Keyboard capture, the engine control surface, and the foreground runner.

pub mod engine;
pub mod keyboard_listener;
pub mod runner;

pub use engine::Engine;
pub use keyboard_listener::{Capture, EventCapture, EventSink, RdevCapture};
pub use runner::{run_foreground, RuleReloader};
