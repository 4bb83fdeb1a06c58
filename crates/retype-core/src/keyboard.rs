use crate::error::{Result, RetypeError};
use crate::expansion::{Inject, InjectBackend, InjectKey, KeyDirection};
use enigo::Keyboard;
use enigo::{Direction, Enigo, Key, Settings};
use rdev::{self, EventType, Key as RdevKey};

/// A key press as the matcher sees it, classified once at the hook boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    Character(char),
    Trigger,
    Backspace,
    Exit,
    OtherSpecial,
}

/// Which physical keys trigger matching and which one stops the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyBindings {
    triggers: Vec<RdevKey>,
    exit: Option<RdevKey>,
}

impl KeyBindings {
    pub fn new(triggers: Vec<RdevKey>, exit: Option<RdevKey>) -> Self {
        Self { triggers, exit }
    }

    pub fn is_trigger(&self, key: RdevKey) -> bool {
        self.triggers.contains(&key)
    }

    pub fn exit(&self) -> Option<RdevKey> {
        self.exit
    }
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self::new(vec![RdevKey::Space], Some(RdevKey::Escape))
    }
}

/// Parse a key name from the settings file into an [`rdev::Key`].
pub fn parse_key(name: &str) -> Option<RdevKey> {
    let key = match name.trim() {
        "Space" => RdevKey::Space,
        "Return" | "Enter" => RdevKey::Return,
        "Tab" => RdevKey::Tab,
        "Escape" | "Esc" => RdevKey::Escape,
        "Backspace" => RdevKey::Backspace,
        "Delete" | "Del" => RdevKey::Delete,
        "Insert" => RdevKey::Insert,
        "Home" => RdevKey::Home,
        "End" => RdevKey::End,
        "PageUp" => RdevKey::PageUp,
        "PageDown" => RdevKey::PageDown,
        "Pause" => RdevKey::Pause,
        "ScrollLock" => RdevKey::ScrollLock,
        "F1" => RdevKey::F1,
        "F2" => RdevKey::F2,
        "F3" => RdevKey::F3,
        "F4" => RdevKey::F4,
        "F5" => RdevKey::F5,
        "F6" => RdevKey::F6,
        "F7" => RdevKey::F7,
        "F8" => RdevKey::F8,
        "F9" => RdevKey::F9,
        "F10" => RdevKey::F10,
        "F11" => RdevKey::F11,
        "F12" => RdevKey::F12,
        _ => return None,
    };
    Some(key)
}

/// Turn a raw rdev event into a [`KeyEvent`]. Key releases and non-keyboard
/// events yield `None`.
pub fn classify_event(event: &rdev::Event, bindings: &KeyBindings) -> Option<KeyEvent> {
    let key = match event.event_type {
        EventType::KeyPress(key) => key,
        _ => return None,
    };

    let classified = if bindings.is_trigger(key) {
        KeyEvent::Trigger
    } else if bindings.exit() == Some(key) {
        KeyEvent::Exit
    } else if key == RdevKey::Backspace {
        KeyEvent::Backspace
    } else if let Some(c) = rdev_key_to_char(event) {
        KeyEvent::Character(c)
    } else {
        KeyEvent::OtherSpecial
    };
    Some(classified)
}

/// The printable character an event produced, if any. rdev already applies
/// the keyboard layout and modifiers when it fills in `name`.
pub fn rdev_key_to_char(event: &rdev::Event) -> Option<char> {
    let name = event.name.as_deref()?;
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if !c.is_control() => Some(c),
        _ => None,
    }
}

/// Create a keyboard controller
pub fn create_keyboard_controller() -> Result<Enigo> {
    Enigo::new(&Settings::default()).map_err(|err| {
        RetypeError::Simulation(format!("Failed to create keyboard controller: {}", err))
    })
}

/// Injects input through enigo. A fresh controller is connected for every
/// replacement.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnigoBackend;

impl InjectBackend for EnigoBackend {
    fn connect(&self) -> Result<Box<dyn Inject>> {
        Ok(Box::new(EnigoInjector {
            enigo: create_keyboard_controller()?,
        }))
    }
}

pub struct EnigoInjector {
    enigo: Enigo,
}

impl Inject for EnigoInjector {
    fn key(&mut self, key: InjectKey, direction: KeyDirection) -> Result<()> {
        let enigo_key = match key {
            InjectKey::Shift => Key::Shift,
            InjectKey::Left => Key::LeftArrow,
            InjectKey::Delete => Key::Delete,
            InjectKey::Return => Key::Return,
        };
        let enigo_direction = match direction {
            KeyDirection::Press => Direction::Press,
            KeyDirection::Release => Direction::Release,
            KeyDirection::Click => Direction::Click,
        };

        self.enigo.key(enigo_key, enigo_direction).map_err(|err| {
            RetypeError::Simulation(format!("Failed to send {:?} {:?}: {}", key, direction, err))
        })
    }

    fn text(&mut self, text: &str) -> Result<()> {
        self.enigo
            .text(text)
            .map_err(|err| RetypeError::Simulation(format!("Failed to type text: {}", err)))
    }
}
