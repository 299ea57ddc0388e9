use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Identifier for a physical keyboard key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyCode {
    Named(NamedKey),
    Character(char),
    Digit(u8),
    Function(u8),
}

impl KeyCode {
    pub fn from_name(name: &str) -> Option<Self> {
        if let Some(key) = parse_named_key(name) {
            return Some(key);
        }
        let mut chars = name.chars();
        if let (Some(ch), None) = (chars.next(), chars.next()) {
            if ch.is_ascii_alphabetic() {
                return Some(Self::Character(ch.to_ascii_uppercase()));
            }
            if ch.is_ascii_digit() {
                return Some(Self::Digit(ch as u8 - b'0'));
            }
        }
        if let Some(function) = name.strip_prefix('F').or_else(|| name.strip_prefix('f')) {
            if let Ok(index) = function.parse::<u8>() {
                if (1..=25).contains(&index) {
                    return Some(Self::Function(index));
                }
            }
        }
        None
    }
}

fn parse_named_key(name: &str) -> Option<KeyCode> {
    use NamedKey::*;
    let key = match name {
        "Space" => Space,
        "Enter" | "Return" => Enter,
        "Tab" => Tab,
        "Escape" | "Esc" => Escape,
        "Backspace" => Backspace,
        "Home" => Home,
        "End" => End,
        _ => return None,
    };
    Some(KeyCode::Named(key))
}

/// Friendly names for keys that commonly carry a reset binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NamedKey {
    Space,
    Enter,
    Tab,
    Escape,
    Backspace,
    Home,
    End,
}

/// Keyboard state shared between the input thread and the frame loop.
///
/// Besides the held keys it latches every up-to-down transition until someone
/// consumes it, so a press that lands while a frame is in flight is seen at the
/// next frame boundary instead of being lost.
#[derive(Debug, Default)]
pub struct InputState {
    keys: RwLock<HashSet<KeyCode>>,
    pressed: RwLock<HashSet<KeyCode>>,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_key_down(&self, key: KeyCode) {
        if self.keys.write().insert(key) {
            self.pressed.write().insert(key);
        }
    }

    pub fn set_key_up(&self, key: KeyCode) {
        self.keys.write().remove(&key);
    }

    pub fn is_key_down(&self, key: KeyCode) -> bool {
        self.keys.read().contains(&key)
    }

    pub fn is_key_down_by_name(&self, name: &str) -> bool {
        KeyCode::from_name(name).is_some_and(|key| self.is_key_down(key))
    }

    /// Returns whether `key` went down since the last call, clearing the latch.
    pub fn take_pressed(&self, key: KeyCode) -> bool {
        self.pressed.write().remove(&key)
    }
}

/// Manual reset request bound to one key.
#[derive(Debug, Clone)]
pub struct ResetTrigger {
    input: Arc<InputState>,
    key: KeyCode,
}

impl ResetTrigger {
    pub fn new(input: Arc<InputState>, key: KeyCode) -> Self {
        Self { input, key }
    }

    pub fn key(&self) -> KeyCode {
        self.key
    }

    /// Consumes a pending press; call once per frame boundary.
    pub fn take(&self) -> bool {
        self.input.take_pressed(self.key)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn parses_named_and_character_keys() {
        assert_eq!(
            KeyCode::from_name("Space"),
            Some(KeyCode::Named(NamedKey::Space))
        );
        assert_eq!(KeyCode::from_name("r"), Some(KeyCode::Character('R')));
        assert_eq!(KeyCode::from_name("7"), Some(KeyCode::Digit(7)));
        assert_eq!(KeyCode::from_name("F12"), Some(KeyCode::Function(12)));
        assert_eq!(KeyCode::from_name("F40"), None);
        assert_eq!(KeyCode::from_name("é"), None);
    }

    #[test]
    fn input_state_tracks_keys() {
        let state = InputState::new();
        state.set_key_down(KeyCode::Named(NamedKey::Space));
        assert!(state.is_key_down_by_name("Space"));
        state.set_key_up(KeyCode::Named(NamedKey::Space));
        assert!(!state.is_key_down_by_name("Space"));
    }

    #[test]
    fn press_is_latched_once() {
        let input = Arc::new(InputState::new());
        let trigger = ResetTrigger::new(Arc::clone(&input), KeyCode::Named(NamedKey::Space));
        assert!(!trigger.take());
        input.set_key_down(trigger.key());
        // Key repeat while held is not a new press.
        input.set_key_down(trigger.key());
        input.set_key_up(trigger.key());
        assert!(trigger.take());
        assert!(!trigger.take());
    }

    #[test]
    fn press_from_another_thread_is_seen_later() {
        let input = Arc::new(InputState::new());
        let trigger = ResetTrigger::new(Arc::clone(&input), KeyCode::Character('R'));
        let remote = Arc::clone(&input);
        thread::spawn(move || {
            remote.set_key_down(KeyCode::Character('R'));
            remote.set_key_up(KeyCode::Character('R'));
        })
        .join()
        .unwrap();
        assert!(trigger.take());
    }
}
