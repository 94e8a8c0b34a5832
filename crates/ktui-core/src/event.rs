#![forbid(unsafe_code)]

//! Canonical key event types.
//!
//! Key events are produced by [`crate::csi_key::key_event_from_csi`] and by the
//! loop's legacy control-byte mapping. All types derive `Clone`, `PartialEq`
//! and `Eq` for use in tests and pattern matching.
//!
//! # Design Notes
//!
//! - `KeyEventKind` defaults to `Press` when the terminal does not report it
//! - `Modifiers` use bitflags and follow the kitty keyboard protocol bit layout
//! - Lock modifiers (caps lock, num lock) never take part in shortcut matching

use bitflags::bitflags;

/// A keyboard event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    /// The key that was pressed.
    pub code: KeyCode,

    /// Modifier keys held during the event.
    pub modifiers: Modifiers,

    /// The type of key event (press, repeat, or release).
    pub kind: KeyEventKind,

    /// Key produced when shift is held, if the terminal reported it.
    pub shifted_key: Option<char>,

    /// Text this key event generates. Empty for non-text keys and releases.
    pub text: String,
}

impl KeyEvent {
    /// Create a new key event with no modifiers, Press kind and no text.
    #[must_use]
    pub const fn new(code: KeyCode) -> Self {
        Self {
            code,
            modifiers: Modifiers::NONE,
            kind: KeyEventKind::Press,
            shifted_key: None,
            text: String::new(),
        }
    }

    /// Create a key event with modifiers.
    #[must_use]
    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    /// Create a key event with a specific kind.
    #[must_use]
    pub fn with_kind(mut self, kind: KeyEventKind) -> Self {
        self.kind = kind;
        self
    }

    /// Create a key event carrying the given text.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Check if this is a specific character key.
    #[must_use]
    pub fn is_char(&self, c: char) -> bool {
        matches!(self.code, KeyCode::Char(ch) if ch == c)
    }

    /// Check if Ctrl modifier is held.
    #[must_use]
    pub const fn ctrl(&self) -> bool {
        self.modifiers.contains(Modifiers::CTRL)
    }

    /// Check if Alt modifier is held.
    #[must_use]
    pub const fn alt(&self) -> bool {
        self.modifiers.contains(Modifiers::ALT)
    }

    /// Check if Shift modifier is held.
    #[must_use]
    pub const fn shift(&self) -> bool {
        self.modifiers.contains(Modifiers::SHIFT)
    }

    /// True for press and repeat events.
    #[must_use]
    pub const fn is_press_or_repeat(&self) -> bool {
        matches!(self.kind, KeyEventKind::Press | KeyEventKind::Repeat)
    }

    /// Check whether this event matches a shortcut such as `"ctrl+c"`.
    ///
    /// Returns `false` for shortcuts that do not parse.
    #[must_use]
    pub fn matches(&self, shortcut: &str) -> bool {
        parse_shortcut(shortcut).is_some_and(|s| s.matches(self))
    }

    /// Like [`KeyEvent::matches`], restricted to press and repeat events.
    #[must_use]
    pub fn matches_press_or_repeat(&self, shortcut: &str) -> bool {
        self.is_press_or_repeat() && self.matches(shortcut)
    }
}

/// Key codes for keyboard events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCode {
    /// A regular character key. Letters are reported in lowercase; shift is a modifier.
    Char(char),
    Enter,
    Escape,
    Backspace,
    Tab,
    Delete,
    Insert,
    Home,
    End,
    PageUp,
    PageDown,
    Up,
    Down,
    Left,
    Right,
    /// Function key (F1-F35).
    F(u8),
    CapsLock,
    ScrollLock,
    NumLock,
    PrintScreen,
    Pause,
    Menu,
}

/// The type of key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeyEventKind {
    /// Key was pressed (default when not distinguishable).
    #[default]
    Press,

    /// Key is being held (repeat event).
    Repeat,

    /// Key was released.
    Release,
}

bitflags! {
    /// Modifier keys that can be held during a key event.
    ///
    /// Bit positions match the kitty keyboard protocol encoding
    /// (`value = 1 + bits`), so CSI parameters convert directly.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Modifiers: u8 {
        /// No modifiers.
        const NONE      = 0b0000_0000;
        const SHIFT     = 0b0000_0001;
        /// Alt/Option key.
        const ALT       = 0b0000_0010;
        const CTRL      = 0b0000_0100;
        /// Super/Command key.
        const SUPER     = 0b0000_1000;
        const HYPER     = 0b0001_0000;
        const META      = 0b0010_0000;
        const CAPS_LOCK = 0b0100_0000;
        const NUM_LOCK  = 0b1000_0000;
    }
}

impl Default for Modifiers {
    fn default() -> Self {
        Self::NONE
    }
}

impl Modifiers {
    /// Modifiers that participate in shortcut matching.
    #[must_use]
    pub fn without_locks(self) -> Self {
        self - (Self::CAPS_LOCK | Self::NUM_LOCK)
    }

    /// Decode an xterm/kitty modifier parameter (`1 + bits`).
    #[must_use]
    pub fn from_csi_param(value: u32) -> Self {
        let bits = value.saturating_sub(1);
        Self::from_bits_truncate(u8::try_from(bits & 0xFF).unwrap_or(0))
    }
}

/// A parsed shortcut like `ctrl+shift+a`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortcut {
    pub code: KeyCode,
    pub modifiers: Modifiers,
}

impl Shortcut {
    /// Whether `event` is this key with exactly these modifiers (locks ignored).
    #[must_use]
    pub fn matches(&self, event: &KeyEvent) -> bool {
        event.code == self.code && event.modifiers.without_locks() == self.modifiers
    }
}

/// Parse a shortcut string. Parts are separated by `+`; the last non-modifier
/// part names the key.
#[must_use]
pub fn parse_shortcut(input: &str) -> Option<Shortcut> {
    let trimmed = input.trim().to_lowercase();
    if trimmed.is_empty() {
        return None;
    }
    // "ctrl++" names the plus key.
    let (head, plus_key) = match trimmed.strip_suffix("++") {
        Some(head) => (head.to_string(), true),
        None => (trimmed, false),
    };

    let mut modifiers = Modifiers::NONE;
    let mut code = plus_key.then_some(KeyCode::Char('+'));
    for part in head.split('+').map(str::trim).filter(|p| !p.is_empty()) {
        match part {
            "ctrl" | "control" => modifiers |= Modifiers::CTRL,
            "alt" | "opt" | "option" => modifiers |= Modifiers::ALT,
            "shift" => modifiers |= Modifiers::SHIFT,
            "super" | "cmd" | "command" => modifiers |= Modifiers::SUPER,
            "hyper" => modifiers |= Modifiers::HYPER,
            "meta" => modifiers |= Modifiers::META,
            key => {
                if code.is_some() {
                    return None;
                }
                code = Some(parse_key_name(key)?);
            }
        }
    }

    Some(Shortcut {
        code: code?,
        modifiers,
    })
}

fn parse_key_name(name: &str) -> Option<KeyCode> {
    let code = match name {
        "enter" | "return" => KeyCode::Enter,
        "esc" | "escape" => KeyCode::Escape,
        "tab" => KeyCode::Tab,
        "backspace" => KeyCode::Backspace,
        "delete" | "del" => KeyCode::Delete,
        "insert" | "ins" => KeyCode::Insert,
        "home" => KeyCode::Home,
        "end" => KeyCode::End,
        "page_up" | "pageup" | "pgup" => KeyCode::PageUp,
        "page_down" | "pagedown" | "pgdn" => KeyCode::PageDown,
        "up" => KeyCode::Up,
        "down" => KeyCode::Down,
        "left" => KeyCode::Left,
        "right" => KeyCode::Right,
        "space" => KeyCode::Char(' '),
        "plus" => KeyCode::Char('+'),
        "caps_lock" => KeyCode::CapsLock,
        "scroll_lock" => KeyCode::ScrollLock,
        "num_lock" => KeyCode::NumLock,
        "print_screen" => KeyCode::PrintScreen,
        "pause" => KeyCode::Pause,
        "menu" => KeyCode::Menu,
        _ => {
            let mut chars = name.chars();
            let first = chars.next()?;
            if chars.as_str().is_empty() {
                return Some(KeyCode::Char(first));
            }
            let n: u8 = name.strip_prefix('f')?.parse().ok()?;
            if !(1..=35).contains(&n) {
                return None;
            }
            KeyCode::F(n)
        }
    };
    Some(code)
}
