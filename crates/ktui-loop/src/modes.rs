#![forbid(unsafe_code)]

//! Terminal state entered at boot and left at shutdown.
//!
//! | Feature           | Enter                | Exit           |
//! |-------------------|----------------------|----------------|
//! | Alternate screen  | `CSI ? 1049 h`       | `CSI ? 1049 l` |
//! | Mouse tracking    | `CSI ? 100x;1006 h`  | `CSI ? 100x;1006 l` |
//! | Bracketed paste   | `CSI ? 2004 h`       | `CSI ? 2004 l` |
//! | Focus events      | `CSI ? 1004 h`       | `CSI ? 1004 l` |
//! | Kitty keyboard    | `CSI > flags u`      | `CSI < u`      |
//!
//! Exit codes undo the enter codes in reverse order and finish by showing the
//! cursor.

const ALT_SCREEN_ENTER: &str = "\x1b[?1049h";
const ALT_SCREEN_LEAVE: &str = "\x1b[?1049l";

const BRACKETED_PASTE_ENABLE: &str = "\x1b[?2004h";
const BRACKETED_PASTE_DISABLE: &str = "\x1b[?2004l";

const FOCUS_ENABLE: &str = "\x1b[?1004h";
const FOCUS_DISABLE: &str = "\x1b[?1004l";

const KITTY_KEYBOARD_POP: &str = "\x1b[<u";

const CURSOR_SHOW: &str = "\x1b[?25h";

/// Bell.
pub(crate) const BEL: &str = "\x07";

/// Which mouse events the terminal reports. Reports always use SGR encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MouseTracking {
    #[default]
    None,
    /// Button presses and releases (mode 1000).
    Buttons,
    /// Presses, releases and drags (mode 1002).
    ButtonsAndDrag,
    /// Every motion event (mode 1003).
    AnyMotion,
}

impl MouseTracking {
    const fn mode(self) -> Option<u16> {
        match self {
            MouseTracking::None => None,
            MouseTracking::Buttons => Some(1000),
            MouseTracking::ButtonsAndDrag => Some(1002),
            MouseTracking::AnyMotion => Some(1003),
        }
    }
}

/// Terminal features switched on for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalStateOptions {
    pub alternate_screen: bool,
    pub mouse_tracking: MouseTracking,
    pub bracketed_paste: bool,
    /// Progressive enhancement flags pushed with `CSI > flags u`; zero skips
    /// the push.
    pub kitty_keyboard_flags: u8,
    pub focus_tracking: bool,
}

impl Default for TerminalStateOptions {
    fn default() -> Self {
        Self {
            alternate_screen: true,
            mouse_tracking: MouseTracking::None,
            bracketed_paste: true,
            // Disambiguate, event types, alternate keys, all keys as escapes,
            // associated text.
            kitty_keyboard_flags: 0b1_1111,
            focus_tracking: false,
        }
    }
}

impl TerminalStateOptions {
    fn toggles(&self) -> Vec<(String, String)> {
        let mut toggles = Vec::new();
        if self.alternate_screen {
            toggles.push((ALT_SCREEN_ENTER.to_owned(), ALT_SCREEN_LEAVE.to_owned()));
        }
        if let Some(mode) = self.mouse_tracking.mode() {
            toggles.push((
                format!("\x1b[?{mode};1006h"),
                format!("\x1b[?{mode};1006l"),
            ));
        }
        if self.bracketed_paste {
            toggles.push((
                BRACKETED_PASTE_ENABLE.to_owned(),
                BRACKETED_PASTE_DISABLE.to_owned(),
            ));
        }
        if self.focus_tracking {
            toggles.push((FOCUS_ENABLE.to_owned(), FOCUS_DISABLE.to_owned()));
        }
        if self.kitty_keyboard_flags != 0 {
            toggles.push((
                format!("\x1b[>{}u", self.kitty_keyboard_flags),
                KITTY_KEYBOARD_POP.to_owned(),
            ));
        }
        toggles
    }

    /// Bytes that switch the terminal into the configured state.
    #[must_use]
    pub fn enter_codes(&self) -> String {
        self.toggles().into_iter().map(|(enter, _)| enter).collect()
    }

    /// Bytes that undo [`enter_codes`](Self::enter_codes).
    #[must_use]
    pub fn exit_codes(&self) -> String {
        let mut codes: String = self
            .toggles()
            .into_iter()
            .rev()
            .map(|(_, exit)| exit)
            .collect();
        codes.push_str(CURSOR_SHOW);
        codes
    }
}
