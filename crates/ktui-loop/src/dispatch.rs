#![forbid(unsafe_code)]

//! Routing of decoded input and signal records to application hooks.

use ktui_core::csi_key::{key_event_from_csi, key_event_from_ss3};
use ktui_core::escape_decoder::EscapeHandler;
use ktui_core::event::{KeyCode, KeyEvent, Modifiers};

use crate::error::{HandlerError, HandlerResult};
use crate::event_loop::LoopContext;
use crate::handlers::{Handlers, KeyOutcome, TextOrigin};
use crate::signals::{DeathSignal, LoopSignal};

/// DCS payload prefix marking a remote-control response.
const RC_RESPONSE_MARKER: &[u8] = b"@kitty-cmd";

/// Borrows the hooks and the context for the duration of one decoder feed or
/// one signal drain.
pub(crate) struct InputDispatcher<'a> {
    pub(crate) handlers: &'a mut Handlers,
    pub(crate) cx: &'a mut LoopContext,
}

impl InputDispatcher<'_> {
    fn key_event(&mut self, event: KeyEvent) -> HandlerResult {
        if self.handlers.key_event(self.cx, &event)? == KeyOutcome::Handled {
            return Ok(());
        }
        if event.matches_press_or_repeat("ctrl+c") {
            return self.signal(LoopSignal::Int);
        }
        if event.matches_press_or_repeat("ctrl+z") {
            return self.signal(LoopSignal::Tstp);
        }
        if !event.text.is_empty() {
            return self.handlers.text(self.cx, &event.text, TextOrigin::KeyEvent);
        }
        Ok(())
    }

    /// Apply the loop's reaction to a signal record.
    pub(crate) fn signal(&mut self, signal: LoopSignal) -> HandlerResult {
        tracing::debug!(signal = signal.name(), "handling signal");
        match signal {
            LoopSignal::Int => self.cx.terminate(DeathSignal::Int),
            LoopSignal::Term => self.cx.terminate(DeathSignal::Term),
            LoopSignal::Hup => {
                // The terminal is gone; writing to it at shutdown would hang or fail.
                self.cx.flush_on_shutdown = false;
                self.cx.terminate(DeathSignal::Hup);
            }
            LoopSignal::Winch => {
                self.cx.invalidate_screen_size();
                if self.handlers.wants_resize() {
                    let old = self.cx.cached_screen_size();
                    let new = self.cx.screen_size()?;
                    self.handlers.resize(self.cx, old, new)?;
                }
            }
            LoopSignal::Tstp | LoopSignal::Pipe => {}
        }
        Ok(())
    }
}

impl EscapeHandler for InputDispatcher<'_> {
    type Error = HandlerError;

    fn handle_csi(&mut self, body: &[u8]) -> HandlerResult {
        match key_event_from_csi(body) {
            Some(event) => self.key_event(event),
            None => Ok(()),
        }
    }

    fn handle_char(&mut self, ch: char, in_bracketed_paste: bool) -> HandlerResult {
        if in_bracketed_paste {
            let mut buf = [0u8; 4];
            return self
                .handlers
                .text(self.cx, ch.encode_utf8(&mut buf), TextOrigin::Paste);
        }
        if let Some(event) = control_key(ch) {
            return self.key_event(event);
        }
        let mut buf = [0u8; 4];
        self.handlers
            .text(self.cx, ch.encode_utf8(&mut buf), TextOrigin::Typed)
    }

    fn handle_ss3(&mut self, final_byte: u8) -> HandlerResult {
        match key_event_from_ss3(final_byte) {
            Some(event) => self.key_event(event),
            None => Ok(()),
        }
    }

    fn handle_alt_char(&mut self, ch: char) -> HandlerResult {
        let event = control_key(ch).unwrap_or_else(|| KeyEvent::new(KeyCode::Char(ch)));
        let modifiers = event.modifiers | Modifiers::ALT;
        self.key_event(event.with_modifiers(modifiers))
    }

    fn handle_dcs(&mut self, payload: &[u8]) -> HandlerResult {
        match payload.strip_prefix(RC_RESPONSE_MARKER) {
            Some(response) => self.handlers.rc_response(self.cx, response),
            None => Ok(()),
        }
    }
}

/// Key event for a C0 control byte typed on a legacy terminal.
fn control_key(ch: char) -> Option<KeyEvent> {
    let byte = u8::try_from(u32::from(ch)).ok()?;
    let event = match byte {
        0x0d => KeyEvent::new(KeyCode::Enter),
        0x09 => KeyEvent::new(KeyCode::Tab),
        0x7f => KeyEvent::new(KeyCode::Backspace),
        0x1b => KeyEvent::new(KeyCode::Escape),
        0x00 => KeyEvent::new(KeyCode::Char(' ')).with_modifiers(Modifiers::CTRL),
        0x01..=0x1a => {
            KeyEvent::new(KeyCode::Char(char::from(b'a' + byte - 1))).with_modifiers(Modifiers::CTRL)
        }
        0x1c..=0x1f => {
            KeyEvent::new(KeyCode::Char(char::from(byte + 0x40))).with_modifiers(Modifiers::CTRL)
        }
        _ => return None,
    };
    Some(event)
}
