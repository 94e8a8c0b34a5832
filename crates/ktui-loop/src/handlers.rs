#![forbid(unsafe_code)]

//! Application hooks.
//!
//! Every hook is optional; an unset hook is a no-op. Hooks run on the loop
//! thread, one at a time, and receive the [`LoopContext`] so they can queue
//! output, manage timers or quit.

use std::fmt;

use ktui_core::event::KeyEvent;

use crate::error::HandlerResult;
use crate::event_loop::LoopContext;
use crate::terminal::ScreenSize;

/// What a key hook did with an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Skip the built-in bindings and text delivery for this event.
    Handled,
    /// Let the loop apply its built-in bindings (ctrl+c, ctrl+z) and deliver
    /// the event's text.
    #[default]
    Unhandled,
}

/// Where a piece of text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOrigin {
    /// Text attached to a decoded key event.
    KeyEvent,
    /// A plain character typed on a terminal without key reporting.
    Typed,
    /// Part of a bracketed paste.
    Paste,
}

impl TextOrigin {
    #[must_use]
    pub const fn from_key_event(self) -> bool {
        matches!(self, TextOrigin::KeyEvent)
    }

    #[must_use]
    pub const fn in_bracketed_paste(self) -> bool {
        matches!(self, TextOrigin::Paste)
    }
}

pub type InitializeHook = Box<dyn FnMut(&mut LoopContext) -> HandlerResult<Option<String>>>;
pub type KeyEventHook = Box<dyn FnMut(&mut LoopContext, &KeyEvent) -> HandlerResult<KeyOutcome>>;
pub type TextHook = Box<dyn FnMut(&mut LoopContext, &str, TextOrigin) -> HandlerResult>;
pub type ResizeHook = Box<dyn FnMut(&mut LoopContext, ScreenSize, ScreenSize) -> HandlerResult>;
pub type NotifyHook = Box<dyn FnMut(&mut LoopContext) -> HandlerResult>;
pub type BytesHook = Box<dyn FnMut(&mut LoopContext, &[u8]) -> HandlerResult>;

/// The set of application hooks a [`Loop`](crate::Loop) calls.
#[derive(Default)]
pub struct Handlers {
    /// Runs once after the terminal entered its run state. The returned
    /// string, if any, is written during shutdown before the exit codes.
    pub on_initialize: Option<InitializeHook>,
    pub on_key_event: Option<KeyEventHook>,
    pub on_text: Option<TextHook>,
    /// Receives the size before and after a window change.
    pub on_resize: Option<ResizeHook>,
    /// Fires each time the output buffer goes from non-empty to empty.
    pub on_write_complete: Option<NotifyHook>,
    /// Remote-control responses, with the `@kitty-cmd` marker stripped.
    pub on_rc_response: Option<BytesHook>,
    /// Every chunk read from the terminal, before decoding.
    pub on_received_data: Option<BytesHook>,
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("on_initialize", &self.on_initialize.is_some())
            .field("on_key_event", &self.on_key_event.is_some())
            .field("on_text", &self.on_text.is_some())
            .field("on_resize", &self.on_resize.is_some())
            .field("on_write_complete", &self.on_write_complete.is_some())
            .field("on_rc_response", &self.on_rc_response.is_some())
            .field("on_received_data", &self.on_received_data.is_some())
            .finish()
    }
}

impl Handlers {
    pub(crate) fn initialize(&mut self, cx: &mut LoopContext) -> HandlerResult<Option<String>> {
        match self.on_initialize.as_mut() {
            Some(hook) => hook(cx),
            None => Ok(None),
        }
    }

    pub(crate) fn key_event(
        &mut self,
        cx: &mut LoopContext,
        event: &KeyEvent,
    ) -> HandlerResult<KeyOutcome> {
        match self.on_key_event.as_mut() {
            Some(hook) => hook(cx, event),
            None => Ok(KeyOutcome::Unhandled),
        }
    }

    pub(crate) fn text(
        &mut self,
        cx: &mut LoopContext,
        text: &str,
        origin: TextOrigin,
    ) -> HandlerResult {
        match self.on_text.as_mut() {
            Some(hook) => hook(cx, text, origin),
            None => Ok(()),
        }
    }

    pub(crate) fn wants_resize(&self) -> bool {
        self.on_resize.is_some()
    }

    pub(crate) fn resize(
        &mut self,
        cx: &mut LoopContext,
        old: ScreenSize,
        new: ScreenSize,
    ) -> HandlerResult {
        match self.on_resize.as_mut() {
            Some(hook) => hook(cx, old, new),
            None => Ok(()),
        }
    }

    pub(crate) fn write_complete(&mut self, cx: &mut LoopContext) -> HandlerResult {
        match self.on_write_complete.as_mut() {
            Some(hook) => hook(cx),
            None => Ok(()),
        }
    }

    pub(crate) fn rc_response(&mut self, cx: &mut LoopContext, payload: &[u8]) -> HandlerResult {
        match self.on_rc_response.as_mut() {
            Some(hook) => hook(cx, payload),
            None => Ok(()),
        }
    }

    pub(crate) fn received_data(&mut self, cx: &mut LoopContext, data: &[u8]) -> HandlerResult {
        match self.on_received_data.as_mut() {
            Some(hook) => hook(cx, data),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_origin_flags() {
        assert!(TextOrigin::KeyEvent.from_key_event());
        assert!(!TextOrigin::KeyEvent.in_bracketed_paste());
        assert!(!TextOrigin::Typed.from_key_event());
        assert!(!TextOrigin::Typed.in_bracketed_paste());
        assert!(TextOrigin::Paste.in_bracketed_paste());
        assert!(!TextOrigin::Paste.from_key_event());
    }

    #[test]
    fn unset_hooks_are_no_ops() {
        let mut handlers = Handlers::default();
        let mut cx = LoopContext::detached();
        assert_eq!(handlers.initialize(&mut cx).unwrap(), None);
        let event = KeyEvent::new(ktui_core::event::KeyCode::Enter);
        assert_eq!(
            handlers.key_event(&mut cx, &event).unwrap(),
            KeyOutcome::Unhandled
        );
        handlers.text(&mut cx, "x", TextOrigin::Typed).unwrap();
        handlers.rc_response(&mut cx, b"").unwrap();
        handlers.received_data(&mut cx, b"").unwrap();
        handlers.write_complete(&mut cx).unwrap();
        assert!(!handlers.wants_resize());
    }

    #[test]
    fn debug_lists_set_hooks() {
        let handlers = Handlers {
            on_text: Some(Box::new(|_, _, _| Ok(()))),
            ..Handlers::default()
        };
        let dbg = format!("{handlers:?}");
        assert!(dbg.contains("on_text: true"));
        assert!(dbg.contains("on_resize: false"));
    }
}
