#![forbid(unsafe_code)]

//! Escape sequence decoder.
//!
//! Splits the terminal input byte stream into escape-sequence categories and
//! plain characters, invoking an [`EscapeHandler`] synchronously for each
//! complete item. The decoder knows nothing about keys: CSI bodies are handed
//! over verbatim and interpreted by the caller.
//!
//! # Design
//!
//! The decoder is a state machine that handles:
//! - UTF-8 multi-byte characters
//! - CSI sequences (`ESC [` ... final byte in `0x40..=0x7E`)
//! - SS3 sequences (`ESC O` + one byte), used by xterm for F1-F4 and by
//!   application cursor mode for arrows, Home and End
//! - `ESC` + printable ASCII, the legacy encoding of Alt+key
//! - String sequences: OSC (`ESC ]`), DCS (`ESC P`), APC (`ESC _`),
//!   PM (`ESC ^`) and SOS (`ESC X`), terminated by ST (`ESC \`), or BEL for OSC
//! - Bracketed paste markers (`CSI 200~` / `CSI 201~`), which are consumed here
//!   and surface only as the `in_bracketed_paste` flag on characters
//!
//! # DoS Protection
//!
//! - CSI sequences: 256 bytes max
//! - String sequences: 1MB max
//!
//! Overlong sequences are consumed up to their terminator and dropped, so the
//! decoder stays aligned with the stream.

/// DoS protection: maximum CSI sequence length.
const MAX_CSI_LEN: usize = 256;

/// DoS protection: maximum string sequence payload length.
const MAX_STRING_LEN: usize = 1024 * 1024;

const ESC: u8 = 0x1B;
const BEL: u8 = 0x07;
const CAN: u8 = 0x18;
const SUB: u8 = 0x1A;

/// Callbacks invoked by [`EscapeDecoder::feed`].
///
/// Every method except [`EscapeHandler::handle_csi`] and
/// [`EscapeHandler::handle_char`] has a default. String sequences and SS3 are
/// ignored; an Alt-prefixed character falls back to ESC followed by the
/// character. An error returned by any method aborts the current `feed` call
/// and is returned from it.
pub trait EscapeHandler {
    type Error;

    /// A complete CSI sequence: the bytes after `ESC [`, including the final byte.
    fn handle_csi(&mut self, body: &[u8]) -> Result<(), Self::Error>;

    /// A decoded character outside any escape sequence.
    fn handle_char(&mut self, ch: char, in_bracketed_paste: bool) -> Result<(), Self::Error>;

    /// The byte following `ESC O`.
    fn handle_ss3(&mut self, _final_byte: u8) -> Result<(), Self::Error> {
        Ok(())
    }

    /// A printable ASCII character or DEL preceded by ESC, outside paste.
    fn handle_alt_char(&mut self, ch: char) -> Result<(), Self::Error> {
        self.handle_char('\x1b', false)?;
        self.handle_char(ch, false)
    }

    /// OSC payload, without introducer and terminator.
    fn handle_osc(&mut self, _payload: &[u8]) -> Result<(), Self::Error> {
        Ok(())
    }

    /// DCS payload, without introducer and terminator.
    fn handle_dcs(&mut self, _payload: &[u8]) -> Result<(), Self::Error> {
        Ok(())
    }

    fn handle_apc(&mut self, _payload: &[u8]) -> Result<(), Self::Error> {
        Ok(())
    }

    fn handle_sos(&mut self, _payload: &[u8]) -> Result<(), Self::Error> {
        Ok(())
    }

    fn handle_pm(&mut self, _payload: &[u8]) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// String sequence categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StringKind {
    Osc,
    Dcs,
    Apc,
    Sos,
    Pm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum DecoderState {
    /// Plain characters.
    #[default]
    Normal,
    /// After ESC.
    Escape,
    /// Collecting a CSI body.
    Csi,
    /// After `ESC O`.
    Ss3,
    /// Collecting a string payload.
    Str(StringKind),
    /// After ESC inside a string payload (possible ST).
    StrEscape(StringKind),
}

/// Incremental escape sequence decoder.
///
/// Sequences may be split across `feed` calls arbitrarily.
#[derive(Debug, Default)]
pub struct EscapeDecoder {
    state: DecoderState,
    /// CSI body or string payload collected so far.
    buffer: Vec<u8>,
    /// The current sequence exceeded its limit and will be dropped.
    overflowed: bool,
    utf8_buffer: [u8; 4],
    utf8_len: u8,
    utf8_expected: u8,
    in_paste: bool,
}

impl EscapeDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return to the initial state, discarding any partial sequence.
    pub fn reset(&mut self) {
        self.state = DecoderState::Normal;
        self.buffer.clear();
        self.overflowed = false;
        self.utf8_len = 0;
        self.utf8_expected = 0;
        self.in_paste = false;
    }

    /// Whether the decoder is between `CSI 200~` and `CSI 201~`.
    #[must_use]
    pub fn in_bracketed_paste(&self) -> bool {
        self.in_paste
    }

    /// Decode `data`, invoking `handler` for every completed item.
    pub fn feed<H: EscapeHandler>(&mut self, data: &[u8], handler: &mut H) -> Result<(), H::Error> {
        for &byte in data {
            match self.state {
                DecoderState::Normal => self.process_normal(byte, handler)?,
                DecoderState::Escape => self.process_escape(byte, handler)?,
                DecoderState::Csi => self.process_csi(byte, handler)?,
                DecoderState::Ss3 => self.process_ss3(byte, handler)?,
                DecoderState::Str(kind) => self.process_string(kind, byte, handler)?,
                DecoderState::StrEscape(kind) => self.process_string_escape(kind, byte, handler)?,
            }
        }
        Ok(())
    }

    fn process_normal<H: EscapeHandler>(&mut self, byte: u8, handler: &mut H) -> Result<(), H::Error> {
        if self.utf8_expected > 0 {
            if byte & 0xC0 == 0x80 {
                self.utf8_buffer[self.utf8_len as usize] = byte;
                self.utf8_len += 1;
                if self.utf8_len == self.utf8_expected {
                    let len = self.utf8_len as usize;
                    self.utf8_len = 0;
                    self.utf8_expected = 0;
                    if let Some(ch) = std::str::from_utf8(&self.utf8_buffer[..len])
                        .ok()
                        .and_then(|s| s.chars().next())
                    {
                        return handler.handle_char(ch, self.in_paste);
                    }
                }
                return Ok(());
            }
            // Truncated sequence: drop it and treat this byte afresh.
            self.utf8_len = 0;
            self.utf8_expected = 0;
        }

        match byte {
            ESC => {
                self.state = DecoderState::Escape;
                Ok(())
            }
            0x00..=0x7F => handler.handle_char(char::from(byte), self.in_paste),
            0xC0..=0xDF => self.start_utf8(byte, 2),
            0xE0..=0xEF => self.start_utf8(byte, 3),
            0xF0..=0xF7 => self.start_utf8(byte, 4),
            _ => Ok(()),
        }
    }

    fn start_utf8<E>(&mut self, lead: u8, expected: u8) -> Result<(), E> {
        self.utf8_buffer[0] = lead;
        self.utf8_len = 1;
        self.utf8_expected = expected;
        Ok(())
    }

    fn process_escape<H: EscapeHandler>(&mut self, byte: u8, handler: &mut H) -> Result<(), H::Error> {
        let next = match byte {
            b'[' => DecoderState::Csi,
            b']' => DecoderState::Str(StringKind::Osc),
            b'P' => DecoderState::Str(StringKind::Dcs),
            b'_' => DecoderState::Str(StringKind::Apc),
            b'X' => DecoderState::Str(StringKind::Sos),
            b'^' => DecoderState::Str(StringKind::Pm),
            b'O' if !self.in_paste => {
                self.state = DecoderState::Ss3;
                return Ok(());
            }
            0x20..=0x7F if !self.in_paste => {
                self.state = DecoderState::Normal;
                return handler.handle_alt_char(char::from(byte));
            }
            _ => {
                // Not an introducer: the ESC stands for itself.
                self.state = DecoderState::Normal;
                handler.handle_char('\x1b', self.in_paste)?;
                return self.process_normal(byte, handler);
            }
        };
        self.buffer.clear();
        self.overflowed = false;
        self.state = next;
        Ok(())
    }

    fn process_ss3<H: EscapeHandler>(&mut self, byte: u8, handler: &mut H) -> Result<(), H::Error> {
        self.state = DecoderState::Normal;
        match byte {
            0x40..=0x7E => handler.handle_ss3(byte),
            _ => {
                // Alt+O followed by something unrelated.
                handler.handle_alt_char('O')?;
                self.process_normal(byte, handler)
            }
        }
    }

    fn process_csi<H: EscapeHandler>(&mut self, byte: u8, handler: &mut H) -> Result<(), H::Error> {
        match byte {
            ESC => {
                crate::trace!("CSI interrupted by ESC");
                self.state = DecoderState::Escape;
                Ok(())
            }
            CAN | SUB => {
                self.state = DecoderState::Normal;
                Ok(())
            }
            // Stray controls inside CSI are ignored.
            0x00..=0x1F => Ok(()),
            0x40..=0x7E => {
                self.state = DecoderState::Normal;
                if self.overflowed {
                    crate::debug!(len = self.buffer.len(), "dropping overlong CSI sequence");
                    self.overflowed = false;
                    self.buffer.clear();
                    return Ok(());
                }
                self.buffer.push(byte);
                let body = std::mem::take(&mut self.buffer);
                let result = self.dispatch_csi(&body, handler);
                // Hand the allocation back for the next sequence.
                self.buffer = body;
                self.buffer.clear();
                result
            }
            _ => {
                if self.buffer.len() >= MAX_CSI_LEN {
                    self.overflowed = true;
                } else {
                    self.buffer.push(byte);
                }
                Ok(())
            }
        }
    }

    fn dispatch_csi<H: EscapeHandler>(&mut self, body: &[u8], handler: &mut H) -> Result<(), H::Error> {
        match body {
            b"200~" => {
                self.in_paste = true;
                Ok(())
            }
            b"201~" => {
                self.in_paste = false;
                Ok(())
            }
            _ if self.in_paste => {
                // Pasted text that happens to contain escape codes stays text.
                handler.handle_char('\x1b', true)?;
                handler.handle_char('[', true)?;
                for &b in body {
                    handler.handle_char(char::from(b), true)?;
                }
                Ok(())
            }
            _ => handler.handle_csi(body),
        }
    }

    fn process_string<H: EscapeHandler>(
        &mut self,
        kind: StringKind,
        byte: u8,
        handler: &mut H,
    ) -> Result<(), H::Error> {
        match byte {
            ESC => {
                self.state = DecoderState::StrEscape(kind);
                Ok(())
            }
            BEL if kind == StringKind::Osc => self.finish_string(kind, handler),
            _ => {
                self.push_string_byte(byte);
                Ok(())
            }
        }
    }

    fn process_string_escape<H: EscapeHandler>(
        &mut self,
        kind: StringKind,
        byte: u8,
        handler: &mut H,
    ) -> Result<(), H::Error> {
        if byte == b'\\' {
            return self.finish_string(kind, handler);
        }
        // Not a terminator: keep the ESC as payload.
        self.push_string_byte(ESC);
        if byte == ESC {
            return Ok(());
        }
        self.push_string_byte(byte);
        self.state = DecoderState::Str(kind);
        Ok(())
    }

    fn push_string_byte(&mut self, byte: u8) {
        if self.buffer.len() >= MAX_STRING_LEN {
            self.overflowed = true;
        } else {
            self.buffer.push(byte);
        }
    }

    fn finish_string<H: EscapeHandler>(&mut self, kind: StringKind, handler: &mut H) -> Result<(), H::Error> {
        self.state = DecoderState::Normal;
        if self.overflowed {
            crate::warn!(?kind, "dropping overlong string sequence");
            self.overflowed = false;
            self.buffer.clear();
            return Ok(());
        }
        let payload = std::mem::take(&mut self.buffer);
        let result = match kind {
            StringKind::Osc => handler.handle_osc(&payload),
            StringKind::Dcs => handler.handle_dcs(&payload),
            StringKind::Apc => handler.handle_apc(&payload),
            StringKind::Sos => handler.handle_sos(&payload),
            StringKind::Pm => handler.handle_pm(&payload),
        };
        self.buffer = payload;
        self.buffer.clear();
        result
    }
}
