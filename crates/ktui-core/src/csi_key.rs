#![forbid(unsafe_code)]

//! CSI sequence → [`KeyEvent`] decoding.
//!
//! Handles both the legacy xterm encodings and the kitty keyboard protocol:
//!
//! | Form | Example | Meaning |
//! |------|---------|---------|
//! | `CSI [1;mods] {A-D,H,F,P,Q,R,S}` | `CSI 1;5A` | Ctrl+Up |
//! | `CSI number [;mods] ~` | `CSI 3~` | Delete |
//! | `CSI code[:shifted[:base]] [;mods[:kind]] [;text] u` | `CSI 97;5u` | Ctrl+a |
//!
//! The input is the CSI body: everything after `ESC [` up to and including the
//! final byte. Anything that is not a key (cursor reports, mouse reports, mode
//! reports) decodes to `None`.
//!
//! SS3 sequences (`ESC O P`, `ESC O A`) carry the same final bytes as the
//! letter form and decode through [`key_event_from_ss3`].

use crate::event::{KeyCode, KeyEvent, KeyEventKind, Modifiers};

/// Decode a CSI body into a key event.
#[must_use]
pub fn key_event_from_csi(body: &[u8]) -> Option<KeyEvent> {
    let (&final_byte, params) = body.split_last()?;
    let params = std::str::from_utf8(params).ok()?;
    // Private-marker sequences (`<`, `>`, `=`, `?`) are reports, never keys.
    if params.starts_with(['<', '>', '=', '?']) {
        return None;
    }

    match final_byte {
        b'u' => parse_kitty_key(params),
        b'~' => parse_tilde_key(params),
        b'A' | b'B' | b'C' | b'D' | b'H' | b'F' | b'P' | b'Q' | b'R' | b'S' => {
            parse_letter_key(final_byte, params)
        }
        b'Z' if params.is_empty() => {
            Some(KeyEvent::new(KeyCode::Tab).with_modifiers(Modifiers::SHIFT))
        }
        _ => None,
    }
}

/// Decode the final byte of an SS3 sequence (`ESC O x`) into a key event.
#[must_use]
pub fn key_event_from_ss3(final_byte: u8) -> Option<KeyEvent> {
    parse_letter_key(final_byte, "")
}

fn parse_letter_key(final_byte: u8, params: &str) -> Option<KeyEvent> {
    let code = match final_byte {
        b'A' => KeyCode::Up,
        b'B' => KeyCode::Down,
        b'C' => KeyCode::Right,
        b'D' => KeyCode::Left,
        b'H' => KeyCode::Home,
        b'F' => KeyCode::End,
        b'P' => KeyCode::F(1),
        b'Q' => KeyCode::F(2),
        b'R' => KeyCode::F(3),
        b'S' => KeyCode::F(4),
        _ => return None,
    };
    let mut fields = params.split(';');
    let first = fields.next().unwrap_or("");
    // With parameters the first one is always 1 for these keys; anything else
    // (for example `CSI 12;40R`, a cursor position report) is not a key.
    if !first.is_empty() && first != "1" {
        return None;
    }
    let (modifiers, kind) = modifiers_and_kind(fields.next().unwrap_or(""));
    Some(KeyEvent::new(code).with_modifiers(modifiers).with_kind(kind))
}

fn parse_tilde_key(params: &str) -> Option<KeyEvent> {
    let mut fields = params.split(';');
    let number: u32 = fields.next()?.parse().ok()?;
    let code = match number {
        1 | 7 => KeyCode::Home,
        2 => KeyCode::Insert,
        3 => KeyCode::Delete,
        4 | 8 => KeyCode::End,
        5 => KeyCode::PageUp,
        6 => KeyCode::PageDown,
        11 => KeyCode::F(1),
        12 => KeyCode::F(2),
        13 => KeyCode::F(3),
        14 => KeyCode::F(4),
        15 => KeyCode::F(5),
        17 => KeyCode::F(6),
        18 => KeyCode::F(7),
        19 => KeyCode::F(8),
        20 => KeyCode::F(9),
        21 => KeyCode::F(10),
        23 => KeyCode::F(11),
        24 => KeyCode::F(12),
        29 => KeyCode::Menu,
        _ => return None,
    };
    let (modifiers, kind) = modifiers_and_kind(fields.next().unwrap_or(""));
    Some(KeyEvent::new(code).with_modifiers(modifiers).with_kind(kind))
}

/// Parse kitty keyboard protocol CSI u sequences.
///
/// Format: `CSI unicode-key-code:shifted-key:base-key ; modifiers:event-type ; text-as-codepoints u`
fn parse_kitty_key(params: &str) -> Option<KeyEvent> {
    let mut fields = params.split(';');

    let mut key_part = fields.next().unwrap_or("").split(':');
    let key_number: u32 = match key_part.next() {
        Some("") | None => 1,
        Some(n) => n.parse().ok()?,
    };
    let shifted_key = key_part
        .next()
        .and_then(|s| s.parse::<u32>().ok())
        .and_then(char::from_u32);

    let (modifiers, kind) = modifiers_and_kind(fields.next().unwrap_or(""));

    let reported_text: Option<String> = fields.next().map(|text| {
        text.split(':')
            .filter_map(|cp| cp.parse::<u32>().ok())
            .filter_map(char::from_u32)
            .collect()
    });

    let code = kitty_keycode_to_keycode(key_number)?;
    let mut event = KeyEvent::new(code)
        .with_modifiers(modifiers)
        .with_kind(kind);
    event.shifted_key = shifted_key;
    if kind != KeyEventKind::Release {
        event.text = reported_text.unwrap_or_else(|| implied_text(&event));
    }
    Some(event)
}

/// Text a key produces when the terminal did not report it explicitly.
fn implied_text(event: &KeyEvent) -> String {
    let KeyCode::Char(c) = event.code else {
        return String::new();
    };
    if c.is_control() {
        return String::new();
    }
    let mods = event.modifiers.without_locks();
    if mods.is_empty() {
        return c.to_string();
    }
    if mods == Modifiers::SHIFT {
        return match event.shifted_key {
            Some(shifted) => shifted.to_string(),
            None => c.to_uppercase().collect(),
        };
    }
    String::new()
}

fn modifiers_and_kind(mod_part: &str) -> (Modifiers, KeyEventKind) {
    if mod_part.is_empty() {
        return (Modifiers::NONE, KeyEventKind::Press);
    }

    let mut parts = mod_part.split(':');
    let mod_value: u32 = parts.next().and_then(|v| v.parse().ok()).unwrap_or(1);
    let kind_value: u32 = parts.next().and_then(|v| v.parse().ok()).unwrap_or(1);

    let kind = match kind_value {
        2 => KeyEventKind::Repeat,
        3 => KeyEventKind::Release,
        _ => KeyEventKind::Press,
    };

    (Modifiers::from_csi_param(mod_value), kind)
}

fn kitty_keycode_to_keycode(key_code: u32) -> Option<KeyCode> {
    match key_code {
        // Legacy-compatible ASCII keys
        9 => Some(KeyCode::Tab),
        13 => Some(KeyCode::Enter),
        27 => Some(KeyCode::Escape),
        8 | 127 => Some(KeyCode::Backspace),
        // Kitty functional keys in the private use area
        57_344 => Some(KeyCode::Escape),
        57_345 => Some(KeyCode::Enter),
        57_346 => Some(KeyCode::Tab),
        57_347 => Some(KeyCode::Backspace),
        57_348 => Some(KeyCode::Insert),
        57_349 => Some(KeyCode::Delete),
        57_350 => Some(KeyCode::Left),
        57_351 => Some(KeyCode::Right),
        57_352 => Some(KeyCode::Up),
        57_353 => Some(KeyCode::Down),
        57_354 => Some(KeyCode::PageUp),
        57_355 => Some(KeyCode::PageDown),
        57_356 => Some(KeyCode::Home),
        57_357 => Some(KeyCode::End),
        57_358 => Some(KeyCode::CapsLock),
        57_359 => Some(KeyCode::ScrollLock),
        57_360 => Some(KeyCode::NumLock),
        57_361 => Some(KeyCode::PrintScreen),
        57_362 => Some(KeyCode::Pause),
        57_363 => Some(KeyCode::Menu),
        // F1-F35
        57_364..=57_398 => u8::try_from(key_code - 57_364 + 1).ok().map(KeyCode::F),
        // Keypad, media and modifier keys are not modelled.
        57_399..=63_743 => None,
        _ => char::from_u32(key_code)
            .filter(|c| !c.is_control())
            .map(KeyCode::Char),
    }
}
