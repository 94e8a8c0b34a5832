#![forbid(unsafe_code)]

//! Interactive demo of the ktui event loop.
//!
//! Echoes key events and text, updates the window title once a second,
//! reports resizes, and quits on `q`. Ctrl+C ends the run through the loop's
//! built-in binding, after which the process re-raises SIGINT.
//!
//! Environment:
//!
//! - `KTUI_LOG`: file to write logs to (nothing is logged if unset)
//! - `KTUI_LOG_FILTER`: `tracing` filter directives (default `info`)
//! - `KTUI_DEMO_MOUSE=1`: enable mouse tracking
//! - `KTUI_DEMO_MAIN_SCREEN=1`: stay on the main screen

use std::env;
use std::fs::OpenOptions;
use std::process;
use std::sync::Mutex;
use std::time::Duration;

use ktui_loop::{KeyOutcome, Loop, LoopContext, MouseTracking, ScreenSize};
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let Ok(path) = env::var("KTUI_LOG") else {
        return;
    };
    let file = match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("cannot open log file {path}: {e}");
            return;
        }
    };
    let filter =
        EnvFilter::try_from_env("KTUI_LOG_FILTER").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
}

fn flag(name: &str) -> bool {
    env::var(name).is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

fn line(cx: &mut LoopContext, text: &str) {
    cx.queue_write_string(text);
    cx.queue_write_string("\r\n");
}

fn describe(size: ScreenSize) -> String {
    format!(
        "{}x{} cells, {}x{} px",
        size.width_cells, size.height_cells, size.width_px, size.height_px
    )
}

fn main() {
    init_logging();

    let mut lp = Loop::new();
    if flag("KTUI_DEMO_MAIN_SCREEN") {
        lp.no_alternate_screen();
    }
    if flag("KTUI_DEMO_MOUSE") {
        lp.mouse_tracking(MouseTracking::ButtonsAndDrag);
    }

    lp.on_initialize(|cx| {
        let size = cx.screen_size()?;
        line(cx, "ktui demo: type something, q quits, ctrl+c interrupts");
        line(cx, &format!("screen: {}", describe(size)));
        // Reset colors on the way out.
        Ok(Some("\x1b[m".to_owned()))
    })
    .on_key_event(|cx, event| {
        if event.matches("q") {
            cx.quit(0);
            return Ok(KeyOutcome::Handled);
        }
        line(
            cx,
            &format!(
                "key {:?} mods {:?} {:?}",
                event.code, event.modifiers, event.kind
            ),
        );
        Ok(KeyOutcome::Unhandled)
    })
    .on_text(|cx, text, origin| {
        line(cx, &format!("text {text:?} ({origin:?})"));
        Ok(())
    })
    .on_resize(|cx, old, new| {
        line(
            cx,
            &format!("resized from {} to {}", describe(old), describe(new)),
        );
        Ok(())
    });

    let mut ticks = 0u64;
    lp.add_timer(Duration::from_secs(1), true, move |cx, _| {
        ticks += 1;
        cx.queue_write_string(&format!("\x1b]2;ktui demo: {ticks}s\x07"));
        Ok(())
    });

    if let Err(e) = lp.run() {
        eprintln!("ktui-demo: {e}");
        process::exit(1);
    }
    lp.kill_if_signalled();
    process::exit(lp.exit_code());
}
