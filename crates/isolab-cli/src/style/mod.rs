//! Terminal styling for scenario reports.
//!
//! Color is decided once at startup by [`init`]; every helper below reads
//! the resulting flag, so piped output and `NO_COLOR` stay plain.

use std::io::IsTerminal;
use std::sync::atomic::{AtomicBool, Ordering};

pub mod banner;
pub mod colors;
pub mod output;
pub mod spinner;
pub mod table;

pub use output::*;
pub use spinner::*;

static NO_COLOR: AtomicBool = AtomicBool::new(false);

/// Disables color when asked to, when `NO_COLOR` is set, or when stdout
/// is not a terminal.
pub fn init(no_color_flag: bool) {
    let plain = no_color_flag
        || std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty())
        || !std::io::stdout().is_terminal();
    set_no_color(plain);
}

pub fn set_no_color(value: bool) {
    NO_COLOR.store(value, Ordering::SeqCst);
}

pub fn no_color() -> bool {
    NO_COLOR.load(Ordering::SeqCst)
}
