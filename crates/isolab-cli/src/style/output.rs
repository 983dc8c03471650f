//! Output helper functions for consistent styled messages.

use super::colors::SemanticStyle;

/// Prints an error message with an X mark.
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".error(), msg);
}

/// Prints a warning message with a warning symbol.
pub fn print_warn(msg: &str) {
    println!("{} {}", "⚠".warning(), msg);
}

/// Prints a hint/suggestion with an arrow.
pub fn print_hint(msg: &str) {
    println!("{} {}", "→".muted(), msg.muted());
}
