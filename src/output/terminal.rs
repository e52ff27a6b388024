// Terminal warnings and batch separators for volley

use std::io::IsTerminal;

use colored::*;

/// Width of the separator banner printed between batches
const BANNER_WIDTH: usize = 80;

/// User-facing warning and status sink.
///
/// Remote command output goes through the multiplexer; everything aimed at
/// the operator (warnings, banners, the pacing notice) goes through here.
pub struct Terminal {
    quiet: bool,
}

impl Terminal {
    pub fn new(quiet: bool) -> Self {
        // Respect NO_COLOR environment variable (https://no-color.org/)
        // Also disable colors if not a TTY
        if std::env::var("NO_COLOR").is_ok() || !std::io::stdout().is_terminal() {
            colored::control::set_override(false);
        }

        Terminal { quiet }
    }

    /// Print a warning to stderr. Warnings are never suppressed by quiet
    /// mode; per-host failures must stay visible.
    pub fn warn(&self, message: &str) {
        eprintln!("{} {}", "WARNING:".yellow().bold(), message);
    }

    /// Print a fatal error to stderr
    pub fn fatal(&self, message: &str) {
        eprintln!("{} {}", "FATAL:".red().bold(), message);
    }

    /// Print the separator banner between batches
    pub fn separator(&self) {
        if self.quiet {
            return;
        }
        println!("{}", "*".repeat(BANNER_WIDTH));
    }

    /// Print the pacing notice before sleeping between batches
    pub fn pacing_notice(&self, wait_secs: f64) {
        if self.quiet {
            return;
        }
        println!("Taking a nap for {} seconds...", wait_secs);
    }
}

impl Default for Terminal {
    fn default() -> Self {
        Terminal::new(false)
    }
}
