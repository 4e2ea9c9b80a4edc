//! Styled status output (component K, stdout-for-data / stderr-for-status).
//!
//! Primary output (morphology contents, `workspace`/`show-*` answers) goes
//! to plain `println!`. Everything here is diagnostic: it goes to stderr
//! through `anstream`, which strips the ANSI codes automatically when
//! stderr isn't a terminal.

use anstyle::{AnsiColor, Color, Style};
use color_print::cformat;

/// Repo-name header style in [`changelog`], applied programmatically rather
/// than through a `cformat!` tag since the repo name is untrusted input and
/// must not be interpreted as markup.
const REPO_HEADER: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green))).bold();

/// A plain informational line, e.g. "cloned baserock:morphs at master".
pub fn status(message: &str) {
    anstream::eprintln!("{}", cformat!("<cyan>{}</>", message));
}

/// A hint the user can act on, printed dim.
pub fn hint(message: &str) {
    anstream::eprintln!("{}", cformat!("<dim>{}</>", message));
}

/// A recoverable warning (e.g. best-effort cleanup failed).
pub fn warning(message: &str) {
    anstream::eprintln!("{}", cformat!("<yellow>{}</>", message));
}

/// The final top-level error line before a non-zero exit.
pub fn error(message: &str) {
    anstream::eprintln!("{}", cformat!("<red><bold>error:</> {}</>", message));
}

/// Print an `edit`'s [`crate::changelog::ChangeLog`], one line per
/// recorded message, grouped by repo. Only called when `--verbose`.
pub fn changelog(log: &crate::changelog::ChangeLog) {
    for (repo, messages) in log.iter() {
        anstream::eprintln!("{}{repo}{}:", REPO_HEADER.render(), REPO_HEADER.render_reset());
        for message in messages {
            anstream::eprintln!("{}", cformat!("  <dim>{}</>", message));
        }
    }
}
