//! Terminal palette shared by the stage spinners and the reports.

use std::fmt::Display;

use console::{style, StyledObject};

fn paint(text: impl Display) -> StyledObject<String> {
    style(text.to_string())
}

/// Counts, pending stages and empty-result notices.
pub fn notice(text: impl Display) -> StyledObject<String> {
    paint(text).bright().yellow()
}

pub fn success(text: impl Display) -> StyledObject<String> {
    paint(text).bright().green()
}

pub fn failure(text: impl Display) -> StyledObject<String> {
    paint(text).bright().red()
}

/// Identifiers: dataset keys, branch names.
pub fn accent(text: impl Display) -> StyledObject<String> {
    paint(text).cyan()
}

pub fn muted(text: impl Display) -> StyledObject<String> {
    paint(text).dim()
}

pub fn strong(text: impl Display) -> StyledObject<String> {
    paint(text).bright()
}

pub fn banner(text: impl Display) -> StyledObject<String> {
    paint(text).magenta().bold()
}
