use regex::Regex;

use crate::error::{ReconError, Result};

pub const DEFAULT_TICKET_PATTERN: &str = r"VSTS(\d+)";

/// Pulls a work item id out of a branch name.
///
/// The pattern is case-sensitive and must have a capture group for the id;
/// the first match in the branch wins.
#[derive(Debug, Clone)]
pub struct TicketExtractor {
    pattern: Regex,
}

impl TicketExtractor {
    /// # Errors
    ///
    /// Returns [`ReconError::Config`] if the pattern does not compile or has no
    /// capture group.
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| ReconError::Config(format!("Invalid ticket pattern '{pattern}': {e}")))?;
        if pattern.captures_len() < 2 {
            return Err(ReconError::Config(format!(
                "Ticket pattern '{pattern}' needs a capture group for the id"
            )));
        }
        Ok(Self { pattern })
    }

    pub fn extract(&self, branch: &str) -> Option<u64> {
        self.pattern
            .captures(branch)?
            .get(1)?
            .as_str()
            .parse()
            .ok()
    }
}

impl Default for TicketExtractor {
    fn default() -> Self {
        Self {
            pattern: Regex::new(DEFAULT_TICKET_PATTERN).expect("default ticket pattern compiles"),
        }
    }
}
