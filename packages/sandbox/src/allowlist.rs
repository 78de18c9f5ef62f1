// ABOUTME: Command allowlist policy for commands run inside sandboxes
// ABOUTME: Pure membership check on the executable name, no shell interpretation

use std::collections::BTreeSet;

/// Set of executable names permitted inside an environment
///
/// This is a membership check on the first whitespace-separated token only. It does
/// not sanitize arguments, so callers must never hand the raw string to a shell.
#[derive(Debug, Clone, Default)]
pub struct CommandAllowlist {
    allowed: BTreeSet<String>,
}

impl CommandAllowlist {
    pub fn new<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: commands
                .into_iter()
                .map(Into::into)
                .filter(|c: &String| !c.trim().is_empty())
                .collect(),
        }
    }

    pub fn is_allowed(&self, command: &str) -> bool {
        match command.split_whitespace().next() {
            Some(executable) => self.allowed.contains(executable),
            None => false,
        }
    }

    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(String::as_str)
    }
}
