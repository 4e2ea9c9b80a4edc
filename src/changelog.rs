//! An explicit changelog value threaded through [`crate::edit::edit`],
//! replacing a mutable global accumulator on a long-lived plugin instance.

use indexmap::IndexMap;

/// Messages recorded against each logical repo touched by one `edit` call,
/// in the order they were recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeLog {
    entries: IndexMap<String, Vec<String>>,
}

impl ChangeLog {
    pub fn new() -> Self {
        ChangeLog::default()
    }

    pub fn record(&mut self, repo: impl Into<String>, message: impl Into<String>) {
        self.entries.entry(repo.into()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(repo, msgs)| (repo.as_str(), msgs.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_preserve_insertion_order_per_repo() {
        let mut log = ChangeLog::new();
        log.record("morphs", "set bar ref to new-feature");
        log.record("bar", "cloned at master");
        log.record("morphs", "set chunk baz ref to new-feature");

        let recorded: Vec<_> = log.iter().collect();
        assert_eq!(recorded[0].0, "morphs");
        assert_eq!(recorded[0].1.len(), 2);
        assert_eq!(recorded[1].0, "bar");
    }

    #[test]
    fn empty_changelog_reports_empty() {
        assert!(ChangeLog::new().is_empty());
    }
}
