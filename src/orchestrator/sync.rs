//! Incremental sync diff engine: pure comparison of two file revisions.
//!
//! The orchestrator turns a [`RevisionDiff`] into either direct writes into
//! the live sandbox filesystem or a full relaunch; the policy lives there,
//! the arithmetic lives here.

use crate::project::detect;
use crate::revision::FileRevision;

/// Delta between the last-applied revision and an incoming one.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RevisionDiff {
    /// Paths whose content differs, or that did not exist before. Sorted.
    pub changed: Vec<String>,
    /// Paths present before and absent now. Sorted.
    pub removed: Vec<String>,
    /// Whether the manifest's dependency union differs between the two.
    pub deps_changed: bool,
}

impl RevisionDiff {
    /// True when the incoming revision needs no action at all.
    pub fn is_noop(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty() && !self.deps_changed
    }
}

/// Result of one `sync()` call, for callers that care which path was taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Mid-launch or stopped: the revision was remembered for the next full
    /// launch, nothing was touched.
    Deferred,
    /// A removal or dependency change forced a full relaunch.
    Relaunched,
    /// Changed files were written directly into the live instance.
    Patched { written: usize },
}

/// Compute the delta between two revisions.
pub fn diff_revisions(old: &FileRevision, new: &FileRevision) -> RevisionDiff {
    let mut changed = Vec::new();
    let mut removed = Vec::new();

    for path in new.sorted_paths() {
        let entry = match new.get(path) {
            Some(e) => e,
            None => continue,
        };
        match old.get(path) {
            Some(previous) if previous.content == entry.content => {}
            _ => changed.push(path.to_string()),
        }
    }

    for path in old.sorted_paths() {
        if !new.contains(path) {
            removed.push(path.to_string());
        }
    }

    let deps_changed = detect::dependency_union(old) != detect::dependency_union(new);

    RevisionDiff {
        changed,
        removed,
        deps_changed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revision::FileEntry;

    fn revision(entries: &[(&str, &str)]) -> FileRevision {
        entries
            .iter()
            .map(|(p, c)| (p.to_string(), FileEntry::text(*c, "")))
            .collect()
    }

    #[test]
    fn identical_revisions_are_noop() {
        let r1 = revision(&[("a.txt", "one"), ("b.txt", "two")]);
        let r2 = r1.clone();
        assert!(diff_revisions(&r1, &r2).is_noop());
    }

    #[test]
    fn changed_and_new_paths_are_reported() {
        let r1 = revision(&[("a.txt", "one"), ("b.txt", "two")]);
        let r2 = revision(&[("a.txt", "one!"), ("b.txt", "two"), ("c.txt", "new")]);

        let diff = diff_revisions(&r1, &r2);
        assert_eq!(diff.changed, vec!["a.txt", "c.txt"]);
        assert!(diff.removed.is_empty());
        assert!(!diff.deps_changed);
    }

    #[test]
    fn removed_paths_are_reported() {
        let r1 = revision(&[("a.txt", "one"), ("b.txt", "two")]);
        let r2 = revision(&[("a.txt", "one")]);

        let diff = diff_revisions(&r1, &r2);
        assert!(diff.changed.is_empty());
        assert_eq!(diff.removed, vec!["b.txt"]);
    }

    #[test]
    fn dependency_addition_is_flagged() {
        let r1 = revision(&[("package.json", r#"{"dependencies": {"next": "15.0.0"}}"#)]);
        let r2 = revision(&[(
            "package.json",
            r#"{"dependencies": {"next": "15.0.0", "zod": "3.0.0"}}"#,
        )]);

        let diff = diff_revisions(&r1, &r2);
        assert!(diff.deps_changed);
        // The manifest text changed too, so it shows up as a changed path.
        assert_eq!(diff.changed, vec!["package.json"]);
    }

    #[test]
    fn manifest_reformat_without_dep_change_is_not_flagged() {
        let r1 = revision(&[("package.json", r#"{"dependencies": {"next": "15.0.0"}}"#)]);
        let r2 = revision(&[(
            "package.json",
            r#"{ "dependencies": { "next": "15.0.0" } }"#,
        )]);

        let diff = diff_revisions(&r1, &r2);
        assert!(!diff.deps_changed);
        assert_eq!(diff.changed, vec!["package.json"]);
    }

    #[test]
    fn dev_dependency_moves_count_via_union() {
        // Moving a package between groupings keeps the union identical.
        let r1 = revision(&[("package.json", r#"{"dependencies": {"vite": "6.0.0"}}"#)]);
        let r2 = revision(&[("package.json", r#"{"devDependencies": {"vite": "6.0.0"}}"#)]);
        assert!(!diff_revisions(&r1, &r2).deps_changed);
    }

    #[test]
    fn version_bump_is_a_dependency_change() {
        let r1 = revision(&[("package.json", r#"{"dependencies": {"vite": "5.0.0"}}"#)]);
        let r2 = revision(&[("package.json", r#"{"dependencies": {"vite": "6.0.0"}}"#)]);
        assert!(diff_revisions(&r1, &r2).deps_changed);
    }
}
