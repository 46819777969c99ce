//! File revision snapshots: the flat `path → content` map handed to the
//! orchestrator by the editing surface on every meaningful edit.
//!
//! A revision is immutable once built. The orchestrator keeps exactly one
//! "last applied" revision for diffing; each incoming revision supersedes
//! the previous one in full.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Marker that the editing surface uses as placeholder content for files it
/// could not transfer as text (images, fonts, …).
pub const BINARY_PLACEHOLDER_PREFIX: &str = "// Binary file:";

/// Whether an entry carries real text or a binary placeholder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MediaKind {
    #[default]
    Text,
    BinaryPlaceholder,
}

/// One file in a revision: content plus the editor's language tag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub content: String,
    /// Editor language tag ("typescript", "shell", "html", …).
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub media: MediaKind,
}

impl FileEntry {
    pub fn text(content: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            language: language.into(),
            media: MediaKind::Text,
        }
    }

    /// Placeholder entry for a file the editor could not represent as text.
    pub fn binary_placeholder(name: &str) -> Self {
        Self {
            content: format!("{BINARY_PLACEHOLDER_PREFIX} {name}"),
            language: String::new(),
            media: MediaKind::BinaryPlaceholder,
        }
    }
}

/// One complete snapshot of the edited project.
///
/// Paths are slash-delimited and relative to the project root. Order is
/// irrelevant; lookups and iteration for deterministic output go through
/// [`sorted_paths`](Self::sorted_paths).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FileRevision {
    files: HashMap<String, FileEntry>,
}

impl FileRevision {
    pub fn new(files: HashMap<String, FileEntry>) -> Self {
        Self { files }
    }

    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FileEntry)> {
        self.files.iter()
    }

    /// Paths in lexicographic order, for deterministic traversal.
    pub fn sorted_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.files.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }
}

impl FromIterator<(String, FileEntry)> for FileRevision {
    fn from_iter<I: IntoIterator<Item = (String, FileEntry)>>(iter: I) -> Self {
        Self {
            files: iter.into_iter().collect(),
        }
    }
}
