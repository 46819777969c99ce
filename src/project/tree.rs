//! File Tree Builder: converts a flat revision into the nested directory
//! structure the sandbox mount API expects.
//!
//! The builder never fails a launch. Entries it cannot mount — dependency
//! caches, binary placeholders, malformed paths — are skipped and reported
//! back so the orchestrator can log them.

use crate::revision::{FileRevision, MediaKind};
use std::collections::BTreeMap;

/// Directories never mounted; the install step materializes them fresh.
const SKIP_DIRS: &[&str] = &["node_modules", ".next", ".git", "dist", "build", ".cache"];

/// Binary placeholders with these extensions are mounted anyway; browsers
/// request them and a 404 breaks rendering.
const ICON_EXTENSIONS: &[&str] = &["ico"];

/// One node in the mount tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileNode {
    File { contents: String },
    Directory { entries: BTreeMap<String, FileNode> },
}

/// Root of the mount tree, keyed by path segment.
pub type FileTree = BTreeMap<String, FileNode>;

/// Result of a build pass: the mountable tree plus everything left out.
#[derive(Debug, Default)]
pub struct BuiltTree {
    pub tree: FileTree,
    /// `(path, reason)` pairs for every skipped entry.
    pub skipped: Vec<(String, String)>,
}

/// Why an entry cannot be materialized in the sandbox, if it cannot.
/// Shared between the mount pass and the incremental-sync write pass.
pub fn exclusion_reason(path: &str, entry: &crate::revision::FileEntry) -> Option<String> {
    if let Some(dir) = skip_dir_segment(path) {
        return Some(format!("inside dependency cache `{dir}`"));
    }
    if entry.media == MediaKind::BinaryPlaceholder && !is_allowed_icon(path) {
        return Some("binary placeholder".to_string());
    }
    let segments: Vec<&str> = path.split('/').collect();
    if !segments_are_valid(&segments) {
        return Some("malformed path".to_string());
    }
    None
}

/// Build the mount tree for a revision.
pub fn build_tree(revision: &FileRevision) -> BuiltTree {
    let mut built = BuiltTree::default();

    for path in revision.sorted_paths() {
        let entry = match revision.get(path) {
            Some(e) => e,
            None => continue,
        };

        if let Some(reason) = exclusion_reason(path, entry) {
            built.skipped.push((path.to_string(), reason));
            continue;
        }

        let segments: Vec<&str> = path.split('/').collect();
        insert(&mut built.tree, &segments, &entry.content, path, &mut built.skipped);
    }

    built
}

fn insert(
    tree: &mut FileTree,
    segments: &[&str],
    contents: &str,
    full_path: &str,
    skipped: &mut Vec<(String, String)>,
) {
    let mut current = tree;
    for (i, segment) in segments.iter().enumerate() {
        let is_leaf = i == segments.len() - 1;
        if is_leaf {
            // A file cannot replace a directory another path already created.
            if matches!(current.get(*segment), Some(FileNode::Directory { .. })) {
                skipped.push((full_path.to_string(), "path collides with a directory".to_string()));
                return;
            }
            current.insert(
                (*segment).to_string(),
                FileNode::File {
                    contents: contents.to_string(),
                },
            );
        } else {
            let node = current
                .entry((*segment).to_string())
                .or_insert_with(|| FileNode::Directory {
                    entries: BTreeMap::new(),
                });
            match node {
                FileNode::Directory { entries } => current = entries,
                FileNode::File { .. } => {
                    skipped.push((full_path.to_string(), "path collides with a file".to_string()));
                    return;
                }
            }
        }
    }
}

fn skip_dir_segment(path: &str) -> Option<&'static str> {
    path.split('/')
        .find_map(|seg| SKIP_DIRS.iter().find(|d| **d == seg).copied())
}

fn is_allowed_icon(path: &str) -> bool {
    path.rsplit('.')
        .next()
        .map(|ext| ICON_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn segments_are_valid(segments: &[&str]) -> bool {
    !segments.is_empty()
        && segments
            .iter()
            .all(|s| !s.is_empty() && *s != "." && *s != "..")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revision::FileEntry;

    fn revision(entries: &[(&str, FileEntry)]) -> FileRevision {
        entries
            .iter()
            .map(|(p, e)| (p.to_string(), e.clone()))
            .collect()
    }

    #[test]
    fn nests_directories() {
        let rev = revision(&[
            ("src/app/page.tsx", FileEntry::text("page", "typescript")),
            ("src/app/layout.tsx", FileEntry::text("layout", "typescript")),
            ("package.json", FileEntry::text("{}", "json")),
        ]);

        let built = build_tree(&rev);
        assert!(built.skipped.is_empty());

        let Some(FileNode::Directory { entries: src }) = built.tree.get("src") else {
            panic!("src should be a directory");
        };
        let Some(FileNode::Directory { entries: app }) = src.get("app") else {
            panic!("src/app should be a directory");
        };
        assert!(matches!(app.get("page.tsx"), Some(FileNode::File { .. })));
        assert!(matches!(
            built.tree.get("package.json"),
            Some(FileNode::File { .. })
        ));
    }

    #[test]
    fn skips_dependency_caches() {
        let rev = revision(&[
            ("node_modules/react/index.js", FileEntry::text("x", "javascript")),
            (".next/cache/x", FileEntry::text("x", "")),
            ("src/main.ts", FileEntry::text("x", "typescript")),
        ]);

        let built = build_tree(&rev);
        assert_eq!(built.skipped.len(), 2);
        assert!(!built.tree.contains_key("node_modules"));
        assert!(!built.tree.contains_key(".next"));
        assert!(built.tree.contains_key("src"));
    }

    #[test]
    fn skips_binary_placeholders_except_icons() {
        let rev = revision(&[
            ("public/logo.png", FileEntry::binary_placeholder("logo.png")),
            ("public/favicon.ico", FileEntry::binary_placeholder("favicon.ico")),
        ]);

        let built = build_tree(&rev);
        assert_eq!(built.skipped.len(), 1);
        assert_eq!(built.skipped[0].0, "public/logo.png");

        let Some(FileNode::Directory { entries }) = built.tree.get("public") else {
            panic!("public should be a directory");
        };
        assert!(entries.contains_key("favicon.ico"));
        assert!(!entries.contains_key("logo.png"));
    }

    #[test]
    fn skips_malformed_paths_without_failing() {
        let rev = revision(&[
            ("/leading", FileEntry::text("x", "")),
            ("a//b", FileEntry::text("x", "")),
            ("../escape", FileEntry::text("x", "")),
            ("ok.txt", FileEntry::text("x", "")),
        ]);

        let built = build_tree(&rev);
        assert_eq!(built.skipped.len(), 3);
        assert_eq!(built.tree.len(), 1);
        assert!(built.tree.contains_key("ok.txt"));
    }

    #[test]
    fn file_directory_collision_is_skipped() {
        let rev = revision(&[
            ("src", FileEntry::text("i am a file", "")),
            ("src/main.ts", FileEntry::text("x", "typescript")),
        ]);

        // "src" sorts before "src/main.ts": the file wins, the nested path is skipped.
        let built = build_tree(&rev);
        assert_eq!(built.skipped.len(), 1);
        assert!(matches!(built.tree.get("src"), Some(FileNode::File { .. })));
    }
}
