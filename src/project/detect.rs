//! Project Type Detector: manifest inspection with a file-extension
//! fallback.
//!
//! The manifest (`package.json`) is located by exact filename; when several
//! exist at different depths the last one in path-sorted order wins, and
//! callers are expected to avoid ambiguous inputs. A manifest that fails to
//! parse is treated as absent rather than aborting detection.

use super::ProjectType;
use crate::revision::FileRevision;
use serde::Deserialize;
use std::collections::BTreeMap;

pub const MANIFEST_FILENAME: &str = "package.json";

const FRAMEWORK_PACKAGE: &str = "next";
const BUNDLER_PACKAGE: &str = "vite";

/// Parsed dependency groupings of a `package.json`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub dev_dependencies: BTreeMap<String, String>,
}

impl Manifest {
    /// Union of runtime and dev dependencies. `dependencies` wins on a
    /// duplicate key, matching how package managers resolve the conflict.
    pub fn dependency_union(&self) -> BTreeMap<String, String> {
        let mut union = self.dev_dependencies.clone();
        union.extend(self.dependencies.clone());
        union
    }
}

/// Locate and parse the manifest. Returns the path it was found at.
/// A malformed manifest yields `None`, the same as no manifest at all.
pub fn find_manifest(revision: &FileRevision) -> Option<(String, Manifest)> {
    let path = revision
        .sorted_paths()
        .into_iter()
        .filter(|p| is_manifest_path(p))
        .next_back()?;

    let entry = revision.get(path)?;
    match serde_json::from_str::<Manifest>(&entry.content) {
        Ok(manifest) => Some((path.to_string(), manifest)),
        Err(err) => {
            tracing::warn!("manifest at {path} failed to parse, ignoring it: {err}");
            None
        }
    }
}

/// Dependency union of the revision's manifest, empty when there is none.
/// The sync engine compares this across revisions to decide on a relaunch.
pub fn dependency_union(revision: &FileRevision) -> BTreeMap<String, String> {
    find_manifest(revision)
        .map(|(_, m)| m.dependency_union())
        .unwrap_or_default()
}

/// Classify a revision. Recomputed only on a full relaunch.
pub fn detect_project_type(revision: &FileRevision) -> ProjectType {
    if let Some((_, manifest)) = find_manifest(revision) {
        let deps = manifest.dependency_union();
        if deps.contains_key(FRAMEWORK_PACKAGE) {
            return ProjectType::FrameworkApp;
        }
        if deps.contains_key(BUNDLER_PACKAGE) {
            return ProjectType::BundlerApp;
        }
    }

    if revision.sorted_paths().iter().any(|p| has_markup_extension(p)) {
        return ProjectType::StaticSite;
    }

    ProjectType::Unknown
}

fn is_manifest_path(path: &str) -> bool {
    path == MANIFEST_FILENAME || path.ends_with(&format!("/{MANIFEST_FILENAME}"))
}

fn has_markup_extension(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".html") || lower.ends_with(".htm")
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
    fn framework_dependency_wins() {
        let rev = revision(&[(
            "package.json",
            r#"{"dependencies": {"next": "15.0.0", "react": "19.0.0"}}"#,
        )]);
        assert_eq!(detect_project_type(&rev), ProjectType::FrameworkApp);
    }

    #[test]
    fn bundler_in_dev_dependencies() {
        let rev = revision(&[(
            "package.json",
            r#"{"dependencies": {"react": "19.0.0"}, "devDependencies": {"vite": "6.0.0"}}"#,
        )]);
        assert_eq!(detect_project_type(&rev), ProjectType::BundlerApp);
    }

    #[test]
    fn framework_beats_bundler() {
        let rev = revision(&[(
            "package.json",
            r#"{"dependencies": {"next": "15.0.0"}, "devDependencies": {"vite": "6.0.0"}}"#,
        )]);
        assert_eq!(detect_project_type(&rev), ProjectType::FrameworkApp);
    }

    #[test]
    fn html_extension_fallback() {
        let rev = revision(&[("index.html", "<html></html>"), ("style.css", "body{}")]);
        assert_eq!(detect_project_type(&rev), ProjectType::StaticSite);
    }

    #[test]
    fn nothing_recognizable_is_unknown() {
        let rev = revision(&[("main.py", "print('hi')")]);
        assert_eq!(detect_project_type(&rev), ProjectType::Unknown);
    }

    #[test]
    fn malformed_manifest_falls_through_to_extensions() {
        let rev = revision(&[("package.json", "{not json"), ("index.html", "<html>")]);
        assert_eq!(detect_project_type(&rev), ProjectType::StaticSite);
    }

    #[test]
    fn malformed_manifest_without_markup_is_unknown() {
        let rev = revision(&[("package.json", "{not json")]);
        assert_eq!(detect_project_type(&rev), ProjectType::Unknown);
    }

    #[test]
    fn deepest_manifest_wins() {
        let rev = revision(&[
            ("package.json", r#"{"dependencies": {"vite": "6.0.0"}}"#),
            ("web/package.json", r#"{"dependencies": {"next": "15.0.0"}}"#),
        ]);
        // "web/package.json" sorts after "package.json" — last match wins.
        let (path, manifest) = find_manifest(&rev).expect("manifest should be found");
        assert_eq!(path, "web/package.json");
        assert!(manifest.dependency_union().contains_key("next"));
    }

    #[test]
    fn lookalike_filenames_are_not_manifests() {
        let rev = revision(&[("not-package.json", r#"{"dependencies": {"next": "1"}}"#)]);
        assert!(find_manifest(&rev).is_none());
    }

    #[test]
    fn dependency_union_prefers_runtime_version() {
        let manifest: Manifest = serde_json::from_str(
            r#"{"dependencies": {"react": "19.0.0"}, "devDependencies": {"react": "18.0.0", "vite": "6.0.0"}}"#,
        )
        .expect("manifest should parse");
        let union = manifest.dependency_union();
        assert_eq!(union.get("react").map(String::as_str), Some("19.0.0"));
        assert_eq!(union.len(), 2);
    }
}
