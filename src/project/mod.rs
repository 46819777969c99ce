//! Pure project analysis: classify the project, build the mount tree, and
//! extract the shell command plan. Nothing in this module performs I/O or
//! touches orchestrator state.

pub mod commands;
pub mod detect;
pub mod tree;

use serde::Serialize;
use std::fmt;

/// Classification of a file revision, computed once per full launch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectType {
    /// Plain HTML/CSS, no build step.
    StaticSite,
    /// Vite (or compatible) dev server.
    BundlerApp,
    /// Next.js (or compatible) framework dev server.
    FrameworkApp,
    /// Nothing recognizable — fatal for launch.
    Unknown,
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StaticSite => "static",
            Self::BundlerApp => "vite",
            Self::FrameworkApp => "next",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}
