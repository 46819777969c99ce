//! livepreview — sandboxed project preview orchestration.
//!
//! Takes a flat, continuously edited `path → content` map from an editing
//! surface, materializes it inside an isolated sandbox, figures out what
//! kind of project it is, installs its dependencies, launches its dev
//! server, exposes a reachable preview URL, and keeps the running instance
//! synchronized with further edits without needless full restarts.
//!
//! The crate is an in-process library consumed by a UI layer: no network
//! protocol, file format or CLI of its own. Typical wiring:
//!
//! ```no_run
//! use livepreview::{
//!     LocalSandboxBooter, PreviewConfig, PreviewOrchestrator, SandboxRegistry,
//! };
//! use std::sync::Arc;
//!
//! # async fn demo(revision: livepreview::FileRevision) -> anyhow::Result<()> {
//! let registry = Arc::new(SandboxRegistry::new(Box::new(LocalSandboxBooter)));
//! let preview = PreviewOrchestrator::new(registry, PreviewConfig::default());
//!
//! let _status = preview.subscribe_status();
//! preview.start(revision).await?;
//! println!("{:?}", preview.preview_address());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logs;
pub mod orchestrator;
pub mod project;
pub mod revision;
pub mod sandbox;

pub use config::PreviewConfig;
pub use error::PreviewError;
pub use logs::{LogAggregator, LogEntry};
pub use orchestrator::sync::{diff_revisions, RevisionDiff, SyncOutcome};
pub use orchestrator::{LifecycleState, PreviewOrchestrator};
pub use project::commands::{CommandPlan, InstallEscalation, NpmInstallEscalation};
pub use project::ProjectType;
pub use revision::{FileEntry, FileRevision, MediaKind};
pub use sandbox::local::{LocalSandbox, LocalSandboxBooter};
pub use sandbox::{Sandbox, SandboxBooter, SandboxEvent, SandboxRegistry, SpawnedProcess};
