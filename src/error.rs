//! Error taxonomy for the preview orchestrator.
//!
//! Fatal variants transition the orchestrator to `Error` and clear the
//! preview address; recovery is always caller-initiated via `refresh()`.
//! `Cancelled` is the quiet path taken when a launch attempt is superseded
//! by a newer `start()` or an explicit `stop()` — it is not surfaced as a
//! user-visible failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreviewError {
    /// Project type could not be determined. No retry.
    #[error("unsupported project type: expected a Next.js, Vite or static HTML project")]
    Detection,

    /// No shell script and no manifest — nothing to run. No retry.
    #[error("no runnable command plan: no shell script found and no manifest to derive one from")]
    NoCommandPlan,

    /// A setup command failed even after the escalated retry.
    #[error("install step `{command}` failed with exit code {code}")]
    Install { command: String, code: i32 },

    /// The server command never signalled ready within the attempt budget.
    #[error("dev server failed after {attempts} attempt(s): {reason}")]
    Run { attempts: u32, reason: String },

    /// Boot, mount, spawn or an unsolicited runtime error from the sandbox.
    #[error("sandbox error: {0}")]
    Sandbox(#[from] anyhow::Error),

    /// The attempt was superseded by a newer launch or an explicit stop.
    #[error("launch attempt cancelled")]
    Cancelled,
}

impl PreviewError {
    /// Cancellation is bookkeeping, not a failure to report.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_cause() {
        let err = PreviewError::Install {
            command: "npm install".to_string(),
            code: 1,
        };
        assert!(err.to_string().contains("npm install"));
        assert!(err.to_string().contains("exit code 1"));
    }

    #[test]
    fn cancelled_is_not_a_failure() {
        assert!(PreviewError::Cancelled.is_cancelled());
        assert!(!PreviewError::Detection.is_cancelled());
    }
}
