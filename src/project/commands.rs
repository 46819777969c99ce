//! Command Extractor: turns operator- or AI-authored shell script text into
//! an argv-style command plan.
//!
//! Script sources are files tagged with the `shell` language or following a
//! shell-script naming convention. When no script exists but a manifest
//! does, a canonical install+run pair is synthesized. An empty plan is the
//! caller's signal to fail the launch fast.

use super::detect;
use crate::revision::FileRevision;

/// Ordered setup-then-run command sequence for one launch.
///
/// All commands except the last are setup steps; the last is the
/// long-running server process.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandPlan {
    commands: Vec<Vec<String>>,
}

impl CommandPlan {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Every command before the final server command.
    pub fn setup(&self) -> &[Vec<String>] {
        if self.commands.len() <= 1 {
            &[]
        } else {
            &self.commands[..self.commands.len() - 1]
        }
    }

    /// The long-running server command.
    pub fn server(&self) -> Option<&[String]> {
        self.commands.last().map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = &[String]> {
        self.commands.iter().map(Vec::as_slice)
    }
}

impl From<Vec<Vec<String>>> for CommandPlan {
    fn from(commands: Vec<Vec<String>>) -> Self {
        Self { commands }
    }
}

/// Extract the command plan for a revision. Derived fresh on every full
/// launch.
pub fn extract_plan(revision: &FileRevision) -> CommandPlan {
    let mut commands: Vec<Vec<String>> = Vec::new();

    for path in revision.sorted_paths() {
        let entry = match revision.get(path) {
            Some(e) => e,
            None => continue,
        };
        if !is_shell_source(path, &entry.language) {
            continue;
        }
        for line in entry.content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            commands.push(tokenize(trimmed));
        }
    }

    if commands.is_empty() && detect::find_manifest(revision).is_some() {
        commands = default_plan();
    }

    CommandPlan { commands }
}

/// Canonical install+run pair used when a manifest exists but no script
/// spells out the commands.
pub fn default_plan() -> Vec<Vec<String>> {
    vec![
        vec!["npm".to_string(), "install".to_string()],
        vec!["npm".to_string(), "run".to_string(), "dev".to_string()],
    ]
}

fn is_shell_source(path: &str, language: &str) -> bool {
    language.eq_ignore_ascii_case("shell") || path.starts_with("__shell__") || path.ends_with(".sh")
}

/// Split one line into tokens, treating a quoted span (single or double) as
/// one token with its quotes stripped. An unbalanced quote falls back to
/// naive whitespace splitting rather than discarding the line.
fn tokenize(line: &str) -> Vec<String> {
    match tokenize_quoted(line) {
        Some(tokens) => tokens,
        None => line.split_whitespace().map(str::to_string).collect(),
    }
}

fn tokenize_quoted(line: &str) -> Option<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;

    for ch in line.chars() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                } else {
                    current.push(ch);
                }
            }
            None => match ch {
                '\'' | '"' => {
                    quote = Some(ch);
                    in_token = true;
                }
                c if c.is_whitespace() => {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                c => {
                    current.push(c);
                    in_token = true;
                }
            },
        }
    }

    if quote.is_some() {
        return None; // unbalanced quote
    }
    if in_token {
        tokens.push(current);
    }
    Some(tokens)
}

// ── install escalation ────────────────────────────────────────────────────────

/// Pluggable safer-flags strategy for the one automatic install retry.
///
/// Returns the escalated argv for a failed setup command, or `None` when the
/// command has no safer variant (in which case the failure is final).
pub trait InstallEscalation: Send + Sync {
    fn escalate(&self, argv: &[String]) -> Option<Vec<String>>;
}

/// Default strategy for the npm family: retry installs with flags that
/// disable non-essential network calls.
pub struct NpmInstallEscalation;

impl InstallEscalation for NpmInstallEscalation {
    fn escalate(&self, argv: &[String]) -> Option<Vec<String>> {
        let program = argv.first()?.as_str();
        let subcommand = argv.get(1).map(String::as_str);

        let extra: &[&str] = match (program, subcommand) {
            ("npm", Some("install" | "ci" | "i")) => {
                &["--no-audit", "--no-fund", "--prefer-offline"]
            }
            ("pnpm", Some("install" | "i")) => &["--prefer-offline"],
            ("yarn", Some("install")) | ("yarn", None) => &["--non-interactive"],
            _ => return None,
        };

        let mut escalated = argv.to_vec();
        for flag in extra {
            if !escalated.iter().any(|a| a == flag) {
                escalated.push((*flag).to_string());
            }
        }
        if escalated.len() == argv.len() {
            return None; // flags already present, nothing left to escalate
        }
        Some(escalated)
    }
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

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn extracts_two_step_plan() {
        let rev = revision(&[(
            "__shell__",
            FileEntry::text("npm install --yes\nnpm run dev\n", "shell"),
        )]);
        let plan = extract_plan(&rev);

        assert_eq!(
            plan.iter().collect::<Vec<_>>(),
            vec![
                argv(&["npm", "install", "--yes"]),
                argv(&["npm", "run", "dev"]),
            ]
        );
        assert_eq!(plan.setup(), &[argv(&["npm", "install", "--yes"])]);
        assert_eq!(plan.server(), Some(argv(&["npm", "run", "dev"]).as_slice()));
    }

    #[test]
    fn quoted_span_is_one_token() {
        let rev = revision(&[("run.sh", FileEntry::text(r#"echo "hello world""#, ""))]);
        let plan = extract_plan(&rev);
        assert_eq!(
            plan.iter().collect::<Vec<_>>(),
            vec![argv(&["echo", "hello world"])]
        );
    }

    #[test]
    fn single_quotes_too() {
        let rev = revision(&[("run.sh", FileEntry::text("node -e 'console.log(1)'", ""))]);
        let plan = extract_plan(&rev);
        assert_eq!(
            plan.iter().collect::<Vec<_>>(),
            vec![argv(&["node", "-e", "console.log(1)"])]
        );
    }

    #[test]
    fn unbalanced_quote_falls_back_to_whitespace() {
        let rev = revision(&[("run.sh", FileEntry::text(r#"echo "broken line"#, ""))]);
        let plan = extract_plan(&rev);
        // The line survives, split naively.
        assert_eq!(
            plan.iter().collect::<Vec<_>>(),
            vec![argv(&["echo", "\"broken", "line"])]
        );
    }

    #[test]
    fn comments_and_blanks_are_skipped() {
        let rev = revision(&[(
            "setup.sh",
            FileEntry::text("# install deps\n\nnpm install\n# run it\nnpm run dev\n", ""),
        )]);
        let plan = extract_plan(&rev);
        assert_eq!(plan.iter().count(), 2);
    }

    #[test]
    fn shell_language_tag_is_enough() {
        let rev = revision(&[("anything.txt", FileEntry::text("npm run dev", "shell"))]);
        assert!(!extract_plan(&rev).is_empty());
    }

    #[test]
    fn manifest_without_script_gets_default_plan() {
        let rev = revision(&[("package.json", FileEntry::text(r#"{"dependencies":{}}"#, "json"))]);
        let plan = extract_plan(&rev);
        assert!(!plan.is_empty());
        // Default plan ends in a run-type command.
        assert_eq!(plan.server(), Some(argv(&["npm", "run", "dev"]).as_slice()));
    }

    #[test]
    fn no_script_no_manifest_is_empty() {
        let rev = revision(&[("index.html", FileEntry::text("<html>", "html"))]);
        assert!(extract_plan(&rev).is_empty());
    }

    #[test]
    fn single_command_plan_has_no_setup() {
        let rev = revision(&[("run.sh", FileEntry::text("npx serve .", ""))]);
        let plan = extract_plan(&rev);
        assert!(plan.setup().is_empty());
        assert_eq!(plan.server(), Some(argv(&["npx", "serve", "."]).as_slice()));
    }

    #[test]
    fn npm_escalation_adds_safer_flags() {
        let escalated = NpmInstallEscalation
            .escalate(&argv(&["npm", "install"]))
            .expect("npm install should escalate");
        assert_eq!(
            escalated,
            argv(&["npm", "install", "--no-audit", "--no-fund", "--prefer-offline"])
        );
    }

    #[test]
    fn escalation_is_idempotent() {
        let first = NpmInstallEscalation
            .escalate(&argv(&["npm", "install"]))
            .expect("first escalation");
        assert!(NpmInstallEscalation.escalate(&first).is_none());
    }

    #[test]
    fn non_install_commands_do_not_escalate() {
        assert!(NpmInstallEscalation.escalate(&argv(&["npm", "run", "dev"])).is_none());
        assert!(NpmInstallEscalation.escalate(&argv(&["echo", "hi"])).is_none());
        assert!(NpmInstallEscalation.escalate(&[]).is_none());
    }
}
