// farmdb-backup/src/backup/hooks.rs
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::{BackupClass, BackupMode};
use crate::errors::{AppError, Result};
use crate::utils::command::{CommandRunner, CommandSpec};

pub const PRE_HOOK: &str = "pre-backup.sh";
pub const POST_HOOK: &str = "post-backup.sh";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Pre,
    Post,
}

impl HookPhase {
    fn file_name(self) -> &'static str {
        match self {
            HookPhase::Pre => PRE_HOOK,
            HookPhase::Post => POST_HOOK,
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPhase::Pre => f.write_str("pre-backup"),
            HookPhase::Post => f.write_str("post-backup"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookStatus {
    /// No executable at the well-known path.
    Skipped,
    Succeeded,
    /// The hook ran (or tried to) and failed; already logged as a warning.
    Failed(String),
}

/// Runs the pre/post backup hooks found in one directory.
pub struct HookRunner<'a, R: CommandRunner> {
    dir: PathBuf,
    runner: &'a R,
}

impl<'a, R: CommandRunner> HookRunner<'a, R> {
    pub fn new(dir: impl Into<PathBuf>, runner: &'a R) -> Self {
        Self {
            dir: dir.into(),
            runner,
        }
    }

    pub fn hook_path(&self, phase: HookPhase) -> PathBuf {
        self.dir.join(phase.file_name())
    }

    pub async fn pre(&self, class: BackupClass, mode: BackupMode, database: &str) -> HookStatus {
        self.invoke(HookPhase::Pre, hook_args(class, mode, database, None))
            .await
    }

    pub async fn post(
        &self,
        class: BackupClass,
        mode: BackupMode,
        database: &str,
        outcome: Outcome,
    ) -> HookStatus {
        self.invoke(HookPhase::Post, hook_args(class, mode, database, Some(outcome)))
            .await
    }

    async fn invoke(&self, phase: HookPhase, args: Vec<String>) -> HookStatus {
        let path = self.hook_path(phase);
        if !is_executable(&path) {
            tracing::debug!(hook = %phase, path = %path.display(), "No executable hook, skipping");
            return HookStatus::Skipped;
        }

        tracing::info!(hook = %phase, "Running {} hook", phase);
        match self.run_hook(&path, args).await {
            Ok(()) => {
                tracing::info!(hook = %phase, "Hook completed");
                HookStatus::Succeeded
            }
            Err(e) => {
                tracing::warn!(hook = %phase, error = %e, "Hook failed; continuing");
                HookStatus::Failed(e.to_string())
            }
        }
    }

    async fn run_hook(&self, path: &Path, args: Vec<String>) -> Result<()> {
        let spec = CommandSpec::new(path.to_string_lossy()).args(args);
        let output = self.runner.run(&spec).await?;
        if output.success() {
            Ok(())
        } else {
            Err(AppError::Hook(format!(
                "{} {}",
                path.display(),
                output.failure_summary()
            )))
        }
    }
}

fn hook_args(
    class: BackupClass,
    mode: BackupMode,
    database: &str,
    outcome: Option<Outcome>,
) -> Vec<String> {
    let mut args = vec![class.to_string(), mode.to_string(), database.to_string()];
    if let Some(outcome) = outcome {
        args.push(outcome.as_str().to_string());
    }
    args
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
