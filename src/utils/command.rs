// farmdb-backup/src/utils/command.rs
//! External CLI invocation.
//!
//! Every database tool (`pg_dump`, `pg_dumpall`, `pg_restore`, `psql`, `df`)
//! and every hook executable is started through a [`CommandRunner`], so the
//! backup engine and the health probe can be driven by a scripted double in
//! tests. The system runner optionally routes database tools through
//! `docker exec` into the container that hosts the server.

use std::fs::File;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

use super::find_executable;
use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin_from: Option<PathBuf>,
    pub stdout_to: Option<PathBuf>,
    pub in_container: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin_from(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin_from = Some(path.into());
        self
    }

    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout_to = Some(path.into());
        self
    }

    /// Marks the command as a database tool that runs next to the server.
    pub fn in_container(mut self) -> Self {
        self.in_container = true;
        self
    }

    /// Command line without environment values, safe to log.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// One-line description of a failed invocation.
    pub fn failure_summary(&self) -> String {
        let status = match self.code {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        };
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            status
        } else {
            format!("{}: {}", status, stderr)
        }
    }
}

#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Runs the command to completion. A non-zero exit is reported through
    /// [`CommandOutput::code`]; `Err` means the process could not be started.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands on the host, or inside the database container via `docker exec`.
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner {
    container: Option<String>,
}

impl SystemCommandRunner {
    pub fn new(container: Option<String>) -> Self {
        Self { container }
    }

    /// Program and argv actually spawned for `spec`.
    pub fn resolve(&self, spec: &CommandSpec) -> (String, Vec<String>) {
        match (&self.container, spec.in_container) {
            (Some(container), true) => {
                let mut args = vec!["exec".to_string()];
                if spec.stdin_from.is_some() {
                    args.push("-i".to_string());
                }
                // `-e NAME` copies the value from docker's own environment,
                // which keeps secrets out of the process list.
                for (key, _) in &spec.env {
                    args.push("-e".to_string());
                    args.push(key.clone());
                }
                args.push(container.clone());
                args.push(spec.program.clone());
                args.extend(spec.args.iter().cloned());
                ("docker".to_string(), args)
            }
            _ => (spec.program.clone(), spec.args.clone()),
        }
    }
}

impl CommandRunner for SystemCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let (program, args) = self.resolve(spec);
        let executable = find_executable(&program)?;
        tracing::debug!(command = %spec.display(), container = ?self.container, "running external command");

        let mut command = Command::new(&executable);
        command
            .args(&args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match &spec.stdin_from {
            Some(path) => {
                let file = File::open(path).map_err(|e| AppError::fs("open", path, e))?;
                command.stdin(Stdio::from(file));
            }
            None => {
                command.stdin(Stdio::null());
            }
        }
        match &spec.stdout_to {
            Some(path) => {
                let file = File::create(path).map_err(|e| AppError::fs("create", path, e))?;
                command.stdout(Stdio::from(file));
            }
            None => {
                command.stdout(Stdio::piped());
            }
        }

        let child = command.spawn().map_err(|e| AppError::Command {
            program: program.clone(),
            message: e.to_string(),
        })?;
        let output = child.wait_with_output().await.map_err(|e| AppError::Command {
            program: program.clone(),
            message: e.to_string(),
        })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
