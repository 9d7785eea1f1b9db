use thiserror::Error;

/// Process exit code for a clean run or a healthy probe.
pub const EXIT_OK: u8 = 0;
/// Process exit code for a degraded-but-usable state (health warning).
pub const EXIT_DEGRADED: u8 = 1;
/// Process exit code for any hard failure, usage errors included.
pub const EXIT_FAILURE: u8 = 2;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database unreachable: {0}")]
    Unreachable(String),

    #[error("Dump failed: {0}")]
    DumpFailed(String),

    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    #[error("Auxiliary dump failed: {0}")]
    AuxiliaryDumpFailed(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Filesystem error: {0}")]
    Filesystem(String),

    #[error("Hook failed: {0}")]
    Hook(String),

    #[error("Health check failed: {0}")]
    HealthCheck(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serde JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Command {program} could not be executed: {message}")]
    Command { program: String, message: String },
}

impl AppError {
    /// Builds a `Filesystem` error naming the path that was being touched.
    pub fn fs(action: &str, path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        AppError::Filesystem(format!("{} {}: {}", action, path.display(), err))
    }

    /// Short name of the error kind, used in run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Usage(_) => "UsageError",
            AppError::Config(_) => "ConfigError",
            AppError::Unreachable(_) => "Unreachable",
            AppError::DumpFailed(_) => "DumpFailed",
            AppError::CompressionFailed(_) => "CompressionFailed",
            AppError::AuxiliaryDumpFailed(_) => "AuxiliaryDumpFailed",
            AppError::VerificationFailed(_) => "VerificationFailed",
            AppError::Filesystem(_) => "FilesystemError",
            AppError::Hook(_) => "HookError",
            AppError::HealthCheck(_) => "HealthCheckError",
            AppError::Database(_) => "DatabaseError",
            AppError::Json(_) => "SerializationError",
            AppError::Command { .. } => "CommandError",
        }
    }

    /// Exit code for a run that ended with this error.
    pub fn exit_code(&self) -> u8 {
        EXIT_FAILURE
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Maps a top-level error to the process exit code.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<AppError>()
        .map(AppError::exit_code)
        .unwrap_or(EXIT_FAILURE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_taxonomy() {
        assert_eq!(AppError::Unreachable("x".into()).kind(), "Unreachable");
        assert_eq!(AppError::VerificationFailed("x".into()).kind(), "VerificationFailed");
        assert_eq!(AppError::fs("create", std::path::Path::new("/x"), "denied").kind(), "FilesystemError");
    }

    #[test]
    fn hard_failures_exit_with_two() {
        let err = anyhow::Error::new(AppError::DumpFailed("pg_dump exited 1".into()));
        assert_eq!(exit_code_for(&err), EXIT_FAILURE);

        let wrapped = anyhow::Error::new(AppError::Usage("bad schema".into())).context("loading config");
        assert_eq!(exit_code_for(&wrapped), 2);

        let foreign = anyhow::anyhow!("something else");
        assert_eq!(exit_code_for(&foreign), 2);
    }
}
