//! `metadata.json`, written beside the primary artifact of every completed run.
//! Consumers rely on its exact shape.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::{BackupClass, BackupMode};
use crate::errors::{AppError, Result};
use crate::utils::write_atomic;

pub const METADATA_FILE: &str = "metadata.json";
pub const SCRIPT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub backup_info: BackupInfo,
    pub database: DatabaseInfo,
    pub backup_file: BackupFileInfo,
    pub connection: ConnectionInfo,
    pub system: SystemInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub class: BackupClass,
    pub mode: BackupMode,
    pub run_id: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
    pub user: String,
    pub host: String,
    pub port: u16,
    /// Schema filter, or `"all"`.
    pub schema: String,
    pub version: String,
    pub size: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupFileInfo {
    pub filename: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub size_human: String,
    pub sha256: String,
    pub compressed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub pooled: bool,
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub hostname: String,
    pub platform: String,
    pub script_version: String,
}

impl SystemInfo {
    pub fn current() -> Self {
        Self {
            hostname: crate::utils::hostname(),
            platform: crate::utils::platform(),
            script_version: SCRIPT_VERSION.to_string(),
        }
    }
}

impl BackupMetadata {
    pub fn write(&self, run_dir: &Path) -> Result<PathBuf> {
        let path = run_dir.join(METADATA_FILE);
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(&path, &json)?;
        Ok(path)
    }

    pub fn load(run_dir: &Path) -> Result<Self> {
        let path = run_dir.join(METADATA_FILE);
        let data = std::fs::read_to_string(&path).map_err(|e| AppError::fs("read", &path, e))?;
        Ok(serde_json::from_str(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BackupMetadata {
        BackupMetadata {
            backup_info: BackupInfo {
                class: BackupClass::Daily,
                mode: BackupMode::Full,
                run_id: "20261018_020000".into(),
                timestamp: "2026-10-18T02:00:00Z".into(),
            },
            database: DatabaseInfo {
                name: "farm".into(),
                user: "agri".into(),
                host: "db".into(),
                port: 5432,
                schema: "all".into(),
                version: "16.4".into(),
                size: "42 MB".into(),
            },
            backup_file: BackupFileInfo {
                filename: "full_20261018_020000.dump.gz".into(),
                path: PathBuf::from("/b/postgres/daily/20261018_020000/full_20261018_020000.dump.gz"),
                size_bytes: 1234,
                size_human: "1.2K".into(),
                sha256: "ab".repeat(32),
                compressed: true,
            },
            connection: ConnectionInfo {
                pooled: false,
                endpoint: "db:5432".into(),
            },
            system: SystemInfo {
                hostname: "backup-01".into(),
                platform: "linux-x86_64".into(),
                script_version: "0.1.0".into(),
            },
        }
    }

    #[test]
    fn serialized_shape_is_stable() -> anyhow::Result<()> {
        let value = serde_json::to_value(sample())?;
        assert_eq!(value["backup_info"]["class"], "daily");
        assert_eq!(value["backup_info"]["mode"], "full");
        assert_eq!(value["backup_info"]["run_id"], "20261018_020000");
        assert_eq!(value["database"]["schema"], "all");
        assert_eq!(value["database"]["port"], 5432);
        assert_eq!(value["backup_file"]["compressed"], true);
        assert_eq!(value["backup_file"]["size_bytes"], 1234);
        assert_eq!(value["connection"]["pooled"], false);
        assert_eq!(value["system"]["hostname"], "backup-01");

        let top: Vec<&String> = value.as_object().map(|o| o.keys().collect()).unwrap_or_default();
        assert_eq!(top.len(), 5);
        Ok(())
    }

    #[test]
    fn write_then_load() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = sample().write(dir.path())?;
        assert_eq!(path, dir.path().join(METADATA_FILE));
        assert_eq!(BackupMetadata::load(dir.path())?, sample());
        Ok(())
    }
}
