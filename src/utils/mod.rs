pub mod command;

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read, Write};
use tempfile::NamedTempFile;
use std::path::{Path, PathBuf};
use which::which;

use crate::errors::{AppError, Result};

/// Finds an executable in the system PATH.
pub fn find_executable(name: &str) -> Result<PathBuf> {
    which(name).map_err(|_| AppError::Command {
        program: name.to_string(),
        message: format!(
            "{} executable not found in PATH. Please ensure PostgreSQL client tools are installed and in your PATH.",
            name
        ),
    })
}

/// Streams a file through SHA-256 and returns the lowercase hex digest.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| AppError::fs("open", path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| AppError::fs("read", path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn file_size(path: &Path) -> Result<u64> {
    std::fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| AppError::fs("stat", path, e))
}

/// Human-readable size in binary units, e.g. `1.5M`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["K", "M", "G", "T", "P"];
    if bytes < 1024 {
        return format!("{}B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for u in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = u;
    }
    format!("{:.1}{}", value, unit)
}

pub fn hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.trim().is_empty() {
            return name.trim().to_string();
        }
    }
    std::fs::read_to_string("/etc/hostname")
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn platform() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

/// Writes `contents` beside `path` and renames it into place, so readers
/// observe either the old or the new file and never a torn write.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| AppError::fs("create directory", parent, e))?;
    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| AppError::fs("create temp file in", parent, e))?;
    tmp.write_all(contents)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| AppError::fs("write", tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| AppError::fs("rename into", path, e.error))?;
    Ok(())
}

/// Copies a reader into a sink, returning the byte count.
pub fn drain<R: Read>(mut reader: R) -> io::Result<u64> {
    io::copy(&mut reader, &mut io::sink())
}
