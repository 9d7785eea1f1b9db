// farmdb-backup/src/backup/archive.rs
use flate2::bufread::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::errors::{AppError, Result};
use crate::utils::drain;

/// Sizes recorded for one compressed artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionStats {
    pub path: PathBuf,
    pub original_bytes: u64,
    pub compressed_bytes: u64,
}

impl CompressionStats {
    /// Percentage of the original size saved by compression.
    pub fn savings_percent(&self) -> f64 {
        if self.original_bytes == 0 {
            return 0.0;
        }
        (1.0 - self.compressed_bytes as f64 / self.original_bytes as f64) * 100.0
    }
}

pub fn is_gzip_path(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// Path the compressed artifact is written to: the same name plus `.gz`.
pub fn gz_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".gz");
    PathBuf::from(name)
}

/// Gzips `source` into `<source>.gz` and removes the original.
///
/// On failure the partial `.gz` is removed and the original is left intact,
/// so callers can keep the uncompressed artifact.
pub fn gzip_file(source: &Path) -> Result<CompressionStats> {
    let target = gz_path(source);
    match encode(source, &target) {
        Ok(stats) => {
            std::fs::remove_file(source)
                .map_err(|e| AppError::fs("remove uncompressed", source, e))?;
            Ok(stats)
        }
        Err(e) => {
            let _ = std::fs::remove_file(&target);
            Err(AppError::CompressionFailed(format!("{}: {}", source.display(), e)))
        }
    }
}

fn encode(source: &Path, target: &Path) -> io::Result<CompressionStats> {
    let mut input = BufReader::new(File::open(source)?);
    let output = BufWriter::new(File::create(target)?);
    let mut encoder = GzEncoder::new(output, Compression::default());
    let original_bytes = io::copy(&mut input, &mut encoder)?;
    let mut output = encoder.finish()?;
    output.flush()?;
    output.get_ref().sync_all()?;
    let compressed_bytes = std::fs::metadata(target)?.len();
    Ok(CompressionStats {
        path: target.to_path_buf(),
        original_bytes,
        compressed_bytes,
    })
}

fn open_decoder(path: &Path) -> Result<MultiGzDecoder<BufReader<File>>> {
    let file = File::open(path).map_err(|e| AppError::fs("open", path, e))?;
    Ok(MultiGzDecoder::new(BufReader::new(file)))
}

/// Every member has been decoded; anything still unread is not gzip data.
fn ensure_consumed(decoder: MultiGzDecoder<BufReader<File>>, path: &Path) -> Result<()> {
    let mut inner = decoder.into_inner();
    let rest = inner
        .fill_buf()
        .map_err(|e| AppError::fs("read", path, e))?;
    if !rest.is_empty() {
        return Err(AppError::VerificationFailed(format!(
            "{} has trailing bytes after the gzip stream",
            path.display()
        )));
    }
    Ok(())
}

/// Decodes every gzip member in the file, returning the uncompressed byte count.
pub fn check_gzip_stream(path: &Path) -> Result<u64> {
    let mut decoder = open_decoder(path)?;
    let total = drain(&mut decoder).map_err(|e| {
        AppError::VerificationFailed(format!("{} is not a valid gzip stream: {}", path.display(), e))
    })?;
    ensure_consumed(decoder, path)?;
    Ok(total)
}

/// Decompresses `source` into an already-open writer.
pub fn gunzip_into<W: Write>(source: &Path, mut out: W) -> Result<u64> {
    let mut decoder = open_decoder(source)?;
    let written = io::copy(&mut decoder, &mut out).map_err(|e| {
        AppError::VerificationFailed(format!("failed to decompress {}: {}", source.display(), e))
    })?;
    ensure_consumed(decoder, source)?;
    out.flush()
        .map_err(|e| AppError::fs("flush decompressed copy of", source, e))?;
    Ok(written)
}
