//! File ingestion for attachments: read a file in chunks, report progress,
//! and produce the base64 payload stored in the attachment database.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose, Engine as _};
use thiserror::Error;
use tokio::io::AsyncReadExt;

/// Files above this size are rejected, up front or once the read passes it.
pub const MAX_ATTACHMENT_BYTES: u64 = 25 * 1024 * 1024;

const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Read failures, kept distinct from persistence failures.
#[derive(Debug, Error)]
pub enum FileReadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is {size} bytes; the limit is {limit} bytes")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadProgress {
    pub bytes_read: u64,
    pub total_bytes: u64,
}

impl ReadProgress {
    #[must_use]
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 100;
        }
        let pct = self.bytes_read.saturating_mul(100) / self.total_bytes;
        u8::try_from(pct.min(100)).unwrap_or(100)
    }
}

/// Read `path` and return its contents as standard padded base64.
/// `on_progress` is called after every chunk and once more at completion.
///
/// # Errors
/// Returns [`FileReadError`] when the file is missing, unreadable, or larger
/// than [`MAX_ATTACHMENT_BYTES`].
pub async fn read_file_base64<F>(path: &Path, on_progress: F) -> Result<String, FileReadError>
where
    F: FnMut(ReadProgress),
{
    read_limited(path, MAX_ATTACHMENT_BYTES, on_progress).await
}

async fn read_limited<F>(
    path: &Path,
    limit: u64,
    mut on_progress: F,
) -> Result<String, FileReadError>
where
    F: FnMut(ReadProgress),
{
    let io_err = |source| FileReadError::Io {
        path: path.to_path_buf(),
        source,
    };
    let too_large = |size| FileReadError::TooLarge {
        path: path.to_path_buf(),
        size,
        limit,
    };

    let mut file = tokio::fs::File::open(path).await.map_err(io_err)?;
    let total_bytes = file.metadata().await.map_err(io_err)?.len();
    if total_bytes > limit {
        return Err(too_large(total_bytes));
    }

    let mut contents = Vec::with_capacity(usize::try_from(total_bytes).unwrap_or(0));
    let mut chunk = vec![0_u8; READ_CHUNK_BYTES];
    let mut bytes_read = 0_u64;

    loop {
        let n = file.read(&mut chunk).await.map_err(io_err)?;
        if n == 0 {
            break;
        }
        bytes_read += n as u64;
        // Metadata can understate: the file grew, or it is a pipe or procfs entry.
        if bytes_read > limit {
            return Err(too_large(bytes_read));
        }
        contents.extend_from_slice(&chunk[..n]);
        on_progress(ReadProgress {
            bytes_read,
            total_bytes: total_bytes.max(bytes_read),
        });
    }

    if bytes_read == 0 {
        on_progress(ReadProgress {
            bytes_read: 0,
            total_bytes: 0,
        });
    }

    tracing::debug!("Read {} bytes from {}", bytes_read, path.display());
    Ok(general_purpose::STANDARD.encode(&contents))
}
