use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tracing::{debug, error, info};

use crate::utils::errors::StreamResult;

/// Check if an I/O error is due to disk space exhaustion (ENOSPC)
fn is_disk_full_error(err: &std::io::Error) -> bool {
    #[cfg(unix)]
    if err.raw_os_error() == Some(28) {
        return true;
    }

    #[cfg(windows)]
    if err.raw_os_error() == Some(112) {
        return true;
    }

    let error_msg = err.to_string().to_lowercase();
    error_msg.contains("no space left") || error_msg.contains("disk full")
}

/// Make a content id safe to use as a file name
pub fn sanitize_id(content_id: &str) -> String {
    content_id.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_")
}

/// Owns the on-disk layout of streaming sessions: one growing temp file per
/// active session and one optional permanent file per content id.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    cache_dir: PathBuf,
}

impl ChunkStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn temp_path(&self, content_id: &str) -> PathBuf {
        self.cache_dir
            .join(format!("stream_{}.part", sanitize_id(content_id)))
    }

    pub fn final_path(&self, content_id: &str) -> PathBuf {
        self.cache_dir
            .join(format!("cached_{}.audio", sanitize_id(content_id)))
    }

    /// Length of the permanent file, if it exists and is non-empty
    pub async fn final_file_len(&self, content_id: &str) -> Option<u64> {
        match tokio::fs::metadata(self.final_path(content_id)).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Some(meta.len()),
            _ => None,
        }
    }

    /// Create an empty temp file for a new session, replacing any leftover
    pub async fn create_temp(&self, content_id: &str) -> StreamResult<PathBuf> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;

        let path = self.temp_path(content_id);
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await
            .map_err(|e| log_io_error("create", &path, e))?;

        debug!("Created session file {:?}", path);
        Ok(path)
    }

    /// Random-access writer over an existing session file
    pub async fn open_writer(&self, path: &Path) -> StreamResult<ChunkWriter> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .await
            .map_err(|e| log_io_error("open", path, e))?;

        Ok(ChunkWriter {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Copy a finished temp file to the permanent location. Never overwrites
    /// a non-empty permanent file. Returns whether a copy was made.
    pub async fn promote_to_final(&self, content_id: &str) -> StreamResult<bool> {
        let final_path = self.final_path(content_id);
        if self.final_file_len(content_id).await.is_some() {
            debug!("Permanent file {:?} already present, skipping", final_path);
            return Ok(false);
        }

        let staging = final_path.with_extension("staging");
        tokio::fs::copy(self.temp_path(content_id), &staging)
            .await
            .map_err(|e| log_io_error("copy", &staging, e))?;
        tokio::fs::rename(&staging, &final_path).await?;

        info!("Stored permanent copy {:?}", final_path);
        Ok(true)
    }

    pub async fn delete_temp(&self, content_id: &str) -> StreamResult<()> {
        remove_if_exists(&self.temp_path(content_id)).await
    }

    pub async fn delete_final(&self, content_id: &str) -> StreamResult<()> {
        remove_if_exists(&self.final_path(content_id)).await
    }
}

/// Positional writer for a session file.
///
/// Every write lands at an absolute offset and is flushed before returning,
/// so a reader that opened the file independently sees it immediately.
#[derive(Debug)]
pub struct ChunkWriter {
    file: File,
    path: PathBuf,
}

impl ChunkWriter {
    pub async fn write_at(&mut self, offset: u64, data: &[u8]) -> StreamResult<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| log_io_error("seek", &self.path, e))?;
        self.file
            .write_all(data)
            .await
            .map_err(|e| log_io_error("write", &self.path, e))?;
        self.file
            .flush()
            .await
            .map_err(|e| log_io_error("flush", &self.path, e))?;
        Ok(())
    }

    pub async fn sync(&mut self) -> StreamResult<()> {
        self.file.sync_data().await?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn remove_if_exists(path: &Path) -> StreamResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!("Deleted {:?}", path);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn log_io_error(op: &str, path: &Path, err: std::io::Error) -> std::io::Error {
    if is_disk_full_error(&err) {
        error!("DISK_FULL: cannot {} {:?}: disk space exhausted", op, path);
    } else {
        error!("Failed to {} {:?}: {}", op, path, err);
    }
    err
}
