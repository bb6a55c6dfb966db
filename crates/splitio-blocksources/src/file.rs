use anyhow::{Context, Result};
use async_trait::async_trait;
use splitio_core::{BlockSource, BlockSourceError, BlockSourceErrorKind, BlockSourceResult};
use std::{
    io,
    os::unix::fs::FileExt,
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};
use tokio::fs::OpenOptions;
use tracing::debug;

use crate::{Geometry, io_error};

/// Block source backed by a regular file or block device node.
///
/// Positional I/O is performed inline on the calling thread, which in the
/// worker pool is already a dedicated worker.
pub struct FileBlockSource {
    inner: BlockFile,
    geometry: Geometry,
}

impl FileBlockSource {
    /// Open a file-backed block source, falling back to read-only when the
    /// file cannot be opened for writing.
    pub async fn open(path: impl AsRef<Path>, block_size: u32) -> Result<Self> {
        let geometry = Geometry::new(block_size)?;
        let inner = open_block_file(path.as_ref()).await?;
        Ok(Self { inner, geometry })
    }

    pub fn is_writable(&self) -> bool {
        self.inner.writable
    }
}

#[async_trait]
impl BlockSource for FileBlockSource {
    fn block_size(&self) -> u32 {
        self.geometry.block_size()
    }

    async fn total_blocks(&self) -> BlockSourceResult<u64> {
        Ok(self.inner.size() / self.geometry.block_size() as u64)
    }

    async fn read_blocks(&self, lba: u64, buf: &mut [u8]) -> BlockSourceResult<usize> {
        if self.geometry.blocks_in(buf.len())? == 0 {
            return Ok(0);
        }
        let offset = self.geometry.offset(lba)?;
        self.inner.read_at(offset, buf).map_err(io_error)?;
        Ok(buf.len())
    }

    async fn write_blocks(&self, lba: u64, buf: &[u8]) -> BlockSourceResult<usize> {
        if self.geometry.blocks_in(buf.len())? == 0 {
            return Ok(0);
        }
        if !self.inner.writable {
            return Err(BlockSourceError::with_message(
                BlockSourceErrorKind::Unsupported,
                "block source opened in read-only mode",
            ));
        }
        let offset = self.geometry.offset(lba)?;
        self.inner.write_at(offset, buf).map_err(io_error)?;
        Ok(buf.len())
    }

    async fn flush(&self) -> BlockSourceResult<()> {
        self.inner.file.sync_data().map_err(io_error)
    }
}

struct BlockFile {
    file: std::fs::File,
    len: AtomicU64,
    writable: bool,
}

impl BlockFile {
    fn size(&self) -> u64 {
        self.len.load(Ordering::Relaxed)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut read = 0;
        while read < buf.len() {
            let n = self.file.read_at(&mut buf[read..], offset + read as u64)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "short read from block file",
                ));
            }
            read += n;
        }
        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let mut written = 0;
        while written < buf.len() {
            let n = self.file.write_at(&buf[written..], offset + written as u64)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "short write to block file",
                ));
            }
            written += n;
        }
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "write offset overflow"))?;
        self.len.fetch_max(end, Ordering::Relaxed);
        Ok(())
    }
}

async fn open_block_file(path: &Path) -> Result<BlockFile> {
    let path_display = path.display().to_string();
    let rw_result = OpenOptions::new().read(true).write(true).open(path).await;

    let (file, writable) = match rw_result {
        Ok(file) => (file, true),
        Err(err)
            if matches!(
                err.kind(),
                io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem
            ) =>
        {
            let file = OpenOptions::new()
                .read(true)
                .open(path)
                .await
                .with_context(|| format!("open {path_display} read-only"))?;
            debug!(path = %path_display, "opened block source read-only");
            (file, false)
        }
        Err(err) => {
            return Err(err).context(format!("open {path_display}"));
        }
    };

    let len = file
        .metadata()
        .await
        .with_context(|| format!("stat {path_display}"))?
        .len();
    debug!(path = %path_display, len, writable, "opened block source");

    Ok(BlockFile {
        file: file.into_std().await,
        len: AtomicU64::new(len),
        writable,
    })
}
