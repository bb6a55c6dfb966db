use async_trait::async_trait;
use core::fmt;
use std::sync::Arc;

use splitio_proto::{BlockQualifier, BlockStatus};

pub type BlockSourceResult<T> = core::result::Result<T, BlockSourceError>;

/// Shared handle to a block source, cloned into every worker.
pub type BlockSourceHandle = Arc<dyn BlockSource>;

/// Describes the failure category for block source operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockSourceErrorKind {
    InvalidInput,
    OutOfRange,
    Io,
    Unsupported,
    /// Source is temporarily out of capacity.
    Busy,
    /// Data read back did not match what was written.
    Corrupt,
    Other,
}

impl BlockSourceErrorKind {
    /// Status pair a target reports for this failure.
    pub fn block_status(self) -> (BlockStatus, BlockQualifier) {
        match self {
            BlockSourceErrorKind::InvalidInput => {
                (BlockStatus::InvalidRequest, BlockQualifier::InvalidSgList)
            }
            BlockSourceErrorKind::OutOfRange => {
                (BlockStatus::InvalidRequest, BlockQualifier::CapacityExceeded)
            }
            BlockSourceErrorKind::Io => (BlockStatus::IoFailed, BlockQualifier::RetryPossible),
            BlockSourceErrorKind::Unsupported => {
                (BlockStatus::InvalidRequest, BlockQualifier::Unsupported)
            }
            BlockSourceErrorKind::Busy => {
                (BlockStatus::NotReady, BlockQualifier::InsufficientResources)
            }
            BlockSourceErrorKind::Corrupt => {
                (BlockStatus::MediaError, BlockQualifier::ChecksumMismatch)
            }
            BlockSourceErrorKind::Other => (BlockStatus::IoFailed, BlockQualifier::None),
        }
    }
}

/// Error surfaced by [`BlockSource`] implementations.
#[derive(Clone, Debug)]
pub struct BlockSourceError {
    kind: BlockSourceErrorKind,
    message: Option<String>,
}

impl BlockSourceError {
    pub const fn new(kind: BlockSourceErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    pub fn with_message(kind: BlockSourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }

    pub fn kind(&self) -> BlockSourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for BlockSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(msg) => write!(f, "{:?}: {}", self.kind, msg),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl std::error::Error for BlockSourceError {}

/// Per-write knobs taken from the descriptor flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Validate the stored data before reporting success.
    pub check_checksum: bool,
}

/// Abstraction over a readable/writable block storage source.
///
/// Implementations operate on logical block units and the caller is expected
/// to pass buffers whose lengths are exact multiples of the reported block
/// size.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Logical block size in bytes.
    fn block_size(&self) -> u32;

    /// Total number of logical blocks available.
    async fn total_blocks(&self) -> BlockSourceResult<u64>;

    /// Read one or more blocks starting at `lba` into `buf`.
    async fn read_blocks(&self, lba: u64, buf: &mut [u8]) -> BlockSourceResult<usize>;

    /// Write one or more blocks starting at `lba` from `buf`.
    async fn write_blocks(&self, lba: u64, buf: &[u8]) -> BlockSourceResult<usize>;

    /// Write with options. Checked writes are read back and compared unless
    /// the source validates integrity on its own.
    async fn write_blocks_with(
        &self,
        lba: u64,
        buf: &[u8],
        options: WriteOptions,
    ) -> BlockSourceResult<usize> {
        let written = self.write_blocks(lba, buf).await?;
        if !options.check_checksum {
            return Ok(written);
        }
        let mut readback = vec![0u8; written];
        let read = self.read_blocks(lba, &mut readback).await?;
        if read != written || readback[..] != buf[..written] {
            return Err(BlockSourceError::with_message(
                BlockSourceErrorKind::Corrupt,
                format!("checked write at lba {lba} did not read back"),
            ));
        }
        Ok(written)
    }

    /// Flush outstanding writes to durable media.
    async fn flush(&self) -> BlockSourceResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::sync::Mutex;

    /// Stores writes but hands back one flipped bit on reads when asked to.
    struct Scratch {
        data: Mutex<Vec<u8>>,
        corrupt_reads: bool,
    }

    #[async_trait]
    impl BlockSource for Scratch {
        fn block_size(&self) -> u32 {
            4
        }

        async fn total_blocks(&self) -> BlockSourceResult<u64> {
            Ok(4)
        }

        async fn read_blocks(&self, lba: u64, buf: &mut [u8]) -> BlockSourceResult<usize> {
            let data = self.data.lock().unwrap();
            let start = lba as usize * 4;
            buf.copy_from_slice(&data[start..start + buf.len()]);
            if self.corrupt_reads {
                buf[0] ^= 1;
            }
            Ok(buf.len())
        }

        async fn write_blocks(&self, lba: u64, buf: &[u8]) -> BlockSourceResult<usize> {
            let mut data = self.data.lock().unwrap();
            let start = lba as usize * 4;
            data[start..start + buf.len()].copy_from_slice(buf);
            Ok(buf.len())
        }
    }

    #[test]
    fn checked_write_reads_back() {
        let source = Scratch {
            data: Mutex::new(vec![0; 16]),
            corrupt_reads: false,
        };
        let options = WriteOptions {
            check_checksum: true,
        };
        assert_eq!(block_on(source.write_blocks_with(1, &[9; 8], options)).unwrap(), 8);
    }

    #[test]
    fn checked_write_detects_mismatch() {
        let source = Scratch {
            data: Mutex::new(vec![0; 16]),
            corrupt_reads: true,
        };
        let err = block_on(source.write_blocks_with(
            0,
            &[1; 4],
            WriteOptions {
                check_checksum: true,
            },
        ))
        .unwrap_err();
        assert_eq!(err.kind(), BlockSourceErrorKind::Corrupt);
        assert!(block_on(source.write_blocks_with(0, &[1; 4], WriteOptions::default())).is_ok());
    }

    #[test]
    fn busy_maps_to_insufficient_resources() {
        assert_eq!(
            BlockSourceErrorKind::Busy.block_status(),
            (BlockStatus::NotReady, BlockQualifier::InsufficientResources)
        );
        assert_eq!(
            BlockSourceErrorKind::Io.block_status().0,
            BlockStatus::IoFailed
        );
    }
}
