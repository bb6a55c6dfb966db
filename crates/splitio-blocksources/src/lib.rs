//! [`BlockSource`](splitio_core::BlockSource) implementations for the
//! splitio worker pool.

use splitio_core::{BlockSourceError, BlockSourceErrorKind, BlockSourceResult};
use std::io;

mod faulty;
mod file;
mod memory;
mod random;

pub use faulty::{Fault, FaultOp, FaultyBlockSource};
pub use file::FileBlockSource;
pub use memory::MemoryBlockSource;
pub use random::RandomBlockSource;

/// Block size validation and LBA arithmetic shared by the sources in this crate.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Geometry {
    block_size: u32,
}

impl Geometry {
    pub(crate) fn new(block_size: u32) -> anyhow::Result<Self> {
        anyhow::ensure!(block_size > 0, "block size must be non-zero");
        anyhow::ensure!(
            block_size.is_power_of_two(),
            "block size must be a power of two"
        );
        Ok(Self { block_size })
    }

    pub(crate) fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Number of whole blocks in `len` bytes; rejects partial blocks.
    pub(crate) fn blocks_in(&self, len: usize) -> BlockSourceResult<u64> {
        if !len.is_multiple_of(self.block_size as usize) {
            return Err(BlockSourceError::with_message(
                BlockSourceErrorKind::InvalidInput,
                "buffer length must align to block size",
            ));
        }
        Ok((len / self.block_size as usize) as u64)
    }

    pub(crate) fn offset(&self, lba: u64) -> BlockSourceResult<u64> {
        lba.checked_mul(self.block_size as u64).ok_or_else(|| {
            BlockSourceError::with_message(BlockSourceErrorKind::OutOfRange, "lba overflow")
        })
    }

    /// Fails unless `[lba, lba + blocks)` fits below `capacity` blocks.
    pub(crate) fn ensure_in_range(
        &self,
        lba: u64,
        blocks: u64,
        capacity: u64,
    ) -> BlockSourceResult<()> {
        let end = lba.checked_add(blocks).ok_or_else(|| {
            BlockSourceError::with_message(BlockSourceErrorKind::OutOfRange, "lba overflow")
        })?;
        if end > capacity {
            return Err(BlockSourceError::with_message(
                BlockSourceErrorKind::OutOfRange,
                format!("blocks {lba}..{end} past end of source ({capacity} blocks)"),
            ));
        }
        Ok(())
    }
}

pub(crate) fn io_error(err: io::Error) -> BlockSourceError {
    BlockSourceError::with_message(BlockSourceErrorKind::Io, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_validation() {
        assert!(Geometry::new(0).is_err());
        assert!(Geometry::new(500).is_err());
        let geometry = Geometry::new(512).unwrap();
        assert_eq!(geometry.blocks_in(1024).unwrap(), 2);
        assert_eq!(
            geometry.blocks_in(1000).unwrap_err().kind(),
            BlockSourceErrorKind::InvalidInput
        );
        assert_eq!(geometry.offset(3).unwrap(), 1536);
        assert_eq!(
            geometry.offset(u64::MAX).unwrap_err().kind(),
            BlockSourceErrorKind::OutOfRange
        );
        assert!(geometry.ensure_in_range(6, 2, 8).is_ok());
        assert_eq!(
            geometry.ensure_in_range(7, 2, 8).unwrap_err().kind(),
            BlockSourceErrorKind::OutOfRange
        );
    }
}
