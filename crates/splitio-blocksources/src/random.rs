use anyhow::{Result, ensure};
use async_trait::async_trait;
use splitio_core::{BlockSource, BlockSourceError, BlockSourceErrorKind, BlockSourceResult};

use crate::Geometry;

/// Block source that produces deterministic pseudo-random data based on a seed.
///
/// Writes are unsupported; useful as a pattern generator for read paths and
/// for verifying round trips through other sources.
pub struct RandomBlockSource {
    geometry: Geometry,
    blocks: u64,
    seed: u64,
}

impl RandomBlockSource {
    pub fn new(block_size: u32, total_blocks: u64, seed: u64) -> Result<Self> {
        ensure!(total_blocks > 0, "total_blocks must be non-zero");
        Ok(Self {
            geometry: Geometry::new(block_size)?,
            blocks: total_blocks,
            seed,
        })
    }

    /// Contents of block `lba`, as `read_blocks` would return them.
    pub fn expected_block(&self, lba: u64) -> Vec<u8> {
        let mut buf = vec![0u8; self.geometry.block_size() as usize];
        self.fill_block(lba, &mut buf);
        buf
    }

    fn fill_block(&self, block_id: u64, buf: &mut [u8]) {
        let mut state = self.seed ^ block_id;
        for chunk in buf.chunks_mut(8) {
            state = splitmix64(state);
            let bytes = state.to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
}

#[async_trait]
impl BlockSource for RandomBlockSource {
    fn block_size(&self) -> u32 {
        self.geometry.block_size()
    }

    async fn total_blocks(&self) -> BlockSourceResult<u64> {
        Ok(self.blocks)
    }

    async fn read_blocks(&self, lba: u64, buf: &mut [u8]) -> BlockSourceResult<usize> {
        let blocks = self.geometry.blocks_in(buf.len())?;
        if blocks == 0 {
            return Ok(0);
        }
        self.geometry.ensure_in_range(lba, blocks, self.blocks)?;
        for (idx, chunk) in buf
            .chunks_mut(self.geometry.block_size() as usize)
            .enumerate()
        {
            self.fill_block(lba + idx as u64, chunk);
        }
        Ok(buf.len())
    }

    async fn write_blocks(&self, _lba: u64, _buf: &[u8]) -> BlockSourceResult<usize> {
        Err(BlockSourceError::with_message(
            BlockSourceErrorKind::Unsupported,
            "random block source is read-only",
        ))
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e3779b97f4a7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    fn read_block(source: &RandomBlockSource, lba: u64) -> Vec<u8> {
        let mut buf = vec![0u8; source.block_size() as usize];
        block_on(source.read_blocks(lba, &mut buf)).unwrap();
        buf
    }

    #[test]
    fn random_source_deterministic() {
        let source = RandomBlockSource::new(512, 8, 0xdead_beef).unwrap();
        assert_eq!(read_block(&source, 0), read_block(&source, 0));
        assert_eq!(read_block(&source, 5), source.expected_block(5));
    }

    #[test]
    fn random_source_changes_per_block() {
        let source = RandomBlockSource::new(512, 8, 0xdead_beef).unwrap();
        assert_ne!(read_block(&source, 1), read_block(&source, 2));
    }

    #[test]
    fn random_source_bounds() {
        let source = RandomBlockSource::new(512, 4, 1).unwrap();
        let mut buf = vec![0u8; 1024];
        let err = block_on(source.read_blocks(3, &mut buf)).unwrap_err();
        assert_eq!(err.kind(), BlockSourceErrorKind::OutOfRange);
        let err = block_on(source.write_blocks(0, &[0u8; 512])).unwrap_err();
        assert_eq!(err.kind(), BlockSourceErrorKind::Unsupported);
    }
}
