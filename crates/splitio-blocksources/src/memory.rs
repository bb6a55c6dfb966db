use anyhow::{Context, Result, ensure};
use async_trait::async_trait;
use splitio_core::{BlockSource, BlockSourceResult};
use std::sync::{PoisonError, RwLock};

use crate::Geometry;

/// RAM-backed block source.
pub struct MemoryBlockSource {
    geometry: Geometry,
    data: RwLock<Vec<u8>>,
}

impl MemoryBlockSource {
    /// Zero-filled source of `total_blocks` blocks.
    pub fn new(block_size: u32, total_blocks: u64) -> Result<Self> {
        let len = total_blocks
            .checked_mul(block_size as u64)
            .and_then(|len| usize::try_from(len).ok())
            .context("memory source too large")?;
        Self::from_vec(block_size, vec![0u8; len])
    }

    /// Source initialised with `data`, which must hold whole blocks.
    pub fn from_vec(block_size: u32, data: Vec<u8>) -> Result<Self> {
        let geometry = Geometry::new(block_size)?;
        ensure!(
            data.len().is_multiple_of(block_size as usize),
            "memory source length must align to block size"
        );
        Ok(Self {
            geometry,
            data: RwLock::new(data),
        })
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn capacity(&self, len: usize) -> u64 {
        (len / self.geometry.block_size() as usize) as u64
    }
}

#[async_trait]
impl BlockSource for MemoryBlockSource {
    fn block_size(&self) -> u32 {
        self.geometry.block_size()
    }

    async fn total_blocks(&self) -> BlockSourceResult<u64> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(self.capacity(data.len()))
    }

    async fn read_blocks(&self, lba: u64, buf: &mut [u8]) -> BlockSourceResult<usize> {
        let blocks = self.geometry.blocks_in(buf.len())?;
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        self.geometry
            .ensure_in_range(lba, blocks, self.capacity(data.len()))?;
        let start = self.geometry.offset(lba)? as usize;
        buf.copy_from_slice(&data[start..start + buf.len()]);
        Ok(buf.len())
    }

    async fn write_blocks(&self, lba: u64, buf: &[u8]) -> BlockSourceResult<usize> {
        let blocks = self.geometry.blocks_in(buf.len())?;
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        self.geometry
            .ensure_in_range(lba, blocks, self.capacity(data.len()))?;
        let start = self.geometry.offset(lba)? as usize;
        data[start..start + buf.len()].copy_from_slice(buf);
        Ok(buf.len())
    }
}
