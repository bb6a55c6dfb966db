use crate::error::{SplitError, SplitResult};

pub const DEFAULT_CHUNK_BLOCKS: u32 = 128;
pub const DEFAULT_QUEUE_DEPTH: usize = 4;

/// Chunking and concurrency limits for one split request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SplitConfig {
    /// Blocks per sub-operation; the last one may be shorter.
    pub chunk_blocks: u32,
    /// Maximum number of sub-operations in flight.
    pub queue_depth: usize,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            chunk_blocks: DEFAULT_CHUNK_BLOCKS,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

impl SplitConfig {
    pub const fn new(chunk_blocks: u32, queue_depth: usize) -> Self {
        Self {
            chunk_blocks,
            queue_depth,
        }
    }

    /// Zero limits are only acceptable when there is nothing to transfer.
    pub fn validate(&self, total_blocks: u64) -> SplitResult<()> {
        if total_blocks == 0 {
            return Ok(());
        }
        if self.chunk_blocks == 0 {
            return Err(SplitError::invalid("chunk_blocks must be non-zero"));
        }
        if self.queue_depth == 0 {
            return Err(SplitError::invalid("queue_depth must be non-zero"));
        }
        Ok(())
    }

    /// Number of sub-operations a request of `total_blocks` is split into.
    pub fn chunk_count(&self, total_blocks: u64) -> u64 {
        if self.chunk_blocks == 0 {
            return 0;
        }
        total_blocks.div_ceil(self.chunk_blocks as u64)
    }

    /// Number of slots a request of `total_blocks` actually needs.
    pub fn effective_depth(&self, total_blocks: u64) -> usize {
        let chunks = self.chunk_count(total_blocks);
        (self.queue_depth as u64).min(chunks) as usize
    }
}
