use async_trait::async_trait;
use splitio_core::{
    BlockSource, BlockSourceError, BlockSourceErrorKind, BlockSourceResult, WriteOptions,
};
use std::ops::Range;
use std::sync::{Mutex, PoisonError};
use tracing::trace;

/// Which transfers a [`Fault`] applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultOp {
    Read,
    Write,
    Any,
}

impl FaultOp {
    fn matches(self, write: bool) -> bool {
        match self {
            FaultOp::Read => !write,
            FaultOp::Write => write,
            FaultOp::Any => true,
        }
    }
}

/// Error returned for transfers touching a block range.
#[derive(Clone, Debug)]
pub struct Fault {
    pub blocks: Range<u64>,
    pub op: FaultOp,
    pub kind: BlockSourceErrorKind,
    /// Number of hits before the fault clears itself; `None` never clears.
    pub remaining: Option<u32>,
}

impl Fault {
    pub fn new(blocks: Range<u64>, op: FaultOp, kind: BlockSourceErrorKind) -> Self {
        Self {
            blocks,
            op,
            kind,
            remaining: None,
        }
    }

    /// Clear the fault after `hits` matching transfers.
    pub fn times(mut self, hits: u32) -> Self {
        self.remaining = Some(hits);
        self
    }

    fn overlaps(&self, lba: u64, blocks: u64) -> bool {
        let end = lba.saturating_add(blocks);
        lba < self.blocks.end && self.blocks.start < end
    }
}

/// Wraps another source and fails transfers that touch injected fault
/// ranges.
pub struct FaultyBlockSource<S> {
    inner: S,
    faults: Mutex<Vec<Fault>>,
}

impl<S: BlockSource> FaultyBlockSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            faults: Mutex::new(Vec::new()),
        }
    }

    pub fn inject(&self, fault: Fault) {
        self.lock().push(fault);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Faults that have not cleared themselves yet.
    pub fn active(&self) -> usize {
        self.lock().len()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Fault>> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, lba: u64, len: usize, write: bool) -> BlockSourceResult<()> {
        let blocks = (len / self.inner.block_size().max(1) as usize) as u64;
        let mut faults = self.lock();
        let Some(index) = faults
            .iter()
            .position(|fault| fault.op.matches(write) && fault.overlaps(lba, blocks))
        else {
            return Ok(());
        };
        let fault = &mut faults[index];
        let kind = fault.kind;
        trace!(lba, blocks, write, ?kind, "injecting fault");
        if let Some(remaining) = fault.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                faults.remove(index);
            }
        }
        Err(BlockSourceError::with_message(
            kind,
            format!("injected fault at lba {lba}"),
        ))
    }
}

#[async_trait]
impl<S: BlockSource> BlockSource for FaultyBlockSource<S> {
    fn block_size(&self) -> u32 {
        self.inner.block_size()
    }

    async fn total_blocks(&self) -> BlockSourceResult<u64> {
        self.inner.total_blocks().await
    }

    async fn read_blocks(&self, lba: u64, buf: &mut [u8]) -> BlockSourceResult<usize> {
        self.check(lba, buf.len(), false)?;
        self.inner.read_blocks(lba, buf).await
    }

    async fn write_blocks(&self, lba: u64, buf: &[u8]) -> BlockSourceResult<usize> {
        self.check(lba, buf.len(), true)?;
        self.inner.write_blocks(lba, buf).await
    }

    async fn write_blocks_with(
        &self,
        lba: u64,
        buf: &[u8],
        options: WriteOptions,
    ) -> BlockSourceResult<usize> {
        self.check(lba, buf.len(), true)?;
        self.inner.write_blocks_with(lba, buf, options).await
    }

    async fn flush(&self) -> BlockSourceResult<()> {
        self.inner.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBlockSource;
    use futures::executor::block_on;

    fn source() -> FaultyBlockSource<MemoryBlockSource> {
        FaultyBlockSource::new(MemoryBlockSource::new(512, 16).unwrap())
    }

    #[test]
    fn fault_hits_only_overlapping_ranges() {
        let source = source();
        source.inject(Fault::new(4..6, FaultOp::Any, BlockSourceErrorKind::Io));
        let mut buf = vec![0u8; 1024];
        assert!(block_on(source.read_blocks(2, &mut buf)).is_ok());
        assert!(block_on(source.read_blocks(6, &mut buf)).is_ok());
        let err = block_on(source.read_blocks(3, &mut buf)).unwrap_err();
        assert_eq!(err.kind(), BlockSourceErrorKind::Io);
        assert!(block_on(source.write_blocks(5, &buf)).is_err());
    }

    #[test]
    fn fault_direction_is_respected() {
        let source = source();
        source.inject(Fault::new(
            0..16,
            FaultOp::Write,
            BlockSourceErrorKind::Busy,
        ));
        let mut buf = vec![0u8; 512];
        assert!(block_on(source.read_blocks(0, &mut buf)).is_ok());
        let err = block_on(source.write_blocks_with(0, &buf, WriteOptions::default()))
            .unwrap_err();
        assert_eq!(err.kind(), BlockSourceErrorKind::Busy);
    }

    #[test]
    fn counted_fault_clears_itself() {
        let source = source();
        source.inject(Fault::new(0..1, FaultOp::Read, BlockSourceErrorKind::Io).times(2));
        let mut buf = vec![0u8; 512];
        assert!(block_on(source.read_blocks(0, &mut buf)).is_err());
        assert!(block_on(source.read_blocks(0, &mut buf)).is_err());
        assert_eq!(source.active(), 0);
        assert!(block_on(source.read_blocks(0, &mut buf)).is_ok());
    }
}
