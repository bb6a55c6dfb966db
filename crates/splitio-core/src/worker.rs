//! Thread-pool [`Transport`] that executes sub-operations against a
//! [`BlockSource`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use anyhow::{Context, ensure};
use async_channel::{Receiver, Sender, TrySendError};
use futures::executor::block_on;
use splitio_proto::{BlockQualifier, BlockStatus, OpCode, TargetId};
use tracing::{Level, debug, trace, warn};

use crate::block::{
    BlockSource, BlockSourceError, BlockSourceErrorKind, BlockSourceHandle, BlockSourceResult,
    WriteOptions,
};
use crate::status::TransportStatus;
use crate::transport::{
    RequestHandle, SubOperation, SubmitError, Transport, TransportError, TransportErrorKind,
    TransportResult,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Sub-operations that may wait for a worker before submissions are
    /// refused.
    pub queue_capacity: usize,
    /// Request handles that may be alive across all transports of the pool.
    pub max_requests: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
            max_requests: 256,
        }
    }
}

struct Job {
    op: SubOperation<WorkerRequest>,
    source: BlockSourceHandle,
}

struct RequestBudget {
    limit: usize,
    live: AtomicUsize,
}

impl RequestBudget {
    fn acquire(&self) -> bool {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < self.limit).then_some(live + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Request handle issued by a [`WorkerTransport`]. Holds one unit of the
/// pool's request budget until dropped.
pub struct WorkerRequest {
    budget: Arc<RequestBudget>,
    uses: u64,
}

impl WorkerRequest {
    /// Number of times the handle has been armed.
    pub fn uses(&self) -> u64 {
        self.uses
    }
}

impl RequestHandle for WorkerRequest {
    fn reset(&mut self) {
        self.uses += 1;
    }
}

impl Drop for WorkerRequest {
    fn drop(&mut self) {
        self.budget.release();
    }
}

/// Owns the worker threads. Dropping the pool drains queued work and joins
/// every worker.
pub struct WorkerPool {
    sender: Sender<Job>,
    handles: Vec<JoinHandle<()>>,
    budget: Arc<RequestBudget>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> anyhow::Result<Self> {
        ensure!(config.workers > 0, "worker count must be positive");
        ensure!(config.queue_capacity > 0, "queue capacity must be positive");
        let (sender, receiver) = async_channel::bounded::<Job>(config.queue_capacity);
        let mut handles = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let receiver = receiver.clone();
            let span = tracing::span!(Level::INFO, "splitio-worker", index);
            let handle = std::thread::Builder::new()
                .name(format!("splitio-worker-{index}"))
                .spawn(move || {
                    let _enter = span.enter();
                    worker_loop(receiver);
                })
                .with_context(|| format!("spawn worker {index}"))?;
            handles.push(handle);
        }
        debug!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            max_requests = config.max_requests,
            "worker pool started"
        );
        Ok(Self {
            sender,
            handles,
            budget: Arc::new(RequestBudget {
                limit: config.max_requests,
                live: AtomicUsize::new(0),
            }),
        })
    }

    /// Transport addressing `source` as `target` through this pool.
    pub fn transport(&self, target: TargetId, source: BlockSourceHandle) -> WorkerTransport {
        WorkerTransport {
            target,
            block_size: source.block_size(),
            source,
            sender: self.sender.clone(),
            budget: self.budget.clone(),
        }
    }

    /// Request handles currently alive.
    pub fn live_requests(&self) -> usize {
        self.budget.live.load(Ordering::Acquire)
    }

    /// Sub-operations waiting for a worker.
    pub fn queued(&self) -> usize {
        self.sender.len()
    }

    pub fn shutdown(mut self) {
        self.close_and_join();
    }

    fn close_and_join(&mut self) {
        self.sender.close();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.close_and_join();
    }
}

fn worker_loop(receiver: Receiver<Job>) {
    trace!("starting loop");
    while let Ok(job) = receiver.recv_blocking() {
        execute(job);
    }
    trace!("queue closed");
}

fn execute(job: Job) {
    let Job { mut op, source } = job;
    let descriptor = *op.descriptor();
    let (status, qualifier) = if descriptor.block_size != source.block_size() {
        (BlockStatus::InvalidRequest, BlockQualifier::InvalidBlockSize)
    } else {
        match run_block_io(&mut op, source.as_ref()) {
            Ok(()) => (BlockStatus::Success, BlockQualifier::None),
            Err(err) => {
                debug!(
                    lba = descriptor.lba,
                    blocks = descriptor.blocks,
                    error = %err,
                    "block source failed"
                );
                err.kind().block_status()
            }
        }
    };
    op.set_block_status(status, qualifier);
    op.complete(TransportStatus::Ok);
}

fn run_block_io(
    op: &mut SubOperation<WorkerRequest>,
    source: &dyn BlockSource,
) -> BlockSourceResult<()> {
    let descriptor = *op.descriptor();
    let expected = usize::try_from(descriptor.byte_len()).map_err(|_| {
        BlockSourceError::with_message(BlockSourceErrorKind::InvalidInput, "transfer too large")
    })?;
    if op.sg_list().data_len() != expected {
        return Err(BlockSourceError::with_message(
            BlockSourceErrorKind::InvalidInput,
            format!(
                "sg list holds {} bytes, descriptor needs {expected}",
                op.sg_list().data_len()
            ),
        ));
    }
    let transferred = match descriptor.op {
        OpCode::Read => {
            let buf = op.read_buffer().ok_or_else(|| {
                BlockSourceError::with_message(
                    BlockSourceErrorKind::InvalidInput,
                    "read without a writable buffer",
                )
            })?;
            block_on(source.read_blocks(descriptor.lba, buf))?
        }
        OpCode::Write => {
            let options = WriteOptions {
                check_checksum: descriptor.checksum_required(),
            };
            block_on(source.write_blocks_with(descriptor.lba, op.data(), options))?
        }
    };
    if transferred != expected {
        return Err(BlockSourceError::with_message(
            BlockSourceErrorKind::Io,
            format!("short transfer: {transferred} of {expected} bytes"),
        ));
    }
    Ok(())
}

/// [`Transport`] handing sub-operations to a [`WorkerPool`].
#[derive(Clone)]
pub struct WorkerTransport {
    target: TargetId,
    block_size: u32,
    source: BlockSourceHandle,
    sender: Sender<Job>,
    budget: Arc<RequestBudget>,
}

impl WorkerTransport {
    pub fn source(&self) -> &BlockSourceHandle {
        &self.source
    }
}

impl Transport for WorkerTransport {
    type Request = WorkerRequest;

    fn target(&self) -> TargetId {
        self.target
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn allocate_request(&self) -> TransportResult<WorkerRequest> {
        if !self.budget.acquire() {
            return Err(TransportError::with_message(
                TransportErrorKind::InsufficientResources,
                format!("request budget of {} exhausted", self.budget.limit),
            ));
        }
        Ok(WorkerRequest {
            budget: self.budget.clone(),
            uses: 0,
        })
    }

    fn submit(
        &self,
        op: SubOperation<WorkerRequest>,
    ) -> Result<(), SubmitError<WorkerRequest>> {
        let job = Job {
            op,
            source: self.source.clone(),
        };
        match self.sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => Err(SubmitError::new(
                job.op,
                TransportStatus::InsufficientResources,
            )),
            Err(TrySendError::Closed(job)) => {
                Err(SubmitError::new(job.op, TransportStatus::Disconnected))
            }
        }
    }

    fn probe(&self) -> TransportResult<()> {
        let total = block_on(self.source.total_blocks()).map_err(|err| {
            TransportError::with_message(TransportErrorKind::Other, err.to_string())
        })?;
        debug!(
            target_id = %self.target,
            total_blocks = total,
            block_size = self.block_size,
            "probe"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Zeroes;

    #[async_trait]
    impl BlockSource for Zeroes {
        fn block_size(&self) -> u32 {
            512
        }

        async fn total_blocks(&self) -> BlockSourceResult<u64> {
            Ok(16)
        }

        async fn read_blocks(&self, _lba: u64, buf: &mut [u8]) -> BlockSourceResult<usize> {
            buf.fill(0);
            Ok(buf.len())
        }

        async fn write_blocks(&self, _lba: u64, buf: &[u8]) -> BlockSourceResult<usize> {
            Ok(buf.len())
        }
    }

    #[test]
    fn config_validation() {
        assert!(
            WorkerPool::new(WorkerPoolConfig {
                workers: 0,
                ..WorkerPoolConfig::default()
            })
            .is_err()
        );
        assert!(
            WorkerPool::new(WorkerPoolConfig {
                queue_capacity: 0,
                ..WorkerPoolConfig::default()
            })
            .is_err()
        );
    }

    #[test]
    fn request_budget_is_shared_and_released() {
        let pool = WorkerPool::new(WorkerPoolConfig {
            workers: 1,
            queue_capacity: 1,
            max_requests: 2,
        })
        .unwrap();
        let a = pool.transport(TargetId(1), Arc::new(Zeroes));
        let b = pool.transport(TargetId(2), Arc::new(Zeroes));
        let first = a.allocate_request().unwrap();
        let second = b.allocate_request().unwrap();
        let err = a.allocate_request().err().unwrap();
        assert_eq!(err.kind(), TransportErrorKind::InsufficientResources);
        assert_eq!(pool.live_requests(), 2);
        drop(first);
        assert!(b.allocate_request().is_ok());
        drop(second);
        assert_eq!(pool.live_requests(), 0);
    }

    #[test]
    fn probe_reports_capacity() {
        let pool = WorkerPool::new(WorkerPoolConfig::default()).unwrap();
        let transport = pool.transport(TargetId(7), Arc::new(Zeroes));
        assert_eq!(transport.block_size(), 512);
        assert!(transport.probe().is_ok());
        pool.shutdown();
    }
}
