#![allow(dead_code)]

use async_trait::async_trait;
use splitio_core::{
    BlockQualifier, BlockSource, BlockSourceError, BlockSourceErrorKind, BlockSourceResult,
    BlockStatus, OperationDescriptor, RequestHandle, SubOperation, SubmitError, TargetId,
    Transport, TransportError, TransportErrorKind, TransportResult, TransportStatus,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the scripted target does with the n-th issued sub-operation.
#[derive(Clone, Copy, Debug)]
pub enum Outcome {
    Complete(BlockStatus, BlockQualifier),
    Transport(TransportStatus),
    Drop,
}

impl Outcome {
    pub const OK: Outcome = Outcome::Complete(BlockStatus::Success, BlockQualifier::None);
}

pub type Script = Arc<dyn Fn(usize, &OperationDescriptor) -> Outcome + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Issued {
    pub index: usize,
    pub slot: usize,
    pub lba: u64,
    pub blocks: u32,
    pub flags: u32,
}

pub struct ScriptedRequest {
    issue: usize,
    live: Arc<AtomicUsize>,
}

impl RequestHandle for ScriptedRequest {}

impl Drop for ScriptedRequest {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

struct State {
    block_size: u32,
    script: Script,
    delay: Duration,
    issued: Mutex<Vec<Issued>>,
    next_issue: AtomicUsize,
    inflight: AtomicUsize,
    max_inflight: AtomicUsize,
    live: Arc<AtomicUsize>,
    alloc_limit: usize,
    write_mismatches: AtomicUsize,
}

/// Transport completing sub-operations on its own worker threads according
/// to a script. Reads fill every block with the low byte of its LBA; writes
/// are checked against the same pattern.
#[derive(Clone)]
pub struct ScriptedTransport {
    sender: async_channel::Sender<SubOperation<ScriptedRequest>>,
    state: Arc<State>,
}

impl ScriptedTransport {
    pub fn new(block_size: u32, script: Script) -> Self {
        Self::with_options(block_size, 4, usize::MAX, Duration::from_micros(200), script)
    }

    pub fn succeeding(block_size: u32) -> Self {
        Self::new(block_size, Arc::new(|_, _| Outcome::OK))
    }

    pub fn with_options(
        block_size: u32,
        workers: usize,
        alloc_limit: usize,
        delay: Duration,
        script: Script,
    ) -> Self {
        let (sender, receiver) = async_channel::unbounded::<SubOperation<ScriptedRequest>>();
        let state = Arc::new(State {
            block_size,
            script,
            delay,
            issued: Mutex::new(Vec::new()),
            next_issue: AtomicUsize::new(0),
            inflight: AtomicUsize::new(0),
            max_inflight: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
            alloc_limit,
            write_mismatches: AtomicUsize::new(0),
        });
        for _ in 0..workers {
            let receiver = receiver.clone();
            let state = state.clone();
            std::thread::spawn(move || {
                while let Ok(op) = receiver.recv_blocking() {
                    run(&state, op);
                }
            });
        }
        Self { sender, state }
    }

    /// Issued sub-operations in issue order.
    pub fn issued(&self) -> Vec<Issued> {
        let mut issued = self.state.issued.lock().unwrap().clone();
        issued.sort_by_key(|entry| entry.index);
        issued
    }

    /// Issued sub-operations in address order.
    pub fn issued_by_lba(&self) -> Vec<Issued> {
        let mut issued = self.issued();
        issued.sort_by_key(|entry| entry.lba);
        issued
    }

    pub fn max_inflight(&self) -> usize {
        self.state.max_inflight.load(Ordering::SeqCst)
    }

    pub fn live_requests(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    pub fn write_mismatches(&self) -> usize {
        self.state.write_mismatches.load(Ordering::SeqCst)
    }
}

fn run(state: &State, mut op: SubOperation<ScriptedRequest>) {
    std::thread::sleep(state.delay);
    let descriptor = *op.descriptor();
    let outcome = (state.script)(op.request().issue, &descriptor);
    let block_size = state.block_size as usize;
    if let Some(buf) = op.read_buffer() {
        for (idx, block) in buf.chunks_mut(block_size).enumerate() {
            block.fill(pattern(descriptor.lba + idx as u64));
        }
    } else {
        let intact = op
            .data()
            .chunks(block_size)
            .enumerate()
            .all(|(idx, block)| block.iter().all(|b| *b == pattern(descriptor.lba + idx as u64)));
        if !intact {
            state.write_mismatches.fetch_add(1, Ordering::SeqCst);
        }
    }
    state.inflight.fetch_sub(1, Ordering::SeqCst);
    match outcome {
        Outcome::Complete(status, qualifier) => {
            op.set_block_status(status, qualifier);
            op.complete(TransportStatus::Ok);
        }
        Outcome::Transport(status) => op.complete(status),
        Outcome::Drop => drop(op),
    }
}

pub fn pattern(lba: u64) -> u8 {
    (lba & 0xFF) as u8
}

/// Buffer holding the pattern for `[start, start + blocks)`.
pub fn patterned(block_size: u32, start: u64, blocks: u64) -> Vec<u8> {
    (start..start + blocks)
        .flat_map(|lba| std::iter::repeat_n(pattern(lba), block_size as usize))
        .collect()
}

impl Transport for ScriptedTransport {
    type Request = ScriptedRequest;

    fn target(&self) -> TargetId {
        TargetId(42)
    }

    fn block_size(&self) -> u32 {
        self.state.block_size
    }

    fn allocate_request(&self) -> TransportResult<ScriptedRequest> {
        let live = self.state.live.fetch_add(1, Ordering::SeqCst);
        if live >= self.state.alloc_limit {
            self.state.live.fetch_sub(1, Ordering::SeqCst);
            return Err(TransportError::with_message(
                TransportErrorKind::InsufficientResources,
                "scripted allocation limit",
            ));
        }
        Ok(ScriptedRequest {
            issue: usize::MAX,
            live: self.state.live.clone(),
        })
    }

    fn submit(
        &self,
        mut op: SubOperation<ScriptedRequest>,
    ) -> Result<(), SubmitError<ScriptedRequest>> {
        let index = self.state.next_issue.fetch_add(1, Ordering::SeqCst);
        op.request_mut().issue = index;
        let descriptor = *op.descriptor();
        self.state.issued.lock().unwrap().push(Issued {
            index,
            slot: op.slot_index(),
            lba: descriptor.lba,
            blocks: descriptor.blocks,
            flags: descriptor.flags,
        });
        let inflight = self.state.inflight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_inflight.fetch_max(inflight, Ordering::SeqCst);
        match self.sender.try_send(op) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.state.inflight.fetch_sub(1, Ordering::SeqCst);
                Err(SubmitError::new(err.into_inner(), TransportStatus::Disconnected))
            }
        }
    }
}

/// RAM-backed source with optional per-LBA failures and artificial latency.
pub struct MemSource {
    block_size: u32,
    data: Mutex<Vec<u8>>,
    fail_at: Option<(u64, BlockSourceErrorKind)>,
    corrupt_reads: bool,
    delay: Duration,
}

impl MemSource {
    pub fn new(block_size: u32, blocks: u64) -> Self {
        Self {
            block_size,
            data: Mutex::new(vec![0u8; block_size as usize * blocks as usize]),
            fail_at: None,
            corrupt_reads: false,
            delay: Duration::ZERO,
        }
    }

    pub fn failing_at(mut self, lba: u64, kind: BlockSourceErrorKind) -> Self {
        self.fail_at = Some((lba, kind));
        self
    }

    pub fn corrupting_reads(mut self) -> Self {
        self.corrupt_reads = true;
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }

    fn check(&self, lba: u64, len: usize) -> BlockSourceResult<std::ops::Range<usize>> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let blocks = (len / self.block_size as usize) as u64;
        if let Some((bad, kind)) = self.fail_at {
            if (lba..lba + blocks).contains(&bad) {
                return Err(BlockSourceError::with_message(kind, "scripted failure"));
            }
        }
        let start = lba as usize * self.block_size as usize;
        let end = start + len;
        if end > self.data.lock().unwrap().len() {
            return Err(BlockSourceError::new(BlockSourceErrorKind::OutOfRange));
        }
        Ok(start..end)
    }
}

#[async_trait]
impl BlockSource for MemSource {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    async fn total_blocks(&self) -> BlockSourceResult<u64> {
        Ok((self.data.lock().unwrap().len() / self.block_size as usize) as u64)
    }

    async fn read_blocks(&self, lba: u64, buf: &mut [u8]) -> BlockSourceResult<usize> {
        let range = self.check(lba, buf.len())?;
        buf.copy_from_slice(&self.data.lock().unwrap()[range]);
        if self.corrupt_reads && !buf.is_empty() {
            buf[0] ^= 0xFF;
        }
        Ok(buf.len())
    }

    async fn write_blocks(&self, lba: u64, buf: &[u8]) -> BlockSourceResult<usize> {
        let range = self.check(lba, buf.len())?;
        self.data.lock().unwrap()[range].copy_from_slice(buf);
        Ok(buf.len())
    }
}
