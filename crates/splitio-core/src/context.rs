use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;

use futures::executor::block_on;
use futures_channel::oneshot;
use splitio_proto::{OpCode, TargetId};
use tracing::{debug, warn};

use crate::payload::PayloadBuilder;
use crate::sg::SgList;
use crate::slot::{Slot, SlotPool};
use crate::status::IoStatus;
use crate::transport::Transport;

/// Caller buffer as seen by in-flight sub-operations.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BufferRef {
    base: NonNull<u8>,
    len: usize,
}

// Safety: the referenced buffer is borrowed by the entry point for as long as
// any sub-operation can reach it, and every chunk is handed to exactly one
// slot at a time.
unsafe impl Send for BufferRef {}
unsafe impl Sync for BufferRef {}

impl BufferRef {
    pub(crate) fn from_mut(buf: &mut [u8]) -> Self {
        Self {
            len: buf.len(),
            base: NonNull::from(buf).cast(),
        }
    }

    pub(crate) fn from_ref(buf: &[u8]) -> Self {
        Self {
            len: buf.len(),
            base: NonNull::from(buf).cast(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

/// Fields mutated by completions. Only touched under [`Shared::lock`].
pub(crate) struct SplitState<R> {
    pub(crate) cursor: u64,
    pub(crate) outstanding: usize,
    pub(crate) status: IoStatus,
    pub(crate) issued: u64,
    pub(crate) pool: SlotPool<R>,
    pub(crate) signal: Option<oneshot::Sender<IoStatus>>,
    /// Threads currently running a submit loop for this request.
    pub(crate) submitters: Vec<ThreadId>,
    /// Re-armed slots completed inline, waiting for their thread's submit
    /// loop to pick them up.
    pub(crate) deferred: Vec<(ThreadId, Box<Slot<R>>)>,
}

/// State of one split request shared between the caller and the transport's
/// completion threads.
pub(crate) struct Shared<T: Transport, P> {
    pub(crate) transport: T,
    pub(crate) payload: P,
    pub(crate) target: TargetId,
    pub(crate) opcode: OpCode,
    pub(crate) buffer: BufferRef,
    pub(crate) start_lba: u64,
    pub(crate) total_blocks: u64,
    pub(crate) chunk_blocks: u32,
    pub(crate) queue_depth: usize,
    /// `queue_depth` capped by the number of chunks.
    pub(crate) effective_depth: usize,
    pub(crate) block_size: u32,
    pub(crate) state: Mutex<SplitState<T::Request>>,
}

impl<T: Transport, P: PayloadBuilder> Shared<T, P> {
    pub(crate) fn lock(&self) -> MutexGuard<'_, SplitState<T::Request>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Carve the next chunk off the cursor and load it into `slot`.
    ///
    /// Returns false once the whole range has been handed out. Must be
    /// called with the lock held.
    pub(crate) fn carve(
        &self,
        state: &mut SplitState<T::Request>,
        slot: &mut Slot<T::Request>,
    ) -> bool {
        if state.cursor >= self.total_blocks {
            return false;
        }
        let remaining = self.total_blocks - state.cursor;
        let blocks = remaining.min(self.chunk_blocks as u64) as u32;
        let block_size = self.block_size as usize;
        let offset = state.cursor as usize * block_size;
        let len = blocks as usize * block_size;
        debug_assert!(offset + len <= self.buffer.len());

        let descriptor =
            self.payload
                .build(self.opcode, self.start_lba + state.cursor, blocks, self.block_size);
        let mut sg = SgList::empty();
        sg.point_at(self.buffer.base, offset, len);
        slot.arm(descriptor, sg);

        state.cursor += blocks as u64;
        state.outstanding += 1;
        state.issued += 1;
        true
    }
}

/// One split request from initialization to teardown.
///
/// Once dispatched, the context does not let go of the caller buffer until
/// every sub-operation has completed, even when dropped early.
pub(crate) struct SplitContext<T: Transport, P: PayloadBuilder> {
    pub(crate) shared: Arc<Shared<T, P>>,
    pub(crate) done: Option<oneshot::Receiver<IoStatus>>,
    pub(crate) dispatched: bool,
}

impl<T: Transport, P: PayloadBuilder> SplitContext<T, P> {
    /// Block until the completion signal fires, release the slot pool and
    /// return the aggregated status.
    pub(crate) fn wait(mut self) -> IoStatus {
        let status = match self.done.take() {
            Some(done) => block_on(done).unwrap_or_else(|_| {
                warn!(target_id = %self.shared.target, "completion signal dropped");
                IoStatus::GenericFailure
            }),
            None => self.shared.lock().status,
        };
        self.teardown(status);
        status
    }

    fn teardown(&self, status: IoStatus) {
        let (slots, issued) = {
            let mut state = self.shared.lock();
            debug_assert_eq!(state.outstanding, 0);
            debug_assert!(state.deferred.is_empty());
            debug_assert!(state.pool.is_full());
            (state.pool.drain(), state.issued)
        };
        drop(slots);
        debug!(
            target_id = %self.shared.target,
            op = %self.shared.opcode,
            start_lba = self.shared.start_lba,
            total_blocks = self.shared.total_blocks,
            sub_ops = issued,
            %status,
            "split request finished"
        );
    }
}

impl<T: Transport, P: PayloadBuilder> Drop for SplitContext<T, P> {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            if self.dispatched {
                let _ = block_on(done);
            }
        }
    }
}
