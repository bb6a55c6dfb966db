use std::sync::{Arc, Mutex};
use std::thread;

use futures_channel::oneshot;
use splitio_proto::OpCode;
use tracing::{debug, trace, warn};

use crate::config::SplitConfig;
use crate::context::{BufferRef, Shared, SplitContext, SplitState};
use crate::error::{SplitError, SplitResult};
use crate::metrics;
use crate::payload::{BlockPayload, PayloadBuilder};
use crate::slot::{Slot, SlotPool};
use crate::status::{IoStatus, TransportStatus, classify};
use crate::transport::{CompletionSink, SubOperation, Transport};

/// Read `total_blocks` blocks starting at `start_lba` into `buf`, at most
/// `queue_depth` sub-operations of `chunk_blocks` blocks at a time.
///
/// Blocks until every sub-operation has completed. `Err` is only returned
/// for failures detected before anything was submitted.
pub fn read<T: Transport>(
    target: &T,
    buf: &mut [u8],
    total_blocks: u64,
    start_lba: u64,
    chunk_blocks: u32,
    queue_depth: usize,
) -> SplitResult<IoStatus> {
    read_with(
        target,
        buf,
        total_blocks,
        start_lba,
        SplitConfig::new(chunk_blocks, queue_depth),
        BlockPayload,
    )
}

/// Write `total_blocks` blocks from `buf` starting at `start_lba`. See
/// [`read`].
pub fn write<T: Transport>(
    target: &T,
    buf: &[u8],
    total_blocks: u64,
    start_lba: u64,
    chunk_blocks: u32,
    queue_depth: usize,
) -> SplitResult<IoStatus> {
    write_with(
        target,
        buf,
        total_blocks,
        start_lba,
        SplitConfig::new(chunk_blocks, queue_depth),
        BlockPayload,
    )
}

pub fn read_with<T, P>(
    target: &T,
    buf: &mut [u8],
    total_blocks: u64,
    start_lba: u64,
    config: SplitConfig,
    payload: P,
) -> SplitResult<IoStatus>
where
    T: Transport,
    P: PayloadBuilder,
{
    let buffer = BufferRef::from_mut(buf);
    run(
        initialize(
            target,
            payload,
            OpCode::Read,
            buffer,
            total_blocks,
            start_lba,
            config,
        )?,
    )
}

pub fn write_with<T, P>(
    target: &T,
    buf: &[u8],
    total_blocks: u64,
    start_lba: u64,
    config: SplitConfig,
    payload: P,
) -> SplitResult<IoStatus>
where
    T: Transport,
    P: PayloadBuilder,
{
    let buffer = BufferRef::from_ref(buf);
    run(
        initialize(
            target,
            payload,
            OpCode::Write,
            buffer,
            total_blocks,
            start_lba,
            config,
        )?,
    )
}

fn run<T: Transport, P: PayloadBuilder>(mut ctx: SplitContext<T, P>) -> SplitResult<IoStatus> {
    metrics::record_request();
    let armed = ctx.prime();
    ctx.dispatch(armed);
    Ok(ctx.wait())
}

/// Validate the request and allocate its slot pool. Nothing is submitted.
pub(crate) fn initialize<T, P>(
    transport: &T,
    payload: P,
    opcode: OpCode,
    buffer: BufferRef,
    total_blocks: u64,
    start_lba: u64,
    config: SplitConfig,
) -> SplitResult<SplitContext<T, P>>
where
    T: Transport,
    P: PayloadBuilder,
{
    let target = transport.target();
    let block_size = transport.block_size();
    if block_size == 0 {
        return Err(SplitError::invalid("target block size must be non-zero"));
    }
    config.validate(total_blocks)?;
    let expected = total_blocks
        .checked_mul(block_size as u64)
        .and_then(|len| usize::try_from(len).ok())
        .ok_or_else(|| SplitError::invalid("request length overflows"))?;
    if buffer.len() != expected {
        return Err(SplitError::invalid(format!(
            "buffer holds {} bytes, request needs {expected}",
            buffer.len()
        )));
    }
    if start_lba.checked_add(total_blocks).is_none() {
        return Err(SplitError::invalid("request range overflows the LBA space"));
    }
    if let Some(max) = payload.max_chunk_bytes() {
        let chunk_bytes = config.chunk_blocks as u64 * block_size as u64;
        if total_blocks > 0 && chunk_bytes > max {
            return Err(SplitError::invalid(format!(
                "chunk of {chunk_bytes} bytes exceeds payload limit {max}"
            )));
        }
    }

    let pool = SlotPool::allocate(transport, config.queue_depth)?;
    let (signal, done) = oneshot::channel();
    debug!(
        target_id = %target,
        op = %opcode,
        start_lba,
        total_blocks,
        chunk_blocks = config.chunk_blocks,
        queue_depth = config.queue_depth,
        "split request start"
    );
    let shared = Shared {
        transport: transport.clone(),
        payload,
        target,
        opcode,
        buffer,
        start_lba,
        total_blocks,
        chunk_blocks: config.chunk_blocks,
        queue_depth: config.queue_depth,
        effective_depth: config.effective_depth(total_blocks),
        block_size,
        state: Mutex::new(SplitState {
            cursor: 0,
            outstanding: 0,
            status: IoStatus::Success,
            issued: 0,
            pool,
            signal: Some(signal),
            submitters: Vec::new(),
            deferred: Vec::new(),
        }),
    };
    Ok(SplitContext {
        shared: Arc::new(shared),
        done: Some(done),
        dispatched: false,
    })
}

impl<T: Transport, P: PayloadBuilder> SplitContext<T, P> {
    /// Arm idle slots with consecutive chunks until the queue is full or the
    /// range is exhausted.
    pub(crate) fn prime(&self) -> Vec<Box<Slot<T::Request>>> {
        let shared = &self.shared;
        let mut state = shared.lock();
        let mut armed = Vec::with_capacity(shared.effective_depth);
        while state.cursor < shared.total_blocks && state.outstanding < shared.queue_depth {
            let Some(mut slot) = state.pool.take() else {
                break;
            };
            if !shared.carve(&mut state, &mut slot) {
                state.pool.put_back(slot);
                break;
            }
            armed.push(slot);
        }
        armed
    }

    /// Submit every primed slot. With nothing to submit the request is
    /// finished here.
    pub(crate) fn dispatch(&mut self, armed: Vec<Box<Slot<T::Request>>>) {
        self.dispatched = true;
        if armed.is_empty() {
            let signal = {
                let mut state = self.shared.lock();
                if state.outstanding == 0 {
                    state.signal.take().map(|signal| (signal, state.status))
                } else {
                    None
                }
            };
            if let Some((signal, status)) = signal {
                let _ = signal.send(status);
            }
            return;
        }
        for slot in armed {
            Shared::submit(&self.shared, slot);
        }
    }
}

impl<T: Transport, P: PayloadBuilder> Shared<T, P> {
    /// Hand a slot to the transport. Refusals are folded like completions
    /// and any re-armed slot is retried in the same loop.
    ///
    /// A transport may complete an operation from inside its own `submit`.
    /// The re-armed slot is then deferred to the loop already running on
    /// this thread, so stack depth stays flat however many chunks complete
    /// inline.
    fn submit(this: &Arc<Self>, slot: Box<Slot<T::Request>>) {
        let me = thread::current().id();
        {
            let mut state = this.lock();
            if state.submitters.contains(&me) {
                state.deferred.push((me, slot));
                return;
            }
            state.submitters.push(me);
        }
        let mut next = Some(slot);
        loop {
            if let Some(slot) = next.take() {
                next = Shared::submit_one(this, slot);
                continue;
            }
            let mut state = this.lock();
            match state.deferred.iter().position(|(owner, _)| *owner == me) {
                Some(at) => next = Some(state.deferred.swap_remove(at).1),
                None => {
                    state.submitters.retain(|owner| *owner != me);
                    return;
                }
            }
        }
    }

    /// Submit one slot. Returns the slot re-armed after a refusal.
    fn submit_one(
        this: &Arc<Self>,
        mut slot: Box<Slot<T::Request>>,
    ) -> Option<Box<Slot<T::Request>>> {
        slot.mark_submitted();
        trace!(
            target_id = %this.target,
            slot = slot.index(),
            lba = slot.descriptor().lba,
            blocks = slot.descriptor().blocks,
            "submit sub-operation"
        );
        metrics::record_submitted();
        let sink: Arc<dyn CompletionSink<T::Request>> = this.clone();
        let op = SubOperation::new(slot, sink, this.target);
        match this.transport.submit(op) {
            Ok(()) => None,
            Err(refused) => {
                let (op, status) = refused.into_parts();
                debug!(target_id = %this.target, ?status, "submission refused");
                op.into_slot().and_then(|slot| this.fold(slot, status))
            }
        }
    }

    /// Account for one finished sub-operation. Returns the slot re-armed
    /// with the next chunk, or `None` once it has been retired.
    fn fold(
        &self,
        mut slot: Box<Slot<T::Request>>,
        transport_status: TransportStatus,
    ) -> Option<Box<Slot<T::Request>>> {
        let descriptor = *slot.descriptor();
        let outcome = classify(transport_status, descriptor.status, descriptor.qualifier);
        let latency = slot
            .armed_at()
            .map(|armed| armed.elapsed())
            .unwrap_or_default();
        metrics::observe_sub_op(descriptor.byte_len(), latency, outcome);
        trace!(
            target_id = %self.target,
            slot = slot.index(),
            lba = descriptor.lba,
            blocks = descriptor.blocks,
            ?transport_status,
            block_status = ?descriptor.status,
            "sub-operation complete"
        );
        if outcome.is_failure() {
            warn!(
                target_id = %self.target,
                lba = descriptor.lba,
                blocks = descriptor.blocks,
                ?transport_status,
                block_status = ?descriptor.status,
                qualifier = ?descriptor.qualifier,
                %outcome,
                "sub-operation failed"
            );
        }

        let (rearmed, signal) = {
            let mut state = self.lock();
            debug_assert!(state.outstanding > 0);
            state.outstanding = state.outstanding.saturating_sub(1);
            state.status = state.status.merge(outcome);
            if self.carve(&mut state, &mut slot) {
                (Some(slot), None)
            } else {
                state.pool.put_back(slot);
                let signal = if state.outstanding == 0 {
                    state.signal.take().map(|signal| (signal, state.status))
                } else {
                    None
                };
                (None, signal)
            }
        };
        if let Some((signal, status)) = signal {
            let _ = signal.send(status);
        }
        rearmed
    }
}

impl<T: Transport, P: PayloadBuilder> CompletionSink<T::Request> for Shared<T, P> {
    fn complete(self: Arc<Self>, slot: Box<Slot<T::Request>>, status: TransportStatus) {
        if let Some(slot) = self.fold(slot, status) {
            Shared::submit(&self, slot);
        }
    }
}
