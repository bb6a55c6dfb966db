use std::time::Instant;

use splitio_proto::{OpCode, OperationDescriptor};
use tracing::{trace, warn};

use crate::error::{SplitError, SplitErrorKind, SplitResult};
use crate::sg::SgList;
use crate::transport::{RequestHandle, Transport};

/// Where a slot is in its submit/complete cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Armed,
    Submitted,
}

/// Reusable carrier for one sub-operation, bound to one request handle for
/// the whole split request.
pub struct Slot<R> {
    index: usize,
    request: R,
    descriptor: OperationDescriptor,
    sg: SgList,
    state: SlotState,
    armed_at: Option<Instant>,
}

impl<R: RequestHandle> Slot<R> {
    fn new(index: usize, request: R) -> Self {
        Self {
            index,
            request,
            descriptor: OperationDescriptor::new(OpCode::Read, 0, 0, 0, 0),
            sg: SgList::empty(),
            state: SlotState::Idle,
            armed_at: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn descriptor(&self) -> &OperationDescriptor {
        &self.descriptor
    }

    pub(crate) fn descriptor_mut(&mut self) -> &mut OperationDescriptor {
        &mut self.descriptor
    }

    pub fn sg_list(&self) -> &SgList {
        &self.sg
    }

    pub fn request(&self) -> &R {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut R {
        &mut self.request
    }

    pub(crate) fn armed_at(&self) -> Option<Instant> {
        self.armed_at
    }

    pub(crate) fn data(&self) -> &[u8] {
        // Safety: an armed slot points at a chunk of the caller buffer that
        // stays borrowed until the split request finishes, and no other slot
        // covers it. Idle slots hold an empty list.
        unsafe { self.sg.as_slice() }
    }

    pub(crate) fn read_buffer(&mut self) -> Option<&mut [u8]> {
        if self.descriptor.op != OpCode::Read {
            return None;
        }
        // Safety: read requests borrow the caller buffer mutably, and the
        // chunk is owned by whoever holds this slot.
        Some(unsafe { self.sg.as_mut_slice() })
    }

    /// Load a fresh descriptor and payload view for the next chunk.
    pub(crate) fn arm(&mut self, descriptor: OperationDescriptor, sg: SgList) {
        self.request.reset();
        self.descriptor = descriptor;
        self.sg = sg;
        self.state = SlotState::Armed;
        self.armed_at = Some(Instant::now());
    }

    pub(crate) fn mark_submitted(&mut self) {
        self.state = SlotState::Submitted;
    }

    pub(crate) fn retire(&mut self) {
        self.sg.clear();
        self.state = SlotState::Idle;
        self.armed_at = None;
    }
}

/// Fixed set of slots for one split request.
pub struct SlotPool<R> {
    idle: Vec<Box<Slot<R>>>,
    capacity: usize,
}

impl<R: RequestHandle> SlotPool<R> {
    /// Allocate `capacity` slots and a request handle for each. Handles
    /// allocated before a failure are dropped again.
    pub fn allocate<T>(transport: &T, capacity: usize) -> SplitResult<Self>
    where
        T: Transport<Request = R>,
    {
        let mut idle = Vec::new();
        if let Err(err) = idle.try_reserve_exact(capacity) {
            warn!(
                target_id = %transport.target(),
                capacity,
                error = %err,
                "slot pool reservation failed"
            );
            return Err(SplitError::with_message(
                SplitErrorKind::ResourceExhausted,
                format!("cannot reserve {capacity} slots: {err}"),
            ));
        }
        for index in 0..capacity {
            match transport.allocate_request() {
                Ok(request) => idle.push(Box::new(Slot::new(index, request))),
                Err(err) => {
                    warn!(
                        target_id = %transport.target(),
                        allocated = index,
                        capacity,
                        error = %err,
                        "request handle allocation failed"
                    );
                    if let Err(probe) = transport.probe() {
                        warn!(
                            target_id = %transport.target(),
                            error = %probe,
                            "target probe failed"
                        );
                    }
                    drop(idle);
                    return Err(SplitError::with_message(
                        SplitErrorKind::ResourceExhausted,
                        format!("allocated {index} of {capacity} request handles: {err}"),
                    ));
                }
            }
        }
        trace!(capacity, "slot pool allocated");
        Ok(Self { idle, capacity })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn idle(&self) -> usize {
        self.idle.len()
    }

    /// True once every slot is back in the pool.
    pub fn is_full(&self) -> bool {
        self.idle.len() == self.capacity
    }

    pub(crate) fn take(&mut self) -> Option<Box<Slot<R>>> {
        self.idle.pop()
    }

    pub(crate) fn put_back(&mut self, mut slot: Box<Slot<R>>) {
        slot.retire();
        self.idle.push(slot);
    }

    /// Hand out every idle slot so their request handles can be dropped.
    pub(crate) fn drain(&mut self) -> Vec<Box<Slot<R>>> {
        std::mem::take(&mut self.idle)
    }
}
