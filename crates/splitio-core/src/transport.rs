use core::fmt;
use std::sync::Arc;

use splitio_proto::{BlockQualifier, BlockStatus, OpCode, OperationDescriptor, TargetId};

use crate::sg::SgList;
use crate::slot::Slot;
use crate::status::TransportStatus;

pub type TransportResult<T> = core::result::Result<T, TransportError>;

/// Describes the failure category for transport operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportErrorKind {
    InsufficientResources,
    InvalidRequest,
    Disconnected,
    Other,
}

/// Error surfaced by [`Transport`] implementations outside the completion path.
#[derive(Clone, Debug)]
pub struct TransportError {
    kind: TransportErrorKind,
    message: Option<String>,
}

impl TransportError {
    pub const fn new(kind: TransportErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    pub fn with_message(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(msg) => write!(f, "{:?}: {}", self.kind, msg),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl std::error::Error for TransportError {}

/// Per-slot request resource owned by a transport.
pub trait RequestHandle: Send + 'static {
    /// Return the handle to a submittable state before it is reused.
    fn reset(&mut self) {}
}

/// Carries sub-operations to a target and completes them asynchronously.
///
/// `submit` must not block on the completion of the operation it is handed;
/// completion happens later, usually on a transport-owned thread, through
/// [`SubOperation::complete`].
pub trait Transport: Clone + Send + Sync + 'static {
    type Request: RequestHandle;

    /// Identity of the object this transport addresses.
    fn target(&self) -> TargetId;

    /// Logical block size of the target in bytes.
    fn block_size(&self) -> u32;

    /// Allocate one reusable request handle.
    fn allocate_request(&self) -> TransportResult<Self::Request>;

    /// Queue a sub-operation. A refusal hands the operation back untouched.
    fn submit(
        &self,
        op: SubOperation<Self::Request>,
    ) -> Result<(), SubmitError<Self::Request>>;

    /// Synchronously check that the target answers. Only used for
    /// diagnostics.
    fn probe(&self) -> TransportResult<()> {
        Ok(())
    }
}

/// Receives completed slots.
pub(crate) trait CompletionSink<R>: Send + Sync {
    fn complete(self: Arc<Self>, slot: Box<Slot<R>>, status: TransportStatus);
}

/// One armed slot in flight between the engine and a transport.
///
/// Dropping a sub-operation without calling [`SubOperation::complete`]
/// completes it with [`TransportStatus::Cancelled`].
pub struct SubOperation<R: RequestHandle> {
    slot: Option<Box<Slot<R>>>,
    sink: Arc<dyn CompletionSink<R>>,
    target: TargetId,
}

impl<R: RequestHandle> SubOperation<R> {
    pub(crate) fn new(
        slot: Box<Slot<R>>,
        sink: Arc<dyn CompletionSink<R>>,
        target: TargetId,
    ) -> Self {
        Self {
            slot: Some(slot),
            sink,
            target,
        }
    }

    fn slot(&self) -> &Slot<R> {
        match self.slot.as_deref() {
            Some(slot) => slot,
            None => unreachable!("sub-operation slot taken before completion"),
        }
    }

    fn slot_mut(&mut self) -> &mut Slot<R> {
        match self.slot.as_deref_mut() {
            Some(slot) => slot,
            None => unreachable!("sub-operation slot taken before completion"),
        }
    }

    pub fn target(&self) -> TargetId {
        self.target
    }

    /// Index of the slot carrying this operation, stable across re-arms.
    pub fn slot_index(&self) -> usize {
        self.slot().index()
    }

    pub fn descriptor(&self) -> &OperationDescriptor {
        self.slot().descriptor()
    }

    pub fn opcode(&self) -> OpCode {
        self.descriptor().op
    }

    pub fn sg_list(&self) -> &SgList {
        self.slot().sg_list()
    }

    pub fn request(&self) -> &R {
        self.slot().request()
    }

    pub fn request_mut(&mut self) -> &mut R {
        self.slot_mut().request_mut()
    }

    /// Payload bytes. For writes this is the data to store, for reads it is
    /// the destination as filled so far.
    pub fn data(&self) -> &[u8] {
        self.slot().data()
    }

    /// Destination bytes of a read. `None` for writes, whose buffer is only
    /// ever shared.
    pub fn read_buffer(&mut self) -> Option<&mut [u8]> {
        self.slot_mut().read_buffer()
    }

    /// Record the target's verdict in the descriptor.
    pub fn set_block_status(&mut self, status: BlockStatus, qualifier: BlockQualifier) {
        self.slot_mut().descriptor_mut().set_status(status, qualifier);
    }

    /// Hand the operation back to the engine.
    pub fn complete(mut self, status: TransportStatus) {
        if let Some(slot) = self.slot.take() {
            Arc::clone(&self.sink).complete(slot, status);
        }
    }

    pub(crate) fn into_slot(mut self) -> Option<Box<Slot<R>>> {
        self.slot.take()
    }
}

impl<R: RequestHandle> Drop for SubOperation<R> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            Arc::clone(&self.sink).complete(slot, TransportStatus::Cancelled);
        }
    }
}

impl<R: RequestHandle> fmt::Debug for SubOperation<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("SubOperation");
        dbg.field("target", &self.target);
        if let Some(slot) = self.slot.as_deref() {
            dbg.field("slot", &slot.index())
                .field("descriptor", slot.descriptor());
        }
        dbg.finish()
    }
}

/// A submission the transport refused synchronously.
pub struct SubmitError<R: RequestHandle> {
    op: SubOperation<R>,
    status: TransportStatus,
}

impl<R: RequestHandle> SubmitError<R> {
    pub fn new(op: SubOperation<R>, status: TransportStatus) -> Self {
        Self { op, status }
    }

    pub fn status(&self) -> TransportStatus {
        self.status
    }

    pub fn into_parts(self) -> (SubOperation<R>, TransportStatus) {
        (self.op, self.status)
    }
}

impl<R: RequestHandle> fmt::Debug for SubmitError<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmitError")
            .field("op", &self.op)
            .field("status", &self.status)
            .finish()
    }
}

impl<R: RequestHandle> fmt::Display for SubmitError<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "submission refused: {:?}", self.status)
    }
}
