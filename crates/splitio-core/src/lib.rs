//! Bounded-concurrency splitting of block reads and writes.
//!
//! One logical request is carved into fixed-size chunks which are pushed
//! through a [`Transport`] with at most `queue_depth` of them in flight.
//! The caller blocks until the last chunk completes and gets the worst
//! outcome back as an [`IoStatus`].

pub mod block;
pub mod config;
mod context;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod payload;
pub mod sg;
pub mod slot;
pub mod status;
pub mod transport;
pub mod worker;

pub use block::{
    BlockSource, BlockSourceError, BlockSourceErrorKind, BlockSourceHandle, BlockSourceResult,
    WriteOptions,
};
pub use config::SplitConfig;
pub use dispatch::{read, read_with, write, write_with};
pub use error::{SplitError, SplitErrorKind, SplitResult};
pub use payload::{BlockPayload, LegacyPayload, PayloadBuilder};
pub use sg::{SgElement, SgList};
pub use status::{IoStatus, TransportStatus, classify};
pub use transport::{
    RequestHandle, SubOperation, SubmitError, Transport, TransportError, TransportErrorKind,
    TransportResult,
};
pub use worker::{WorkerPool, WorkerPoolConfig, WorkerRequest, WorkerTransport};

pub use splitio_proto::{BlockQualifier, BlockStatus, OpCode, OperationDescriptor, TargetId};
