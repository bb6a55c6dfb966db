use core::fmt;
use splitio_proto::{BlockQualifier, BlockStatus};

/// Aggregated outcome of a split request.
///
/// Variants are ordered by severity so that folding completions together is
/// a plain `max`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IoStatus {
    #[default]
    Success,
    GenericFailure,
    ResourceExhausted,
}

impl IoStatus {
    /// Fold another outcome into this one. Never improves a status.
    #[must_use]
    pub fn merge(self, other: IoStatus) -> IoStatus {
        self.max(other)
    }

    pub const fn is_success(self) -> bool {
        matches!(self, IoStatus::Success)
    }

    pub const fn is_failure(self) -> bool {
        !self.is_success()
    }
}

impl fmt::Display for IoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            IoStatus::Success => "success",
            IoStatus::GenericFailure => "generic failure",
            IoStatus::ResourceExhausted => "resource exhausted",
        };
        f.write_str(text)
    }
}

/// Status a transport reports for the delivery of one sub-operation,
/// independent of what the target wrote into the descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportStatus {
    Ok,
    InsufficientResources,
    Timeout,
    Failed,
    Disconnected,
    /// The transport dropped the sub-operation without completing it.
    Cancelled,
}

impl TransportStatus {
    pub const fn is_ok(self) -> bool {
        matches!(self, TransportStatus::Ok)
    }
}

/// Map one completion onto the aggregate vocabulary.
pub fn classify(
    transport: TransportStatus,
    status: BlockStatus,
    qualifier: BlockQualifier,
) -> IoStatus {
    match transport {
        TransportStatus::Ok => {}
        TransportStatus::InsufficientResources => return IoStatus::ResourceExhausted,
        _ => return IoStatus::GenericFailure,
    }
    if status.is_success() {
        IoStatus::Success
    } else if qualifier == BlockQualifier::InsufficientResources {
        IoStatus::ResourceExhausted
    } else {
        IoStatus::GenericFailure
    }
}
