use core::fmt;

pub type SplitResult<T> = core::result::Result<T, SplitError>;

/// Local failures raised before any sub-operation is issued.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SplitErrorKind {
    /// Parameters do not describe a valid request.
    InvalidRequest,
    /// The slot pool could not be allocated.
    ResourceExhausted,
}

#[derive(Clone, Debug)]
pub struct SplitError {
    kind: SplitErrorKind,
    message: Option<String>,
}

impl SplitError {
    pub const fn new(kind: SplitErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    pub fn with_message(kind: SplitErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::with_message(SplitErrorKind::InvalidRequest, message)
    }

    pub fn kind(&self) -> SplitErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for SplitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(msg) => write!(f, "{:?}: {}", self.kind, msg),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl std::error::Error for SplitError {}
