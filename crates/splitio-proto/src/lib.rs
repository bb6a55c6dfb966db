#![no_std]

use core::{convert::TryFrom, fmt};

/// Number of bytes in an encoded [`OperationDescriptor`].
pub const DESCRIPTOR_LEN: usize = 32;
/// Number of bytes in an encoded [`LegacyRequest`].
pub const LEGACY_REQUEST_LEN: usize = 20;
/// Descriptor flag asking the target to validate written data.
pub const FLAG_CHECK_CHECKSUM: u32 = 1 << 1;

/// Errors surfaced while decoding descriptors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtoError {
    /// Buffer length did not match the encoding.
    InvalidLength { expected: usize, actual: usize },
    /// Opcode is not a block read or write.
    InvalidOpcode(u8),
    /// Status byte is not a known [`BlockStatus`].
    InvalidStatus(u8),
    /// Qualifier byte is not a known [`BlockQualifier`].
    InvalidQualifier(u8),
    /// Field value failed validation.
    InvalidValue(&'static str),
}

impl fmt::Display for ProtoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtoError::InvalidLength { expected, actual } => {
                write!(f, "invalid descriptor length {actual}, expected {expected}")
            }
            ProtoError::InvalidOpcode(op) => write!(f, "invalid opcode {op}"),
            ProtoError::InvalidStatus(status) => write!(f, "invalid block status {status}"),
            ProtoError::InvalidQualifier(qualifier) => {
                write!(f, "invalid block qualifier {qualifier}")
            }
            ProtoError::InvalidValue(field) => write!(f, "invalid field value: {field}"),
        }
    }
}

/// Result alias for descriptor parsing.
pub type Result<T> = core::result::Result<T, ProtoError>;

/// Direction of a split request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Read = 0,
    Write = 1,
}

impl OpCode {
    pub const fn is_write(self) -> bool {
        matches!(self, OpCode::Write)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            OpCode::Read => "read",
            OpCode::Write => "write",
        }
    }
}

impl TryFrom<u8> for OpCode {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Read),
            1 => Ok(Self::Write),
            other => Err(ProtoError::InvalidOpcode(other)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        op as u8
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque identity of the object sub-operations are addressed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u32);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target#{}", self.0)
    }
}

/// Completion status a target writes into a descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlockStatus {
    /// Not yet filled in by the target.
    Invalid = 0,
    Success = 1,
    Timeout = 2,
    MediaError = 3,
    IoFailed = 4,
    RequestAborted = 5,
    NotReady = 6,
    InvalidRequest = 7,
}

impl BlockStatus {
    pub const fn is_success(self) -> bool {
        matches!(self, BlockStatus::Success)
    }
}

impl TryFrom<u8> for BlockStatus {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Invalid),
            1 => Ok(Self::Success),
            2 => Ok(Self::Timeout),
            3 => Ok(Self::MediaError),
            4 => Ok(Self::IoFailed),
            5 => Ok(Self::RequestAborted),
            6 => Ok(Self::NotReady),
            7 => Ok(Self::InvalidRequest),
            other => Err(ProtoError::InvalidStatus(other)),
        }
    }
}

impl From<BlockStatus> for u8 {
    fn from(status: BlockStatus) -> Self {
        status as u8
    }
}

/// Refinement of a [`BlockStatus`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlockQualifier {
    None = 0,
    InsufficientResources = 1,
    RetryPossible = 2,
    RetryNotPossible = 3,
    DataLost = 4,
    InvalidSgList = 5,
    InvalidBlockSize = 6,
    CapacityExceeded = 7,
    Unsupported = 8,
    ChecksumMismatch = 9,
}

impl TryFrom<u8> for BlockQualifier {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::InsufficientResources),
            2 => Ok(Self::RetryPossible),
            3 => Ok(Self::RetryNotPossible),
            4 => Ok(Self::DataLost),
            5 => Ok(Self::InvalidSgList),
            6 => Ok(Self::InvalidBlockSize),
            7 => Ok(Self::CapacityExceeded),
            8 => Ok(Self::Unsupported),
            9 => Ok(Self::ChecksumMismatch),
            other => Err(ProtoError::InvalidQualifier(other)),
        }
    }
}

impl From<BlockQualifier> for u8 {
    fn from(qualifier: BlockQualifier) -> Self {
        qualifier as u8
    }
}

/// One sub-request: a contiguous block range plus the status pair the target
/// reports back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationDescriptor {
    pub op: OpCode,
    pub lba: u64,
    pub blocks: u32,
    pub block_size: u32,
    pub flags: u32,
    pub status: BlockStatus,
    pub qualifier: BlockQualifier,
}

impl OperationDescriptor {
    /// Build a descriptor whose status has not been filled in yet.
    pub const fn new(op: OpCode, lba: u64, blocks: u32, block_size: u32, flags: u32) -> Self {
        Self {
            op,
            lba,
            blocks,
            block_size,
            flags,
            status: BlockStatus::Invalid,
            qualifier: BlockQualifier::None,
        }
    }

    /// Number of payload bytes covered by the descriptor.
    pub const fn byte_len(&self) -> u64 {
        self.blocks as u64 * self.block_size as u64
    }

    /// First LBA past the described range.
    pub const fn end_lba(&self) -> u64 {
        self.lba.saturating_add(self.blocks as u64)
    }

    pub const fn checksum_required(&self) -> bool {
        (self.flags & FLAG_CHECK_CHECKSUM) != 0
    }

    pub fn set_status(&mut self, status: BlockStatus, qualifier: BlockQualifier) {
        self.status = status;
        self.qualifier = qualifier;
    }

    pub fn encode(self) -> [u8; DESCRIPTOR_LEN] {
        let mut buf = [0u8; DESCRIPTOR_LEN];
        buf[0] = u8::from(self.op);
        buf[1] = u8::from(self.status);
        buf[2] = u8::from(self.qualifier);
        buf[4..8].copy_from_slice(&self.flags.to_le_bytes());
        buf[8..16].copy_from_slice(&self.lba.to_le_bytes());
        buf[16..20].copy_from_slice(&self.blocks.to_le_bytes());
        buf[20..24].copy_from_slice(&self.block_size.to_le_bytes());
        buf
    }

    pub fn decode(bytes: [u8; DESCRIPTOR_LEN]) -> Result<Self> {
        let op = OpCode::try_from(bytes[0])?;
        let status = BlockStatus::try_from(bytes[1])?;
        let qualifier = BlockQualifier::try_from(bytes[2])?;
        if bytes[3] != 0 || bytes[24..32].iter().any(|b| *b != 0) {
            return Err(ProtoError::InvalidValue(
                "descriptor reserved fields must be zero",
            ));
        }
        let flags = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let lba = u64::from_le_bytes([
            bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
        ]);
        let blocks = u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        let block_size = u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
        if block_size == 0 {
            return Err(ProtoError::InvalidValue("block size must be non-zero"));
        }
        Ok(Self {
            op,
            lba,
            blocks,
            block_size,
            flags,
            status,
            qualifier,
        })
    }
}

impl TryFrom<&[u8]> for OperationDescriptor {
    type Error = ProtoError;

    fn try_from(value: &[u8]) -> Result<Self> {
        if value.len() != DESCRIPTOR_LEN {
            return Err(ProtoError::InvalidLength {
                expected: DESCRIPTOR_LEN,
                actual: value.len(),
            });
        }
        let mut buf = [0u8; DESCRIPTOR_LEN];
        buf.copy_from_slice(value);
        Self::decode(buf)
    }
}

/// Older byte-addressed request shape without a status pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LegacyRequest {
    pub op: OpCode,
    pub lba: u64,
    pub byte_len: u32,
    pub flags: u32,
}

impl LegacyRequest {
    pub const fn new(op: OpCode, lba: u64, byte_len: u32, flags: u32) -> Self {
        Self {
            op,
            lba,
            byte_len,
            flags,
        }
    }

    pub fn encode(self) -> [u8; LEGACY_REQUEST_LEN] {
        let mut buf = [0u8; LEGACY_REQUEST_LEN];
        buf[0] = u8::from(self.op);
        buf[4..12].copy_from_slice(&self.lba.to_le_bytes());
        buf[12..16].copy_from_slice(&self.byte_len.to_le_bytes());
        buf[16..20].copy_from_slice(&self.flags.to_le_bytes());
        buf
    }

    pub fn decode(bytes: [u8; LEGACY_REQUEST_LEN]) -> Result<Self> {
        let op = OpCode::try_from(bytes[0])?;
        let mut lba_bytes = [0u8; 8];
        lba_bytes.copy_from_slice(&bytes[4..12]);
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&bytes[12..16]);
        let mut flag_bytes = [0u8; 4];
        flag_bytes.copy_from_slice(&bytes[16..20]);
        Ok(Self {
            op,
            lba: u64::from_le_bytes(lba_bytes),
            byte_len: u32::from_le_bytes(len_bytes),
            flags: u32::from_le_bytes(flag_bytes),
        })
    }

    /// Convert into a block descriptor; `byte_len` must be a whole number of
    /// blocks.
    pub fn into_descriptor(self, block_size: u32) -> Result<OperationDescriptor> {
        if block_size == 0 {
            return Err(ProtoError::InvalidValue("block size must be non-zero"));
        }
        if self.byte_len % block_size != 0 {
            return Err(ProtoError::InvalidValue(
                "byte_len must be multiple of block_size",
            ));
        }
        Ok(OperationDescriptor::new(
            self.op,
            self.lba,
            self.byte_len / block_size,
            block_size,
            self.flags,
        ))
    }
}

impl TryFrom<&[u8]> for LegacyRequest {
    type Error = ProtoError;

    fn try_from(value: &[u8]) -> Result<Self> {
        if value.len() != LEGACY_REQUEST_LEN {
            return Err(ProtoError::InvalidLength {
                expected: LEGACY_REQUEST_LEN,
                actual: value.len(),
            });
        }
        let mut buf = [0u8; LEGACY_REQUEST_LEN];
        buf.copy_from_slice(value);
        Self::decode(buf)
    }
}
