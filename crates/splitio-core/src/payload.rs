use splitio_proto::{FLAG_CHECK_CHECKSUM, LegacyRequest, OpCode, OperationDescriptor};

/// Builds the descriptor for each carved chunk.
pub trait PayloadBuilder: Send + Sync + 'static {
    fn build(&self, op: OpCode, lba: u64, blocks: u32, block_size: u32) -> OperationDescriptor;

    /// Largest chunk in bytes the descriptor shape can express.
    fn max_chunk_bytes(&self) -> Option<u64> {
        None
    }
}

/// Current descriptor shape. Writes ask the target to check data integrity.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlockPayload;

impl PayloadBuilder for BlockPayload {
    fn build(&self, op: OpCode, lba: u64, blocks: u32, block_size: u32) -> OperationDescriptor {
        let flags = if op.is_write() { FLAG_CHECK_CHECKSUM } else { 0 };
        OperationDescriptor::new(op, lba, blocks, block_size, flags)
    }
}

/// Byte-length request shape used by older targets; carries no flags.
#[derive(Clone, Copy, Debug, Default)]
pub struct LegacyPayload;

impl PayloadBuilder for LegacyPayload {
    fn build(&self, op: OpCode, lba: u64, blocks: u32, block_size: u32) -> OperationDescriptor {
        let byte_len = (blocks as u64 * block_size as u64).min(u32::MAX as u64) as u32;
        match LegacyRequest::new(op, lba, byte_len, 0).into_descriptor(block_size) {
            Ok(descriptor) => descriptor,
            // Chunk sizes are validated against max_chunk_bytes up front.
            Err(_) => OperationDescriptor::new(op, lba, blocks, block_size, 0),
        }
    }

    fn max_chunk_bytes(&self) -> Option<u64> {
        Some(u32::MAX as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_payload_flags_writes_only() {
        let write = BlockPayload.build(OpCode::Write, 10, 4, 512);
        assert!(write.checksum_required());
        assert_eq!(write.lba, 10);
        assert_eq!(write.blocks, 4);
        let read = BlockPayload.build(OpCode::Read, 10, 4, 512);
        assert!(!read.checksum_required());
    }

    #[test]
    fn legacy_payload_matches_geometry() {
        let desc = LegacyPayload.build(OpCode::Write, 3, 8, 4096);
        assert_eq!(desc.blocks, 8);
        assert_eq!(desc.byte_len(), 8 * 4096);
        assert_eq!(desc.flags, 0);
        assert_eq!(LegacyPayload.max_chunk_bytes(), Some(u32::MAX as u64));
        assert_eq!(BlockPayload.max_chunk_bytes(), None);
    }
}
