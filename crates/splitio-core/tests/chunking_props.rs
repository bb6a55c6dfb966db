mod common;

use common::{Outcome, ScriptedTransport, patterned};
use proptest::prelude::*;
use splitio_core::{IoStatus, read};
use std::sync::Arc;
use std::time::Duration;

const BS: u32 = 64;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn chunks_cover_the_range_exactly_once(
        total in 0u64..96,
        chunk in 1u32..12,
        depth in 1usize..6,
        start in 0u64..10_000,
    ) {
        let transport = ScriptedTransport::with_options(
            BS,
            3,
            usize::MAX,
            Duration::ZERO,
            Arc::new(|_, _| Outcome::OK),
        );
        let mut buf = vec![0u8; (total * BS as u64) as usize];
        let status = read(&transport, &mut buf, total, start, chunk, depth).unwrap();
        prop_assert_eq!(status, IoStatus::Success);

        let issued = transport.issued_by_lba();
        prop_assert_eq!(issued.len() as u64, total.div_ceil(chunk as u64));
        let mut cursor = start;
        for op in &issued {
            prop_assert_eq!(op.lba, cursor);
            let remaining = start + total - cursor;
            prop_assert_eq!(op.blocks as u64, remaining.min(chunk as u64));
            cursor += op.blocks as u64;
        }
        prop_assert_eq!(cursor, start + total);

        let bound = depth.min(issued.len());
        prop_assert!(transport.max_inflight() <= bound);
        prop_assert!(issued.iter().all(|op| op.slot < depth));
        prop_assert_eq!(buf, patterned(BS, start, total));
        prop_assert_eq!(transport.live_requests(), 0);
    }
}
