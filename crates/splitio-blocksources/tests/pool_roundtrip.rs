use splitio_blocksources::{
    Fault, FaultOp, FaultyBlockSource, FileBlockSource, MemoryBlockSource, RandomBlockSource,
};
use splitio_core::{
    BlockSourceErrorKind, IoStatus, TargetId, WorkerPool, WorkerPoolConfig, read, write,
};
use std::sync::Arc;

const BS: u32 = 512;

#[test]
fn random_pattern_survives_a_file_round_trip() {
    let pool = WorkerPool::new(WorkerPoolConfig::default()).unwrap();
    let pattern = RandomBlockSource::new(BS, 64, 0x5eed).unwrap();
    let generator = pool.transport(TargetId(1), Arc::new(pattern));
    let mut data = vec![0u8; 40 * BS as usize];
    assert_eq!(read(&generator, &mut data, 40, 3, 7, 4).unwrap(), IoStatus::Success);

    let file = tempfile::NamedTempFile::new().unwrap();
    let rt = tokio::runtime::Runtime::new().unwrap();
    let source = rt.block_on(FileBlockSource::open(file.path(), BS)).unwrap();
    let disk = pool.transport(TargetId(2), Arc::new(source));
    assert_eq!(write(&disk, &data, 40, 0, 6, 3).unwrap(), IoStatus::Success);

    let mut back = vec![0u8; data.len()];
    assert_eq!(read(&disk, &mut back, 40, 0, 9, 2).unwrap(), IoStatus::Success);
    assert_eq!(back, data);
    assert_eq!(std::fs::read(file.path()).unwrap(), data);
}

#[test]
fn injected_faults_fold_into_the_aggregate() {
    let pool = WorkerPool::new(WorkerPoolConfig::default()).unwrap();
    let source = Arc::new(FaultyBlockSource::new(MemoryBlockSource::new(BS, 32).unwrap()));
    let transport = pool.transport(TargetId(3), source.clone());
    let data = vec![0xC3u8; 32 * BS as usize];

    source.inject(Fault::new(10..11, FaultOp::Write, BlockSourceErrorKind::Io));
    assert_eq!(
        write(&transport, &data, 32, 0, 4, 4).unwrap(),
        IoStatus::GenericFailure
    );
    let written = source.inner().snapshot();
    assert!(written[..8 * BS as usize].iter().all(|b| *b == 0xC3));
    assert!(written[8 * BS as usize..12 * BS as usize].iter().all(|b| *b == 0));
    assert!(written[12 * BS as usize..].iter().all(|b| *b == 0xC3));

    source.clear();
    source.inject(Fault::new(0..32, FaultOp::Read, BlockSourceErrorKind::Busy).times(1));
    source.inject(Fault::new(20..21, FaultOp::Read, BlockSourceErrorKind::Io));
    let mut buf = vec![0u8; data.len()];
    assert_eq!(
        read(&transport, &mut buf, 32, 0, 4, 4).unwrap(),
        IoStatus::ResourceExhausted
    );
}
