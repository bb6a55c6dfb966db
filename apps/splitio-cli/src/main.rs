use anyhow::{Context, Result, ensure};
use clap::{Parser, Subcommand};
use splitio_blocksources::{FileBlockSource, RandomBlockSource};
use splitio_core::config::{DEFAULT_CHUNK_BLOCKS, DEFAULT_QUEUE_DEPTH};
use splitio_core::{
    BlockPayload, BlockSource, IoStatus, LegacyPayload, SplitConfig, SplitResult, TargetId,
    WorkerPool, WorkerPoolConfig, WorkerTransport, metrics, read_with, write_with,
};
use std::{path::PathBuf, sync::Arc};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "splitio")]
#[command(about = "Bounded, chunked block I/O against a file", long_about = None)]
struct Args {
    /// Disk image or block device to operate on
    #[arg(long, value_name = "PATH")]
    file: PathBuf,
    /// Logical block size (bytes)
    #[arg(long, default_value_t = 512)]
    block_size: u32,
    /// Blocks per sub-operation
    #[arg(long, default_value_t = DEFAULT_CHUNK_BLOCKS)]
    chunk_blocks: u32,
    /// Maximum sub-operations in flight
    #[arg(long, default_value_t = DEFAULT_QUEUE_DEPTH)]
    queue_depth: usize,
    /// Worker threads executing sub-operations
    #[arg(long, default_value_t = 4)]
    workers: usize,
    /// Sub-operations that may wait for a worker
    #[arg(long, default_value_t = 64)]
    queue_capacity: usize,
    /// First block of the request
    #[arg(long, default_value_t = 0)]
    lba: u64,
    /// Number of blocks; defaults to the rest of the file or the input length
    #[arg(long)]
    blocks: Option<u64>,
    /// Build sub-operations with the legacy byte-length request shape
    #[arg(long)]
    legacy_payload: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Read blocks into a local file
    Read {
        #[arg(long, value_name = "PATH")]
        output: PathBuf,
    },
    /// Write a local file into the target
    Write {
        #[arg(long, value_name = "PATH")]
        input: PathBuf,
    },
    /// Write a seeded pattern, read it back and compare
    Verify {
        #[arg(long, default_value_t = 0x5eed)]
        seed: u64,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let source = FileBlockSource::open(&args.file, args.block_size)
        .await
        .context("open block source")?;
    let capacity = source.total_blocks().await.context("query source size")?;
    info!(
        path = %args.file.display(),
        block_size = args.block_size,
        capacity,
        writable = source.is_writable(),
        "opened target"
    );

    tokio::task::spawn_blocking(move || run(args, source, capacity))
        .await
        .context("join split worker")??;

    let snapshot = metrics::snapshot();
    info!(
        requests = snapshot.requests,
        sub_ops = snapshot.sub_ops.count,
        bytes = snapshot.sub_ops.bytes,
        avg_ns = snapshot.sub_ops.avg_ns,
        max_ns = snapshot.sub_ops.max_ns,
        max_inflight = snapshot.max_inflight,
        failures = snapshot.sub_op_failures,
        "done"
    );
    Ok(())
}

struct Splitter {
    config: SplitConfig,
    legacy: bool,
}

impl Splitter {
    fn read(
        &self,
        target: &WorkerTransport,
        buf: &mut [u8],
        blocks: u64,
        lba: u64,
    ) -> SplitResult<IoStatus> {
        if self.legacy {
            read_with(target, buf, blocks, lba, self.config, LegacyPayload)
        } else {
            read_with(target, buf, blocks, lba, self.config, BlockPayload)
        }
    }

    fn write(
        &self,
        target: &WorkerTransport,
        buf: &[u8],
        blocks: u64,
        lba: u64,
    ) -> SplitResult<IoStatus> {
        if self.legacy {
            write_with(target, buf, blocks, lba, self.config, LegacyPayload)
        } else {
            write_with(target, buf, blocks, lba, self.config, BlockPayload)
        }
    }
}

fn run(args: Args, source: FileBlockSource, capacity: u64) -> Result<()> {
    let pool = WorkerPool::new(WorkerPoolConfig {
        workers: args.workers,
        queue_capacity: args.queue_capacity,
        max_requests: WorkerPoolConfig::default().max_requests.max(args.queue_depth * 2),
    })
    .context("start worker pool")?;
    let splitter = Splitter {
        config: SplitConfig::new(args.chunk_blocks, args.queue_depth),
        legacy: args.legacy_payload,
    };
    let block_size = args.block_size as usize;
    let source = Arc::new(source);
    let disk = pool.transport(TargetId(0), source.clone());

    match args.command {
        Command::Read { output } => {
            let blocks = args
                .blocks
                .unwrap_or_else(|| capacity.saturating_sub(args.lba));
            let end = args.lba.checked_add(blocks).context("request range overflows")?;
            ensure!(
                end <= capacity,
                "blocks {}..{end} past end of target ({capacity} blocks)",
                args.lba
            );
            let mut buf = vec![0u8; byte_len(blocks, block_size)?];
            let status = splitter.read(&disk, &mut buf, blocks, args.lba)?;
            ensure_success("read", status)?;
            std::fs::write(&output, &buf)
                .with_context(|| format!("write {}", output.display()))?;
            info!(lba = args.lba, blocks, output = %output.display(), "read complete");
        }
        Command::Write { input } => {
            let data =
                std::fs::read(&input).with_context(|| format!("read {}", input.display()))?;
            ensure!(
                data.len().is_multiple_of(block_size),
                "input length {} is not a multiple of the block size",
                data.len()
            );
            let available = (data.len() / block_size) as u64;
            let blocks = args.blocks.unwrap_or(available);
            ensure!(
                blocks <= available,
                "input holds {available} blocks, {blocks} requested"
            );
            let data = &data[..byte_len(blocks, block_size)?];
            let status = splitter.write(&disk, data, blocks, args.lba)?;
            ensure_success("write", status)?;
            flush(source.as_ref())?;
            info!(lba = args.lba, blocks, input = %input.display(), "write complete");
        }
        Command::Verify { seed } => {
            let blocks = args
                .blocks
                .unwrap_or_else(|| capacity.saturating_sub(args.lba));
            ensure!(blocks > 0, "nothing to verify; pass --blocks");
            let end = args.lba.checked_add(blocks).context("request range overflows")?;
            let pattern = RandomBlockSource::new(args.block_size, end, seed)?;
            let generator = pool.transport(TargetId(1), Arc::new(pattern));

            let mut expected = vec![0u8; byte_len(blocks, block_size)?];
            ensure_success(
                "pattern read",
                splitter.read(&generator, &mut expected, blocks, args.lba)?,
            )?;
            ensure_success("write", splitter.write(&disk, &expected, blocks, args.lba)?)?;
            flush(source.as_ref())?;

            let mut actual = vec![0u8; expected.len()];
            ensure_success("read back", splitter.read(&disk, &mut actual, blocks, args.lba)?)?;
            let mismatch = expected
                .chunks(block_size)
                .zip(actual.chunks(block_size))
                .position(|(want, got)| want != got);
            if let Some(block) = mismatch {
                let lba = args.lba + block as u64;
                warn!(lba, "verify mismatch");
                anyhow::bail!("block {lba} did not read back as written");
            }
            info!(lba = args.lba, blocks, seed, "verify complete");
        }
    }

    pool.shutdown();
    Ok(())
}

fn byte_len(blocks: u64, block_size: usize) -> Result<usize> {
    usize::try_from(blocks)
        .ok()
        .and_then(|blocks| blocks.checked_mul(block_size))
        .context("request too large for memory")
}

fn ensure_success(what: &str, status: IoStatus) -> Result<()> {
    ensure!(status.is_success(), "{what} finished with {status}");
    Ok(())
}

fn flush(source: &FileBlockSource) -> Result<()> {
    tokio::runtime::Handle::current()
        .block_on(source.flush())
        .context("flush target")
}
