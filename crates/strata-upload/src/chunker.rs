use std::io;

use bytes::Bytes;
use strata_storage::multipart::MAX_PART_NUMBER;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One contiguous slice of the input, owned by whoever holds the task.
#[derive(Debug)]
pub struct PartTask {
    pub part_number: u32,
    pub payload: Bytes,
}

impl PartTask {
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkLimits {
    pub part_size: usize,
    /// Highest part number the store accepts.
    pub max_parts: u32,
    /// A first part that is also the last one and no larger than this is
    /// returned in [`ChunkReport::inline`] instead of being queued.
    pub inline_threshold: usize,
}

impl ChunkLimits {
    pub fn new(part_size: usize) -> Self {
        Self {
            part_size,
            max_parts: MAX_PART_NUMBER,
            inline_threshold: 0,
        }
    }
}

/// What the chunker did before it closed the task channel.
#[derive(Debug, Default)]
pub struct ChunkReport {
    pub parts_emitted: u32,
    pub bytes_emitted: u64,
    pub cancelled: bool,
    pub read_error: Option<io::Error>,
    /// The whole input, when it was small enough to skip multipart.
    pub inline: Option<Bytes>,
}

/// Reads `source` in `part_size` slices and feeds them to `tasks` numbered
/// from 1. Blocks when the channel is full. A read failure, or input that
/// needs more than `max_parts` parts, cancels the pipeline and is returned in
/// the report rather than as a task. The sender is dropped on return, which
/// closes the channel for the workers.
pub async fn run_chunker<R>(
    cancel: CancellationToken,
    mut source: R,
    limits: ChunkLimits,
    tasks: mpsc::Sender<PartTask>,
) -> ChunkReport
where
    R: AsyncRead + Unpin,
{
    let mut report = ChunkReport::default();
    let mut part_number: u32 = 1;
    let part_size = limits.part_size.max(1);

    loop {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }

        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                report.cancelled = true;
                break;
            }
            read = read_part(&mut source, part_size) => read,
        };

        let payload = match read {
            Ok(payload) => payload,
            Err(err) => {
                warn!(part_number, error = %err, "source read failed, cancelling upload pipeline");
                cancel.cancel();
                report.read_error = Some(err);
                break;
            }
        };

        if payload.is_empty() {
            break;
        }

        let last = payload.len() < part_size;
        if part_number == 1 && last && payload.len() <= limits.inline_threshold {
            debug!(size = payload.len(), "input fits in a single put");
            report.inline = Some(payload);
            break;
        }
        if part_number > limits.max_parts {
            warn!(max_parts = limits.max_parts, part_size, "input exceeds the store part limit, cancelling upload pipeline");
            cancel.cancel();
            report.read_error = Some(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "input needs more than {} parts of {part_size} bytes",
                    limits.max_parts
                ),
            ));
            break;
        }

        let size = payload.len() as u64;
        let task = PartTask {
            part_number,
            payload,
        };

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                report.cancelled = true;
                break;
            }
            sent = tasks.send(task) => sent,
        };
        if sent.is_err() {
            // every worker is gone
            report.cancelled = true;
            break;
        }

        report.parts_emitted = part_number;
        report.bytes_emitted += size;
        debug!(part_number, size, "queued part");

        if last {
            break;
        }
        let Some(next) = part_number.checked_add(1) else {
            cancel.cancel();
            report.read_error = Some(io::Error::other("part number space exhausted"));
            break;
        };
        part_number = next;
    }

    report
}

/// Fills a fresh buffer with up to `part_size` bytes. Returns fewer bytes
/// only at end of stream.
async fn read_part<R>(source: &mut R, part_size: usize) -> io::Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0_u8; part_size];
    let mut filled = 0;
    while filled < part_size {
        match source.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    buf.truncate(filled);
    Ok(Bytes::from(buf))
}
