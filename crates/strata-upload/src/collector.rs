use std::collections::BTreeMap;

use strata_storage::traits::CompletedPart;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::worker::{PartError, PartResult};

#[derive(Debug)]
pub struct PartFailure {
    pub part_number: u32,
    pub error: PartError,
}

/// Everything the collector learned from the result channel.
#[derive(Debug, Default)]
pub struct Collected {
    tags: BTreeMap<u32, String>,
    pub first_failure: Option<PartFailure>,
    pub deadline_expired: bool,
    pub results_seen: usize,
}

/// Returned when the collected tags do not cover exactly `1..=expected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncompleteParts {
    pub expected: u32,
    pub collected: usize,
}

impl Collected {
    fn record(&mut self, result: PartResult, cancel: &CancellationToken) {
        self.results_seen += 1;
        let part_number = result.part_number;

        match result.outcome {
            Ok(tag) => {
                if self.first_failure.is_none() {
                    self.tags.insert(part_number, tag);
                }
            }
            Err(error) if self.first_failure.is_none() => {
                match &error {
                    PartError::Store(err) => {
                        warn!(part_number, error = %err, "part upload failed, cancelling remaining parts");
                    }
                    PartError::Cancelled => {
                        debug!(part_number, "part cancelled before upload finished");
                    }
                }
                cancel.cancel();
                self.first_failure = Some(PartFailure { part_number, error });
            }
            Err(_) => {
                debug!(part_number, "discarding result after first failure");
            }
        }
    }

    pub fn is_failed(&self) -> bool {
        self.first_failure.is_some()
    }

    /// Tags sorted by part number, provided they are exactly the parts
    /// `1..=expected`.
    pub fn into_ordered_parts(self, expected: u32) -> Result<Vec<CompletedPart>, IncompleteParts> {
        let complete = self.first_failure.is_none()
            && self.tags.len() == expected as usize
            && (expected == 0
                || (self.tags.keys().next() == Some(&1)
                    && self.tags.keys().next_back() == Some(&expected)));
        if !complete {
            return Err(IncompleteParts {
                expected,
                collected: self.tags.len(),
            });
        }

        Ok(self
            .tags
            .into_iter()
            .map(|(part_number, tag)| CompletedPart { part_number, tag })
            .collect())
    }
}

/// Drains `results` until every worker has hung up. The first failure cancels
/// the pipeline; later results are still drained so no worker is left blocked
/// on a send. An expired `deadline` cancels the pipeline the same way.
pub async fn collect(
    cancel: &CancellationToken,
    mut results: mpsc::Receiver<PartResult>,
    deadline: Option<Instant>,
) -> Collected {
    let mut collected = Collected::default();

    loop {
        tokio::select! {
            biased;
            result = results.recv() => match result {
                Some(result) => collected.record(result, cancel),
                None => break,
            },
            _ = expire(deadline), if !collected.deadline_expired => {
                warn!("upload deadline expired, cancelling pipeline");
                collected.deadline_expired = true;
                cancel.cancel();
            }
        }
    }

    collected
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
