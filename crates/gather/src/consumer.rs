//! Consumer contract for the record sequence.
//!
//! A consumer takes one record at a time in emission order. Records with an
//! error are per-item failures, not the end of the sequence.

use crate::decode::ImageDecoder;
use crate::engine::GatherEngine;
use crate::record::ImageRecord;
use std::collections::HashMap;
use tracing::debug;

/// Whether the consumer wants more records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerFlow {
    Continue,
    Stop,
}

/// Downstream stage receiving gathered records.
pub trait RecordConsumer {
    fn consume(&mut self, record: ImageRecord) -> ConsumerFlow;
}

impl<F> RecordConsumer for F
where
    F: FnMut(ImageRecord) -> ConsumerFlow,
{
    fn consume(&mut self, record: ImageRecord) -> ConsumerFlow {
        self(record)
    }
}

/// Pull records from `engine` into `consumer` until either side stops.
///
/// Returns the number of records delivered.
pub async fn drive<D, C>(engine: &mut GatherEngine<D>, consumer: &mut C) -> usize
where
    D: ImageDecoder,
    C: RecordConsumer + ?Sized,
{
    let mut delivered = 0;
    while let Some(record) = engine.next().await {
        delivered += 1;
        if consumer.consume(record) == ConsumerFlow::Stop {
            debug!(delivered, "Consumer stopped the gather");
            break;
        }
    }
    delivered
}

/// Tracks consecutive failures per watch loop.
///
/// Signals once per streak, on the record that brings it to the threshold.
#[derive(Debug, Clone)]
pub struct FailureStreaks {
    threshold: u64,
    streaks: HashMap<usize, u64>,
}

impl FailureStreaks {
    /// A threshold of zero never alerts.
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            streaks: HashMap::new(),
        }
    }

    /// Feed a record. Returns the streak length when it hits the threshold.
    pub fn observe(&mut self, record: &ImageRecord) -> Option<u64> {
        let streak = self.streaks.entry(record.context().watch_id()).or_insert(0);

        if record.is_failure() {
            *streak += 1;
            if self.threshold > 0 && *streak == self.threshold {
                return Some(*streak);
            }
        } else {
            *streak = 0;
        }
        None
    }

    /// Current streak for a watch loop.
    pub fn streak(&self, watch_id: usize) -> u64 {
        self.streaks.get(&watch_id).copied().unwrap_or(0)
    }
}
