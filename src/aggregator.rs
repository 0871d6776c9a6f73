// src/aggregator.rs
// Buffers submitted digests and periodically commits them to one Merkle root.

use crate::merkle::{Digest, MerkleTree};
use crate::store::{CalendarStore, StoreError};
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::time::{interval, Duration};

/// The open batch. Insertion order is the leaf order of the next tree;
/// the set view makes resubmission within a window a cheap no-op.
#[derive(Default)]
struct PendingBatch {
    order: Vec<Digest>,
    seen: HashSet<Digest>,
}

impl PendingBatch {
    fn insert(&mut self, digest: Digest) -> bool {
        if self.seen.insert(digest) {
            self.order.push(digest);
            true
        } else {
            false
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Decouples submission latency from on-chain commitment cost: submissions
/// land in an in-memory batch, a background trigger folds the batch into a
/// Merkle tree and persists one commitment plus per-digest records.
pub struct Aggregator {
    store: Arc<CalendarStore>,
    batch: Mutex<PendingBatch>,
    batch_threshold: usize,
    batch_full: Notify,
}

impl Aggregator {
    pub fn new(store: Arc<CalendarStore>, batch_threshold: usize) -> Self {
        Self {
            store,
            batch: Mutex::new(PendingBatch::default()),
            batch_threshold,
            batch_full: Notify::new(),
        }
    }

    /// Accept a digest into the open batch.
    ///
    /// Idempotent: a digest already in the open batch, or already holding a
    /// timestamp record (pending or confirmed), is a no-op success.
    pub fn submit(&self, digest: Digest) -> Result<(), StoreError> {
        if self.store.get_record(&digest)?.is_some() {
            debug!("digest {} already recorded; ignoring", hex::encode(digest));
            return Ok(());
        }

        let len = {
            let mut batch = self.batch.lock();
            if !batch.insert(digest) {
                return Ok(());
            }
            batch.len()
        };

        if len >= self.batch_threshold {
            self.batch_full.notify_one();
        }
        Ok(())
    }

    /// Swap out the open batch and commit it: build the tree, persist the
    /// `Pending` commitment, then persist every digest's record against the
    /// new root. Empty batches are skipped entirely.
    ///
    /// The swap is atomic with respect to `submit`: a concurrent submission
    /// lands in exactly one of the flushed or the fresh batch.
    pub fn flush(&self) -> Result<Option<Digest>, StoreError> {
        let drained = std::mem::take(&mut *self.batch.lock());
        if drained.order.is_empty() {
            return Ok(None);
        }

        match self.commit_window(&drained.order) {
            Ok(root) => Ok(root),
            Err(e) => {
                // transient store failure: put the window back so these
                // digests ride the next flush instead of being dropped
                self.restore_window(drained.order);
                Err(e)
            }
        }
    }

    fn commit_window(&self, window: &[Digest]) -> Result<Option<Digest>, StoreError> {
        // A digest submitted while the previous flush was mid-write lands in
        // this batch even though that flush recorded it; drop those here so a
        // record is only ever written once. Flushes are serialized by the
        // run loop, so this check cannot race another flush.
        let mut leaves = Vec::with_capacity(window.len());
        for digest in window {
            if self.store.get_record(digest)?.is_none() {
                leaves.push(*digest);
            }
        }
        if leaves.is_empty() {
            return Ok(None);
        }

        let tree = MerkleTree::build(&leaves);
        let root = tree.root();

        // commitment first: a crash after this point leaves the root
        // recoverable via list_unconfirmed, records re-creatable by resubmit
        self.store.put_commitment(&root)?;
        for (i, digest) in leaves.iter().enumerate() {
            self.store.put_record(digest, tree.path(i), &root)?;
        }

        info!(
            "aggregated {} digests under commitment {}",
            leaves.len(),
            hex::encode(root)
        );
        Ok(Some(root))
    }

    /// Put a failed flush window back into the open batch, ahead of
    /// anything submitted since the swap, preserving submission order.
    /// Digests that did get recorded before the failure are filtered out
    /// again by the next flush.
    fn restore_window(&self, window: Vec<Digest>) {
        let mut batch = self.batch.lock();
        let newer = std::mem::take(&mut *batch);
        for digest in window.into_iter().chain(newer.order) {
            batch.insert(digest);
        }
    }

    /// Background flush driver: fires on the interval or as soon as the
    /// batch reaches the size threshold, whichever comes first. Stops when
    /// the shutdown signal flips; any in-flight flush completes first.
    pub async fn run(self: Arc<Self>, flush_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            "aggregator loop started (interval {}s, threshold {})",
            flush_interval.as_secs(),
            self.batch_threshold
        );
        let mut timer = interval(flush_interval);
        loop {
            tokio::select! {
                _ = timer.tick() => {}
                _ = self.batch_full.notified() => {
                    debug!("batch threshold reached; flushing early");
                }
                _ = shutdown.changed() => {
                    info!("aggregator loop stopping");
                    return;
                }
            }
            if let Err(e) = self.flush() {
                // Conflict here means two batches held the same digest,
                // which the open-batch dedup rules out; surface loudly.
                log::error!("flush failed: {}", e);
            }
        }
    }
}
