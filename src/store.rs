// src/store.rs
// RocksDB-backed durable calendar index: timestamp records, commitments,
// and the FIFO queue of not-yet-confirmed roots.

use crate::merkle::{Digest, InclusionStep};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rocksdb::{Options, WriteBatch, WriteOptions, DB};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

const RECORD_PREFIX: &str = "record:";
const COMMITMENT_PREFIX: &str = "commitment:";
const UNCONFIRMED_PREFIX: &str = "unconfirmed:";
const SEQ_COUNTER_KEY: &str = "meta:commitment_seq";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record already exists with a different path or root")]
    Conflict,

    #[error("invalid commitment transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("no commitment stored for root {0}")]
    UnknownRoot(String),

    #[error("database error: {0}")]
    Db(String),

    #[error("corrupt stored value: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Db(e.to_string())
    }
}

/// Anchoring lifecycle of one Merkle root. Forward-only except for the
/// explicit reorg edge in [`CalendarStore::mark_reorged`]; `Confirmed` is
/// terminal under every operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitmentState {
    Pending,
    Broadcast { txid: String },
    Confirmed { txid: String, depth: u64 },
}

impl CommitmentState {
    pub fn name(&self) -> &'static str {
        match self {
            CommitmentState::Pending => "pending",
            CommitmentState::Broadcast { .. } => "broadcast",
            CommitmentState::Confirmed { .. } => "confirmed",
        }
    }
}

/// One broadcast try. The attempt whose txid appears in the commitment
/// state is the canonical one; earlier entries were abandoned to reorgs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastAttempt {
    pub txid: String,
    pub broadcast_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Commitment {
    pub root: Digest,
    /// FIFO position, assigned from a durable counter at creation.
    pub seq: u64,
    pub state: CommitmentState,
    pub attempts: Vec<BroadcastAttempt>,
    pub created_at: DateTime<Utc>,
}

/// Digest -> (inclusion path, root) association. Never deleted; the path
/// and root are immutable once written.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimestampRecord {
    pub digest: Digest,
    pub path: Vec<InclusionStep>,
    pub root: Digest,
    pub created_at: DateTime<Utc>,
}

/// Durable calendar store. Every mutation goes through a synced WriteBatch,
/// so a call that returned Ok survives an immediate crash.
pub struct CalendarStore {
    db: DB,
    // serializes state writes per root; different roots proceed concurrently
    root_locks: Mutex<HashMap<Digest, Arc<Mutex<()>>>>,
    seq_lock: Mutex<()>,
}

impl CalendarStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.increase_parallelism(num_cpus::get() as i32);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)?;
        Ok(Self {
            db,
            root_locks: Mutex::new(HashMap::new()),
            seq_lock: Mutex::new(()),
        })
    }

    fn sync_write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut wo = WriteOptions::default();
        wo.set_sync(true);
        self.db.write_opt(batch, &wo)?;
        Ok(())
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.db.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn root_lock(&self, root: &Digest) -> Arc<Mutex<()>> {
        let mut locks = self.root_locks.lock();
        locks
            .entry(*root)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn next_seq(&self) -> Result<u64, StoreError> {
        // read-modify-write under the seq lock; the write itself rides in
        // the caller's batch
        let current = match self.db.get(SEQ_COUNTER_KEY.as_bytes())? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StoreError::Db("invalid seq counter bytes".into()))?;
                u64::from_le_bytes(arr)
            }
            None => 0,
        };
        Ok(current + 1)
    }

    /// Persist the digest -> (path, root) association.
    ///
    /// Re-putting an identical record is a no-op; a record that disagrees on
    /// path or root is an invariant violation and is rejected unwritten.
    pub fn put_record(
        &self,
        digest: &Digest,
        path: Vec<InclusionStep>,
        root: &Digest,
    ) -> Result<(), StoreError> {
        let key = record_key(digest);
        if let Some(existing) = self.get_json::<TimestampRecord>(&key)? {
            if existing.root == *root && existing.path == path {
                return Ok(());
            }
            return Err(StoreError::Conflict);
        }

        let record = TimestampRecord {
            digest: *digest,
            path,
            root: *root,
            created_at: Utc::now(),
        };
        let mut batch = WriteBatch::default();
        batch.put(key.as_bytes(), serde_json::to_vec(&record)?);
        self.sync_write(batch)
    }

    pub fn get_record(&self, digest: &Digest) -> Result<Option<TimestampRecord>, StoreError> {
        self.get_json(&record_key(digest))
    }

    /// Create a `Pending` commitment for a fresh root and enqueue it for
    /// anchoring. Returns the existing commitment unchanged if the root is
    /// already known.
    pub fn put_commitment(&self, root: &Digest) -> Result<Commitment, StoreError> {
        let lock = self.root_lock(root);
        let _guard = lock.lock();

        let key = commitment_key(root);
        if let Some(existing) = self.get_json::<Commitment>(&key)? {
            return Ok(existing);
        }

        let _seq_guard = self.seq_lock.lock();
        let seq = self.next_seq()?;
        let commitment = Commitment {
            root: *root,
            seq,
            state: CommitmentState::Pending,
            attempts: Vec::new(),
            created_at: Utc::now(),
        };

        let mut batch = WriteBatch::default();
        batch.put(SEQ_COUNTER_KEY.as_bytes(), seq.to_le_bytes());
        batch.put(key.as_bytes(), serde_json::to_vec(&commitment)?);
        batch.put(unconfirmed_key(seq).as_bytes(), root);
        self.sync_write(batch)?;
        Ok(commitment)
    }

    pub fn get_commitment(&self, root: &Digest) -> Result<Option<Commitment>, StoreError> {
        self.get_json(&commitment_key(root))
    }

    /// Move a commitment forward. Legal moves are `Pending -> Broadcast`
    /// and `Broadcast -> Confirmed`; anything else fails with
    /// `InvalidTransition` and writes nothing. Confirming removes the root
    /// from the unconfirmed queue in the same atomic batch.
    pub fn advance_commitment(
        &self,
        root: &Digest,
        new_state: CommitmentState,
    ) -> Result<Commitment, StoreError> {
        let lock = self.root_lock(root);
        let _guard = lock.lock();

        let key = commitment_key(root);
        let mut commitment = self
            .get_json::<Commitment>(&key)?
            .ok_or_else(|| StoreError::UnknownRoot(hex::encode(root)))?;

        let mut batch = WriteBatch::default();
        match (&commitment.state, &new_state) {
            (CommitmentState::Pending, CommitmentState::Broadcast { txid }) => {
                commitment.attempts.push(BroadcastAttempt {
                    txid: txid.clone(),
                    broadcast_at: Utc::now(),
                });
            }
            (CommitmentState::Broadcast { .. }, CommitmentState::Confirmed { .. }) => {
                batch.delete(unconfirmed_key(commitment.seq).as_bytes());
            }
            (from, to) => {
                return Err(StoreError::InvalidTransition {
                    from: from.name(),
                    to: to.name(),
                });
            }
        }

        commitment.state = new_state;
        batch.put(key.as_bytes(), serde_json::to_vec(&commitment)?);
        self.sync_write(batch)?;
        Ok(commitment)
    }

    /// Reorg recovery: a `Broadcast` commitment whose transaction vanished
    /// returns to `Pending` for a fresh attempt. The abandoned attempt stays
    /// in the history. The only sanctioned backward edge.
    pub fn mark_reorged(&self, root: &Digest) -> Result<Commitment, StoreError> {
        let lock = self.root_lock(root);
        let _guard = lock.lock();

        let key = commitment_key(root);
        let mut commitment = self
            .get_json::<Commitment>(&key)?
            .ok_or_else(|| StoreError::UnknownRoot(hex::encode(root)))?;

        match &commitment.state {
            CommitmentState::Broadcast { .. } => {}
            other => {
                return Err(StoreError::InvalidTransition {
                    from: other.name(),
                    to: "pending",
                });
            }
        }

        commitment.state = CommitmentState::Pending;
        let mut batch = WriteBatch::default();
        batch.put(key.as_bytes(), serde_json::to_vec(&commitment)?);
        self.sync_write(batch)?;
        Ok(commitment)
    }

    /// All commitments not yet `Confirmed`, oldest first. Drives resumption
    /// of in-flight anchoring after a restart.
    pub fn list_unconfirmed(&self) -> Result<Vec<Commitment>, StoreError> {
        let mut out = Vec::new();
        let prefix = UNCONFIRMED_PREFIX.as_bytes();
        // queue keys embed the zero-padded seq, so prefix order is FIFO
        for item in self.db.prefix_iterator(prefix) {
            let (k, v) = item?;
            if !k.starts_with(prefix) {
                break;
            }
            let root: Digest = v
                .as_ref()
                .try_into()
                .map_err(|_| StoreError::Db("queue entry is not a 32-byte root".into()))?;
            match self.get_commitment(&root)? {
                Some(c) => out.push(c),
                None => {
                    return Err(StoreError::UnknownRoot(hex::encode(root)));
                }
            }
        }
        Ok(out)
    }
}

fn record_key(digest: &Digest) -> String {
    format!("{}{}", RECORD_PREFIX, hex::encode(digest))
}

fn commitment_key(root: &Digest) -> String {
    format!("{}{}", COMMITMENT_PREFIX, hex::encode(root))
}

fn unconfirmed_key(seq: u64) -> String {
    format!("{}{:020}", UNCONFIRMED_PREFIX, seq)
}
