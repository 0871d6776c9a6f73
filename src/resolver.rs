// src/resolver.rs
// Read-only composition of a digest's record with its root's chain status.

use crate::merkle::{Digest, InclusionStep};
use crate::store::{CalendarStore, CommitmentState, StoreError};
use std::sync::Arc;

/// Answer to a client timestamp query. Internal retries and reorgs are
/// invisible here; anything short of a confirmed commitment is `Pending`.
#[derive(Clone, Debug)]
pub enum Resolution {
    NotFound,
    Pending {
        root: Digest,
    },
    Complete {
        root: Digest,
        path: Vec<InclusionStep>,
        txid: String,
        depth: u64,
    },
}

pub struct ProofResolver {
    store: Arc<CalendarStore>,
}

impl ProofResolver {
    pub fn new(store: Arc<CalendarStore>) -> Self {
        Self { store }
    }

    /// Look up the digest's record, then its commitment's state. No
    /// mutation; a reader may observe a state one transition behind, which
    /// is fine since states only move forward.
    pub fn resolve(&self, digest: &Digest) -> Result<Resolution, StoreError> {
        let record = match self.store.get_record(digest)? {
            Some(r) => r,
            None => return Ok(Resolution::NotFound),
        };

        // records are written after their commitment, so the root must exist
        let commitment = self
            .store
            .get_commitment(&record.root)?
            .ok_or_else(|| StoreError::UnknownRoot(hex::encode(record.root)))?;

        match commitment.state {
            CommitmentState::Confirmed { txid, depth } => Ok(Resolution::Complete {
                root: record.root,
                path: record.path,
                txid,
                depth,
            }),
            _ => Ok(Resolution::Pending { root: record.root }),
        }
    }
}
