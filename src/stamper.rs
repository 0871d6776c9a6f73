// src/stamper.rs
// Drives each commitment from Pending through Broadcast to Confirmed,
// rate-limiting broadcasts and recovering transactions lost to reorgs.

use crate::chain::ChainClient;
use crate::merkle::Digest;
use crate::store::{CalendarStore, CommitmentState};
use anyhow::Result;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::time::{interval, Duration};

pub struct StamperConfig {
    /// Confirmation depth at which a commitment becomes final.
    pub wait_confirmations: u64,
    /// Minimum gap between successful broadcasts, bounding fee spend.
    pub min_interval: Duration,
    /// Consecutive not-found confirmation polls before a broadcast
    /// transaction is treated as evicted by a reorg.
    pub reorg_poll_limit: u32,
}

pub struct ChainStamper {
    store: Arc<CalendarStore>,
    chain: Arc<dyn ChainClient>,
    config: StamperConfig,
    last_broadcast: Mutex<Option<Instant>>,
    // in-memory only: a restart resets the counts, which merely delays
    // reorg detection
    missing_polls: Mutex<HashMap<Digest, u32>>,
}

impl ChainStamper {
    pub fn new(
        store: Arc<CalendarStore>,
        chain: Arc<dyn ChainClient>,
        config: StamperConfig,
    ) -> Self {
        Self {
            store,
            chain,
            config,
            last_broadcast: Mutex::new(None),
            missing_polls: Mutex::new(HashMap::new()),
        }
    }

    /// One scheduling round: poll every broadcast commitment for depth,
    /// then broadcast the oldest pending commitment if the rate limit
    /// allows. Transient chain failures and store errors are logged and
    /// retried on the next tick; an `Err` from here means a fatal chain
    /// configuration error and stops the loop.
    pub async fn tick(&self) -> Result<()> {
        self.poll_broadcasts().await?;
        self.broadcast_next().await?;
        Ok(())
    }

    async fn poll_broadcasts(&self) -> Result<()> {
        let unconfirmed = match self.store.list_unconfirmed() {
            Ok(list) => list,
            Err(e) => {
                warn!("could not read unconfirmed queue: {} (will retry)", e);
                return Ok(());
            }
        };

        for commitment in unconfirmed {
            let txid = match &commitment.state {
                CommitmentState::Broadcast { txid } => txid.clone(),
                _ => continue,
            };
            let root = commitment.root;

            match self.chain.confirmations(&txid).await {
                Ok(Some(depth)) if depth >= self.config.wait_confirmations => {
                    // a failed write leaves the commitment Broadcast; the
                    // next poll sees the same depth and tries again
                    match self.store.advance_commitment(
                        &root,
                        CommitmentState::Confirmed {
                            txid: txid.clone(),
                            depth,
                        },
                    ) {
                        Ok(_) => {
                            self.missing_polls.lock().remove(&root);
                            info!(
                                "commitment {} confirmed at depth {} (tx {})",
                                hex::encode(root),
                                depth,
                                txid
                            );
                        }
                        Err(e) => {
                            error!(
                                "failed to record confirmation of commitment {}: {} (will retry)",
                                hex::encode(root),
                                e
                            );
                        }
                    }
                }
                Ok(Some(depth)) => {
                    self.missing_polls.lock().remove(&root);
                    debug!(
                        "commitment {} at depth {}/{}",
                        hex::encode(root),
                        depth,
                        self.config.wait_confirmations
                    );
                }
                Ok(None) => {
                    let misses = {
                        let mut polls = self.missing_polls.lock();
                        let count = polls.entry(root).or_insert(0);
                        *count += 1;
                        *count
                    };
                    if misses >= self.config.reorg_poll_limit {
                        warn!(
                            "tx {} for commitment {} missing after {} polls; treating as reorged",
                            txid,
                            hex::encode(root),
                            misses
                        );
                        match self.store.mark_reorged(&root) {
                            Ok(_) => {
                                self.missing_polls.lock().remove(&root);
                            }
                            Err(e) => {
                                error!(
                                    "failed to reset reorged commitment {}: {} (will retry)",
                                    hex::encode(root),
                                    e
                                );
                            }
                        }
                    } else {
                        debug!(
                            "tx {} not found ({}/{} polls)",
                            txid, misses, self.config.reorg_poll_limit
                        );
                    }
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!("confirmation poll for tx {} failed: {} (will retry)", txid, e);
                }
            }
        }
        Ok(())
    }

    async fn broadcast_next(&self) -> Result<()> {
        if !self.broadcast_allowed() {
            return Ok(());
        }

        // list_unconfirmed is FIFO by creation seq; the first pending entry
        // is the oldest, preserving client-visible commitment order
        let unconfirmed = match self.store.list_unconfirmed() {
            Ok(list) => list,
            Err(e) => {
                warn!("could not read unconfirmed queue: {} (will retry)", e);
                return Ok(());
            }
        };
        let next = unconfirmed
            .into_iter()
            .find(|c| c.state == CommitmentState::Pending);
        let commitment = match next {
            Some(c) => c,
            None => return Ok(()),
        };

        match self.chain.broadcast(&commitment.root).await {
            Ok(txid) => {
                *self.last_broadcast.lock() = Some(Instant::now());
                match self.store.advance_commitment(
                    &commitment.root,
                    CommitmentState::Broadcast { txid: txid.clone() },
                ) {
                    Ok(_) => {
                        info!(
                            "broadcast commitment {} as tx {}",
                            hex::encode(commitment.root),
                            txid
                        );
                    }
                    Err(e) => {
                        // tx is on the wire but the commitment stays
                        // Pending; a later tick rebroadcasts, which at
                        // worst anchors the same root twice
                        error!(
                            "broadcast of {} succeeded as tx {} but state write failed: {}",
                            hex::encode(commitment.root),
                            txid,
                            e
                        );
                    }
                }
            }
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                // transient: the commitment stays Pending and is retried
                warn!(
                    "broadcast of commitment {} failed: {} (will retry)",
                    hex::encode(commitment.root),
                    e
                );
            }
        }
        Ok(())
    }

    fn broadcast_allowed(&self) -> bool {
        match *self.last_broadcast.lock() {
            Some(at) => at.elapsed() >= self.config.min_interval,
            None => true,
        }
    }

    /// Background tick driver. Transient errors never stop the loop; a
    /// fatal chain configuration error does, without taking down the rest
    /// of the process.
    pub async fn run(self: Arc<Self>, tick_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            "stamper loop started (tick {}s, min interval {}s, {} confirmations)",
            tick_interval.as_secs(),
            self.config.min_interval.as_secs(),
            self.config.wait_confirmations
        );
        let mut timer = interval(tick_interval);
        loop {
            tokio::select! {
                _ = timer.tick() => {}
                _ = shutdown.changed() => {
                    info!("stamper loop stopping");
                    return;
                }
            }
            if let Err(e) = self.tick().await {
                error!("stamper stopped on fatal error: {}", e);
                return;
            }
        }
    }
}
