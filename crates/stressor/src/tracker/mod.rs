//! Transaction lifecycle tracking.
//!
//! Records every successfully broadcast transaction and resolves it against
//! the hash lists of fetched blocks. Two indices are kept in lockstep: a
//! hash-to-record map and per-height hash sets (all broadcast at a height,
//! and those still pending there). They are only ever updated together.

use std::collections::{HashMap, HashSet};
use tracing::trace;

/// A broadcast transaction awaiting (or having reached) commitment.
#[derive(Debug, Clone)]
pub struct PendingTx {
    pub hash: String,
    /// Target height of the round the transaction was broadcast in.
    pub broadcast_height: u64,
    /// Height of the block its hash was observed in; `None` until observed.
    pub committed_height: Option<u64>,
}

/// Tracks broadcast transactions from submission to commitment.
#[derive(Debug, Default)]
pub struct TxTracker {
    txs: HashMap<String, PendingTx>,
    by_height: HashMap<u64, HashSet<String>>,
    pending_by_height: HashMap<u64, HashSet<String>>,
}

impl TxTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a successfully broadcast transaction.
    ///
    /// Empty hashes are ignored (broadcast failures never register).
    /// Registering the same hash twice indicates a sequence-management bug.
    pub fn record_broadcast(&mut self, hash: &str, height: u64) {
        if hash.is_empty() {
            return;
        }
        debug_assert!(
            !self.txs.contains_key(hash),
            "duplicate broadcast of hash {hash}"
        );
        self.txs.insert(
            hash.to_string(),
            PendingTx {
                hash: hash.to_string(),
                broadcast_height: height,
                committed_height: None,
            },
        );
        self.by_height
            .entry(height)
            .or_default()
            .insert(hash.to_string());
        self.pending_by_height
            .entry(height)
            .or_default()
            .insert(hash.to_string());
        trace!(hash, height, "recorded broadcast");
    }

    /// Mark every known hash in `hashes` as committed at `height`.
    ///
    /// Returns the broadcast heights that became fully resolved, i.e. the
    /// rounds that are now complete. Hashes not broadcast by us are skipped;
    /// a second observation of an already committed hash is a no-op.
    pub fn record_committed(&mut self, hashes: &[String], height: u64) -> Vec<u64> {
        let mut finished = Vec::new();
        for hash in hashes {
            let Some(tx) = self.txs.get_mut(hash) else {
                continue;
            };
            if tx.committed_height.is_some() {
                continue;
            }
            tx.committed_height = Some(height);
            let broadcast_height = tx.broadcast_height;
            if let Some(pending) = self.pending_by_height.get_mut(&broadcast_height) {
                pending.remove(hash);
                if pending.is_empty() {
                    finished.push(broadcast_height);
                }
            }
        }
        finished
    }

    /// Per-transaction inclusion delays for transactions broadcast at
    /// `height` that have already committed.
    ///
    /// Once `height` appears in the finished set, this covers every
    /// transaction of the round.
    pub fn delays_at(&self, height: u64) -> Vec<u64> {
        let Some(hashes) = self.by_height.get(&height) else {
            return Vec::new();
        };
        hashes
            .iter()
            .filter_map(|hash| {
                let tx = &self.txs[hash];
                tx.committed_height.map(|c| c - tx.broadcast_height)
            })
            .collect()
    }

    /// Delays for every tracked transaction: `committed - broadcast` for
    /// resolved ones, `reference - broadcast` for those still pending.
    pub fn delays_since(&self, reference: u64) -> Vec<u64> {
        self.txs
            .values()
            .map(|tx| match tx.committed_height {
                Some(committed) => committed - tx.broadcast_height,
                None => reference.saturating_sub(tx.broadcast_height),
            })
            .collect()
    }

    /// Transactions broadcast more than `threshold` blocks before
    /// `reference` that remain uncommitted. A growing count signals chain
    /// congestion or transaction loss.
    pub fn missing_count(&self, reference: u64, threshold: u64) -> usize {
        self.txs
            .values()
            .filter(|tx| {
                tx.committed_height.is_none()
                    && reference.saturating_sub(tx.broadcast_height) > threshold
            })
            .count()
    }

    /// Number of transactions broadcast at `height`.
    pub fn broadcast_count(&self, height: u64) -> usize {
        self.by_height.get(&height).map_or(0, HashSet::len)
    }

    /// Number of transactions broadcast at `height` still awaiting
    /// commitment.
    pub fn pending_count(&self, height: u64) -> usize {
        self.pending_by_height.get(&height).map_or(0, HashSet::len)
    }

    /// Total transactions ever registered.
    pub fn total_broadcast(&self) -> usize {
        self.txs.len()
    }

    /// Total transactions still unresolved across all heights.
    pub fn total_pending(&self) -> usize {
        self.txs
            .values()
            .filter(|tx| tx.committed_height.is_none())
            .count()
    }

    /// Look up a tracked transaction by hash.
    pub fn get(&self, hash: &str) -> Option<&PendingTx> {
        self.txs.get(hash)
    }
}

/// Average of a delay list; zero when empty.
pub fn avg_delay(delays: &[u64]) -> f64 {
    if delays.is_empty() {
        return 0.0;
    }
    delays.iter().sum::<u64>() as f64 / delays.len() as f64
}
