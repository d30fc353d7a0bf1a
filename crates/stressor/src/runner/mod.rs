//! The block-paced loop that drives a stress run.
//!
//! One task owns everything: it polls node status, waits for each round's
//! target block, broadcasts the round's transactions, and ingests every new
//! block to resolve earlier rounds. Keeping it single-threaded makes the
//! sequence discipline in [`AccountDispenser`] sound without locks.

use crate::accounts::{AccountDispenser, AccountError};
use crate::classify::{classify, BroadcastVerdict};
use crate::client::{ChainClient, RpcError};
use crate::metrics::{RoundResult, RoundSink, SinkError};
use crate::tracker::{avg_delay, TxTracker};
use crate::workloads::{Workload, WorkloadError};
use hdrhistogram::Histogram;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tunables of a run; everything has a usable default.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Number of rounds, one per block.
    pub height_span: u64,
    /// Transactions to broadcast per round.
    pub txs_per_block: usize,
    /// How often to poll node status while waiting for a block.
    pub poll_interval: Duration,
    /// Pause after rotating to a fresh signer, letting its refreshed
    /// sequence settle before the retry.
    pub advance_pause: Duration,
    /// Blocks a transaction may stay uncommitted before its round is
    /// force-resolved with the stragglers counted missing.
    pub missing_threshold: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            height_span: 10,
            txs_per_block: 1,
            poll_interval: Duration::from_millis(100),
            advance_pause: Duration::from_millis(500),
            missing_threshold: 5,
        }
    }
}

impl RunConfig {
    pub fn with_height_span(mut self, span: u64) -> Self {
        self.height_span = span;
        self
    }

    pub fn with_txs_per_block(mut self, n: usize) -> Self {
        self.txs_per_block = n;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_advance_pause(mut self, pause: Duration) -> Self {
        self.advance_pause = pause;
        self
    }

    pub fn with_missing_threshold(mut self, blocks: u64) -> Self {
        self.missing_threshold = blocks;
        self
    }
}

/// Errors that abort a stress run.
#[derive(Debug, thiserror::Error)]
pub enum StressError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error(transparent)]
    Workload(#[from] WorkloadError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    /// The node rejected a broadcast with a code the engine has no recovery
    /// for. Continuing would only repeat the rejection.
    #[error("broadcast rejected with unrecoverable code {code}: {raw_log}")]
    FatalBroadcast { code: u32, raw_log: String },
}

/// Summary of a finished (or cancelled) run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub total_planned: usize,
    pub total_broadcast: usize,
    pub total_committed: usize,
    /// Transactions still uncommitted when the run ended.
    pub unresolved: usize,
    /// Mean delay in blocks over every broadcast transaction, counting the
    /// unresolved ones as delayed up to the last observed height.
    pub avg_delay: f64,
    pub cancelled: bool,
    pub elapsed: Duration,
    histogram: Histogram<u64>,
}

impl RunReport {
    /// Inclusion delay in blocks at the given quantile, e.g. `0.99`.
    pub fn delay_at_quantile(&self, quantile: f64) -> u64 {
        self.histogram.value_at_quantile(quantile)
    }

    pub fn max_delay(&self) -> u64 {
        self.histogram.max()
    }

    pub fn print(&self) {
        println!("--- stress run report ---");
        println!("elapsed:     {:.2?}", self.elapsed);
        println!("planned:     {}", self.total_planned);
        println!("broadcast:   {}", self.total_broadcast);
        println!("committed:   {}", self.total_committed);
        println!("unresolved:  {}", self.unresolved);
        println!("avg delay:   {:.3} blocks", self.avg_delay);
        if !self.histogram.is_empty() {
            println!(
                "delay (blocks): p50={} p90={} p99={} max={}",
                self.delay_at_quantile(0.50),
                self.delay_at_quantile(0.90),
                self.delay_at_quantile(0.99),
                self.max_delay(),
            );
        }
        if self.cancelled {
            println!("run was cancelled before completing");
        }
    }
}

/// Drives one stress run against a chain.
pub struct StressRunner<C, W> {
    client: Arc<C>,
    workload: W,
    dispenser: AccountDispenser<C>,
    tracker: TxTracker,
    sink: Box<dyn RoundSink>,
    config: RunConfig,
    /// Block timestamps by height, for per-round block durations.
    block_times: HashMap<u64, u64>,
    /// Wall-clock start of each unresolved round.
    round_started: HashMap<u64, Instant>,
    /// Planned transaction count of each unresolved round; a round is
    /// resolved exactly when its entry is removed.
    round_planned: HashMap<u64, usize>,
    histogram: Histogram<u64>,
}

impl<C: ChainClient, W: Workload> StressRunner<C, W> {
    pub fn new(
        client: Arc<C>,
        workload: W,
        dispenser: AccountDispenser<C>,
        sink: Box<dyn RoundSink>,
        config: RunConfig,
    ) -> Self {
        Self {
            client,
            workload,
            dispenser,
            tracker: TxTracker::new(),
            sink,
            config,
            block_times: HashMap::new(),
            round_started: HashMap::new(),
            round_planned: HashMap::new(),
            histogram: Histogram::new(3).expect("3 significant figures is valid"),
        }
    }

    /// Run to completion, one round per block over the configured span, then
    /// drain until every round is resolved.
    ///
    /// Cancellation is observed at poll points; a cancelled run still returns
    /// `Ok` with the report flagged accordingly.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<RunReport, StressError> {
        let started = Instant::now();
        let status = self.client.status().await?;
        let mut observed = status.latest_height;
        self.block_times
            .insert(observed, status.latest_block_time_ms);
        info!(
            chain_id = %status.chain_id,
            height = observed,
            span = self.config.height_span,
            txs_per_block = self.config.txs_per_block,
            "starting stress run"
        );
        self.dispenser.refresh_current().await?;

        let mut total_planned = 0usize;
        let mut cancelled = false;
        let mut next_target = observed + 1;

        'rounds: for _ in 0..self.config.height_span {
            let mut target = next_target;

            // Wait for the chain to reach the round's block, resolving
            // earlier rounds as their blocks arrive.
            loop {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break 'rounds;
                }
                let status = self.client.status().await?;
                if status.latest_height > observed {
                    self.ingest_blocks(observed + 1, status.latest_height)
                        .await?;
                    observed = status.latest_height;
                }
                if observed >= target {
                    break;
                }
                sleep(self.config.poll_interval).await;
            }
            if observed > target {
                warn!(
                    target,
                    latest = observed,
                    "target height already passed, broadcasting at the chain head"
                );
                target = observed;
            }

            self.round_started.insert(target, Instant::now());
            self.round_planned.insert(target, self.config.txs_per_block);
            total_planned += self.config.txs_per_block;

            let mut msgs = self
                .workload
                .build_messages(&self.dispenser.current().address);
            let mut advances = 0usize;
            let mut slot = 0usize;
            while slot < self.config.txs_per_block {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break 'rounds;
                }
                let account = self.dispenser.current();
                let address = account.address.clone();
                let account_number = account.account_number();
                let key = account.key.clone();
                let sequence = self.dispenser.take_sequence();
                let tx = match self
                    .workload
                    .sign(&msgs, &address, sequence, account_number, &key)
                {
                    Ok(tx) => tx,
                    Err(e) => {
                        self.dispenser.undo_sequence();
                        return Err(e.into());
                    }
                };
                let response = match self.client.broadcast_tx(&tx).await {
                    Ok(r) => r,
                    Err(e) => {
                        self.dispenser.undo_sequence();
                        return Err(e.into());
                    }
                };
                match classify(response.code) {
                    BroadcastVerdict::Accepted => {
                        self.tracker.record_broadcast(&response.tx_hash, target);
                        slot += 1;
                    }
                    BroadcastVerdict::RetrySameAccount => {
                        self.dispenser.undo_sequence();
                        warn!(
                            height = target,
                            code = response.code,
                            "mempool full, deferring the round's remaining broadcasts"
                        );
                        break;
                    }
                    BroadcastVerdict::AdvanceAccount => {
                        self.dispenser.undo_sequence();
                        advances += 1;
                        if advances > self.dispenser.len() {
                            warn!(
                                height = target,
                                "every signer rejected, deferring the round's remaining broadcasts"
                            );
                            break;
                        }
                        debug!(code = response.code, log = %response.raw_log, "rotating signer");
                        self.dispenser.advance().await?;
                        sleep(self.config.advance_pause).await;
                        msgs = self
                            .workload
                            .build_messages(&self.dispenser.current().address);
                    }
                    BroadcastVerdict::Fatal => {
                        return Err(StressError::FatalBroadcast {
                            code: response.code,
                            raw_log: response.raw_log,
                        });
                    }
                }
            }

            // A round with nothing in flight can never resolve through a
            // commit, so emit it now.
            if self.tracker.broadcast_count(target) == 0 {
                self.emit_round(target)?;
            }
            next_target = target + 1;
        }

        // Drain: keep ingesting blocks until every round resolves, forcing
        // resolution for rounds stuck past the missing threshold.
        while !cancelled && !self.round_planned.is_empty() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let status = self.client.status().await?;
            if status.latest_height > observed {
                self.ingest_blocks(observed + 1, status.latest_height)
                    .await?;
                observed = status.latest_height;
            }
            let missing = self
                .tracker
                .missing_count(observed, self.config.missing_threshold);
            if missing > 0 {
                debug!(missing, observed, "transactions past the missing threshold");
            }
            let mut stale: Vec<u64> = self
                .round_planned
                .keys()
                .copied()
                .filter(|&h| observed >= h + self.config.missing_threshold)
                .collect();
            stale.sort_unstable();
            for height in stale {
                warn!(
                    height,
                    pending = self.tracker.pending_count(height),
                    "round unresolved past the missing threshold"
                );
                self.emit_round(height)?;
            }
            if self.round_planned.is_empty() {
                break;
            }
            sleep(self.config.poll_interval).await;
        }

        let total_broadcast = self.tracker.total_broadcast();
        let unresolved = self.tracker.total_pending();
        let report = RunReport {
            total_planned,
            total_broadcast,
            total_committed: total_broadcast - unresolved,
            unresolved,
            avg_delay: avg_delay(&self.tracker.delays_since(observed)),
            cancelled,
            elapsed: started.elapsed(),
            histogram: self.histogram.clone(),
        };
        info!(
            broadcast = report.total_broadcast,
            committed = report.total_committed,
            unresolved = report.unresolved,
            cancelled = report.cancelled,
            "stress run finished"
        );
        Ok(report)
    }

    /// Fetch blocks `from..=to`, feed their transactions to the tracker, and
    /// emit every round that became fully resolved.
    async fn ingest_blocks(&mut self, from: u64, to: u64) -> Result<(), StressError> {
        for height in from..=to {
            let block = self.client.block(height).await?;
            self.block_times.insert(height, block.block_time_ms);
            let finished = self.tracker.record_committed(&block.tx_hashes, height);
            for round in finished {
                // A straggler may finish a round whose row was already
                // force-resolved; each round gets exactly one row.
                if self.round_planned.contains_key(&round) {
                    self.emit_round(round)?;
                }
            }
        }
        Ok(())
    }

    fn emit_round(&mut self, height: u64) -> Result<(), SinkError> {
        let planned = self.round_planned.remove(&height).unwrap_or(0);
        let broadcast = self.tracker.broadcast_count(height);
        let pending = self.tracker.pending_count(height);
        let committed = broadcast - pending;
        let delays = self.tracker.delays_at(height);
        for &delay in &delays {
            // Auto-resizing histogram, recording cannot fail.
            self.histogram.record(delay).ok();
        }
        let late = delays.iter().filter(|&&d| d > 1).count();
        let block_time_ms = self.block_times.get(&height).copied().unwrap_or(0);
        let block_duration_ms = self
            .block_times
            .get(&height.wrapping_sub(1))
            .map_or(0, |&prev| block_time_ms.saturating_sub(prev));
        let duration_ms = self
            .round_started
            .remove(&height)
            .map_or(0, |t| t.elapsed().as_millis() as u64);
        let result = RoundResult {
            height,
            planned,
            broadcast,
            committed,
            missing: late + pending,
            avg_delay: avg_delay(&delays),
            block_time_ms,
            block_duration_ms,
            duration_ms,
        };
        info!(
            height,
            broadcast, committed, missing = result.missing, avg_delay = result.avg_delay,
            "round resolved"
        );
        self.sink.emit(&result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{SignerAccount, SignerKey};
    use crate::client::{AccountInfo, BlockInfo, BroadcastResponse, NodeStatus};
    use crate::testing::MockChain;
    use crate::workloads::{Coin, SwapWorkload};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Sink whose collected rows stay readable after the runner takes the box.
    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<RoundResult>>>);

    impl SharedSink {
        fn rows(&self) -> Vec<RoundResult> {
            self.0.lock().unwrap().clone()
        }
    }

    impl RoundSink for SharedSink {
        fn emit(&mut self, result: &RoundResult) -> Result<(), SinkError> {
            self.0.lock().unwrap().push(result.clone());
            Ok(())
        }
    }

    fn workload() -> SwapWorkload {
        SwapWorkload::new("mockchain-1", 1, Coin::new(1_000, "uakt"), "uatom")
    }

    fn test_config() -> RunConfig {
        RunConfig::default()
            .with_poll_interval(Duration::from_millis(1))
            .with_advance_pause(Duration::ZERO)
    }

    fn runner(
        chain: Arc<MockChain>,
        addrs: &[&str],
        sink: SharedSink,
        config: RunConfig,
    ) -> StressRunner<MockChain, SwapWorkload> {
        let accounts = addrs
            .iter()
            .map(|a| SignerAccount::new(*a, SignerKey::from_bytes(vec![7u8; 32])))
            .collect();
        let dispenser = AccountDispenser::new(chain.clone(), accounts).unwrap();
        StressRunner::new(chain, workload(), dispenser, Box::new(sink), config)
    }

    #[tokio::test]
    async fn runs_rounds_and_resolves_them_in_order() {
        let chain = Arc::new(MockChain::new().with_account("alice", 0, 1));
        let sink = SharedSink::default();
        let config = test_config().with_height_span(3).with_txs_per_block(2);
        let mut r = runner(chain.clone(), &["alice"], sink.clone(), config);

        let report = r.run(CancellationToken::new()).await.unwrap();
        assert_eq!(report.total_planned, 6);
        assert_eq!(report.total_broadcast, 6);
        assert_eq!(report.total_committed, 6);
        assert_eq!(report.unresolved, 0);
        assert!((report.avg_delay - 1.0).abs() < f64::EPSILON);
        assert!(!report.cancelled);

        let rows = sink.rows();
        assert_eq!(rows.len(), 3);
        // Consecutive target heights, resolved in broadcast order.
        for pair in rows.windows(2) {
            assert_eq!(pair[1].height, pair[0].height + 1);
        }
        for row in &rows {
            assert_eq!(row.planned, 2);
            assert_eq!(row.broadcast, 2);
            assert_eq!(row.committed, 2);
            assert_eq!(row.missing, 0);
            // Each transaction lands in the block after its broadcast height.
            assert!((row.avg_delay - 1.0).abs() < f64::EPSILON);
            assert_eq!(row.block_duration_ms, 5_000);
        }

        // Sequences were consumed strictly in order, all by one signer.
        let log = chain.broadcast_log();
        assert_eq!(log.len(), 6);
        for (i, (sender, sequence)) in log.iter().enumerate() {
            assert_eq!(sender, "alice");
            assert_eq!(*sequence, i as u64);
        }
    }

    #[tokio::test]
    async fn mempool_full_defers_round_and_reuses_sequence() {
        let chain = Arc::new(MockChain::new().with_account("alice", 0, 1));
        chain.script_code(0, 20);
        let sink = SharedSink::default();
        let config = test_config().with_height_span(2).with_txs_per_block(1);
        let mut r = runner(chain.clone(), &["alice"], sink.clone(), config);

        let report = r.run(CancellationToken::new()).await.unwrap();
        assert_eq!(report.total_planned, 2);
        assert_eq!(report.total_broadcast, 1);
        assert_eq!(report.total_committed, 1);

        let rows = sink.rows();
        assert_eq!(rows.len(), 2);
        // The deferred round resolves immediately with nothing in flight.
        assert_eq!(rows[0].broadcast, 0);
        assert_eq!(rows[0].committed, 0);
        assert_eq!(rows[1].broadcast, 1);
        // The undone sequence was reused by the later round.
        assert_eq!(chain.broadcast_log(), vec![("alice".to_string(), 0)]);
    }

    #[tokio::test]
    async fn sequence_mismatch_rotates_to_next_signer() {
        let chain = Arc::new(
            MockChain::new()
                .with_account("alice", 5, 1)
                .with_account("bob", 7, 2),
        );
        chain.script_code(0, 32);
        let sink = SharedSink::default();
        let config = test_config().with_height_span(1).with_txs_per_block(1);
        let mut r = runner(chain.clone(), &["alice", "bob"], sink.clone(), config);

        let report = r.run(CancellationToken::new()).await.unwrap();
        assert_eq!(report.total_broadcast, 1);
        assert_eq!(report.total_committed, 1);
        // The retry came from the next signer with its refreshed sequence.
        assert_eq!(chain.broadcast_log(), vec![("bob".to_string(), 7)]);
    }

    #[tokio::test]
    async fn unknown_code_aborts_the_run() {
        let chain = Arc::new(MockChain::new().with_account("alice", 0, 1));
        chain.script_code(0, 1);
        let sink = SharedSink::default();
        let config = test_config().with_height_span(1).with_txs_per_block(1);
        let mut r = runner(chain, &["alice"], sink, config);

        let err = r.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, StressError::FatalBroadcast { code: 1, .. }));
    }

    #[tokio::test]
    async fn cancellation_returns_a_flagged_report() {
        let chain = Arc::new(MockChain::new().with_account("alice", 0, 1));
        let sink = SharedSink::default();
        let mut r = runner(chain, &["alice"], sink.clone(), test_config());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = r.run(cancel).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.total_planned, 0);
        assert!(sink.rows().is_empty());
    }

    #[tokio::test]
    async fn lost_transactions_force_resolution_past_threshold() {
        let chain = Arc::new(
            MockChain::new()
                .with_account("alice", 0, 1)
                .with_lossy_broadcasts(),
        );
        let sink = SharedSink::default();
        let config = test_config()
            .with_height_span(1)
            .with_txs_per_block(1)
            .with_missing_threshold(2);
        let mut r = runner(chain, &["alice"], sink.clone(), config);

        let report = r.run(CancellationToken::new()).await.unwrap();
        assert_eq!(report.total_broadcast, 1);
        assert_eq!(report.total_committed, 0);
        assert_eq!(report.unresolved, 1);
        // The lost transaction accrues delay up to the last observed height.
        assert!(report.avg_delay >= 2.0);

        let rows = sink.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].broadcast, 1);
        assert_eq!(rows[0].committed, 0);
        assert_eq!(rows[0].missing, 1);
    }

    #[tokio::test]
    async fn straggler_committing_after_forced_resolution_emits_no_second_row() {
        let chain = Arc::new(MockChain::new().with_account("alice", 0, 1));
        // Rounds target heights 3, 4 and 5; round 4's transaction commits
        // only at height 8, well past the threshold, and round 5's stays
        // withheld so the drain is still running when the straggler lands.
        chain.hold_broadcast(1, 8);
        chain.hold_broadcast(2, 9);
        let sink = SharedSink::default();
        let config = test_config()
            .with_height_span(3)
            .with_txs_per_block(1)
            .with_missing_threshold(3);
        let mut r = runner(chain, &["alice"], sink.clone(), config);

        let report = r.run(CancellationToken::new()).await.unwrap();
        // The straggler still counts as committed in the totals.
        assert_eq!(report.total_broadcast, 3);
        assert_eq!(report.total_committed, 2);
        assert_eq!(report.unresolved, 1);

        // Exactly one row per round, even though round 4 finished in the
        // tracker after its row was force-resolved.
        let rows = sink.rows();
        let heights: Vec<u64> = rows.iter().map(|r| r.height).collect();
        assert_eq!(heights, vec![3, 4, 5]);
        assert_eq!(rows[1].planned, 1);
        assert_eq!(rows[1].committed, 0);
        assert_eq!(rows[1].missing, 1);
    }

    /// Client whose every status poll seals two blocks, so the chain keeps
    /// overtaking the runner's target heights.
    struct DoubleStep(MockChain);

    #[async_trait]
    impl crate::client::ChainClient for DoubleStep {
        async fn status(&self) -> Result<NodeStatus, RpcError> {
            let _ = self.0.status().await?;
            self.0.status().await
        }

        async fn account_info(&self, address: &str) -> Result<AccountInfo, RpcError> {
            self.0.account_info(address).await
        }

        async fn broadcast_tx(&self, tx_bytes: &[u8]) -> Result<BroadcastResponse, RpcError> {
            self.0.broadcast_tx(tx_bytes).await
        }

        async fn block(&self, height: u64) -> Result<BlockInfo, RpcError> {
            self.0.block(height).await
        }
    }

    #[tokio::test]
    async fn passed_target_heights_are_corrected_forward() {
        let chain = Arc::new(DoubleStep(MockChain::new().with_account("alice", 0, 1)));
        let sink = SharedSink::default();
        let config = test_config().with_height_span(2).with_txs_per_block(1);
        let accounts = vec![SignerAccount::new(
            "alice",
            SignerKey::from_bytes(vec![7u8; 32]),
        )];
        let dispenser = AccountDispenser::new(chain.clone(), accounts).unwrap();
        let mut r = StressRunner::new(chain, workload(), dispenser, Box::new(sink.clone()), config);

        let report = r.run(CancellationToken::new()).await.unwrap();
        assert_eq!(report.total_broadcast, 2);
        assert_eq!(report.total_committed, 2);

        // Each round lands on the chain head it actually observed, so the
        // emitted heights skip ahead instead of trailing the chain.
        let rows = sink.rows();
        assert_eq!(rows.len(), 2);
        assert!(rows[1].height >= rows[0].height + 2);
        for row in &rows {
            assert_eq!(row.broadcast, 1);
            assert_eq!(row.committed, 1);
        }
    }
}
