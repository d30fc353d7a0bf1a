//! In-memory chain double for tests.
//!
//! `MockChain` implements [`ChainClient`] over a mutex-guarded state machine:
//! every `polls_per_block`-th status call seals a block, draining the mempool
//! into it. Broadcasts enforce per-account sequence numbers the way a real
//! node does, and individual broadcast calls can be scripted to return an
//! arbitrary result code.

use crate::client::{
    AccountInfo, BlockInfo, BroadcastResponse, ChainClient, NodeStatus, RpcError,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;

const BLOCK_INTERVAL_MS: u64 = 5_000;

/// Minimal view of a signed transaction, enough to enforce sequences.
#[derive(Deserialize)]
struct TxEnvelope {
    sender: String,
    sequence: u64,
}

#[derive(Default)]
struct MockState {
    height: u64,
    block_time_ms: u64,
    polls: u64,
    polls_per_block: u64,
    accounts: HashMap<String, AccountInfo>,
    mempool: Vec<String>,
    blocks: HashMap<u64, BlockInfo>,
    /// Result codes keyed by broadcast call index.
    scripted: HashMap<u64, u32>,
    broadcast_calls: u64,
    next_hash: u64,
    broadcasts: Vec<(String, u64)>,
    /// Accept broadcasts but never commit them.
    lossy: bool,
    /// Release heights keyed by broadcast call index; a held transaction
    /// stays out of the mempool until the block at its release height.
    held: HashMap<u64, u64>,
    /// Held hashes awaiting their release height.
    withheld: Vec<(u64, String)>,
}

pub struct MockChain {
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                height: 1,
                block_time_ms: 1_000_000,
                polls_per_block: 1,
                ..MockState::default()
            }),
        }
    }

    /// Register an account with its chain-side sequence and account number.
    pub fn with_account(self, address: &str, sequence: u64, account_number: u64) -> Self {
        self.state.lock().expect("lock poisoned").accounts.insert(
            address.to_string(),
            AccountInfo {
                sequence,
                account_number,
            },
        );
        self
    }

    /// Seal a block only every `n`-th status call instead of every call.
    pub fn with_polls_per_block(self, n: u64) -> Self {
        assert!(n > 0, "polls_per_block must be positive");
        self.state.lock().expect("lock poisoned").polls_per_block = n;
        self
    }

    /// Accept broadcasts normally but drop them before they reach a block,
    /// simulating transaction loss.
    pub fn with_lossy_broadcasts(self) -> Self {
        self.state.lock().expect("lock poisoned").lossy = true;
        self
    }

    /// Accept the `index`-th broadcast call (zero-based) but keep its
    /// transaction out of every block before `release_height`, simulating a
    /// straggler that commits late.
    pub fn hold_broadcast(&self, index: u64, release_height: u64) {
        self.state
            .lock()
            .expect("lock poisoned")
            .held
            .insert(index, release_height);
    }

    /// Force the `index`-th broadcast call (zero-based) to return `code`
    /// without touching the mempool or any account sequence.
    pub fn script_code(&self, index: u64, code: u32) {
        self.state
            .lock()
            .expect("lock poisoned")
            .scripted
            .insert(index, code);
    }

    /// Every accepted broadcast as `(sender, sequence)`, in order.
    pub fn broadcast_log(&self) -> Vec<(String, u64)> {
        self.state.lock().expect("lock poisoned").broadcasts.clone()
    }

    pub fn latest_height(&self) -> u64 {
        self.state.lock().expect("lock poisoned").height
    }
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn status(&self) -> Result<NodeStatus, RpcError> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.polls += 1;
        if state.polls % state.polls_per_block == 0 {
            let height = state.height + 1;
            state.height = height;
            state.block_time_ms += BLOCK_INTERVAL_MS;
            let mut tx_hashes = std::mem::take(&mut state.mempool);
            let withheld = std::mem::take(&mut state.withheld);
            for (release, hash) in withheld {
                if release <= height {
                    tx_hashes.push(hash);
                } else {
                    state.withheld.push((release, hash));
                }
            }
            let sealed = BlockInfo {
                height,
                block_time_ms: state.block_time_ms,
                tx_hashes,
            };
            state.blocks.insert(height, sealed);
        }
        Ok(NodeStatus {
            latest_height: state.height,
            latest_block_time_ms: state.block_time_ms,
            chain_id: "mockchain-1".to_string(),
        })
    }

    async fn account_info(&self, address: &str) -> Result<AccountInfo, RpcError> {
        let state = self.state.lock().expect("lock poisoned");
        state
            .accounts
            .get(address)
            .copied()
            .ok_or_else(|| RpcError::Endpoint {
                status: 404,
                body: format!("account {address} not found"),
            })
    }

    async fn broadcast_tx(&self, tx_bytes: &[u8]) -> Result<BroadcastResponse, RpcError> {
        let mut state = self.state.lock().expect("lock poisoned");
        let call = state.broadcast_calls;
        state.broadcast_calls += 1;

        if let Some(&code) = state.scripted.get(&call) {
            return Ok(BroadcastResponse {
                code,
                tx_hash: String::new(),
                raw_log: format!("scripted code {code}"),
            });
        }

        let envelope: TxEnvelope = serde_json::from_slice(tx_bytes)
            .map_err(|e| RpcError::InvalidResponse(format!("undecodable tx: {e}")))?;
        let expected = state
            .accounts
            .get(&envelope.sender)
            .ok_or_else(|| RpcError::InvalidResponse(format!("unknown sender {}", envelope.sender)))?
            .sequence;
        if envelope.sequence != expected {
            return Ok(BroadcastResponse {
                code: 32,
                tx_hash: String::new(),
                raw_log: format!(
                    "account sequence mismatch, expected {expected}, got {}",
                    envelope.sequence
                ),
            });
        }

        if let Some(account) = state.accounts.get_mut(&envelope.sender) {
            account.sequence += 1;
        }
        let hash = format!("{:016X}", state.next_hash);
        state.next_hash += 1;
        if let Some(&release) = state.held.get(&call) {
            state.withheld.push((release, hash.clone()));
        } else if !state.lossy {
            state.mempool.push(hash.clone());
        }
        state.broadcasts.push((envelope.sender, envelope.sequence));
        Ok(BroadcastResponse {
            code: 0,
            tx_hash: hash,
            raw_log: String::new(),
        })
    }

    async fn block(&self, height: u64) -> Result<BlockInfo, RpcError> {
        let state = self.state.lock().expect("lock poisoned");
        state
            .blocks
            .get(&height)
            .cloned()
            .ok_or_else(|| RpcError::Endpoint {
                status: 404,
                body: format!("block {height} not found"),
            })
    }
}
