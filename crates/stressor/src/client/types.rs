//! Types for chain client communication.

use serde::{Deserialize, Serialize};

/// Response from the node status endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeStatus {
    /// Height of the latest committed block.
    pub latest_height: u64,
    /// Timestamp of the latest committed block, unix milliseconds.
    #[serde(default)]
    pub latest_block_time_ms: u64,
    /// Chain identifier, carried into every signed transaction.
    #[serde(default)]
    pub chain_id: String,
}

/// On-chain account state as reported by the account endpoint.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AccountInfo {
    /// Sequence expected for the account's next transaction.
    pub sequence: u64,
    /// Stable chain-assigned account identifier.
    pub account_number: u64,
}

/// Request to submit a transaction.
#[derive(Debug, Serialize)]
pub struct BroadcastRequest {
    pub tx_hex: String,
}

/// Per-transaction result returned synchronously from broadcast.
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastResponse {
    /// Result code; zero means the transaction was accepted into the mempool.
    pub code: u32,
    /// Hash assigned to the transaction; empty on rejection.
    #[serde(default)]
    pub tx_hash: String,
    /// Human-readable rejection detail.
    #[serde(default)]
    pub raw_log: String,
}

/// A committed block's metadata and transaction hash list.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockInfo {
    pub height: u64,
    /// Block timestamp, unix milliseconds.
    #[serde(default)]
    pub block_time_ms: u64,
    /// Hex hashes of every transaction included in the block.
    #[serde(default)]
    pub tx_hashes: Vec<String>,
}
