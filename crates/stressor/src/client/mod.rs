//! Chain client: the trait the engine drives and its HTTP implementation.
//!
//! The orchestration engine only consumes the four operations on
//! [`ChainClient`]; everything chain-specific (endpoints, wire encoding)
//! lives behind it.

pub mod http;
pub mod types;

pub use http::HttpChainClient;
pub use types::{AccountInfo, BlockInfo, BroadcastRequest, BroadcastResponse, NodeStatus};

use async_trait::async_trait;

/// Errors from chain queries and submissions.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint returned status {status}: {body}")]
    Endpoint { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Blocking-style view of the remote chain.
///
/// All calls are awaited to completion by the single pacing task; any error
/// here is treated as a connectivity failure and aborts the run.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Latest committed height and block time.
    async fn status(&self) -> Result<NodeStatus, RpcError>;

    /// Current sequence and account number for an address.
    async fn account_info(&self, address: &str) -> Result<AccountInfo, RpcError>;

    /// Submit a signed transaction; the response code is classified by the
    /// engine, transport failures surface as `RpcError`.
    async fn broadcast_tx(&self, tx_bytes: &[u8]) -> Result<BroadcastResponse, RpcError>;

    /// Fetch a committed block and its transaction hashes.
    async fn block(&self, height: u64) -> Result<BlockInfo, RpcError>;
}
