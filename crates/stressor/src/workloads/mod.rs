//! Message construction and transaction signing.
//!
//! The engine treats messages and signed bytes as opaque; this module holds
//! the concrete swap workload that targets a liquidity pool, carrying the
//! chain id, gas limit, fee and memo that are common to every transaction
//! of a run.

use crate::accounts::SignerKey;
use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;

/// Errors from message construction and signing.
#[derive(Debug, thiserror::Error)]
pub enum WorkloadError {
    #[error("invalid coin {0:?}, expected <amount><denom>")]
    InvalidCoin(String),

    #[error("signer key must be {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("encoding sign doc failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// An amount of a single denomination, parsed from the `50000000uakt` form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub amount: u64,
    pub denom: String,
}

impl Coin {
    pub fn new(amount: u64, denom: impl Into<String>) -> Self {
        Self {
            amount,
            denom: denom.into(),
        }
    }
}

impl FromStr for Coin {
    type Err = WorkloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let split = s.find(|c: char| !c.is_ascii_digit());
        let (amount, denom) = match split {
            Some(i) if i > 0 => s.split_at(i),
            _ => return Err(WorkloadError::InvalidCoin(s.to_string())),
        };
        let amount = amount
            .parse()
            .map_err(|_| WorkloadError::InvalidCoin(s.to_string()))?;
        if denom.is_empty() || !denom.chars().all(|c| c.is_ascii_alphanumeric() || c == '/') {
            return Err(WorkloadError::InvalidCoin(s.to_string()));
        }
        Ok(Self {
            amount,
            denom: denom.to_string(),
        })
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

/// A chain message, opaque to the orchestration engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub type_url: String,
    pub body: serde_json::Value,
}

/// The transaction envelope that gets signed and broadcast.
///
/// The sign doc is this structure serialized with an empty signature; the
/// final bytes carry the hex ed25519 signature over that doc.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTx {
    pub chain_id: String,
    pub sender: String,
    pub account_number: u64,
    pub sequence: u64,
    pub gas_limit: u64,
    pub fee: Coin,
    #[serde(default)]
    pub memo: String,
    pub msgs: Vec<Message>,
    #[serde(default)]
    pub signature: String,
}

/// Builds message batches and signs transactions for the stress run.
pub trait Workload: Send {
    /// Build the message batch for one round, on behalf of `sender`.
    fn build_messages(&self, sender: &str) -> Vec<Message>;

    /// Sign one transaction carrying `msgs` with the given account state.
    fn sign(
        &self,
        msgs: &[Message],
        sender: &str,
        sequence: u64,
        account_number: u64,
        key: &SignerKey,
    ) -> Result<Vec<u8>, WorkloadError>;
}

/// Swap-fee rate applied to the offer coin, in basis points of 0.1% steps
/// (3 = 0.3%); half of it is prepaid as the offer coin fee.
const SWAP_FEE_RATE_MILLI: u64 = 3;

/// Workload that swaps an offer coin against a liquidity pool.
pub struct SwapWorkload {
    chain_id: String,
    pool_id: u64,
    offer_coin: Coin,
    demand_denom: String,
    order_price: String,
    msgs_per_tx: usize,
    gas_limit: u64,
    fee: Coin,
    memo: String,
}

impl SwapWorkload {
    pub fn new(
        chain_id: impl Into<String>,
        pool_id: u64,
        offer_coin: Coin,
        demand_denom: impl Into<String>,
    ) -> Self {
        Self {
            chain_id: chain_id.into(),
            pool_id,
            offer_coin,
            demand_denom: demand_denom.into(),
            order_price: "1.0".to_string(),
            msgs_per_tx: 1,
            gas_limit: 200_000,
            fee: Coin::new(0, "stake"),
            memo: String::new(),
        }
    }

    /// Set the limit order price, as a decimal string.
    pub fn with_order_price(mut self, price: impl Into<String>) -> Self {
        self.order_price = price.into();
        self
    }

    /// Set how many swap messages each transaction carries.
    pub fn with_msgs_per_tx(mut self, n: usize) -> Self {
        self.msgs_per_tx = n.max(1);
        self
    }

    /// Set the per-transaction gas limit.
    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    /// Set the per-transaction fee.
    pub fn with_fee(mut self, fee: Coin) -> Self {
        self.fee = fee;
        self
    }

    /// Set the transaction memo.
    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = memo.into();
        self
    }

    fn swap_message(&self, sender: &str) -> Message {
        // The chain prepays half the swap fee from the offer coin.
        let offer_fee = self.offer_coin.amount * SWAP_FEE_RATE_MILLI / 2000;
        Message {
            type_url: "liquidity/MsgSwapWithinBatch".to_string(),
            body: json!({
                "swap_requester_address": sender,
                "pool_id": self.pool_id,
                "swap_type_id": 1,
                "offer_coin": self.offer_coin,
                "offer_coin_fee": Coin::new(offer_fee, self.offer_coin.denom.clone()),
                "demand_coin_denom": self.demand_denom,
                "order_price": self.order_price,
            }),
        }
    }
}

impl Workload for SwapWorkload {
    fn build_messages(&self, sender: &str) -> Vec<Message> {
        (0..self.msgs_per_tx)
            .map(|_| self.swap_message(sender))
            .collect()
    }

    fn sign(
        &self,
        msgs: &[Message],
        sender: &str,
        sequence: u64,
        account_number: u64,
        key: &SignerKey,
    ) -> Result<Vec<u8>, WorkloadError> {
        let seed: &[u8; 32] =
            key.as_bytes()
                .try_into()
                .map_err(|_| WorkloadError::InvalidKeyLength {
                    expected: 32,
                    actual: key.as_bytes().len(),
                })?;
        let signing_key = SigningKey::from_bytes(seed);

        let mut tx = SignedTx {
            chain_id: self.chain_id.clone(),
            sender: sender.to_string(),
            account_number,
            sequence,
            gas_limit: self.gas_limit,
            fee: self.fee.clone(),
            memo: self.memo.clone(),
            msgs: msgs.to_vec(),
            signature: String::new(),
        };

        let sign_doc = serde_json::to_vec(&tx)?;
        let signature = signing_key.sign(&sign_doc);
        tx.signature = hex::encode(signature.to_bytes());

        Ok(serde_json::to_vec(&tx)?)
    }
}
