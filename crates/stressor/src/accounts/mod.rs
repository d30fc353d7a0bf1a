//! Signer accounts and the rotation dispenser.
//!
//! The dispenser owns a fixed pool of signer accounts and hands out
//! per-account sequence numbers. The cached sequence is a lease: it is
//! overwritten from chain state whenever its validity is suspect (startup,
//! after an advance) and otherwise incremented purely locally so the hot
//! broadcast path never waits on a round trip.

use crate::client::{ChainClient, RpcError};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Opaque signing key material. The engine never interprets it; only the
/// workload's signer does.
#[derive(Clone)]
pub struct SignerKey(Vec<u8>);

impl SignerKey {
    /// Decode key material from hex, as it appears in configuration.
    pub fn from_hex(s: &str) -> Result<Self, AccountError> {
        let bytes = hex::decode(s).map_err(|e| AccountError::InvalidKey(e.to_string()))?;
        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SignerKey {
    // Never log key material.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignerKey({} bytes)", self.0.len())
    }
}

/// A signer account with its locally cached chain state.
#[derive(Debug, Clone)]
pub struct SignerAccount {
    /// Bech32/hex address of the account, as the chain knows it.
    pub address: String,
    /// Key material, opaque to the engine.
    pub key: SignerKey,
    sequence: u64,
    account_number: u64,
}

impl SignerAccount {
    pub fn new(address: impl Into<String>, key: SignerKey) -> Self {
        Self {
            address: address.into(),
            key,
            sequence: 0,
            account_number: 0,
        }
    }

    /// Cached sequence the chain expects for this account's next transaction.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Chain-assigned account number, immutable once fetched.
    pub fn account_number(&self) -> u64 {
        self.account_number
    }
}

/// Errors from the account dispenser.
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("no signer accounts configured")]
    Empty,

    #[error("invalid signer key: {0}")]
    InvalidKey(String),

    #[error("account query for {address} failed: {source}")]
    Query {
        address: String,
        #[source]
        source: RpcError,
    },
}

/// Rotates through a fixed pool of signer accounts.
///
/// Single-writer by construction: the pacing loop is the only caller, so no
/// locking is needed around the cached sequence.
pub struct AccountDispenser<C> {
    client: Arc<C>,
    accounts: Vec<SignerAccount>,
    index: usize,
}

impl<C: ChainClient> AccountDispenser<C> {
    pub fn new(client: Arc<C>, accounts: Vec<SignerAccount>) -> Result<Self, AccountError> {
        if accounts.is_empty() {
            return Err(AccountError::Empty);
        }
        Ok(Self {
            client,
            accounts,
            index: 0,
        })
    }

    /// The account currently in use. Does not mutate state.
    pub fn current(&self) -> &SignerAccount {
        &self.accounts[self.index]
    }

    /// Number of accounts in the rotation.
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Fetch sequence and account number for the active account and
    /// overwrite the cached values. The chain is authoritative at refresh
    /// time; the stale local value is never merged.
    pub async fn refresh_current(&mut self) -> Result<(), AccountError> {
        let address = self.accounts[self.index].address.clone();
        let info = self
            .client
            .account_info(&address)
            .await
            .map_err(|source| AccountError::Query {
                address: address.clone(),
                source,
            })?;
        let account = &mut self.accounts[self.index];
        account.sequence = info.sequence;
        account.account_number = info.account_number;
        debug!(
            address = %account.address,
            sequence = account.sequence,
            account_number = account.account_number,
            "refreshed account"
        );
        Ok(())
    }

    /// Move to the next account in the rotation (wrapping) and refresh it.
    ///
    /// Used when the active account's sequence has drifted out of sync.
    pub async fn advance(&mut self) -> Result<&SignerAccount, AccountError> {
        self.index = (self.index + 1) % self.accounts.len();
        self.refresh_current().await?;
        let account = &self.accounts[self.index];
        info!(address = %account.address, sequence = account.sequence, "advanced to next signer");
        Ok(account)
    }

    /// Return the active account's cached sequence and increment it by one.
    ///
    /// The only steady-state mutation path for the sequence; never queries
    /// the chain.
    pub fn take_sequence(&mut self) -> u64 {
        let account = &mut self.accounts[self.index];
        let sequence = account.sequence;
        account.sequence += 1;
        sequence
    }

    /// Undo the most recent `take_sequence`, restoring the pre-take value.
    ///
    /// Called when a broadcast was rejected with a retryable code, so the
    /// unconsumed sequence is reused on the next round.
    pub fn undo_sequence(&mut self) {
        let account = &mut self.accounts[self.index];
        debug_assert!(account.sequence > 0, "undo without a preceding take");
        account.sequence = account.sequence.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChain;

    fn dispenser(chain: MockChain, addrs: &[&str]) -> AccountDispenser<MockChain> {
        let accounts = addrs
            .iter()
            .map(|a| SignerAccount::new(*a, SignerKey::from_bytes(vec![7u8; 32])))
            .collect();
        AccountDispenser::new(Arc::new(chain), accounts).unwrap()
    }

    #[test]
    fn rejects_empty_pool() {
        let chain = Arc::new(MockChain::new());
        let result = AccountDispenser::new(chain, Vec::new());
        assert!(matches!(result, Err(AccountError::Empty)));
    }

    #[tokio::test]
    async fn take_sequence_is_monotonic() {
        let chain = MockChain::new().with_account("alice", 10, 1);
        let mut d = dispenser(chain, &["alice"]);
        d.refresh_current().await.unwrap();

        assert_eq!(d.take_sequence(), 10);
        assert_eq!(d.take_sequence(), 11);
        assert_eq!(d.take_sequence(), 12);
        assert_eq!(d.current().sequence(), 13);
    }

    #[tokio::test]
    async fn undo_restores_pre_take_value() {
        let chain = MockChain::new().with_account("alice", 5, 1);
        let mut d = dispenser(chain, &["alice"]);
        d.refresh_current().await.unwrap();

        assert_eq!(d.take_sequence(), 5);
        d.undo_sequence();
        assert_eq!(d.current().sequence(), 5);
        assert_eq!(d.take_sequence(), 5);
    }

    #[tokio::test]
    async fn refresh_overwrites_local_state() {
        let chain = MockChain::new().with_account("alice", 42, 9);
        let mut d = dispenser(chain, &["alice"]);
        d.refresh_current().await.unwrap();
        // Drift the local cache, then refresh: the chain value wins.
        d.take_sequence();
        d.take_sequence();
        assert_eq!(d.current().sequence(), 44);
        d.refresh_current().await.unwrap();
        assert_eq!(d.current().sequence(), 42);
        assert_eq!(d.current().account_number(), 9);
    }

    #[tokio::test]
    async fn advance_wraps_and_refreshes() {
        let chain = MockChain::new()
            .with_account("alice", 1, 1)
            .with_account("bob", 2, 2);
        let mut d = dispenser(chain, &["alice", "bob"]);
        d.refresh_current().await.unwrap();
        assert_eq!(d.current().address, "alice");

        d.advance().await.unwrap();
        assert_eq!(d.current().address, "bob");
        assert_eq!(d.current().sequence(), 2);

        d.advance().await.unwrap();
        assert_eq!(d.current().address, "alice");
        assert_eq!(d.current().sequence(), 1);
    }

    #[tokio::test]
    async fn refresh_of_unknown_address_fails() {
        let chain = MockChain::new();
        let mut d = dispenser(chain, &["nobody"]);
        let err = d.refresh_current().await.unwrap_err();
        assert!(matches!(err, AccountError::Query { .. }));
    }
}
