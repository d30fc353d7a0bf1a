//! Block-paced chain stress harness.
//!
//! Broadcasts batches of signed transactions at a fixed per-block rate,
//! rotating through a pool of signer accounts, and tracks every transaction
//! from broadcast to commitment to produce per-round metrics.
//!
//! - [`client`]: the chain access trait and its HTTP implementation
//! - [`accounts`]: signer accounts and the sequence-managing dispenser
//! - [`workloads`]: message construction and transaction signing
//! - [`classify`]: mapping broadcast result codes to recovery actions
//! - [`tracker`]: transaction lifecycle bookkeeping
//! - [`runner`]: the pacing loop tying it all together
//! - [`metrics`]: per-round results and the CSV sink
//! - [`config`]: TOML configuration

pub mod accounts;
pub mod classify;
pub mod client;
pub mod config;
pub mod metrics;
pub mod runner;
pub mod testing;
pub mod tracker;
pub mod workloads;

pub use accounts::{AccountDispenser, SignerAccount, SignerKey};
pub use classify::{classify, BroadcastVerdict};
pub use client::{ChainClient, HttpChainClient, RpcError};
pub use config::Config;
pub use metrics::{CsvSink, RoundResult, RoundSink};
pub use runner::{RunConfig, RunReport, StressError, StressRunner};
pub use tracker::TxTracker;
pub use workloads::{Coin, SwapWorkload, Workload};
