//! Blockstress CLI
//!
//! A command-line tool for load-testing a chain with block-paced swap
//! transactions.

use blockstress_stressor::accounts::AccountDispenser;
use blockstress_stressor::client::{ChainClient, HttpChainClient};
use blockstress_stressor::config::{Config, DEFAULT_CONFIG_PATH};
use blockstress_stressor::metrics::CsvSink;
use blockstress_stressor::runner::{RunConfig, StressRunner};
use blockstress_stressor::workloads::{Coin, SwapWorkload};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "blockstress")]
#[command(about = "Block-paced transaction stress tool")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the node's current status
    Status,

    /// Run the stress loop against the configured endpoint
    Run {
        /// Liquidity pool to swap against
        #[arg(long)]
        pool_id: u64,

        /// Coin offered in each swap, e.g. "50000000uakt"
        #[arg(long)]
        offer_coin: Coin,

        /// Denomination demanded in return
        #[arg(long)]
        demand_coin_denom: String,

        /// Limit order price, as a decimal string
        #[arg(long, default_value = "1.0")]
        order_price: String,

        /// Number of blocks to broadcast over
        #[arg(short = 's', long, default_value = "10")]
        height_span: u64,

        /// Transactions per block
        #[arg(short = 't', long, default_value = "1")]
        num_txs: usize,

        /// Messages per transaction
        #[arg(short = 'm', long, default_value = "1")]
        num_msgs: usize,

        /// CSV file the per-round results are appended to
        #[arg(long, default_value = "result.csv")]
        out: String,

        /// Status polling interval while waiting for a block
        #[arg(long, default_value = "100ms")]
        poll_interval: humantime::Duration,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    tracing_subscriber::fmt::init();

    let config = Config::read(&cli.config)?;
    let client = Arc::new(HttpChainClient::new(&config.rpc.address));

    match cli.command {
        Commands::Status => {
            let status = client.status().await?;
            println!("chain:  {}", status.chain_id);
            println!("height: {}", status.latest_height);
        }

        Commands::Run {
            pool_id,
            offer_coin,
            demand_coin_denom,
            order_price,
            height_span,
            num_txs,
            num_msgs,
            out,
            poll_interval,
        } => {
            let status = client.status().await?;
            let workload = SwapWorkload::new(&status.chain_id, pool_id, offer_coin, demand_coin_denom)
                .with_order_price(order_price)
                .with_msgs_per_tx(num_msgs)
                .with_gas_limit(config.tx.gas_limit)
                .with_fee(Coin::new(config.tx.fee_amount, &config.tx.fee_denom))
                .with_memo(&config.tx.memo);

            let dispenser = AccountDispenser::new(client.clone(), config.signer_accounts()?)?;
            let sink = CsvSink::open(&out)?;
            let run_config = RunConfig::default()
                .with_height_span(height_span)
                .with_txs_per_block(num_txs)
                .with_poll_interval(*poll_interval);

            let mut runner =
                StressRunner::new(client, workload, dispenser, Box::new(sink), run_config);

            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrl_c.cancel();
                }
            });

            println!("Broadcasting {num_txs} tx(s) per block over {height_span} blocks...");
            let report = runner.run(cancel).await?;
            report.print();
        }
    }

    Ok(())
}
