//! ember: the command-line entry point of the Ember node.
//!
//! All commands are namespaced by the `NODE_ID` environment variable, which
//! selects the store directory `blockchain_<id>` and the wallet file
//! `wallet_<id>.dat` in the working directory.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use ember_chain::{new_transfer, Blockchain, UtxoSet};
use ember_core::address;
use ember_core::constants::DEFAULT_CENTRAL_ADDR;
use ember_core::pow::ProofOfWork;
use ember_core::types::Transaction;
use ember_network::{serve, submit_tx, Node};
use ember_wallet::Wallets;

/// A minimal UTXO proof-of-work blockchain node.
#[derive(Parser)]
#[command(name = "ember", version, about = "A minimal UTXO proof-of-work blockchain node")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a blockchain and award the genesis subsidy to an address.
    Createblockchain(CreateBlockchainArgs),
    /// Generate a new key pair and save it into the wallet file.
    Createwallet,
    /// Sum the unspent outputs held by an address.
    Getbalance(GetBalanceArgs),
    /// List every address in the wallet file.
    Listaddr,
    /// Walk the chain from tip to genesis and print every block.
    Printchain,
    /// Rebuild the UTXO set from the chain.
    Reindexutxo,
    /// Build, sign, and dispatch a transfer.
    Send(SendArgs),
    /// Start the peer server.
    Startnode(StartNodeArgs),
}

#[derive(Args)]
struct CreateBlockchainArgs {
    /// Address credited by the genesis coinbase.
    #[arg(long)]
    addr: String,
}

#[derive(Args)]
struct GetBalanceArgs {
    /// Address to sum unspent outputs for.
    #[arg(long)]
    addr: String,
}

#[derive(Args)]
struct SendArgs {
    /// Sender address; its wallet must be in the wallet file.
    #[arg(long)]
    from: String,

    /// Recipient address.
    #[arg(long)]
    to: String,

    /// Amount of coins to move.
    #[arg(long)]
    amount: u64,

    /// Mine the transaction immediately on this node instead of handing it
    /// to the network.
    #[arg(long)]
    mine: bool,

    /// Relay node receiving the transaction when not mining locally.
    #[arg(long, default_value = DEFAULT_CENTRAL_ADDR)]
    central: String,
}

#[derive(Args)]
struct StartNodeArgs {
    /// Enable the mining loop, paying block rewards to this address.
    #[arg(long)]
    miner: Option<String>,

    /// Address of the relay (central) node.
    #[arg(long, default_value = DEFAULT_CENTRAL_ADDR)]
    central: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let node_id =
        std::env::var("NODE_ID").context("NODE_ID environment variable is not set")?;

    match cli.command {
        Commands::Createblockchain(args) => create_blockchain(&node_id, args),
        Commands::Createwallet => create_wallet(&node_id),
        Commands::Getbalance(args) => get_balance(&node_id, args),
        Commands::Listaddr => list_addresses(&node_id),
        Commands::Printchain => print_chain(&node_id),
        Commands::Reindexutxo => reindex_utxo(&node_id),
        Commands::Send(args) => send(&node_id, args).await,
        Commands::Startnode(args) => start_node(&node_id, args).await,
    }
}

fn chain_path(node_id: &str) -> PathBuf {
    PathBuf::from(format!("blockchain_{node_id}"))
}

fn open_chain(node_id: &str) -> Result<Arc<Blockchain>> {
    let chain = Blockchain::open(chain_path(node_id))
        .context("no blockchain found, create one first")?;
    Ok(Arc::new(chain))
}

fn require_valid_address(addr: &str) -> Result<()> {
    if !address::validate(addr) {
        bail!("invalid address: {addr}");
    }
    Ok(())
}

fn create_blockchain(node_id: &str, args: CreateBlockchainArgs) -> Result<()> {
    require_valid_address(&args.addr)?;

    let chain = Arc::new(
        Blockchain::create(chain_path(node_id), &args.addr)
            .context("creating blockchain failed")?,
    );
    UtxoSet::new(chain).reindex()?;
    println!("Done.");
    Ok(())
}

fn create_wallet(node_id: &str) -> Result<()> {
    let path = Wallets::file_for_node(node_id);
    let mut wallets = Wallets::load(&path)?;
    let addr = wallets.create_wallet();
    wallets.save(&path)?;
    println!("New address: {addr}");
    Ok(())
}

fn get_balance(node_id: &str, args: GetBalanceArgs) -> Result<()> {
    require_valid_address(&args.addr)?;

    let chain = open_chain(node_id)?;
    let utxos = UtxoSet::new(chain);
    let pubkey_hash = address::pubkey_hash_of(&args.addr)?;
    println!("Balance of {}: {}", args.addr, utxos.balance(&pubkey_hash)?);
    Ok(())
}

fn list_addresses(node_id: &str) -> Result<()> {
    let wallets = Wallets::load(&Wallets::file_for_node(node_id))?;
    for addr in wallets.addresses() {
        println!("{addr}");
    }
    Ok(())
}

fn print_chain(node_id: &str) -> Result<()> {
    let chain = open_chain(node_id)?;
    for block in chain.iter() {
        let block = block?;
        println!("==== block {} ====", hex::encode(&block.hash));
        println!("height: {}", block.height);
        println!("prev: {}", hex::encode(&block.prev_hash));
        println!("pow: {}", ProofOfWork::new(&block).validate()?);
        for tx in &block.transactions {
            print!("{tx}");
        }
        println!();
    }
    Ok(())
}

fn reindex_utxo(node_id: &str) -> Result<()> {
    let chain = open_chain(node_id)?;
    let utxos = UtxoSet::new(chain);
    utxos.reindex()?;
    println!(
        "Done. There are {} transactions in the UTXO set.",
        utxos.count_txs()?
    );
    Ok(())
}

async fn send(node_id: &str, args: SendArgs) -> Result<()> {
    require_valid_address(&args.from)?;
    require_valid_address(&args.to)?;

    let chain = open_chain(node_id)?;
    let utxos = UtxoSet::new(chain.clone());

    let wallets = Wallets::load(&Wallets::file_for_node(node_id))?;
    let wallet = wallets.get(&args.from)?;

    let tx = new_transfer(wallet.keypair(), &args.to, args.amount, &utxos)?;

    if args.mine {
        let coinbase = Transaction::new_coinbase(&args.from, None)?;
        let block = chain.mine_block(vec![coinbase, tx], &AtomicBool::new(false))?;
        utxos.update(&block)?;
        info!(hash = %hex::encode(&block.hash), "mined transfer locally");
    } else {
        let local = format!("127.0.0.1:{node_id}");
        submit_tx(&args.central, &local, &tx)
            .await
            .context("handing the transaction to the relay node failed")?;
    }

    println!("Success.");
    Ok(())
}

async fn start_node(node_id: &str, args: StartNodeArgs) -> Result<()> {
    if let Some(miner) = &args.miner {
        require_valid_address(miner)?;
        info!(miner = %miner, "mining enabled");
    }

    let chain = open_chain(node_id)?;
    let addr = format!("127.0.0.1:{node_id}");
    let node = Node::new(addr, args.miner, chain, args.central);

    // Ctrl-c flips the miner's cancel flag, then the process exits; there is
    // no graceful shutdown handshake in the protocol.
    let shutdown = node.shutdown_flag().clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown.store(true, Ordering::Relaxed);
        info!("shutting down");
        std::process::exit(0);
    });

    serve(node).await?;
    Ok(())
}
