//! Send an ERC-20 transfer through the full pipeline
//!
//! Run with: cargo run --example transfer
//!
//! Requires ENDPOINT, CHAIN_ID, TOKEN_ADDRESS, RECIPIENT and AMOUNT, plus one
//! wallet backend (ETH_PRIVATE_KEY, SIGNER_URL, SGX_WALLET_URL or LEDGER_EMULATOR)

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use eyre::Context;
use skale_tx::{
    contracts::token, AlloyRpc, AnyWallet, Backoff, NetworkConfig, RetryPolicy, TxConfig,
    TxOptions, TxPipeline, Wallet, WalletConfig,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let network = NetworkConfig::from_env()?;
    let token_address: Address = std::env::var("TOKEN_ADDRESS")
        .context("TOKEN_ADDRESS must be set")?
        .parse()
        .context("TOKEN_ADDRESS is not an address")?;
    let recipient: Address = std::env::var("RECIPIENT")
        .context("RECIPIENT must be set")?
        .parse()
        .context("RECIPIENT is not an address")?;
    let amount: U256 = std::env::var("AMOUNT")
        .context("AMOUNT must be set")?
        .parse()
        .context("AMOUNT must be an integer in base units")?;

    let rpc = Arc::new(AlloyRpc::connect(&network.rpc_url)?);
    let wallet = Arc::new(AnyWallet::connect(WalletConfig::from_env()?, rpc.clone()).await?);
    let pipeline = TxPipeline::new(rpc.clone(), wallet.clone(), TxConfig::from_env()?)
        .with_chain_id(network.chain_id);

    println!("Sender: {}", wallet.address());

    // Balances before, in parallel
    let (sender_before, recipient_before) = tokio::try_join!(
        token::balance_of(rpc.as_ref(), token_address, wallet.address()),
        token::balance_of(rpc.as_ref(), token_address, recipient),
    )?;
    println!("Sender balance:    {sender_before}");
    println!("Recipient balance: {recipient_before}");

    let call = token::transfer(token_address, recipient, amount);

    // Dry run first so a revert is visible before anything is signed
    let outcome = pipeline.dry_run(&call).await;
    println!("Dry run: {:?}", outcome.status());
    if !outcome.is_success() {
        println!("Not sending: {outcome:?}");
        return Ok(());
    }

    let policy = RetryPolicy::new(3, Backoff::Exponential {
        initial: std::time::Duration::from_secs(2),
    });
    let res = pipeline
        .submit_with_retry(&call, &TxOptions::default().with_confirmation_blocks(1), &policy)
        .await?;

    println!("Transaction: {:?}", res.tx_hash());
    println!("Attempts:    {}", res.attempts());
    if let Some(receipt) = res.receipt() {
        println!("Block:       {}", receipt.block_number);
        println!("Gas used:    {}", receipt.gas_used);
    }

    let recipient_after = token::balance_of(rpc.as_ref(), token_address, recipient).await?;
    println!("Recipient balance after: {recipient_after}");

    Ok(())
}
