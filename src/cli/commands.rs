//! CLI commands for the ledger shell
//!
//! Implements all command handlers for the CLI interface.

use crate::config::ShellConfig;
use crate::core::amount::Fixed8;
use crate::core::block::{coin_asset_id, share_asset_id};
use crate::core::contract::Contract;
use crate::core::ledger::{Ledger, MemoryLedger};
use crate::core::transaction::{Transaction, TransactionOutput};
use crate::crypto::{address_to_script_hash, Hash256, PubKey};
use crate::network::{ChannelRelay, Relay};
use crate::signing::SignatureContext;
use crate::snapshot::{export_ledger, CancelToken, ChainReplayer, ReplayError, ReplayReport, SnapshotError};
use crate::wallet::{Wallet, WalletError};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// What happened to a requested spend
#[derive(Debug)]
pub enum SendOutcome {
    /// Fully signed, saved by the wallet and handed to the relay
    Relayed(Transaction),
    /// Other signers still have to contribute
    Pending(SignatureContext),
}

// =============================================================================
// Application State
// =============================================================================

/// Application state
pub struct AppState {
    pub config: ShellConfig,
    pub ledger: Arc<MemoryLedger>,
    pub wallet: Wallet,
    pub relay: ChannelRelay,
    outbox: mpsc::UnboundedReceiver<Transaction>,
}

impl AppState {
    /// Initialize application state, restoring the chain from the data directory
    pub fn new(config: ShellConfig) -> CliResult<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let wallet_path = config.wallet_path();
        let wallet = if wallet_path.exists() {
            Wallet::load(&wallet_path)?
        } else {
            Wallet::new()
        };

        let (relay, outbox) = ChannelRelay::new();
        let mut state = Self {
            config,
            ledger: Arc::new(MemoryLedger::new()),
            wallet,
            relay,
            outbox,
        };
        state.restore()?;
        Ok(state)
    }

    /// Replay the stored snapshot, if any, into the ledger
    fn restore(&mut self) -> CliResult<()> {
        let Some(path) = self.stored_snapshot() else {
            println!("🆕 No stored chain in {:?}, starting empty", self.config.data_dir);
            return Ok(());
        };

        println!("📂 Restoring chain from {:?}...", path);
        let replayer = ChainReplayer::new(self.ledger.as_ref())
            .suspend_verification(self.config.suspend_verification);
        let report = replayer.import(BufReader::new(File::open(&path)?), &self.config.archive_entry)?;
        log::info!(
            "Restored {} blocks from {:?} ({} skipped)",
            report.applied,
            path,
            report.skipped
        );
        self.wallet.prune_sent(&self.ledger);
        Ok(())
    }

    /// Stored snapshot to restore from, preferring the configured export format
    fn stored_snapshot(&self) -> Option<PathBuf> {
        let (first, second) = if self.config.archive_exports {
            (self.config.archive_path(), self.config.snapshot_path())
        } else {
            (self.config.snapshot_path(), self.config.archive_path())
        };
        [first, second].into_iter().find(|path| path.exists())
    }

    /// Save the wallet and write the chain back to the data directory
    pub fn save(&self) -> CliResult<()> {
        self.wallet.save(&self.config.wallet_path())?;

        if self.ledger.current_height().is_some() {
            let archive = self.config.archive_exports;
            let path = if archive {
                self.config.archive_path()
            } else {
                self.config.snapshot_path()
            };
            let entry = archive.then_some(self.config.archive_entry.as_str());
            let count = write_snapshot(self.ledger.as_ref(), &path, entry)?;
            log::info!("Saved {} blocks to {:?}", count, path);
        }
        Ok(())
    }

    /// Take every transaction handed to the relay so far
    pub fn drain_outbox(&mut self) -> Vec<Transaction> {
        let mut transactions = Vec::new();
        while let Ok(tx) = self.outbox.try_recv() {
            transactions.push(tx);
        }
        transactions
    }
}

/// Export `ledger` to `path` through a temporary file
fn write_snapshot(ledger: &MemoryLedger, path: &Path, archive_entry: Option<&str>) -> CliResult<u32> {
    let temp_path = path.with_extension("tmp");
    let file = File::create(&temp_path)?;
    let count = export_ledger(ledger, file, archive_entry)?;
    fs::rename(&temp_path, path)?;
    Ok(count)
}

// =============================================================================
// Argument Parsing
// =============================================================================

/// Resolve an asset name: `share`, `coin` or a hex asset id
pub fn parse_asset(asset: &str) -> CliResult<Hash256> {
    match asset.to_ascii_lowercase().as_str() {
        "share" => Ok(share_asset_id()),
        "coin" => Ok(coin_asset_id()),
        _ => Ok(asset.parse::<Hash256>()?),
    }
}

fn asset_name(asset_id: &Hash256) -> String {
    if *asset_id == share_asset_id() {
        "share".to_string()
    } else if *asset_id == coin_asset_id() {
        "coin".to_string()
    } else {
        asset_id.to_hex()
    }
}

// =============================================================================
// Wallet Commands
// =============================================================================

/// Create a new wallet file with one account
pub fn cmd_wallet_create(state: &mut AppState, label: Option<&str>) -> CliResult<()> {
    if state.wallet.accounts().next().is_some() {
        println!("⚠️  Wallet already exists at {:?}", state.config.wallet_path());
        return Ok(());
    }

    let account = state.wallet.create_account(label);
    state.wallet.save(&state.config.wallet_path())?;

    println!("🔐 New wallet created!");
    println!("   📍 Address: {}", account.address());
    println!("   🔑 Public Key: {}", account.public_key());
    println!("   📁 File: {:?}", state.config.wallet_path());
    Ok(())
}

/// Add `count` new accounts
pub fn cmd_wallet_address(state: &mut AppState, count: u32) -> CliResult<()> {
    println!("🔐 Created {} address(es):", count);
    for _ in 0..count {
        let account = state.wallet.create_account(None);
        println!("   📍 {}", account.address());
    }
    state.wallet.save(&state.config.wallet_path())?;
    Ok(())
}

/// Import an account from a hex private key
pub fn cmd_wallet_import_key(state: &mut AppState, private_key_hex: &str) -> CliResult<()> {
    let account = state.wallet.import_account(private_key_hex)?;
    state.wallet.save(&state.config.wallet_path())?;
    println!("🔑 Imported account {}", account.address());
    Ok(())
}

/// Register an m-of-n contract over `keys`
pub fn cmd_wallet_multisig(state: &mut AppState, threshold: usize, keys: &[String]) -> CliResult<()> {
    let keys = keys
        .iter()
        .map(|key| PubKey::from_hex(key))
        .collect::<Result<Vec<_>, _>>()?;
    let contract = Contract::multisig(threshold, &keys)?;
    state.wallet.add_contract(contract.clone())?;
    state.wallet.save(&state.config.wallet_path())?;

    println!("🔐 Multi-signature contract added!");
    println!("   📍 Address: {}", contract.address());
    println!("   📜 Script: {}", hex::encode(&contract.script));
    println!("   ✍️  Requires {} of {} signatures", threshold, keys.len());
    Ok(())
}

/// List the wallet's contracts with their balances
pub fn cmd_wallet_list(state: &AppState) -> CliResult<()> {
    let mut contracts = state.wallet.contracts().peekable();
    if contracts.peek().is_none() {
        println!("📭 No accounts found. Create one with 'wallet create'");
        return Ok(());
    }

    println!("📋 Wallet contracts:\n");
    for contract in contracts {
        let kind = contract.kind()?;
        println!("   📍 {} ({})", contract.address(), kind.description());

        let script_hashes = HashSet::from([contract.script_hash()]);
        let mut balances: Vec<_> = state.ledger.balances(&script_hashes)?.into_iter().collect();
        balances.sort_by_key(|(asset_id, _)| *asset_id);
        if balances.is_empty() {
            println!("      💰 0");
        }
        for (asset_id, value) in balances {
            println!("      💰 {} {}", value, asset_name(&asset_id));
        }
    }

    let pending = state.wallet.sent().len();
    if pending > 0 {
        println!("\n   ⏳ {} sent transaction(s) awaiting inclusion", pending);
    }
    Ok(())
}

// =============================================================================
// Send and Sign
// =============================================================================

/// Build, sign and, when complete, relay a payment
pub fn send(
    state: &mut AppState,
    asset: &str,
    address: &str,
    value: &str,
    fee: Option<&str>,
) -> CliResult<SendOutcome> {
    let output = TransactionOutput {
        asset_id: parse_asset(asset)?,
        value: value.parse::<Fixed8>()?,
        script_hash: address_to_script_hash(address)?,
    };
    let fee = match fee {
        Some(fee) => fee.parse::<Fixed8>()?,
        None => Fixed8::ZERO,
    };

    let unsigned = state.wallet.make_transaction(
        vec![output],
        fee,
        state.config.fee_asset,
        &state.ledger,
    )?;
    let mut context = SignatureContext::new(&unsigned);
    state.wallet.sign(&mut context)?;
    complete(state, context)
}

/// Relay `context`'s transaction if it is fully signed
fn complete(state: &mut AppState, context: SignatureContext) -> CliResult<SendOutcome> {
    if !context.is_complete() {
        return Ok(SendOutcome::Pending(context));
    }

    let tx = context.into_signed_transaction()?;
    state.wallet.save_transaction(tx.clone());
    state.wallet.save(&state.config.wallet_path())?;
    if !state.relay.relay(&tx) {
        log::warn!("Transaction {} was not accepted by the relay", tx.hash());
    }
    Ok(SendOutcome::Relayed(tx))
}

/// Send an asset to an address
pub fn cmd_send(
    state: &mut AppState,
    asset: &str,
    address: &str,
    value: &str,
    fee: Option<&str>,
) -> CliResult<()> {
    let outcome = match send(state, asset, address, value, fee) {
        Ok(outcome) => outcome,
        Err(e) => {
            if e
                .downcast_ref::<WalletError>()
                .is_some_and(WalletError::is_insufficient_funds)
            {
                println!("❌ Insufficient funds");
            }
            return Err(e);
        }
    };
    report_outcome(state, outcome)
}

/// Add this wallet's signatures to a saved context
pub fn cmd_sign(state: &mut AppState, context_file: &Path) -> CliResult<()> {
    let json = fs::read_to_string(context_file)?;
    let mut context = SignatureContext::from_json_checked(&json, &state.ledger)?;

    if !state.wallet.sign(&mut context)? {
        println!("⚠️  This wallet has no signatures to add");
    }

    let outcome = complete(state, context)?;
    if let SendOutcome::Pending(context) = &outcome {
        fs::write(context_file, context.to_json()?)?;
    }
    report_outcome(state, outcome)
}

fn report_outcome(state: &AppState, outcome: SendOutcome) -> CliResult<()> {
    match outcome {
        SendOutcome::Relayed(tx) => {
            println!("✅ Transaction relayed!");
            println!("   🔗 Hash: {}", tx.hash());
            println!("   📥 Inputs: {}", tx.inputs.len());
            println!("   📤 Outputs: {}", tx.outputs.len());
        }
        SendOutcome::Pending(context) => {
            let path = state
                .config
                .data_dir
                .join(format!("{}.context.json", context.hash()));
            fs::write(&path, context.to_json()?)?;

            println!("✍️  More signatures are required");
            println!("   🔗 Hash: {}", context.hash());
            for script_hash in context.missing() {
                println!("   ⏳ Waiting on {}", crate::crypto::script_hash_to_address(&script_hash));
            }
            println!("   📁 Context saved to {:?}", path);
            println!("\n{}", context);
        }
    }
    Ok(())
}

// =============================================================================
// Snapshot Commands
// =============================================================================

/// Export the chain to a raw or archived snapshot
pub fn cmd_export(state: &AppState, path: Option<PathBuf>, archive: bool) -> CliResult<()> {
    let archive = archive || state.config.archive_exports;
    let path = path.unwrap_or_else(|| {
        if archive {
            state.config.archive_path()
        } else {
            state.config.snapshot_path()
        }
    });
    let entry = archive.then_some(state.config.archive_entry.as_str());

    println!("📤 Exporting chain to {:?}...", path);
    let count = write_snapshot(state.ledger.as_ref(), &path, entry)?;
    println!("✅ Exported {} block(s)", count);
    Ok(())
}

/// Replay a snapshot file on a blocking task
pub fn spawn_import(
    ledger: Arc<MemoryLedger>,
    path: PathBuf,
    entry_name: String,
    suspend_verification: bool,
    cancel: CancelToken,
) -> JoinHandle<Result<ReplayReport, ReplayError>> {
    tokio::task::spawn_blocking(move || {
        let file = File::open(&path).map_err(|e| ReplayError::Snapshot {
            last_applied: ledger.current_height(),
            source: SnapshotError::IoError(e),
        })?;
        ChainReplayer::new(ledger.as_ref())
            .suspend_verification(suspend_verification)
            .with_cancel(cancel)
            .import(BufReader::new(file), &entry_name)
    })
}

/// Import a snapshot; Ctrl-C stops at the next block boundary
pub async fn cmd_import(state: &mut AppState, path: Option<PathBuf>) -> CliResult<()> {
    let path = match path {
        Some(path) => path,
        None => state
            .stored_snapshot()
            .ok_or("No snapshot found in the data directory")?,
    };

    println!("📥 Importing chain from {:?}...", path);
    let cancel = CancelToken::new();
    let mut handle = spawn_import(
        Arc::clone(&state.ledger),
        path,
        state.config.archive_entry.clone(),
        state.config.suspend_verification,
        cancel.clone(),
    );

    let result = tokio::select! {
        result = &mut handle => result?,
        _ = tokio::signal::ctrl_c() => {
            log::warn!("Interrupted, stopping import at the next block");
            cancel.cancel();
            handle.await?
        }
    };

    let pruned = state.wallet.prune_sent(&state.ledger);
    match result {
        Ok(report) => {
            if report.cancelled {
                println!("⏹️  Import cancelled");
            } else {
                println!("✅ Import complete");
            }
            println!("   🧱 Applied: {}", report.applied);
            println!("   ⏭️  Skipped: {}", report.skipped);
            if pruned > 0 {
                println!("   🧹 {} sent transaction(s) confirmed", pruned);
            }
            Ok(())
        }
        Err(e) => {
            println!("❌ Import failed after height {:?}", e.last_applied());
            Err(e.into())
        }
    }
}

// =============================================================================
// State
// =============================================================================

/// Display ledger and wallet state
pub fn cmd_show_state(state: &AppState) -> CliResult<()> {
    println!("📊 Ledger State\n");
    match state.ledger.current_height() {
        Some(height) => println!("   📏 Height: {}", height),
        None => println!("   📏 Height: (empty)"),
    }
    println!("   🧱 Blocks: {}", state.ledger.block_count());
    if let Some(tip) = state.ledger.tip_hash() {
        println!("   🔗 Tip: {}", tip);
    }
    println!("   🪙 Unspent coins: {}", state.ledger.coin_count());
    println!(
        "   🛡️  Verification: {}",
        if state.ledger.verify_blocks() { "on" } else { "suspended" }
    );
    println!("   👛 Wallet contracts: {}", state.wallet.contracts().count());
    println!("   ⏳ Unconfirmed sent: {}", state.wallet.sent().len());
    Ok(())
}
