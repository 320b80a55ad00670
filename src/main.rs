//! Ledger Shell CLI
//!
//! Command-line interface for the node-operator shell.

use clap::{Parser, Subcommand};
use ledger_shell::cli::{self, AppState};
use ledger_shell::config::ShellConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ledger-shell")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "Node-operator shell: multi-party signing and chain snapshots", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory holding the wallet and chain snapshot
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wallet operations
    Wallet {
        #[command(subcommand)]
        action: WalletCommands,
    },

    /// Send an asset to an address
    Send {
        /// Asset: share, coin or a hex asset id
        asset: String,

        /// Recipient's address
        address: String,

        /// Amount to send
        value: String,

        /// Network fee paid in the configured fee asset
        #[arg(short, long)]
        fee: Option<String>,
    },

    /// Add this wallet's signatures to a saved signature context
    Sign {
        /// Context file produced by `send`
        context_file: PathBuf,
    },

    /// Export the chain to a snapshot file
    Export {
        /// Output file path
        path: Option<PathBuf>,

        /// Write a ZIP archive instead of a raw stream
        #[arg(short, long)]
        archive: bool,
    },

    /// Import a raw or archived snapshot file
    Import {
        /// Input file path
        path: Option<PathBuf>,
    },

    /// Display node state
    Show {
        #[command(subcommand)]
        action: ShowCommands,
    },
}

#[derive(Subcommand)]
enum WalletCommands {
    /// Create a new wallet
    Create {
        /// Optional label for the first account
        #[arg(short, long)]
        label: Option<String>,
    },

    /// Create new addresses
    Address {
        /// Number of addresses to create
        #[arg(short, long, default_value = "1")]
        count: u32,
    },

    /// Import an account from a hex private key
    ImportKey { private_key: String },

    /// Add an m-of-n multi-signature contract
    Multisig {
        /// Required number of signatures
        threshold: usize,

        /// Hex-encoded compressed public keys
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// List contracts and balances
    List,
}

#[derive(Subcommand)]
enum ShowCommands {
    /// Ledger height, coins and wallet summary
    State,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = ShellConfig::load_or_default(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    // Initialize application state
    let mut state = AppState::new(config)?;

    // Process commands
    match cli.command {
        Commands::Wallet { action } => match action {
            WalletCommands::Create { label } => {
                cli::cmd_wallet_create(&mut state, label.as_deref())?;
            }
            WalletCommands::Address { count } => {
                cli::cmd_wallet_address(&mut state, count)?;
            }
            WalletCommands::ImportKey { private_key } => {
                cli::cmd_wallet_import_key(&mut state, &private_key)?;
            }
            WalletCommands::Multisig { threshold, keys } => {
                cli::cmd_wallet_multisig(&mut state, threshold, &keys)?;
            }
            WalletCommands::List => {
                cli::cmd_wallet_list(&state)?;
            }
        },

        Commands::Send {
            asset,
            address,
            value,
            fee,
        } => {
            cli::cmd_send(&mut state, &asset, &address, &value, fee.as_deref())?;
        }

        Commands::Sign { context_file } => {
            cli::cmd_sign(&mut state, &context_file)?;
        }

        Commands::Export { path, archive } => {
            cli::cmd_export(&state, path, archive)?;
        }

        Commands::Import { path } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(cli::cmd_import(&mut state, path))?;
        }

        Commands::Show { action } => match action {
            ShowCommands::State => {
                cli::cmd_show_state(&state)?;
            }
        },
    }

    let relayed = state.drain_outbox();
    if !relayed.is_empty() {
        println!("📡 {} transaction(s) handed to the relay", relayed.len());
    }

    // Write the chain and wallet back on exit
    state.save()?;

    Ok(())
}
