use crate::cli::mining_cli::{print_mined, MiningCli};
use crate::cli::wallet_cli::WalletCli;
use crate::config::Config;
use crate::core::{Blockchain, Payload, Transaction};
use crate::storage::Database;
use crate::{LedgerError, Result};
use clap::{Parser, Subcommand};
use console::style;
use flate2::{Compression, GzBuilder};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tar::Builder;

#[derive(Parser)]
#[command(name = "hashledger")]
#[command(about = "Hashledger - a single-writer proof-of-work ledger with UTXO balances")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, help = "Data directory")]
    pub data_dir: Option<PathBuf>,

    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Leading zero bits required of block hashes")]
    pub target_bits: Option<u32>,

    #[arg(long, help = "Cancel mining after this many seconds")]
    pub timeout: Option<u64>,

    #[arg(long, help = "Enable debug logging")]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new chain whose genesis reward pays OWNER
    #[command(name = "createchain")]
    CreateChain { owner: String },

    /// Show the balance of OWNER
    #[command(name = "getbalance")]
    GetBalance { owner: String },

    /// Transfer AMOUNT from FROM to TO and mine it into a block
    Send {
        from: String,
        to: String,
        amount: u64,
        #[arg(long, help = "Ask for confirmation before mining")]
        interactive: bool,
    },

    /// Print all blocks from the tip back to genesis
    #[command(name = "printchain")]
    PrintChain {
        #[arg(long, help = "Show transaction inputs and outputs")]
        verbose: bool,
    },

    /// Mine a block carrying DATA instead of transactions
    #[command(name = "addblock")]
    AddBlock { data: String },

    /// Re-validate every block on the chain
    Verify,

    /// Show the tip, height and difficulty
    Info,

    /// Database maintenance commands
    #[command(subcommand)]
    Db(DbCommands),
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Show database statistics
    Stats,

    /// Write a tar.gz archive of the data directory
    Backup { path: PathBuf },
}

pub fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _ = if cli.debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).try_init()
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init()
    };

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }
    if let Some(target_bits) = cli.target_bits {
        config.mining.target_bits = target_bits;
    }
    config.validate()?;

    std::fs::create_dir_all(&config.storage.data_dir)?;
    let db = Arc::new(Database::new(config.db_path())?);
    log::debug!("Using database at {}", config.db_path().display());

    let miner = MiningCli::new(cli.timeout);

    match cli.command {
        Commands::CreateChain { owner } => create_chain(&config, db, &owner, &miner)?,
        Commands::GetBalance { owner } => {
            let blockchain = Blockchain::open_with(db, config.proof_of_work()?, config.block_validator())?;
            WalletCli::new(&blockchain).get_balance(&owner)?;
        }
        Commands::Send { from, to, amount, interactive } => {
            let blockchain = Blockchain::open_with(db, config.proof_of_work()?, config.block_validator())?;
            WalletCli::new(&blockchain).send(&from, &to, amount, interactive, &miner)?;
        }
        Commands::PrintChain { verbose } => {
            let blockchain = Blockchain::open_with(db, config.proof_of_work()?, config.block_validator())?;
            print_chain(&blockchain, verbose)?;
        }
        Commands::AddBlock { data } => {
            let blockchain = Blockchain::open_with(db, config.proof_of_work()?, config.block_validator())?;
            miner.add_data_block(&blockchain, data)?;
        }
        Commands::Verify => {
            let blockchain = Blockchain::open_with(db, config.proof_of_work()?, config.block_validator())?;
            verify_chain(&blockchain)?;
        }
        Commands::Info => {
            let blockchain = Blockchain::open_with(db, config.proof_of_work()?, config.block_validator())?;
            let info = blockchain.get_chain_info()?;
            println!("⛓️  Blockchain Information:");
            println!("Height: {}", info.height);
            println!("Tip hash: {}", info.tip);
            println!("Target bits: {}", info.target_bits);
        }
        Commands::Db(cmd) => handle_db_command(&config, &db, cmd)?,
    }

    Ok(())
}

fn create_chain(config: &Config, db: Arc<Database>, owner: &str, miner: &MiningCli) -> Result<()> {
    if owner.is_empty() {
        return Err(LedgerError::InvalidInput("Owner must not be empty".to_string()));
    }
    let pow = config.proof_of_work()?;
    let coinbase = Transaction::new_coinbase(owner, config.consensus.subsidy, None)?;

    let genesis = miner.mine(&pow, |cancel| {
        let blockchain = Blockchain::create_with(db, pow.clone(), config.block_validator(), coinbase, cancel)?;
        let tip = blockchain.tip()?;
        blockchain
            .get_block(&tip)?
            .ok_or_else(|| LedgerError::NotFound(format!("Genesis block {} missing after creation", tip)))
    })?;

    print_mined(&genesis);
    println!("✅ Done! {} receives {}", style(owner).bold().cyan(), config.consensus.subsidy);
    Ok(())
}

fn print_chain(blockchain: &Blockchain, verbose: bool) -> Result<()> {
    for block in blockchain.iter()? {
        let block = block?;
        let valid = blockchain.pow().validate(&block);

        match &block.prev_hash {
            Some(prev_hash) => println!("Prev. hash: {}", prev_hash),
            None => println!("Prev. hash: {}", style("(genesis)").dim()),
        }
        match &block.payload {
            Payload::Data(data) => println!("Data: {}", String::from_utf8_lossy(data)),
            Payload::Transactions(transactions) => {
                println!("Transactions: {}", transactions.len());
                if verbose {
                    for tx in transactions {
                        print_transaction(tx);
                    }
                }
            }
        }
        println!("Hash: {}", block.hash);
        println!("Timestamp: {}", format_timestamp(block.timestamp));
        println!(
            "PoW: {}",
            if valid { style("true").green() } else { style("false").red() }
        );
        println!();
    }
    Ok(())
}

fn print_transaction(tx: &Transaction) {
    println!("  Transaction {}{}", tx.id, if tx.is_coinbase() { " (coinbase)" } else { "" });
    for input in &tx.vin {
        if tx.is_coinbase() {
            println!("    In:  {}", input.unlock_data);
        } else {
            println!("    In:  {}:{} by {}", input.txid, input.vout, input.unlock_data);
        }
    }
    for (index, output) in tx.vout.iter().enumerate() {
        println!("    Out {}: {} to {}", index, output.value, output.lock_data);
    }
}

fn format_timestamp(timestamp: i64) -> String {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

fn verify_chain(blockchain: &Blockchain) -> Result<()> {
    match blockchain.verify() {
        Ok(report) => {
            println!("✅ Blockchain is valid");
            println!("Blocks: {}", report.blocks);
            println!("Transactions: {}", report.transactions);
            println!("Tip: {}", report.tip);
            println!("Genesis: {}", report.genesis);
            Ok(())
        }
        Err(e) => {
            println!("❌ Blockchain verification failed: {}", style(&e).red());
            Err(e)
        }
    }
}

fn handle_db_command(config: &Config, db: &Database, cmd: DbCommands) -> Result<()> {
    match cmd {
        DbCommands::Stats => {
            let stats = db.get_database_stats()?;

            println!("📊 Database Statistics:");
            println!("Path: {}", db.path().display());
            println!("Blocks: {}", stats.block_count);
            println!("Blocks size: {} KB", stats.blocks_size / 1024);
            println!("Total size: {} KB", stats.total_size / 1024);
        }

        DbCommands::Backup { path } => backup_data_dir(db, &config.storage.data_dir, &path)?,
    }

    Ok(())
}

fn backup_data_dir(db: &Database, data_dir: &Path, path: &Path) -> Result<()> {
    println!("💾 Creating database backup...");

    if !data_dir.exists() {
        return Err(LedgerError::Storage("Data directory does not exist".to_string()));
    }
    if let (Ok(target), Ok(source)) = (
        path.parent().unwrap_or_else(|| Path::new(".")).canonicalize(),
        data_dir.canonicalize(),
    ) {
        if target.starts_with(&source) {
            return Err(LedgerError::InvalidInput(
                "Backup file must be written outside the data directory".to_string(),
            ));
        }
    }

    db.flush()?;

    let backup_file = File::create(path)
        .map_err(|e| LedgerError::Storage(format!("Failed to create backup file: {}", e)))?;

    let gz_encoder = GzBuilder::new()
        .filename(format!("hashledger-backup-{}.tar", chrono::Utc::now().format("%Y%m%d-%H%M%S")))
        .write(backup_file, Compression::default());

    let mut tar_builder = Builder::new(gz_encoder);
    tar_builder
        .append_dir_all("hashledger-data", data_dir)
        .map_err(|e| LedgerError::Storage(format!("Failed to create backup archive: {}", e)))?;

    tar_builder
        .into_inner()
        .and_then(|gz| gz.finish())
        .map_err(|e| LedgerError::Storage(format!("Failed to finalize backup: {}", e)))?;

    let file_size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

    println!("✅ Backup created successfully!");
    println!("📁 File: {}", path.display());
    println!("📏 Size: {:.2} KB", file_size as f64 / 1024.0);
    log::info!("Database backup created at {}", path.display());
    Ok(())
}
