use crate::core::{Block, Blockchain, Payload};
use crate::mining::{CancelToken, ProofOfWork};
use crate::{LedgerError, Result};
use console::{style, Emoji};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

static PICKAXE: Emoji<'_, '_> = Emoji("⛏️ ", "");
static CHECK: Emoji<'_, '_> = Emoji("✅ ", "");
static CROSS: Emoji<'_, '_> = Emoji("❌ ", "");

/// Runs proof-of-work jobs behind a spinner, optionally bounded by a timeout.
pub struct MiningCli {
    timeout: Option<Duration>,
}

impl MiningCli {
    pub fn new(timeout_secs: Option<u64>) -> Self {
        Self {
            timeout: timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn add_data_block(&self, blockchain: &Blockchain, data: String) -> Result<()> {
        let block = self.mine(blockchain.pow(), |cancel| {
            blockchain.mine_data_block(data.into_bytes(), cancel)
        })?;
        print_mined(&block);
        Ok(())
    }

    /// Runs `job` with a fresh cancel token. When a timeout is set, a watchdog
    /// thread cancels the token once it elapses.
    pub fn mine<F>(&self, pow: &ProofOfWork, job: F) -> Result<Block>
    where
        F: FnOnce(&CancelToken) -> Result<Block>,
    {
        println!(
            "{}{} Mining with {} leading zero bits...",
            PICKAXE,
            style("Proof of Work").bold().green(),
            style(pow.target_bits()).bold()
        );

        let cancel = CancelToken::new();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let watchdog = self.timeout.map(|timeout| {
            let cancel = cancel.clone();
            thread::spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = done_rx.recv_timeout(timeout) {
                    log::warn!("Mining timeout after {} seconds", timeout.as_secs());
                    cancel.cancel();
                }
            })
        });

        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] Mining block... {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(100));

        let started = Instant::now();
        let result = job(&cancel);

        drop(done_tx);
        if let Some(handle) = watchdog {
            if handle.join().is_err() {
                log::error!("Mining watchdog thread panicked");
            }
        }
        pb.finish_and_clear();

        match &result {
            Ok(block) => log::debug!(
                "Mined block {} in {:.2}s",
                block.hash,
                started.elapsed().as_secs_f64()
            ),
            Err(LedgerError::Cancelled) => {
                println!("{}Mining cancelled; the chain is unchanged", CROSS);
                println!("Try increasing the timeout or reducing --target-bits");
            }
            Err(e) => println!("{}Mining error: {}", CROSS, e),
        }

        result
    }
}

pub fn print_mined(block: &Block) {
    println!("{}Block mined successfully! 🎉", CHECK);
    println!("Block hash: {}", style(block.hash).cyan());
    println!("Nonce: {}", block.nonce);
    match &block.payload {
        Payload::Data(data) => println!("Data: {}", String::from_utf8_lossy(data)),
        Payload::Transactions(transactions) => println!("Transactions: {}", transactions.len()),
    }
}
