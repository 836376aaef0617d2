use crate::cli::mining_cli::{print_mined, MiningCli};
use crate::core::{Blockchain, Transaction, UtxoResolver};
use crate::{LedgerError, Result};
use console::{style, Emoji};
use dialoguer::{theme::ColorfulTheme, Confirm};

static COIN: Emoji<'_, '_> = Emoji("🪙 ", "");
static ARROW: Emoji<'_, '_> = Emoji("➡️ ", "->");
static CROSS: Emoji<'_, '_> = Emoji("❌ ", "");

/// Balance queries and transfers between owners.
pub struct WalletCli<'a> {
    blockchain: &'a Blockchain,
}

impl<'a> WalletCli<'a> {
    pub fn new(blockchain: &'a Blockchain) -> Self {
        Self { blockchain }
    }

    pub fn get_balance(&self, owner: &str) -> Result<u64> {
        let resolver = UtxoResolver::new(self.blockchain);
        let balance = resolver.get_balance(owner)?;

        println!("{}Balance of '{}': {}", COIN, style(owner).bold().cyan(), style(balance).bold().green());
        log::debug!("{} holds {} unspent outputs", owner, resolver.find_utxo(owner)?.len());
        Ok(balance)
    }

    /// Builds a transfer, optionally asks for confirmation, then mines it.
    /// Returns `None` when the user declines.
    pub fn send(
        &self,
        from: &str,
        to: &str,
        amount: u64,
        interactive: bool,
        miner: &MiningCli,
    ) -> Result<Option<Transaction>> {
        let tx = Transaction::new_utxo_transaction(from, to, amount, &UtxoResolver::new(self.blockchain))?;

        println!("{} {} {} {}", style(from).bold(), ARROW, style(to).bold(), style(amount).bold().green());
        println!("Transaction: {}", tx.id);
        println!("Inputs: {}  Outputs: {}", tx.vin.len(), tx.vout.len());

        if interactive
            && !Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt("Confirm transaction?")
                .interact()
                .map_err(|e| LedgerError::InvalidInput(format!("Interaction error: {}", e)))?
        {
            println!("{}Transaction cancelled", CROSS);
            return Ok(None);
        }

        let block = miner.mine(self.blockchain.pow(), |cancel| {
            self.blockchain.mine_block(vec![tx.clone()], cancel)
        })?;
        print_mined(&block);
        log::info!("Sent {} from {} to {} in transaction {}", amount, from, to, tx.id);

        Ok(Some(tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mining::{CancelToken, ProofOfWork};
    use crate::storage::Database;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_send_moves_funds() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(Database::new(temp_dir.path().join("test.db"))?);
        let chain = Blockchain::create(
            db,
            ProofOfWork::new(8)?,
            Transaction::new_coinbase("alice", 10, None)?,
            &CancelToken::new(),
        )?;
        let wallet = WalletCli::new(&chain);

        let tx = wallet.send("alice", "bob", 4, false, &MiningCli::new(None))?;
        assert!(tx.is_some());
        assert_eq!(wallet.get_balance("alice")?, 6);
        assert_eq!(wallet.get_balance("bob")?, 4);

        let err = wallet.send("bob", "carol", 5, false, &MiningCli::new(None)).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(wallet.get_balance("bob")?, 4);
        Ok(())
    }
}
