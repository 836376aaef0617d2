use crate::core::transaction::OutPoint;
use crate::core::utxo::UtxoResolver;
use crate::core::Transaction;
use crate::{LedgerError, Result};
use std::collections::HashSet;

/// Value paid by every coinbase transaction.
pub const DEFAULT_SUBSIDY: u64 = 10;

pub const DEFAULT_MAX_BLOCK_TRANSACTIONS: usize = 10_000;

/// Admission rules for transactions entering a new block.
#[derive(Debug, Clone)]
pub struct BlockValidator {
    max_block_transactions: usize,
    subsidy: u64,
}

impl Default for BlockValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockValidator {
    pub fn new() -> Self {
        Self {
            max_block_transactions: DEFAULT_MAX_BLOCK_TRANSACTIONS,
            subsidy: DEFAULT_SUBSIDY,
        }
    }

    pub fn with_params(max_block_transactions: usize, subsidy: u64) -> Self {
        Self {
            max_block_transactions,
            subsidy,
        }
    }

    pub fn subsidy(&self) -> u64 {
        self.subsidy
    }

    /// A coinbase pays exactly the subsidy through a single output.
    pub fn validate_coinbase(&self, tx: &Transaction) -> Result<()> {
        if !tx.is_coinbase() {
            return Err(LedgerError::Consensus(format!("Transaction {} is not a coinbase", tx.id)));
        }

        match tx.vout.as_slice() {
            [output] if output.value == self.subsidy => Ok(()),
            [output] => Err(LedgerError::Consensus(format!(
                "Coinbase {} pays {}, subsidy is {}",
                tx.id, output.value, self.subsidy
            ))),
            outputs => Err(LedgerError::Consensus(format!(
                "Coinbase {} has {} outputs, expected exactly one",
                tx.id,
                outputs.len()
            ))),
        }
    }

    /// Checks the shape of a block's transaction list without touching the chain.
    pub fn validate_block_structure(&self, transactions: &[Transaction]) -> Result<()> {
        if transactions.is_empty() {
            return Err(LedgerError::Consensus("Block must contain at least one transaction".to_string()));
        }

        if transactions.len() > self.max_block_transactions {
            return Err(LedgerError::Consensus(format!(
                "Block holds {} transactions, limit is {}",
                transactions.len(),
                self.max_block_transactions
            )));
        }

        // A coinbase is only admitted as the sole transaction.
        if transactions.len() > 1 {
            if let Some(i) = transactions.iter().position(Transaction::is_coinbase) {
                return Err(LedgerError::Consensus(format!(
                    "Coinbase transaction {} must be the only transaction in its block",
                    i
                )));
            }
        }

        let mut seen_txids = HashSet::new();
        for tx in transactions {
            if !seen_txids.insert(tx.id) {
                return Err(LedgerError::Consensus(format!("Duplicate transaction in block: {}", tx.id)));
            }
        }

        Ok(())
    }

    /// Validates `transactions` against the unspent outputs on the current chain.
    pub fn validate_transactions(
        &self,
        transactions: &[Transaction],
        resolver: &UtxoResolver<'_>,
    ) -> Result<()> {
        self.validate_block_structure(transactions)?;

        for tx in transactions {
            self.validate_transaction_structure(tx)?;
            if tx.is_coinbase() {
                self.validate_coinbase(tx)?;
            }
        }

        let confirmed = resolver.transaction_ids()?;
        if let Some(tx) = transactions.iter().find(|tx| confirmed.contains(&tx.id)) {
            return Err(LedgerError::Consensus(format!("Transaction {} is already on the chain", tx.id)));
        }

        if transactions.iter().all(Transaction::is_coinbase) {
            return Ok(());
        }

        let utxos = resolver.find_all_utxo()?;
        let mut spent_in_block: HashSet<OutPoint> = HashSet::new();

        for tx in transactions {
            let mut input_value = 0u64;

            for input in &tx.vin {
                let outpoint = input.outpoint();

                if !spent_in_block.insert(outpoint) {
                    return Err(LedgerError::Consensus(format!(
                        "Output {}:{} spent twice in the same block",
                        outpoint.txid, outpoint.vout
                    )));
                }

                let entry = utxos.get(&outpoint).ok_or_else(|| {
                    LedgerError::Consensus(format!(
                        "Transaction {} spends missing or spent output {}:{}",
                        tx.id, outpoint.txid, outpoint.vout
                    ))
                })?;

                if !input.can_unlock_output_with(&entry.output.lock_data) {
                    return Err(LedgerError::Consensus(format!(
                        "Transaction {} cannot unlock output {}:{}",
                        tx.id, outpoint.txid, outpoint.vout
                    )));
                }

                input_value = input_value.checked_add(entry.output.value).ok_or_else(|| {
                    LedgerError::Consensus(format!("Input value overflow in transaction {}", tx.id))
                })?;
            }

            let output_value = tx.total_output_value()?;

            if input_value != output_value {
                return Err(LedgerError::Consensus(format!(
                    "Transaction {} spends {} but creates {}",
                    tx.id, input_value, output_value
                )));
            }
        }

        log::debug!("✅ {} transactions passed validation", transactions.len());
        Ok(())
    }

    fn validate_transaction_structure(&self, tx: &Transaction) -> Result<()> {
        if tx.vin.is_empty() {
            return Err(LedgerError::Consensus(format!("Transaction {} has no inputs", tx.id)));
        }

        if tx.vout.is_empty() {
            return Err(LedgerError::Consensus(format!("Transaction {} has no outputs", tx.id)));
        }

        if tx.compute_id()? != tx.id {
            return Err(LedgerError::Consensus(format!("Transaction {} has a mismatched id", tx.id)));
        }

        if !tx.is_coinbase() && tx.vout.iter().any(|output| output.value == 0) {
            return Err(LedgerError::Consensus(format!("Transaction {} creates a zero-value output", tx.id)));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::{TxInput, TxOutput};
    use crate::core::Blockchain;
    use crate::crypto::hash::Hash256;
    use crate::mining::{CancelToken, ProofOfWork};
    use crate::storage::Database;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn new_chain(dir: &TempDir) -> Result<(Blockchain, Transaction)> {
        let db = Arc::new(Database::new(dir.path().join("test.db"))?);
        let coinbase = Transaction::new_coinbase("alice", 10, None)?;
        let chain = Blockchain::create(db, ProofOfWork::new(8)?, coinbase.clone(), &CancelToken::new())?;
        Ok((chain, coinbase))
    }

    fn spend(from: &Transaction, owner: &str, outputs: Vec<(u64, &str)>) -> Transaction {
        Transaction::new(
            vec![TxInput { txid: from.id, vout: 0, unlock_data: owner.to_string() }],
            outputs
                .into_iter()
                .map(|(value, to)| TxOutput { value, lock_data: to.to_string() })
                .collect(),
        )
        .unwrap()
    }

    fn assert_consensus(result: Result<()>) {
        assert!(matches!(result, Err(LedgerError::Consensus(_))), "got {:?}", result);
    }

    #[test]
    fn test_block_structure() {
        let validator = BlockValidator::new();
        let coinbase = Transaction::new_coinbase("alice", 10, None).unwrap();
        let other = Transaction::new_coinbase("bob", 10, None).unwrap();

        assert_consensus(validator.validate_block_structure(&[]));
        assert!(validator.validate_block_structure(&[coinbase.clone()]).is_ok());
        assert_consensus(validator.validate_block_structure(&[coinbase.clone(), other]));
        assert_consensus(validator.validate_block_structure(&[coinbase.clone(), coinbase]));
    }

    #[test]
    fn test_block_size_limit() {
        let validator = BlockValidator::with_params(1, DEFAULT_SUBSIDY);
        let first = spend(&Transaction::new_coinbase("a", 1, None).unwrap(), "a", vec![(1, "b")]);
        let second = spend(&Transaction::new_coinbase("a", 1, None).unwrap(), "a", vec![(1, "b")]);

        assert_consensus(validator.validate_block_structure(&[first, second]));
    }

    #[test]
    fn test_valid_spend_is_admitted() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let (chain, coinbase) = new_chain(&temp_dir)?;
        let tx = spend(&coinbase, "alice", vec![(4, "bob"), (6, "alice")]);

        BlockValidator::new().validate_transactions(&[tx], &UtxoResolver::new(&chain))
    }

    #[test]
    fn test_rejections() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let (chain, coinbase) = new_chain(&temp_dir)?;
        let resolver = UtxoResolver::new(&chain);
        let validator = BlockValidator::new();

        // wrong owner
        let stolen = spend(&coinbase, "mallory", vec![(10, "mallory")]);
        assert_consensus(validator.validate_transactions(&[stolen], &resolver));

        // value not conserved
        let inflated = spend(&coinbase, "alice", vec![(11, "bob")]);
        assert_consensus(validator.validate_transactions(&[inflated], &resolver));
        let burned = spend(&coinbase, "alice", vec![(9, "bob")]);
        assert_consensus(validator.validate_transactions(&[burned], &resolver));

        // unknown output
        let phantom = Transaction::new(
            vec![TxInput { txid: Hash256::hash(b"phantom"), vout: 0, unlock_data: "alice".to_string() }],
            vec![TxOutput { value: 1, lock_data: "bob".to_string() }],
        )?;
        assert_consensus(validator.validate_transactions(&[phantom], &resolver));

        // tampered id
        let mut tampered = spend(&coinbase, "alice", vec![(10, "bob")]);
        tampered.vout[0].lock_data = "mallory".to_string();
        assert_consensus(validator.validate_transactions(&[tampered], &resolver));

        // double spend inside one block
        let first = spend(&coinbase, "alice", vec![(10, "bob")]);
        let second = spend(&coinbase, "alice", vec![(10, "carol")]);
        assert_consensus(validator.validate_transactions(&[first, second], &resolver));
        Ok(())
    }

    #[test]
    fn test_spent_output_is_rejected() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let (chain, coinbase) = new_chain(&temp_dir)?;

        let tx = spend(&coinbase, "alice", vec![(10, "bob")]);
        chain.mine_block(vec![tx], &CancelToken::new())?;

        let again = spend(&coinbase, "alice", vec![(10, "carol")]);
        let tip = chain.tip()?;
        assert_consensus(chain.mine_block(vec![again], &CancelToken::new()).map(|_| ()));
        assert_eq!(chain.tip()?, tip);
        Ok(())
    }

    #[test]
    fn test_replayed_coinbase_is_rejected() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(Database::new(temp_dir.path().join("test.db"))?);
        let reward = Transaction::new_coinbase("alice", 10, Some("reward"))?;
        let chain = Blockchain::create(db, ProofOfWork::new(8)?, reward, &CancelToken::new())?;
        let before = chain.database().entries()?;

        let replay = Transaction::new_coinbase("alice", 10, Some("reward"))?;
        assert_consensus(chain.mine_block(vec![replay], &CancelToken::new()).map(|_| ()));

        assert_eq!(chain.database().entries()?, before);
        assert_eq!(UtxoResolver::new(&chain).get_balance("alice")?, 10);
        Ok(())
    }

    #[test]
    fn test_confirmed_spend_cannot_be_mined_again() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let (chain, coinbase) = new_chain(&temp_dir)?;
        let tx = spend(&coinbase, "alice", vec![(10, "bob")]);
        chain.mine_block(vec![tx.clone()], &CancelToken::new())?;

        let resolver = UtxoResolver::new(&chain);
        assert_consensus(BlockValidator::new().validate_transactions(&[tx], &resolver));
        Ok(())
    }

    #[test]
    fn test_coinbase_must_pay_the_subsidy() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let (chain, _) = new_chain(&temp_dir)?;
        let resolver = UtxoResolver::new(&chain);
        let validator = BlockValidator::new();

        let inflated = Transaction::new_coinbase("mallory", 1_000_000, None)?;
        assert_consensus(validator.validate_transactions(&[inflated], &resolver));

        let reward = Transaction::new_coinbase("alice", DEFAULT_SUBSIDY, None)?;
        assert!(validator.validate_transactions(&[reward], &resolver).is_ok());

        let tip = chain.tip()?;
        let inflated = Transaction::new_coinbase("mallory", 1_000_000, None)?;
        assert_consensus(chain.mine_block(vec![inflated], &CancelToken::new()).map(|_| ()));
        assert_eq!(chain.tip()?, tip);
        Ok(())
    }

    #[test]
    fn test_coinbase_with_extra_outputs_is_rejected() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let (chain, _) = new_chain(&temp_dir)?;
        let resolver = UtxoResolver::new(&chain);

        let mut split = Transaction::new_coinbase("alice", 10, None)?;
        split.vout.push(TxOutput { value: 10, lock_data: "mallory".to_string() });
        split.id = split.compute_id()?;

        let validator = BlockValidator::new();
        assert_consensus(validator.validate_coinbase(&split));
        assert_consensus(validator.validate_transactions(&[split], &resolver));
        Ok(())
    }

    #[test]
    fn test_custom_subsidy() -> Result<()> {
        let validator = BlockValidator::with_params(DEFAULT_MAX_BLOCK_TRANSACTIONS, 50);
        assert_eq!(validator.subsidy(), 50);
        assert!(validator.validate_coinbase(&Transaction::new_coinbase("alice", 50, None)?).is_ok());
        assert_consensus(validator.validate_coinbase(&Transaction::new_coinbase("alice", 10, None)?));
        Ok(())
    }
}
