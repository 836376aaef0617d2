use crate::core::transaction::{OutPoint, TxInput, TxOutput};
use crate::core::{Blockchain, Transaction};
use crate::crypto::hash::Hash256;
use crate::{LedgerError, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::ControlFlow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoEntry {
    pub txid: Hash256,
    pub vout: u32,
    pub output: TxOutput,
}

/// Derives unspent outputs by scanning the chain from tip to genesis.
///
/// Nothing is cached: every query re-reads the blocks reachable from the
/// tip at the time it starts.
#[derive(Debug, Clone, Copy)]
pub struct UtxoResolver<'a> {
    chain: &'a Blockchain,
}

impl<'a> UtxoResolver<'a> {
    pub fn new(chain: &'a Blockchain) -> Self {
        Self { chain }
    }

    /// Calls `visit` for every unspent output, newest block first, filtered
    /// to `owner` when given. Stops early when `visit` breaks.
    ///
    /// Within a block transactions are visited last to first, so a spend is
    /// recorded before the outputs it consumes are reached.
    fn scan<F>(&self, owner: Option<&str>, mut visit: F) -> Result<()>
    where
        F: FnMut(&Transaction, u32, &TxOutput) -> Result<ControlFlow<()>>,
    {
        let mut spent: HashSet<OutPoint> = HashSet::new();

        for block in self.chain.iter()? {
            let block = block?;

            if !self.chain.pow().validate(&block) {
                return Err(LedgerError::Consensus(format!(
                    "Block {} fails proof-of-work validation",
                    block.hash
                )));
            }

            for tx in block.transactions().iter().rev() {
                for (index, output) in tx.vout.iter().enumerate() {
                    let vout = index as u32;
                    if spent.contains(&OutPoint::new(tx.id, vout)) {
                        continue;
                    }

                    let owned = owner.map_or(true, |owner| output.can_be_unlocked_with(owner));
                    if owned && visit(tx, vout, output)?.is_break() {
                        return Ok(());
                    }
                }

                if !tx.is_coinbase() {
                    spent.extend(tx.vin.iter().map(TxInput::outpoint));
                }
            }
        }

        Ok(())
    }

    /// Transactions holding at least one unspent output locked to `owner`,
    /// newest first and each listed once.
    pub fn find_unspent_transactions(&self, owner: &str) -> Result<Vec<Transaction>> {
        let mut transactions: Vec<Transaction> = Vec::new();

        self.scan(Some(owner), |tx, _, _| {
            if transactions.last().map(|last| last.id) != Some(tx.id) {
                transactions.push(tx.clone());
            }
            Ok(ControlFlow::Continue(()))
        })?;

        Ok(transactions)
    }

    pub fn find_utxo(&self, owner: &str) -> Result<Vec<TxOutput>> {
        let mut outputs = Vec::new();

        self.scan(Some(owner), |_, _, output| {
            outputs.push(output.clone());
            Ok(ControlFlow::Continue(()))
        })?;

        Ok(outputs)
    }

    pub fn get_balance(&self, owner: &str) -> Result<u64> {
        let mut balance = 0u64;

        self.scan(Some(owner), |_, _, output| {
            balance = checked_total(balance, output.value, owner)?;
            Ok(ControlFlow::Continue(()))
        })?;

        Ok(balance)
    }

    /// Greedily collects `owner`'s unspent outputs in scan order until they
    /// cover `amount`. Returns the accumulated value and the chosen output
    /// indices per transaction.
    pub fn find_spendable_outputs(
        &self,
        owner: &str,
        amount: u64,
    ) -> Result<(u64, BTreeMap<Hash256, Vec<u32>>)> {
        let mut accumulated = 0u64;
        let mut selection: BTreeMap<Hash256, Vec<u32>> = BTreeMap::new();

        if amount > 0 {
            self.scan(Some(owner), |tx, vout, output| {
                accumulated = checked_total(accumulated, output.value, owner)?;
                selection.entry(tx.id).or_default().push(vout);

                Ok(if accumulated >= amount {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                })
            })?;
        }

        if accumulated < amount {
            log::warn!(
                "{} holds {} but {} was requested",
                owner, accumulated, amount
            );
            return Err(LedgerError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        log::debug!(
            "Selected {} outputs worth {} from {} for {}",
            selection.values().map(Vec::len).sum::<usize>(),
            accumulated,
            owner,
            amount
        );
        Ok((accumulated, selection))
    }

    /// Every unspent output on the chain keyed by its outpoint.
    pub fn find_all_utxo(&self) -> Result<HashMap<OutPoint, UtxoEntry>> {
        let mut utxos = HashMap::new();

        self.scan(None, |tx, vout, output| {
            utxos.insert(
                OutPoint::new(tx.id, vout),
                UtxoEntry {
                    txid: tx.id,
                    vout,
                    output: output.clone(),
                },
            );
            Ok(ControlFlow::Continue(()))
        })?;

        Ok(utxos)
    }

    /// Ids of every transaction confirmed on the chain.
    pub fn transaction_ids(&self) -> Result<HashSet<Hash256>> {
        let mut ids = HashSet::new();
        for block in self.chain.iter()? {
            ids.extend(block?.transactions().iter().map(|tx| tx.id));
        }
        Ok(ids)
    }

    pub fn find_transaction(&self, id: &Hash256) -> Result<Option<Transaction>> {
        for block in self.chain.iter()? {
            let block = block?;
            if let Some(tx) = block.transactions().iter().find(|tx| tx.id == *id) {
                return Ok(Some(tx.clone()));
            }
        }
        Ok(None)
    }
}

fn checked_total(total: u64, value: u64, owner: &str) -> Result<u64> {
    total
        .checked_add(value)
        .ok_or_else(|| LedgerError::Consensus(format!("Unspent value held by {} overflows u64", owner)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mining::{CancelToken, ProofOfWork};
    use crate::storage::Database;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn new_chain(dir: &TempDir, owner: &str) -> Result<Blockchain> {
        let db = Arc::new(Database::new(dir.path().join("test.db"))?);
        Blockchain::create(
            db,
            ProofOfWork::new(8)?,
            Transaction::new_coinbase(owner, 10, None)?,
            &CancelToken::new(),
        )
    }

    fn send(chain: &Blockchain, from: &str, to: &str, amount: u64) -> Result<Transaction> {
        let tx = Transaction::new_utxo_transaction(from, to, amount, &UtxoResolver::new(chain))?;
        chain.mine_block(vec![tx.clone()], &CancelToken::new())?;
        Ok(tx)
    }

    #[test]
    fn test_coinbase_only_balances() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let chain = new_chain(&temp_dir, "alice")?;
        let resolver = UtxoResolver::new(&chain);

        assert_eq!(resolver.get_balance("alice")?, 10);
        assert_eq!(resolver.get_balance("bob")?, 0);
        assert!(resolver.find_utxo("bob")?.is_empty());

        let unspent = resolver.find_unspent_transactions("alice")?;
        assert_eq!(unspent.len(), 1);
        assert!(unspent[0].is_coinbase());
        Ok(())
    }

    #[test]
    fn test_spend_excludes_consumed_outputs() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let chain = new_chain(&temp_dir, "alice")?;
        let genesis_tx = chain.get_block(&chain.tip()?)?.unwrap().transactions()[0].clone();

        let spend = send(&chain, "alice", "bob", 3)?;
        let resolver = UtxoResolver::new(&chain);

        assert_eq!(resolver.get_balance("alice")?, 7);
        assert_eq!(resolver.get_balance("bob")?, 3);
        assert_eq!(resolver.find_utxo("alice")?, vec![TxOutput { value: 7, lock_data: "alice".to_string() }]);

        let unspent = resolver.find_unspent_transactions("alice")?;
        assert_eq!(unspent.len(), 1);
        assert_eq!(unspent[0].id, spend.id);

        let all = resolver.find_all_utxo()?;
        assert_eq!(all.len(), 2);
        assert!(!all.contains_key(&OutPoint::new(genesis_tx.id, 0)));
        Ok(())
    }

    #[test]
    fn test_transaction_listed_once_per_owner() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let chain = new_chain(&temp_dir, "alice")?;

        let split = send(&chain, "alice", "alice", 4)?;
        let resolver = UtxoResolver::new(&chain);

        let unspent = resolver.find_unspent_transactions("alice")?;
        assert_eq!(unspent.len(), 1);
        assert_eq!(unspent[0].id, split.id);
        assert_eq!(resolver.find_utxo("alice")?.len(), 2);
        assert_eq!(resolver.get_balance("alice")?, 10);
        Ok(())
    }

    #[test]
    fn test_multi_hop_balances() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let chain = new_chain(&temp_dir, "alice")?;

        send(&chain, "alice", "bob", 6)?;
        send(&chain, "bob", "carol", 2)?;
        send(&chain, "alice", "carol", 4)?;

        let resolver = UtxoResolver::new(&chain);
        assert_eq!(resolver.get_balance("alice")?, 0);
        assert_eq!(resolver.get_balance("bob")?, 4);
        assert_eq!(resolver.get_balance("carol")?, 6);

        let total: u64 = resolver.find_all_utxo()?.values().map(|entry| entry.output.value).sum();
        assert_eq!(total, 10);
        Ok(())
    }

    #[test]
    fn test_insufficient_funds_leaves_store_unchanged() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let chain = new_chain(&temp_dir, "alice")?;
        send(&chain, "alice", "bob", 3)?;
        let before = chain.database().entries()?;

        let resolver = UtxoResolver::new(&chain);
        let err = Transaction::new_utxo_transaction("bob", "carol", 4, &resolver).unwrap_err();

        match err {
            LedgerError::InsufficientFunds { required, available } => {
                assert_eq!(required, 4);
                assert_eq!(available, 3);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(chain.database().entries()?, before);
        Ok(())
    }

    #[test]
    fn test_spendable_search_stops_once_covered() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let chain = new_chain(&temp_dir, "alice")?;
        let reward = Transaction::new_coinbase("alice", 10, None)?;
        chain.mine_block(vec![reward.clone()], &CancelToken::new())?;

        let resolver = UtxoResolver::new(&chain);
        let (accumulated, selection) = resolver.find_spendable_outputs("alice", 5)?;

        assert_eq!(accumulated, 10);
        assert_eq!(selection.len(), 1);
        assert_eq!(selection.get(&reward.id), Some(&vec![0]));

        let (accumulated, selection) = resolver.find_spendable_outputs("alice", 15)?;
        assert_eq!(accumulated, 20);
        assert_eq!(selection.len(), 2);
        Ok(())
    }

    #[test]
    fn test_value_totals_overflow_is_an_error() {
        assert_eq!(checked_total(7, 3, "alice").unwrap(), 10);
        assert!(matches!(
            checked_total(u64::MAX, 1, "alice"),
            Err(LedgerError::Consensus(_))
        ));
    }

    #[test]
    fn test_find_transaction() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let chain = new_chain(&temp_dir, "alice")?;
        let spend = send(&chain, "alice", "bob", 1)?;

        let resolver = UtxoResolver::new(&chain);
        assert_eq!(resolver.find_transaction(&spend.id)?, Some(spend));
        assert_eq!(resolver.find_transaction(&Hash256::hash(b"nothing"))?, None);
        Ok(())
    }

    #[test]
    fn test_transaction_ids_cover_every_block() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let chain = new_chain(&temp_dir, "alice")?;
        let genesis_tx = chain.get_block(&chain.tip()?)?.unwrap().transactions()[0].clone();
        let spend = send(&chain, "alice", "bob", 1)?;
        chain.mine_data_block(b"no transactions".to_vec(), &CancelToken::new())?;

        let ids = UtxoResolver::new(&chain).transaction_ids()?;
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&genesis_tx.id));
        assert!(ids.contains(&spend.id));
        Ok(())
    }
}
