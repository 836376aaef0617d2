use crate::core::Block;
use crate::crypto::hash::Hash256;
use crate::{LedgerError, Result};
use sled::transaction::ConflictableTransactionError;
use sled::{Db, Tree};
use std::path::{Path, PathBuf};

// Blocks keyed by hash, plus the reserved tip key.
const TREE_BLOCKS: &str = "blocks";

/// Reserved key in the blocks tree holding the tip hash.
pub const TIP_KEY: &[u8] = b"l";

#[derive(Debug, Clone)]
pub struct Database {
    db: Db,
    blocks: Tree,
    path: PathBuf,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = sled::open(&path)
            .map_err(|e| LedgerError::Storage(format!("Failed to open database at {}: {}", path.display(), e)))?;

        let blocks = db.open_tree(TREE_BLOCKS)
            .map_err(|e| LedgerError::Storage(format!("Failed to open tree {}: {}", TREE_BLOCKS, e)))?;

        Ok(Self { db, blocks, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>> {
        match self.blocks.get(hash.as_bytes())
            .map_err(|e| LedgerError::Storage(format!("Failed to get block: {}", e)))? {
            Some(data) => {
                let block = Block::deserialize(&data).map_err(|e| match e {
                    LedgerError::Serialization(msg) => {
                        LedgerError::Serialization(format!("Block {}: {}", hash, msg))
                    }
                    other => other,
                })?;
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    pub fn get_tip(&self) -> Result<Option<Hash256>> {
        match self.blocks.get(TIP_KEY)
            .map_err(|e| LedgerError::Storage(format!("Failed to get tip: {}", e)))? {
            Some(bytes) => Hash256::from_slice(&bytes)
                .map(Some)
                .ok_or_else(|| LedgerError::Storage(format!("Invalid tip hash length {}", bytes.len()))),
            None => Ok(None),
        }
    }

    pub fn has_chain(&self) -> Result<bool> {
        Ok(self.get_tip()?.is_some())
    }

    /// Stores the genesis block and points the tip at it in one transaction.
    pub fn insert_genesis(&self, block: &Block) -> Result<()> {
        let key = block.hash.as_bytes().to_vec();
        let value = block.serialize()?;

        self.blocks.transaction(|tree| {
            if tree.get(TIP_KEY)?.is_some() {
                return Err(ConflictableTransactionError::Abort(LedgerError::AlreadyExists(
                    "A chain is already persisted in this database".to_string(),
                )));
            }

            tree.insert(key.as_slice(), value.as_slice())?;
            tree.insert(TIP_KEY, key.as_slice())?;
            Ok(())
        })?;

        self.flush()?;
        log::debug!("💾 Saved genesis block {}", block.hash);
        Ok(())
    }

    /// Appends `block` on top of `expected_tip`. The tip check, block insert
    /// and tip update commit together or not at all.
    pub fn append_block(&self, expected_tip: &Hash256, block: &Block) -> Result<()> {
        if block.prev_hash.as_ref() != Some(expected_tip) {
            return Err(LedgerError::Consensus(format!(
                "Block {} does not link to tip {}",
                block.hash, expected_tip
            )));
        }

        let key = block.hash.as_bytes().to_vec();
        let value = block.serialize()?;

        self.blocks.transaction(|tree| {
            let tip = tree.get(TIP_KEY)?;
            if tip.as_deref() != Some(expected_tip.as_bytes().as_slice()) {
                return Err(ConflictableTransactionError::Abort(LedgerError::Consensus(format!(
                    "Tip moved while mining on top of {}",
                    expected_tip
                ))));
            }
            if tree.get(key.as_slice())?.is_some() {
                return Err(ConflictableTransactionError::Abort(LedgerError::AlreadyExists(format!(
                    "Block {} already stored",
                    block.hash
                ))));
            }

            tree.insert(key.as_slice(), value.as_slice())?;
            tree.insert(TIP_KEY, key.as_slice())?;
            Ok(())
        })?;

        self.flush()?;
        log::debug!("💾 Saved block {}", block.hash);
        Ok(())
    }

    /// Every key/value pair in the blocks tree, in key order.
    pub fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut entries = Vec::new();
        for item in self.blocks.iter() {
            let (key, value) = item
                .map_err(|e| LedgerError::Storage(format!("Error iterating blocks: {}", e)))?;
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()
            .map_err(|e| LedgerError::Storage(format!("Failed to flush database: {}", e)))?;
        Ok(())
    }

    pub fn get_database_stats(&self) -> Result<DatabaseStats> {
        let mut stats = DatabaseStats::default();

        for (key, value) in self.entries()? {
            if key.as_slice() == TIP_KEY {
                continue;
            }
            stats.block_count += 1;
            stats.blocks_size += value.len();
        }

        stats.total_size = self.db.size_on_disk()
            .map_err(|e| LedgerError::Storage(format!("Failed to read database size: {}", e)))?;

        Ok(stats)
    }
}

#[derive(Debug, Default)]
pub struct DatabaseStats {
    pub block_count: usize,
    pub blocks_size: usize,
    pub total_size: u64,
}
