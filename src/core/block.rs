use crate::core::codec::{Reader, Writer};
use crate::core::Transaction;
use crate::crypto::hash::Hash256;
use crate::mining::{CancelToken, ProofOfWork};
use crate::{LedgerError, Result};
use chrono::Utc;

/// Version tag written at the start of every serialized block.
pub const BLOCK_FORMAT_VERSION: u8 = 1;

const PAYLOAD_DATA: u8 = 0;
const PAYLOAD_TRANSACTIONS: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Data(Vec<u8>),
    Transactions(Vec<Transaction>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub timestamp: i64,
    pub payload: Payload,
    /// `None` only for the genesis block.
    pub prev_hash: Option<Hash256>,
    pub hash: Hash256,
    pub nonce: u64,
}

impl Payload {
    /// SHA-256 of the transaction ids concatenated in order, or of the raw
    /// bytes for a data payload.
    pub fn content_hash(&self) -> Hash256 {
        match self {
            Payload::Data(data) => Hash256::hash(data),
            Payload::Transactions(transactions) => {
                let mut ids = Vec::with_capacity(transactions.len() * Hash256::LEN);
                for tx in transactions {
                    ids.extend_from_slice(tx.id.as_bytes());
                }
                Hash256::hash(&ids)
            }
        }
    }
}

impl Block {
    /// Builds an unmined block stamped with the current time.
    pub fn shell(payload: Payload, prev_hash: Option<Hash256>) -> Self {
        Self {
            timestamp: Utc::now().timestamp(),
            payload,
            prev_hash,
            hash: Hash256::zero(),
            nonce: 0,
        }
    }

    pub fn new(
        payload: Payload,
        prev_hash: Option<Hash256>,
        pow: &ProofOfWork,
        cancel: &CancelToken,
    ) -> Result<Self> {
        let mut block = Self::shell(payload, prev_hash);
        let (nonce, hash) = pow.run(&block, cancel)?;
        block.nonce = nonce;
        block.hash = hash;
        Ok(block)
    }

    pub fn genesis(coinbase: Transaction, pow: &ProofOfWork, cancel: &CancelToken) -> Result<Self> {
        Self::new(Payload::Transactions(vec![coinbase]), None, pow, cancel)
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_none()
    }

    pub fn transactions(&self) -> &[Transaction] {
        match &self.payload {
            Payload::Transactions(transactions) => transactions,
            Payload::Data(_) => &[],
        }
    }

    /// The payload bytes committed to by the proof-of-work header.
    pub fn header_payload(&self) -> Vec<u8> {
        match &self.payload {
            Payload::Data(data) => data.clone(),
            Payload::Transactions(_) => self.payload.content_hash().as_bytes().to_vec(),
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new();
        writer.put_u8(BLOCK_FORMAT_VERSION);
        writer.put_i64(self.timestamp);

        match &self.payload {
            Payload::Data(data) => {
                writer.put_u8(PAYLOAD_DATA);
                writer.put_bytes(data)?;
            }
            Payload::Transactions(transactions) => {
                writer.put_u8(PAYLOAD_TRANSACTIONS);
                writer.put_len(transactions.len())?;
                for tx in transactions {
                    tx.encode(&mut writer)?;
                }
            }
        }

        match &self.prev_hash {
            Some(prev_hash) => {
                writer.put_u8(1);
                writer.put_hash(prev_hash);
            }
            None => writer.put_u8(0),
        }

        writer.put_hash(&self.hash);
        writer.put_u64(self.nonce);
        Ok(writer.finish())
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(data);

        let version = reader.u8("format version")?;
        if version != BLOCK_FORMAT_VERSION {
            return Err(LedgerError::Serialization(format!(
                "Unsupported block format version {}",
                version
            )));
        }

        let timestamp = reader.i64("timestamp")?;

        let payload = match reader.u8("payload tag")? {
            PAYLOAD_DATA => Payload::Data(reader.bytes("payload data")?),
            PAYLOAD_TRANSACTIONS => {
                // id + input count + output count
                let count = reader.len("transaction", 32 + 4 + 4)?;
                let mut transactions = Vec::with_capacity(count);
                for _ in 0..count {
                    transactions.push(Transaction::decode(&mut reader)?);
                }
                Payload::Transactions(transactions)
            }
            tag => {
                return Err(LedgerError::Serialization(format!("Unknown payload tag {}", tag)));
            }
        };

        let prev_hash = match reader.u8("prev hash flag")? {
            0 => None,
            1 => Some(reader.hash("prev hash")?),
            flag => {
                return Err(LedgerError::Serialization(format!("Invalid prev hash flag {}", flag)));
            }
        };

        let hash = reader.hash("block hash")?;
        let nonce = reader.u64("nonce")?;
        reader.finish()?;

        Ok(Self {
            timestamp,
            payload,
            prev_hash,
            hash,
            nonce,
        })
    }
}
