use crate::core::codec::{Reader, Writer};
use crate::core::utxo::UtxoResolver;
use crate::crypto::hash::Hash256;
use crate::{LedgerError, Result};
use rand::RngCore;

/// Output index carried by the synthetic input of a coinbase transaction.
pub const COINBASE_VOUT: u32 = u32::MAX;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: Hash256,
    pub vin: Vec<TxInput>,
    pub vout: Vec<TxOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    pub txid: Hash256,
    pub vout: u32,
    pub unlock_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub value: u64,
    pub lock_data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl Transaction {
    /// Builds a transaction from its inputs and outputs and derives its id.
    pub fn new(vin: Vec<TxInput>, vout: Vec<TxOutput>) -> Result<Self> {
        let mut tx = Self {
            id: Hash256::zero(),
            vin,
            vout,
        };
        tx.id = tx.compute_id()?;
        Ok(tx)
    }

    /// Creates a block-reward transaction paying `value` to `address`.
    ///
    /// Without explicit `data` the input carries 20 random bytes, so two
    /// rewards to the same owner never share an id.
    pub fn new_coinbase(address: &str, value: u64, data: Option<&str>) -> Result<Self> {
        let data = match data {
            Some(data) => data.to_string(),
            None => {
                let mut bytes = [0u8; 20];
                rand::thread_rng().fill_bytes(&mut bytes);
                hex::encode(bytes)
            }
        };

        let coinbase_input = TxInput {
            txid: Hash256::zero(),
            vout: COINBASE_VOUT,
            unlock_data: data,
        };

        let output = TxOutput {
            value,
            lock_data: address.to_string(),
        };

        Self::new(vec![coinbase_input], vec![output])
    }

    /// Creates a transfer of `amount` from `from` to `to`, spending outputs
    /// selected by the resolver and returning any change to `from`.
    pub fn new_utxo_transaction(
        from: &str,
        to: &str,
        amount: u64,
        resolver: &UtxoResolver<'_>,
    ) -> Result<Self> {
        if amount == 0 {
            return Err(LedgerError::InvalidInput("Amount must be greater than zero".to_string()));
        }
        if from.is_empty() || to.is_empty() {
            return Err(LedgerError::InvalidInput("Sender and recipient must not be empty".to_string()));
        }

        let (accumulated, selection) = resolver.find_spendable_outputs(from, amount)?;

        let mut inputs = Vec::new();
        for (txid, indices) in &selection {
            for vout in indices {
                inputs.push(TxInput {
                    txid: *txid,
                    vout: *vout,
                    unlock_data: from.to_string(),
                });
            }
        }

        let mut outputs = vec![TxOutput {
            value: amount,
            lock_data: to.to_string(),
        }];

        if accumulated > amount {
            outputs.push(TxOutput {
                value: accumulated - amount,
                lock_data: from.to_string(),
            });
        }

        let tx = Self::new(inputs, outputs)?;
        log::debug!(
            "Built transaction {} spending {} from {} ({} inputs)",
            tx.id, accumulated, from, tx.vin.len()
        );
        Ok(tx)
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1
            && self.vin[0].txid.is_zero()
            && self.vin[0].vout == COINBASE_VOUT
    }

    /// Sum of all output values, or `Consensus` if it overflows.
    pub fn total_output_value(&self) -> Result<u64> {
        self.vout
            .iter()
            .try_fold(0u64, |sum, output| sum.checked_add(output.value))
            .ok_or_else(|| LedgerError::Consensus(format!("Output value overflow in transaction {}", self.id)))
    }

    /// Content hash over inputs and outputs; the stored id is not part of it.
    pub fn compute_id(&self) -> Result<Hash256> {
        let mut writer = Writer::new();
        self.encode_body(&mut writer)?;
        Ok(Hash256::hash(&writer.finish()))
    }

    fn encode_body(&self, writer: &mut Writer) -> Result<()> {
        writer.put_len(self.vin.len())?;
        for input in &self.vin {
            writer.put_hash(&input.txid);
            writer.put_u32(input.vout);
            writer.put_bytes(input.unlock_data.as_bytes())?;
        }

        writer.put_len(self.vout.len())?;
        for output in &self.vout {
            writer.put_u64(output.value);
            writer.put_bytes(output.lock_data.as_bytes())?;
        }
        Ok(())
    }

    pub(crate) fn encode(&self, writer: &mut Writer) -> Result<()> {
        writer.put_hash(&self.id);
        self.encode_body(writer)
    }

    pub(crate) fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let id = reader.hash("transaction id")?;

        // txid + vout + unlock length
        let input_count = reader.len("input", 32 + 4 + 4)?;
        let mut vin = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            vin.push(TxInput {
                txid: reader.hash("input txid")?,
                vout: reader.u32("input vout")?,
                unlock_data: reader.string("input unlock data")?,
            });
        }

        // value + lock length
        let output_count = reader.len("output", 8 + 4)?;
        let mut vout = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            vout.push(TxOutput {
                value: reader.u64("output value")?,
                lock_data: reader.string("output lock data")?,
            });
        }

        Ok(Self { id, vin, vout })
    }
}

impl TxInput {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.vout)
    }

    pub fn can_unlock_output_with(&self, owner: &str) -> bool {
        self.unlock_data == owner
    }
}

impl TxOutput {
    pub fn can_be_unlocked_with(&self, owner: &str) -> bool {
        self.lock_data == owner
    }
}

impl OutPoint {
    pub fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }
}
