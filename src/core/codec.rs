//! Fixed-layout binary encoding for persisted records.
//!
//! Integers are big-endian, variable-length fields carry a `u32` length
//! prefix and hashes are written as 32 raw bytes.

use crate::crypto::hash::Hash256;
use crate::{LedgerError, Result};

#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_hash(&mut self, hash: &Hash256) {
        self.buf.extend_from_slice(hash.as_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.put_len(bytes.len())?;
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Writes a `u32` length prefix. Lengths that do not fit are rejected.
    pub fn put_len(&mut self, len: usize) -> Result<()> {
        let len = u32::try_from(len).map_err(|_| {
            LedgerError::Serialization(format!("Length {} exceeds the u32 length prefix", len))
        })?;
        self.put_u32(len);
        Ok(())
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[derive(Debug)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.data.len())
            .ok_or_else(|| LedgerError::Serialization(format!(
                "Unexpected end of input reading {} at offset {}",
                what, self.pos
            )))?;

        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    pub fn u32(&mut self, what: &str) -> Result<u32> {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(self.take(4, what)?);
        Ok(u32::from_be_bytes(bytes))
    }

    pub fn u64(&mut self, what: &str) -> Result<u64> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.take(8, what)?);
        Ok(u64::from_be_bytes(bytes))
    }

    pub fn i64(&mut self, what: &str) -> Result<i64> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.take(8, what)?);
        Ok(i64::from_be_bytes(bytes))
    }

    pub fn hash(&mut self, what: &str) -> Result<Hash256> {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(self.take(Hash256::LEN, what)?);
        Ok(Hash256::new(bytes))
    }

    pub fn bytes(&mut self, what: &str) -> Result<Vec<u8>> {
        let len = self.u32(what)? as usize;
        Ok(self.take(len, what)?.to_vec())
    }

    pub fn string(&mut self, what: &str) -> Result<String> {
        let bytes = self.bytes(what)?;
        String::from_utf8(bytes)
            .map_err(|e| LedgerError::Serialization(format!("Invalid UTF-8 in {}: {}", what, e)))
    }

    /// Reads a collection length, refusing counts that cannot fit in the
    /// remaining input given `min_item_size` bytes per item.
    pub fn len(&mut self, what: &str, min_item_size: usize) -> Result<usize> {
        let len = self.u32(what)? as usize;
        if len.saturating_mul(min_item_size.max(1)) > self.remaining() {
            return Err(LedgerError::Serialization(format!(
                "Declared {} count {} exceeds remaining input",
                what, len
            )));
        }
        Ok(len)
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn finish(self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(LedgerError::Serialization(format!(
                "{} trailing bytes after record",
                self.remaining()
            )));
        }
        Ok(())
    }
}
