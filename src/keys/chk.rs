//! Content-hash keys: the block is addressed by the SHA-256 of its payload.

use std::fmt;

use bytes::Bytes;

use crate::crypt::sha256;

/// Exact payload length of a CHK block.
pub const DATA_LENGTH: usize = 32 * 1024;

/// Routing-level type tag of a CHK.
const TYPE: [u8; 2] = [0x01, 0x02];

/// Error admitting a CHK block.
#[derive(Debug, thiserror::Error)]
pub enum ChkVerifyError {
    /// The payload is not exactly [`DATA_LENGTH`] bytes.
    #[error("data length wrong: {0}, should be {DATA_LENGTH}")]
    DataLength(usize),
    /// The payload does not hash to the routing key.
    #[error("content hash does not match routing key")]
    HashMismatch,
}

/// A content-hash key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ChkKey {
    routing_key: [u8; 32],
}

impl ChkKey {
    /// Wrap a raw routing key.
    pub const fn new(routing_key: [u8; 32]) -> Self {
        Self { routing_key }
    }

    /// The key a given payload would be stored under.
    pub fn from_data(data: &[u8]) -> Self {
        Self {
            routing_key: sha256(data),
        }
    }

    /// The 32-byte routing key.
    pub fn routing_key(&self) -> &[u8; 32] {
        &self.routing_key
    }

    /// The full serialized key: type tag plus routing key.
    pub fn full_key(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + 32);
        out.extend_from_slice(&TYPE);
        out.extend_from_slice(&self.routing_key);
        out
    }
}

impl fmt::Debug for ChkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChkKey({})", hex::encode(&self.routing_key[..6]))
    }
}

/// A content-hash block: payload plus the key it proves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChkBlock {
    data: Bytes,
    key: ChkKey,
}

impl ChkBlock {
    /// Admit a block fetched for `key`, re-hashing the payload unless
    /// `dont_verify` is set.
    pub fn new(data: Bytes, key: ChkKey, dont_verify: bool) -> Result<Self, ChkVerifyError> {
        if data.len() != DATA_LENGTH {
            return Err(ChkVerifyError::DataLength(data.len()));
        }
        if !dont_verify && sha256(&data) != key.routing_key {
            return Err(ChkVerifyError::HashMismatch);
        }
        Ok(Self { data, key })
    }

    /// Build a block from a payload, deriving its key.
    pub fn from_data(data: Bytes) -> Result<Self, ChkVerifyError> {
        if data.len() != DATA_LENGTH {
            return Err(ChkVerifyError::DataLength(data.len()));
        }
        let key = ChkKey::from_data(&data);
        Ok(Self { data, key })
    }

    /// The key this block answers.
    pub fn key(&self) -> &ChkKey {
        &self.key
    }

    /// The raw payload.
    pub fn raw_data(&self) -> &[u8] {
        &self.data
    }
}
