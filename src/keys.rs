//! The content-addressed key space.
//!
//! Two kinds of key address a block on the network:
//!
//! - [`ChkKey`]: a content-hash key. The routing key is the SHA-256 digest of
//!   the payload, so the block proves itself by re-hashing.
//! - [`SskKey`]: a signed-subspace key. The routing key binds a
//!   publisher-chosen document name to the publisher's DSA key, and the block
//!   proves itself with a signature over a layered hash.
//!
//! [`Key`] and [`Block`] dispatch over the two kinds; everything downstream of
//! the datastore (the checker, the stores) is agnostic to which kind it holds.

pub mod chk;
pub mod ssk;

pub use self::chk::{ChkBlock, ChkKey};
pub use self::ssk::{SskBlock, SskKey};

/// Identifier of the SHA-256 hash in block header prefixes.
pub const HASH_SHA256: u16 = 1;

/// Symmetric cipher identifier carried opaquely in SSK headers.
pub const CIPHER_AES_PCFB_256: u16 = 2;

/// A routing-level key, either kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::From)]
pub enum Key {
    /// Content-hash key.
    Chk(ChkKey),
    /// Signed-subspace key.
    Ssk(SskKey),
}

impl Key {
    /// The 32-byte routing key peers use to locate the block.
    pub fn routing_key(&self) -> &[u8; 32] {
        match self {
            Key::Chk(k) => k.routing_key(),
            Key::Ssk(k) => k.routing_key(),
        }
    }

    /// The full serialized key: type tag plus key material.
    pub fn full_key(&self) -> Vec<u8> {
        match self {
            Key::Chk(k) => k.full_key(),
            Key::Ssk(k) => k.full_key(),
        }
    }
}

/// A fetched block, either kind, verified on construction.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::From)]
pub enum Block {
    /// Content-hash block.
    Chk(ChkBlock),
    /// Signed-subspace block.
    Ssk(SskBlock),
}

impl Block {
    /// The key this block answers.
    pub fn key(&self) -> Key {
        match self {
            Block::Chk(b) => Key::Chk(b.key().clone()),
            Block::Ssk(b) => Key::Ssk(b.node_key().clone()),
        }
    }

    /// The raw payload.
    pub fn raw_data(&self) -> &[u8] {
        match self {
            Block::Chk(b) => b.raw_data(),
            Block::Ssk(b) => b.raw_data(),
        }
    }
}
