//! Signed-subspace keys and their self-verifying blocks.
//!
//! An SSK block is parsed from a flat `(data, headers)` pair produced by a
//! possibly untrusted peer. Admission recomputes the layered hash — SHA-256
//! of the payload, folded into SHA-256 of the cleartext-plus-encrypted header
//! region — and checks the publisher's DSA signature over it, then checks
//! that the embedded `E(H(docname))` matches the key the block was fetched
//! for. Decryption of the payload is the client layer's job; this layer only
//! decides whether the block is trustworthy at all.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bytes::{Buf, Bytes};
use num_bigint::BigUint;
use sha2::{Digest, Sha256};

use crate::crypt::dsa::{self, DsaPublicKey, DsaSignature};
use crate::crypt::sha256;
use crate::keys::HASH_SHA256;

/// Exact payload length of an SSK block.
pub const DATA_LENGTH: usize = 1024;

/// Maximum compressed payload length; the trailing two bytes carry the real
/// length and metadata flag.
pub const MAX_COMPRESSED_DATA_LENGTH: usize = DATA_LENGTH - 2;

const SIG_R_LENGTH: usize = 32;
const SIG_S_LENGTH: usize = 32;
const E_H_DOCNAME_LENGTH: usize = 32;
const DATA_DECRYPT_KEY_LENGTH: usize = 32;
const RESERVED_LENGTH: usize = 6;

/// Length of the region encrypted under `E(H(docname))`: the data decryption
/// key, the data length + metadata flag, and the compression algorithm.
const ENCRYPTED_HEADERS_LENGTH: usize = DATA_DECRYPT_KEY_LENGTH + 2 + 2;

/// Exact header length of an SSK block.
pub const TOTAL_HEADERS_LENGTH: usize = 2
    + 2
    + E_H_DOCNAME_LENGTH
    + ENCRYPTED_HEADERS_LENGTH
    + SIG_R_LENGTH
    + SIG_S_LENGTH
    + RESERVED_LENGTH;

// How much of the headers two blocks must share to be considered equal. The
// signature region is excluded: DSA signatures are randomized, so the same
// (key, data) pair legitimately re-signs to different trailing bytes.
const HEADER_COMPARE_TO: usize = 71;

/// Routing-level type tag of an SSK.
const TYPE: [u8; 2] = [0x02, 0x02];

/// Why an SSK block was refused admission.
///
/// Everything except [`HeadersLength`](Self::HeadersLength) means the bytes
/// plausibly arrived over the network but are not trustworthy; callers should
/// treat the block as poison and may hold it against the source.
#[derive(Debug, thiserror::Error)]
pub enum SskVerifyError {
    /// Header buffers are fixed-size by construction, so this is a caller
    /// bug rather than untrusted input.
    #[error("headers length {0}, should be {TOTAL_HEADERS_LENGTH}")]
    HeadersLength(usize),
    /// The payload is not exactly [`DATA_LENGTH`] bytes.
    #[error("data length wrong: {0}, should be {DATA_LENGTH}")]
    DataLength(usize),
    /// The node key carries no public key, so there is nothing to verify
    /// against.
    #[error("no pubkey")]
    NoPubKey,
    /// The header prefix names a hash this node does not speak.
    #[error("hash not SHA-256: identifier {0:#06x}")]
    HashNotSha256(u16),
    /// The DSA signature failed under both hash conventions.
    #[error("signature verification failed")]
    Signature,
    /// The embedded `E(H(docname))` disagrees with the key the block was
    /// fetched for.
    #[error("E(H(docname)) mismatch: {} from headers, {} from key", hex::encode(.block), hex::encode(.key))]
    DocnameMismatch {
        /// Value embedded in the block headers.
        block: [u8; 32],
        /// Value expected by the node key.
        key: [u8; 32],
    },
}

/// A signed-subspace key: the binding of a publisher's DSA key to an
/// encrypted, hashed document name.
///
/// Identity is the `(E(H(docname)), H(pubkey))` pair; the public key itself
/// may or may not be attached, depending on whether this node has fetched it
/// yet.
#[derive(Clone)]
pub struct SskKey {
    encrypted_hashed_docname: [u8; 32],
    pub_key_hash: [u8; 32],
    routing_key: [u8; 32],
    pub_key: Option<Arc<DsaPublicKey>>,
}

impl SskKey {
    /// Build a key with the publisher's public key attached.
    pub fn new(encrypted_hashed_docname: [u8; 32], pub_key: DsaPublicKey) -> Self {
        let pub_key_hash = sha256(pub_key.to_bytes());
        Self::build(encrypted_hashed_docname, pub_key_hash, Some(Arc::new(pub_key)))
    }

    /// Build a key from the hash of a public key this node does not hold.
    /// Blocks fetched under such a key cannot be verified until the key is
    /// attached.
    pub fn with_pub_key_hash(encrypted_hashed_docname: [u8; 32], pub_key_hash: [u8; 32]) -> Self {
        Self::build(encrypted_hashed_docname, pub_key_hash, None)
    }

    fn build(
        encrypted_hashed_docname: [u8; 32],
        pub_key_hash: [u8; 32],
        pub_key: Option<Arc<DsaPublicKey>>,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(encrypted_hashed_docname);
        hasher.update(pub_key_hash);
        Self {
            encrypted_hashed_docname,
            pub_key_hash,
            routing_key: hasher.finalize().into(),
            pub_key,
        }
    }

    /// The publisher's public key, if attached.
    pub fn pub_key(&self) -> Option<&DsaPublicKey> {
        self.pub_key.as_deref()
    }

    /// The encrypted hash of the document name.
    pub fn encrypted_hashed_docname(&self) -> &[u8; 32] {
        &self.encrypted_hashed_docname
    }

    /// SHA-256 of the serialized public key.
    pub fn pub_key_hash(&self) -> &[u8; 32] {
        &self.pub_key_hash
    }

    /// The 32-byte routing key peers use to locate blocks under this key.
    pub fn routing_key(&self) -> &[u8; 32] {
        &self.routing_key
    }

    /// The full serialized key: type tag, docname binding, pubkey hash.
    pub fn full_key(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + 32 + 32);
        out.extend_from_slice(&TYPE);
        out.extend_from_slice(&self.encrypted_hashed_docname);
        out.extend_from_slice(&self.pub_key_hash);
        out
    }
}

impl PartialEq for SskKey {
    fn eq(&self, other: &Self) -> bool {
        self.encrypted_hashed_docname == other.encrypted_hashed_docname
            && self.pub_key_hash == other.pub_key_hash
    }
}

impl Eq for SskKey {}

impl Hash for SskKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.encrypted_hashed_docname.hash(state);
        self.pub_key_hash.hash(state);
    }
}

impl fmt::Debug for SskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SskKey({})", hex::encode(&self.routing_key[..6]))
    }
}

/// A fetched SSK block, verified on construction.
///
/// Headers layout, big-endian:
///
/// ```text
/// 2   hash identifier (must be SHA-256)
/// 2   symmetric cipher identifier
/// 32  E(H(docname))
/// --- encrypted with E(H(docname)) as IV:
/// 32  H(decrypted data), the data decryption key
/// 2   data length + metadata flag
/// 2   compression algorithm or 0xFFFF
/// --- signature over SHA-256(everything above ‖ SHA-256(data)):
/// 32  R, unsigned big-endian
/// 32  S, unsigned big-endian
/// 6   reserved
/// ```
///
/// Immutable after construction; verification is not repeated on access.
#[derive(Clone)]
pub struct SskBlock {
    data: Bytes,
    headers: Bytes,
    /// Index of the first encrypted header byte, after the 2+2+32 prefix.
    headers_offset: usize,
    node_key: SskKey,
    pub_key: Arc<DsaPublicKey>,
    hash_identifier: u16,
    sym_cipher_identifier: u16,
}

impl SskBlock {
    /// Admit a block fetched for `node_key`, verifying structure and
    /// signature. The key must have a public key attached.
    ///
    /// `dont_verify` skips only the signature check — for blocks this node
    /// signed itself moments ago — while the structural checks and the
    /// docname binding are enforced regardless.
    pub fn new(
        data: Bytes,
        headers: Bytes,
        node_key: SskKey,
        dont_verify: bool,
    ) -> Result<Self, SskVerifyError> {
        if headers.len() != TOTAL_HEADERS_LENGTH {
            return Err(SskVerifyError::HeadersLength(headers.len()));
        }
        if data.len() != DATA_LENGTH {
            return Err(SskVerifyError::DataLength(data.len()));
        }
        let pub_key = match &node_key.pub_key {
            Some(key) => key.clone(),
            None => return Err(SskVerifyError::NoPubKey),
        };

        let mut prefix = &headers[..];
        let hash_identifier = prefix.get_u16();
        if hash_identifier != HASH_SHA256 {
            return Err(SskVerifyError::HashNotSha256(hash_identifier));
        }
        let sym_cipher_identifier = prefix.get_u16();
        let mut eh_docname = [0u8; E_H_DOCNAME_LENGTH];
        prefix.copy_to_slice(&mut eh_docname);
        let headers_offset = 2 + 2 + E_H_DOCNAME_LENGTH;

        if !dont_verify {
            let signed_len = headers_offset + ENCRYPTED_HEADERS_LENGTH;
            let r = BigUint::from_bytes_be(&headers[signed_len..signed_len + SIG_R_LENGTH]);
            let s = BigUint::from_bytes_be(
                &headers[signed_len + SIG_R_LENGTH..signed_len + SIG_R_LENGTH + SIG_S_LENGTH],
            );
            let sig = DsaSignature::new(r, s);

            let data_hash = sha256(&data);
            let mut hasher = Sha256::new();
            // All headers up to and not including the signature, then the
            // implicit hash of the data.
            hasher.update(&headers[..signed_len]);
            hasher.update(data_hash);
            let overall_hash: [u8; 32] = hasher.finalize().into();
            let m = BigUint::from_bytes_be(&overall_hash);

            // Accept either hash convention; old signers reduced mod q, new
            // ones sign the raw integer.
            if !(dsa::verify(&pub_key, &sig, &m, false) || dsa::verify(&pub_key, &sig, &m, true)) {
                return Err(SskVerifyError::Signature);
            }
        }

        if eh_docname != node_key.encrypted_hashed_docname {
            return Err(SskVerifyError::DocnameMismatch {
                block: eh_docname,
                key: node_key.encrypted_hashed_docname,
            });
        }

        Ok(Self {
            data,
            headers,
            headers_offset,
            node_key,
            pub_key,
            hash_identifier,
            sym_cipher_identifier,
        })
    }

    /// The raw payload.
    pub fn raw_data(&self) -> &[u8] {
        &self.data
    }

    /// The raw headers.
    pub fn raw_headers(&self) -> &[u8] {
        &self.headers
    }

    /// The key this block answers.
    pub fn node_key(&self) -> &SskKey {
        &self.node_key
    }

    /// The publisher's public key.
    pub fn pub_key(&self) -> &DsaPublicKey {
        &self.pub_key
    }

    /// The publisher's public key, serialized.
    pub fn pub_key_bytes(&self) -> Vec<u8> {
        self.pub_key.to_bytes()
    }

    /// Index of the first encrypted header byte.
    pub fn headers_offset(&self) -> usize {
        self.headers_offset
    }

    /// The hash selector from the header prefix; always [`HASH_SHA256`]
    /// after admission.
    pub fn hash_identifier(&self) -> u16 {
        self.hash_identifier
    }

    /// The symmetric cipher selector, opaque at this layer.
    pub fn sym_cipher_identifier(&self) -> u16 {
        self.sym_cipher_identifier
    }

    /// The 32-byte routing key.
    pub fn routing_key(&self) -> &[u8; 32] {
        self.node_key.routing_key()
    }

    /// The full serialized key.
    pub fn full_key(&self) -> Vec<u8> {
        self.node_key.full_key()
    }
}

impl PartialEq for SskBlock {
    fn eq(&self, other: &Self) -> bool {
        self.pub_key == other.pub_key
            && self.node_key == other.node_key
            && self.headers_offset == other.headers_offset
            && self.hash_identifier == other.hash_identifier
            && self.sym_cipher_identifier == other.sym_cipher_identifier
            // Only the prefix of the headers; see HEADER_COMPARE_TO.
            && self.headers[..HEADER_COMPARE_TO] == other.headers[..HEADER_COMPARE_TO]
            && self.data == other.data
    }
}

impl Eq for SskBlock {}

impl fmt::Debug for SskBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SskBlock({:?})", self.node_key)
    }
}
