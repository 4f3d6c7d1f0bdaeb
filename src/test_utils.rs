//! Helpers for tests that need honestly signed blocks.

use std::sync::Arc;

use bytes::{BufMut, Bytes};
use num_bigint::BigUint;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::crypt::dsa::{generate_keypair, DsaGroup};
use crate::crypt::sha256;
use crate::keys::chk::{self, ChkBlock};
use crate::keys::ssk::{SskKey, DATA_LENGTH, TOTAL_HEADERS_LENGTH};
use crate::keys::{CIPHER_AES_PCFB_256, HASH_SHA256};

/// Mint a keypair, a random payload, and a correctly signed header buffer.
/// Returns `(data, headers, key)` ready for `SskBlock::new`.
pub(crate) fn signed_ssk_block<R: Rng>(rng: &mut R) -> (Bytes, Bytes, SskKey) {
    let (secret, public) = generate_keypair(Arc::new(DsaGroup::builtin().clone()), rng);

    let mut eh_docname = [0u8; 32];
    rng.fill(&mut eh_docname[..]);
    let mut data = vec![0u8; DATA_LENGTH];
    rng.fill(&mut data[..]);

    let mut headers = Vec::with_capacity(TOTAL_HEADERS_LENGTH);
    headers.put_u16(HASH_SHA256);
    headers.put_u16(CIPHER_AES_PCFB_256);
    headers.extend_from_slice(&eh_docname);
    let mut encrypted = [0u8; 36];
    rng.fill(&mut encrypted[..]);
    headers.extend_from_slice(&encrypted);

    let mut hasher = Sha256::new();
    hasher.update(&headers);
    hasher.update(sha256(&data));
    let overall: [u8; 32] = hasher.finalize().into();
    let sig = secret.sign(&BigUint::from_bytes_be(&overall), rng);
    headers.extend_from_slice(&pad32(sig.r()));
    headers.extend_from_slice(&pad32(sig.s()));
    headers.extend_from_slice(&[0u8; 6]);
    debug_assert_eq!(headers.len(), TOTAL_HEADERS_LENGTH);

    let key = SskKey::new(eh_docname, public);
    (Bytes::from(data), Bytes::from(headers), key)
}

/// A CHK block whose payload is `fill` repeated.
pub(crate) fn chk_block(fill: u8) -> ChkBlock {
    ChkBlock::from_data(Bytes::from(vec![fill; chk::DATA_LENGTH])).expect("exact length payload")
}

/// Print test logs when `RUST_LOG` asks for them. Safe to call repeatedly.
pub(crate) fn setup_logging() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `condition` for a couple of seconds before giving up.
pub(crate) async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

fn pad32(n: &BigUint) -> [u8; 32] {
    let bytes = n.to_bytes_be();
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    out
}
