//! DSA signatures over the network's shared group.
//!
//! Subspace blocks are signed with plain DSA rather than a modern scheme:
//! every publisher on the network shares one set of domain parameters, and a
//! block's signature must stay verifiable by nodes that have nothing but the
//! publisher's public key. The group is therefore part of the serialized
//! public key, and [`DsaGroup::builtin`] is the parameter set the network
//! ships with.
//!
//! Verification accepts two hash conventions: the hash interpreted as a raw
//! unsigned integer, and the hash pre-reduced mod q ("canonical" reduction).
//! Both are honored so blocks signed under either convention keep verifying;
//! see [`verify`].

use std::fmt;
use std::sync::{Arc, OnceLock};

use bytes::{Buf, BufMut};
use num_bigint::{BigInt, BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::Rng;

/// 2048-bit prime modulus of the built-in group, big-endian hex.
const BUILTIN_P: &str = "9cbfaae4083b3207ef9190f6fa41e12800fff6fcf441028cf6b250e88b8534d676d84c5415d364564ee262feecdfa0d68741d8e01a98697a0823d7d4cb95bfc65ffc1bff89d755da4b221a016b5d42563aef0eb7d4e277712f2497129457d40a2919b33b0b1ca3417614323d62066df5c4b7d503d17b38d563009f7643e55db55d14a6de376773946744bb55eb6d0a244d76f039ff0230cb4c2887f3fc1e237f806ad03780b557d911901b6a87d657b63bc7dfe859f53cd3b859928653c86c70352e49d1122af1a8ce27145aa46a05c5ae4e6c4025c2560895258f8f5745c57e5740f7f42fd0a7f7a4c20409eafbcfcff18d53c59ea646a7e7ec9085a3579e1f";
/// 256-bit prime order of the signing subgroup, big-endian hex.
const BUILTIN_Q: &str = "d23f0824128b2f330c5c7fd0a6a3a4506513270e269e0d37f2a74de452e6b463";
/// Generator of the order-q subgroup, big-endian hex.
const BUILTIN_G: &str = "5e5bc7db016e6de04e762a8810bb404c3bbad9a44b264d5a59d4a5e027284552c37a80beafcf0f93db99bec782cc9cb450293d34ad70b223c7234b32808652d3ed36b5a1ad7148e0b192d350cd90fa29fbe8abe4eff696ae67ce77074cfb65ff3f3f46cf4671ef2b8be744c075b3a48405568bbb8a8b497d4de417a1d0b354235d1b04ebbe1090bce5602ea91feb99bef2bfdba5b9368ccc4cbeafe32eaaad9290cffe7afbe794721c6e70038423b93264b57b2c06929e79c7df2b40a4753f87b1f6fd269cb2c9ad39df0fb677de424f128651ec70e2150a904b184100f07f2823c74e525929fa55f7b94bd2d10063a971a7e871164d427ba0f3073f53e93502";

/// Error decoding serialized DSA key material.
#[derive(Debug, thiserror::Error)]
pub enum DsaDecodeError {
    /// The buffer ended before all fields were read.
    #[error("truncated dsa key material")]
    Truncated,
    /// A decoded field violates the group's range constraints.
    #[error("dsa field out of range")]
    OutOfRange,
}

/// DSA domain parameters `(p, q, g)`.
#[derive(Clone, PartialEq, Eq)]
pub struct DsaGroup {
    p: BigUint,
    q: BigUint,
    g: BigUint,
}

impl DsaGroup {
    /// Build a group from its components, checking range constraints only.
    /// Primality of `p` and `q` is the parameter generator's problem.
    pub fn new(p: BigUint, q: BigUint, g: BigUint) -> Result<Self, DsaDecodeError> {
        if q >= p || g <= BigUint::one() || g >= p {
            return Err(DsaDecodeError::OutOfRange);
        }
        Ok(Self { p, q, g })
    }

    /// The group every publisher on the network uses.
    pub fn builtin() -> &'static DsaGroup {
        static BUILTIN: OnceLock<DsaGroup> = OnceLock::new();
        BUILTIN.get_or_init(|| DsaGroup {
            p: biguint_from_hex(BUILTIN_P),
            q: biguint_from_hex(BUILTIN_Q),
            g: biguint_from_hex(BUILTIN_G),
        })
    }

    /// Prime modulus.
    pub fn p(&self) -> &BigUint {
        &self.p
    }

    /// Subgroup order.
    pub fn q(&self) -> &BigUint {
        &self.q
    }

    /// Subgroup generator.
    pub fn g(&self) -> &BigUint {
        &self.g
    }

    /// Serialize as three length-prefixed big-endian integers.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_mpi(&mut out, &self.p);
        put_mpi(&mut out, &self.q);
        put_mpi(&mut out, &self.g);
        out
    }

    /// Decode a group from the front of `buf`, advancing it.
    pub fn read_from(buf: &mut impl Buf) -> Result<Self, DsaDecodeError> {
        let p = get_mpi(buf)?;
        let q = get_mpi(buf)?;
        let g = get_mpi(buf)?;
        Self::new(p, q, g)
    }
}

impl fmt::Debug for DsaGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DsaGroup({}/{})", self.p.bits(), self.q.bits())
    }
}

/// A publisher's DSA public key: the group plus `y = g^x mod p`.
#[derive(Clone, PartialEq, Eq)]
pub struct DsaPublicKey {
    group: Arc<DsaGroup>,
    y: BigUint,
}

impl DsaPublicKey {
    /// Build a public key, checking `1 < y < p`.
    pub fn new(group: Arc<DsaGroup>, y: BigUint) -> Result<Self, DsaDecodeError> {
        if y <= BigUint::one() || y >= group.p {
            return Err(DsaDecodeError::OutOfRange);
        }
        Ok(Self { group, y })
    }

    /// The group this key lives in.
    pub fn group(&self) -> &DsaGroup {
        &self.group
    }

    /// The public value `y`.
    pub fn y(&self) -> &BigUint {
        &self.y
    }

    /// Serialize as group ‖ y. Hashing this is how keys are identified.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.group.to_bytes();
        put_mpi(&mut out, &self.y);
        out
    }

    /// Decode a key serialized with [`Self::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DsaDecodeError> {
        let mut buf = bytes;
        let group = DsaGroup::read_from(&mut buf)?;
        let y = get_mpi(&mut buf)?;
        Self::new(Arc::new(group), y)
    }
}

impl fmt::Debug for DsaPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DsaPublicKey({:?})", self.group)
    }
}

/// A publisher's DSA secret key.
#[derive(Clone)]
pub struct DsaSecretKey {
    group: Arc<DsaGroup>,
    x: BigUint,
}

impl DsaSecretKey {
    /// Sign the integer-valued hash `m`.
    ///
    /// `m` is used as-is; callers pick the hash convention. Signing retries
    /// on the (cosmically unlikely) zero `r` or `s`.
    pub fn sign<R: Rng + ?Sized>(&self, m: &BigUint, rng: &mut R) -> DsaSignature {
        let DsaGroup { p, q, g } = &*self.group;
        loop {
            let k = rng.gen_biguint_range(&BigUint::one(), q);
            let r = g.modpow(&k, p) % q;
            if r.is_zero() {
                continue;
            }
            let k_inv = mod_inverse(&k, q).expect("k is invertible mod prime q");
            let s = (k_inv * (m + &self.x * &r)) % q;
            if s.is_zero() {
                continue;
            }
            return DsaSignature { r, s };
        }
    }

    /// The public key for this secret key.
    pub fn public_key(&self) -> DsaPublicKey {
        let y = self.group.g.modpow(&self.x, &self.group.p);
        DsaPublicKey {
            group: self.group.clone(),
            y,
        }
    }
}

impl fmt::Debug for DsaSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DsaSecretKey({:?})", self.group)
    }
}

/// Generate a fresh keypair in `group`.
pub fn generate_keypair<R: Rng + ?Sized>(
    group: Arc<DsaGroup>,
    rng: &mut R,
) -> (DsaSecretKey, DsaPublicKey) {
    let x = rng.gen_biguint_range(&BigUint::one(), &group.q);
    let secret = DsaSecretKey { group, x };
    let public = secret.public_key();
    (secret, public)
}

/// A DSA signature `(r, s)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsaSignature {
    r: BigUint,
    s: BigUint,
}

impl DsaSignature {
    /// Build a signature from its components.
    pub fn new(r: BigUint, s: BigUint) -> Self {
        Self { r, s }
    }

    /// The `r` component.
    pub fn r(&self) -> &BigUint {
        &self.r
    }

    /// The `s` component.
    pub fn s(&self) -> &BigUint {
        &self.s
    }
}

/// Verify `sig` over the integer-valued hash `m` under `key`.
///
/// With `force_reduce` the hash is reduced mod q before entering the
/// verification equation (the canonical convention); without it the raw
/// integer is used. Callers that must accept both conventions try both.
pub fn verify(key: &DsaPublicKey, sig: &DsaSignature, m: &BigUint, force_reduce: bool) -> bool {
    let DsaGroup { p, q, g } = key.group();
    if sig.r.is_zero() || sig.s.is_zero() || sig.r >= *q || sig.s >= *q {
        return false;
    }
    let Some(w) = mod_inverse(&sig.s, q) else {
        return false;
    };
    let m = if force_reduce { m % q } else { m.clone() };
    let u1 = (m * &w) % q;
    let u2 = (&sig.r * &w) % q;
    let v = ((g.modpow(&u1, p) * key.y.modpow(&u2, p)) % p) % q;
    v == sig.r
}

/// Inverse of `a` mod `m`, if `gcd(a, m) = 1`.
fn mod_inverse(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    let a = BigInt::from(a.clone());
    let m = BigInt::from(m.clone());
    let e = a.extended_gcd(&m);
    if !e.gcd.is_one() {
        return None;
    }
    e.x.mod_floor(&m).to_biguint()
}

/// Append a length-prefixed big-endian integer.
fn put_mpi(out: &mut Vec<u8>, n: &BigUint) {
    let bytes = n.to_bytes_be();
    debug_assert!(bytes.len() <= u16::MAX as usize);
    out.put_u16(bytes.len() as u16);
    out.extend_from_slice(&bytes);
}

/// Read a length-prefixed big-endian integer.
fn get_mpi(buf: &mut impl Buf) -> Result<BigUint, DsaDecodeError> {
    if buf.remaining() < 2 {
        return Err(DsaDecodeError::Truncated);
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(DsaDecodeError::Truncated);
    }
    let bytes = buf.copy_to_bytes(len);
    Ok(BigUint::from_bytes_be(&bytes))
}

fn biguint_from_hex(hex: &str) -> BigUint {
    BigUint::parse_bytes(hex.as_bytes(), 16).expect("valid builtin group constant")
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use crate::crypt::sha256;

    use super::*;

    fn keypair(seed: u64) -> (DsaSecretKey, DsaPublicKey) {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
        generate_keypair(Arc::new(DsaGroup::builtin().clone()), &mut rng)
    }

    #[test]
    fn sign_verify_roundtrip() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(1);
        let (secret, public) = keypair(0);
        let m = BigUint::from_bytes_be(&sha256(b"some block hash"));
        let sig = secret.sign(&m, &mut rng);
        assert!(verify(&public, &sig, &m, false), "raw mode should verify");
        assert!(verify(&public, &sig, &m, true), "reduced mode should verify");
    }

    #[test]
    fn tampered_hash_fails() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(2);
        let (secret, public) = keypair(0);
        let m = BigUint::from_bytes_be(&sha256(b"original"));
        let sig = secret.sign(&m, &mut rng);
        let other = BigUint::from_bytes_be(&sha256(b"tampered"));
        assert!(!verify(&public, &sig, &other, false));
        assert!(!verify(&public, &sig, &other, true));
    }

    #[test]
    fn wrong_key_fails() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(3);
        let (secret, _) = keypair(0);
        let (_, other_public) = keypair(7);
        let m = BigUint::from_bytes_be(&sha256(b"message"));
        let sig = secret.sign(&m, &mut rng);
        assert!(!verify(&other_public, &sig, &m, false));
    }

    #[test]
    fn out_of_range_signature_rejected() {
        let (_, public) = keypair(0);
        let m = BigUint::from_bytes_be(&sha256(b"m"));
        let q = public.group().q().clone();
        let sig = DsaSignature::new(q.clone(), BigUint::one());
        assert!(!verify(&public, &sig, &m, false));
        let sig = DsaSignature::new(BigUint::zero(), BigUint::one());
        assert!(!verify(&public, &sig, &m, false));
    }

    #[test]
    fn public_key_bytes_roundtrip() {
        let (_, public) = keypair(0);
        let bytes = public.to_bytes();
        let decoded = DsaPublicKey::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, public);
    }

    #[test]
    fn truncated_key_rejected() {
        let (_, public) = keypair(0);
        let bytes = public.to_bytes();
        assert!(matches!(
            DsaPublicKey::from_bytes(&bytes[..bytes.len() - 3]),
            Err(DsaDecodeError::Truncated)
        ));
    }
}
