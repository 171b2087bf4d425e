//! Curve25519 (Ristretto) point/scalar arithmetic and Schnorr signatures.
//!
//! The ledger uses two signature shapes built on the same primitives: a
//! conventional single-key Schnorr signature for `Key`/`KeyHash` locks and
//! `CHECK_SIG`/`CHECK_MULTI_SIG`, and a validator-set aggregate signature
//! (the sum of per-validator pre-image scalars, §4.5) assembled by
//! `solidus-core::validator` out of the `add`/`mul_base` operations exposed
//! here.

use crate::error::{Error, Result};
use crate::hash::Hash;
use curve25519_dalek::constants::RISTRETTO_BASEPOINT_TABLE;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar as DalekScalar;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::fmt;
use std::ops::Add;
use zeroize::Zeroize;

/// A Curve25519 group element, 32 bytes compressed.
///
/// Equivalent to the spec's `PublicKey`/`Point`. Decoding rejects any byte
/// string that is not the canonical compressed encoding of a curve point.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct Point(#[serde(with = "point_bytes")] RistrettoPoint);

mod point_bytes {
    use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(p: &RistrettoPoint, s: S) -> Result<S::Ok, S::Error> {
        p.compress().to_bytes().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<RistrettoPoint, D::Error> {
        let bytes: [u8; 32] = Deserialize::deserialize(d)?;
        CompressedRistretto(bytes)
            .decompress()
            .ok_or_else(|| serde::de::Error::custom("point is not a canonical curve point"))
    }
}

impl Point {
    /// Decodes a 32-byte compressed point, rejecting non-canonical encodings.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(Error::InvalidPoint);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        CompressedRistretto(arr)
            .decompress()
            .map(Self)
            .ok_or(Error::InvalidPoint)
    }

    #[must_use]
    pub fn to_bytes(self) -> [u8; 32] {
        self.0.compress().to_bytes()
    }

    /// `scalar * basepoint`, the public key corresponding to a secret scalar.
    #[must_use]
    pub fn mul_base(scalar: &Scalar) -> Self {
        Self(&scalar.0 * RISTRETTO_BASEPOINT_TABLE)
    }

    /// The group identity, the start value for an aggregate sum of keys.
    #[must_use]
    pub fn identity() -> Self {
        Self(RistrettoPoint::default())
    }

    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.0 == RistrettoPoint::default()
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point(self.0 + rhs.0)
    }
}

impl PartialEq for Point {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for Point {}

impl fmt::Debug for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Point({})", hex::encode(self.to_bytes()))
    }
}

/// A scalar in the Ristretto group's prime-order field.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct Scalar(#[serde(with = "scalar_bytes")] DalekScalar);

mod scalar_bytes {
    use curve25519_dalek::scalar::Scalar as DalekScalar;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(sc: &DalekScalar, s: S) -> Result<S::Ok, S::Error> {
        sc.to_bytes().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DalekScalar, D::Error> {
        let bytes: [u8; 32] = Deserialize::deserialize(d)?;
        Option::from(DalekScalar::from_canonical_bytes(bytes))
            .ok_or_else(|| serde::de::Error::custom("scalar is not canonically reduced"))
    }
}

impl Scalar {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(Error::InvalidScalar);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Option::from(DalekScalar::from_canonical_bytes(arr))
            .map(Self)
            .ok_or(Error::InvalidScalar)
    }

    #[must_use]
    pub fn to_bytes(self) -> [u8; 32] {
        self.0.to_bytes()
    }

    #[must_use]
    pub fn zero() -> Self {
        Self(DalekScalar::ZERO)
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == DalekScalar::ZERO
    }

    /// Reduces a 64-byte digest into a scalar, the standard way to turn a
    /// hash output into a Schnorr nonce or challenge.
    #[must_use]
    pub fn from_hash_wide(bytes: &[u8; 64]) -> Self {
        Self(DalekScalar::from_bytes_mod_order_wide(bytes))
    }

    /// Interprets a 64-byte consensus [`Hash`] as a scalar: this is how a
    /// pre-image becomes the per-validator contribution to an aggregate
    /// signature (`p_i = scalar(header.preimages[i])`).
    #[must_use]
    pub fn from_preimage(hash: &Hash) -> Self {
        Self::from_hash_wide(hash.as_bytes())
    }

    fn random() -> Self {
        let mut bytes = [0u8; 64];
        OsRng.fill_bytes(&mut bytes);
        Self::from_hash_wide(&bytes)
    }

    /// The multiplicative inverse, for rearranging a Schnorr-style
    /// verification equation to solve for one side. Panics on a zero
    /// scalar, same as the underlying field.
    #[must_use]
    pub fn invert(&self) -> Self {
        Self(self.0.invert())
    }
}

impl Add for Scalar {
    type Output = Scalar;
    fn add(self, rhs: Scalar) -> Scalar {
        Scalar(self.0 + rhs.0)
    }
}

impl std::ops::Neg for Scalar {
    type Output = Scalar;
    fn neg(self) -> Scalar {
        Scalar(-self.0)
    }
}

impl std::ops::Sub for Scalar {
    type Output = Scalar;
    fn sub(self, rhs: Scalar) -> Scalar {
        Scalar(self.0 - rhs.0)
    }
}

impl std::ops::Mul for Scalar {
    type Output = Scalar;
    fn mul(self, rhs: Scalar) -> Scalar {
        Scalar(self.0 * rhs.0)
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for Scalar {}

impl fmt::Debug for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scalar({})", hex::encode(self.to_bytes()))
    }
}

/// A Schnorr signature: `(R, s)`, 64 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub r: Point,
    pub s: Scalar,
}

impl Signature {
    #[must_use]
    pub fn to_bytes(self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.r.to_bytes());
        out[32..].copy_from_slice(&self.s.to_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 64 {
            return Err(Error::InvalidSignature(format!(
                "expected 64 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self {
            r: Point::from_bytes(&bytes[..32])?,
            s: Scalar::from_bytes(&bytes[32..])?,
        })
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(self.to_bytes()))
    }
}

/// A secret/public Schnorr keypair. The secret scalar is zeroized on drop.
pub struct KeyPair {
    secret: Scalar,
    public: Point,
}

impl KeyPair {
    #[must_use]
    pub fn generate() -> Self {
        let secret = Scalar::random();
        let public = Point::mul_base(&secret);
        Self { secret, public }
    }

    #[must_use]
    pub fn from_secret(secret: Scalar) -> Self {
        let public = Point::mul_base(&secret);
        Self { secret, public }
    }

    #[must_use]
    pub const fn public_key(&self) -> Point {
        self.public
    }

    /// Standard Schnorr signature over `message`: nonce `k = H(secret ||
    /// message)`, `R = k·G`, challenge `e = H(R || P || message)`,
    /// `s = k + e·secret`.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        let nonce = Self::derive_nonce(&self.secret, message);
        let r = Point::mul_base(&nonce);
        let challenge = challenge_scalar(&r, &self.public, message);
        let s = nonce + challenge * self.secret;
        Signature { r, s }
    }

    fn derive_nonce(secret: &Scalar, message: &[u8]) -> Scalar {
        let mut hasher = Sha512::new();
        hasher.update(secret.to_bytes());
        hasher.update(message);
        let digest = hasher.finalize();
        let mut bytes = [0u8; 64];
        bytes.copy_from_slice(&digest);
        Scalar::from_hash_wide(&bytes)
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.secret.0.zeroize();
    }
}

fn challenge_scalar(r: &Point, public: &Point, message: &[u8]) -> Scalar {
    let mut hasher = Sha512::new();
    hasher.update(r.to_bytes());
    hasher.update(public.to_bytes());
    hasher.update(message);
    let digest = hasher.finalize();
    let mut bytes = [0u8; 64];
    bytes.copy_from_slice(&digest);
    Scalar::from_hash_wide(&bytes)
}

/// Verifies a standard single-key Schnorr signature: `s·G == R + e·P`.
#[must_use]
pub fn verify(public: &Point, message: &[u8], sig: &Signature) -> bool {
    let challenge = challenge_scalar(&sig.r, public, message);
    Point::mul_base(&sig.s) == sig.r + challenge * (*public)
}

impl std::ops::Mul<Point> for Scalar {
    type Output = Point;
    fn mul(self, rhs: Point) -> Point {
        Point(self.0 * rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let kp = KeyPair::generate();
        let message = b"solidus block header";
        let sig = kp.sign(message);
        assert!(verify(&kp.public_key(), message, &sig));
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let kp = KeyPair::generate();
        let sig = kp.sign(b"original");
        assert!(!verify(&kp.public_key(), b"tampered", &sig));
    }

    #[test]
    fn point_round_trips_through_bytes() {
        let kp = KeyPair::generate();
        let bytes = kp.public_key().to_bytes();
        let decoded = Point::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, kp.public_key());
    }

    #[test]
    fn point_addition_matches_scalar_addition() {
        let a = Scalar::random();
        let b = Scalar::random();
        let sum_points = Point::mul_base(&a) + Point::mul_base(&b);
        let point_of_sum = Point::mul_base(&(a + b));
        assert_eq!(sum_points, point_of_sum);
    }

    #[test]
    fn preimage_scalar_is_deterministic() {
        let h = Hash::digest(b"enrollment-seed");
        assert_eq!(Scalar::from_preimage(&h), Scalar::from_preimage(&h));
    }

    #[test]
    fn invalid_point_length_is_rejected() {
        assert!(Point::from_bytes(&[0u8; 10]).is_err());
    }
}
