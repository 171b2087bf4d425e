//! Validator enrollment, pre-image reveal/slashing, and the Schnorr
//! aggregate block-signature check (§4.3's enrollment manager + §4.5).

use crate::block::BlockHeader;
use crate::error::{CoreError, Result};
use solidus_common::ser::{Readable, Reader, Writeable, Writer};
use solidus_common::{Amount, Hash, Height, Point, Scalar};
use std::collections::HashMap;

/// A stake commitment that activates a validator for `cycle_length` blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrollment {
    pub utxo_key: Hash,
    /// The hash-chain anchor: a validator's pre-image at height `h` must
    /// reduce to this value under `h - enrolled_height` sequential hashings.
    pub commitment: Hash,
    pub cycle_length: u64,
}

impl Writeable for Enrollment {
    fn write(&self, writer: &mut Writer) {
        self.utxo_key.write(writer);
        self.commitment.write(writer);
        writer.write_u64(self.cycle_length);
    }
}

impl Readable for Enrollment {
    fn read(reader: &mut Reader) -> Result<Self> {
        Ok(Self {
            utxo_key: Hash::read(reader)?,
            commitment: Hash::read(reader)?,
            cycle_length: reader.read_u64()?,
        })
    }
}

/// A validator's revealed pre-image at a specific height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreImageInfo {
    pub utxo_key: Hash,
    pub hash: Hash,
    pub height: Height,
}

/// A validator's full enrollment state, as returned by `get_validators`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorInfo {
    pub utxo_key: Hash,
    pub public_key: Point,
    pub enrolled_height: Height,
    pub cycle_length: u64,
    pub commitment: Hash,
    pub slashed_at: Option<Height>,
    /// The staked Freeze UTXO's value at enrollment time, used to weight
    /// payout shares.
    pub stake: Amount,
}

impl ValidatorInfo {
    #[must_use]
    pub fn is_active(&self, height: Height) -> bool {
        let within_cycle =
            self.enrolled_height <= height && height < self.enrolled_height + self.cycle_length;
        let not_slashed = self.slashed_at.map_or(true, |s| height <= s);
        within_cycle && not_slashed
    }
}

/// Tracks every enrollment and the pre-images revealed against it.
#[derive(Debug, Default, Clone)]
pub struct ValidatorSet {
    validators: HashMap<Hash, ValidatorInfo>,
    known_preimage: HashMap<Hash, (Height, Hash)>,
}

impl ValidatorSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enroll(
        &mut self,
        enrollment: &Enrollment,
        enrolled_height: Height,
        public_key: Point,
        stake: Amount,
    ) {
        self.validators.insert(
            enrollment.utxo_key,
            ValidatorInfo {
                utxo_key: enrollment.utxo_key,
                public_key,
                enrolled_height,
                cycle_length: enrollment.cycle_length,
                commitment: enrollment.commitment,
                slashed_at: None,
                stake,
            },
        );
    }

    #[must_use]
    pub fn count_active(&self, height: Height) -> usize {
        self.validators.values().filter(|v| v.is_active(height)).count()
    }

    /// Active validators at `height`, ordered by `utxo_key` — the same
    /// order `header.preimages` binds positions to.
    #[must_use]
    pub fn get_validators(&self, height: Height) -> Vec<ValidatorInfo> {
        let mut active: Vec<ValidatorInfo> = self
            .validators
            .values()
            .filter(|v| v.is_active(height))
            .cloned()
            .collect();
        active.sort_by(|a, b| a.utxo_key.as_bytes().cmp(b.utxo_key.as_bytes()));
        active
    }

    /// Monotonicity rule: a validator's known pre-image height only moves
    /// forward, and the revealed value must reduce to the enrollment
    /// commitment under `height - enrolled_height` sequential hashings.
    pub fn add_preimage(&mut self, info: PreImageInfo) -> Result<bool> {
        let validator = self
            .validators
            .get(&info.utxo_key)
            .ok_or_else(|| CoreError::UnknownEnrollmentUtxo(info.utxo_key.to_string()))?;
        if info.height < validator.enrolled_height
            || info.height >= validator.enrolled_height + validator.cycle_length
        {
            return Err(CoreError::PreImageMismatch);
        }
        if let Some((known_height, _)) = self.known_preimage.get(&info.utxo_key) {
            if info.height <= *known_height {
                return Ok(false);
            }
        }
        let distance = info.height - validator.enrolled_height;
        if !chain_reduces_to(&info.hash, distance, &validator.commitment) {
            return Err(CoreError::PreImageMismatch);
        }
        self.known_preimage
            .insert(info.utxo_key, (info.height, info.hash));
        Ok(true)
    }

    #[must_use]
    pub fn get(&self, utxo_key: &Hash) -> Option<ValidatorInfo> {
        self.validators.get(utxo_key).cloned()
    }

    /// Dry-run check of the monotonicity/chain rule, without recording the
    /// pre-image as known. Used by block validation before the accepting
    /// batch actually commits it.
    #[must_use]
    pub fn verify_preimage(&self, utxo_key: &Hash, value: &Hash, height: Height) -> bool {
        match self.validators.get(utxo_key) {
            Some(v) if height >= v.enrolled_height => {
                chain_reduces_to(value, height - v.enrolled_height, &v.commitment)
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn known_preimage_at(&self, utxo_key: &Hash, height: Height) -> Option<Hash> {
        self.known_preimage
            .get(utxo_key)
            .and_then(|(h, hash)| (*h == height).then_some(*hash))
    }

    /// Removes `utxo_key` from the active set starting the block after
    /// `height`; its penalty deposit becomes non-refundable.
    pub fn slash(&mut self, utxo_key: &Hash, height: Height) -> Result<()> {
        let validator = self
            .validators
            .get_mut(utxo_key)
            .ok_or_else(|| CoreError::UnknownEnrollmentUtxo(utxo_key.to_string()))?;
        validator.slashed_at = Some(validator.slashed_at.map_or(height, |s| s.min(height)));
        Ok(())
    }

    #[must_use]
    pub fn is_slashed(&self, utxo_key: &Hash, height: Height) -> bool {
        self.validators
            .get(utxo_key)
            .and_then(|v| v.slashed_at)
            .is_some_and(|s| s <= height)
    }
}

fn chain_reduces_to(value: &Hash, distance: u64, commitment: &Hash) -> bool {
    let mut current = *value;
    for _ in 0..distance {
        current = current.chain_step();
    }
    current == *commitment
}

/// Verifies the Schnorr aggregate block signature (§4.5) and the simple
/// majority rule over `header.validators`.
pub fn verify_block_signature(header: &BlockHeader, active: &[ValidatorInfo]) -> Result<()> {
    if header.preimages.len() != active.len() {
        return Err(CoreError::PreImageCountMismatch(
            header.preimages.len(),
            active.len(),
        ));
    }

    let mut sum_key = Point::identity();
    let mut sum_scalar = Scalar::zero();
    let mut signed_count = 0usize;

    for (idx, validator) in active.iter().enumerate() {
        if !header.validators.get(idx).copied().unwrap_or(false) {
            continue;
        }
        signed_count += 1;
        let p_i = Scalar::from_preimage(&header.preimages[idx]);
        if p_i.is_zero() {
            continue;
        }
        sum_key = sum_key + validator.public_key;
        sum_scalar = sum_scalar + p_i;
    }

    if active.is_empty() || signed_count * 2 <= active.len() {
        return Err(CoreError::MajorityNotMet {
            signed: signed_count,
            active: active.len(),
        });
    }

    let challenge = Scalar::from_preimage(&header.hash_for_signing());
    let lhs = Point::mul_base(&sum_scalar);
    let rhs = challenge * header.signature.r + sum_key;

    if header.signature.s != sum_scalar || lhs != rhs {
        return Err(CoreError::InvalidSignature);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enrollment_and_active_count() {
        let mut set = ValidatorSet::new();
        let commitment = Hash::digest(b"seed").chain_step().chain_step();
        let enrollment = Enrollment {
            utxo_key: Hash::digest(b"stake-utxo"),
            commitment,
            cycle_length: 10,
        };
        set.enroll(&enrollment, 5, Point::identity(), Amount::new(50_000));
        assert_eq!(set.count_active(4), 0);
        assert_eq!(set.count_active(5), 1);
        assert_eq!(set.count_active(14), 1);
        assert_eq!(set.count_active(15), 0);
    }

    #[test]
    fn preimage_reveal_is_monotonic_and_chain_checked() {
        let mut set = ValidatorSet::new();
        let seed = Hash::digest(b"validator-seed");
        let commitment = seed.chain_step().chain_step();
        let enrollment = Enrollment {
            utxo_key: Hash::digest(b"stake-utxo"),
            commitment,
            cycle_length: 10,
        };
        set.enroll(&enrollment, 0, Point::identity(), Amount::new(50_000));

        let accepted = set
            .add_preimage(PreImageInfo {
                utxo_key: enrollment.utxo_key,
                hash: seed.chain_step(),
                height: 1,
            })
            .unwrap();
        assert!(accepted);

        // Height must move strictly forward.
        let stale = set
            .add_preimage(PreImageInfo {
                utxo_key: enrollment.utxo_key,
                hash: seed,
                height: 0,
            })
            .unwrap();
        assert!(!stale);

        // A value that doesn't reduce to the commitment is rejected.
        let bad = set.add_preimage(PreImageInfo {
            utxo_key: enrollment.utxo_key,
            hash: Hash::digest(b"not-the-chain"),
            height: 2,
        });
        assert!(bad.is_err());
    }

    #[test]
    fn slashing_deactivates_from_the_next_height() {
        let mut set = ValidatorSet::new();
        let enrollment = Enrollment {
            utxo_key: Hash::digest(b"stake-utxo"),
            commitment: Hash::digest(b"c"),
            cycle_length: 100,
        };
        set.enroll(&enrollment, 0, Point::identity(), Amount::new(50_000));
        set.slash(&enrollment.utxo_key, 5).unwrap();
        assert!(set.is_slashed(&enrollment.utxo_key, 5));
        assert!(!set.is_slashed(&enrollment.utxo_key, 4));
        assert_eq!(set.count_active(5), 1);
        assert_eq!(set.count_active(6), 0);
    }
}
