//! The UTXO set (§4.3): `hash(tx_hash, output_idx) -> (unlock_height, output)`,
//! plus the double-spend-protected finder used while validating a candidate
//! transaction set that hasn't committed yet.

use crate::block::Block;
use crate::error::{CoreError, Result};
use crate::traits::UtxoFinder;
use crate::transaction::{Output, OutputType};
use crate::validator::Enrollment;
use solidus_common::{Hash, Height, OutPoint};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub unlock_height: Height,
    pub output: Output,
}

/// The authoritative unspent-output set. Mutated only by the ledger writer
/// through [`UtxoSet::apply_block`]; reads (`peek`) may happen concurrently.
#[derive(Debug, Default, Clone)]
pub struct UtxoSet {
    utxos: HashMap<Hash, Utxo>,
}

impl UtxoSet {
    #[must_use]
    pub fn new() -> Self {
        Self {
            utxos: HashMap::new(),
        }
    }

    #[must_use]
    pub fn peek(&self, utxo_key: &Hash) -> Option<Utxo> {
        self.utxos.get(utxo_key).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    /// Applies one block's outputs/inputs/enrollments to the set. Enrolling
    /// a Freeze UTXO extends its `unlock_height` to `height + validator_cycle`.
    pub fn apply_block(
        &mut self,
        block: &Block,
        height: Height,
        validator_cycle: u64,
    ) -> Result<()> {
        for tx in &block.txs {
            let tx_hash = tx.hash();
            for input in &tx.inputs {
                if tx.is_coinbase() {
                    continue;
                }
                self.utxos.remove(&input.utxo_ref).ok_or_else(|| {
                    CoreError::UtxoNotFound(input.utxo_ref.to_string())
                })?;
            }
            for (idx, output) in tx.outputs.iter().enumerate() {
                let key = OutPoint::new(tx_hash, idx as u32).key();
                self.utxos.insert(
                    key,
                    Utxo {
                        unlock_height: height,
                        output: output.clone(),
                    },
                );
            }
        }

        for enrollment in &block.header.enrollments {
            let utxo = self
                .utxos
                .get_mut(&enrollment.utxo_key)
                .ok_or_else(|| CoreError::UnknownEnrollmentUtxo(enrollment.utxo_key.to_string()))?;
            if utxo.output.output_type != OutputType::Freeze {
                return Err(CoreError::UnknownEnrollmentUtxo(format!(
                    "{} is not a Freeze output",
                    enrollment.utxo_key
                )));
            }
            utxo.unlock_height = height + validator_cycle;
        }

        Ok(())
    }

    /// A closure-like finder that additionally remembers which keys a
    /// not-yet-committed candidate has already consumed.
    #[must_use]
    pub fn finder_with_double_spend_protection(&self) -> DoubleSpendFinder<'_> {
        DoubleSpendFinder {
            set: self,
            consumed: DoubleSpendSet::default(),
        }
    }
}

impl UtxoFinder for UtxoSet {
    fn find(&self, utxo_key: &Hash) -> Option<Utxo> {
        self.peek(utxo_key)
    }
}

/// Read-only view of the outpoints a double-spend-protected finder has
/// already consumed, exposed for diagnostics.
#[derive(Debug, Default, Clone)]
pub struct DoubleSpendSet(HashSet<Hash>);

impl DoubleSpendSet {
    #[must_use]
    pub fn contains(&self, utxo_key: &Hash) -> bool {
        self.0.contains(utxo_key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A [`UtxoFinder`] that removes a UTXO from its own view the moment it is
/// looked up, so validating a second transaction that references the same
/// outpoint sees it as already spent.
pub struct DoubleSpendFinder<'a> {
    set: &'a UtxoSet,
    consumed: DoubleSpendSet,
}

impl DoubleSpendFinder<'_> {
    #[must_use]
    pub fn consumed(&self) -> &DoubleSpendSet {
        &self.consumed
    }
}

impl UtxoFinder for DoubleSpendFinder<'_> {
    fn find(&self, utxo_key: &Hash) -> Option<Utxo> {
        if self.consumed.0.contains(utxo_key) {
            return None;
        }
        self.set.peek(utxo_key)
    }
}

impl DoubleSpendFinder<'_> {
    /// Marks `utxo_key` as consumed by the in-progress candidate.
    pub fn consume(&mut self, utxo_key: Hash) {
        self.consumed.0.insert(utxo_key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{Input, Lock, Output, OutputType, Transaction, Unlock};
    use crate::block::{Block, BlockHeader};
    use solidus_common::Amount;

    fn payment_output(value: u64) -> Output {
        Output {
            value: Amount::new(value),
            lock: Lock::key([7u8; 32]),
            output_type: OutputType::Payment,
        }
    }

    fn single_output_block(height: Height, value: u64) -> Block {
        let tx = Transaction {
            inputs: vec![Input::coinbase(height)],
            outputs: vec![payment_output(value)],
            payload: Vec::new(),
            lock_height: 0,
        };
        Block {
            header: BlockHeader {
                prev_block: Hash::init(),
                merkle_root: Hash::init(),
                signature: solidus_common::Signature {
                    r: solidus_common::Point::identity(),
                    s: solidus_common::Scalar::zero(),
                },
                validators: Vec::new(),
                height,
                preimages: Vec::new(),
                enrollments: Vec::new(),
            },
            txs: vec![tx],
        }
    }

    #[test]
    fn apply_block_inserts_outputs_and_removes_spent_inputs() {
        let mut set = UtxoSet::new();
        let block = single_output_block(0, 100);
        let tx_hash = block.txs[0].hash();
        set.apply_block(&block, 0, 1008).unwrap();
        let key = OutPoint::new(tx_hash, 0).key();
        assert!(set.peek(&key).is_some());
        assert_eq!(set.len(), 1);

        let spend = Transaction {
            inputs: vec![Input {
                utxo_ref: key,
                unlock: Unlock(Vec::new()),
                unlock_age: 0,
            }],
            outputs: vec![payment_output(50)],
            payload: Vec::new(),
            lock_height: 0,
        };
        let next = Block {
            header: BlockHeader { height: 1, ..block.header.clone() },
            txs: vec![spend],
        };
        set.apply_block(&next, 1, 1008).unwrap();
        assert!(set.peek(&key).is_none());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn double_spend_finder_hides_consumed_utxo() {
        let mut set = UtxoSet::new();
        let block = single_output_block(0, 100);
        let tx_hash = block.txs[0].hash();
        set.apply_block(&block, 0, 1008).unwrap();
        let key = OutPoint::new(tx_hash, 0).key();

        let mut finder = set.finder_with_double_spend_protection();
        assert!(finder.find(&key).is_some());
        finder.consume(key);
        assert!(finder.find(&key).is_none());
        assert!(finder.consumed().contains(&key));
    }
}
