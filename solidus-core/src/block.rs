//! Block header, Merkle tree, and the bit-exact header-hashing rule that
//! excludes `signature`/`validators` so validators can sign before every
//! seat's signature share has arrived.

use crate::error::{CoreError, Result};
use crate::transaction::Transaction;
use crate::validator::Enrollment;
use solidus_common::ser::{Readable, Reader, Writeable, Writer};
use solidus_common::{Hash, Height, Signature};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub prev_block: Hash,
    pub merkle_root: Hash,
    pub signature: Signature,
    pub validators: Vec<bool>,
    pub height: Height,
    pub preimages: Vec<Hash>,
    pub enrollments: Vec<Enrollment>,
}

impl BlockHeader {
    /// The hash validators sign and the chain links on: everything except
    /// `signature` and the `validators` bitmask, which are filled in after
    /// the header is otherwise final.
    #[must_use]
    pub fn hash_for_signing(&self) -> Hash {
        let mut writer = Writer::new();
        self.prev_block.write(&mut writer);
        self.merkle_root.write(&mut writer);
        writer.write_u64(self.height);
        writer.write_vec(&self.preimages);
        writer.write_vec(&self.enrollments);
        Hash::digest(&writer.into_bytes())
    }
}

impl Writeable for BlockHeader {
    fn write(&self, writer: &mut Writer) {
        self.prev_block.write(writer);
        self.merkle_root.write(writer);
        writer.write_bytes(&self.signature.to_bytes());
        writer.write_varint(self.validators.len() as u64);
        for bit in &self.validators {
            writer.write_u8(u8::from(*bit));
        }
        writer.write_u64(self.height);
        writer.write_vec(&self.preimages);
        writer.write_vec(&self.enrollments);
    }
}

impl Readable for BlockHeader {
    fn read(reader: &mut Reader) -> solidus_common::Result<Self> {
        let prev_block = Hash::read(reader)?;
        let merkle_root = Hash::read(reader)?;
        let signature_bytes = reader.read_bytes(64)?;
        let signature = Signature::from_bytes(signature_bytes)?;
        let validator_count = reader.read_varint()?;
        let mut validators = Vec::with_capacity(validator_count as usize);
        for _ in 0..validator_count {
            validators.push(reader.read_u8()? != 0);
        }
        let height = reader.read_u64()?;
        let preimages = reader.read_vec(100_000)?;
        let enrollments = reader.read_vec(100_000)?;
        Ok(Self {
            prev_block,
            merkle_root,
            signature,
            validators,
            height,
            preimages,
            enrollments,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Transaction>,
}

impl Block {
    #[must_use]
    pub fn hash(&self) -> Hash {
        self.header.hash_for_signing()
    }

    /// Transactions must be lexicographically sorted by hash, the same
    /// order the Merkle tree is built over.
    pub fn check_transactions_sorted(&self) -> Result<()> {
        for pair in self.txs.windows(2) {
            if pair[0].hash() >= pair[1].hash() {
                return Err(CoreError::TransactionsNotSorted);
            }
        }
        Ok(())
    }

    /// Recomputes the Merkle root and compares it to `header.merkle_root`.
    pub fn check_merkle_root(&self) -> Result<()> {
        let computed = merkle_root(&self.txs);
        if computed != self.header.merkle_root {
            return Err(CoreError::MalformedCoinbase(
                "merkle root does not match transaction set".into(),
            ));
        }
        Ok(())
    }
}

/// Builds the Merkle root over transaction hashes, duplicating the last
/// hash of an odd-sized level.
#[must_use]
pub fn merkle_root(txs: &[Transaction]) -> Hash {
    if txs.is_empty() {
        return Hash::init();
    }
    let mut level: Vec<Hash> = txs.iter().map(Transaction::hash).collect();
    if level.len() == 1 {
        return level[0];
    }
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = if pair.len() == 2 { pair[1] } else { pair[0] };
            next.push(Hash::digest_parts(&[left.as_bytes(), right.as_bytes()]));
        }
        level = next;
    }
    level[0]
}

/// The sibling hashes from a leaf up to the root, in bottom-to-top order.
#[must_use]
pub fn merkle_path(txs: &[Transaction], leaf_index: usize) -> Vec<Hash> {
    let mut level: Vec<Hash> = txs.iter().map(Transaction::hash).collect();
    let mut index = leaf_index;
    let mut path = Vec::new();

    while level.len() > 1 {
        let pair_index = index ^ 1;
        let sibling = if pair_index < level.len() {
            level[pair_index]
        } else {
            level[index]
        };
        path.push(sibling);

        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = if pair.len() == 2 { pair[1] } else { pair[0] };
            next.push(Hash::digest_parts(&[left.as_bytes(), right.as_bytes()]));
        }
        level = next;
        index /= 2;
    }
    path
}

/// Recomputes the root from a leaf hash and its Merkle path and compares
/// it against `root`.
#[must_use]
pub fn check_merkle_path(leaf: Hash, leaf_index: usize, path: &[Hash], root: Hash) -> bool {
    let mut current = leaf;
    let mut index = leaf_index;
    for sibling in path {
        current = if index % 2 == 0 {
            Hash::digest_parts(&[current.as_bytes(), sibling.as_bytes()])
        } else {
            Hash::digest_parts(&[sibling.as_bytes(), current.as_bytes()])
        };
        index /= 2;
    }
    current == root
}

impl Writeable for Block {
    fn write(&self, writer: &mut Writer) {
        self.header.write(writer);
        writer.write_vec(&self.txs);
    }
}

impl Readable for Block {
    fn read(reader: &mut Reader) -> solidus_common::Result<Self> {
        let header = BlockHeader::read(reader)?;
        let txs = reader.read_vec(100_000)?;
        Ok(Self { header, txs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{Input, Lock, Output, OutputType, Transaction};
    use solidus_common::{Amount, Point, Scalar};

    fn payment_tx(seed: u8, value: u64) -> Transaction {
        Transaction {
            inputs: vec![Input {
                utxo_ref: Hash::digest(&[seed]),
                unlock: crate::transaction::Unlock(Vec::new()),
                unlock_age: 0,
            }],
            outputs: vec![Output {
                value: Amount::new(value),
                lock: Lock::key([seed; 32]),
                output_type: OutputType::Payment,
            }],
            payload: Vec::new(),
            lock_height: 0,
        }
    }

    fn header_with(height: Height, merkle_root: Hash) -> BlockHeader {
        BlockHeader {
            prev_block: Hash::init(),
            merkle_root,
            signature: Signature {
                r: Point::identity(),
                s: Scalar::zero(),
            },
            validators: Vec::new(),
            height,
            preimages: Vec::new(),
            enrollments: Vec::new(),
        }
    }

    #[test]
    fn merkle_root_is_deterministic_and_sensitive_to_tx_set() {
        let one = vec![payment_tx(1, 10)];
        let two = vec![payment_tx(1, 10), payment_tx(2, 20)];
        assert_eq!(merkle_root(&one), merkle_root(&one));
        assert_ne!(merkle_root(&one), merkle_root(&two));
        assert_ne!(merkle_root(&one), Hash::init());
    }

    #[test]
    fn merkle_path_round_trips() {
        let txs = vec![payment_tx(1, 10), payment_tx(2, 20), payment_tx(3, 30)];
        let root = merkle_root(&txs);
        for (idx, tx) in txs.iter().enumerate() {
            let path = merkle_path(&txs, idx);
            assert!(check_merkle_path(tx.hash(), idx, &path, root));
        }
    }

    #[test]
    fn header_hash_excludes_signature_and_validators() {
        let txs = vec![payment_tx(1, 10)];
        let root = merkle_root(&txs);
        let mut header = header_with(1, root);
        let hash_before = header.hash_for_signing();
        header.signature.s = Scalar::from_preimage(&Hash::digest(b"other"));
        header.validators = vec![true, false];
        assert_eq!(hash_before, header.hash_for_signing());
    }

    #[test]
    fn block_detects_unsorted_transactions_and_bad_merkle_root() {
        let txs = vec![payment_tx(2, 20), payment_tx(1, 10)];
        let root = merkle_root(&txs);
        let block = Block {
            header: header_with(1, root),
            txs,
        };
        assert!(block.check_transactions_sorted().is_err());

        let sorted_txs = vec![payment_tx(1, 10), payment_tx(2, 20)];
        let block = Block {
            header: header_with(1, Hash::init()),
            txs: sorted_txs,
        };
        assert!(block.check_merkle_root().is_err());
    }
}
