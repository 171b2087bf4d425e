//! Collaborator interfaces the ledger consumes from the surrounding node.
//!
//! Each trait has a single method, mirroring the plain closures/functions
//! the specification describes for the UTXO finder, fee checker, penalty
//! lookup, block storage, and post-commit notification.

use crate::block::Block;
use crate::error::Result;
use crate::transaction::Transaction;
use crate::utxo::Utxo;
use solidus_common::{Amount, Hash, Height};

/// Looks up a UTXO by its set key. Implementations used during candidate
/// validation may additionally track which keys have already been consumed
/// by the in-progress candidate (see [`crate::utxo::DoubleSpendSet`]).
pub trait UtxoFinder {
    fn find(&self, utxo_key: &Hash) -> Option<Utxo>;
}

/// Verifies fee rules (including data-payload fees) given the transaction
/// and the amount left over after outputs are subtracted from inputs.
pub trait FeeChecker {
    fn check_fee(&self, tx: &Transaction, unspent: Amount) -> Result<()>;
}

/// Returns the non-refundable portion of a Freeze stake: the configured
/// penalty if the validator has not been slashed, or the full penalty
/// already forfeited if it has.
pub trait PenaltyDepositFinder {
    fn penalty_deposit(&self, utxo_key: &Hash) -> Amount;
}

/// Append-only, randomly-readable block log. Implemented by an in-memory
/// backend (tests) and a memory-mapped persistent backend.
pub trait BlockStorage {
    fn load(&mut self, genesis: &Block) -> Result<()>;
    fn read_last(&self) -> Result<Option<Block>>;
    fn read_by_height(&self, height: Height) -> Result<Option<Block>>;
    fn read_by_hash(&self, hash: &Hash) -> Result<Option<Block>>;
    fn save_block(&mut self, block: &Block) -> Result<()>;
    fn update_block_sig(
        &mut self,
        height: Height,
        hash: &Hash,
        signature: solidus_common::Signature,
        validators: Vec<bool>,
    ) -> Result<()>;
}

/// Synchronous post-commit callback, invoked by the ledger after a block is
/// durably applied. `validator_set_changed` tells the node whether it needs
/// to refresh its view of the active validator set.
pub trait NotificationSink {
    fn on_accepted_block(&mut self, block: &Block, validator_set_changed: bool);
}

/// A no-op sink, useful when the caller has nothing to observe.
#[derive(Default)]
pub struct NullNotificationSink;

impl NotificationSink for NullNotificationSink {
    fn on_accepted_block(&mut self, _block: &Block, _validator_set_changed: bool) {}
}
