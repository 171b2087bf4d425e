//! The ledger (§4.4): composes the UTXO set, the validator set, and block
//! storage behind the single public surface the consensus and network
//! layers talk to.

use crate::block::{Block, BlockHeader};
use crate::error::{CoreError, Result};
use crate::traits::{BlockStorage, FeeChecker, NotificationSink, PenaltyDepositFinder, UtxoFinder};
use crate::transaction::{
    validate_transaction, Lock, LockType, Output, OutputType, Transaction, ValidationParams,
};
use crate::utxo::{Utxo, UtxoSet};
use crate::validator::{verify_block_signature, Enrollment, PreImageInfo, ValidatorInfo, ValidatorSet};
use solidus_common::ser::Writeable;
use solidus_common::{Amount, Hash, Height, Point, Signature};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Compile-time-immutable parameters captured at ledger construction.
#[derive(Debug, Clone)]
pub struct ConsensusParams {
    pub validator_cycle: u64,
    pub payout_period: u64,
    pub block_interval: u64,
    pub slash_penalty_amount: Amount,
    pub commons_budget_address: Lock,
    pub min_freeze_amount: Amount,
    pub stack_max_total_size: usize,
    pub stack_max_item_size: usize,
    /// Fixed per-block reward split among that block's signers.
    pub block_reward: Amount,
    /// Fixed per-block reward credited to the commons budget.
    pub commons_reward: Amount,
    pub genesis: Block,
}

impl ConsensusParams {
    fn validation_params(&self) -> ValidationParams {
        ValidationParams {
            min_freeze_amount: self.min_freeze_amount,
            stack_max_total_size: self.stack_max_total_size,
            stack_max_item_size: self.stack_max_item_size,
        }
    }
}

struct AcceptAnyFee;
impl FeeChecker for AcceptAnyFee {
    fn check_fee(&self, _tx: &Transaction, _unspent: Amount) -> Result<()> {
        Ok(())
    }
}

struct PoolFeeChecker {
    min_fee_pct: u8,
    pool_average_rate: u64,
}

impl FeeChecker for PoolFeeChecker {
    fn check_fee(&self, tx: &Transaction, unspent: Amount) -> Result<()> {
        let size = encoded_len(tx).max(1) as u64;
        let rate = unspent.value() / size;
        let required = self.pool_average_rate * u64::from(self.min_fee_pct) / 100;
        if rate < required {
            return Err(CoreError::FeeBelowMinimum { rate, required });
        }
        Ok(())
    }
}

fn encoded_len<T: Writeable>(value: &T) -> usize {
    let mut writer = solidus_common::ser::Writer::new();
    value.write(&mut writer);
    writer.into_bytes().len()
}

/// A candidate next block's data, as handed to `validate_consensus_data`
/// and `build_block` by the nomination layer.
#[derive(Debug, Clone)]
pub struct CandidateData {
    pub txs: Vec<Transaction>,
    pub enrollments: Vec<Enrollment>,
    pub missing_validators: Vec<usize>,
}

pub struct Ledger<S: BlockStorage> {
    params: ConsensusParams,
    storage: S,
    utxo_set: UtxoSet,
    validators: ValidatorSet,
    last_block: Block,
    pool: Vec<Transaction>,
    fee_accumulator: HashMap<Height, Amount>,
    coinbase_cache: HashMap<Height, Transaction>,
}

impl<S: BlockStorage> Ledger<S> {
    /// Opens or creates `storage` and replays every already-committed block
    /// to rebuild the in-memory UTXO and validator state.
    pub fn new(params: ConsensusParams, mut storage: S) -> Result<Self> {
        storage.load(&params.genesis)?;
        let genesis = params.genesis.clone();
        let tip_height = storage
            .read_last()?
            .map_or(0, |b| b.header.height);

        let mut utxo_set = UtxoSet::new();
        utxo_set.apply_block(&genesis, 0, params.validator_cycle)?;

        let mut ledger = Self {
            params,
            storage,
            utxo_set,
            validators: ValidatorSet::new(),
            last_block: genesis.clone(),
            pool: Vec::new(),
            fee_accumulator: HashMap::new(),
            coinbase_cache: HashMap::new(),
        };

        // The genesis block bootstraps its own enrollments directly: there
        // is no prior block whose signers could have vouched for them.
        for enrollment in &genesis.header.enrollments {
            let utxo = ledger
                .utxo_set
                .peek(&enrollment.utxo_key)
                .ok_or_else(|| CoreError::UnknownEnrollmentUtxo(enrollment.utxo_key.to_string()))?;
            let public_key = Point::from_bytes(&utxo.output.lock.bytes)?;
            ledger
                .validators
                .enroll(enrollment, genesis.header.height, public_key, utxo.output.value);
        }

        for height in 1..=tip_height {
            if let Some(block) = ledger.storage.read_by_height(height)? {
                ledger.apply_block_state(&block)?;
                ledger.last_block = block;
            }
        }
        Ok(ledger)
    }

    #[must_use]
    pub fn get_block_height(&self) -> Height {
        self.last_block.header.height
    }

    #[must_use]
    pub fn get_last_block(&self) -> Block {
        self.last_block.clone()
    }

    pub fn get_blocks_from(&self, height: Height) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        let mut h = height;
        while let Some(block) = self.storage.read_by_height(h)? {
            blocks.push(block);
            h += 1;
        }
        Ok(blocks)
    }

    pub fn get_transaction_by_hash(&self, hash: &Hash) -> Result<Option<Transaction>> {
        for block in self.get_blocks_from(0)? {
            if let Some(tx) = block.txs.into_iter().find(|t| t.hash() == *hash) {
                return Ok(Some(tx));
            }
        }
        Ok(self.pool.iter().find(|t| t.hash() == *hash).cloned())
    }

    /// Transaction hashes `candidates` references that this ledger doesn't
    /// yet have in the pool or a committed block.
    #[must_use]
    pub fn get_unknown_tx_hashes(&self, candidates: &[Hash]) -> Vec<Hash> {
        candidates
            .iter()
            .copied()
            .filter(|h| {
                self.pool.iter().all(|t| t.hash() != *h)
                    && self
                        .get_transaction_by_hash(h)
                        .ok()
                        .flatten()
                        .is_none()
            })
            .collect()
    }

    #[must_use]
    pub fn get_validators(&self, height: Height) -> Vec<ValidatorInfo> {
        self.validators.get_validators(height)
    }

    #[must_use]
    pub fn peek_utxo(&self, utxo_key: &Hash) -> Option<Utxo> {
        self.utxo_set.peek(utxo_key)
    }

    fn is_payout_block(&self, height: Height) -> bool {
        height >= 2 * self.params.payout_period && height % self.params.payout_period == 0
    }

    // -- mutation: blocks -------------------------------------------------

    pub fn accept_block(&mut self, block: Block, sink: &mut impl NotificationSink) -> Result<()> {
        self.validate_block(&block)?;
        self.storage.save_block(&block)?;

        let utxo_snapshot = self.utxo_set.clone();
        let validator_snapshot = self.validators.clone();

        let outcome = self.apply_block_state(&block);
        let validator_set_changed = match outcome {
            Ok(changed) => changed,
            Err(e) => {
                self.utxo_set = utxo_snapshot;
                self.validators = validator_snapshot;
                warn!(height = block.header.height, error = %e, "block application rolled back");
                return Err(e);
            }
        };

        if self.is_payout_block(block.header.height) {
            let cutoff = block.header.height.saturating_sub(self.params.payout_period);
            self.fee_accumulator.retain(|&h, _| h >= cutoff);
        }

        let accepted_hashes: Vec<Hash> = block.txs.iter().map(Transaction::hash).collect();
        self.pool
            .retain(|t| !accepted_hashes.contains(&t.hash()));

        self.last_block = block.clone();
        info!(height = block.header.height, "block accepted");
        sink.on_accepted_block(&block, validator_set_changed);
        Ok(())
    }

    fn apply_block_state(&mut self, block: &Block) -> Result<bool> {
        let mut changed = false;
        let active = self.validators.get_validators(block.header.height);

        for (idx, validator) in active.iter().enumerate() {
            let preimage = block.header.preimages.get(idx).copied().unwrap_or_else(Hash::init);
            if preimage.is_init() {
                self.validators.slash(&validator.utxo_key, block.header.height)?;
                changed = true;
            } else if self
                .validators
                .add_preimage(PreImageInfo {
                    utxo_key: validator.utxo_key,
                    hash: preimage,
                    height: block.header.height,
                })?
            {
                debug!(validator = %validator.utxo_key, "pre-image advanced");
            }
        }

        let mut fee_total = Amount::zero();
        for tx in &block.txs {
            if !tx.is_coinbase() {
                fee_total = fee_total
                    .checked_add(self.transaction_fee(tx)?)
                    .map_err(|e| CoreError::Amount(e.to_string()))?;
            }
        }
        self.fee_accumulator.insert(block.header.height, fee_total);

        self.utxo_set
            .apply_block(block, block.header.height, self.params.validator_cycle)?;

        for enrollment in &block.header.enrollments {
            let utxo = self
                .utxo_set
                .peek(&enrollment.utxo_key)
                .ok_or_else(|| CoreError::UnknownEnrollmentUtxo(enrollment.utxo_key.to_string()))?;
            let public_key = Point::from_bytes(&utxo.output.lock.bytes)?;
            self.validators
                .enroll(enrollment, block.header.height, public_key, utxo.output.value);
            changed = true;
        }

        Ok(changed)
    }

    fn transaction_fee(&self, tx: &Transaction) -> Result<Amount> {
        let mut input_sum = Amount::zero();
        let mut penalty_sum = Amount::zero();
        for input in &tx.inputs {
            let utxo = self
                .utxo_set
                .find(&input.utxo_ref)
                .ok_or_else(|| CoreError::UtxoNotFound(input.utxo_ref.to_string()))?;
            input_sum = input_sum
                .checked_add(utxo.output.value)
                .map_err(|e| CoreError::Amount(e.to_string()))?;
            if utxo.output.output_type == OutputType::Freeze {
                penalty_sum = penalty_sum
                    .checked_add(self.penalty_deposit(&input.utxo_ref))
                    .map_err(|e| CoreError::Amount(e.to_string()))?;
            }
        }
        let output_sum = Amount::sum(tx.outputs.iter().map(|o| o.value))
            .map_err(|e| CoreError::Amount(e.to_string()))?;
        input_sum
            .checked_add(penalty_sum)
            .and_then(|available| available.checked_sub(output_sum))
            .map_err(|e| CoreError::Amount(e.to_string()))
    }

    fn validate_block(&self, block: &Block) -> Result<()> {
        if block.header.height == 0 {
            if block.header.prev_block != Hash::init() {
                return Err(CoreError::UnknownParent);
            }
            block.check_transactions_sorted()?;
            return block.check_merkle_root();
        }

        if block.header.height != self.last_block.header.height + 1 {
            return Err(CoreError::HeightOutOfOrder(
                block.header.height,
                self.last_block.header.height,
            ));
        }
        if block.header.prev_block != self.last_block.hash() {
            return Err(CoreError::UnknownParent);
        }
        block.check_transactions_sorted()?;
        block.check_merkle_root()?;

        let active = self.validators.get_validators(block.header.height);
        if block.header.preimages.len() != active.len() {
            return Err(CoreError::PreImageCountMismatch(
                block.header.preimages.len(),
                active.len(),
            ));
        }
        for (idx, validator) in active.iter().enumerate() {
            let preimage = block.header.preimages[idx];
            if preimage.is_init() {
                continue;
            }
            match self
                .validators
                .known_preimage_at(&validator.utxo_key, block.header.height)
            {
                Some(known) if known == preimage => {}
                Some(_) => return Err(CoreError::PreImageMismatch),
                None => {
                    if !self
                        .validators
                        .verify_preimage(&validator.utxo_key, &preimage, block.header.height)
                    {
                        return Err(CoreError::PreImageMismatch);
                    }
                }
            }
        }

        let is_payout = self.is_payout_block(block.header.height);
        let coinbase_count = block.txs.iter().filter(|t| t.is_coinbase()).count();
        if is_payout && coinbase_count != 1 {
            return Err(CoreError::MissingCoinbase);
        }
        if !is_payout && coinbase_count != 0 {
            return Err(CoreError::SurplusCoinbase);
        }

        let mut finder = self.utxo_set.finder_with_double_spend_protection();
        for tx in &block.txs {
            if tx.is_coinbase() {
                continue;
            }
            validate_transaction(
                tx,
                &finder,
                block.header.height,
                &AcceptAnyFee,
                self,
                self.params.validation_params(),
            )?;
            for input in &tx.inputs {
                finder.consume(input.utxo_ref);
            }
        }

        verify_block_signature(&block.header, &active)
    }

    // -- mutation: transaction pool ---------------------------------------

    pub fn accept_transaction(
        &mut self,
        tx: Transaction,
        double_spend_threshold_pct: u8,
        min_fee_pct: u8,
    ) -> Result<()> {
        if tx.is_coinbase() {
            return Err(CoreError::MalformedCoinbase(
                "coinbase transactions are not submitted to the pool".into(),
            ));
        }
        let tx_hash = tx.hash();
        if self.pool.iter().any(|t| t.hash() == tx_hash) {
            return Err(CoreError::DuplicateInPool);
        }

        let conflicts: Vec<Transaction> = self
            .pool
            .iter()
            .filter(|pooled| {
                pooled
                    .inputs
                    .iter()
                    .any(|i| tx.inputs.iter().any(|j| j.utxo_ref == i.utxo_ref))
            })
            .cloned()
            .collect();

        if !conflicts.is_empty() {
            let incumbent_max_rate = conflicts.iter().map(|t| self.fee_rate(t)).max().unwrap_or(0);
            let candidate_rate = self.fee_rate(&tx);
            let required = incumbent_max_rate
                + incumbent_max_rate * u64::from(double_spend_threshold_pct) / 100;
            if candidate_rate <= required {
                return Err(CoreError::UnacceptableDoubleSpend);
            }
        }

        let fee_checker = PoolFeeChecker {
            min_fee_pct,
            pool_average_rate: self.pool_average_fee_rate(),
        };
        validate_transaction(
            &tx,
            &self.utxo_set,
            self.get_block_height(),
            &fee_checker,
            &*self,
            self.params.validation_params(),
        )?;

        if !conflicts.is_empty() {
            let conflict_hashes: Vec<Hash> = conflicts.iter().map(Transaction::hash).collect();
            self.pool.retain(|t| !conflict_hashes.contains(&t.hash()));
        }
        self.pool.push(tx);
        Ok(())
    }

    fn fee_rate(&self, tx: &Transaction) -> u64 {
        let fee = self.transaction_fee(tx).map(Amount::value).unwrap_or(0);
        let size = encoded_len(tx).max(1) as u64;
        fee / size
    }

    fn pool_average_fee_rate(&self) -> u64 {
        if self.pool.is_empty() {
            return 0;
        }
        let total: u64 = self.pool.iter().map(|t| self.fee_rate(t)).sum();
        total / self.pool.len() as u64
    }

    // -- mutation: consensus-layer hooks ----------------------------------

    pub fn add_preimage(&mut self, info: PreImageInfo) -> Result<bool> {
        self.validators.add_preimage(info)
    }

    pub fn add_enrollment(
        &mut self,
        enrollment: Enrollment,
        public_key: Point,
        height: Height,
        stake: Amount,
    ) {
        self.validators.enroll(&enrollment, height, public_key, stake);
    }

    pub fn update_block_multi_sig(&mut self, header: BlockHeader) -> Result<()> {
        self.storage.update_block_sig(
            header.height,
            &header.hash_for_signing(),
            header.signature,
            header.validators.clone(),
        )?;
        if header.height == self.last_block.header.height {
            self.last_block.header.signature = header.signature;
            self.last_block.header.validators = header.validators;
        }
        Ok(())
    }

    /// Bounds on a candidate's missing-validator list: `L` (known stale
    /// pre-images) must be a subset, `H` (the snapshot taken at nomination
    /// start) a superset.
    pub fn validate_consensus_data(
        &self,
        data: &CandidateData,
        initial_missing_validators: &[usize],
    ) -> Result<()> {
        let height = self.get_block_height() + 1;
        let active = self.validators.get_validators(height);

        let min_active = 1;
        if data.missing_validators.len() > active.len() {
            return Err(CoreError::TooManyMissingValidators(
                data.missing_validators.len(),
                active.len(),
            ));
        }
        // Available validator headroom is active count minus the claimed
        // missing set. This doesn't separately account for validators
        // expiring this round regardless of reveal, which may under-count
        // headroom; preserved as-is since correcting it is a consensus change.
        let avnb = active.len() - data.missing_validators.len();
        if avnb < min_active {
            return Err(CoreError::NotEnoughActiveValidators(avnb, min_active));
        }
        for &idx in &data.missing_validators {
            if idx >= active.len() {
                return Err(CoreError::SlashingBoundViolation(format!(
                    "index {idx} out of range"
                )));
            }
        }

        let lower_bound: Vec<usize> = active
            .iter()
            .enumerate()
            .filter(|(_, v)| {
                self.validators
                    .known_preimage_at(&v.utxo_key, height)
                    .is_none()
            })
            .map(|(idx, _)| idx)
            .collect();
        for idx in &lower_bound {
            if !data.missing_validators.contains(idx) {
                return Err(CoreError::SlashingBoundViolation(
                    "missing-validator set omits a known-stale index".into(),
                ));
            }
        }
        for idx in &data.missing_validators {
            if !initial_missing_validators.contains(idx) {
                return Err(CoreError::SlashingBoundViolation(
                    "missing-validator set exceeds the nomination-round snapshot".into(),
                ));
            }
        }

        for enrollment in &data.enrollments {
            let utxo = self
                .utxo_set
                .peek(&enrollment.utxo_key)
                .ok_or_else(|| CoreError::UnknownEnrollmentUtxo(enrollment.utxo_key.to_string()))?;
            if utxo.output.output_type != OutputType::Freeze {
                return Err(CoreError::UnknownEnrollmentUtxo(format!(
                    "{} is not a Freeze output",
                    enrollment.utxo_key
                )));
            }
        }
        for pair in data.enrollments.windows(2) {
            if pair[0].utxo_key >= pair[1].utxo_key {
                return Err(CoreError::EnrollmentsNotSorted);
            }
        }

        let mut finder = self.utxo_set.finder_with_double_spend_protection();
        for tx in &data.txs {
            if tx.is_coinbase() {
                continue;
            }
            validate_transaction(
                tx,
                &finder,
                height,
                &AcceptAnyFee,
                self,
                self.params.validation_params(),
            )?;
            for input in &tx.inputs {
                finder.consume(input.utxo_ref);
            }
        }

        Ok(())
    }

    /// Assembles the next block from a validated candidate: slashed
    /// positions get `Hash.init` in place of a pre-image.
    pub fn build_block(&mut self, data: CandidateData) -> Result<Block> {
        let height = self.get_block_height() + 1;
        let active = self.validators.get_validators(height);

        let mut preimages = Vec::with_capacity(active.len());
        for (idx, validator) in active.iter().enumerate() {
            if data.missing_validators.contains(&idx) {
                preimages.push(Hash::init());
            } else {
                preimages.push(
                    self.validators
                        .known_preimage_at(&validator.utxo_key, height)
                        .unwrap_or_else(Hash::init),
                );
            }
        }

        let mut txs = data.txs;
        if self.is_payout_block(height) {
            txs.insert(0, self.get_coinbase_tx(height)?);
        }
        txs.sort_by_key(Transaction::hash);

        let merkle_root = crate::block::merkle_root(&txs);
        let header = BlockHeader {
            prev_block: self.last_block.hash(),
            merkle_root,
            signature: Signature {
                r: Point::identity(),
                s: solidus_common::Scalar::zero(),
            },
            validators: vec![false; active.len()],
            height,
            preimages,
            enrollments: data.enrollments,
        };
        Ok(Block { header, txs })
    }

    /// Deterministic payout transaction for a payout height, built from the
    /// previous `PayoutPeriod` headers. Cached by height.
    pub fn get_coinbase_tx(&mut self, height: Height) -> Result<Transaction> {
        if let Some(tx) = self.coinbase_cache.get(&height) {
            return Ok(tx.clone());
        }
        if !self.is_payout_block(height) {
            return Err(CoreError::SurplusCoinbase);
        }

        let start = height.saturating_sub(self.params.payout_period);
        let mut rewards: HashMap<Hash, Amount> = HashMap::new();
        let mut commons_total = self.params.commons_reward;

        for h in start..height {
            let Some(header) = self.storage.read_by_height(h)?.map(|b| b.header) else {
                continue;
            };
            let active = self.validators.get_validators(h);
            let fee = self.fee_accumulator.get(&h).copied().unwrap_or(Amount::zero());
            let reward_pool = self
                .params
                .block_reward
                .checked_add(fee)
                .map_err(|e| CoreError::Amount(e.to_string()))?;

            let signer_count = header.validators.iter().filter(|b| **b).count() as u64;
            let slashed_count = active
                .iter()
                .enumerate()
                .filter(|(idx, _)| !header.validators.get(*idx).copied().unwrap_or(false))
                .count() as u64;

            commons_total = commons_total
                .checked_add(Amount::new(
                    slashed_count * self.params.slash_penalty_amount.value(),
                ))
                .map_err(|e| CoreError::Amount(e.to_string()))?;

            if signer_count == 0 {
                commons_total = commons_total
                    .checked_add(reward_pool)
                    .map_err(|e| CoreError::Amount(e.to_string()))?;
                continue;
            }

            // Shares are weighted by each signer's staked amount, with the
            // integer-division remainder routed to the commons budget.
            let signers: Vec<&ValidatorInfo> = active
                .iter()
                .enumerate()
                .filter(|(idx, _)| header.validators.get(*idx).copied().unwrap_or(false))
                .map(|(_, v)| v)
                .collect();
            let total_stake: u128 = signers.iter().map(|v| u128::from(v.stake.value())).sum();
            let pool = u128::from(reward_pool.value());

            let mut distributed: u128 = 0;
            if total_stake == 0 {
                commons_total = commons_total
                    .checked_add(reward_pool)
                    .map_err(|e| CoreError::Amount(e.to_string()))?;
            } else {
                for validator in &signers {
                    let share = pool * u128::from(validator.stake.value()) / total_stake;
                    distributed += share;
                    let entry = rewards.entry(validator.utxo_key).or_insert(Amount::zero());
                    *entry = entry
                        .checked_add(Amount::new(share as u64))
                        .map_err(|e| CoreError::Amount(e.to_string()))?;
                }
                let leftover = (pool - distributed) as u64;
                commons_total = commons_total
                    .checked_add(Amount::new(leftover))
                    .map_err(|e| CoreError::Amount(e.to_string()))?;
            }
        }

        let mut outputs = Vec::new();
        for (utxo_key, amount) in rewards {
            if amount.is_zero() {
                continue;
            }
            let lock = self
                .validators
                .get(&utxo_key)
                .map(|v| Lock::key(v.public_key.to_bytes()))
                .unwrap_or_else(|| Lock {
                    lock_type: LockType::KeyHash,
                    bytes: utxo_key.as_bytes().to_vec(),
                });
            outputs.push(Output {
                value: amount,
                lock,
                output_type: OutputType::Coinbase,
            });
        }
        if !commons_total.is_zero() {
            outputs.push(Output {
                value: commons_total,
                lock: self.params.commons_budget_address.clone(),
                output_type: OutputType::Coinbase,
            });
        }
        outputs.sort_by(|a, b| {
            let mut wa = solidus_common::ser::Writer::new();
            a.write(&mut wa);
            let mut wb = solidus_common::ser::Writer::new();
            b.write(&mut wb);
            wa.into_bytes().cmp(&wb.into_bytes())
        });

        let tx = Transaction {
            inputs: vec![crate::transaction::Input::coinbase(height)],
            outputs,
            payload: Vec::new(),
            lock_height: 0,
        };
        self.coinbase_cache.insert(height, tx.clone());
        Ok(tx)
    }
}

impl<S: BlockStorage> UtxoFinder for Ledger<S> {
    fn find(&self, utxo_key: &Hash) -> Option<Utxo> {
        self.utxo_set.peek(utxo_key)
    }
}

impl<S: BlockStorage> PenaltyDepositFinder for Ledger<S> {
    /// Melting a Freeze stake always forfeits the configured penalty,
    /// whether or not the validator had already been slashed.
    fn penalty_deposit(&self, _utxo_key: &Hash) -> Amount {
        self.params.slash_penalty_amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::merkle_root;
    use crate::storage::MemoryBlockStorage;
    use crate::transaction::{Input, Output, Unlock};
    use solidus_common::KeyPair;

    fn genesis_with_output(value: u64, pubkey: [u8; 32]) -> Block {
        let tx = Transaction {
            inputs: vec![Input::coinbase(0)],
            outputs: vec![Output {
                value: Amount::new(value),
                lock: Lock::key(pubkey),
                output_type: OutputType::Coinbase,
            }],
            payload: Vec::new(),
            lock_height: 0,
        };
        Block {
            header: BlockHeader {
                prev_block: Hash::init(),
                merkle_root: merkle_root(std::slice::from_ref(&tx)),
                signature: Signature {
                    r: Point::identity(),
                    s: solidus_common::Scalar::zero(),
                },
                validators: Vec::new(),
                height: 0,
                preimages: Vec::new(),
                enrollments: Vec::new(),
            },
            txs: vec![tx],
        }
    }

    fn params(genesis: Block) -> ConsensusParams {
        ConsensusParams {
            validator_cycle: 100,
            payout_period: 5,
            block_interval: 10,
            slash_penalty_amount: Amount::new(100),
            commons_budget_address: Lock::key([9u8; 32]),
            min_freeze_amount: Amount::new(40_000),
            stack_max_total_size: 16_384,
            stack_max_item_size: 1_024,
            block_reward: Amount::new(1_000),
            commons_reward: Amount::new(100),
            genesis,
        }
    }

    #[test]
    fn ledger_starts_at_genesis_height() {
        let kp = KeyPair::generate();
        let genesis = genesis_with_output(1000, kp.public_key().to_bytes());
        let ledger = Ledger::new(params(genesis), MemoryBlockStorage::new()).unwrap();
        assert_eq!(ledger.get_block_height(), 0);
        assert_eq!(ledger.get_blocks_from(0).unwrap().len(), 1);
    }

    #[test]
    fn accept_transaction_rejects_duplicates() {
        let kp = KeyPair::generate();
        let genesis = genesis_with_output(1000, kp.public_key().to_bytes());
        let genesis_tx_hash = genesis.txs[0].hash();
        let mut ledger = Ledger::new(params(genesis), MemoryBlockStorage::new()).unwrap();

        let utxo_key = solidus_common::OutPoint::new(genesis_tx_hash, 0).key();
        let message = {
            let spend = Transaction {
                inputs: vec![Input {
                    utxo_ref: utxo_key,
                    unlock: Unlock(Vec::new()),
                    unlock_age: 0,
                }],
                outputs: vec![Output {
                    value: Amount::new(900),
                    lock: Lock::key([2u8; 32]),
                    output_type: OutputType::Payment,
                }],
                payload: Vec::new(),
                lock_height: 0,
            };
            spend.signing_message(crate::transaction::SigHash::All, 0)
        };
        let sig = kp.sign(message.as_bytes());
        let mut unlock_bytes = sig.to_bytes().to_vec();
        unlock_bytes.push(0);
        unlock_bytes.extend_from_slice(&0u32.to_le_bytes());
        let spend = Transaction {
            inputs: vec![Input {
                utxo_ref: utxo_key,
                unlock: Unlock(unlock_bytes),
                unlock_age: 0,
            }],
            outputs: vec![Output {
                value: Amount::new(900),
                lock: Lock::key([2u8; 32]),
                output_type: OutputType::Payment,
            }],
            payload: Vec::new(),
            lock_height: 0,
        };

        ledger.accept_transaction(spend.clone(), 10, 0).unwrap();
        let err = ledger.accept_transaction(spend, 10, 0).unwrap_err();
        assert_eq!(err, CoreError::DuplicateInPool);
    }
}
