//! Transaction data model and the `accept_transaction`/`accept_block`
//! validation rules of §4.2: structural checks, per-input UTXO + script
//! checks, type-specific rules for Freeze/Payment/Coinbase, and value
//! conservation.

use crate::error::{CoreError, Result};
use crate::script;
use crate::traits::{FeeChecker, PenaltyDepositFinder, UtxoFinder};
use crate::utxo::Utxo;
use solidus_common::ser::{Readable, Reader, Writeable, Writer};
use solidus_common::{Amount, Hash, Height};

/// Configuration the transaction validator needs from the ledger: the
/// minimum freeze stake and the script engine's resource bounds.
#[derive(Debug, Clone, Copy)]
pub struct ValidationParams {
    pub min_freeze_amount: Amount,
    pub stack_max_total_size: usize,
    pub stack_max_item_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockType {
    Key,
    KeyHash,
    Script,
    Redeem,
}

impl Writeable for LockType {
    fn write(&self, writer: &mut Writer) {
        let tag = match self {
            LockType::Key => 0u8,
            LockType::KeyHash => 1,
            LockType::Script => 2,
            LockType::Redeem => 3,
        };
        writer.write_u8(tag);
    }
}

impl Readable for LockType {
    fn read(reader: &mut Reader) -> solidus_common::Result<Self> {
        Ok(match reader.read_u8()? {
            0 => LockType::Key,
            1 => LockType::KeyHash,
            2 => LockType::Script,
            3 => LockType::Redeem,
            other => {
                return Err(solidus_common::CodecError::UnknownTag(other, "lock type").into())
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Lock {
    pub lock_type: LockType,
    pub bytes: Vec<u8>,
}

impl Lock {
    #[must_use]
    pub fn key(pubkey: [u8; 32]) -> Self {
        Self {
            lock_type: LockType::Key,
            bytes: pubkey.to_vec(),
        }
    }

    #[must_use]
    pub fn key_hash(hash: Hash) -> Self {
        Self {
            lock_type: LockType::KeyHash,
            bytes: hash.as_bytes().to_vec(),
        }
    }

    /// Syntactic validity: non-empty and the right size for fixed-size lock
    /// types. `Script`/`Redeem` bytecode is only checked at runtime.
    #[must_use]
    pub fn is_syntactically_valid(&self, stack_max_item_size: usize) -> bool {
        if self.bytes.is_empty() {
            return false;
        }
        match self.lock_type {
            LockType::Key => self.bytes.len() == 32,
            LockType::KeyHash | LockType::Redeem => self.bytes.len() == 64,
            LockType::Script => self.bytes.len() <= stack_max_item_size,
        }
    }
}

impl Writeable for Lock {
    fn write(&self, writer: &mut Writer) {
        self.lock_type.write(writer);
        writer.write_var_bytes(&self.bytes);
    }
}

impl Readable for Lock {
    fn read(reader: &mut Reader) -> solidus_common::Result<Self> {
        let lock_type = LockType::read(reader)?;
        let bytes = reader.read_var_bytes(16_384)?;
        Ok(Self { lock_type, bytes })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Unlock(pub Vec<u8>);

impl Writeable for Unlock {
    fn write(&self, writer: &mut Writer) {
        writer.write_var_bytes(&self.0);
    }
}

impl Readable for Unlock {
    fn read(reader: &mut Reader) -> solidus_common::Result<Self> {
        Ok(Self(reader.read_var_bytes(16_384)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputType {
    Payment,
    Freeze,
    Coinbase,
}

impl Writeable for OutputType {
    fn write(&self, writer: &mut Writer) {
        let tag = match self {
            OutputType::Payment => 0u8,
            OutputType::Freeze => 1,
            OutputType::Coinbase => 2,
        };
        writer.write_u8(tag);
    }
}

impl Readable for OutputType {
    fn read(reader: &mut Reader) -> solidus_common::Result<Self> {
        Ok(match reader.read_u8()? {
            0 => OutputType::Payment,
            1 => OutputType::Freeze,
            2 => OutputType::Coinbase,
            other => {
                return Err(solidus_common::CodecError::UnknownTag(other, "output type").into())
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Output {
    pub value: Amount,
    pub lock: Lock,
    pub output_type: OutputType,
}

impl Writeable for Output {
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(self.value.value());
        self.lock.write(writer);
        self.output_type.write(writer);
    }
}

impl Readable for Output {
    fn read(reader: &mut Reader) -> solidus_common::Result<Self> {
        let value = Amount::new(reader.read_u64()?);
        let lock = Lock::read(reader)?;
        let output_type = OutputType::read(reader)?;
        Ok(Self {
            value,
            lock,
            output_type,
        })
    }
}

/// Which fields of the transaction a signature binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigHash {
    /// Binds every input, output, the payload, and `lock_height`.
    All,
    /// Binds everything except the inputs' outpoint references, so a
    /// signature can be produced before the spending inputs are finalized
    /// (off-chain channel updates, `CHECK_SEQ_SIG`).
    NoInput,
}

impl Writeable for SigHash {
    fn write(&self, writer: &mut Writer) {
        writer.write_u8(match self {
            SigHash::All => 0,
            SigHash::NoInput => 1,
        });
    }
}

impl Readable for SigHash {
    fn read(reader: &mut Reader) -> solidus_common::Result<Self> {
        Ok(match reader.read_u8()? {
            0 => SigHash::All,
            1 => SigHash::NoInput,
            other => {
                return Err(solidus_common::CodecError::UnknownTag(other, "sig_hash").into())
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Input {
    pub utxo_ref: Hash,
    pub unlock: Unlock,
    pub unlock_age: u32,
}

impl Input {
    /// The well-known input shape for a coinbase transaction: the UTXO
    /// reference field carries the block height instead of a real outpoint.
    #[must_use]
    pub fn coinbase(height: Height) -> Self {
        let mut bytes = [0u8; 64];
        bytes[..8].copy_from_slice(&height.to_le_bytes());
        Self {
            utxo_ref: Hash::from_bytes(bytes),
            unlock: Unlock(Vec::new()),
            unlock_age: 0,
        }
    }

    #[must_use]
    pub fn is_coinbase_input(&self, height: Height) -> bool {
        *self == Self::coinbase(height)
    }
}

impl Writeable for Input {
    fn write(&self, writer: &mut Writer) {
        self.utxo_ref.write(writer);
        self.unlock.write(writer);
        writer.write_u32(self.unlock_age);
    }
}

impl Readable for Input {
    fn read(reader: &mut Reader) -> solidus_common::Result<Self> {
        let utxo_ref = Hash::read(reader)?;
        let unlock = Unlock::read(reader)?;
        let unlock_age = reader.read_u32()?;
        Ok(Self {
            utxo_ref,
            unlock,
            unlock_age,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transaction {
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub payload: Vec<u8>,
    pub lock_height: Height,
}

impl Transaction {
    #[must_use]
    pub fn hash(&self) -> Hash {
        let mut writer = Writer::new();
        self.write(&mut writer);
        Hash::digest(&writer.into_bytes())
    }

    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        !self.outputs.is_empty()
            && self
                .outputs
                .iter()
                .all(|o| o.output_type == OutputType::Coinbase)
    }

    /// The message a `Key`/`KeyHash`/script signature binds, per `sig_hash`.
    /// `SigHash::NoInput` omits the outpoint references so the signature
    /// survives before the spending inputs are chosen.
    #[must_use]
    pub fn signing_message(&self, sig_hash: SigHash, input_idx: usize) -> Hash {
        let mut writer = Writer::new();
        writer.write_varint(self.inputs.len() as u64);
        for input in &self.inputs {
            if matches!(sig_hash, SigHash::All) {
                input.utxo_ref.write(&mut writer);
            }
            writer.write_u32(input.unlock_age);
        }
        writer.write_vec(&self.outputs);
        writer.write_var_bytes(&self.payload);
        writer.write_u64(self.lock_height);
        sig_hash.write(&mut writer);
        writer.write_u32(input_idx as u32);
        Hash::digest(&writer.into_bytes())
    }

    /// An off-chain update's binding message: `challenge(tx, NoInput,
    /// input_idx) || sequence`, for `CHECK_SEQ_SIG`/`VERIFY_SEQ_SIG`.
    #[must_use]
    pub fn sequence_signing_message(&self, input_idx: usize, sequence: u64) -> Hash {
        let challenge = self.signing_message(SigHash::NoInput, input_idx);
        Hash::digest_parts(&[challenge.as_bytes(), &sequence.to_le_bytes()])
    }

    fn check_structure(&self, height: Height, is_coinbase: bool) -> Result<()> {
        if !is_coinbase && self.inputs.is_empty() {
            return Err(CoreError::NoInputs);
        }
        if self.outputs.is_empty() {
            return Err(CoreError::NoOutputs);
        }
        if self.lock_height > height {
            return Err(CoreError::LockHeightInFuture(self.lock_height, height));
        }
        for pair in self.inputs.windows(2) {
            if pair[0].utxo_ref >= pair[1].utxo_ref {
                return Err(CoreError::InputsNotSorted);
            }
        }
        for pair in self.outputs.windows(2) {
            if encode(&pair[0]) > encode(&pair[1]) {
                return Err(CoreError::OutputsNotSorted);
            }
        }
        for output in &self.outputs {
            if !output.value.is_valid_output_value() {
                return Err(CoreError::InvalidOutputValue);
            }
            if !output.lock.is_syntactically_valid(usize::from(u16::MAX)) {
                return Err(CoreError::MalformedScript(
                    "output lock is syntactically invalid".into(),
                ));
            }
        }
        Ok(())
    }
}

fn encode<T: Writeable>(value: &T) -> Vec<u8> {
    let mut writer = Writer::new();
    value.write(&mut writer);
    writer.into_bytes()
}

impl Writeable for Transaction {
    fn write(&self, writer: &mut Writer) {
        writer.write_vec(&self.inputs);
        writer.write_vec(&self.outputs);
        writer.write_var_bytes(&self.payload);
        writer.write_u64(self.lock_height);
    }
}

impl Readable for Transaction {
    fn read(reader: &mut Reader) -> Result<Self> {
        let inputs = reader.read_vec(10_000)?;
        let outputs = reader.read_vec(10_000)?;
        let payload = reader.read_var_bytes(1_048_576)?;
        let lock_height = reader.read_u64()?;
        Ok(Self {
            inputs,
            outputs,
            payload,
            lock_height,
        })
    }
}

/// Validates `tx` against `height` and the supplied collaborators, per the
/// ordering in §4.2. Each step short-circuits on the first failure.
pub fn validate_transaction(
    tx: &Transaction,
    utxo_finder: &dyn UtxoFinder,
    height: Height,
    fee_checker: &dyn FeeChecker,
    penalty_finder: &dyn PenaltyDepositFinder,
    params: ValidationParams,
) -> Result<()> {
    let is_coinbase = tx.is_coinbase();
    tx.check_structure(height, is_coinbase)?;

    if is_coinbase {
        if tx.inputs.len() != 1 || !tx.inputs[0].is_coinbase_input(height) {
            return Err(CoreError::MalformedCoinbase(
                "coinbase must have exactly one Input(height)".into(),
            ));
        }
        if !tx.payload.is_empty() {
            return Err(CoreError::MalformedCoinbase(
                "coinbase may not carry a data payload".into(),
            ));
        }
        return Ok(());
    }

    let mut input_sum = Amount::zero();
    let mut penalty_sum = Amount::zero();
    let mut any_freeze_input = false;
    let mut all_freeze_inputs = true;

    for (idx, input) in tx.inputs.iter().enumerate() {
        let utxo = utxo_finder
            .find(&input.utxo_ref)
            .ok_or_else(|| CoreError::UtxoNotFound(input.utxo_ref.to_string()))?;

        let required = utxo
            .unlock_height
            .checked_add(u64::from(input.unlock_age))
            .ok_or_else(|| CoreError::Amount("unlock height overflow".into()))?;
        if height < required {
            return Err(CoreError::NotUnlockedForHeight {
                needed: required,
                have: height,
            });
        }

        input_sum = input_sum
            .checked_add(utxo.output.value)
            .map_err(|e| CoreError::Amount(e.to_string()))?;

        let is_freeze = utxo.output.output_type == OutputType::Freeze;
        any_freeze_input |= is_freeze;
        all_freeze_inputs &= is_freeze;
        if is_freeze {
            let deposit = penalty_finder.penalty_deposit(&input.utxo_ref);
            penalty_sum = penalty_sum
                .checked_add(deposit)
                .map_err(|e| CoreError::Amount(e.to_string()))?;
        }

        script::run_lock(
            &utxo.output.lock,
            &input.unlock,
            tx,
            idx,
            params.stack_max_total_size,
            params.stack_max_item_size,
        )
        .map_err(|e| CoreError::ScriptNotAuthorized(e.to_string()))?;
    }

    if tx.outputs.iter().any(|o| o.output_type == OutputType::Freeze) {
        let payment_refunds = tx
            .outputs
            .iter()
            .filter(|o| o.output_type == OutputType::Payment)
            .count();
        if payment_refunds > 1 {
            return Err(CoreError::DisallowedTypeMix(
                "at most one Payment refund output allowed alongside a Freeze output".into(),
            ));
        }
        if tx
            .outputs
            .iter()
            .filter(|o| o.output_type == OutputType::Freeze)
            .any(|o| o.lock.lock_type != LockType::Key)
        {
            return Err(CoreError::DisallowedTypeMix(
                "Freeze outputs must use a Key lock".into(),
            ));
        }
        if !tx.payload.is_empty() {
            return Err(CoreError::DisallowedTypeMix(
                "a transaction producing Freeze outputs may not carry a data payload".into(),
            ));
        }
        if any_freeze_input {
            return Err(CoreError::DisallowedTypeMix(
                "cannot re-freeze an already-Freeze input".into(),
            ));
        }
        if input_sum < params.min_freeze_amount {
            return Err(CoreError::BelowMinimumFreeze);
        }
    }

    if any_freeze_input && !all_freeze_inputs {
        return Err(CoreError::DisallowedTypeMix(
            "melting requires every input to be a Freeze input".into(),
        ));
    }

    let output_sum = Amount::sum(tx.outputs.iter().map(|o| o.value))
        .map_err(|e| CoreError::Amount(e.to_string()))?;
    let available = input_sum
        .checked_add(penalty_sum)
        .map_err(|e| CoreError::Amount(e.to_string()))?;
    if available < output_sum {
        return Err(CoreError::ConservationViolated);
    }
    let unspent = available
        .checked_sub(output_sum)
        .map_err(|e| CoreError::Amount(e.to_string()))?;

    if all_freeze_inputs && any_freeze_input && !penalty_sum.is_zero() {
        let returned = Amount::sum(
            tx.outputs
                .iter()
                .filter(|o| o.output_type == OutputType::Payment)
                .map(|o| o.value),
        )
        .map_err(|e| CoreError::Amount(e.to_string()))?;
        if returned == available {
            return Err(CoreError::PenaltyDepositNotConsumed);
        }
    }

    fee_checker.check_fee(tx, unspent)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use solidus_common::KeyPair;

    struct AlwaysFound(Utxo);
    impl UtxoFinder for AlwaysFound {
        fn find(&self, _utxo_key: &Hash) -> Option<Utxo> {
            Some(self.0.clone())
        }
    }
    struct NoFee;
    impl FeeChecker for NoFee {
        fn check_fee(&self, _tx: &Transaction, _unspent: Amount) -> Result<()> {
            Ok(())
        }
    }
    struct NoPenalty;
    impl PenaltyDepositFinder for NoPenalty {
        fn penalty_deposit(&self, _utxo_key: &Hash) -> Amount {
            Amount::zero()
        }
    }
    struct FixedPenalty(Amount);
    impl PenaltyDepositFinder for FixedPenalty {
        fn penalty_deposit(&self, _utxo_key: &Hash) -> Amount {
            self.0
        }
    }

    fn params() -> ValidationParams {
        ValidationParams {
            min_freeze_amount: Amount::new(40_000),
            stack_max_total_size: 16_384,
            stack_max_item_size: 1_024,
        }
    }

    #[test]
    fn coinbase_transaction_is_structurally_recognized() {
        let tx = Transaction {
            inputs: vec![Input::coinbase(5)],
            outputs: vec![Output {
                value: Amount::new(1),
                lock: Lock::key([1u8; 32]),
                output_type: OutputType::Coinbase,
            }],
            payload: Vec::new(),
            lock_height: 0,
        };
        assert!(tx.is_coinbase());
        let utxo = Utxo {
            unlock_height: 0,
            output: Output {
                value: Amount::new(1),
                lock: Lock::key([0u8; 32]),
                output_type: OutputType::Payment,
            },
        };
        assert!(
            validate_transaction(&tx, &AlwaysFound(utxo), 5, &NoFee, &NoPenalty, params()).is_ok()
        );
    }

    #[test]
    fn zero_value_output_is_rejected() {
        let tx = Transaction {
            inputs: vec![Input {
                utxo_ref: Hash::digest(b"in"),
                unlock: Unlock(vec![0u8; 65]),
                unlock_age: 0,
            }],
            outputs: vec![Output {
                value: Amount::zero(),
                lock: Lock::key([1u8; 32]),
                output_type: OutputType::Payment,
            }],
            payload: Vec::new(),
            lock_height: 0,
        };
        let utxo = Utxo {
            unlock_height: 0,
            output: Output {
                value: Amount::new(10),
                lock: Lock::key([0u8; 32]),
                output_type: OutputType::Payment,
            },
        };
        let err = validate_transaction(&tx, &AlwaysFound(utxo), 0, &NoFee, &NoPenalty, params())
            .unwrap_err();
        assert_eq!(err, CoreError::InvalidOutputValue);
    }

    fn melt_tx(owner: &KeyPair, returned_value: u64) -> Transaction {
        let mut tx = Transaction {
            inputs: vec![Input {
                utxo_ref: Hash::digest(b"frozen-stake"),
                unlock: Unlock(Vec::new()),
                unlock_age: 0,
            }],
            outputs: vec![Output {
                value: Amount::new(returned_value),
                lock: Lock::key([9u8; 32]),
                output_type: OutputType::Payment,
            }],
            payload: Vec::new(),
            lock_height: 0,
        };
        let message = tx.signing_message(SigHash::All, 0);
        let sig = owner.sign(message.as_bytes());
        let mut unlock = sig.to_bytes().to_vec();
        unlock.push(0); // SigHash::All
        unlock.extend_from_slice(&0u32.to_le_bytes());
        tx.inputs[0].unlock = Unlock(unlock);
        tx
    }

    fn frozen_utxo(owner: &KeyPair, value: u64) -> Utxo {
        Utxo {
            unlock_height: 0,
            output: Output {
                value: Amount::new(value),
                lock: Lock::key(owner.public_key().to_bytes()),
                output_type: OutputType::Freeze,
            },
        }
    }

    #[test]
    fn melting_that_forfeits_the_penalty_deposit_is_accepted() {
        let owner = KeyPair::generate();
        let utxo = frozen_utxo(&owner, 100);
        // Returns input_sum (100), forfeiting the 20-value penalty deposit.
        let tx = melt_tx(&owner, 100);
        assert!(validate_transaction(
            &tx,
            &AlwaysFound(utxo),
            0,
            &NoFee,
            &FixedPenalty(Amount::new(20)),
            params()
        )
        .is_ok());
    }

    #[test]
    fn melting_that_keeps_the_penalty_deposit_is_rejected() {
        let owner = KeyPair::generate();
        let utxo = frozen_utxo(&owner, 100);
        // Returns the full available amount (120), forfeiting nothing.
        let tx = melt_tx(&owner, 120);
        let err = validate_transaction(
            &tx,
            &AlwaysFound(utxo),
            0,
            &NoFee,
            &FixedPenalty(Amount::new(20)),
            params(),
        )
        .unwrap_err();
        assert_eq!(err, CoreError::PenaltyDepositNotConsumed);
    }
}
