use solidus_common::Error as CommonError;
use thiserror::Error;

/// Every fallible consensus-core operation returns this taxonomy, grouped
/// the way callers need to react: script/transaction failures reject a
/// pool insert or a block, consensus failures reject a candidate, storage
/// failures are fatal for the affected file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    // -- syntactic / script --------------------------------------------
    #[error("malformed script: {0}")]
    MalformedScript(String),

    #[error("unrecognized opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    #[error("stack overflow: {0}")]
    StackOverflow(String),

    #[error("wrong-size push: {0}")]
    WrongSizePush(String),

    #[error("dangling conditional in script")]
    DanglingConditional,

    #[error("script did not authorize: {0}")]
    ScriptNotAuthorized(String),

    // -- semantic transaction --------------------------------------------
    #[error("referenced UTXO not found: {0}")]
    UtxoNotFound(String),

    #[error("transaction has no inputs")]
    NoInputs,

    #[error("transaction has no outputs")]
    NoOutputs,

    #[error("inputs are not strictly monotonic by hash")]
    InputsNotSorted,

    #[error("outputs are not sorted")]
    OutputsNotSorted,

    #[error("output value is zero or otherwise invalid")]
    InvalidOutputValue,

    #[error("freeze output below minimum freeze amount")]
    BelowMinimumFreeze,

    #[error("lock_height {0} is in the future of height {1}")]
    LockHeightInFuture(u64, u64),

    #[error("UTXO is not yet unlocked: needs height {needed}, have {have}")]
    NotUnlockedForHeight { needed: u64, have: u64 },

    #[error("disallowed type mix in transaction: {0}")]
    DisallowedTypeMix(String),

    #[error("value conservation violated: inputs + deposits < outputs")]
    ConservationViolated,

    #[error("melted freeze input did not consume any penalty deposit")]
    PenaltyDepositNotConsumed,

    #[error("coinbase transaction is malformed: {0}")]
    MalformedCoinbase(String),

    #[error("amount arithmetic failed: {0}")]
    Amount(String),

    // -- signature --------------------------------------------------------
    #[error("invalid signature")]
    InvalidSignature,

    #[error("unexpected sig_hash flag")]
    WrongSigHash,

    #[error("public key does not decode to a point on the curve")]
    KeyNotOnCurve,

    #[error("multi-sig count out of range: m={m}, n={n}")]
    MultiSigCountViolation { m: usize, n: usize },

    #[error("signer majority not met: {signed} of {active} active validators")]
    MajorityNotMet { signed: usize, active: usize },

    // -- consensus --------------------------------------------------------
    #[error("active validator count {0} below minimum {1}")]
    NotEnoughActiveValidators(usize, usize),

    #[error("too many missing validators: {0} claimed, {1} active")]
    TooManyMissingValidators(usize, usize),

    #[error("missing-validator set violates bounds: {0}")]
    SlashingBoundViolation(String),

    #[error("enrollment references unknown UTXO: {0}")]
    UnknownEnrollmentUtxo(String),

    #[error("enrollments are not strictly monotonic by utxo key")]
    EnrollmentsNotSorted,

    #[error("missing coinbase transaction in payout block")]
    MissingCoinbase,

    #[error("surplus coinbase transaction in non-payout block")]
    SurplusCoinbase,

    #[error("pre-image does not match the committed chain")]
    PreImageMismatch,

    #[error("pre-image missing for active validator index {0}")]
    PreImageMissing(usize),

    #[error("preimages length {0} does not match active validator count {1}")]
    PreImageCountMismatch(usize, usize),

    #[error("block height {0} is not the successor of the current tip {1}")]
    HeightOutOfOrder(u64, u64),

    #[error("block references unknown previous block hash")]
    UnknownParent,

    #[error("block transactions are not strictly ordered by hash")]
    TransactionsNotSorted,

    // -- storage ------------------------------------------------------------
    #[error("checksum mismatch in block file: {0}")]
    ChecksumMismatch(String),

    #[error("storage indexes are inconsistent: {0}")]
    InconsistentIndex(String),

    #[error("height-order violation on save: expected {expected}, got {got}")]
    HeightOrderViolation { expected: u64, got: u64 },

    #[error("block not found: {0}")]
    BlockNotFound(String),

    #[error("storage io error: {0}")]
    Io(String),

    // -- pool -----------------------------------------------------------------
    #[error("transaction already in pool")]
    DuplicateInPool,

    #[error("fee below minimum: rate {rate} < required {required}")]
    FeeBelowMinimum { rate: u64, required: u64 },

    #[error("unacceptable double-spend: does not exceed incumbent fee rate by the required threshold")]
    UnacceptableDoubleSpend,

    #[error(transparent)]
    Common(#[from] CommonError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
