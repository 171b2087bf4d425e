pub mod block;
pub mod error;
pub mod ledger;
pub mod script;
pub mod storage;
pub mod traits;
pub mod transaction;
pub mod utxo;
pub mod validator;

pub use block::{merkle_path, merkle_root, Block, BlockHeader};
pub use error::{CoreError, Result};
pub use ledger::{CandidateData, ConsensusParams, Ledger};
pub use storage::{MemoryBlockStorage, PersistentBlockStorage};
pub use traits::{BlockStorage, FeeChecker, NotificationSink, NullNotificationSink, PenaltyDepositFinder, UtxoFinder};
pub use transaction::{Input, Lock, LockType, Output, OutputType, SigHash, Transaction, Unlock, ValidationParams};
pub use utxo::{DoubleSpendFinder, Utxo, UtxoSet};
pub use validator::{verify_block_signature, Enrollment, PreImageInfo, ValidatorInfo, ValidatorSet};
