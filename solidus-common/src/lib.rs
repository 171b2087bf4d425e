pub mod crypto;
pub mod error;
pub mod hash;
pub mod ser;
pub mod types;

pub use crypto::{verify, KeyPair, Point, Scalar, Signature};
pub use error::{CodecError, Error, Result};
pub use hash::Hash;
pub use types::{Amount, Height, OutPoint};
