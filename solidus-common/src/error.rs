use thiserror::Error;

/// Errors from the shared primitives: hashing, Curve25519 point/scalar
/// decoding, Schnorr signing/verification, and the binary codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("point does not decode to a canonical curve point")]
    InvalidPoint,

    #[error("hash must be exactly 64 bytes, got {0}")]
    InvalidHashLength(usize),

    #[error("scalar is not canonically reduced")]
    InvalidScalar,

    #[error("signature is malformed: {0}")]
    InvalidSignature(String),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("amount addition overflowed")]
    AmountOverflow,

    #[error("amount subtraction underflowed")]
    AmountUnderflow,
}

/// Errors from the deterministic binary serializer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("length prefix {0} exceeds the {1} byte cap for this field")]
    LengthTooLarge(u64, usize),

    #[error("trailing bytes after decoding a value")]
    TrailingBytes,

    #[error("varint is not in canonical (minimal) form")]
    NonCanonicalVarInt,

    #[error("unknown tag byte {0} while decoding {1}")]
    UnknownTag(u8, &'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
