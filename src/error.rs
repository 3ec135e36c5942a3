use thiserror::Error;

/// Uniform error taxonomy for every public decode/read operation in this crate.
///
/// Internal, purely-structural byte-level parsers (the `FromBytesLE`/`FromBytes`
/// impls, and the innermost VDEV sector primitives inherited from the reference
/// implementation) still return `Option`/`Result<T, ()>`, since a short read
/// there is not yet attributable to one of these kinds; callers at the DMU/ZAP/
/// block-pointer layer convert into this enum with context.
#[derive(Error, Debug)]
pub enum ZfsError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("checksum mismatch: expected {expected:x?}, got {actual:x?}")]
    ChecksumMismatch { expected: [u64; 4], actual: [u64; 4] },

    #[error("i/o error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, ZfsError>;
