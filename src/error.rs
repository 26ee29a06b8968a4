use thiserror::Error;

/// Crate-wide error taxonomy (spec.md §7). Every public operation returns
/// one of these variants rather than panicking, even on attacker-controlled
/// input such as a malformed frame or a forged ciphertext.
#[derive(Error, Debug)]
pub enum PokerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("input must not be empty")]
    EmptyInput,

    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("index {index} out of bounds (size {size})")]
    OutOfBounds { index: u64, size: u64 },

    #[error("deck is not ready")]
    NotReady,

    #[error("deck has already started")]
    AlreadyStarted,

    #[error("handshake did not complete before the deadline")]
    HandshakeTimeout,

    #[error("a draw is already in progress for this index")]
    DrawInProgress,

    #[error("operation requires the counterparty's contribution first")]
    NeedsCounterparty,

    #[error("value is not available yet")]
    NotAvailable,

    #[error("card cannot be decrypted yet")]
    NotDecryptable,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("monotonicity violation: {0} was already set to a different value")]
    MonotonicityViolation(&'static str),

    #[error("integrity violation at index {index}: {reason}")]
    IntegrityViolation { index: usize, reason: String },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("invalid prime")]
    InvalidPrime,

    #[error("key generation failed")]
    KeyGenerationFailed,

    #[error("deck has quit")]
    Quit,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PokerError>;
