//! Error types for the wire codec and the protocol layers built on it.

use thiserror::Error;

/// Errors raised while reading or writing Hazel-framed bytes.
///
/// These never escape past the packet being parsed: the caller logs the
/// failure and drops that single datagram.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer underrun: requested {requested} bytes, {available} available")]
    BufferUnderrun { requested: usize, available: usize },

    #[error("end() called without a matching begin()")]
    UnbalancedFrame,

    #[error("message frame of {0} bytes exceeds the 16-bit length prefix")]
    FrameTooLarge(usize),

    #[error("string is not valid utf-8")]
    InvalidUtf8,

    #[error("variable-length integer longer than 5 bytes")]
    VarintOverflow,

    #[error("unknown packet opcode {0:#04x}")]
    UnknownOpcode(u8),

    #[error("unsupported game settings version {0}")]
    UnsupportedSettingsVersion(u8),
}

pub type CodecResult<T> = Result<T, CodecError>;
