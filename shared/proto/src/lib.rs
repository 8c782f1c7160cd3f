//! Frame primitives and link-control factories for the three air
//! interfaces. Each interface module pairs the low-level frame pieces
//! (sync, headers, FEC carriage) with a tagged-variant factory for its
//! signalling blocks.

pub mod dmr;
pub mod nxdn;
pub mod p25;

use thiserror::Error;

pub type ProtoResult<T> = Result<T, ProtoError>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtoError {
    #[error("codec failure: {0}")]
    Edac(#[from] dv_edac::EdacError),

    #[error("CRC mismatch")]
    CrcMismatch,

    #[error("header invalid")]
    HeaderInvalid,

    #[error("unknown opcode {opcode:#04x} (mfid {mfid:#04x})")]
    UnknownOpcode { opcode: u8, mfid: u8 },

    #[error("required site identity fields are zero")]
    InvalidSiteIdentity,

    #[error("frame too short")]
    Truncated,
}
