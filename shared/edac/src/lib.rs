//! Error detection and correction primitives shared by the DMR, P25 and
//! NXDN air interfaces: the CRC family, Reed-Solomon over GF(2^6),
//! Golay(24,12), BPTC(196,96), the rate 1/2 and 3/4 trellis codecs and the
//! K=5 convolutional codec.
//!
//! Everything here is stateless except [`convolution::Viterbi`], which keeps
//! its path-decision trace between `decode` calls.

pub mod bits;
pub mod bptc;
pub mod convolution;
pub mod crc;
pub mod golay;
pub mod hamming;
pub mod rs;
pub mod trellis;

use thiserror::Error;

pub type EdacResult<T> = Result<T, EdacError>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdacError {
    #[error("CRC mismatch")]
    CrcMismatch,

    #[error("Reed-Solomon correction capability exceeded")]
    ReedSolomonUncorrectable,

    #[error("trellis decode unrecoverable")]
    TrellisUnrecoverable,

    #[error("convolution decision trace overflow")]
    ConvolutionTraceOverflow,

    #[error("header invalid")]
    HeaderInvalid,
}
