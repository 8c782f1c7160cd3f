//! NXDN fast associated control channel. 80 information bits + CRC-12 +
//! 4 tail bits, rate 1/2 convolution punctured down to 144 bits and
//! interleaved 9 x 16.

use dv_edac::bits::{read_bit, write_bit};
use dv_edac::{convolution, crc};
use tracing::debug;

use crate::{ProtoError, ProtoResult};

pub const FACCH1_LENGTH_BITS: usize = 80;
pub const FACCH1_CRC_LENGTH_BITS: usize = 96;
pub const FACCH1_CRC_LENGTH_BYTES: usize = 12;
pub const FACCH1_FEC_LENGTH_BITS: usize = 144;
pub const FACCH1_FEC_CONV_LENGTH_BITS: usize = 192;

#[inline]
fn interleave_index(i: usize) -> usize {
    (i % 16) * 9 + i / 16
}

#[inline]
fn is_punctured(i: usize) -> bool {
    i % 4 == 1
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Facch1 {
    data: [u8; FACCH1_CRC_LENGTH_BYTES],
}

impl Facch1 {
    /// Decodes the 144-bit FEC field starting at `offset` bits into `data`.
    pub fn decode(data: &[u8], offset: usize) -> ProtoResult<Self> {
        // deinterleave
        let mut buffer = [0u8; FACCH1_FEC_LENGTH_BITS / 8];
        for i in 0..FACCH1_FEC_LENGTH_BITS {
            let b = read_bit(data, interleave_index(i) + offset);
            write_bit(&mut buffer, i, b);
        }

        // depuncture: re-insert a soft "unknown" at every removed position
        let mut puncture = [0u8; 210];
        let mut n = 0usize;
        for i in 0..FACCH1_FEC_LENGTH_BITS {
            if is_punctured(n) {
                puncture[n] = 1;
                n += 1;
            }
            puncture[n] = if read_bit(&buffer, i) { 2 } else { 0 };
            n += 1;
        }
        for _ in 0..8 {
            puncture[n] = 0;
            n += 1;
        }

        let mut conv = convolution::Viterbi::new();
        conv.start();

        let mut k = 0usize;
        for _ in 0..(FACCH1_CRC_LENGTH_BITS + 4) {
            let s0 = u16::from(puncture[k]);
            let s1 = u16::from(puncture[k + 1]);
            k += 2;
            conv.decode(s0, s1).map_err(|e| {
                debug!("FACCH1 failed to decode convolution");
                ProtoError::Edac(e)
            })?;
        }

        let mut out = Self::default();
        conv.chainback(&mut out.data, FACCH1_CRC_LENGTH_BITS);

        if !crc::check_crc12(&out.data, FACCH1_LENGTH_BITS) {
            debug!("FACCH1 failed CRC-12 check");
            return Err(ProtoError::CrcMismatch);
        }

        Ok(out)
    }

    /// Encodes into the 144-bit FEC field starting at `offset` bits of
    /// `data`.
    pub fn encode(&self, data: &mut [u8], offset: usize) {
        let mut buffer = self.data;
        crc::add_crc12(&mut buffer, FACCH1_LENGTH_BITS);

        let mut coded = [0u8; FACCH1_FEC_CONV_LENGTH_BITS / 8];
        convolution::encode(&buffer, &mut coded, FACCH1_CRC_LENGTH_BITS);

        // puncture
        let mut punctured = [0u8; FACCH1_FEC_LENGTH_BITS / 8];
        let mut n = 0usize;
        for i in 0..FACCH1_FEC_CONV_LENGTH_BITS {
            if !is_punctured(i) {
                let b = read_bit(&coded, i);
                write_bit(&mut punctured, n, b);
                n += 1;
            }
        }

        // interleave
        for i in 0..FACCH1_FEC_LENGTH_BITS {
            let b = read_bit(&punctured, i);
            write_bit(data, interleave_index(i) + offset, b);
        }
    }

    /// The 80 payload bits (10 bytes).
    pub fn payload(&self) -> &[u8] {
        &self.data[..FACCH1_LENGTH_BITS / 8]
    }

    pub fn set_payload(&mut self, payload: &[u8]) {
        self.data[..FACCH1_LENGTH_BITS / 8].copy_from_slice(&payload[..FACCH1_LENGTH_BITS / 8]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut facch = Facch1::default();
        facch.set_payload(&[0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF, 0x5A, 0xA5]);

        let mut frame = [0u8; 48];
        facch.encode(&mut frame, 9);

        let decoded = Facch1::decode(&frame, 9).unwrap();
        assert_eq!(decoded.payload(), facch.payload());
    }

    #[test]
    fn flipped_bit_still_decodes() {
        let mut facch = Facch1::default();
        facch.set_payload(&[0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);

        let mut frame = [0u8; 48];
        facch.encode(&mut frame, 0);
        frame[3] ^= 0x08;

        let decoded = Facch1::decode(&frame, 0).unwrap();
        assert_eq!(decoded.payload(), facch.payload());
    }
}
