//! NXDN slow associated control channel. 26 information bits + CRC-6 +
//! 4 tail bits, rate 1/2 convolution punctured down to 60 bits and
//! interleaved 12 x 5. Four consecutive bursts carry one superframe of
//! link control.

use dv_edac::bits::{read_bit, write_bit};
use dv_edac::{convolution, crc};
use tracing::debug;

use crate::{ProtoError, ProtoResult};

pub const SACCH_LENGTH_BITS: usize = 26;
pub const SACCH_CRC_LENGTH_BITS: usize = 36;
pub const SACCH_CRC_LENGTH_BYTES: usize = 5;
pub const SACCH_FEC_LENGTH_BITS: usize = 60;
pub const SACCH_FEC_CONV_LENGTH_BITS: usize = 72;

#[inline]
fn interleave_index(i: usize) -> usize {
    (i % 5) * 12 + i / 5
}

#[inline]
fn is_punctured(i: usize) -> bool {
    i % 6 == 5
}

/// The 8-bit structure field: RAN plus the superframe fragment marker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SacchStructure {
    pub ran: u8,
    pub structure: u8,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sacch {
    data: [u8; SACCH_CRC_LENGTH_BYTES],
}

impl Sacch {
    pub fn decode(data: &[u8], offset: usize) -> ProtoResult<Self> {
        let mut buffer = [0u8; SACCH_FEC_LENGTH_BITS / 8 + 1];
        for i in 0..SACCH_FEC_LENGTH_BITS {
            let b = read_bit(data, interleave_index(i) + offset);
            write_bit(&mut buffer, i, b);
        }

        let mut puncture = [0u8; 90];
        let mut n = 0usize;
        for i in 0..SACCH_FEC_LENGTH_BITS {
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
        for _ in 0..(SACCH_CRC_LENGTH_BITS + 4) {
            let s0 = u16::from(puncture[k]);
            let s1 = u16::from(puncture[k + 1]);
            k += 2;
            conv.decode(s0, s1).map_err(|e| {
                debug!("SACCH failed to decode convolution");
                ProtoError::Edac(e)
            })?;
        }

        let mut out = Self::default();
        conv.chainback(&mut out.data, SACCH_CRC_LENGTH_BITS);

        if !crc::check_crc6(&out.data, SACCH_LENGTH_BITS) {
            debug!("SACCH failed CRC-6 check");
            return Err(ProtoError::CrcMismatch);
        }

        Ok(out)
    }

    pub fn encode(&self, data: &mut [u8], offset: usize) {
        let mut buffer = self.data;
        crc::add_crc6(&mut buffer, SACCH_LENGTH_BITS);

        let mut coded = [0u8; SACCH_FEC_CONV_LENGTH_BITS / 8];
        convolution::encode(&buffer, &mut coded, SACCH_CRC_LENGTH_BITS);

        let mut punctured = [0u8; SACCH_FEC_LENGTH_BITS / 8 + 1];
        let mut n = 0usize;
        for i in 0..SACCH_FEC_CONV_LENGTH_BITS {
            if !is_punctured(i) {
                let b = read_bit(&coded, i);
                write_bit(&mut punctured, n, b);
                n += 1;
            }
        }

        for i in 0..SACCH_FEC_LENGTH_BITS {
            let b = read_bit(&punctured, i);
            write_bit(data, interleave_index(i) + offset, b);
        }
    }

    pub fn structure(&self) -> SacchStructure {
        SacchStructure {
            ran: self.data[0] & 0x3F,
            structure: (self.data[0] >> 6) & 0x03,
        }
    }

    pub fn set_structure(&mut self, st: SacchStructure) {
        self.data[0] = (st.structure & 0x03) << 6 | (st.ran & 0x3F);
    }

    /// The 18 payload bits after the structure byte (one quarter of the
    /// superframe LC).
    pub fn payload(&self) -> [u8; 3] {
        [self.data[1], self.data[2], self.data[3] & 0xC0]
    }

    pub fn set_payload(&mut self, payload: &[u8; 3]) {
        self.data[1] = payload[0];
        self.data[2] = payload[1];
        self.data[3] = (self.data[3] & 0x3F) | (payload[2] & 0xC0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut sacch = Sacch::default();
        sacch.set_structure(SacchStructure { ran: 0x21, structure: 3 });
        sacch.set_payload(&[0xAB, 0xCD, 0x40]);

        let mut frame = [0u8; 10];
        sacch.encode(&mut frame, 0);

        let decoded = Sacch::decode(&frame, 0).unwrap();
        assert_eq!(decoded.structure(), SacchStructure { ran: 0x21, structure: 3 });
        assert_eq!(decoded.payload(), sacch.payload());
    }

    #[test]
    fn single_error_corrected() {
        let mut sacch = Sacch::default();
        sacch.set_structure(SacchStructure { ran: 0x05, structure: 0 });
        sacch.set_payload(&[0x12, 0x34, 0x80]);

        let mut frame = [0u8; 10];
        sacch.encode(&mut frame, 0);
        frame[2] ^= 0x20;

        let decoded = Sacch::decode(&frame, 0).unwrap();
        assert_eq!(decoded.payload(), sacch.payload());
    }
}
