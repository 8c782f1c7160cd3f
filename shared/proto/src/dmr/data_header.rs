//! DMR PDU data header: BPTC(196,96) carriage with the masked CCITT-162
//! trailer.

use dv_edac::bits::{get_u24, set_u24};
use dv_edac::{bptc, crc};
use tracing::debug;

use super::{Dpf, DATA_HEADER_CRC_MASK};
use crate::{ProtoError, ProtoResult};

pub const HEADER_LENGTH_BYTES: usize = 12;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DataHeader {
    /// Group (true) or individual addressing.
    pub group: bool,
    /// Response requested.
    pub response_requested: bool,
    pub dpf: Option<Dpf>,
    pub sap: u8,
    pub dst_id: u32,
    pub src_id: u32,
    pub blocks_to_follow: u8,
    /// Full-message flag.
    pub full_message: bool,
    pub pad_count: u8,
    pub fsn: u8,
    pub ns: u8,
}

impl DataHeader {
    /// Decodes a BPTC-coded header burst.
    pub fn decode(data: &[u8]) -> ProtoResult<Self> {
        let mut header = [0u8; HEADER_LENGTH_BYTES];
        bptc::decode(data, &mut header);

        header[10] ^= DATA_HEADER_CRC_MASK[0];
        header[11] ^= DATA_HEADER_CRC_MASK[1];

        if !crc::check_ccitt162(&header) {
            debug!("DMR data header failed CRC CCITT-162 check");
            return Err(ProtoError::CrcMismatch);
        }

        let dpf = Dpf::from_bits(header[0] & 0x0F);
        if dpf.is_none() {
            return Err(ProtoError::HeaderInvalid);
        }

        Ok(Self {
            group: header[0] & 0x80 != 0,
            response_requested: header[0] & 0x40 != 0,
            dpf,
            sap: header[1] >> 4,
            pad_count: header[1] & 0x0F,
            dst_id: get_u24(&header, 2),
            src_id: get_u24(&header, 5),
            full_message: header[8] & 0x80 != 0,
            blocks_to_follow: header[8] & 0x7F,
            ns: (header[9] >> 4) & 0x07,
            fsn: header[9] & 0x0F,
        })
    }

    /// Encodes into a BPTC-coded header burst.
    pub fn encode(&self, data: &mut [u8]) {
        let mut header = [0u8; HEADER_LENGTH_BYTES];

        header[0] = (self.group as u8) << 7
            | (self.response_requested as u8) << 6
            | self.dpf.map(|d| d as u8).unwrap_or(0) & 0x0F;
        header[1] = (self.sap << 4) | (self.pad_count & 0x0F);
        set_u24(self.dst_id, &mut header, 2);
        set_u24(self.src_id, &mut header, 5);
        header[8] = (self.full_message as u8) << 7 | (self.blocks_to_follow & 0x7F);
        header[9] = (self.ns & 0x07) << 4 | (self.fsn & 0x0F);

        crc::add_ccitt162(&mut header);
        header[10] ^= DATA_HEADER_CRC_MASK[0];
        header[11] ^= DATA_HEADER_CRC_MASK[1];

        bptc::encode(&header, data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = DataHeader {
            group: true,
            dpf: Some(Dpf::Confirmed),
            sap: 0x04,
            dst_id: 0x00C351,
            src_id: 0x123456,
            blocks_to_follow: 5,
            full_message: true,
            ..Default::default()
        };

        let mut burst = [0u8; 33];
        header.encode(&mut burst);

        let decoded = DataHeader::decode(&burst).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn corrupted_crc_is_rejected() {
        let header = DataHeader {
            dpf: Some(Dpf::Unconfirmed),
            dst_id: 1,
            src_id: 2,
            blocks_to_follow: 1,
            ..Default::default()
        };

        let mut burst = [0u8; 33];
        header.encode(&mut burst);
        // more errors than BPTC can repair
        for b in burst.iter_mut().take(12) {
            *b ^= 0x55;
        }
        assert!(DataHeader::decode(&burst).is_err());
    }
}
