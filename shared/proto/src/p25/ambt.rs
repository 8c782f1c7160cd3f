//! P25 alternate multi-block trunking PDU: a data header plus
//! `blocks_to_follow` 12-byte blocks whose concatenation is decoded as one
//! wide trunking block. The CRC-32 trailer covers the assembled user data.

use dv_edac::bits::{get_u24, set_u24};
use dv_edac::crc;
use tracing::debug;

use super::tsbk::{Tsbk, TsbkKind};
use super::*;
use crate::{ProtoError, ProtoResult};

pub const AMBT_HEADER_LENGTH_BYTES: usize = 12;
pub const AMBT_BLOCK_LENGTH_BYTES: usize = 12;

/// PDU format value for an alternate MBT.
pub const PDU_FMT_AMBT: u8 = 0x17;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AmbtHeader {
    pub ack_needed: bool,
    pub outbound: bool,
    pub format: u8,
    pub sap: u8,
    pub mfid: u8,
    /// Logical link ID; carries LRA + CFVA + SystemID for site broadcasts.
    pub llid: u32,
    pub blocks_to_follow: u8,
    pub opcode: u8,
    /// Motorola fields 8/9; RFSS and site for ADJ_STS_BCAST.
    pub field8: u8,
    pub field9: u8,
}

impl AmbtHeader {
    pub fn decode(data: &[u8]) -> ProtoResult<Self> {
        if data.len() < AMBT_HEADER_LENGTH_BYTES {
            return Err(ProtoError::Truncated);
        }

        let mut header = [0u8; AMBT_HEADER_LENGTH_BYTES];
        header.copy_from_slice(&data[..AMBT_HEADER_LENGTH_BYTES]);

        if !crc::check_ccitt162(&header) {
            debug!("AMBT header failed CRC CCITT-162 check");
            return Err(ProtoError::CrcMismatch);
        }

        let format = header[0] & 0x1F;
        if format != PDU_FMT_AMBT {
            return Err(ProtoError::HeaderInvalid);
        }

        Ok(Self {
            ack_needed: header[0] & 0x40 != 0,
            outbound: header[0] & 0x20 != 0,
            format,
            sap: header[1] & 0x3F,
            mfid: header[2],
            llid: get_u24(&header, 3),
            blocks_to_follow: header[6] & 0x7F,
            opcode: header[7] & 0x3F,
            field8: header[8],
            field9: header[9],
        })
    }

    pub fn encode(&self) -> [u8; AMBT_HEADER_LENGTH_BYTES] {
        let mut header = [0u8; AMBT_HEADER_LENGTH_BYTES];
        header[0] = (self.ack_needed as u8) << 6 | (self.outbound as u8) << 5 | PDU_FMT_AMBT;
        header[1] = self.sap & 0x3F;
        header[2] = self.mfid;
        set_u24(self.llid, &mut header, 3);
        header[6] = self.blocks_to_follow & 0x7F;
        header[7] = self.opcode & 0x3F;
        header[8] = self.field8;
        header[9] = self.field9;
        crc::add_ccitt162(&mut header);
        header
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ambt {
    pub header: AmbtHeader,
    /// Assembled PDU user data across all trailing blocks, without the
    /// CRC-32 trailer.
    pub user_data: Vec<u8>,
}

impl Ambt {
    /// Assembles `blocks_to_follow` blocks into continuous user data and
    /// validates the trailing CRC-32.
    pub fn decode(header_data: &[u8], blocks: &[u8]) -> ProtoResult<Self> {
        let header = AmbtHeader::decode(header_data)?;

        let wanted = usize::from(header.blocks_to_follow) * AMBT_BLOCK_LENGTH_BYTES;
        if blocks.len() < wanted || wanted < 4 {
            return Err(ProtoError::Truncated);
        }

        let assembled = &blocks[..wanted];
        if !crc::check_crc32(assembled) {
            debug!("AMBT user data failed CRC-32 check");
            return Err(ProtoError::CrcMismatch);
        }

        Ok(Self {
            header,
            user_data: assembled[..wanted - 4].to_vec(),
        })
    }

    /// Serializes header + blocks, padding the user data to whole blocks
    /// and appending the CRC-32 trailer.
    pub fn encode(&self) -> Vec<u8> {
        let payload_len = self.user_data.len() + 4;
        let blocks = payload_len.div_ceil(AMBT_BLOCK_LENGTH_BYTES);

        let mut header = self.header.clone();
        header.blocks_to_follow = blocks as u8;

        let mut out = Vec::with_capacity(AMBT_HEADER_LENGTH_BYTES + blocks * AMBT_BLOCK_LENGTH_BYTES);
        out.extend_from_slice(&header.encode());

        let mut body = vec![0u8; blocks * AMBT_BLOCK_LENGTH_BYTES];
        body[..self.user_data.len()].copy_from_slice(&self.user_data);
        {
            let crc_region = &mut body[..];
            // trailer goes at the very end of the padded block run
            crc::add_crc32(crc_region);
        }
        out.extend_from_slice(&body);
        out
    }

    /// Interprets the assembled user data as one wide trunking block: the
    /// first 8 bytes form the 64-bit payload of the header's opcode.
    pub fn decode_tsbk(&self) -> ProtoResult<Tsbk> {
        if self.user_data.len() < 8 {
            return Err(ProtoError::Truncated);
        }

        let mut value = 0u64;
        for &b in self.user_data.iter().take(8) {
            value = (value << 8) | u64::from(b);
        }

        let mut tsbk = Tsbk::decode(&raw_tsbk_bytes(self.header.opcode, self.header.mfid, value), true, true)?;

        // site broadcasts carry RFSS/site in the Motorola fields and
        // LRA + CFVA + SystemID in the LLID
        if self.header.opcode == TSBK_OSP_ADJ_STS_BCAST {
            if let TsbkKind::AdjStsBcast {
                ref mut rfss_id,
                ref mut site_id,
                ref mut lra,
                ref mut cfva,
                ref mut system_id,
                ..
            } = tsbk.kind
            {
                *rfss_id = self.header.field8;
                *site_id = self.header.field9;
                *lra = ((self.header.llid >> 16) & 0xFF) as u8;
                *cfva = ((self.header.llid >> 12) & 0x0F) as u8;
                *system_id = (self.header.llid & 0xFFF) as u16;
            }
        }

        Ok(tsbk)
    }
}

fn raw_tsbk_bytes(opcode: u8, mfid: u8, value: u64) -> [u8; 12] {
    let mut raw = [0u8; 12];
    raw[0] = 0x80 | (opcode & 0x3F);
    raw[1] = mfid;
    raw[2..10].copy_from_slice(&value.to_be_bytes());
    crc::add_ccitt162(&mut raw);
    raw
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = AmbtHeader {
            ack_needed: false,
            outbound: true,
            format: PDU_FMT_AMBT,
            sap: 0x3D,
            mfid: MFID_STANDARD,
            llid: 0x12F345,
            blocks_to_follow: 2,
            opcode: TSBK_OSP_ADJ_STS_BCAST,
            field8: 1,
            field9: 5,
        };

        let bytes = header.encode();
        assert_eq!(AmbtHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn multi_block_assembly() {
        let header = AmbtHeader {
            outbound: true,
            format: PDU_FMT_AMBT,
            sap: 0x3D,
            mfid: MFID_STANDARD,
            llid: 0,
            opcode: TSBK_IOSP_ACK_RSP,
            ..Default::default()
        };

        let user_data: Vec<u8> = (0..14u8).collect();
        let ambt = Ambt { header, user_data: user_data.clone() };

        let wire = ambt.encode();
        let (hdr, blocks) = wire.split_at(AMBT_HEADER_LENGTH_BYTES);
        let decoded = Ambt::decode(hdr, blocks).unwrap();

        // padding rounds the payload up to whole blocks
        assert_eq!(&decoded.user_data[..user_data.len()], user_data.as_slice());
        assert_eq!(decoded.header.blocks_to_follow, 2);
    }

    #[test]
    fn adj_sts_fields_ride_the_header() {
        let value: u64 = 0; // channel fields zero; identity comes from the header
        let header = AmbtHeader {
            outbound: true,
            format: PDU_FMT_AMBT,
            sap: 0x3D,
            mfid: MFID_STANDARD,
            llid: 0xA7_42F1, // LRA 0xA7, CFVA 0x4, SystemID 0x2F1
            opcode: TSBK_OSP_ADJ_STS_BCAST,
            field8: 2,
            field9: 9,
            ..Default::default()
        };

        let mut user_data = value.to_be_bytes().to_vec();
        user_data.extend_from_slice(&[0, 0, 0, 0]);
        let ambt = Ambt { header, user_data };

        let tsbk = ambt.decode_tsbk().unwrap();
        match tsbk.kind {
            TsbkKind::AdjStsBcast { lra, cfva, system_id, rfss_id, site_id, .. } => {
                assert_eq!(lra, 0xA7);
                assert_eq!(cfva, 0x4);
                assert_eq!(system_id, 0x2F1);
                assert_eq!(rfss_id, 2);
                assert_eq!(site_id, 9);
            }
            other => panic!("wrong kind: {other:?}"),
        }
    }

    #[test]
    fn corrupted_block_crc_is_rejected() {
        let header = AmbtHeader {
            format: PDU_FMT_AMBT,
            opcode: TSBK_IOSP_ACK_RSP,
            ..Default::default()
        };
        let ambt = Ambt { header, user_data: vec![1, 2, 3, 4, 5, 6, 7, 8] };

        let mut wire = ambt.encode();
        let len = wire.len();
        wire[len - 6] ^= 0x10;

        let (hdr, blocks) = wire.split_at(AMBT_HEADER_LENGTH_BYTES);
        assert!(Ambt::decode(hdr, blocks).is_err());
    }
}
