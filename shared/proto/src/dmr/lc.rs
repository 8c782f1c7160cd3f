//! DMR full link control: the 72-bit word carried by voice headers,
//! terminators and the embedded signalling path.

use dv_edac::bits::{get_u24, set_u24};

use super::Flco;

pub const LC_LENGTH_BYTES: usize = 9;

/// Full-link-control opcodes.
pub const FLCO_GROUP: u8 = 0x00;
pub const FLCO_PRIVATE: u8 = 0x03;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkControl {
    pub flco: Flco,
    pub fid: u8,
    pub src_id: u32,
    pub dst_id: u32,
    pub emergency: bool,
    pub privacy: bool,
    pub broadcast: bool,
    pub ovcm: bool,
    pub priority: u8,
}

impl LinkControl {
    pub fn group(src_id: u32, dst_id: u32) -> Self {
        Self {
            flco: Flco::Group,
            src_id,
            dst_id,
            ..Default::default()
        }
    }

    pub fn private(src_id: u32, dst_id: u32) -> Self {
        Self {
            flco: Flco::Private,
            src_id,
            dst_id,
            ..Default::default()
        }
    }

    /// Parses the 9 plain LC bytes (after any FEC carriage was unwound).
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < LC_LENGTH_BYTES {
            return None;
        }

        let flco_bits = bytes[0] & 0x3F;
        let flco = match flco_bits {
            FLCO_GROUP => Flco::Group,
            FLCO_PRIVATE => Flco::Private,
            _ => return None,
        };

        let service_opts = bytes[2];

        Some(Self {
            flco,
            fid: bytes[1],
            emergency: service_opts & 0x80 != 0,
            privacy: service_opts & 0x40 != 0,
            broadcast: service_opts & 0x08 != 0,
            ovcm: service_opts & 0x04 != 0,
            priority: service_opts & 0x03,
            dst_id: get_u24(bytes, 3),
            src_id: get_u24(bytes, 6),
        })
    }

    pub fn encode(&self, bytes: &mut [u8]) {
        debug_assert!(bytes.len() >= LC_LENGTH_BYTES);

        bytes[0] = match self.flco {
            Flco::Group => FLCO_GROUP,
            Flco::Private => FLCO_PRIVATE,
        };
        bytes[1] = self.fid;
        bytes[2] = (self.emergency as u8) << 7
            | (self.privacy as u8) << 6
            | (self.broadcast as u8) << 3
            | (self.ovcm as u8) << 2
            | (self.priority & 0x03);
        set_u24(self.dst_id, bytes, 3);
        set_u24(self.src_id, bytes, 6);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lc_round_trip() {
        let lc = LinkControl {
            flco: Flco::Private,
            fid: 0x10,
            src_id: 0x123456,
            dst_id: 0x00ABCD,
            emergency: true,
            priority: 2,
            ..Default::default()
        };

        let mut bytes = [0u8; LC_LENGTH_BYTES];
        lc.encode(&mut bytes);

        let decoded = LinkControl::decode(&bytes).unwrap();
        assert_eq!(decoded, lc);
    }

    #[test]
    fn unknown_flco_is_rejected() {
        let bytes = [0x20, 0, 0, 0, 0, 1, 0, 0, 2];
        assert!(LinkControl::decode(&bytes).is_none());
    }
}
