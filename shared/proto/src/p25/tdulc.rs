//! P25 terminator data unit with link control. The 72-bit LC word rides
//! RS(24,12,13); each 12-bit group of the 144-bit RS codeword is then
//! Golay(24,12) protected, giving the 288-bit on-air field.

use dv_core::site::SiteData;
use dv_edac::bits::{get_u24, read_bit, set_u24, write_bit};
use dv_edac::{golay, rs};
use tracing::debug;

use super::*;
use crate::{ProtoError, ProtoResult};

pub const TDULC_FEC_LENGTH_BYTES: usize = 36;
const RS_LENGTH_BYTES: usize = 18;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TdulcKind {
    /// Group voice channel user.
    Group { service_options: u8, dst_id: u32, src_id: u32 },
    /// Unit-to-unit voice channel user.
    Private { service_options: u8, dst_id: u32, src_id: u32 },
    /// Telephone interconnect voice channel user.
    TelIntVchUser { service_options: u8, timer: u16, src_id: u32 },
    /// Channel identity plan update.
    IdenUp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tdulc {
    pub lco: u8,
    pub mfid: u8,
    pub kind: TdulcKind,
}

impl Tdulc {
    /// 8-byte LC payload following the LCO byte.
    fn value(&self, site: &SiteData) -> Option<u64> {
        Some(match &self.kind {
            TdulcKind::Group { service_options, dst_id, src_id } => {
                u64::from(self.mfid) << 56
                    | u64::from(*service_options) << 48
                    | u64::from(*dst_id & 0xFFFF) << 24
                    | u64::from(*src_id & 0xFF_FFFF)
            }
            TdulcKind::Private { service_options, dst_id, src_id } => {
                u64::from(*service_options) << 48
                    | u64::from(*dst_id & 0xFF_FFFF) << 24
                    | u64::from(*src_id & 0xFF_FFFF)
            }
            TdulcKind::TelIntVchUser { service_options, timer, src_id } => {
                u64::from(*service_options) << 48
                    | u64::from(*timer) << 24
                    | u64::from(*src_id & 0xFF_FFFF)
            }
            TdulcKind::IdenUp => {
                if !site.iden.is_valid() {
                    tracing::error!(
                        base_frequency = site.iden.base_frequency,
                        tx_offset_mhz = site.iden.tx_offset_mhz,
                        ch_bandwidth_khz = site.iden.ch_bandwidth_khz,
                        ch_space_khz = site.iden.ch_space_khz,
                        "invalid values for LC_IDEN_UP"
                    );
                    return None;
                }

                let iden = &site.iden;
                let calc_space = (iden.ch_space_khz / 0.125) as u64;

                let mut tx_offset =
                    ((iden.tx_offset_mhz.abs() / iden.ch_space_khz) * 1000.0) as u64;
                if iden.tx_offset_mhz > 0.0 {
                    tx_offset |= 0x2000;
                }

                let calc_base_freq = u64::from(iden.base_frequency / 5);
                let chan_bw: u64 = if iden.ch_bandwidth_khz <= 6.25 { 0b01 } else { 0b00 };

                let mut value = u64::from(iden.channel_id);
                value = (value << 4) + chan_bw;
                value = (value << 14) + tx_offset;
                value = (value << 10) + calc_space;
                (value << 32) + calc_base_freq
            }
        })
    }

    fn parse(lco: u8, value: u64) -> ProtoResult<Self> {
        let kind = match lco {
            LC_GROUP => TdulcKind::Group {
                service_options: ((value >> 48) & 0xFF) as u8,
                dst_id: ((value >> 24) & 0xFFFF) as u32,
                src_id: (value & 0xFF_FFFF) as u32,
            },
            LC_PRIVATE => TdulcKind::Private {
                service_options: ((value >> 48) & 0xFF) as u8,
                dst_id: ((value >> 24) & 0xFF_FFFF) as u32,
                src_id: (value & 0xFF_FFFF) as u32,
            },
            LC_TEL_INT_VCH_USER => TdulcKind::TelIntVchUser {
                service_options: ((value >> 48) & 0xFF) as u8,
                timer: ((value >> 24) & 0xFFFF) as u16,
                src_id: (value & 0xFF_FFFF) as u32,
            },
            LC_IDEN_UP => TdulcKind::IdenUp,
            _ => {
                debug!(lco, "unknown TDULC LCO");
                return Err(ProtoError::UnknownOpcode { opcode: lco, mfid: 0 });
            }
        };

        let mfid = if lco == LC_GROUP { ((value >> 56) & 0xFF) as u8 } else { MFID_STANDARD };
        Ok(Self { lco, mfid, kind })
    }

    /// Decodes the 288-bit golay + RS field.
    pub fn decode(data: &[u8]) -> ProtoResult<Self> {
        if data.len() < TDULC_FEC_LENGTH_BYTES {
            return Err(ProtoError::Truncated);
        }

        // unwind the twelve golay words into the 144-bit RS codeword
        let mut rs_buf = [0u8; RS_LENGTH_BYTES];
        for g in 0..12 {
            let mut codeword = 0u32;
            for b in 0..24 {
                codeword = (codeword << 1) | u32::from(read_bit(data, g * 24 + b));
            }
            let nibble12 = golay::decode(codeword)?;
            for b in 0..12 {
                write_bit(&mut rs_buf, g * 12 + b, (nibble12 >> (11 - b)) & 1 == 1);
            }
        }

        rs::decode_241213(&mut rs_buf)?;

        let lco = rs_buf[0] & 0x3F;
        let mut value = 0u64;
        for &b in rs_buf.iter().take(9).skip(1) {
            value = (value << 8) | u64::from(b);
        }

        Self::parse(lco, value)
    }

    /// Encodes into the 288-bit golay + RS field. Emission is skipped with
    /// an error log when the site identity has zero fields.
    pub fn encode(&self, data: &mut [u8], site: &SiteData) -> ProtoResult<()> {
        let value = self.value(site).ok_or(ProtoError::InvalidSiteIdentity)?;

        let mut rs_buf = [0u8; RS_LENGTH_BYTES];
        rs_buf[0] = self.lco & 0x3F;
        rs_buf[1..9].copy_from_slice(&value.to_be_bytes());
        rs::encode_241213(&mut rs_buf);

        for g in 0..12 {
            let mut nibble12 = 0u16;
            for b in 0..12 {
                nibble12 = (nibble12 << 1) | u16::from(read_bit(&rs_buf, g * 12 + b));
            }
            let codeword = golay::encode(nibble12);
            for b in 0..24 {
                write_bit(data, g * 24 + b, (codeword >> (23 - b)) & 1 == 1);
            }
        }

        Ok(())
    }

    pub fn src_dst(&self) -> (u32, u32) {
        match self.kind {
            TdulcKind::Group { dst_id, src_id, .. } => (src_id, dst_id),
            TdulcKind::Private { dst_id, src_id, .. } => (src_id, dst_id),
            TdulcKind::TelIntVchUser { src_id, .. } => (src_id, 0),
            TdulcKind::IdenUp => (0, 0),
        }
    }
}

/// Common LC addressing helper shared with the LDU header path.
pub fn lc_src_dst(lc_bytes: &[u8]) -> (u32, u32) {
    (get_u24(lc_bytes, 6), get_u24(lc_bytes, 3))
}

/// Writes plain LC addressing; the inverse of [`lc_src_dst`].
pub fn lc_set_src_dst(lc_bytes: &mut [u8], src_id: u32, dst_id: u32) {
    set_u24(dst_id, lc_bytes, 3);
    set_u24(src_id, lc_bytes, 6);
}

#[cfg(test)]
mod tests {
    use super::*;
    use dv_core::site::IdenEntry;

    fn site() -> SiteData {
        SiteData {
            iden: IdenEntry {
                channel_id: 2,
                base_frequency: 451_000_000,
                ch_bandwidth_khz: 12.5,
                ch_space_khz: 12.5,
                tx_offset_mhz: 5.0,
            },
            ..Default::default()
        }
    }

    #[test]
    fn group_round_trip() {
        let tdulc = Tdulc {
            lco: LC_GROUP,
            mfid: MFID_STANDARD,
            kind: TdulcKind::Group { service_options: 0x00, dst_id: 4501, src_id: 0x123456 },
        };

        let mut buf = [0u8; TDULC_FEC_LENGTH_BYTES];
        tdulc.encode(&mut buf, &site()).unwrap();

        let decoded = Tdulc::decode(&buf).unwrap();
        assert_eq!(decoded, tdulc);
    }

    #[test]
    fn survives_golay_correctable_errors() {
        let tdulc = Tdulc {
            lco: LC_PRIVATE,
            mfid: MFID_STANDARD,
            kind: TdulcKind::Private { service_options: 0x80, dst_id: 0x0A_0B0C, src_id: 0x01_0203 },
        };

        let mut buf = [0u8; TDULC_FEC_LENGTH_BYTES];
        tdulc.encode(&mut buf, &site()).unwrap();

        // two bit errors in each of three golay words
        buf[0] ^= 0x81;
        buf[6] ^= 0x18;
        buf[12] ^= 0x42;

        let decoded = Tdulc::decode(&buf).unwrap();
        assert_eq!(decoded, tdulc);
    }

    #[test]
    fn iden_up_positive_offset_sets_bit13() {
        let tdulc = Tdulc {
            lco: LC_IDEN_UP,
            mfid: MFID_STANDARD,
            kind: TdulcKind::IdenUp,
        };

        let value = tdulc.value(&site()).unwrap();
        assert_eq!(value & 0xFFFF_FFFF, u64::from(451_000_000u32 / 5));
        assert_eq!((value >> 42) & 0x2000, 0x2000); // positive offset
        assert_eq!((value >> 42) & 0x1FFF, 400); // 5 MHz / 12.5 kHz * 1000
        assert_eq!((value >> 32) & 0x3FF, 100);
        assert_eq!((value >> 56) & 0x0F, 0b00); // 12.5 kHz bandwidth code
        assert_eq!(value >> 60, 2); // channel id
    }

    #[test]
    fn zero_offset_skips_emission() {
        let mut s = site();
        s.iden.tx_offset_mhz = 0.0;

        let tdulc = Tdulc { lco: LC_IDEN_UP, mfid: MFID_STANDARD, kind: TdulcKind::IdenUp };
        let mut buf = [0u8; TDULC_FEC_LENGTH_BYTES];
        assert_eq!(tdulc.encode(&mut buf, &s), Err(ProtoError::InvalidSiteIdentity));
    }
}
