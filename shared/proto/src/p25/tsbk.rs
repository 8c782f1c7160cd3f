//! P25 trunking signalling block factory.
//!
//! Two carriage forms exist and both parse here: the 12-byte "raw" TSBK
//! used on wide-area back-haul, and the 25-byte on-air form (rate 1/2
//! trellis). The payload is a 64-bit big-endian value split into fields
//! per opcode.

use chrono::{DateTime, Datelike, Timelike, Utc};
use dv_core::site::{IdenEntry, SiteData};
use dv_edac::{crc, trellis};
use tracing::{debug, error, warn};

use super::*;
use crate::{ProtoError, ProtoResult};

pub const TSBK_LENGTH_BYTES: usize = 12;
pub const TSBK_FEC_LENGTH_BYTES: usize = 25;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TsbkKind {
    /// Group voice channel grant.
    GrpVchGrant {
        service_options: u8,
        channel_id: u8,
        channel_no: u16,
        dst_id: u32,
        src_id: u32,
    },
    /// Unit-to-unit voice channel grant.
    UuVchGrant {
        channel_id: u8,
        channel_no: u16,
        dst_id: u32,
        src_id: u32,
    },
    /// SNDCP data channel grant.
    SndcpChGrant {
        service_options: u8,
        channel_id: u8,
        channel_no: u16,
        dst_id: u32,
    },
    /// Acknowledgement (FNE sourced).
    AckRsp { service: u8, dst_id: u32, src_id: u32 },
    /// Deny response.
    DenyRsp { service: u8, reason: u8, dst_id: u32, src_id: u32 },
    /// Authentication demand.
    AuthDmd { challenge: u64 },
    /// VHF/UHF channel identifier plan update.
    IdenUpVu,
    /// Wide-band channel identifier plan update.
    IdenUp,
    /// Time and date announcement.
    TimeDateAnn { ts: DateTime<Utc> },
    /// Synchronization broadcast.
    SyncBcast { ts: DateTime<Utc>, microslot_count: u16 },
    /// RFSS status broadcast.
    RfssStsBcast { lra: u8 },
    /// Network status broadcast.
    NetStsBcast { lra: u8 },
    /// Adjacent site status broadcast.
    AdjStsBcast {
        lra: u8,
        cfva: u8,
        system_id: u16,
        rfss_id: u8,
        site_id: u8,
        channel_id: u8,
        channel_no: u16,
        service_class: u8,
    },
    /// Unparsed payload carried through verbatim.
    Raw { value: u64 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tsbk {
    pub lco: u8,
    pub mfid: u8,
    pub last_block: bool,
    pub kind: TsbkKind,
}

fn to_value(payload: &[u8]) -> u64 {
    let mut value = 0u64;
    for &b in payload.iter().take(8) {
        value = (value << 8) | u64::from(b);
    }
    value
}

fn from_value(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

/// The shift-and-add packing the channel identity encoders use; overflow
/// from an oversized bandwidth byte bleeds into the channel id exactly as
/// observed on air.
fn iden_value(iden: &IdenEntry, narrowband_code: Option<u8>) -> Option<u64> {
    if !iden.is_valid() {
        error!(
            base_frequency = iden.base_frequency,
            tx_offset_mhz = iden.tx_offset_mhz,
            ch_bandwidth_khz = iden.ch_bandwidth_khz,
            ch_space_khz = iden.ch_space_khz,
            "invalid values for channel identity update"
        );
        return None;
    }

    let calc_space = (iden.ch_space_khz / 0.125) as u64;

    let mut tx_offset = ((iden.tx_offset_mhz.abs() / iden.ch_space_khz) * 1000.0) as u64;
    if iden.tx_offset_mhz > 0.0 {
        tx_offset |= 0x2000;
    }

    let calc_base_freq = u64::from(iden.base_frequency / 5);
    let chan_bw: u64 = match narrowband_code {
        Some(code) => u64::from(code),
        None => ((iden.ch_bandwidth_khz * 1000.0) / 125.0) as u64,
    };

    let mut value = u64::from(iden.channel_id);
    value = (value << 4) + chan_bw;
    value = (value << 14) + tx_offset;
    value = (value << 10) + calc_space;
    value = (value << 32) + calc_base_freq;
    Some(value)
}

impl Tsbk {
    /// Builds the 64-bit payload for this block. Site-derived blocks read
    /// from `site`; identity blocks return None (and log) on zero fields.
    fn value(&self, site: &SiteData) -> Option<u64> {
        Some(match &self.kind {
            TsbkKind::GrpVchGrant { service_options, channel_id, channel_no, dst_id, src_id } => {
                u64::from(*service_options) << 56
                    | u64::from(*channel_id & 0x0F) << 52
                    | u64::from(*channel_no & 0x0FFF) << 40
                    | u64::from(*dst_id & 0xFFFF) << 24
                    | u64::from(*src_id & 0xFF_FFFF)
            }
            TsbkKind::UuVchGrant { channel_id, channel_no, dst_id, src_id } => {
                u64::from(*channel_id & 0x0F) << 60
                    | u64::from(*channel_no & 0x0FFF) << 48
                    | u64::from(*dst_id & 0xFF_FFFF) << 24
                    | u64::from(*src_id & 0xFF_FFFF)
            }
            TsbkKind::SndcpChGrant { service_options, channel_id, channel_no, dst_id } => {
                u64::from(*service_options) << 56
                    | u64::from(*channel_id & 0x0F) << 52
                    | u64::from(*channel_no & 0x0FFF) << 40
                    | u64::from(*channel_id & 0x0F) << 36
                    | u64::from(*channel_no & 0x0FFF) << 24
                    | u64::from(*dst_id & 0xFF_FFFF)
            }
            TsbkKind::AckRsp { service, dst_id, src_id } => {
                u64::from(*service) << 56
                    | u64::from(*dst_id & 0xFF_FFFF) << 24
                    | u64::from(*src_id & 0xFF_FFFF)
            }
            TsbkKind::DenyRsp { service, reason, dst_id, src_id } => {
                u64::from(*service) << 56
                    | u64::from(*reason) << 48
                    | u64::from(*dst_id & 0xFF_FFFF) << 24
                    | u64::from(*src_id & 0xFF_FFFF)
            }
            TsbkKind::AuthDmd { challenge } => *challenge,
            TsbkKind::IdenUpVu | TsbkKind::IdenUp => iden_value(&site.iden, None)?,
            TsbkKind::TimeDateAnn { ts } => {
                let year = (ts.year() - 2000).clamp(0, 127) as u64;
                0xE0u64 << 56 // VD | VT | VL
                    | year << 49
                    | u64::from(ts.month()) << 45
                    | u64::from(ts.day()) << 40
                    | u64::from(ts.hour()) << 35
                    | u64::from(ts.minute()) << 29
                    | u64::from(ts.second()) << 23
            }
            TsbkKind::SyncBcast { ts, microslot_count } => {
                let mut negative_lto = false;
                let mut lto = (site.lto.abs() * 2.0) as u64;
                if site.lto < 0.0 {
                    negative_lto = true;
                }
                let vl = lto > 0;
                if lto > 0x1F {
                    lto &= 0x1F;
                }

                let mc = 0u64;
                let microslot = u64::from(*microslot_count % 8000);

                let year = (ts.year() - 2000).clamp(0, 127) as u64;
                let month = u64::from(ts.month());

                let mut value = 0x0Au64 + ((mc & 0x03) >> 1);
                value = (value << 8)
                    + ((mc & 0x01) << 7)
                    + if vl { 0x40 } else { 0x00 }
                    + if negative_lto { 0x20 } else { 0x00 }
                    + (lto & 0x1F);
                value = (value << 7) + (year & 0x7F);
                value = (value << 4) + (month & 0x0F);
                value = (value << 5) + (u64::from(ts.day()) & 0x1F);
                value = (value << 5) + (u64::from(ts.hour()) & 0x1F);
                value = (value << 6) + (u64::from(ts.minute()) & 0x3F);
                (value << 13) + (microslot & 0x1FFF)
            }
            TsbkKind::RfssStsBcast { lra } => {
                u64::from(*lra) << 56
                    | 0xFu64 << 48 // CFVA: conventional, failure, valid, active
                    | u64::from(site.sys_id & 0xFFF) << 36
                    | u64::from(site.rfss_id) << 28
                    | u64::from(site.site_id) << 20
                    | u64::from(site.channel_id & 0x0F) << 16
                    | u64::from(site.channel_no & 0x0FFF) << 4
                    | u64::from(site.service_class) >> 4
            }
            TsbkKind::NetStsBcast { lra } => {
                u64::from(*lra) << 56
                    | u64::from(site.net_id & 0xF_FFFF) << 36
                    | u64::from(site.sys_id & 0xFFF) << 24
                    | u64::from(site.channel_id & 0x0F) << 20
                    | u64::from(site.channel_no & 0x0FFF) << 8
                    | u64::from(site.service_class)
            }
            TsbkKind::AdjStsBcast {
                lra,
                cfva,
                system_id,
                rfss_id,
                site_id,
                channel_id,
                channel_no,
                service_class,
            } => {
                u64::from(*lra) << 56
                    | u64::from(*cfva & 0x0F) << 52
                    | u64::from(*system_id & 0xFFF) << 40
                    | u64::from(*rfss_id) << 32
                    | u64::from(*site_id) << 24
                    | u64::from(*channel_id & 0x0F) << 20
                    | u64::from(*channel_no & 0x0FFF) << 8
                    | u64::from(*service_class)
            }
            TsbkKind::Raw { value } => *value,
        })
    }

    fn parse(lco: u8, mfid: u8, last_block: bool, value: u64) -> Self {
        let kind = match lco {
            TSBK_IOSP_GRP_VCH => TsbkKind::GrpVchGrant {
                service_options: (value >> 56) as u8,
                channel_id: ((value >> 52) & 0x0F) as u8,
                channel_no: ((value >> 40) & 0x0FFF) as u16,
                dst_id: ((value >> 24) & 0xFFFF) as u32,
                src_id: (value & 0xFF_FFFF) as u32,
            },
            TSBK_IOSP_UU_VCH => TsbkKind::UuVchGrant {
                channel_id: ((value >> 60) & 0x0F) as u8,
                channel_no: ((value >> 48) & 0x0FFF) as u16,
                dst_id: ((value >> 24) & 0xFF_FFFF) as u32,
                src_id: (value & 0xFF_FFFF) as u32,
            },
            TSBK_OSP_SNDCP_CH_GNT => TsbkKind::SndcpChGrant {
                service_options: (value >> 56) as u8,
                channel_id: ((value >> 52) & 0x0F) as u8,
                channel_no: ((value >> 40) & 0x0FFF) as u16,
                dst_id: (value & 0xFF_FFFF) as u32,
            },
            TSBK_IOSP_ACK_RSP => TsbkKind::AckRsp {
                service: (value >> 56) as u8,
                dst_id: ((value >> 24) & 0xFF_FFFF) as u32,
                src_id: (value & 0xFF_FFFF) as u32,
            },
            TSBK_OSP_DENY_RSP => TsbkKind::DenyRsp {
                service: (value >> 56) as u8,
                reason: ((value >> 48) & 0xFF) as u8,
                dst_id: ((value >> 24) & 0xFF_FFFF) as u32,
                src_id: (value & 0xFF_FFFF) as u32,
            },
            TSBK_OSP_AUTH_DMD => TsbkKind::AuthDmd { challenge: value },
            TSBK_OSP_ADJ_STS_BCAST => TsbkKind::AdjStsBcast {
                lra: (value >> 56) as u8,
                cfva: ((value >> 52) & 0x0F) as u8,
                system_id: ((value >> 40) & 0xFFF) as u16,
                rfss_id: ((value >> 32) & 0xFF) as u8,
                site_id: ((value >> 24) & 0xFF) as u8,
                channel_id: ((value >> 20) & 0x0F) as u8,
                channel_no: ((value >> 8) & 0x0FFF) as u16,
                service_class: (value & 0xFF) as u8,
            },
            _ => TsbkKind::Raw { value },
        };

        Self { lco, mfid, last_block, kind }
    }

    /// Decodes either carriage form. `raw` selects the 12-byte back-haul
    /// shape; otherwise the on-air trellis carriage is unwound first.
    pub fn decode(data: &[u8], raw: bool, warn_crc: bool) -> ProtoResult<Self> {
        let mut tsbk = [0u8; TSBK_LENGTH_BYTES];

        if raw {
            if data.len() < TSBK_LENGTH_BYTES {
                return Err(ProtoError::Truncated);
            }
            tsbk.copy_from_slice(&data[..TSBK_LENGTH_BYTES]);
        } else {
            if data.len() < TSBK_FEC_LENGTH_BYTES {
                return Err(ProtoError::Truncated);
            }
            trellis::decode12(data, &mut tsbk)?;
        }

        if !crc::check_ccitt162(&tsbk) {
            if warn_crc {
                warn!("TSBK failed CRC CCITT-162 check, accepting anyway");
            } else {
                debug!("TSBK failed CRC CCITT-162 check");
                return Err(ProtoError::CrcMismatch);
            }
        }

        let lco = tsbk[0] & 0x3F;
        let last_block = tsbk[0] & 0x80 != 0;
        let mfid = tsbk[1];
        let value = to_value(&tsbk[2..10]);

        Ok(Self::parse(lco, mfid, last_block, value))
    }

    /// Encodes into the selected carriage. Identity blocks with zero site
    /// fields are skipped (no bytes written, error already logged).
    pub fn encode(&self, data: &mut [u8], site: &SiteData, raw: bool) -> ProtoResult<()> {
        let value = self.value(site).ok_or(ProtoError::InvalidSiteIdentity)?;

        let mut tsbk = [0u8; TSBK_LENGTH_BYTES];
        tsbk[0] = self.lco & 0x3F;
        if self.last_block {
            tsbk[0] |= 0x80;
        }
        tsbk[1] = self.mfid;
        tsbk[2..10].copy_from_slice(&from_value(value));
        crc::add_ccitt162(&mut tsbk);

        if raw {
            data[..TSBK_LENGTH_BYTES].copy_from_slice(&tsbk);
        } else {
            trellis::encode12(&tsbk, data);
        }

        Ok(())
    }

    /// The raw 64-bit payload this block would carry; exposed for the
    /// multi-block assembler.
    pub fn payload_value(&self, site: &SiteData) -> Option<u64> {
        self.value(site)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn site_800mhz() -> SiteData {
        SiteData {
            sys_id: 0x2F1,
            rfss_id: 1,
            site_id: 1,
            channel_id: 1,
            channel_no: 100,
            service_class: 0x02,
            lto: -5.0,
            iden: IdenEntry {
                channel_id: 1,
                base_frequency: 851_000_000,
                ch_bandwidth_khz: 12.5,
                ch_space_khz: 12.5,
                tx_offset_mhz: -45.0,
            },
            ..Default::default()
        }
    }

    #[test]
    fn iden_up_vu_800mhz_split() {
        let site = site_800mhz();
        let tsbk = Tsbk {
            lco: TSBK_OSP_IDEN_UP_VU,
            mfid: MFID_STANDARD,
            last_block: true,
            kind: TsbkKind::IdenUpVu,
        };

        let value = tsbk.payload_value(&site).unwrap();
        assert_eq!(value & 0xFFFF_FFFF, 0x0A24_E4C0); // 851 MHz / 5
        assert_eq!((value >> 32) & 0x3FF, 100); // 12.5 kHz / 0.125
        assert_eq!((value >> 42) & 0x3FFF, 3600); // 45 / 12.5 * 1000
        assert_eq!((value >> 42) & 0x2000, 0); // negative offset: bit 13 clear
    }

    #[test]
    fn iden_up_skips_on_invalid_site() {
        let mut site = site_800mhz();
        site.iden.base_frequency = 0;

        let tsbk = Tsbk {
            lco: TSBK_OSP_IDEN_UP,
            mfid: MFID_STANDARD,
            last_block: true,
            kind: TsbkKind::IdenUp,
        };

        let mut buf = [0u8; TSBK_FEC_LENGTH_BYTES];
        assert_eq!(
            tsbk.encode(&mut buf, &site, false),
            Err(ProtoError::InvalidSiteIdentity)
        );
        assert_eq!(buf, [0u8; TSBK_FEC_LENGTH_BYTES]);
    }

    #[test]
    fn sync_bcast_est_fields() {
        let site = site_800mhz();
        let ts = Utc.with_ymd_and_hms(2024, 3, 15, 17, 42, 0).unwrap();

        let tsbk = Tsbk {
            lco: TSBK_OSP_SYNC_BCAST,
            mfid: MFID_STANDARD,
            last_block: true,
            kind: TsbkKind::SyncBcast { ts, microslot_count: 0 },
        };

        let value = tsbk.payload_value(&site).unwrap();
        let bytes = value.to_be_bytes();

        // packed value is 56 bits; the first significant byte pair carries
        // the sync flags and the LTO word
        assert_eq!(bytes[1], 0x0A); // unsynced + microslot/minute unlock
        assert_eq!(bytes[2], 0x6A); // VL + negative LTO + lto raw 10
        assert_eq!((value >> 33) & 0x7F, 24); // years past 2000
        assert_eq!((value >> 29) & 0x0F, 3); // month
        assert_eq!((value >> 24) & 0x1F, 15); // day
        assert_eq!((value >> 19) & 0x1F, 17); // hour
        assert_eq!((value >> 13) & 0x3F, 42); // minute
        assert_eq!(value & 0x1FFF, 0); // microslot count
    }

    #[test]
    fn raw_and_on_air_carriages_round_trip() {
        let site = site_800mhz();
        let tsbk = Tsbk {
            lco: TSBK_IOSP_GRP_VCH,
            mfid: MFID_STANDARD,
            last_block: true,
            kind: TsbkKind::GrpVchGrant {
                service_options: 0x04,
                channel_id: 1,
                channel_no: 101,
                dst_id: 500,
                src_id: 42,
            },
        };

        let mut raw = [0u8; TSBK_LENGTH_BYTES];
        tsbk.encode(&mut raw, &site, true).unwrap();
        assert_eq!(Tsbk::decode(&raw, true, false).unwrap(), tsbk);

        let mut coded = [0u8; TSBK_FEC_LENGTH_BYTES];
        tsbk.encode(&mut coded, &site, false).unwrap();
        assert_eq!(Tsbk::decode(&coded, false, false).unwrap(), tsbk);
    }

    #[test]
    fn crc_warn_mode_accepts_and_logs() {
        let site = site_800mhz();
        let tsbk = Tsbk {
            lco: TSBK_IOSP_ACK_RSP,
            mfid: MFID_STANDARD,
            last_block: true,
            kind: TsbkKind::AckRsp { service: 0x20, dst_id: 7, src_id: 8 },
        };

        let mut raw = [0u8; TSBK_LENGTH_BYTES];
        tsbk.encode(&mut raw, &site, true).unwrap();
        raw[11] ^= 0x01;

        assert!(Tsbk::decode(&raw, true, false).is_err());
        assert!(Tsbk::decode(&raw, true, true).is_ok());
    }
}
