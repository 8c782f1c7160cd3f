//! NXDN control channel message factory. RCCH layer-3 messages dispatch
//! on the 6-bit message type; encoders fill the 22-byte layer-3 buffer
//! that the CAC/FACCH carriage then protects.

use dv_core::site::SiteData;
use dv_edac::bits::{get_u24, set_u24};
use tracing::debug;

use super::*;
use crate::{ProtoError, ProtoResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RcchKind {
    /// Voice call assignment.
    VCall { call_type: u8, channel_no: u16 },
    /// Voice call connection response.
    VCallConn { call_type: u8, cause: u8 },
    /// Data call header.
    DCallHdr { call_type: u8, blocks: u8 },
    /// Idle filler.
    Idle,
    /// Unit registration response.
    Reg { cause: u8 },
    /// Unit registration check response.
    RegC { cause: u8 },
    /// Group registration response.
    GrpReg { cause: u8 },
    /// Site information broadcast.
    SiteInfo {
        bcch_cnt: u8,
        grouping_cnt: u8,
        paging_cnt: u8,
        multi_cnt: u8,
        iterate_cnt: u8,
    },
    /// Destination id information.
    DstIdInfo,
}

impl RcchKind {
    pub fn site_info_defaults() -> Self {
        RcchKind::SiteInfo {
            bcch_cnt: 1,
            grouping_cnt: 1,
            paging_cnt: 2,
            multi_cnt: 2,
            iterate_cnt: 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rcch {
    pub message_type: u8,
    pub src_id: u32,
    pub dst_id: u32,
    pub kind: RcchKind,
}

impl Rcch {
    /// Parses a 22-byte layer-3 buffer.
    pub fn decode(rcch: &[u8]) -> ProtoResult<Self> {
        if rcch.len() < RCCH_LC_LENGTH_BYTES {
            return Err(ProtoError::Truncated);
        }

        let message_type = rcch[0] & 0x3F;

        let (kind, src_id, dst_id) = match message_type {
            MESSAGE_TYPE_VCALL => (
                RcchKind::VCall {
                    call_type: (rcch[1] >> 5) & 0x07,
                    channel_no: u16::from_be_bytes([rcch[8] & 0x03, rcch[9]]),
                },
                u32::from(u16::from_be_bytes([rcch[2], rcch[3]])),
                u32::from(u16::from_be_bytes([rcch[4], rcch[5]])),
            ),
            MESSAGE_TYPE_VCALL_CONN => (
                RcchKind::VCallConn {
                    call_type: (rcch[1] >> 5) & 0x07,
                    cause: rcch[8],
                },
                u32::from(u16::from_be_bytes([rcch[2], rcch[3]])),
                u32::from(u16::from_be_bytes([rcch[4], rcch[5]])),
            ),
            MESSAGE_TYPE_DCALL_HDR => (
                RcchKind::DCallHdr {
                    call_type: (rcch[1] >> 5) & 0x07,
                    blocks: rcch[8],
                },
                u32::from(u16::from_be_bytes([rcch[2], rcch[3]])),
                u32::from(u16::from_be_bytes([rcch[4], rcch[5]])),
            ),
            MESSAGE_TYPE_IDLE => (RcchKind::Idle, 0, 0),
            MESSAGE_TYPE_REG => (
                RcchKind::Reg { cause: rcch[6] },
                u32::from(u16::from_be_bytes([rcch[2], rcch[3]])),
                u32::from(u16::from_be_bytes([rcch[4], rcch[5]])),
            ),
            MESSAGE_TYPE_REG_C => (
                RcchKind::RegC { cause: rcch[4] },
                u32::from(u16::from_be_bytes([rcch[2], rcch[3]])),
                0,
            ),
            MESSAGE_TYPE_GRP_REG => (
                RcchKind::GrpReg { cause: rcch[6] },
                u32::from(u16::from_be_bytes([rcch[2], rcch[3]])),
                u32::from(u16::from_be_bytes([rcch[4], rcch[5]])),
            ),
            MESSAGE_TYPE_SITE_INFO => (
                RcchKind::SiteInfo {
                    bcch_cnt: (rcch[4] >> 6) & 0x03,
                    grouping_cnt: (rcch[4] >> 3) & 0x07,
                    paging_cnt: (rcch[4] & 0x07) << 1 | rcch[5] >> 7,
                    multi_cnt: (rcch[5] >> 4) & 0x07,
                    iterate_cnt: rcch[5] & 0x0F,
                },
                0,
                0,
            ),
            MESSAGE_TYPE_DST_ID_INFO => (RcchKind::DstIdInfo, 0, get_u24(rcch, 2)),
            _ => {
                debug!(message_type, "unknown RCCH message type");
                return Err(ProtoError::UnknownOpcode { opcode: message_type, mfid: 0 });
            }
        };

        Ok(Self { message_type, src_id, dst_id, kind })
    }

    /// Fills a 22-byte layer-3 buffer.
    pub fn encode(&self, rcch: &mut [u8], site: &SiteData) {
        debug_assert!(rcch.len() >= RCCH_LC_LENGTH_BYTES);
        rcch[..RCCH_LC_LENGTH_BYTES].fill(0);
        rcch[0] = self.message_type & 0x3F;

        match self.kind {
            RcchKind::VCall { call_type, channel_no } => {
                rcch[1] = (call_type & 0x07) << 5;
                rcch[2] = (self.src_id >> 8) as u8;
                rcch[3] = self.src_id as u8;
                rcch[4] = (self.dst_id >> 8) as u8;
                rcch[5] = self.dst_id as u8;
                rcch[8] = ((channel_no >> 8) & 0x03) as u8;
                rcch[9] = channel_no as u8;
            }
            RcchKind::VCallConn { call_type, cause } => {
                rcch[1] = (call_type & 0x07) << 5;
                rcch[2] = (self.src_id >> 8) as u8;
                rcch[3] = self.src_id as u8;
                rcch[4] = (self.dst_id >> 8) as u8;
                rcch[5] = self.dst_id as u8;
                rcch[8] = cause;
            }
            RcchKind::DCallHdr { call_type, blocks } => {
                rcch[1] = (call_type & 0x07) << 5;
                rcch[2] = (self.src_id >> 8) as u8;
                rcch[3] = self.src_id as u8;
                rcch[4] = (self.dst_id >> 8) as u8;
                rcch[5] = self.dst_id as u8;
                rcch[8] = blocks;
            }
            RcchKind::Idle => {}
            RcchKind::Reg { cause } => {
                rcch[2] = (self.src_id >> 8) as u8;
                rcch[3] = self.src_id as u8;
                rcch[4] = (self.dst_id >> 8) as u8;
                rcch[5] = self.dst_id as u8;
                rcch[6] = cause;
            }
            RcchKind::RegC { cause } => {
                rcch[2] = (self.src_id >> 8) as u8;
                rcch[3] = self.src_id as u8;
                rcch[4] = cause;
            }
            RcchKind::GrpReg { cause } => {
                rcch[2] = (self.src_id >> 8) as u8;
                rcch[3] = self.src_id as u8;
                rcch[4] = (self.dst_id >> 8) as u8;
                rcch[5] = self.dst_id as u8;
                rcch[6] = cause;
            }
            RcchKind::SiteInfo { bcch_cnt, grouping_cnt, paging_cnt, multi_cnt, iterate_cnt } => {
                set_u24(site.location_id(), rcch, 1);
                rcch[4] = (bcch_cnt & 0x03) << 6
                    | (grouping_cnt & 0x07) << 3
                    | (paging_cnt >> 1) & 0x07;
                rcch[5] = (paging_cnt & 0x01) << 7
                    | (multi_cnt & 0x07) << 4
                    | (iterate_cnt & 0x0F);

                rcch[6] = site.service_class;
                rcch[7] = if site.net_active { SIF2_IP_NETWORK } else { 0x00 };

                // restriction information: no access / cycle restriction,
                // GMS location registration, ISO when isolated
                rcch[8] = 0x00;
                rcch[9] = 0x08;
                rcch[10] = if !site.net_active { 0x01 } else { 0x00 };

                rcch[11] = CH_ACCESS_BASE_FREQ_SYS_DEFINED;
                rcch[14] = 1; // version

                let channel_no = (site.channel_no & 0x3FF) as u16;
                rcch[15] = ((channel_no >> 6) & 0x0F) as u8;
                rcch[16] = ((channel_no & 0x3F) << 2) as u8;
            }
            RcchKind::DstIdInfo => {
                set_u24(self.dst_id, rcch, 2);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_info_channel_structure() {
        let mut site = SiteData {
            sys_id: 0x2A5,
            site_id: 0x11,
            channel_no: 0x0155,
            service_class: 0x20,
            ..Default::default()
        };
        site.net_active = true;

        let rcch = Rcch {
            message_type: MESSAGE_TYPE_SITE_INFO,
            src_id: 0,
            dst_id: 0,
            kind: RcchKind::site_info_defaults(),
        };

        let mut buf = [0u8; RCCH_LC_LENGTH_BYTES];
        rcch.encode(&mut buf, &site);

        assert_eq!(buf[0], MESSAGE_TYPE_SITE_INFO);
        assert_eq!(buf[4], 0b01_001_001); // 1 BCCH, 1 grouping, paging >> 1
        assert_eq!(buf[5], 0b0_010_0010); // paging lsb, 2 multi, 2 iterate
        assert_eq!(buf[6], 0x20);
        assert_eq!(buf[7], SIF2_IP_NETWORK);
        assert_eq!(buf[10], 0x00); // networked: not isolated

        let decoded = Rcch::decode(&buf).unwrap();
        assert_eq!(decoded.kind, RcchKind::site_info_defaults());
    }

    #[test]
    fn isolated_site_clears_network_flag() {
        let site = SiteData::default();
        let rcch = Rcch {
            message_type: MESSAGE_TYPE_SITE_INFO,
            src_id: 0,
            dst_id: 0,
            kind: RcchKind::site_info_defaults(),
        };

        let mut buf = [0u8; RCCH_LC_LENGTH_BYTES];
        rcch.encode(&mut buf, &site);
        assert_eq!(buf[7], 0x00);
        assert_eq!(buf[10], 0x01); // ISO flag
    }

    #[test]
    fn reg_round_trip() {
        let rcch = Rcch {
            message_type: MESSAGE_TYPE_REG,
            src_id: 0x1234,
            dst_id: 0x5678,
            kind: RcchKind::Reg { cause: CAUSE_MM_REG_ACCEPTED },
        };

        let mut buf = [0u8; RCCH_LC_LENGTH_BYTES];
        rcch.encode(&mut buf, &SiteData::default());

        let decoded = Rcch::decode(&buf).unwrap();
        assert_eq!(decoded, rcch);
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let mut buf = [0u8; RCCH_LC_LENGTH_BYTES];
        buf[0] = 0x3E;
        assert!(Rcch::decode(&buf).is_err());
    }
}
