//! NXDN (FDMA) frame primitives and control channel signalling.

pub mod facch1;
pub mod lich;
pub mod rcch;
pub mod sacch;

/// Frame sync word (FSW), 20 bits papered into 3 bytes.
pub const FSW: [u8; 3] = [0xCD, 0xF5, 0x90];
pub const FSW_MASK: [u8; 3] = [0xFF, 0xFF, 0xF0];

/// RCCH message types (6 bits).
pub const MESSAGE_TYPE_VCALL: u8 = 0x01;
pub const MESSAGE_TYPE_VCALL_CONN: u8 = 0x03;
pub const MESSAGE_TYPE_DCALL_HDR: u8 = 0x09;
pub const MESSAGE_TYPE_IDLE: u8 = 0x10;
pub const MESSAGE_TYPE_DST_ID_INFO: u8 = 0x17;
pub const MESSAGE_TYPE_SITE_INFO: u8 = 0x18;
pub const MESSAGE_TYPE_REG: u8 = 0x20;
pub const MESSAGE_TYPE_REG_C: u8 = 0x22;
pub const MESSAGE_TYPE_GRP_REG: u8 = 0x24;

/// Service information flag: IP network accessible.
pub const SIF2_IP_NETWORK: u8 = 0x10;

/// Channel access: system-defined base frequency and step.
pub const CH_ACCESS_BASE_FREQ_SYS_DEFINED: u8 = 0x06;

/// Layer-3 RCCH buffer length.
pub const RCCH_LC_LENGTH_BYTES: usize = 22;

/// Cause codes for registration responses.
pub const CAUSE_MM_REG_ACCEPTED: u8 = 0x01;
pub const CAUSE_MM_REG_REFUSED: u8 = 0x06;
