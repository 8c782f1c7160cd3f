//! Wire tags and frame constants for the modem byte stream and the fleet
//! network datagrams.

/// Modem frame-type prefix bytes.
pub const TAG_HEADER: u8 = 0x00;
pub const TAG_DATA: u8 = 0x01;
pub const TAG_EOT: u8 = 0x02;
pub const TAG_LOST: u8 = 0x03;
pub const TAG_NODATA: u8 = 0x04;

/// Network payload tags (first four bytes of a payload datagram).
pub const TAG_DMR_DATA: &[u8; 4] = b"DMRD";
pub const TAG_P25_DATA: &[u8; 4] = b"P25D";
pub const TAG_NXDN_DATA: &[u8; 4] = b"NXDD";

/// Control-plane tags.
pub const TAG_REPEATER_LOGIN: &[u8] = b"RPTL";
pub const TAG_REPEATER_AUTH: &[u8] = b"RPTK";
pub const TAG_REPEATER_CONFIG: &[u8] = b"RPTC";
pub const TAG_REPEATER_ACK: &[u8] = b"RPTACK";
pub const TAG_REPEATER_CLOSING: &[u8] = b"RPTCL";
pub const TAG_REPEATER_PING: &[u8] = b"RPTPING";
pub const TAG_REPEATER_GRANT: &[u8] = b"RPTGNT";
pub const TAG_MASTER_NAK: &[u8] = b"MSTNAK";
pub const TAG_TRANSFER_ACT_LOG: &[u8] = b"TRNSLOG";
pub const TAG_TRANSFER_DIAG_LOG: &[u8] = b"TRNSDIAG";

/// Payload datagram header layout (§ wire format): fixed 20-byte prefix.
pub const DATAGRAM_HDR_LEN: usize = 20;
pub const DATAGRAM_SEQ_OFFSET: usize = 4;
pub const DATAGRAM_SRC_OFFSET: usize = 5;
pub const DATAGRAM_DST_OFFSET: usize = 8;
pub const DATAGRAM_PEER_OFFSET: usize = 11;
pub const DATAGRAM_FLAGS_OFFSET: usize = 15;
pub const DATAGRAM_STREAM_OFFSET: usize = 16;

/// Flags byte bits.
pub const FLAG_SLOT2: u8 = 0x80;
pub const FLAG_PRIVATE: u8 = 0x40;
pub const FLAG_DATA_SYNC: u8 = 0x20;
pub const FLAG_VOICE_SYNC: u8 = 0x10;

/// Offset of the legacy P25 LDU1 crypto sub-header within a P25D payload.
pub const P25_LDU1_CRYPTO_OFFSET: usize = 180;
pub const P25_LDU1_CRYPTO_LEN: usize = 21;

/// Largest datagram the fabric will accept or emit.
pub const DATA_PACKET_LENGTH: usize = 8192;

/// Random salt bounds for the login challenge.
pub const RAND_MIN: u32 = 1;
pub const RAND_MAX: u32 = 0x7FFF_FFFE;

/// Preamble magic for AES-wrapped datagrams, transmitted as [0x00, 0xC0].
pub const AES_WRAPPED_PCKT_MAGIC: [u8; 2] = [0x00, 0xC0];
pub const AES_WRAPPED_PCKT_KEY_LEN: usize = 32;
