//! NXDN payload routing hooks: transmission release in the flags nibble.

use dv_net::frame_queue::DatagramHeader;

use super::{Protocol, Tagger};

const MESSAGE_TYPE_TX_REL: u8 = 0x08;

pub struct NxdnProtocol;

impl Protocol for NxdnProtocol {
    fn name(&self) -> &'static str {
        "NXDN"
    }

    fn slot(&self, _header: &DatagramHeader) -> u8 {
        0
    }

    fn is_end_of_call(&self, header: &DatagramHeader) -> bool {
        header.flags & 0x0F == MESSAGE_TYPE_TX_REL
    }
}

pub type TagNxdnData = Tagger<NxdnProtocol>;

pub fn new() -> TagNxdnData {
    Tagger::new(NxdnProtocol)
}
