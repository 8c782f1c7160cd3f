//! P25 payload routing hooks: the DUID rides the flags nibble.

use dv_net::frame_queue::DatagramHeader;

use super::{Protocol, Tagger};

const DUID_TDU: u8 = 0x3;
const DUID_TDULC: u8 = 0xF;

pub struct P25Protocol;

impl Protocol for P25Protocol {
    fn name(&self) -> &'static str {
        "P25"
    }

    fn slot(&self, _header: &DatagramHeader) -> u8 {
        0
    }

    fn is_end_of_call(&self, header: &DatagramHeader) -> bool {
        matches!(header.flags & 0x0F, DUID_TDU | DUID_TDULC)
    }
}

pub type TagP25Data = Tagger<P25Protocol>;

pub fn new() -> TagP25Data {
    Tagger::new(P25Protocol)
}
