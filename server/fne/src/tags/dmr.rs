//! DMR payload routing hooks: slot-aware rule lookups and terminator
//! detection on the data-sync type nibble.

use dv_net::frame_queue::DatagramHeader;

use super::{Protocol, Tagger};

/// Data type nibble for a terminator with LC.
const DT_TERMINATOR_WITH_LC: u8 = 0x02;

pub struct DmrProtocol;

impl Protocol for DmrProtocol {
    fn name(&self) -> &'static str {
        "DMR"
    }

    fn slot(&self, header: &DatagramHeader) -> u8 {
        header.slot()
    }

    fn is_end_of_call(&self, header: &DatagramHeader) -> bool {
        header.data_sync() && header.flags & 0x0F == DT_TERMINATOR_WITH_LC
    }
}

pub type TagDmrData = Tagger<DmrProtocol>;

pub fn new() -> TagDmrData {
    Tagger::new(DmrProtocol)
}
