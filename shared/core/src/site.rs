//! Immutable site identity shared by reference into every engine and
//! signalling-block factory. Assembled once at startup.

use serde::{Deserialize, Serialize};

/// Channel identity plan entry: ties a 4-bit channel id to its frequency
/// layout. Frequencies in hertz, bandwidth/spacing in kHz, offset in MHz.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IdenEntry {
    pub channel_id: u8,
    pub base_frequency: u32,
    pub ch_bandwidth_khz: f32,
    pub ch_space_khz: f32,
    pub tx_offset_mhz: f32,
}

impl IdenEntry {
    pub fn is_valid(&self) -> bool {
        self.base_frequency != 0
            && self.ch_bandwidth_khz != 0.0
            && self.ch_space_khz != 0.0
            && self.tx_offset_mhz != 0.0
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SiteData {
    pub net_id: u32,
    pub sys_id: u32,
    pub site_id: u8,
    pub rfss_id: u8,
    pub channel_id: u8,
    pub channel_no: u32,
    pub service_class: u8,
    pub net_active: bool,
    /// Local time offset from UTC in hours.
    pub lto: f32,
    pub iden: IdenEntry,
}

impl SiteData {
    /// NXDN location id: 10-bit system + 12-bit site per the "small" area
    /// coding.
    pub fn location_id(&self) -> u32 {
        ((self.sys_id & 0x3FF) << 12) | (u32::from(self.site_id) & 0xFFF) << 2
    }

    pub fn set_net_active(&mut self, active: bool) {
        self.net_active = active;
    }
}
