//! Unit registration, group affiliation and channel-grant state for one
//! air-interface engine. DMR engines run in slotted mode, where the TSCC
//! channel multiplexes the control slot with a single grant slot; a
//! channel number otherwise carries at most one grant.

use std::collections::{HashMap, HashSet};

use dv_core::Timer;
use tracing::{info, warn};

#[derive(Clone, Debug)]
pub struct Grant {
    pub channel_no: u32,
    pub slot: u8,
    pub src_id: u32,
    timer: Timer,
}

pub struct AffiliationLookup {
    name: &'static str,
    slotted: bool,

    rf_ch_table: Vec<u32>,
    rf_grant_ch_cnt: u32,

    unit_reg_table: HashMap<u32, u64>,
    grp_aff_table: HashMap<u32, HashSet<u32>>,

    grants: HashMap<u32, Grant>,

    tscc_ch_no: u32,
    tscc_slot: u8,
}

impl AffiliationLookup {
    pub fn new(name: &'static str, slotted: bool) -> Self {
        Self {
            name,
            slotted,
            rf_ch_table: Vec::new(),
            rf_grant_ch_cnt: 0,
            unit_reg_table: HashMap::new(),
            grp_aff_table: HashMap::new(),
            grants: HashMap::new(),
            tscc_ch_no: 0,
            tscc_slot: 0,
        }
    }

    /// Seeds the voice channel pool.
    pub fn add_rf_ch(&mut self, channel_no: u32) {
        if !self.rf_ch_table.contains(&channel_no) {
            self.rf_ch_table.push(channel_no);
        }
    }

    pub fn rf_ch_available(&self) -> bool {
        !self.rf_ch_table.is_empty()
    }

    pub fn grant_count(&self) -> u32 {
        self.rf_grant_ch_cnt
    }

    /// Reserves a slot of `channel_no` for the trunking control channel.
    pub fn set_tscc(&mut self, channel_no: u32, slot: u8) {
        assert!(channel_no != 0);
        if slot == 0 || slot > 2 {
            return;
        }
        self.tscc_ch_no = channel_no;
        self.tscc_slot = slot;
    }

    // ---- unit registration ----

    pub fn unit_reg(&mut self, src_id: u32, now_secs: u64) {
        self.unit_reg_table.insert(src_id, now_secs);
    }

    pub fn unit_dereg(&mut self, src_id: u32) {
        self.unit_reg_table.remove(&src_id);
        self.group_unaff(src_id);
    }

    pub fn is_unit_reg(&self, src_id: u32) -> bool {
        self.unit_reg_table.contains_key(&src_id)
    }

    // ---- group affiliation ----

    pub fn group_aff(&mut self, src_id: u32, dst_id: u32) {
        self.grp_aff_table.entry(dst_id).or_default().insert(src_id);
    }

    pub fn group_unaff(&mut self, src_id: u32) {
        for members in self.grp_aff_table.values_mut() {
            members.remove(&src_id);
        }
        self.grp_aff_table.retain(|_, members| !members.is_empty());
    }

    pub fn has_group_aff(&self, dst_id: u32) -> bool {
        self.grp_aff_table
            .get(&dst_id)
            .map(|m| !m.is_empty())
            .unwrap_or(false)
    }

    pub fn clear_group_aff(&mut self) {
        self.grp_aff_table.clear();
    }

    // ---- channel grants ----

    /// First available slot on `channel_no`, honoring the TSCC reservation.
    fn available_slot(&self, channel_no: u32) -> u8 {
        if !self.slotted {
            return 1;
        }

        if channel_no == self.tscc_ch_no {
            let grant_slot = if self.tscc_slot == 1 { 2 } else { 1 };
            let taken = self
                .grants
                .values()
                .any(|g| g.channel_no == channel_no && g.slot == grant_slot);
            if taken {
                0
            } else {
                grant_slot
            }
        } else {
            // a non-TSCC channel carries a single grant, always on slot 1
            let taken = self.grants.values().any(|g| g.channel_no == channel_no);
            if taken {
                0
            } else {
                1
            }
        }
    }

    /// Grants a channel (and slot for slotted engines) to `dst_id`.
    pub fn grant_ch(&mut self, dst_id: u32, src_id: u32, grant_timeout_secs: u32) -> Option<(u32, u8)> {
        if dst_id == 0 {
            return None;
        }
        if !self.rf_ch_available() {
            return None;
        }

        let channel_no = self.rf_ch_table[0];
        let slot = self.available_slot(channel_no);
        if slot == 0 {
            return None;
        }

        // a channel carries at most one grant; the TSCC reservation is the
        // only slot multiplexing
        self.rf_ch_table.retain(|&ch| ch != channel_no);

        let mut timer = Timer::new(1000, grant_timeout_secs);
        timer.start();

        self.grants.insert(
            dst_id,
            Grant {
                channel_no,
                slot,
                src_id,
                timer,
            },
        );
        self.rf_grant_ch_cnt += 1;

        info!(
            lookup = self.name,
            channel_no, slot, dst_id, "granting channel"
        );

        Some((channel_no, slot))
    }

    /// Releases the grant for `dst_id`, or every active grant when
    /// `release_all` with a zero id.
    pub fn release_grant(&mut self, dst_id: u32, release_all: bool) -> bool {
        if dst_id == 0 && !release_all {
            return false;
        }

        if dst_id == 0 && release_all {
            warn!(lookup = self.name, "force releasing all channel grants");
            let dsts: Vec<u32> = self.grants.keys().copied().collect();
            for dst in dsts {
                self.release_grant(dst, false);
            }
            return true;
        }

        if let Some(grant) = self.grants.remove(&dst_id) {
            info!(
                lookup = self.name,
                channel_no = grant.channel_no,
                slot = grant.slot,
                dst_id,
                "releasing channel grant"
            );

            if !self.rf_ch_table.contains(&grant.channel_no) {
                self.rf_ch_table.push(grant.channel_no);
            }
            self.rf_grant_ch_cnt = self.rf_grant_ch_cnt.saturating_sub(1);
            return true;
        }

        false
    }

    pub fn is_granted(&self, dst_id: u32) -> bool {
        self.grants.contains_key(&dst_id)
    }

    pub fn granted_ch(&self, dst_id: u32) -> Option<u32> {
        self.grants.get(&dst_id).map(|g| g.channel_no)
    }

    pub fn granted_slot(&self, dst_id: u32) -> Option<u8> {
        self.grants.get(&dst_id).map(|g| g.slot)
    }

    pub fn granted_src(&self, dst_id: u32) -> Option<u32> {
        self.grants.get(&dst_id).map(|g| g.src_id)
    }

    /// Whether both usable slots of `channel_no` are spoken for.
    pub fn is_ch_busy(&self, channel_no: u32) -> bool {
        if channel_no == 0 {
            return false;
        }
        !self.rf_ch_table.contains(&channel_no)
            && self.grants.values().any(|g| g.channel_no == channel_no)
    }

    /// Ticks grant timers; expired grants are force-released.
    pub fn clock(&mut self, ms: u32) -> Vec<u32> {
        let mut expired = Vec::new();
        for (dst, grant) in self.grants.iter_mut() {
            grant.timer.clock(ms);
            if grant.timer.is_running() && grant.timer.has_expired() {
                expired.push(*dst);
            }
        }

        for dst in &expired {
            warn!(lookup = self.name, dst_id = dst, "grant timeout, force releasing");
            self.release_grant(*dst, false);
        }

        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slotted_with_tscc() -> AffiliationLookup {
        let mut aff = AffiliationLookup::new("DMR Affiliation", true);
        aff.add_rf_ch(100);
        aff.add_rf_ch(101);
        aff.set_tscc(100, 1);
        aff
    }

    #[test]
    fn grant_under_load() {
        let mut aff = slotted_with_tscc();

        // TSCC channel hands out its opposite slot first
        assert_eq!(aff.grant_ch(500, 42, 60), Some((100, 2)));
        assert_eq!(aff.grant_ch(600, 43, 60), Some((101, 1)));
        // both channels are spoken for
        assert_eq!(aff.grant_ch(700, 44, 60), None);
    }

    #[test]
    fn release_restores_channel() {
        let mut aff = slotted_with_tscc();

        aff.grant_ch(500, 42, 60).unwrap();
        assert!(aff.is_granted(500));
        assert!(aff.is_ch_busy(100));

        assert!(aff.release_grant(500, false));
        assert!(!aff.is_granted(500));
        assert!(!aff.is_ch_busy(100));
        assert_eq!(aff.grant_count(), 0);

        // the channel is grantable again
        assert_eq!(aff.grant_ch(501, 42, 60), Some((100, 2)));
    }

    #[test]
    fn release_all() {
        let mut aff = slotted_with_tscc();
        aff.grant_ch(500, 42, 60).unwrap();
        aff.grant_ch(600, 43, 60).unwrap();

        assert!(aff.release_grant(0, true));
        assert_eq!(aff.grant_count(), 0);
        assert!(aff.rf_ch_available());

        // zero id without release_all is a no-op
        assert!(!aff.release_grant(0, false));
    }

    #[test]
    fn grant_timer_expiry_auto_releases() {
        let mut aff = AffiliationLookup::new("P25 Affiliation", false);
        aff.add_rf_ch(1);

        aff.grant_ch(500, 42, 2).unwrap();
        assert!(aff.clock(1999).is_empty());
        let expired = aff.clock(1);
        assert_eq!(expired, vec![500]);
        assert!(!aff.is_granted(500));
        assert!(aff.rf_ch_available());
    }

    #[test]
    fn affiliation_tracking() {
        let mut aff = AffiliationLookup::new("NXDN Affiliation", false);
        aff.unit_reg(42, 1000);
        assert!(aff.is_unit_reg(42));

        aff.group_aff(42, 500);
        aff.group_aff(43, 500);
        assert!(aff.has_group_aff(500));

        aff.group_unaff(42);
        assert!(aff.has_group_aff(500));

        aff.unit_dereg(43);
        assert!(!aff.has_group_aff(500));
        assert!(!aff.is_unit_reg(43));
    }
}
