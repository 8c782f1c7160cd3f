//! Per-direction call state shared by every engine (the DMR engine holds
//! one instance per slot). Implements the RF/network traffic arbitration
//! guard, the call timers and the per-call counters.

use dv_core::Timer;
use tracing::{debug, info, warn};

use crate::EngineConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RptState {
    Listening,
    Audio,
    Data,
    Rejected,
}

/// Outcome of the RF-side collision guard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RfGuard {
    Accept,
    /// The network call owns this destination; reset the RF side.
    NetPreempts,
    /// Another site is voting the same call; drop the RF stream.
    VoteCollision,
}

/// Outcome of the network-side arbitration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetGuard {
    Accept,
    /// Local RF traffic wins over the inbound network stream.
    RfPreempts,
    /// The RF talkgroup hang is still protecting a different destination.
    TgHang,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RssiStats {
    pub current: i32,
    pub min: i32,
    pub max: i32,
    accum: i64,
    count: u32,
}

impl RssiStats {
    pub fn sample(&mut self, dbm: i32) {
        self.current = dbm;
        if self.count == 0 {
            self.min = dbm;
            self.max = dbm;
        } else {
            self.min = self.min.min(dbm);
            self.max = self.max.max(dbm);
        }
        self.accum += i64::from(dbm);
        self.count += 1;
    }

    pub fn average(&self) -> Option<i32> {
        (self.count > 0).then(|| (self.accum / i64::from(self.count)) as i32)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

pub struct CallState {
    label: &'static str,

    pub rf_state: RptState,
    pub net_state: RptState,

    pub rf_last_dst_id: u32,
    pub rf_last_src_id: u32,
    pub net_last_dst_id: u32,
    pub net_last_src_id: u32,

    pub rf_stream_id: u32,
    pub net_stream_id: u32,

    pub rf_timeout: Timer,
    pub net_timeout: Timer,
    pub rf_tg_hang: Timer,
    pub net_watchdog: Timer,
    pub cc_packet_interval: Timer,

    pub rf_frames: u32,
    pub rf_bits: u32,
    pub rf_errs: u32,
    pub rf_lost: u32,
    pub net_frames: u32,
    pub net_lost: u32,
    pub net_missed: u32,

    pub rssi: RssiStats,

    /// Last source that drew a rejection log, so repeats stay quiet.
    rejected_src: Option<u32>,
}

impl CallState {
    pub fn new(label: &'static str, config: &EngineConfig) -> Self {
        let mut cc_packet_interval = Timer::new(1000, 0);
        cc_packet_interval.set_timeout(0, config.cc_packet_interval_ms);

        Self {
            label,
            rf_state: RptState::Listening,
            net_state: RptState::Listening,
            rf_last_dst_id: 0,
            rf_last_src_id: 0,
            net_last_dst_id: 0,
            net_last_src_id: 0,
            rf_stream_id: 0,
            net_stream_id: 0,
            rf_timeout: Timer::new(1000, config.rf_timeout),
            net_timeout: Timer::new(1000, config.net_timeout),
            rf_tg_hang: Timer::new(1000, config.tg_hang),
            net_watchdog: Timer::new(1000, config.net_watchdog),
            cc_packet_interval,
            rf_frames: 0,
            rf_bits: 0,
            rf_errs: 0,
            rf_lost: 0,
            net_frames: 0,
            net_lost: 0,
            net_missed: 0,
            rssi: RssiStats::default(),
            rejected_src: None,
        }
    }

    /// Arbitration for a new RF stream while network traffic may be up.
    pub fn rf_guard(&self, src_id: u32, dst_id: u32) -> RfGuard {
        if self.net_state == RptState::Listening {
            return RfGuard::Accept;
        }

        if dst_id == self.net_last_dst_id {
            // network traffic wins; the RF side resets
            return RfGuard::NetPreempts;
        }

        if src_id != self.net_last_src_id || dst_id != self.net_last_dst_id {
            return RfGuard::VoteCollision;
        }

        RfGuard::Accept
    }

    /// Arbitration for an inbound network stream against local RF.
    pub fn net_guard(&self, _src_id: u32, dst_id: u32) -> NetGuard {
        if self.rf_state != RptState::Listening {
            return NetGuard::RfPreempts;
        }

        if self.rf_last_dst_id != 0
            && self.rf_last_dst_id != dst_id
            && self.rf_tg_hang.is_running()
            && !self.rf_tg_hang.has_expired()
        {
            return NetGuard::TgHang;
        }

        NetGuard::Accept
    }

    pub fn start_rf_call(&mut self, state: RptState, src_id: u32, dst_id: u32, stream_id: u32) {
        self.rf_state = state;
        self.rf_last_src_id = src_id;
        self.rf_last_dst_id = dst_id;
        self.rf_stream_id = stream_id;
        self.rf_frames = 0;
        self.rf_bits = 0;
        self.rf_errs = 0;
        self.rf_lost = 0;
        self.rssi.reset();
        self.rf_timeout.start();
        self.rejected_src = None;

        info!(engine = self.label, src_id, dst_id, stream_id, "RF call start");
    }

    pub fn end_rf_call(&mut self) {
        if self.rf_state != RptState::Listening {
            info!(
                engine = self.label,
                src_id = self.rf_last_src_id,
                dst_id = self.rf_last_dst_id,
                frames = self.rf_frames,
                errs = self.rf_errs,
                "RF call end"
            );
        }

        self.rf_state = RptState::Listening;
        self.rf_stream_id = 0;
        self.rf_timeout.stop();
        self.rf_tg_hang.start();
    }

    /// Resets the RF side without the end-of-call bookkeeping (collision
    /// preemption path).
    pub fn reset_rf(&mut self) {
        debug!(engine = self.label, "RF reset");
        self.rf_state = RptState::Listening;
        self.rf_stream_id = 0;
        self.rf_timeout.stop();
    }

    pub fn start_net_call(&mut self, state: RptState, src_id: u32, dst_id: u32, stream_id: u32) {
        self.net_state = state;
        self.net_last_src_id = src_id;
        self.net_last_dst_id = dst_id;
        self.net_stream_id = stream_id;
        self.net_frames = 0;
        self.net_lost = 0;
        self.net_missed = 0;
        self.net_timeout.start();
        self.net_watchdog.start();

        info!(engine = self.label, src_id, dst_id, stream_id, "network call start");
    }

    pub fn end_net_call(&mut self) {
        if self.net_state != RptState::Listening {
            info!(
                engine = self.label,
                src_id = self.net_last_src_id,
                dst_id = self.net_last_dst_id,
                frames = self.net_frames,
                lost = self.net_lost,
                "network call end"
            );
        }

        self.net_state = RptState::Listening;
        self.net_stream_id = 0;
        self.net_timeout.stop();
        self.net_watchdog.stop();
    }

    pub fn reset_net(&mut self) {
        debug!(engine = self.label, "network reset");
        self.net_state = RptState::Listening;
        self.net_stream_id = 0;
        self.net_timeout.stop();
        self.net_watchdog.stop();
    }

    /// Moves the RF stream to Rejected, logging once per new offender.
    pub fn reject_rf(&mut self, src_id: u32, dst_id: u32, reason: &'static str) {
        if self.rejected_src != Some(src_id) {
            warn!(engine = self.label, src_id, dst_id, reason, "RF traffic rejected");
            self.rejected_src = Some(src_id);
        }
        self.rf_state = RptState::Rejected;
        self.rf_last_src_id = src_id;
        self.rf_last_dst_id = dst_id;
        self.rf_timeout.start();
    }

    /// Ticks every timer; returns true when the network watchdog starved.
    pub fn clock(&mut self, ms: u32) -> bool {
        self.rf_timeout.clock(ms);
        self.net_timeout.clock(ms);
        self.rf_tg_hang.clock(ms);
        self.cc_packet_interval.clock(ms);

        if self.rf_tg_hang.is_running() && self.rf_tg_hang.has_expired() {
            self.rf_tg_hang.stop();
        }

        if self.rf_state == RptState::Rejected && self.rf_timeout.has_expired() {
            self.rf_state = RptState::Listening;
            self.rf_timeout.stop();
            self.rejected_src = None;
        }

        if self.net_state != RptState::Listening {
            self.net_watchdog.clock(ms);
            if self.net_watchdog.has_expired() {
                warn!(
                    engine = self.label,
                    dst_id = self.net_last_dst_id,
                    "network watchdog expired, ending call"
                );
                self.end_net_call();
                return true;
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> CallState {
        CallState::new("test", &EngineConfig::default())
    }

    #[test]
    fn net_call_owns_its_destination() {
        let mut s = state();
        s.start_net_call(RptState::Audio, 42, 100, 1);

        // same destination: network wins, RF resets
        assert_eq!(s.rf_guard(99, 100), RfGuard::NetPreempts);
        // different destination: vote collision, RF is rejected
        assert_eq!(s.rf_guard(42, 101), RfGuard::VoteCollision);
    }

    #[test]
    fn idle_net_accepts_rf() {
        let s = state();
        assert_eq!(s.rf_guard(42, 100), RfGuard::Accept);
    }

    #[test]
    fn rf_traffic_preempts_network() {
        let mut s = state();
        s.start_rf_call(RptState::Audio, 42, 100, 1);
        assert_eq!(s.net_guard(55, 100), NetGuard::RfPreempts);
    }

    #[test]
    fn tg_hang_blocks_other_destinations() {
        let mut s = state();
        s.start_rf_call(RptState::Audio, 42, 100, 1);
        s.end_rf_call();

        // hang timer protects dst 100 against other destinations
        assert_eq!(s.net_guard(55, 101), NetGuard::TgHang);
        assert_eq!(s.net_guard(55, 100), NetGuard::Accept);

        // after the hang expires the slot is free
        s.clock(5000);
        assert_eq!(s.net_guard(55, 101), NetGuard::Accept);
    }

    #[test]
    fn watchdog_ends_stalled_net_calls() {
        let mut s = state();
        s.start_net_call(RptState::Audio, 42, 100, 7);
        assert!(!s.clock(2999));
        assert!(s.clock(2));
        assert_eq!(s.net_state, RptState::Listening);
    }

    #[test]
    fn rejected_state_clears_after_timeout() {
        let mut s = state();
        s.reject_rf(7, 100, "denied");
        assert_eq!(s.rf_state, RptState::Rejected);

        s.clock(180_000);
        assert_eq!(s.rf_state, RptState::Listening);
    }
}
