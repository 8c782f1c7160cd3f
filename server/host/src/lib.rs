//! Air-interface engines. Each engine owns its voice, data and control
//! sub-processors and presents the same outer API to the host tick loop:
//! `process_frame` for modem bursts, `process_network` for inbound fleet
//! traffic, `get_frame` to drain the transmit queue and `clock` to drive
//! every timer.

pub mod dmr;
pub mod nxdn;
pub mod p25;
pub mod state;

use dv_net::frame_queue::FrameMeta;

/// A tagged datagram bound for the fleet network.
#[derive(Clone, Debug)]
pub struct TaggedFrame {
    pub tag: &'static [u8; 4],
    pub meta: FrameMeta,
    pub payload: Vec<u8>,
}

/// Capability handle the engines use to emit network traffic; the host
/// wires it to the fleet transport.
pub trait NetSink: Send + Sync {
    fn send_frame(&self, frame: TaggedFrame);
}

impl NetSink for tokio::sync::mpsc::UnboundedSender<TaggedFrame> {
    fn send_frame(&self, frame: TaggedFrame) {
        let _ = self.send(frame);
    }
}

/// Sink that drops everything; used where an engine runs without a network.
pub struct NullSink;

impl NetSink for NullSink {
    fn send_frame(&self, _frame: TaggedFrame) {}
}

/// Engine timing and policy knobs, assembled at startup.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// RF call hard timeout, seconds.
    pub rf_timeout: u32,
    /// Network call hard timeout, seconds.
    pub net_timeout: u32,
    /// Talkgroup hang after an RF call ends, seconds.
    pub tg_hang: u32,
    /// Network activity watchdog, seconds.
    pub net_watchdog: u32,
    /// Control channel block pacing, milliseconds.
    pub cc_packet_interval_ms: u32,
    /// Voice channel grant timeout, seconds.
    pub grant_timeout: u32,
    /// Accept trunking blocks with bad CRC (log-and-accept mode).
    pub warn_crc: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rf_timeout: 180,
            net_timeout: 180,
            tg_hang: 5,
            net_watchdog: 3,
            cc_packet_interval_ms: 100,
            grant_timeout: 60,
            warn_crc: false,
        }
    }
}

/// New 32-bit stream id; zero is reserved for "no stream".
pub fn new_stream_id() -> u32 {
    use rand::Rng;
    rand::thread_rng().gen_range(1..=u32::MAX)
}
