//! Engine behavior: RF/network arbitration, the DMR voice path end to
//! end through a slot, and control-channel block pacing.

use std::io::Write;
use std::sync::{Arc, Mutex};

use dv_core::site::SiteData;
use dv_core::wire;
use dv_host::dmr::{detect_sync, insert_sync, DmrEngine, DmrNetFrame, SlotType, SyncKind};
use dv_host::nxdn::NxdnEngine;
use dv_host::p25::P25Engine;
use dv_host::state::RptState;
use dv_host::{EngineConfig, NetSink, TaggedFrame};
use dv_lookups::radio_id::RadioIdLookup;
use dv_lookups::talkgroup_rules::TalkgroupRulesLookup;
use dv_net::frame_queue::DatagramHeader;
use dv_proto::dmr::lc::LinkControl;
use dv_proto::dmr::{DataType, FRAME_LENGTH_BYTES};

const RULES: &str = r#"
groupHangTime: 5
sendTalkgroups: false
groupVoice:
  - name: "TG100"
    source:
      tgid: 100
      slot: 1
    config:
      active: true
  - name: "TG500"
    source:
      tgid: 500
      slot: 0
    config:
      active: true
"#;

/// Captures everything the engines emit toward the network.
#[derive(Default)]
struct CaptureSink {
    frames: Mutex<Vec<TaggedFrame>>,
}

impl NetSink for CaptureSink {
    fn send_frame(&self, frame: TaggedFrame) {
        self.frames.lock().unwrap().push(frame);
    }
}

struct Fixture {
    _rid_file: tempfile::NamedTempFile,
    _tg_file: tempfile::NamedTempFile,
    rid: Arc<RadioIdLookup>,
    tg: Arc<TalkgroupRulesLookup>,
    site: Arc<SiteData>,
    sink: Arc<CaptureSink>,
}

fn fixture() -> Fixture {
    let mut rid_file = tempfile::NamedTempFile::new().unwrap();
    rid_file.write_all(b"42,1\n99,0\n").unwrap();
    let mut rid = RadioIdLookup::new(rid_file.path(), 0, false);
    rid.read().unwrap();

    let mut tg_file = tempfile::NamedTempFile::new().unwrap();
    tg_file.write_all(RULES.as_bytes()).unwrap();
    let mut tg = TalkgroupRulesLookup::new(tg_file.path(), 0, true);
    tg.read().unwrap();

    Fixture {
        _rid_file: rid_file,
        _tg_file: tg_file,
        rid: Arc::new(rid),
        tg: Arc::new(tg),
        site: Arc::new(SiteData {
            net_id: 0x10,
            sys_id: 0x2F1,
            channel_no: 100,
            ..Default::default()
        }),
        sink: Arc::new(CaptureSink::default()),
    }
}

fn dmr_engine(fx: &Fixture) -> DmrEngine {
    DmrEngine::new(
        EngineConfig::default(),
        fx.site.clone(),
        fx.rid.clone(),
        fx.tg.clone(),
        fx.sink.clone(),
        1,
    )
}

/// Builds a voice LC header burst the way the modem would deliver it.
fn voice_header_burst(src_id: u32, dst_id: u32) -> Vec<u8> {
    let lc = LinkControl::group(src_id, dst_id);
    let mut body = [0u8; FRAME_LENGTH_BYTES];
    dv_host::dmr::build_voice_header(&lc, &mut body);

    SlotType {
        color_code: 1,
        data_type: Some(DataType::VoiceLcHeader),
    }
    .encode(&mut body);
    insert_sync(&mut body, SyncKind::Data);

    let mut frame = vec![wire::TAG_DATA];
    frame.extend_from_slice(&body);
    frame
}

fn net_frame(src_id: u32, dst_id: u32, stream_id: u32, flags: u8) -> DmrNetFrame {
    DmrNetFrame {
        header: DatagramHeader {
            seq: 0,
            src_id,
            dst_id,
            peer_id: 0x20,
            flags,
            stream_id,
        },
        payload: vec![0x55; FRAME_LENGTH_BYTES],
    }
}

#[test]
fn rf_voice_header_starts_call_and_forwards() {
    let fx = fixture();
    let mut engine = dmr_engine(&fx);

    let frame = voice_header_burst(42, 100);
    assert!(engine.process_frame(1, &frame));

    assert_eq!(engine.slot(1).state().rf_state, RptState::Audio);
    assert_eq!(engine.slot(1).state().rf_last_dst_id, 100);

    let frames = fx.sink.frames.lock().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].tag, wire::TAG_DMR_DATA);
    assert_eq!(frames[0].meta.src_id, 42);
    assert_eq!(frames[0].meta.dst_id, 100);
    assert_ne!(frames[0].meta.stream_id, 0);

    // the burst also queues for RF repetition
    let mut out = [0u8; 64];
    assert_eq!(engine.get_frame(1, &mut out), FRAME_LENGTH_BYTES + 1);
    assert_eq!(out[0], wire::TAG_HEADER);
}

#[test]
fn denied_source_is_rejected_once() {
    let fx = fixture();
    let mut engine = dmr_engine(&fx);

    let frame = voice_header_burst(99, 100);
    assert!(!engine.process_frame(1, &frame));
    assert_eq!(engine.slot(1).state().rf_state, RptState::Rejected);

    // nothing reaches the network
    assert!(fx.sink.frames.lock().unwrap().is_empty());
}

#[test]
fn collision_guard_net_wins_both_ways() {
    let fx = fixture();
    let mut engine = dmr_engine(&fx);

    // a network call to dst 100 is up
    engine.process_network(net_frame(55, 100, 1, 0x00));
    assert_eq!(engine.slot(1).state().net_state, RptState::Audio);

    // RF frame for the same destination: net preempts, RF resets and the
    // stream is not forwarded
    let before = fx.sink.frames.lock().unwrap().len();
    assert!(!engine.process_frame(1, &voice_header_burst(42, 100)));
    assert_eq!(engine.slot(1).state().rf_state, RptState::Listening);
    assert_eq!(fx.sink.frames.lock().unwrap().len(), before);

    // RF frame for a different destination: vote collision, net wins
    assert!(!engine.process_frame(1, &voice_header_burst(42, 101)));
    assert_eq!(engine.slot(1).state().net_state, RptState::Audio);
    assert_eq!(fx.sink.frames.lock().unwrap().len(), before);
}

#[test]
fn rf_tg_hang_gates_other_network_destinations() {
    let fx = fixture();
    let mut engine = dmr_engine(&fx);

    // run and end an RF call to dst 100
    assert!(engine.process_frame(1, &voice_header_burst(42, 100)));
    {
        let slot = engine.slot_mut(1);
        let state_dst = slot.state().rf_last_dst_id;
        assert_eq!(state_dst, 100);
    }
    engine.slot_mut(1).end_rf_call();

    // hang timer protects the talkgroup: other destinations are dropped
    engine.process_network(net_frame(55, 500, 2, 0x00));
    assert_eq!(engine.slot(1).state().net_state, RptState::Listening);

    // the hung destination itself is fine
    engine.process_network(net_frame(55, 100, 3, 0x00));
    assert_eq!(engine.slot(1).state().net_state, RptState::Audio);
}

#[test]
fn network_terminator_ends_net_call() {
    let fx = fixture();
    let mut engine = dmr_engine(&fx);

    engine.process_network(net_frame(55, 100, 7, 0x00));
    assert_eq!(engine.slot(1).state().net_state, RptState::Audio);

    let terminator_flags = wire::FLAG_DATA_SYNC | DataType::TerminatorWithLc as u8;
    engine.process_network(net_frame(55, 100, 7, terminator_flags));
    assert_eq!(engine.slot(1).state().net_state, RptState::Listening);
}

#[test]
fn control_channel_emits_blocks_on_interval() {
    let fx = fixture();
    let mut engine = dmr_engine(&fx);
    engine.set_cc_running(true);

    // first tick arms the interval, later ticks emit one block each
    engine.clock(100);
    engine.clock(100);
    engine.clock(100);

    let mut out = [0u8; 64];
    let n = engine.get_frame(1, &mut out);
    assert_eq!(n, FRAME_LENGTH_BYTES + 1);
    assert_eq!(detect_sync(&out[1..n]), SyncKind::Data);

    let slot_type = SlotType::decode(&out[1..n]).unwrap();
    assert_eq!(slot_type.data_type, Some(DataType::Csbk));
}

#[test]
fn p25_engine_arbitration() {
    let fx = fixture();
    let mut engine = P25Engine::new(
        EngineConfig::default(),
        fx.site.clone(),
        fx.rid.clone(),
        fx.tg.clone(),
        fx.sink.clone(),
        0x293,
    );
    engine.affiliations_mut().add_rf_ch(101);

    engine.process_network(dv_host::p25::P25NetFrame {
        header: DatagramHeader {
            seq: 0,
            src_id: 55,
            dst_id: 100,
            peer_id: 0x20,
            flags: 0x05, // LDU1
            stream_id: 11,
        },
        payload: vec![0; 216],
    });
    assert_eq!(engine.state().net_state, RptState::Audio);

    // TDU closes it
    engine.process_network(dv_host::p25::P25NetFrame {
        header: DatagramHeader {
            seq: 1,
            src_id: 55,
            dst_id: 100,
            peer_id: 0x20,
            flags: 0x03,
            stream_id: 11,
        },
        payload: vec![0; 20],
    });
    assert_eq!(engine.state().net_state, RptState::Listening);
}

#[test]
fn nxdn_engine_net_release() {
    let fx = fixture();
    let mut engine = NxdnEngine::new(
        EngineConfig::default(),
        fx.site.clone(),
        fx.rid.clone(),
        fx.tg.clone(),
        fx.sink.clone(),
        1,
    );

    engine.process_network(dv_host::nxdn::NxdnNetFrame {
        header: DatagramHeader {
            seq: 0,
            src_id: 55,
            dst_id: 100,
            peer_id: 0x20,
            flags: 0x00,
            stream_id: 21,
        },
        payload: vec![0; 48],
    });
    assert_eq!(engine.state().net_state, RptState::Audio);

    engine.process_network(dv_host::nxdn::NxdnNetFrame {
        header: DatagramHeader {
            seq: 1,
            src_id: 55,
            dst_id: 100,
            peer_id: 0x20,
            flags: 0x08, // transmission release
            stream_id: 21,
        },
        payload: vec![0; 48],
    });
    assert_eq!(engine.state().net_state, RptState::Listening);
}
