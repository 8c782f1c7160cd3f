//! End-to-end fabric behavior: the login/auth/config handshake, keepalive
//! eviction and talkgroup-scoped routing.

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use dv_core::wire;
use dv_fne::network::{auth_digest, FneNetwork};
use dv_fne::peer::{ConnectionState, PeerConnection};
use dv_fne::tags::{dmr, RouteContext};
use dv_fne::FneConfig;
use dv_lookups::radio_id::RadioIdLookup;
use dv_lookups::talkgroup_rules::TalkgroupRulesLookup;
use dv_net::frame_queue::{build_datagram, FrameMeta};
use dv_net::udp::Socket;

const RULES: &str = r#"
groupHangTime: 5
sendTalkgroups: false
groupVoice:
  - name: "TG1"
    source:
      tgid: 10
      slot: 1
    config:
      active: true
      inclusion: [1, 2, 3]
  - name: "TG20"
    source:
      tgid: 20
      slot: 1
    config:
      active: true
      exclusion: [9]
  - name: "Parrot"
    source:
      tgid: 9990
      slot: 1
    config:
      active: true
      parrot: true
"#;

struct Fixture {
    _rid_file: tempfile::NamedTempFile,
    _tg_file: tempfile::NamedTempFile,
    network: Arc<FneNetwork>,
    server_addr: SocketAddr,
}

async fn fixture(password: &str) -> Fixture {
    let mut rid_file = tempfile::NamedTempFile::new().unwrap();
    rid_file.write_all(b"42,1\n7,1\n").unwrap();
    let mut rid = RadioIdLookup::new(rid_file.path(), 0, false);
    rid.read().unwrap();

    let mut tg_file = tempfile::NamedTempFile::new().unwrap();
    tg_file.write_all(RULES.as_bytes()).unwrap();
    let mut tg = TalkgroupRulesLookup::new(tg_file.path(), 0, true);
    tg.read().unwrap();

    let socket = Socket::open(&["127.0.0.1:0".parse().unwrap()]).await.unwrap();
    let server_addr = socket.local_addrs()[0];

    let config = FneConfig {
        password: password.to_string(),
        ping_time: 1,
        max_missed_pings: 3,
        ..Default::default()
    };

    let network = Arc::new(FneNetwork::new(
        config,
        Arc::new(socket),
        Arc::new(rid),
        Arc::new(tg),
    ));

    Fixture {
        _rid_file: rid_file,
        _tg_file: tg_file,
        network,
        server_addr,
    }
}

fn tagged(tag: &[u8], peer_id: u32, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(tag);
    out.extend_from_slice(&peer_id.to_be_bytes());
    out.extend_from_slice(body);
    out
}

#[tokio::test]
async fn login_auth_config_handshake() {
    let fx = fixture("secret").await;
    let peer_id = 0x00C0FFEE;
    let peer_addr: SocketAddr = "127.0.0.1:40001".parse().unwrap();

    // login draws a salt and parks the peer in WaitingAuth
    fx.network
        .handle_datagram(&tagged(wire::TAG_REPEATER_LOGIN, peer_id, &[]), peer_addr, 100)
        .await;

    let salt = {
        let conn = fx.network.peers().get(&peer_id).expect("connection exists");
        assert_eq!(conn.state, ConnectionState::WaitingAuth);
        assert!(conn.salt >= wire::RAND_MIN);
        conn.salt
    };

    // correct digest moves to WaitingConfig
    let digest = auth_digest(salt, "secret");
    fx.network
        .handle_datagram(&tagged(wire::TAG_REPEATER_AUTH, peer_id, &digest), peer_addr, 101)
        .await;
    assert_eq!(
        fx.network.peers().get(&peer_id).unwrap().state,
        ConnectionState::WaitingConfig
    );

    // JSON body completes the exchange
    let body = br#"{"identity":"SITE-1","rxFrequency":451000000}"#;
    fx.network
        .handle_datagram(&tagged(wire::TAG_REPEATER_CONFIG, peer_id, body), peer_addr, 102)
        .await;

    let conn = fx.network.peers().get(&peer_id).unwrap();
    assert_eq!(conn.state, ConnectionState::Running);
    assert!(conn.is_running());
}

#[tokio::test]
async fn wrong_digest_deletes_the_connection() {
    let fx = fixture("secret").await;
    let peer_id = 0x1001;
    let peer_addr: SocketAddr = "127.0.0.1:40002".parse().unwrap();

    fx.network
        .handle_datagram(&tagged(wire::TAG_REPEATER_LOGIN, peer_id, &[]), peer_addr, 100)
        .await;

    let digest = auth_digest(0xDEAD_BEEF, "wrong-password");
    fx.network
        .handle_datagram(&tagged(wire::TAG_REPEATER_AUTH, peer_id, &digest), peer_addr, 101)
        .await;

    assert!(fx.network.peers().get(&peer_id).is_none());
}

#[tokio::test]
async fn duplicate_login_is_nak_d() {
    let fx = fixture("secret").await;
    let peer_id = 0x1002;
    let peer_addr: SocketAddr = "127.0.0.1:40003".parse().unwrap();

    fx.network
        .handle_datagram(&tagged(wire::TAG_REPEATER_LOGIN, peer_id, &[]), peer_addr, 100)
        .await;
    let salt_before = fx.network.peers().get(&peer_id).unwrap().salt;

    // a second login while a connection exists must not reset the salt
    fx.network
        .handle_datagram(&tagged(wire::TAG_REPEATER_LOGIN, peer_id, &[]), peer_addr, 101)
        .await;
    assert_eq!(fx.network.peers().get(&peer_id).unwrap().salt, salt_before);
}

#[tokio::test]
async fn ping_starvation_evicts_the_peer() {
    let fx = fixture("secret").await;
    let peer_id = 0x1003;
    let peer_addr: SocketAddr = "127.0.0.1:40004".parse().unwrap();

    fx.network
        .handle_datagram(&tagged(wire::TAG_REPEATER_LOGIN, peer_id, &[]), peer_addr, 1000)
        .await;

    // ping_time 1s x 3 missed = 3s allowance
    fx.network.evict_stale_peers(1003);
    assert!(fx.network.peers().get(&peer_id).is_some());

    fx.network.evict_stale_peers(1004);
    assert!(fx.network.peers().get(&peer_id).is_none());
}

#[tokio::test]
async fn closing_removes_connected_peer() {
    let fx = fixture("secret").await;
    let peer_id = 0x1004;
    let peer_addr: SocketAddr = "127.0.0.1:40005".parse().unwrap();

    fx.network
        .handle_datagram(&tagged(wire::TAG_REPEATER_LOGIN, peer_id, &[]), peer_addr, 100)
        .await;
    let salt = fx.network.peers().get(&peer_id).unwrap().salt;
    fx.network
        .handle_datagram(
            &tagged(wire::TAG_REPEATER_AUTH, peer_id, &auth_digest(salt, "secret")),
            peer_addr,
            101,
        )
        .await;
    fx.network
        .handle_datagram(&tagged(wire::TAG_REPEATER_CONFIG, peer_id, b"{}"), peer_addr, 102)
        .await;
    assert!(fx.network.peers().get(&peer_id).unwrap().is_running());

    fx.network
        .handle_datagram(&tagged(wire::TAG_REPEATER_CLOSING, peer_id, &[]), peer_addr, 103)
        .await;
    assert!(fx.network.peers().get(&peer_id).is_none());
}

// ---- routing policy ----

fn running_peer(peer_id: u32, port: u16) -> PeerConnection {
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let mut conn = PeerConnection::new(peer_id, addr, 1, 0);
    conn.state = ConnectionState::Running;
    conn.connected = true;
    conn
}

struct RoutingFixture {
    _rid_file: tempfile::NamedTempFile,
    _tg_file: tempfile::NamedTempFile,
    rid: RadioIdLookup,
    tg: TalkgroupRulesLookup,
    peers: DashMap<u32, PeerConnection>,
}

fn routing_fixture() -> RoutingFixture {
    let mut rid_file = tempfile::NamedTempFile::new().unwrap();
    rid_file.write_all(b"42,1\n666,0\n").unwrap();
    let mut rid = RadioIdLookup::new(rid_file.path(), 0, false);
    rid.read().unwrap();

    let mut tg_file = tempfile::NamedTempFile::new().unwrap();
    tg_file.write_all(RULES.as_bytes()).unwrap();
    let mut tg = TalkgroupRulesLookup::new(tg_file.path(), 0, true);
    tg.read().unwrap();

    let peers = DashMap::new();
    for (peer, port) in [(1u32, 41001u16), (2, 41002), (3, 41003), (4, 41004), (9, 41009)] {
        peers.insert(peer, running_peer(peer, port));
    }

    RoutingFixture {
        _rid_file: rid_file,
        _tg_file: tg_file,
        rid,
        tg,
        peers,
    }
}

fn dmr_voice_datagram(peer_id: u32, src_id: u32, dst_id: u32, stream_id: u32) -> Vec<u8> {
    build_datagram(
        wire::TAG_DMR_DATA,
        FrameMeta {
            seq: 1,
            src_id,
            dst_id,
            peer_id,
            flags: 0x00, // slot 1, group voice
            stream_id,
        },
        &[0xAA; 33],
    )
    .to_vec()
}

#[test]
fn inclusion_list_scopes_the_fanout() {
    let fx = routing_fixture();
    let tagger = dmr::new();
    let ctx = RouteContext {
        peers: &fx.peers,
        rid: &fx.rid,
        tg: &fx.tg,
    };

    let sender_addr = fx.peers.get(&1).unwrap().address;
    let frame = dmr_voice_datagram(1, 42, 10, 777);
    let batch = tagger.process_frame(&ctx, &frame, sender_addr);

    // TG 10 includes peers {1,2,3}; the sender is excluded from its own
    // fan-out, peers 4 and 9 are outside the inclusion list
    let mut destinations: Vec<SocketAddr> = batch.iter().map(|(_, a)| *a).collect();
    destinations.sort();
    let expected: Vec<SocketAddr> = vec![
        fx.peers.get(&2).unwrap().address,
        fx.peers.get(&3).unwrap().address,
    ];
    assert_eq!(destinations, expected);
    // each included peer receives exactly one copy
    assert_eq!(batch.len(), 2);
}

#[test]
fn exclusion_list_blocks_one_peer() {
    let fx = routing_fixture();
    let tagger = dmr::new();
    let ctx = RouteContext {
        peers: &fx.peers,
        rid: &fx.rid,
        tg: &fx.tg,
    };

    let sender_addr = fx.peers.get(&1).unwrap().address;
    let frame = dmr_voice_datagram(1, 42, 20, 778);
    let batch = tagger.process_frame(&ctx, &frame, sender_addr);

    let destinations: Vec<SocketAddr> = batch.iter().map(|(_, a)| *a).collect();
    assert_eq!(destinations.len(), 3); // peers 2, 3, 4; 9 is excluded
    assert!(!destinations.contains(&fx.peers.get(&9).unwrap().address));
}

#[test]
fn disabled_source_is_dropped() {
    let fx = routing_fixture();
    let tagger = dmr::new();
    let ctx = RouteContext {
        peers: &fx.peers,
        rid: &fx.rid,
        tg: &fx.tg,
    };

    let sender_addr = fx.peers.get(&1).unwrap().address;
    let frame = dmr_voice_datagram(1, 666, 10, 779);
    assert!(tagger.process_frame(&ctx, &frame, sender_addr).is_empty());
}

#[test]
fn unknown_sender_peer_is_dropped() {
    let fx = routing_fixture();
    let tagger = dmr::new();
    let ctx = RouteContext {
        peers: &fx.peers,
        rid: &fx.rid,
        tg: &fx.tg,
    };

    let frame = dmr_voice_datagram(55, 42, 10, 780);
    let addr: SocketAddr = "127.0.0.1:49999".parse().unwrap();
    assert!(tagger.process_frame(&ctx, &frame, addr).is_empty());
}

#[test]
fn parrot_talkgroup_loops_back_after_call_end() {
    let fx = routing_fixture();
    let tagger = dmr::new();
    let ctx = RouteContext {
        peers: &fx.peers,
        rid: &fx.rid,
        tg: &fx.tg,
    };

    let sender_addr = fx.peers.get(&1).unwrap().address;

    // voice frames buffer silently
    for seq in 0..3u8 {
        let mut frame = dmr_voice_datagram(1, 42, 9990, 900);
        frame[4] = seq;
        assert!(tagger.process_frame(&ctx, &frame, sender_addr).is_empty());
    }

    // the terminator triggers playback of the whole stream to the sender
    let mut terminator = dmr_voice_datagram(1, 42, 9990, 900);
    terminator[15] = wire::FLAG_DATA_SYNC | 0x02; // terminator with LC
    let batch = tagger.process_frame(&ctx, &terminator, sender_addr);

    assert_eq!(batch.len(), 4);
    assert!(batch.iter().all(|(_, addr)| *addr == sender_addr));
}

#[test]
fn spoofed_source_address_is_dropped() {
    let fx = routing_fixture();
    let tagger = dmr::new();
    let ctx = RouteContext {
        peers: &fx.peers,
        rid: &fx.rid,
        tg: &fx.tg,
    };

    let frame = dmr_voice_datagram(1, 42, 10, 781);
    let wrong_addr: SocketAddr = "127.0.0.2:41001".parse().unwrap();
    assert!(tagger.process_frame(&ctx, &frame, wrong_addr).is_empty());
}
