//! P25 data packet handler: multi-block PDUs. Alternate MBT containers
//! assemble across the header and trailing blocks, then decode as one wide
//! trunking block.

use dv_core::wire;
use dv_net::frame_queue::FrameMeta;
use dv_proto::p25::ambt::{Ambt, AmbtHeader, AMBT_BLOCK_LENGTH_BYTES, AMBT_HEADER_LENGTH_BYTES};
use dv_proto::p25::Duid;
use tracing::{debug, info, warn};

use super::{Facilities, PAYLOAD_OFFSET};
use crate::state::{RfGuard, RptState};
use crate::{new_stream_id, TaggedFrame};

#[derive(Default)]
pub struct DataPacket {
    header: Option<AmbtHeader>,
    blocks: Vec<u8>,
    blocks_expected: u8,
    blocks_received: u8,
}

impl DataPacket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.header = None;
        self.blocks.clear();
        self.blocks_expected = 0;
        self.blocks_received = 0;
    }

    /// Processes one PDU burst: either the header or a trailing block.
    pub fn process_pdu(&mut self, fac: &mut Facilities<'_>, body: &[u8]) -> bool {
        let payload = &body[PAYLOAD_OFFSET..];

        if self.header.is_none() {
            return self.process_header(fac, payload);
        }
        self.process_block(fac, payload)
    }

    fn process_header(&mut self, fac: &mut Facilities<'_>, payload: &[u8]) -> bool {
        let header = match AmbtHeader::decode(payload) {
            Ok(h) => h,
            Err(e) => {
                debug!(error = %e, "PDU header rejected");
                fac.state.rf_errs += 1;
                return false;
            }
        };

        match fac.state.rf_guard(header.llid, 0) {
            RfGuard::Accept => {}
            RfGuard::NetPreempts => {
                fac.state.reset_rf();
                return false;
            }
            RfGuard::VoteCollision => return false,
        }

        let stream_id = new_stream_id();
        fac.state.start_rf_call(RptState::Data, header.llid, 0, stream_id);

        info!(
            llid = header.llid,
            blocks = header.blocks_to_follow,
            sap = header.sap,
            "PDU header"
        );

        self.blocks_expected = header.blocks_to_follow;
        self.blocks_received = 0;
        self.blocks.clear();
        self.header = Some(header);

        if self.blocks_expected == 0 {
            fac.state.end_rf_call();
            self.reset();
        }
        true
    }

    fn process_block(&mut self, fac: &mut Facilities<'_>, payload: &[u8]) -> bool {
        if payload.len() < AMBT_BLOCK_LENGTH_BYTES {
            return false;
        }

        self.blocks.extend_from_slice(&payload[..AMBT_BLOCK_LENGTH_BYTES]);
        self.blocks_received += 1;
        fac.state.rf_frames += 1;

        if self.blocks_received < self.blocks_expected {
            return true;
        }

        let header = self.header.take().expect("header present in block run");

        // reassemble header + blocks for both local decode and forwarding
        let mut wire_form = Vec::with_capacity(AMBT_HEADER_LENGTH_BYTES + self.blocks.len());
        wire_form.extend_from_slice(&header.encode());
        wire_form.extend_from_slice(&self.blocks);

        match Ambt::decode(&wire_form[..AMBT_HEADER_LENGTH_BYTES], &self.blocks) {
            Ok(ambt) => match ambt.decode_tsbk() {
                Ok(tsbk) => {
                    info!(opcode = tsbk.lco, mfid = tsbk.mfid, "AMBT decoded");
                }
                Err(e) => debug!(error = %e, "AMBT trunking payload rejected"),
            },
            Err(e) => {
                warn!(error = %e, "AMBT user data failed checks");
                fac.state.rf_errs += 1;
            }
        }

        fac.sink.send_frame(TaggedFrame {
            tag: wire::TAG_P25_DATA,
            meta: FrameMeta {
                seq: fac.state.rf_frames as u8,
                src_id: header.llid,
                dst_id: 0,
                peer_id: fac.site.net_id,
                flags: Duid::Pdu as u8,
                stream_id: fac.state.rf_stream_id,
            },
            payload: wire_form,
        });

        fac.state.end_rf_call();
        self.reset();
        true
    }
}
