//! DMR slot data packet handler: PDU header + block assembly with the
//! confirmed-data checksum bookkeeping.

use dv_core::wire;
use dv_net::frame_queue::FrameMeta;
use dv_proto::dmr::data_block::DataBlock;
use dv_proto::dmr::data_header::DataHeader;
use dv_proto::dmr::{DataType, Flco, FRAME_LENGTH_BYTES};
use tracing::{debug, info, warn};

use super::net_flags;
use super::slot::Facilities;
use crate::state::{RfGuard, RptState};
use crate::{new_stream_id, TaggedFrame};

#[derive(Default)]
pub struct DataPacket {
    header: Option<DataHeader>,
    blocks_expected: u8,
    blocks_received: u8,
    /// Assembled PDU user data across the block run.
    pdu_user_data: Vec<u8>,
}

impl DataPacket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.header = None;
        self.blocks_expected = 0;
        self.blocks_received = 0;
        self.pdu_user_data.clear();
    }

    /// PDU data header burst: opens an RF data call.
    pub fn process_header(&mut self, fac: &mut Facilities<'_>, body: &[u8]) -> bool {
        let header = match DataHeader::decode(body) {
            Ok(h) => h,
            Err(e) => {
                debug!(error = %e, "PDU data header rejected");
                fac.state.rf_errs += 1;
                return false;
            }
        };

        let flco = if header.group { Flco::Group } else { Flco::Private };

        match fac.state.rf_guard(header.src_id, header.dst_id) {
            RfGuard::Accept => {}
            RfGuard::NetPreempts => {
                fac.state.reset_rf();
                return false;
            }
            RfGuard::VoteCollision => return false,
        }

        if let Err(reason) = fac.validate_rf(header.src_id, header.dst_id, flco) {
            fac.state.reject_rf(header.src_id, header.dst_id, reason);
            return false;
        }

        let stream_id = new_stream_id();
        fac.state
            .start_rf_call(RptState::Data, header.src_id, header.dst_id, stream_id);

        info!(
            slot = fac.slot_no,
            src_id = header.src_id,
            dst_id = header.dst_id,
            blocks = header.blocks_to_follow,
            sap = header.sap,
            "PDU data header"
        );

        self.header = Some(header);
        self.blocks_expected = header.blocks_to_follow;
        self.blocks_received = 0;
        self.pdu_user_data.clear();

        self.forward(fac, body, &header, DataType::DataHeader as u8);

        let mut frame = [0u8; FRAME_LENGTH_BYTES];
        frame.copy_from_slice(body);
        fac.write_rf(wire::TAG_HEADER, &frame);

        if self.blocks_expected == 0 {
            self.finish(fac);
        }
        true
    }

    /// One PDU data block of the announced run.
    pub fn process_block(
        &mut self,
        fac: &mut Facilities<'_>,
        body: &[u8],
        data_type: DataType,
    ) -> bool {
        let Some(header) = self.header else {
            debug!(slot = fac.slot_no, "data block without header, dropping");
            return false;
        };

        if fac.state.rf_state != RptState::Data {
            return false;
        }

        let mut block = DataBlock::default();
        block.data_type = data_type;

        match block.decode(body, &header) {
            Ok(()) => {
                self.pdu_user_data.extend_from_slice(block.data());
            }
            Err(e) => {
                warn!(slot = fac.slot_no, error = %e, "PDU data block failed to decode");
                fac.state.rf_errs += 1;
                // the run continues; the peer may still assemble the PDU
            }
        }

        self.blocks_received += 1;
        fac.state.rf_frames += 1;

        self.forward(fac, body, &header, data_type as u8);

        let mut frame = [0u8; FRAME_LENGTH_BYTES];
        frame.copy_from_slice(body);
        fac.write_rf(wire::TAG_DATA, &frame);

        if self.blocks_received >= self.blocks_expected {
            self.finish(fac);
        }
        true
    }

    fn finish(&mut self, fac: &mut Facilities<'_>) {
        if let Some(header) = self.header {
            info!(
                slot = fac.slot_no,
                src_id = header.src_id,
                dst_id = header.dst_id,
                blocks = self.blocks_received,
                bytes = self.pdu_user_data.len(),
                "PDU transmission complete"
            );
        }

        fac.state.end_rf_call();
        self.reset();
    }

    fn forward(&self, fac: &mut Facilities<'_>, body: &[u8], header: &DataHeader, dt: u8) {
        let flags = net_flags(fac.slot_no, !header.group, true, false, dt);

        fac.sink.send_frame(TaggedFrame {
            tag: wire::TAG_DMR_DATA,
            meta: FrameMeta {
                seq: fac.state.rf_frames as u8,
                src_id: header.src_id,
                dst_id: header.dst_id,
                peer_id: fac.site.net_id,
                flags,
                stream_id: fac.state.rf_stream_id,
            },
            payload: body.to_vec(),
        });
    }
}
