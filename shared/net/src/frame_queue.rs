//! Outbound frame queue. Taggers enqueue the datagrams for every
//! destination of one input frame, then flush once, so all copies leave in
//! a single batch.

use std::net::SocketAddr;

use bytes::{BufMut, Bytes, BytesMut};
use dv_core::wire::{self, DATAGRAM_HDR_LEN};
use tracing::debug;

use crate::udp::Socket;
use crate::NetResult;

/// Addressing and stream metadata for one payload datagram.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameMeta {
    pub seq: u8,
    pub src_id: u32,
    pub dst_id: u32,
    pub peer_id: u32,
    pub flags: u8,
    pub stream_id: u32,
}

/// Builds the fixed 20-byte payload datagram header plus payload.
pub fn build_datagram(tag: &[u8; 4], meta: FrameMeta, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(DATAGRAM_HDR_LEN + payload.len());
    buf.put_slice(tag);
    buf.put_u8(meta.seq);
    buf.put_slice(&meta.src_id.to_be_bytes()[1..]);
    buf.put_slice(&meta.dst_id.to_be_bytes()[1..]);
    buf.put_u32(meta.peer_id);
    buf.put_u8(meta.flags);
    buf.put_u32(meta.stream_id);
    buf.put_slice(payload);
    buf.freeze()
}

/// Parsed view of a payload datagram header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DatagramHeader {
    pub seq: u8,
    pub src_id: u32,
    pub dst_id: u32,
    pub peer_id: u32,
    pub flags: u8,
    pub stream_id: u32,
}

impl DatagramHeader {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < DATAGRAM_HDR_LEN {
            return None;
        }
        Some(Self {
            seq: data[wire::DATAGRAM_SEQ_OFFSET],
            src_id: u32::from(data[5]) << 16 | u32::from(data[6]) << 8 | u32::from(data[7]),
            dst_id: u32::from(data[8]) << 16 | u32::from(data[9]) << 8 | u32::from(data[10]),
            peer_id: u32::from_be_bytes([data[11], data[12], data[13], data[14]]),
            flags: data[wire::DATAGRAM_FLAGS_OFFSET],
            stream_id: u32::from_be_bytes([data[16], data[17], data[18], data[19]]),
        })
    }

    pub fn slot(&self) -> u8 {
        if self.flags & wire::FLAG_SLOT2 != 0 {
            2
        } else {
            1
        }
    }

    pub fn is_private(&self) -> bool {
        self.flags & wire::FLAG_PRIVATE != 0
    }

    pub fn data_sync(&self) -> bool {
        self.flags & wire::FLAG_DATA_SYNC != 0
    }

    pub fn voice_sync(&self) -> bool {
        self.flags & wire::FLAG_VOICE_SYNC != 0
    }
}

#[derive(Default)]
pub struct FrameQueue {
    pending: Vec<(Bytes, SocketAddr)>,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an already-built datagram for `addr`.
    pub fn enqueue(&mut self, datagram: Bytes, addr: SocketAddr) {
        self.pending.push((datagram, addr));
    }

    /// Builds and queues a payload datagram for `addr`.
    pub fn enqueue_frame(
        &mut self,
        tag: &[u8; 4],
        meta: FrameMeta,
        payload: &[u8],
        addr: SocketAddr,
    ) {
        self.enqueue(build_datagram(tag, meta, payload), addr);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Sends everything queued as one batch.
    pub async fn flush(&mut self, socket: &Socket) -> NetResult<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        let batch = std::mem::take(&mut self.pending);
        debug!(count = batch.len(), "flushing frame queue");
        socket.write_multi(&batch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datagram_header_layout() {
        let meta = FrameMeta {
            seq: 7,
            src_id: 0x123456,
            dst_id: 0x0000C8,
            peer_id: 0x00C0FFEE,
            flags: wire::FLAG_SLOT2 | wire::FLAG_VOICE_SYNC | 0x03,
            stream_id: 0xDEADBEEF,
        };
        let datagram = build_datagram(wire::TAG_DMR_DATA, meta, &[0xAA; 33]);

        assert_eq!(&datagram[..4], b"DMRD");
        assert_eq!(datagram[4], 7);
        assert_eq!(&datagram[5..8], &[0x12, 0x34, 0x56]);
        assert_eq!(&datagram[8..11], &[0x00, 0x00, 0xC8]);
        assert_eq!(&datagram[11..15], &[0x00, 0xC0, 0xFF, 0xEE]);
        assert_eq!(datagram[15], 0x93);
        assert_eq!(&datagram[16..20], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(datagram.len(), DATAGRAM_HDR_LEN + 33);

        let header = DatagramHeader::parse(&datagram).unwrap();
        assert_eq!(header.seq, 7);
        assert_eq!(header.src_id, 0x123456);
        assert_eq!(header.dst_id, 0xC8);
        assert_eq!(header.peer_id, 0x00C0FFEE);
        assert_eq!(header.slot(), 2);
        assert!(header.voice_sync());
        assert!(!header.data_sync());
        assert_eq!(header.stream_id, 0xDEADBEEF);
    }

    #[tokio::test]
    async fn flush_sends_batched_copies() {
        let tx = Socket::open(&["127.0.0.1:0".parse().unwrap()]).await.unwrap();
        let rx = Socket::open(&["127.0.0.1:0".parse().unwrap()]).await.unwrap();
        let addr = rx.local_addrs()[0];

        let mut queue = FrameQueue::new();
        let meta = FrameMeta { stream_id: 1, ..Default::default() };
        queue.enqueue_frame(wire::TAG_P25_DATA, meta, &[1, 2, 3], addr);
        queue.enqueue_frame(wire::TAG_P25_DATA, meta, &[4, 5, 6], addr);
        assert_eq!(queue.len(), 2);

        queue.flush(&tx).await.unwrap();
        assert!(queue.is_empty());

        let mut buf = [0u8; 128];
        let (len, _) = rx.read(&mut buf).await.unwrap();
        assert_eq!(len, DATAGRAM_HDR_LEN + 3);
        let (len, _) = rx.read(&mut buf).await.unwrap();
        assert_eq!(len, DATAGRAM_HDR_LEN + 3);
    }
}
