//! UDP transport. Binds one socket per address family, drains them
//! round-robin so neither starves, and optionally wraps every datagram in
//! AES-256-ECB behind a two-byte magic.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;
use bytes::Bytes;
use dv_core::wire::{AES_WRAPPED_PCKT_KEY_LEN, AES_WRAPPED_PCKT_MAGIC};
use tokio::net::UdpSocket;
use tracing::{debug, error};

use crate::{NetError, NetResult};

const AES_BLOCK_LEN: usize = 16;

pub struct Socket {
    sockets: Vec<UdpSocket>,
    counter: AtomicUsize,
    preshared_key: Option<[u8; AES_WRAPPED_PCKT_KEY_LEN]>,
}

impl Socket {
    /// Binds the given local addresses (typically one v4 and one v6).
    /// A bind failure is fatal.
    pub async fn open(addrs: &[SocketAddr]) -> NetResult<Self> {
        let mut sockets = Vec::with_capacity(addrs.len());
        for addr in addrs {
            let socket = UdpSocket::bind(addr).await.map_err(NetError::Bind)?;
            sockets.push(socket);
        }

        if sockets.is_empty() {
            return Err(NetError::NoSocket);
        }

        Ok(Self {
            sockets,
            counter: AtomicUsize::new(0),
            preshared_key: None,
        })
    }

    /// Enables AES wrapping with the given preshared key.
    pub fn set_preshared_key(&mut self, key: Option<[u8; AES_WRAPPED_PCKT_KEY_LEN]>) {
        self.preshared_key = key;
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.sockets
            .iter()
            .filter_map(|s| s.local_addr().ok())
            .collect()
    }

    /// Receives one datagram. With wrapping enabled, datagrams without the
    /// magic are silently discarded and the read continues.
    pub async fn read(&self, buffer: &mut [u8]) -> NetResult<(usize, SocketAddr)> {
        loop {
            let (len, addr) = self.recv_round_robin(buffer).await?;

            match self.preshared_key {
                None => return Ok((len, addr)),
                Some(key) => {
                    if len < 2 || buffer[..2] != AES_WRAPPED_PCKT_MAGIC {
                        debug!(%addr, "discarding datagram without crypto magic");
                        continue;
                    }

                    let crypted_len = len - 2;
                    if crypted_len % AES_BLOCK_LEN != 0 {
                        debug!(%addr, "discarding datagram with bad crypto length");
                        continue;
                    }

                    let cipher = Aes256::new(GenericArray::from_slice(&key));
                    buffer.copy_within(2..len, 0);
                    for chunk in buffer[..crypted_len].chunks_exact_mut(AES_BLOCK_LEN) {
                        cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
                    }

                    return Ok((crypted_len, addr));
                }
            }
        }
    }

    async fn recv_round_robin(&self, buffer: &mut [u8]) -> NetResult<(usize, SocketAddr)> {
        loop {
            let start = self.counter.fetch_add(1, Ordering::Relaxed);
            let n = self.sockets.len();

            // drain whichever socket is ready, beginning at the rotation
            // point so one busy family cannot starve the other
            for i in 0..n {
                let socket = &self.sockets[(start + i) % n];
                match socket.try_recv_from(buffer) {
                    Ok(result) => return Ok(result),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                    Err(e) => {
                        error!(error = %e, "recv_from failed");
                        return Err(NetError::Io(e));
                    }
                }
            }

            match self.sockets.as_slice() {
                [a] => {
                    a.readable().await?;
                }
                [a, b, ..] => {
                    tokio::select! {
                        r = a.readable() => r?,
                        r = b.readable() => r?,
                    }
                }
                [] => return Err(NetError::NoSocket),
            }
        }
    }

    /// Sends one datagram, wrapping it first when a key is configured.
    pub async fn write(&self, buffer: &[u8], addr: SocketAddr) -> NetResult<usize> {
        let socket = self.socket_for(addr)?;

        match self.preshared_key {
            None => Ok(socket.send_to(buffer, addr).await?),
            Some(key) => {
                let out = wrap(buffer, &key);
                socket.send_to(&out, addr).await?;
                Ok(buffer.len())
            }
        }
    }

    /// Sends a batch of datagrams in one call, so every destination of a
    /// fan-out lands within the same scheduling quantum.
    pub async fn write_multi(&self, datagrams: &[(Bytes, SocketAddr)]) -> NetResult<usize> {
        let mut total = 0;
        for (payload, addr) in datagrams {
            total += self.write(payload, *addr).await?;
        }
        Ok(total)
    }

    fn socket_for(&self, addr: SocketAddr) -> NetResult<&UdpSocket> {
        self.sockets
            .iter()
            .find(|s| {
                s.local_addr()
                    .map(|local| local.is_ipv4() == addr.is_ipv4())
                    .unwrap_or(false)
            })
            .ok_or(NetError::NoSocket)
    }
}

fn wrap(buffer: &[u8], key: &[u8; AES_WRAPPED_PCKT_KEY_LEN]) -> Vec<u8> {
    let crypted_len = buffer.len().div_ceil(AES_BLOCK_LEN) * AES_BLOCK_LEN;

    let mut out = vec![0u8; crypted_len + 2];
    out[..2].copy_from_slice(&AES_WRAPPED_PCKT_MAGIC);
    out[2..2 + buffer.len()].copy_from_slice(buffer);

    let cipher = Aes256::new(GenericArray::from_slice(key));
    for chunk in out[2..].chunks_exact_mut(AES_BLOCK_LEN) {
        cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn any_v4() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn plain_round_trip() {
        let a = Socket::open(&[any_v4()]).await.unwrap();
        let b = Socket::open(&[any_v4()]).await.unwrap();

        let payload = b"DMRD hello";
        a.write(payload, b.local_addrs()[0]).await.unwrap();

        let mut buf = [0u8; 1500];
        let (len, from) = b.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], payload);
        assert_eq!(from, a.local_addrs()[0]);
    }

    #[tokio::test]
    async fn aes_wrap_round_trip() {
        let key = [0x42u8; AES_WRAPPED_PCKT_KEY_LEN];

        let mut a = Socket::open(&[any_v4()]).await.unwrap();
        let mut b = Socket::open(&[any_v4()]).await.unwrap();
        a.set_preshared_key(Some(key));
        b.set_preshared_key(Some(key));

        let payload: Vec<u8> = (0..37u8).collect(); // not block aligned
        a.write(&payload, b.local_addrs()[0]).await.unwrap();

        let mut buf = [0u8; 1500];
        let (len, _) = b.read(&mut buf).await.unwrap();
        // padded up to the block size; leading bytes match
        assert_eq!(len, 48);
        assert_eq!(&buf[..payload.len()], payload.as_slice());
        assert!(buf[payload.len()..len].iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn unwrapped_packets_are_discarded() {
        let key = [0x24u8; AES_WRAPPED_PCKT_KEY_LEN];

        let plain = Socket::open(&[any_v4()]).await.unwrap();
        let mut wrapped = Socket::open(&[any_v4()]).await.unwrap();
        wrapped.set_preshared_key(Some(key));

        let target = wrapped.local_addrs()[0];
        plain.write(b"not wrapped", target).await.unwrap();

        let mut buf = [0u8; 1500];
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            wrapped.read(&mut buf),
        )
        .await;
        // the un-magic'd packet never surfaces
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn write_multi_reaches_every_destination() {
        let tx = Socket::open(&[any_v4()]).await.unwrap();
        let rx1 = Socket::open(&[any_v4()]).await.unwrap();
        let rx2 = Socket::open(&[any_v4()]).await.unwrap();

        let batch = vec![
            (Bytes::from_static(b"one"), rx1.local_addrs()[0]),
            (Bytes::from_static(b"two"), rx2.local_addrs()[0]),
        ];
        let total = tx.write_multi(&batch).await.unwrap();
        assert_eq!(total, 6);

        let mut buf = [0u8; 64];
        let (len, _) = rx1.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"one");
        let (len, _) = rx2.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"two");
    }
}
