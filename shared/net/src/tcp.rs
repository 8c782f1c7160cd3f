//! TCP stream variant of the transport: one connection per remote, with
//! length-prefixed frames so datagram boundaries survive the stream.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::{NetError, NetResult};

const MAX_FRAME_LEN: usize = dv_core::wire::DATA_PACKET_LENGTH;

pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    pub async fn open(addr: SocketAddr) -> NetResult<Self> {
        let inner = TcpListener::bind(addr).await.map_err(NetError::Bind)?;
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> NetResult<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    pub async fn accept(&self) -> NetResult<(Stream, SocketAddr)> {
        let (stream, addr) = self.inner.accept().await?;
        Ok((Stream { inner: stream }, addr))
    }
}

pub struct Stream {
    inner: TcpStream,
}

impl Stream {
    pub async fn connect(addr: SocketAddr) -> NetResult<Self> {
        let inner = TcpStream::connect(addr).await?;
        Ok(Self { inner })
    }

    pub fn peer_addr(&self) -> NetResult<SocketAddr> {
        Ok(self.inner.peer_addr()?)
    }

    /// Reads one length-prefixed frame into `buffer`.
    pub async fn read(&mut self, buffer: &mut [u8]) -> NetResult<usize> {
        let len = self.inner.read_u16().await? as usize;
        if len > MAX_FRAME_LEN || len > buffer.len() {
            return Err(NetError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "oversized frame",
            )));
        }
        self.inner.read_exact(&mut buffer[..len]).await?;
        Ok(len)
    }

    /// Writes one length-prefixed frame.
    pub async fn write(&mut self, buffer: &[u8]) -> NetResult<usize> {
        self.inner.write_u16(buffer.len() as u16).await?;
        self.inner.write_all(buffer).await?;
        self.inner.flush().await?;
        Ok(buffer.len())
    }
}
