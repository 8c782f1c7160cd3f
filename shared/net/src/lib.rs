//! Socket transport for the fleet network: UDP with optional AES-wrapped
//! datagrams and round-robin multi-socket reads, a TCP stream variant, and
//! the frame queue that batches tagged datagrams per flush.

pub mod frame_queue;
pub mod tcp;
pub mod udp;

use thiserror::Error;

pub type NetResult<T> = Result<T, NetError>;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("socket bind failed: {0}")]
    Bind(std::io::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no socket open for address family")]
    NoSocket,
}
