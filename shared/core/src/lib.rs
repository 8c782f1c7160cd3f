//! Infrastructure shared by every layer of the stack: the RF ring buffer,
//! millisecond tick timers, the immutable site identity record and the wire
//! tags/constants of the modem and fleet-network framing.

pub mod ring_buffer;
pub mod site;
pub mod timer;
pub mod wire;

pub use ring_buffer::RingBuffer;
pub use site::{IdenEntry, SiteData};
pub use timer::Timer;
