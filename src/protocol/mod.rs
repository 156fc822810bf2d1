//! Wire formats: serial records and video frames.

pub mod frame;
pub mod record;

pub use frame::{Frame, FrameHeader};
pub use record::{ActuatorCommand, InboundRecord};

/// One-byte upstream control messages on the video socket
pub const STREAM_START: u8 = b'1';
pub const STREAM_STOP: u8 = b'0';
