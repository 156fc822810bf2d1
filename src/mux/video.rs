use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::{ChannelKind, Shared, TelemetryEvent};
use crate::error::{FramingError, LinkError};
use crate::link::{Backoff, LinkChannel, LinkState};
use crate::protocol::frame::{self, Frame, FrameHeader, HEADER_LEN};

/// Payload read timeouts tolerated before a frame counts as truncated
const PAYLOAD_RETRIES: u32 = 3;

/// Video read loop: header, then exactly the declared payload.
pub(super) fn run(shared: &Shared) {
    let channel = &shared.video;
    let timeout = shared.settings.video_timeout;
    let mut backoff = Backoff::new(shared.settings.backoff_initial, shared.settings.backoff_max);

    while shared.is_running() {
        if !channel.is_connected() {
            if !shared.reconnect(ChannelKind::Video, channel, &mut backoff) {
                break;
            }
            if shared.streaming.load(Ordering::SeqCst) {
                shared.send_stream_control();
            }
            continue;
        }

        match read_frame(channel, timeout) {
            Ok(Some(frame)) => shared.sink.emit(TelemetryEvent::Frame(Arc::new(frame))),
            Ok(None) => {}
            Err(e) => {
                if !shared.is_running() {
                    break;
                }
                warn!("video read failed: {}", e);
                channel.mark_faulted();
                shared.emit_link(ChannelKind::Video, LinkState::Faulted);
            }
        }
    }
    debug!("video loop exiting");
}

/// One frame off the stream. `Ok(None)` covers recovered conditions: no data
/// yet, a bad header skipped for resync, or a truncated payload discarded.
fn read_frame(channel: &LinkChannel, timeout: Duration) -> Result<Option<Frame>, LinkError> {
    let header_bytes = match channel.read_exact(HEADER_LEN, timeout) {
        Ok(bytes) => bytes,
        Err(LinkError::Timeout(t)) => {
            trace!("no frame header within {:?}", t);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    let header = match FrameHeader::parse(&header_bytes) {
        Ok(header) => header,
        Err(e) => {
            let skip = frame::resync_offset(&header_bytes);
            warn!("{}, skipping {} bytes", e, skip);
            channel.unread(&header_bytes[skip..]);
            return Ok(None);
        }
    };

    let mut timeouts = 0;
    let pixels = loop {
        match channel.read_exact(header.payload_len, timeout) {
            Ok(pixels) => break pixels,
            Err(LinkError::Timeout(_)) if timeouts < PAYLOAD_RETRIES => timeouts += 1,
            Err(LinkError::Timeout(_)) => {
                let actual = channel.discard_pending();
                let e = FramingError::Truncated { expected: header.payload_len, actual };
                warn!("video frame discarded: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        }
    };

    match Frame::new(header.width, header.height, header.depth, pixels) {
        Ok(frame) => Ok(Some(frame)),
        Err(e) => {
            warn!("video frame discarded: {}", e);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::mock::MockConnector;
    use crate::link::Transport;

    fn channel() -> (LinkChannel, crate::link::mock::MockTransport) {
        let (connector, peers) = MockConnector::new("video");
        let channel = LinkChannel::open("video", Box::new(connector)).unwrap();
        (channel, peers.try_recv().unwrap())
    }

    #[test]
    fn test_resync_after_garbage() {
        let (channel, mut vehicle) = channel();
        let image = Frame::solid(2, 2, &[9]).unwrap();

        let mut bytes = vec![0xFF; 20];
        bytes.extend_from_slice(b"AU");
        bytes.extend(frame::encode(&image));
        vehicle.write_all(&bytes).unwrap();

        let t = Duration::from_millis(200);
        let mut got = None;
        for _ in 0..5 {
            if let Some(f) = read_frame(&channel, t).unwrap() {
                got = Some(f);
                break;
            }
        }
        assert_eq!(got, Some(image));
    }

    #[test]
    fn test_truncated_payload_discarded() {
        let (channel, mut vehicle) = channel();
        let image = Frame::solid(4, 4, &[1, 2, 3]).unwrap();
        let encoded = frame::encode(&image);
        vehicle.write_all(&encoded[..HEADER_LEN + 10]).unwrap();

        let t = Duration::from_millis(60);
        assert_eq!(read_frame(&channel, t).unwrap(), None);
        assert_eq!(channel.pending_len(), 0);

        // the stream recovers on the next whole frame
        vehicle.write_all(&encoded).unwrap();
        assert_eq!(read_frame(&channel, t).unwrap(), Some(image));
    }

    #[test]
    fn test_hangup_is_error() {
        let (channel, vehicle) = channel();
        vehicle.hang_up();
        assert!(matches!(read_frame(&channel, Duration::from_millis(100)), Err(LinkError::Closed)));
    }
}
