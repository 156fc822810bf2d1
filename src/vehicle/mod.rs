/**
 * Vehicle-side frame streamer
 *
 * Serves one station connection on the video socket: waits for the stream-start
 * byte, then sends FrameCodec-encoded frames until the stream-stop byte or a
 * hang-up. Used by the `vehicle_streamer` binary and by loopback tests.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::LinkError;
use crate::link::{is_poll_timeout, Transport};
use crate::protocol::{frame, Frame, STREAM_START, STREAM_STOP};

/// Where frames come from (a camera, a file, a test pattern)
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Frame;
}

/// Fixed single-colour image, the default test pattern is 320x240 BGR red
#[derive(Debug, Clone)]
pub struct SolidColorSource {
    frame: Frame,
}

impl SolidColorSource {
    /// `None` when the dimensions exceed the frame size limit
    pub fn new(width: u32, height: u32, pixel: &[u8]) -> Option<Self> {
        Frame::solid(width, height, pixel).ok().map(|frame| Self { frame })
    }
}

impl Default for SolidColorSource {
    fn default() -> Self {
        Self {
            frame: Frame {
                width: 320,
                height: 240,
                depth: 3,
                pixels: [0u8, 0, 255].repeat(320 * 240),
            },
        }
    }
}

impl FrameSource for SolidColorSource {
    fn next_frame(&mut self) -> Frame {
        self.frame.clone()
    }
}

/// Counters for one served connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub starts: u32,
    pub stops: u32,
}

pub struct FrameStreamer<S: FrameSource> {
    source: S,
    frame_interval: Duration,
}

impl<S: FrameSource> FrameStreamer<S> {
    pub fn new(source: S, frame_interval: Duration) -> Self {
        Self {
            source,
            frame_interval,
        }
    }

    /// Serve until the station hangs up or `running` goes false
    pub fn serve(&mut self, mut transport: Box<dyn Transport>, running: &AtomicBool) -> Result<StreamStats, LinkError> {
        let mut stats = StreamStats::default();
        let mut streaming = false;
        let mut last_sent: Option<Instant> = None;
        let mut buf = [0u8; 64];

        while running.load(Ordering::SeqCst) {
            match transport.read(&mut buf) {
                Ok(0) => {
                    info!("station disconnected");
                    break;
                }
                Ok(n) => {
                    for &byte in &buf[..n] {
                        match byte {
                            STREAM_START if !streaming => {
                                info!("stream start requested");
                                streaming = true;
                                stats.starts += 1;
                            }
                            STREAM_STOP if streaming => {
                                info!("stream stop requested");
                                streaming = false;
                                stats.stops += 1;
                            }
                            STREAM_START | STREAM_STOP => {}
                            other => debug!("ignoring control byte {:#04x}", other),
                        }
                    }
                }
                Err(ref e) if is_poll_timeout(e) => {}
                Err(e) => return Err(e.into()),
            }

            let due = last_sent.map(|t| t.elapsed() >= self.frame_interval).unwrap_or(true);
            if streaming && due {
                let bytes = frame::encode(&self.source.next_frame());
                transport.write_all(&bytes)?;
                transport.flush()?;
                stats.frames_sent += 1;
                stats.bytes_sent += bytes.len() as u64;
                last_sent = Some(Instant::now());
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::mock::MockTransport;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_default_pattern() {
        let mut source = SolidColorSource::default();
        let frame = source.next_frame();
        assert_eq!((frame.width, frame.height, frame.depth), (320, 240, 3));
        assert_eq!(&frame.pixels[..3], &[0, 0, 255]);
        assert_eq!(frame.pixels.len(), 320 * 240 * 3);
    }

    #[test]
    fn test_streams_only_between_start_and_stop() {
        let (vehicle_end, mut station) = MockTransport::pair();
        let running = Arc::new(AtomicBool::new(true));
        let server = {
            let running = Arc::clone(&running);
            thread::spawn(move || {
                let source = SolidColorSource::new(2, 2, &[7]).unwrap();
                FrameStreamer::new(source, Duration::from_millis(1)).serve(Box::new(vehicle_end), &running)
            })
        };

        thread::sleep(Duration::from_millis(120));
        assert_eq!(station.pending(), 0);

        station.write_all(&[STREAM_START]).unwrap();
        thread::sleep(Duration::from_millis(300));
        station.write_all(&[STREAM_STOP]).unwrap();
        thread::sleep(Duration::from_millis(150));

        let received = station.take_pending();
        assert!(!received.is_empty());
        let one = frame::encode(&Frame::solid(2, 2, &[7]).unwrap());
        assert_eq!(received.len() % one.len(), 0);
        assert_eq!(&received[..one.len()], &one[..]);

        // no more frames after the stop byte was handled
        thread::sleep(Duration::from_millis(150));
        assert_eq!(station.pending(), 0);

        station.hang_up();
        let stats = server.join().unwrap().unwrap();
        assert_eq!((stats.starts, stats.stops), (1, 1));
        assert_eq!(stats.frames_sent as usize, received.len() / one.len());
    }
}
