/**
 * Link Latency Demo
 *
 * Measures how long the multiplexer takes to turn bytes into events:
 * - Serial: one DEPTH record at a time over an in-memory link, write to event
 * - Video: synthetic frames over loopback TCP, arrival spacing and throughput
 *
 * Prints summary statistics. No hardware needed.
 */

use auv_station::link::mock::MockConnector;
use auv_station::link::{TcpConnector, TcpTransport, Transport};
use auv_station::mux::{MuxSettings, TelemetryEvent, TelemetryMultiplexer};
use auv_station::pubsub::EventSink;
use auv_station::vehicle::{FrameStreamer, SolidColorSource};
use crossbeam_channel::{unbounded, Sender};
use std::net::TcpListener;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SERIAL_SAMPLES: usize = 500;
const VIDEO_FRAMES: usize = 100;

struct Stamp {
    tx: Sender<(TelemetryEvent, Instant)>,
}

impl EventSink<TelemetryEvent> for Stamp {
    fn emit(&self, event: TelemetryEvent) {
        let _ = self.tx.send((event, Instant::now()));
    }
}

fn stats(name: &str, data: &[u64]) {
    if data.is_empty() {
        println!("{}: No data", name);
        return;
    }

    let mut sorted = data.to_vec();
    sorted.sort();

    let mean = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
    let p50 = sorted[sorted.len() * 50 / 100];
    let p95 = sorted[sorted.len() * 95 / 100];
    let p99 = sorted[sorted.len() * 99 / 100];

    println!("{:12} │ Mean: {:8.2} µs", name, mean);
    println!("{:12} │ P50:  {:8} µs │ P95: {:8} µs │ P99: {:8} µs", "", p50, p95, p99);
    println!("{:12} │ Min:  {:8} µs │ Max: {:8} µs", "", sorted[0], sorted[sorted.len() - 1]);
    println!();
}

fn main() {
    println!("==============================================");
    println!("  AUV Station Link Latency");
    println!("==============================================\n");

    // vehicle camera end on loopback
    let listener = match TcpListener::bind("127.0.0.1:0") {
        Ok(l) => l,
        Err(e) => {
            eprintln!("cannot bind loopback listener: {}", e);
            return;
        }
    };
    let port = listener.local_addr().map(|a| a.port()).unwrap_or(0);
    thread::spawn(move || {
        let running = AtomicBool::new(true);
        let source = SolidColorSource::default();
        let mut streamer = FrameStreamer::new(source, Duration::from_millis(5));
        if let Ok((stream, _)) = listener.accept() {
            if let Ok(transport) = TcpTransport::from_stream(stream) {
                let _ = streamer.serve(Box::new(transport), &running);
            }
        }
    });

    let (serial, serial_peers) = MockConnector::new("serial");
    let video = TcpConnector::new("127.0.0.1", port, Duration::from_secs(1));
    let (tx, rx) = unbounded();
    let settings = MuxSettings {
        backoff_initial: Duration::from_millis(10),
        backoff_max: Duration::from_millis(100),
        ..MuxSettings::default()
    };
    let mux = TelemetryMultiplexer::start(Box::new(serial), Box::new(video), settings, Arc::new(Stamp { tx }));

    let mut vehicle = match serial_peers.recv_timeout(Duration::from_secs(2)) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("serial link never connected");
            return;
        }
    };

    println!("Collecting {} serial samples and {} frames...\n", SERIAL_SAMPLES, VIDEO_FRAMES);

    let mut serial_latencies = Vec::with_capacity(SERIAL_SAMPLES);
    let mut frame_gaps = Vec::with_capacity(VIDEO_FRAMES);
    let mut last_frame: Option<Instant> = None;
    let mut frame_bytes = 0usize;
    let started = Instant::now();

    let deadline = started + Duration::from_secs(30);
    while (serial_latencies.len() < SERIAL_SAMPLES || frame_gaps.len() < VIDEO_FRAMES) && Instant::now() < deadline {
        let mut sent_at = None;
        if serial_latencies.len() < SERIAL_SAMPLES {
            let record = format!("DEPTH,{:.2}\n", serial_latencies.len() as f32 * 0.01);
            sent_at = Some(Instant::now());
            if vehicle.write_all(record.as_bytes()).is_err() {
                eprintln!("serial peer went away");
                break;
            }
        }

        // wait for the depth event, counting frames that show up meanwhile
        loop {
            let (event, at) = match rx.recv_timeout(Duration::from_secs(2)) {
                Ok(e) => e,
                Err(_) => break,
            };
            match event {
                TelemetryEvent::Sensor(_) => {
                    if let Some(sent) = sent_at {
                        serial_latencies.push(at.duration_since(sent).as_micros() as u64);
                    }
                    break;
                }
                TelemetryEvent::Frame(frame) => {
                    if let Some(prev) = last_frame {
                        frame_gaps.push(at.duration_since(prev).as_micros() as u64);
                    }
                    last_frame = Some(at);
                    frame_bytes += frame.pixels.len();
                    if sent_at.is_none() {
                        break;
                    }
                }
                _ => {}
            }
        }
    }

    let elapsed = started.elapsed();
    mux.shutdown();

    println!("==============================================");
    println!("  RESULTS ({:.2}s)", elapsed.as_secs_f64());
    println!("==============================================\n");
    stats("Serial", &serial_latencies);
    stats("Frame gap", &frame_gaps);
    println!(
        "Video throughput: {:.1} MB/s",
        frame_bytes as f64 / elapsed.as_secs_f64() / 1_000_000.0
    );
}
