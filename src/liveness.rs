/**
 * Liveness Monitor
 *
 * Probes vehicle reachability with an OS ping on a fixed interval, on its own
 * thread, so a stuck data channel can never delay a probe (and a slow probe
 * can never stall a channel). The result is a single latest-value cell.
 */

use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::VehicleConfig;
use crate::pubsub::{EventSink, Subscriber, Topic};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Reachable,
    Unreachable,
}

/// Outcome of the most recent probe
#[derive(Debug, Clone, PartialEq)]
pub struct LivenessStatus {
    pub host: String,
    pub reachable: bool,
    pub at: SystemTime,
}

/// Anything that can tell whether a host answers
pub trait Prober: Send + Sync {
    fn probe(&self, host: &str, timeout: Duration) -> Reachability;
}

/// ICMP echo through the system `ping` binary
///
/// Reachable when ping exits 0 and its output does not mention "unreachable"
/// (some platforms exit 0 on "Destination host unreachable").
#[derive(Debug, Clone, Copy, Default)]
pub struct PingProber;

impl PingProber {
    fn command(host: &str, timeout: Duration) -> Command {
        let mut cmd = Command::new("ping");
        if cfg!(windows) {
            cmd.args(["-n", "1", "-w", &timeout.as_millis().max(1).to_string()]);
        } else if cfg!(target_os = "macos") {
            cmd.args(["-c", "1", "-W", &timeout.as_millis().max(1).to_string()]);
        } else {
            cmd.args(["-c", "1", "-W", &timeout.as_secs().max(1).to_string()]);
        }
        cmd.arg(host).stdin(Stdio::null());
        cmd
    }
}

impl Prober for PingProber {
    fn probe(&self, host: &str, timeout: Duration) -> Reachability {
        match Self::command(host, timeout).output() {
            Ok(output) => {
                let text = String::from_utf8_lossy(&output.stdout).to_lowercase();
                if output.status.success() && !text.contains("unreachable") {
                    Reachability::Reachable
                } else {
                    Reachability::Unreachable
                }
            }
            Err(e) => {
                warn!("could not run ping: {}", e);
                Reachability::Unreachable
            }
        }
    }
}

enum Signal {
    ProbeNow,
    Shutdown,
}

/// Background prober with a latest-value result cell
pub struct LivenessMonitor {
    host: String,
    latest: Arc<Topic<LivenessStatus>>,
    trigger: Sender<Signal>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl LivenessMonitor {
    /// Start probing `config.ip` every `config.ping_interval_ms`. Each result is
    /// also emitted to `sink`.
    pub fn spawn(
        config: &VehicleConfig,
        prober: Arc<dyn Prober>,
        sink: Arc<dyn EventSink<LivenessStatus>>,
    ) -> Self {
        Self::spawn_with(
            &config.ip,
            Duration::from_millis(config.ping_interval_ms),
            Duration::from_millis(config.ping_timeout_ms),
            prober,
            sink,
        )
    }

    pub fn spawn_with(
        host: &str,
        interval: Duration,
        timeout: Duration,
        prober: Arc<dyn Prober>,
        sink: Arc<dyn EventSink<LivenessStatus>>,
    ) -> Self {
        let latest = Arc::new(Topic::new("/vehicle/liveness"));
        // one slot is enough: a pending probe request already covers a second one
        let (trigger, signals) = bounded(1);

        let worker = Worker {
            host: host.to_string(),
            interval,
            timeout,
            prober,
            sink,
            latest: Arc::clone(&latest),
            signals,
        };
        let handle = thread::Builder::new()
            .name("liveness".into())
            .spawn(move || worker.run())
            .map_err(|e| warn!("failed to spawn liveness monitor: {}", e))
            .ok();

        info!("liveness monitor probing {} every {:?}", host, interval);
        Self {
            host: host.to_string(),
            latest,
            trigger,
            handle: Mutex::new(handle),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Result of the most recent probe, if any has completed
    pub fn latest(&self) -> Option<LivenessStatus> {
        self.latest.peek_latest().map(|(status, _)| status)
    }

    pub fn subscribe(&self) -> Subscriber<LivenessStatus> {
        Subscriber::new(Arc::clone(&self.latest))
    }

    /// Probe now instead of waiting for the next interval. Never blocks.
    pub fn probe_now(&self) {
        let _ = self.trigger.try_send(Signal::ProbeNow);
    }

    pub fn shutdown(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            // may wait behind one queued probe request
            let _ = self.trigger.send_timeout(Signal::Shutdown, Duration::from_secs(1));
            if handle.join().is_err() {
                warn!("liveness monitor panicked");
            }
        }
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    host: String,
    interval: Duration,
    timeout: Duration,
    prober: Arc<dyn Prober>,
    sink: Arc<dyn EventSink<LivenessStatus>>,
    latest: Arc<Topic<LivenessStatus>>,
    signals: Receiver<Signal>,
}

impl Worker {
    fn run(self) {
        let mut next = Instant::now();
        loop {
            let wait = next.saturating_duration_since(Instant::now());
            match self.signals.recv_timeout(wait) {
                Ok(Signal::ProbeNow) | Err(RecvTimeoutError::Timeout) => {}
                Ok(Signal::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            }

            self.probe_once();
            next = Instant::now() + self.interval;
        }
        debug!("liveness monitor exiting");
    }

    fn probe_once(&self) {
        let reachable = self.prober.probe(&self.host, self.timeout) == Reachability::Reachable;
        let status = LivenessStatus {
            host: self.host.clone(),
            reachable,
            at: SystemTime::now(),
        };

        let previous = self.latest.peek_latest().map(|(s, _)| s.reachable);
        if previous != Some(reachable) {
            info!("vehicle {} is {}", self.host, if reachable { "reachable" } else { "unreachable" });
        }

        self.latest.publish(status.clone());
        self.sink.emit(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeProber {
        pub up: AtomicBool,
        pub calls: AtomicUsize,
    }

    impl Prober for FakeProber {
        fn probe(&self, _host: &str, _timeout: Duration) -> Reachability {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.up.load(Ordering::SeqCst) {
                Reachability::Reachable
            } else {
                Reachability::Unreachable
            }
        }
    }

    #[derive(Default)]
    struct Sink(Mutex<Vec<LivenessStatus>>);

    impl EventSink<LivenessStatus> for Sink {
        fn emit(&self, status: LivenessStatus) {
            self.0.lock().push(status);
        }
    }

    #[test]
    fn test_probes_on_interval_and_on_demand() {
        let prober = Arc::new(FakeProber { up: AtomicBool::new(true), calls: AtomicUsize::new(0) });
        let sink = Arc::new(Sink::default());
        let monitor = LivenessMonitor::spawn_with(
            "10.0.0.2",
            Duration::from_secs(60),
            Duration::from_millis(10),
            prober.clone(),
            sink.clone(),
        );
        let sub = monitor.subscribe();

        // first probe runs immediately
        let first = sub.wait(Duration::from_secs(2)).unwrap();
        assert!(first.reachable);
        assert_eq!(first.host, "10.0.0.2");

        prober.up.store(false, Ordering::SeqCst);
        monitor.probe_now();
        let second = sub.wait(Duration::from_secs(2)).unwrap();
        assert!(!second.reachable);
        assert_eq!(monitor.latest().map(|s| s.reachable), Some(false));
        assert_eq!(prober.calls.load(Ordering::SeqCst), 2);

        monitor.shutdown();
        assert_eq!(sink.0.lock().len(), 2);
    }

    #[test]
    fn test_shutdown_interrupts_wait() {
        let prober = Arc::new(FakeProber { up: AtomicBool::new(true), calls: AtomicUsize::new(0) });
        let monitor = LivenessMonitor::spawn_with(
            "10.0.0.2",
            Duration::from_secs(3600),
            Duration::from_millis(10),
            prober,
            Arc::new(Sink::default()),
        );
        thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        monitor.shutdown();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_ping_command_shape() {
        let cmd = PingProber::command("192.168.1.10", Duration::from_millis(1500));
        let args: Vec<String> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args.last().map(String::as_str), Some("192.168.1.10"));
        assert!(args.contains(&"1".to_string()));
    }
}
