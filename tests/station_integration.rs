//! End-to-end station behaviour over in-memory links.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use auv_station::config::ConfigStore;
use auv_station::link::mock::{MockConnector, MockTransport};
use auv_station::link::{LinkState, Transport};
use auv_station::liveness::{Prober, Reachability};
use auv_station::station::{StationController, UiAction, VehicleMode};
use auv_station::telemetry::TelemetryState;
use auv_station::StationError;
use crossbeam_channel::Receiver;

struct CountingProber {
    up: AtomicBool,
    calls: AtomicUsize,
}

impl Prober for CountingProber {
    fn probe(&self, _host: &str, _timeout: Duration) -> Reachability {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.up.load(Ordering::SeqCst) {
            Reachability::Reachable
        } else {
            Reachability::Unreachable
        }
    }
}

struct Harness {
    station: StationController,
    serial: Arc<MockConnector>,
    video: Arc<MockConnector>,
    serial_peers: Receiver<MockTransport>,
    video_peers: Receiver<MockTransport>,
    prober: Arc<CountingProber>,
}

fn harness(liveness: bool) -> Harness {
    let mut store = ConfigStore::new();
    for (key, value) in [
        ("link.backoff_initial_ms", "20"),
        ("link.backoff_max_ms", "80"),
        ("link.command_queue_capacity", "8"),
        ("serial.timeout_ms", "200"),
        ("video.timeout_ms", "200"),
        ("video.auto_start", "false"),
        ("station.grace_period_ms", "300"),
        ("station.poll_interval_ms", "10"),
        ("vehicle.ping_interval_ms", "30"),
        ("vehicle.ping_timeout_ms", "10"),
    ] {
        store.set(key, value).unwrap();
    }

    let (serial, serial_peers) = MockConnector::new("serial");
    let (video, video_peers) = MockConnector::new("video");
    let serial = Arc::new(serial);
    let video = Arc::new(video);
    let prober = Arc::new(CountingProber { up: AtomicBool::new(true), calls: AtomicUsize::new(0) });
    let station_prober: Option<Arc<dyn Prober>> = if liveness { Some(prober.clone()) } else { None };

    let station = StationController::start_with(
        store,
        Box::new(Arc::clone(&serial)),
        Box::new(Arc::clone(&video)),
        station_prober,
    )
    .unwrap();

    Harness { station, serial, video, serial_peers, video_peers, prober }
}

fn wait_until<F: Fn(&TelemetryState) -> bool>(station: &StationController, f: F) -> TelemetryState {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let state = station.latest();
        if f(&state) || Instant::now() > deadline {
            return state;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

fn peer(rx: &Receiver<MockTransport>) -> MockTransport {
    rx.recv_timeout(Duration::from_secs(2)).unwrap()
}

fn lines(vehicle: &MockTransport) -> Vec<String> {
    let mut out = Vec::new();
    while let Some(line) = vehicle.read_line_timeout(Duration::from_millis(100)) {
        out.push(line);
    }
    out
}

#[test]
fn test_manual_session_round_trip() {
    let h = harness(false);
    let mut vehicle = peer(&h.serial_peers);
    wait_until(&h.station, |s| s.serial_link == LinkState::Connected);

    h.station.dispatch(UiAction::Start).unwrap();
    let sent = lines(&vehicle);
    assert_eq!(sent[0], "START");
    assert!(sent.contains(&"MOTOR,1,1500".to_string()));
    assert!(sent.contains(&"SERVO,3,1500".to_string()));

    // full surge
    vehicle
        .write_all(b"0.0,1.0,0.0,0.0,0.0,0.0,False,False,False,False,False,False,False,False,False,False\n")
        .unwrap();
    vehicle.write_all(b"DEPTH,4.50\n").unwrap();
    let state = wait_until(&h.station, |s| s.depth().is_some() && s.motors[0] == 2000);
    assert_eq!(state.mode, VehicleMode::Manual);
    assert_eq!(state.depth(), Some(4.5));
    assert_eq!(state.motors[4], 1500);

    let forwarded = lines(&vehicle);
    assert!(forwarded.contains(&"MOTOR,1,2000".to_string()));
    assert!(!forwarded.iter().any(|l| l.starts_with("MOTOR,5")));

    h.station.dispatch(UiAction::AutonomousConfirm).unwrap();
    h.station.dispatch(UiAction::Stop).unwrap();
    let stopped = lines(&vehicle);
    assert_eq!(stopped.last().map(String::as_str), Some("STOP"));
    assert!(stopped.contains(&"MOTOR,1,1500".to_string()));

    let state = wait_until(&h.station, |s| s.mode == VehicleMode::Idle);
    assert_eq!(state.mode, VehicleMode::Idle);
}

#[test]
fn test_estop_latches_until_reset() {
    let h = harness(false);
    let vehicle = peer(&h.serial_peers);
    wait_until(&h.station, |s| s.serial_link == LinkState::Connected);

    h.station.dispatch(UiAction::Start).unwrap();
    h.station.dispatch(UiAction::EmergencyStop).unwrap();
    assert!(lines(&vehicle).contains(&"ESTOP".to_string()));

    assert!(matches!(h.station.dispatch(UiAction::Start), Err(StationError::EmergencyStopLatched)));
    assert!(matches!(
        h.station.dispatch(UiAction::AutonomousConfirm),
        Err(StationError::EmergencyStopLatched)
    ));
    let state = wait_until(&h.station, |s| s.last_error.is_some());
    assert_eq!(state.mode, VehicleMode::EmergencyStop);

    h.station.dispatch(UiAction::Reset).unwrap();
    let state = wait_until(&h.station, |s| s.mode == VehicleMode::Idle);
    assert_eq!(state.mode, VehicleMode::Idle);
    assert!(state.last_error.is_none());
}

#[test]
fn test_liveness_keeps_running_while_serial_is_down() {
    let h = harness(true);
    let vehicle = peer(&h.serial_peers);
    wait_until(&h.station, |s| s.liveness.is_some());

    h.serial.set_available(false);
    vehicle.hang_up();
    wait_until(&h.station, |s| s.serial_link == LinkState::Faulted);

    let before = h.prober.calls.load(Ordering::SeqCst);
    h.prober.up.store(false, Ordering::SeqCst);
    let state = wait_until(&h.station, |s| s.liveness.as_ref().map(|l| !l.reachable).unwrap_or(false));
    assert_eq!(state.liveness.map(|l| l.reachable), Some(false));
    assert!(h.prober.calls.load(Ordering::SeqCst) > before);
    assert_eq!(state.serial_link, LinkState::Faulted);

    // reachability never lets a command through a dead link
    assert!(matches!(h.station.dispatch(UiAction::Start), Err(StationError::LinkUnavailable(_))));
}

#[test]
fn test_estop_queued_across_reconnect() {
    let h = harness(false);
    let vehicle = peer(&h.serial_peers);
    wait_until(&h.station, |s| s.serial_link == LinkState::Connected);

    h.serial.set_available(false);
    vehicle.hang_up();
    wait_until(&h.station, |s| s.serial_link == LinkState::Faulted);

    // the second one collapses into the queued first
    h.station.dispatch(UiAction::EmergencyStop).unwrap();
    h.station.dispatch(UiAction::EmergencyStop).unwrap();

    h.serial.set_available(true);
    let vehicle = peer(&h.serial_peers);
    wait_until(&h.station, |s| s.serial_link == LinkState::Connected);
    assert_eq!(lines(&vehicle), vec!["ESTOP".to_string()]);
}

#[test]
fn test_reconnect_attempts_back_off() {
    let h = harness(false);
    let vehicle = peer(&h.serial_peers);
    h.serial.set_available(false);
    vehicle.hang_up();

    thread::sleep(Duration::from_millis(600));
    let times = h.serial.attempt_times();
    assert!(times.len() >= 3, "only {} attempts", times.len());

    // gaps grow until they reach the 80ms ceiling, never hammering the port
    let gaps: Vec<Duration> = times.windows(2).skip(1).map(|w| w[1] - w[0]).collect();
    assert!(gaps.iter().all(|g| *g >= Duration::from_millis(15)));
    assert!(gaps.iter().all(|g| *g <= Duration::from_millis(400)));
}

#[test]
fn test_grace_period_stops_vehicle_when_both_links_drop() {
    let h = harness(false);
    let serial = peer(&h.serial_peers);
    let video = peer(&h.video_peers);
    wait_until(&h.station, |s| s.serial_link == LinkState::Connected);

    h.station.dispatch(UiAction::Start).unwrap();

    h.serial.set_available(false);
    h.video.set_available(false);
    serial.hang_up();
    video.hang_up();

    let state = wait_until(&h.station, |s| s.mode == VehicleMode::EmergencyStop);
    assert_eq!(state.mode, VehicleMode::EmergencyStop);
    assert!(state.last_error.unwrap_or_default().contains("both links down"));
}

#[test]
fn test_camera_request_reaches_vehicle() {
    let h = harness(false);
    let video = peer(&h.video_peers);
    wait_until(&h.station, |s| s.video_link == LinkState::Connected);

    h.station.dispatch(UiAction::EnableCamera(true)).unwrap();
    let deadline = Instant::now() + Duration::from_secs(1);
    while video.pending() == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(video.take_pending(), vec![b'1']);
    assert!(wait_until(&h.station, |s| s.camera_enabled).camera_enabled);
}

#[test]
fn test_dispatch_after_shutdown() {
    let h = harness(false);
    h.station.shutdown();
    assert!(!h.station.is_running());
    assert!(matches!(h.station.dispatch(UiAction::Stop), Err(StationError::NotRunning)));
}
