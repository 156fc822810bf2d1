/**
 * Surface Station Binary
 *
 * Operator console for the station core:
 * 1. Loads the station config (aborts if it cannot be read)
 * 2. Starts the serial and video links and the liveness monitor
 * 3. Reads operator commands from stdin
 * 4. Prints mode, link and reachability changes
 *
 * Usage: surface_station [--config station.toml | --defaults]
 */

use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use auv_station::config::{ConfigStore, LoggingConfig};
use auv_station::station::{StationController, UiAction};
use auv_station::telemetry::TelemetryState;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "surface_station")]
#[command(about = "Surface station console for an AUV/ROV", long_about = None)]
#[command(version)]
struct Cli {
    /// Station configuration file
    #[arg(short, long, default_value = "station.toml")]
    config: PathBuf,

    /// Run on built-in defaults instead of reading a config file
    #[arg(long, conflicts_with = "config")]
    defaults: bool,

    /// Start streaming video as soon as the camera link is up
    #[arg(long)]
    camera: bool,
}

fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .init();
        }
    }
    Ok(())
}

fn print_status(state: &TelemetryState) {
    println!("  mode:    {}", state.mode);
    println!("  serial:  {}", state.serial_link);
    println!("  video:   {}", state.video_link);
    match &state.liveness {
        Some(l) => println!("  vehicle: {} {}", l.host, if l.reachable { "reachable" } else { "unreachable" }),
        None => println!("  vehicle: not probed"),
    }
    println!("  camera:  {}", if state.camera_enabled { "on" } else { "off" });
    if let Some(d) = state.depth() {
        println!("  depth:   {:.2} m", d);
    }
    if let Some((r, p, y)) = state.orientation() {
        println!("  orient:  roll={:.1} pitch={:.1} yaw={:.1}", r, p, y);
    }
    println!("  motors:  {:?}", state.motors);
    println!("  servos:  {:?}", state.servos);
    if let Some(e) = &state.last_error {
        println!("  error:   {}", e);
    }
}

// one line per change worth an operator's attention
fn report_changes(previous: &TelemetryState, current: &TelemetryState) {
    if previous.mode != current.mode {
        println!("[MODE] {} -> {}", previous.mode, current.mode);
    }
    if previous.serial_link != current.serial_link {
        println!("[SERIAL] {}", current.serial_link);
    }
    if previous.video_link != current.video_link {
        println!("[VIDEO] {}", current.video_link);
    }
    let was = previous.liveness.as_ref().map(|l| l.reachable);
    let now = current.liveness.as_ref().map(|l| l.reachable);
    if was != now {
        if let Some(reachable) = now {
            println!("[VEHICLE] {}", if reachable { "reachable" } else { "unreachable" });
        }
    }
    if previous.last_error != current.last_error {
        if let Some(e) = &current.last_error {
            println!("[ERROR] {}", e);
        }
    }
}

fn load_config(cli: &Cli) -> Result<ConfigStore> {
    if cli.defaults {
        return Ok(ConfigStore::new());
    }
    ConfigStore::load(&cli.config).with_context(|| format!("loading {}", cli.config.display()))
}

fn command_loop<R: BufRead>(station: &StationController, input: R) -> Result<()> {
    let mut lines = input.lines();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let line = match lines.next() {
            Some(line) => line.context("reading operator input")?,
            None => return Ok(()),
        };
        let cmd = line.trim();

        match cmd {
            "" => {}
            "quit" | "exit" | "x" => return Ok(()),
            "status" => print_status(&station.latest()),
            _ => match cmd.parse::<UiAction>() {
                Ok(action) => match station.dispatch(action) {
                    Ok(()) => println!("[OK]"),
                    Err(e) => println!("[REJECTED] {}", e),
                },
                Err(e) => println!("{}", e),
            },
        }
    }
}

// the reporter thread is stopped on every exit path of the command loop
fn run_console<R: BufRead>(station: &StationController, input: R) -> Result<()> {
    let done = AtomicBool::new(false);
    thread::scope(|scope| {
        let updates = station.subscribe();
        let done = &done;
        scope.spawn(move || {
            let mut previous = TelemetryState::default();
            while !done.load(Ordering::SeqCst) {
                if let Some(current) = updates.wait(Duration::from_millis(200)) {
                    report_changes(&previous, &current);
                    previous = current;
                }
            }
        });

        let result = command_loop(station, input);
        done.store(true, Ordering::SeqCst);
        result
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut store = load_config(&cli)?;
    if cli.camera {
        store.set("video.auto_start", "true")?;
    }
    let config = store.snapshot().context("invalid configuration")?;
    init_logging(&config.logging)?;

    println!("==============================================");
    println!("  AUV Surface Station");
    println!("==============================================");
    println!("  Serial: {} @ {}", config.serial.port, config.serial.baud_rate);
    println!("  Video:  {}:{}", config.video.host, config.video.port);
    println!("  Vehicle: {}", config.vehicle.ip);
    println!("==============================================\n");

    let station = StationController::start(store).context("starting station")?;

    println!("[Commands]");
    println!("  start | stop | auto | estop | reset");
    println!("  ping | camera on|off | set <key> <value> | save");
    println!("  status | quit\n");

    let result = run_console(&station, io::stdin().lock());

    println!("[SHUTDOWN]");
    station.shutdown();
    result
}
