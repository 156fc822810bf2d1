use tracing::{debug, info, trace, warn};

use super::{ChannelKind, Shared, TelemetryEvent};
use crate::error::{LinkError, ParseError};
use crate::link::{Backoff, LinkState};
use crate::protocol::record::parse_inbound;
use crate::protocol::InboundRecord;
use crate::telemetry::SensorReading;

/// Serial read loop: one record per line, malformed records are logged and dropped.
pub(super) fn run(shared: &Shared) {
    let channel = &shared.serial;
    let mut backoff = Backoff::new(shared.settings.backoff_initial, shared.settings.backoff_max);

    while shared.is_running() {
        if !channel.is_connected() {
            if !shared.reconnect(ChannelKind::Serial, channel, &mut backoff) {
                break;
            }
            let flushed = shared.commands.flush(channel);
            if flushed > 0 {
                info!("flushed {} queued commands", flushed);
            }
            continue;
        }

        match channel.read_line(shared.settings.serial_timeout) {
            Ok(line) => handle_line(shared, &line),
            Err(LinkError::Timeout(t)) => trace!("no serial data within {:?}", t),
            Err(e) => {
                if !shared.is_running() {
                    break;
                }
                warn!("serial read failed: {}", e);
                channel.mark_faulted();
                shared.emit_link(ChannelKind::Serial, LinkState::Faulted);
            }
        }
    }
    debug!("serial loop exiting");
}

fn handle_line(shared: &Shared, line: &[u8]) {
    let text = match std::str::from_utf8(line) {
        Ok(text) => text,
        Err(_) => {
            warn!("discarding serial record: {}", ParseError::Encoding);
            return;
        }
    };
    if text.trim().is_empty() {
        return;
    }

    match parse_inbound(text) {
        Ok(InboundRecord::Controller(state)) => shared.sink.emit(TelemetryEvent::Controller(state)),
        Ok(InboundRecord::Sensor(value)) => shared.sink.emit(TelemetryEvent::Sensor(SensorReading::new(value))),
        Err(e) => warn!("discarding serial record {:?}: {}", text, e),
    }
}
