pub mod config;
pub mod error;
pub mod ffi;
pub mod link;
pub mod liveness;
pub mod mux;
pub mod protocol;
pub mod pubsub;
pub mod ring_buffer;
pub mod station;
pub mod telemetry;
pub mod vehicle;

#[cfg(feature = "python")]
pub mod python;

pub use ring_buffer::RingBuffer;

pub use config::{ConfigStore, StationConfig};
pub use error::{ConfigError, FramingError, LinkError, ParseError, StationError};
pub use link::{LinkChannel, LinkState};
pub use liveness::{LivenessMonitor, LivenessStatus};
pub use mux::{ChannelKind, TelemetryEvent, TelemetryMultiplexer};
pub use protocol::{ActuatorCommand, Frame};
pub use pubsub::{Publisher, Subscriber, Topic};
pub use station::{StationController, UiAction, VehicleMode};
pub use telemetry::TelemetryState;
