//! Orchestration: mode machine, drive mixing and the station consumer loop.

pub mod controller;
pub mod mixer;
pub mod mode;

pub use controller::{StationController, StationEvent, UiAction};
pub use mixer::{DriveMixer, DriveOutput};
pub use mode::{transition, ModeEffect, ModeEvent, Transition, VehicleMode};
