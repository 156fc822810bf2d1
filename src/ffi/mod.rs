use std::ffi::{c_char, CStr};
use std::ptr;

use tracing::warn;

use crate::config::{ConfigStore, MOTOR_COUNT, SERVO_COUNT};
use crate::error::StationError;
use crate::link::LinkState;
use crate::protocol::record::BATTERY_COUNT;
use crate::pubsub::Subscriber;
use crate::station::{StationController, UiAction, VehicleMode};
use crate::telemetry::{SensorKey, SensorValue, TelemetryState};

pub const AUV_OK: i32 = 0;
pub const AUV_ERR_NULL: i32 = -1;
pub const AUV_ERR_LINK_UNAVAILABLE: i32 = -2;
pub const AUV_ERR_ESTOP_LATCHED: i32 = -3;
pub const AUV_ERR_INVALID_TRANSITION: i32 = -4;
pub const AUV_ERR_CONFIG: i32 = -5;
pub const AUV_ERR_NOT_RUNNING: i32 = -6;
pub const AUV_ERR_OTHER: i32 = -7;
//output buffer too small
pub const AUV_ERR_BUFFER: i32 = -8;
pub const AUV_ERR_TIMEOUT: i32 = -9;

//actions without arguments
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuvAction{
    Start = 0,
    Stop = 1,
    EmergencyStop = 2,
    AutonomousConfirm = 3,
    Reset = 4,
    PingVehicle = 5,
    SaveConfig = 6,
}

impl From<AuvAction> for UiAction{
    fn from(action: AuvAction) -> Self{
        match action{
            AuvAction::Start => UiAction::Start,
            AuvAction::Stop => UiAction::Stop,
            AuvAction::EmergencyStop => UiAction::EmergencyStop,
            AuvAction::AutonomousConfirm => UiAction::AutonomousConfirm,
            AuvAction::Reset => UiAction::Reset,
            AuvAction::PingVehicle => UiAction::PingVehicle,
            AuvAction::SaveConfig => UiAction::SaveConfig,
        }
    }
}

//flat snapshot for C front ends. NaN means "no reading yet"
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AuvStatus{
    //0 idle, 1 manual, 2 autonomous, 3 emergency stop
    pub mode: u8,
    //0 disconnected, 1 connecting, 2 connected, 3 faulted
    pub serial_link: u8,
    pub video_link: u8,
    //-1 not probed yet, 0 unreachable, 1 reachable
    pub vehicle_reachable: i8,
    pub camera_enabled: bool,
    pub depth: f32,
    pub temperature: f32,
    pub humidity: f32,
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub batteries: [f32; 4],
    pub motors: [u16; MOTOR_COUNT],
    pub servos: [u16; SERVO_COUNT],
    pub frame_width: u32,
    pub frame_height: u32,
    pub frame_depth: u8,
}

impl From<&TelemetryState> for AuvStatus{
    fn from(state: &TelemetryState) -> Self{
        let mut status = AuvStatus{
            mode: mode_code(state.mode),
            serial_link: link_code(state.serial_link),
            video_link: link_code(state.video_link),
            vehicle_reachable: state.liveness.as_ref().map(|l| l.reachable as i8).unwrap_or(-1),
            camera_enabled: state.camera_enabled,
            depth: f32::NAN,
            temperature: f32::NAN,
            humidity: f32::NAN,
            roll: f32::NAN,
            pitch: f32::NAN,
            yaw: f32::NAN,
            batteries: [f32::NAN; BATTERY_COUNT as usize],
            motors: state.motors,
            servos: state.servos,
            frame_width: 0,
            frame_height: 0,
            frame_depth: 0,
        };

        for reading in state.sensors.values(){
            match reading.value{
                SensorValue::Depth{ meters } => status.depth = meters,
                SensorValue::Temperature(t) => status.temperature = t.value,
                SensorValue::Humidity{ percent } => status.humidity = percent,
                SensorValue::Battery{ index, volts } =>{
                    let slot = (index as usize).checked_sub(1).and_then(|i| status.batteries.get_mut(i));
                    if let Some(slot) = slot{
                        *slot = volts;
                    }
                }
                SensorValue::Imu{ roll, pitch, yaw } =>{
                    status.roll = roll;
                    status.pitch = pitch;
                    status.yaw = yaw;
                }
                SensorValue::Acoustic{ .. } => {}
            }
        }

        if let Some(sample) = &state.last_frame{
            status.frame_width = sample.frame.width;
            status.frame_height = sample.frame.height;
            status.frame_depth = sample.frame.depth;
        }
        status
    }
}

fn mode_code(mode: VehicleMode) -> u8{
    match mode{
        VehicleMode::Idle => 0,
        VehicleMode::Manual => 1,
        VehicleMode::Autonomous => 2,
        VehicleMode::EmergencyStop => 3,
    }
}

fn link_code(state: LinkState) -> u8{
    state as u8
}

fn result_code(result: Result<(), StationError>) -> i32{
    match result{
        Ok(()) => AUV_OK,
        Err(StationError::LinkUnavailable(_)) | Err(StationError::GracePeriodExceeded(_)) => AUV_ERR_LINK_UNAVAILABLE,
        Err(StationError::EmergencyStopLatched) => AUV_ERR_ESTOP_LATCHED,
        Err(StationError::InvalidTransition{ .. }) => AUV_ERR_INVALID_TRANSITION,
        Err(StationError::Config(_)) | Err(StationError::Encode(_)) => AUV_ERR_CONFIG,
        Err(StationError::NotRunning) => AUV_ERR_NOT_RUNNING,
        Err(StationError::DispatchTimeout(_)) => AUV_ERR_TIMEOUT,
        Err(StationError::UnknownAction(_)) => AUV_ERR_OTHER,
    }
}

pub struct AuvStation{
    inner: StationController,
    states: Subscriber<TelemetryState>,
}

unsafe fn c_str<'a>(s: *const c_char) -> Option<&'a str>{
    if s.is_null(){
        return None;
    }
    unsafe{ CStr::from_ptr(s).to_str().ok() }
}

//start a station from a TOML config file, or from defaults when `config_path`
//is null. returns null if the config cannot be loaded
#[no_mangle]
pub unsafe extern "C" fn auv_station_new(config_path: *const c_char) -> *mut AuvStation{
    let store = if config_path.is_null(){
        ConfigStore::new()
    }else{
        let path = match unsafe{ c_str(config_path) }{
            Some(p) => p,
            None => return ptr::null_mut(),
        };
        match ConfigStore::load(path){
            Ok(store) => store,
            Err(e) =>{
                warn!("config load failed: {}", e);
                return ptr::null_mut();
            }
        }
    };

    match StationController::start(store){
        Ok(inner) =>{
            let states = inner.subscribe();
            Box::into_raw(Box::new(AuvStation{ inner, states }))
        }
        Err(e) =>{
            warn!("station start failed: {}", e);
            ptr::null_mut()
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn auv_station_free(station: *mut AuvStation){
    if !station.is_null(){
        unsafe{ drop(Box::from_raw(station)); }
    }
}

#[no_mangle]
pub unsafe extern "C" fn auv_station_dispatch(station: *mut AuvStation, action: AuvAction) -> i32{
    if station.is_null(){
        return AUV_ERR_NULL;
    }
    let s = unsafe{ &*station };
    result_code(s.inner.dispatch(action.into()))
}

#[no_mangle]
pub unsafe extern "C" fn auv_station_enable_camera(station: *mut AuvStation, enabled: bool) -> i32{
    if station.is_null(){
        return AUV_ERR_NULL;
    }
    let s = unsafe{ &*station };
    result_code(s.inner.dispatch(UiAction::EnableCamera(enabled)))
}

#[no_mangle]
pub unsafe extern "C" fn auv_station_update_config(
    station: *mut AuvStation,
    key: *const c_char,
    value: *const c_char,
) -> i32{
    if station.is_null(){
        return AUV_ERR_NULL;
    }
    let (key, value) = match unsafe{ (c_str(key), c_str(value)) }{
        (Some(k), Some(v)) => (k.to_string(), v.to_string()),
        _ => return AUV_ERR_NULL,
    };
    let s = unsafe{ &*station };
    result_code(s.inner.dispatch(UiAction::UpdateConfig{ key, value }))
}

//fill `out` with the latest state. returns 1 if it changed since the last
//poll, 0 if not
#[no_mangle]
pub unsafe extern "C" fn auv_station_poll(station: *mut AuvStation, out: *mut AuvStatus) -> i32{
    if station.is_null() || out.is_null(){
        return AUV_ERR_NULL;
    }
    let s = unsafe{ &*station };
    let (state, changed) = match s.states.poll(){
        Some(state) => (state, 1),
        None => (s.inner.latest(), 0),
    };
    unsafe{ *out = AuvStatus::from(&state); }
    changed
}

//copy the last operator-facing error as a NUL-terminated string. returns the
//message length, 0 if there is none
#[no_mangle]
pub unsafe extern "C" fn auv_station_last_error(station: *mut AuvStation, out: *mut c_char, max_len: usize) -> i32{
    if station.is_null() || out.is_null(){
        return AUV_ERR_NULL;
    }
    let s = unsafe{ &*station };
    let message = match s.inner.latest().last_error{
        Some(m) => m,
        None => return 0,
    };
    if message.len() + 1 > max_len{
        return AUV_ERR_BUFFER;
    }
    unsafe{
        ptr::copy_nonoverlapping(message.as_ptr(), out as *mut u8, message.len());
        *out.add(message.len()) = 0;
    }
    message.len() as i32
}

//copy the pixels of the last received frame. returns 1 on success, 0 when
//no frame has arrived yet
#[no_mangle]
pub unsafe extern "C" fn auv_station_copy_frame(
    station: *mut AuvStation,
    out_data: *mut u8,
    out_len: *mut usize,
    max_len: usize,
) -> i32{
    if station.is_null() || out_data.is_null() || out_len.is_null(){
        return AUV_ERR_NULL;
    }
    let s = unsafe{ &*station };
    match s.inner.latest().last_frame{
        Some(sample) =>{
            let pixels = &sample.frame.pixels;
            if pixels.len() > max_len{
                return AUV_ERR_BUFFER;
            }
            unsafe{
                ptr::copy_nonoverlapping(pixels.as_ptr(), out_data, pixels.len());
                *out_len = pixels.len();
            }
            1
        }
        None => 0,
    }
}

#[no_mangle]
pub unsafe extern "C" fn auv_station_sensor_is_live(station: *mut AuvStation, max_age_ms: u64) -> bool{
    if station.is_null(){
        return false;
    }
    let s = unsafe{ &*station };
    s.inner.latest().is_live(SensorKey::Depth, std::time::Duration::from_millis(max_age_ms))
}
