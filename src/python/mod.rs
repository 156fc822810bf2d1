use pyo3::prelude::*;
use pyo3::exceptions::{PyRuntimeError, PyTimeoutError, PyValueError};
use pyo3::types::PyDict;
use crate::config::ConfigStore;
use crate::error::StationError;
use crate::pubsub::Subscriber;
use crate::station::{StationController, UiAction};
use crate::telemetry::{SensorValue, TelemetryState};

fn to_py_err(e: StationError) -> PyErr{
    match e{
        StationError::UnknownAction(_) | StationError::Config(_) | StationError::Encode(_) =>{
            PyValueError::new_err(e.to_string())
        }
        StationError::DispatchTimeout(_) => PyTimeoutError::new_err(e.to_string()),
        _ => PyRuntimeError::new_err(e.to_string()),
    }
}

#[pyclass(name = "Station")]
pub struct PyStation{
    inner: StationController,
    states: Subscriber<TelemetryState>,
}

#[pymethods]
impl PyStation{
    //defaults when no config path is given
    #[new]
    #[pyo3(signature = (config_path=None))]
    fn new(config_path: Option<&str>) -> PyResult<Self>{
        let store = match config_path{
            Some(path) => ConfigStore::load(path).map_err(|e| PyValueError::new_err(e.to_string()))?,
            None => ConfigStore::new(),
        };
        let inner = StationController::start(store).map_err(to_py_err)?;
        let states = inner.subscribe();
        Ok(PyStation{ inner, states })
    }

    //operator words, e.g. "start", "estop", "camera on", "set vehicle.ip 10.0.0.2"
    fn dispatch(&self, action: &str) -> PyResult<()>{
        let action: UiAction = action.parse().map_err(to_py_err)?;
        self.inner.dispatch(action).map_err(to_py_err)
    }

    fn update_config(&self, key: &str, value: &str) -> PyResult<()>{
        let action = UiAction::UpdateConfig{ key: key.to_string(), value: value.to_string() };
        self.inner.dispatch(action).map_err(to_py_err)
    }

    fn enable_camera(&self, enabled: bool) -> PyResult<()>{
        self.inner.dispatch(UiAction::EnableCamera(enabled)).map_err(to_py_err)
    }

    //state dict if it changed since the last poll
    fn poll(&self, py: Python<'_>) -> PyResult<Option<PyObject>>{
        match self.states.poll(){
            Some(state) => Ok(Some(state_dict(py, &state)?)),
            None => Ok(None),
        }
    }

    fn snapshot(&self, py: Python<'_>) -> PyResult<PyObject>{
        state_dict(py, &self.inner.latest())
    }

    //(width, height, depth, pixels) of the last frame
    fn last_frame(&self) -> Option<(u32, u32, u8, Vec<u8>)>{
        self.inner.latest().last_frame.map(|sample|{
            let f = &sample.frame;
            (f.width, f.height, f.depth, f.pixels.clone())
        })
    }

    fn mode(&self) -> String{
        self.inner.latest().mode.as_str().to_string()
    }

    fn is_running(&self) -> bool{
        self.inner.is_running()
    }

    fn dropped_events(&self) -> u64{
        self.inner.dropped_events()
    }

    fn shutdown(&self){
        self.inner.shutdown();
    }
}

fn state_dict(py: Python<'_>, state: &TelemetryState) -> PyResult<PyObject>{
    let d = PyDict::new(py);
    d.set_item("mode", state.mode.as_str())?;
    d.set_item("serial_link", state.serial_link.as_str())?;
    d.set_item("video_link", state.video_link.as_str())?;
    d.set_item("vehicle_reachable", state.liveness.as_ref().map(|l| l.reachable))?;
    d.set_item("camera_enabled", state.camera_enabled)?;
    d.set_item("motors", state.motors.to_vec())?;
    d.set_item("servos", state.servos.to_vec())?;
    d.set_item("last_error", state.last_error.clone())?;

    let sensors = PyDict::new(py);
    for reading in state.sensors.values(){
        match reading.value{
            SensorValue::Depth{ meters } => sensors.set_item("depth", meters)?,
            SensorValue::Temperature(t) => sensors.set_item("temperature", t.value)?,
            SensorValue::Humidity{ percent } => sensors.set_item("humidity", percent)?,
            SensorValue::Battery{ index, volts } => sensors.set_item(format!("battery{}", index), volts)?,
            SensorValue::Imu{ roll, pitch, yaw } => sensors.set_item("imu", (roll, pitch, yaw))?,
            SensorValue::Acoustic{ sound_velocity, frequency, signal_strength } =>{
                sensors.set_item("acoustic", (sound_velocity, frequency, signal_strength))?
            }
        }
    }
    d.set_item("sensors", sensors)?;

    let frame = state.last_frame.as_ref().map(|s| (s.frame.width, s.frame.height, s.frame.depth));
    d.set_item("frame", frame)?;
    Ok(d.to_object(py))
}

#[pymodule]
fn auv_station(_py: Python, m: &PyModule) -> PyResult<()>{
    m.add_class::<PyStation>()?;
    Ok(())
}

#[cfg(test)]
mod tests{
    use super::*;
    use std::io::Write;

    fn offline_config() -> tempfile::NamedTempFile{
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[serial]\nport = \"/dev/does-not-exist-auv\"\n\
             [video]\nhost = \"127.0.0.1\"\nport = 1\ntimeout_ms = 100\n\
             [vehicle]\nliveness_enabled = false"
        )
        .unwrap();
        file
    }

    #[test]
    fn test_py_station_actions(){
        let file = offline_config();
        let station = PyStation::new(file.path().to_str()).unwrap();

        assert!(station.dispatch("start").is_err());
        assert!(station.dispatch("estop").is_ok());
        //published after the loop drains its inbox
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(1);
        while station.mode() != "emergency_stop" && std::time::Instant::now() < deadline{
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(station.mode(), "emergency_stop");
        assert!(station.dispatch("reset").is_ok());
        assert!(station.dispatch("fly").is_err());
        assert!(station.update_config("drive.motor_max", "1800").is_ok());
        station.shutdown();
        assert!(!station.is_running());
    }

    #[test]
    fn test_py_station_bad_path(){
        assert!(PyStation::new(Some("/nonexistent/station.toml")).is_err());
    }
}
