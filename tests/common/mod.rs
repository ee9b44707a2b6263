#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use nvfand::{
    controller::ControllerSettings, device_io::DeviceIo, errors::DeviceError,
    fan_curve::LinearCurve,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    ReadTemperature(u32),
    ReadFanSpeed(u32),
    SetFanSpeed(u32, u8),
    ResetAutoControl(u32),
}

// Scripted hardware, shared between the fake and the test body
#[derive(Debug, Default)]
pub struct FakeState {
    // None simulates an unparsable reading
    pub temperatures: HashMap<u32, Option<i32>>,
    pub fan_speeds: HashMap<u32, Option<u32>>,

    pub unavailable: bool,
    pub failing_writes: bool,
    pub io_delay: Option<Duration>,

    pub calls: Vec<Call>,
    pub in_flight: usize,
    pub max_in_flight: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FakeDevice {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn with_temperature(self, device: u32, temp: i32) -> Self {
        self.state().temperatures.insert(device, Some(temp));
        self
    }

    pub fn with_fan_speed(self, device: u32, speed: u32) -> Self {
        self.state().fan_speeds.insert(device, Some(speed));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn count(&self, call: Call) -> usize {
        self.state().calls.iter().filter(|c| **c == call).count()
    }

    pub fn writes(&self, device: u32) -> Vec<u8> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::SetFanSpeed(d, speed) if *d == device => Some(*speed),
                _ => None,
            })
            .collect()
    }

    async fn io<T, F>(&self, call: Call, f: F) -> Result<T, DeviceError>
    where
        F: FnOnce(&mut FakeState) -> Result<T, DeviceError>,
    {
        let delay = {
            let mut state = self.state();
            state.calls.push(call);
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.io_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        state.in_flight -= 1;

        if state.unavailable {
            return Err(DeviceError::Unavailable {
                reason: "'nvidia-settings' was not found".to_string(),
            });
        }

        f(&mut state)
    }
}

impl DeviceIo for FakeDevice {
    async fn read_temperature(&mut self, device: u32) -> Result<i32, DeviceError> {
        self.io(Call::ReadTemperature(device), |state| {
            state
                .temperatures
                .get(&device)
                .copied()
                .unwrap_or(Some(0))
                .ok_or_else(|| DeviceError::Read {
                    device,
                    quantity: "temperature",
                    reason: "unexpected output \"N/A\"".to_string(),
                })
        })
        .await
    }

    async fn read_fan_speed(&mut self, device: u32) -> Result<u32, DeviceError> {
        self.io(Call::ReadFanSpeed(device), |state| {
            state
                .fan_speeds
                .get(&device)
                .copied()
                .unwrap_or(Some(0))
                .ok_or_else(|| DeviceError::Read {
                    device,
                    quantity: "fan speed",
                    reason: "unexpected output \"N/A\"".to_string(),
                })
        })
        .await
    }

    async fn set_fan_speed(&mut self, device: u32, speed: u8) -> Result<(), DeviceError> {
        self.io(Call::SetFanSpeed(device, speed), |state| {
            if state.failing_writes {
                return Err(DeviceError::Actuation {
                    device,
                    reason: "exit status: 1".to_string(),
                });
            }

            state.fan_speeds.insert(device, Some(u32::from(speed)));
            Ok(())
        })
        .await
    }

    async fn reset_auto_control(&mut self, device: u32) -> Result<(), DeviceError> {
        self.io(Call::ResetAutoControl(device), |_| Ok(())).await
    }
}

pub fn settings(points: &[(i32, u8)], tolerance: u32) -> ControllerSettings {
    ControllerSettings {
        curve: LinearCurve::new(points).unwrap().build_extended(),
        tolerance,
        interval: Duration::from_secs(4),
        min_speed: 0,
        max_speed: 100,
        io_timeout: Some(Duration::from_secs(10)),
    }
}
