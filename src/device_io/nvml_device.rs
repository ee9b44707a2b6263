use nvml_wrapper::{
    Device, Nvml, enum_wrappers::device::TemperatureSensor,
    enums::device::FanControlPolicy, error::NvmlError,
};
use tracing::{info, trace};

use crate::{device_io::DeviceIo, errors::DeviceError};

// Drive the GPUs through the NVML library
pub struct NvmlBackend {
    // NVML is thread-safe, the controllers lock is only
    // needed for the command line backend
    nvml: Nvml,
}

impl NvmlBackend {
    // Load the NVML library, a missing library or driver is fatal
    pub fn init() -> Result<Self, DeviceError> {
        let nvml = Nvml::init().map_err(|err| DeviceError::Unavailable {
            reason: format!("Failed to load NVML library: {err}"),
        })?;

        if let Ok(version) = nvml.sys_driver_version() {
            info!("NVML successfully initialized, driver {}", version);
        }

        Ok(Self { nvml })
    }

    // Number of GPUs NVML can see
    pub fn device_count(&self) -> Result<u32, DeviceError> {
        self.nvml.device_count().map_err(|err| DeviceError::Unavailable {
            reason: format!("Failed to count GPUs: {err}"),
        })
    }

    // Return a NVML device handle
    fn get(&self, index: u32) -> Result<Device<'_>, NvmlError> {
        self.nvml.device_by_index(index)
    }

    // Apply the given policy to every fan of the device
    fn set_policy(
        device: &mut Device<'_>,
        policy: FanControlPolicy,
    ) -> Result<(), NvmlError> {
        for fan in 0..device.num_fans()? {
            device.set_fan_control_policy(fan, policy)?;
        }

        Ok(())
    }
}

impl DeviceIo for NvmlBackend {
    async fn read_temperature(&mut self, device: u32) -> Result<i32, DeviceError> {
        let read_error = |err: NvmlError| DeviceError::Read {
            device,
            quantity: "temperature",
            reason: err.to_string(),
        };

        let temp = self
            .get(device)
            .and_then(|d| d.temperature(TemperatureSensor::Gpu))
            .map_err(read_error)?;

        // Sensors never come close to i32::MAX
        Ok(i32::try_from(temp).unwrap_or(i32::MAX))
    }

    async fn read_fan_speed(&mut self, device: u32) -> Result<u32, DeviceError> {
        self.get(device)
            .and_then(|d| d.fan_speed(0))
            .map_err(|err| DeviceError::Read {
                device,
                quantity: "fan speed",
                reason: err.to_string(),
            })
    }

    async fn set_fan_speed(&mut self, device: u32, speed: u8) -> Result<(), DeviceError> {
        trace!("GPU {}: manual policy, {}%", device, speed);

        let mut handle = self.get(device).map_err(|err| actuation(device, err))?;

        Self::set_policy(&mut handle, FanControlPolicy::Manual)
            .map_err(|err| actuation(device, err))?;

        for fan in 0..handle.num_fans().map_err(|err| actuation(device, err))? {
            handle
                .set_fan_speed(fan, u32::from(speed))
                .map_err(|err| actuation(device, err))?;
        }

        Ok(())
    }

    async fn reset_auto_control(&mut self, device: u32) -> Result<(), DeviceError> {
        let mut handle = self.get(device).map_err(|err| actuation(device, err))?;

        Self::set_policy(&mut handle, FanControlPolicy::TemperatureContinousSw)
            .map_err(|err| actuation(device, err))
    }
}

fn actuation(device: u32, err: NvmlError) -> DeviceError {
    DeviceError::Actuation {
        device,
        reason: err.to_string(),
    }
}
