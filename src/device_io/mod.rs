use crate::errors::DeviceError;

pub mod nvidia_settings;
pub mod nvml_device;

pub use nvidia_settings::NvidiaSettings;
pub use nvml_device::NvmlBackend;

// Access to the temperature sensor and fans of the GPUs, by device index.
//
// Implementations are not required to support concurrent use, the
// controllers serialize every call through a shared lock.
pub trait DeviceIo: Send {
    // Return the GPU core temperature in °C
    fn read_temperature(
        &mut self,
        device: u32,
    ) -> impl Future<Output = Result<i32, DeviceError>> + Send;

    // Return the current fan speed in percent
    fn read_fan_speed(
        &mut self,
        device: u32,
    ) -> impl Future<Output = Result<u32, DeviceError>> + Send;

    // Switch the fans to manual control and apply the given speed
    fn set_fan_speed(
        &mut self,
        device: u32,
        speed: u8,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send;

    // Give the fan control back to the driver
    fn reset_auto_control(
        &mut self,
        device: u32,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send;
}
