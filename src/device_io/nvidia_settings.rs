use std::{env, io, path::PathBuf, process::Stdio};

use tokio::process::Command;
use tracing::{debug, trace};

use crate::{device_io::DeviceIo, errors::DeviceError};

const FALLBACK_DISPLAY: &str = ":0";

// Drive the GPUs through the nvidia-settings command line tool.
// Every operation spawns one process talking to the X server.
#[derive(Debug, Clone)]
pub struct NvidiaSettings {
    executable: PathBuf,
    display: String,
}

impl NvidiaSettings {
    // Use the given display, or $DISPLAY, or :0
    pub fn new(executable: impl Into<PathBuf>, display: Option<String>) -> Self {
        let x_display = display
            .or_else(|| env::var("DISPLAY").ok())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| FALLBACK_DISPLAY.to_string());

        let executable = executable.into();
        debug!("Using {:?} on display {}", executable, x_display);

        Self {
            executable,
            display: x_display,
        }
    }

    pub fn display(&self) -> &str {
        &self.display
    }

    // Run nvidia-settings with the given arguments and return
    // the standard output on success
    async fn execute(&self, args: &[String]) -> Result<Result<String, String>, DeviceError> {
        trace!("Running {:?} {:?}", self.executable, args);

        let output = Command::new(&self.executable)
            .arg("-c")
            .arg(&self.display)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| self.unavailable(err))?;

        if output.status.success() {
            Ok(Ok(String::from_utf8_lossy(&output.stdout).into_owned()))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Ok(Err(format!("{} ({})", stderr.trim(), output.status)))
        }
    }

    async fn query(
        &self,
        device: u32,
        quantity: &'static str,
        attribute: String,
    ) -> Result<i64, DeviceError> {
        let read_error = |reason: String| DeviceError::Read {
            device,
            quantity,
            reason,
        };

        let stdout = self
            .execute(&["-t".to_string(), "-q".to_string(), attribute])
            .await?
            .map_err(read_error)?;

        parse_reading(&stdout)
            .ok_or_else(|| read_error(format!("unexpected output {:?}", stdout.trim())))
    }

    async fn assign(&self, device: u32, assignments: Vec<String>) -> Result<(), DeviceError> {
        let args: Vec<String> = assignments
            .into_iter()
            .flat_map(|a| ["-a".to_string(), a])
            .collect();

        self.execute(&args)
            .await?
            .map(|_| ())
            .map_err(|reason| DeviceError::Actuation { device, reason })
    }

    fn unavailable(&self, err: io::Error) -> DeviceError {
        let reason = match err.kind() {
            io::ErrorKind::NotFound => format!("'{}' was not found", self.executable.display()),
            _ => format!("could not execute '{}': {}", self.executable.display(), err),
        };

        DeviceError::Unavailable { reason }
    }
}

impl DeviceIo for NvidiaSettings {
    async fn read_temperature(&mut self, device: u32) -> Result<i32, DeviceError> {
        let temp = self
            .query(device, "temperature", format!("[gpu:{device}]/GPUCoreTemp"))
            .await?;

        i32::try_from(temp).map_err(|_| DeviceError::Read {
            device,
            quantity: "temperature",
            reason: format!("{temp} is out of range"),
        })
    }

    async fn read_fan_speed(&mut self, device: u32) -> Result<u32, DeviceError> {
        let speed = self
            .query(device, "fan speed", format!("[fan:{device}]/GPUCurrentFanSpeed"))
            .await?;

        u32::try_from(speed).map_err(|_| DeviceError::Read {
            device,
            quantity: "fan speed",
            reason: format!("{speed} is out of range"),
        })
    }

    async fn set_fan_speed(&mut self, device: u32, speed: u8) -> Result<(), DeviceError> {
        self.assign(
            device,
            vec![
                format!("[gpu:{device}]/GPUFanControlState=1"),
                format!("[fan:{device}]/GPUTargetFanSpeed={speed}"),
            ],
        )
        .await
    }

    async fn reset_auto_control(&mut self, device: u32) -> Result<(), DeviceError> {
        self.assign(device, vec![format!("[gpu:{device}]/GPUFanControlState=0")])
            .await
    }
}

// Terse queries print the bare value, possibly surrounded by blank lines
fn parse_reading(stdout: &str) -> Option<i64> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())?
        .parse()
        .ok()
}
