use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap, fs::File, io::BufReader, path::Path, str::FromStr,
    time::Duration,
};

use tracing::{debug, trace, warn};

use crate::{
    controller::ControllerSettings,
    errors::ConfigError,
    fan_curve::{LinearCurve, MAX_SPEED},
};

pub const DEFAULT_EXECUTABLE: &str = "nvidia-settings";
pub const DEFAULT_TOLERANCE: u32 = 2;
pub const DEFAULT_INTERVAL: f64 = 4.;
pub const DEFAULT_IO_TIMEOUT: f64 = 10.;

// Highest curve temperature accepted, in °C
pub const MAX_TEMPERATURE: i32 = 150;

// Bounded by the 40% - 90% speed range the fans were historically
// driven within
pub const DEFAULT_CURVE: [(i32, u8); 4] = [(40, 40), (55, 50), (65, 70), (75, 90)];

// Mechanism used to talk to the GPUs
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    #[default]
    NvidiaSettings,
    Nvml,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nvidia-settings" => Ok(Backend::NvidiaSettings),
            "nvml" => Ok(Backend::Nvml),
            other => Err(format!("unknown backend \"{other}\"")),
        }
    }
}

// Control parameters of a single GPU
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    // Polling interval in seconds
    pub interval: f64,
    // Allowed difference between current and target speed, in percent
    pub tolerance: u32,
    pub curve: BTreeMap<i32, u8>,

    pub min_speed: u8,
    pub max_speed: u8,
}

// Per GPU overrides, unset fields fall back to the defaults
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct DeviceOverride {
    pub interval: Option<f64>,
    pub tolerance: Option<u32>,
    pub curve: Option<BTreeMap<i32, u8>>,

    pub min_speed: Option<u8>,
    pub max_speed: Option<u8>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub device_count: u32,
    pub backend: Backend,

    // nvidia-settings backend only
    pub executable: String,
    pub display: Option<String>,

    // Upper bound of one locked I/O section in seconds, null disables it
    pub io_timeout: Option<f64>,

    pub defaults: DeviceConfig,
    pub devices: BTreeMap<u32, DeviceOverride>,
}

impl Config {
    // Load and validate the Json configuration at the given path
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Parsing config file at: {:?}", path);

        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Config = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;

        trace!("Loaded configuration: {:?}", config);

        Ok(config)
    }

    pub fn parse(json: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;

        Ok(config)
    }

    // Check that a controller can be built for every configured GPU
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.io_timeout()?;

        for device in self.devices.keys() {
            if *device >= self.device_count {
                warn!(
                    "Configuration for GPU {} ignored, only {} GPU(s) controlled",
                    device, self.device_count
                );
            }
        }

        for device in 0..self.device_count {
            self.controller_settings(device)?;
        }

        Ok(())
    }

    // Return the effective configuration of the given GPU
    pub fn device(&self, device: u32) -> DeviceConfig {
        let defaults = &self.defaults;

        match self.devices.get(&device) {
            Some(o) => DeviceConfig {
                interval: o.interval.unwrap_or(defaults.interval),
                tolerance: o.tolerance.unwrap_or(defaults.tolerance),
                curve: o.curve.clone().unwrap_or_else(|| defaults.curve.clone()),
                min_speed: o.min_speed.unwrap_or(defaults.min_speed),
                max_speed: o.max_speed.unwrap_or(defaults.max_speed),
            },
            None => defaults.clone(),
        }
    }

    pub fn io_timeout(&self) -> Result<Option<Duration>, ConfigError> {
        self.io_timeout
            .map(|secs| positive_duration(secs).ok_or(ConfigError::InvalidTimeout(secs)))
            .transpose()
    }

    // Build the controller parameters for the given GPU
    pub fn controller_settings(
        &self,
        device: u32,
    ) -> Result<ControllerSettings, ConfigError> {
        let config = self.device(device);

        let interval = positive_duration(config.interval).ok_or(
            ConfigError::InvalidInterval {
                device,
                interval: config.interval,
            },
        )?;

        if config.min_speed > config.max_speed || config.max_speed > MAX_SPEED {
            return Err(ConfigError::InvalidSpeedRange {
                device,
                min: config.min_speed,
                max: config.max_speed,
            });
        }

        if let Some(temp) = config.curve.keys().find(|t| **t < 0) {
            return Err(ConfigError::NegativeTemperature {
                device,
                temp: *temp,
            });
        }

        // Keeps the per degree lookup table small
        if let Some(temp) = config.curve.keys().find(|t| **t > MAX_TEMPERATURE) {
            return Err(ConfigError::TemperatureTooHigh {
                device,
                temp: *temp,
                max: MAX_TEMPERATURE,
            });
        }

        let curve = LinearCurve::from_points(config.curve)
            .map_err(|source| ConfigError::Curve { device, source })?;

        Ok(ControllerSettings {
            curve: curve.build_extended(),
            tolerance: config.tolerance,
            interval,
            min_speed: config.min_speed,
            max_speed: config.max_speed,
            io_timeout: self.io_timeout()?,
        })
    }
}

// Convert seconds to a non-zero duration, None when out of range
fn positive_duration(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|duration| !duration.is_zero())
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            tolerance: DEFAULT_TOLERANCE,
            curve: DEFAULT_CURVE.into_iter().collect(),
            min_speed: 0,
            max_speed: MAX_SPEED,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_count: 1,
            backend: Backend::default(),
            executable: DEFAULT_EXECUTABLE.to_string(),
            display: None,
            io_timeout: Some(DEFAULT_IO_TIMEOUT),
            defaults: DeviceConfig::default(),
            devices: BTreeMap::new(),
        }
    }
}
