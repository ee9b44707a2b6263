use std::{sync::Arc, time::Duration};

use tokio::{
    select,
    sync::{Mutex, mpsc::Sender},
    time::{self, error::Elapsed},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, trace, warn};

use crate::{device_io::DeviceIo, errors::DeviceError, fan_curve::ExtendedCurve};

// Device I/O shared by every controller of a group,
// the mutex serializes the hardware access
pub type SharedIo<D> = Arc<Mutex<D>>;

// Parameters a controller is built from
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub curve: ExtendedCurve,
    // Allowed speed difference before a new speed is written, in percent
    pub tolerance: u32,
    pub interval: Duration,

    // Bounds applied to the curve output
    pub min_speed: u8,
    pub max_speed: u8,

    // Upper bound of one locked I/O section
    pub io_timeout: Option<Duration>,
}

// Last observations of one GPU, owned by its controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceState {
    pub device: u32,
    pub last_temperature: i32,
    pub last_speed: u32,
}

// Drive the fan speed of one GPU toward its curve
pub struct DeviceController<D: DeviceIo> {
    state: DeviceState,
    settings: ControllerSettings,

    io: SharedIo<D>,
    token: CancellationToken,
}

// Handle on a started controller
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    device: u32,
    token: CancellationToken,
}

// Return true when the speed is far enough from the target to be rewritten
pub fn needs_update(current: u32, target: u8, tolerance: u32) -> bool {
    current.abs_diff(u32::from(target)) > tolerance
}

impl<D: DeviceIo + 'static> DeviceController<D> {
    pub fn new(
        device: u32,
        settings: ControllerSettings,
        io: SharedIo<D>,
        token: CancellationToken,
    ) -> Self {
        Self {
            state: DeviceState {
                device,
                ..Default::default()
            },
            settings,
            io,
            token,
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            device: self.state.device,
            token: self.token.clone(),
        }
    }

    // Spawn the polling loop on the tracker and return immediately.
    // A fatal error is sent over the channel before the loop exits.
    pub fn start(
        self,
        tracker: &TaskTracker,
        tx_fatal: Sender<DeviceError>,
    ) -> ControllerHandle {
        let handle = self.handle();

        tracker.spawn(async move {
            if let Err(err) = self.run().await {
                tx_fatal.send(err).await.unwrap_or_else(|err| {
                    error!("Failed to send error over channel: {err}");
                });
            }
        });

        handle
    }

    // Poll the device until a stop is requested, then give the fan
    // control back to the driver. Returns an error only when the
    // device I/O mechanism became unavailable.
    pub async fn run(mut self) -> Result<(), DeviceError> {
        let device = self.state.device;
        info!("GPU {}: Running", device);

        let mut result = Ok(());

        loop {
            if self.token.is_cancelled() {
                break;
            }

            if let Err(err) = self.poll_once().await {
                // Reported once by the owner of the group
                debug!("GPU {}: {}", device, err);
                result = Err(err);
                break;
            }

            select! {
                _ = self.token.cancelled() => break,
                _ = time::sleep(self.settings.interval) => {},
            }
        }

        info!("GPU {}: Quiting", device);
        self.restore().await;

        result
    }

    // One read, compute, write cycle with the I/O lock held
    pub async fn poll_once(&mut self) -> Result<(), DeviceError> {
        let mut io = self.io.lock().await;

        let cycle = Self::cycle(&mut self.state, &self.settings, &mut *io);

        match bounded(self.settings.io_timeout, cycle).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "GPU {}: Device I/O timed out, skipping cycle",
                    self.state.device
                );
                Ok(())
            }
        }
    }

    async fn cycle(
        state: &mut DeviceState,
        settings: &ControllerSettings,
        io: &mut D,
    ) -> Result<(), DeviceError> {
        let device = state.device;

        let temp = or_zero(io.read_temperature(device).await)?;
        let target = settings
            .curve
            .target_speed(temp)
            .clamp(settings.min_speed, settings.max_speed);
        let current = or_zero(io.read_fan_speed(device).await)?;

        debug!(
            "GPU {}: temp: {}°C - speed: {}% - target: {}%",
            device, temp, current, target
        );

        state.last_speed = current;

        if needs_update(current, target, settings.tolerance) {
            match io.set_fan_speed(device, target).await {
                Ok(()) => {
                    trace!("GPU {}: Fan speed set to {}%", device, target);
                    state.last_speed = u32::from(target);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => warn!("{}", err),
            }
        }

        state.last_temperature = temp;

        Ok(())
    }

    // Hand the fans back to the driver, called exactly once per run
    async fn restore(&self) {
        let device = self.state.device;
        info!("GPU {}: Restoring automatic fan control", device);

        let mut io = self.io.lock().await;

        match bounded(self.settings.io_timeout, io.reset_auto_control(device)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) if err.is_fatal() => debug!("GPU {}: {}", device, err),
            Ok(Err(err)) => error!("GPU {}: {}", device, err),
            Err(_) => error!("GPU {}: Timed out restoring fan control", device),
        }
    }
}

impl ControllerHandle {
    // Ask the loop to exit after its current cycle.
    // Calling it again has no effect.
    pub fn stop(&self) {
        if !self.token.is_cancelled() {
            debug!("GPU {}: Stop requested", self.device);
            self.token.cancel();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

// A failed read is replaced by 0 so one bad sample doesn't end the loop.
// Only a fatal error is propagated.
fn or_zero<T: Default>(reading: Result<T, DeviceError>) -> Result<T, DeviceError> {
    match reading {
        Ok(value) => Ok(value),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            debug!("{}, using 0", err);
            Ok(T::default())
        }
    }
}

async fn bounded<F: Future>(limit: Option<Duration>, fut: F) -> Result<F::Output, Elapsed> {
    match limit {
        Some(limit) => time::timeout(limit, fut).await,
        None => Ok(fut.await),
    }
}
