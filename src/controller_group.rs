use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info};

use crate::{
    config::Config,
    controller::{ControllerHandle, DeviceController, SharedIo},
    device_io::DeviceIo,
    errors::{ConfigError, DeviceError},
};

// Own the controllers of every configured GPU. The controllers share
// one lock serializing their access to the device I/O.
pub struct ControllerGroup<D: DeviceIo> {
    controllers: Vec<DeviceController<D>>,

    // Parent of every controller token
    token: CancellationToken,
    tracker: TaskTracker,
}

// Cloneable access to the group from the signal handling code
#[derive(Debug, Clone)]
pub struct GroupHandle {
    token: CancellationToken,
    controllers: Vec<ControllerHandle>,
}

impl<D: DeviceIo + 'static> ControllerGroup<D> {
    // Build one controller for each GPU index below the configured count
    pub fn initialize(io: D, config: &Config) -> Result<Self, ConfigError> {
        let io: SharedIo<D> = Arc::new(Mutex::new(io));
        let token = CancellationToken::new();

        let controllers = (0..config.device_count)
            .map(|device| {
                let settings = config.controller_settings(device)?;

                Ok(DeviceController::new(
                    device,
                    settings,
                    io.clone(),
                    token.child_token(),
                ))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        info!("Controlling {} GPU(s)", controllers.len());

        Ok(Self {
            controllers,
            token,
            tracker: TaskTracker::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    pub fn handle(&self) -> GroupHandle {
        GroupHandle {
            token: self.token.clone(),
            controllers: self.controllers.iter().map(|c| c.handle()).collect(),
        }
    }

    pub fn stop_all(&self) {
        self.handle().stop_all();
    }

    // Start every controller and wait until all of them exited.
    // The first fatal device error stops the whole group and is returned
    // once every GPU has been handed back to the driver.
    pub async fn run_all(self) -> Result<(), DeviceError> {
        let (tx_fatal, mut rx_fatal) = mpsc::channel(self.controllers.len().max(1));

        for controller in self.controllers {
            controller.start(&self.tracker, tx_fatal.clone());
        }

        // The channel closes once the last controller task is done
        drop(tx_fatal);
        self.tracker.close();

        let mut fatal = None;

        while let Some(err) = rx_fatal.recv().await {
            if fatal.is_none() {
                debug!("Stopping every GPU controller: {}", err);
                self.token.cancel();

                fatal = Some(err);
            } else {
                debug!("Additional fatal error: {}", err);
            }
        }

        self.tracker.wait().await;
        info!("All GPU controllers stopped");

        match fatal {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl GroupHandle {
    // Forward a stop to every controller, never blocks
    pub fn stop_all(&self) {
        info!("Stopping...");

        for controller in &self.controllers {
            controller.stop();
        }

        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    // Curves and intervals are only read at startup
    pub fn reload(&self) {
        info!("Reload requested, configuration changes need a restart");
    }
}
