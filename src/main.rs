use anyhow::{Context, Result};
use nvfand::{
    arg_parser::ArgsOptions,
    config::{Backend, Config},
    controller_group::ControllerGroup,
    device_io::{DeviceIo, NvidiaSettings, NvmlBackend},
    logger,
};
use tokio::{
    select,
    signal::unix::{SignalKind, signal},
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse the command line arguments
    let args_options = ArgsOptions::parse();

    logger::init_logging(args_options.verbose);
    info!("Starting...");

    let mut config = match &args_options.config_file_path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Invalid configuration {:?}", path))?,
        None => Config::default(),
    };

    if let Some(count) = args_options.device_count {
        config.device_count = count;
    }
    if let Some(backend) = args_options.backend {
        config.backend = backend;
    }
    config.validate()?;

    match config.backend {
        Backend::NvidiaSettings => {
            let io = NvidiaSettings::new(&config.executable, config.display.clone());
            run(io, &config).await
        }
        Backend::Nvml => {
            let io = NvmlBackend::init()?;

            let available = io.device_count()?;
            if available < config.device_count {
                warn!(
                    "{} GPU(s) configured but only {} found",
                    config.device_count, available
                );
            }

            run(io, &config).await
        }
    }
}

// Run the controllers until a termination signal or a fatal device error
async fn run<D: DeviceIo + 'static>(io: D, config: &Config) -> Result<()> {
    let group = ControllerGroup::initialize(io, config)?;
    let handle = group.handle();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    let run_all = group.run_all();
    tokio::pin!(run_all);

    loop {
        select! {
            // Only returns early when a device became unavailable
            result = &mut run_all => {
                return Ok(result?);
            },
            _ = sigint.recv() => {
                info!("Received SIGINT");
                break;
            },
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
                break;
            },
            _ = sighup.recv() => handle.reload(),
        }
    }

    // Stop every controller then wait for the
    // fan control to be handed back to the driver
    handle.stop_all();
    run_all.await?;

    info!("The end.");

    Ok(())
}
