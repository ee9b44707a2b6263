mod common;

use std::{
    collections::BTreeMap,
    io,
    sync::{Arc, Mutex},
    time::Duration,
};

use common::{Call, FakeDevice};
use nvfand::{
    config::{Config, DeviceOverride},
    controller_group::ControllerGroup,
    errors::{ConfigError, DeviceError},
};
use tracing::Level;

fn config(device_count: u32) -> Config {
    let mut config = Config {
        device_count,
        ..Default::default()
    };
    config.defaults.curve = BTreeMap::from([(40, 40), (60, 50), (100, 100)]);

    config
}

fn fake(device_count: u32) -> FakeDevice {
    (0..device_count).fold(FakeDevice::new(), |fake, device| {
        fake.with_temperature(device, 50).with_fan_speed(device, 30)
    })
}

#[tokio::test(start_paused = true)]
async fn run_all_returns_after_every_controller_stopped() {
    let fake = fake(3);
    let group = ControllerGroup::initialize(fake.clone(), &config(3)).unwrap();
    assert_eq!(group.len(), 3);

    let handle = group.handle();
    let run = tokio::spawn(group.run_all());

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(!run.is_finished());

    handle.stop_all();
    run.await.unwrap().unwrap();

    assert!(handle.is_stopped());
    for device in 0..3 {
        assert_eq!(fake.writes(device), vec![45]);
        assert_eq!(fake.count(Call::ResetAutoControl(device)), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn stop_all_is_idempotent() {
    let fake = fake(2);
    let group = ControllerGroup::initialize(fake.clone(), &config(2)).unwrap();

    let handle = group.handle();
    let run = tokio::spawn(group.run_all());
    tokio::time::sleep(Duration::from_secs(1)).await;

    handle.stop_all();
    handle.stop_all();
    run.await.unwrap().unwrap();
    handle.stop_all();

    assert_eq!(fake.count(Call::ResetAutoControl(0)), 1);
    assert_eq!(fake.count(Call::ResetAutoControl(1)), 1);
}

#[tokio::test(start_paused = true)]
async fn device_io_is_serialized() {
    let fake = fake(4);
    fake.state().io_delay = Some(Duration::from_millis(300));

    let group = ControllerGroup::initialize(fake.clone(), &config(4)).unwrap();
    let handle = group.handle();
    let run = tokio::spawn(group.run_all());

    tokio::time::sleep(Duration::from_secs(30)).await;
    handle.stop_all();
    run.await.unwrap().unwrap();

    let state = fake.state();
    assert_eq!(state.max_in_flight, 1);
    assert!(state.calls.len() > 4 * 3);
}

#[tokio::test(start_paused = true)]
async fn unavailable_device_stops_the_group() {
    let fake = fake(3);
    fake.state().unavailable = true;

    let group = ControllerGroup::initialize(fake.clone(), &config(3)).unwrap();
    let handle = group.handle();

    // No stop request, the fatal error alone ends the run
    let err = group.run_all().await.unwrap_err();

    assert!(matches!(err, DeviceError::Unavailable { .. }));
    assert!(handle.is_stopped());
    for device in 0..3 {
        assert_eq!(fake.count(Call::ResetAutoControl(device)), 1);
    }
}

// Collects formatted log lines in memory
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn fatal_error_is_left_to_the_caller_to_report() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(Level::INFO)
        .finish();
    // Current thread runtime, the spawned controllers log here too
    let _guard = tracing::subscriber::set_default(subscriber);

    let fake = fake(3);
    fake.state().unavailable = true;

    let group = ControllerGroup::initialize(fake.clone(), &config(3)).unwrap();
    let err = group.run_all().await.unwrap_err();
    assert!(matches!(err, DeviceError::Unavailable { .. }));

    let logs = logs.contents();
    assert!(logs.contains("All GPU controllers stopped"), "{logs}");
    assert!(!logs.contains("ERROR"), "{logs}");
    assert!(!logs.contains("WARN"), "{logs}");
    assert!(!logs.contains("was not found"), "{logs}");
}

#[tokio::test(start_paused = true)]
async fn per_device_configuration_is_applied() {
    let fake = fake(2);

    let mut config = config(2);
    config.devices.insert(
        1,
        DeviceOverride {
            curve: Some(BTreeMap::from([(30, 70)])),
            interval: Some(1.),
            ..Default::default()
        },
    );

    let group = ControllerGroup::initialize(fake.clone(), &config).unwrap();
    let handle = group.handle();
    let run = tokio::spawn(group.run_all());

    tokio::time::sleep(Duration::from_secs(6)).await;
    handle.stop_all();
    run.await.unwrap().unwrap();

    assert_eq!(fake.writes(0), vec![45]);
    assert_eq!(fake.writes(1), vec![70]);

    // Device 1 polls four times as often
    let reads = |device| fake.count(Call::ReadTemperature(device));
    assert!(reads(1) > reads(0) * 2);
}

#[tokio::test]
async fn invalid_device_configuration_is_rejected() {
    let mut config = config(2);
    config.devices.insert(
        1,
        DeviceOverride {
            curve: Some(BTreeMap::new()),
            ..Default::default()
        },
    );

    let result = ControllerGroup::initialize(FakeDevice::new(), &config);

    assert!(matches!(result, Err(ConfigError::Curve { device: 1, .. })));
}

#[tokio::test]
async fn empty_group_returns_immediately() {
    let group = ControllerGroup::initialize(FakeDevice::new(), &config(0)).unwrap();

    assert!(group.is_empty());
    group.run_all().await.unwrap();
}

#[tokio::test]
async fn reload_keeps_running() {
    let group = ControllerGroup::initialize(fake(1), &config(1)).unwrap();
    let handle = group.handle();

    handle.reload();

    assert!(!handle.is_stopped());
}

#[tokio::test(start_paused = true)]
async fn stop_before_run_still_restores_every_device() {
    let fake = fake(2);
    let group = ControllerGroup::initialize(fake.clone(), &config(2)).unwrap();

    group.stop_all();
    group.run_all().await.unwrap();

    assert_eq!(fake.calls().len(), 2);
    assert_eq!(fake.count(Call::ResetAutoControl(0)), 1);
    assert_eq!(fake.count(Call::ResetAutoControl(1)), 1);
}
