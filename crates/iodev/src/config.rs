use std::{sync::Arc, time::Duration};

use futures_util::future::join_all;
use iodev_core::{
    device::Sink,
    error::BuildError,
    sensor::{BoxSensor, SourceSensor},
};
use iodev_sims::{ramp, Jitter, MockSensor, MockSensorConfig, Switch, SwitchConfig};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    pipeline::{spawn_pipeline, PipelineConfig},
    registry::Registry,
};

#[derive(Deserialize, Debug)]
pub struct MetadataConfig {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct AppConfig {
    pub metadata: MetadataConfig,
    pub devices: config_rs::Map<String, DeviceConfig>,
}

///A sawtooth: `start`, then `step` every tick, wrapping from `max` back to `min`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RampConfig {
    pub interval_ms: u64,
    pub start: f64,
    pub step: f64,
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub emit_initial: bool,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

///A clamped random walk around `start`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct NoiseConfig {
    pub interval_ms: u64,
    pub start: f64,
    pub amplitude: f64,
    pub min: f64,
    pub max: f64,
    pub seed: Option<u64>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

///An on/off device, optionally flipped on a fixed period.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SwitchDeviceConfig {
    #[serde(default)]
    pub initial: bool,
    pub toggle_ms: Option<u64>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

///All possible objects that could appear below the `devices` section in the config file.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub enum DeviceConfig {
    Ramp(RampConfig),
    Noise(NoiseConfig),
    Switch(SwitchDeviceConfig),
}

fn interval(name: &str, interval_ms: u64) -> Result<Duration, BuildError> {
    if interval_ms == 0 {
        return Err(BuildError::Message(format!("{name}: interval_ms must be > 0")));
    }
    Ok(Duration::from_millis(interval_ms))
}

fn finite(name: &str, fields: &[(&str, f64)]) -> Result<(), BuildError> {
    match fields.iter().find(|(_, v)| !v.is_finite()) {
        Some((field, v)) => Err(BuildError::Message(format!("{name}: {field} must be finite, got {v}"))),
        None => Ok(()),
    }
}

impl DeviceConfig {
    ///Builds the device and its pipeline and spawns them under `cancel`.
    pub fn spawn(
        &self,
        name: &str,
        registry: &Arc<Registry>,
        cancel: &CancellationToken,
    ) -> Result<Vec<JoinHandle<()>>, BuildError> {
        match self {
            Self::Ramp(cfg) => {
                finite(
                    name,
                    &[("start", cfg.start), ("step", cfg.step), ("min", cfg.min), ("max", cfg.max)],
                )?;
                let mut sensor_cfg = MockSensorConfig::new(name, interval(name, cfg.interval_ms)?, cfg.start)
                    .next(ramp(cfg.step, cfg.min, cfg.max));
                sensor_cfg.emit_initial = cfg.emit_initial;
                let sensor = SourceSensor::new(MockSensor::new(sensor_cfg));
                let events = sensor.events();
                let boxed: BoxSensor<f64> = Box::new(sensor);
                spawn_pipeline(name, boxed, events, &cfg.pipeline, registry, cancel)
            }
            Self::Noise(cfg) => {
                finite(
                    name,
                    &[("start", cfg.start), ("amplitude", cfg.amplitude), ("min", cfg.min), ("max", cfg.max)],
                )?;
                let mut jitter = match cfg.seed {
                    Some(seed) => Jitter::seeded(seed, cfg.amplitude, cfg.min, cfg.max),
                    None => Jitter::new(cfg.amplitude, cfg.min, cfg.max),
                };
                let sensor_cfg = MockSensorConfig::new(name, interval(name, cfg.interval_ms)?, cfg.start)
                    .next(move |v| jitter.walk(*v));
                let sensor = SourceSensor::new(MockSensor::new(sensor_cfg));
                let events = sensor.events();
                let boxed: BoxSensor<f64> = Box::new(sensor);
                spawn_pipeline(name, boxed, events, &cfg.pipeline, registry, cancel)
            }
            Self::Switch(cfg) => {
                let toggle = cfg.toggle_ms.map(|ms| interval(name, ms)).transpose()?;
                let switch = Switch::new(SwitchConfig::new(name, cfg.initial));
                let commands = switch.sink();
                let sensor = SourceSensor::new(switch);
                let events = sensor.events();
                let boxed: BoxSensor<bool> = Box::new(sensor);
                let mut handles = spawn_pipeline(name, boxed, events, &cfg.pipeline, registry, cancel)?;

                if let Some(period) = toggle {
                    let cancel = cancel.clone();
                    let mut state = cfg.initial;
                    handles.push(tokio::spawn(async move {
                        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                        loop {
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = ticker.tick() => {
                                    state = !state;
                                    if commands.send(state).await.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                    }));
                }
                Ok(handles)
            }
        }
    }
}

impl AppConfig {
    ///Starts every device and waits until all of them have shut down.
    pub async fn start(self, cancel: CancellationToken) -> Result<Arc<Registry>, BuildError> {
        let registry = Arc::new(Registry::new());
        let mut handles = Vec::with_capacity(self.devices.len() * 4);
        let mut errs = Vec::new();

        debug!("building devices ...");
        for (name, device) in &self.devices {
            trace!("building device {name} ...");
            match device.spawn(name, &registry, &cancel) {
                Ok(mut device_handles) => handles.append(&mut device_handles),
                Err(err) => errs.push(err),
            }
        }
        if !errs.is_empty() {
            cancel.cancel();
            join_all(handles).await;
            return Err(BuildError::from_errs(errs));
        }
        debug!("done building {} devices: {:?}", self.devices.len(), registry.names());

        join_all(handles).await;
        Ok(registry)
    }
}
