//! Assembles and spawns one device pipeline:
//! sensor -> stages -> last value -> fan out -> subscribers.

use std::{fmt::Debug, sync::Arc, time::Duration};

use iodev_core::{
    error::BuildError,
    event::{Event, EventKind},
    sensor::{BoxSensor, Sensor},
};
use iodev_stream::{Debounce, FanOut, LastValue, RateLimit};
use serde::Deserialize;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::{Entry, Last, Registry};

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub enum StageConfig {
    RateLimit { period_ms: u64 },
    Debounce { window_ms: u64 },
}

fn default_subscribers() -> usize {
    1
}

fn default_buffer() -> usize {
    8
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    ///Applied in order, closest to the device first.
    #[serde(default)]
    pub stages: Vec<StageConfig>,
    #[serde(default = "default_subscribers")]
    pub subscribers: usize,
    ///Per-subscriber buffer.
    #[serde(default = "default_buffer")]
    pub buffer: usize,
    ///Logs the latest value from the registry at this period.
    pub status_ms: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            subscribers: default_subscribers(),
            buffer: default_buffer(),
            status_ms: None,
        }
    }
}

///Value types a pipeline can carry, each mapped to its registry variant.
pub trait PipelineValue: Clone + Debug + PartialEq + Send + Sync + 'static {
    fn entry(last: Last<Self>) -> Entry;
}

impl PipelineValue for f64 {
    fn entry(last: Last<Self>) -> Entry {
        Entry::Float(last)
    }
}

impl PipelineValue for bool {
    fn entry(last: Last<Self>) -> Entry {
        Entry::Bool(last)
    }
}

fn apply_stages<T: PipelineValue>(
    mut sensor: BoxSensor<T>,
    stages: &[StageConfig],
) -> Result<BoxSensor<T>, BuildError> {
    for stage in stages {
        let next: BoxSensor<T> = match *stage {
            StageConfig::RateLimit { period_ms } => {
                Box::new(RateLimit::new(sensor, Duration::from_millis(period_ms))?)
            }
            StageConfig::Debounce { window_ms } => {
                Box::new(Debounce::comparable(sensor, Duration::from_millis(window_ms)))
            }
        };
        sensor = next;
    }
    Ok(sensor)
}

///Wraps `sensor` in the configured stages, registers its last value under `name` and
/// spawns everything. The returned handles finish once `cancel` fires.
pub fn spawn_pipeline<T: PipelineValue>(
    name: &str,
    sensor: BoxSensor<T>,
    events: Option<mpsc::Receiver<Event>>,
    cfg: &PipelineConfig,
    registry: &Arc<Registry>,
    cancel: &CancellationToken,
) -> Result<Vec<JoinHandle<()>>, BuildError> {
    let staged = apply_stages(sensor, &cfg.stages)?;
    let last: Last<T> = Arc::new(LastValue::new(staged));
    registry
        .insert(name, T::entry(last.clone()))
        .map_err(|err| BuildError::Message(err.to_string()))?;

    if cfg.subscribers == 0 {
        warn!(device = name, "pipeline has no subscribers, samples are discarded");
    }
    let (hub, subscribers) = FanOut::new(last, cfg.subscribers, cfg.buffer);

    let mut handles = Vec::with_capacity(cfg.subscribers + 3);
    for (i, rx) in subscribers.into_iter().enumerate() {
        handles.push(tokio::spawn(log_samples(name.to_string(), i, rx)));
    }
    if let Some(events) = events {
        handles.push(tokio::spawn(log_events(events)));
    }
    if let Some(status_ms) = cfg.status_ms.filter(|ms| *ms > 0) {
        handles.push(tokio::spawn(log_status(
            name.to_string(),
            registry.clone(),
            Duration::from_millis(status_ms),
            cancel.clone(),
        )));
    }

    let cancel = cancel.clone();
    let device = name.to_string();
    handles.push(tokio::spawn(async move {
        if let Err(err) = hub.run(cancel).await {
            warn!(device = %device, "pipeline stopped with an error: {err}");
        }
        debug!(device = %device, "pipeline shutting down");
    }));
    Ok(handles)
}

async fn log_samples<T: Debug>(device: String, subscriber: usize, mut rx: mpsc::Receiver<T>) {
    while let Some(value) = rx.recv().await {
        debug!(device = %device, subscriber, ?value, "sample");
    }
}

///Forwards device diagnostics to the log.
pub async fn log_events(mut events: mpsc::Receiver<Event>) {
    while let Some(event) = events.recv().await {
        match event.kind {
            EventKind::Error => warn!(device = %event.device, "{event}"),
            _ => debug!(device = %event.device, "{event}"),
        }
    }
}

async fn log_status(device: String, registry: Arc<Registry>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => match registry.status(&device) {
                Ok(Some(value)) => info!(device = %device, value = %value, "status"),
                Ok(None) => info!(device = %device, "status: no samples yet"),
                Err(err) => warn!(device = %device, "status lookup failed: {err}"),
            },
        }
    }
}
