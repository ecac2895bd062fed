//! A deterministic source that plays back a fixed sequence.
//!
//! Without stepping, the whole sequence is published as soon as `run` starts. With
//! stepping, every `()` sent on `sink()` publishes the next value. Publishing is
//! best-effort, so an unread output buffer drops values.

use std::sync::Arc;

use iodev_core::{
    base::{Base, DEFAULT_EVENT_BUFFER},
    device::{Device, Sink, Source},
    error::DeviceError,
    event::{Event, EventError, EventKind},
    slot::TakeOnce,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ScriptedSensorConfig<T> {
    pub name: String,
    pub buffer_size: usize,
    ///Played in order. May only be empty when `initial` is set.
    pub values: Vec<T>,
    ///Published first, before the sequence.
    pub initial: Option<T>,
    ///Wait for a step on `sink()` before each value.
    pub step: bool,
    ///Once exhausted, every further step publishes the last value again.
    pub repeat_last: bool,
    ///Return from `run` as soon as the sequence is exhausted.
    pub stop_when_done: bool,
}

impl<T> ScriptedSensorConfig<T> {
    pub fn new(name: &str, values: Vec<T>) -> Self {
        Self {
            name: name.to_string(),
            buffer_size: DEFAULT_EVENT_BUFFER,
            values,
            initial: None,
            step: false,
            repeat_last: false,
            stop_when_done: false,
        }
    }
}

pub struct ScriptedSensor<T> {
    base: Base,
    cfg: TakeOnce<ScriptedSensorConfig<T>>,
    in_tx: mpsc::Sender<()>,
    in_rx: TakeOnce<mpsc::Receiver<()>>,
    out_tx: TakeOnce<mpsc::Sender<T>>,
    out_rx: TakeOnce<mpsc::Receiver<T>>,
}

impl<T: Clone + Send + 'static> ScriptedSensor<T> {
    pub fn new(cfg: ScriptedSensorConfig<T>) -> Self {
        let base = Base::new(&cfg.name, cfg.buffer_size);
        let (in_tx, in_rx) = mpsc::channel(base.capacity());
        let (out_tx, out_rx) = mpsc::channel(base.capacity());
        Self {
            base,
            cfg: TakeOnce::new(cfg),
            in_tx,
            in_rx: TakeOnce::new(in_rx),
            out_tx: TakeOnce::new(out_tx),
            out_rx: TakeOnce::new(out_rx),
        }
    }
}

struct Playback<'a, T> {
    base: &'a Base,
    out: mpsc::Sender<T>,
    values: std::vec::IntoIter<T>,
    last: Option<T>,
}

impl<T: Clone> Playback<'_, T> {
    fn publish(&mut self, value: T, msg: &str) {
        //best-effort: a full buffer drops the value
        let _ = self.out.try_send(value.clone());
        self.last = Some(value);
        self.base.emit(EventKind::Info, msg, None, None);
    }

    ///Publishes the next scripted value. Returns false once the sequence is exhausted.
    fn advance(&mut self) -> bool {
        match self.values.next() {
            Some(value) => {
                self.publish(value, "emit");
                true
            }
            None => false,
        }
    }

    fn is_done(&self) -> bool {
        self.values.as_slice().is_empty()
    }

    fn repeat(&mut self) {
        if let Some(value) = self.last.clone() {
            self.publish(value, "repeat");
        }
    }
}

impl<T: Clone + Send + 'static> ScriptedSensor<T> {
    async fn play(
        &self,
        cancel: &CancellationToken,
        mut steps: mpsc::Receiver<()>,
        cfg: ScriptedSensorConfig<T>,
        out: mpsc::Sender<T>,
    ) {
        let mut playback = Playback {
            base: &self.base,
            out,
            values: cfg.values.into_iter(),
            last: None,
        };

        if let Some(initial) = cfg.initial {
            playback.publish(initial, "initial");
        }

        if !cfg.step {
            while playback.advance() {}
            if !cfg.stop_when_done {
                cancel.cancelled().await;
            }
            return;
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                step = steps.recv() => {
                    if step.is_none() {
                        cancel.cancelled().await;
                        return;
                    }
                    if !playback.advance() {
                        if cfg.repeat_last {
                            playback.repeat();
                        } else if cfg.stop_when_done {
                            return;
                        }
                    } else if playback.is_done() && cfg.stop_when_done {
                        return;
                    }
                }
            }
        }
    }
}

impl<T: Clone + Send + 'static> Device for ScriptedSensor<T> {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn run(&self, cancel: CancellationToken) -> Result<(), DeviceError> {
        let (Some(cfg), Some(steps), Some(out)) = (self.cfg.take(), self.in_rx.take(), self.out_tx.take()) else {
            return Err(DeviceError::AlreadyRunning("scripted sensor"));
        };

        if cfg.values.is_empty() && cfg.initial.is_none() {
            drop(out);
            let reason = "scripted sensor requires values or an initial value";
            let err: EventError = Arc::new(DeviceError::config(reason));
            self.base.emit(EventKind::Error, "invalid config", Some(err), None);
            self.base.close();
            return Err(DeviceError::config(reason));
        }

        self.base.emit(EventKind::Open, "run", None, None);
        self.play(&cancel, steps, cfg, out).await;
        self.base.emit(EventKind::Close, "stop", None, None);
        self.base.close();
        debug!(device = %self.base.name(), "scripted sensor shutting down");
        Ok(())
    }

    fn events(&self) -> Option<mpsc::Receiver<Event>> {
        self.base.events()
    }
}

impl<T: Clone + Send + 'static> Source<T> for ScriptedSensor<T> {
    fn out(&self) -> Option<mpsc::Receiver<T>> {
        self.out_rx.take()
    }
}

impl<T: Clone + Send + 'static> Sink<()> for ScriptedSensor<T> {
    ///Each `()` advances the script by one value when stepping.
    fn sink(&self) -> mpsc::Sender<()> {
        self.in_tx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::check_source;
    use std::time::Duration;
    use tokio::sync::mpsc::error::TryRecvError;

    fn spawn(
        sensor: &Arc<ScriptedSensor<i32>>,
        cancel: &CancellationToken,
    ) -> tokio::task::JoinHandle<Result<(), DeviceError>> {
        let sensor = sensor.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { sensor.run(cancel).await })
    }

    #[tokio::test]
    async fn immediate_playback_stops_when_done() {
        let mut cfg = ScriptedSensorConfig::new("script", vec![1, 2, 3]);
        cfg.initial = Some(0);
        cfg.stop_when_done = true;
        let sensor = ScriptedSensor::new(cfg);
        let mut out = sensor.out().unwrap();
        let mut events = sensor.events().unwrap();

        sensor.run(CancellationToken::new()).await.unwrap();
        let mut got = Vec::new();
        while let Some(v) = out.recv().await {
            got.push(v);
        }
        assert_eq!(got, vec![0, 1, 2, 3]);

        let mut msgs = Vec::new();
        while let Some(ev) = events.recv().await {
            msgs.push(format!("{}:{}", ev.kind, ev.msg));
        }
        assert_eq!(
            msgs,
            vec!["open:run", "info:initial", "info:emit", "info:emit", "info:emit", "close:stop"]
        );
    }

    #[tokio::test]
    async fn stepped_playback_repeats_last() {
        let mut cfg = ScriptedSensorConfig::new("stepper", vec![10, 20]);
        cfg.step = true;
        cfg.repeat_last = true;
        let sensor = Arc::new(ScriptedSensor::new(cfg));
        let mut out = sensor.out().unwrap();
        let steps = sensor.sink();
        let cancel = CancellationToken::new();
        let handle = spawn(&sensor, &cancel);

        tokio::task::yield_now().await;
        assert_eq!(out.try_recv().unwrap_err(), TryRecvError::Empty);

        steps.send(()).await.unwrap();
        assert_eq!(out.recv().await, Some(10));
        steps.send(()).await.unwrap();
        assert_eq!(out.recv().await, Some(20));
        steps.send(()).await.unwrap();
        assert_eq!(out.recv().await, Some(20));

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(out.recv().await, None);
        assert!(steps.send(()).await.is_err());
    }

    #[tokio::test]
    async fn stepped_playback_stops_on_last_value() {
        let mut cfg = ScriptedSensorConfig::new("stepper", vec![1, 2]);
        cfg.step = true;
        cfg.stop_when_done = true;
        let sensor = Arc::new(ScriptedSensor::new(cfg));
        let mut out = sensor.out().unwrap();
        let steps = sensor.sink();
        let handle = spawn(&sensor, &CancellationToken::new());

        steps.send(()).await.unwrap();
        steps.send(()).await.unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(out.recv().await, Some(1));
        assert_eq!(out.recv().await, Some(2));
        assert_eq!(out.recv().await, None);
    }

    #[tokio::test]
    async fn empty_script_is_rejected() {
        let sensor = ScriptedSensor::new(ScriptedSensorConfig::<u8>::new("empty", vec![]));
        let mut events = sensor.events().unwrap();
        assert!(matches!(
            sensor.run(CancellationToken::new()).await,
            Err(DeviceError::Config(_))
        ));
        assert_eq!(events.recv().await.unwrap().kind, EventKind::Error);
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn idles_until_canceled() {
        let sensor = Arc::new(ScriptedSensor::new(ScriptedSensorConfig::new("idle", vec![5])));
        let report = check_source(sensor, Duration::from_millis(20), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(report.samples, vec![5]);
    }
}
