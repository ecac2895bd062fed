//! The minimal `Sensor<T>` capability stream combinators are built on.
//!
//! A sensor is run, closed, and read. Anything with a typed output can become one:
//! `SourceSensor` adapts any `Source<T>` device, `ChannelSensor` is fed by hand, and
//! every combinator is itself a sensor so pipelines nest.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    device::{Device, Source},
    error::DeviceError,
    event::Event,
    slot::TakeOnce,
};

pub trait Sensor<T>: Send + Sync {
    ///Runs until `cancel` fires or `close` is called.
    fn run(&self, cancel: CancellationToken) -> impl Future<Output = Result<(), DeviceError>> + Send;

    ///Stops the sensor. Safe to call many times, from many tasks.
    fn close(&self) -> Result<(), DeviceError>;

    ///The value stream. Only the first call returns it.
    fn read(&self) -> Option<mpsc::Receiver<T>>;
}

///Object-safe form of `Sensor<T>`, implemented for every sensor.
pub trait DynSensor<T>: Send + Sync {
    fn run_dyn(&self, cancel: CancellationToken) -> BoxFuture<'_, Result<(), DeviceError>>;
    fn close_dyn(&self) -> Result<(), DeviceError>;
    fn read_dyn(&self) -> Option<mpsc::Receiver<T>>;
}

impl<T: Send + 'static, S: Sensor<T>> DynSensor<T> for S {
    fn run_dyn(&self, cancel: CancellationToken) -> BoxFuture<'_, Result<(), DeviceError>> {
        Box::pin(self.run(cancel))
    }

    fn close_dyn(&self) -> Result<(), DeviceError> {
        self.close()
    }

    fn read_dyn(&self) -> Option<mpsc::Receiver<T>> {
        self.read()
    }
}

///A type-erased sensor, for pipelines assembled at runtime.
pub type BoxSensor<T> = Box<dyn DynSensor<T>>;

//holds for every trait object lifetime, not only `'static`
impl<'a, T: Send + 'static> Sensor<T> for Box<dyn DynSensor<T> + 'a> {
    fn run(&self, cancel: CancellationToken) -> impl Future<Output = Result<(), DeviceError>> + Send {
        (**self).run_dyn(cancel)
    }

    fn close(&self) -> Result<(), DeviceError> {
        (**self).close_dyn()
    }

    fn read(&self) -> Option<mpsc::Receiver<T>> {
        (**self).read_dyn()
    }
}

impl<T, S: Sensor<T>> Sensor<T> for Arc<S> {
    fn run(&self, cancel: CancellationToken) -> impl Future<Output = Result<(), DeviceError>> + Send {
        (**self).run(cancel)
    }

    fn close(&self) -> Result<(), DeviceError> {
        (**self).close()
    }

    fn read(&self) -> Option<mpsc::Receiver<T>> {
        (**self).read()
    }
}

///Exactly-once close bookkeeping shared by sensors.
///
/// `close_with` runs its action on the first call only. `guard` ties a running task to
/// the guard: once closed, the task's token is canceled and the task is awaited.
#[derive(Default)]
pub struct CloseGuard {
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl CloseGuard {
    pub fn new() -> Self {
        Self::default()
    }

    ///Cancels the shutdown token and runs `f`, on the first call only. Later calls return `Ok`.
    pub fn close_with<F>(&self, f: F) -> Result<(), DeviceError>
    where
        F: FnOnce() -> Result<(), DeviceError>,
    {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shutdown.cancel();
        f()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    ///Drives `work` to completion. If the guard closes first, `token` is canceled and
    /// `work` is still awaited so it can close what it owns.
    pub async fn guard<F: Future>(&self, token: &CancellationToken, work: F) -> F::Output {
        tokio::pin!(work);
        tokio::select! {
            biased;
            out = &mut work => out,
            _ = self.shutdown.cancelled() => {
                token.cancel();
                work.await
            }
        }
    }
}

///Adapts a `Source<T>` device into a `Sensor<T>`.
pub struct SourceSensor<S> {
    src: S,
    guard: CloseGuard,
}

impl<S> SourceSensor<S> {
    pub fn new(src: S) -> Self {
        Self {
            src,
            guard: CloseGuard::new(),
        }
    }

    pub fn device(&self) -> &S {
        &self.src
    }
}

impl<S: Device> SourceSensor<S> {
    ///The wrapped device's diagnostic stream.
    pub fn events(&self) -> Option<mpsc::Receiver<Event>> {
        self.src.events()
    }
}

impl<T, S: Source<T>> Sensor<T> for SourceSensor<S> {
    async fn run(&self, cancel: CancellationToken) -> Result<(), DeviceError> {
        let token = cancel.child_token();
        self.guard.guard(&token, self.src.run(token.clone())).await
    }

    fn close(&self) -> Result<(), DeviceError> {
        self.guard.close_with(|| Ok(()))
    }

    fn read(&self) -> Option<mpsc::Receiver<T>> {
        self.src.out()
    }
}

///A sensor fed by hand through the sender returned from `new`.
///
/// Values are forwarded while `run` is active; the stream ends when every sender is
/// dropped, the token is canceled, or the sensor is closed.
pub struct ChannelSensor<T> {
    in_rx: TakeOnce<mpsc::Receiver<T>>,
    out_tx: TakeOnce<mpsc::Sender<T>>,
    out_rx: TakeOnce<mpsc::Receiver<T>>,
    guard: CloseGuard,
}

impl<T: Send + 'static> ChannelSensor<T> {
    pub fn new(buffer_size: usize) -> (Self, mpsc::Sender<T>) {
        let buffer_size = buffer_size.max(1);
        let (in_tx, in_rx) = mpsc::channel(buffer_size);
        let (out_tx, out_rx) = mpsc::channel(buffer_size);
        let sensor = Self {
            in_rx: TakeOnce::new(in_rx),
            out_tx: TakeOnce::new(out_tx),
            out_rx: TakeOnce::new(out_rx),
            guard: CloseGuard::new(),
        };
        (sensor, in_tx)
    }
}

impl<T: Send + 'static> Sensor<T> for ChannelSensor<T> {
    async fn run(&self, cancel: CancellationToken) -> Result<(), DeviceError> {
        let (Some(mut rx), Some(tx)) = (self.in_rx.take(), self.out_tx.take()) else {
            return Err(DeviceError::AlreadyRunning("channel sensor"));
        };
        let token = cancel.child_token();
        self.guard
            .guard(&token, async {
                loop {
                    let value = tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        value = rx.recv() => match value {
                            Some(value) => value,
                            None => break,
                        },
                    };
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        res = tx.send(value) => if res.is_err() { break },
                    }
                }
            })
            .await;
        drop(tx);
        debug!("channel sensor shutting down");
        Ok(())
    }

    fn close(&self) -> Result<(), DeviceError> {
        self.guard.close_with(|| Ok(()))
    }

    fn read(&self) -> Option<mpsc::Receiver<T>> {
        self.out_rx.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        poll::{PollConfig, PollingSource},
        ticker::ManualTicker,
    };
    use std::time::Duration;

    fn spawn_run<T, S>(sensor: Arc<S>, cancel: CancellationToken) -> tokio::task::JoinHandle<Result<(), DeviceError>>
    where
        T: Send + 'static,
        S: Sensor<T> + 'static,
    {
        tokio::spawn(async move { sensor.run(cancel).await })
    }

    #[tokio::test]
    async fn channel_sensor_forwards_until_close() {
        let (sensor, tx) = ChannelSensor::<i32>::new(4);
        let sensor = Arc::new(sensor);
        let mut rx = sensor.read().unwrap();
        assert!(sensor.read().is_none());
        let handle = spawn_run::<i32, _>(sensor.clone(), CancellationToken::new());

        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));

        sensor.close().unwrap();
        sensor.close().unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn channel_sensor_ends_when_senders_drop() {
        let (sensor, tx) = ChannelSensor::<&str>::new(1);
        let mut rx = sensor.read().unwrap();
        let run = sensor.run(CancellationToken::new());
        tx.send("only").await.unwrap();
        drop(tx);
        run.await.unwrap();
        assert_eq!(rx.recv().await, Some("only"));
        assert_eq!(rx.recv().await, None);
        assert!(matches!(
            sensor.run(CancellationToken::new()).await,
            Err(DeviceError::AlreadyRunning(_))
        ));
    }

    #[tokio::test]
    async fn run_after_close_returns_promptly() {
        let (sensor, _tx) = ChannelSensor::<u8>::new(1);
        let mut rx = sensor.read().unwrap();
        sensor.close().unwrap();
        tokio::time::timeout(Duration::from_secs(1), sensor.run(CancellationToken::new()))
            .await
            .expect("run did not observe close")
            .unwrap();
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn boxed_source_sensor() {
        let (ticker, ticks) = ManualTicker::new();
        let mut n = 0u32;
        let cfg = PollConfig::new(Duration::from_secs(1))
            .ticker(ticker.into_factory())
            .read(move |_| {
                n += 1;
                let v = n;
                async move { Ok(v) }
            });
        let source = SourceSensor::new(PollingSource::new("poller", 4, cfg));
        let mut events = source.events().unwrap();
        let boxed: BoxSensor<u32> = Box::new(source);
        let sensor = Arc::new(boxed);
        let mut rx = sensor.read().unwrap();
        let handle = spawn_run::<u32, _>(sensor.clone(), CancellationToken::new());

        ticks.tick();
        assert_eq!(rx.recv().await, Some(1));

        sensor.close().unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(rx.recv().await, None);

        let mut last = None;
        while let Some(ev) = events.recv().await {
            last = Some(ev.kind);
        }
        assert_eq!(last, Some(crate::event::EventKind::Close));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn close_guard_runs_once() {
        let guard = Arc::new(CloseGuard::new());
        let runs = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let guard = guard.clone();
                let runs = runs.clone();
                tokio::spawn(async move {
                    guard.close_with(|| {
                        runs.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(guard.is_closed());
    }
}
