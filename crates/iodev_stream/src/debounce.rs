//! Emits a value once it has settled for a full quiet window.
//!
//! Every arrival restarts the window. When the window elapses the pending value is
//! emitted once and the debouncer goes idle. While idle, arrivals equal to the last
//! emitted value are ignored, so a steady upstream produces no further emissions.

use std::time::Duration;

use iodev_core::{
    error::DeviceError,
    sensor::{CloseGuard, Sensor},
    slot::TakeOnce,
};
use tokio::{
    sync::mpsc,
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{drive, send_or_cancel, OUT_BUFFER};

type EqFn<T> = Box<dyn Fn(&T, &T) -> bool + Send + Sync>;

pub struct Debounce<T, S> {
    src: S,
    window: Duration,
    equal: EqFn<T>,
    out_tx: TakeOnce<mpsc::Sender<T>>,
    out_rx: TakeOnce<mpsc::Receiver<T>>,
    guard: CloseGuard,
}

impl<T, S> Debounce<T, S>
where
    T: Clone + Send + 'static,
    S: Sensor<T>,
{
    ///Debounce with a custom equality.
    pub fn with_eq(src: S, window: Duration, equal: impl Fn(&T, &T) -> bool + Send + Sync + 'static) -> Self {
        let (out_tx, out_rx) = mpsc::channel(OUT_BUFFER);
        Self {
            src,
            window,
            equal: Box::new(equal),
            out_tx: TakeOnce::new(out_tx),
            out_rx: TakeOnce::new(out_rx),
            guard: CloseGuard::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl<T, S> Debounce<T, S>
where
    T: PartialEq + Clone + Send + 'static,
    S: Sensor<T>,
{
    ///Debounce using `PartialEq`.
    pub fn comparable(src: S, window: Duration) -> Self {
        Self::with_eq(src, window, |a, b| a == b)
    }
}

impl<T, S> Sensor<T> for Debounce<T, S>
where
    T: Clone + Send + 'static,
    S: Sensor<T>,
{
    async fn run(&self, cancel: CancellationToken) -> Result<(), DeviceError> {
        let tx = self.out_tx.take().ok_or(DeviceError::AlreadyRunning("debounce"))?;
        drive("debounce", &self.src, &self.guard, cancel, |rx, token| {
            settle(rx, tx, token, self.window, &self.equal)
        })
        .await
    }

    fn close(&self) -> Result<(), DeviceError> {
        self.guard.close_with(|| self.src.close())
    }

    fn read(&self) -> Option<mpsc::Receiver<T>> {
        self.out_rx.take()
    }
}

async fn settle<T: Clone>(
    mut rx: mpsc::Receiver<T>,
    tx: mpsc::Sender<T>,
    cancel: CancellationToken,
    window: Duration,
    equal: &EqFn<T>,
) {
    let timer = time::sleep(window);
    tokio::pin!(timer);

    let mut pending: Option<T> = None;
    let mut emitted: Option<T> = None;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            value = rx.recv() => {
                let Some(value) = value else {
                    break;
                };
                let unchanged = pending.is_none()
                    && emitted.as_ref().is_some_and(|last| equal(last, &value));
                if unchanged {
                    continue;
                }
                //an equal run keeps its first value, only the window restarts
                let same_run = pending.as_ref().is_some_and(|first| equal(first, &value));
                if !same_run {
                    pending = Some(value);
                }
                timer.as_mut().reset(Instant::now() + window);
            }
            _ = &mut timer, if pending.is_some() => {
                let Some(value) = pending.take() else {
                    continue;
                };
                if !send_or_cancel(&tx, &cancel, value.clone()).await {
                    break;
                }
                emitted = Some(value);
            }
        }
    }
}
