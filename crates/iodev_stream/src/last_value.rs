//! Pass-through that remembers the most recent value.

use std::sync::RwLock;

use iodev_core::{
    error::DeviceError,
    sensor::{CloseGuard, Sensor},
    slot::{self, TakeOnce},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{drive, send_or_cancel, OUT_BUFFER};

///Forwards every upstream value unchanged and caches the latest one for `last()`.
pub struct LastValue<T, S> {
    src: S,
    last: RwLock<Option<T>>,
    out_tx: TakeOnce<mpsc::Sender<T>>,
    out_rx: TakeOnce<mpsc::Receiver<T>>,
    guard: CloseGuard,
}

impl<T, S> LastValue<T, S>
where
    T: Clone + Send + Sync + 'static,
    S: Sensor<T>,
{
    pub fn new(src: S) -> Self {
        let (out_tx, out_rx) = mpsc::channel(OUT_BUFFER);
        Self {
            src,
            last: RwLock::new(None),
            out_tx: TakeOnce::new(out_tx),
            out_rx: TakeOnce::new(out_rx),
            guard: CloseGuard::new(),
        }
    }

    ///The most recent value, or `None` if nothing has arrived yet.
    pub fn last(&self) -> Option<T> {
        slot::read(&self.last).clone()
    }

    async fn forward(&self, mut rx: mpsc::Receiver<T>, tx: mpsc::Sender<T>, cancel: CancellationToken) {
        loop {
            let value = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                value = rx.recv() => match value {
                    Some(value) => value,
                    None => break,
                },
            };
            *slot::write(&self.last) = Some(value.clone());
            if !send_or_cancel(&tx, &cancel, value).await {
                break;
            }
        }
    }
}

impl<T, S> Sensor<T> for LastValue<T, S>
where
    T: Clone + Send + Sync + 'static,
    S: Sensor<T>,
{
    async fn run(&self, cancel: CancellationToken) -> Result<(), DeviceError> {
        let tx = self.out_tx.take().ok_or(DeviceError::AlreadyRunning("last value"))?;
        drive("last_value", &self.src, &self.guard, cancel, |rx, token| {
            self.forward(rx, tx, token)
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
