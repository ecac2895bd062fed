//! Broadcasts one upstream stream to many independently paced subscribers.
//!
//! Each subscriber has its own buffer. Sends are non-blocking, so a slow subscriber
//! only loses its own messages. Subscribers registered later see only later values.

use std::sync::Mutex;

use iodev_core::{
    error::DeviceError,
    sensor::{CloseGuard, Sensor},
    slot::{lock, TakeOnce},
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::drive;

struct Subscribers<T> {
    list: Vec<mpsc::Sender<T>>,
    closed: bool,
}

pub struct FanOut<T, S> {
    src: S,
    buffer: usize,
    subs: Mutex<Subscribers<T>>,
    started: TakeOnce<()>,
    guard: CloseGuard,
}

impl<T, S> FanOut<T, S>
where
    T: Clone + Send + 'static,
    S: Sensor<T>,
{
    ///Creates the hub with `n` initial subscribers, each buffering up to `buffer_size`
    /// values (at least one).
    pub fn new(src: S, n: usize, buffer_size: usize) -> (Self, Vec<mpsc::Receiver<T>>) {
        let hub = Self {
            src,
            buffer: buffer_size.max(1),
            subs: Mutex::new(Subscribers {
                list: Vec::with_capacity(n),
                closed: false,
            }),
            started: TakeOnce::new(()),
            guard: CloseGuard::new(),
        };
        let receivers = (0..n).map(|_| hub.subscribe()).collect();
        (hub, receivers)
    }

    ///Registers a new subscriber. After shutdown the returned stream is already closed.
    pub fn subscribe(&self) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let mut subs = lock(&self.subs);
        if !subs.closed {
            subs.list.push(tx);
        }
        rx
    }

    pub fn subscribers(&self) -> usize {
        lock(&self.subs).list.len()
    }

    fn broadcast(&self, value: T) {
        let mut subs = lock(&self.subs);
        subs.list.retain(|tx| match tx.try_send(value.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!("subscriber behind, value dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    ///Closes every subscriber stream and refuses new ones.
    fn close_all(&self) {
        let mut subs = lock(&self.subs);
        subs.closed = true;
        subs.list.clear();
    }

    async fn forward(&self, mut rx: mpsc::Receiver<T>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                value = rx.recv() => match value {
                    Some(value) => self.broadcast(value),
                    None => break,
                },
            }
        }
        self.close_all();
    }
}

impl<T, S> Sensor<T> for FanOut<T, S>
where
    T: Clone + Send + 'static,
    S: Sensor<T>,
{
    async fn run(&self, cancel: CancellationToken) -> Result<(), DeviceError> {
        if self.started.take().is_none() {
            return Err(DeviceError::AlreadyRunning("fan out"));
        }
        let res = drive("fan_out", &self.src, &self.guard, cancel, |rx, token| {
            self.forward(rx, token)
        })
        .await;
        self.close_all();
        res
    }

    fn close(&self) -> Result<(), DeviceError> {
        self.guard.close_with(|| {
            self.close_all();
            self.src.close()
        })
    }

    ///A new subscriber stream.
    fn read(&self) -> Option<mpsc::Receiver<T>> {
        Some(self.subscribe())
    }
}
