//! The lifecycle contracts every driver implements.
//!
//! A `Device` is named, runs until its token is canceled and reports diagnostics on
//! `events()`. `Source` adds a typed sample stream, `Sink` a typed command stream, and
//! `Duplex` is both.
//!
//! Rules for implementors:
//! - `run` blocks for the whole active lifetime of the device.
//! - `run` must return within bounded time once its token is canceled.
//! - every stream the device owns is closed before `run` returns, never before,
//!   and is never reopened.

use std::future::Future;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{error::DeviceError, event::Event};

pub trait Device: Send + Sync {
    fn name(&self) -> &str;

    ///Runs the device until `cancel` fires. Cancellation is not an error.
    fn run(&self, cancel: CancellationToken) -> impl Future<Output = Result<(), DeviceError>> + Send;

    ///The diagnostic stream. Only the first call returns the receiver.
    fn events(&self) -> Option<mpsc::Receiver<Event>>;
}

pub trait Source<T>: Device {
    ///The sample stream, closed exactly when `run` returns. Only the first call returns it.
    fn out(&self) -> Option<mpsc::Receiver<T>>;
}

pub trait Sink<T>: Device {
    ///A handle for sending commands. Sends fail (without panicking) once `run` has returned.
    fn sink(&self) -> mpsc::Sender<T>;
}

///A device that is both a `Source<T>` and a `Sink<T>`, e.g. a dimmer or a serial link.
pub trait Duplex<T>: Source<T> + Sink<T> {}

impl<T, D> Duplex<T> for D where D: Source<T> + Sink<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{base::Base, slot::TakeOnce};

    struct Loopback {
        base: Base,
        in_tx: mpsc::Sender<bool>,
        in_rx: TakeOnce<mpsc::Receiver<bool>>,
        out_tx: TakeOnce<mpsc::Sender<bool>>,
        out_rx: TakeOnce<mpsc::Receiver<bool>>,
    }

    impl Loopback {
        fn new() -> Self {
            let (in_tx, in_rx) = mpsc::channel(1);
            let (out_tx, out_rx) = mpsc::channel(1);
            Self {
                base: Base::new("loop", 1),
                in_tx,
                in_rx: TakeOnce::new(in_rx),
                out_tx: TakeOnce::new(out_tx),
                out_rx: TakeOnce::new(out_rx),
            }
        }
    }

    impl Device for Loopback {
        fn name(&self) -> &str {
            self.base.name()
        }

        async fn run(&self, cancel: CancellationToken) -> Result<(), DeviceError> {
            let mut rx = self.in_rx.take().ok_or(DeviceError::AlreadyRunning("input"))?;
            let tx = self.out_tx.take().ok_or(DeviceError::AlreadyRunning("output"))?;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    v = rx.recv() => match v {
                        Some(v) => {
                            if tx.send(v).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            drop(tx);
            self.base.close();
            Ok(())
        }

        fn events(&self) -> Option<mpsc::Receiver<Event>> {
            self.base.events()
        }
    }

    impl Source<bool> for Loopback {
        fn out(&self) -> Option<mpsc::Receiver<bool>> {
            self.out_rx.take()
        }
    }

    impl Sink<bool> for Loopback {
        fn sink(&self) -> mpsc::Sender<bool> {
            self.in_tx.clone()
        }
    }

    fn assert_duplex<D: Duplex<bool>>(_: &D) {}

    #[tokio::test]
    async fn duplex_round_trip_and_second_run_rejected() {
        let dev = std::sync::Arc::new(Loopback::new());
        assert_duplex(dev.as_ref());
        assert_eq!(dev.name(), "loop");

        let mut out = dev.out().unwrap();
        let mut events = dev.events().unwrap();
        let cancel = CancellationToken::new();
        let handle = {
            let dev = dev.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { dev.run(cancel).await })
        };

        dev.sink().send(true).await.unwrap();
        assert_eq!(out.recv().await, Some(true));

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(out.recv().await, None);
        assert!(events.recv().await.is_none());
        assert!(dev.sink().send(false).await.is_err());

        assert!(matches!(
            dev.run(CancellationToken::new()).await,
            Err(DeviceError::AlreadyRunning(_))
        ));
    }
}
