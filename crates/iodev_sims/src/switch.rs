use std::sync::atomic::{AtomicBool, Ordering};

use iodev_core::{
    base::{Base, DEFAULT_EVENT_BUFFER},
    descriptor::{AccessMode, Described, Descriptor},
    device::{Device, Sink, Source},
    error::DeviceError,
    event::{Event, EventKind, Meta},
    slot::TakeOnce,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SwitchConfig {
    pub name: String,
    pub initial: bool,
    pub buffer_size: usize,
}

impl SwitchConfig {
    pub fn new(name: &str, initial: bool) -> Self {
        Self {
            name: name.to_string(),
            initial,
            buffer_size: DEFAULT_EVENT_BUFFER,
        }
    }
}

///An in-memory on/off device. Every command on `sink()` becomes the new state and is
/// echoed on `out()`.
pub struct Switch {
    base: Base,
    state: AtomicBool,
    in_tx: mpsc::Sender<bool>,
    in_rx: TakeOnce<mpsc::Receiver<bool>>,
    out_tx: TakeOnce<mpsc::Sender<bool>>,
    out_rx: TakeOnce<mpsc::Receiver<bool>>,
}

impl Switch {
    pub fn new(cfg: SwitchConfig) -> Self {
        let base = Base::new(&cfg.name, cfg.buffer_size);
        let (in_tx, in_rx) = mpsc::channel(base.capacity());
        let (out_tx, out_rx) = mpsc::channel(base.capacity());
        Self {
            base,
            state: AtomicBool::new(cfg.initial),
            in_tx,
            in_rx: TakeOnce::new(in_rx),
            out_tx: TakeOnce::new(out_tx),
            out_rx: TakeOnce::new(out_rx),
        }
    }

    pub fn state(&self) -> bool {
        self.state.load(Ordering::Acquire)
    }
}

impl Device for Switch {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn run(&self, cancel: CancellationToken) -> Result<(), DeviceError> {
        let (Some(mut rx), Some(tx)) = (self.in_rx.take(), self.out_tx.take()) else {
            return Err(DeviceError::AlreadyRunning("switch"));
        };

        self.base.emit(EventKind::Open, "run", None, None);
        let _ = tx.try_send(self.state());

        loop {
            let value = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                value = rx.recv() => match value {
                    Some(value) => value,
                    None => break,
                },
            };
            self.state.store(value, Ordering::Release);
            let _ = tx.try_send(value);
            let meta = Meta::from([("value".to_string(), value.to_string())]);
            self.base.emit(EventKind::Info, "set", None, Some(meta));
        }

        drop(rx);
        drop(tx);
        self.base.emit(EventKind::Close, "stop", None, None);
        self.base.close();
        debug!(device = %self.base.name(), "switch shutting down");
        Ok(())
    }

    fn events(&self) -> Option<mpsc::Receiver<Event>> {
        self.base.events()
    }
}

impl Source<bool> for Switch {
    fn out(&self) -> Option<mpsc::Receiver<bool>> {
        self.out_rx.take()
    }
}

impl Sink<bool> for Switch {
    fn sink(&self) -> mpsc::Sender<bool> {
        self.in_tx.clone()
    }
}

impl Described for Switch {
    fn descriptor(&self) -> Descriptor {
        Descriptor::new(self.base.name(), "switch", "bool", AccessMode::ReadWrite).with_tag("sim")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::check_source;
    use iodev_core::device::Duplex;
    use std::{sync::Arc, time::Duration};

    fn assert_duplex<D: Duplex<bool>>(_: &D) {}

    #[tokio::test]
    async fn publishes_initial_and_echoes_commands() {
        let switch = Arc::new(Switch::new(SwitchConfig::new("relay", true)));
        assert_duplex(switch.as_ref());
        let mut out = switch.out().unwrap();
        let mut events = switch.events().unwrap();
        let cancel = CancellationToken::new();
        let handle = {
            let switch = switch.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { switch.run(cancel).await })
        };

        assert_eq!(out.recv().await, Some(true));
        switch.sink().send(false).await.unwrap();
        assert_eq!(out.recv().await, Some(false));
        assert!(!switch.state());

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(out.recv().await, None);
        assert!(switch.sink().send(true).await.is_err());

        let mut set = Vec::new();
        while let Some(ev) = events.recv().await {
            if ev.kind == EventKind::Info {
                assert_eq!(ev.msg, "set");
                set.push(ev.meta_value("value").map(str::to_string));
            }
        }
        assert_eq!(set, vec![Some("false".to_string())]);
    }

    #[tokio::test]
    async fn conforms_to_source_contract() {
        let switch = Arc::new(Switch::new(SwitchConfig::new("relay", false)));
        let report = check_source(switch, Duration::from_millis(10), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(report.samples, vec![false]);
    }

    #[test]
    fn describes_itself() {
        let switch = Switch::new(SwitchConfig::new("pump", false));
        let descriptor = switch.descriptor();
        assert_eq!(descriptor.kind, "switch");
        assert_eq!(descriptor.access, AccessMode::ReadWrite);
    }
}
