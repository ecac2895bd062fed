//! Periodic time signals for the polling engine.
//!
//! `IntervalTicker` follows the wall clock. `ManualTicker` only fires when its
//! `TickSender` says so, which lets tests step a poll loop one tick at a time.

use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio::{
    sync::mpsc,
    time::{self, Interval, MissedTickBehavior},
};

pub trait Ticker: Send {
    ///Waits for the next tick. `None` means no further ticks will ever arrive.
    fn tick(&mut self) -> BoxFuture<'_, Option<Instant>>;

    fn stop(&mut self);
}

///Builds the ticker a poll loop uses, given the configured interval.
pub type TickerFactory = Box<dyn FnOnce(Duration) -> Box<dyn Ticker> + Send>;

///Ticks every `period`, starting one period from now. Ticks missed by a slow loop are skipped.
pub struct IntervalTicker {
    interval: Option<Interval>,
}

impl IntervalTicker {
    ///`period` must be non-zero.
    pub fn new(period: Duration) -> Self {
        let mut interval = time::interval_at(time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            interval: Some(interval),
        }
    }
}

impl Ticker for IntervalTicker {
    fn tick(&mut self) -> BoxFuture<'_, Option<Instant>> {
        Box::pin(async move {
            match self.interval.as_mut() {
                Some(interval) => Some(interval.tick().await.into_std()),
                None => None,
            }
        })
    }

    fn stop(&mut self) {
        self.interval = None;
    }
}

///A ticker driven by hand through its `TickSender`.
pub struct ManualTicker {
    rx: mpsc::UnboundedReceiver<Instant>,
}

#[derive(Clone)]
pub struct TickSender {
    tx: mpsc::UnboundedSender<Instant>,
}

impl ManualTicker {
    pub fn new() -> (Self, TickSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, TickSender { tx })
    }

    ///Wraps this ticker as a factory, ignoring the configured interval.
    pub fn into_factory(self) -> TickerFactory {
        Box::new(move |_| Box::new(self) as Box<dyn Ticker>)
    }
}

impl Ticker for ManualTicker {
    fn tick(&mut self) -> BoxFuture<'_, Option<Instant>> {
        Box::pin(self.rx.recv())
    }

    fn stop(&mut self) {
        self.rx.close();
    }
}

impl TickSender {
    ///Fires one tick. Returns false once the ticker has been stopped or dropped.
    pub fn tick(&self) -> bool {
        self.tx.send(Instant::now()).is_ok()
    }
}
