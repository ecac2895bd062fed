//! The interval polling engine.
//!
//! `run_poller` turns a single-shot `read` into a periodic sample stream with uniform
//! startup, error reporting and backpressure:
//! - emits `Open`, then optionally reads once before the first tick
//! - reads on every tick; a failed read emits `Error` and the loop carries on
//! - a successful read calls `on_sample`, publishes the sample, then emits `Info`
//! - on cancellation: stops the ticker, closes the output, emits `Close`, closes events
//!
//! `drop_on_full` picks the backpressure policy. When set, a full output buffer drops
//! the sample. When clear, publishing waits for the consumer, which throttles the
//! read cadence itself.

use std::{future::Future, sync::Arc, time::Duration};

use futures::future::BoxFuture;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    base::Base,
    device::{Device, Source},
    error::{DeviceError, DynError},
    event::{Event, EventError, EventKind, Meta},
    slot::TakeOnce,
    ticker::{IntervalTicker, Ticker, TickerFactory},
};

pub type ReadFn<T> = Box<dyn FnMut(CancellationToken) -> BoxFuture<'static, Result<T, DynError>> + Send>;
pub type OnSampleFn<T> = Box<dyn FnMut(&T) + Send>;
pub type SampleMetaFn<T> = Box<dyn Fn(&T) -> Meta + Send>;

pub const DEFAULT_SAMPLE_MSG: &str = "sample";

///Polling behaviour for one `run_poller` call.
pub struct PollConfig<T> {
    ///Must be non-zero.
    pub interval: Duration,
    ///Read once immediately, before the first tick.
    pub emit_initial: bool,
    ///Drop samples when the output is full instead of waiting for the consumer.
    pub drop_on_full: bool,
    pub read: Option<ReadFn<T>>,
    ///Called after every successful read, before the sample is published.
    pub on_sample: Option<OnSampleFn<T>>,
    ///Metadata for the `Info` event that follows each sample.
    pub sample_meta: Option<SampleMetaFn<T>>,
    pub sample_event_msg: String,
    ///Overrides ticker creation; `IntervalTicker` otherwise.
    pub new_ticker: Option<TickerFactory>,
}

impl<T> PollConfig<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            emit_initial: false,
            drop_on_full: true,
            read: None,
            on_sample: None,
            sample_meta: None,
            sample_event_msg: DEFAULT_SAMPLE_MSG.to_string(),
            new_ticker: None,
        }
    }

    pub fn read<F, Fut>(mut self, mut read: F) -> Self
    where
        F: FnMut(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, DynError>> + Send + 'static,
    {
        self.read = Some(Box::new(move |cancel| Box::pin(read(cancel))));
        self
    }

    pub fn emit_initial(mut self, emit_initial: bool) -> Self {
        self.emit_initial = emit_initial;
        self
    }

    pub fn drop_on_full(mut self, drop_on_full: bool) -> Self {
        self.drop_on_full = drop_on_full;
        self
    }

    pub fn on_sample(mut self, on_sample: impl FnMut(&T) + Send + 'static) -> Self {
        self.on_sample = Some(Box::new(on_sample));
        self
    }

    pub fn sample_meta(mut self, sample_meta: impl Fn(&T) -> Meta + Send + 'static) -> Self {
        self.sample_meta = Some(Box::new(sample_meta));
        self
    }

    pub fn sample_event_msg(mut self, msg: &str) -> Self {
        self.sample_event_msg = msg.to_string();
        self
    }

    pub fn ticker(mut self, new_ticker: TickerFactory) -> Self {
        self.new_ticker = Some(new_ticker);
        self
    }
}

enum Step {
    Continue,
    Stop,
}

struct PollLoop<'a, T> {
    base: &'a Base,
    out: mpsc::Sender<T>,
    read: ReadFn<T>,
    drop_on_full: bool,
    on_sample: Option<OnSampleFn<T>>,
    sample_meta: Option<SampleMetaFn<T>>,
    msg: String,
}

impl<T: Send + 'static> PollLoop<'_, T> {
    async fn sample(&mut self, cancel: &CancellationToken) -> Step {
        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Step::Stop,
            res = (self.read)(cancel.clone()) => res,
        };
        match res {
            Ok(value) => self.publish(cancel, value).await,
            Err(err) => {
                let err: EventError = Arc::from(err);
                self.base.emit(EventKind::Error, "read failed", Some(err), None);
                Step::Continue
            }
        }
    }

    async fn publish(&mut self, cancel: &CancellationToken, value: T) -> Step {
        if let Some(on_sample) = self.on_sample.as_mut() {
            on_sample(&value);
        }
        let meta = self.sample_meta.as_ref().map(|sample_meta| sample_meta(&value));

        if self.drop_on_full {
            match self.out.try_send(value) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => trace!(device = %self.base.name(), "output full, sample dropped"),
                Err(TrySendError::Closed(_)) => trace!(device = %self.base.name(), "output receiver gone"),
            }
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Step::Stop,
                res = self.out.send(value) => {
                    if res.is_err() {
                        trace!(device = %self.base.name(), "output receiver gone");
                    }
                }
            }
        }

        self.base.emit(EventKind::Info, &self.msg, None, meta);
        Step::Continue
    }
}

///Runs a standard polling loop until `cancel` fires.
///
/// Owns `out` and the event channel of `base`: both are closed before this returns,
/// on every path. Configuration errors return immediately without `Open`/`Close`.
pub async fn run_poller<T>(
    cancel: CancellationToken,
    base: &Base,
    out: mpsc::Sender<T>,
    cfg: PollConfig<T>,
) -> Result<(), DeviceError>
where
    T: Send + 'static,
{
    let PollConfig {
        interval,
        emit_initial,
        drop_on_full,
        read,
        on_sample,
        sample_meta,
        sample_event_msg,
        new_ticker,
    } = cfg;

    let read = match read {
        Some(read) if !interval.is_zero() => read,
        _ => {
            let (msg, err): (&str, fn() -> DeviceError) = if interval.is_zero() {
                ("invalid interval", || DeviceError::PollInterval)
            } else {
                ("read func missing", || DeviceError::PollReadMissing)
            };
            drop(out);
            let event_err: EventError = Arc::new(err());
            base.emit(EventKind::Error, msg, Some(event_err), None);
            base.close();
            return Err(err());
        }
    };

    base.emit(EventKind::Open, "run", None, None);
    debug!(device = %base.name(), ?interval, "poller starting");

    let mut ticker: Box<dyn Ticker> = match new_ticker {
        Some(new_ticker) => new_ticker(interval),
        None => Box::new(IntervalTicker::new(interval)),
    };

    let mut poll = PollLoop {
        base,
        out,
        read,
        drop_on_full,
        on_sample,
        sample_meta,
        msg: sample_event_msg,
    };

    let mut stopped = emit_initial && matches!(poll.sample(&cancel).await, Step::Stop);
    while !stopped {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => stopped = true,
            tick = ticker.tick() => match tick {
                Some(_) => stopped = matches!(poll.sample(&cancel).await, Step::Stop),
                None => {
                    //ticker exhausted, stay alive until canceled
                    cancel.cancelled().await;
                    stopped = true;
                }
            },
        }
    }

    ticker.stop();
    drop(poll);
    base.emit(EventKind::Close, "stop", None, None);
    base.close();
    debug!(device = %base.name(), "poller shutting down");
    Ok(())
}

///A ready-made `Source<T>` backed by `run_poller`.
pub struct PollingSource<T> {
    base: Base,
    out_tx: TakeOnce<mpsc::Sender<T>>,
    out_rx: TakeOnce<mpsc::Receiver<T>>,
    cfg: TakeOnce<PollConfig<T>>,
}

impl<T: Send + 'static> PollingSource<T> {
    ///`buffer_size` sizes both the sample and the event buffers; zero selects the default.
    pub fn new(name: &str, buffer_size: usize, cfg: PollConfig<T>) -> Self {
        let base = Base::new(name, buffer_size);
        let (out_tx, out_rx) = mpsc::channel(base.capacity());
        Self {
            base,
            out_tx: TakeOnce::new(out_tx),
            out_rx: TakeOnce::new(out_rx),
            cfg: TakeOnce::new(cfg),
        }
    }

    pub fn base(&self) -> &Base {
        &self.base
    }
}

impl<T: Send + 'static> Device for PollingSource<T> {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn run(&self, cancel: CancellationToken) -> Result<(), DeviceError> {
        let (Some(out), Some(cfg)) = (self.out_tx.take(), self.cfg.take()) else {
            return Err(DeviceError::AlreadyRunning("poll loop"));
        };
        run_poller(cancel, &self.base, out, cfg).await
    }

    fn events(&self) -> Option<mpsc::Receiver<Event>> {
        self.base.events()
    }
}

impl<T: Send + 'static> Source<T> for PollingSource<T> {
    fn out(&self) -> Option<mpsc::Receiver<T>> {
        self.out_rx.take()
    }
}
