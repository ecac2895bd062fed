use std::time::Duration;

use iodev_core::{
    base::DEFAULT_EVENT_BUFFER,
    descriptor::{AccessMode, Described, Descriptor},
    device::{Device, Source},
    error::{DeviceError, DynError},
    event::Event,
    poll::{PollConfig, PollingSource},
    ticker::TickerFactory,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub type NextFn<T> = Box<dyn FnMut(&T) -> T + Send>;

pub struct MockSensorConfig<T> {
    pub name: String,
    ///Must be non-zero.
    pub interval: Duration,
    pub buffer_size: usize,
    pub initial: T,
    ///Produces the next value from the current one. Without it `initial` repeats forever.
    pub next: Option<NextFn<T>>,
    ///Publish `initial` immediately on start.
    pub emit_initial: bool,
    pub ticker: Option<TickerFactory>,
}

impl<T> MockSensorConfig<T> {
    pub fn new(name: &str, interval: Duration, initial: T) -> Self {
        Self {
            name: name.to_string(),
            interval,
            buffer_size: DEFAULT_EVENT_BUFFER,
            initial,
            next: None,
            emit_initial: false,
            ticker: None,
        }
    }

    pub fn next(mut self, next: impl FnMut(&T) -> T + Send + 'static) -> Self {
        self.next = Some(Box::new(next));
        self
    }
}

///A source that emits a generated value on every tick, with no hardware behind it.
pub struct MockSensor<T> {
    source: PollingSource<T>,
    value_type: &'static str,
}

impl<T: Clone + Send + 'static> MockSensor<T> {
    pub fn new(cfg: MockSensorConfig<T>) -> Self {
        let MockSensorConfig {
            name,
            interval,
            buffer_size,
            initial,
            mut next,
            emit_initial,
            ticker,
        } = cfg;

        let mut state = initial;
        //the initial sample is published as is, every later one steps first
        let mut fresh = emit_initial;
        let mut poll = PollConfig::new(interval)
            .emit_initial(emit_initial)
            .sample_event_msg("tick")
            .read(move |_| {
                if !fresh {
                    if let Some(next) = next.as_mut() {
                        state = next(&state);
                    }
                }
                fresh = false;
                let value: Result<T, DynError> = Ok(state.clone());
                async move { value }
            });
        if let Some(ticker) = ticker {
            poll = poll.ticker(ticker);
        }

        Self {
            source: PollingSource::new(&name, buffer_size, poll),
            value_type: std::any::type_name::<T>(),
        }
    }
}

impl<T: Send + 'static> Device for MockSensor<T> {
    fn name(&self) -> &str {
        self.source.name()
    }

    async fn run(&self, cancel: CancellationToken) -> Result<(), DeviceError> {
        self.source.run(cancel).await
    }

    fn events(&self) -> Option<mpsc::Receiver<Event>> {
        self.source.events()
    }
}

impl<T: Send + 'static> Source<T> for MockSensor<T> {
    fn out(&self) -> Option<mpsc::Receiver<T>> {
        self.source.out()
    }
}

impl<T: Send + 'static> Described for MockSensor<T> {
    fn descriptor(&self) -> Descriptor {
        Descriptor::new(self.source.base().name(), "mock", self.value_type, AccessMode::ReadOnly)
            .with_tag("sim")
    }
}
