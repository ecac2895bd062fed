//!Core library for device streams. Every other iodev crate depends on this one.
//!
//! It holds the diagnostic event model, the `Base` event channel owner, the device
//! lifecycle contracts, the `Sensor<T>` capability used by stream combinators, and the
//! polling engine that turns a single-shot read into a periodic sample stream.

pub mod base;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod event;
pub mod poll;
pub mod sensor;
pub mod slot;
pub mod ticker;

pub use base::Base;
pub use descriptor::{AccessMode, Described, Descriptor};
pub use device::{Device, Duplex, Sink, Source};
pub use error::{BuildError, DeviceError, DynError, EmitError};
pub use event::{Event, EventError, EventKind, Meta};
pub use poll::{run_poller, PollConfig, PollingSource};
pub use sensor::{BoxSensor, ChannelSensor, CloseGuard, DynSensor, Sensor, SourceSensor};
pub use ticker::{IntervalTicker, ManualTicker, TickSender, Ticker, TickerFactory};
