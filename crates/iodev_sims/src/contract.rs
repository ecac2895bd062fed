//! Lifecycle conformance check for `Source<T>` devices.
//!
//! Runs a device, cancels it, and verifies that `run` returns in bounded time with
//! both `out()` and `events()` already closed.

use std::{sync::Arc, time::Duration};

use iodev_core::{
    device::Source,
    error::DeviceError,
    event::{Event, EventKind},
};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum ContractError {
    #[error("{0} stream was already taken")]
    Taken(&'static str),

    #[error("run did not return within {0:?} of cancellation")]
    Hung(Duration),

    #[error("run task panicked")]
    Panicked,

    #[error("run failed: {0}")]
    Run(#[from] DeviceError),

    #[error("{0} stream still open after run returned")]
    LeftOpen(&'static str),

    #[error("last event was {0:?}, expected close")]
    NoCloseEvent(Option<EventKind>),
}

///What the check observed, for further assertions.
#[derive(Debug)]
pub struct ContractReport<T> {
    pub samples: Vec<T>,
    pub events: Vec<Event>,
}

///Runs `dev` for `active`, cancels it, and requires `run` to return within `limit`.
pub async fn check_source<T, D>(
    dev: Arc<D>,
    active: Duration,
    limit: Duration,
) -> Result<ContractReport<T>, ContractError>
where
    T: Send + 'static,
    D: Source<T> + 'static,
{
    let mut out = dev.out().ok_or(ContractError::Taken("out"))?;
    let mut events = dev.events().ok_or(ContractError::Taken("events"))?;

    let cancel = CancellationToken::new();
    let handle = {
        let dev = dev.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { dev.run(cancel).await })
    };

    tokio::time::sleep(active).await;
    cancel.cancel();
    let joined = tokio::time::timeout(limit, handle)
        .await
        .map_err(|_| ContractError::Hung(limit))?;
    joined.map_err(|_| ContractError::Panicked)??;

    let samples = drain(&mut out).ok_or(ContractError::LeftOpen("out"))?;
    let events = drain(&mut events).ok_or(ContractError::LeftOpen("events"))?;
    match events.last().map(|ev| ev.kind) {
        Some(EventKind::Close) => {}
        other => return Err(ContractError::NoCloseEvent(other)),
    }
    Ok(ContractReport { samples, events })
}

///Everything still buffered, or `None` if the stream has not been closed.
fn drain<T>(rx: &mut mpsc::Receiver<T>) -> Option<Vec<T>> {
    let mut items = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(item) => items.push(item),
            Err(TryRecvError::Disconnected) => return Some(items),
            Err(TryRecvError::Empty) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iodev_core::poll::{PollConfig, PollingSource};

    #[tokio::test(start_paused = true)]
    async fn polling_source_conforms() {
        let mut n = 0;
        let cfg = PollConfig::new(Duration::from_millis(10)).read(move |_| {
            n += 1;
            let v = n;
            async move { Ok(v) }
        });
        let dev = Arc::new(PollingSource::new("counter", 64, cfg));
        let report = check_source(dev, Duration::from_millis(55), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(report.samples, vec![1, 2, 3, 4, 5]);
        assert_eq!(report.events.first().map(|ev| ev.kind), Some(EventKind::Open));
    }

    #[tokio::test]
    async fn taken_streams_are_reported() {
        let cfg = PollConfig::new(Duration::from_millis(10)).read(|_| async { Ok(0u8) });
        let dev = Arc::new(PollingSource::new("taken", 1, cfg));
        let _out = dev.out();
        assert!(matches!(
            check_source(dev, Duration::ZERO, Duration::from_secs(1)).await,
            Err(ContractError::Taken("out"))
        ));
    }
}
