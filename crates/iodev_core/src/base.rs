//! `Base` owns a device's name and its bounded event channel.
//!
//! Three emission policies are offered:
//! - `emit` never blocks; events are dropped when the buffer is full.
//! - `emit_blocking` waits for buffer space or for the device to close.
//! - `emit_with_context` additionally gives up when the caller's token is canceled.
//!
//! `close` runs once. Every emit variant checks the closed state under the same lock
//! `close` takes, so nothing is ever sent after the channel has been closed.

use std::{sync::Mutex, time::Duration};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    error::EmitError,
    event::{Event, EventError, EventKind, Meta},
    slot::{lock, TakeOnce},
};

///Event buffer size used when the caller asks for zero.
pub const DEFAULT_EVENT_BUFFER: usize = 16;

pub struct Base {
    name: String,
    capacity: usize,
    tx: Mutex<Option<mpsc::Sender<Event>>>,
    rx: TakeOnce<mpsc::Receiver<Event>>,
    closed: CancellationToken,
}

impl Base {
    pub fn new(name: &str, buffer_size: usize) -> Self {
        let capacity = if buffer_size == 0 {
            DEFAULT_EVENT_BUFFER
        } else {
            buffer_size
        };
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            name: name.to_string(),
            capacity,
            tx: Mutex::new(Some(tx)),
            rx: TakeOnce::new(rx),
            closed: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    ///Hands out the receiving half of the event stream. Only the first call gets it.
    pub fn events(&self) -> Option<mpsc::Receiver<Event>> {
        self.rx.take()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn event(&self, kind: EventKind, msg: &str, err: Option<EventError>, meta: Option<Meta>) -> Event {
        Event::new(&self.name, kind, msg).with_err(err).with_meta(meta)
    }

    ///Best-effort publish. Drops the event if the buffer is full or the device is closed.
    pub fn emit(&self, kind: EventKind, msg: &str, err: Option<EventError>, meta: Option<Meta>) {
        let guard = lock(&self.tx);
        if let Some(tx) = guard.as_ref() {
            if tx.try_send(self.event(kind, msg, err, meta)).is_err() {
                trace!(device = %self.name, %kind, "event dropped");
            }
        }
    }

    ///Waits until the event is buffered or the device closes.
    ///
    /// Must only be used while something drains `events()`, or it waits until `close`.
    pub async fn emit_blocking(&self, kind: EventKind, msg: &str, err: Option<EventError>, meta: Option<Meta>) {
        let never = CancellationToken::new();
        //cannot fail: `never` is never canceled
        let _ = self.deliver(&never, self.event(kind, msg, err, meta)).await;
    }

    ///Waits until the event is buffered, `ctx` is canceled, or the device closes.
    ///
    /// Only cancellation is reported; a closed device returns `Ok` without sending.
    pub async fn emit_with_context(
        &self,
        ctx: &CancellationToken,
        kind: EventKind,
        msg: &str,
        err: Option<EventError>,
        meta: Option<Meta>,
    ) -> Result<(), EmitError> {
        self.deliver(ctx, self.event(kind, msg, err, meta)).await
    }

    ///`emit_with_context` bounded by a deadline instead of a token.
    pub async fn emit_with_timeout(
        &self,
        timeout: Duration,
        kind: EventKind,
        msg: &str,
        err: Option<EventError>,
        meta: Option<Meta>,
    ) -> Result<(), EmitError> {
        let never = CancellationToken::new();
        let event = self.event(kind, msg, err, meta);
        match tokio::time::timeout(timeout, self.deliver(&never, event)).await {
            Ok(res) => res,
            Err(_) => Err(EmitError::DeadlineExceeded),
        }
    }

    async fn deliver(&self, ctx: &CancellationToken, event: Event) -> Result<(), EmitError> {
        let tx = match lock(&self.tx).as_ref() {
            Some(tx) => tx.clone(),
            None => return Ok(()),
        };

        let permit = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Ok(()),
            _ = ctx.cancelled() => return Err(EmitError::Canceled),
            permit = tx.reserve() => permit,
        };

        //the receiver was dropped; nobody is listening
        let Ok(permit) = permit else {
            return Ok(());
        };

        let guard = lock(&self.tx);
        if guard.is_some() {
            permit.send(event);
        }
        Ok(())
    }

    ///Closes the event channel. Only the first call has an effect.
    pub fn close(&self) {
        let mut guard = lock(&self.tx);
        if guard.is_some() {
            self.closed.cancel();
            guard.take();
            debug!(device = %self.name, "event channel closed");
        }
    }

    ///Alias of `close`, for loops that only own the event half.
    pub fn close_events(&self) {
        self.close()
    }
}
