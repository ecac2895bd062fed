//!Stream combinators over the `Sensor<T>` capability.
//!
//! Each combinator owns exactly one upstream sensor and the output streams it creates.
//! Combinators are sensors themselves, so they nest:
//! `FanOut::new(LastValue::new(Debounce::comparable(src, window)), 2, 8)`.

use std::future::Future;

use iodev_core::{error::DeviceError, sensor::{CloseGuard, Sensor}};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub mod debounce;
pub mod fan_out;
pub mod last_value;
pub mod rate_limit;

pub use debounce::Debounce;
pub use fan_out::FanOut;
pub use last_value::LastValue;
pub use rate_limit::RateLimit;

///Output buffer size of the single-output combinators.
pub const OUT_BUFFER: usize = 1;

///Runs `src` together with a `forward` loop over its stream, until both have stopped.
///
/// The loop gets a child token of `cancel`, which is canceled when the loop ends, when
/// `src` fails, or when `guard` is closed. `src` runs on that same token, so the upstream
/// never outlives the loop.
pub(crate) async fn drive<T, S, F, Fut>(
    name: &'static str,
    src: &S,
    guard: &CloseGuard,
    cancel: CancellationToken,
    forward: F,
) -> Result<(), DeviceError>
where
    S: Sensor<T>,
    F: FnOnce(mpsc::Receiver<T>, CancellationToken) -> Fut,
    Fut: Future<Output = ()>,
{
    let Some(rx) = src.read() else {
        return Err(DeviceError::AlreadyRunning("upstream stream"));
    };
    let token = cancel.child_token();

    let upstream = async {
        let res = src.run(token.clone()).await;
        if res.is_err() {
            token.cancel();
        }
        res
    };
    let forwarding = async {
        forward(rx, token.clone()).await;
        token.cancel();
    };

    let (res, ()) = guard
        .guard(&token, async { tokio::join!(upstream, forwarding) })
        .await;
    debug!(combinator = name, "shutting down");
    res
}

///Sends `value`, waiting for buffer space unless `cancel` fires first.
/// Returns false once the loop should stop.
pub(crate) async fn send_or_cancel<T>(tx: &mpsc::Sender<T>, cancel: &CancellationToken, value: T) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        res = tx.send(value) => res.is_ok(),
    }
}
