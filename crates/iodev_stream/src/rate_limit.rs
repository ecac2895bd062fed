//! Emits at most one value per period: the latest one seen since the previous emission.

use std::time::Duration;

use iodev_core::{
    error::DeviceError,
    sensor::{CloseGuard, Sensor},
    slot::TakeOnce,
};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::{drive, OUT_BUFFER};

pub struct RateLimit<T, S> {
    src: S,
    period: Duration,
    out_tx: TakeOnce<mpsc::Sender<T>>,
    out_rx: TakeOnce<mpsc::Receiver<T>>,
    guard: CloseGuard,
}

impl<T: Send + 'static, S: Sensor<T>> RateLimit<T, S> {
    pub fn new(src: S, period: Duration) -> Result<Self, DeviceError> {
        if period.is_zero() {
            return Err(DeviceError::config("rate limit period must be > 0"));
        }
        let (out_tx, out_rx) = mpsc::channel(OUT_BUFFER);
        Ok(Self {
            src,
            period,
            out_tx: TakeOnce::new(out_tx),
            out_rx: TakeOnce::new(out_rx),
            guard: CloseGuard::new(),
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl<T: Send + 'static, S: Sensor<T>> Sensor<T> for RateLimit<T, S> {
    async fn run(&self, cancel: CancellationToken) -> Result<(), DeviceError> {
        let tx = self.out_tx.take().ok_or(DeviceError::AlreadyRunning("rate limit"))?;
        let period = self.period;
        drive("rate_limit", &self.src, &self.guard, cancel, |rx, token| {
            limit(rx, tx, token, period)
        })
        .await
    }

    fn close(&self) -> Result<(), DeviceError> {
        self.guard.close_with(|| self.src.close())
    }

    fn read(&self) -> Option<mpsc::Receiver<T>> {
        self.out_rx.take()
    }
}

async fn limit<T>(
    mut rx: mpsc::Receiver<T>,
    tx: mpsc::Sender<T>,
    cancel: CancellationToken,
    period: Duration,
) {
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    //`Some` only while the value has not been delivered yet
    let mut latest: Option<T> = None;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            value = rx.recv() => match value {
                Some(value) => latest = Some(value),
                None => break,
            },
            _ = ticker.tick() => {
                let Some(value) = latest.take() else {
                    continue;
                };
                match tx.try_send(value) {
                    Ok(()) => {}
                    Err(TrySendError::Full(value)) => {
                        trace!("consumer behind, rate limit tick dropped");
                        latest = Some(value);
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iodev_core::sensor::ChannelSensor;
    use std::sync::Arc;
    use tokio::sync::mpsc::error::TryRecvError;

    #[test]
    fn zero_period_rejected() {
        let (src, _tx) = ChannelSensor::<u8>::new(1);
        assert!(matches!(
            RateLimit::new(src, Duration::ZERO),
            Err(DeviceError::Config(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn emits_latest_once_per_tick() {
        let (src, tx) = ChannelSensor::new(8);
        let limiter = Arc::new(RateLimit::new(src, Duration::from_millis(100)).unwrap());
        let mut out = limiter.read().unwrap();
        let handle = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.run(CancellationToken::new()).await })
        };

        for v in [10, 11, 12] {
            tx.send(v).await.unwrap();
        }
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(out.try_recv().unwrap_err(), TryRecvError::Empty);

        time::sleep(Duration::from_millis(60)).await;
        assert_eq!(out.try_recv(), Ok(12));

        //nothing new arrived, nothing is re-sent
        time::sleep(Duration::from_millis(300)).await;
        assert_eq!(out.try_recv().unwrap_err(), TryRecvError::Empty);

        tx.send(13).await.unwrap();
        assert_eq!(out.recv().await, Some(13));

        limiter.close().unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(out.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_consumer_gets_latest_when_it_catches_up() {
        let (src, tx) = ChannelSensor::new(8);
        let limiter = Arc::new(RateLimit::new(src, Duration::from_millis(10)).unwrap());
        let mut out = limiter.read().unwrap();
        let cancel = CancellationToken::new();
        let handle = {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.run(cancel).await })
        };

        tx.send(1).await.unwrap();
        time::sleep(Duration::from_millis(15)).await;
        //buffer holds 1; 2 and 3 arrive while the consumer is away
        tx.send(2).await.unwrap();
        time::sleep(Duration::from_millis(10)).await;
        tx.send(3).await.unwrap();
        time::sleep(Duration::from_millis(10)).await;

        assert_eq!(out.recv().await, Some(1));
        assert_eq!(out.recv().await, Some(3));

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(out.recv().await, None);
    }
}
