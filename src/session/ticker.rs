use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Periodic tick source that only exists while armed.
///
/// Disarming drops the underlying `Interval`, so a paused or finished session
/// holds no timer. Dropping the `Ticker` releases it on every other exit path.
pub(crate) struct Ticker {
    period: Duration,
    interval: Option<Interval>,
}

impl Ticker {
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
            interval: None,
        }
    }

    /// Start ticking one full period from now. No-op when already armed.
    pub fn arm(&mut self) {
        if self.interval.is_some() {
            return;
        }
        let mut iv = interval_at(Instant::now() + self.period, self.period);
        iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(iv);
    }

    pub fn disarm(&mut self) {
        self.interval = None;
    }

    #[cfg(test)]
    pub fn is_armed(&self) -> bool {
        self.interval.is_some()
    }

    /// Resolves on the next tick; never resolves while disarmed.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(iv) => {
                iv.tick().await;
            }
            None => futures::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_a_full_period() {
        let mut t = Ticker::new(Duration::from_secs(1));
        t.arm();
        let start = Instant::now();
        t.tick().await;
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        t.tick().await;
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn disarmed_ticker_never_fires() {
        let mut t = Ticker::new(Duration::from_secs(1));
        t.arm();
        t.disarm();
        assert!(!t.is_armed());
        let fired = tokio::time::timeout(Duration::from_secs(30), t.tick()).await;
        assert!(fired.is_err());
    }
}
