//! Decides when descheduling may happen.
//!
//! In `event` mode the gate is always open. In `time` mode it opens once a
//! day at the configured wall-clock minute, pushes one `TimerFired` event and
//! closes again after the window duration.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::domain::traits::Clock;
use crate::domain::types::Event;
use crate::domain::work_queue::WorkQueue;

pub const WINDOW_EVENT_KEY: &str = "window";
pub const INTERVAL_EVENT_KEY: &str = "interval";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum TriggerMode {
    #[display("event")]
    Event,
    #[display("time")]
    Time,
}

#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
#[display("Can't recognize trigger mode {_0:?}, either set it to event or time")]
pub struct UnknownTriggerMode(pub String);

impl core::error::Error for UnknownTriggerMode {}

impl FromStr for TriggerMode {
    type Err = UnknownTriggerMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event" => Ok(Self::Event),
            "time" => Ok(Self::Time),
            other => Err(UnknownTriggerMode(other.to_string())),
        }
    }
}

/// Daily window during which descheduling is allowed in `time` mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub duration: Duration,
}

impl TimeWindow {
    /// `now` falls within the start minute.
    pub fn opens_at(&self, now: &NaiveDateTime) -> bool {
        now.hour() == self.start.hour() && now.minute() == self.start.minute()
    }
}

#[derive(Debug)]
pub struct TriggerGate {
    out_of_time: AtomicBool,
    mode: TriggerMode,
    window: TimeWindow,
    interval: Option<Duration>,
}

impl TriggerGate {
    /// `interval` only applies to `event` mode.
    pub fn new(mode: TriggerMode, window: TimeWindow, interval: Option<Duration>) -> Self {
        Self {
            out_of_time: AtomicBool::new(mode == TriggerMode::Time),
            mode,
            window,
            interval,
        }
    }

    pub fn is_out_of_time(&self) -> bool {
        self.out_of_time.load(Ordering::Acquire)
    }

    fn set_out_of_time(&self, value: bool) {
        self.out_of_time.store(value, Ordering::Release);
    }

    /// Runs until `token` is cancelled.
    #[instrument(skip_all, fields(mode = %self.mode))]
    pub async fn run(&self, clock: Arc<dyn Clock>, queue: WorkQueue, token: CancellationToken) {
        match self.mode {
            TriggerMode::Time => self.run_window(clock.as_ref(), &queue, &token).await,
            TriggerMode::Event => match self.interval {
                Some(period) => self.run_interval(period, &queue, &token).await,
                None => token.cancelled().await,
            },
        }
        info!("Trigger gate stopped");
    }

    async fn run_window(&self, clock: &dyn Clock, queue: &WorkQueue, token: &CancellationToken) {
        let mut last_opened: Option<NaiveDate> = None;
        loop {
            let now = clock.now();
            if self.window.opens_at(&now) && last_opened != Some(now.date()) {
                last_opened = Some(now.date());
                info!(
                    "Time window opened at {}, lasting {:?}",
                    self.window.start.format("%H:%M"),
                    self.window.duration
                );
                self.set_out_of_time(false);
                queue.push(Event::timer(WINDOW_EVENT_KEY));

                let cancelled = tokio::select! {
                    _ = token.cancelled() => true,
                    _ = tokio::time::sleep(self.window.duration) => false,
                };
                self.set_out_of_time(true);
                if cancelled {
                    return;
                }
                info!("Time window closed");
                continue;
            }

            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(DEFAULT_POLL_INTERVAL) => {}
            }
        }
    }

    async fn run_interval(&self, period: Duration, queue: &WorkQueue, token: &CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {
                    queue.push(Event::timer(INTERVAL_EVENT_KEY));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use tokio::time::Instant;

    use super::*;
    use crate::domain::work_queue::work_queue;

    /// Wall clock driven by tokio's paused time.
    struct PausedClock {
        base: NaiveDateTime,
        started: Instant,
    }

    impl PausedClock {
        fn at(hour: u32, minute: u32) -> Self {
            let base = NaiveDate::from_ymd_opt(2024, 3, 1)
                .and_then(|d| d.and_hms_opt(hour, minute, 0))
                .expect("valid date");
            Self {
                base,
                started: Instant::now(),
            }
        }
    }

    impl Clock for PausedClock {
        fn now(&self) -> NaiveDateTime {
            let elapsed = chrono::Duration::from_std(self.started.elapsed()).expect("elapsed");
            self.base + elapsed
        }
    }

    fn window(hour: u32, minute: u32, duration: Duration) -> TimeWindow {
        TimeWindow {
            start: NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time"),
            duration,
        }
    }

    #[test]
    fn mode_parses_known_values() {
        assert_eq!("event".parse::<TriggerMode>(), Ok(TriggerMode::Event));
        assert_eq!("time".parse::<TriggerMode>(), Ok(TriggerMode::Time));
        assert_eq!(
            "cron".parse::<TriggerMode>(),
            Err(UnknownTriggerMode("cron".to_string()))
        );
    }

    #[test]
    fn event_mode_is_always_open() {
        let gate = TriggerGate::new(
            TriggerMode::Event,
            window(23, 0, Duration::from_secs(3600)),
            None,
        );
        assert!(!gate.is_out_of_time());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn time_window_opens_and_closes() {
        let gate = Arc::new(TriggerGate::new(
            TriggerMode::Time,
            window(23, 0, Duration::from_secs(3600)),
            None,
        ));
        let clock = Arc::new(PausedClock::at(22, 59));
        let (queue, mut receiver) = work_queue();
        let token = CancellationToken::new();

        let task = {
            let gate = gate.clone();
            let clock = clock.clone();
            let token = token.clone();
            tokio::spawn(async move { gate.run(clock, queue, token).await })
        };

        tokio::task::yield_now().await;
        assert!(gate.is_out_of_time());

        assert_eq!(receiver.pop().await, Some(Event::timer(WINDOW_EVENT_KEY)));
        assert_eq!(clock.now().time(), NaiveTime::from_hms_opt(23, 0, 0).expect("time"));
        assert!(!gate.is_out_of_time());

        tokio::time::sleep(Duration::from_secs(3590)).await;
        assert!(!gate.is_out_of_time());

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(clock.now().time(), NaiveTime::from_hms_opt(0, 0, 10).expect("time"));
        assert!(gate.is_out_of_time());

        token.cancel();
        task.await.expect("gate task");
    }

    #[tokio::test(start_paused = true)]
    async fn short_window_opens_once_per_day() {
        let gate = Arc::new(TriggerGate::new(
            TriggerMode::Time,
            window(3, 0, Duration::from_secs(5)),
            None,
        ));
        let clock = Arc::new(PausedClock::at(3, 0));
        let (queue, mut receiver) = work_queue();
        let token = CancellationToken::new();

        let task = {
            let gate = gate.clone();
            let token = token.clone();
            tokio::spawn(async move { gate.run(clock, queue, token).await })
        };

        assert_eq!(receiver.pop().await, Some(Event::timer(WINDOW_EVENT_KEY)));
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(gate.is_out_of_time());

        token.cancel();
        task.await.expect("gate task");
        assert_eq!(receiver.shut_down(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_closes_open_window() {
        let gate = Arc::new(TriggerGate::new(
            TriggerMode::Time,
            window(8, 30, Duration::from_secs(3600)),
            None,
        ));
        let clock = Arc::new(PausedClock::at(8, 30));
        let (queue, mut receiver) = work_queue();
        let token = CancellationToken::new();

        let task = {
            let gate = gate.clone();
            let token = token.clone();
            tokio::spawn(async move { gate.run(clock, queue, token).await })
        };

        receiver.pop().await;
        assert!(!gate.is_out_of_time());
        token.cancel();
        task.await.expect("gate task");
        assert!(gate.is_out_of_time());
    }

    #[tokio::test(start_paused = true)]
    async fn event_mode_interval_ticks() {
        let gate = Arc::new(TriggerGate::new(
            TriggerMode::Event,
            window(23, 0, Duration::from_secs(3600)),
            Some(Duration::from_secs(600)),
        ));
        let (queue, mut receiver) = work_queue();
        let token = CancellationToken::new();
        let start = Instant::now();

        let task = {
            let gate = gate.clone();
            let token = token.clone();
            let clock: Arc<dyn Clock> = Arc::new(PausedClock::at(12, 0));
            tokio::spawn(async move { gate.run(clock, queue, token).await })
        };

        assert_eq!(receiver.pop().await, Some(Event::timer(INTERVAL_EVENT_KEY)));
        assert_eq!(start.elapsed(), Duration::from_secs(600));

        token.cancel();
        task.await.expect("gate task");
    }
}
