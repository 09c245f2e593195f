use chrono::{DateTime, Days, NaiveTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Start offsets that spread `channel_count` polls evenly over `window`.
///
/// Channel `i` of `n` starts at `window * i / n`, so the first poll starts
/// immediately and the last one starts one slot before the window closes.
pub fn spread_offsets(channel_count: usize, window: Duration) -> Vec<Duration> {
    if channel_count == 0 {
        return Vec::new();
    }
    let total = window.as_nanos();
    (0..channel_count)
        .map(|i| {
            let nanos = total * i as u128 / channel_count as u128;
            Duration::from_nanos(nanos as u64)
        })
        .collect()
}

/// Time from `now` until the next `hour:00` UTC. An instant exactly on the
/// boundary waits a full day.
pub fn until_daily_boundary(now: DateTime<Utc>, hour: u32) -> Duration {
    let time = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or_default();
    let today = now.date_naive().and_time(time).and_utc();
    let next = if today > now {
        today
    } else {
        today.checked_add_days(Days::new(1)).unwrap_or(today)
    };
    (next - now).to_std().unwrap_or(DAY)
}

/// Run `job` every `period`, first at `start`.
///
/// Ticks that pass while a job is still running are skipped rather than
/// queued, and a job never overlaps its own previous run.
pub async fn every<F, Fut>(name: &'static str, start: Instant, period: Duration, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        debug!("{} tick", name);
        job().await;
    }
}

/// Run `job` once a day at `hour:00` UTC.
pub async fn daily<F, Fut>(name: &'static str, hour: u32, job: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let start = Instant::now() + until_daily_boundary(Utc::now(), hour);
    every(name, start, DAY, job).await
}
