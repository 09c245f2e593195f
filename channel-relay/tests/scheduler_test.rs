mod common;

use channel_relay::scheduler::{every, spread_offsets, until_daily_boundary};
use chrono::{TimeZone, Utc};
use common::init_tracing;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[test]
fn test_spread_offsets_cover_window_evenly() {
    let offsets = spread_offsets(4, Duration::from_secs(600));
    assert_eq!(
        offsets,
        vec![
            Duration::ZERO,
            Duration::from_secs(150),
            Duration::from_secs(300),
            Duration::from_secs(450),
        ]
    );

    assert!(spread_offsets(0, Duration::from_secs(600)).is_empty());
    assert_eq!(spread_offsets(3, Duration::ZERO), vec![Duration::ZERO; 3]);
}

#[test]
fn test_daily_boundary() {
    let evening = Utc.with_ymd_and_hms(2026, 3, 14, 22, 30, 0).unwrap();
    assert_eq!(until_daily_boundary(evening, 0), Duration::from_secs(90 * 60));

    let morning = Utc.with_ymd_and_hms(2026, 3, 14, 5, 0, 0).unwrap();
    assert_eq!(until_daily_boundary(morning, 6), Duration::from_secs(60 * 60));

    // Exactly on the boundary waits for tomorrow's
    let midnight = Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap();
    assert_eq!(until_daily_boundary(midnight, 0), Duration::from_secs(24 * 60 * 60));
}

#[tokio::test(start_paused = true)]
async fn test_slow_job_skips_missed_ticks() {
    init_tracing();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();

    let handle = tokio::spawn(async move {
        every("slow", Instant::now(), Duration::from_secs(10), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(25)).await;
            }
        })
        .await
    });

    // Runs start at 0s, 25s and 50s; ticks that fall inside a run are dropped
    tokio::time::sleep(Duration::from_secs(61)).await;
    handle.abort();

    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_jobs_run_on_period() {
    init_tracing();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();

    let start = Instant::now() + Duration::from_secs(5);
    let handle = tokio::spawn(async move {
        every("fast", start, Duration::from_secs(10), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await
    });

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_secs(32)).await;
    handle.abort();

    // 5s, 15s, 25s, 35s
    assert_eq!(runs.load(Ordering::SeqCst), 4);
}
