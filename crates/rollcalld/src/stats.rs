//! Recognition counters with a daily reset.

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct Stats {
    frames_processed: AtomicU64,
    total_faces: AtomicU64,
    recognized: AtomicU64,
    unknown: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub frames_processed: u64,
    pub total_faces: u64,
    pub recognized: u64,
    pub unknown: u64,
}

impl Stats {
    pub fn record_frame(&self, faces: usize) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        self.total_faces.fetch_add(faces as u64, Ordering::Relaxed);
    }

    pub fn record_recognized(&self) {
        self.recognized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown(&self) {
        self.unknown.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            total_faces: self.total_faces.load(Ordering::Relaxed),
            recognized: self.recognized.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.frames_processed.store(0, Ordering::Relaxed);
        self.total_faces.store(0, Ordering::Relaxed);
        self.recognized.store(0, Ordering::Relaxed);
        self.unknown.store(0, Ordering::Relaxed);
    }
}

/// Time from `now` until the next `at` wall-clock time in `offset`.
pub fn until_next_reset(now: DateTime<Utc>, offset: FixedOffset, at: NaiveTime) -> Duration {
    let local = now.with_timezone(&offset);
    let today = local.date_naive().and_time(at);
    let mut next = today;
    if next <= local.naive_local() {
        next += ChronoDuration::days(1);
    }
    (next - local.naive_local()).to_std().unwrap_or(Duration::ZERO)
}

/// Zero the counters every day at `at` in the reporting time zone.
pub fn spawn_daily_reset(stats: Arc<Stats>, offset: FixedOffset, at: NaiveTime) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let wait = until_next_reset(Utc::now(), offset, at);
            tracing::debug!(secs = wait.as_secs(), "next stats reset scheduled");
            tokio::time::sleep(wait).await;
            let before = stats.snapshot();
            stats.reset();
            tracing::info!(
                recognized = before.recognized,
                unknown = before.unknown,
                total_faces = before.total_faces,
                "daily stats reset"
            );
        }
    })
}
