//! Derived metrics.
//!
//! Nothing here is cached or stored: every call reads the scheduler's
//! current snapshots and computes from them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::Result;
use crate::scheduler::StreamScheduler;
use crate::stream::{Stream, StreamId, StreamState};

/// Metrics for one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStats {
    pub stream_id: StreamId,
    pub state: StreamState,
    pub runtime_seconds: u64,
    pub total_sent: Decimal,
    pub expected_ticks: u64,
    /// `success_count / max(expected_ticks, 1) * 100`
    pub success_rate: f64,
}

impl StreamStats {
    /// Compute stats for `stream` as of `now`.
    pub fn compute(stream: &Stream, now: Instant) -> Self {
        let runtime_seconds = stream.runtime(now).as_secs();
        let expected_ticks = runtime_seconds / stream.interval_seconds.max(1);
        let success_rate = stream.success_count as f64 / expected_ticks.max(1) as f64 * 100.0;

        Self {
            stream_id: stream.id,
            state: stream.state,
            runtime_seconds,
            total_sent: stream.total_sent,
            expected_ticks,
            success_rate,
        }
    }
}

/// Metrics across every stream of a scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_streams: usize,
    pub active_streams: usize,
    pub total_sent: Decimal,
    pub total_fees: Decimal,
    pub total_ticks: u64,
    pub total_successes: u64,
    /// `total_successes / max(total_ticks, 1) * 100`
    pub success_rate: f64,
}

impl GlobalStats {
    pub fn compute<'a>(streams: impl IntoIterator<Item = &'a Stream>) -> Self {
        let mut stats = GlobalStats {
            total_streams: 0,
            active_streams: 0,
            total_sent: Decimal::ZERO,
            total_fees: Decimal::ZERO,
            total_ticks: 0,
            total_successes: 0,
            success_rate: 0.0,
        };
        for stream in streams {
            stats.total_streams += 1;
            if stream.is_active() {
                stats.active_streams += 1;
            }
            stats.total_sent += stream.total_sent;
            stats.total_fees += stream.total_fees;
            stats.total_ticks += stream.tick_count;
            stats.total_successes += stream.success_count;
        }
        stats.success_rate =
            stats.total_successes as f64 / stats.total_ticks.max(1) as f64 * 100.0;
        stats
    }
}

/// Read-only view over a scheduler's streams.
#[derive(Clone)]
pub struct StatsAggregator {
    scheduler: StreamScheduler,
}

impl StatsAggregator {
    pub fn new(scheduler: StreamScheduler) -> Self {
        Self { scheduler }
    }

    pub fn stream_stats(&self, id: StreamId) -> Result<StreamStats> {
        let stream = self.scheduler.get_stream(id)?;
        Ok(StreamStats::compute(&stream, Instant::now()))
    }

    /// Stats for every active stream.
    pub fn active_stream_stats(&self) -> Vec<StreamStats> {
        let now = Instant::now();
        self.scheduler
            .list_active_streams()
            .iter()
            .map(|s| StreamStats::compute(s, now))
            .collect()
    }

    pub fn global(&self) -> GlobalStats {
        GlobalStats::compute(&self.scheduler.list_streams())
    }
}
