//! Events published by the scheduler.
//!
//! Events are facts: they describe what already happened to a stream and
//! carry everything an observer needs, so nothing downstream has to call
//! back into the scheduler.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::stream::{Stream, StreamId};

/// Result of one tick's payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

/// One tick of one stream. Produced once per tick, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub stream_id: StreamId,
    /// 1-based attempt number within the stream.
    pub tick: u64,
    pub amount: Decimal,
    pub fee: Decimal,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PaymentEvent {
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// Aggregate view over the streams that are currently active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveSummary {
    pub active_count: usize,
    /// Sum of per-tick amounts across active streams.
    pub aggregate_rate_per_interval: Decimal,
    /// Sum of `amount / interval_seconds` across active streams.
    pub rate_per_second: Decimal,
    pub generated_at: DateTime<Utc>,
}

impl ActiveSummary {
    pub fn from_streams<'a>(streams: impl IntoIterator<Item = &'a Stream>) -> Self {
        let mut summary = ActiveSummary {
            active_count: 0,
            aggregate_rate_per_interval: Decimal::ZERO,
            rate_per_second: Decimal::ZERO,
            generated_at: Utc::now(),
        };
        for stream in streams.into_iter().filter(|s| s.is_active()) {
            summary.active_count += 1;
            summary.aggregate_rate_per_interval += stream.amount;
            summary.rate_per_second += stream.amount / Decimal::from(stream.interval_seconds);
        }
        summary
    }
}

/// Everything that flows through the broadcaster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Started(Stream),
    Payment(PaymentEvent),
    Stopped(Stream),
    Completed(Stream),
    Failed(Stream),
    Summary(ActiveSummary),
}

impl StreamEvent {
    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Started(_) => "started",
            Self::Payment(_) => "payment",
            Self::Stopped(_) => "stopped",
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
            Self::Summary(_) => "summary",
        }
    }

    /// The stream this event belongs to, if any.
    pub fn stream_id(&self) -> Option<StreamId> {
        match self {
            Self::Started(s) | Self::Stopped(s) | Self::Completed(s) | Self::Failed(s) => {
                Some(s.id)
            }
            Self::Payment(p) => Some(p.stream_id),
            Self::Summary(_) => None,
        }
    }

    pub fn as_payment(&self) -> Option<&PaymentEvent> {
        match self {
            Self::Payment(p) => Some(p),
            _ => None,
        }
    }

    /// True for the last event a stream will ever produce.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Stopped(_) | Self::Completed(_) | Self::Failed(_)
        )
    }
}
