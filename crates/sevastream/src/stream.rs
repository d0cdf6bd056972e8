//! The stream data model.
//!
//! A [`Stream`] is one recurring donation commitment. Only the scheduler
//! mutates streams; everything handed out to callers is a cloned snapshot.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::{Result, StreamError};

/// Longest accepted tick interval: 366 days.
pub const MAX_INTERVAL_SECS: u64 = 366 * 24 * 60 * 60;

/// Opaque, never-reused stream identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(Uuid);

impl StreamId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for StreamId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state. Everything except `Active` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Active,
    Stopped,
    Completed,
    Failed,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, StreamState::Active)
    }
}

/// Parameters for starting a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub amount: Decimal,
    pub interval_seconds: u64,
    pub recipient: String,
    /// Bounded streams complete once `total_sent` reaches this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_total: Option<Decimal>,
}

impl StreamRequest {
    pub fn new(amount: Decimal, interval_seconds: u64, recipient: impl Into<String>) -> Self {
        Self {
            amount,
            interval_seconds,
            recipient: recipient.into(),
            target_total: None,
        }
    }

    pub fn with_target_total(mut self, target: Decimal) -> Self {
        self.target_total = Some(target);
        self
    }

    /// Reject anything that must never become a stream.
    pub fn validate(&self) -> Result<()> {
        if self.amount <= Decimal::ZERO {
            return Err(StreamError::invalid(format!(
                "amount must be positive, got {}",
                self.amount
            )));
        }
        if self.interval_seconds == 0 {
            return Err(StreamError::invalid("interval_seconds must be positive"));
        }
        if self.interval_seconds > MAX_INTERVAL_SECS {
            return Err(StreamError::invalid(format!(
                "interval_seconds must be at most {MAX_INTERVAL_SECS}, got {}",
                self.interval_seconds
            )));
        }
        if self.recipient.trim().is_empty() {
            return Err(StreamError::invalid("recipient must not be empty"));
        }
        if let Some(target) = self.target_total {
            if target < self.amount {
                return Err(StreamError::invalid(format!(
                    "target_total {target} is smaller than one tick of {}",
                    self.amount
                )));
            }
        }
        Ok(())
    }
}

/// One recurring donation commitment.
///
/// Invariants held by every snapshot:
/// - `success_count <= tick_count`
/// - `total_sent == amount * success_count`
/// - once `state` is terminal no counter changes again
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub id: StreamId,
    pub amount: Decimal,
    pub interval_seconds: u64,
    pub recipient: String,
    pub state: StreamState,
    pub total_sent: Decimal,
    pub total_fees: Decimal,
    pub tick_count: u64,
    pub success_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_total: Option<Decimal>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_tick_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    // Monotonic clock marks for runtime arithmetic.
    #[serde(skip, default = "Instant::now")]
    pub(crate) started: Instant,
    #[serde(skip)]
    pub(crate) ended: Option<Instant>,
}

/// Running totals computed ahead of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Totals {
    pub(crate) sent: Decimal,
    pub(crate) fees: Decimal,
}

impl Stream {
    pub(crate) fn from_request(request: StreamRequest) -> Self {
        Self {
            id: StreamId::new(),
            amount: request.amount,
            interval_seconds: request.interval_seconds,
            recipient: request.recipient,
            state: StreamState::Active,
            total_sent: Decimal::ZERO,
            total_fees: Decimal::ZERO,
            tick_count: 0,
            success_count: 0,
            target_total: request.target_total,
            started_at: Utc::now(),
            last_tick_at: None,
            last_error: None,
            ended_at: None,
            started: Instant::now(),
            ended: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == StreamState::Active
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    /// Time the stream has been (or was) running, frozen once terminal.
    pub fn runtime(&self, now: Instant) -> Duration {
        self.ended
            .unwrap_or(now)
            .saturating_duration_since(self.started)
    }

    /// Whether a bounded stream has reached its target.
    pub fn target_reached(&self) -> bool {
        self.target_total
            .is_some_and(|target| self.total_sent >= target)
    }

    /// Totals after one more successful tick charging `fee`, or `None` if
    /// the debit or either running total would overflow.
    pub(crate) fn next_totals(&self, fee: Decimal) -> Option<Totals> {
        self.amount.checked_add(fee)?;
        Some(Totals {
            sent: self.total_sent.checked_add(self.amount)?,
            fees: self.total_fees.checked_add(fee)?,
        })
    }

    pub(crate) fn record_success(&mut self, totals: Totals, at: DateTime<Utc>) {
        debug_assert!(self.is_active());
        self.tick_count += 1;
        self.success_count += 1;
        self.total_sent = totals.sent;
        self.total_fees = totals.fees;
        self.last_tick_at = Some(at);
    }

    pub(crate) fn record_failure(&mut self, error: &str, at: DateTime<Utc>) {
        debug_assert!(self.is_active());
        self.tick_count += 1;
        self.last_error = Some(error.to_string());
        self.last_tick_at = Some(at);
    }

    /// Move to a terminal state. Returns false if already terminal.
    pub(crate) fn finish(&mut self, state: StreamState) -> bool {
        debug_assert!(state.is_terminal());
        if self.state.is_terminal() {
            return false;
        }
        self.state = state;
        self.ended_at = Some(Utc::now());
        self.ended = Some(Instant::now());
        true
    }
}
