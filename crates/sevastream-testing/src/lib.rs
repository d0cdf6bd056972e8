//! Testing utilities for SevaStream.
//!
//! Executor doubles with scripted outcomes, a gate for holding a tick
//! in flight, and helpers for picking apart a subscription's events.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sevastream_core::{
    ExecutorError, PaymentEvent, PaymentExecutor, PaymentRequest, Receipt, StreamEvent, StreamId,
    Subscription,
};
use tokio::sync::{Notify, Semaphore};

// ============================================================================
// Scripted executor
// ============================================================================

#[derive(Debug, Clone)]
enum Script {
    Succeed,
    Fail,
    FailFatally,
    FailTicks(HashSet<u64>),
    FailRecipients(HashSet<String>),
}

/// Executor with a fixed outcome policy that records every request.
#[derive(Debug)]
pub struct MockExecutor {
    script: Script,
    requests: Mutex<Vec<PaymentRequest>>,
}

impl MockExecutor {
    fn with_script(script: Script) -> Self {
        Self {
            script,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::with_script(Script::Succeed)
    }

    /// Every call is an ordinary, retryable failure.
    pub fn failing() -> Self {
        Self::with_script(Script::Fail)
    }

    /// Every call is a non-retryable failure.
    pub fn failing_fatally() -> Self {
        Self::with_script(Script::FailFatally)
    }

    /// Fail only the listed (1-based) ticks of each stream.
    pub fn failing_on_ticks(ticks: impl IntoIterator<Item = u64>) -> Self {
        Self::with_script(Script::FailTicks(ticks.into_iter().collect()))
    }

    /// Fail every payment to the listed recipients.
    pub fn failing_for_recipients<S: Into<String>>(
        recipients: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::with_script(Script::FailRecipients(
            recipients.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn requests(&self) -> Vec<PaymentRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, id: StreamId) -> Vec<PaymentRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.stream_id == id)
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentExecutor for MockExecutor {
    async fn execute(&self, request: PaymentRequest) -> Result<Receipt, ExecutorError> {
        self.requests.lock().unwrap().push(request.clone());

        let fail = match &self.script {
            Script::Succeed => false,
            Script::Fail => true,
            Script::FailFatally => return Err(ExecutorError::non_retryable("fatal mock failure")),
            Script::FailTicks(ticks) => ticks.contains(&request.tick),
            Script::FailRecipients(recipients) => recipients.contains(&request.recipient),
        };

        if fail {
            Err(ExecutorError::retryable(format!(
                "mock declined tick {}",
                request.tick
            )))
        } else {
            Ok(Receipt::new(format!("mock-{}-{}", request.stream_id, request.tick)))
        }
    }
}

// ============================================================================
// Gated executor
// ============================================================================

/// Parks every call until the test releases it.
#[derive(Debug, Clone)]
pub struct GatedExecutor {
    entered: Arc<Notify>,
    release: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
}

impl GatedExecutor {
    pub fn new() -> Self {
        Self {
            entered: Arc::new(Notify::new()),
            release: Arc::new(Semaphore::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait until a call has started.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Let `n` parked (or future) calls complete successfully.
    pub fn release(&self, n: usize) {
        self.release.add_permits(n);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

impl Default for GatedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentExecutor for GatedExecutor {
    async fn execute(&self, request: PaymentRequest) -> Result<Receipt, ExecutorError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();

        let permit = self.release.acquire().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match permit {
            Ok(permit) => {
                permit.forget();
                Ok(Receipt::new(format!("gated-{}", request.tick)))
            }
            Err(_) => Err(ExecutorError::retryable("gate closed")),
        }
    }
}

// ============================================================================
// Event helpers
// ============================================================================

/// Accumulates events from a subscription for later inspection.
pub struct EventCollector {
    subscription: Subscription,
    events: Vec<StreamEvent>,
}

impl EventCollector {
    pub fn new(subscription: Subscription) -> Self {
        Self {
            subscription,
            events: Vec::new(),
        }
    }

    /// Pull in everything queued so far and return the full history.
    pub fn collect(&mut self) -> &[StreamEvent] {
        let fresh = self.subscription.drain();
        self.events.extend(fresh);
        &self.events
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn for_stream(&mut self, id: StreamId) -> Vec<StreamEvent> {
        self.collect()
            .iter()
            .filter(|e| e.stream_id() == Some(id))
            .cloned()
            .collect()
    }

    pub fn payments_for(&mut self, id: StreamId) -> Vec<PaymentEvent> {
        self.for_stream(id)
            .iter()
            .filter_map(|e| e.as_payment().cloned())
            .collect()
    }

    /// Tick numbers of a stream's payment events, in arrival order.
    pub fn ticks_for(&mut self, id: StreamId) -> Vec<u64> {
        self.payments_for(id).iter().map(|p| p.tick).collect()
    }

    /// Event type names of a stream's events, in arrival order.
    pub fn types_for(&mut self, id: StreamId) -> Vec<&'static str> {
        self.for_stream(id).iter().map(|e| e.event_type()).collect()
    }

    /// The collected history as JSON, the way a dashboard would receive it.
    pub fn to_json(&mut self) -> Vec<serde_json::Value> {
        self.collect()
            .iter()
            .map(|e| serde_json::to_value(e).unwrap())
            .collect()
    }
}
