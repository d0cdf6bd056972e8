//! The stream scheduler.
//!
//! The scheduler is the only authority that creates, ticks and stops
//! streams. Each active stream is driven by its own task; a per-stream
//! async gate serializes that task's ticks against `stop_stream`, so a stop
//! either waits for an in-flight tick to finish or is observed before the
//! next tick calls the executor. Reads never take the gate and never wait
//! on a payment.
//!
//! ```text
//! start_stream ──► registry insert ──► Started ──► spawn driver
//!                                                    │
//!                     ┌──────────── every interval ──┘
//!                     ▼
//!               gate.lock()
//!                     │ not Active? ─► return
//!                     ▼
//!               fee ─► executor.execute().await
//!                     │
//!                     ▼
//!               update counters ─► persist ─► Payment event
//!
//! stop_stream ──► gate.lock() ─► Stopped ─► abort driver ─► Stopped event
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use rust_decimal::Decimal;
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::broadcast::{EventBroadcaster, SubscriberId, Subscription};
use crate::config::EngineConfig;
use crate::error::{ExecutorError, Result, StreamError};
use crate::event::{ActiveSummary, Outcome, PaymentEvent, StreamEvent};
use crate::executor::{PaymentExecutor, PaymentRequest, Receipt};
use crate::stats::StatsAggregator;
use crate::store::{Persister, StreamStore};
use crate::stream::{Stream, StreamId, StreamRequest, StreamState};

/// Builder for [`StreamScheduler`].
pub struct SchedulerBuilder {
    executor: Arc<dyn PaymentExecutor>,
    config: EngineConfig,
    store: Option<Arc<dyn StreamStore>>,
}

impl SchedulerBuilder {
    pub fn new(executor: impl PaymentExecutor) -> Self {
        Self {
            executor: Arc::new(executor),
            config: EngineConfig::default(),
            store: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Mirror every stream mutation into `store`.
    pub fn with_store(mut self, store: Arc<dyn StreamStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the scheduler.
    ///
    /// Must be called inside a Tokio runtime when a store or a summary
    /// interval is configured, since both spawn background tasks.
    pub fn build(self) -> StreamScheduler {
        let (shutdown, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            streams: DashMap::new(),
            controls: DashMap::new(),
            executor: self.executor,
            broadcaster: EventBroadcaster::new(self.config.subscriber_buffer),
            persister: self.store.map(Persister::spawn),
            config: self.config,
            shutdown,
        });

        let scheduler = StreamScheduler { inner };
        if let Some(period) = scheduler.inner.config.summary_interval {
            scheduler.spawn_summary_feed(period);
        }
        scheduler
    }
}

/// Owns a set of streams and drives their ticks.
///
/// Cloning is cheap and every clone controls the same streams. Independent
/// schedulers share nothing. Call [`shutdown`](Self::shutdown) to stop all
/// streams before dropping the last handle; driver tasks keep the scheduler
/// alive until then.
#[derive(Clone)]
pub struct StreamScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    streams: DashMap<StreamId, Stream>,
    controls: DashMap<StreamId, Arc<StreamControl>>,
    executor: Arc<dyn PaymentExecutor>,
    broadcaster: EventBroadcaster,
    persister: Option<Persister>,
    config: EngineConfig,
    shutdown: watch::Sender<bool>,
}

/// Per-stream synchronization.
struct StreamControl {
    /// Held for the whole of a tick and for the whole of a stop.
    gate: Mutex<()>,
    task: OnceLock<AbortHandle>,
}

impl StreamControl {
    fn new() -> Self {
        Self {
            gate: Mutex::new(()),
            task: OnceLock::new(),
        }
    }
}

impl StreamScheduler {
    pub fn builder(executor: impl PaymentExecutor) -> SchedulerBuilder {
        SchedulerBuilder::new(executor)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Start donating `amount` to `recipient` every `interval_seconds`.
    ///
    /// Returns as soon as the stream is registered; the first tick fires one
    /// interval later. Fails with [`StreamError::NoRuntime`] outside a Tokio
    /// runtime.
    pub fn start_stream(
        &self,
        amount: Decimal,
        interval_seconds: u64,
        recipient: impl Into<String>,
    ) -> Result<StreamId> {
        self.start(StreamRequest::new(amount, interval_seconds, recipient))
    }

    /// Like [`start_stream`](Self::start_stream) with the configured
    /// default interval.
    pub fn start_stream_with_default_interval(
        &self,
        amount: Decimal,
        recipient: impl Into<String>,
    ) -> Result<StreamId> {
        self.start_stream(amount, self.inner.config.default_interval_secs, recipient)
    }

    /// Start a stream from a full request (including bounded streams).
    pub fn start(&self, request: StreamRequest) -> Result<StreamId> {
        request.validate()?;
        let runtime = Handle::try_current().map_err(|_| StreamError::NoRuntime)?;

        let stream = Stream::from_request(request);
        let id = stream.id;
        let period = stream.interval();
        let control = Arc::new(StreamControl::new());

        // Nobody else can see this control yet, so the lock is free. Holding
        // it until the driver is registered keeps a concurrent stop from
        // overtaking the Started event.
        let _gate = control
            .gate
            .try_lock()
            .map_err(|_| StreamError::invalid("stream gate unexpectedly held"))?;

        self.inner.streams.insert(id, stream.clone());
        self.inner.controls.insert(id, Arc::clone(&control));

        info!(
            stream_id = %id,
            recipient = %stream.recipient,
            amount = %stream.amount,
            interval_secs = stream.interval_seconds,
            "Stream started"
        );
        self.inner.persist(&stream);
        self.inner.broadcaster.publish(&StreamEvent::Started(stream));

        let driver = runtime.spawn(Inner::drive(
            Arc::clone(&self.inner),
            id,
            Arc::clone(&control),
            period,
        ));
        let _ = control.task.set(driver.abort_handle());

        Ok(id)
    }

    /// Stop a stream.
    ///
    /// Idempotent: stopping a terminal stream is a successful no-op. When
    /// this returns, no tick of the stream is running and none will run.
    pub async fn stop_stream(&self, id: StreamId) -> Result<()> {
        let control = match self.inner.controls.get(&id) {
            Some(entry) => Arc::clone(entry.value()),
            None if self.inner.streams.contains_key(&id) => return Ok(()),
            None => return Err(StreamError::NotFound(id)),
        };

        let _gate = control.gate.lock().await;

        let stopped = {
            let mut stream = self
                .inner
                .streams
                .get_mut(&id)
                .ok_or(StreamError::NotFound(id))?;
            stream.finish(StreamState::Stopped).then(|| stream.clone())
        };

        if let Some(task) = control.task.get() {
            task.abort();
        }
        self.inner.controls.remove(&id);

        if let Some(stream) = stopped {
            info!(
                stream_id = %id,
                ticks = stream.tick_count,
                successes = stream.success_count,
                total_sent = %stream.total_sent,
                "Stream stopped"
            );
            self.inner.persist(&stream);
            self.inner.broadcaster.publish(&StreamEvent::Stopped(stream));
        }
        Ok(())
    }

    /// Snapshot of one stream, active or not.
    pub fn get_stream(&self, id: StreamId) -> Result<Stream> {
        self.inner
            .streams
            .get(&id)
            .map(|s| s.value().clone())
            .ok_or(StreamError::NotFound(id))
    }

    /// Snapshot of every active stream, oldest first.
    pub fn list_active_streams(&self) -> Vec<Stream> {
        self.collect(|s| s.is_active())
    }

    /// Snapshot of every stream this scheduler ever started, oldest first.
    pub fn list_streams(&self) -> Vec<Stream> {
        self.collect(|_| true)
    }

    fn collect(&self, filter: impl Fn(&Stream) -> bool) -> Vec<Stream> {
        let mut streams: Vec<Stream> = self
            .inner
            .streams
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        streams.sort_by_key(|s| (s.started, s.id));
        streams
    }

    /// Open a live feed. The returned snapshot holds the streams active at
    /// subscribe time; the feed carries everything published afterwards.
    pub fn subscribe(&self) -> Subscription {
        self.inner
            .broadcaster
            .subscribe_with(|| self.list_active_streams())
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.broadcaster.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.broadcaster.subscriber_count()
    }

    /// Count and aggregate rate of the active streams right now.
    pub fn summary(&self) -> ActiveSummary {
        let active = self.list_active_streams();
        ActiveSummary::from_streams(&active)
    }

    /// Publish an [`ActiveSummary`] every `period` until shutdown.
    pub fn spawn_summary_feed(&self, period: Duration) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let mut shutdown = self.inner.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                let Some(inner) = weak.upgrade() else { break };
                let scheduler = StreamScheduler { inner };
                let summary = scheduler.summary();
                scheduler
                    .inner
                    .broadcaster
                    .publish(&StreamEvent::Summary(summary));
            }
            debug!("Summary feed ended");
        })
    }

    /// Read-only metrics over this scheduler's streams.
    pub fn stats(&self) -> StatsAggregator {
        StatsAggregator::new(self.clone())
    }

    /// Stop every active stream and end background feeds.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);

        let ids: Vec<StreamId> = self.inner.controls.iter().map(|e| *e.key()).collect();
        let count = ids.len();
        for id in ids {
            if let Err(e) = self.stop_stream(id).await {
                warn!(stream_id = %id, error = %e, "Failed to stop stream during shutdown");
            }
        }
        info!(stopped = count, "Scheduler shut down");
    }
}

impl Inner {
    fn persist(&self, stream: &Stream) {
        if let Some(persister) = &self.persister {
            persister.persist(stream);
        }
    }

    /// Driver loop for one stream. Ticks are spaced from tick start; a tick
    /// that outlives the interval delays the next one instead of
    /// overlapping it.
    async fn drive(self: Arc<Self>, id: StreamId, control: Arc<StreamControl>, period: Duration) {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if !self.tick(id, &control).await {
                break;
            }
        }

        self.controls.remove(&id);
        debug!(stream_id = %id, "Stream driver exited");
    }

    /// Run one tick. Returns false once the stream is no longer active.
    async fn tick(&self, id: StreamId, control: &StreamControl) -> bool {
        let _gate = control.gate.lock().await;

        let (request, totals) = {
            let Some(stream) = self.streams.get(&id) else {
                return false;
            };
            if !stream.is_active() {
                return false;
            }
            let fee = self.config.fee_policy.checked_fee(stream.amount);
            let totals = fee.and_then(|fee| stream.next_totals(fee));
            let request = PaymentRequest {
                stream_id: id,
                tick: stream.tick_count + 1,
                amount: stream.amount,
                fee: fee.unwrap_or(Decimal::MAX),
                recipient: stream.recipient.clone(),
            };
            (request, totals)
        };

        debug!(
            stream_id = %id,
            tick = request.tick,
            amount = %request.amount,
            fee = %request.fee,
            "Executing tick"
        );
        // Nothing is sent when the stream's accounting cannot absorb the tick.
        let result = match totals {
            Some(totals) => self
                .execute(request.clone())
                .await
                .map(|receipt| (receipt, totals)),
            None => Err(ExecutorError::non_retryable("stream totals would overflow")),
        };
        let timestamp = Utc::now();

        let (snapshot, terminal) = {
            let Some(mut stream) = self.streams.get_mut(&id) else {
                return false;
            };
            let terminal = match &result {
                Ok((_, totals)) => {
                    stream.record_success(*totals, timestamp);
                    stream.target_reached().then_some(StreamState::Completed)
                }
                Err(e) => {
                    stream.record_failure(&e.message, timestamp);
                    e.is_fatal().then_some(StreamState::Failed)
                }
            };
            if let Some(state) = terminal {
                stream.finish(state);
            }
            (stream.clone(), terminal)
        };

        let event = match result {
            Ok((receipt, _)) => PaymentEvent {
                stream_id: id,
                tick: request.tick,
                amount: request.amount,
                fee: request.fee,
                outcome: Outcome::Success,
                timestamp,
                receipt: Some(receipt.reference),
                error: None,
            },
            Err(e) => {
                warn!(
                    stream_id = %id,
                    tick = request.tick,
                    recipient = %request.recipient,
                    error = %e,
                    fatal = e.is_fatal(),
                    "Payment failed"
                );
                PaymentEvent {
                    stream_id: id,
                    tick: request.tick,
                    amount: request.amount,
                    fee: request.fee,
                    outcome: Outcome::Failure,
                    timestamp,
                    receipt: None,
                    error: Some(e.message),
                }
            }
        };

        self.persist(&snapshot);
        self.broadcaster.publish(&StreamEvent::Payment(event));

        match terminal {
            None => true,
            Some(state) => {
                info!(
                    stream_id = %id,
                    state = ?state,
                    total_sent = %snapshot.total_sent,
                    "Stream ended"
                );
                let event = match state {
                    StreamState::Completed => StreamEvent::Completed(snapshot),
                    _ => StreamEvent::Failed(snapshot),
                };
                self.broadcaster.publish(&event);
                false
            }
        }
    }

    /// Call the executor, applying the configured timeout. A panicking
    /// executor is treated as an unrecoverable failure for this stream.
    async fn execute(&self, request: PaymentRequest) -> Result<Receipt, ExecutorError> {
        let call = AssertUnwindSafe(self.executor.execute(request)).catch_unwind();
        let outcome = match self.config.executor_timeout {
            Some(limit) => match time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(ExecutorError::retryable("executor timed out")),
            },
            None => call.await,
        };
        outcome.unwrap_or_else(|_| Err(ExecutorError::non_retryable("executor panicked")))
    }
}
