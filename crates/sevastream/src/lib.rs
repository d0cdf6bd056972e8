//! # SevaStream
//!
//! A recurring payment stream engine: one donor action ("donate ₹X every N
//! seconds to cause Y") becomes a supervised, cancellable, fee-accounted
//! series of payment ticks, fanned out live to every observer.
//!
//! ## Core Concepts
//!
//! - [`Stream`] = the commitment (amount, interval, recipient, totals)
//! - [`StreamScheduler`] = the only authority that starts, ticks and stops streams
//! - [`PaymentExecutor`] = the injected capability that actually moves funds
//! - [`EventBroadcaster`] = per-subscriber queues carrying [`StreamEvent`]s
//! - [`StatsAggregator`] = read-only metrics derived on demand
//!
//! ## Architecture
//!
//! ```text
//! start_stream()
//!     │
//!     ▼
//! StreamScheduler ──► driver task per stream
//!                          │ every interval
//!                          ▼
//!                     FeePolicy.fee()
//!                          │
//!                          ▼
//!                  PaymentExecutor.execute() ── Receipt / ExecutorError
//!                          │
//!                          ▼
//!                  update Stream ──► StreamStore (write-behind)
//!                          │
//!                          ▼
//!                  EventBroadcaster.publish()
//!                     │        │        │
//!                     ▼        ▼        ▼
//!                 dashboard analytics  donors
//! ```
//!
//! ## Key Invariants
//!
//! 1. **`success_count <= tick_count`** for every stream, always
//! 2. **`total_sent == amount * success_count`** (no partial payments)
//! 3. **Terminal is final** - once a stream leaves `Active`, no tick runs
//! 4. **Stop is race-free** - it waits for an in-flight tick, never overlaps one
//! 5. **Failures are data** - a failed payment is an event, never an error
//!    raised to callers, and never affects other streams
//!
//! ## Guarantees
//!
//! - **Per-stream FIFO**: each subscriber sees one stream's events in tick order
//! - **At-least-once at subscribe**: an event racing with a subscribe may
//!   appear in both the snapshot and the feed
//! - **No backpressure**: a full subscriber queue drops that subscriber only
//!
//! ## Example
//!
//! ```ignore
//! use sevastream_core::{
//!     async_trait, ExecutorError, PaymentExecutor, PaymentRequest, Receipt, SchedulerBuilder,
//! };
//! use rust_decimal::Decimal;
//!
//! struct Wallet;
//!
//! #[async_trait]
//! impl PaymentExecutor for Wallet {
//!     async fn execute(&self, req: PaymentRequest) -> Result<Receipt, ExecutorError> {
//!         // talk to the wallet provider
//!         Ok(Receipt::new(format!("tx-{}", req.tick)))
//!     }
//! }
//!
//! let scheduler = SchedulerBuilder::new(Wallet).build();
//! let mut feed = scheduler.subscribe();
//!
//! let id = scheduler.start_stream(Decimal::from(8), 10, "cause-1")?;
//! while let Some(event) = feed.recv().await {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//!
//! scheduler.stop_stream(id).await?;
//! ```

// Core modules
mod broadcast;
mod config;
mod error;
mod event;
mod executor;
mod fee;
mod scheduler;
mod stats;
mod store;
mod stream;


// Re-export data model
pub use stream::{Stream, StreamId, StreamRequest, StreamState, MAX_INTERVAL_SECS};

// Re-export fee policy
pub use fee::{FeePolicy, FEE_SCALE};

// Re-export error types
pub use error::{ExecutorError, FailureKind, Result, StreamError};

// Re-export executor types
pub use executor::{PaymentExecutor, PaymentRequest, Receipt};

// Re-export event types
pub use event::{ActiveSummary, Outcome, PaymentEvent, StreamEvent};

// Re-export broadcaster types
pub use broadcast::{EventBroadcaster, SubscriberId, Subscription, DEFAULT_SUBSCRIBER_BUFFER};

// Re-export scheduler types (primary entry point)
pub use scheduler::{SchedulerBuilder, StreamScheduler};

// Re-export stats types
pub use stats::{GlobalStats, StatsAggregator, StreamStats};

// Re-export store types
pub use store::StreamStore;

// Re-export configuration
pub use config::{EngineConfig, DEFAULT_INTERVAL_SECS};

// Re-export commonly used external types
pub use async_trait::async_trait;
