//! The payment executor seam.
//!
//! The engine never moves money itself. Each tick hands a
//! [`PaymentRequest`] to an injected [`PaymentExecutor`] and records
//! whatever it reports.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ExecutorError;
use crate::stream::StreamId;

/// What the executor is asked to pay for one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub stream_id: StreamId,
    pub tick: u64,
    pub amount: Decimal,
    pub fee: Decimal,
    pub recipient: String,
}

impl PaymentRequest {
    pub fn total_debit(&self) -> Decimal {
        self.amount.saturating_add(self.fee)
    }
}

/// Proof of a successful payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub reference: String,
}

impl Receipt {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
        }
    }
}

/// Moves funds for a single tick.
///
/// Implementations may take arbitrarily long; the scheduler makes sure two
/// ticks of the same stream never overlap. Returning an error never throws
/// anything at the caller who started the stream.
#[async_trait]
pub trait PaymentExecutor: Send + Sync + 'static {
    async fn execute(&self, request: PaymentRequest) -> Result<Receipt, ExecutorError>;
}

#[async_trait]
impl<T: PaymentExecutor + ?Sized> PaymentExecutor for Arc<T> {
    async fn execute(&self, request: PaymentRequest) -> Result<Receipt, ExecutorError> {
        (**self).execute(request).await
    }
}
