//! Invoice number generation.
//!
//! Numbers look like `INV-202610-0001`: a prefix, the year-month of the
//! invoice date, and a zero-padded per-period sequence. Sequence values come
//! from an [`InvoiceSequence`], which must hand out each value at most once
//! even under concurrent callers. The store that persists the invoice still
//! enforces uniqueness; [`InvoiceNumberGenerator::claim`] retries with a fresh
//! value when the store reports the number as taken.

use crate::error::InvoicingError;
use crate::services::metrics::{NUMBER_CONFLICTS_TOTAL, NUMBER_FAILURES_TOTAL};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use dashmap::DashMap;
use service_core::error::AppError;
use std::future::Future;
use tracing::{info, warn};

/// Source of per-period sequence values.
#[async_trait]
pub trait InvoiceSequence: Send + Sync {
    /// Atomically advance the sequence for `period` and return the new value.
    /// The first value of a period is 1. A sequence that cannot advance
    /// reports `NumberGenerationFailed`.
    async fn next_value(&self, period: &str) -> Result<u32, InvoicingError>;
}

/// Process-local sequence. Values are unique within one process only.
#[derive(Debug, Default)]
pub struct InMemoryInvoiceSequence {
    counters: DashMap<String, u32>,
}

impl InMemoryInvoiceSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `period` after `last_value`, e.g. when seeding from existing data.
    pub fn seed(&self, period: &str, last_value: u32) {
        self.counters.insert(period.to_string(), last_value);
    }
}

#[async_trait]
impl InvoiceSequence for InMemoryInvoiceSequence {
    async fn next_value(&self, period: &str) -> Result<u32, InvoicingError> {
        // The entry guard holds the shard lock across read and write.
        let mut counter = self.counters.entry(period.to_string()).or_insert(0);
        *counter = counter
            .checked_add(1)
            .ok_or_else(|| InvoicingError::NumberGenerationFailed {
                period: period.to_string(),
                reason: "sequence overflow".to_string(),
            })?;
        Ok(*counter)
    }
}

/// Format policy for invoice numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberingPolicy {
    pub prefix: String,
    /// Digits of the zero-padded sequence. Also bounds the sequence.
    pub width: u32,
    /// Attempts before giving up on a colliding number.
    pub max_attempts: u32,
}

impl Default for NumberingPolicy {
    fn default() -> Self {
        Self {
            prefix: "INV".to_string(),
            width: 4,
            max_attempts: 5,
        }
    }
}

impl NumberingPolicy {
    /// Largest sequence value that fits in `width` digits.
    pub fn max_sequence(&self) -> u32 {
        10u32
            .checked_pow(self.width)
            .map(|limit| limit - 1)
            .unwrap_or(u32::MAX)
    }

    pub fn format(&self, period: &str, sequence: u32) -> String {
        format!(
            "{}-{}-{:0width$}",
            self.prefix,
            period,
            sequence,
            width = self.width as usize
        )
    }
}

/// Period key (`YYYYMM`) a date's invoice numbers are sequenced under.
pub fn period_of(date: NaiveDate) -> String {
    format!("{:04}{:02}", date.year(), date.month())
}

/// Outcome of a single attempt to persist under a claimed number.
#[derive(Debug)]
pub enum ClaimError {
    /// The number is already used; try the next one.
    Taken,
    /// Any other failure; abort without retrying.
    Failed(AppError),
}

impl From<AppError> for ClaimError {
    fn from(err: AppError) -> Self {
        ClaimError::Failed(err)
    }
}

/// Produces unique invoice numbers from a sequence and a policy.
pub struct InvoiceNumberGenerator<S> {
    sequence: S,
    policy: NumberingPolicy,
}

impl<S: InvoiceSequence> InvoiceNumberGenerator<S> {
    pub fn new(sequence: S, policy: NumberingPolicy) -> Self {
        Self { sequence, policy }
    }

    pub fn policy(&self) -> &NumberingPolicy {
        &self.policy
    }

    pub fn sequence(&self) -> &S {
        &self.sequence
    }

    /// Next number for the current month.
    pub async fn generate_invoice_number(&self) -> Result<String, InvoicingError> {
        self.generate(Utc::now().date_naive()).await
    }

    /// Next number for the month of `date`.
    pub async fn generate(&self, date: NaiveDate) -> Result<String, InvoicingError> {
        let period = period_of(date);
        let value = self.sequence.next_value(&period).await?;

        if value == 0 || value > self.policy.max_sequence() {
            NUMBER_FAILURES_TOTAL
                .with_label_values(&["exhausted"])
                .inc();
            warn!(period = %period, value, "Invoice number sequence exhausted");
            return Err(InvoicingError::NumberGenerationFailed {
                reason: format!(
                    "sequence exhausted (limit {})",
                    self.policy.max_sequence()
                ),
                period,
            });
        }

        Ok(self.policy.format(&period, value))
    }

    /// Generate a number for `date` and hand it to `persist`, retrying with a
    /// fresh number while `persist` reports it as taken.
    ///
    /// Gives up with `NumberGenerationFailed` after `max_attempts`; any other
    /// error from `persist` is returned immediately.
    pub async fn claim<F, Fut, T>(&self, date: NaiveDate, mut persist: F) -> Result<T, InvoicingError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, ClaimError>>,
    {
        let attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=attempts {
            let number = self.generate(date).await?;

            match persist(number.clone()).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            invoice_number = %number,
                            attempt,
                            "Invoice number claimed after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(ClaimError::Taken) => {
                    NUMBER_CONFLICTS_TOTAL.inc();
                    warn!(
                        invoice_number = %number,
                        attempt,
                        max_attempts = attempts,
                        "Invoice number already taken, retrying"
                    );
                }
                Err(ClaimError::Failed(err)) => return Err(err.into()),
            }
        }

        NUMBER_FAILURES_TOTAL
            .with_label_values(&["conflict"])
            .inc();
        Err(InvoicingError::NumberGenerationFailed {
            period: period_of(date),
            reason: format!("number still taken after {} attempts", attempts),
        })
    }
}
