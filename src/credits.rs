// SPDX-License-Identifier: AGPL-3.0-or-later

//! # Credit Processor
//!
//! Applies verified payment events and admin adjustments to the ledger.
//! Payment events carry a provider order id which becomes the idempotency
//! key, so webhook retries and duplicate deliveries credit exactly once.
//!
//! All money math is integer-only. The exchange rate is a ratio of whole
//! numbers and conversion floors, so a fractional remainder can never
//! round up into extra credits.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::ledger::{AppendOutcome, EntrySource, Ledger, LedgerError, LedgerResult};

/// A verified inbound payment event.
///
/// Provider signature verification happens upstream; by the time an event
/// reaches the processor it is trusted.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PaymentEvent {
    /// Payment provider identifier, e.g. `lemonsqueezy` or `alipay`.
    pub provider: String,
    /// The provider's stable order/event id. Stable across retries.
    pub external_order_id: String,
    /// Principal to credit.
    pub user_id: String,
    /// Paid amount in minor currency units (cents).
    pub amount_minor_units: u64,
    /// ISO currency code; informational only.
    pub currency: String,
}

impl PaymentEvent {
    /// The dedup token for this event: provider + order id, never the
    /// amount (amounts legitimately repeat).
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.provider, self.external_order_id)
    }
}

/// Integer exchange rate: `credits` granted per `per_minor_units` paid.
///
/// A 1:2 rate (half a credit per cent) is `CreditRate::new(1, 2)`.
#[derive(Debug, Clone, Copy)]
pub struct CreditRate {
    credits: u64,
    per_minor_units: u64,
}

impl CreditRate {
    pub fn new(credits: u64, per_minor_units: u64) -> Result<Self, LedgerError> {
        if credits == 0 || per_minor_units == 0 {
            return Err(LedgerError::InvalidInput(
                "credit rate terms must be positive".into(),
            ));
        }
        Ok(Self {
            credits,
            per_minor_units,
        })
    }

    /// Credits granted for `amount_minor_units`, floored. Never rounds up.
    pub fn credits_for(&self, amount_minor_units: u64) -> i64 {
        let credits =
            (amount_minor_units as u128 * self.credits as u128) / self.per_minor_units as u128;
        credits.min(i64::MAX as u128) as i64
    }
}

/// Result of applying a payment event.
#[derive(Debug, Clone)]
pub struct PaymentOutcome {
    /// Balance after (or already reflecting) the credit.
    pub balance: i64,
    /// Credits granted by this event.
    pub credited: i64,
    /// Ledger entry id recording the credit.
    pub entry_id: u64,
    /// True when the event had already been applied; nothing changed.
    pub was_duplicate: bool,
}

/// Result of an admin adjustment.
#[derive(Debug, Clone)]
pub struct AdjustmentOutcome {
    pub balance: i64,
    pub entry_id: u64,
    pub created_at: DateTime<Utc>,
    pub was_duplicate: bool,
}

/// Applies payment and adjustment events to the [`Ledger`].
pub struct CreditProcessor {
    ledger: Ledger,
    rate: CreditRate,
}

impl CreditProcessor {
    pub fn new(ledger: Ledger, rate: CreditRate) -> Self {
        Self { ledger, rate }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Apply a verified payment event, crediting the user at most once.
    ///
    /// Replayed events succeed with `was_duplicate = true` so webhook
    /// handlers can always acknowledge the provider.
    pub fn apply_payment(&self, event: &PaymentEvent) -> LedgerResult<PaymentOutcome> {
        if event.provider.is_empty() || event.external_order_id.is_empty() {
            return Err(LedgerError::InvalidInput(
                "payment event requires provider and external_order_id".into(),
            ));
        }
        if event.amount_minor_units == 0 {
            return Err(LedgerError::InvalidInput(
                "payment amount must be positive".into(),
            ));
        }

        let credits = self.rate.credits_for(event.amount_minor_units);
        let idempotency_key = event.idempotency_key();

        let outcome = self.ledger.append(
            &event.user_id,
            credits,
            &format!("payment:{}", event.provider),
            EntrySource::Webhook,
            Some(&idempotency_key),
        )?;

        if outcome.was_duplicate {
            tracing::info!(
                user_id = %event.user_id,
                idempotency_key = %idempotency_key,
                "duplicate payment event ignored"
            );
        } else {
            tracing::info!(
                user_id = %event.user_id,
                provider = %event.provider,
                amount_minor_units = event.amount_minor_units,
                credited = credits,
                balance = outcome.balance,
                "payment credited"
            );
        }

        Ok(PaymentOutcome {
            balance: outcome.balance,
            credited: outcome.entry.delta,
            entry_id: outcome.entry.id,
            was_duplicate: outcome.was_duplicate,
        })
    }

    /// Apply a manual admin adjustment.
    ///
    /// Bypasses the exchange rate; `delta` is credited/debited verbatim.
    /// Idempotency is optional here — admin calls are assumed to be
    /// deduplicated by the operator. The acting admin is logged, and the
    /// privileged capability check happens upstream.
    pub fn apply_adjustment(
        &self,
        user_id: &str,
        delta: i64,
        reason: &str,
        actor: &str,
        idempotency_key: Option<&str>,
    ) -> LedgerResult<AdjustmentOutcome> {
        if delta == 0 {
            return Err(LedgerError::InvalidInput("delta must be non-zero".into()));
        }

        let outcome: AppendOutcome =
            self.ledger
                .append(user_id, delta, reason, EntrySource::Admin, idempotency_key)?;

        tracing::info!(
            user_id,
            delta,
            actor,
            reason,
            balance = outcome.balance,
            was_duplicate = outcome.was_duplicate,
            "admin credit adjustment"
        );

        Ok(AdjustmentOutcome {
            balance: outcome.balance,
            entry_id: outcome.entry.id,
            created_at: outcome.entry.created_at,
            was_duplicate: outcome.was_duplicate,
        })
    }
}
