// SPDX-License-Identifier: AGPL-3.0-or-later

//! # API Data Models
//!
//! Request and response data structures used by the REST API. All types
//! derive `Serialize`/`Deserialize` and `ToSchema` for automatic JSON
//! handling and OpenAPI documentation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::ledger::LedgerEntry;

// =============================================================================
// Key Issuance
// =============================================================================

/// Request to issue a new API key (admin only).
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct IssueKeyRequest {
    /// Principal the key will act for.
    pub owner_id: String,
    /// Requests allowed per counting window. Must be positive.
    pub max_requests_per_window: u32,
}

/// A freshly issued API key.
///
/// The plaintext key appears here exactly once; persist it immediately,
/// it cannot be retrieved again.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IssuedKeyResponse {
    /// The plaintext API key.
    pub api_key: String,
    /// Principal the key acts for.
    pub owner_id: String,
    /// Requests allowed per counting window.
    pub max_requests_per_window: u32,
    /// End of the first counting window.
    pub window_end: DateTime<Utc>,
}

// =============================================================================
// Payments & Adjustments
// =============================================================================

/// Response to a payment webhook delivery.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentWebhookResponse {
    /// Balance after (or already reflecting) the credit.
    pub balance: i64,
    /// Credits granted by this event.
    pub credited: i64,
    /// Ledger entry recording the credit.
    pub entry_id: u64,
    /// True when this delivery was a replay and nothing changed.
    pub was_duplicate: bool,
}

/// Manual credit adjustment (admin only).
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AdjustmentRequest {
    /// Principal whose balance changes.
    pub user_id: String,
    /// Signed credit delta. Must be non-zero.
    pub delta: i64,
    /// Free-form reason recorded on the ledger entry.
    pub reason: String,
    /// Optional dedup token for scripted adjustments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Result of an admin adjustment.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AdjustmentResponse {
    pub balance: i64,
    pub entry_id: u64,
    pub created_at: DateTime<Utc>,
    pub was_duplicate: bool,
}

// =============================================================================
// Balance & Ledger Inspection
// =============================================================================

/// A user's current credit balance.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BalanceResponse {
    pub user_id: String,
    pub balance: i64,
}

/// One page of a user's ledger entries, newest first.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LedgerPageResponse {
    pub user_id: String,
    pub entries: Vec<LedgerEntry>,
    /// Opaque cursor for the next page; absent when exhausted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

// =============================================================================
// Generation
// =============================================================================

/// Request to start an image generation job.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct GenerateRequest {
    /// Prompt forwarded to the generation backend.
    pub prompt: String,
}

/// An accepted generation job.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GenerateResponse {
    /// Job identifier for the generation backend.
    pub job_id: String,
    /// Balance after the generation debit.
    pub balance: i64,
    /// Remaining admission quota in the tightest window.
    pub remaining: u32,
}
