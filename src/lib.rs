// SPDX-License-Identifier: AGPL-3.0-or-later

//! Credit Gate - Access Control & Credit Accounting Service
//!
//! This crate gates a paid generation API behind three layers: opaque API
//! keys with per-key windowed quotas, IP- and user-scoped rate limits with
//! block escalation, and an append-only credit ledger fed by payment
//! webhooks and admin adjustments.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `gate` - Single admission decision combining keys and rate limits
//! - `keys` - API key derivation, storage, and quota windows
//! - `ratelimit` - Fixed-window limiter with burst caps and blocks
//! - `ledger` - Append-only entries, idempotency, materialized balances
//! - `credits` - Payment and adjustment application

pub mod api;
pub mod auth;
pub mod config;
pub mod credits;
pub mod error;
pub mod gate;
pub mod keys;
pub mod ledger;
pub mod models;
pub mod ratelimit;
pub mod shards;
pub mod state;
