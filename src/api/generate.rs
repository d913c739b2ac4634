// SPDX-License-Identifier: AGPL-3.0-or-later

//! Gated generation endpoint.
//!
//! The one route that exercises the full admission pipeline: API key from
//! `x-api-key`, source address from `X-Forwarded-For` (first hop) falling
//! back to the socket peer, then gate admission, then a credit debit.
//! The balance check is advisory; concurrent requests may briefly drive a
//! balance negative, which the ledger permits and later requests see.

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use uuid::Uuid;

use crate::{
    error::{ApiError, X_RATELIMIT_REMAINING},
    gate::{DenialReason, RequestIdentity},
    ledger::EntrySource,
    models::{GenerateRequest, GenerateResponse},
    state::AppState,
};

const API_KEY_HEADER: &str = "x-api-key";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

const GENERATION_REASON: &str = "generation";

/// Resolve the caller's identity from request headers and the peer address.
///
/// `X-Forwarded-For` wins over the socket peer so deployments behind a
/// proxy still rate-limit the real client, not the proxy.
pub fn resolve_identity(headers: &HeaderMap, peer: SocketAddr) -> RequestIdentity {
    let source_ip = headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
        .unwrap_or_else(|| peer.ip());

    match headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        Some(key) if !key.is_empty() => RequestIdentity::with_key(key, source_ip),
        _ => RequestIdentity::anonymous(source_ip),
    }
}

fn denial_to_error(
    reason: DenialReason,
    remaining: u32,
    reset_at: Option<chrono::DateTime<chrono::Utc>>,
) -> ApiError {
    match reason {
        DenialReason::InvalidKey => ApiError::unauthorized("invalid API key"),
        DenialReason::QuotaExceeded => {
            ApiError::too_many_requests("API key quota exceeded", remaining, reset_at)
        }
        DenialReason::RateLimitExceeded => {
            ApiError::too_many_requests("rate limit exceeded", remaining, reset_at)
        }
        DenialReason::BurstExceeded => {
            ApiError::too_many_requests("burst limit exceeded", remaining, reset_at)
        }
        DenialReason::Blocked => {
            ApiError::too_many_requests("temporarily blocked", remaining, reset_at)
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/generate",
    request_body = GenerateRequest,
    tag = "Generate",
    security(("api_key" = [])),
    responses(
        (status = 202, description = "Job accepted; one credit batch debited", body = GenerateResponse),
        (status = 400, description = "Empty prompt"),
        (status = 401, description = "Missing or unknown API key"),
        (status = 402, description = "Insufficient credits"),
        (status = 429, description = "Quota, rate limit, or block in effect"),
        (status = 503, description = "Store unavailable")
    )
)]
pub async fn generate(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<GenerateRequest>,
) -> Result<(StatusCode, [(axum::http::HeaderName, String); 1], Json<GenerateResponse>), ApiError>
{
    let identity = resolve_identity(&headers, peer);
    let decision = state.gate.admit(&identity)?;

    if !decision.allowed {
        let reason = decision
            .denial
            .unwrap_or(DenialReason::RateLimitExceeded);
        return Err(denial_to_error(reason, decision.remaining, decision.reset_at));
    }

    let Some(owner_id) = decision.owner_id else {
        // anonymous traffic passes the IP limiter but cannot spend credits
        return Err(ApiError::unauthorized("API key is required"));
    };

    if request.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("prompt must not be empty"));
    }

    let balance = state.ledger.balance_of(&owner_id)?;
    if balance < state.generation_cost {
        return Err(ApiError::payment_required(format!(
            "insufficient credits: have {balance}, need {}",
            state.generation_cost
        )));
    }

    let outcome = state.ledger.append(
        &owner_id,
        -state.generation_cost,
        GENERATION_REASON,
        EntrySource::System,
        None,
    )?;

    let job_id = Uuid::new_v4().to_string();
    tracing::info!(
        owner_id = %owner_id,
        job_id = %job_id,
        balance = outcome.balance,
        "generation accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        [(X_RATELIMIT_REMAINING, decision.remaining.to_string())],
        Json(GenerateResponse {
            job_id,
            balance: outcome.balance,
            remaining: decision.remaining,
        }),
    ))
}
