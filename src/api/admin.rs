// SPDX-License-Identifier: AGPL-3.0-or-later

use axum::{extract::State, Json};

use crate::{
    auth::AdminOnly,
    error::ApiError,
    models::{AdjustmentRequest, AdjustmentResponse},
    state::AppState,
};

#[utoipa::path(
    post,
    path = "/v1/admin/adjustments",
    request_body = AdjustmentRequest,
    tag = "Admin",
    security(("admin_token" = [])),
    responses(
        (status = 200, description = "Adjustment recorded (or already recorded under the same idempotency key)", body = AdjustmentResponse),
        (status = 400, description = "Zero delta, empty user, or empty reason"),
        (status = 401, description = "Missing or malformed admin token"),
        (status = 403, description = "Invalid admin token"),
        (status = 503, description = "Ledger store unavailable")
    )
)]
pub async fn create_adjustment(
    AdminOnly(actor): AdminOnly,
    State(state): State<AppState>,
    Json(request): Json<AdjustmentRequest>,
) -> Result<Json<AdjustmentResponse>, ApiError> {
    let outcome = state.credits.apply_adjustment(
        &request.user_id,
        request.delta,
        &request.reason,
        &actor,
        request.idempotency_key.as_deref(),
    )?;

    Ok(Json(AdjustmentResponse {
        balance: outcome.balance,
        entry_id: outcome.entry_id,
        created_at: outcome.created_at,
        was_duplicate: outcome.was_duplicate,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;
    use axum::http::StatusCode;

    fn request(delta: i64, key: Option<&str>) -> AdjustmentRequest {
        AdjustmentRequest {
            user_id: "user-1".into(),
            delta,
            reason: "support: refund".into(),
            idempotency_key: key.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn adjustment_moves_the_balance() {
        let state = test_state();

        let Json(up) = create_adjustment(
            AdminOnly("admin".into()),
            State(state.clone()),
            Json(request(50, None)),
        )
        .await
        .expect("credit succeeds");
        assert_eq!(up.balance, 50);

        let Json(down) = create_adjustment(
            AdminOnly("admin".into()),
            State(state.clone()),
            Json(request(-20, None)),
        )
        .await
        .expect("debit succeeds");
        assert_eq!(down.balance, 30);
        assert_eq!(state.ledger.balance_of("user-1").unwrap(), 30);
    }

    #[tokio::test]
    async fn idempotency_key_makes_replays_no_ops() {
        let state = test_state();

        let Json(first) = create_adjustment(
            AdminOnly("admin".into()),
            State(state.clone()),
            Json(request(50, Some("adj-1"))),
        )
        .await
        .unwrap();
        let Json(replay) = create_adjustment(
            AdminOnly("admin".into()),
            State(state.clone()),
            Json(request(50, Some("adj-1"))),
        )
        .await
        .unwrap();

        assert!(!first.was_duplicate);
        assert!(replay.was_duplicate);
        assert_eq!(replay.entry_id, first.entry_id);
        assert_eq!(state.ledger.balance_of("user-1").unwrap(), 50);
    }

    #[tokio::test]
    async fn zero_delta_is_rejected() {
        let state = test_state();
        let err = create_adjustment(
            AdminOnly("admin".into()),
            State(state),
            Json(request(0, None)),
        )
        .await
        .expect_err("zero delta is invalid");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
