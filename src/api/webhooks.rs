// SPDX-License-Identifier: AGPL-3.0-or-later

//! Payment provider webhook.
//!
//! Providers retry deliveries until they see a 2xx, so replays are normal
//! traffic: a duplicate event acknowledges with 200 and the original
//! outcome. Only store failures return 5xx, which tells the provider to
//! retry later.

use axum::{extract::State, Json};

use crate::{
    credits::PaymentEvent, error::ApiError, models::PaymentWebhookResponse, state::AppState,
};

#[utoipa::path(
    post,
    path = "/v1/webhooks/payment",
    request_body = PaymentEvent,
    tag = "Webhooks",
    responses(
        (status = 200, description = "Event applied, or already applied on a prior delivery", body = PaymentWebhookResponse),
        (status = 400, description = "Malformed event (empty provider/order, non-positive amount)"),
        (status = 503, description = "Ledger store unavailable; the provider should redeliver")
    )
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    Json(event): Json<PaymentEvent>,
) -> Result<Json<PaymentWebhookResponse>, ApiError> {
    let outcome = state.credits.apply_payment(&event)?;

    Ok(Json(PaymentWebhookResponse {
        balance: outcome.balance,
        credited: outcome.credited,
        entry_id: outcome.entry_id,
        was_duplicate: outcome.was_duplicate,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;
    use axum::http::StatusCode;

    fn event(order: &str, amount: u64) -> PaymentEvent {
        PaymentEvent {
            provider: "stripe".into(),
            external_order_id: order.into(),
            user_id: "user-1".into(),
            amount_minor_units: amount,
            currency: "USD".into(),
        }
    }

    #[tokio::test]
    async fn payment_credits_at_the_configured_rate() {
        let state = test_state();
        let Json(body) = payment_webhook(State(state.clone()), Json(event("ord-1", 500)))
            .await
            .expect("webhook succeeds");

        // test rate is 100 credits per 100 minor units
        assert_eq!(body.credited, 500);
        assert_eq!(body.balance, 500);
        assert!(!body.was_duplicate);
    }

    #[tokio::test]
    async fn redelivery_acknowledges_without_double_credit() {
        let state = test_state();
        let Json(first) = payment_webhook(State(state.clone()), Json(event("ord-1", 500)))
            .await
            .unwrap();
        let Json(replay) = payment_webhook(State(state.clone()), Json(event("ord-1", 500)))
            .await
            .unwrap();

        assert!(replay.was_duplicate);
        assert_eq!(replay.entry_id, first.entry_id);
        assert_eq!(state.ledger.balance_of("user-1").unwrap(), 500);
    }

    #[tokio::test]
    async fn zero_amount_is_rejected() {
        let state = test_state();
        let err = payment_webhook(State(state), Json(event("ord-1", 0)))
            .await
            .expect_err("zero amount is invalid");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
