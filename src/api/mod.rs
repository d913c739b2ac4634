// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP surface.
//!
//! Route handlers stay thin: extract, call into core components, map the
//! typed result onto a response. Admission and accounting rules live in
//! [`crate::gate`], [`crate::keys`], [`crate::ratelimit`] and
//! [`crate::ledger`], never here.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    credits::PaymentEvent,
    ledger::LedgerEntry,
    models::{
        AdjustmentRequest, AdjustmentResponse, BalanceResponse, GenerateRequest, GenerateResponse,
        IssueKeyRequest, IssuedKeyResponse, LedgerPageResponse, PaymentWebhookResponse,
    },
    state::AppState,
};

pub mod admin;
pub mod generate;
pub mod health;
pub mod keys;
pub mod ledger;
pub mod webhooks;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/keys", post(keys::issue_key))
        .route("/webhooks/payment", post(webhooks::payment_webhook))
        .route("/admin/adjustments", post(admin::create_adjustment))
        .route("/users/{user_id}/balance", get(ledger::get_balance))
        .route("/users/{user_id}/ledger", get(ledger::list_ledger))
        .route("/generate", post(generate::generate))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state)
        .nest("/v1", v1_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        keys::issue_key,
        webhooks::payment_webhook,
        admin::create_adjustment,
        ledger::get_balance,
        ledger::list_ledger,
        generate::generate
    ),
    components(
        schemas(
            IssueKeyRequest,
            IssuedKeyResponse,
            PaymentEvent,
            PaymentWebhookResponse,
            AdjustmentRequest,
            AdjustmentResponse,
            BalanceResponse,
            LedgerPageResponse,
            LedgerEntry,
            GenerateRequest,
            GenerateResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Service health probes"),
        (name = "Keys", description = "API key issuance"),
        (name = "Webhooks", description = "Payment provider callbacks"),
        (name = "Admin", description = "Manual credit adjustments"),
        (name = "Ledger", description = "Balance and ledger inspection"),
        (name = "Generate", description = "Gated generation jobs")
    )
)]
struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "admin_token",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .build(),
            ),
        );
        components.add_security_scheme(
            "api_key",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("x-api-key"))),
        );
    }
}
