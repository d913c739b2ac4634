// SPDX-License-Identifier: AGPL-3.0-or-later

use axum::{extract::State, http::StatusCode, Json};

use crate::{
    auth::AdminOnly,
    error::ApiError,
    models::{IssueKeyRequest, IssuedKeyResponse},
    state::AppState,
};

#[utoipa::path(
    post,
    path = "/v1/keys",
    request_body = IssueKeyRequest,
    tag = "Keys",
    security(("admin_token" = [])),
    responses(
        (status = 201, description = "Key issued; the plaintext is returned exactly once", body = IssuedKeyResponse),
        (status = 400, description = "Empty owner or zero quota"),
        (status = 401, description = "Missing or malformed admin token"),
        (status = 403, description = "Invalid admin token")
    )
)]
pub async fn issue_key(
    AdminOnly(actor): AdminOnly,
    State(state): State<AppState>,
    Json(request): Json<IssueKeyRequest>,
) -> Result<(StatusCode, Json<IssuedKeyResponse>), ApiError> {
    let record = state
        .registry
        .issue(&request.owner_id, request.max_requests_per_window)?;

    tracing::info!(
        owner_id = %record.owner_id,
        quota = record.max_requests_per_window,
        actor,
        "issued api key"
    );

    Ok((
        StatusCode::CREATED,
        Json(IssuedKeyResponse {
            api_key: record.key,
            owner_id: record.owner_id,
            max_requests_per_window: record.max_requests_per_window,
            window_end: record.window_end,
        }),
    ))
}
