// SPDX-License-Identifier: AGPL-3.0-or-later

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    auth::AdminOnly,
    error::ApiError,
    models::{BalanceResponse, LedgerPageResponse},
    state::AppState,
};

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;

#[derive(Deserialize, IntoParams)]
pub struct LedgerQuery {
    /// Page size, capped at 100. Defaults to 20.
    pub limit: Option<usize>,
    /// Opaque cursor from a previous page.
    pub cursor: Option<String>,
}

#[utoipa::path(
    get,
    path = "/v1/users/{user_id}/balance",
    params(
        ("user_id" = String, Path, description = "Principal to inspect")
    ),
    tag = "Ledger",
    security(("admin_token" = [])),
    responses(
        (status = 200, description = "Current balance; zero for unknown users", body = BalanceResponse),
        (status = 401, description = "Missing or malformed admin token"),
        (status = 403, description = "Invalid admin token")
    )
)]
pub async fn get_balance(
    AdminOnly(_actor): AdminOnly,
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state.ledger.balance_of(&user_id)?;
    Ok(Json(BalanceResponse { user_id, balance }))
}

#[utoipa::path(
    get,
    path = "/v1/users/{user_id}/ledger",
    params(
        ("user_id" = String, Path, description = "Principal to inspect"),
        LedgerQuery
    ),
    tag = "Ledger",
    security(("admin_token" = [])),
    responses(
        (status = 200, description = "One page of entries, newest first", body = LedgerPageResponse),
        (status = 400, description = "Invalid limit or cursor"),
        (status = 401, description = "Missing or malformed admin token"),
        (status = 403, description = "Invalid admin token")
    )
)]
pub async fn list_ledger(
    AdminOnly(_actor): AdminOnly,
    Path(user_id): Path<String>,
    Query(params): Query<LedgerQuery>,
    State(state): State<AppState>,
) -> Result<Json<LedgerPageResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let page = state
        .ledger
        .entries_for(&user_id, limit, params.cursor.as_deref())?;

    Ok(Json(LedgerPageResponse {
        user_id,
        entries: page.entries,
        next_cursor: page.next_cursor,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::EntrySource;
    use crate::state::test_support::test_state;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn unknown_user_has_zero_balance() {
        let state = test_state();
        let Json(body) = get_balance(
            AdminOnly("admin".into()),
            Path("nobody".into()),
            State(state),
        )
        .await
        .expect("balance read succeeds");
        assert_eq!(body.balance, 0);
        assert_eq!(body.user_id, "nobody");
    }

    #[tokio::test]
    async fn ledger_pages_walk_newest_first() {
        let state = test_state();
        for i in 1..=5 {
            state
                .ledger
                .append("user-1", i * 10, "seed", EntrySource::System, None)
                .unwrap();
        }

        let Json(first) = list_ledger(
            AdminOnly("admin".into()),
            Path("user-1".into()),
            Query(LedgerQuery {
                limit: Some(3),
                cursor: None,
            }),
            State(state.clone()),
        )
        .await
        .unwrap();

        assert_eq!(first.entries.len(), 3);
        assert!(first.entries[0].id > first.entries[1].id);
        let cursor = first.next_cursor.expect("more pages remain");

        let Json(rest) = list_ledger(
            AdminOnly("admin".into()),
            Path("user-1".into()),
            Query(LedgerQuery {
                limit: Some(3),
                cursor: Some(cursor),
            }),
            State(state),
        )
        .await
        .unwrap();

        assert_eq!(rest.entries.len(), 2);
        assert!(rest.next_cursor.is_none());
        assert!(rest.entries[0].id < first.entries[2].id);
    }

    #[tokio::test]
    async fn garbage_cursor_is_a_client_error() {
        let state = test_state();
        let err = list_ledger(
            AdminOnly("admin".into()),
            Path("user-1".into()),
            Query(LedgerQuery {
                limit: None,
                cursor: Some("not-a-cursor".into()),
            }),
            State(state),
        )
        .await
        .expect_err("garbage cursor is rejected");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
