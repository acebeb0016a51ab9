// SPDX-License-Identifier: AGPL-3.0-or-later

//! Fiat exchange rates.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::Auth;
use crate::error::AppError;
use crate::state::AppState;

/// Response for `GET /v1/rate/{currency}`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RateResponse {
    /// Uppercase currency code.
    pub currency: String,
    /// Sats per one unit of the currency.
    pub rate: f64,
    /// Oracle fetch time, milliseconds since the epoch.
    pub timestamp: u64,
}

/// Current sats-per-unit rate for a fiat currency (USD, EUR, CAD, GBP).
#[utoipa::path(
    get,
    path = "/v1/rate/{currency}",
    tag = "Rate",
    security(("bearer_auth" = [])),
    params(("currency" = String, Path, description = "Fiat currency code")),
    responses(
        (status = 200, description = "Current rate", body = RateResponse),
        (status = 400, description = "Unsupported currency"),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Oracle unreachable and no cached rate")
    )
)]
pub async fn get_rate(
    Auth(_wallet): Auth,
    State(state): State<AppState>,
    Path(currency): Path<String>,
) -> Result<Json<RateResponse>, AppError> {
    let record = state.rates.get_rate(&currency).await?;
    Ok(Json(RateResponse {
        currency: record.currency,
        rate: record.rate,
        timestamp: record.timestamp_ms,
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::api::router;
    use crate::config::Config;
    use crate::state::AppState;

    #[tokio::test]
    async fn rate_requires_auth() {
        let app = router(AppState::for_tests(Config::for_tests()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/rate/usd")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unsupported_currency_is_rejected() {
        let state = AppState::for_tests(Config::for_tests());
        let create = router(state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/wallet")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = create.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let key = json["access_key"].as_str().unwrap();

        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/v1/rate/jpy")
                    .header("authorization", format!("Bearer {key}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
