//! HTTP surface.
//!
//! One quote endpoint plus a health probe. Query parameters arrive as
//! strings and are validated here; anything malformed is a 400 before the
//! source is consulted.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::models::{now, StopPriceSource};
use crate::quote::QuoteSigner;

#[derive(Clone)]
pub struct ApiState {
    pub source: Arc<dyn StopPriceSource>,
    pub signer: Arc<QuoteSigner>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/quote", get(get_quote))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct QuoteParams {
    /// Requested start stamp. Defaults to now.
    ts: Option<String>,
    /// Close stamp override. Defaults to now.
    cs: Option<String>,
    /// Threshold price. Required.
    th: Option<String>,
}

async fn get_quote(
    State(state): State<ApiState>,
    Query(params): Query<QuoteParams>,
) -> Result<Json<crate::models::Quote>, ApiError> {
    let thold_price = match params.th.as_deref() {
        Some(raw) => parse_stamp("th", raw)?,
        None => return Err(ApiError::bad_request("th parameter is required")),
    };
    let req_stamp = match params.ts.as_deref() {
        Some(raw) => parse_stamp("ts", raw)?,
        None => now(),
    };
    let curr_stamp = match params.cs.as_deref() {
        Some(raw) => Some(parse_stamp("cs", raw)?),
        None => None,
    };

    info!(thold_price, req_stamp, ?curr_stamp, "quote requested");

    let quote = state
        .signer
        .issue_quote(state.source.as_ref(), thold_price, req_stamp, curr_stamp)
        .await
        .map_err(|err| {
            warn!(error = %err, "quote issuance failed");
            ApiError::internal(err.to_string())
        })?;

    Ok(Json(quote))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

fn parse_stamp(name: &str, raw: &str) -> Result<u64, ApiError> {
    raw.parse::<u64>().map_err(|_| {
        ApiError::bad_request(format!("{name} must be an unsigned integer, got {raw:?}"))
    })
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stamp_accepts_unsigned_integers() {
        assert_eq!(parse_stamp("th", "45000").unwrap(), 45_000);
        assert_eq!(parse_stamp("ts", "0").unwrap(), 0);
    }

    #[test]
    fn test_parse_stamp_rejects_garbage() {
        for raw in ["-1", "1.5", "abc", ""] {
            let err = parse_stamp("th", raw).unwrap_err();
            assert_eq!(err.status, StatusCode::BAD_REQUEST);
        }
    }
}
