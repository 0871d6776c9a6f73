// src/api.rs
// Axum router for digest submission and timestamp queries. Owns no state;
// thin over the Aggregator and the Proof Resolver.

use crate::aggregator::Aggregator;
use crate::merkle::{Digest, Side};
use crate::resolver::{ProofResolver, Resolution};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct ApiState {
    pub aggregator: Arc<Aggregator>,
    pub resolver: Arc<ProofResolver>,
}

#[derive(Deserialize)]
pub struct SubmitRequest {
    /// 64 hex characters (a SHA-256 digest of the client's content)
    pub digest: String,
}

#[derive(Serialize)]
struct PathStep {
    sibling: String,
    side: &'static str,
}

/// Malformed digests are rejected here and never reach the aggregator.
fn parse_digest(s: &str) -> Result<Digest, (StatusCode, Json<serde_json::Value>)> {
    let bytes = hex::decode(s).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "digest must be hex"})),
        )
    })?;
    bytes.as_slice().try_into().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "digest must be exactly 32 bytes"})),
        )
    })
}

async fn submit_digest(
    State(state): State<ApiState>,
    Json(req): Json<SubmitRequest>,
) -> impl IntoResponse {
    let digest = match parse_digest(&req.digest) {
        Ok(d) => d,
        Err(rejection) => return rejection.into_response(),
    };

    match state.aggregator.submit(digest) {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "accepted"}))).into_response(),
        Err(e) => {
            error!("submit failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "submission failed"})),
            )
                .into_response()
        }
    }
}

async fn query_timestamp(
    State(state): State<ApiState>,
    Path(digest_hex): Path<String>,
) -> impl IntoResponse {
    let digest = match parse_digest(&digest_hex) {
        Ok(d) => d,
        Err(rejection) => return rejection.into_response(),
    };

    match state.resolver.resolve(&digest) {
        Ok(Resolution::NotFound) => (
            StatusCode::NOT_FOUND,
            Json(json!({"status": "unknown"})),
        )
            .into_response(),
        Ok(Resolution::Pending { root }) => (
            StatusCode::OK,
            Json(json!({"status": "pending", "root": hex::encode(root)})),
        )
            .into_response(),
        Ok(Resolution::Complete {
            root,
            path,
            txid,
            depth,
        }) => {
            let steps: Vec<PathStep> = path
                .iter()
                .map(|s| PathStep {
                    sibling: hex::encode(s.sibling),
                    side: match s.side {
                        Side::Left => "left",
                        Side::Right => "right",
                    },
                })
                .collect();
            (
                StatusCode::OK,
                Json(json!({
                    "status": "complete",
                    "root": hex::encode(root),
                    "txid": txid,
                    "depth": depth,
                    "path": steps,
                })),
            )
                .into_response()
        }
        Err(e) => {
            error!("query failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "query failed"})),
            )
                .into_response()
        }
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

pub fn router(aggregator: Arc<Aggregator>, resolver: Arc<ProofResolver>) -> Router {
    let state = ApiState {
        aggregator,
        resolver,
    };
    Router::new()
        .route("/digest", post(submit_digest))
        .route("/timestamp/:digest", get(query_timestamp))
        .route("/health", get(health))
        .with_state(state)
}
