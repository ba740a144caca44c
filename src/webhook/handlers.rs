use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, instrument, warn};

use super::normalize::normalize;
use crate::error::EngineError;
use crate::router::TurnOutcome;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/webhook/whatsapp", get(verify).post(receive))
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// GET /webhook/whatsapp
#[instrument(skip(state, q))]
pub async fn verify(
    State(state): State<AppState>,
    Query(q): Query<VerifyQuery>,
) -> Result<String, (StatusCode, String)> {
    let expected = state.verify_token.as_str();
    let subscribed = q.mode.as_deref() == Some("subscribe");
    let token_ok = !expected.is_empty() && q.verify_token.as_deref() == Some(expected);
    match (subscribed && token_ok, q.challenge) {
        (true, Some(challenge)) => Ok(challenge),
        _ => {
            warn!("webhook verification rejected");
            Err((StatusCode::FORBIDDEN, "invalid verify token".into()))
        }
    }
}

/// POST /webhook/whatsapp
#[instrument(skip(state, payload))]
pub async fn receive(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let msg = match normalize(&payload) {
        Ok(Some(msg)) => msg,
        Ok(None) => return Ok(Json(json!({ "ok": true, "ignored": true }))),
        Err(EngineError::Validation(reason)) => {
            warn!(%reason, "malformed webhook payload");
            return Err((StatusCode::BAD_REQUEST, reason));
        }
        Err(e) => return Err(internal(e)),
    };

    let outcome = state.engine.handle(msg).await.map_err(internal)?;
    info!(?outcome, "webhook handled");
    Ok(Json(json!({
        "ok": true,
        "ignored": matches!(outcome, TurnOutcome::Ignored | TurnOutcome::UnknownUser),
    })))
}

fn internal(e: EngineError) -> (StatusCode, String) {
    error!(error = %e, "webhook failed");
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
}
