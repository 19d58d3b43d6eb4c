use crate::state::CoreRuntime;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// Approval/receipt callback from the ITSM platform. `token` carries the
/// hex HMAC-SHA256 of the canonical field string under the shared secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub sn: String,
    #[serde(default)]
    pub title: String,
    pub approve_result: bool,
    #[serde(default)]
    pub updated_by: String,
    pub token: String,
}

impl CallbackPayload {
    fn canonical(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.sn, self.title, self.approve_result, self.updated_by
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CallbackResponse {
    pub result: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Signs the callback fields the way a conforming sender must.
pub fn sign_callback(secret: &str, payload: &CallbackPayload) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(payload.canonical().as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn verify(secret: &str, payload: &CallbackPayload) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload.canonical().as_bytes());
    let Ok(token) = hex::decode(&payload.token) else {
        return false;
    };
    mac.verify_slice(&token).is_ok()
}

pub fn router(runtime: Arc<CoreRuntime>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/action/callback/:action_id", post(action_callback))
        .with_state(runtime)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn action_callback(
    State(runtime): State<Arc<CoreRuntime>>,
    Path(action_id): Path<String>,
    Json(payload): Json<CallbackPayload>,
) -> Json<CallbackResponse> {
    if !verify(&runtime.config.signature_secret, &payload) {
        tracing::warn!(%action_id, sn = %payload.sn, "callback signature mismatch");
        return Json(CallbackResponse {
            result: false,
            message: Some("signature mismatch".to_string()),
        });
    }
    let value = match serde_json::to_value(&payload) {
        Ok(value) => value,
        Err(e) => {
            return Json(CallbackResponse {
                result: false,
                message: Some(format!("payload not serializable: {e}")),
            })
        }
    };
    match runtime.actions.handle_callback(&action_id, value).await {
        Ok(instance) => {
            tracing::info!(%action_id, status = %instance.status, "callback applied");
            Json(CallbackResponse {
                result: true,
                message: None,
            })
        }
        Err(e) => Json(CallbackResponse {
            result: false,
            message: Some(e.to_string()),
        }),
    }
}
