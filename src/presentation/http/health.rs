use axum::{Json, Router, extract::State, routing::get};
use chrono::Utc;
use serde::Serialize;

use crate::bootstrap::app_context::AppContext;

#[derive(Debug, Serialize)]
pub struct HealthResp {
    pub status: &'static str,
    #[serde(rename = "instanceId")]
    pub instance_id: String,
    pub timestamp: String,
}

pub async fn health(State(ctx): State<AppContext>) -> Json<HealthResp> {
    Json(HealthResp {
        status: "ok",
        instance_id: ctx.cfg.instance_id.as_str().to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

pub fn routes() -> Router<AppContext> {
    Router::new().route("/health", get(health))
}
