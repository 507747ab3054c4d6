use axum::Router;
use axum::routing::get;

use crate::bootstrap::app_context::AppContext;
use crate::infrastructure::metrics;

async fn metrics_text() -> String {
    metrics::gather()
}

pub fn routes() -> Router<AppContext> {
    Router::new().route("/metrics", get(metrics_text))
}
