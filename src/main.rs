use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::MatchedPath;
use axum::routing::get;
use dotenvy::dotenv;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use collab_relay::application::ports::bus_port::BusPort;
use collab_relay::application::services::room_manager::RoomManager;
use collab_relay::bootstrap::app_context::AppContext;
use collab_relay::bootstrap::config::Config;
use collab_relay::infrastructure::crdt::YrsAdapter;
use collab_relay::infrastructure::redis::{RedisBus, RedisKv};
use collab_relay::presentation::ws::axum_ws_entry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "collab_relay=debug,tower_http=info,axum=info".into()),
        )
        .init();

    let cfg = Config::from_env()?;
    info!(?cfg, "starting collab relay");

    let bus = Arc::new(RedisBus::connect(&cfg.redis_url).await?);
    let kv = Arc::new(RedisKv::connect(&cfg.redis_url).await?);
    let crdt = Arc::new(YrsAdapter::new());

    let room_manager = RoomManager::new(
        crdt,
        kv,
        bus.clone(),
        cfg.instance_id.clone(),
        Duration::from_secs(cfg.room_eviction_secs),
    );

    let ingress_manager = room_manager.clone();
    let ingress_bus = bus.clone();
    tokio::spawn(async move {
        let manager = ingress_manager.clone();
        let handler: collab_relay::application::ports::bus_port::BusHandler = Arc::new(move |msg| {
            let manager = manager.clone();
            Box::pin(async move { manager.handle_bus_message(msg).await })
        });
        if let Err(e) = ingress_bus.subscribe_pattern("room:*", handler).await {
            error!(error = %e, "bus_ingress_subscription_failed");
        }
    });

    let ctx = AppContext::new(cfg.clone(), room_manager.clone());

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([http::Method::GET, http::Method::POST])
        .allow_headers([http::header::CONTENT_TYPE]);

    let app = Router::new()
        .merge(collab_relay::presentation::http::health::routes())
        .merge(collab_relay::presentation::http::metrics::routes())
        .route("/", get(axum_ws_entry))
        .with_state(ctx.clone())
        .layer(cors)
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &http::Request<_>| {
                let method = req.method().clone();
                let uri = req.uri().clone();
                let matched = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(|p| p.as_str().to_string())
                    .unwrap_or_default();
                tracing::info_span!("http", %method, %uri, matched_path = %matched)
            }),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(e) = serve.await {
        error!(error = %e, "server task failed");
    }

    info!("shutting down, persisting all rooms");
    room_manager.persist_all().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
