use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::time::sleep;

use crate::application::ports::bus_port::{BusHandler, BusMessage, BusPort};

/// Bus adapter over Redis pub/sub. Publish traffic goes through a single
/// shared `ConnectionManager` (safe for concurrent use, auto-reconnecting);
/// each `subscribe_pattern` call opens its own dedicated pub/sub connection,
/// so a slow or stalled subscriber never blocks publishes for other rooms.
#[derive(Clone)]
pub struct RedisBus {
    client: redis::Client,
    publish_conn: ConnectionManager,
}

impl RedisBus {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url).context("redis_client_open_failed")?;
        let publish_conn = ConnectionManager::new(client.clone())
            .await
            .context("redis_connection_manager_failed")?;
        Ok(Self {
            client,
            publish_conn,
        })
    }
}

#[async_trait]
impl BusPort for RedisBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> anyhow::Result<()> {
        let mut conn = self.publish_conn.clone();
        conn.publish::<_, _, ()>(channel, payload)
            .await
            .context("redis_publish_failed")?;
        Ok(())
    }

    async fn subscribe_pattern(&self, pattern: &str, handler: BusHandler) -> anyhow::Result<()> {
        let client = self.client.clone();
        let pattern = pattern.to_string();
        // Runs until the process shuts down (the task is aborted from
        // outside); any disconnect, graceful or not, is retried rather than
        // propagated, since losing the subscription silently would reopen
        // the echo-loop / cross-instance convergence hole this bus exists
        // to close.
        loop {
            match run_subscription(&client, &pattern, handler.clone()).await {
                Ok(()) => {
                    tracing::warn!(pattern = %pattern, "bus_subscription_ended_reconnecting");
                }
                Err(e) => {
                    tracing::warn!(pattern = %pattern, error = %e, "bus_subscription_dropped_retrying");
                }
            }
            sleep(Duration::from_secs(1)).await;
        }
    }
}

async fn run_subscription(
    client: &redis::Client,
    pattern: &str,
    handler: BusHandler,
) -> anyhow::Result<()> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .context("redis_pubsub_connect_failed")?;
    pubsub
        .psubscribe(pattern)
        .await
        .context("redis_psubscribe_failed")?;

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let channel = msg.get_channel_name().to_string();
        let payload: Vec<u8> = msg.get_payload_bytes().to_vec();
        handler(BusMessage { channel, payload }).await;
    }
    Ok(())
}
