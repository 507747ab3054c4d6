use anyhow::Context;
use async_trait::async_trait;
use base64::Engine as _;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::application::ports::persistence_port::PersistencePort;
use crate::domain::RoomId;

const BASE64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Persistence adapter over Redis `GET`/`SET`. Snapshots are stored as
/// base64 text, never raw bytes, so the value round-trips through Redis's
/// string type cleanly regardless of client/encoding quirks.
#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
}

impl RedisKv {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url).context("redis_client_open_failed")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("redis_connection_manager_failed")?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl PersistencePort for RedisKv {
    async fn load_snapshot(&self, room: &RoomId) -> anyhow::Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(room.state_key())
            .await
            .context("redis_get_failed")?;
        match value {
            Some(text) => {
                let bytes = BASE64
                    .decode(text)
                    .context("snapshot_base64_decode_failed")?;
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }

    async fn save_snapshot(&self, room: &RoomId, update: &[u8]) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let text = BASE64.encode(update);
        conn.set::<_, _, ()>(room.state_key(), text)
            .await
            .context("redis_set_failed")?;
        Ok(())
    }
}
