use async_trait::async_trait;

use crate::domain::RoomId;

/// Seam around the external key-value store. Snapshots are stored as base64
/// text under `room:{roomId}:state`; encoding/decoding that text is this
/// adapter's job, not the room manager's.
#[async_trait]
pub trait PersistencePort: Send + Sync {
    async fn load_snapshot(&self, room: &RoomId) -> anyhow::Result<Option<Vec<u8>>>;

    async fn save_snapshot(&self, room: &RoomId, update: &[u8]) -> anyhow::Result<()>;
}
