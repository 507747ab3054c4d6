use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::application::error::BusEnvelopeError;
use crate::domain::{InstanceId, RoomId};

/// Wire shape published on `room:{roomId}` and read back by every
/// subscriber, including the instance that published it (echo suppression
/// happens above this layer, by comparing `instance_id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEnvelope {
    #[serde(rename = "instanceId")]
    pub instance_id: String,
    pub room: String,
    pub update: String,
}

impl BusEnvelope {
    pub fn new(instance_id: &InstanceId, room: &RoomId, update_b64: String) -> Self {
        Self {
            instance_id: instance_id.as_str().to_string(),
            room: room.as_str().to_string(),
            update: update_b64,
        }
    }

    pub fn decode(payload: &[u8]) -> Result<Self, BusEnvelopeError> {
        serde_json::from_slice(payload)
            .map_err(|e| BusEnvelopeError::Malformed(e.to_string()))
    }

    pub fn originated_locally(&self, instance_id: &InstanceId) -> bool {
        self.instance_id == instance_id.as_str()
    }
}

/// A single received bus message together with the channel it arrived on.
pub struct BusMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

pub type BusHandler =
    Arc<dyn Fn(BusMessage) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Seam around the external pub/sub bus: publish a payload on a channel, and
/// subscribe to a glob pattern, invoking `handler` for every message that
/// matches. `subscribe_pattern` runs until the process shuts down; it owns
/// its own connection so publish traffic on other rooms is never blocked
/// behind it.
#[async_trait]
pub trait BusPort: Send + Sync {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> anyhow::Result<()>;

    async fn subscribe_pattern(&self, pattern: &str, handler: BusHandler) -> anyhow::Result<()>;
}
