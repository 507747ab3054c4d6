use std::env;

use crate::domain::InstanceId;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub instance_id: InstanceId,
    pub redis_url: String,
    pub room_eviction_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1234);
        let instance_id = env::var("INSTANCE_ID")
            .ok()
            .filter(|s| !s.is_empty())
            .map(InstanceId::new)
            .unwrap_or_else(InstanceId::mint);
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let room_eviction_secs = env::var("ROOM_EVICTION_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        Ok(Self {
            port,
            instance_id,
            redis_url,
            room_eviction_secs,
        })
    }
}
