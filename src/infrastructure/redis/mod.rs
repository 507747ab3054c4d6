pub mod bus;
pub mod kv;

pub use bus::RedisBus;
pub use kv::RedisKv;
