pub mod crdt;
pub mod metrics;
pub mod redis;
