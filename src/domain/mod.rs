pub mod ids;

pub use ids::{ClientId, InstanceId, RoomId};
