pub mod handler;

pub use handler::axum_ws_entry;
