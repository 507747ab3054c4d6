pub mod bus_port;
pub mod crdt_port;
pub mod persistence_port;
