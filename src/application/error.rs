use thiserror::Error;

/// The CRDT adapter's only distinguished failure: bytes that don't decode as
/// an update for the wrapped document. Everything else about CRDT application
/// is infallible by the library's own contract (idempotent, commutative).
#[derive(Debug, Error)]
pub enum CrdtError {
    #[error("malformed update: {0}")]
    MalformedUpdate(String),
}

/// Bus ingress can receive bytes that aren't a valid `BusEnvelope` at all
/// (wrong shape, bad JSON, missing fields); that's distinct from a malformed
/// update *inside* an otherwise well-formed envelope, which is a `CrdtError`.
#[derive(Debug, Error)]
pub enum BusEnvelopeError {
    #[error("malformed bus envelope: {0}")]
    Malformed(String),
}

/// Handshake-phase failures, mapped directly to WebSocket close codes by the
/// connection handler (1008 for `MissingRoomParam`, 1011 for `Internal`).
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("room parameter is required")]
    MissingRoomParam,
    #[error("internal error during handshake: {0}")]
    Internal(#[from] anyhow::Error),
}
