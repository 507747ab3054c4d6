use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use yrs::Doc;

use crate::domain::ClientId;

/// One locally-attached client socket. The room critical section only ever
/// pushes a serialized frame onto `outbound`; the actual (possibly slow,
/// possibly blocking) network write happens in a separate per-socket writer
/// task, so holding the room lock never blocks on I/O.
pub struct ClientSocket {
    pub client_id: ClientId,
    outbound: mpsc::UnboundedSender<String>,
    ready: AtomicBool,
}

impl ClientSocket {
    pub fn new(client_id: ClientId, outbound: mpsc::UnboundedSender<String>) -> Self {
        Self {
            client_id,
            outbound,
            ready: AtomicBool::new(true),
        }
    }

    /// Queue a frame for this socket. Returns `true` if the frame was
    /// accepted (the writer task is still alive and this socket hadn't
    /// already failed a prior send).
    pub fn send(&self, frame: String) -> bool {
        if !self.ready.load(Ordering::Relaxed) {
            return false;
        }
        if self.outbound.send(frame).is_err() {
            self.ready.store(false, Ordering::Relaxed);
            return false;
        }
        true
    }
}

/// Mutable state of a single room, guarded by one mutex so that document
/// mutation, socket-set mutation, and eviction-timer arming are a single
/// critical section (§5 of the design).
pub struct RoomState {
    pub doc: Doc,
    pub sockets: HashMap<ClientId, ClientSocket>,
    /// Bumped on every attach (including room creation); an eviction timer
    /// captured at generation G is a no-op if the room's generation has
    /// since moved past G. This is how timer cancellation is modeled without
    /// threading `JoinHandle`s through the room map.
    pub generation: u64,
}

impl RoomState {
    pub fn new(doc: Doc) -> Self {
        Self {
            doc,
            sockets: HashMap::new(),
            generation: 0,
        }
    }
}

pub struct Room {
    pub id: crate::domain::RoomId,
    pub state: Mutex<RoomState>,
}

impl Room {
    pub fn new(id: crate::domain::RoomId, doc: Doc) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: Mutex::new(RoomState::new(doc)),
        })
    }
}
