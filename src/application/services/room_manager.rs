use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use tokio::sync::{mpsc, RwLock};
use tokio::time::sleep;

use crate::application::messages::ServerFrame;
use crate::application::ports::bus_port::{BusEnvelope, BusMessage, BusPort};
use crate::application::ports::crdt_port::CrdtPort;
use crate::application::ports::persistence_port::PersistencePort;
use crate::application::services::room::{ClientSocket, Room};
use crate::domain::{ClientId, InstanceId, RoomId};
use crate::infrastructure::metrics;

const BASE64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Where an applied update came from, which determines whether it gets
/// republished to the bus and which socket (if any) is excluded from local
/// fan-out.
enum Origin<'a> {
    Local { client_id: &'a ClientId },
    Bus { instance_id: String },
}

/// Map from room id to `Room`, plus the lifecycle operations that keep the
/// map, each room's socket set, and the `collab_active_rooms` /
/// `collab_connected_clients` gauges all mutually consistent (I5).
#[derive(Clone)]
pub struct RoomManager {
    rooms: Arc<RwLock<HashMap<RoomId, Arc<Room>>>>,
    crdt: Arc<dyn CrdtPort>,
    persistence: Arc<dyn PersistencePort>,
    bus: Arc<dyn BusPort>,
    instance_id: InstanceId,
    eviction: Duration,
}

impl RoomManager {
    pub fn new(
        crdt: Arc<dyn CrdtPort>,
        persistence: Arc<dyn PersistencePort>,
        bus: Arc<dyn BusPort>,
        instance_id: InstanceId,
        eviction: Duration,
    ) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            crdt,
            persistence,
            bus,
            instance_id,
            eviction,
        }
    }

    /// Returns the room for `room_id`, creating and hydrating it from its
    /// persisted snapshot if this is the first time it's been referenced on
    /// this instance (I1). Existing rooms have their eviction timer (if any)
    /// implicitly cancelled by the generation bump in `arm_or_keep_alive`.
    pub async fn ensure_room(&self, room_id: &RoomId) -> Arc<Room> {
        let room = self.get_or_create_room(room_id).await;
        self.keep_alive(&room).await;
        room
    }

    async fn get_or_create_room(&self, room_id: &RoomId) -> Arc<Room> {
        if let Some(room) = self.rooms.read().await.get(room_id).cloned() {
            return room;
        }

        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(room_id).cloned() {
            return room;
        }

        let doc = self.crdt.new_document();
        match self.persistence.load_snapshot(room_id).await {
            Ok(Some(bytes)) => {
                if let Err(e) = self.crdt.apply_update(&doc, &bytes) {
                    tracing::warn!(room = %room_id, error = %e, "snapshot_decode_failed");
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(room = %room_id, error = %e, "snapshot_load_failed");
            }
        }

        let room = Room::new(room_id.clone(), doc);
        rooms.insert(room_id.clone(), room.clone());
        metrics::ACTIVE_ROOMS.set(rooms.len() as i64);
        room
    }

    /// Attach a socket to a room, returning the room so the caller can send
    /// the initial snapshot outside of any lock. A brand-new room never
    /// passes through `keep_alive` here, so no eviction timer is armed for
    /// an `Active[empty]` room that was just created for this attach.
    pub async fn attach(
        &self,
        room_id: &RoomId,
        client_id: ClientId,
        outbound: mpsc::UnboundedSender<String>,
    ) -> Arc<Room> {
        let room = self.get_or_create_room(room_id).await;
        {
            let mut state = room.state.lock().await;
            state.generation += 1;
            state.sockets.insert(client_id.clone(), ClientSocket::new(client_id, outbound));
        }
        self.refresh_connected_clients().await;
        room
    }

    /// Detach a socket. If the room becomes empty, arms a 60s (configurable)
    /// eviction timer (I3).
    pub async fn detach(&self, room_id: &RoomId, client_id: &ClientId) {
        let room = match self.rooms.read().await.get(room_id).cloned() {
            Some(room) => room,
            None => return,
        };
        let should_arm = {
            let mut state = room.state.lock().await;
            state.sockets.remove(client_id);
            state.sockets.is_empty()
        };
        self.refresh_connected_clients().await;
        if should_arm {
            self.arm_eviction(room).await;
        }
    }

    /// Cancels any pending eviction for an already-known room (§4.2:
    /// "If present, cancel any pending eviction and return"). If the room
    /// still has no attached sockets afterwards, a fresh eviction timer is
    /// armed immediately so I3 ("zero sockets ⇒ a pending timer exists")
    /// keeps holding even when the thing that kept the room warm was a bus
    /// message rather than a local attach.
    async fn keep_alive(&self, room: &Arc<Room>) {
        let still_empty = {
            let mut state = room.state.lock().await;
            state.generation += 1;
            state.sockets.is_empty()
        };
        if still_empty {
            self.arm_eviction(room.clone()).await;
        }
    }

    async fn arm_eviction(&self, room: Arc<Room>) {
        let generation = room.state.lock().await.generation;
        let manager = self.clone();
        let room_id = room.id.clone();
        let grace = self.eviction;
        tokio::spawn(async move {
            sleep(grace).await;
            manager.evict_if_current(&room_id, generation).await;
        });
    }

    /// Eviction timer callback. A no-op if the room was reattached (its
    /// generation moved on) since the timer was armed.
    async fn evict_if_current(&self, room_id: &RoomId, generation: u64) {
        let room = match self.rooms.read().await.get(room_id).cloned() {
            Some(room) => room,
            None => return,
        };
        let still_empty_and_current = {
            let state = room.state.lock().await;
            state.sockets.is_empty() && state.generation == generation
        };
        if !still_empty_and_current {
            return;
        }

        self.persist(room_id, &room).await;

        let mut rooms = self.rooms.write().await;
        // Re-check under the write lock: a socket may have attached between
        // the read above and acquiring the write lock.
        if let Some(current) = rooms.get(room_id) {
            let state = current.state.lock().await;
            if !(state.sockets.is_empty() && state.generation == generation) {
                return;
            }
        } else {
            return;
        }
        rooms.remove(room_id);
        metrics::ACTIVE_ROOMS.set(rooms.len() as i64);
        tracing::info!(room = %room_id, "room_evicted");
    }

    async fn refresh_connected_clients(&self) {
        let rooms = self.rooms.read().await;
        let mut total = 0usize;
        for room in rooms.values() {
            total += room.state.lock().await.sockets.len();
        }
        metrics::CONNECTED_CLIENTS.set(total as i64);
    }

    pub async fn encode_snapshot(&self, room: &Room) -> String {
        let state = room.state.lock().await;
        BASE64.encode(self.crdt.encode_state(&state.doc))
    }

    /// Apply an update that arrived from a local client socket: apply, fan
    /// out to local peers (excluding the originator), publish to the bus,
    /// persist.
    pub async fn apply_local_update(
        &self,
        room_id: &RoomId,
        client_id: &ClientId,
        update: &[u8],
    ) {
        let room = match self.rooms.read().await.get(room_id).cloned() {
            Some(room) => room,
            None => return,
        };
        if !self
            .apply_and_fan_out(&room, update, Origin::Local { client_id })
            .await
        {
            return;
        }

        let envelope = BusEnvelope::new(&self.instance_id, room_id, BASE64.encode(update));
        let payload = match serde_json::to_vec(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(room = %room_id, error = %e, "bus_envelope_encode_failed");
                return;
            }
        };
        let publish = self.bus.publish(&room_id.channel(), payload);
        let persist = self.persist(room_id, &room);
        let (publish_result, ()) = tokio::join!(publish, persist);
        if let Err(e) = publish_result {
            tracing::warn!(room = %room_id, error = %e, "bus_publish_failed");
        }
    }

    /// Apply an update that arrived from the bus: `ensureRoom`, apply,
    /// broadcast to *all* local sockets (no originator to exclude), persist.
    /// Never republished — that would cycle forever (I2).
    pub async fn apply_bus_update(&self, envelope: &BusEnvelope) {
        let room_id = match RoomId::new(envelope.room.clone()) {
            Some(id) => id,
            None => {
                tracing::warn!("bus_envelope_empty_room");
                return;
            }
        };
        let update = match BASE64.decode(&envelope.update) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(room = %room_id, error = %e, "bus_envelope_update_decode_failed");
                return;
            }
        };
        let room = self.ensure_room(&room_id).await;
        if !self
            .apply_and_fan_out(
                &room,
                &update,
                Origin::Bus {
                    instance_id: envelope.instance_id.clone(),
                },
            )
            .await
        {
            return;
        }
        self.persist(&room_id, &room).await;
    }

    /// Applies `update` to the room's document and fans it out to local
    /// sockets. Returns `false` if the update was malformed (dropped,
    /// nothing further happens).
    async fn apply_and_fan_out(&self, room: &Arc<Room>, update: &[u8], origin: Origin<'_>) -> bool {
        let update_b64 = BASE64.encode(update);
        let (origin_instance, exclude): (String, Option<ClientId>) = match &origin {
            Origin::Local { client_id } => (self.instance_id.as_str().to_string(), Some((*client_id).clone())),
            Origin::Bus { instance_id } => (instance_id.clone(), None),
        };

        let mut state = room.state.lock().await;
        if let Err(e) = self.crdt.apply_update(&state.doc, update) {
            tracing::warn!(room = %room.id, error = %e, "malformed_update_dropped");
            return false;
        }
        metrics::UPDATES_TOTAL.inc();

        let frame = ServerFrame::update(update_b64, origin_instance).to_json();
        let mut sent = 0u32;
        for (cid, socket) in state.sockets.iter() {
            if let Some(exclude) = &exclude {
                if cid == exclude {
                    continue;
                }
            }
            if socket.send(frame.clone()) {
                sent += 1;
            }
        }
        drop(state);
        if sent > 0 {
            metrics::MESSAGES_SENT_TOTAL.inc_by(sent as u64);
        }
        true
    }

    /// Encode current document state, base64, write to `room:{id}:state`.
    /// Failures are logged and swallowed (§7: PersistenceFailure never
    /// aborts the update path).
    pub async fn persist(&self, room_id: &RoomId, room: &Arc<Room>) {
        let bytes = {
            let state = room.state.lock().await;
            self.crdt.encode_state(&state.doc)
        };
        if let Err(e) = self.persistence.save_snapshot(room_id, &bytes).await {
            tracing::warn!(room = %room_id, error = %e, "persist_snapshot_failed");
        }
    }

    /// Persist every currently active room. Used on graceful shutdown.
    pub async fn persist_all(&self) {
        let rooms: Vec<(RoomId, Arc<Room>)> = self
            .rooms
            .read()
            .await
            .iter()
            .map(|(id, room)| (id.clone(), room.clone()))
            .collect();
        for (id, room) in rooms {
            self.persist(&id, &room).await;
        }
    }

    /// Entry point wired to the bus subscription: decode, drop on
    /// echo/malformed, else apply.
    pub async fn handle_bus_message(&self, msg: BusMessage) {
        let envelope = match BusEnvelope::decode(&msg.payload) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(channel = %msg.channel, error = %e, "malformed_bus_envelope_dropped");
                return;
            }
        };
        if envelope.originated_locally(&self.instance_id) {
            return;
        }
        self.apply_bus_update(&envelope).await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use yrs::{Text, Transact};

    use super::*;
    use crate::infrastructure::crdt::YrsAdapter;

    struct FakePersistence {
        store: StdMutex<StdHashMap<String, Vec<u8>>>,
    }

    impl FakePersistence {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                store: StdMutex::new(StdHashMap::new()),
            })
        }
    }

    #[async_trait]
    impl PersistencePort for FakePersistence {
        async fn load_snapshot(&self, room: &RoomId) -> anyhow::Result<Option<Vec<u8>>> {
            Ok(self.store.lock().unwrap().get(room.as_str()).cloned())
        }

        async fn save_snapshot(&self, room: &RoomId, update: &[u8]) -> anyhow::Result<()> {
            self.store
                .lock()
                .unwrap()
                .insert(room.as_str().to_string(), update.to_vec());
            Ok(())
        }
    }

    struct FakeBus {
        published: StdMutex<Vec<(String, Vec<u8>)>>,
    }

    impl FakeBus {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                published: StdMutex::new(Vec::new()),
            })
        }

        fn publish_count(&self) -> usize {
            self.published.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl BusPort for FakeBus {
        async fn publish(&self, channel: &str, payload: Vec<u8>) -> anyhow::Result<()> {
            self.published
                .lock()
                .unwrap()
                .push((channel.to_string(), payload));
            Ok(())
        }

        async fn subscribe_pattern(&self, _pattern: &str, _handler: BusHandler) -> anyhow::Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn make_manager() -> (RoomManager, Arc<FakeBus>, Arc<FakePersistence>) {
        let bus = FakeBus::new();
        let persistence = FakePersistence::new();
        let manager = RoomManager::new(
            Arc::new(YrsAdapter::new()),
            persistence.clone(),
            bus.clone(),
            InstanceId::new("instance-a"),
            Duration::from_millis(50),
        );
        (manager, bus, persistence)
    }

    fn test_update(text: &str) -> Vec<u8> {
        let adapter = YrsAdapter::new();
        let doc = adapter.new_document();
        {
            let txt = doc.get_or_insert_text("content");
            let mut txn = doc.transact_mut();
            txt.insert(&mut txn, 0, text);
        }
        adapter.encode_state(&doc)
    }

    #[tokio::test]
    async fn local_update_fans_out_to_peers_but_not_to_originator() {
        let (manager, bus, _persistence) = make_manager();
        let room_id = RoomId::new("room-1").unwrap();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        manager.attach(&room_id, ClientId::new("a"), tx_a).await;
        manager.attach(&room_id, ClientId::new("b"), tx_b).await;

        manager
            .apply_local_update(&room_id, &ClientId::new("a"), &test_update("hi"))
            .await;

        assert!(rx_b.recv().await.is_some(), "peer should receive the update");
        assert!(
            rx_a.try_recv().is_err(),
            "originator must not receive its own update back"
        );
        assert_eq!(bus.publish_count(), 1, "local update publishes exactly once");
    }

    #[tokio::test]
    async fn bus_update_broadcasts_to_all_local_sockets_and_is_not_republished() {
        let (manager, bus, _persistence) = make_manager();
        let room_id = RoomId::new("room-2").unwrap();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        manager.attach(&room_id, ClientId::new("a"), tx_a).await;

        let envelope = BusEnvelope::new(
            &InstanceId::new("instance-b"),
            &room_id,
            BASE64.encode(test_update("from elsewhere")),
        );
        manager.apply_bus_update(&envelope).await;

        assert!(rx_a.recv().await.is_some());
        assert_eq!(
            bus.publish_count(),
            0,
            "bus-originated updates must never be republished"
        );
    }

    #[tokio::test]
    async fn self_originated_bus_envelope_is_dropped_before_apply() {
        let (manager, _bus, _persistence) = make_manager();
        let room_id = RoomId::new("room-3").unwrap();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        manager.attach(&room_id, ClientId::new("a"), tx_a).await;

        let envelope = BusEnvelope::new(
            &InstanceId::new("instance-a"),
            &room_id,
            BASE64.encode(test_update("echo")),
        );
        let payload = serde_json::to_vec(&envelope).unwrap();
        manager
            .handle_bus_message(BusMessage {
                channel: room_id.channel(),
                payload,
            })
            .await;

        assert!(
            rx_a.try_recv().is_err(),
            "self-originated envelopes must be dropped, not fanned out"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_room_is_evicted_after_the_grace_period() {
        let (manager, _bus, persistence) = make_manager();
        let room_id = RoomId::new("room-4").unwrap();

        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        manager.attach(&room_id, ClientId::new("a"), tx_a).await;
        manager.detach(&room_id, &ClientId::new("a")).await;

        tokio::time::advance(Duration::from_millis(200)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(
            persistence
                .load_snapshot(&room_id)
                .await
                .unwrap()
                .is_some(),
            "room is persisted as part of eviction"
        );
        assert_eq!(manager.rooms.read().await.len(), 0, "room map is empty after eviction");
    }

    #[tokio::test]
    async fn reattaching_before_grace_period_elapses_cancels_eviction() {
        let (manager, _bus, _persistence) = make_manager();
        let room_id = RoomId::new("room-5").unwrap();

        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        manager.attach(&room_id, ClientId::new("a"), tx_a).await;
        manager.detach(&room_id, &ClientId::new("a")).await;

        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        manager.attach(&room_id, ClientId::new("b"), tx_b).await;

        assert_eq!(manager.rooms.read().await.len(), 1, "room survives reattachment");
    }
}
