use serde::{Deserialize, Serialize};

/// Inbound client→server frame. Only `type: "update"` with a non-empty
/// `update` field is acted on; every other shape (including unknown `type`
/// values) is silently ignored by the receive loop.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default, rename = "clientId")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub update: Option<String>,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    /// `true` for a frame this engine acts on: `type == "update"` with a
    /// non-empty `update` payload.
    pub fn is_actionable_update(&self) -> bool {
        self.kind == "update" && self.update.as_deref().is_some_and(|u| !u.is_empty())
    }
}

/// Outbound server→client frame, one of the two `sync` shapes in the wire
/// protocol.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "sync")]
    Sync {
        action: SyncAction,
        update: String,
        #[serde(skip_serializing_if = "Option::is_none", rename = "originInstance")]
        origin_instance: Option<String>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Snapshot,
    Update,
}

impl ServerFrame {
    pub fn snapshot(update_b64: String) -> Self {
        ServerFrame::Sync {
            action: SyncAction::Snapshot,
            update: update_b64,
            origin_instance: None,
        }
    }

    pub fn update(update_b64: String, origin_instance: String) -> Self {
        ServerFrame::Sync {
            action: SyncAction::Update,
            update: update_b64,
            origin_instance: Some(origin_instance),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("ServerFrame always serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_frame_has_no_origin_instance() {
        let frame = ServerFrame::snapshot("YWJj".to_string());
        let json = frame.to_json();
        assert!(json.contains(r#""action":"snapshot""#));
        assert!(!json.contains("originInstance"));
    }

    #[test]
    fn update_frame_carries_origin_instance() {
        let frame = ServerFrame::update("YWJj".to_string(), "inst-1".to_string());
        let json = frame.to_json();
        assert!(json.contains(r#""action":"update""#));
        assert!(json.contains(r#""originInstance":"inst-1""#));
    }

    #[test]
    fn unknown_type_is_not_actionable() {
        let msg = ClientMessage::parse(r#"{"type":"awareness"}"#).unwrap();
        assert!(!msg.is_actionable_update());
    }

    #[test]
    fn update_with_empty_payload_is_not_actionable() {
        let msg = ClientMessage::parse(r#"{"type":"update","update":""}"#).unwrap();
        assert!(!msg.is_actionable_update());
    }

    #[test]
    fn well_formed_update_is_actionable() {
        let msg =
            ClientMessage::parse(r#"{"type":"update","room":"r1","update":"YWJj"}"#).unwrap();
        assert!(msg.is_actionable_update());
    }
}
