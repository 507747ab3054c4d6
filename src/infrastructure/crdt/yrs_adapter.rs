use yrs::updates::decoder::Decode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Text, Transact, Update};

use crate::application::error::CrdtError;
use crate::application::ports::crdt_port::CrdtPort;

/// The field every room's document exposes its convergent text under. The
/// engine itself never reads this except for diagnostics (`content_of`); it
/// exists so the end-to-end scenarios in the spec can observe a
/// human-readable string like `"Hello World"`.
const TEXT_FIELD: &str = "content";

/// Thin seam around `yrs`. Upholds idempotent/commutative apply and
/// self-contained `encode_state` by construction of the underlying library;
/// this adapter's only job is mapping decode failures to `CrdtError`.
#[derive(Default)]
pub struct YrsAdapter;

impl YrsAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Diagnostic helper, not part of the `CrdtPort` contract: current text
    /// content of the document's shared field.
    pub fn content_of(&self, doc: &Doc) -> String {
        let txt = doc.get_or_insert_text(TEXT_FIELD);
        let txn = doc.transact();
        txt.get_string(&txn)
    }
}

impl CrdtPort for YrsAdapter {
    fn new_document(&self) -> Doc {
        let doc = Doc::new();
        // Touch the field so a brand-new document already has the shared
        // type registered before the first update arrives.
        doc.get_or_insert_text(TEXT_FIELD);
        doc
    }

    fn apply_update(&self, doc: &Doc, update: &[u8]) -> Result<(), CrdtError> {
        let decoded =
            Update::decode_v1(update).map_err(|e| CrdtError::MalformedUpdate(e.to_string()))?;
        let mut txn = doc.transact_mut();
        txn.apply_update(decoded)
            .map_err(|e| CrdtError::MalformedUpdate(e.to_string()))
    }

    fn encode_state(&self, doc: &Doc) -> Vec<u8> {
        let txn = doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_is_idempotent() {
        let adapter = YrsAdapter::new();
        let writer = adapter.new_document();
        {
            let txt = writer.get_or_insert_text(TEXT_FIELD);
            let mut txn = writer.transact_mut();
            txt.insert(&mut txn, 0, "Hello World");
        }
        let update = adapter.encode_state(&writer);

        let reader = adapter.new_document();
        adapter.apply_update(&reader, &update).unwrap();
        adapter.apply_update(&reader, &update).unwrap();
        assert_eq!(adapter.content_of(&reader), "Hello World");
    }

    #[test]
    fn apply_in_either_order_converges() {
        let adapter = YrsAdapter::new();

        let a = adapter.new_document();
        {
            let txt = a.get_or_insert_text(TEXT_FIELD);
            let mut txn = a.transact_mut();
            txt.insert(&mut txn, 0, "Hello World");
        }
        let update_a = adapter.encode_state(&a);

        let b = adapter.new_document();
        {
            let txt = b.get_or_insert_text(TEXT_FIELD);
            let mut txn = b.transact_mut();
            txt.insert(&mut txn, 0, " from client2");
        }
        let update_b = adapter.encode_state(&b);

        let forward = adapter.new_document();
        adapter.apply_update(&forward, &update_a).unwrap();
        adapter.apply_update(&forward, &update_b).unwrap();

        let backward = adapter.new_document();
        adapter.apply_update(&backward, &update_b).unwrap();
        adapter.apply_update(&backward, &update_a).unwrap();

        assert_eq!(adapter.content_of(&forward), adapter.content_of(&backward));
    }

    #[test]
    fn malformed_bytes_are_rejected() {
        let adapter = YrsAdapter::new();
        let doc = adapter.new_document();
        let err = adapter.apply_update(&doc, b"not a real update").unwrap_err();
        assert!(matches!(err, CrdtError::MalformedUpdate(_)));
    }
}
