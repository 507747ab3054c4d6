use yrs::Doc;

use crate::application::error::CrdtError;

/// Seam around the external CRDT library. The engine never inspects update
/// bytes; it only ever creates a document, applies opaque updates to it, and
/// re-encodes its current state as another opaque update.
///
/// Implementations must uphold (guaranteed by the wrapped library, not by
/// this trait): applying the same update twice is a no-op, applying updates
/// in any order converges to the same state, and `encode_state` returns a
/// blob that reproduces the current state when applied to a fresh document.
pub trait CrdtPort: Send + Sync {
    fn new_document(&self) -> Doc;

    fn apply_update(&self, doc: &Doc, update: &[u8]) -> Result<(), CrdtError>;

    fn encode_state(&self, doc: &Doc) -> Vec<u8>;
}
