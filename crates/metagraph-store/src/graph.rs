//! The read interface the search engine consumes.
//!
//! Lookups return Roaring bitmaps of vertex ids so callers can union and
//! intersect candidate sets cheaply. Every method is fallible: a remote or
//! disk-backed implementation may be unreachable, and search propagates that
//! failure instead of degrading to an empty result.

use roaring::RoaringBitmap;
use thiserror::Error;

use crate::{EntityStatus, VertexId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("graph store unavailable: {0}")]
    Unavailable(String),
    #[error("unknown vertex {0}")]
    UnknownVertex(VertexId),
    #[error("entity guid `{0}` already exists")]
    DuplicateGuid(String),
    #[error("entity `{guid}` has type `{existing}`; refusing to change it to `{requested}`")]
    TypeChange {
        guid: String,
        existing: String,
        requested: String,
    },
    #[error("snapshot error: {0}")]
    Snapshot(String),
}

/// Identity, type, status and classification names of one vertex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexMeta {
    pub id: VertexId,
    pub guid: String,
    pub type_name: String,
    pub status: EntityStatus,
    /// Directly attached classification names, in attachment order.
    pub classifications: Vec<String>,
}

/// Graph primitives for search: indexed lookups, type scans, attribute reads.
pub trait GraphStore {
    /// Full scan: every vertex whose type is exactly `type_name`.
    fn vertices_by_type(&self, type_name: &str) -> Result<RoaringBitmap, StoreError>;

    /// Indexed lookup keyed by `(type, classification)`.
    fn vertices_by_classification(
        &self,
        type_name: &str,
        classification: &str,
    ) -> Result<RoaringBitmap, StoreError>;

    /// Indexed lookup keyed by `(type, attribute == value)` on raw stored values.
    fn vertices_by_attribute(
        &self,
        type_name: &str,
        attribute: &str,
        value: &str,
    ) -> Result<RoaringBitmap, StoreError>;

    fn vertex_meta(&self, vertex: VertexId) -> Result<VertexMeta, StoreError>;

    /// Raw stored value of one attribute, `None` when unset.
    fn attribute(&self, vertex: VertexId, name: &str) -> Result<Option<String>, StoreError>;

    /// Attribute values of the named classification instance on `vertex`,
    /// `None` when the vertex does not carry that classification.
    fn classification_attributes(
        &self,
        vertex: VertexId,
        classification: &str,
    ) -> Result<Option<Vec<(String, String)>>, StoreError>;
}
