//! Materializes result headers for vertices on the current page.

use std::collections::BTreeMap;

use metagraph_store::{EntityStatus, GraphStore, StoreError, VertexId};
use serde::Serialize;

use crate::taxonomy::AttributeDef;
use crate::value::{parse_value, TypedValue};

/// Summary of one matching entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityHeader {
    #[serde(skip)]
    pub id: VertexId,
    pub guid: String,
    pub type_name: String,
    pub status: EntityStatus,
    pub classification_names: Vec<String>,
    /// Requested attributes that are set and parse as their declared type.
    pub attributes: BTreeMap<String, TypedValue>,
}

impl EntityHeader {
    pub fn attribute(&self, name: &str) -> Option<&TypedValue> {
        self.attributes.get(name)
    }
}

pub struct ResultProjector<'g, G: GraphStore + ?Sized> {
    graph: &'g G,
}

impl<'g, G: GraphStore + ?Sized> ResultProjector<'g, G> {
    pub fn new(graph: &'g G) -> Self {
        Self { graph }
    }

    pub fn project(
        &self,
        vertex: VertexId,
        requested: &[AttributeDef],
    ) -> Result<EntityHeader, StoreError> {
        let meta = self.graph.vertex_meta(vertex)?;
        let mut attributes = BTreeMap::new();
        for attr in requested {
            if let Some(value) = self.typed_attribute(vertex, attr)? {
                attributes.insert(attr.name.clone(), value);
            }
        }
        Ok(EntityHeader {
            id: meta.id,
            guid: meta.guid,
            type_name: meta.type_name,
            status: meta.status,
            classification_names: meta.classifications,
            attributes,
        })
    }

    /// Stored value parsed as `attr`'s type. A value that does not parse is
    /// treated as unset.
    pub fn typed_attribute(
        &self,
        vertex: VertexId,
        attr: &AttributeDef,
    ) -> Result<Option<TypedValue>, StoreError> {
        let Some(raw) = self.graph.attribute(vertex, &attr.name)? else {
            return Ok(None);
        };
        Ok(typed_or_warn(vertex, attr, &raw))
    }
}

pub(crate) fn typed_or_warn(vertex: VertexId, attr: &AttributeDef, raw: &str) -> Option<TypedValue> {
    let parsed = parse_value(attr.attr_type, raw);
    if parsed.is_none() {
        tracing::warn!(
            target: "metagraph::search",
            vertex,
            attribute = %attr.name,
            attr_type = %attr.attr_type,
            raw,
            "stored value does not parse as its declared type; treating as unset"
        );
    }
    parsed
}
