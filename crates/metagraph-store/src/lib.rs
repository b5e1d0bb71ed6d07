//! Metagraph store: an in-memory property graph for entity metadata.
//!
//! Entities are typed vertices identified by a dense `u32` vertex id and a
//! stable external `guid`. Every string (type names, attribute names, raw
//! attribute values, classification names) is interned once and referenced by
//! a compact [`StrId`].
//!
//! Key structures:
//! 1. **Columnar attributes**: `attr_name -> (vertex -> raw value)`
//! 2. **Type index**: `type_name -> {vertices}` as Roaring bitmaps
//! 3. **Classification index**: `classification -> {vertices}`
//! 4. **Value index**: `(attr_name, raw value) -> {vertices}` for equality lookups
//!
//! Values are stored raw. Typing them (timestamps, numbers, enums) is the job of
//! the search layer, which owns the taxonomy.
//!
//! ## Module Organization
//!
//! - `graph`: the [`GraphStore`] read interface consumed by search
//! - `ingest`: entity-change notifications and their sources

pub mod graph;
pub mod ingest;

use dashmap::DashMap;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};

pub use graph::{GraphStore, StoreError, VertexMeta};
pub use ingest::{
    ClassificationRecord, EntityNotification, EntityRecord, EntitySource, ListenerOperation,
};

/// Dense vertex identifier, allocated in creation order.
pub type VertexId = u32;

// ============================================================================
// String Interning (Compact String Storage)
// ============================================================================

/// Interned string ID (4 bytes instead of 24+ for String)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct StrId(u32);

/// String interner: maps strings to compact IDs
pub struct StringInterner {
    str_to_id: DashMap<String, StrId>,
    id_to_str: DashMap<StrId, String>,
    next_id: AtomicU32,
}

impl StringInterner {
    pub fn new() -> Self {
        Self {
            str_to_id: DashMap::new(),
            id_to_str: DashMap::new(),
            next_id: AtomicU32::new(0),
        }
    }

    /// Intern a string, returning its ID
    pub fn intern(&self, s: &str) -> StrId {
        if let Some(id) = self.str_to_id.get(s) {
            return *id;
        }

        // `entry` keeps two racing writers from allocating different ids.
        *self
            .str_to_id
            .entry(s.to_string())
            .or_insert_with(|| {
                let id = StrId(self.next_id.fetch_add(1, Ordering::SeqCst));
                self.id_to_str.insert(id, s.to_string());
                id
            })
            .value()
    }

    /// Look up an existing ID for a string without inserting.
    pub fn id_of(&self, s: &str) -> Option<StrId> {
        self.str_to_id.get(s).map(|id| *id)
    }

    /// Look up string by ID
    pub fn lookup(&self, id: StrId) -> Option<String> {
        self.id_to_str.get(&id).map(|s| s.clone())
    }

    pub fn len(&self) -> usize {
        self.next_id.load(Ordering::SeqCst) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize to bytes (strings in id order).
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        let strings: Vec<String> = (0..self.next_id.load(Ordering::SeqCst))
            .filter_map(|i| self.id_to_str.get(&StrId(i)).map(|s| s.clone()))
            .collect();
        bincode::serialize(&strings).map_err(|e| StoreError::Snapshot(e.to_string()))
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        let strings: Vec<String> =
            bincode::deserialize(bytes).map_err(|e| StoreError::Snapshot(e.to_string()))?;
        let interner = Self::new();
        for s in strings {
            interner.intern(&s);
        }
        Ok(interner)
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Entity Storage (Columnar)
// ============================================================================

/// Lifecycle status of an entity. Deleted entities stay in the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityStatus {
    #[default]
    Active,
    Deleted,
}

/// A classification attached to one entity, with its own attribute values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationInstance {
    pub name: StrId,
    pub attrs: Vec<(StrId, StrId)>,
}

/// Debug/CLI-friendly entity view with resolved strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityView {
    pub id: VertexId,
    pub guid: String,
    pub entity_type: String,
    pub status: EntityStatus,
    pub attrs: BTreeMap<String, String>,
    pub classifications: Vec<String>,
}

/// Columnar entity storage
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EntityStore {
    /// Type column: vertex -> type_id
    types: Vec<StrId>,
    /// Guid column: vertex -> guid
    guids: Vec<StrId>,
    /// Status column: vertex -> status
    statuses: Vec<EntityStatus>,
    /// Attribute columns: attr_name -> (vertex -> value)
    attrs: HashMap<StrId, HashMap<VertexId, StrId>>,
    /// Type index: type_id -> bitmap of vertices
    type_index: HashMap<StrId, RoaringBitmap>,
    /// Equality index: (attr_name, value) -> bitmap of vertices
    value_index: HashMap<(StrId, StrId), RoaringBitmap>,
    /// Classification index: classification -> bitmap of vertices
    classification_index: HashMap<StrId, RoaringBitmap>,
    /// Classification instances per vertex, in attachment order
    classifications: HashMap<VertexId, Vec<ClassificationInstance>>,
    /// Guid index: guid -> vertex
    guid_index: HashMap<StrId, VertexId>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entities stored.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    fn contains(&self, id: VertexId) -> bool {
        (id as usize) < self.types.len()
    }

    /// Add an entity. The caller guarantees `guid` is not yet present.
    pub fn add(&mut self, guid: StrId, type_id: StrId, attrs: Vec<(StrId, StrId)>) -> VertexId {
        let id = self.types.len() as VertexId;
        self.types.push(type_id);
        self.guids.push(guid);
        self.statuses.push(EntityStatus::Active);
        self.guid_index.insert(guid, id);

        self.type_index
            .entry(type_id)
            .or_insert_with(RoaringBitmap::new)
            .insert(id);

        for (attr_name, attr_value) in attrs {
            self.set_attr(id, attr_name, attr_value);
        }

        id
    }

    /// Set (or overwrite) an attribute value, keeping the equality index current.
    pub fn set_attr(&mut self, id: VertexId, attr_name: StrId, value: StrId) {
        let previous = self
            .attrs
            .entry(attr_name)
            .or_insert_with(HashMap::new)
            .insert(id, value);

        if let Some(previous) = previous {
            if previous == value {
                return;
            }
            if let Some(ids) = self.value_index.get_mut(&(attr_name, previous)) {
                ids.remove(id);
            }
        }
        self.value_index
            .entry((attr_name, value))
            .or_insert_with(RoaringBitmap::new)
            .insert(id);
    }

    /// Attach a classification, replacing an existing instance of the same name.
    pub fn attach_classification(&mut self, id: VertexId, instance: ClassificationInstance) {
        self.classification_index
            .entry(instance.name)
            .or_insert_with(RoaringBitmap::new)
            .insert(id);

        let attached = self.classifications.entry(id).or_default();
        match attached.iter_mut().find(|c| c.name == instance.name) {
            Some(existing) => *existing = instance,
            None => attached.push(instance),
        }
    }

    /// Detach a classification. Returns whether it was attached.
    pub fn detach_classification(&mut self, id: VertexId, name: StrId) -> bool {
        let Some(attached) = self.classifications.get_mut(&id) else {
            return false;
        };
        let before = attached.len();
        attached.retain(|c| c.name != name);
        if attached.len() == before {
            return false;
        }
        if let Some(ids) = self.classification_index.get_mut(&name) {
            ids.remove(id);
        }
        true
    }

    pub fn set_status(&mut self, id: VertexId, status: EntityStatus) {
        if let Some(slot) = self.statuses.get_mut(id as usize) {
            *slot = status;
        }
    }

    /// Get entities by type (returns bitmap)
    pub fn by_type(&self, type_id: StrId) -> Option<&RoaringBitmap> {
        self.type_index.get(&type_id)
    }

    /// Get entities carrying a classification.
    pub fn by_classification(&self, name: StrId) -> Option<&RoaringBitmap> {
        self.classification_index.get(&name)
    }

    /// Get entities where `attr_name == value` (raw equality).
    pub fn by_attr_value(&self, attr_name: StrId, value: StrId) -> Option<&RoaringBitmap> {
        self.value_index.get(&(attr_name, value))
    }

    pub fn get_type(&self, id: VertexId) -> Option<StrId> {
        self.types.get(id as usize).copied()
    }

    pub fn get_guid(&self, id: VertexId) -> Option<StrId> {
        self.guids.get(id as usize).copied()
    }

    pub fn get_status(&self, id: VertexId) -> Option<EntityStatus> {
        self.statuses.get(id as usize).copied()
    }

    pub fn get_attr(&self, id: VertexId, attr_name: StrId) -> Option<StrId> {
        self.attrs.get(&attr_name)?.get(&id).copied()
    }

    pub fn classifications_of(&self, id: VertexId) -> &[ClassificationInstance] {
        self.classifications
            .get(&id)
            .map(|c| c.as_slice())
            .unwrap_or(&[])
    }

    pub fn vertex_of_guid(&self, guid: StrId) -> Option<VertexId> {
        self.guid_index.get(&guid).copied()
    }
}

// ============================================================================
// MetaStore: The Complete Graph
// ============================================================================

/// In-memory metadata graph.
///
/// Writers take `&mut self`; any number of readers can search a shared
/// `&MetaStore` concurrently. Wrap it in a lock when readers and writers
/// interleave; a read guard then gives each search a consistent snapshot.
pub struct MetaStore {
    /// String interner for compact storage
    pub interner: StringInterner,
    /// Entity storage
    pub entities: EntityStore,
}

impl MetaStore {
    pub fn new() -> Self {
        Self {
            interner: StringInterner::new(),
            entities: EntityStore::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn check_vertex(&self, id: VertexId) -> Result<(), StoreError> {
        if self.entities.contains(id) {
            Ok(())
        } else {
            Err(StoreError::UnknownVertex(id))
        }
    }

    /// Add an entity with a fresh guid.
    pub fn add_entity(
        &mut self,
        guid: &str,
        type_name: &str,
        attrs: Vec<(&str, &str)>,
    ) -> Result<VertexId, StoreError> {
        if self.find_by_guid(guid).is_some() {
            return Err(StoreError::DuplicateGuid(guid.to_string()));
        }
        let guid_id = self.interner.intern(guid);
        let type_id = self.interner.intern(type_name);
        let interned_attrs: Vec<(StrId, StrId)> = attrs
            .into_iter()
            .map(|(k, v)| (self.interner.intern(k), self.interner.intern(v)))
            .collect();
        Ok(self.entities.add(guid_id, type_id, interned_attrs))
    }

    /// Upsert a single entity attribute.
    pub fn upsert_entity_attr(
        &mut self,
        id: VertexId,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        self.check_vertex(id)?;
        let key_id = self.interner.intern(key);
        let value_id = self.interner.intern(value);
        self.entities.set_attr(id, key_id, value_id);
        Ok(())
    }

    /// Attach a classification (with its own attribute values) to an entity.
    pub fn add_classification(
        &mut self,
        id: VertexId,
        name: &str,
        attrs: Vec<(&str, &str)>,
    ) -> Result<(), StoreError> {
        self.check_vertex(id)?;
        let instance = ClassificationInstance {
            name: self.interner.intern(name),
            attrs: attrs
                .into_iter()
                .map(|(k, v)| (self.interner.intern(k), self.interner.intern(v)))
                .collect(),
        };
        self.entities.attach_classification(id, instance);
        Ok(())
    }

    /// Detach a classification. Returns whether the entity carried it.
    pub fn remove_classification(&mut self, id: VertexId, name: &str) -> Result<bool, StoreError> {
        self.check_vertex(id)?;
        let Some(name_id) = self.interner.id_of(name) else {
            return Ok(false);
        };
        Ok(self.entities.detach_classification(id, name_id))
    }

    /// Soft-delete an entity: it stays in every index with status `Deleted`.
    pub fn mark_deleted(&mut self, id: VertexId) -> Result<(), StoreError> {
        self.check_vertex(id)?;
        self.entities.set_status(id, EntityStatus::Deleted);
        Ok(())
    }

    /// Find entities by type (bitmap result for efficient joins)
    pub fn find_by_type(&self, type_name: &str) -> Option<&RoaringBitmap> {
        let type_id = self.interner.id_of(type_name)?;
        self.entities.by_type(type_id)
    }

    pub fn find_by_guid(&self, guid: &str) -> Option<VertexId> {
        let guid_id = self.interner.id_of(guid)?;
        self.entities.vertex_of_guid(guid_id)
    }

    /// Resolve an entity into human-readable strings.
    pub fn get_entity(&self, id: VertexId) -> Option<EntityView> {
        let entity_type = self.interner.lookup(self.entities.get_type(id)?)?;
        let guid = self.interner.lookup(self.entities.get_guid(id)?)?;
        let status = self.entities.get_status(id)?;

        let mut attrs = BTreeMap::new();
        for (attr_name_id, col) in &self.entities.attrs {
            let Some(value_id) = col.get(&id) else {
                continue;
            };
            let (Some(name), Some(value)) = (
                self.interner.lookup(*attr_name_id),
                self.interner.lookup(*value_id),
            ) else {
                continue;
            };
            attrs.insert(name, value);
        }

        let classifications = self
            .entities
            .classifications_of(id)
            .iter()
            .filter_map(|c| self.interner.lookup(c.name))
            .collect();

        Some(EntityView {
            id,
            guid,
            entity_type,
            status,
            attrs,
            classifications,
        })
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    /// Serialize to binary format
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        let interner_bytes = self.interner.to_bytes()?;
        let db_bytes =
            bincode::serialize(&self.entities).map_err(|e| StoreError::Snapshot(e.to_string()))?;

        let mut result = Vec::with_capacity(16 + interner_bytes.len() + db_bytes.len());
        // Header: magic number + version
        result.extend_from_slice(SNAPSHOT_MAGIC);
        result.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());

        result.extend_from_slice(&(interner_bytes.len() as u64).to_le_bytes());
        result.extend_from_slice(&interner_bytes);

        result.extend_from_slice(&(db_bytes.len() as u64).to_le_bytes());
        result.extend_from_slice(&db_bytes);

        Ok(result)
    }

    /// Deserialize from binary format
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        if bytes.len() < 8 || &bytes[0..4] != SNAPSHOT_MAGIC {
            return Err(StoreError::Snapshot("invalid metagraph snapshot".to_string()));
        }

        let version = read_u32(bytes, 4)?;
        if version != SNAPSHOT_VERSION {
            return Err(StoreError::Snapshot(format!(
                "unsupported snapshot version: {version}"
            )));
        }

        let mut offset = 8;

        let interner_len = read_u64(bytes, offset)? as usize;
        offset += 8;
        let interner = StringInterner::from_bytes(section(bytes, offset, interner_len)?)?;
        offset += interner_len;

        let db_len = read_u64(bytes, offset)? as usize;
        offset += 8;
        let entities: EntityStore = bincode::deserialize(section(bytes, offset, db_len)?)
            .map_err(|e| StoreError::Snapshot(e.to_string()))?;

        Ok(Self { interner, entities })
    }
}

impl Default for MetaStore {
    fn default() -> Self {
        Self::new()
    }
}

const SNAPSHOT_MAGIC: &[u8; 4] = b"MGST";
const SNAPSHOT_VERSION: u32 = 1;

fn section(bytes: &[u8], offset: usize, len: usize) -> Result<&[u8], StoreError> {
    offset
        .checked_add(len)
        .and_then(|end| bytes.get(offset..end))
        .ok_or_else(|| StoreError::Snapshot("truncated snapshot".to_string()))
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, StoreError> {
    let raw: [u8; 4] = section(bytes, offset, 4)?
        .try_into()
        .map_err(|_| StoreError::Snapshot("truncated snapshot".to_string()))?;
    Ok(u32::from_le_bytes(raw))
}

fn read_u64(bytes: &[u8], offset: usize) -> Result<u64, StoreError> {
    let raw: [u8; 8] = section(bytes, offset, 8)?
        .try_into()
        .map_err(|_| StoreError::Snapshot("truncated snapshot".to_string()))?;
    Ok(u64::from_le_bytes(raw))
}

// ============================================================================
// GraphStore implementation
// ============================================================================

impl GraphStore for MetaStore {
    fn vertices_by_type(&self, type_name: &str) -> Result<RoaringBitmap, StoreError> {
        Ok(self.find_by_type(type_name).cloned().unwrap_or_default())
    }

    fn vertices_by_classification(
        &self,
        type_name: &str,
        classification: &str,
    ) -> Result<RoaringBitmap, StoreError> {
        let (Some(type_id), Some(class_id)) = (
            self.interner.id_of(type_name),
            self.interner.id_of(classification),
        ) else {
            return Ok(RoaringBitmap::new());
        };
        let (Some(of_type), Some(tagged)) = (
            self.entities.by_type(type_id),
            self.entities.by_classification(class_id),
        ) else {
            return Ok(RoaringBitmap::new());
        };
        Ok(of_type & tagged)
    }

    fn vertices_by_attribute(
        &self,
        type_name: &str,
        attribute: &str,
        value: &str,
    ) -> Result<RoaringBitmap, StoreError> {
        let (Some(type_id), Some(attr_id), Some(value_id)) = (
            self.interner.id_of(type_name),
            self.interner.id_of(attribute),
            self.interner.id_of(value),
        ) else {
            return Ok(RoaringBitmap::new());
        };
        let (Some(of_type), Some(matching)) = (
            self.entities.by_type(type_id),
            self.entities.by_attr_value(attr_id, value_id),
        ) else {
            return Ok(RoaringBitmap::new());
        };
        Ok(of_type & matching)
    }

    fn vertex_meta(&self, vertex: VertexId) -> Result<VertexMeta, StoreError> {
        let lookup = |id: Option<StrId>| id.and_then(|id| self.interner.lookup(id));
        let type_name = lookup(self.entities.get_type(vertex));
        let guid = lookup(self.entities.get_guid(vertex));
        let (Some(type_name), Some(guid), Some(status)) =
            (type_name, guid, self.entities.get_status(vertex))
        else {
            return Err(StoreError::UnknownVertex(vertex));
        };
        let classifications = self
            .entities
            .classifications_of(vertex)
            .iter()
            .filter_map(|c| self.interner.lookup(c.name))
            .collect();
        Ok(VertexMeta {
            id: vertex,
            guid,
            type_name,
            status,
            classifications,
        })
    }

    fn attribute(&self, vertex: VertexId, name: &str) -> Result<Option<String>, StoreError> {
        self.check_vertex(vertex)?;
        let Some(attr_id) = self.interner.id_of(name) else {
            return Ok(None);
        };
        Ok(self
            .entities
            .get_attr(vertex, attr_id)
            .and_then(|v| self.interner.lookup(v)))
    }

    fn classification_attributes(
        &self,
        vertex: VertexId,
        classification: &str,
    ) -> Result<Option<Vec<(String, String)>>, StoreError> {
        self.check_vertex(vertex)?;
        let Some(class_id) = self.interner.id_of(classification) else {
            return Ok(None);
        };
        let Some(instance) = self
            .entities
            .classifications_of(vertex)
            .iter()
            .find(|c| c.name == class_id)
        else {
            return Ok(None);
        };
        Ok(Some(
            instance
                .attrs
                .iter()
                .filter_map(|(k, v)| Some((self.interner.lookup(*k)?, self.interner.lookup(*v)?)))
                .collect(),
        ))
    }
}
