//! Entity-change notifications and the sources that produce them.
//!
//! Metadata reaches the store from two kinds of producers: listeners that
//! observe metastore change events, and hooks that see the outputs of a query
//! executed directly. Both normalize into the same [`EntityNotification`], so
//! the store has one upsert path regardless of where an entity came from.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::{EntityStatus, MetaStore, StoreError, VertexId};

/// A classification carried by an [`EntityRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Normalized entity representation shared by every source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub guid: String,
    pub type_name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub classifications: Vec<ClassificationRecord>,
}

/// Metastore operations a listener reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerOperation {
    CreateDatabase,
    CreateTable,
    AddPartition,
    AlterTable,
    AlterPartition,
    DropTable,
    DropPartition,
}

/// Where a batch of entities was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum EntitySource {
    /// A metastore listener event. Carries every affected entity, e.g. all
    /// partitions added by one `ALTER TABLE ... ADD PARTITION`.
    ListenerEvent {
        operation: ListenerOperation,
        entities: Vec<EntityRecord>,
    },
    /// Outputs of a directly executed query.
    DirectQuery {
        #[serde(default)]
        user: Option<String>,
        outputs: Vec<EntityRecord>,
    },
}

/// A normalized change request against the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityNotification {
    Create { entities: Vec<EntityRecord> },
    Update { entities: Vec<EntityRecord> },
    Delete { guids: Vec<String> },
}

impl EntitySource {
    /// Normalize into a notification. `None` when there is nothing to send.
    pub fn into_notification(self) -> Option<EntityNotification> {
        let notification = match self {
            EntitySource::ListenerEvent {
                operation,
                entities,
            } => match operation {
                ListenerOperation::CreateDatabase
                | ListenerOperation::CreateTable
                | ListenerOperation::AddPartition => EntityNotification::Create { entities },
                ListenerOperation::AlterTable | ListenerOperation::AlterPartition => {
                    EntityNotification::Update { entities }
                }
                ListenerOperation::DropTable | ListenerOperation::DropPartition => {
                    EntityNotification::Delete {
                        guids: entities.into_iter().map(|e| e.guid).collect(),
                    }
                }
            },
            // Query outputs may or may not exist yet; create upserts either way.
            EntitySource::DirectQuery { outputs, .. } => {
                EntityNotification::Create { entities: outputs }
            }
        };
        (!notification.is_empty()).then_some(notification)
    }
}

impl EntityNotification {
    pub fn is_empty(&self) -> bool {
        match self {
            EntityNotification::Create { entities } | EntityNotification::Update { entities } => {
                entities.is_empty()
            }
            EntityNotification::Delete { guids } => guids.is_empty(),
        }
    }
}

impl MetaStore {
    /// Apply a notification. Creates and updates both upsert by guid; an
    /// entity's type can never change. The batch is checked before any write,
    /// so a rejected notification leaves the store untouched.
    ///
    /// Returns the affected vertex ids in notification order.
    pub fn apply(&mut self, notification: EntityNotification) -> Result<Vec<VertexId>, StoreError> {
        match notification {
            EntityNotification::Create { entities } | EntityNotification::Update { entities } => {
                self.check_types_unchanged(&entities)?;
                let mut touched = Vec::with_capacity(entities.len());
                for record in entities {
                    touched.push(self.upsert_record(record)?);
                }
                tracing::debug!(
                    target: "metagraph::store",
                    upserted = touched.len(),
                    "applied entity notification"
                );
                Ok(touched)
            }
            EntityNotification::Delete { guids } => {
                let mut touched = Vec::with_capacity(guids.len());
                for guid in &guids {
                    match self.find_by_guid(guid) {
                        Some(id) => touched.push(id),
                        None => tracing::warn!(
                            target: "metagraph::store",
                            %guid,
                            "delete for unknown entity ignored"
                        ),
                    }
                }
                for &id in &touched {
                    self.entities.set_status(id, EntityStatus::Deleted);
                }
                Ok(touched)
            }
        }
    }

    fn check_types_unchanged(&self, records: &[EntityRecord]) -> Result<(), StoreError> {
        let mut seen: HashMap<&str, String> = HashMap::new();
        for record in records {
            let existing = match seen.get(record.guid.as_str()) {
                Some(type_name) => Some(type_name.clone()),
                None => self.find_by_guid(&record.guid).map(|id| {
                    self.entities
                        .get_type(id)
                        .and_then(|t| self.interner.lookup(t))
                        .unwrap_or_default()
                }),
            };
            match existing {
                Some(existing) if existing != record.type_name => {
                    return Err(StoreError::TypeChange {
                        guid: record.guid.clone(),
                        existing,
                        requested: record.type_name.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    seen.insert(record.guid.as_str(), record.type_name.clone());
                }
            }
        }
        Ok(())
    }

    fn upsert_record(&mut self, record: EntityRecord) -> Result<VertexId, StoreError> {
        let attrs: Vec<(&str, &str)> = record
            .attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let id = match self.find_by_guid(&record.guid) {
            Some(id) => {
                self.entities.set_status(id, EntityStatus::Active);
                for (k, v) in attrs {
                    self.upsert_entity_attr(id, k, v)?;
                }
                id
            }
            None => self.add_entity(&record.guid, &record.type_name, attrs)?,
        };

        for classification in &record.classifications {
            let class_attrs = classification
                .attributes
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            self.add_classification(id, &classification.name, class_attrs)?;
        }
        Ok(id)
    }
}
