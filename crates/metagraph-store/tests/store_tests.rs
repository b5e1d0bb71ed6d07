//! MetaStore E2E Tests

use metagraph_store::*;
use proptest::prelude::*;
use roaring::RoaringBitmap;
use tempfile::tempdir;

// ============================================================================
// String Interning Tests
// ============================================================================

#[test]
fn test_string_interning() {
    let interner = StringInterner::new();

    let id1 = interner.intern("hive_table");
    let id2 = interner.intern("hive_column");
    let id3 = interner.intern("hive_table");

    assert_eq!(id1, id3);
    assert_ne!(id1, id2);
    assert_eq!(interner.lookup(id1), Some("hive_table".to_string()));
    assert_eq!(interner.len(), 2);
}

// ============================================================================
// Classification Tests
// ============================================================================

#[test]
fn test_classification_attributes_are_per_instance() {
    let mut db = MetaStore::new();
    let a = db.add_entity("c-1", "hive_column", vec![]).unwrap();
    let b = db.add_entity("c-2", "hive_column", vec![]).unwrap();

    db.add_classification(a, "PII", vec![("level", "high")]).unwrap();
    db.add_classification(b, "PII", vec![("level", "low")]).unwrap();

    let attrs = db.classification_attributes(a, "PII").unwrap().unwrap();
    assert_eq!(attrs, vec![("level".to_string(), "high".to_string())]);
    assert!(db.classification_attributes(a, "Metric").unwrap().is_none());
}

#[test]
fn test_remove_classification_updates_index() {
    let mut db = MetaStore::new();
    let a = db.add_entity("c-1", "hive_column", vec![]).unwrap();
    db.add_classification(a, "PII", vec![]).unwrap();

    assert!(db.remove_classification(a, "PII").unwrap());
    assert!(!db.remove_classification(a, "PII").unwrap());
    assert!(db
        .vertices_by_classification("hive_column", "PII")
        .unwrap()
        .is_empty());
    assert!(db.vertex_meta(a).unwrap().classifications.is_empty());
}

#[test]
fn test_reattaching_classification_replaces_attributes() {
    let mut db = MetaStore::new();
    let a = db.add_entity("c-1", "hive_column", vec![]).unwrap();
    db.add_classification(a, "PII", vec![("level", "low")]).unwrap();
    db.add_classification(a, "PII", vec![("level", "high")]).unwrap();

    assert_eq!(db.vertex_meta(a).unwrap().classifications.len(), 1);
    let attrs = db.classification_attributes(a, "PII").unwrap().unwrap();
    assert_eq!(attrs[0].1, "high");
}

// ============================================================================
// Snapshot Tests
// ============================================================================

#[test]
fn test_snapshot_roundtrip_through_file() {
    let mut db = MetaStore::new();
    let t = db
        .add_entity("t-1", "hive_table", vec![("name", "orders"), ("createTime", "1000")])
        .unwrap();
    db.add_classification(t, "Metric", vec![]).unwrap();
    db.mark_deleted(t).unwrap();

    let dir = tempdir().unwrap();
    let path = dir.path().join("store.mgst");
    std::fs::write(&path, db.to_bytes().unwrap()).unwrap();

    let restored = MetaStore::from_bytes(&std::fs::read(&path).unwrap()).unwrap();
    let view = restored.get_entity(t).unwrap();
    assert_eq!(view.guid, "t-1");
    assert_eq!(view.entity_type, "hive_table");
    assert_eq!(view.status, EntityStatus::Deleted);
    assert_eq!(view.attrs.get("createTime").map(String::as_str), Some("1000"));
    assert_eq!(view.classifications, vec!["Metric".to_string()]);
    assert!(restored
        .vertices_by_classification("hive_table", "Metric")
        .unwrap()
        .contains(t));
}

#[test]
fn test_snapshot_rejects_garbage() {
    assert!(matches!(
        MetaStore::from_bytes(b"nope"),
        Err(StoreError::Snapshot(_))
    ));

    let mut bytes = MetaStore::new().to_bytes().unwrap();
    bytes.truncate(bytes.len() - 1);
    assert!(MetaStore::from_bytes(&bytes).is_err());
}

// ============================================================================
// Index Properties
// ============================================================================

const TYPES: [&str; 3] = ["hive_table", "hive_column", "hive_process"];
const TAGS: [&str; 3] = ["PII", "Metric", "Dimension"];

fn naive_by_classification(db: &MetaStore, type_name: &str, tag: &str) -> RoaringBitmap {
    let mut out = RoaringBitmap::new();
    for id in 0..db.len() as u32 {
        let meta = db.vertex_meta(id).unwrap();
        if meta.type_name == type_name && meta.classifications.iter().any(|c| c == tag) {
            out.insert(id);
        }
    }
    out
}

fn naive_by_attribute(db: &MetaStore, type_name: &str, attr: &str, value: &str) -> RoaringBitmap {
    let mut out = RoaringBitmap::new();
    for id in 0..db.len() as u32 {
        let meta = db.vertex_meta(id).unwrap();
        if meta.type_name == type_name && db.attribute(id, attr).unwrap().as_deref() == Some(value) {
            out.insert(id);
        }
    }
    out
}

proptest! {
    #[test]
    fn indexed_lookups_match_naive_scans(
        entities in prop::collection::vec(
            (0usize..3, prop::collection::vec(0usize..3, 0..3), 0u8..4, 0u8..4),
            0..40,
        )
    ) {
        let mut db = MetaStore::new();
        for (i, (ty, tags, first, second)) in entities.iter().enumerate() {
            let owner = format!("u{first}");
            let id = db
                .add_entity(&format!("g-{i}"), TYPES[*ty], vec![("owner", owner.as_str())])
                .unwrap();
            // Overwrite half the time so the value index has to move entries.
            if second % 2 == 0 {
                db.upsert_entity_attr(id, "owner", &format!("u{second}")).unwrap();
            }
            for tag in tags {
                db.add_classification(id, TAGS[*tag], vec![]).unwrap();
            }
        }

        for ty in TYPES {
            for tag in TAGS {
                prop_assert_eq!(
                    db.vertices_by_classification(ty, tag).unwrap(),
                    naive_by_classification(&db, ty, tag)
                );
            }
            for owner in 0..4 {
                let owner = format!("u{owner}");
                prop_assert_eq!(
                    db.vertices_by_attribute(ty, "owner", &owner).unwrap(),
                    naive_by_attribute(&db, ty, "owner", &owner)
                );
            }
        }
    }
}
