//! Search processor properties against a naive reference.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::thread;

use metagraph_search::value::{compare_sort_keys, parse_value};
use metagraph_search::{
    AttributeDef, AttributePredicate, AttributeType, ClassificationDef, EntityTypeDef, Operator,
    SearchConfig, SearchEngine, SearchError, SearchRequest, SortOrder, Taxonomy, TaxonomyResolver,
};
use metagraph_store::{GraphStore, MetaStore, StoreError, VertexId, VertexMeta};
use parking_lot::RwLock;
use proptest::prelude::*;
use roaring::RoaringBitmap;

const TYPES: [&str; 2] = ["hive_table", "hive_view"];
const TAGS: [&str; 3] = ["PII", "Metric", "Email"];
const OWNERS: [&str; 3] = ["etl", "bi", "ops"];

fn taxonomy() -> Taxonomy {
    let mut t = Taxonomy::new();
    t.register_entity_type(
        EntityTypeDef::new("hive_table")
            .with_attribute(AttributeDef::new("owner", AttributeType::String).indexed())
            .with_attribute(AttributeDef::new("createTime", AttributeType::Date))
            .with_attribute(AttributeDef::new("rows", AttributeType::Long)),
    );
    t.register_entity_type(EntityTypeDef::new("hive_view").with_super_type("hive_table"));
    t.register_classification(ClassificationDef::new("PII"));
    t.register_classification(ClassificationDef::new("Email").with_super_type("PII"));
    t.register_classification(ClassificationDef::new("Metric"));
    t
}

fn unbounded() -> SearchConfig {
    SearchConfig {
        default_limit: 100_000,
        max_limit: 100_000,
    }
}

#[derive(Debug, Clone)]
struct Row {
    ty: usize,
    owner: Option<usize>,
    created: Option<i64>,
    rows: Option<u8>,
    tags: Vec<usize>,
    deleted: bool,
}

fn row_strategy() -> impl Strategy<Value = Row> {
    (
        0usize..2,
        prop::option::of(0usize..3),
        prop::option::of(0i64..20),
        prop::option::of(any::<u8>()),
        prop::collection::vec(0usize..3, 0..3),
        any::<bool>(),
    )
        .prop_map(|(ty, owner, created, rows, tags, deleted)| Row {
            ty,
            owner,
            created,
            rows,
            tags,
            deleted,
        })
}

fn build(rows: &[Row]) -> MetaStore {
    let mut db = MetaStore::new();
    for (i, row) in rows.iter().enumerate() {
        let owner = row.owner.map(|o| OWNERS[o].to_string());
        let created = row.created.map(|c| (c * 1000).to_string());
        let count = row.rows.map(|r| r.to_string());
        let mut attrs = Vec::new();
        if let Some(v) = &owner {
            attrs.push(("owner", v.as_str()));
        }
        if let Some(v) = &created {
            attrs.push(("createTime", v.as_str()));
        }
        if let Some(v) = &count {
            attrs.push(("rows", v.as_str()));
        }
        let id = db
            .add_entity(&format!("g-{i}"), TYPES[row.ty], attrs)
            .unwrap();
        for tag in &row.tags {
            db.add_classification(id, TAGS[*tag], vec![]).unwrap();
        }
        if row.deleted {
            db.mark_deleted(id).unwrap();
        }
    }
    db
}

#[derive(Debug, Clone)]
struct Query {
    type_name: usize,
    classification: Option<usize>,
    owner: Option<usize>,
    min_rows: Option<u8>,
    sort: Option<(bool, SortOrder)>,
    exclude_sub_types: bool,
    exclude_deleted: bool,
}

fn query_strategy() -> impl Strategy<Value = Query> {
    (
        0usize..2,
        prop::option::of(0usize..3),
        prop::option::of(0usize..3),
        prop::option::of(any::<u8>()),
        prop::option::of((
            any::<bool>(),
            prop_oneof![Just(SortOrder::Ascending), Just(SortOrder::Descending)],
        )),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(
            |(type_name, classification, owner, min_rows, sort, exclude_sub_types, exclude_deleted)| {
                Query {
                    type_name,
                    classification,
                    owner,
                    min_rows,
                    sort,
                    exclude_sub_types,
                    exclude_deleted,
                }
            },
        )
}

impl Query {
    fn request(&self) -> SearchRequest {
        let mut request = SearchRequest::new(TYPES[self.type_name]);
        if let Some(c) = self.classification {
            request = request.with_classification(TAGS[c]);
        }
        if let Some(o) = self.owner {
            request = request.with_filter(AttributePredicate::new("owner", Operator::Eq, OWNERS[o]));
        }
        if let Some(m) = self.min_rows {
            request = request.with_filter(AttributePredicate::new(
                "rows",
                Operator::Gte,
                m.to_string(),
            ));
        }
        if let Some((by_created, order)) = self.sort {
            let attr = if by_created { "createTime" } else { "rows" };
            request = request.sorted_by(attr, order);
        }
        if self.exclude_sub_types {
            request = request.excluding_sub_types();
        }
        if self.exclude_deleted {
            request = request.excluding_deleted();
        }
        request
    }

    /// Reference evaluation straight off the rows.
    fn naive(&self, rows: &[Row]) -> Vec<VertexId> {
        let allowed_types: Vec<usize> = match (self.type_name, self.exclude_sub_types) {
            (0, false) => vec![0, 1],
            (t, _) => vec![t],
        };
        let allowed_tags: Vec<usize> = match self.classification {
            Some(0) => vec![0, 2],
            Some(c) => vec![c],
            None => Vec::new(),
        };
        let mut hits: Vec<VertexId> = rows
            .iter()
            .enumerate()
            .filter(|(_, r)| allowed_types.contains(&r.ty))
            .filter(|(_, r)| {
                self.classification.is_none() || r.tags.iter().any(|t| allowed_tags.contains(t))
            })
            .filter(|(_, r)| self.owner.map_or(true, |o| r.owner == Some(o)))
            .filter(|(_, r)| self.min_rows.map_or(true, |m| r.rows.is_some_and(|v| v >= m)))
            .filter(|(_, r)| !(self.exclude_deleted && r.deleted))
            .map(|(i, _)| i as VertexId)
            .collect();

        if let Some((by_created, order)) = self.sort {
            let key = |id: VertexId| {
                let r = &rows[id as usize];
                if by_created {
                    r.created
                        .and_then(|c| parse_value(AttributeType::Date, &(c * 1000).to_string()))
                } else {
                    r.rows
                        .and_then(|v| parse_value(AttributeType::Long, &v.to_string()))
                }
            };
            hits.sort_by(|a, b| {
                compare_sort_keys(key(*a).as_ref(), key(*b).as_ref(), order).then(a.cmp(b))
            });
        }
        hits
    }
}

fn run_ids(db: &MetaStore, request: SearchRequest) -> (usize, Vec<VertexId>) {
    let t = taxonomy();
    let engine = SearchEngine::new(&t, db).with_config(unbounded());
    let result = engine.search(request).unwrap();
    (
        result.count,
        result.results.iter().map(|h| h.id).collect(),
    )
}

proptest! {
    #[test]
    fn search_matches_naive_reference(
        rows in prop::collection::vec(row_strategy(), 0..40),
        query in query_strategy(),
    ) {
        let db = build(&rows);
        let expected = query.naive(&rows);
        let (count, ids) = run_ids(&db, query.request());
        prop_assert_eq!(count, expected.len());
        prop_assert_eq!(ids, expected);
    }

    #[test]
    fn pages_are_windows_of_the_full_ordering(
        rows in prop::collection::vec(row_strategy(), 0..40),
        query in query_strategy(),
        offset in 0i64..45,
        limit in 0i64..15,
    ) {
        let db = build(&rows);
        let (full_count, full) = run_ids(&db, query.request());
        let (count, page) = run_ids(&db, query.request().with_offset(offset).with_limit(limit));

        prop_assert_eq!(count, full_count);
        let expected: Vec<VertexId> = full
            .iter()
            .copied()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        prop_assert_eq!(page, expected);
    }

    #[test]
    fn sorted_results_are_monotone_with_id_tie_break(
        rows in prop::collection::vec(row_strategy(), 0..40),
        descending in any::<bool>(),
    ) {
        let db = build(&rows);
        let order = if descending { SortOrder::Descending } else { SortOrder::Ascending };
        let t = taxonomy();
        let result = SearchEngine::new(&t, &db)
            .with_config(unbounded())
            .search(SearchRequest::new("hive_table").sorted_by("createTime", order))
            .unwrap();

        for pair in result.results.windows(2) {
            let ord = compare_sort_keys(
                pair[0].attribute("createTime"),
                pair[1].attribute("createTime"),
                order,
            );
            prop_assert!(ord != Ordering::Greater);
            if ord == Ordering::Equal {
                prop_assert!(pair[0].id < pair[1].id);
            }
        }
    }

    #[test]
    fn resolver_terminates_on_arbitrary_hierarchies(
        edges in prop::collection::vec((0usize..6, 0usize..6), 0..20),
    ) {
        let name = |i: usize| format!("C{i}");
        let mut supers: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (child, parent) in &edges {
            supers.entry(*child).or_default().push(*parent);
        }
        let mut t = Taxonomy::new();
        for i in 0..6 {
            let mut def = ClassificationDef::new(name(i));
            for p in supers.get(&i).into_iter().flatten() {
                def = def.with_super_type(name(*p));
            }
            t.register_classification(def);
        }

        let resolver = TaxonomyResolver::new(&t);
        for i in 0..6 {
            // Naive closure: fixpoint over "j reaches i through super edges".
            let mut reach: BTreeSet<usize> = BTreeSet::from([i]);
            loop {
                let before = reach.len();
                for (child, parent) in &edges {
                    if reach.contains(parent) {
                        reach.insert(*child);
                    }
                }
                if reach.len() == before {
                    break;
                }
            }
            let expected: Vec<String> = reach.into_iter().map(name).collect();
            let resolved = resolver.resolve_classification(&name(i)).unwrap();
            prop_assert_eq!(resolved.names, expected);
        }
    }
}

// ============================================================================
// Store Failures
// ============================================================================

/// Delegates to a real store but fails classification lookups.
struct FlakyStore(MetaStore);

impl GraphStore for FlakyStore {
    fn vertices_by_type(&self, type_name: &str) -> Result<RoaringBitmap, StoreError> {
        self.0.vertices_by_type(type_name)
    }

    fn vertices_by_classification(&self, _: &str, _: &str) -> Result<RoaringBitmap, StoreError> {
        Err(StoreError::Unavailable("classification index offline".to_string()))
    }

    fn vertices_by_attribute(
        &self,
        type_name: &str,
        attribute: &str,
        value: &str,
    ) -> Result<RoaringBitmap, StoreError> {
        self.0.vertices_by_attribute(type_name, attribute, value)
    }

    fn vertex_meta(&self, vertex: VertexId) -> Result<VertexMeta, StoreError> {
        self.0.vertex_meta(vertex)
    }

    fn attribute(&self, vertex: VertexId, name: &str) -> Result<Option<String>, StoreError> {
        self.0.attribute(vertex, name)
    }

    fn classification_attributes(
        &self,
        vertex: VertexId,
        classification: &str,
    ) -> Result<Option<Vec<(String, String)>>, StoreError> {
        self.0.classification_attributes(vertex, classification)
    }
}

#[test]
fn store_failure_propagates_instead_of_returning_empty() {
    let mut db = MetaStore::new();
    let id = db.add_entity("t-1", "hive_table", vec![]).unwrap();
    db.add_classification(id, "Metric", vec![]).unwrap();
    let flaky = FlakyStore(db);
    let t = taxonomy();
    let engine = SearchEngine::new(&t, &flaky);

    let err = engine
        .search(SearchRequest::new("hive_table").with_classification("Metric"))
        .unwrap_err();
    assert!(matches!(err, SearchError::StoreUnavailable(StoreError::Unavailable(_))));
    assert!(!err.is_bad_request());

    // Requests that need no classification lookup still succeed.
    let result = engine.search(SearchRequest::new("hive_table")).unwrap();
    assert_eq!(result.count, 1);
}

#[test]
fn validation_fails_before_touching_the_store() {
    let flaky = FlakyStore(MetaStore::new());
    let t = taxonomy();
    let err = SearchEngine::new(&t, &flaky)
        .search(SearchRequest::new("hive_table").with_classification("NotExisting"))
        .unwrap_err();
    assert!(err.is_bad_request());
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn concurrent_searches_see_consistent_snapshots() {
    let store = Arc::new(RwLock::new(MetaStore::new()));
    let taxonomy = Arc::new(taxonomy());

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in 0..200 {
                let mut db = store.write();
                let id = db
                    .add_entity(&format!("g-{i}"), TYPES[i % 2], vec![("owner", OWNERS[i % 3])])
                    .unwrap();
                if i % 4 == 0 {
                    db.add_classification(id, "Metric", vec![]).unwrap();
                }
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            let taxonomy = Arc::clone(&taxonomy);
            thread::spawn(move || {
                for _ in 0..50 {
                    let db = store.read();
                    let result = SearchEngine::new(taxonomy.as_ref(), &*db)
                        .with_config(unbounded())
                        .search(SearchRequest::new("hive_table").with_classification("Metric"))
                        .unwrap();
                    assert_eq!(result.count, result.results.len());
                    assert!(result
                        .results
                        .iter()
                        .all(|h| h.classification_names.iter().any(|c| c == "Metric")));
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    let db = store.read();
    let result = SearchEngine::new(taxonomy.as_ref(), &*db)
        .search(SearchRequest::new("hive_table").with_classification("Metric"))
        .unwrap();
    assert_eq!(result.count, 50);
}
