//! Type and classification taxonomy.
//!
//! Entity types and classifications both form (possibly multiple-inheritance)
//! hierarchies. The registry records direct supertypes as declared and keeps a
//! reverse index of direct subtypes; [`TaxonomyResolver`] turns those into the
//! transitive sets search needs.
//!
//! Hierarchies come from user-supplied definitions and may be malformed
//! (`A < B < A`). Every walk keeps a visited set, so resolution terminates and
//! a cycle simply folds its members together.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Semantic type of an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    String,
    Long,
    Double,
    Boolean,
    /// Epoch milliseconds or RFC 3339.
    Date,
    Enum,
    /// Guid of another entity.
    Reference,
}

impl AttributeType {
    /// Types whose raw stored form is also their comparable form.
    pub fn is_textual(self) -> bool {
        matches!(self, AttributeType::String | AttributeType::Enum)
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttributeType::String => "string",
            AttributeType::Long => "long",
            AttributeType::Double => "double",
            AttributeType::Boolean => "boolean",
            AttributeType::Date => "date",
            AttributeType::Enum => "enum",
            AttributeType::Reference => "reference",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDef {
    pub name: String,
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    /// Whether the store's equality index may answer lookups on this attribute.
    #[serde(default)]
    pub indexed: bool,
}

impl AttributeDef {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            indexed: false,
        }
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityTypeDef {
    pub name: String,
    #[serde(default)]
    pub super_types: Vec<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeDef>,
}

impl EntityTypeDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            super_types: Vec::new(),
            attributes: Vec::new(),
        }
    }

    pub fn with_super_type(mut self, name: impl Into<String>) -> Self {
        self.super_types.push(name.into());
        self
    }

    pub fn with_attribute(mut self, attr: AttributeDef) -> Self {
        self.attributes.push(attr);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationDef {
    pub name: String,
    #[serde(default)]
    pub super_types: Vec<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeDef>,
}

impl ClassificationDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            super_types: Vec::new(),
            attributes: Vec::new(),
        }
    }

    pub fn with_super_type(mut self, name: impl Into<String>) -> Self {
        self.super_types.push(name.into());
        self
    }

    pub fn with_attribute(mut self, attr: AttributeDef) -> Self {
        self.attributes.push(attr);
        self
    }
}

/// Read-only view of the registered schema.
pub trait TypeRegistry {
    fn get_type(&self, name: &str) -> Option<&EntityTypeDef>;

    fn get_classification_def(&self, name: &str) -> Option<&ClassificationDef>;

    /// Direct subtypes of a classification.
    fn classification_sub_types(&self, name: &str) -> &[String];

    /// Direct subtypes of an entity type.
    fn entity_sub_types(&self, name: &str) -> &[String];
}

// ============================================================================
// In-memory registry
// ============================================================================

/// Serialized form of a [`Taxonomy`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyDefs {
    #[serde(default)]
    pub entity_types: Vec<EntityTypeDef>,
    #[serde(default)]
    pub classifications: Vec<ClassificationDef>,
}

/// In-memory [`TypeRegistry`].
#[derive(Debug, Clone, Default)]
pub struct Taxonomy {
    entity_types: AHashMap<String, EntityTypeDef>,
    classifications: AHashMap<String, ClassificationDef>,
    entity_subs: AHashMap<String, Vec<String>>,
    classification_subs: AHashMap<String, Vec<String>>,
}

impl Taxonomy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an entity type definition.
    pub fn register_entity_type(&mut self, def: EntityTypeDef) {
        let previous = self.entity_types.remove(&def.name);
        reindex_subtypes(
            &mut self.entity_subs,
            &def.name,
            previous.as_ref().map(|p| p.super_types.as_slice()),
            &def.super_types,
        );
        self.entity_types.insert(def.name.clone(), def);
    }

    /// Register (or replace) a classification definition.
    pub fn register_classification(&mut self, def: ClassificationDef) {
        let previous = self.classifications.remove(&def.name);
        reindex_subtypes(
            &mut self.classification_subs,
            &def.name,
            previous.as_ref().map(|p| p.super_types.as_slice()),
            &def.super_types,
        );
        self.classifications.insert(def.name.clone(), def);
    }

    pub fn from_defs(defs: TaxonomyDefs) -> Self {
        let mut taxonomy = Self::new();
        for def in defs.entity_types {
            taxonomy.register_entity_type(def);
        }
        for def in defs.classifications {
            taxonomy.register_classification(def);
        }
        taxonomy
    }

    /// Definitions sorted by name.
    pub fn to_defs(&self) -> TaxonomyDefs {
        let mut entity_types: Vec<EntityTypeDef> = self.entity_types.values().cloned().collect();
        entity_types.sort_by(|a, b| a.name.cmp(&b.name));
        let mut classifications: Vec<ClassificationDef> =
            self.classifications.values().cloned().collect();
        classifications.sort_by(|a, b| a.name.cmp(&b.name));
        TaxonomyDefs {
            entity_types,
            classifications,
        }
    }
}

fn reindex_subtypes(
    subs: &mut AHashMap<String, Vec<String>>,
    name: &str,
    previous_supers: Option<&[String]>,
    supers: &[String],
) {
    for sup in previous_supers.unwrap_or_default() {
        if let Some(children) = subs.get_mut(sup) {
            children.retain(|c| c != name);
        }
    }
    for sup in supers {
        let children = subs.entry(sup.clone()).or_default();
        if let Err(pos) = children.binary_search_by(|c| c.as_str().cmp(name)) {
            children.insert(pos, name.to_string());
        }
    }
}

impl TypeRegistry for Taxonomy {
    fn get_type(&self, name: &str) -> Option<&EntityTypeDef> {
        self.entity_types.get(name)
    }

    fn get_classification_def(&self, name: &str) -> Option<&ClassificationDef> {
        self.classifications.get(name)
    }

    fn classification_sub_types(&self, name: &str) -> &[String] {
        self.classification_subs
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn entity_sub_types(&self, name: &str) -> &[String] {
        self.entity_subs
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

impl Serialize for Taxonomy {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_defs().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Taxonomy {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        TaxonomyDefs::deserialize(deserializer).map(Taxonomy::from_defs)
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// An entity type with its transitive subtypes and full attribute schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedType {
    pub name: String,
    /// `name` plus every transitive subtype, sorted.
    pub type_and_sub_types: Vec<String>,
    /// Own and inherited attributes. A type's own declaration shadows an
    /// inherited one of the same name.
    pub attributes: BTreeMap<String, AttributeDef>,
    /// Attributes some subtype redeclares with a different semantic type.
    pub retyped_in_sub_types: BTreeSet<String>,
}

impl ResolvedType {
    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.get(name)
    }

    /// Look up an attribute a request filters, sorts or projects on. When
    /// subtypes are in scope the attribute must mean the same thing on all of
    /// them, since stored values are read with this type's definition.
    pub fn queryable_attribute(
        &self,
        name: &str,
        include_sub_types: bool,
    ) -> Result<&AttributeDef, ValidationError> {
        let attribute = self
            .attribute(name)
            .ok_or_else(|| ValidationError::UnknownAttribute {
                type_name: self.name.clone(),
                attribute: name.to_string(),
            })?;
        if include_sub_types && self.retyped_in_sub_types.contains(name) {
            return Err(ValidationError::RetypedAttribute {
                type_name: self.name.clone(),
                attribute: name.to_string(),
            });
        }
        Ok(attribute)
    }
}

/// A classification with its transitive subtypes and full attribute schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedClassification {
    pub name: String,
    /// `name` plus every transitive subtype, sorted.
    pub names: Vec<String>,
    pub attributes: BTreeMap<String, AttributeDef>,
}

/// Validates names against a [`TypeRegistry`] and computes hierarchy closures.
pub struct TaxonomyResolver<'t, R: TypeRegistry + ?Sized> {
    registry: &'t R,
}

impl<'t, R: TypeRegistry + ?Sized> TaxonomyResolver<'t, R> {
    pub fn new(registry: &'t R) -> Self {
        Self { registry }
    }

    pub fn resolve_type(&self, name: &str) -> Result<ResolvedType, ValidationError> {
        if self.registry.get_type(name).is_none() {
            return Err(ValidationError::UnknownType(name.to_string()));
        }

        let type_and_sub_types = closure(name, |n| self.registry.entity_sub_types(n));
        let attributes = self.entity_schema(name);

        let mut retyped_in_sub_types = BTreeSet::new();
        for sub in type_and_sub_types.iter().filter(|t| t.as_str() != name) {
            for (attr, def) in self.entity_schema(sub) {
                if attributes
                    .get(&attr)
                    .is_some_and(|own| own.attr_type != def.attr_type)
                {
                    retyped_in_sub_types.insert(attr);
                }
            }
        }
        if !retyped_in_sub_types.is_empty() {
            tracing::debug!(
                target: "metagraph::search",
                type_name = %name,
                retyped = ?retyped_in_sub_types,
                "subtypes redeclare attributes with another type"
            );
        }

        Ok(ResolvedType {
            name: name.to_string(),
            type_and_sub_types: type_and_sub_types.into_iter().collect(),
            attributes,
            retyped_in_sub_types,
        })
    }

    /// Own and inherited attributes of an entity type. Supertypes are walked
    /// nearest-first so own attributes win over inherited ones.
    fn entity_schema(&self, name: &str) -> BTreeMap<String, AttributeDef> {
        let mut attributes = BTreeMap::new();
        for ty in closure_ordered(name, |n| {
            self.registry
                .get_type(n)
                .map(|d| d.super_types.as_slice())
                .unwrap_or_default()
        }) {
            let Some(def) = self.registry.get_type(&ty) else {
                continue;
            };
            for attr in &def.attributes {
                attributes
                    .entry(attr.name.clone())
                    .or_insert_with(|| attr.clone());
            }
        }
        attributes
    }

    pub fn resolve_classification(
        &self,
        name: &str,
    ) -> Result<ResolvedClassification, ValidationError> {
        if self.registry.get_classification_def(name).is_none() {
            return Err(ValidationError::UnknownClassification(name.to_string()));
        }

        let names = closure(name, |n| self.registry.classification_sub_types(n));

        let mut attributes = BTreeMap::new();
        for class in closure_ordered(name, |n| {
            self.registry
                .get_classification_def(n)
                .map(|d| d.super_types.as_slice())
                .unwrap_or_default()
        }) {
            let Some(def) = self.registry.get_classification_def(&class) else {
                continue;
            };
            for attr in &def.attributes {
                attributes
                    .entry(attr.name.clone())
                    .or_insert_with(|| attr.clone());
            }
        }

        Ok(ResolvedClassification {
            name: name.to_string(),
            names: names.into_iter().collect(),
            attributes,
        })
    }
}

/// `start` plus everything reachable through `next`, cycle-safe.
fn closure<'a>(start: &str, next: impl Fn(&str) -> &'a [String]) -> BTreeSet<String> {
    closure_ordered(start, next).into_iter().collect()
}

/// Breadth-first variant of [`closure`] that keeps discovery order.
fn closure_ordered<'a>(start: &str, next: impl Fn(&str) -> &'a [String]) -> Vec<String> {
    let mut visited: BTreeSet<String> = BTreeSet::new();
    let mut order = Vec::new();
    let mut queue = std::collections::VecDeque::from([start.to_string()]);
    while let Some(current) = queue.pop_front() {
        if !visited.insert(current.clone()) {
            continue;
        }
        for n in next(&current) {
            if !visited.contains(n) {
                queue.push_back(n.clone());
            }
        }
        order.push(current);
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pii_taxonomy() -> Taxonomy {
        let mut t = Taxonomy::new();
        t.register_classification(
            ClassificationDef::new("PII")
                .with_attribute(AttributeDef::new("level", AttributeType::String)),
        );
        t.register_classification(ClassificationDef::new("Email").with_super_type("PII"));
        t.register_classification(ClassificationDef::new("WorkEmail").with_super_type("Email"));
        t.register_classification(ClassificationDef::new("Metric"));
        t
    }

    #[test]
    fn classification_resolves_to_transitive_subtypes() {
        let t = pii_taxonomy();
        let resolved = TaxonomyResolver::new(&t).resolve_classification("PII").unwrap();
        assert_eq!(resolved.names, vec!["Email", "PII", "WorkEmail"]);
    }

    #[test]
    fn subtype_inherits_classification_attributes() {
        let t = pii_taxonomy();
        let resolved = TaxonomyResolver::new(&t)
            .resolve_classification("WorkEmail")
            .unwrap();
        assert_eq!(resolved.names, vec!["WorkEmail"]);
        assert!(resolved.attributes.contains_key("level"));
    }

    #[test]
    fn unknown_classification_is_an_error() {
        let t = pii_taxonomy();
        let err = TaxonomyResolver::new(&t)
            .resolve_classification("NotExisting")
            .unwrap_err();
        assert_eq!(err.to_string(), "NotExisting: Unknown/invalid classification");
    }

    #[test]
    fn cyclic_hierarchy_terminates() {
        let mut t = Taxonomy::new();
        t.register_classification(ClassificationDef::new("A").with_super_type("C"));
        t.register_classification(ClassificationDef::new("B").with_super_type("A"));
        t.register_classification(ClassificationDef::new("C").with_super_type("B"));

        let resolved = TaxonomyResolver::new(&t).resolve_classification("A").unwrap();
        assert_eq!(resolved.names, vec!["A", "B", "C"]);
    }

    #[test]
    fn own_attribute_shadows_inherited_one() {
        let mut t = Taxonomy::new();
        t.register_entity_type(
            EntityTypeDef::new("DataSet")
                .with_attribute(AttributeDef::new("name", AttributeType::String))
                .with_attribute(AttributeDef::new("createTime", AttributeType::Long)),
        );
        t.register_entity_type(
            EntityTypeDef::new("hive_table")
                .with_super_type("DataSet")
                .with_attribute(AttributeDef::new("createTime", AttributeType::Date)),
        );

        let resolver = TaxonomyResolver::new(&t);
        let table = resolver.resolve_type("hive_table").unwrap();
        assert_eq!(table.attributes["createTime"].attr_type, AttributeType::Date);
        assert!(table.attribute("name").is_some());

        let dataset = resolver.resolve_type("DataSet").unwrap();
        assert_eq!(dataset.type_and_sub_types, vec!["DataSet", "hive_table"]);
        assert_eq!(
            dataset.retyped_in_sub_types.iter().collect::<Vec<_>>(),
            vec!["createTime"]
        );
        assert!(table.retyped_in_sub_types.is_empty());
    }

    #[test]
    fn retyped_attribute_needs_sub_types_excluded() {
        let mut t = Taxonomy::new();
        t.register_entity_type(
            EntityTypeDef::new("DataSet")
                .with_attribute(AttributeDef::new("name", AttributeType::String))
                .with_attribute(AttributeDef::new("createTime", AttributeType::Long)),
        );
        t.register_entity_type(
            EntityTypeDef::new("hive_table")
                .with_super_type("DataSet")
                .with_attribute(AttributeDef::new("createTime", AttributeType::Date)),
        );

        let dataset = TaxonomyResolver::new(&t).resolve_type("DataSet").unwrap();
        let err = dataset.queryable_attribute("createTime", true).unwrap_err();
        assert!(matches!(err, ValidationError::RetypedAttribute { .. }));
        assert_eq!(
            dataset
                .queryable_attribute("createTime", false)
                .unwrap()
                .attr_type,
            AttributeType::Long
        );
        assert!(dataset.queryable_attribute("name", true).is_ok());
        assert!(matches!(
            dataset.queryable_attribute("owner", false),
            Err(ValidationError::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn re_registering_moves_subtype_edges() {
        let mut t = pii_taxonomy();
        t.register_classification(ClassificationDef::new("Email").with_super_type("Metric"));

        let resolver = TaxonomyResolver::new(&t);
        assert_eq!(resolver.resolve_classification("PII").unwrap().names, vec!["PII"]);
        assert_eq!(
            resolver.resolve_classification("Metric").unwrap().names,
            vec!["Email", "Metric", "WorkEmail"]
        );
    }

    #[test]
    fn taxonomy_roundtrips_through_json() {
        let t = pii_taxonomy();
        let json = serde_json::to_string(&t).unwrap();
        let restored: Taxonomy = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.to_defs(), t.to_defs());
        assert_eq!(restored.classification_sub_types("PII"), ["Email".to_string()]);
    }
}
