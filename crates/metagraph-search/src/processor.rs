//! Executes a compiled [`SearchContext`].
//!
//! Strategies are evaluated in plan order and intersected; evaluation stops
//! as soon as the running intersection is empty. Surviving candidates are
//! checked against the residual predicate, ordered, paginated, and only the
//! page is projected.

use std::collections::BTreeMap;

use metagraph_store::{EntityStatus, GraphStore, StoreError, VertexId};
use roaring::RoaringBitmap;

use crate::compiler::{ClassificationCheck, CompiledPredicate, ResidualPredicate, Strategy};
use crate::context::SearchContext;
use crate::error::Result;
use crate::projector::{typed_or_warn, EntityHeader, ResultProjector};
use crate::value::{compare_sort_keys, TypedValue};

pub struct EntitySearchProcessor<'g, G: GraphStore + ?Sized> {
    context: SearchContext<'g, G>,
    projector: ResultProjector<'g, G>,
}

impl<'g, G: GraphStore + ?Sized> EntitySearchProcessor<'g, G> {
    pub fn new(context: SearchContext<'g, G>) -> Self {
        let projector = ResultProjector::new(context.graph());
        Self { context, projector }
    }

    pub fn context(&self) -> &SearchContext<'g, G> {
        &self.context
    }

    /// Number of matching entities, ignoring pagination.
    pub fn result_count(&self) -> Result<usize> {
        let candidates = self.candidates()?;
        if self.context.residual().is_trivial() {
            return Ok(candidates.len() as usize);
        }
        let mut count = 0;
        for vertex in &candidates {
            if self.residual_matches(vertex)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// The requested page of matching entities.
    pub fn execute(&self) -> Result<Vec<EntityHeader>> {
        let page = self.page_ids()?;
        tracing::debug!(
            target: "metagraph::search",
            returned = page.len(),
            "projecting search page"
        );
        let requested = self.context.projected_attributes();
        page.into_iter()
            .map(|vertex| Ok(self.projector.project(vertex, requested)?))
            .collect()
    }

    /// Vertex ids of the requested page, in result order.
    pub fn page_ids(&self) -> Result<Vec<VertexId>> {
        let offset = self.context.offset();
        let limit = self.context.limit();
        let candidates = self.candidates()?;

        let Some(sort) = self.context.sort() else {
            // Bitmap iteration is already in id order; stop once the page is full.
            let mut page = Vec::with_capacity(limit.min(candidates.len() as usize));
            let mut skipped = 0;
            for vertex in &candidates {
                if page.len() == limit {
                    break;
                }
                if !self.residual_matches(vertex)? {
                    continue;
                }
                if skipped < offset {
                    skipped += 1;
                    continue;
                }
                page.push(vertex);
            }
            return Ok(page);
        };

        let mut keyed: Vec<(VertexId, Option<TypedValue>)> = Vec::new();
        for vertex in &candidates {
            if self.residual_matches(vertex)? {
                keyed.push((vertex, self.projector.typed_attribute(vertex, &sort.attribute)?));
            }
        }
        keyed.sort_by(|(a_id, a), (b_id, b)| {
            compare_sort_keys(a.as_ref(), b.as_ref(), sort.order).then_with(|| a_id.cmp(b_id))
        });
        Ok(keyed
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(vertex, _)| vertex)
            .collect())
    }

    fn candidates(&self) -> std::result::Result<RoaringBitmap, StoreError> {
        let mut acc: Option<RoaringBitmap> = None;
        for strategy in self.context.strategies() {
            let found = self.evaluate(strategy)?;
            let next = match acc {
                Some(prev) => prev & found,
                None => found,
            };
            let exhausted = next.is_empty();
            acc = Some(next);
            if exhausted {
                tracing::trace!(
                    target: "metagraph::search",
                    strategy = %strategy,
                    "no candidates left; skipping remaining strategies"
                );
                break;
            }
        }
        Ok(acc.unwrap_or_default())
    }

    fn evaluate(&self, strategy: &Strategy) -> std::result::Result<RoaringBitmap, StoreError> {
        let graph = self.context.graph();
        let mut found = RoaringBitmap::new();
        match strategy {
            Strategy::AttributeLookup {
                type_names,
                attribute,
                values,
            } => {
                for ty in type_names {
                    for value in values {
                        found |= graph.vertices_by_attribute(ty, attribute, value)?;
                    }
                }
            }
            Strategy::ClassificationLookup {
                type_names,
                classifications,
            } => {
                for ty in type_names {
                    for class in classifications {
                        found |= graph.vertices_by_classification(ty, class)?;
                    }
                }
            }
            Strategy::TypeScan { type_names } => {
                for ty in type_names {
                    found |= graph.vertices_by_type(ty)?;
                }
            }
        }
        Ok(found)
    }

    fn residual_matches(&self, vertex: VertexId) -> std::result::Result<bool, StoreError> {
        let residual = self.context.residual();
        if residual.is_trivial() {
            return Ok(true);
        }
        let graph = self.context.graph();

        if residual.exclude_deleted || residual.classification.is_some() {
            let meta = graph.vertex_meta(vertex)?;
            if residual.exclude_deleted && meta.status == EntityStatus::Deleted {
                return Ok(false);
            }
            match &residual.classification {
                None => {}
                Some(ClassificationCheck::Any) => {
                    if meta.classifications.is_empty() {
                        return Ok(false);
                    }
                }
                Some(ClassificationCheck::Unclassified) => {
                    if !meta.classifications.is_empty() {
                        return Ok(false);
                    }
                }
                Some(ClassificationCheck::Tagged { names, predicates }) => {
                    let mut satisfied = false;
                    for class in meta.classifications.iter().filter(|c| names.contains(c)) {
                        if self.tag_matches(vertex, class, predicates)? {
                            satisfied = true;
                            break;
                        }
                    }
                    if !satisfied {
                        return Ok(false);
                    }
                }
            }
        }

        for predicate in &residual.attribute_predicates {
            let value = self.projector.typed_attribute(vertex, &predicate.attribute)?;
            if !predicate.matches(value.as_ref()) {
                return Ok(false);
            }
        }

        self.text_matches(vertex, residual)
    }

    fn tag_matches(
        &self,
        vertex: VertexId,
        classification: &str,
        predicates: &[CompiledPredicate],
    ) -> std::result::Result<bool, StoreError> {
        let Some(attrs) = self
            .context
            .graph()
            .classification_attributes(vertex, classification)?
        else {
            return Ok(false);
        };
        let attrs: BTreeMap<String, String> = attrs.into_iter().collect();
        Ok(predicates.iter().all(|p| {
            let value = attrs
                .get(&p.attribute.name)
                .and_then(|raw| typed_or_warn(vertex, &p.attribute, raw));
            p.matches(value.as_ref())
        }))
    }

    fn text_matches(
        &self,
        vertex: VertexId,
        residual: &ResidualPredicate,
    ) -> std::result::Result<bool, StoreError> {
        if residual.text_tokens.is_empty() {
            return Ok(true);
        }
        let graph = self.context.graph();
        let mut haystack = Vec::with_capacity(residual.text_attributes.len());
        for attr in &residual.text_attributes {
            if let Some(raw) = graph.attribute(vertex, &attr.name)? {
                haystack.push(raw.to_lowercase());
            }
        }
        Ok(residual
            .text_tokens
            .iter()
            .all(|token| haystack.iter().any(|value| value.contains(token.as_str()))))
    }
}
