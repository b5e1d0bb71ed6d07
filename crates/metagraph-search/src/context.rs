use std::fmt;

use metagraph_store::GraphStore;

use crate::compiler::{self, CompiledFilter, ResidualPredicate, Strategy};
use crate::config::SearchConfig;
use crate::error::ValidationError;
use crate::request::{SearchRequest, SortOrder, ALL_CLASSIFICATIONS, NO_CLASSIFICATIONS};
use crate::taxonomy::{
    AttributeDef, ResolvedClassification, ResolvedType, TaxonomyResolver, TypeRegistry,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub attribute: AttributeDef,
    pub order: SortOrder,
}

/// A validated, compiled request bound to the graph it will run against.
///
/// Construction does all validation up front; once a context exists the
/// request is known to be well formed and only store failures remain.
pub struct SearchContext<'g, G: GraphStore + ?Sized> {
    graph: &'g G,
    request: SearchRequest,
    resolved_type: ResolvedType,
    classification: Option<ResolvedClassification>,
    filter: CompiledFilter,
    sort: Option<SortKey>,
    projected: Vec<AttributeDef>,
    limit: usize,
    offset: usize,
}

impl<G: GraphStore + ?Sized> fmt::Debug for SearchContext<'_, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchContext")
            .field("request", &self.request)
            .field("filter", &self.filter)
            .field("sort", &self.sort)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl<'g, G: GraphStore + ?Sized> SearchContext<'g, G> {
    pub fn new<R: TypeRegistry + ?Sized>(
        request: SearchRequest,
        registry: &R,
        graph: &'g G,
    ) -> Result<Self, ValidationError> {
        Self::with_config(request, registry, graph, &SearchConfig::default())
    }

    pub fn with_config<R: TypeRegistry + ?Sized>(
        request: SearchRequest,
        registry: &R,
        graph: &'g G,
        config: &SearchConfig,
    ) -> Result<Self, ValidationError> {
        let resolver = TaxonomyResolver::new(registry);
        let resolved_type = resolver.resolve_type(&request.type_name)?;
        let classification = match request.classification.as_deref() {
            None | Some(ALL_CLASSIFICATIONS) | Some(NO_CLASSIFICATIONS) => None,
            Some(name) => Some(resolver.resolve_classification(name)?),
        };

        let filter = compiler::compile(&request, &resolved_type, classification.as_ref())?;

        let lookup = |name: &str| {
            resolved_type
                .queryable_attribute(name, !request.exclude_sub_types)
                .cloned()
        };

        let sort = request
            .sort_by
            .as_deref()
            .map(|name| {
                lookup(name).map(|attribute| SortKey {
                    attribute,
                    order: request.sort_order,
                })
            })
            .transpose()?;

        let mut projected = request
            .attributes
            .iter()
            .map(|name| lookup(name))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(key) = &sort {
            projected.push(key.attribute.clone());
        }
        projected.sort_by(|a, b| a.name.cmp(&b.name));
        projected.dedup_by(|a, b| a.name == b.name);

        let limit = match request.limit {
            Some(l) if l < 0 => return Err(ValidationError::NegativeLimit(l)),
            Some(l) => config.effective_limit(Some(usize::try_from(l).unwrap_or(usize::MAX))),
            None => config.effective_limit(None),
        };
        let offset = usize::try_from(request.offset)
            .map_err(|_| ValidationError::NegativeOffset(request.offset))?;

        tracing::debug!(
            target: "metagraph::search",
            type_name = %resolved_type.name,
            strategies = ?filter.strategies.iter().map(ToString::to_string).collect::<Vec<_>>(),
            residual = !filter.residual.is_trivial(),
            limit,
            offset,
            "compiled search request"
        );

        Ok(Self {
            graph,
            request,
            resolved_type,
            classification,
            filter,
            sort,
            projected,
            limit,
            offset,
        })
    }

    pub fn graph(&self) -> &'g G {
        self.graph
    }

    pub fn request(&self) -> &SearchRequest {
        &self.request
    }

    pub fn resolved_type(&self) -> &ResolvedType {
        &self.resolved_type
    }

    /// Requested classification with its subtypes; `None` for wildcards or
    /// when no classification was asked for.
    pub fn classification(&self) -> Option<&ResolvedClassification> {
        self.classification.as_ref()
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.filter.strategies
    }

    pub fn residual(&self) -> &ResidualPredicate {
        &self.filter.residual
    }

    pub fn sort(&self) -> Option<&SortKey> {
        self.sort.as_ref()
    }

    /// Attributes projected into each result: the requested ones plus the
    /// sort attribute, sorted by name.
    pub fn projected_attributes(&self) -> &[AttributeDef] {
        &self.projected
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}
