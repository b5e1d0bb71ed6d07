//! Metagraph search: typed entity search over a [`metagraph_store::GraphStore`].
//!
//! A request names an entity type and optionally a classification, attribute
//! filters, free text, a sort attribute and a page window. Serving it is a
//! short pipeline:
//!
//! 1. **Resolve**: validate names against the taxonomy and expand types and
//!    classifications to include their subtypes
//! 2. **Compile**: split filters into index strategies and a residual predicate
//! 3. **Execute**: intersect strategy results, apply the residual, order by the
//!    typed sort key (missing values last, ties by vertex id), paginate
//! 4. **Project**: build result headers for the page only
//!
//! Validation happens entirely in steps 1 and 2, so a bad request never touches
//! the graph. Store failures are reported as [`SearchError::StoreUnavailable`].
//!
//! ## Module Organization
//!
//! - `taxonomy`: type and classification registry, subtype resolution
//! - `request`: the search request model
//! - `compiler`: strategy selection and residual predicates
//! - `context`: a validated request bound to a graph
//! - `processor`: counting and paginated execution
//! - `projector`: result headers
//! - `engine`: the one-call search entry point

pub mod compiler;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod processor;
pub mod projector;
pub mod request;
pub mod taxonomy;
pub mod value;

pub use compiler::{ClassificationCheck, CompiledPredicate, ResidualPredicate, Strategy};
pub use config::SearchConfig;
pub use context::{SearchContext, SortKey};
pub use engine::{SearchEngine, SearchResult};
pub use error::{Result, SearchError, ValidationError};
pub use processor::EntitySearchProcessor;
pub use projector::{EntityHeader, ResultProjector};
pub use request::{
    AttributePredicate, Operator, SearchRequest, SortOrder, ALL_CLASSIFICATIONS,
    NO_CLASSIFICATIONS,
};
pub use taxonomy::{
    AttributeDef, AttributeType, ClassificationDef, EntityTypeDef, ResolvedClassification,
    ResolvedType, Taxonomy, TaxonomyDefs, TaxonomyResolver, TypeRegistry,
};
pub use value::TypedValue;
