use std::time::Instant;

use metagraph_store::GraphStore;
use serde::Serialize;

use crate::config::SearchConfig;
use crate::context::SearchContext;
use crate::error::Result;
use crate::processor::EntitySearchProcessor;
use crate::projector::EntityHeader;
use crate::request::SearchRequest;
use crate::taxonomy::TypeRegistry;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    /// Total matches, ignoring pagination.
    pub count: usize,
    pub results: Vec<EntityHeader>,
}

/// Entry point: validates, compiles and runs requests against one graph.
///
/// The count and the page are computed in two passes over the graph. Callers
/// that mutate the graph concurrently should hold a read lock across
/// [`SearchEngine::search`] if the two must agree.
pub struct SearchEngine<'a, R: TypeRegistry + ?Sized, G: GraphStore + ?Sized> {
    registry: &'a R,
    graph: &'a G,
    config: SearchConfig,
}

impl<'a, R: TypeRegistry + ?Sized, G: GraphStore + ?Sized> SearchEngine<'a, R, G> {
    pub fn new(registry: &'a R, graph: &'a G) -> Self {
        Self {
            registry,
            graph,
            config: SearchConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SearchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn context(&self, request: SearchRequest) -> Result<SearchContext<'a, G>> {
        Ok(SearchContext::with_config(
            request,
            self.registry,
            self.graph,
            &self.config,
        )?)
    }

    pub fn search(&self, request: SearchRequest) -> Result<SearchResult> {
        let started = Instant::now();
        let type_name = request.type_name.clone();
        let classification = request.classification.clone().unwrap_or_default();
        let processor = EntitySearchProcessor::new(self.context(request)?);
        let (count, results) = match processor
            .result_count()
            .and_then(|count| Ok((count, processor.execute()?)))
        {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(
                    target: "metagraph::search",
                    %type_name,
                    %classification,
                    error = %err,
                    "search aborted"
                );
                return Err(err);
            }
        };
        tracing::info!(
            target: "metagraph::search",
            %type_name,
            %classification,
            count,
            returned = results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search completed"
        );
        Ok(SearchResult { count, results })
    }
}
