//! Metagraph CLI
//!
//! - Ingest entity sources (listener events, direct-query outputs) into a store snapshot
//! - Search a store against a taxonomy and print the result as JSON

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use metagraph_search::{
    AttributePredicate, SearchConfig, SearchEngine, SearchRequest, SearchResult, SortOrder,
    Taxonomy,
};
use metagraph_store::{EntitySource, MetaStore};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "metagraph")]
#[command(author, version, about = "Metagraph: typed search over entity metadata")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply entity sources (JSON arrays of events) to a store snapshot.
    Ingest {
        #[command(flatten)]
        store: StoreArgs,

        /// Where to write the resulting snapshot.
        #[arg(long, short)]
        out: PathBuf,
    },

    /// Search entities of a type.
    Search(SearchArgs),
}

#[derive(Args)]
struct StoreArgs {
    /// Existing snapshot to start from.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// JSON files, each an array of entity sources, applied in order.
    #[arg(long = "entities")]
    entities: Vec<PathBuf>,
}

#[derive(Args)]
struct SearchArgs {
    #[command(flatten)]
    store: StoreArgs,

    /// Taxonomy JSON (`entity_types` and `classifications`).
    #[arg(long)]
    taxonomy: PathBuf,

    #[arg(long = "type")]
    type_name: String,

    /// Classification name, `*` for any, `_NOT_CLASSIFIED` for none.
    #[arg(long)]
    classification: Option<String>,

    /// Free-text query.
    #[arg(long)]
    query: Option<String>,

    /// Entity filter as `attribute:operator[:value]`; repeatable.
    #[arg(long = "filter")]
    filters: Vec<AttributePredicate>,

    /// Classification-attribute filter as `attribute:operator[:value]`.
    #[arg(long = "tag-filter")]
    tag_filters: Vec<AttributePredicate>,

    /// Attribute to include in each result; repeatable.
    #[arg(long = "attribute")]
    attributes: Vec<String>,

    #[arg(long)]
    sort: Option<String>,

    #[arg(long, default_value = "asc", value_parser = parse_order)]
    order: SortOrder,

    #[arg(long, allow_negative_numbers = true)]
    limit: Option<i64>,

    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    offset: i64,

    #[arg(long)]
    exclude_sub_types: bool,

    #[arg(long)]
    exclude_deleted: bool,
}

fn parse_order(s: &str) -> std::result::Result<SortOrder, String> {
    match s.to_ascii_lowercase().as_str() {
        "asc" | "ascending" => Ok(SortOrder::Ascending),
        "desc" | "descending" => Ok(SortOrder::Descending),
        other => Err(format!("unknown sort order {other:?} (expected asc|desc)")),
    }
}

impl SearchArgs {
    fn request(&self) -> SearchRequest {
        SearchRequest {
            type_name: self.type_name.clone(),
            classification: self.classification.clone(),
            query: self.query.clone(),
            entity_filters: self.filters.clone(),
            tag_filters: self.tag_filters.clone(),
            attributes: self.attributes.clone(),
            sort_by: self.sort.clone(),
            sort_order: self.order,
            limit: self.limit,
            offset: self.offset,
            exclude_sub_types: self.exclude_sub_types,
            exclude_deleted_entities: self.exclude_deleted,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Ingest { store, out } => {
            let db = load_store(&store)?;
            fs::write(&out, db.to_bytes()?)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("wrote {} entities to {}", db.len(), out.display());
        }
        Commands::Search(args) => {
            let result = run_search(&args)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }
    Ok(())
}

fn load_store(args: &StoreArgs) -> Result<MetaStore> {
    let mut db = match &args.snapshot {
        Some(path) => {
            let bytes =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            MetaStore::from_bytes(&bytes)
                .with_context(|| format!("failed to load snapshot {}", path.display()))?
        }
        None => MetaStore::new(),
    };
    for path in &args.entities {
        apply_sources(&mut db, path)?;
    }
    Ok(db)
}

fn apply_sources(db: &mut MetaStore, path: &Path) -> Result<()> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let sources: Vec<EntitySource> = serde_json::from_str(&text)
        .with_context(|| format!("invalid entity sources in {}", path.display()))?;
    let mut applied = 0usize;
    for source in sources {
        if let Some(notification) = source.into_notification() {
            applied += db.apply(notification)?.len();
        }
    }
    tracing::info!(path = %path.display(), applied, "applied entity sources");
    Ok(())
}

fn load_taxonomy(path: &Path) -> Result<Taxonomy> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid taxonomy in {}", path.display()))
}

fn run_search(args: &SearchArgs) -> Result<SearchResult> {
    if args.store.snapshot.is_none() && args.store.entities.is_empty() {
        return Err(anyhow!("search needs --snapshot and/or --entities"));
    }
    let taxonomy = load_taxonomy(&args.taxonomy)?;
    let db = load_store(&args.store)?;
    let config = SearchConfig::from_env()?;
    let result = SearchEngine::new(&taxonomy, &db)
        .with_config(config)
        .search(args.request())?;
    Ok(result)
}
