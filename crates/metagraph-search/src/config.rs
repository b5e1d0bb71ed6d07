//! Search limits, read from the environment.

use anyhow::{anyhow, Result};

pub const METAGRAPH_SEARCH_DEFAULT_LIMIT_ENV: &str = "METAGRAPH_SEARCH_DEFAULT_LIMIT";
pub const METAGRAPH_SEARCH_MAX_LIMIT_ENV: &str = "METAGRAPH_SEARCH_MAX_LIMIT";

const DEFAULT_SEARCH_LIMIT: usize = 100;
const DEFAULT_MAX_SEARCH_LIMIT: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchConfig {
    /// Page size when a request leaves `limit` unset.
    pub default_limit: usize,
    /// Upper bound on any requested page size.
    pub max_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_SEARCH_LIMIT,
            max_limit: DEFAULT_MAX_SEARCH_LIMIT,
        }
    }
}

impl SearchConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name))
    }

    fn from_vars(
        var: impl Fn(&str) -> std::result::Result<String, std::env::VarError>,
    ) -> Result<Self> {
        let max_limit = env_usize(
            &var,
            METAGRAPH_SEARCH_MAX_LIMIT_ENV,
            DEFAULT_MAX_SEARCH_LIMIT,
            1,
            usize::MAX,
        )?;
        let default_limit = env_usize(
            &var,
            METAGRAPH_SEARCH_DEFAULT_LIMIT_ENV,
            DEFAULT_SEARCH_LIMIT.min(max_limit),
            0,
            max_limit,
        )?;
        Ok(Self {
            default_limit,
            max_limit,
        })
    }

    /// Page size for a request: the default when unset, clamped to the max.
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_limit).min(self.max_limit)
    }
}

fn env_usize(
    var: &impl Fn(&str) -> std::result::Result<String, std::env::VarError>,
    name: &str,
    default: usize,
    min: usize,
    max: usize,
) -> Result<usize> {
    match var(name) {
        Ok(v) => {
            let v = v.trim();
            if v.is_empty() {
                return Ok(default);
            }
            let parsed = v
                .parse::<usize>()
                .map_err(|_| anyhow!("invalid {name}={v:?} (expected integer)"))?;
            Ok(parsed.clamp(min, max))
        }
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(e) => Err(anyhow!("failed to read {name}: {e}")),
    }
}
