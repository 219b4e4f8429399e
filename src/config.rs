//! Pipeline tuning knobs.
//!
//! All policy numbers live here rather than inside the stages so that tests
//! and deployments can tune them without touching pipeline code. Defaults
//! match the production values; [`PipelineConfig::from_env`] overlays
//! `RAGLINE_*` environment variables (a `.env` file is honored via `dotenvy`).

use std::time::Duration;

/// Configuration for a [`Pipeline`](crate::pipeline::Pipeline).
///
/// # Examples
///
/// ```
/// use ragline::config::PipelineConfig;
/// use std::time::Duration;
///
/// let config = PipelineConfig::default()
///     .with_similarity_threshold(0.85)
///     .with_request_timeout(Duration::from_secs(10));
/// assert_eq!(config.similarity_threshold, 0.85);
/// assert_eq!(config.top_k_documents, 4);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Minimum cosine similarity for a cached response to count as a hit.
    pub similarity_threshold: f32,
    /// Lifetime of semantic-cache entries.
    pub cache_ttl: Duration,
    /// Number of prior turns offered to the rephrase model.
    pub max_history_turns: usize,
    /// Number of document chunks retrieved per question.
    pub top_k_documents: usize,
    /// Upper bound on the cache-check and rephrase calls; on expiry the
    /// stage takes its fallback path instead of failing the invocation.
    pub request_timeout: Duration,
    /// Cap on the retrieved-context block handed to the answer model.
    pub max_context_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.9,
            cache_ttl: Duration::from_secs(604_800),
            max_history_turns: 10,
            top_k_documents: 4,
            request_timeout: Duration::from_secs(30),
            max_context_chars: 8_000,
        }
    }
}

impl PipelineConfig {
    /// Defaults overlaid with `RAGLINE_*` environment variables.
    ///
    /// Recognized variables: `RAGLINE_SIMILARITY_THRESHOLD`,
    /// `RAGLINE_CACHE_TTL_SECONDS`, `RAGLINE_MAX_HISTORY_TURNS`,
    /// `RAGLINE_TOP_K_DOCUMENTS`, `RAGLINE_REQUEST_TIMEOUT_SECONDS`,
    /// `RAGLINE_MAX_CONTEXT_CHARS`. Unparsable values are logged and the
    /// default is kept.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();

        if let Some(v) = read_env("RAGLINE_SIMILARITY_THRESHOLD") {
            config.similarity_threshold = v;
        }
        if let Some(secs) = read_env("RAGLINE_CACHE_TTL_SECONDS") {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(v) = read_env("RAGLINE_MAX_HISTORY_TURNS") {
            config.max_history_turns = v;
        }
        if let Some(v) = read_env("RAGLINE_TOP_K_DOCUMENTS") {
            config.top_k_documents = v;
        }
        if let Some(secs) = read_env("RAGLINE_REQUEST_TIMEOUT_SECONDS") {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = read_env("RAGLINE_MAX_CONTEXT_CHARS") {
            config.max_context_chars = v;
        }
        config
    }

    /// Set the cache-hit similarity threshold.
    #[must_use]
    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Set the semantic-cache entry lifetime.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the rephrase history window.
    #[must_use]
    pub fn with_max_history_turns(mut self, turns: usize) -> Self {
        self.max_history_turns = turns;
        self
    }

    /// Set the retrieval fan-out.
    #[must_use]
    pub fn with_top_k_documents(mut self, top_k: usize) -> Self {
        self.top_k_documents = top_k;
        self
    }

    /// Set the timeout for fallback-capable provider calls.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the retrieved-context size cap.
    #[must_use]
    pub fn with_max_context_chars(mut self, chars: usize) -> Self {
        self.max_context_chars = chars;
        self
    }
}

fn read_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(%name, %raw, "ignoring unparsable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_policy() {
        let config = PipelineConfig::default();
        assert_eq!(config.similarity_threshold, 0.9);
        assert_eq!(config.cache_ttl, Duration::from_secs(604_800));
        assert_eq!(config.max_history_turns, 10);
        assert_eq!(config.top_k_documents, 4);
    }

    #[test]
    fn builders_override_single_fields() {
        let config = PipelineConfig::default()
            .with_top_k_documents(2)
            .with_max_history_turns(3)
            .with_cache_ttl(Duration::ZERO);
        assert_eq!(config.top_k_documents, 2);
        assert_eq!(config.max_history_turns, 3);
        assert_eq!(config.cache_ttl, Duration::ZERO);
        // untouched knobs keep their defaults
        assert_eq!(config.similarity_threshold, 0.9);
    }
}
