//! Grounding router: the policy that decides what evidence backs an answer.
//!
//! # Policy (local-first, confidence-gated)
//!
//! ```text
//! query ──▶ code? ──▶ embedding (cache → provider) ──▶ hybrid search
//!                                                          │
//!        ┌─────────────────────────────────────────────────┤
//!        ▼                                                 ▼
//!  chunk names the exact code?              best fused score ≥ floor?
//!    yes → local, confidence 1.0              yes → local
//!                                             no, code detected → portal scrape
//!                                             no, no code → none
//! ```
//!
//! The portal is only consulted when local evidence is weak and the query
//! names a standard code. When the scrape yields a passage, any below-floor
//! local chunks ride along as supplementary context (`mixed`); on their own
//! they never ground a result.
//!
//! Source failures (embedding, search, scrape) degrade to "that source is
//! empty". Only malformed input is an error.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cache::EmbeddingCache;
use crate::code::{extract_code, find_codes};
use crate::config::{Config, RouterConfig};
use crate::embedding::{create_embedder, Embedder};
use crate::models::{GroundingResult, Query, RetrievedChunk};
use crate::portal::WebScraper;
use crate::search::{create_backend, HybridSearchClient};
use crate::{db, migrate};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RouterError {
    #[error("query must not be empty")]
    EmptyQuery,
    #[error("scope ids must be non-empty strings")]
    InvalidScope,
    #[error("'{0}' is not a recognizable standard code")]
    InvalidCode(String),
    #[error("no verified context found")]
    Ungrounded,
}

/// Tuning for [`GroundingRouter`].
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub confidence_floor: f64,
    /// Wall-clock budget for one resolution.
    pub budget: Duration,
    pub embed_timeout: Duration,
    pub search_timeout: Duration,
    /// Maximum local chunks requested from the index.
    pub limit: usize,
    pub keep_low_confidence_local: bool,
}

impl RouterSettings {
    pub fn from_config(config: &RouterConfig, limit: usize) -> Self {
        Self {
            confidence_floor: config.confidence_floor,
            budget: Duration::from_millis(config.budget_ms),
            embed_timeout: Duration::from_millis(config.embed_timeout_ms),
            search_timeout: Duration::from_millis(config.search_timeout_ms),
            limit,
            keep_low_confidence_local: config.keep_low_confidence_local,
        }
    }
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self::from_config(&RouterConfig::default(), 8)
    }
}

pub struct GroundingRouter {
    cache: EmbeddingCache,
    embedder: Arc<dyn Embedder>,
    search: HybridSearchClient,
    scraper: Option<Arc<WebScraper>>,
    settings: RouterSettings,
}

impl GroundingRouter {
    pub fn new(
        cache: EmbeddingCache,
        embedder: Arc<dyn Embedder>,
        search: HybridSearchClient,
        scraper: Option<WebScraper>,
        settings: RouterSettings,
    ) -> Self {
        Self {
            cache,
            embedder,
            search,
            scraper: scraper.filter(WebScraper::has_resources).map(Arc::new),
            settings,
        }
    }

    /// Wire every collaborator from configuration.
    ///
    /// Opens (and migrates) the SQLite database shared by the embedding
    /// cache and the local index.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;

        let cache = EmbeddingCache::from_pool(pool.clone(), config);
        let embedder = create_embedder(&config.embedding)?;
        let backend = create_backend(&config.retrieval, pool)?;
        let search = HybridSearchClient::from_config(backend, &config.retrieval);
        let scraper = WebScraper::http(&config.scraper)?;

        info!(
            backend = search.backend_name(),
            embedder = embedder.model_name(),
            portal_resources = config.scraper.resources.len(),
            "grounding router ready"
        );

        Ok(Self::new(
            cache,
            embedder,
            search,
            Some(scraper),
            RouterSettings::from_config(&config.router, config.retrieval.final_limit),
        ))
    }

    /// Convenience form of [`resolve`](Self::resolve).
    pub async fn resolve_grounding(
        &self,
        text: &str,
        scope_ids: Option<&[String]>,
        explicit_code: Option<&str>,
    ) -> Result<GroundingResult, RouterError> {
        let query = Query {
            text: text.to_string(),
            scope_ids: scope_ids.map(<[String]>::to_vec).unwrap_or_default(),
            explicit_code: explicit_code.map(str::to_string),
        };
        self.resolve(&query).await
    }

    /// Decide what evidence grounds `query`.
    ///
    /// Deterministic for fixed query, scope, cache state, index contents,
    /// and portal content.
    pub async fn resolve(&self, query: &Query) -> Result<GroundingResult, RouterError> {
        let started = Instant::now();
        let text = query.text.trim();
        if text.is_empty() {
            return Err(RouterError::EmptyQuery);
        }
        if query.scope_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(RouterError::InvalidScope);
        }
        let code = match query.explicit_code.as_deref() {
            Some(raw) => {
                Some(extract_code(raw).ok_or_else(|| RouterError::InvalidCode(raw.to_string()))?)
            }
            None => extract_code(text),
        };

        let embedding = self.query_embedding(text, started).await;
        let search_text = lexical_text(text, code.as_deref());
        let local = self
            .local_chunks(&search_text, embedding.as_deref(), &query.scope_ids, started)
            .await;

        if let Some(code) = code.as_deref() {
            let exact: Vec<RetrievedChunk> = local
                .iter()
                .filter(|c| find_codes(&c.text).iter().any(|found| found == code))
                .cloned()
                .collect();
            if !exact.is_empty() {
                debug!(code, chunks = exact.len(), "exact code match in local index");
                return Ok(GroundingResult::new(
                    rerank(exact),
                    None,
                    1.0,
                    Some(code.to_string()),
                ));
            }
        }

        let best = local.first().map(|c| c.score).unwrap_or(0.0);
        if !local.is_empty() && best >= self.settings.confidence_floor {
            debug!(best, chunks = local.len(), "local evidence above confidence floor");
            return Ok(GroundingResult::new(local, None, best, code));
        }

        let Some(code) = code else {
            debug!(best, "local evidence below floor and no code detected");
            return Ok(GroundingResult::ungrounded(None));
        };

        match self.portal_passage(text, &code, started).await {
            Some(passage) => {
                let supplementary = if self.settings.keep_low_confidence_local {
                    local
                } else {
                    Vec::new()
                };
                Ok(GroundingResult::new(
                    supplementary,
                    Some(passage),
                    self.settings.confidence_floor,
                    Some(code),
                ))
            }
            None => Ok(GroundingResult::ungrounded(Some(code))),
        }
    }

    fn remaining(&self, started: Instant) -> Duration {
        self.settings.budget.saturating_sub(started.elapsed())
    }

    async fn query_embedding(&self, text: &str, started: Instant) -> Option<Vec<f32>> {
        if let Some(vector) = self.cache.get(text).await {
            return Some(vector);
        }
        if !self.embedder.is_enabled() {
            return None;
        }

        let limit = self.settings.embed_timeout.min(self.remaining(started));
        match tokio::time::timeout(limit, self.embedder.embed(text)).await {
            Ok(Ok(vector)) if !vector.is_empty() => {
                self.cache.set(text, &vector).await;
                Some(vector)
            }
            Ok(Ok(_)) => {
                warn!("embedding provider returned an empty vector; searching lexically");
                None
            }
            Ok(Err(e)) => {
                warn!(error = %e, "embedding failed; searching lexically");
                None
            }
            Err(_) => {
                warn!(timeout = ?limit, "embedding timed out; searching lexically");
                None
            }
        }
    }

    async fn local_chunks(
        &self,
        text: &str,
        embedding: Option<&[f32]>,
        scope_ids: &[String],
        started: Instant,
    ) -> Vec<RetrievedChunk> {
        let limit = self.settings.search_timeout.min(self.remaining(started));
        let search = self
            .search
            .search(text, embedding, scope_ids, self.settings.limit);
        match tokio::time::timeout(limit, search).await {
            Ok(Ok(chunks)) => chunks,
            Ok(Err(e)) => {
                warn!(error = %e, "hybrid search failed; treating local index as empty");
                Vec::new()
            }
            Err(_) => {
                warn!(timeout = ?limit, "hybrid search timed out; treating local index as empty");
                Vec::new()
            }
        }
    }

    async fn portal_passage(
        &self,
        text: &str,
        code: &str,
        started: Instant,
    ) -> Option<crate::models::ScrapedPassage> {
        let scraper = self.scraper.as_ref()?;
        if self.remaining(started).is_zero() {
            warn!("grounding budget exhausted before portal fallback");
            return None;
        }
        debug!(code, "local evidence weak; consulting portal");
        scraper
            .scrape_until(text, Some(code), Some(started + self.settings.budget))
            .await
    }
}

/// Query text for the lexical channel.
///
/// A hyphenated code (`S-08-A-05`) tokenizes into fragments that never match
/// an index written in compact form, so the canonical code is appended.
fn lexical_text(text: &str, code: Option<&str>) -> String {
    match code {
        Some(code) => format!("{} {}", text, code),
        None => text.to_string(),
    }
}

/// Renumber ranks after filtering.
fn rerank(chunks: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, mut c)| {
            c.rank = i + 1;
            c
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{BackendRequest, BackendRow, SearchBackend, SearchError};
    use async_trait::async_trait;

    struct EmptyBackend;

    #[async_trait]
    impl SearchBackend for EmptyBackend {
        fn name(&self) -> &str {
            "empty"
        }
        async fn hybrid_search(
            &self,
            _request: &BackendRequest<'_>,
        ) -> Result<Vec<BackendRow>, SearchError> {
            Ok(Vec::new())
        }
    }

    fn router() -> GroundingRouter {
        GroundingRouter::new(
            EmbeddingCache::in_memory(Duration::from_secs(60)),
            Arc::new(crate::embedding::DisabledEmbedder),
            HybridSearchClient::new(Arc::new(EmptyBackend), Default::default(), 0.0),
            None,
            RouterSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let err = router().resolve(&Query::new("   ")).await.unwrap_err();
        assert_eq!(err, RouterError::EmptyQuery);
    }

    #[tokio::test]
    async fn test_blank_scope_id_is_rejected() {
        let query = Query::new("density").with_scope(["doc-1", " "]);
        let err = router().resolve(&query).await.unwrap_err();
        assert_eq!(err, RouterError::InvalidScope);
    }

    #[tokio::test]
    async fn test_unparsable_explicit_code_is_rejected() {
        let query = Query::new("density").with_code("not-a-code");
        let err = router().resolve(&query).await.unwrap_err();
        assert_eq!(err, RouterError::InvalidCode("not-a-code".to_string()));
    }

    #[tokio::test]
    async fn test_explicit_code_is_canonicalized() {
        let query = Query::new("what does this objective cover").with_code("s-08-a-05");
        let result = router().resolve(&query).await.unwrap();
        assert_eq!(result.code(), Some("S8A5"));
        assert!(!result.is_grounded());
    }

    #[test]
    fn test_lexical_text_appends_canonical_code() {
        assert_eq!(
            lexical_text("Explain SLO S-08-A-05", Some("S8A5")),
            "Explain SLO S-08-A-05 S8A5"
        );
        assert_eq!(lexical_text("density", None), "density");
        let terms = crate::search::query_terms(&lexical_text("Explain SLO S-08-A-05", Some("S8A5")));
        assert!(terms.contains(&"s8a5".to_string()));
    }

    #[test]
    fn test_rerank_renumbers_from_one() {
        let chunk = |id: &str, rank| RetrievedChunk {
            chunk_id: id.to_string(),
            document_id: "d".to_string(),
            text: String::new(),
            score: 0.5,
            rank,
        };
        let ranks: Vec<usize> = rerank(vec![chunk("a", 3), chunk("b", 7)])
            .iter()
            .map(|c| c.rank)
            .collect();
        assert_eq!(ranks, vec![1, 2]);
    }
}
