//! Hybrid (vector + lexical) search over the curriculum index.
//!
//! [`HybridSearchClient`] wraps an opaque ranked-retrieval oracle, the
//! [`SearchBackend`], and turns its rows into validated, ranked
//! [`RetrievedChunk`]s. Two backends ship with the crate:
//!
//! - [`SqliteSearchBackend`] — FTS5 candidates plus brute-force cosine
//!   similarity over the local `chunk_vectors` table.
//! - [`RpcSearchBackend`] — a remote hybrid-search procedure called over
//!   HTTP with a JSON body.
//!
//! # Scoring
//!
//! ```text
//! fused = α × vector + (1 − α) × lexical        (default α = 0.6)
//! ```
//!
//! `vector` is cosine similarity clamped to `[0, 1]`; `lexical` is the share
//! of distinct query terms present in the chunk. Both are absolute, so the
//! fused score can be compared against a fixed confidence floor. Ties are
//! broken by chunk id so ordering is deterministic.
//!
//! An empty result is success. Backend or transport failure is a
//! [`SearchError`], which callers can tell apart from "nothing relevant".

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::embedding::{blob_to_vec, cosine_similarity};
use crate::models::RetrievedChunk;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("search transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("search backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid search response: {0}")]
    InvalidResponse(String),
    #[error("search index query failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("search timed out after {0:?}")]
    Timeout(Duration),
}

/// Weights of the two relevance signals in the fused score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HybridWeights {
    pub vector: f64,
    pub lexical: f64,
}

impl HybridWeights {
    pub fn from_alpha(alpha: f64) -> Self {
        let alpha = alpha.clamp(0.0, 1.0);
        Self {
            vector: alpha,
            lexical: 1.0 - alpha,
        }
    }

    /// Weights actually applied when no query embedding is available.
    pub fn lexical_only() -> Self {
        Self {
            vector: 0.0,
            lexical: 1.0,
        }
    }

    pub fn fuse(&self, vector: f64, lexical: f64) -> f64 {
        self.vector * vector + self.lexical * lexical
    }
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self::from_alpha(0.6)
    }
}

/// Everything a backend needs for one ranked-retrieval call.
#[derive(Debug, Clone)]
pub struct BackendRequest<'a> {
    pub query_text: &'a str,
    pub query_embedding: Option<&'a [f32]>,
    pub match_count: usize,
    pub scope_ids: &'a [String],
    pub weights: HybridWeights,
}

/// A row as returned by a backend, before validation.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BackendRow {
    #[serde(alias = "id", deserialize_with = "string_or_number")]
    pub chunk_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub document_id: String,
    #[serde(alias = "content")]
    pub text: String,
    #[serde(alias = "combined_score", alias = "similarity")]
    pub score: f64,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Str(String),
        Num(i64),
    }
    Ok(match Id::deserialize(deserializer)? {
        Id::Str(s) => s,
        Id::Num(n) => n.to_string(),
    })
}

/// A ranked-retrieval oracle.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn hybrid_search(
        &self,
        request: &BackendRequest<'_>,
    ) -> Result<Vec<BackendRow>, SearchError>;
}

/// Validating front for a [`SearchBackend`].
#[derive(Clone)]
pub struct HybridSearchClient {
    backend: Arc<dyn SearchBackend>,
    weights: HybridWeights,
    min_score: f64,
}

impl HybridSearchClient {
    pub fn new(backend: Arc<dyn SearchBackend>, weights: HybridWeights, min_score: f64) -> Self {
        Self {
            backend,
            weights,
            min_score,
        }
    }

    pub fn from_config(backend: Arc<dyn SearchBackend>, config: &RetrievalConfig) -> Self {
        Self::new(
            backend,
            HybridWeights::from_alpha(config.hybrid_alpha),
            config.min_score,
        )
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Ranked chunks for `query_text`, best first, at most `limit` of them.
    ///
    /// `scope_ids` restricts results to those documents; empty means all.
    pub async fn search(
        &self,
        query_text: &str,
        embedding: Option<&[f32]>,
        scope_ids: &[String],
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>, SearchError> {
        if query_text.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let weights = match embedding {
            Some(v) if !v.is_empty() => self.weights,
            _ => HybridWeights::lexical_only(),
        };
        let request = BackendRequest {
            query_text,
            query_embedding: embedding.filter(|v| !v.is_empty()),
            match_count: limit,
            scope_ids,
            weights,
        };

        let rows = self.backend.hybrid_search(&request).await?;
        debug!(
            backend = self.backend.name(),
            rows = rows.len(),
            "hybrid search returned"
        );
        rank_rows(rows, scope_ids, self.min_score, limit)
    }
}

/// Validate backend rows and turn them into ranked chunks.
fn rank_rows(
    rows: Vec<BackendRow>,
    scope_ids: &[String],
    min_score: f64,
    limit: usize,
) -> Result<Vec<RetrievedChunk>, SearchError> {
    let scope: HashSet<&str> = scope_ids.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    let mut accepted = Vec::with_capacity(rows.len());

    for row in rows {
        if row.chunk_id.trim().is_empty() || row.document_id.trim().is_empty() {
            return Err(SearchError::InvalidResponse(
                "row with empty chunk_id or document_id".to_string(),
            ));
        }
        if !row.score.is_finite() {
            return Err(SearchError::InvalidResponse(format!(
                "non-finite score for chunk {}",
                row.chunk_id
            )));
        }
        if !scope.is_empty() && !scope.contains(row.document_id.as_str()) {
            warn!(
                document_id = %row.document_id,
                "backend returned a chunk outside the requested scope; dropping"
            );
            continue;
        }
        let score = row.score.clamp(0.0, 1.0);
        if score < min_score || !seen.insert(row.chunk_id.clone()) {
            continue;
        }
        accepted.push((row, score));
    }

    accepted.sort_by(|(a, sa), (b, sb)| {
        sb.partial_cmp(sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    accepted.truncate(limit);

    Ok(accepted
        .into_iter()
        .enumerate()
        .map(|(i, (row, score))| RetrievedChunk {
            chunk_id: row.chunk_id,
            document_id: row.document_id,
            text: row.text,
            score,
            rank: i + 1,
        })
        .collect())
}

// ============ Scoring helpers ============

/// Lower-cased alphanumeric terms of at least two characters, deduplicated.
pub fn query_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for token in text.split(|c: char| !c.is_alphanumeric()) {
        if token.chars().count() < 2 {
            continue;
        }
        let term = token.to_lowercase();
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// Share of `terms` that occur as whole terms in `text`, in `[0, 1]`.
pub fn lexical_coverage(terms: &[String], text: &str) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let present: HashSet<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect();
    let hits = terms.iter().filter(|t| present.contains(*t)).count();
    hits as f64 / terms.len() as f64
}

/// FTS5 MATCH expression OR-ing every quoted term.
fn fts_query(terms: &[String]) -> Option<String> {
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t.replace('"', "")))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

fn scope_clause(column: &str, scope_ids: &[String]) -> String {
    if scope_ids.is_empty() {
        String::new()
    } else {
        let placeholders = vec!["?"; scope_ids.len()].join(", ");
        format!(" AND {} IN ({})", column, placeholders)
    }
}

// ============ SQLite backend ============

struct Candidate {
    document_id: String,
    text: String,
    vector_score: f64,
}

/// Local index backend over the `chunks`, `chunks_fts`, and `chunk_vectors` tables.
pub struct SqliteSearchBackend {
    pool: SqlitePool,
    candidate_k: i64,
}

impl SqliteSearchBackend {
    pub fn new(pool: SqlitePool, candidate_k: i64) -> Self {
        Self { pool, candidate_k }
    }

    async fn keyword_candidates(
        &self,
        terms: &[String],
        scope_ids: &[String],
        out: &mut HashMap<String, Candidate>,
    ) -> Result<(), SearchError> {
        let Some(matcher) = fts_query(terms) else {
            return Ok(());
        };

        let sql = format!(
            "SELECT chunk_id, document_id, text FROM chunks_fts WHERE chunks_fts MATCH ?{} ORDER BY rank LIMIT ?",
            scope_clause("document_id", scope_ids)
        );
        let mut query = sqlx::query(&sql).bind(matcher);
        for id in scope_ids {
            query = query.bind(id);
        }
        let rows = query.bind(self.candidate_k).fetch_all(&self.pool).await?;

        for row in rows {
            let chunk_id: String = row.try_get("chunk_id")?;
            if out.contains_key(&chunk_id) {
                continue;
            }
            let candidate = Candidate {
                document_id: row.try_get("document_id")?,
                text: row.try_get("text")?,
                vector_score: 0.0,
            };
            out.insert(chunk_id, candidate);
        }
        Ok(())
    }

    async fn vector_candidates(
        &self,
        query_vec: &[f32],
        scope_ids: &[String],
        out: &mut HashMap<String, Candidate>,
    ) -> Result<(), SearchError> {
        let sql = format!(
            "SELECT cv.chunk_id, cv.document_id, cv.embedding, c.text \
             FROM chunk_vectors cv JOIN chunks c ON c.id = cv.chunk_id WHERE 1 = 1{}",
            scope_clause("cv.document_id", scope_ids)
        );
        let mut query = sqlx::query(&sql);
        for id in scope_ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut scored: Vec<(String, String, String, f64)> = Vec::with_capacity(rows.len());
        for row in rows {
            let chunk_id: String = row.try_get("chunk_id")?;
            let blob: Vec<u8> = row.try_get("embedding")?;
            let Some(vec) = blob_to_vec(&blob) else {
                warn!(chunk_id = %chunk_id, "skipping corrupt chunk vector");
                continue;
            };
            let similarity = cosine_similarity(query_vec, &vec).max(0.0) as f64;
            scored.push((
                chunk_id,
                row.try_get("document_id")?,
                row.try_get("text")?,
                similarity,
            ));
        }

        scored.sort_by(|a, b| {
            b.3.partial_cmp(&a.3)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(self.candidate_k.max(0) as usize);

        for (chunk_id, document_id, text, similarity) in scored {
            out.entry(chunk_id)
                .and_modify(|c| c.vector_score = similarity)
                .or_insert(Candidate {
                    document_id,
                    text,
                    vector_score: similarity,
                });
        }
        Ok(())
    }
}

#[async_trait]
impl SearchBackend for SqliteSearchBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn hybrid_search(
        &self,
        request: &BackendRequest<'_>,
    ) -> Result<Vec<BackendRow>, SearchError> {
        let terms = query_terms(request.query_text);
        let mut candidates: HashMap<String, Candidate> = HashMap::new();

        self.keyword_candidates(&terms, request.scope_ids, &mut candidates)
            .await?;
        if let Some(query_vec) = request.query_embedding {
            self.vector_candidates(query_vec, request.scope_ids, &mut candidates)
                .await?;
        }

        let mut rows: Vec<BackendRow> = candidates
            .into_iter()
            .map(|(chunk_id, c)| {
                let lexical = lexical_coverage(&terms, &c.text);
                BackendRow {
                    chunk_id,
                    document_id: c.document_id,
                    score: request.weights.fuse(c.vector_score, lexical),
                    text: c.text,
                }
            })
            .filter(|row| row.score > 0.0)
            .collect();

        rows.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        rows.truncate(request.match_count);
        Ok(rows)
    }
}

// ============ RPC backend ============

#[derive(Debug, Serialize)]
struct RpcBody<'a> {
    query_text: &'a str,
    query_embedding: Option<&'a [f32]>,
    match_count: usize,
    scope_ids: Option<&'a [String]>,
    vector_weight: f64,
    lexical_weight: f64,
}

/// Remote hybrid-search procedure reached with `POST <url>`.
///
/// The response body must be a JSON array of rows carrying `chunk_id` (or
/// `id`), `document_id`, `text` (or `content`), and `score` (or
/// `combined_score`).
pub struct RpcSearchBackend {
    client: reqwest::Client,
    url: Url,
    api_key: Option<String>,
    timeout: Duration,
}

impl RpcSearchBackend {
    pub fn new(url: Url, api_key: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url,
            api_key,
            timeout,
        })
    }
}

#[async_trait]
impl SearchBackend for RpcSearchBackend {
    fn name(&self) -> &str {
        "rpc"
    }

    async fn hybrid_search(
        &self,
        request: &BackendRequest<'_>,
    ) -> Result<Vec<BackendRow>, SearchError> {
        let body = RpcBody {
            query_text: request.query_text,
            query_embedding: request.query_embedding,
            match_count: request.match_count,
            scope_ids: if request.scope_ids.is_empty() {
                None
            } else {
                Some(request.scope_ids)
            },
            vector_weight: request.weights.vector,
            lexical_weight: request.weights.lexical,
        };

        let mut builder = self.client.post(self.url.clone()).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key).header("apikey", key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                SearchError::Timeout(self.timeout)
            } else {
                SearchError::Transport(e)
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice::<Vec<BackendRow>>(&bytes)
            .map_err(|e| SearchError::InvalidResponse(e.to_string()))
    }
}

/// Build the backend named by `config.backend`.
///
/// The SQLite backend shares `pool` with the embedding cache.
pub fn create_backend(
    config: &RetrievalConfig,
    pool: SqlitePool,
) -> anyhow::Result<Arc<dyn SearchBackend>> {
    match config.backend.as_str() {
        "sqlite" => Ok(Arc::new(SqliteSearchBackend::new(pool, config.candidate_k))),
        "rpc" => {
            let raw = config
                .rpc_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("retrieval.rpc_url required for rpc backend"))?;
            let url = Url::parse(raw)?;
            let api_key = std::env::var(&config.rpc_key_env).ok();
            Ok(Arc::new(RpcSearchBackend::new(
                url,
                api_key,
                Duration::from_secs(config.rpc_timeout_secs),
            )?))
        }
        other => anyhow::bail!("Unknown retrieval backend: {}", other),
    }
}
