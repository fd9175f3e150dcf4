//! TOML configuration for the grounding pipeline.
//!
//! Every section except `[db]` has defaults, so a minimal file only needs a
//! database path and the list of portal resources to scrape. See
//! [`load_config`] for the validation rules.

use anyhow::{Context, Result};
use reqwest::Url;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    24 * 60 * 60
}

/// Upper bound on `cache.ttl_secs`; longer values overflow timestamp math.
pub const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// `"sqlite"` (local FTS5 + vector index) or `"rpc"` (remote hybrid search).
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Vector weight in the fused score: `alpha * vector + (1 - alpha) * lexical`.
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: i64,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
    #[serde(default)]
    pub min_score: f64,
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default = "default_rpc_key_env")]
    pub rpc_key_env: String,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            hybrid_alpha: default_hybrid_alpha(),
            candidate_k: default_candidate_k(),
            final_limit: default_final_limit(),
            min_score: 0.0,
            rpc_url: None,
            rpc_key_env: default_rpc_key_env(),
            rpc_timeout_secs: default_rpc_timeout_secs(),
        }
    }
}

fn default_backend() -> String {
    "sqlite".to_string()
}
fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_candidate_k() -> i64 {
    80
}
fn default_final_limit() -> usize {
    8
}
fn default_rpc_key_env() -> String {
    "SEARCH_RPC_KEY".to_string()
}
fn default_rpc_timeout_secs() -> u64 {
    10
}

/// Whether a portal resource is served as hypertext or as a PDF document.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Html,
    Pdf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PortalResource {
    pub name: String,
    pub url: String,
    pub kind: ResourceKind,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScraperConfig {
    #[serde(default = "default_authority")]
    pub authority: String,
    #[serde(default = "default_scrape_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    #[serde(default = "default_pdf_before")]
    pub pdf_window_before: usize,
    #[serde(default = "default_pdf_after")]
    pub pdf_window_after: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub resources: Vec<PortalResource>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            authority: default_authority(),
            timeout_secs: default_scrape_timeout_secs(),
            max_chars: default_max_chars(),
            min_chars: default_min_chars(),
            pdf_window_before: default_pdf_before(),
            pdf_window_after: default_pdf_after(),
            user_agent: default_user_agent(),
            resources: Vec::new(),
        }
    }
}

fn default_authority() -> String {
    "Curriculum Portal".to_string()
}
fn default_scrape_timeout_secs() -> u64 {
    20
}
fn default_max_chars() -> usize {
    4000
}
fn default_min_chars() -> usize {
    80
}
fn default_pdf_before() -> usize {
    300
}
fn default_pdf_after() -> usize {
    1500
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/124.0 Safari/537.36"
        .to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RouterConfig {
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,
    #[serde(default = "default_budget_ms")]
    pub budget_ms: u64,
    #[serde(default = "default_step_timeout_ms")]
    pub embed_timeout_ms: u64,
    #[serde(default = "default_step_timeout_ms")]
    pub search_timeout_ms: u64,
    #[serde(default = "default_keep_low_confidence_local")]
    pub keep_low_confidence_local: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            confidence_floor: default_confidence_floor(),
            budget_ms: default_budget_ms(),
            embed_timeout_ms: default_step_timeout_ms(),
            search_timeout_ms: default_step_timeout_ms(),
            keep_low_confidence_local: default_keep_low_confidence_local(),
        }
    }
}

fn default_confidence_floor() -> f64 {
    0.4
}
fn default_budget_ms() -> u64 {
    45_000
}
fn default_step_timeout_ms() -> u64 {
    10_000
}
fn default_keep_low_confidence_local() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    /// Every section at its default, with the given database path.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            cache: CacheConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            scraper: ScraperConfig::default(),
            router: RouterConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    validate(&config)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

pub fn validate(config: &Config) -> Result<()> {
    if config.cache.ttl_secs == 0 {
        anyhow::bail!("cache.ttl_secs must be > 0");
    }
    if config.cache.ttl_secs > MAX_TTL_SECS {
        anyhow::bail!("cache.ttl_secs must be <= {} (10 years)", MAX_TTL_SECS);
    }

    // Retrieval
    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }
    if config.retrieval.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }
    if config.retrieval.candidate_k < 1 {
        anyhow::bail!("retrieval.candidate_k must be >= 1");
    }
    match config.retrieval.backend.as_str() {
        "sqlite" => {}
        "rpc" => {
            let url = config
                .retrieval
                .rpc_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("retrieval.rpc_url is required when backend is 'rpc'"))?;
            Url::parse(url).with_context(|| format!("retrieval.rpc_url is not a valid URL: {}", url))?;
        }
        other => anyhow::bail!(
            "Unknown retrieval backend: '{}'. Must be sqlite or rpc.",
            other
        ),
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    // Scraper
    if config.scraper.max_chars <= config.scraper.min_chars {
        anyhow::bail!("scraper.max_chars must be greater than scraper.min_chars");
    }
    if config.scraper.timeout_secs == 0 {
        anyhow::bail!("scraper.timeout_secs must be > 0");
    }
    for resource in &config.scraper.resources {
        Url::parse(&resource.url).with_context(|| {
            format!(
                "scraper resource '{}' has an invalid url: {}",
                resource.name, resource.url
            )
        })?;
    }

    // Router
    if !(0.0..=1.0).contains(&config.router.confidence_floor) {
        anyhow::bail!("router.confidence_floor must be in [0.0, 1.0]");
    }
    if config.router.budget_ms == 0 {
        anyhow::bail!("router.budget_ms must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/grounding.sqlite"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.cache.ttl_secs, 86_400);
        assert!((config.retrieval.hybrid_alpha - 0.6).abs() < 1e-9);
        assert!((config.router.confidence_floor - 0.4).abs() < 1e-9);
        assert_eq!(config.retrieval.backend, "sqlite");
        assert!(!config.embedding.is_enabled());
        assert!(config.scraper.resources.is_empty());
    }

    #[test]
    fn test_resources_parse_in_order() {
        let config = parse_config(
            r#"
[db]
path = "x.sqlite"

[scraper]
authority = "Board of Curriculum"

[[scraper.resources]]
name = "index"
url = "https://portal.example.org/slo.html"
kind = "html"

[[scraper.resources]]
name = "framework"
url = "https://portal.example.org/framework.pdf"
kind = "pdf"
"#,
        )
        .unwrap();
        validate(&config).unwrap();
        let kinds: Vec<ResourceKind> = config.scraper.resources.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![ResourceKind::Html, ResourceKind::Pdf]);
        assert_eq!(config.scraper.authority, "Board of Curriculum");
    }

    #[test]
    fn test_rpc_backend_requires_url() {
        let mut config = parse_config(MINIMAL).unwrap();
        config.retrieval.backend = "rpc".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("rpc_url"));
    }

    #[test]
    fn test_rejects_ttl_outside_bounds() {
        let mut config = Config::minimal("x.sqlite");
        config.cache.ttl_secs = 0;
        assert!(validate(&config).is_err());
        config.cache.ttl_secs = u64::MAX;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("cache.ttl_secs"));
        config.cache.ttl_secs = MAX_TTL_SECS;
        validate(&config).unwrap();
    }

    #[test]
    fn test_rejects_out_of_range_floor() {
        let mut config = parse_config(MINIMAL).unwrap();
        config.router.confidence_floor = 1.5;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_bad_resource_url() {
        let mut config = parse_config(MINIMAL).unwrap();
        config.scraper.resources.push(PortalResource {
            name: "broken".to_string(),
            url: "not a url".to_string(),
            kind: ResourceKind::Html,
        });
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_enabled_embedding_needs_model_and_dims() {
        let mut config = parse_config(MINIMAL).unwrap();
        config.embedding.provider = "openai".to_string();
        assert!(validate(&config).is_err());
        config.embedding.model = Some("text-embedding-3-small".to_string());
        config.embedding.dims = Some(1536);
        validate(&config).unwrap();
    }

    #[test]
    fn test_example_config_is_valid() {
        let config = parse_config(include_str!("../config/grounding.example.toml")).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.scraper.resources.len(), 2);
        assert_eq!(config.server.bind, "127.0.0.1:7341");
    }
}
