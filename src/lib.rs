//! # Curriculum Grounding
//!
//! Decides, per user query, what verified curriculum context an answer
//! generator may rely on: chunks from a local hybrid-search index, a passage
//! scraped live from the authoritative curriculum portal, both, or nothing.
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────────┐
//!  query ──────▶ │    Router    │ ──────▶ GroundingResult
//!                └──┬────┬───┬──┘
//!          ┌────────┘    │   └─────────┐
//!          ▼             ▼             ▼
//!   ┌────────────┐ ┌───────────┐ ┌───────────┐
//!   │ Embedding  │ │  Hybrid   │ │  Portal   │
//!   │   cache    │ │  search   │ │  scraper  │
//!   └────────────┘ └───────────┘ └───────────┘
//!      SQLite      SQLite / RPC   HTML + PDF
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ground init
//! ground code "Explain SLO s-08-a-05"     # → S8A5
//! ground resolve "Explain SLO S8A5" --json
//! ground serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Query and result types |
//! | [`code`] | Standard-code recognition |
//! | [`cache`] | Query-embedding cache |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`search`] | Hybrid search client and backends |
//! | [`portal`] | Web fallback scraper |
//! | [`router`] | Grounding policy |
//! | [`server`] | HTTP service |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cache;
pub mod code;
pub mod config;
pub mod db;
pub mod embedding;
pub mod migrate;
pub mod models;
pub mod portal;
pub mod router;
pub mod search;
pub mod server;
