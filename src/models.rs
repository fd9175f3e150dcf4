//! Core data types that flow through the grounding pipeline.
//!
//! All of these are request-scoped: a [`Query`] comes in, the sources
//! produce [`RetrievedChunk`]s and at most one [`ScrapedPassage`], and the
//! router folds them into a single [`GroundingResult`].

use serde::Serialize;

/// Notice handed to the answer-generation layer when nothing grounded the query.
///
/// Callers must surface this instead of answering from unsupported knowledge.
pub const NO_VERIFIED_CONTEXT: &str =
    "No verified context found for this query. Do not answer from unsupported knowledge.";

/// An incoming grounding request.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub text: String,
    /// Restrict local retrieval to these document ids. Empty means unscoped.
    pub scope_ids: Vec<String>,
    /// A standard code supplied by the caller, overriding detection.
    pub explicit_code: Option<String>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_scope<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.explicit_code = Some(code.into());
        self
    }
}

/// A scored chunk from the hybrid search index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    /// Fused relevance score in `[0.0, 1.0]`.
    pub score: f64,
    /// 1-based position in the ranked list.
    pub rank: usize,
}

/// Which structural part of a portal page produced a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    TableRow,
    Link,
    Block,
    PdfExcerpt,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::TableRow => "table_row",
            MatchKind::Link => "link",
            MatchKind::Block => "block",
            MatchKind::PdfExcerpt => "pdf_excerpt",
        }
    }
}

/// One matched piece of text from a scraped resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassageFragment {
    pub kind: MatchKind,
    pub text: String,
    /// Page the fragment came from, or the resolved link target for [`MatchKind::Link`].
    pub url: String,
}

/// Text gathered live from the external curriculum portal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrapedPassage {
    pub authority: String,
    /// URL of the first resource that contributed text.
    pub source_url: String,
    pub title: String,
    /// All fragment texts joined, in scan order.
    pub text: String,
    pub fragments: Vec<PassageFragment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroundingSource {
    Local,
    Web,
    Mixed,
    None,
}

impl GroundingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroundingSource::Local => "local",
            GroundingSource::Web => "web",
            GroundingSource::Mixed => "mixed",
            GroundingSource::None => "none",
        }
    }
}

impl std::fmt::Display for GroundingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The router's verdict for one query.
///
/// Fields are private so `is_grounded` and `grounding_source` can only be
/// derived from the evidence actually present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroundingResult {
    local_chunks: Vec<RetrievedChunk>,
    external_passage: Option<ScrapedPassage>,
    is_grounded: bool,
    grounding_source: GroundingSource,
    confidence: f64,
    code: Option<String>,
}

impl GroundingResult {
    pub fn new(
        local_chunks: Vec<RetrievedChunk>,
        external_passage: Option<ScrapedPassage>,
        confidence: f64,
        code: Option<String>,
    ) -> Self {
        let grounding_source = match (local_chunks.is_empty(), external_passage.is_some()) {
            (false, true) => GroundingSource::Mixed,
            (false, false) => GroundingSource::Local,
            (true, true) => GroundingSource::Web,
            (true, false) => GroundingSource::None,
        };
        let is_grounded = grounding_source != GroundingSource::None;
        Self {
            local_chunks,
            external_passage,
            is_grounded,
            grounding_source,
            confidence: if is_grounded { confidence } else { 0.0 },
            code,
        }
    }

    /// A result carrying no evidence.
    pub fn ungrounded(code: Option<String>) -> Self {
        Self::new(Vec::new(), None, 0.0, code)
    }

    pub fn local_chunks(&self) -> &[RetrievedChunk] {
        &self.local_chunks
    }

    pub fn external_passage(&self) -> Option<&ScrapedPassage> {
        self.external_passage.as_ref()
    }

    pub fn is_grounded(&self) -> bool {
        self.is_grounded
    }

    pub fn grounding_source(&self) -> GroundingSource {
        self.grounding_source
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Fail with [`RouterError::Ungrounded`] when no evidence was found.
    ///
    /// [`RouterError::Ungrounded`]: crate::router::RouterError::Ungrounded
    pub fn require_grounded(self) -> Result<Self, crate::router::RouterError> {
        if self.is_grounded {
            Ok(self)
        } else {
            Err(crate::router::RouterError::Ungrounded)
        }
    }

    /// The canonical standard code the query was routed on, if any.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Render the evidence as one text block with a provenance tag per segment.
    ///
    /// Ungrounded results render as [`NO_VERIFIED_CONTEXT`].
    pub fn context_block(&self) -> String {
        if !self.is_grounded {
            return NO_VERIFIED_CONTEXT.to_string();
        }

        let mut segments = Vec::with_capacity(self.local_chunks.len() + 1);
        for chunk in &self.local_chunks {
            segments.push(format!(
                "[local doc={} rank={} score={:.2}]\n{}",
                chunk.document_id,
                chunk.rank,
                chunk.score,
                chunk.text.trim()
            ));
        }
        if let Some(passage) = &self.external_passage {
            segments.push(format!(
                "[web {} {}]\n{}",
                passage.authority,
                passage.source_url,
                passage.text.trim()
            ));
        }
        segments.join("\n\n")
    }
}
