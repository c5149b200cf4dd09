//! Dual-space similarity search.
//!
//! The query is embedded independently in the code and summary spaces, each
//! space is queried for its nearest components, and the two ranked lists are
//! merged with code-space precedence.

use std::collections::HashSet;
use std::sync::Arc;

use s0_core::{ComponentMatch, EmbeddingSpace, S0Config, S0Error, SearchMode};
use serde::Serialize;

use crate::embedding::EmbeddingProvider;
use crate::store::{open_corpus, Corpus};

/// Ranked matches from each space, before merging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpaceMatches {
    /// Matches from the code-space query, nearest first.
    pub code: Vec<ComponentMatch>,
    /// Matches from the summary-space query, nearest first.
    pub summary: Vec<ComponentMatch>,
}

/// Wire shape of a search result.
///
/// Per-space searches fill `code_matches` and `summary_matches`; merged
/// searches fill `matches`. Unused fields are omitted.
///
/// # Examples
///
/// ```
/// use s0_lens::search::SearchResponse;
///
/// let json = serde_json::to_value(SearchResponse::merged(vec![])).unwrap();
/// assert_eq!(json, serde_json::json!({ "matches": [] }));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResponse {
    /// Code-space matches, nearest first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_matches: Option<Vec<ComponentMatch>>,
    /// Summary-space matches, nearest first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_matches: Option<Vec<ComponentMatch>>,
    /// Deduplicated matches across both spaces.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matches: Option<Vec<ComponentMatch>>,
}

impl SearchResponse {
    /// Response for a merged search.
    pub fn merged(matches: Vec<ComponentMatch>) -> Self {
        Self {
            matches: Some(matches),
            ..Self::default()
        }
    }
}

impl From<SpaceMatches> for SearchResponse {
    fn from(per_space: SpaceMatches) -> Self {
        Self {
            code_matches: Some(per_space.code),
            summary_matches: Some(per_space.summary),
            matches: None,
        }
    }
}

/// Per-space fetch count used when merging to `limit` results.
///
/// # Examples
///
/// ```
/// use s0_lens::search::per_space_limit;
///
/// assert_eq!(per_space_limit(5), 3);
/// assert_eq!(per_space_limit(4), 2);
/// assert_eq!(per_space_limit(1), 1);
/// assert_eq!(per_space_limit(0), 0);
/// ```
pub fn per_space_limit(limit: usize) -> usize {
    limit.div_ceil(2)
}

/// Merge two ranked lists into at most `limit` distinct matches.
///
/// Code-space matches come first in their own order, then summary-space
/// matches. A component already present keeps its first occurrence and its
/// score from that space.
///
/// # Examples
///
/// ```
/// use s0_core::{ComponentMatch, EmbeddingSpace};
/// use s0_lens::search::merge_matches;
///
/// fn m(id: &str, space: EmbeddingSpace) -> ComponentMatch {
///     ComponentMatch {
///         id: id.into(),
///         title: id.to_uppercase(),
///         summary: String::new(),
///         code_snippet: String::new(),
///         similarity_score: 0.5,
///         space,
///     }
/// }
///
/// let code = vec![m("a", EmbeddingSpace::Code), m("b", EmbeddingSpace::Code)];
/// let summary = vec![m("b", EmbeddingSpace::Summary), m("d", EmbeddingSpace::Summary)];
/// let merged = merge_matches(code, summary, 3);
/// let ids: Vec<&str> = merged.iter().map(|m| m.id.as_str()).collect();
/// assert_eq!(ids, vec!["a", "b", "d"]);
/// assert_eq!(merged[1].space, EmbeddingSpace::Code);
/// ```
pub fn merge_matches(
    code: Vec<ComponentMatch>,
    summary: Vec<ComponentMatch>,
    limit: usize,
) -> Vec<ComponentMatch> {
    let mut seen = HashSet::new();
    code.into_iter()
        .chain(summary)
        .filter(|m| seen.insert(m.id.clone()))
        .take(limit)
        .collect()
}

/// Similarity search over a corpus in both embedding spaces.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use s0_core::EmbeddingConfig;
/// use s0_lens::embedding::EmbeddingProvider;
/// use s0_lens::search::SimilaritySearch;
/// use s0_lens::store::SqliteCorpus;
///
/// # async fn example() {
/// let provider = EmbeddingProvider::load(&EmbeddingConfig::default()).unwrap();
/// let corpus = Arc::new(SqliteCorpus::in_memory().unwrap());
/// let search = SimilaritySearch::new(provider, corpus);
/// let matches = search.find_similar("login form with remember me", 5).await.unwrap();
/// # }
/// ```
#[derive(Clone)]
pub struct SimilaritySearch {
    provider: EmbeddingProvider,
    corpus: Arc<dyn Corpus>,
}

impl std::fmt::Debug for SimilaritySearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimilaritySearch")
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

impl SimilaritySearch {
    /// Create a search over `corpus` using `provider` for query embeddings.
    pub fn new(provider: EmbeddingProvider, corpus: Arc<dyn Corpus>) -> Self {
        Self { provider, corpus }
    }

    /// Build the search described by `config`: load both embedding models
    /// and open the configured corpus.
    ///
    /// # Errors
    ///
    /// Returns [`S0Error::Embedding`] if a model fails to load, or the
    /// errors of [`open_corpus`].
    pub async fn from_config(config: &S0Config) -> Result<Self, S0Error> {
        let embedding = config.embedding.clone();
        let provider = tokio::task::spawn_blocking(move || EmbeddingProvider::load(&embedding))
            .await
            .map_err(|e| S0Error::Embedding(format!("model loading task failed: {e}")))??;
        let corpus = open_corpus(config).await?;
        Ok(Self::new(provider, corpus))
    }

    /// Run a search in the given mode.
    ///
    /// # Errors
    ///
    /// Same as [`SimilaritySearch::find_similar`].
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        mode: SearchMode,
    ) -> Result<SearchResponse, S0Error> {
        match mode {
            SearchMode::PerSpace => Ok(self.search_per_space(query, limit).await?.into()),
            SearchMode::Merged => Ok(SearchResponse::merged(self.find_similar(query, limit).await?)),
        }
    }

    /// Find up to `limit` components similar to `query`, merged across spaces.
    ///
    /// Each space is queried for `ceil(limit / 2)` components. A `limit` of
    /// zero returns immediately without embedding or querying.
    ///
    /// # Errors
    ///
    /// Returns [`S0Error::Embedding`] if either embedding fails, or
    /// [`S0Error::Retrieval`] if either corpus query fails.
    pub async fn find_similar(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ComponentMatch>, S0Error> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let per_space = self.query_spaces(query, per_space_limit(limit)).await?;
        let merged = merge_matches(per_space.code, per_space.summary, limit);
        tracing::debug!(limit, returned = merged.len(), "merged similarity results");
        Ok(merged)
    }

    /// Query both spaces for up to `limit` components each, without merging.
    ///
    /// # Errors
    ///
    /// Same as [`SimilaritySearch::find_similar`].
    pub async fn search_per_space(&self, query: &str, limit: usize) -> Result<SpaceMatches, S0Error> {
        if limit == 0 {
            return Ok(SpaceMatches::default());
        }
        self.query_spaces(query, limit).await
    }

    async fn query_spaces(&self, query: &str, limit: usize) -> Result<SpaceMatches, S0Error> {
        let (code, summary) = tokio::try_join!(
            self.query_space(EmbeddingSpace::Code, query, limit),
            self.query_space(EmbeddingSpace::Summary, query, limit),
        )?;
        Ok(SpaceMatches { code, summary })
    }

    async fn query_space(
        &self,
        space: EmbeddingSpace,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ComponentMatch>, S0Error> {
        let vector = self.provider.embed_query(space, query).await?;
        let rows = self.corpus.nearest(space, &vector, limit).await?;
        tracing::debug!(%space, limit, rows = rows.len(), "corpus query complete");
        Ok(rows.into_iter().map(|row| row.into_match(space)).collect())
    }
}
