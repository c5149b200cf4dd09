use std::fmt;
use std::sync::Arc;

use s0_core::{ComponentMatch, GenerationConfig, OutputFormat, S0Config, S0Error};
use s0_lens::search::SimilaritySearch;
use serde::Serialize;

use crate::llm::{ChatMessage, Completion, CompletionClient, Role};
use crate::prompt;

/// Error text reported when the completion came back without both sections.
pub const PARSE_FAILURE_MESSAGE: &str =
    "Failed to generate component, but found similar components";

const PREVIEW_CHARS: usize = 200;

/// Result of a generation request that got past retrieval.
///
/// Retrieval failures are not represented here; they are the `Err` arm of
/// [`GenerationPipeline::generate`].
///
/// # Examples
///
/// ```
/// use s0_forge::pipeline::GenerationOutcome;
///
/// let outcome = GenerationOutcome::Degraded {
///     matches: vec![],
///     error: "Component generation failed: timeout".into(),
/// };
/// assert!(outcome.is_degraded());
/// assert!(outcome.matches().is_empty());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    /// The model produced both a component and an explanation.
    Generated {
        /// Generated component source.
        code: String,
        /// Model's explanation of the component.
        explanation: String,
        /// Components retrieved for the request.
        matches: Vec<ComponentMatch>,
    },
    /// Completion or parsing failed; the retrieved matches are still returned.
    Degraded {
        /// Components retrieved for the request.
        matches: Vec<ComponentMatch>,
        /// Human-readable description of what failed.
        error: String,
    },
}

impl GenerationOutcome {
    /// Retrieved components, present in both variants.
    pub fn matches(&self) -> &[ComponentMatch] {
        match self {
            GenerationOutcome::Generated { matches, .. } => matches,
            GenerationOutcome::Degraded { matches, .. } => matches,
        }
    }

    /// Whether generation failed after retrieval succeeded.
    pub fn is_degraded(&self) -> bool {
        matches!(self, GenerationOutcome::Degraded { .. })
    }

    /// Render the outcome as markdown.
    ///
    /// # Examples
    ///
    /// ```
    /// use s0_forge::pipeline::GenerationOutcome;
    ///
    /// let outcome = GenerationOutcome::Generated {
    ///     code: "<nav></nav>".into(),
    ///     explanation: "A nav bar.".into(),
    ///     matches: vec![],
    /// };
    /// let md = outcome.to_markdown();
    /// assert!(md.contains("# Generated Component"));
    /// assert!(md.contains("<nav></nav>"));
    /// ```
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        match self {
            GenerationOutcome::Generated {
                code, explanation, ..
            } => {
                out.push_str("# Generated Component\n\n");
                out.push_str(&format!("```\n{code}\n```\n\n"));
                out.push_str(&format!("{explanation}\n\n"));
            }
            GenerationOutcome::Degraded { error, .. } => {
                out.push_str("# Generation Failed\n\n");
                out.push_str(&format!("> {error}\n\n"));
            }
        }

        out.push_str("## Similar Components\n\n");
        if self.matches().is_empty() {
            out.push_str("No similar components found.\n");
        }
        for m in self.matches() {
            out.push_str(&format!(
                "- **{}** (`{}`, similarity {:.3}): {}\n",
                m.title, m.id, m.similarity_score, m.summary
            ));
        }
        out
    }
}

impl fmt::Display for GenerationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationOutcome::Generated {
                code, explanation, ..
            } => {
                writeln!(f, "Generated Component")?;
                writeln!(f, "===================\n")?;
                writeln!(f, "{code}\n")?;
                writeln!(f, "Explanation: {explanation}\n")?;
            }
            GenerationOutcome::Degraded { error, .. } => {
                writeln!(f, "Generation failed: {error}\n")?;
            }
        }

        writeln!(f, "Similar components ({}):", self.matches().len())?;
        for m in self.matches() {
            writeln!(f, "  [{:.3}] {} ({})", m.similarity_score, m.title, m.id)?;
        }
        Ok(())
    }
}

/// Wire shape of a generation result.
///
/// Absent fields are omitted rather than serialized as `null`.
///
/// # Examples
///
/// ```
/// use s0_forge::pipeline::{GenerateResponse, GenerationOutcome};
///
/// let outcome = GenerationOutcome::Degraded { matches: vec![], error: "boom".into() };
/// let json = serde_json::to_value(GenerateResponse::from(outcome)).unwrap();
/// assert_eq!(json["error"], "boom");
/// assert!(json.get("generated_code").is_none());
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct GenerateResponse {
    /// Generated component source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_code: Option<String>,
    /// Model's explanation of the component.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// Components retrieved for the request.
    pub similar_components: Vec<ComponentMatch>,
    /// Set when generation degraded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<GenerationOutcome> for GenerateResponse {
    fn from(outcome: GenerationOutcome) -> Self {
        match outcome {
            GenerationOutcome::Generated {
                code,
                explanation,
                matches,
            } => Self {
                generated_code: Some(code),
                explanation: Some(explanation),
                similar_components: matches,
                error: None,
            },
            GenerationOutcome::Degraded { matches, error } => Self {
                generated_code: None,
                explanation: None,
                similar_components: matches,
                error: Some(error),
            },
        }
    }
}

/// Orchestrates retrieval, prompt construction, completion and parsing.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use s0_core::{GenerationConfig, LlmConfig, OutputFormat};
/// use s0_forge::llm::CompletionClient;
/// use s0_forge::pipeline::GenerationPipeline;
/// # use s0_lens::search::SimilaritySearch;
///
/// # async fn example(search: SimilaritySearch) {
/// let client = CompletionClient::new(&LlmConfig::default()).unwrap();
/// let pipeline = GenerationPipeline::new(search, Arc::new(client), &GenerationConfig::default());
/// let outcome = pipeline.generate("signup form", OutputFormat::JsxTs, 5).await.unwrap();
/// println!("{outcome}");
/// # }
/// ```
#[derive(Clone)]
pub struct GenerationPipeline {
    search: SimilaritySearch,
    completion: Arc<dyn Completion>,
    prompt_examples: usize,
    max_limit: usize,
}

impl fmt::Debug for GenerationPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationPipeline")
            .field("search", &self.search)
            .field("prompt_examples", &self.prompt_examples)
            .field("max_limit", &self.max_limit)
            .finish_non_exhaustive()
    }
}

impl GenerationPipeline {
    /// Create a pipeline over an existing search and completion backend.
    pub fn new(
        search: SimilaritySearch,
        completion: Arc<dyn Completion>,
        config: &GenerationConfig,
    ) -> Self {
        Self {
            search,
            completion,
            prompt_examples: config.prompt_examples.min(prompt::DEFAULT_PROMPT_EXAMPLES),
            max_limit: config.max_limit,
        }
    }

    /// Build the full pipeline from configuration: embedding models, the
    /// configured corpus, and the streaming completion client.
    ///
    /// # Errors
    ///
    /// Returns the first error hit while loading models, opening the corpus,
    /// or building the HTTP client.
    pub async fn from_config(config: &S0Config) -> Result<Self, S0Error> {
        let search = SimilaritySearch::from_config(config).await?;
        let client = CompletionClient::new(&config.llm)?;
        if !client.has_api_key() {
            tracing::warn!("no LLM API key configured; generation requests will likely fail");
        }
        Ok(Self::new(search, Arc::new(client), &config.generation))
    }

    /// The retrieval stage, for callers that only need matches.
    pub fn search(&self) -> &SimilaritySearch {
        &self.search
    }

    /// Upper bound applied to any requested limit.
    pub fn max_limit(&self) -> usize {
        self.max_limit
    }

    /// Generate a component for `query`.
    ///
    /// Retrieves up to `similar_count` matches (clamped to the configured
    /// maximum), prompts the model with the first few, and parses the
    /// result. Completion and parse failures degrade to an outcome carrying
    /// the matches and an error message.
    ///
    /// # Errors
    ///
    /// Returns [`S0Error::Embedding`] or [`S0Error::Retrieval`] if retrieval
    /// fails; nothing is generated in that case.
    pub async fn generate(
        &self,
        query: &str,
        format: OutputFormat,
        similar_count: usize,
    ) -> Result<GenerationOutcome, S0Error> {
        let limit = similar_count.min(self.max_limit);
        let matches = self.search.find_similar(query, limit).await?;
        tracing::info!(query, matches = matches.len(), %format, "retrieved similar components");

        let messages = vec![
            ChatMessage {
                role: Role::System,
                content: prompt::build_system_prompt(),
            },
            ChatMessage {
                role: Role::User,
                content: prompt::build_prompt(query, &matches, format, self.prompt_examples),
            },
        ];

        let text = match self.completion.complete(messages).await {
            Ok(text) => text,
            Err(e) if e.is_recoverable() => {
                tracing::warn!(error = %e, "completion failed, returning matches only");
                return Ok(GenerationOutcome::Degraded {
                    matches,
                    error: format!("Component generation failed: {e}"),
                });
            }
            Err(e) => return Err(e),
        };

        match prompt::parse_generation(&text) {
            Ok(generated) => Ok(GenerationOutcome::Generated {
                code: generated.code,
                explanation: generated.explanation,
                matches,
            }),
            Err(e) if e.is_recoverable() => {
                let preview: String = text.chars().take(PREVIEW_CHARS).collect();
                tracing::warn!(error = %e, preview = %preview, "could not parse completion");
                Ok(GenerationOutcome::Degraded {
                    matches,
                    error: PARSE_FAILURE_MESSAGE.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }
}
