use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::S0Error;

/// Top-level configuration loaded from `.s0.toml`.
///
/// Every section is optional. Secrets that are absent from the file are
/// resolved from environment variables at client construction time.
///
/// # Examples
///
/// ```
/// use s0_core::S0Config;
///
/// let config = S0Config::default();
/// assert_eq!(config.generation.similar_count, 5);
/// assert_eq!(config.embedding.max_tokens, 512);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S0Config {
    /// Embedding model settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Vector corpus settings.
    #[serde(default)]
    pub corpus: CorpusConfig,
    /// LLM completion provider settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Generation behavior settings.
    #[serde(default)]
    pub generation: GenerationConfig,
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
}

impl S0Config {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`S0Error::Io`] if the file cannot be read, or
    /// [`S0Error::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use s0_core::S0Config;
    /// use std::path::Path;
    ///
    /// let config = S0Config::from_file(Path::new(".s0.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, S0Error> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`S0Error::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use s0_core::S0Config;
    ///
    /// let toml = r#"
    /// [generation]
    /// similar_count = 8
    /// "#;
    /// let config = S0Config::from_toml(toml).unwrap();
    /// assert_eq!(config.generation.similar_count, 8);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, S0Error> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }
}

/// Embedding model configuration.
///
/// Both spaces use first-position (CLS) pooling over the final hidden layer.
///
/// # Examples
///
/// ```
/// use s0_core::EmbeddingConfig;
///
/// let config = EmbeddingConfig::default();
/// assert_eq!(config.code_model, "microsoft/codebert-base");
/// assert_eq!(config.summary_model, "bert-base-uncased");
/// assert_eq!(config.dimensions, 768);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Hugging Face repo id, or a local directory, for the code-space model.
    #[serde(default = "default_code_model")]
    pub code_model: String,
    /// Hugging Face repo id, or a local directory, for the summary-space model.
    #[serde(default = "default_summary_model")]
    pub summary_model: String,
    /// Inputs are truncated to this many tokens (default: 512).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Expected vector dimension in both spaces (default: 768).
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    /// Where downloaded model files are cached.
    pub cache_dir: Option<PathBuf>,
}

fn default_code_model() -> String {
    "microsoft/codebert-base".into()
}

fn default_summary_model() -> String {
    "bert-base-uncased".into()
}

fn default_max_tokens() -> usize {
    512
}

fn default_dimensions() -> usize {
    768
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            code_model: default_code_model(),
            summary_model: default_summary_model(),
            max_tokens: default_max_tokens(),
            dimensions: default_dimensions(),
            cache_dir: None,
        }
    }
}

/// Storage backend holding the component corpus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorpusBackend {
    /// PostgreSQL with the pgvector extension.
    #[default]
    Postgres,
    /// Local SQLite file with BLOB-encoded vectors.
    Sqlite,
}

/// Vector corpus configuration.
///
/// # Examples
///
/// ```
/// use s0_core::{CorpusBackend, CorpusConfig};
///
/// let config = CorpusConfig::default();
/// assert_eq!(config.backend, CorpusBackend::Postgres);
/// assert_eq!(config.table, "code_components");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// Which backend to query (default: `postgres`).
    #[serde(default)]
    pub backend: CorpusBackend,
    /// Postgres connection string; falls back to `DATABASE_URL`.
    pub database_url: Option<String>,
    /// Postgres schema holding the corpus table (default: `public`).
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Corpus table name (default: `code_components`).
    #[serde(default = "default_table")]
    pub table: String,
    /// PEM bundle of extra CA certificates trusted for Postgres TLS.
    pub ca_cert: Option<PathBuf>,
    /// SQLite corpus file (default: `.s0/corpus.db`).
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
}

fn default_schema() -> String {
    "public".into()
}

fn default_table() -> String {
    "code_components".into()
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from(".s0/corpus.db")
}

impl CorpusConfig {
    /// Resolve the Postgres connection string from config or `DATABASE_URL`.
    ///
    /// # Errors
    ///
    /// Returns [`S0Error::Config`] if neither is set.
    pub fn resolve_database_url(&self) -> Result<String, S0Error> {
        self.database_url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .ok_or_else(|| {
                S0Error::Config(
                    "database URL not found: set corpus.database_url in .s0.toml or DATABASE_URL env var"
                        .into(),
                )
            })
    }
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            backend: CorpusBackend::default(),
            database_url: None,
            schema: default_schema(),
            table: default_table(),
            ca_cert: None,
            sqlite_path: default_sqlite_path(),
        }
    }
}

/// LLM provider configuration for an OpenAI-compatible streaming endpoint.
///
/// # Examples
///
/// ```
/// use s0_core::LlmConfig;
///
/// let config = LlmConfig::default();
/// assert_eq!(config.model, "deepseek-r1-distill-llama-70b");
/// assert_eq!(config.max_completion_tokens, 4096);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL; `/v1/chat/completions` is appended.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    /// Model identifier.
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// API key; falls back to `S0_LLM_API_KEY`, then `GROQ_API_KEY`.
    pub api_key: Option<String>,
    /// Sampling temperature (default: 0.6).
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Nucleus sampling mass (default: 0.95).
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    /// Upper bound on generated tokens (default: 4096).
    #[serde(default = "default_max_completion_tokens")]
    pub max_completion_tokens: u32,
    /// Request timeout in seconds, covering the whole stream (default: 120).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Environment variables consulted, in order, for the LLM API key.
pub const LLM_API_KEY_VARS: [&str; 2] = ["S0_LLM_API_KEY", "GROQ_API_KEY"];

fn default_llm_base_url() -> String {
    "https://api.groq.com/openai".into()
}

fn default_llm_model() -> String {
    "deepseek-r1-distill-llama-70b".into()
}

fn default_temperature() -> f32 {
    0.6
}

fn default_top_p() -> f32 {
    0.95
}

fn default_max_completion_tokens() -> u32 {
    4096
}

fn default_timeout_secs() -> u64 {
    120
}

impl LlmConfig {
    /// Resolve the API key from config or the environment.
    ///
    /// Blank values are skipped, so `GROQ_API_KEY` still applies when
    /// `S0_LLM_API_KEY` is exported but empty.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key_from(|var| std::env::var(var).ok())
    }

    fn api_key_from(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        let present = |key: &String| !key.trim().is_empty();
        self.api_key.clone().filter(present).or_else(|| {
            LLM_API_KEY_VARS
                .iter()
                .find_map(|var| lookup(var).filter(present))
        })
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key: None,
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_completion_tokens: default_max_completion_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Generation behavior configuration.
///
/// # Examples
///
/// ```
/// use s0_core::GenerationConfig;
///
/// let config = GenerationConfig::default();
/// assert_eq!(config.prompt_examples, 4);
/// assert_eq!(config.max_limit, 50);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Components retrieved per generation request when unspecified (default: 5).
    #[serde(default = "default_similar_count")]
    pub similar_count: usize,
    /// Matches shown to the LLM as reference examples (default: 4, at most 4).
    #[serde(default = "default_prompt_examples")]
    pub prompt_examples: usize,
    /// Upper clamp on any requested limit (default: 50).
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

fn default_similar_count() -> usize {
    5
}

fn default_prompt_examples() -> usize {
    4
}

fn default_max_limit() -> usize {
    50
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            similar_count: default_similar_count(),
            prompt_examples: default_prompt_examples(),
            max_limit: default_max_limit(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind (default: `127.0.0.1:8000`).
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:8000".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = S0Config::default();
        assert_eq!(config.embedding.code_model, "microsoft/codebert-base");
        assert_eq!(config.embedding.summary_model, "bert-base-uncased");
        assert_eq!(config.embedding.max_tokens, 512);
        assert_eq!(config.corpus.backend, CorpusBackend::Postgres);
        assert_eq!(config.corpus.schema, "public");
        assert_eq!(config.corpus.sqlite_path, PathBuf::from(".s0/corpus.db"));
        assert_eq!(config.llm.temperature, 0.6);
        assert_eq!(config.llm.top_p, 0.95);
        assert_eq!(config.llm.timeout_secs, 120);
        assert_eq!(config.generation.similar_count, 5);
        assert_eq!(config.generation.prompt_examples, 4);
        assert_eq!(config.server.bind, "127.0.0.1:8000");
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
[embedding]
code_model = "/models/codebert"
max_tokens = 256
cache_dir = "/tmp/hf"

[corpus]
backend = "sqlite"
sqlite_path = "data/components.db"

[llm]
base_url = "http://localhost:11434"
model = "llama3"
temperature = 0.2

[generation]
similar_count = 6
prompt_examples = 2

[server]
bind = "0.0.0.0:9000"
"#;
        let config = S0Config::from_toml(toml).unwrap();
        assert_eq!(config.embedding.code_model, "/models/codebert");
        assert_eq!(config.embedding.summary_model, "bert-base-uncased");
        assert_eq!(config.embedding.max_tokens, 256);
        assert_eq!(config.embedding.cache_dir, Some(PathBuf::from("/tmp/hf")));
        assert_eq!(config.corpus.backend, CorpusBackend::Sqlite);
        assert_eq!(config.corpus.sqlite_path, PathBuf::from("data/components.db"));
        assert_eq!(config.llm.model, "llama3");
        assert_eq!(config.llm.temperature, 0.2);
        assert_eq!(config.llm.max_completion_tokens, 4096);
        assert_eq!(config.generation.similar_count, 6);
        assert_eq!(config.generation.prompt_examples, 2);
        assert_eq!(config.server.bind, "0.0.0.0:9000");
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let config = S0Config::from_toml("").unwrap();
        assert_eq!(config.generation.similar_count, 5);
        assert_eq!(config.corpus.table, "code_components");
    }

    #[test]
    fn invalid_toml_returns_error() {
        assert!(S0Config::from_toml("{{invalid}}").is_err());
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let result = S0Config::from_toml("[corpus]\nbackend = \"mongo\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn explicit_database_url_wins() {
        let config = CorpusConfig {
            database_url: Some("postgres://localhost/components".into()),
            ..CorpusConfig::default()
        };
        assert_eq!(
            config.resolve_database_url().unwrap(),
            "postgres://localhost/components"
        );
    }

    #[test]
    fn explicit_api_key_wins() {
        let config = LlmConfig {
            api_key: Some("from-file".into()),
            ..LlmConfig::default()
        };
        assert_eq!(config.resolve_api_key().as_deref(), Some("from-file"));
    }

    #[test]
    fn blank_api_keys_fall_through() {
        let config = LlmConfig {
            api_key: Some("  ".into()),
            ..LlmConfig::default()
        };
        let key = config.api_key_from(|var| match var {
            "S0_LLM_API_KEY" => Some(String::new()),
            "GROQ_API_KEY" => Some("gsk-live".into()),
            _ => None,
        });
        assert_eq!(key.as_deref(), Some("gsk-live"));

        let none = config.api_key_from(|_| Some(String::new()));
        assert_eq!(none, None);
    }

    #[test]
    fn corpus_ca_cert_is_optional() {
        let config = S0Config::from_toml("[corpus]\nca_cert = \"certs/rds.pem\"\n").unwrap();
        assert_eq!(config.corpus.ca_cert, Some(PathBuf::from("certs/rds.pem")));
        assert_eq!(S0Config::default().corpus.ca_cert, None);
    }
}
