/// Errors that can occur across s0.
///
/// The first four variants are the pipeline failure domains. `Embedding` and
/// `Retrieval` are fatal to a request; `Completion` and `Parse` are
/// recoverable: the caller still gets the matches that were already computed.
/// Library crates use this type directly; the binary renders it through
/// `miette`.
///
/// # Examples
///
/// ```
/// use s0_core::S0Error;
///
/// let err = S0Error::Config("missing API key".into());
/// assert!(err.to_string().contains("missing API key"));
/// assert!(!err.is_recoverable());
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum S0Error {
    /// Embedding inference failed.
    #[error("embedding error: {0}")]
    #[diagnostic(code(s0::embedding))]
    Embedding(String),

    /// Corpus query failed (connectivity or malformed vector).
    #[error("retrieval error: {0}")]
    #[diagnostic(
        code(s0::retrieval),
        help("check [corpus] in .s0.toml and that the corpus database is reachable")
    )]
    Retrieval(String),

    /// The LLM completion call failed outright.
    #[error("completion error: {0}")]
    #[diagnostic(code(s0::completion))]
    Completion(String),

    /// The completion text did not contain the expected sections.
    #[error("parse error: {0}")]
    #[diagnostic(code(s0::parse))]
    Parse(String),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    #[diagnostic(code(s0::config), help("run `s0 doctor` to inspect the active configuration"))]
    Config(String),

    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    #[diagnostic(code(s0::io))]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    #[diagnostic(code(s0::serialization))]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    #[diagnostic(code(s0::toml))]
    Toml(#[from] toml::de::Error),
}

impl S0Error {
    /// Whether a generation request can still answer with its matches.
    ///
    /// # Examples
    ///
    /// ```
    /// use s0_core::S0Error;
    ///
    /// assert!(S0Error::Parse("no markers".into()).is_recoverable());
    /// assert!(S0Error::Completion("timeout".into()).is_recoverable());
    /// assert!(!S0Error::Retrieval("down".into()).is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        matches!(self, S0Error::Completion(_) | S0Error::Parse(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: S0Error = io_err.into();
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn config_error_displays_message() {
        let err = S0Error::Config("bad value".into());
        assert_eq!(err.to_string(), "configuration error: bad value");
    }

    #[test]
    fn only_generation_failures_are_recoverable() {
        assert!(!S0Error::Embedding("x".into()).is_recoverable());
        assert!(!S0Error::Retrieval("x".into()).is_recoverable());
        assert!(!S0Error::Config("x".into()).is_recoverable());
        assert!(S0Error::Completion("x".into()).is_recoverable());
        assert!(S0Error::Parse("x".into()).is_recoverable());
    }
}
