use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A stored UI component with its two precomputed embeddings.
///
/// Records are owned by the corpus; this pipeline only reads them. Each
/// embedding has the fixed dimension of its space and is replaced as a
/// whole, never partially updated.
///
/// # Examples
///
/// ```
/// use s0_core::ComponentRecord;
///
/// let record = ComponentRecord {
///     id: "component_1".into(),
///     title: "Login Form".into(),
///     summary: "Email and password form with submit button".into(),
///     code_snippet: "<form>...</form>".into(),
///     code_embedding: vec![0.1, 0.2],
///     summary_embedding: vec![0.3, 0.4],
/// };
/// assert_eq!(record.code_embedding.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    /// Stable unique identifier.
    pub id: String,
    /// Short human-readable title.
    pub title: String,
    /// Natural-language summary of what the component does.
    pub summary: String,
    /// Component source text.
    pub code_snippet: String,
    /// Vector in the code embedding space.
    pub code_embedding: Vec<f32>,
    /// Vector in the summary embedding space.
    pub summary_embedding: Vec<f32>,
}

/// One of the two independent embedding spaces.
///
/// Vectors are only comparable within the same space.
///
/// # Examples
///
/// ```
/// use s0_core::EmbeddingSpace;
///
/// assert_eq!(EmbeddingSpace::Code.column(), "code_embedding");
/// assert_eq!(EmbeddingSpace::Summary.to_string(), "summary");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingSpace {
    /// Derived from component source code.
    Code,
    /// Derived from the natural-language summary.
    Summary,
}

impl EmbeddingSpace {
    /// Name of the corpus column holding vectors for this space.
    pub fn column(self) -> &'static str {
        match self {
            EmbeddingSpace::Code => "code_embedding",
            EmbeddingSpace::Summary => "summary_embedding",
        }
    }
}

impl fmt::Display for EmbeddingSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddingSpace::Code => write!(f, "code"),
            EmbeddingSpace::Summary => write!(f, "summary"),
        }
    }
}

/// A raw nearest-neighbor row returned by a corpus query.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusRow {
    /// Component identifier.
    pub id: String,
    /// Component title.
    pub title: String,
    /// Component summary.
    pub summary: String,
    /// Component source text.
    pub code_snippet: String,
    /// Distance between the query vector and the stored vector.
    pub distance: f64,
}

impl CorpusRow {
    /// Convert into a match, scoring it as `1 - distance`.
    ///
    /// # Examples
    ///
    /// ```
    /// use s0_core::{CorpusRow, EmbeddingSpace};
    ///
    /// let row = CorpusRow {
    ///     id: "a".into(),
    ///     title: "A".into(),
    ///     summary: String::new(),
    ///     code_snippet: String::new(),
    ///     distance: 0.25,
    /// };
    /// let m = row.into_match(EmbeddingSpace::Code);
    /// assert_eq!(m.similarity_score, 0.75);
    /// assert_eq!(m.space, EmbeddingSpace::Code);
    /// ```
    pub fn into_match(self, space: EmbeddingSpace) -> ComponentMatch {
        ComponentMatch {
            id: self.id,
            title: self.title,
            summary: self.summary,
            code_snippet: self.code_snippet,
            similarity_score: 1.0 - self.distance,
            space,
        }
    }
}

/// A retrieved component, scored against the query.
///
/// The score is not guaranteed to lie in `[0, 1]`: it is `1 - distance` under
/// whatever metric the corpus uses. `space` records which query produced the
/// match and is not serialized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentMatch {
    /// Component identifier.
    pub id: String,
    /// Component title.
    pub title: String,
    /// Component summary.
    pub summary: String,
    /// Component source text.
    pub code_snippet: String,
    /// `1 - distance` in the originating space.
    pub similarity_score: f64,
    /// Space whose query produced this match.
    #[serde(skip)]
    pub space: EmbeddingSpace,
}

/// Shape of the code the generator is asked to produce.
///
/// # Examples
///
/// ```
/// use s0_core::OutputFormat;
///
/// let fmt: OutputFormat = "jsx-ts".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::JsxTs);
/// assert_eq!(fmt.to_string(), "jsx-ts");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Semantic HTML5 markup with CSS classes.
    #[default]
    #[serde(rename = "html")]
    Html,
    /// React function component in JavaScript.
    #[serde(rename = "jsx-js")]
    JsxJs,
    /// React function component in TypeScript.
    #[serde(rename = "jsx-ts")]
    JsxTs,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Html => write!(f, "html"),
            OutputFormat::JsxJs => write!(f, "jsx-js"),
            OutputFormat::JsxTs => write!(f, "jsx-ts"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "html" => Ok(OutputFormat::Html),
            "jsx-js" | "jsx" => Ok(OutputFormat::JsxJs),
            "jsx-ts" | "tsx" => Ok(OutputFormat::JsxTs),
            other => Err(format!(
                "unknown output format: {other} (expected html, jsx-js or jsx-ts)"
            )),
        }
    }
}

/// How a search request combines the two spaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Return each space's ranked list separately, each up to `limit`.
    #[default]
    PerSpace,
    /// Return one deduplicated list of at most `limit` matches.
    Merged,
}

/// Output format for CLI reports.
///
/// # Examples
///
/// ```
/// use s0_core::ReportFormat;
///
/// let fmt: ReportFormat = "md".parse().unwrap();
/// assert_eq!(fmt, ReportFormat::Markdown);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Human-readable summaries.
    #[default]
    Text,
    /// Machine-readable JSON.
    Json,
    /// Markdown-formatted output.
    Markdown,
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportFormat::Text => write!(f, "text"),
            ReportFormat::Json => write!(f, "json"),
            ReportFormat::Markdown => write!(f, "markdown"),
        }
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            "markdown" | "md" => Ok(ReportFormat::Markdown),
            other => Err(format!("unknown report format: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_format_wire_names() {
        assert_eq!(serde_json::to_string(&OutputFormat::Html).unwrap(), "\"html\"");
        assert_eq!(serde_json::to_string(&OutputFormat::JsxJs).unwrap(), "\"jsx-js\"");
        let parsed: OutputFormat = serde_json::from_str("\"jsx-ts\"").unwrap();
        assert_eq!(parsed, OutputFormat::JsxTs);
        assert!(serde_json::from_str::<OutputFormat>("\"svelte\"").is_err());
    }

    #[test]
    fn output_format_from_str() {
        assert_eq!("HTML".parse::<OutputFormat>().unwrap(), OutputFormat::Html);
        assert_eq!("jsx".parse::<OutputFormat>().unwrap(), OutputFormat::JsxJs);
        assert_eq!("tsx".parse::<OutputFormat>().unwrap(), OutputFormat::JsxTs);
        assert!("vue".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn report_format_round_trips_through_display() {
        for fmt in [ReportFormat::Text, ReportFormat::Json, ReportFormat::Markdown] {
            assert_eq!(fmt.to_string().parse::<ReportFormat>().unwrap(), fmt);
        }
        assert!("xml".parse::<ReportFormat>().is_err());
    }

    #[test]
    fn similarity_can_fall_below_zero() {
        let row = CorpusRow {
            id: "far".into(),
            title: String::new(),
            summary: String::new(),
            code_snippet: String::new(),
            distance: 3.5,
        };
        assert_eq!(row.into_match(EmbeddingSpace::Summary).similarity_score, -2.5);
    }

    #[test]
    fn match_serializes_without_space() {
        let m = ComponentMatch {
            id: "a".into(),
            title: "A".into(),
            summary: "s".into(),
            code_snippet: "<div/>".into(),
            similarity_score: 0.5,
            space: EmbeddingSpace::Summary,
        };
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["id"], "a");
        assert_eq!(json["similarity_score"], 0.5);
        assert!(json.get("space").is_none());
    }

    #[test]
    fn search_mode_defaults_to_per_space() {
        assert_eq!(SearchMode::default(), SearchMode::PerSpace);
        let parsed: SearchMode = serde_json::from_str("\"merged\"").unwrap();
        assert_eq!(parsed, SearchMode::Merged);
    }
}
