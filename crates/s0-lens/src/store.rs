//! Corpus access: the [`Corpus`] query seam and a SQLite-backed corpus.
//!
//! The SQLite corpus stores both embeddings as little-endian `f32` BLOBs and
//! computes Euclidean distance in Rust, matching the ordering the pgvector
//! `<->` operator produces for the Postgres backend.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection};
use s0_core::{ComponentRecord, CorpusBackend, CorpusRow, EmbeddingSpace, S0Config, S0Error};
use serde::{Deserialize, Serialize};

use crate::postgres::PgCorpus;

/// Nearest-neighbor queries over the component corpus.
///
/// Implementations return at most `limit` rows ordered by ascending distance
/// in the given space, ties broken by ascending id.
#[async_trait]
pub trait Corpus: Send + Sync {
    /// Query the `limit` components nearest to `vector` in `space`.
    ///
    /// # Errors
    ///
    /// Returns [`S0Error::Retrieval`] on connectivity failure or when the
    /// vector is malformed for the stored column.
    async fn nearest(
        &self,
        space: EmbeddingSpace,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<CorpusRow>, S0Error>;
}

/// Open the corpus backend selected in `config`.
///
/// # Errors
///
/// Returns [`S0Error::Config`] if the Postgres URL is missing, or
/// [`S0Error::Retrieval`] if the backend cannot be opened.
pub async fn open_corpus(config: &S0Config) -> Result<Arc<dyn Corpus>, S0Error> {
    match config.corpus.backend {
        CorpusBackend::Postgres => {
            let corpus = PgCorpus::connect(&config.corpus, Some(config.embedding.dimensions)).await?;
            Ok(Arc::new(corpus))
        }
        CorpusBackend::Sqlite => Ok(Arc::new(SqliteCorpus::open(&config.corpus.sqlite_path)?)),
    }
}

/// Reject query vectors the corpus cannot compare against.
///
/// # Errors
///
/// Returns [`S0Error::Retrieval`] if the vector is empty, contains a
/// non-finite value, or does not match `expected` dimensions.
///
/// # Examples
///
/// ```
/// use s0_lens::store::validate_query_vector;
///
/// assert!(validate_query_vector(&[0.1, 0.2], Some(2)).is_ok());
/// assert!(validate_query_vector(&[0.1], Some(2)).is_err());
/// assert!(validate_query_vector(&[f32::NAN], None).is_err());
/// ```
pub fn validate_query_vector(vector: &[f32], expected: Option<usize>) -> Result<(), S0Error> {
    if vector.is_empty() {
        return Err(S0Error::Retrieval("query vector is empty".into()));
    }
    if let Some(dims) = expected {
        if vector.len() != dims {
            return Err(S0Error::Retrieval(format!(
                "query vector has {} dimensions but the corpus stores {dims}",
                vector.len()
            )));
        }
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(S0Error::Retrieval(
            "query vector contains a non-finite value".into(),
        ));
    }
    Ok(())
}

/// Corpus statistics.
///
/// # Examples
///
/// ```
/// use s0_lens::store::CorpusStats;
///
/// let stats = CorpusStats {
///     total_components: 12,
///     dimensions: Some(768),
///     size_bytes: 65536,
/// };
/// assert_eq!(stats.total_components, 12);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorpusStats {
    /// Number of stored components.
    pub total_components: usize,
    /// Embedding dimension fixed by the first insert, if any.
    pub dimensions: Option<usize>,
    /// Size of the database in bytes.
    pub size_bytes: u64,
}

/// SQLite-based component corpus with BLOB-stored embeddings.
///
/// # Examples
///
/// ```
/// use s0_lens::store::SqliteCorpus;
///
/// let corpus = SqliteCorpus::in_memory().unwrap();
/// assert_eq!(corpus.stats().unwrap().total_components, 0);
/// ```
pub struct SqliteCorpus {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteCorpus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCorpus").finish_non_exhaustive()
    }
}

impl SqliteCorpus {
    /// Open or create a corpus database at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`S0Error::Retrieval`] if the database cannot be opened.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use s0_lens::store::SqliteCorpus;
    ///
    /// let corpus = SqliteCorpus::open(Path::new(".s0/corpus.db")).unwrap();
    /// ```
    pub fn open(path: &Path) -> Result<Self, S0Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                S0Error::Retrieval(format!("failed to create corpus directory: {e}"))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| S0Error::Retrieval(format!("failed to open corpus: {e}")))?;

        let corpus = Self {
            conn: Mutex::new(conn),
        };
        corpus.init_schema()?;
        Ok(corpus)
    }

    /// Create an in-memory corpus (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`S0Error::Retrieval`] if schema creation fails.
    pub fn in_memory() -> Result<Self, S0Error> {
        let conn = Connection::open_in_memory().map_err(|e| {
            S0Error::Retrieval(format!("failed to create in-memory corpus: {e}"))
        })?;

        let corpus = Self {
            conn: Mutex::new(conn),
        };
        corpus.init_schema()?;
        Ok(corpus)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, S0Error> {
        self.conn
            .lock()
            .map_err(|_| S0Error::Retrieval("corpus connection lock poisoned".into()))
    }

    fn init_schema(&self) -> Result<(), S0Error> {
        self.lock()?
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS metadata (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS code_components (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    summary TEXT NOT NULL,
                    code_snippet TEXT NOT NULL,
                    code_embedding BLOB NOT NULL,
                    summary_embedding BLOB NOT NULL
                );
                ",
            )
            .map_err(|e| S0Error::Retrieval(format!("failed to create schema: {e}")))?;

        Ok(())
    }

    /// Embedding dimension stored in metadata, if any component was inserted.
    ///
    /// # Errors
    ///
    /// Returns [`S0Error::Retrieval`] on query failure or corrupt metadata.
    pub fn dimensions(&self) -> Result<Option<usize>, S0Error> {
        let conn = self.lock()?;
        read_dimensions(&conn)
    }

    /// Insert or replace a component and both of its embeddings.
    ///
    /// The first insert fixes the corpus dimension; later records must match
    /// it in both spaces.
    ///
    /// # Errors
    ///
    /// Returns [`S0Error::Retrieval`] on dimension mismatch or insert failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use s0_core::ComponentRecord;
    /// use s0_lens::store::SqliteCorpus;
    ///
    /// let corpus = SqliteCorpus::in_memory().unwrap();
    /// corpus.upsert_component(&ComponentRecord {
    ///     id: "component_1".into(),
    ///     title: "Button".into(),
    ///     summary: "Primary button".into(),
    ///     code_snippet: "<button>Go</button>".into(),
    ///     code_embedding: vec![0.1, 0.2, 0.3],
    ///     summary_embedding: vec![0.3, 0.2, 0.1],
    /// }).unwrap();
    /// assert_eq!(corpus.dimensions().unwrap(), Some(3));
    /// ```
    pub fn upsert_component(&self, record: &ComponentRecord) -> Result<(), S0Error> {
        let conn = self.lock()?;
        let dims = record.code_embedding.len();
        if record.summary_embedding.len() != dims {
            return Err(S0Error::Retrieval(format!(
                "component {} has {dims} code dimensions but {} summary dimensions",
                record.id,
                record.summary_embedding.len()
            )));
        }

        match read_dimensions(&conn)? {
            Some(stored) if stored != dims => {
                return Err(S0Error::Retrieval(format!(
                    "corpus was created with {stored} dimensions but component {} has {dims}",
                    record.id
                )));
            }
            Some(_) => {}
            None => {
                conn.execute(
                    "INSERT OR REPLACE INTO metadata (key, value) VALUES ('embedding_dimensions', ?1)",
                    params![dims.to_string()],
                )
                .map_err(|e| S0Error::Retrieval(format!("failed to set dimensions: {e}")))?;
            }
        }

        conn.execute(
            "INSERT OR REPLACE INTO code_components
             (id, title, summary, code_snippet, code_embedding, summary_embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id,
                record.title,
                record.summary,
                record.code_snippet,
                floats_to_bytes(&record.code_embedding),
                floats_to_bytes(&record.summary_embedding),
            ],
        )
        .map_err(|e| S0Error::Retrieval(format!("failed to insert component: {e}")))?;

        Ok(())
    }

    /// Nearest components to `vector` in `space` by Euclidean distance.
    ///
    /// # Errors
    ///
    /// Returns [`S0Error::Retrieval`] on query failure or a malformed vector.
    ///
    /// # Examples
    ///
    /// ```
    /// use s0_core::EmbeddingSpace;
    /// use s0_lens::store::SqliteCorpus;
    ///
    /// let corpus = SqliteCorpus::in_memory().unwrap();
    /// let rows = corpus.vector_search(EmbeddingSpace::Code, &[0.1, 0.2], 5).unwrap();
    /// assert!(rows.is_empty());
    /// ```
    pub fn vector_search(
        &self,
        space: EmbeddingSpace,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<CorpusRow>, S0Error> {
        let conn = self.lock()?;
        validate_query_vector(vector, read_dimensions(&conn)?)?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id, title, summary, code_snippet, {} FROM code_components",
            space.column()
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| S0Error::Retrieval(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                let embedding_bytes: Vec<u8> = row.get(4)?;
                let embedding = bytes_to_floats(&embedding_bytes);
                Ok(CorpusRow {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    summary: row.get(2)?,
                    code_snippet: row.get(3)?,
                    distance: euclidean_distance(vector, &embedding),
                })
            })
            .map_err(|e| S0Error::Retrieval(format!("failed to query components: {e}")))?;

        let mut scored = Vec::new();
        for row in rows {
            scored.push(row.map_err(|e| S0Error::Retrieval(format!("failed to read row: {e}")))?);
        }

        scored.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(limit);

        Ok(scored)
    }

    /// Get corpus statistics.
    ///
    /// # Errors
    ///
    /// Returns [`S0Error::Retrieval`] on query failure.
    pub fn stats(&self) -> Result<CorpusStats, S0Error> {
        let conn = self.lock()?;
        let total_components: i64 = conn
            .query_row("SELECT COUNT(*) FROM code_components", [], |row| row.get(0))
            .map_err(|e| S0Error::Retrieval(format!("failed to count components: {e}")))?;

        // For in-memory databases, page_count returns a small number
        let page_count: i64 = conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))
            .unwrap_or(0);
        let page_size: i64 = conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))
            .unwrap_or(4096);

        Ok(CorpusStats {
            total_components: total_components as usize,
            dimensions: read_dimensions(&conn)?,
            size_bytes: (page_count * page_size) as u64,
        })
    }
}

#[async_trait]
impl Corpus for SqliteCorpus {
    async fn nearest(
        &self,
        space: EmbeddingSpace,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<CorpusRow>, S0Error> {
        self.vector_search(space, vector, limit)
    }
}

fn read_dimensions(conn: &Connection) -> Result<Option<usize>, S0Error> {
    let result: rusqlite::Result<String> = conn.query_row(
        "SELECT value FROM metadata WHERE key = 'embedding_dimensions'",
        [],
        |row| row.get(0),
    );

    match result {
        Ok(value) => value.parse().map(Some).map_err(|_| {
            S0Error::Retrieval(format!("corrupted dimension metadata in corpus: '{value}'"))
        }),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(S0Error::Retrieval(format!(
            "failed to read dimension metadata: {e}"
        ))),
    }
}

fn floats_to_bytes(floats: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(floats.len() * 4);
    for f in floats {
        bytes.extend_from_slice(&f.to_le_bytes());
    }
    bytes
}

fn bytes_to_floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum::<f64>()
        .sqrt()
}
