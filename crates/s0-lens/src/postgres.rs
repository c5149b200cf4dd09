//! Postgres + pgvector corpus backend.
//!
//! Queries the `code_components` table with the `<->` (Euclidean) operator,
//! binding the query vector as a typed `vector` parameter. Connections
//! negotiate TLS according to the URL's `sslmode` and are reopened when the
//! server drops them.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use pgvector::Vector;
use rustls::{ClientConfig, RootCertStore};
use s0_core::{CorpusConfig, CorpusRow, EmbeddingSpace, S0Error};
use tokio::sync::Mutex;
use tokio_postgres::Client;
use tokio_postgres_rustls::MakeRustlsConnect;

use crate::store::{validate_query_vector, Corpus};

/// Fully-qualified Postgres table name (schema + table).
///
/// # Examples
///
/// ```
/// use s0_lens::postgres::TableName;
///
/// let table = TableName::new("public", "code_components").unwrap();
/// assert_eq!(table.qualified(), "\"public\".\"code_components\"");
/// ```
#[derive(Debug, Clone)]
pub struct TableName {
    schema: String,
    table: String,
}

impl TableName {
    /// Build a table identifier.
    ///
    /// # Errors
    ///
    /// Returns [`S0Error::Config`] if either part is blank.
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Result<Self, S0Error> {
        let schema = schema.into();
        let table = table.into();
        if schema.trim().is_empty() {
            return Err(S0Error::Config("corpus schema name is required".into()));
        }
        if table.trim().is_empty() {
            return Err(S0Error::Config("corpus table name is required".into()));
        }
        Ok(Self { schema, table })
    }

    /// Fully-qualified table reference with quoted identifiers.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }
}

/// Quote a Postgres identifier, escaping embedded quotes.
pub fn quote_ident(input: &str) -> String {
    format!("\"{}\"", input.replace('"', "\"\""))
}

fn nearest_sql(table: &TableName, space: EmbeddingSpace) -> String {
    let column = quote_ident(space.column());
    format!(
        "SELECT \
            id::text AS id, \
            title, \
            summary, \
            code_snippet, \
            ({column} <-> $1)::float8 AS distance \
        FROM {} \
        ORDER BY {column} <-> $1 ASC, id ASC \
        LIMIT $2",
        table.qualified()
    )
}

/// Build the TLS connector used for every Postgres connection.
///
/// Trusts the bundled web PKI roots plus any certificates in `ca_cert`.
/// Whether TLS is actually used is decided by the URL's `sslmode`.
///
/// # Errors
///
/// Returns [`S0Error::Config`] if the CA bundle cannot be read or holds no
/// usable certificate.
pub fn tls_connector(ca_cert: Option<&Path>) -> Result<MakeRustlsConnect, S0Error> {
    let mut roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    if let Some(path) = ca_cert {
        let file = std::fs::File::open(path).map_err(|e| {
            S0Error::Config(format!("failed to open CA bundle {}: {e}", path.display()))
        })?;
        let certs = rustls_pemfile::certs(&mut std::io::BufReader::new(file))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| S0Error::Config(format!("invalid CA bundle {}: {e}", path.display())))?;
        let (added, ignored) = roots.add_parsable_certificates(certs);
        if added == 0 {
            return Err(S0Error::Config(format!(
                "CA bundle {} contains no usable certificates",
                path.display()
            )));
        }
        tracing::debug!(path = %path.display(), added, ignored, "loaded postgres CA bundle");
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| S0Error::Config(format!("failed to configure TLS: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(MakeRustlsConnect::new(config))
}

async fn open_client(url: &str, tls: MakeRustlsConnect) -> Result<Client, S0Error> {
    let (client, connection) = tokio_postgres::connect(url, tls)
        .await
        .map_err(|e| S0Error::Retrieval(format!("failed to connect to Postgres: {e}")))?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            tracing::error!(error = %err, "postgres connection error");
        }
    });
    Ok(client)
}

/// Corpus stored in Postgres with pgvector columns.
pub struct PgCorpus {
    url: String,
    tls: MakeRustlsConnect,
    client: Mutex<Arc<Client>>,
    table: TableName,
    dimensions: Option<usize>,
}

impl std::fmt::Debug for PgCorpus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgCorpus")
            .field("table", &self.table)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

impl PgCorpus {
    /// Connect using a [`CorpusConfig`].
    ///
    /// The connection task is spawned onto the current runtime. Query
    /// vectors are checked against `dimensions` before they are sent.
    ///
    /// # Errors
    ///
    /// Returns [`S0Error::Config`] if no database URL is configured or the
    /// CA bundle is unusable, or [`S0Error::Retrieval`] if the connection
    /// fails.
    pub async fn connect(config: &CorpusConfig, dimensions: Option<usize>) -> Result<Self, S0Error> {
        let url = config.resolve_database_url()?;
        let table = TableName::new(config.schema.clone(), config.table.clone())?;
        let tls = tls_connector(config.ca_cert.as_deref())?;

        let client = open_client(&url, tls.clone()).await?;
        tracing::debug!(table = %table.qualified(), "connected to pgvector corpus");
        Ok(Self {
            url,
            tls,
            client: Mutex::new(Arc::new(client)),
            table,
            dimensions,
        })
    }

    /// The live client, reconnecting first if the server closed the last one.
    async fn client(&self) -> Result<Arc<Client>, S0Error> {
        let mut current = self.client.lock().await;
        if current.is_closed() {
            tracing::warn!(table = %self.table.qualified(), "postgres connection closed, reconnecting");
            *current = Arc::new(open_client(&self.url, self.tls.clone()).await?);
        }
        Ok(Arc::clone(&current))
    }

    /// Check that the corpus table is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`S0Error::Retrieval`] if the table cannot be queried.
    pub async fn count(&self) -> Result<i64, S0Error> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table.qualified());
        let row = self
            .client()
            .await?
            .query_one(sql.as_str(), &[])
            .await
            .map_err(|e| S0Error::Retrieval(format!("failed to count components: {e}")))?;
        Ok(row.get(0))
    }
}

#[async_trait]
impl Corpus for PgCorpus {
    async fn nearest(
        &self,
        space: EmbeddingSpace,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<CorpusRow>, S0Error> {
        validate_query_vector(vector, self.dimensions)?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let sql = nearest_sql(&self.table, space);
        let vector = Vector::from(vector.to_vec());
        let rows = self
            .client()
            .await?
            .query(sql.as_str(), &[&vector, &(limit as i64)])
            .await
            .map_err(|e| S0Error::Retrieval(format!("{space} similarity query failed: {e}")))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(CorpusRow {
                id: row
                    .try_get("id")
                    .map_err(|e| S0Error::Retrieval(format!("failed to read id: {e}")))?,
                title: row
                    .try_get("title")
                    .map_err(|e| S0Error::Retrieval(format!("failed to read title: {e}")))?,
                summary: row
                    .try_get("summary")
                    .map_err(|e| S0Error::Retrieval(format!("failed to read summary: {e}")))?,
                code_snippet: row.try_get("code_snippet").map_err(|e| {
                    S0Error::Retrieval(format!("failed to read code_snippet: {e}"))
                })?,
                distance: row
                    .try_get("distance")
                    .map_err(|e| S0Error::Retrieval(format!("failed to read distance: {e}")))?,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const SSL_REQUEST_CODE: u32 = 80877103;

    fn local_config(port: u16, query: &str) -> CorpusConfig {
        CorpusConfig {
            database_url: Some(format!("postgres://s0@127.0.0.1:{port}/components{query}")),
            ..CorpusConfig::default()
        }
    }

    async fn read_packet(stream: &mut TcpStream) -> Vec<u8> {
        let len = stream.read_u32().await.unwrap() as usize;
        let mut body = vec![0; len - 4];
        stream.read_exact(&mut body).await.unwrap();
        body
    }

    /// Decline TLS, then accept the session without authentication.
    async fn accept_session(stream: &mut TcpStream) {
        assert_eq!(read_packet(stream).await, SSL_REQUEST_CODE.to_be_bytes());
        stream.write_all(b"N").await.unwrap();
        read_packet(stream).await;
        stream.write_all(&[b'R', 0, 0, 0, 8, 0, 0, 0, 0]).await.unwrap();
        stream.write_all(&[b'Z', 0, 0, 0, 5, b'I']).await.unwrap();
    }

    #[tokio::test]
    async fn required_tls_starts_a_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            assert_eq!(read_packet(&mut stream).await, SSL_REQUEST_CODE.to_be_bytes());
            stream.write_all(b"S").await.unwrap();
            stream.read_u8().await.unwrap()
        });

        let err = PgCorpus::connect(&local_config(port, "?sslmode=require"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, S0Error::Retrieval(_)));
        assert!(!err.to_string().contains("no TLS implementation"));
        // TLS handshake record type
        assert_eq!(server.await.unwrap(), 0x16);
    }

    #[tokio::test]
    async fn closed_connection_is_reopened() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut first, _) = listener.accept().await.unwrap();
            accept_session(&mut first).await;
            drop(first);
            let (mut second, _) = listener.accept().await.unwrap();
            accept_session(&mut second).await;
            second
        });

        let corpus = PgCorpus::connect(&local_config(port, ""), Some(2))
            .await
            .unwrap();
        for _ in 0..200 {
            if corpus.client.lock().await.is_closed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(corpus.client.lock().await.is_closed());

        let client = corpus.client().await.unwrap();
        assert!(!client.is_closed());
        let _held_open = server.await.unwrap();
    }

    #[test]
    fn tls_connector_accepts_default_roots() {
        assert!(tls_connector(None).is_ok());
    }

    #[test]
    fn unusable_ca_bundle_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.pem");
        assert!(matches!(
            tls_connector(Some(&missing)),
            Err(S0Error::Config(_))
        ));

        let empty = dir.path().join("empty.pem");
        std::fs::write(&empty, "not a certificate\n").unwrap();
        let err = tls_connector(Some(&empty)).err().unwrap();
        assert!(err.to_string().contains("no usable certificates"));
    }

    #[test]
    fn quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn blank_table_is_rejected() {
        assert!(TableName::new("public", " ").is_err());
        assert!(TableName::new("", "code_components").is_err());
    }

    #[test]
    fn nearest_sql_uses_euclidean_operator_per_space() {
        let table = TableName::new("public", "code_components").unwrap();

        let code = nearest_sql(&table, EmbeddingSpace::Code);
        assert!(code.contains("\"code_embedding\" <-> $1"));
        assert!(code.contains("FROM \"public\".\"code_components\""));
        assert!(code.contains("ORDER BY \"code_embedding\" <-> $1 ASC, id ASC"));
        assert!(code.ends_with("LIMIT $2"));

        let summary = nearest_sql(&table, EmbeddingSpace::Summary);
        assert!(summary.contains("\"summary_embedding\" <-> $1"));
        assert!(!summary.contains("code_embedding"));
    }
}
