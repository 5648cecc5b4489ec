//! pgvector-backed document table: schema, ANN index lifecycle and row access.

use pgvector::Vector;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, Row, Statement};
use tracing::{debug, error, info, warn};

use crate::config::{DistanceMetric, StoreConfig};
use crate::document::{Document, SimilarDocument};
use crate::error::{DbContext, Error, Result};

const DOCUMENT_COLUMNS: &str =
    "id, title, link, summary, source_name, authors, tags, published, created_at";

/// Fully-qualified Postgres table name (schema + table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    schema: String,
    table: String,
}

impl TableName {
    /// Builds a new table identifier.
    pub fn new<S, T>(schema: S, table: T) -> Result<Self>
    where
        S: Into<String>,
        T: Into<String>,
    {
        let schema = schema.into();
        let table = table.into();
        if schema.trim().is_empty() {
            return Err(Error::Config("schema name is required".to_string()));
        }
        if table.trim().is_empty() {
            return Err(Error::Config("table name is required".to_string()));
        }
        Ok(Self { schema, table })
    }

    /// Fully-qualified table reference with quoted identifiers.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }

    /// Returns the raw schema string.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Returns the raw table string.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Name of the IVFFlat index over the embedding column.
    pub fn index_name(&self) -> String {
        format!(
            "{}_{}_embedding_ivfflat_idx",
            sanitize_ident(&self.schema),
            sanitize_ident(&self.table)
        )
    }
}

/// Quotes Postgres identifiers, escaping embedded quotes.
pub fn quote_ident(input: &str) -> String {
    let escaped = input.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

fn sanitize_ident(input: &str) -> String {
    input
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect()
}

/// Which rows `fetch_documents` returns.
#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum RefreshScope {
    /// Every row.
    All,
    /// Rows whose embedding is still NULL.
    Missing,
}

/// Outcome of reconciling the table with the configured dimension.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SchemaState {
    /// Table and vector column already matched (or were just created).
    Ready,
    /// The vector column had another width and was recreated; every embedding
    /// is NULL until the synchronizer runs again.
    EmbeddingsReset {
        /// Width of the dropped column.
        previous: usize,
    },
}

/// How an upsert landed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WriteKind {
    /// A new row was created.
    Inserted,
    /// An existing row with the same id was updated in place.
    Updated,
}

/// Owning handle on one Postgres connection and the document table behind it.
///
/// The connection lives exactly as long as this value; dropping it (on any
/// path) closes the session.
pub struct VectorStore {
    client: Client,
    connection: JoinHandle<()>,
    table: TableName,
    dimension: usize,
    metric: DistanceMetric,
    schema_state: SchemaState,
}

impl VectorStore {
    /// Connects and makes sure the table, vector column and extension exist.
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        let pg_config = config.connection().pg_config()?;
        let target = config.connection().display_target();
        let (client, connection) =
            pg_config
                .connect(NoTls)
                .await
                .map_err(|source| Error::Connect {
                    target: target.clone(),
                    source,
                })?;
        let connection = tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(error = %err, "postgres connection error");
            }
        });
        debug!(%target, "connected to postgres");

        let mut store = Self {
            client,
            connection,
            table: config.table().clone(),
            dimension: config.dimension(),
            metric: config.metric(),
            schema_state: SchemaState::Ready,
        };
        store.schema_state = store
            .ensure_schema(config.reset_on_dimension_change())
            .await?;
        Ok(store)
    }

    /// Target table.
    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Width of the vector column.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Metric used for ranking.
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// What `open` found when reconciling the schema.
    pub fn schema_state(&self) -> SchemaState {
        self.schema_state
    }

    /// Underlying driver client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Closes the session and waits for the connection task to finish.
    pub async fn close(self) {
        let Self {
            client, connection, ..
        } = self;
        drop(client);
        if let Err(err) = connection.await {
            warn!(error = %err, "postgres connection task did not shut down cleanly");
        }
    }

    async fn ensure_schema(&mut self, reset_on_mismatch: bool) -> Result<SchemaState> {
        let qualified = self.table.qualified();
        let dims = self.dimension;
        let has_extension = self
            .client
            .query_opt("SELECT 1 FROM pg_extension WHERE extname = 'vector'", &[])
            .await
            .db_context("failed to inspect installed extensions")?
            .is_some();
        if !has_extension {
            self.client
                .batch_execute("CREATE EXTENSION IF NOT EXISTS vector")
                .await
                .db_context("failed to ensure pgvector extension")?;
        }
        let has_schema = self
            .client
            .query_opt(
                "SELECT 1 FROM pg_namespace WHERE nspname = $1",
                &[&self.table.schema()],
            )
            .await
            .db_context("failed to inspect schemas")?
            .is_some();
        if !has_schema {
            self.client
                .batch_execute(&format!(
                    "CREATE SCHEMA IF NOT EXISTS {}",
                    quote_ident(self.table.schema())
                ))
                .await
                .db_context("failed to ensure schema")?;
            info!(schema = %self.table.schema(), "created schema");
        }
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {qualified} (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                link TEXT NOT NULL DEFAULT '',
                summary TEXT NOT NULL DEFAULT '',
                source_name TEXT NOT NULL DEFAULT '',
                authors TEXT[] NOT NULL DEFAULT '{{}}',
                tags TEXT[] NOT NULL DEFAULT '{{}}',
                published TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                embedding VECTOR({dims})
            )"
        );
        self.client
            .batch_execute(&ddl)
            .await
            .db_context("failed to create document table")?;
        self.client
            .batch_execute(&format!(
                "ALTER TABLE {qualified} ADD COLUMN IF NOT EXISTS embedding VECTOR({dims})"
            ))
            .await
            .db_context("failed to ensure embedding column")?;

        let stored = self.stored_dimension().await?;
        if stored == dims {
            return Ok(SchemaState::Ready);
        }
        if !reset_on_mismatch {
            return Err(Error::DimensionMismatch {
                expected: dims,
                actual: stored,
            });
        }

        warn!(
            table = %qualified,
            previous = stored,
            configured = dims,
            "vector column width changed; dropping stored embeddings"
        );
        let tx = self
            .client
            .transaction()
            .await
            .db_context("failed to start dimension reset")?;
        tx.batch_execute(&format!("ALTER TABLE {qualified} DROP COLUMN embedding"))
            .await
            .db_context("failed to drop embedding column")?;
        tx.batch_execute(&format!(
            "ALTER TABLE {qualified} ADD COLUMN embedding VECTOR({dims})"
        ))
        .await
        .db_context("failed to recreate embedding column")?;
        tx.commit()
            .await
            .db_context("failed to commit dimension reset")?;
        Ok(SchemaState::EmbeddingsReset { previous: stored })
    }

    /// Declared width of the stored vector column (0 when undeclared).
    pub async fn stored_dimension(&self) -> Result<usize> {
        let row = self
            .client
            .query_opt(
                "SELECT a.atttypmod FROM pg_attribute a \
                 WHERE a.attrelid = $1::text::regclass \
                   AND a.attname = 'embedding' \
                   AND NOT a.attisdropped",
                &[&self.table.qualified()],
            )
            .await
            .db_context("failed to inspect embedding column")?;
        let typmod: i32 = row.map(|row| row.get(0)).unwrap_or(-1);
        Ok(usize::try_from(typmod).unwrap_or(0))
    }

    /// Drops and recreates the IVFFlat index, then refreshes planner statistics.
    ///
    /// Drop and create share one transaction, so a failed rebuild leaves the
    /// previous index in place.
    pub async fn build_index(&mut self, lists: u32, metric: DistanceMetric) -> Result<()> {
        if lists == 0 {
            return Err(Error::Config("index lists must be positive".to_string()));
        }
        let index = self.table.index_name();
        if let Err(err) = self.rebuild_index(&index, lists, metric).await {
            error!(index = %index, error = %err, "index rebuild failed; previous index kept");
            return Err(err);
        }
        self.client
            .batch_execute(&format!("ANALYZE {}", self.table.qualified()))
            .await
            .db_context("failed to analyze table")?;
        info!(index = %index, lists, metric = ?metric, "ivfflat index rebuilt");
        Ok(())
    }

    async fn rebuild_index(&mut self, index: &str, lists: u32, metric: DistanceMetric) -> Result<()> {
        let index_err = |source: tokio_postgres::Error| Error::Index {
            index: index.to_string(),
            source,
        };
        let drop_sql = format!(
            "DROP INDEX IF EXISTS {}.{}",
            quote_ident(self.table.schema()),
            quote_ident(index)
        );
        let create_sql = create_index_sql(&self.table, lists, metric);
        let tx = self.client.transaction().await.map_err(index_err)?;
        tx.batch_execute(&drop_sql).await.map_err(index_err)?;
        tx.batch_execute(&create_sql).await.map_err(index_err)?;
        tx.commit().await.map_err(index_err)?;
        Ok(())
    }

    /// Total number of rows.
    pub async fn count(&self) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table.qualified());
        self.count_with(&sql).await
    }

    /// Number of rows with a non-null embedding.
    pub async fn count_embedded(&self) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE embedding IS NOT NULL",
            self.table.qualified()
        );
        self.count_with(&sql).await
    }

    async fn count_with(&self, sql: &str) -> Result<u64> {
        let row = self
            .client
            .query_one(sql, &[])
            .await
            .db_context("failed to count documents")?;
        let count: i64 = row.get(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Loads documents (without embeddings) for re-embedding.
    pub async fn fetch_documents(&self, scope: RefreshScope) -> Result<Vec<Document>> {
        let filter = match scope {
            RefreshScope::All => "",
            RefreshScope::Missing => " WHERE embedding IS NULL",
        };
        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM {}{filter} ORDER BY id",
            self.table.qualified()
        );
        let rows = self
            .client
            .query(&sql, &[])
            .await
            .db_context("failed to fetch documents")?;
        Ok(rows.iter().map(document_from_row).collect())
    }

    /// Loads one document including its embedding.
    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS}, embedding FROM {} WHERE id = $1",
            self.table.qualified()
        );
        let row = self
            .client
            .query_opt(&sql, &[&id])
            .await
            .with_db_context(|| format!("failed to load document {id}"))?;
        Ok(row.map(|row| {
            let mut document = document_from_row(&row);
            let embedding: Option<Vector> = row.get("embedding");
            document.embedding = embedding.map(|vector| vector.to_vec());
            document
        }))
    }

    /// Prepares the insert-or-update statement used by `write_document`.
    pub async fn prepare_upsert(&self) -> Result<Statement> {
        self.client
            .prepare(&upsert_sql(&self.table))
            .await
            .db_context("failed to prepare upsert statement")
    }

    /// Writes `document` with `embedding` in one conflict-resolving statement.
    pub async fn write_document(
        &self,
        statement: &Statement,
        document: &Document,
        embedding: &[f32],
    ) -> Result<WriteKind> {
        self.check_dimension(embedding)?;
        let vector = Vector::from(embedding.to_vec());
        let row = self
            .client
            .query_one(
                statement,
                &[
                    &document.id,
                    &document.title,
                    &document.link,
                    &document.summary,
                    &document.source_name,
                    &document.authors,
                    &document.tags,
                    &document.published,
                    &vector,
                ],
            )
            .await
            .with_db_context(|| format!("failed to upsert document {}", document.id))?;
        let inserted: bool = row.get("inserted");
        Ok(if inserted {
            WriteKind::Inserted
        } else {
            WriteKind::Updated
        })
    }

    /// Nearest rows to `embedding` under the store's metric, closest first.
    pub async fn nearest(&self, embedding: &[f32], limit: usize) -> Result<Vec<SimilarDocument>> {
        self.check_dimension(embedding)?;
        if limit == 0 {
            return Err(Error::InvalidTopK);
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let vector = Vector::from(embedding.to_vec());
        let rows = self
            .client
            .query(&nearest_sql(&self.table, self.metric), &[&vector, &limit])
            .await
            .db_context("failed to run similarity search")?;
        Ok(rows
            .iter()
            .map(|row| SimilarDocument {
                document: document_from_row(row),
                distance: row.get("distance"),
            })
            .collect())
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        Ok(())
    }
}

fn document_from_row(row: &Row) -> Document {
    Document {
        id: row.get("id"),
        title: row.get("title"),
        link: row.get("link"),
        summary: row.get("summary"),
        source_name: row.get("source_name"),
        authors: row.get("authors"),
        tags: row.get("tags"),
        published: row.get("published"),
        created_at: row.get("created_at"),
        embedding: None,
    }
}

fn create_index_sql(table: &TableName, lists: u32, metric: DistanceMetric) -> String {
    // DDL cannot take bind parameters; `lists` is a validated integer.
    format!(
        "CREATE INDEX {} ON {} USING ivfflat (embedding {}) WITH (lists = {})",
        quote_ident(&table.index_name()),
        table.qualified(),
        metric.opclass(),
        lists
    )
}

fn upsert_sql(table: &TableName) -> String {
    format!(
        "INSERT INTO {} \
            (id, title, link, summary, source_name, authors, tags, published, embedding) \
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         ON CONFLICT (id) DO UPDATE SET \
            title = EXCLUDED.title, \
            link = EXCLUDED.link, \
            summary = EXCLUDED.summary, \
            source_name = EXCLUDED.source_name, \
            authors = EXCLUDED.authors, \
            tags = EXCLUDED.tags, \
            published = EXCLUDED.published, \
            embedding = EXCLUDED.embedding \
         RETURNING (xmax = 0) AS inserted",
        table.qualified()
    )
}

fn nearest_sql(table: &TableName, metric: DistanceMetric) -> String {
    let op = metric.operator();
    format!(
        "SELECT {DOCUMENT_COLUMNS}, embedding {op} $1 AS distance \
         FROM {} \
         WHERE embedding IS NOT NULL \
         ORDER BY embedding {op} $1 ASC \
         LIMIT $2",
        table.qualified()
    )
}
