//! Store configuration shared by the library and its binaries.

use clap::{Args, ValueEnum};

use crate::encoder::{HashEncoder, DEFAULT_DIMENSION};
use crate::error::{Error, Result};
use crate::vector_store::TableName;

/// Default number of IVF partitions for the ANN index.
pub const DEFAULT_IVF_LISTS: u32 = 100;

/// Distance used to rank stored vectors against a query vector.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum DistanceMetric {
    /// Cosine distance (`<=>`).
    #[default]
    Cosine,
    /// Euclidean (L2) distance (`<->`).
    Euclidean,
}

impl DistanceMetric {
    /// pgvector distance operator.
    pub fn operator(self) -> &'static str {
        match self {
            Self::Cosine => "<=>",
            Self::Euclidean => "<->",
        }
    }

    /// pgvector operator class used when building the index.
    pub fn opclass(self) -> &'static str {
        match self {
            Self::Cosine => "vector_cosine_ops",
            Self::Euclidean => "vector_l2_ops",
        }
    }
}

/// Postgres connection parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Full connection string; takes precedence over the individual parts.
    pub url: Option<String>,
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Login role.
    pub user: String,
    /// Login password.
    pub password: Option<String>,
    /// Database name.
    pub dbname: String,
}

impl ConnectionConfig {
    /// Driver configuration for these parameters.
    pub fn pg_config(&self) -> Result<tokio_postgres::Config> {
        if let Some(url) = &self.url {
            return url
                .parse::<tokio_postgres::Config>()
                .map_err(|err| Error::Config(format!("invalid DATABASE_URL: {err}")));
        }
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .dbname(&self.dbname);
        if let Some(password) = &self.password {
            config.password(password);
        }
        Ok(config)
    }

    /// `user@host:port/dbname`, never including the password.
    pub fn display_target(&self) -> String {
        match self.pg_config() {
            Ok(config) => {
                let host = config
                    .get_hosts()
                    .first()
                    .map(|host| match host {
                        tokio_postgres::config::Host::Tcp(name) => name.clone(),
                        #[cfg(unix)]
                        tokio_postgres::config::Host::Unix(path) => path.display().to_string(),
                    })
                    .unwrap_or_else(|| self.host.clone());
                let port = config.get_ports().first().copied().unwrap_or(self.port);
                format!(
                    "{}@{}:{}/{}",
                    config.get_user().unwrap_or(self.user.as_str()),
                    host,
                    port,
                    config.get_dbname().unwrap_or(self.dbname.as_str())
                )
            }
            Err(_) => "<invalid connection string>".to_string(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: None,
            dbname: "postgres".to_string(),
        }
    }
}

/// Everything needed to open a store and encode against it.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    connection: ConnectionConfig,
    table: TableName,
    dimension: usize,
    use_bigrams: bool,
    ivf_lists: u32,
    metric: DistanceMetric,
    reset_on_dimension_change: bool,
}

impl StoreConfig {
    /// Builds a validated configuration with default encoder and index settings.
    pub fn new(connection: ConnectionConfig, table: TableName) -> Self {
        Self {
            connection,
            table,
            dimension: DEFAULT_DIMENSION,
            use_bigrams: true,
            ivf_lists: DEFAULT_IVF_LISTS,
            metric: DistanceMetric::default(),
            reset_on_dimension_change: false,
        }
    }

    /// Sets the embedding dimension.
    pub fn with_dimension(mut self, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::Config(
                "embedding dimension must be positive".to_string(),
            ));
        }
        self.dimension = dimension;
        Ok(self)
    }

    /// Sets the bigram toggle.
    pub fn with_bigrams(mut self, use_bigrams: bool) -> Self {
        self.use_bigrams = use_bigrams;
        self
    }

    /// Sets index partitioning.
    pub fn with_index(mut self, ivf_lists: u32, metric: DistanceMetric) -> Result<Self> {
        if ivf_lists == 0 {
            return Err(Error::Config("index lists must be positive".to_string()));
        }
        self.ivf_lists = ivf_lists;
        self.metric = metric;
        Ok(self)
    }

    /// Allows `open` to recreate a vector column of the wrong width.
    pub fn with_reset_on_dimension_change(mut self, reset: bool) -> Self {
        self.reset_on_dimension_change = reset;
        self
    }

    /// Connection parameters.
    pub fn connection(&self) -> &ConnectionConfig {
        &self.connection
    }

    /// Target table.
    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Embedding dimension shared by writes and queries.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Whether bigram features are enabled.
    pub fn use_bigrams(&self) -> bool {
        self.use_bigrams
    }

    /// IVF partition count.
    pub fn ivf_lists(&self) -> u32 {
        self.ivf_lists
    }

    /// Ranking metric.
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Whether a dimension change may wipe stored embeddings.
    pub fn reset_on_dimension_change(&self) -> bool {
        self.reset_on_dimension_change
    }

    /// Encoder matching this configuration.
    pub fn encoder(&self) -> Result<HashEncoder> {
        Ok(HashEncoder::new(self.dimension)?.with_bigrams(self.use_bigrams))
    }
}

/// Command-line arguments shared by binaries that talk to the store.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Postgres connection string (postgres://...); overrides the DB_* parts
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Postgres host
    #[arg(long, env = "DB_HOST", default_value = "localhost")]
    pub db_host: String,

    /// Postgres port
    #[arg(long, env = "DB_PORT", default_value_t = 5432)]
    pub db_port: u16,

    /// Postgres user
    #[arg(long, env = "DB_USER", default_value = "postgres")]
    pub db_user: String,

    /// Postgres password
    #[arg(long, env = "DB_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,

    /// Postgres database name
    #[arg(long, env = "DB_NAME", default_value = "postgres")]
    pub db_name: String,

    /// Schema holding the document table
    #[arg(long, env = "LEXVEC_SCHEMA", default_value = "public")]
    pub schema: String,

    /// Document table name
    #[arg(long, env = "LEXVEC_TABLE", default_value = "articles")]
    pub table: String,

    /// Embedding dimension (changing it requires re-embedding every row)
    #[arg(long, env = "EMBED_DIM", default_value_t = DEFAULT_DIMENSION)]
    pub dimension: usize,

    /// Hash adjacent token pairs in addition to single tokens
    #[arg(
        long,
        env = "LEXVEC_BIGRAMS",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub bigrams: bool,

    /// IVF partition count for the ANN index
    #[arg(long, env = "LEXVEC_IVF_LISTS", default_value_t = DEFAULT_IVF_LISTS)]
    pub ivf_lists: u32,

    /// Distance metric used for indexing and ranking
    #[arg(long, env = "LEXVEC_METRIC", value_enum, default_value_t = DistanceMetric::Cosine)]
    pub metric: DistanceMetric,

    /// Recreate the vector column when its width differs from --dimension
    #[arg(long, env = "LEXVEC_RESET_ON_DIMENSION_CHANGE", default_value_t = false)]
    pub reset_on_dimension_change: bool,
}

impl StoreArgs {
    /// Converts the parsed arguments into a `StoreConfig`.
    pub fn build_config(&self) -> Result<StoreConfig> {
        let connection = ConnectionConfig {
            url: self
                .database_url
                .as_ref()
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty()),
            host: self.db_host.clone(),
            port: self.db_port,
            user: self.db_user.clone(),
            password: self.db_password.clone(),
            dbname: self.db_name.clone(),
        };
        let table = TableName::new(self.schema.clone(), self.table.clone())?;
        Ok(StoreConfig::new(connection, table)
            .with_dimension(self.dimension)?
            .with_bigrams(self.bigrams)
            .with_index(self.ivf_lists, self.metric)?
            .with_reset_on_dimension_change(self.reset_on_dimension_change))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pretty_assertions::assert_eq;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        store: StoreArgs,
    }

    fn parse(args: &[&str]) -> StoreArgs {
        let mut argv = vec!["lexvec"];
        argv.extend_from_slice(args);
        TestCli::try_parse_from(argv).expect("args parse").store
    }

    #[test]
    fn metric_maps_to_pgvector_operators() {
        assert_eq!(DistanceMetric::Cosine.operator(), "<=>");
        assert_eq!(DistanceMetric::Cosine.opclass(), "vector_cosine_ops");
        assert_eq!(DistanceMetric::Euclidean.operator(), "<->");
        assert_eq!(DistanceMetric::Euclidean.opclass(), "vector_l2_ops");
    }

    #[test]
    fn explicit_flags_build_config() {
        let args = parse(&[
            "--database-url",
            "postgres://reader@db.internal:6543/news",
            "--dimension",
            "64",
            "--bigrams",
            "false",
            "--ivf-lists",
            "10",
            "--metric",
            "euclidean",
            "--table",
            "docs",
        ]);
        let config = args.build_config().expect("config");
        assert_eq!(config.dimension(), 64);
        assert!(!config.use_bigrams());
        assert_eq!(config.ivf_lists(), 10);
        assert_eq!(config.metric(), DistanceMetric::Euclidean);
        assert_eq!(config.table().table(), "docs");
        assert_eq!(
            config.connection().display_target(),
            "reader@db.internal:6543/news"
        );
        let encoder = config.encoder().expect("encoder");
        assert_eq!(encoder.dim(), 64);
        assert!(!encoder.use_bigrams());
    }

    #[test]
    fn zero_dimension_is_a_config_error() {
        let args = parse(&["--dimension", "0", "--database-url", "postgres://x@y/z"]);
        let err = args.build_config().expect_err("zero dimension rejected");
        assert!(err.is_config());
    }

    #[test]
    fn zero_lists_is_a_config_error() {
        let err = StoreConfig::new(
            ConnectionConfig::default(),
            TableName::new("public", "articles").expect("table"),
        )
        .with_index(0, DistanceMetric::Cosine)
        .expect_err("zero lists rejected");
        assert!(err.is_config());
    }

    #[test]
    fn password_is_not_displayed() {
        let connection = ConnectionConfig {
            password: Some("hunter2".to_string()),
            ..ConnectionConfig::default()
        };
        let target = connection.display_target();
        assert_eq!(target, "postgres@localhost:5432/postgres");
        assert!(!target.contains("hunter2"));
    }
}
