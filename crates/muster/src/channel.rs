//! The RPC channel: how server code gets SQL to the hosted database.
//!
//! Everything muster does to the database goes through a [`Channel`]: the
//! catalog reads of the inspector, the DDL of the remediator, and the
//! operator's raw SQL. [`PgChannel`] is the Postgres implementation; it is
//! constructed explicitly and handed to whoever needs it.

use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio_postgres::error::SqlState;
use tracing::Instrument;

/// A boxed, sendable future, as returned by [`Channel`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One result row, keyed by column name.
pub type JsonRow = serde_json::Map<String, Value>;

/// Errors raised by a [`Channel`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The server-side function used to run SQL does not exist.
    #[error("{function} RPC not available")]
    RpcUnavailable { function: String },

    /// The database could not be reached.
    #[error("database connection failed: {0}")]
    Connection(String),

    /// The database rejected a statement.
    #[error("{message}")]
    Sql {
        code: Option<String>,
        message: String,
    },

    /// The database answered with something that is not a list of rows.
    #[error("unexpected result shape: {0}")]
    Decode(String),
}

impl ChannelError {
    /// Whether no further statement can succeed on this channel.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ChannelError::RpcUnavailable { .. } | ChannelError::Connection(_)
        )
    }
}

/// Something that can run SQL against the database.
///
/// Implemented by [`PgChannel`], and by an in-memory catalog in tests.
pub trait Channel: Send + Sync {
    /// Run a query and return its rows.
    fn query<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<Vec<JsonRow>, ChannelError>>;

    /// Run one or more statements, discarding any rows.
    fn execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<(), ChannelError>>;
}

/// A [`Channel`] backed by a Postgres connection pool.
///
/// In direct mode statements run on a pooled connection. With an RPC
/// function configured (Supabase-style `exec_sql(text) returns jsonb`),
/// every statement is instead passed as text to that function and its JSON
/// result is decoded, which is how server code reaches a hosted database
/// that does not expose raw SQL.
///
/// All calls are logged via tracing at debug level.
#[derive(Clone)]
pub struct PgChannel {
    pool: deadpool_postgres::Pool,
    rpc_function: Option<String>,
}

impl PgChannel {
    /// Wrap an existing pool in direct mode.
    pub fn new(pool: deadpool_postgres::Pool) -> Self {
        Self {
            pool,
            rpc_function: None,
        }
    }

    /// Build a pool for `url`. No connection is made until first use.
    pub fn connect(url: &str, pool_size: usize) -> Result<Self, ChannelError> {
        let mut config = deadpool_postgres::Config::new();
        config.url = Some(url.to_string());
        config.pool = Some(deadpool_postgres::PoolConfig::new(pool_size.max(1)));
        let pool = config
            .create_pool(
                Some(deadpool_postgres::Runtime::Tokio1),
                tokio_postgres::NoTls,
            )
            .map_err(|e| ChannelError::Connection(e.to_string()))?;
        Ok(Self::new(pool))
    }

    /// Route every statement through the named SQL function.
    pub fn with_rpc(mut self, function: impl Into<String>) -> Self {
        self.rpc_function = Some(function.into());
        self
    }

    pub fn rpc_function(&self) -> Option<&str> {
        self.rpc_function.as_deref()
    }

    /// Get the inner pool (for cases where you need the raw pool).
    pub fn pool(&self) -> &deadpool_postgres::Pool {
        &self.pool
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, ChannelError> {
        self.pool
            .get()
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))
    }

    fn classify(&self, err: tokio_postgres::Error) -> ChannelError {
        if let Some(db) = err.as_db_error() {
            if let Some(function) = &self.rpc_function {
                if *db.code() == SqlState::UNDEFINED_FUNCTION && db.message().contains(function.as_str()) {
                    return ChannelError::RpcUnavailable {
                        function: function.clone(),
                    };
                }
            }
            return ChannelError::Sql {
                code: Some(db.code().code().to_string()),
                message: db.message().to_string(),
            };
        }
        if err.is_closed() {
            return ChannelError::Connection(err.to_string());
        }
        ChannelError::Sql {
            code: None,
            message: err.to_string(),
        }
    }

    async fn query_rows(&self, sql: &str) -> Result<Vec<JsonRow>, ChannelError> {
        let client = self.client().await?;
        let wrapped = json_rows_sql(sql);

        let value: Option<Value> = match &self.rpc_function {
            None => client
                .query_one(wrapped.as_str(), &[])
                .await
                .map_err(|e| self.classify(e))?
                .try_get::<_, Option<Value>>(0)
                .map_err(|e| ChannelError::Decode(e.to_string()))?,
            Some(function) => client
                .query_one(rpc_call_sql(function).as_str(), &[&wrapped])
                .await
                .map_err(|e| self.classify(e))?
                .try_get::<_, Option<Value>>(0)
                .map_err(|e| ChannelError::Decode(e.to_string()))?,
        };

        decode_rows(value.unwrap_or(Value::Null))
    }

    async fn execute_sql(&self, sql: &str) -> Result<(), ChannelError> {
        let client = self.client().await?;
        match &self.rpc_function {
            None => client.batch_execute(sql).await.map_err(|e| self.classify(e)),
            Some(function) => client
                .execute(rpc_call_sql(function).as_str(), &[&sql])
                .await
                .map(|_| ())
                .map_err(|e| self.classify(e)),
        }
    }
}

impl Channel for PgChannel {
    fn query<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<Vec<JsonRow>, ChannelError>> {
        let span = tracing::debug_span!(
            "db.query",
            sql = %sql,
            rpc = self.rpc_function.as_deref().unwrap_or(""),
            rows = tracing::field::Empty,
        );
        Box::pin(
            async move {
                let rows = self.query_rows(sql).await?;
                tracing::Span::current().record("rows", rows.len());
                Ok::<_, ChannelError>(rows)
            }
            .instrument(span),
        )
    }

    fn execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<(), ChannelError>> {
        let span = tracing::debug_span!(
            "db.execute",
            sql = %sql,
            rpc = self.rpc_function.as_deref().unwrap_or(""),
        );
        Box::pin(self.execute_sql(sql).instrument(span))
    }
}

/// Wrap a query so the database hands back its rows as one JSON array.
fn json_rows_sql(sql: &str) -> String {
    let sql = sql.trim().trim_end_matches(';');
    format!(
        "SELECT coalesce(json_agg(row_to_json(q)), '[]'::json) FROM ({}) AS q",
        sql
    )
}

fn rpc_call_sql(function: &str) -> String {
    format!("SELECT {}($1::text)", muster_sql::quote_ident(function))
}

fn decode_rows(value: Value) -> Result<Vec<JsonRow>, ChannelError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row),
                other => Err(ChannelError::Decode(format!("expected an object row, got {}", other))),
            })
            .collect(),
        other => Err(ChannelError::Decode(format!("expected an array of rows, got {}", other))),
    }
}
