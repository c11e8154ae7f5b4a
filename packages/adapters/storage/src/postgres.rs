use services::types::{ChainScope, RecordKey, TxId};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tracing::debug;

use super::error::Result;

#[derive(Clone)]
pub struct Postgres {
    connection_pool: sqlx::Pool<sqlx::Postgres>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DbConfig {
    /// The hostname or IP address of the `PostgreSQL` server.
    pub host: String,
    /// The port number on which the `PostgreSQL` server is listening.
    pub port: u16,
    /// The username used to authenticate with the `PostgreSQL` server.
    pub username: String,
    /// The password used to authenticate with the `PostgreSQL` server.
    pub password: String,
    /// The name of the database to connect to on the `PostgreSQL` server.
    pub database: String,
    /// The maximum number of connections allowed in the connection pool.
    pub max_connections: u32,
    /// Whether to use SSL when connecting to the `PostgreSQL` server.
    pub use_ssl: bool,
}

impl Postgres {
    pub async fn connect(opt: &DbConfig) -> services::Result<Self> {
        let ssl_mode = if opt.use_ssl {
            sqlx::postgres::PgSslMode::Require
        } else {
            sqlx::postgres::PgSslMode::Disable
        };

        let options = PgConnectOptions::new()
            .ssl_mode(ssl_mode)
            .username(&opt.username)
            .password(&opt.password)
            .database(&opt.database)
            .host(&opt.host)
            .port(opt.port);

        let connection_pool = PgPoolOptions::new()
            .max_connections(opt.max_connections)
            .connect_with(options)
            .await
            .map_err(crate::error::Error::from)?;

        Ok(Self { connection_pool })
    }

    #[cfg(feature = "test-helpers")]
    pub fn db_name(&self) -> String {
        self.connection_pool
            .connect_options()
            .get_database()
            .expect("database name to be set")
            .to_owned()
    }

    #[cfg(feature = "test-helpers")]
    pub fn port(&self) -> u16 {
        self.connection_pool.connect_options().get_port()
    }

    /// Close only when shutting down the application. Will close the connection pool even if it is
    /// shared.
    pub async fn close(self) {
        self.connection_pool.close().await;
    }

    pub async fn migrate(&self) -> services::Result<()> {
        sqlx::migrate!()
            .run(&self.connection_pool)
            .await
            .map_err(crate::error::Error::from)?;
        Ok(())
    }

    #[cfg(feature = "test-helpers")]
    pub(crate) fn pool(&self) -> sqlx::Pool<sqlx::Postgres> {
        self.connection_pool.clone()
    }

    pub(crate) async fn _get(&self, key: &RecordKey) -> Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT record FROM tx_records WHERE chain_scope = $1 AND id = $2")
                .bind(key.chain_scope.as_str())
                .bind(key.id.as_str())
                .fetch_optional(&self.connection_pool)
                .await?;

        Ok(row.map(|(record,)| record))
    }

    pub(crate) async fn _set(&self, key: &RecordKey, value: Vec<u8>) -> Result<()> {
        sqlx::query(
            "INSERT INTO tx_records (chain_scope, id, record) VALUES ($1, $2, $3)
             ON CONFLICT (chain_scope, id) DO UPDATE SET record = EXCLUDED.record, updated_at = now()",
        )
        .bind(key.chain_scope.as_str())
        .bind(key.id.as_str())
        .bind(value)
        .execute(&self.connection_pool)
        .await?;

        Ok(())
    }

    pub(crate) async fn _remove(&self, key: &RecordKey) -> Result<bool> {
        let removed = sqlx::query("DELETE FROM tx_records WHERE chain_scope = $1 AND id = $2")
            .bind(key.chain_scope.as_str())
            .bind(key.id.as_str())
            .execute(&self.connection_pool)
            .await?
            .rows_affected();

        Ok(removed > 0)
    }

    pub(crate) async fn _values(&self, scope: &ChainScope) -> Result<Vec<(RecordKey, Vec<u8>)>> {
        let rows: Vec<(String, Vec<u8>)> =
            sqlx::query_as("SELECT id, record FROM tx_records WHERE chain_scope = $1 ORDER BY id")
                .bind(scope.as_str())
                .fetch_all(&self.connection_pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(id, record)| (RecordKey::new(scope.clone(), TxId::from(id)), record))
            .collect())
    }

    pub(crate) async fn _clear(&self, scope: &ChainScope) -> Result<u64> {
        let removed = sqlx::query("DELETE FROM tx_records WHERE chain_scope = $1")
            .bind(scope.as_str())
            .execute(&self.connection_pool)
            .await?
            .rows_affected();

        debug!("removed {removed} row(s) of chain scope {scope}");

        Ok(removed)
    }
}
