//! Database driver implementations.
//!
//! Each driver provides a `Dialect` (SQL syntax strategy) and a
//! `Connection` (introspection, DDL and row transfer):
//!
//! - [`mysql`]: MySQL/MariaDB via mysql_async
//! - [`postgres`]: PostgreSQL via tokio-postgres and deadpool
//! - [`mssql`]: Microsoft SQL Server via Tiberius and bb8
//! - [`sqlite`]: SQLite via rusqlite
//! - [`common`]: shared TLS settings
//!
//! # Adding New Databases
//!
//! 1. Create a module under `drivers/` with a `Dialect` and a `Connection`
//! 2. Add a [`Platform`] variant and map it to a `RepairStrategy`
//! 3. Dispatch to the new connection in [`connect`]

pub mod common;
pub mod mssql;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

use std::fmt;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::core::platform::Platform;
use crate::core::traits::Connection;
use crate::error::{MigrateError, Result};

pub use common::{SslMode, TlsBuilder};
pub use mssql::{MssqlConnection, MssqlDialect};
pub use mysql::{MysqlConnection, MysqlDialect};
pub use postgres::{PostgresConnection, PostgresDialect};
pub use sqlite::{SqliteConnection, SqliteDialect};

/// Open a connection for a configured engine.
pub async fn connect(name: &str, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
    let connection: Arc<dyn Connection> = match config.platform()? {
        Platform::Mysql => Arc::new(MysqlConnection::connect(name, config).await?),
        Platform::Postgres => Arc::new(PostgresConnection::connect(name, config).await?),
        Platform::Mssql => Arc::new(MssqlConnection::connect(name, config).await?),
        Platform::Sqlite => Arc::new(SqliteConnection::open(name, config)?),
    };
    Ok(connection)
}

/// A named connection opened on first use and shared afterwards.
///
/// Cloning is cheap; every clone resolves to the same connection, so the
/// migrators and tasks of one run talk to a single pool per name.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    name: String,
    config: Option<ConnectionConfig>,
    cell: OnceCell<Arc<dyn Connection>>,
}

impl ConnectionHandle {
    /// Handle connecting with `config` the first time it is used.
    pub fn lazy(name: impl Into<String>, config: ConnectionConfig) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                name: name.into(),
                config: Some(config),
                cell: OnceCell::new(),
            }),
        }
    }

    /// Handle around an already open connection.
    pub fn ready(connection: Arc<dyn Connection>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                name: connection.name().to_string(),
                config: None,
                cell: OnceCell::new_with(Some(connection)),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether the connection has been opened.
    pub fn is_open(&self) -> bool {
        self.inner.cell.initialized()
    }

    /// The connection, opening it if needed.
    pub async fn get(&self) -> Result<Arc<dyn Connection>> {
        let connection = self
            .inner
            .cell
            .get_or_try_init(|| async {
                let config = self.inner.config.as_ref().ok_or_else(|| {
                    MigrateError::Config(format!(
                        "Connection '{}' has no configuration",
                        self.inner.name
                    ))
                })?;
                debug!("Opening connection '{}'", self.inner.name);
                connect(&self.inner.name, config).await
            })
            .await?;
        Ok(Arc::clone(connection))
    }

    /// Close the connection if it was opened.
    pub async fn close(&self) {
        if let Some(connection) = self.inner.cell.get() {
            connection.close().await;
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("name", &self.inner.name)
            .field("open", &self.is_open())
            .finish()
    }
}
