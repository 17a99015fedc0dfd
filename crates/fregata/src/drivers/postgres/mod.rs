//! PostgreSQL driver.
//!
//! - [`PostgresDialect`]: SQL syntax strategy for PostgreSQL
//! - [`PostgresConnection`]: deadpool-postgres pool implementing `Connection`
//!
//! Table names may be schema-qualified (`sales.orders`); unqualified names
//! resolve through the connection's `search_path`.

mod connection;
mod dialect;

pub use connection::PostgresConnection;
pub use dialect::PostgresDialect;
