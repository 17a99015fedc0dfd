//! Microsoft SQL Server driver.
//!
//! - [`MssqlDialect`]: SQL syntax strategy for MSSQL
//! - [`MssqlConnection`]: Tiberius client pool implementing `Connection`
//!
//! Paged reads use `OFFSET .. FETCH`, which needs SQL Server 2012 or later.

mod connection;
mod dialect;

pub use connection::{MssqlConnection, TiberiusConnectionManager};
pub use dialect::MssqlDialect;
