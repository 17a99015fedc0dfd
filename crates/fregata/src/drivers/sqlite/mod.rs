//! SQLite driver.

mod connection;
mod dialect;

pub use connection::SqliteConnection;
pub use dialect::SqliteDialect;
