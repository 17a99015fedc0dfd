//! Core abstractions shared by every driver and by the migration engine.
//!
//! - [`platform`]: engine tags and the repair strategy each one uses
//! - [`schema`]: column, index and foreign key metadata
//! - [`value`]: SQL values and rows
//! - [`identifier`]: identifier quoting and length checks
//! - [`traits`]: the `Dialect` and `Connection` traits

pub mod identifier;
pub mod platform;
pub mod schema;
pub mod traits;
pub mod value;

pub use platform::{Platform, RepairStrategy};
pub use schema::{Column, ForeignKeyConstraint, Index, TableDetails};
pub use traits::{Connection, Dialect, SelectQueryOptions};
pub use value::{Batch, Row, SqlValue};
