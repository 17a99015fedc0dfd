//! SQL Server connection backed by Tiberius and a bb8 pool.

use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use tiberius::{AuthMethod, Client, ColumnData, Config, FromSql, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{info, warn};

use crate::config::ConnectionConfig;
use crate::core::schema::{Column, ForeignKeyConstraint, Index, TableDetails};
use crate::core::traits::{Connection, Dialect};
use crate::core::value::{Row, SqlValue};
use crate::drivers::common::SslMode;
use crate::error::{MigrateError, Result};

use super::MssqlDialect;

/// Maximum TDS packet size.
const TDS_MAX_PACKET_SIZE: u32 = 32767;

/// Connection pool timeouts.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

const COLUMNS_QUERY: &str = "\
SELECT c.name, t.name, c.max_length, c.precision, c.scale, c.is_nullable,
       OBJECT_DEFINITION(c.default_object_id), c.is_identity
FROM sys.columns c
JOIN sys.types t ON t.user_type_id = c.user_type_id
WHERE c.object_id = OBJECT_ID(@P1)
ORDER BY c.column_id";

const INDEXES_QUERY: &str = "\
SELECT i.name, c.name, i.is_unique, i.is_primary_key
FROM sys.indexes i
JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id
JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id
WHERE i.object_id = OBJECT_ID(@P1) AND i.name IS NOT NULL AND ic.is_included_column = 0
ORDER BY i.name, ic.key_ordinal";

const FOREIGN_KEYS_QUERY: &str = "\
SELECT fk.name, pc.name,
       CASE WHEN OBJECT_SCHEMA_NAME(fk.referenced_object_id) = SCHEMA_NAME()
            THEN OBJECT_NAME(fk.referenced_object_id)
            ELSE OBJECT_SCHEMA_NAME(fk.referenced_object_id) + '.' + OBJECT_NAME(fk.referenced_object_id)
       END,
       rc.name
FROM sys.foreign_keys fk
JOIN sys.foreign_key_columns fkc ON fkc.constraint_object_id = fk.object_id
JOIN sys.columns pc ON pc.object_id = fkc.parent_object_id AND pc.column_id = fkc.parent_column_id
JOIN sys.columns rc ON rc.object_id = fkc.referenced_object_id AND rc.column_id = fkc.referenced_column_id
WHERE fk.parent_object_id = OBJECT_ID(@P1)
ORDER BY fk.name, fkc.constraint_column_id";

/// Connection manager for bb8 pool with Tiberius.
#[derive(Clone)]
pub struct TiberiusConnectionManager {
    config: ConnectionConfig,
}

impl TiberiusConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> Result<Config> {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port_or_default());
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            &self.config.password,
        ));

        let ssl_mode = SslMode::parse(&self.config.ssl_mode)?;
        config.encryption(ssl_mode.tds_encryption());
        if ssl_mode.trusts_any_certificate() {
            config.trust_cert();
        }

        config.packet_size(TDS_MAX_PACKET_SIZE);
        Ok(config)
    }
}

fn io_error(e: std::io::Error) -> tiberius::error::Error {
    tiberius::error::Error::Io {
        kind: e.kind(),
        message: e.to_string(),
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self
            .build_config()
            .map_err(|e| tiberius::error::Error::Conversion(e.to_string().into()))?;
        let tcp = TcpStream::connect(config.get_addr()).await.map_err(io_error)?;
        tcp.set_nodelay(true).ok();

        let keepalive = socket2::TcpKeepalive::new()
            .with_time(TCP_KEEPALIVE_INTERVAL)
            .with_interval(TCP_KEEPALIVE_INTERVAL);
        if let Err(e) = socket2::SockRef::from(&tcp).set_tcp_keepalive(&keepalive) {
            warn!("Failed to set TCP keepalive on MSSQL connection: {}", e);
        }

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// SQL Server connection pool.
pub struct MssqlConnection {
    name: String,
    pool: Pool<TiberiusConnectionManager>,
    dialect: MssqlDialect,
}

impl MssqlConnection {
    /// Open a pool and check it with `SELECT 1`.
    pub async fn connect(name: &str, config: &ConnectionConfig) -> Result<Self> {
        // Surface ssl_mode errors before the pool swallows them
        SslMode::parse(&config.ssl_mode)?;

        let pool_size = u32::try_from(config.pool_size.max(1)).unwrap_or(u32::MAX);
        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_timeout(POOL_CONNECTION_TIMEOUT)
            .idle_timeout(Some(POOL_IDLE_TIMEOUT))
            .test_on_check_out(true)
            .build(TiberiusConnectionManager::new(config.clone()))
            .await
            .map_err(|e| MigrateError::pool(e, format!("creating MSSQL pool '{}'", name)))?;

        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| MigrateError::pool(e, format!("connecting to MSSQL '{}'", name)))?;
            conn.simple_query("SELECT 1").await?.into_row().await?;
        }

        info!(
            "Connected to MSSQL '{}': {} (pool_size={})",
            name,
            config.describe(),
            pool_size
        );

        Ok(Self {
            name: name.to_string(),
            pool,
            dialect: MssqlDialect::new(),
        })
    }

    async fn client(&self) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, format!("checking out MSSQL '{}'", self.name)))
    }

    async fn rows(&self, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<tiberius::Row>> {
        let mut client = self.client().await?;
        let rows = client.query(sql, params).await?.into_first_result().await?;
        Ok(rows)
    }
}

#[async_trait]
impl Connection for MssqlConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn describe_table(&self, table: &str) -> Result<TableDetails> {
        let object = self.dialect.quote_table(table);

        let mut columns = Vec::new();
        for row in self.rows(COLUMNS_QUERY, &[&object]).await? {
            let type_name = text(&row, 1)?;
            columns.push(Column {
                name: text(&row, 0)?,
                data_type: format_type(
                    &type_name,
                    row.try_get::<i16, _>(2)?.unwrap_or(0),
                    row.try_get::<u8, _>(3)?.unwrap_or(0),
                    row.try_get::<u8, _>(4)?.unwrap_or(0),
                ),
                is_nullable: row.try_get::<bool, _>(5)?.unwrap_or(true),
                default: row.try_get::<&str, _>(6)?.map(str::to_string),
                is_auto_increment: row.try_get::<bool, _>(7)?.unwrap_or(false),
            });
        }

        if columns.is_empty() {
            return Err(MigrateError::Config(format!(
                "Table '{}' not found on connection '{}'",
                table, self.name
            )));
        }

        let mut indexes: Vec<Index> = Vec::new();
        for row in self.rows(INDEXES_QUERY, &[&object]).await? {
            let name = text(&row, 0)?;
            let column = text(&row, 1)?;
            match indexes.iter_mut().find(|i| i.name == name) {
                Some(index) => index.columns.push(column),
                None => indexes.push(Index {
                    name,
                    columns: vec![column],
                    is_unique: row.try_get::<bool, _>(2)?.unwrap_or(false),
                    is_primary: row.try_get::<bool, _>(3)?.unwrap_or(false),
                }),
            }
        }

        let mut foreign_keys: Vec<ForeignKeyConstraint> = Vec::new();
        for row in self.rows(FOREIGN_KEYS_QUERY, &[&object]).await? {
            let name = text(&row, 0)?;
            let column = text(&row, 1)?;
            let foreign_table = text(&row, 2)?;
            let foreign_column = text(&row, 3)?;
            match foreign_keys
                .iter_mut()
                .find(|fk| fk.name.as_deref() == Some(name.as_str()))
            {
                Some(fk) => {
                    fk.local_columns.push(column);
                    fk.foreign_columns.push(foreign_column);
                }
                None => foreign_keys.push(
                    ForeignKeyConstraint::new(vec![column], foreign_table, vec![foreign_column])
                        .named(name),
                ),
            }
        }

        Ok(TableDetails {
            name: table.to_string(),
            columns,
            indexes,
            foreign_keys,
        })
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let mut client = self.client().await?;
        let result = client.execute(sql, &[]).await?;
        Ok(result.total())
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.rows(sql, &[])
            .await?
            .into_iter()
            .map(row_from_tiberius)
            .collect()
    }

    async fn insert(&self, table: &str, row: &Row) -> Result<u64> {
        let sql = self.dialect.build_insert(table, row.columns());
        let params: Vec<Box<dyn ToSql>> = row.values().iter().map(to_param).collect();
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut client = self.client().await?;
        let result = client.execute(sql.as_str(), &param_refs).await?;
        Ok(result.total())
    }
}

fn text(row: &tiberius::Row, idx: usize) -> Result<String> {
    Ok(row
        .try_get::<&str, _>(idx)?
        .map(str::to_string)
        .unwrap_or_default())
}

/// Full type as it would be declared, from sys.columns metadata.
fn format_type(type_name: &str, max_length: i16, precision: u8, scale: u8) -> String {
    let lower = type_name.to_lowercase();
    match lower.as_str() {
        "varchar" | "char" | "varbinary" | "binary" => {
            if max_length == -1 {
                format!("{}(max)", lower)
            } else {
                format!("{}({})", lower, max_length)
            }
        }
        // lengths are reported in bytes
        "nvarchar" | "nchar" => {
            if max_length == -1 {
                format!("{}(max)", lower)
            } else {
                format!("{}({})", lower, max_length / 2)
            }
        }
        "decimal" | "numeric" => format!("{}({},{})", lower, precision, scale),
        "datetime2" | "time" | "datetimeoffset" => format!("{}({})", lower, scale),
        _ => lower,
    }
}

fn row_from_tiberius(row: tiberius::Row) -> Result<Row> {
    let names: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    let mut values = Vec::with_capacity(names.len());
    for data in row {
        values.push(from_column_data(&data)?);
    }
    Ok(Row::from_parts(names, values))
}

fn from_column_data(data: &ColumnData<'static>) -> Result<SqlValue> {
    let value = match data {
        ColumnData::U8(v) => v.map(|v| SqlValue::I64(i64::from(v))),
        ColumnData::I16(v) => v.map(|v| SqlValue::I64(i64::from(v))),
        ColumnData::I32(v) => v.map(|v| SqlValue::I64(i64::from(v))),
        ColumnData::I64(v) => v.map(SqlValue::I64),
        ColumnData::F32(v) => v.map(|v| SqlValue::F64(f64::from(v))),
        ColumnData::F64(v) => v.map(SqlValue::F64),
        ColumnData::Bit(v) => v.map(SqlValue::Bool),
        ColumnData::String(v) => v.as_ref().map(|s| SqlValue::Text(s.to_string())),
        ColumnData::Guid(v) => v.map(SqlValue::Uuid),
        ColumnData::Binary(v) => v.as_ref().map(|b| SqlValue::Bytes(b.to_vec())),
        ColumnData::Xml(v) => v
            .as_ref()
            .map(|x| SqlValue::Text(x.clone().into_owned().into_string())),
        ColumnData::Numeric(_) => Decimal::from_sql(data)?.map(SqlValue::Decimal),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(data)?.map(SqlValue::DateTime)
        }
        ColumnData::Date(_) => NaiveDate::from_sql(data)?.map(SqlValue::Date),
        ColumnData::Time(_) => NaiveTime::from_sql(data)?.map(SqlValue::Time),
        ColumnData::DateTimeOffset(_) => {
            DateTime::<FixedOffset>::from_sql(data)?.map(SqlValue::DateTimeOffset)
        }
        #[allow(unreachable_patterns)]
        other => {
            return Err(MigrateError::Unsupported(format!(
                "SQL Server value {:?}",
                other
            )))
        }
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

fn to_param(value: &SqlValue) -> Box<dyn ToSql> {
    match value {
        SqlValue::Null => Box::new(Option::<String>::None),
        SqlValue::Bool(v) => Box::new(*v),
        SqlValue::I64(v) => Box::new(*v),
        SqlValue::F64(v) => Box::new(*v),
        SqlValue::Decimal(v) => Box::new(*v),
        SqlValue::Text(v) => Box::new(v.clone()),
        SqlValue::Bytes(v) => Box::new(v.clone()),
        SqlValue::Uuid(v) => Box::new(*v),
        SqlValue::DateTime(v) => Box::new(*v),
        SqlValue::DateTimeOffset(v) => Box::new(*v),
        SqlValue::Date(v) => Box::new(*v),
        SqlValue::Time(v) => Box::new(*v),
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;

    #[test]
    fn test_format_type() {
        assert_eq!(format_type("int", 4, 10, 0), "int");
        assert_eq!(format_type("nvarchar", 100, 0, 0), "nvarchar(50)");
        assert_eq!(format_type("nvarchar", -1, 0, 0), "nvarchar(max)");
        assert_eq!(format_type("varchar", 255, 0, 0), "varchar(255)");
        assert_eq!(format_type("decimal", 9, 10, 2), "decimal(10,2)");
        assert_eq!(format_type("datetime2", 8, 27, 7), "datetime2(7)");
    }

    #[test]
    fn test_column_data_conversion() {
        assert_eq!(
            from_column_data(&ColumnData::I32(Some(5))).unwrap(),
            SqlValue::I64(5)
        );
        assert_eq!(
            from_column_data(&ColumnData::String(Some(Cow::Borrowed("x")))).unwrap(),
            SqlValue::Text("x".into())
        );
        assert!(from_column_data(&ColumnData::I64(None)).unwrap().is_null());
        assert_eq!(
            from_column_data(&ColumnData::Bit(Some(true))).unwrap(),
            SqlValue::Bool(true)
        );
    }
}
