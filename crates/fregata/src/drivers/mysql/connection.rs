//! MySQL/MariaDB connection backed by a mysql_async pool.

use std::borrow::Cow;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use mysql_async::consts::ColumnType;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts, SslOpts, Value};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::core::schema::{Column, ForeignKeyConstraint, Index, TableDetails};
use crate::core::traits::{Connection, Dialect};
use crate::core::value::{Row, SqlValue};
use crate::drivers::common::SslMode;
use crate::error::{MigrateError, Result};

use super::MysqlDialect;

/// Collation id MySQL reports for binary strings.
const BINARY_CHARSET: u16 = 63;

/// MySQL connection pool.
pub struct MysqlConnection {
    name: String,
    pool: Pool,
    dialect: MysqlDialect,
}

impl MysqlConnection {
    /// Open a pool and check it with `SELECT 1`.
    pub async fn connect(name: &str, config: &ConnectionConfig) -> Result<Self> {
        let ssl_opts = match SslMode::parse(&config.ssl_mode)? {
            SslMode::Disable => {
                warn!("MySQL TLS is disabled. Credentials will be transmitted in plaintext.");
                None
            }
            SslMode::Require => Some(SslOpts::default().with_danger_accept_invalid_certs(true)),
            SslMode::VerifyCa => Some(SslOpts::default().with_danger_skip_domain_validation(true)),
            SslMode::VerifyFull => Some(SslOpts::default()),
        };

        let mut builder = OptsBuilder::default()
            .ip_or_hostname(&config.host)
            .tcp_port(config.port_or_default())
            .db_name(Some(&config.database))
            .user(Some(&config.user))
            .pass(Some(&config.password))
            .init(vec!["SET NAMES utf8mb4"]);

        if let Some(ssl) = ssl_opts {
            builder = builder.ssl_opts(ssl);
        }

        let constraints = PoolConstraints::new(1, config.pool_size.max(1)).ok_or_else(|| {
            MigrateError::Config(format!("Invalid pool_size {}", config.pool_size))
        })?;
        let opts: Opts = builder
            .pool_opts(PoolOpts::new().with_constraints(constraints))
            .into();
        let pool = Pool::new(opts);

        let mut conn = pool
            .get_conn()
            .await
            .map_err(|e| MigrateError::pool(e, format!("connecting to MySQL '{}'", name)))?;
        conn.query_drop("SELECT 1")
            .await
            .map_err(|e| MigrateError::pool(e, format!("testing MySQL '{}'", name)))?;
        drop(conn);

        info!("Connected to MySQL '{}': {}", name, config.describe());

        Ok(Self {
            name: name.to_string(),
            pool,
            dialect: MysqlDialect::new(),
        })
    }

    async fn conn(&self) -> Result<Conn> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| MigrateError::pool(e, format!("checking out MySQL '{}'", self.name)))
    }

    async fn load_columns(&self, conn: &mut Conn, table: &str) -> Result<Vec<Column>> {
        let rows: Vec<(String, String, String, Option<String>, String)> = conn
            .exec(
                "SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE, COLUMN_DEFAULT, EXTRA \
                 FROM information_schema.COLUMNS \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
                 ORDER BY ORDINAL_POSITION",
                (table,),
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|(name, data_type, nullable, default, extra)| Column {
                name,
                data_type,
                is_nullable: nullable.eq_ignore_ascii_case("YES"),
                default,
                is_auto_increment: extra.to_ascii_lowercase().contains("auto_increment"),
            })
            .collect())
    }

    async fn load_indexes(&self, conn: &mut Conn, table: &str) -> Result<Vec<Index>> {
        let rows: Vec<(String, String, i64)> = conn
            .exec(
                "SELECT INDEX_NAME, COLUMN_NAME, NON_UNIQUE \
                 FROM information_schema.STATISTICS \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
                 ORDER BY INDEX_NAME, SEQ_IN_INDEX",
                (table,),
            )
            .await?;

        let mut indexes: Vec<Index> = Vec::new();
        for (name, column, non_unique) in rows {
            match indexes.iter_mut().find(|i| i.name == name) {
                Some(index) => index.columns.push(column),
                None => indexes.push(Index {
                    is_primary: name == "PRIMARY",
                    is_unique: non_unique == 0,
                    name,
                    columns: vec![column],
                }),
            }
        }
        Ok(indexes)
    }

    async fn load_foreign_keys(
        &self,
        conn: &mut Conn,
        table: &str,
    ) -> Result<Vec<ForeignKeyConstraint>> {
        let rows: Vec<(String, String, String, String)> = conn
            .exec(
                "SELECT CONSTRAINT_NAME, COLUMN_NAME, REFERENCED_TABLE_NAME, REFERENCED_COLUMN_NAME \
                 FROM information_schema.KEY_COLUMN_USAGE \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
                   AND REFERENCED_TABLE_NAME IS NOT NULL \
                 ORDER BY CONSTRAINT_NAME, ORDINAL_POSITION",
                (table,),
            )
            .await?;

        let mut constraints: Vec<ForeignKeyConstraint> = Vec::new();
        for (name, column, foreign_table, foreign_column) in rows {
            match constraints
                .iter_mut()
                .find(|c| c.name.as_deref() == Some(name.as_str()))
            {
                Some(fk) => {
                    fk.local_columns.push(column);
                    fk.foreign_columns.push(foreign_column);
                }
                None => constraints.push(
                    ForeignKeyConstraint::new(vec![column], foreign_table, vec![foreign_column])
                        .named(name),
                ),
            }
        }
        Ok(constraints)
    }

    /// `ON UPDATE` expression of a column, from EXTRA.
    async fn on_update(&self, table: &str, column: &str) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        let extra: Option<String> = conn
            .exec_first(
                "SELECT EXTRA FROM information_schema.COLUMNS \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND COLUMN_NAME = ?",
                (table, column),
            )
            .await?;

        Ok(extra.and_then(|extra| {
            let lower = extra.to_ascii_lowercase();
            lower
                .find("on update ")
                .map(|pos| extra[pos + "on update ".len()..].trim().to_string())
        }))
    }
}

#[async_trait]
impl Connection for MysqlConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn describe_table(&self, table: &str) -> Result<TableDetails> {
        let mut conn = self.conn().await?;
        let columns = self.load_columns(&mut conn, table).await?;
        if columns.is_empty() {
            return Err(MigrateError::Config(format!(
                "Table '{}' not found on connection '{}'",
                table, self.name
            )));
        }

        Ok(TableDetails {
            name: table.to_string(),
            indexes: self.load_indexes(&mut conn, table).await?,
            foreign_keys: self.load_foreign_keys(&mut conn, table).await?,
            columns,
        })
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let mut conn = self.conn().await?;
        conn.query_drop(sql).await?;
        Ok(conn.affected_rows())
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let mut conn = self.conn().await?;
        // Binary protocol: integers and floats arrive typed
        let rows: Vec<mysql_async::Row> = conn.exec(sql, ()).await?;
        rows.iter().map(row_from_mysql).collect()
    }

    async fn insert(&self, table: &str, row: &Row) -> Result<u64> {
        let sql = self.dialect.build_insert(table, row.columns());
        let params: Vec<Value> = row.values().iter().map(to_mysql_value).collect();

        let mut conn = self.conn().await?;
        conn.exec_drop(&sql, params).await.map_err(|e| {
            debug!("{}", sql);
            MigrateError::from(e)
        })?;
        Ok(conn.affected_rows())
    }

    async fn set_nullable(&self, table: &str, column: &Column, nullable: bool) -> Result<()> {
        let on_update = self.on_update(table, &column.name).await?;
        let sql = self
            .dialect
            .modify_column_sql(table, column, nullable, on_update.as_deref());
        debug!("{}", sql);
        self.execute(&sql).await?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.pool.clone().disconnect().await {
            warn!("Failed to close MySQL pool '{}': {}", self.name, e);
        }
    }
}

fn row_from_mysql(row: &mysql_async::Row) -> Result<Row> {
    let mut out = Row::new();
    for (i, column) in row.columns_ref().iter().enumerate() {
        let value = match row.as_ref(i) {
            Some(value) => from_mysql_value(value, column.column_type(), column.character_set())?,
            None => SqlValue::Null,
        };
        out.set(column.name_str().into_owned(), value);
    }
    Ok(out)
}

fn from_mysql_value(value: &Value, column_type: ColumnType, charset: u16) -> Result<SqlValue> {
    Ok(match value {
        Value::NULL => SqlValue::Null,
        Value::Int(v) => SqlValue::I64(*v),
        Value::UInt(v) => match i64::try_from(*v) {
            Ok(v) => SqlValue::I64(v),
            Err(_) => SqlValue::Decimal(Decimal::from(*v)),
        },
        Value::Float(v) => SqlValue::F64(f64::from(*v)),
        Value::Double(v) => SqlValue::F64(*v),
        Value::Bytes(bytes) => match column_type {
            ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
                let text = String::from_utf8_lossy(bytes);
                text.parse::<Decimal>()
                    .map(SqlValue::Decimal)
                    .map_err(|e| MigrateError::Unsupported(format!("decimal '{}': {}", text, e)))?
            }
            _ if charset == BINARY_CHARSET => SqlValue::Bytes(bytes.clone()),
            _ => match String::from_utf8_lossy(bytes) {
                Cow::Borrowed(s) => SqlValue::Text(s.to_string()),
                Cow::Owned(s) => SqlValue::Text(s),
            },
        },
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let date = NaiveDate::from_ymd_opt(i32::from(*year), u32::from(*month), u32::from(*day));
            match (column_type, date) {
                (ColumnType::MYSQL_TYPE_DATE, Some(date)) => SqlValue::Date(date),
                (_, Some(date)) => date
                    .and_hms_micro_opt(
                        u32::from(*hour),
                        u32::from(*minute),
                        u32::from(*second),
                        *micros,
                    )
                    .map(SqlValue::DateTime)
                    .unwrap_or(SqlValue::Null),
                // zero dates
                (_, None) => SqlValue::Null,
            }
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let total_hours = days * 24 + u32::from(*hours);
            if *negative || total_hours >= 24 {
                SqlValue::Text(format!(
                    "{}{:02}:{:02}:{:02}.{:06}",
                    if *negative { "-" } else { "" },
                    total_hours,
                    minutes,
                    seconds,
                    micros
                ))
            } else {
                NaiveTime::from_hms_micro_opt(
                    total_hours,
                    u32::from(*minutes),
                    u32::from(*seconds),
                    *micros,
                )
                .map(SqlValue::Time)
                .unwrap_or(SqlValue::Null)
            }
        }
    })
}

fn to_mysql_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::NULL,
        SqlValue::Bool(v) => Value::Int(i64::from(*v)),
        SqlValue::I64(v) => Value::Int(*v),
        SqlValue::F64(v) => Value::Double(*v),
        SqlValue::Decimal(v) => Value::Bytes(v.to_string().into_bytes()),
        SqlValue::Text(v) => Value::Bytes(v.as_bytes().to_vec()),
        SqlValue::Bytes(v) => Value::Bytes(v.clone()),
        SqlValue::Uuid(v) => Value::Bytes(v.to_string().into_bytes()),
        SqlValue::DateTime(v) => datetime_value(v),
        SqlValue::DateTimeOffset(v) => datetime_value(&v.naive_utc()),
        SqlValue::Date(v) => Value::Date(
            v.year() as u16,
            v.month() as u8,
            v.day() as u8,
            0,
            0,
            0,
            0,
        ),
        SqlValue::Time(v) => Value::Time(
            false,
            0,
            v.hour() as u8,
            v.minute() as u8,
            v.second() as u8,
            v.nanosecond() / 1_000,
        ),
    }
}

fn datetime_value(v: &NaiveDateTime) -> Value {
    Value::Date(
        v.year() as u16,
        v.month() as u8,
        v.day() as u8,
        v.hour() as u8,
        v.minute() as u8,
        v.second() as u8,
        v.nanosecond() / 1_000,
    )
}
