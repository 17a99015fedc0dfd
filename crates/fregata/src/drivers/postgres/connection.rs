//! PostgreSQL connection backed by deadpool-postgres.

use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::{Config as PgConfig, SimpleQueryMessage};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ConnectionConfig;
use crate::core::schema::{Column, ForeignKeyConstraint, Index, TableDetails};
use crate::core::traits::{Connection, Dialect};
use crate::core::value::{Row, SqlValue};
use crate::drivers::common::TlsBuilder;
use crate::error::{MigrateError, Result};

use super::PostgresDialect;

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

const COLUMNS_QUERY: &str = "\
SELECT a.attname::text,
       format_type(a.atttypid, a.atttypmod),
       NOT a.attnotnull,
       pg_get_expr(d.adbin, d.adrelid),
       a.attidentity <> '' OR COALESCE(pg_get_expr(d.adbin, d.adrelid), '') LIKE 'nextval(%'
FROM pg_attribute a
LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
WHERE a.attrelid = to_regclass($1::text) AND a.attnum > 0 AND NOT a.attisdropped
ORDER BY a.attnum";

const INDEXES_QUERY: &str = "\
SELECT i.relname::text, a.attname::text, ix.indisunique, ix.indisprimary
FROM pg_index ix
JOIN pg_class i ON i.oid = ix.indexrelid
CROSS JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
JOIN pg_attribute a ON a.attrelid = ix.indrelid AND a.attnum = k.attnum
WHERE ix.indrelid = to_regclass($1::text)
ORDER BY i.relname, k.ord";

const FOREIGN_KEYS_QUERY: &str = "\
SELECT c.conname::text,
       la.attname::text,
       CASE WHEN fn.nspname = current_schema() THEN fc.relname::text
            ELSE fn.nspname || '.' || fc.relname END,
       fa.attname::text
FROM pg_constraint c
CROSS JOIN LATERAL unnest(c.conkey, c.confkey) WITH ORDINALITY AS k(local_num, foreign_num, ord)
JOIN pg_attribute la ON la.attrelid = c.conrelid AND la.attnum = k.local_num
JOIN pg_attribute fa ON fa.attrelid = c.confrelid AND fa.attnum = k.foreign_num
JOIN pg_class fc ON fc.oid = c.confrelid
JOIN pg_namespace fn ON fn.oid = fc.relnamespace
WHERE c.contype = 'f' AND c.conrelid = to_regclass($1::text)
ORDER BY c.conname, k.ord";

/// PostgreSQL connection pool.
pub struct PostgresConnection {
    name: String,
    pool: Pool,
    dialect: PostgresDialect,
}

impl PostgresConnection {
    /// Open a pool and check it with `SELECT 1`.
    pub async fn connect(name: &str, config: &ConnectionConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port_or_default());
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let pool = match TlsBuilder::parse(&config.ssl_mode)?.build()? {
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
                Pool::builder(mgr)
                    .max_size(config.pool_size.max(1))
                    .build()
                    .map_err(|e| MigrateError::pool(e, format!("creating PostgreSQL pool '{}'", name)))?
            }
            Some(tls) => {
                let mgr = Manager::from_config(pg_config, tls, mgr_config);
                Pool::builder(mgr)
                    .max_size(config.pool_size.max(1))
                    .build()
                    .map_err(|e| MigrateError::pool(e, format!("creating PostgreSQL pool '{}'", name)))?
            }
        };

        let client = pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, format!("connecting to PostgreSQL '{}'", name)))?;
        client.simple_query("SELECT 1").await?;
        drop(client);

        info!("Connected to PostgreSQL '{}': {}", name, config.describe());

        Ok(Self {
            name: name.to_string(),
            pool,
            dialect: PostgresDialect::new(),
        })
    }

    async fn client(&self) -> Result<Object> {
        self.pool.get().await.map_err(|e| {
            MigrateError::pool(e, format!("checking out PostgreSQL '{}'", self.name))
        })
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn describe_table(&self, table: &str) -> Result<TableDetails> {
        let client = self.client().await?;
        let regclass = self.dialect.quote_table(table);

        let columns: Vec<Column> = client
            .query(COLUMNS_QUERY, &[&regclass])
            .await?
            .iter()
            .map(|row| -> Result<Column> {
                Ok(Column {
                    name: row.try_get(0)?,
                    data_type: row.try_get(1)?,
                    is_nullable: row.try_get(2)?,
                    default: row.try_get(3)?,
                    is_auto_increment: row.try_get(4)?,
                })
            })
            .collect::<Result<_>>()?;

        if columns.is_empty() {
            return Err(MigrateError::Config(format!(
                "Table '{}' not found on connection '{}'",
                table, self.name
            )));
        }

        let mut indexes: Vec<Index> = Vec::new();
        for row in client.query(INDEXES_QUERY, &[&regclass]).await? {
            let name: String = row.try_get(0)?;
            let column: String = row.try_get(1)?;
            match indexes.iter_mut().find(|i| i.name == name) {
                Some(index) => index.columns.push(column),
                None => indexes.push(Index {
                    name,
                    columns: vec![column],
                    is_unique: row.try_get(2)?,
                    is_primary: row.try_get(3)?,
                }),
            }
        }

        let mut foreign_keys: Vec<ForeignKeyConstraint> = Vec::new();
        for row in client.query(FOREIGN_KEYS_QUERY, &[&regclass]).await? {
            let name: String = row.try_get(0)?;
            let column: String = row.try_get(1)?;
            let foreign_table: String = row.try_get(2)?;
            let foreign_column: String = row.try_get(3)?;
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
        let client = self.client().await?;
        let affected = client
            .simple_query(sql)
            .await?
            .iter()
            .map(|message| match message {
                SimpleQueryMessage::CommandComplete(n) => *n,
                _ => 0,
            })
            .sum();
        Ok(affected)
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let client = self.client().await?;
        client
            .query(sql, &[])
            .await?
            .iter()
            .map(row_from_pg)
            .collect()
    }

    async fn insert(&self, table: &str, row: &Row) -> Result<u64> {
        let sql = self.dialect.build_insert(table, row.columns());
        let client = self.client().await?;
        let statement = client.prepare_cached(&sql).await?;

        let params: Vec<&(dyn ToSql + Sync)> = row
            .values()
            .iter()
            .map(|v| v as &(dyn ToSql + Sync))
            .collect();
        Ok(client.execute(&statement, &params).await?)
    }

    async fn close(&self) {
        self.pool.close();
    }
}

fn row_from_pg(row: &tokio_postgres::Row) -> Result<Row> {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = match *column.type_() {
            Type::BOOL => row.try_get::<_, Option<bool>>(i)?.map(SqlValue::Bool),
            Type::INT2 => row
                .try_get::<_, Option<i16>>(i)?
                .map(|v| SqlValue::I64(i64::from(v))),
            Type::INT4 => row
                .try_get::<_, Option<i32>>(i)?
                .map(|v| SqlValue::I64(i64::from(v))),
            Type::INT8 => row.try_get::<_, Option<i64>>(i)?.map(SqlValue::I64),
            Type::OID => row
                .try_get::<_, Option<u32>>(i)?
                .map(|v| SqlValue::I64(i64::from(v))),
            Type::FLOAT4 => row
                .try_get::<_, Option<f32>>(i)?
                .map(|v| SqlValue::F64(f64::from(v))),
            Type::FLOAT8 => row.try_get::<_, Option<f64>>(i)?.map(SqlValue::F64),
            Type::NUMERIC => row.try_get::<_, Option<Decimal>>(i)?.map(SqlValue::Decimal),
            Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(i)?.map(SqlValue::Bytes),
            Type::UUID => row.try_get::<_, Option<Uuid>>(i)?.map(SqlValue::Uuid),
            Type::TIMESTAMP => row
                .try_get::<_, Option<NaiveDateTime>>(i)?
                .map(SqlValue::DateTime),
            Type::TIMESTAMPTZ => row
                .try_get::<_, Option<DateTime<Utc>>>(i)?
                .map(|v| SqlValue::DateTimeOffset(v.fixed_offset())),
            Type::DATE => row.try_get::<_, Option<NaiveDate>>(i)?.map(SqlValue::Date),
            Type::TIME => row.try_get::<_, Option<NaiveTime>>(i)?.map(SqlValue::Time),
            Type::JSON | Type::JSONB => row
                .try_get::<_, Option<serde_json::Value>>(i)?
                .map(|v| SqlValue::Text(v.to_string())),
            _ => row.try_get::<_, Option<String>>(i)?.map(SqlValue::Text),
        };
        out.set(column.name(), value.unwrap_or(SqlValue::Null));
    }
    Ok(out)
}

type BoxError = Box<dyn StdError + Sync + Send>;

fn out_of_range(value: &SqlValue, ty: &Type) -> BoxError {
    format!("value {} does not fit PostgreSQL type {}", value, ty).into()
}

/// Values are converted to the parameter type PostgreSQL inferred, so an
/// `I64` can fill an `int4` column and text can fill a `uuid` one.
impl ToSql for SqlValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(v) => match *ty {
                Type::BOOL => v.to_sql(ty, out),
                _ => SqlValue::I64(i64::from(*v)).to_sql(ty, out),
            },
            SqlValue::I64(v) => match *ty {
                Type::INT2 => i16::try_from(*v)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*v)?.to_sql(ty, out),
                Type::OID => u32::try_from(*v)?.to_sql(ty, out),
                Type::BOOL => (*v != 0).to_sql(ty, out),
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::FLOAT8 => (*v as f64).to_sql(ty, out),
                Type::NUMERIC => Decimal::from(*v).to_sql(ty, out),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
                    v.to_string().to_sql(ty, out)
                }
                _ => v.to_sql(ty, out),
            },
            SqlValue::F64(v) => match *ty {
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::NUMERIC => Decimal::from_f64(*v)
                    .ok_or_else(|| out_of_range(self, ty))?
                    .to_sql(ty, out),
                Type::INT2 | Type::INT4 | Type::INT8 if v.fract() == 0.0 => {
                    SqlValue::I64(*v as i64).to_sql(ty, out)
                }
                Type::TEXT | Type::VARCHAR | Type::BPCHAR => v.to_string().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            SqlValue::Decimal(v) => match *ty {
                Type::FLOAT4 | Type::FLOAT8 => v
                    .to_f64()
                    .ok_or_else(|| out_of_range(self, ty))?
                    .to_sql(ty, out),
                Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => SqlValue::I64(
                    v.to_i64()
                        .filter(|_| v.fract().is_zero())
                        .ok_or_else(|| out_of_range(self, ty))?,
                )
                .to_sql(ty, out),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR => v.to_string().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            SqlValue::Text(v) => match *ty {
                Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => {
                    SqlValue::I64(v.trim().parse()?).to_sql(ty, out)
                }
                Type::FLOAT4 | Type::FLOAT8 => SqlValue::F64(v.trim().parse()?).to_sql(ty, out),
                Type::NUMERIC => v.trim().parse::<Decimal>()?.to_sql(ty, out),
                Type::BOOL => matches!(v.trim(), "1" | "t" | "true" | "TRUE" | "y" | "yes")
                    .to_sql(ty, out),
                Type::UUID => Uuid::parse_str(v.trim())?.to_sql(ty, out),
                Type::JSON | Type::JSONB => {
                    serde_json::from_str::<serde_json::Value>(v)?.to_sql(ty, out)
                }
                Type::BYTEA => v.as_bytes().to_sql(ty, out),
                _ => v.as_str().to_sql(ty, out),
            },
            SqlValue::Bytes(v) => v.as_slice().to_sql(ty, out),
            SqlValue::Uuid(v) => match *ty {
                Type::UUID => v.to_sql(ty, out),
                _ => v.to_string().to_sql(ty, out),
            },
            SqlValue::DateTime(v) => match *ty {
                Type::TIMESTAMPTZ => Utc.from_utc_datetime(v).to_sql(ty, out),
                Type::DATE => v.date().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            SqlValue::DateTimeOffset(v) => match *ty {
                Type::TIMESTAMP => v.naive_utc().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            SqlValue::Date(v) => match *ty {
                Type::TIMESTAMP => v.and_time(NaiveTime::MIN).to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            SqlValue::Time(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: &SqlValue, ty: &Type) -> std::result::Result<BytesMut, BoxError> {
        let mut out = BytesMut::new();
        value.to_sql(ty, &mut out)?;
        Ok(out)
    }

    #[test]
    fn test_integers_narrow_to_column_type() {
        assert_eq!(encode(&SqlValue::I64(7), &Type::INT4).unwrap().len(), 4);
        assert_eq!(encode(&SqlValue::I64(7), &Type::INT2).unwrap().len(), 2);
        assert_eq!(encode(&SqlValue::I64(7), &Type::INT8).unwrap().len(), 8);
        assert!(encode(&SqlValue::I64(i64::MAX), &Type::INT4).is_err());
    }

    #[test]
    fn test_null_is_null_for_any_type() {
        let mut out = BytesMut::new();
        assert!(matches!(
            SqlValue::Null.to_sql(&Type::UUID, &mut out).unwrap(),
            IsNull::Yes
        ));
    }

    #[test]
    fn test_text_parsed_for_typed_columns() {
        assert_eq!(
            encode(&SqlValue::Text("42".into()), &Type::INT4).unwrap().len(),
            4
        );
        assert_eq!(
            encode(
                &SqlValue::Text("67e55044-10b1-426f-9247-bb680e5fe0c8".into()),
                &Type::UUID
            )
            .unwrap()
            .len(),
            16
        );
        assert!(encode(&SqlValue::Text("abc".into()), &Type::INT4).is_err());
    }

    #[test]
    fn test_fractional_decimal_rejected_for_integers() {
        let value = SqlValue::Decimal("1.5".parse().unwrap());
        assert!(encode(&value, &Type::INT4).is_err());
        let whole = SqlValue::Decimal("2.00".parse().unwrap());
        assert_eq!(encode(&whole, &Type::INT4).unwrap().len(), 4);
    }
}
