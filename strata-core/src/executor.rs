use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveDateTime};
use sqlx::any::{AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::{Any, AnyPool, Row, ValueRef};

use crate::dialect::{Dialect, dialect_for_url};
use crate::error::{StrataError, StrataResult, statement_error};
use crate::field::FieldType;
use crate::value::{DATE_FORMAT, DATETIME_FORMAT, Value};

type AnyQuery<'q> = sqlx::query::Query<'q, Any, AnyArguments<'q>>;

#[cfg(feature = "metrics")]
fn record_query_metrics(operation: &str, elapsed: Duration) {
    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    let labels = [("operation", operation.to_owned())];
    metrics::histogram!("strata.query.duration_ms", &labels).record(elapsed_ms);
    metrics::counter!("strata.query.count", &labels).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn record_query_metrics(_operation: &str, _elapsed: Duration) {}

#[inline(always)]
fn bind_value<'q>(query: AnyQuery<'q>, value: Value) -> AnyQuery<'q> {
    match value.into_scalar() {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(v) => query.bind(v),
        Value::Int(v) => query.bind(v),
        Value::Float(v) => query.bind(v),
        Value::Text(v) => query.bind(v),
        Value::Date(v) => query.bind(v.format(DATE_FORMAT).to_string()),
        Value::DateTime(v) => query.bind(v.format(DATETIME_FORMAT).to_string()),
        other => query.bind(other.to_string()),
    }
}

fn render_args(args: &[Value]) -> String {
    let rendered: Vec<String> = args.iter().map(Value::to_log_string).collect();
    format!("[{}]", rendered.join(", "))
}

fn build_query<'q>(sql: &'q str, args: Vec<Value>) -> AnyQuery<'q> {
    args.into_iter()
        .fold(sqlx::query(sql), |query, value| bind_value(query, value))
}

/// A connection pool paired with the dialect of its database.
///
/// Cheap to clone; every statement the engine runs goes through here so it is
/// logged, timed and wrapped with its SQL on failure.
#[derive(Clone)]
pub struct Executor {
    pool: AnyPool,
    dialect: Arc<dyn Dialect>,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("dialect", &self.dialect.name())
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Open a pool for `url`, choosing the dialect from its scheme.
    ///
    /// In-memory SQLite databases live as long as their connection, so they get
    /// a single connection that is never recycled.
    pub async fn connect(url: &str) -> StrataResult<Self> {
        let dialect = dialect_for_url(url)
            .ok_or_else(|| StrataError::Message(format!("unsupported database url `{}`", url)))?;
        sqlx::any::install_default_drivers();
        let mut options = AnyPoolOptions::new();
        if url.contains(":memory:") {
            options = options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = options.connect(url).await?;
        tracing::info!(dialect = dialect.name(), "database pool opened");
        Ok(Self::new(pool, dialect))
    }

    pub fn new(pool: AnyPool, dialect: Arc<dyn Dialect>) -> Self {
        Self { pool, dialect }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    /// Run a statement, returning the number of affected rows.
    pub async fn execute(&self, sql: &str, args: Vec<Value>) -> StrataResult<u64> {
        tracing::debug!(sql = sql, args = %render_args(&args), "execute");
        let start = Instant::now();
        let result = build_query(sql, args)
            .execute(&self.pool)
            .await
            .map_err(|err| statement_error(sql, err))?;
        record_query_metrics("execute", start.elapsed());
        Ok(result.rows_affected())
    }

    /// Run a schema statement.
    pub async fn execute_ddl(&self, sql: &str) -> StrataResult<()> {
        let start = Instant::now();
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map_err(|err| statement_error(sql, err))?;
        record_query_metrics("ddl", start.elapsed());
        Ok(())
    }

    pub async fn fetch_all(&self, sql: &str, args: Vec<Value>) -> StrataResult<Vec<AnyRow>> {
        tracing::debug!(sql = sql, args = %render_args(&args), "fetch");
        let start = Instant::now();
        let rows = build_query(sql, args)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| statement_error(sql, err))?;
        record_query_metrics("fetch", start.elapsed());
        Ok(rows)
    }

    /// First column of every row as an id; null rows are skipped.
    pub async fn fetch_ids(&self, sql: &str, args: Vec<Value>) -> StrataResult<Vec<i64>> {
        let rows = self.fetch_all(sql, args).await?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(id) = decode_value(row, 0, FieldType::Integer)?.as_i64() {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// The first column of the first row as an integer.
    pub async fn fetch_scalar(&self, sql: &str, args: Vec<Value>) -> StrataResult<Option<i64>> {
        Ok(self.fetch_ids(sql, args).await?.into_iter().next())
    }
}

fn decode_int(row: &AnyRow, index: usize) -> Result<i64, sqlx::Error> {
    row.try_get::<i64, _>(index)
        .or_else(|_| row.try_get::<i32, _>(index).map(i64::from))
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let trimmed = text.trim();
    NaiveDateTime::parse_from_str(trimmed, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

/// Decode column `index` of a row as a value of `field_type`.
///
/// Drivers disagree on booleans and numbers (SQLite hands back integers), so
/// each type falls back to the representations a column of that type may hold.
pub(crate) fn decode_value(row: &AnyRow, index: usize, field_type: FieldType) -> StrataResult<Value> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(if field_type.is_fk() {
            Value::Ids(Vec::new())
        } else {
            Value::Null
        });
    }
    let value = match field_type {
        FieldType::Boolean => row
            .try_get::<bool, _>(index)
            .or_else(|_| decode_int(row, index).map(|v| v != 0))
            .map(Value::Bool)?,
        FieldType::Integer => Value::Int(decode_int(row, index)?),
        #[allow(clippy::cast_precision_loss)]
        FieldType::Float => row
            .try_get::<f64, _>(index)
            .or_else(|_| row.try_get::<f32, _>(index).map(f64::from))
            .or_else(|_| decode_int(row, index).map(|v| v as f64))
            .map(Value::Float)?,
        FieldType::Char | FieldType::Text => Value::Text(row.try_get::<String, _>(index)?),
        FieldType::Date => {
            let text: String = row.try_get(index)?;
            let head = text.get(..10).unwrap_or(&text);
            NaiveDate::parse_from_str(head, DATE_FORMAT)
                .map(Value::Date)
                .map_err(|err| StrataError::InvalidValue(format!("bad date `{}`: {}", text, err)))?
        }
        FieldType::DateTime => {
            let text: String = row.try_get(index)?;
            parse_datetime(&text)
                .map(Value::DateTime)
                .ok_or_else(|| StrataError::InvalidValue(format!("bad datetime `{}`", text)))?
        }
        FieldType::Many2One | FieldType::One2One => Value::Ids(vec![decode_int(row, index)?]),
        FieldType::One2Many | FieldType::Many2Many => Value::Null,
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockDatabase;

    #[tokio::test]
    async fn statements_report_their_sql() {
        let db = MockDatabase::new_sqlite().await.unwrap();
        let err = db
            .executor()
            .execute("INSERT INTO missing (x) VALUES (?)", vec![Value::Int(1)])
            .await
            .unwrap_err();
        match err {
            StrataError::Statement { sql, .. } => assert!(sql.contains("missing")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn decodes_sqlite_storage_classes() {
        let db = MockDatabase::new_sqlite().await.unwrap();
        let executor = db.executor();
        executor
            .execute_ddl("CREATE TABLE t (id INTEGER PRIMARY KEY, flag INTEGER, money REAL, born TEXT, ref INTEGER)")
            .await
            .unwrap();
        executor
            .execute(
                "INSERT INTO t (flag, money, born, ref) VALUES (?, ?, ?, ?)",
                vec![
                    Value::Bool(true),
                    Value::Int(5100),
                    Value::from(NaiveDate::from_ymd_opt(1990, 5, 17).unwrap()),
                    Value::Null,
                ],
            )
            .await
            .unwrap();
        let rows = executor
            .fetch_all("SELECT flag, money, born, ref FROM t", Vec::new())
            .await
            .unwrap();
        let row = &rows[0];
        assert_eq!(decode_value(row, 0, FieldType::Boolean).unwrap(), Value::Bool(true));
        assert_eq!(decode_value(row, 1, FieldType::Float).unwrap(), Value::Float(5100.0));
        assert_eq!(
            decode_value(row, 2, FieldType::Date).unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(1990, 5, 17).unwrap())
        );
        assert_eq!(decode_value(row, 3, FieldType::Many2One).unwrap(), Value::Ids(Vec::new()));
    }

    #[tokio::test]
    async fn fetch_ids_reads_first_column() {
        let db = MockDatabase::new_sqlite().await.unwrap();
        let ids = db
            .executor()
            .fetch_ids("SELECT 3 UNION ALL SELECT 5", Vec::new())
            .await
            .unwrap();
        assert_eq!(ids, vec![3, 5]);
    }
}
