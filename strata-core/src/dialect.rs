use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use sqlx::{AnyPool, Row};

use crate::condition::Operator;
use crate::error::StrataResult;
use crate::field::{Field, FieldType, OnDelete};
use crate::registry::SEQUENCE_SUFFIX;
use crate::schema::{Catalog, SchemaColumn, SchemaForeignKey, SchemaIndex, SchemaTable};
use crate::value::{DATE_FORMAT, DATETIME_FORMAT, Value};

/// Database-specific SQL rendering and catalog introspection.
///
/// One implementation per engine. The compiler and the schema synchronizer only
/// talk to the database through this trait, so the engine is picked once at
/// runtime from the connection URL.
#[async_trait]
pub trait Dialect: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Placeholder for the `n`-th (1-based) bound argument.
    fn placeholder(&self, n: usize) -> String;

    fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn operator_sql(&self, operator: Operator) -> &'static str {
        operator.sql()
    }

    /// Wrap a bound placeholder so the engine reads it as `field_type`.
    fn value_sql(&self, placeholder: String, _field_type: FieldType) -> String {
        placeholder
    }

    /// Wrap a selected column so it decodes as a driver-neutral type.
    fn column_sql(&self, expr: String, _field_type: FieldType) -> String {
        expr
    }

    /// Column type of a stored field.
    fn column_type(&self, field: &Field) -> String;

    fn column_not_null(&self, field: &Field) -> bool {
        field.required && !field.field_type.is_fk() && !field.is_id()
    }

    /// SQL literal for a default value.
    fn default_literal(&self, value: &Value) -> Option<String> {
        match value {
            Value::Null | Value::Ids(_) | Value::List(_) | Value::Map(_) => None,
            Value::Bool(v) => Some(v.to_string()),
            Value::Int(v) => Some(v.to_string()),
            Value::Float(v) => Some(v.to_string()),
            Value::Text(v) => Some(quote_literal(v)),
            Value::Date(v) => Some(quote_literal(&v.format(DATE_FORMAT).to_string())),
            Value::DateTime(v) => Some(quote_literal(&v.format(DATETIME_FORMAT).to_string())),
        }
    }

    /// Declared default of a column: the field default, or a zero value for
    /// NOT NULL columns so they can be added to populated tables.
    fn field_default(&self, field: &Field) -> Option<String> {
        if let Some(value) = &field.default {
            return self.default_literal(value);
        }
        if !self.column_not_null(field) {
            return None;
        }
        let zero = match field.field_type {
            FieldType::Char | FieldType::Text => Value::from(""),
            FieldType::Integer => Value::Int(0),
            FieldType::Float => Value::Float(0.0),
            FieldType::Boolean => Value::Bool(false),
            FieldType::Date => Value::from("1970-01-01"),
            FieldType::DateTime => Value::from("1970-01-01 00:00:00"),
            _ => return None,
        };
        self.default_literal(&zero)
    }

    /// Column definition used by `ADD COLUMN`.
    fn column_definition(&self, field: &Field) -> String {
        let mut def = format!("{} {}", field.column, self.column_type(field));
        if self.column_not_null(field) {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = self.field_default(field) {
            def.push_str(" DEFAULT ");
            def.push_str(&default);
        }
        def
    }

    /// New table holding only its primary key.
    fn create_table_sql(&self, table: &str) -> String;

    fn drop_table_sql(&self, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", self.quote_identifier(table))
    }

    /// `reference` is the referenced table when the foreign key is declared inline.
    fn add_column_sql(&self, table: &str, field: &Field, reference: Option<&str>) -> String {
        let mut sql = format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote_identifier(table),
            self.column_definition(field)
        );
        if let Some(target) = reference {
            sql.push_str(&format!(
                " REFERENCES {}(id) ON DELETE {}",
                self.quote_identifier(target),
                field.on_delete.sql()
            ));
        }
        sql
    }

    fn alter_column_type_sql(&self, table: &str, field: &Field) -> Option<String>;
    fn alter_column_nullable_sql(&self, table: &str, field: &Field) -> Option<String>;
    fn alter_column_default_sql(&self, table: &str, field: &Field) -> Option<String>;

    fn drop_column_sql(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote_identifier(table),
            column
        )
    }

    /// True when foreign keys are declared with their column.
    fn inline_foreign_keys(&self) -> bool {
        false
    }

    fn add_foreign_key_sql(
        &self,
        table: &str,
        foreign_key: &SchemaForeignKey,
        on_delete: OnDelete,
    ) -> Option<String>;
    fn drop_foreign_key_sql(&self, table: &str, name: &str) -> Option<String>;

    fn create_index_sql(&self, table: &str, index: &SchemaIndex) -> String {
        let unique = if index.unique { "UNIQUE " } else { "" };
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            unique,
            index.name,
            self.quote_identifier(table),
            index.columns.join(", ")
        )
    }

    fn drop_index_sql(&self, name: &str) -> String {
        format!("DROP INDEX IF EXISTS {}", name)
    }

    fn supports_sequences(&self) -> bool {
        true
    }

    fn create_sequence_sql(&self, name: &str) -> Option<String>;
    fn drop_sequence_sql(&self, name: &str) -> Option<String>;

    /// Trailing `LIMIT`/`OFFSET` clause, with a leading space when not empty.
    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        let mut sql = String::new();
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
        sql
    }

    /// Snapshot of the live schema.
    async fn introspect(&self, pool: &AnyPool) -> StrataResult<Catalog>;
}

fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Conventional name of a managed single-column index.
pub fn index_name(table: &str, column: &str) -> String {
    format!("{}_{}_index", table, column)
}

/// Conventional name of a managed foreign key constraint.
pub fn foreign_key_name(table: &str, column: &str) -> String {
    format!("{}_{}_fkey", table, column)
}

/// Pick a dialect from a connection URL scheme.
pub fn dialect_for_url(url: &str) -> Option<std::sync::Arc<dyn Dialect>> {
    let scheme = url.split(':').next().unwrap_or_default();
    match scheme {
        "sqlite" => Some(std::sync::Arc::new(SqliteDialect)),
        "postgres" | "postgresql" => Some(std::sync::Arc::new(PostgresDialect)),
        _ => None,
    }
}

/// SQLite: inline foreign keys, no in-place column alteration, no sequences.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

#[async_trait]
impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder(&self, _n: usize) -> String {
        "?".to_owned()
    }

    // SQLite LIKE is already case-insensitive for ASCII.
    fn operator_sql(&self, operator: Operator) -> &'static str {
        match operator {
            Operator::ILike => "LIKE",
            other => other.sql(),
        }
    }

    // Storage classes only: the runtime driver rejects BOOLEAN and DATE declared types.
    fn column_type(&self, field: &Field) -> String {
        match field.field_type {
            FieldType::Char | FieldType::Text | FieldType::Date | FieldType::DateTime => "TEXT",
            FieldType::Float => "REAL",
            FieldType::Integer
            | FieldType::Boolean
            | FieldType::Many2One
            | FieldType::One2One
            | FieldType::One2Many
            | FieldType::Many2Many => "INTEGER",
        }
        .to_owned()
    }

    fn default_literal(&self, value: &Value) -> Option<String> {
        match value {
            Value::Bool(v) => Some(i64::from(*v).to_string()),
            Value::Float(v) => Some(v.to_string()),
            Value::Int(v) => Some(v.to_string()),
            Value::Text(v) => Some(quote_literal(v)),
            Value::Date(v) => Some(quote_literal(&v.format(DATE_FORMAT).to_string())),
            Value::DateTime(v) => Some(quote_literal(&v.format(DATETIME_FORMAT).to_string())),
            Value::Null | Value::Ids(_) | Value::List(_) | Value::Map(_) => None,
        }
    }

    fn create_table_sql(&self, table: &str) -> String {
        format!(
            "CREATE TABLE {} (id INTEGER PRIMARY KEY)",
            self.quote_identifier(table)
        )
    }

    fn alter_column_type_sql(&self, table: &str, field: &Field) -> Option<String> {
        tracing::warn!(
            table = table,
            column = %field.column,
            "sqlite cannot change a column type in place, requires table rebuild"
        );
        None
    }

    fn alter_column_nullable_sql(&self, table: &str, field: &Field) -> Option<String> {
        tracing::warn!(
            table = table,
            column = %field.column,
            "sqlite cannot change nullability in place, requires table rebuild"
        );
        None
    }

    fn alter_column_default_sql(&self, table: &str, field: &Field) -> Option<String> {
        tracing::warn!(
            table = table,
            column = %field.column,
            "sqlite cannot change a column default in place, requires table rebuild"
        );
        None
    }

    fn inline_foreign_keys(&self) -> bool {
        true
    }

    fn add_foreign_key_sql(
        &self,
        table: &str,
        foreign_key: &SchemaForeignKey,
        _on_delete: OnDelete,
    ) -> Option<String> {
        tracing::warn!(
            table = table,
            constraint = %foreign_key.name,
            "sqlite cannot add a foreign key to an existing column, requires table rebuild"
        );
        None
    }

    fn drop_foreign_key_sql(&self, table: &str, name: &str) -> Option<String> {
        tracing::warn!(
            table = table,
            constraint = name,
            "sqlite cannot drop a foreign key, requires table rebuild"
        );
        None
    }

    fn supports_sequences(&self) -> bool {
        false
    }

    fn create_sequence_sql(&self, name: &str) -> Option<String> {
        tracing::warn!(sequence = name, "sqlite has no sequences");
        None
    }

    fn drop_sequence_sql(&self, _name: &str) -> Option<String> {
        None
    }

    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (Some(limit), Some(offset)) => format!(" LIMIT {} OFFSET {}", limit, offset),
            (Some(limit), None) => format!(" LIMIT {}", limit),
            (None, Some(offset)) => format!(" LIMIT -1 OFFSET {}", offset),
            (None, None) => String::new(),
        }
    }

    async fn introspect(&self, pool: &AnyPool) -> StrataResult<Catalog> {
        let names: Vec<String> = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(pool)
        .await?
        .iter()
        .map(|row| row.try_get::<String, _>(0))
        .collect::<Result<_, _>>()?;

        let mut catalog = Catalog::default();
        for name in names {
            let pragma = format!("PRAGMA table_info({})", self.quote_identifier(&name));
            let mut columns = Vec::new();
            for row in sqlx::query(&pragma).fetch_all(pool).await? {
                let primary_key = row.try_get::<i64, _>(5)? > 0;
                columns.push(SchemaColumn {
                    name: row.try_get(1)?,
                    sql_type: row.try_get(2)?,
                    nullable: !primary_key && row.try_get::<i64, _>(3)? == 0,
                    default: row.try_get::<Option<String>, _>(4)?,
                    primary_key,
                });
            }
            let indexes = sqlite_indexes(self, pool, &name).await?;
            let foreign_keys = sqlite_foreign_keys(self, pool, &name).await?;
            catalog.tables.insert(
                name.clone(),
                SchemaTable {
                    name,
                    columns,
                    indexes,
                    foreign_keys,
                },
            );
        }
        Ok(catalog)
    }
}

async fn sqlite_indexes(
    dialect: &SqliteDialect,
    pool: &AnyPool,
    table: &str,
) -> StrataResult<Vec<SchemaIndex>> {
    let sql = format!("PRAGMA index_list({})", dialect.quote_identifier(table));
    let mut indexes = Vec::new();
    for row in sqlx::query(&sql).fetch_all(pool).await? {
        let name: String = row.try_get(1)?;
        let origin: String = row.try_get(3)?;
        if origin == "pk" || name.starts_with("sqlite_autoindex") {
            continue;
        }
        let info = format!("PRAGMA index_info({})", name);
        let columns = sqlx::query(&info)
            .fetch_all(pool)
            .await?
            .iter()
            .map(|row| row.try_get::<String, _>(2))
            .collect::<Result<_, _>>()?;
        indexes.push(SchemaIndex {
            name,
            columns,
            unique: row.try_get::<i64, _>(2)? != 0,
        });
    }
    Ok(indexes)
}

// SQLite foreign keys are anonymous; they get the conventional name.
async fn sqlite_foreign_keys(
    dialect: &SqliteDialect,
    pool: &AnyPool,
    table: &str,
) -> StrataResult<Vec<SchemaForeignKey>> {
    let sql = format!("PRAGMA foreign_key_list({})", dialect.quote_identifier(table));
    let mut foreign_keys = Vec::new();
    for row in sqlx::query(&sql).fetch_all(pool).await? {
        let column: String = row.try_get(3)?;
        foreign_keys.push(SchemaForeignKey {
            name: foreign_key_name(table, &column),
            column,
            ref_table: row.try_get(2)?,
            ref_column: row
                .try_get::<Option<String>, _>(4)?
                .unwrap_or_else(|| "id".to_owned()),
        });
    }
    Ok(foreign_keys)
}

/// PostgreSQL: full `ALTER` support, named constraints and sequences.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

#[async_trait]
impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, n: usize) -> String {
        format!("${}", n)
    }

    fn value_sql(&self, placeholder: String, field_type: FieldType) -> String {
        match field_type {
            FieldType::Date => format!("{}::date", placeholder),
            FieldType::DateTime => format!("{}::timestamp", placeholder),
            _ => placeholder,
        }
    }

    fn column_sql(&self, expr: String, field_type: FieldType) -> String {
        match field_type {
            FieldType::Date | FieldType::DateTime => format!("{}::text", expr),
            _ => expr,
        }
    }

    fn column_type(&self, field: &Field) -> String {
        match field.field_type {
            FieldType::Char => match field.size {
                Some(size) => format!("varchar({})", size),
                None => "varchar".to_owned(),
            },
            FieldType::Text => "text".to_owned(),
            FieldType::Integer
            | FieldType::Many2One
            | FieldType::One2One
            | FieldType::One2Many
            | FieldType::Many2Many => "bigint".to_owned(),
            FieldType::Float => "double precision".to_owned(),
            FieldType::Boolean => "boolean".to_owned(),
            FieldType::Date => "date".to_owned(),
            FieldType::DateTime => "timestamp without time zone".to_owned(),
        }
    }

    fn create_table_sql(&self, table: &str) -> String {
        format!(
            "CREATE TABLE {} (id bigserial NOT NULL PRIMARY KEY)",
            self.quote_identifier(table)
        )
    }

    fn drop_table_sql(&self, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {} CASCADE", self.quote_identifier(table))
    }

    fn alter_column_type_sql(&self, table: &str, field: &Field) -> Option<String> {
        Some(format!(
            "ALTER TABLE {} ALTER COLUMN {} SET DATA TYPE {} USING {}::{}",
            self.quote_identifier(table),
            field.column,
            self.column_type(field),
            field.column,
            self.column_type(field)
        ))
    }

    fn alter_column_nullable_sql(&self, table: &str, field: &Field) -> Option<String> {
        let action = if self.column_not_null(field) {
            "SET NOT NULL"
        } else {
            "DROP NOT NULL"
        };
        Some(format!(
            "ALTER TABLE {} ALTER COLUMN {} {}",
            self.quote_identifier(table),
            field.column,
            action
        ))
    }

    fn alter_column_default_sql(&self, table: &str, field: &Field) -> Option<String> {
        let action = match self.field_default(field) {
            Some(default) => format!("SET DEFAULT {}", default),
            None => "DROP DEFAULT".to_owned(),
        };
        Some(format!(
            "ALTER TABLE {} ALTER COLUMN {} {}",
            self.quote_identifier(table),
            field.column,
            action
        ))
    }

    fn add_foreign_key_sql(
        &self,
        table: &str,
        foreign_key: &SchemaForeignKey,
        on_delete: OnDelete,
    ) -> Option<String> {
        Some(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ON DELETE {}",
            self.quote_identifier(table),
            foreign_key.name,
            foreign_key.column,
            self.quote_identifier(&foreign_key.ref_table),
            on_delete.sql()
        ))
    }

    fn drop_foreign_key_sql(&self, table: &str, name: &str) -> Option<String> {
        Some(format!(
            "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
            self.quote_identifier(table),
            name
        ))
    }

    fn create_sequence_sql(&self, name: &str) -> Option<String> {
        Some(format!("CREATE SEQUENCE {}", name))
    }

    fn drop_sequence_sql(&self, name: &str) -> Option<String> {
        Some(format!("DROP SEQUENCE IF EXISTS {}", name))
    }

    async fn introspect(&self, pool: &AnyPool) -> StrataResult<Catalog> {
        let names: Vec<String> = sqlx::query(
            "SELECT table_name::text FROM information_schema.tables WHERE table_schema='public' AND table_type='BASE TABLE' ORDER BY table_name",
        )
        .fetch_all(pool)
        .await?
        .iter()
        .map(|row| row.try_get::<String, _>(0))
        .collect::<Result<_, _>>()?;

        let mut catalog = Catalog::default();
        for name in names {
            let primary: Vec<String> = sqlx::query(
                "SELECT a.attname::text FROM pg_index i JOIN pg_attribute a ON a.attrelid=i.indrelid AND a.attnum = ANY(i.indkey) WHERE i.indrelid=$1::regclass AND i.indisprimary",
            )
            .bind(self.quote_identifier(&name))
            .fetch_all(pool)
            .await?
            .iter()
            .map(|row| row.try_get::<String, _>(0))
            .collect::<Result<_, _>>()?;

            let mut columns = Vec::new();
            for row in sqlx::query(
                "SELECT column_name::text, data_type::text, is_nullable::text, column_default::text, character_maximum_length::int8 FROM information_schema.columns WHERE table_schema='public' AND table_name=$1 ORDER BY ordinal_position",
            )
            .bind(name.clone())
            .fetch_all(pool)
            .await?
            {
                let column: String = row.try_get(0)?;
                let primary_key = primary.contains(&column);
                let is_nullable: String = row.try_get(2)?;
                let data_type: String = row.try_get(1)?;
                columns.push(SchemaColumn {
                    name: column,
                    sql_type: postgres_live_type(&data_type, row.try_get(4)?),
                    nullable: !primary_key && is_nullable.eq_ignore_ascii_case("YES"),
                    default: row.try_get(3)?,
                    primary_key,
                });
            }
            let indexes = postgres_indexes(pool, &name).await?;
            let foreign_keys = postgres_foreign_keys(pool, &name).await?;
            catalog.tables.insert(
                name.clone(),
                SchemaTable {
                    name,
                    columns,
                    indexes,
                    foreign_keys,
                },
            );
        }

        let pattern = format!("%\\{}", SEQUENCE_SUFFIX);
        for row in sqlx::query(
            "SELECT sequence_name::text FROM information_schema.sequences WHERE sequence_schema='public' AND sequence_name LIKE $1",
        )
        .bind(pattern)
        .fetch_all(pool)
        .await?
        {
            catalog.sequences.insert(row.try_get(0)?);
        }
        Ok(catalog)
    }
}

/// `information_schema` reports `character varying` without its length.
fn postgres_live_type(data_type: &str, max_length: Option<i64>) -> String {
    match max_length {
        Some(length) => format!("{}({})", data_type, length),
        None => data_type.to_owned(),
    }
}

async fn postgres_indexes(pool: &AnyPool, table: &str) -> StrataResult<Vec<SchemaIndex>> {
    let rows = sqlx::query(
        "SELECT i.relname::text, a.attname::text, ix.indisunique
         FROM pg_class t
         JOIN pg_index ix ON t.oid = ix.indrelid
         JOIN pg_class i ON i.oid = ix.indexrelid
         JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
         WHERE t.relname = $1 AND t.relkind = 'r' AND NOT ix.indisprimary
         ORDER BY i.relname, a.attnum",
    )
    .bind(table.to_owned())
    .fetch_all(pool)
    .await?;

    let mut grouped: BTreeMap<String, SchemaIndex> = BTreeMap::new();
    for row in rows {
        let name: String = row.try_get(0)?;
        let column: String = row.try_get(1)?;
        let unique: bool = row.try_get(2)?;
        grouped
            .entry(name.clone())
            .or_insert_with(|| SchemaIndex {
                name,
                columns: Vec::new(),
                unique,
            })
            .columns
            .push(column);
    }
    Ok(grouped.into_values().collect())
}

async fn postgres_foreign_keys(pool: &AnyPool, table: &str) -> StrataResult<Vec<SchemaForeignKey>> {
    let rows = sqlx::query(
        "SELECT tc.constraint_name::text, kcu.column_name::text, ccu.table_name::text, ccu.column_name::text
         FROM information_schema.table_constraints tc
         JOIN information_schema.key_column_usage kcu
           ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema
         JOIN information_schema.constraint_column_usage ccu
           ON ccu.constraint_name = tc.constraint_name AND ccu.table_schema = tc.table_schema
         WHERE tc.constraint_type = 'FOREIGN KEY'
           AND tc.table_schema = 'public'
           AND tc.table_name = $1
         ORDER BY kcu.ordinal_position",
    )
    .bind(table.to_owned())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(SchemaForeignKey {
                name: row.try_get(0)?,
                column: row.try_get(1)?,
                ref_table: row.try_get(2)?,
                ref_column: row.try_get(3)?,
            })
        })
        .collect()
}
