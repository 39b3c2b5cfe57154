use std::collections::{BTreeMap, BTreeSet};

use crate::dialect::{Dialect, foreign_key_name, index_name};
use crate::error::StrataResult;
use crate::executor::Executor;
use crate::field::{Field, ID_COLUMN};
use crate::model::Model;
use crate::registry::Models;

/// Metadata about a database column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaColumn {
    pub name: String,
    /// The SQL type as reported by the catalog.
    pub sql_type: String,
    pub nullable: bool,
    /// Default expression as reported by the catalog.
    pub default: Option<String>,
    pub primary_key: bool,
}

/// Metadata about a database index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaIndex {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Metadata about a foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaForeignKey {
    pub name: String,
    /// The column in the current table.
    pub column: String,
    /// The table being referenced.
    pub ref_table: String,
    pub ref_column: String,
}

/// Metadata about a database table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaTable {
    pub name: String,
    pub columns: Vec<SchemaColumn>,
    pub indexes: Vec<SchemaIndex>,
    pub foreign_keys: Vec<SchemaForeignKey>,
}

impl SchemaTable {
    /// Returns a column by name if it exists in the table.
    pub fn column(&self, name: &str) -> Option<&SchemaColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn index(&self, name: &str) -> Option<&SchemaIndex> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn foreign_key(&self, name: &str) -> Option<&SchemaForeignKey> {
        self.foreign_keys.iter().find(|fk| fk.name == name)
    }
}

/// Snapshot of the live database schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    pub tables: BTreeMap<String, SchemaTable>,
    /// Manual sequences (`*_manseq`).
    pub sequences: BTreeSet<String>,
}

/// A column present on one side only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDiff {
    pub table: String,
    pub column: String,
}

/// A column whose type differs from its field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnTypeDiff {
    pub table: String,
    pub column: String,
    pub expected: String,
    pub actual: String,
}

/// A column whose nullability differs from its field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnNullabilityDiff {
    pub table: String,
    pub column: String,
    pub expected_nullable: bool,
    pub actual_nullable: bool,
}

/// A column whose default differs from its field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefaultDiff {
    pub table: String,
    pub column: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

/// Differences between the frozen models and a live catalog.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchemaDiff {
    pub missing_tables: Vec<String>,
    /// Tables in the database backing no model.
    pub extra_tables: Vec<String>,
    pub missing_columns: Vec<ColumnDiff>,
    pub extra_columns: Vec<ColumnDiff>,
    pub type_mismatches: Vec<ColumnTypeDiff>,
    pub nullability_mismatches: Vec<ColumnNullabilityDiff>,
    pub default_mismatches: Vec<ColumnDefaultDiff>,
    pub missing_indexes: Vec<(String, SchemaIndex)>,
    pub extra_indexes: Vec<(String, SchemaIndex)>,
    pub missing_foreign_keys: Vec<(String, SchemaForeignKey)>,
    pub extra_foreign_keys: Vec<(String, SchemaForeignKey)>,
    pub missing_sequences: Vec<String>,
    pub extra_sequences: Vec<String>,
}

impl SchemaDiff {
    /// Returns true if there are no differences.
    pub fn is_empty(&self) -> bool {
        self.missing_tables.is_empty()
            && self.extra_tables.is_empty()
            && self.missing_columns.is_empty()
            && self.extra_columns.is_empty()
            && self.type_mismatches.is_empty()
            && self.nullability_mismatches.is_empty()
            && self.default_mismatches.is_empty()
            && self.missing_indexes.is_empty()
            && self.extra_indexes.is_empty()
            && self.missing_foreign_keys.is_empty()
            && self.extra_foreign_keys.is_empty()
            && self.missing_sequences.is_empty()
            && self.extra_sequences.is_empty()
    }

    /// Every table touched by a column or index change, in name order.
    fn touched_tables(&self) -> BTreeSet<&str> {
        let mut tables: BTreeSet<&str> = self.missing_tables.iter().map(String::as_str).collect();
        tables.extend(self.missing_columns.iter().map(|c| c.table.as_str()));
        tables.extend(self.extra_columns.iter().map(|c| c.table.as_str()));
        tables.extend(self.type_mismatches.iter().map(|c| c.table.as_str()));
        tables.extend(self.nullability_mismatches.iter().map(|c| c.table.as_str()));
        tables.extend(self.default_mismatches.iter().map(|c| c.table.as_str()));
        tables.extend(self.missing_indexes.iter().map(|(t, _)| t.as_str()));
        tables.extend(self.extra_indexes.iter().map(|(t, _)| t.as_str()));
        tables
    }
}

/// Formats a [`SchemaDiff`] into a human-readable summary.
pub fn format_schema_diff_summary(diff: &SchemaDiff) -> String {
    if diff.is_empty() {
        return "Schema diff: no changes".to_owned();
    }

    let mut lines = Vec::new();
    lines.push("Schema diff summary:".to_owned());
    lines.push(format!("  missing tables: {}", diff.missing_tables.len()));
    lines.push(format!("  extra tables: {}", diff.extra_tables.len()));
    lines.push(format!("  missing columns: {}", diff.missing_columns.len()));
    lines.push(format!("  extra columns: {}", diff.extra_columns.len()));
    lines.push(format!("  type mismatches: {}", diff.type_mismatches.len()));
    lines.push(format!(
        "  nullability mismatches: {}",
        diff.nullability_mismatches.len()
    ));
    lines.push(format!(
        "  default mismatches: {}",
        diff.default_mismatches.len()
    ));
    lines.push(format!("  missing indexes: {}", diff.missing_indexes.len()));
    lines.push(format!("  extra indexes: {}", diff.extra_indexes.len()));
    lines.push(format!(
        "  missing foreign keys: {}",
        diff.missing_foreign_keys.len()
    ));
    lines.push(format!(
        "  extra foreign keys: {}",
        diff.extra_foreign_keys.len()
    ));
    lines.push(format!("  missing sequences: {}", diff.missing_sequences.len()));
    lines.push(format!("  extra sequences: {}", diff.extra_sequences.len()));

    if !diff.missing_tables.is_empty() {
        lines.push(format!(
            "  missing tables list: {}",
            diff.missing_tables.join(", ")
        ));
    }
    if !diff.extra_tables.is_empty() {
        lines.push(format!(
            "  extra tables list: {}",
            diff.extra_tables.join(", ")
        ));
    }
    if !diff.missing_columns.is_empty() {
        let columns: Vec<String> = diff
            .missing_columns
            .iter()
            .map(|c| format!("{}.{}", c.table, c.column))
            .collect();
        lines.push(format!("  missing columns list: {}", columns.join(", ")));
    }

    lines.join("\n")
}

/// Columns the synchronizer manages for a model: stored fields except the key.
fn stored_fields(model: &Model) -> impl Iterator<Item = &Field> {
    model
        .fields()
        .iter()
        .filter(|field| field.is_stored() && !field.is_id())
}

/// Table referenced by a foreign key field, if it is backed by a table.
fn referenced_table<'m>(models: &'m Models, field: &Field) -> Option<&'m str> {
    if !field.field_type.is_fk() {
        return None;
    }
    field
        .relation
        .as_deref()
        .and_then(|name| models.get(name))
        .filter(|target| target.has_table())
        .map(|target| target.table.as_str())
}

/// Compare the frozen models with a catalog snapshot.
pub fn diff_schema(models: &Models, dialect: &dyn Dialect, catalog: &Catalog) -> SchemaDiff {
    let mut diff = SchemaDiff::default();
    let expected: BTreeMap<&str, &Model> = models
        .iter()
        .filter(|model| model.has_table())
        .map(|model| (model.table.as_str(), model))
        .collect();

    for (table, model) in &expected {
        let live = catalog.tables.get(*table);
        if live.is_none() {
            diff.missing_tables.push((*table).to_owned());
        }

        let mut declared = BTreeSet::new();
        let mut expected_indexes = BTreeSet::new();
        let mut expected_fks = BTreeSet::new();
        for field in stored_fields(model) {
            declared.insert(field.column.as_str());

            if field.index {
                let name = index_name(table, &field.column);
                if !live.is_some_and(|t| t.index(&name).is_some()) {
                    diff.missing_indexes.push((
                        (*table).to_owned(),
                        SchemaIndex {
                            name: name.clone(),
                            columns: vec![field.column.clone()],
                            unique: false,
                        },
                    ));
                }
                expected_indexes.insert(name);
            }

            if let Some(target) = referenced_table(models, field) {
                let name = foreign_key_name(table, &field.column);
                let present = live
                    .and_then(|t| t.foreign_key(&name))
                    .is_some_and(|fk| fk.ref_table == target);
                if !present {
                    diff.missing_foreign_keys.push((
                        (*table).to_owned(),
                        SchemaForeignKey {
                            name: name.clone(),
                            column: field.column.clone(),
                            ref_table: target.to_owned(),
                            ref_column: ID_COLUMN.to_owned(),
                        },
                    ));
                }
                if present {
                    expected_fks.insert(name);
                }
            }

            let Some(column) = live.and_then(|t| t.column(&field.column)) else {
                diff.missing_columns.push(ColumnDiff {
                    table: (*table).to_owned(),
                    column: field.column.clone(),
                });
                continue;
            };

            let expected_type = dialect.column_type(field);
            if normalize_sql_type(&column.sql_type) != normalize_sql_type(&expected_type) {
                diff.type_mismatches.push(ColumnTypeDiff {
                    table: (*table).to_owned(),
                    column: field.column.clone(),
                    expected: expected_type,
                    actual: column.sql_type.clone(),
                });
            }
            let expected_nullable = !dialect.column_not_null(field);
            if column.nullable != expected_nullable {
                diff.nullability_mismatches.push(ColumnNullabilityDiff {
                    table: (*table).to_owned(),
                    column: field.column.clone(),
                    expected_nullable,
                    actual_nullable: column.nullable,
                });
            }
            let expected_default = dialect.field_default(field);
            if normalize_default(expected_default.as_deref())
                != normalize_default(column.default.as_deref())
            {
                diff.default_mismatches.push(ColumnDefaultDiff {
                    table: (*table).to_owned(),
                    column: field.column.clone(),
                    expected: expected_default,
                    actual: column.default.clone(),
                });
            }
        }

        let Some(live) = live else {
            continue;
        };
        for column in &live.columns {
            if column.primary_key || column.name == ID_COLUMN || declared.contains(column.name.as_str()) {
                continue;
            }
            diff.extra_columns.push(ColumnDiff {
                table: (*table).to_owned(),
                column: column.name.clone(),
            });
        }
        // Only conventionally named indexes and constraints are managed.
        for index in &live.indexes {
            if index.name.ends_with("_index") && !expected_indexes.contains(&index.name) {
                diff.extra_indexes.push(((*table).to_owned(), index.clone()));
            }
        }
        for foreign_key in &live.foreign_keys {
            if foreign_key.name.ends_with("_fkey") && !expected_fks.contains(&foreign_key.name) {
                diff.extra_foreign_keys
                    .push(((*table).to_owned(), foreign_key.clone()));
            }
        }
    }

    for table in catalog.tables.keys() {
        if models.by_table(table).is_none() {
            diff.extra_tables.push(table.clone());
        }
    }

    if dialect.supports_sequences() {
        let declared: BTreeSet<&str> = models.sequences().collect();
        for sequence in &declared {
            if !catalog.sequences.contains(*sequence) {
                diff.missing_sequences.push((*sequence).to_owned());
            }
        }
        for sequence in &catalog.sequences {
            if !declared.contains(sequence.as_str()) {
                diff.extra_sequences.push(sequence.clone());
            }
        }
    }

    diff
}

/// Render the DDL converging the database, in execution order.
///
/// Column changes per table come first, foreign keys once every column exists,
/// then extra tables and sequences. Changes the dialect cannot apply in place
/// are skipped with a warning.
pub fn sync_statements(models: &Models, dialect: &dyn Dialect, diff: &SchemaDiff) -> Vec<String> {
    let mut statements = Vec::new();
    let mut dropped_indexes = BTreeSet::new();

    for table in diff.touched_tables() {
        let Some(model) = models.by_table(table) else {
            continue;
        };
        if diff.missing_tables.iter().any(|t| t == table) {
            statements.push(dialect.create_table_sql(table));
        }
        for missing in diff.missing_columns.iter().filter(|c| c.table == table) {
            let Some(field) = model.field(&missing.column) else {
                continue;
            };
            let reference = if dialect.inline_foreign_keys() {
                referenced_table(models, field)
            } else {
                None
            };
            statements.push(dialect.add_column_sql(table, field, reference));
        }
        for mismatch in diff.type_mismatches.iter().filter(|c| c.table == table) {
            if let Some(sql) = model
                .field(&mismatch.column)
                .and_then(|field| dialect.alter_column_type_sql(table, field))
            {
                statements.push(sql);
            }
        }
        for mismatch in diff.nullability_mismatches.iter().filter(|c| c.table == table) {
            if let Some(sql) = model
                .field(&mismatch.column)
                .and_then(|field| dialect.alter_column_nullable_sql(table, field))
            {
                statements.push(sql);
            }
        }
        for mismatch in diff.default_mismatches.iter().filter(|c| c.table == table) {
            if let Some(sql) = model
                .field(&mismatch.column)
                .and_then(|field| dialect.alter_column_default_sql(table, field))
            {
                statements.push(sql);
            }
        }
        for extra in diff.extra_columns.iter().filter(|c| c.table == table) {
            for (_, index) in diff
                .extra_indexes
                .iter()
                .filter(|(t, i)| t == table && i.columns.contains(&extra.column))
            {
                if dropped_indexes.insert(index.name.clone()) {
                    statements.push(dialect.drop_index_sql(&index.name));
                }
            }
            statements.push(dialect.drop_column_sql(table, &extra.column));
        }
        for (_, index) in diff.missing_indexes.iter().filter(|(t, _)| t == table) {
            statements.push(dialect.create_index_sql(table, index));
        }
        for (_, index) in diff.extra_indexes.iter().filter(|(t, _)| t == table) {
            if dropped_indexes.insert(index.name.clone()) {
                statements.push(dialect.drop_index_sql(&index.name));
            }
        }
    }

    for (table, foreign_key) in &diff.extra_foreign_keys {
        if let Some(sql) = dialect.drop_foreign_key_sql(table, &foreign_key.name) {
            statements.push(sql);
        }
    }
    for (table, foreign_key) in &diff.missing_foreign_keys {
        let created_inline = dialect.inline_foreign_keys()
            && diff
                .missing_columns
                .iter()
                .any(|c| &c.table == table && c.column == foreign_key.column);
        if created_inline {
            continue;
        }
        let on_delete = models
            .by_table(table)
            .and_then(|model| model.field(&foreign_key.column))
            .map(|field| field.on_delete)
            .unwrap_or_default();
        if let Some(sql) = dialect.add_foreign_key_sql(table, foreign_key, on_delete) {
            statements.push(sql);
        }
    }

    for table in &diff.extra_tables {
        statements.push(dialect.drop_table_sql(table));
    }

    for sequence in &diff.missing_sequences {
        if let Some(sql) = dialect.create_sequence_sql(sequence) {
            statements.push(sql);
        }
    }
    for sequence in &diff.extra_sequences {
        if let Some(sql) = dialect.drop_sequence_sql(sequence) {
            statements.push(sql);
        }
    }

    statements
}

/// Introspect the database and diff it against the models.
pub async fn diff_database(executor: &Executor, models: &Models) -> StrataResult<SchemaDiff> {
    let catalog = executor.dialect().introspect(executor.pool()).await?;
    Ok(diff_schema(models, executor.dialect(), &catalog))
}

/// The statements a synchronization would run, without running them.
pub async fn plan_sync(executor: &Executor, models: &Models) -> StrataResult<Vec<String>> {
    let diff = diff_database(executor, models).await?;
    Ok(sync_statements(models, executor.dialect(), &diff))
}

/// Converge the database schema on the models.
///
/// Each statement runs on its own: a failure leaves the statements before it
/// applied, and a re-run picks up from there. Returns the executed statements,
/// empty when the schema already matches.
#[tracing::instrument(skip_all, fields(dialect = executor.dialect().name()))]
pub async fn sync_database(executor: &Executor, models: &Models) -> StrataResult<Vec<String>> {
    let statements = plan_sync(executor, models).await?;
    if statements.is_empty() {
        tracing::info!(operation = "schema_sync", "schema up to date");
        return Ok(statements);
    }
    for sql in &statements {
        tracing::info!(operation = "schema_sync", sql = %sql, "applying schema change");
        executor.execute_ddl(sql).await?;
    }
    tracing::info!(
        operation = "schema_sync",
        statements = statements.len(),
        "schema synchronized"
    );
    Ok(statements)
}

/// Reduce a declared or introspected type to a comparable class. Character types keep
/// their declared length.
fn normalize_sql_type(sql_type: &str) -> String {
    let t = sql_type.trim().to_lowercase();
    if t.is_empty() {
        return t;
    }
    if t.contains("int") || t.contains("serial") {
        return "integer".to_owned();
    }
    if t.starts_with("varchar") || t.starts_with("character varying") {
        return match t.find('(') {
            Some(open) => format!("varchar{}", t[open..].replace(' ', "")),
            None => "varchar".to_owned(),
        };
    }
    if t.contains("char") || t.contains("text") || t.contains("clob") {
        return "text".to_owned();
    }
    if t.contains("real")
        || t.contains("floa")
        || t.contains("doub")
        || t.contains("numeric")
        || t.contains("decimal")
    {
        return "real".to_owned();
    }
    if t.contains("bool") {
        return "boolean".to_owned();
    }
    if t.contains("time") {
        return "datetime".to_owned();
    }
    if t.contains("date") {
        return "date".to_owned();
    }
    t
}

/// Strip wrapping parentheses and a trailing `::type` cast from a default expression.
fn normalize_default(default: Option<&str>) -> Option<String> {
    let mut text = default?.trim();
    while text.len() >= 2 && text.starts_with('(') && text.ends_with(')') {
        text = text[1..text.len() - 1].trim();
    }
    if let Some(pos) = text.rfind("::") {
        if !text[pos..].contains('\'') {
            text = text[..pos].trim();
        }
    }
    if text.is_empty() || text.eq_ignore_ascii_case("null") {
        return None;
    }
    Some(text.to_owned())
}
