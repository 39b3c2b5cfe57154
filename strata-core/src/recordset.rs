use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

use crate::compute;
use crate::condition::Condition;
use crate::dialect::Dialect;
use crate::environment::Environment;
use crate::error::{StrataError, StrataResult};
use crate::executor::decode_value;
use crate::field::{Field, FieldType, ID_COLUMN, ID_FIELD};
use crate::method::{self, LayerFuture};
use crate::model::Model;
use crate::query::{Query, SelectedColumn};
use crate::security::Permission;
use crate::value::{FieldMap, Value};

#[derive(Debug, Clone)]
enum Source {
    Query(Query),
    Ids(Vec<i64>),
}

/// An ordered set of records of one model, bound to an environment.
///
/// A record set is either a lazy query, resolved against the database each
/// time its ids are needed, or an explicit list of ids. Filtering, ordering
/// and paging never touch the database.
#[derive(Debug, Clone)]
pub struct RecordSet {
    env: Environment,
    model: String,
    source: Source,
}

impl RecordSet {
    pub(crate) fn new(env: Environment, model: &str) -> Self {
        Self {
            env,
            model: model.to_owned(),
            source: Source::Query(Query::new(model)),
        }
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn model(&self) -> StrataResult<&Model> {
        self.env.models().model(&self.model)
    }

    /// The same records seen from another environment.
    pub fn with_env(&self, env: Environment) -> RecordSet {
        RecordSet {
            env,
            model: self.model.clone(),
            source: self.source.clone(),
        }
    }

    pub fn sudo(&self) -> RecordSet {
        self.with_env(self.env.sudo())
    }

    /// Records of the same model with exactly these ids.
    pub fn with_ids(&self, ids: Vec<i64>) -> RecordSet {
        RecordSet {
            env: self.env.clone(),
            model: self.model.clone(),
            source: Source::Ids(ids),
        }
    }

    fn to_query(&self) -> Query {
        match &self.source {
            Source::Query(query) => query.clone(),
            Source::Ids(ids) => {
                Query::new(&self.model).filter(Condition::field(ID_FIELD).in_(ids.clone()))
            }
        }
    }

    fn with_query(&self, query: Query) -> RecordSet {
        RecordSet {
            env: self.env.clone(),
            model: self.model.clone(),
            source: Source::Query(query),
        }
    }

    /// Records of this set matching `condition`.
    pub fn search(&self, condition: Condition) -> RecordSet {
        self.with_query(self.to_query().filter(condition))
    }

    pub fn order_by(&self, path: &str) -> RecordSet {
        self.with_query(self.to_query().order_by(path))
    }

    pub fn order_by_desc(&self, path: &str) -> RecordSet {
        self.with_query(self.to_query().order_by_desc(path))
    }

    pub fn limit(&self, limit: u64) -> RecordSet {
        self.with_query(self.to_query().limit(limit))
    }

    pub fn offset(&self, offset: u64) -> RecordSet {
        self.with_query(self.to_query().offset(offset))
    }

    /// Resolve the ids now, pinning the set to them.
    pub async fn fetch(&self) -> StrataResult<RecordSet> {
        Ok(self.with_ids(self.ids().await?))
    }

    /// Record ids in set order, without duplicates.
    pub async fn ids(&self) -> StrataResult<Vec<i64>> {
        let query = match &self.source {
            Source::Ids(ids) => return Ok(ids.clone()),
            Source::Query(query) => query,
        };
        let executor = self.env.executor();
        let compiled = query.select_sql(self.env.models(), executor.dialect(), &[])?;
        let index = id_position(&compiled.columns);
        let rows = executor.fetch_all(&compiled.sql, compiled.args).await?;
        let mut seen = BTreeSet::new();
        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(id) = decode_value(row, index, FieldType::Integer)?.as_i64() {
                if seen.insert(id) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    pub async fn len(&self) -> StrataResult<usize> {
        Ok(self.ids().await?.len())
    }

    pub async fn is_empty(&self) -> StrataResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// One singleton record set per record.
    pub async fn records(&self) -> StrataResult<Vec<RecordSet>> {
        Ok(self
            .ids()
            .await?
            .into_iter()
            .map(|id| self.with_ids(vec![id]))
            .collect())
    }

    /// Records of both sets, this set's first.
    pub async fn union(&self, other: &RecordSet) -> StrataResult<RecordSet> {
        if other.model != self.model {
            return Err(StrataError::InvalidValue(format!(
                "cannot union {} with {} records",
                self.model, other.model
            )));
        }
        let mut ids = self.ids().await?;
        for id in other.ids().await? {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(self.with_ids(ids))
    }

    /// The id of a singleton.
    pub async fn single_id(&self) -> StrataResult<i64> {
        match self.ids().await?.as_slice() {
            [id] => Ok(*id),
            ids => Err(StrataError::NotSingleton {
                model: self.model.clone(),
                len: ids.len(),
            }),
        }
    }

    fn check_field(&self, field: &Field, permission: Permission) -> StrataResult<()> {
        if field.is_id() || field.acl.allows(self.env.principal(), permission) {
            return Ok(());
        }
        Err(StrataError::PermissionDenied {
            model: self.model.clone(),
            target: field.name.clone(),
            permission,
        })
    }

    fn field(&self, name: &str) -> StrataResult<&Field> {
        self.model()?
            .field(name)
            .ok_or_else(|| StrataError::UnknownField {
                model: self.model.clone(),
                field: name.to_owned(),
            })
    }

    /// Read `fields` of every record, one map per record in set order.
    ///
    /// Every map also holds the record's `ID`. Stored and related fields come
    /// from one joined query, to-many fields from one pair listing each, and
    /// non-stored computed fields from their compute method.
    #[tracing::instrument(skip(self), fields(model = %self.model))]
    pub async fn read(&self, fields: &[&str]) -> StrataResult<Vec<FieldMap>> {
        let ids = self.ids().await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let models = self.env.models();
        let executor = self.env.executor();

        let mut columns = Vec::new();
        let mut to_many = Vec::new();
        let mut computed = Vec::new();
        for name in fields {
            let field = self.field(name)?;
            self.check_field(field, Permission::READ)?;
            if field.is_id() {
                continue;
            }
            let terminal = models.terminal_field(&self.model, name)?;
            if terminal.field_type.is_to_many() {
                to_many.push(*name);
            } else if terminal.is_stored() {
                columns.push(*name);
            } else if field.is_related() {
                return Err(StrataError::InvalidValue(format!(
                    "related field {}.{} points to a non-stored field",
                    self.model, name
                )));
            } else {
                computed.push((*name, field));
            }
        }

        let mut rows: BTreeMap<i64, FieldMap> = ids
            .iter()
            .map(|id| {
                let mut values = FieldMap::new();
                values.insert(ID_FIELD.to_owned(), Value::Int(*id));
                (*id, values)
            })
            .collect();
        let query = Query::new(&self.model).filter(Condition::field(ID_FIELD).in_(ids.clone()));

        if !columns.is_empty() {
            let compiled = query.select_sql(models, executor.dialect(), &columns)?;
            let id_index = id_position(&compiled.columns);
            let fetched = executor.fetch_all(&compiled.sql, compiled.args.clone()).await?;
            let mut filled = BTreeSet::new();
            for row in &fetched {
                let Some(id) = decode_value(row, id_index, FieldType::Integer)?.as_i64() else {
                    continue;
                };
                // Joins through to-many hops may repeat a record; the first row wins.
                if !filled.insert(id) {
                    continue;
                }
                let Some(values) = rows.get_mut(&id) else {
                    continue;
                };
                for (index, column) in compiled.columns.iter().enumerate() {
                    if index != id_index {
                        values.insert(column.path.clone(), decode_value(row, index, column.field_type)?);
                    }
                }
            }
        }

        for name in to_many {
            let compiled = query.pairs_sql(models, executor.dialect(), name)?;
            let fetched = executor.fetch_all(&compiled.sql, compiled.args).await?;
            let mut related: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
            for row in &fetched {
                let Some(id) = decode_value(row, 0, FieldType::Integer)?.as_i64() else {
                    continue;
                };
                let entry = related.entry(id).or_default();
                if let Some(other) = decode_value(row, 1, FieldType::Integer)?.as_i64() {
                    if !entry.contains(&other) {
                        entry.push(other);
                    }
                }
            }
            for (id, values) in rows.iter_mut() {
                let ids = related.remove(id).unwrap_or_default();
                values.insert(name.to_owned(), Value::Ids(ids));
            }
        }

        if !computed.is_empty() {
            let sudo = self.env.sudo();
            for (id, values) in rows.iter_mut() {
                let record = RecordSet {
                    env: sudo.clone(),
                    model: self.model.clone(),
                    source: Source::Ids(vec![*id]),
                };
                let mut results: BTreeMap<&str, FieldMap> = BTreeMap::new();
                for (name, field) in &computed {
                    let method = field.compute.as_deref().unwrap_or_default();
                    if !results.contains_key(method) {
                        let result = record.call(method, Vec::new()).await?;
                        results.insert(method, computed_values(&self.model, method, result)?);
                    }
                    let value = results
                        .get(method)
                        .and_then(|result| result.get(&field.name))
                        .cloned()
                        .unwrap_or_default();
                    values.insert((*name).to_owned(), value);
                }
            }
        }

        Ok(ids.iter().filter_map(|id| rows.remove(id)).collect())
    }

    /// Value of `field` on a singleton.
    pub async fn get(&self, field: &str) -> StrataResult<Value> {
        let id = self.single_id().await?;
        let mut rows = self.with_ids(vec![id]).read(&[field]).await?;
        Ok(rows
            .pop()
            .and_then(|mut values| values.remove(field))
            .unwrap_or_default())
    }

    /// Records referenced by the relational `field` across the whole set.
    pub async fn get_records(&self, field: &str) -> StrataResult<RecordSet> {
        let terminal = self.env.models().terminal_field(&self.model, field)?;
        let target = terminal
            .relation
            .clone()
            .filter(|_| terminal.field_type.is_relation())
            .ok_or_else(|| {
                StrataError::InvalidValue(format!("{}.{} is not a relation", self.model, field))
            })?;
        let mut ids = Vec::new();
        for values in self.read(&[field]).await? {
            for id in values.get(field).map(Value::ids).unwrap_or_default() {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        Ok(RecordSet {
            env: self.env.clone(),
            model: target,
            source: Source::Ids(ids),
        })
    }

    pub async fn set(&self, field: &str, value: impl Into<Value>) -> StrataResult<()> {
        let mut values = FieldMap::new();
        values.insert(field.to_owned(), value.into());
        self.write(values).await
    }

    /// Update every record through the `Write` method chain.
    pub async fn write(&self, values: FieldMap) -> StrataResult<()> {
        self.call("Write", vec![Value::Map(values)]).await?;
        Ok(())
    }

    /// Create one record through the `Create` method chain.
    pub async fn create(&self, values: FieldMap) -> StrataResult<RecordSet> {
        let created = self.call("Create", vec![Value::Map(values)]).await?;
        Ok(self.with_ids(created.ids()))
    }

    /// Delete every record through the `Unlink` method chain.
    pub async fn unlink(&self) -> StrataResult<u64> {
        let deleted = self.call("Unlink", Vec::new()).await?;
        Ok(deleted.as_i64().and_then(|n| u64::try_from(n).ok()).unwrap_or_default())
    }

    /// Call `method` on this set, entering its chain at the top layer.
    pub fn call(&self, method: &str, args: Vec<Value>) -> LayerFuture {
        method::call_top(self.clone(), method, args)
    }

    /// Insert a record from field values, bypassing the method chain.
    ///
    /// Related and to-many values are written once the row exists; stored
    /// computed fields of the new record and their dependents are recomputed.
    #[tracing::instrument(skip(self, values), fields(model = %self.model))]
    pub async fn create_raw(&self, values: FieldMap) -> StrataResult<i64> {
        let model = self.model()?;
        let executor = self.env.executor();
        let dialect = executor.dialect();

        let mut columns = Vec::new();
        let mut placeholders = Vec::new();
        let mut args = Vec::new();
        let mut deferred = FieldMap::new();
        let mut provided = Vec::new();
        for (name, value) in values {
            let field = self.field(&name)?;
            self.check_field(field, Permission::WRITE)?;
            provided.push(field.name.clone());
            if field.is_related() || field.field_type.is_to_many() {
                deferred.insert(field.name.clone(), value);
                continue;
            }
            if !field.is_stored() {
                return Err(read_only(field));
            }
            columns.push(field.column.clone());
            placeholders.push(bind_value(dialect, field, value, &mut args));
        }
        for field in model
            .fields()
            .iter()
            .filter(|field| field.is_stored() && !provided.contains(&field.name))
        {
            if let Some(default) = &field.default {
                columns.push(field.column.clone());
                placeholders.push(bind_value(dialect, field, default.clone(), &mut args));
            }
        }

        let table = dialect.quote_identifier(&model.table);
        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table, ID_COLUMN)
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
                table,
                columns.join(", "),
                placeholders.join(", "),
                ID_COLUMN
            )
        };
        let id = executor
            .fetch_scalar(&sql, args)
            .await?
            .ok_or_else(|| StrataError::Message(format!("insert into {} returned no id", model.table)))?;
        tracing::debug!(model = %self.model, id, "record created");

        let record = self.with_ids(vec![id]);
        if !deferred.is_empty() {
            record.write_values(deferred, 0).await?;
        }
        compute::after_create(record, provided).await?;
        Ok(id)
    }

    /// Update every record from field values, bypassing the method chain.
    pub async fn write_raw(&self, values: FieldMap) -> StrataResult<()> {
        self.write_values(values, 0).await
    }

    #[tracing::instrument(skip(self, values), fields(model = %self.model))]
    pub(crate) async fn write_values(&self, values: FieldMap, depth: usize) -> StrataResult<()> {
        let ids = self.ids().await?;
        if ids.is_empty() || values.is_empty() {
            return Ok(());
        }
        let models = self.env.models();
        let model = self.model()?;
        let executor = self.env.executor();
        let dialect = executor.dialect();

        let mut assignments = Vec::new();
        let mut args = Vec::new();
        let mut to_many = Vec::new();
        let mut related: BTreeMap<String, (Vec<&Field>, FieldMap)> = BTreeMap::new();
        let mut changed = Vec::new();
        for (name, value) in values {
            let field = self.field(&name)?;
            self.check_field(field, Permission::WRITE)?;
            if field.is_id() {
                return Err(StrataError::InvalidValue(format!(
                    "cannot write the id of {} records",
                    self.model
                )));
            }
            if field.is_related() {
                let path = models.resolve_path(&self.model, &field.name)?;
                let Some((terminal, hops)) = path.split_last() else {
                    continue;
                };
                let key = hops
                    .iter()
                    .map(|hop| hop.name.as_str())
                    .collect::<Vec<_>>()
                    .join(".");
                related
                    .entry(key)
                    .or_insert_with(|| (hops.to_vec(), FieldMap::new()))
                    .1
                    .insert(terminal.name.clone(), value);
                continue;
            }
            if field.field_type.is_to_many() {
                changed.push(field.name.clone());
                to_many.push((field, value));
                continue;
            }
            if !field.is_stored() {
                return Err(read_only(field));
            }
            changed.push(field.name.clone());
            let placeholder = bind_value(dialect, field, value, &mut args);
            assignments.push(format!("{} = {}", field.column, placeholder));
        }

        if !assignments.is_empty() {
            let mut sql = format!(
                "UPDATE {} SET {}",
                dialect.quote_identifier(&model.table),
                assignments.join(", ")
            );
            let _ = write!(sql, " WHERE {} IN ({})", ID_COLUMN, id_list(dialect, &ids, &mut args));
            executor.execute(&sql, args).await?;
        }
        for (field, value) in to_many {
            self.write_to_many(field, value.ids(), &ids).await?;
        }
        for (hops, values) in related.into_values() {
            let mut targets = self.with_ids(ids.clone());
            for hop in &hops {
                targets = targets.get_records(&hop.name).await?;
            }
            if !targets.is_empty().await? {
                targets.write(values).await?;
            }
        }
        compute::after_write(self.with_ids(ids), changed, depth).await
    }

    async fn write_to_many(&self, field: &Field, new_ids: Vec<i64>, owners: &[i64]) -> StrataResult<()> {
        let relation = field.relation.as_deref().unwrap_or_default();
        match field.field_type {
            FieldType::One2Many => {
                let [owner] = owners else {
                    return Err(StrataError::NotSingleton {
                        model: self.model.clone(),
                        len: owners.len(),
                    });
                };
                let reverse = field.reverse.as_deref().unwrap_or_default();
                let targets = self.env.pool(relation)?;
                let current = targets
                    .search(Condition::field(reverse).equals(*owner))
                    .ids()
                    .await?;
                let released: Vec<i64> = current
                    .into_iter()
                    .filter(|id| !new_ids.contains(id))
                    .collect();
                if !released.is_empty() {
                    targets.with_ids(released).set(reverse, Value::Null).await?;
                }
                if !new_ids.is_empty() {
                    targets
                        .with_ids(new_ids)
                        .set(reverse, Value::Ids(vec![*owner]))
                        .await?;
                }
                Ok(())
            }
            FieldType::Many2Many => {
                let link = field.m2m.as_ref().ok_or_else(|| {
                    StrataError::InvalidValue(format!("{}.{} has no link model", field.model, field.name))
                })?;
                let link_model = self.env.models().model(&link.model)?;
                let column_of = |name: &str| {
                    link_model
                        .field(name)
                        .map(|field| field.column.clone())
                        .ok_or_else(|| StrataError::UnknownField {
                            model: link.model.clone(),
                            field: name.to_owned(),
                        })
                };
                let ours = column_of(&link.ours)?;
                let theirs = column_of(&link.theirs)?;
                let executor = self.env.executor();
                let dialect = executor.dialect();
                let table = dialect.quote_identifier(&link_model.table);

                let mut args = Vec::new();
                let sql = format!(
                    "DELETE FROM {} WHERE {} IN ({})",
                    table,
                    ours,
                    id_list(dialect, owners, &mut args)
                );
                executor.execute(&sql, args).await?;
                let sql = format!(
                    "INSERT INTO {} ({}, {}) VALUES ({}, {})",
                    table,
                    ours,
                    theirs,
                    dialect.placeholder(1),
                    dialect.placeholder(2)
                );
                for owner in owners {
                    for id in &new_ids {
                        executor
                            .execute(&sql, vec![Value::Int(*owner), Value::Int(*id)])
                            .await?;
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Delete every record, bypassing the method chain.
    #[tracing::instrument(skip(self), fields(model = %self.model))]
    pub async fn unlink_raw(&self) -> StrataResult<u64> {
        let ids = self.ids().await?;
        if ids.is_empty() {
            return Ok(0);
        }
        let model = self.model()?;
        let executor = self.env.executor();
        let dialect = executor.dialect();
        let mut args = Vec::new();
        let sql = format!(
            "DELETE FROM {} WHERE {} IN ({})",
            dialect.quote_identifier(&model.table),
            ID_COLUMN,
            id_list(dialect, &ids, &mut args)
        );
        executor.execute(&sql, args).await
    }
}

fn id_position(columns: &[SelectedColumn]) -> usize {
    columns
        .iter()
        .position(|column| column.alias == ID_COLUMN)
        .unwrap_or_default()
}

/// Placeholders for `ids`, pushing them onto `args`.
fn id_list(dialect: &dyn Dialect, ids: &[i64], args: &mut Vec<Value>) -> String {
    let mut placeholders = Vec::with_capacity(ids.len());
    for id in ids {
        args.push(Value::Int(*id));
        placeholders.push(dialect.placeholder(args.len()));
    }
    placeholders.join(", ")
}

/// SQL for a written value: a literal `NULL`, or a typed placeholder.
fn bind_value(dialect: &dyn Dialect, field: &Field, value: Value, args: &mut Vec<Value>) -> String {
    let value = value.into_scalar();
    if value.is_null() {
        return "NULL".to_owned();
    }
    args.push(value);
    dialect.value_sql(dialect.placeholder(args.len()), field.field_type)
}

fn read_only(field: &Field) -> StrataError {
    StrataError::InvalidValue(format!(
        "{}.{} is computed and not stored",
        field.model, field.name
    ))
}

/// Field values returned by a compute method.
pub(crate) fn computed_values(model: &str, method: &str, result: Value) -> StrataResult<FieldMap> {
    match result {
        Value::Map(values) => Ok(values),
        Value::Null => Ok(FieldMap::new()),
        other => Err(StrataError::InvalidValue(format!(
            "compute method {}.{} returned {} instead of field values",
            model, method, other
        ))),
    }
}
