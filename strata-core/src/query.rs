//! Compilation of record queries into parameterized `SELECT` statements.
//!
//! Every dotted path a query touches (selected fields, condition leaves and
//! ordering) is resolved against the frozen models into a chain of relation
//! hops. Each hop becomes one `LEFT JOIN`, aliased after its parent alias and
//! the joined table, and memoized by path prefix so paths sharing a prefix
//! share the join.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write;

use crate::condition::{CondNode, Condition, Operator, Predicate};
use crate::dialect::Dialect;
use crate::error::{StrataError, StrataResult};
use crate::field::{Field, FieldType, ID_COLUMN, ID_FIELD};
use crate::model::Model;
use crate::registry::Models;
use crate::value::Value;

/// Separator of hop columns in flattened column aliases.
pub const ALIAS_SEP: &str = "__";

/// One ordering term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerm {
    pub path: String,
    pub descending: bool,
}

/// A lazy query over one model: condition, ordering and paging.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    model: String,
    condition: Condition,
    order: Vec<OrderTerm>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Query {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_owned(),
            condition: Condition::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    /// Narrow the query: the new condition is AND-ed with the current one.
    pub fn filter(mut self, condition: Condition) -> Self {
        self.condition = self.condition.and_cond(condition);
        self
    }

    pub fn order_by(mut self, path: &str) -> Self {
        self.order.push(OrderTerm {
            path: path.to_owned(),
            descending: false,
        });
        self
    }

    pub fn order_by_desc(mut self, path: &str) -> Self {
        self.order.push(OrderTerm {
            path: path.to_owned(),
            descending: true,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn has_paging(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }

    /// Compile into a `SELECT DISTINCT` projecting `fields` in the given order.
    ///
    /// The record id is always projected (last, unless requested); ordering
    /// expressions that are not requested are projected before it.
    pub fn select_sql(
        &self,
        models: &Models,
        dialect: &dyn Dialect,
        fields: &[&str],
    ) -> StrataResult<CompiledQuery> {
        let root = models.model(&self.model)?;
        let mut planner = JoinPlanner::new(models, dialect, root);

        let mut columns = Vec::with_capacity(fields.len() + 1);
        let mut projections = Vec::with_capacity(fields.len() + 1);
        for path in fields {
            let target = planner.resolve(path)?;
            if target.to_many || !target.stored {
                return Err(StrataError::InvalidValue(format!(
                    "{}.{} has no column to select",
                    self.model, path
                )));
            }
            planner.project(&target, path, &mut projections, &mut columns);
        }

        let mut args = Vec::new();
        let where_sql = match self.condition.root() {
            Some(node) => Some(planner.compile_node(node, &mut args)?),
            None => None,
        };

        let mut order_sql = Vec::with_capacity(self.order.len().max(1));
        for term in &self.order {
            let target = planner.resolve(&term.path)?;
            if !target.stored {
                return Err(StrataError::InvalidValue(format!(
                    "cannot order {} by non-stored `{}`",
                    self.model, term.path
                )));
            }
            order_sql.push(if term.descending {
                format!("{} DESC", target.expr)
            } else {
                target.expr.clone()
            });
            planner.project(&target, &term.path, &mut projections, &mut columns);
        }
        let id = planner.resolve(ID_FIELD)?;
        if order_sql.is_empty() {
            order_sql.push(id.expr.clone());
        }
        planner.project(&id, ID_FIELD, &mut projections, &mut columns);

        let mut sql = String::with_capacity(256);
        let _ = write!(
            sql,
            "SELECT DISTINCT {} FROM {} {}",
            projections.join(", "),
            dialect.quote_identifier(&root.table),
            dialect.quote_identifier(&planner.root_alias)
        );
        for join in &planner.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if let Some(where_sql) = where_sql {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&order_sql.join(", "));
        sql.push_str(&dialect.limit_offset(self.limit, self.offset));

        Ok(CompiledQuery { sql, args, columns })
    }

    /// Compile a `(record id, related id)` pair listing for the to-many `path`.
    ///
    /// Rows come ordered by record id, then related id; records without any
    /// related row yield a single row with a null related id.
    pub fn pairs_sql(
        &self,
        models: &Models,
        dialect: &dyn Dialect,
        path: &str,
    ) -> StrataResult<CompiledQuery> {
        let root = models.model(&self.model)?;
        let mut planner = JoinPlanner::new(models, dialect, root);
        let id = planner.resolve(ID_FIELD)?;
        let target = planner.resolve(path)?;
        if !target.to_many {
            return Err(StrataError::InvalidValue(format!(
                "{}.{} is not a to-many path",
                self.model, path
            )));
        }
        let mut args = Vec::new();
        let where_sql = match self.condition.root() {
            Some(node) => Some(planner.compile_node(node, &mut args)?),
            None => None,
        };
        let mut projections = Vec::with_capacity(2);
        let mut columns = Vec::with_capacity(2);
        planner.project(&id, ID_FIELD, &mut projections, &mut columns);
        planner.project(&target, path, &mut projections, &mut columns);

        let mut sql = String::with_capacity(256);
        let _ = write!(
            sql,
            "SELECT DISTINCT {} FROM {} {}",
            projections.join(", "),
            dialect.quote_identifier(&root.table),
            dialect.quote_identifier(&planner.root_alias)
        );
        for join in &planner.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if let Some(where_sql) = where_sql {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }
        let _ = write!(sql, " ORDER BY {}, {}", id.expr, target.expr);
        Ok(CompiledQuery { sql, args, columns })
    }

    /// Compile only the `WHERE` clause (without the keyword), for statements
    /// that address the root table without joins.
    ///
    /// Returns `None` when the condition is empty. Paths crossing relations
    /// are rejected: use [`Query::select_sql`] to resolve ids first.
    pub fn where_sql(
        &self,
        models: &Models,
        dialect: &dyn Dialect,
        args: &mut Vec<Value>,
    ) -> StrataResult<Option<String>> {
        let root = models.model(&self.model)?;
        let mut planner = JoinPlanner::new(models, dialect, root);
        planner.bare = true;
        let Some(node) = self.condition.root() else {
            return Ok(None);
        };
        let sql = planner.compile_node(node, args)?;
        if !planner.joins.is_empty() {
            return Err(StrataError::InvalidValue(format!(
                "condition on {} needs joins: {}",
                self.model, self.condition
            )));
        }
        Ok(Some(sql))
    }
}

/// A column projected by a compiled query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedColumn {
    /// Path as requested by the caller.
    pub path: String,
    /// Flattened alias in the select list.
    pub alias: String,
    pub field_type: FieldType,
}

/// SQL text, bound arguments in placeholder order, and the projected columns.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub args: Vec<Value>,
    pub columns: Vec<SelectedColumn>,
}

impl CompiledQuery {
    /// Position of the column selected for `path`.
    pub fn column_index(&self, path: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.path == path)
    }
}

/// Where a resolved path lands.
struct Target {
    /// Qualified column expression, `"alias".column`.
    expr: String,
    flat: String,
    field_type: FieldType,
    stored: bool,
    to_many: bool,
}

struct JoinPlanner<'a> {
    models: &'a Models,
    dialect: &'a dyn Dialect,
    root: &'a Model,
    root_alias: String,
    joins: Vec<String>,
    /// Path prefix (hop columns joined by `__`) to alias.
    aliases: HashMap<String, String>,
    used: BTreeSet<String>,
    /// Address root columns unqualified, for single-table statements.
    bare: bool,
}

impl<'a> JoinPlanner<'a> {
    fn new(models: &'a Models, dialect: &'a dyn Dialect, root: &'a Model) -> Self {
        let root_alias = root.table.clone();
        let mut used = BTreeSet::new();
        used.insert(root_alias.clone());
        Self {
            models,
            dialect,
            root,
            root_alias,
            joins: Vec::new(),
            aliases: HashMap::new(),
            used,
            bare: false,
        }
    }

    fn qualify(&self, alias: &str, column: &str) -> String {
        if self.bare && alias == self.root_alias {
            column.to_owned()
        } else {
            format!("{}.{}", self.dialect.quote_identifier(alias), column)
        }
    }

    /// Alias derived from `parent` and `table`, suffixed when already taken.
    fn fresh_alias(&mut self, parent: &str, table: &str) -> String {
        let base = format!("{}{}{}", parent, ALIAS_SEP, table);
        let mut alias = base.clone();
        let mut n = 1;
        while self.used.contains(&alias) {
            alias = format!("{}_{}", base, n);
            n += 1;
        }
        self.used.insert(alias.clone());
        alias
    }

    /// Join the relation `hop` from `parent`, returning the alias of its target.
    fn join(&mut self, parent: &str, key: &str, hop: &Field) -> StrataResult<String> {
        if let Some(alias) = self.aliases.get(key) {
            return Ok(alias.clone());
        }
        let target_name = hop.relation.as_deref().unwrap_or_default();
        let target = self.models.model(target_name)?;
        let alias = match hop.field_type {
            FieldType::Many2One | FieldType::One2One => {
                let alias = self.fresh_alias(parent, &target.table);
                self.push_join(
                    &target.table,
                    &alias,
                    self.qualify(parent, &hop.column),
                    self.qualify(&alias, ID_COLUMN),
                );
                alias
            }
            FieldType::One2Many => {
                let reverse = hop
                    .reverse
                    .as_deref()
                    .and_then(|name| target.field(name))
                    .ok_or_else(|| StrataError::UnknownField {
                        model: target.name.clone(),
                        field: hop.reverse.clone().unwrap_or_default(),
                    })?;
                let alias = self.fresh_alias(parent, &target.table);
                self.push_join(
                    &target.table,
                    &alias,
                    self.qualify(parent, ID_COLUMN),
                    self.qualify(&alias, &reverse.column),
                );
                alias
            }
            FieldType::Many2Many => {
                let link = hop.m2m.as_ref().ok_or_else(|| {
                    StrataError::InvalidValue(format!(
                        "many2many {}.{} has no link model",
                        hop.model, hop.name
                    ))
                })?;
                let link_model = self.models.model(&link.model)?;
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
                let link_alias = self.fresh_alias(parent, &link_model.table);
                self.push_join(
                    &link_model.table,
                    &link_alias,
                    self.qualify(parent, ID_COLUMN),
                    self.qualify(&link_alias, &ours),
                );
                let alias = self.fresh_alias(parent, &target.table);
                self.push_join(
                    &target.table,
                    &alias,
                    self.qualify(&link_alias, &theirs),
                    self.qualify(&alias, ID_COLUMN),
                );
                alias
            }
            _ => {
                return Err(StrataError::InvalidValue(format!(
                    "{}.{} is not a relation",
                    hop.model, hop.name
                )));
            }
        };
        self.aliases.insert(key.to_owned(), alias.clone());
        Ok(alias)
    }

    fn push_join(&mut self, table: &str, alias: &str, left: String, right: String) {
        self.joins.push(format!(
            "LEFT JOIN {} {} ON {}={}",
            self.dialect.quote_identifier(table),
            self.dialect.quote_identifier(alias),
            left,
            right
        ));
    }

    fn resolve(&mut self, path: &str) -> StrataResult<Target> {
        let models = self.models;
        let fields = models.resolve_path(&self.root.name, path)?;
        let Some((last, hops)) = fields.split_last() else {
            return Err(StrataError::UnknownField {
                model: self.root.name.clone(),
                field: path.to_owned(),
            });
        };
        let mut alias = self.root_alias.clone();
        let mut key = String::new();
        for hop in hops {
            if !key.is_empty() {
                key.push_str(ALIAS_SEP);
            }
            key.push_str(&hop.column);
            alias = self.join(&alias, &key, hop)?;
        }
        let mut flat: Vec<&str> = hops.iter().map(|hop| hop.column.as_str()).collect();
        flat.push(&last.column);
        let flat = flat.join(ALIAS_SEP);
        if last.field_type.is_to_many() {
            if !key.is_empty() {
                key.push_str(ALIAS_SEP);
            }
            key.push_str(&last.column);
            let alias = self.join(&alias, &key, last)?;
            return Ok(Target {
                expr: self.qualify(&alias, ID_COLUMN),
                flat,
                field_type: FieldType::Integer,
                stored: true,
                to_many: true,
            });
        }
        Ok(Target {
            expr: self.qualify(&alias, &last.column),
            flat,
            field_type: last.field_type,
            stored: last.is_stored(),
            to_many: false,
        })
    }

    /// Add `target` to the select list unless its alias is already there.
    fn project(
        &self,
        target: &Target,
        path: &str,
        projections: &mut Vec<String>,
        columns: &mut Vec<SelectedColumn>,
    ) {
        if columns.iter().any(|column| column.alias == target.flat) {
            return;
        }
        projections.push(format!(
            "{} AS {}",
            self.dialect.column_sql(target.expr.clone(), target.field_type),
            target.flat
        ));
        columns.push(SelectedColumn {
            path: path.to_owned(),
            alias: target.flat.clone(),
            field_type: target.field_type,
        });
    }

    fn compile_node(&mut self, node: &CondNode, args: &mut Vec<Value>) -> StrataResult<String> {
        Ok(match node {
            CondNode::Leaf(predicate) => format!("({})", self.compile_leaf(predicate, args)?),
            CondNode::Not(inner) => format!("NOT {}", self.compile_node(inner, args)?),
            CondNode::And(left, right) => {
                let left = self.compile_node(left, args)?;
                let right = self.compile_node(right, args)?;
                format!("({} AND {})", left, right)
            }
            CondNode::Or(left, right) => {
                let left = self.compile_node(left, args)?;
                let right = self.compile_node(right, args)?;
                format!("({} OR {})", left, right)
            }
        })
    }

    fn bind(&self, value: Value, field_type: FieldType, args: &mut Vec<Value>) -> String {
        args.push(value);
        self.dialect
            .value_sql(self.dialect.placeholder(args.len()), field_type)
    }

    fn compile_leaf(&mut self, predicate: &Predicate, args: &mut Vec<Value>) -> StrataResult<String> {
        let target = self.resolve(&predicate.path)?;
        if !target.stored {
            return Err(StrataError::InvalidValue(format!(
                "cannot filter {} on non-stored `{}`",
                self.root.name, predicate.path
            )));
        }
        let operator = predicate.operator;
        let sql_op = self.dialect.operator_sql(operator);
        let value = predicate.value.clone();

        if operator.is_set() {
            let members = value.into_members();
            if members.is_empty() {
                return Ok(if operator == Operator::In { "1=0" } else { "1=1" }.to_owned());
            }
            let placeholders: Vec<String> = members
                .into_iter()
                .map(|member| self.bind(member.into_scalar(), target.field_type, args))
                .collect();
            return Ok(format!("{} {} ({})", target.expr, sql_op, placeholders.join(", ")));
        }

        let value = value.into_scalar();
        let equality = matches!(operator, Operator::Equals | Operator::NotEquals);
        if equality && value.is_null() {
            let test = if operator == Operator::Equals { "IS NULL" } else { "IS NOT NULL" };
            return Ok(format!("{} {}", target.expr, test));
        }
        if equality && matches!(value, Value::Ids(_)) {
            let not = if operator == Operator::NotEquals { "NOT " } else { "" };
            let placeholders: Vec<String> = value
                .into_members()
                .into_iter()
                .map(|member| self.bind(member, target.field_type, args))
                .collect();
            return Ok(format!("{} {}IN ({})", target.expr, not, placeholders.join(", ")));
        }
        if operator.is_pattern() {
            let pattern = Value::Text(format!("%{}%", value));
            let placeholder = self.bind(pattern, FieldType::Text, args);
            return Ok(format!("{} {} {}", target.expr, sql_op, placeholder));
        }
        let placeholder = self.bind(value, target.field_type, args);
        Ok(format!("{} {} {}", target.expr, sql_op, placeholder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{PostgresDialect, SqliteDialect};
    use crate::field::Field;
    use crate::registry::Registry;
    use std::sync::Arc;

    fn models() -> Arc<Models> {
        let registry = Registry::new();
        registry.new_model("User");
        registry.new_model("Profile");
        registry.new_model("Post");
        registry.new_model("Tag");
        registry.add_field("User", Field::char("Name"));
        registry.add_field("User", Field::char("Email"));
        registry.add_field("User", Field::many2one("Profile", "Profile"));
        registry.add_field("User", Field::one2many("Posts", "Post", "User"));
        registry.add_field("User", Field::float("PMoney").related("Profile.Money"));
        registry.add_field("Profile", Field::float("Money"));
        registry.add_field("Profile", Field::one2one("BestPost", "Post"));
        registry.add_field("Post", Field::many2one("User", "User"));
        registry.add_field("Post", Field::char("Title"));
        registry.add_field("Post", Field::many2many("Tags", "Tag"));
        registry.add_field("Tag", Field::char("Name"));
        registry.bootstrap()
    }

    #[test]
    fn multi_hop_path_joins_each_relation_once() {
        let models = models();
        let query = Query::new("User").filter(Condition::field("Profile.BestPost.Title").equals("foo"));
        let compiled = query
            .select_sql(&models, &SqliteDialect, &["name", "profile_id.best_post_id.title"])
            .unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT DISTINCT \"user\".name AS name, \"user__profile__post\".title AS profile_id__best_post_id__title, \"user\".id AS id FROM \"user\" \"user\" LEFT JOIN \"profile\" \"user__profile\" ON \"user\".profile_id=\"user__profile\".id LEFT JOIN \"post\" \"user__profile__post\" ON \"user__profile\".best_post_id=\"user__profile__post\".id WHERE (\"user__profile__post\".title = ?) ORDER BY \"user\".id"
        );
        assert_eq!(compiled.args, vec![Value::from("foo")]);
        let aliases: Vec<&str> = compiled.columns.iter().map(|c| c.alias.as_str()).collect();
        assert_eq!(aliases, vec!["name", "profile_id__best_post_id__title", "id"]);
    }

    #[test]
    fn related_fields_compile_through_their_path() {
        let models = models();
        let query = Query::new("User").filter(
            Condition::field("PMoney")
                .equals(12345.0)
                .or()
                .field("PMoney")
                .equals(5100.0),
        );
        let compiled = query.select_sql(&models, &SqliteDialect, &[]).unwrap();
        assert!(compiled.sql.contains(
            "LEFT JOIN \"profile\" \"user__profile\" ON \"user\".profile_id=\"user__profile\".id WHERE ((\"user__profile\".money = ?) OR (\"user__profile\".money = ?))"
        ));
        assert_eq!(compiled.sql.matches("LEFT JOIN").count(), 1);
        assert_eq!(compiled.args, vec![Value::Float(12345.0), Value::Float(5100.0)]);
    }

    #[test]
    fn paging_and_ordering() {
        let models = models();
        let query = Query::new("User").order_by_desc("Name").limit(10).offset(20);
        let compiled = query.select_sql(&models, &PostgresDialect, &[]).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT DISTINCT \"user\".name AS name, \"user\".id AS id FROM \"user\" \"user\" ORDER BY \"user\".name DESC LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn empty_in_lists_short_circuit() {
        let models = models();
        let query = Query::new("User").filter(
            Condition::field("ID")
                .in_(Vec::<i64>::new())
                .or()
                .field("ID")
                .not_in(Vec::<i64>::new()),
        );
        let compiled = query.select_sql(&models, &SqliteDialect, &[]).unwrap();
        assert!(compiled.sql.contains("WHERE ((1=0) OR (1=1))"));
        assert!(compiled.args.is_empty());
    }

    #[test]
    fn postgres_placeholders_are_numbered_in_tree_order() {
        let models = models();
        let query = Query::new("User").filter(
            Condition::field("Name")
                .ilike("jo")
                .and()
                .field("ID")
                .in_(vec![1_i64, 2]),
        );
        let compiled = query.select_sql(&models, &PostgresDialect, &[]).unwrap();
        assert!(compiled
            .sql
            .contains("WHERE ((\"user\".name ILIKE $1) AND (\"user\".id IN ($2, $3)))"));
        assert_eq!(
            compiled.args,
            vec![Value::from("%jo%"), Value::Int(1), Value::Int(2)]
        );
    }

    #[test]
    fn null_comparisons_use_is_null() {
        let models = models();
        let query = Query::new("User").filter(
            Condition::field("Profile")
                .equals(Value::Null)
                .and_not()
                .field("Email")
                .not_equals(Value::Null),
        );
        let compiled = query.select_sql(&models, &SqliteDialect, &[]).unwrap();
        assert!(compiled
            .sql
            .contains("WHERE ((\"user\".profile_id IS NULL) AND NOT (\"user\".email IS NOT NULL))"));
    }

    #[test]
    fn to_many_paths_join_reverse_and_link_tables() {
        let models = models();
        let query = Query::new("User").filter(Condition::field("Posts.Tags.Name").equals("rust"));
        let compiled = query.select_sql(&models, &SqliteDialect, &[]).unwrap();
        assert!(compiled.sql.contains(
            "LEFT JOIN \"post\" \"user__post\" ON \"user\".id=\"user__post\".user_id"
        ));
        assert!(compiled.sql.contains(
            "LEFT JOIN \"post_tag_rel\" \"user__post__post_tag_rel\" ON \"user__post\".id=\"user__post__post_tag_rel\".post_id"
        ));
        assert!(compiled.sql.contains(
            "LEFT JOIN \"tag\" \"user__post__tag\" ON \"user__post__post_tag_rel\".tag_id=\"user__post__tag\".id"
        ));

        let query = Query::new("Post").filter(Condition::field("Tags").in_(vec![4_i64]));
        let compiled = query.select_sql(&models, &SqliteDialect, &[]).unwrap();
        assert!(compiled.sql.contains("WHERE (\"post__tag\".id IN (?))"));
    }

    #[test]
    fn pairs_listing_for_many2many() {
        let models = models();
        let compiled = Query::new("Post")
            .filter(Condition::field("ID").in_(vec![1_i64]))
            .pairs_sql(&models, &SqliteDialect, "Tags")
            .unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT DISTINCT \"post\".id AS id, \"post__tag\".id AS tags FROM \"post\" \"post\" LEFT JOIN \"post_tag_rel\" \"post__post_tag_rel\" ON \"post\".id=\"post__post_tag_rel\".post_id LEFT JOIN \"tag\" \"post__tag\" ON \"post__post_tag_rel\".tag_id=\"post__tag\".id WHERE (\"post\".id IN (?)) ORDER BY \"post\".id, \"post__tag\".id"
        );
    }

    #[test]
    fn selecting_a_to_many_field_is_rejected() {
        let models = models();
        let err = Query::new("User")
            .select_sql(&models, &SqliteDialect, &["Posts"])
            .unwrap_err();
        assert!(matches!(err, StrataError::InvalidValue(_)));
    }

    #[test]
    fn bare_where_clause_for_single_table_statements() {
        let models = models();
        let mut args = Vec::new();
        let sql = Query::new("User")
            .filter(Condition::field("ID").in_(vec![3_i64, 4]))
            .where_sql(&models, &SqliteDialect, &mut args)
            .unwrap();
        assert_eq!(sql.as_deref(), Some("(id IN (?, ?))"));

        let err = Query::new("User")
            .filter(Condition::field("Profile.Money").equals(1.0))
            .where_sql(&models, &SqliteDialect, &mut Vec::new())
            .unwrap_err();
        assert!(matches!(err, StrataError::InvalidValue(_)));
    }
}
