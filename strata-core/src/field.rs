use std::collections::BTreeMap;

use convert_case::{Case, Casing};
use serde::{Deserialize, Serialize};

use crate::security::{AccessControlList, Permission};
use crate::value::Value;

/// Name of the implicit primary key field every model owns.
pub const ID_FIELD: &str = "ID";
/// Column of the implicit primary key.
pub const ID_COLUMN: &str = "id";

/// Semantic type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Char,
    Text,
    Integer,
    Float,
    Boolean,
    Date,
    #[serde(rename = "datetime")]
    DateTime,
    #[serde(rename = "many2one")]
    Many2One,
    #[serde(rename = "one2one")]
    One2One,
    #[serde(rename = "one2many")]
    One2Many,
    #[serde(rename = "many2many")]
    Many2Many,
}

impl FieldType {
    pub fn is_relation(self) -> bool {
        matches!(
            self,
            Self::Many2One | Self::One2One | Self::One2Many | Self::Many2Many
        )
    }

    /// Relations stored as a foreign key column on the owning table.
    pub fn is_fk(self) -> bool {
        matches!(self, Self::Many2One | Self::One2One)
    }

    pub fn is_to_many(self) -> bool {
        matches!(self, Self::One2Many | Self::Many2Many)
    }
}

/// Foreign key behaviour when the referenced row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    #[default]
    SetNull,
    Restrict,
    Cascade,
}

impl OnDelete {
    pub fn sql(self) -> &'static str {
        match self {
            Self::SetNull => "SET NULL",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
        }
    }
}

/// Where a many2many field keeps its pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct M2MLink {
    /// Name of the link model.
    pub model: String,
    /// Link field pointing back to the owning model.
    pub ours: String,
    /// Link field pointing to the related model.
    pub theirs: String,
}

/// A field descriptor.
///
/// Built with the constructor for its type and the builder flags, then handed to
/// [`Registry::add_field`](crate::registry::Registry::add_field), which fills in the
/// owning model and the default column name.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub column: String,
    pub model: String,
    pub field_type: FieldType,
    /// Related model name for relational types.
    pub relation: Option<String>,
    /// Many2one field on the related model backing a one2many.
    pub reverse: Option<String>,
    pub m2m: Option<M2MLink>,
    pub stored: bool,
    pub required: bool,
    pub index: bool,
    pub size: Option<u32>,
    pub default: Option<Value>,
    pub compute: Option<String>,
    pub depends: Vec<String>,
    pub related_path: Option<String>,
    pub embed: bool,
    pub on_delete: OnDelete,
    pub acl: AccessControlList,
}

impl Field {
    fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_owned(),
            column: String::new(),
            model: String::new(),
            field_type,
            relation: None,
            reverse: None,
            m2m: None,
            stored: false,
            required: false,
            index: false,
            size: None,
            default: None,
            compute: None,
            depends: Vec::new(),
            related_path: None,
            embed: false,
            on_delete: OnDelete::default(),
            acl: AccessControlList::with_admin(),
        }
    }

    pub fn char(name: &str) -> Self {
        Self::new(name, FieldType::Char)
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, FieldType::Text)
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn float(name: &str) -> Self {
        Self::new(name, FieldType::Float)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn date(name: &str) -> Self {
        Self::new(name, FieldType::Date)
    }

    pub fn datetime(name: &str) -> Self {
        Self::new(name, FieldType::DateTime)
    }

    pub fn many2one(name: &str, relation: &str) -> Self {
        let mut field = Self::new(name, FieldType::Many2One);
        field.relation = Some(relation.to_owned());
        field
    }

    pub fn one2one(name: &str, relation: &str) -> Self {
        let mut field = Self::new(name, FieldType::One2One);
        field.relation = Some(relation.to_owned());
        field
    }

    /// A one2many backed by the many2one `reverse` on `relation`.
    pub fn one2many(name: &str, relation: &str, reverse: &str) -> Self {
        let mut field = Self::new(name, FieldType::One2Many);
        field.relation = Some(relation.to_owned());
        field.reverse = Some(reverse.to_owned());
        field
    }

    pub fn many2many(name: &str, relation: &str) -> Self {
        let mut field = Self::new(name, FieldType::Many2Many);
        field.relation = Some(relation.to_owned());
        field
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn index(mut self) -> Self {
        self.index = true;
        self
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Override the column name (defaults to the snake_cased field name).
    pub fn column(mut self, column: &str) -> Self {
        self.column = column.to_owned();
        self
    }

    /// Persist a computed field's value.
    pub fn stored(mut self) -> Self {
        self.stored = true;
        self
    }

    pub fn compute(mut self, method: &str) -> Self {
        self.compute = Some(method.to_owned());
        self
    }

    pub fn depends<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Make this field an alias of the field at the dotted `path`.
    pub fn related(mut self, path: &str) -> Self {
        self.related_path = Some(path.to_owned());
        self
    }

    /// Promote the related model's fields onto the owning model.
    pub fn embed(mut self) -> Self {
        self.embed = true;
        self
    }

    pub fn on_delete(mut self, policy: OnDelete) -> Self {
        self.on_delete = policy;
        self
    }

    pub fn grant(mut self, group: &str, permission: Permission) -> Self {
        self.acl.grant(group, permission);
        self
    }

    pub fn is_related(&self) -> bool {
        self.related_path.is_some()
    }

    pub fn is_computed(&self) -> bool {
        self.compute.is_some()
    }

    /// True when the field owns a column in its model's table.
    pub fn is_stored(&self) -> bool {
        !self.is_related()
            && !self.field_type.is_to_many()
            && (self.compute.is_none() || self.stored)
    }

    pub fn is_id(&self) -> bool {
        self.column == ID_COLUMN
    }

    pub(crate) fn id() -> Self {
        let mut field = Self::integer(ID_FIELD);
        field.column = ID_COLUMN.to_owned();
        field.required = true;
        field
    }

    pub(crate) fn bind_to(mut self, model: &str) -> Self {
        model.clone_into(&mut self.model);
        if self.column.is_empty() {
            self.column = default_column(&self.name, self.field_type);
        }
        self
    }
}

/// Snake-cased table name for a model name.
pub fn table_name(model: &str) -> String {
    model.to_case(Case::Snake)
}

/// Default column for a field: snake_case, `_id` suffix on foreign keys.
pub fn default_column(name: &str, field_type: FieldType) -> String {
    let base = name.to_case(Case::Snake);
    if field_type.is_fk() {
        format!("{}_id", base)
    } else {
        base
    }
}

/// Per-model mapping of field name to descriptor, also searchable by column.
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    by_name: BTreeMap<String, Field>,
    by_column: BTreeMap<String, String>,
}

impl FieldRegistry {
    /// Look up a field by name, falling back to its column name.
    pub fn get(&self, name: &str) -> Option<&Field> {
        self.by_name.get(name).or_else(|| {
            self.by_column
                .get(name)
                .and_then(|field| self.by_name.get(field))
        })
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.by_name.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub(crate) fn insert(&mut self, field: Field) {
        if let Some(previous) = self.by_name.get(&field.name) {
            self.by_column.remove(&previous.column);
        }
        self.by_column
            .insert(field.column.clone(), field.name.clone());
        self.by_name.insert(field.name.clone(), field);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.by_name.values()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
