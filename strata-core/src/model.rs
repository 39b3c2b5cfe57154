use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::field::{Field, FieldRegistry, table_name};
use crate::method::MethodInfo;

/// How a model is backed in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Backed by its own table.
    #[default]
    Regular,
    /// Injected into other models, never backed by a table.
    Mixin,
    /// Backed by a relation the application manages itself (typically a view).
    Manual,
    /// Association table of a many2many field.
    #[serde(rename = "m2m_link")]
    M2MLink,
}

/// A model descriptor: fields, methods, mixins and table.
#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    pub table: String,
    pub kind: ModelKind,
    /// Mixins in injection order.
    pub mixins: Vec<String>,
    pub(crate) fields: FieldRegistry,
    pub(crate) methods: BTreeMap<String, MethodInfo>,
}

impl Model {
    pub(crate) fn new(name: &str, kind: ModelKind) -> Self {
        let mut fields = FieldRegistry::default();
        fields.insert(Field::id().bind_to(name));
        Self {
            name: name.to_owned(),
            table: table_name(name),
            kind,
            mixins: Vec::new(),
            fields,
            methods: BTreeMap::new(),
        }
    }

    pub fn fields(&self) -> &FieldRegistry {
        &self.fields
    }

    /// Field by name or column.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn method(&self, name: &str) -> Option<&MethodInfo> {
        self.methods.get(name)
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodInfo> {
        self.methods.values()
    }

    pub fn is_mixin(&self) -> bool {
        self.kind == ModelKind::Mixin
    }

    /// True when the schema synchronizer manages this model's table.
    pub fn has_table(&self) -> bool {
        matches!(self.kind, ModelKind::Regular | ModelKind::M2MLink)
    }
}
