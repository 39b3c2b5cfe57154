use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use strata_core::field::ID_FIELD;
use strata_core::{BootstrapError, Field, FieldType, Models, OnDelete, Registry, Value};

/// Model declarations read from a JSON file.
///
/// ```json
/// {
///   "models": [
///     { "name": "Partner", "fields": [ { "name": "Name", "type": "char", "index": true } ] }
///   ]
/// }
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub models: Vec<ModelSpec>,
    #[serde(default)]
    pub sequences: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKindSpec {
    #[default]
    Regular,
    Mixin,
    Manual,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSpec {
    pub name: String,
    #[serde(default)]
    pub kind: ModelKindSpec,
    /// Mixins, lowest layer first.
    #[serde(default)]
    pub inherits: Vec<String>,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub relation: Option<String>,
    pub reverse: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub index: bool,
    pub size: Option<u32>,
    pub default: Option<Value>,
    pub column: Option<String>,
    pub related: Option<String>,
    #[serde(default)]
    pub embed: bool,
    pub on_delete: Option<OnDelete>,
}

#[derive(Debug)]
pub enum ManifestError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
    Bootstrap(BootstrapError),
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "cannot read manifest: {}", err),
            Self::Parse(err) => write!(f, "malformed manifest: {}", err),
            Self::Invalid(message) => write!(f, "invalid manifest: {}", message),
            Self::Bootstrap(err) => write!(f, "bootstrap failed: {}", err),
        }
    }
}

impl std::error::Error for ManifestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Bootstrap(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let raw = std::fs::read_to_string(path).map_err(ManifestError::Io)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ManifestError> {
        serde_json::from_str(raw).map_err(ManifestError::Parse)
    }

    /// Declare every model on a fresh registry and freeze it.
    pub fn bootstrap(&self) -> Result<Arc<Models>, ManifestError> {
        let registry = Registry::new();
        self.declare(&registry)?;
        registry.try_bootstrap().map_err(ManifestError::Bootstrap)
    }

    /// Registration panics on misdeclarations, so they are caught here first.
    fn validate(&self, registry: &Registry) -> Result<(), ManifestError> {
        let mut seen = HashSet::new();
        for model in &self.models {
            if model.name.is_empty() {
                return Err(invalid("a model has an empty name"));
            }
            if registry.has_model(&model.name) || !seen.insert(model.name.as_str()) {
                return Err(invalid(format!("model `{}` is declared twice", model.name)));
            }
            let mut names = HashSet::new();
            for field in &model.fields {
                let at = format!("{}.{}", model.name, field.name);
                if field.name == ID_FIELD {
                    return Err(invalid(format!("{} is implicit", at)));
                }
                if !names.insert(field.name.as_str()) {
                    return Err(invalid(format!("field {} is declared twice", at)));
                }
                if field.field_type.is_relation() && field.relation.is_none() {
                    return Err(invalid(format!("relational field {} needs a `relation`", at)));
                }
                if field.field_type == FieldType::One2Many && field.reverse.is_none() {
                    return Err(invalid(format!("one2many field {} needs a `reverse`", at)));
                }
                if field.field_type == FieldType::Many2Many && model.kind == ModelKindSpec::Mixin {
                    return Err(invalid(format!("mixin field {} cannot be many2many", at)));
                }
            }
        }
        Ok(())
    }

    pub fn declare(&self, registry: &Registry) -> Result<(), ManifestError> {
        self.validate(registry)?;
        for model in &self.models {
            match model.kind {
                ModelKindSpec::Regular => registry.new_model(&model.name),
                ModelKindSpec::Mixin => registry.new_mixin_model(&model.name),
                ModelKindSpec::Manual => registry.new_manual_model(&model.name),
            }
        }
        for model in &self.models {
            for mixin in &model.inherits {
                registry.inherit(&model.name, mixin);
            }
            for spec in &model.fields {
                registry.add_field(&model.name, spec.to_field());
            }
        }
        for sequence in &self.sequences {
            registry.register_sequence(sequence);
        }
        Ok(())
    }
}

impl FieldSpec {
    fn to_field(&self) -> Field {
        let name = self.name.as_str();
        let relation = self.relation.as_deref().unwrap_or_default();
        let mut field = match self.field_type {
            FieldType::Char => Field::char(name),
            FieldType::Text => Field::text(name),
            FieldType::Integer => Field::integer(name),
            FieldType::Float => Field::float(name),
            FieldType::Boolean => Field::boolean(name),
            FieldType::Date => Field::date(name),
            FieldType::DateTime => Field::datetime(name),
            FieldType::Many2One => Field::many2one(name, relation),
            FieldType::One2One => Field::one2one(name, relation),
            FieldType::One2Many => {
                Field::one2many(name, relation, self.reverse.as_deref().unwrap_or_default())
            }
            FieldType::Many2Many => Field::many2many(name, relation),
        };
        if self.required {
            field = field.required();
        }
        if self.index {
            field = field.index();
        }
        if let Some(size) = self.size {
            field = field.size(size);
        }
        if let Some(default) = &self.default {
            field = field.default(default.clone());
        }
        if let Some(column) = &self.column {
            field = field.column(column);
        }
        if let Some(path) = &self.related {
            field = field.related(path);
        }
        if self.embed {
            field = field.embed();
        }
        if let Some(policy) = self.on_delete {
            field = field.on_delete(policy);
        }
        field
    }
}

fn invalid(message: impl Into<String>) -> ManifestError {
    ManifestError::Invalid(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "models": [
            { "name": "Stamped", "kind": "mixin",
              "fields": [ { "name": "Stamp", "type": "datetime" } ] },
            { "name": "Partner", "inherits": ["Stamped"], "fields": [
                { "name": "Name", "type": "char", "size": 80, "index": true, "required": true },
                { "name": "Rank", "type": "integer", "default": 3 },
                { "name": "Parent", "type": "many2one", "relation": "Partner", "on_delete": "cascade" },
                { "name": "Children", "type": "one2many", "relation": "Partner", "reverse": "Parent" },
                { "name": "Tags", "type": "many2many", "relation": "Tag" },
                { "name": "ParentName", "type": "char", "related": "Parent.Name" }
            ] },
            { "name": "Tag", "fields": [ { "name": "Label", "type": "char", "column": "tag_label" } ] },
            { "name": "PartnerReport", "kind": "manual",
              "fields": [ { "name": "Total", "type": "float" } ] }
        ],
        "sequences": ["invoice"]
    }"#;

    #[test]
    fn sample_manifest_bootstraps() {
        let models = Manifest::parse(SAMPLE).unwrap().bootstrap().unwrap();

        let partner = models.model("Partner").unwrap();
        let name = partner.field("Name").unwrap();
        assert!(name.required && name.index);
        assert_eq!(name.size, Some(80));
        assert_eq!(partner.field("Rank").unwrap().default, Some(Value::Int(3)));
        let parent = partner.field("Parent").unwrap();
        assert_eq!(parent.column, "parent_id");
        assert_eq!(parent.on_delete, OnDelete::Cascade);
        assert!(partner.field("ParentName").unwrap().is_related());
        assert!(partner.field("Stamp").is_some());
        assert!(partner.field("Tags").unwrap().m2m.is_some());

        assert_eq!(models.model("Tag").unwrap().field("tag_label").unwrap().name, "Label");
        assert!(!models.model("PartnerReport").unwrap().has_table());
        assert!(!models.model("Stamped").unwrap().has_table());
        assert_eq!(models.sequences().collect::<Vec<_>>(), vec!["invoice_manseq"]);
    }

    #[test]
    fn empty_manifest_is_valid() {
        let models = Manifest::parse("{}").unwrap().bootstrap().unwrap();
        assert!(models.get("BaseMixin").is_some());
    }

    #[test]
    fn misdeclarations_are_errors_not_panics() {
        let cases = [
            r#"{"models":[{"name":"A"},{"name":"A"}]}"#,
            r#"{"models":[{"name":"ModelMixin"}]}"#,
            r#"{"models":[{"name":"A","fields":[{"name":"ID","type":"integer"}]}]}"#,
            r#"{"models":[{"name":"A","fields":[{"name":"X","type":"char"},{"name":"X","type":"text"}]}]}"#,
            r#"{"models":[{"name":"A","fields":[{"name":"B","type":"many2one"}]}]}"#,
            r#"{"models":[{"name":"A","fields":[{"name":"Bs","type":"one2many","relation":"A"}]}]}"#,
            r#"{"models":[{"name":"M","kind":"mixin","fields":[{"name":"T","type":"many2many","relation":"M"}]}]}"#,
        ];
        for case in cases {
            let err = Manifest::parse(case).unwrap().bootstrap().unwrap_err();
            assert!(matches!(err, ManifestError::Invalid(_)), "{}: {}", case, err);
        }
    }

    #[test]
    fn unknown_targets_fail_at_bootstrap() {
        let raw = r#"{"models":[{"name":"A","fields":[{"name":"B","type":"many2one","relation":"Nope"}]}]}"#;
        let err = Manifest::parse(raw).unwrap().bootstrap().unwrap_err();
        assert!(matches!(
            err,
            ManifestError::Bootstrap(BootstrapError::UnknownRelatedModel { .. })
        ));

        let raw = r#"{"models":[{"name":"A","inherits":["Ghost"]}]}"#;
        let err = Manifest::parse(raw).unwrap().bootstrap().unwrap_err();
        assert!(matches!(err, ManifestError::Bootstrap(BootstrapError::UnknownMixin { .. })));
    }

    #[test]
    fn unknown_keys_and_types_are_rejected() {
        assert!(matches!(
            Manifest::parse(r#"{"models":[{"name":"A","colour":"red"}]}"#),
            Err(ManifestError::Parse(_))
        ));
        assert!(matches!(
            Manifest::parse(r#"{"models":[{"name":"A","fields":[{"name":"X","type":"blob"}]}]}"#),
            Err(ManifestError::Parse(_))
        ));
    }
}
