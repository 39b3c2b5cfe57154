use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use smallvec::SmallVec;

use crate::bootstrap;
use crate::builtin;
use crate::error::{BootstrapError, StrataError, StrataResult};
use crate::field::{Field, FieldType, M2MLink, OnDelete};
use crate::method::{Call, MethodInfo, layer_fn};
use crate::model::{Model, ModelKind};
use crate::security::Permission;
use crate::value::Value;

/// Separator of field names in a path ("Profile.BestPost.Title").
pub const EXPR_SEP: char = '.';
/// Suffix of manually declared sequences.
pub const SEQUENCE_SUFFIX: &str = "_manseq";

const MAX_PATH_DEPTH: usize = 8;

/// A permission grant recorded before bootstrap and applied once members exist.
#[derive(Debug, Clone)]
pub(crate) enum Grant {
    Method {
        model: String,
        method: String,
        group: String,
    },
    Field {
        model: String,
        field: String,
        group: String,
        permission: Permission,
    },
}

#[derive(Default)]
pub(crate) struct Declarations {
    pub(crate) models: BTreeMap<String, Model>,
    pub(crate) sequences: BTreeSet<String>,
    pub(crate) grants: Vec<Grant>,
    bootstrapped: bool,
}

/// The process-scoped model registry.
///
/// Modules declare models, fields and method layers while the registry is open.
/// [`Registry::bootstrap`] compiles the declarations exactly once into an immutable
/// [`Models`] snapshot; any declaration after that point is a programmer error.
pub struct Registry {
    state: Mutex<Declarations>,
    frozen: OnceLock<Arc<Models>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("bootstrapped", &self.is_bootstrapped())
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// An open registry holding the built-in `BaseMixin` and `ModelMixin`.
    pub fn new() -> Self {
        let registry = Self {
            state: Mutex::new(Declarations::default()),
            frozen: OnceLock::new(),
        };
        builtin::declare(&registry);
        registry
    }

    fn lock(&self) -> MutexGuard<'_, Declarations> {
        self.state.lock().expect("model registry lock poisoned")
    }

    fn open(&self, action: &str) -> MutexGuard<'_, Declarations> {
        let state = self.lock();
        if state.bootstrapped {
            fail(
                state,
                format!("model registry is frozen: cannot {} after bootstrap", action),
            );
        }
        state
    }

    fn declare_model(&self, name: &str, kind: ModelKind) {
        let mut state = self.open("register a model");
        if state.models.contains_key(name) {
            fail(state, format!("model `{}` is already registered", name));
        }
        let mut model = Model::new(name, kind);
        if kind == ModelKind::Regular {
            model.mixins.push(builtin::MODEL_MIXIN.to_owned());
        }
        state.models.insert(name.to_owned(), model);
    }

    /// Register a table-backed model. It mixes in `ModelMixin` automatically.
    pub fn new_model(&self, name: &str) {
        self.declare_model(name, ModelKind::Regular);
    }

    pub fn new_mixin_model(&self, name: &str) {
        self.declare_model(name, ModelKind::Mixin);
    }

    /// Register a model whose relation (e.g. a view) is managed outside the synchronizer.
    pub fn new_manual_model(&self, name: &str) {
        self.declare_model(name, ModelKind::Manual);
    }

    /// Mix `mixin` into `model`. Later calls layer above earlier ones.
    pub fn inherit(&self, model: &str, mixin: &str) {
        let mut state = self.open("inherit a mixin");
        match state.models.get_mut(model) {
            Some(target) => {
                if !target.mixins.iter().any(|m| m == mixin) {
                    target.mixins.push(mixin.to_owned());
                }
            }
            None => fail(
                state,
                format!("cannot mix `{}` into unknown model `{}`", mixin, model),
            ),
        }
    }

    pub fn add_field(&self, model: &str, field: Field) {
        let mut state = self.open("add a field");
        let Some(kind) = state.models.get(model).map(|target| target.kind) else {
            fail(
                state,
                format!("cannot add field `{}` to unknown model `{}`", field.name, model),
            );
        };
        if state
            .models
            .get(model)
            .is_some_and(|target| target.fields.contains(&field.name))
        {
            fail(
                state,
                format!("field {}.{} is already declared", model, field.name),
            );
        }
        let mut field = field.bind_to(model);
        if field.field_type == FieldType::Many2Many {
            if kind == ModelKind::Mixin {
                fail(
                    state,
                    format!(
                        "many2many field {}.{} cannot be declared on a mixin",
                        model, field.name
                    ),
                );
            }
            field.m2m = Some(link_model(&mut state, model, &field));
        }
        if let Some(target) = state.models.get_mut(model) {
            target.fields.insert(field);
        }
    }

    fn insert_method(&self, model: &str, name: &str, info: MethodInfo) {
        let mut state = self.open("add a method");
        let Some(exists) = state
            .models
            .get(model)
            .map(|target| target.methods.contains_key(name))
        else {
            fail(
                state,
                format!("cannot add method `{}` to unknown model `{}`", name, model),
            );
        };
        if exists {
            fail(
                state,
                format!("method {}.{} already exists, extend it instead", model, name),
            );
        }
        if let Some(target) = state.models.get_mut(model) {
            target.methods.insert(name.to_owned(), info);
        }
    }

    /// Declare the root layer of a new method.
    pub fn add_method<F, Fut>(&self, model: &str, name: &str, func: F)
    where
        F: Fn(Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StrataResult<Value>> + Send + 'static,
    {
        self.insert_method(model, name, MethodInfo::new(model, name, layer_fn(func)));
    }

    /// Declare a compute method returning a [`Value::Map`] of the fields it writes.
    pub fn add_compute_method<F, Fut>(&self, model: &str, name: &str, writes: &[&str], func: F)
    where
        F: Fn(Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StrataResult<Value>> + Send + 'static,
    {
        let mut info = MethodInfo::new(model, name, layer_fn(func));
        info.computes = writes.iter().map(|field| (*field).to_owned()).collect();
        self.insert_method(model, name, info);
    }

    /// Push a new top layer on `name`.
    ///
    /// Extending a method the model only gets from a mixin is allowed: the layer
    /// becomes the model's own chain and the mixin implementation is spliced
    /// beneath it during bootstrap.
    pub fn extend_method<F, Fut>(&self, model: &str, name: &str, func: F)
    where
        F: Fn(Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StrataResult<Value>> + Send + 'static,
    {
        let mut state = self.open("extend a method");
        if !state.models.contains_key(model) {
            fail(
                state,
                format!("cannot extend method `{}` on unknown model `{}`", name, model),
            );
        }
        let Some(target) = state.models.get_mut(model) else {
            return;
        };
        match target.methods.get_mut(name) {
            Some(info) => info.extend(layer_fn(func)),
            None => {
                let mut info = MethodInfo::new(model, name, layer_fn(func));
                info.from_extend = true;
                target.methods.insert(name.to_owned(), info);
            }
        }
    }

    /// Allow `group` to execute `model.method`.
    pub fn grant_method(&self, model: &str, method: &str, group: &str) {
        self.open("grant a method").grants.push(Grant::Method {
            model: model.to_owned(),
            method: method.to_owned(),
            group: group.to_owned(),
        });
    }

    pub fn grant_field(&self, model: &str, field: &str, group: &str, permission: Permission) {
        self.open("grant a field").grants.push(Grant::Field {
            model: model.to_owned(),
            field: field.to_owned(),
            group: group.to_owned(),
            permission,
        });
    }

    /// Declare a manual sequence, materialized as `<name>_manseq`.
    pub fn register_sequence(&self, name: &str) {
        self.open("register a sequence")
            .sequences
            .insert(format!("{}{}", name, SEQUENCE_SUFFIX));
    }

    pub fn has_model(&self, name: &str) -> bool {
        match self.frozen.get() {
            Some(models) => models.get(name).is_some(),
            None => self.lock().models.contains_key(name),
        }
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.frozen.get().is_some() || self.lock().bootstrapped
    }

    /// The frozen models, once bootstrapped.
    pub fn models(&self) -> Option<Arc<Models>> {
        self.frozen.get().cloned()
    }

    /// Compile all declarations into the frozen model set.
    pub fn try_bootstrap(&self) -> Result<Arc<Models>, BootstrapError> {
        let mut state = self.lock();
        if state.bootstrapped {
            return Err(BootstrapError::AlreadyBootstrapped);
        }
        state.bootstrapped = true;
        let models = bootstrap::run(&mut state)?;
        let models = Arc::new(models);
        // The flag above guarantees a single writer.
        let _ = self.frozen.set(models.clone());
        Ok(models)
    }

    /// Compile all declarations into the frozen model set.
    ///
    /// # Panics
    ///
    /// Panics on a second call and on any misdeclared model, naming the model,
    /// field or method at fault.
    pub fn bootstrap(&self) -> Arc<Models> {
        match self.try_bootstrap() {
            Ok(models) => models,
            Err(err) => panic!("model bootstrap failed: {}", err),
        }
    }
}

/// Release the registry lock, then abort on a misdeclaration.
fn fail(state: MutexGuard<'_, Declarations>, message: String) -> ! {
    drop(state);
    panic!("{}", message);
}

/// Register (or reuse) the link model of a many2many field.
fn link_model(state: &mut Declarations, owner: &str, field: &Field) -> M2MLink {
    let related = field.relation.clone().unwrap_or_default();
    let (first, second) = if owner <= related.as_str() {
        (owner.to_owned(), related.clone())
    } else {
        (related.clone(), owner.to_owned())
    };
    let link = format!("{}{}Rel", first, second);
    let (ours, theirs) = if owner == related {
        (owner.to_owned(), format!("{}2", related))
    } else {
        (owner.to_owned(), related.clone())
    };
    if !state.models.contains_key(&link) {
        let mut model = Model::new(&link, ModelKind::M2MLink);
        for (name, target) in [(&ours, owner), (&theirs, related.as_str())] {
            model.fields.insert(
                Field::many2one(name, target)
                    .required()
                    .index()
                    .on_delete(OnDelete::Cascade)
                    .bind_to(&link),
            );
        }
        state.models.insert(link.clone(), model);
    }
    M2MLink {
        model: link,
        ours,
        theirs,
    }
}

/// A path segment that failed to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PathError {
    pub(crate) model: String,
    pub(crate) segment: String,
}

/// Resolve a dotted path into the chain of fields it traverses.
///
/// Related fields are replaced by the fields of their own path; every field but
/// the last is a relation.
pub(crate) fn resolve_path<'m>(
    models: &'m BTreeMap<String, Model>,
    model: &str,
    path: &str,
) -> Result<Vec<&'m Field>, PathError> {
    let mut out = Vec::new();
    expand_path(models, model, path, &mut out, 0)?;
    Ok(out)
}

fn expand_path<'m>(
    models: &'m BTreeMap<String, Model>,
    model: &str,
    path: &str,
    out: &mut Vec<&'m Field>,
    depth: usize,
) -> Result<(), PathError> {
    let missing = |model: &str, segment: &str| PathError {
        model: model.to_owned(),
        segment: segment.to_owned(),
    };
    let mut current = models.get(model).ok_or_else(|| missing(model, path))?;
    let segments: SmallVec<[&str; 4]> = path.split(EXPR_SEP).collect();
    let last = segments.len() - 1;
    for (i, segment) in segments.iter().copied().enumerate() {
        let field = current
            .field(segment)
            .ok_or_else(|| missing(&current.name, segment))?;
        match &field.related_path {
            Some(related) if depth < MAX_PATH_DEPTH => {
                expand_path(models, &current.name, related, out, depth + 1)?;
            }
            Some(_) => return Err(missing(&current.name, segment)),
            None => out.push(field),
        }
        if i < last {
            let hop = out.last().copied().ok_or_else(|| missing(&current.name, segment))?;
            let target = hop
                .relation
                .as_deref()
                .filter(|_| hop.field_type.is_relation())
                .ok_or_else(|| missing(&current.name, segment))?;
            current = models.get(target).ok_or_else(|| missing(target, segment))?;
        }
    }
    Ok(())
}

/// A stored computed field to refresh when a dependency changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependent {
    pub model: String,
    pub field: String,
    /// Path from the dependent model to the changed record, if not the record itself.
    pub path: Option<String>,
}

/// The frozen, immutable model set produced by bootstrap.
#[derive(Debug)]
pub struct Models {
    models: BTreeMap<String, Model>,
    tables: BTreeMap<String, String>,
    dependents: BTreeMap<(String, String), Vec<Dependent>>,
    sequences: BTreeSet<String>,
}

impl Models {
    pub(crate) fn new(
        models: BTreeMap<String, Model>,
        dependents: BTreeMap<(String, String), Vec<Dependent>>,
        sequences: BTreeSet<String>,
    ) -> Self {
        let tables = models
            .values()
            .filter(|model| !model.is_mixin())
            .map(|model| (model.table.clone(), model.name.clone()))
            .collect();
        Self {
            models,
            tables,
            dependents,
            sequences,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Model> {
        self.models.get(name)
    }

    pub fn model(&self, name: &str) -> StrataResult<&Model> {
        self.get(name)
            .ok_or_else(|| StrataError::UnknownModel(name.to_owned()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Model> {
        self.models.values()
    }

    pub fn by_table(&self, table: &str) -> Option<&Model> {
        self.tables.get(table).and_then(|name| self.models.get(name))
    }

    /// Stored computed fields depending on `model.field`.
    pub fn dependents(&self, model: &str, field: &str) -> &[Dependent] {
        self.dependents
            .get(&(model.to_owned(), field.to_owned()))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn sequences(&self) -> impl Iterator<Item = &str> {
        self.sequences.iter().map(String::as_str)
    }

    /// Resolve a dotted path (field names or columns) from `model`.
    pub fn resolve_path(&self, model: &str, path: &str) -> StrataResult<Vec<&Field>> {
        resolve_path(&self.models, model, path).map_err(|err| StrataError::UnknownField {
            model: err.model,
            field: err.segment,
        })
    }

    /// The field at the end of `path`.
    pub fn terminal_field(&self, model: &str, path: &str) -> StrataResult<&Field> {
        let fields = self.resolve_path(model, path)?;
        fields
            .last()
            .copied()
            .ok_or_else(|| StrataError::UnknownField {
                model: model.to_owned(),
                field: path.to_owned(),
            })
    }
}
