use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use crate::error::BootstrapError;
use crate::field::{Field, FieldType};
use crate::method::MethodInfo;
use crate::model::{Model, ModelKind};
use crate::registry::{Declarations, Dependent, EXPR_SEP, Grant, Models, resolve_path};
use crate::security::{ADMIN_GROUP, AccessControlList};

type ModelMap = BTreeMap<String, Model>;

/// Run every bootstrap phase over the declarations and freeze the result.
pub(crate) fn run(state: &mut Declarations) -> Result<Models, BootstrapError> {
    let start = Instant::now();
    tracing::info!(models = state.models.len(), "bootstrapping model registry");

    link_relations(&state.models)?;
    inject_mixins(&mut state.models)?;
    resolve_embeddings(&mut state.models);
    check_reverse_fields(&state.models)?;
    sync_related_fields(&mut state.models)?;
    freeze_methods(&state.models)?;
    let dependents = process_depends(&state.models)?;
    check_compute_methods(&state.models)?;
    setup_security(&mut state.models, &state.grants)?;

    let models = std::mem::take(&mut state.models);
    let sequences = std::mem::take(&mut state.sequences);
    tracing::info!(
        models = models.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "model registry bootstrapped"
    );
    Ok(Models::new(models, dependents, sequences))
}

// Phase 1: every relation and mixin name must point at a registered model.
fn link_relations(models: &ModelMap) -> Result<(), BootstrapError> {
    for model in models.values() {
        for mixin in &model.mixins {
            if !models.get(mixin).is_some_and(Model::is_mixin) {
                return Err(BootstrapError::UnknownMixin {
                    model: model.name.clone(),
                    mixin: mixin.clone(),
                });
            }
        }
        for field in model.fields.iter() {
            if !field.field_type.is_relation() {
                continue;
            }
            let related = field.relation.clone().unwrap_or_default();
            if !models.contains_key(&related) {
                return Err(BootstrapError::UnknownRelatedModel {
                    model: model.name.clone(),
                    field: field.name.clone(),
                    related,
                });
            }
        }
    }
    tracing::debug!("relations linked");
    Ok(())
}

// Phase 2: depth-first, memoized mixin injection.
fn inject_mixins(models: &mut ModelMap) -> Result<(), BootstrapError> {
    let mut done = BTreeSet::new();
    let targets: Vec<String> = models
        .values()
        .filter(|model| model.kind != ModelKind::M2MLink)
        .map(|model| model.name.clone())
        .collect();
    for target in targets {
        let mixins = models
            .get(&target)
            .map(|model| model.mixins.clone())
            .unwrap_or_default();
        for mixin in mixins {
            inject(models, &mixin, &target, &mut done, &mut Vec::new())?;
        }
    }
    tracing::debug!(pairs = done.len(), "mixins injected");
    Ok(())
}

fn inject(
    models: &mut ModelMap,
    mixin: &str,
    target: &str,
    done: &mut BTreeSet<(String, String)>,
    stack: &mut Vec<String>,
) -> Result<(), BootstrapError> {
    if stack.iter().any(|seen| seen == mixin) {
        return Err(BootstrapError::MixinCycle {
            model: target.to_owned(),
            mixin: mixin.to_owned(),
        });
    }
    let source = models
        .get(mixin)
        .cloned()
        .ok_or_else(|| BootstrapError::UnknownMixin {
            model: target.to_owned(),
            mixin: mixin.to_owned(),
        })?;

    stack.push(mixin.to_owned());
    for inner in &source.mixins {
        inject(models, inner, mixin, done, stack)?;
    }
    stack.pop();

    if !done.insert((target.to_owned(), mixin.to_owned())) {
        return Ok(());
    }
    // Re-read: the recursion above may have grown the mixin.
    let Some(source) = models.get(mixin).cloned() else {
        return Ok(());
    };
    let Some(dest) = models.get_mut(target) else {
        return Ok(());
    };

    for field in source.fields.iter() {
        if dest.fields.contains(&field.name) {
            continue;
        }
        let mut copy = field.clone();
        target.clone_into(&mut copy.model);
        dest.fields.insert(copy);
    }
    for method in source.methods() {
        match dest.methods.get_mut(&method.name) {
            Some(existing) => existing.splice_mixin(method),
            None => {
                dest.methods
                    .insert(method.name.clone(), MethodInfo::mixed_into(method, target));
            }
        }
    }
    tracing::debug!(model = target, mixin = mixin, "mixin injected");
    Ok(())
}

// Phase 3: embedded relations promote the related model's fields as related fields.
fn resolve_embeddings(models: &mut ModelMap) {
    let mut shadows: Vec<Field> = Vec::new();
    for model in models.values() {
        for field in model.fields.iter().filter(|f| f.embed && f.field_type.is_fk()) {
            let Some(target) = field.relation.as_deref().and_then(|r| models.get(r)) else {
                continue;
            };
            for promoted in target.fields.iter() {
                if model.fields.get(&promoted.name).is_some()
                    || model.fields.get(&promoted.column).is_some()
                {
                    continue;
                }
                let mut shadow = promoted.clone();
                model.name.clone_into(&mut shadow.model);
                shadow.related_path = Some(format!("{}{}{}", field.name, EXPR_SEP, promoted.name));
                shadow.stored = field.stored;
                shadow.embed = false;
                shadow.index = false;
                shadow.compute = None;
                shadow.depends.clear();
                shadow.acl = AccessControlList::with_admin();
                shadows.push(shadow);
            }
        }
    }
    for shadow in shadows {
        if let Some(model) = models.get_mut(&shadow.model) {
            if !model.fields.contains(&shadow.name) {
                model.fields.insert(shadow);
            }
        }
    }
    tracing::debug!("embeddings resolved");
}

// One2many fields need a many2one on the related model; it may come from a mixin.
fn check_reverse_fields(models: &ModelMap) -> Result<(), BootstrapError> {
    for model in models.values().filter(|m| !m.is_mixin()) {
        for field in model
            .fields
            .iter()
            .filter(|f| f.field_type == FieldType::One2Many && !f.is_related())
        {
            let reverse = field.reverse.clone().unwrap_or_default();
            let found = field
                .relation
                .as_deref()
                .and_then(|r| models.get(r))
                .and_then(|target| target.field(&reverse))
                .is_some_and(|r| r.field_type.is_fk());
            if !found {
                return Err(BootstrapError::UnknownReverseField {
                    model: model.name.clone(),
                    field: field.name.clone(),
                    reverse,
                });
            }
        }
    }
    Ok(())
}

// Phase 4: related fields take the terminal field's metadata, keeping their own identity.
fn sync_related_fields(models: &mut ModelMap) -> Result<(), BootstrapError> {
    let mut synced: Vec<Field> = Vec::new();
    for model in models.values().filter(|m| !m.is_mixin()) {
        for field in model.fields.iter() {
            let Some(path) = &field.related_path else {
                continue;
            };
            let terminal = resolve_path(models, &model.name, path)
                .ok()
                .and_then(|fields| fields.last().copied())
                .ok_or_else(|| BootstrapError::UnresolvedPath {
                    model: model.name.clone(),
                    field: field.name.clone(),
                    path: path.clone(),
                })?;
            let mut copy = terminal.clone();
            copy.name.clone_from(&field.name);
            copy.column.clone_from(&field.column);
            copy.model.clone_from(&field.model);
            copy.related_path.clone_from(&field.related_path);
            copy.stored = field.stored;
            copy.acl = field.acl.clone();
            copy.embed = false;
            copy.index = false;
            copy.compute = None;
            copy.depends.clear();
            synced.push(copy);
        }
    }
    let count = synced.len();
    for field in synced {
        if let Some(model) = models.get_mut(&field.model) {
            model.fields.insert(field);
        }
    }
    tracing::debug!(fields = count, "related fields synced");
    Ok(())
}

// Phase 5: chains started by an extension must have received a base layer.
fn freeze_methods(models: &ModelMap) -> Result<(), BootstrapError> {
    for model in models.values() {
        for method in model.methods() {
            if method.from_extend && !method.has_mixin_base() {
                return Err(BootstrapError::NothingToExtend {
                    model: model.name.clone(),
                    method: method.name.clone(),
                });
            }
        }
    }
    tracing::debug!("method chains frozen");
    Ok(())
}

/// Reverse index from a changed field to the stored computed fields reading it.
fn process_depends(
    models: &ModelMap,
) -> Result<BTreeMap<(String, String), Vec<Dependent>>, BootstrapError> {
    let mut graph: BTreeMap<(String, String), Vec<Dependent>> = BTreeMap::new();
    for model in models.values().filter(|m| !m.is_mixin()) {
        for field in model
            .fields
            .iter()
            .filter(|f| f.is_computed() && f.is_stored())
        {
            for path in &field.depends {
                let hops = resolve_path(models, &model.name, path).map_err(|_| {
                    BootstrapError::UnresolvedPath {
                        model: model.name.clone(),
                        field: field.name.clone(),
                        path: path.clone(),
                    }
                })?;
                let Some((changed, prefix)) = hops.split_last() else {
                    continue;
                };
                let prefix = (!prefix.is_empty()).then(|| {
                    prefix
                        .iter()
                        .map(|hop| hop.name.as_str())
                        .collect::<Vec<_>>()
                        .join(".")
                });
                let dependent = Dependent {
                    model: model.name.clone(),
                    field: field.name.clone(),
                    path: prefix,
                };
                let entry = graph
                    .entry((changed.model.clone(), changed.name.clone()))
                    .or_default();
                if !entry.contains(&dependent) {
                    entry.push(dependent);
                }
            }
        }
    }
    Ok(graph)
}

// Phase 6: compute methods and the fields they claim must exist.
fn check_compute_methods(models: &ModelMap) -> Result<(), BootstrapError> {
    for model in models.values() {
        for field in model.fields.iter().filter(|f| !f.is_related()) {
            let Some(method) = &field.compute else {
                continue;
            };
            if model.method(method).is_none() {
                return Err(BootstrapError::UnknownComputeMethod {
                    model: model.name.clone(),
                    field: field.name.clone(),
                    method: method.clone(),
                });
            }
        }
        for method in model.methods() {
            if let Some(missing) = method
                .computes
                .iter()
                .find(|name| !model.fields.contains(name))
            {
                return Err(BootstrapError::UnknownComputeTarget {
                    model: model.name.clone(),
                    method: method.name.clone(),
                    field: missing.clone(),
                });
            }
        }
    }
    Ok(())
}

// Phase 7: admin executes everything, then the declared grants.
fn setup_security(models: &mut ModelMap, grants: &[Grant]) -> Result<(), BootstrapError> {
    for model in models.values_mut() {
        for method in model.methods.values_mut() {
            method.groups.insert(ADMIN_GROUP.to_owned());
        }
    }
    for grant in grants {
        match grant {
            Grant::Method {
                model,
                method,
                group,
            } => {
                let info = models
                    .get_mut(model)
                    .and_then(|m| m.methods.get_mut(method))
                    .ok_or_else(|| BootstrapError::UnknownGrantTarget {
                        model: model.clone(),
                        target: method.clone(),
                    })?;
                info.groups.insert(group.clone());
            }
            Grant::Field {
                model,
                field,
                group,
                permission,
            } => {
                let target = models
                    .get_mut(model)
                    .and_then(|m| m.fields.get_mut(field))
                    .ok_or_else(|| BootstrapError::UnknownGrantTarget {
                        model: model.clone(),
                        target: field.clone(),
                    })?;
                target.acl.grant(group, *permission);
            }
        }
    }
    tracing::debug!(grants = grants.len(), "default security applied");
    Ok(())
}
