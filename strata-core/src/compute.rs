//! Recomputation of stored computed fields after records change.
//!
//! Bootstrap indexes, for every field, the stored computed fields whose
//! `depends` paths end on it. After a write the stale records are found by
//! searching each dependent model along the reversed path, their compute
//! methods run as superuser and the results are written back, which may in
//! turn invalidate further fields.

use std::collections::{BTreeMap, BTreeSet};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::condition::Condition;
use crate::environment::Environment;
use crate::error::{StrataError, StrataResult};
use crate::recordset::{RecordSet, computed_values};
use crate::value::FieldMap;

/// Cascade depth at which recomputation is considered cyclic.
pub const MAX_RECOMPUTE_DEPTH: usize = 16;

/// Stale records per (model, compute method).
type Jobs = BTreeMap<(String, String), BTreeSet<i64>>;

/// Refresh the fields depending on `changed` fields of `records`.
pub(crate) fn after_write(
    records: RecordSet,
    changed: Vec<String>,
    depth: usize,
) -> BoxFuture<'static, StrataResult<()>> {
    async move {
        if changed.is_empty() {
            return Ok(());
        }
        if depth > MAX_RECOMPUTE_DEPTH {
            return Err(StrataError::Message(format!(
                "recomputing fields of {} did not settle after {} levels",
                records.model_name(),
                MAX_RECOMPUTE_DEPTH
            )));
        }
        let ids = records.ids().await?;
        if ids.is_empty() {
            return Ok(());
        }
        let env = records.env().sudo();
        let models = env.models();
        let mut jobs = Jobs::new();
        for name in &changed {
            for dependent in models.dependents(records.model_name(), name) {
                let stale = match &dependent.path {
                    None => ids.clone(),
                    Some(path) => {
                        env.pool(&dependent.model)?
                            .search(Condition::field(path).in_(ids.clone()))
                            .ids()
                            .await?
                    }
                };
                if stale.is_empty() {
                    continue;
                }
                let method = models
                    .model(&dependent.model)?
                    .field(&dependent.field)
                    .and_then(|field| field.compute.clone())
                    .ok_or_else(|| StrataError::UnknownField {
                        model: dependent.model.clone(),
                        field: dependent.field.clone(),
                    })?;
                jobs.entry((dependent.model.clone(), method))
                    .or_default()
                    .extend(stale);
            }
        }
        recompute(&env, jobs, depth).await
    }
    .boxed()
}

/// Compute every stored computed field of a freshly created record, then
/// refresh the dependents of the values it was created with.
pub(crate) async fn after_create(record: RecordSet, provided: Vec<String>) -> StrataResult<()> {
    let env = record.env().sudo();
    let ids = record.ids().await?;
    let model = env.models().model(record.model_name())?;
    let mut jobs = Jobs::new();
    for field in model
        .fields()
        .iter()
        .filter(|field| field.is_computed() && field.is_stored())
    {
        if let Some(method) = &field.compute {
            jobs.entry((model.name.clone(), method.clone()))
                .or_default()
                .extend(ids.iter().copied());
        }
    }
    recompute(&env, jobs, 1).await?;
    after_write(record, provided, 1).await
}

async fn recompute(env: &Environment, jobs: Jobs, depth: usize) -> StrataResult<()> {
    for ((model_name, method), ids) in jobs {
        let model = env.models().model(&model_name)?;
        let stored: BTreeSet<&str> = model
            .fields()
            .iter()
            .filter(|field| field.is_stored() && field.compute.as_deref() == Some(method.as_str()))
            .map(|field| field.name.as_str())
            .collect();
        tracing::debug!(
            model = %model_name,
            method = %method,
            records = ids.len(),
            depth,
            "recomputing stored fields"
        );
        let records = env.pool(&model_name)?;
        for id in ids {
            let record = records.with_ids(vec![id]);
            let result = record.call(&method, Vec::new()).await?;
            let values: FieldMap = computed_values(&model_name, &method, result)?
                .into_iter()
                .filter(|(name, _)| stored.contains(name.as_str()))
                .collect();
            record.write_values(values, depth + 1).await?;
        }
    }
    Ok(())
}
