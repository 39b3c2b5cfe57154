//! Built-in mixins every table-backed model receives.
//!
//! `BaseMixin` carries the CRUD methods and `NameGet`; `ModelMixin` mixes
//! `BaseMixin` and is injected into each regular model, so applications extend
//! `ModelMixin` to add behaviour to all models at once.

use crate::error::{StrataError, StrataResult};
use crate::field::Field;
use crate::method::Call;
use crate::registry::Registry;
use crate::value::{FieldMap, Value};

pub const BASE_MIXIN: &str = "BaseMixin";
pub const MODEL_MIXIN: &str = "ModelMixin";

/// Field read by `NameGet` when the model has one.
pub const NAME_FIELD: &str = "Name";
pub const DISPLAY_NAME_FIELD: &str = "DisplayName";

pub(crate) fn declare(registry: &Registry) {
    registry.new_mixin_model(BASE_MIXIN);
    registry.new_mixin_model(MODEL_MIXIN);
    registry.inherit(MODEL_MIXIN, BASE_MIXIN);

    registry.add_field(
        BASE_MIXIN,
        Field::char(DISPLAY_NAME_FIELD).compute("ComputeDisplayName"),
    );

    registry.add_method(BASE_MIXIN, "Create", |call: Call| async move {
        let values = map_arg(&call, 0)?;
        let id = call.records().create_raw(values).await?;
        Ok(Value::Ids(vec![id]))
    });
    registry.add_method(BASE_MIXIN, "Write", |call: Call| async move {
        let values = map_arg(&call, 0)?;
        call.records().write_raw(values).await?;
        Ok(Value::Bool(true))
    });
    registry.add_method(BASE_MIXIN, "Unlink", |call: Call| async move {
        let deleted = call.records().unlink_raw().await?;
        Ok(Value::Int(deleted as i64))
    });
    registry.add_method(BASE_MIXIN, "NameGet", |call: Call| async move {
        let records = call.records();
        let has_name = records.model()?.field(NAME_FIELD).is_some();
        if has_name {
            if let Value::Text(name) = records.get(NAME_FIELD).await? {
                return Ok(Value::Text(name));
            }
        }
        let id = records.single_id().await?;
        Ok(Value::Text(format!("{},{}", records.model_name(), id)))
    });
    registry.add_compute_method(
        BASE_MIXIN,
        "ComputeDisplayName",
        &[DISPLAY_NAME_FIELD],
        |call: Call| async move {
            let name = call.records().call("NameGet", Vec::new()).await?;
            let mut values = FieldMap::new();
            values.insert(DISPLAY_NAME_FIELD.to_owned(), name);
            Ok(Value::Map(values))
        },
    );
}

/// Field values passed as argument `index` of a CRUD method.
fn map_arg(call: &Call, index: usize) -> StrataResult<FieldMap> {
    match call.arg(index) {
        Value::Map(values) => Ok(values),
        Value::Null => Ok(FieldMap::new()),
        other => Err(StrataError::InvalidValue(format!(
            "{}.{} expects field values, got {}",
            call.records().model_name(),
            call.method(),
            other
        ))),
    }
}
