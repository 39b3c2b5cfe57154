//! Record loading for external data sources.
//!
//! CSV and XML loaders hand over raw field values, usually text. They are
//! coerced to each field's type and the record is created, or updated when an
//! `ID` names an existing one.

use chrono::{NaiveDate, NaiveDateTime};

use crate::condition::Condition;
use crate::environment::Environment;
use crate::error::{StrataError, StrataResult};
use crate::field::{Field, FieldType, ID_FIELD};
use crate::recordset::RecordSet;
use crate::value::{DATE_FORMAT, DATETIME_FORMAT, FieldMap, Value};

/// Create or update one record of `model` from external values.
#[tracing::instrument(skip(env, values), fields(fields = values.len()))]
pub async fn load_record(env: &Environment, model: &str, values: FieldMap) -> StrataResult<RecordSet> {
    let target = env.models().model(model)?;
    let mut coerced = FieldMap::new();
    let mut id = None;
    for (name, value) in values {
        let field = target
            .field(&name)
            .ok_or_else(|| StrataError::UnknownField {
                model: model.to_owned(),
                field: name.clone(),
            })?;
        let value = coerce(field, value)?;
        if field.is_id() {
            id = value.as_i64();
            continue;
        }
        coerced.insert(field.name.clone(), value);
    }

    let records = env.pool(model)?;
    if let Some(id) = id {
        let existing = records.search(Condition::field(ID_FIELD).equals(id)).fetch().await?;
        if !existing.is_empty().await? {
            existing.write(coerced).await?;
            tracing::debug!(model, id, "record updated");
            return Ok(existing);
        }
        coerced.insert(ID_FIELD.to_owned(), Value::Int(id));
    }
    let created = records.create(coerced).await?;
    tracing::debug!(model, "record created");
    Ok(created)
}

/// Convert a loader value to the type of `field`. Non-text values pass through.
pub fn coerce(field: &Field, value: Value) -> StrataResult<Value> {
    let Value::Text(text) = value else {
        return Ok(value);
    };
    let trimmed = text.trim();
    if matches!(field.field_type, FieldType::Char | FieldType::Text) {
        return Ok(Value::Text(text));
    }
    if trimmed.is_empty() {
        return Ok(match field.field_type {
            FieldType::Boolean => Value::Bool(false),
            t if t.is_relation() => Value::Ids(Vec::new()),
            _ => Value::Null,
        });
    }
    let invalid = |expected: &str| {
        StrataError::InvalidValue(format!(
            "{}.{} expects {}, got `{}`",
            field.model, field.name, expected, trimmed
        ))
    };
    let value = match field.field_type {
        FieldType::Integer => Value::Int(trimmed.parse().map_err(|_| invalid("an integer"))?),
        FieldType::Float => Value::Float(trimmed.parse().map_err(|_| invalid("a number"))?),
        FieldType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Value::Bool(true),
            "0" | "false" | "no" => Value::Bool(false),
            _ => return Err(invalid("a boolean")),
        },
        FieldType::Date => NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
            .map(Value::Date)
            .map_err(|_| invalid("a date"))?,
        FieldType::DateTime => NaiveDateTime::parse_from_str(trimmed, DATETIME_FORMAT)
            .map(Value::DateTime)
            .map_err(|_| invalid("a datetime"))?,
        _ => {
            let ids = trimmed
                .split(',')
                .map(|part| part.trim().parse::<i64>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| invalid("record ids"))?;
            Value::Ids(ids)
        }
    };
    Ok(value)
}
