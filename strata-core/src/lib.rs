pub use async_trait;
pub use sqlx;

pub mod prelude {
    pub use crate::condition::Condition;
    pub use crate::environment::Environment;
    pub use crate::error::{StrataError, StrataResult};
    pub use crate::executor::Executor;
    pub use crate::field::{Field, OnDelete};
    pub use crate::method::Call;
    pub use crate::recordset::RecordSet;
    pub use crate::registry::{Models, Registry};
    pub use crate::security::{Permission, Principal};
    pub use crate::value::{FieldMap, Value};
    pub use crate::field_map;
}

mod bootstrap;
pub mod builtin;
pub mod compute;
pub mod condition;
pub mod dialect;
pub mod environment;
pub mod error;
pub mod executor;
pub mod field;
pub mod loader;
pub mod method;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod model;
pub mod query;
pub mod recordset;
pub mod registry;
pub mod schema;
pub mod security;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod value;

pub use condition::{CondNode, Condition, Domain, DomainTerm, Operator, Predicate};
pub use dialect::{Dialect, PostgresDialect, SqliteDialect, dialect_for_url};
pub use environment::Environment;
pub use error::{BootstrapError, StrataError, StrataResult};
pub use executor::Executor;
pub use field::{Field, FieldType, OnDelete};
pub use loader::load_record;
pub use method::Call;
pub use model::{Model, ModelKind};
pub use query::{CompiledQuery, Query};
pub use recordset::RecordSet;
pub use registry::{Models, Registry};
pub use schema::{
    Catalog, SchemaDiff, diff_database, diff_schema, format_schema_diff_summary, plan_sync,
    sync_database, sync_statements,
};
pub use security::{AccessControlList, Permission, Principal};
pub use value::{FieldMap, Value};
