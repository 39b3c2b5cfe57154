//! # Strata ORM
//!
//! > **"Declare models at runtime, layer behaviour like modules."**
//!
//! Strata is an ORM for applications built from independent modules. Each module
//! declares models, fields and methods into a shared registry, mixes behaviour into
//! other modules' models and extends their methods. A single bootstrap compiles all
//! declarations into an immutable model set, and the schema synchronizer converges
//! the database towards it.
//!
//! ## Key Features
//!
//! - **Mixins**: inject fields and methods into many models; `ModelMixin` reaches all of them.
//! - **Method layers**: every method is a chain of implementations; `call_super` walks down.
//! - **Field graph**: computed fields (stored or on demand), related fields and embedded relations.
//! - **Conditions**: a filter tree compiled to parameterized SQL with one `LEFT JOIN` per hop.
//! - **Schema sync**: idempotent, additive convergence for SQLite and PostgreSQL.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use strata_orm::prelude::*;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::new();
//! registry.new_model("User");
//! registry.add_field("User", Field::char("Name"));
//! registry.add_method("User", "Greet", |call: Call| async move {
//!     let name = call.records().get("Name").await?;
//!     Ok(Value::Text(format!("Hello {}", name)))
//! });
//! let models = registry.bootstrap();
//!
//! // Connect and Sync
//! let executor = Executor::connect("sqlite::memory:").await?;
//! sync_database(&executor, &models).await?;
//!
//! // Create and call
//! let env = Environment::new(models, executor, Principal::superuser());
//! let jane = env.pool("User")?.create(field_map! { "Name" => "Jane" }).await?;
//! assert_eq!(jane.call("Greet", vec![]).await?, Value::from("Hello Jane"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Installation
//!
//! ```toml
//! [dependencies]
//! strata-orm = "0.3.0-alpha"
//! ```

pub use strata_core::*;

pub mod prelude {
    pub use strata_core::prelude::*;

    pub use crate::sync_database;
}
