use crate::security::Permission;

/// Strata-specific error type with actionable variants.
#[derive(Debug)]
pub enum StrataError {
    /// Underlying sqlx error (connection, pool, decoding).
    Sqlx(sqlx::Error),
    /// A single statement failed; carries the offending SQL.
    Statement { sql: String, source: sqlx::Error },
    /// The acting principal lacks a permission on a field or method.
    PermissionDenied {
        model: String,
        target: String,
        permission: Permission,
    },
    /// No model with this name is registered.
    UnknownModel(String),
    /// The model has no field with this name or column.
    UnknownField { model: String, field: String },
    /// The model has no method with this name.
    UnknownMethod { model: String, method: String },
    /// A singleton record set was expected.
    NotSingleton { model: String, len: usize },
    /// A value could not be used for the requested operation.
    InvalidValue(String),
    /// Generic message error.
    Message(String),
}

impl std::fmt::Display for StrataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlx(err) => write!(f, "sqlx error: {}", err),
            Self::Statement { sql, source } => {
                write!(f, "statement failed: {} (sql: {})", source, sql)
            }
            Self::PermissionDenied {
                model,
                target,
                permission,
            } => write!(
                f,
                "permission denied: {} on {}.{}",
                permission, model, target
            ),
            Self::UnknownModel(model) => write!(f, "unknown model `{}`", model),
            Self::UnknownField { model, field } => {
                write!(f, "unknown field `{}` on model `{}`", field, model)
            }
            Self::UnknownMethod { model, method } => {
                write!(f, "unknown method `{}` on model `{}`", method, model)
            }
            Self::NotSingleton { model, len } => write!(
                f,
                "expected a singleton of `{}`, got {} records",
                model, len
            ),
            Self::InvalidValue(message) => write!(f, "invalid value: {}", message),
            Self::Message(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for StrataError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sqlx(err) => Some(err),
            Self::Statement { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for StrataError {
    fn from(err: sqlx::Error) -> Self {
        Self::Sqlx(err)
    }
}

/// Result alias for Strata operations.
pub type StrataResult<T> = Result<T, StrataError>;

/// Wrap a driver error with the statement that produced it.
pub fn statement_error(sql: &str, err: sqlx::Error) -> StrataError {
    StrataError::Statement {
        sql: sql.to_owned(),
        source: err,
    }
}

/// Misconfigured model declarations detected while bootstrapping the registry.
///
/// These are programmer errors: [`Registry::bootstrap`](crate::registry::Registry::bootstrap)
/// aborts with them, [`Registry::try_bootstrap`](crate::registry::Registry::try_bootstrap)
/// hands them back so an entry point can report before exiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    AlreadyBootstrapped,
    UnknownRelatedModel {
        model: String,
        field: String,
        related: String,
    },
    UnknownReverseField {
        model: String,
        field: String,
        reverse: String,
    },
    UnknownMixin {
        model: String,
        mixin: String,
    },
    MixinCycle {
        model: String,
        mixin: String,
    },
    UnresolvedPath {
        model: String,
        field: String,
        path: String,
    },
    UnknownComputeMethod {
        model: String,
        field: String,
        method: String,
    },
    UnknownComputeTarget {
        model: String,
        method: String,
        field: String,
    },
    NothingToExtend {
        model: String,
        method: String,
    },
    UnknownGrantTarget {
        model: String,
        target: String,
    },
}

impl std::fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyBootstrapped => write!(f, "model registry already bootstrapped"),
            Self::UnknownRelatedModel {
                model,
                field,
                related,
            } => write!(
                f,
                "unknown related model `{}` in {}.{}",
                related, model, field
            ),
            Self::UnknownReverseField {
                model,
                field,
                reverse,
            } => write!(
                f,
                "one2many {}.{} points to missing reverse field `{}`",
                model, field, reverse
            ),
            Self::UnknownMixin { model, mixin } => {
                write!(f, "model `{}` mixes unknown mixin `{}`", model, mixin)
            }
            Self::MixinCycle { model, mixin } => {
                write!(f, "mixin cycle between `{}` and `{}`", model, mixin)
            }
            Self::UnresolvedPath { model, field, path } => write!(
                f,
                "cannot resolve path `{}` of {}.{}",
                path, model, field
            ),
            Self::UnknownComputeMethod {
                model,
                field,
                method,
            } => write!(
                f,
                "field {}.{} is computed by unknown method `{}`",
                model, field, method
            ),
            Self::UnknownComputeTarget {
                model,
                method,
                field,
            } => write!(
                f,
                "compute method {}.{} writes unknown field `{}`",
                model, method, field
            ),
            Self::NothingToExtend { model, method } => write!(
                f,
                "method {}.{} extends nothing: no mixin provides a base implementation",
                model, method
            ),
            Self::UnknownGrantTarget { model, target } => {
                write!(f, "grant on unknown member {}.{}", model, target)
            }
        }
    }
}

impl std::error::Error for BootstrapError {}
