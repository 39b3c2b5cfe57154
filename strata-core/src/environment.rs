use std::fmt;
use std::sync::Arc;

use crate::error::StrataResult;
use crate::executor::Executor;
use crate::recordset::RecordSet;
use crate::registry::Models;
use crate::security::Principal;
use crate::value::{FieldMap, Value};

struct EnvState {
    models: Arc<Models>,
    executor: Executor,
    principal: Principal,
    context: FieldMap,
}

/// The scope record sets execute in: frozen models, a database executor,
/// the acting principal and a free-form context.
///
/// Cheap to clone. [`Environment::sudo`] and [`Environment::with_context`]
/// derive new environments sharing the same models and executor.
#[derive(Clone)]
pub struct Environment {
    state: Arc<EnvState>,
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("principal", &self.state.principal)
            .field("context", &self.state.context)
            .field("executor", &self.state.executor)
            .finish_non_exhaustive()
    }
}

impl Environment {
    pub fn new(models: Arc<Models>, executor: Executor, principal: Principal) -> Self {
        Self {
            state: Arc::new(EnvState {
                models,
                executor,
                principal,
                context: FieldMap::new(),
            }),
        }
    }

    pub fn models(&self) -> &Models {
        &self.state.models
    }

    pub fn executor(&self) -> &Executor {
        &self.state.executor
    }

    pub fn principal(&self) -> &Principal {
        &self.state.principal
    }

    pub fn context(&self) -> &FieldMap {
        &self.state.context
    }

    pub fn context_value(&self, key: &str) -> Option<&Value> {
        self.state.context.get(key)
    }

    fn derive(&self, principal: Principal, context: FieldMap) -> Self {
        Self {
            state: Arc::new(EnvState {
                models: self.state.models.clone(),
                executor: self.state.executor.clone(),
                principal,
                context,
            }),
        }
    }

    pub fn with_principal(&self, principal: Principal) -> Self {
        self.derive(principal, self.state.context.clone())
    }

    /// This environment acting as the superuser.
    pub fn sudo(&self) -> Self {
        self.with_principal(Principal::superuser())
    }

    pub fn with_context(&self, key: &str, value: impl Into<Value>) -> Self {
        let mut context = self.state.context.clone();
        context.insert(key.to_owned(), value.into());
        self.derive(self.state.principal.clone(), context)
    }

    /// All records of `model`, as a lazy record set.
    pub fn pool(&self, model: &str) -> StrataResult<RecordSet> {
        self.models().model(model)?;
        Ok(RecordSet::new(self.clone(), model))
    }
}
