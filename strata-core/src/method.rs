use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture};

use crate::error::{StrataError, StrataResult};
use crate::recordset::RecordSet;
use crate::value::Value;

/// Future returned by every method layer.
pub type LayerFuture = BoxFuture<'static, StrataResult<Value>>;
/// One implementation of a method.
pub type LayerFn = Arc<dyn Fn(Call) -> LayerFuture + Send + Sync>;

pub(crate) fn layer_fn<F, Fut>(func: F) -> LayerFn
where
    F: Fn(Call) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StrataResult<Value>> + Send + 'static,
{
    Arc::new(move |call| func(call).boxed())
}

/// A layer of a method chain with its provenance.
#[derive(Clone)]
pub struct Layer {
    func: LayerFn,
    mixed_in: bool,
}

impl Layer {
    /// True when the layer was injected from a mixin.
    pub fn is_mixed_in(&self) -> bool {
        self.mixed_in
    }
}

impl fmt::Debug for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layer")
            .field("mixed_in", &self.mixed_in)
            .finish_non_exhaustive()
    }
}

/// The ordered layer chain of a (model, method) pair.
///
/// `layers[0]` is the bottom of the chain; calls enter at the last layer and
/// walk down through [`Call::call_super`].
#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub name: String,
    pub model: String,
    layers: Vec<Layer>,
    /// Groups allowed to execute the method.
    pub groups: BTreeSet<String>,
    /// Fields a compute method claims to write.
    pub computes: Vec<String>,
    /// Chain started by an extension on a method the model only inherits.
    pub(crate) from_extend: bool,
}

impl MethodInfo {
    pub(crate) fn new(model: &str, name: &str, func: LayerFn) -> Self {
        Self {
            name: name.to_owned(),
            model: model.to_owned(),
            layers: vec![Layer {
                func,
                mixed_in: false,
            }],
            groups: BTreeSet::new(),
            computes: Vec::new(),
            from_extend: false,
        }
    }

    /// Push a layer above the current top.
    pub(crate) fn extend(&mut self, func: LayerFn) {
        self.layers.push(Layer {
            func,
            mixed_in: false,
        });
    }

    /// Copy of `source`'s chain for `target`, every layer marked as mixed in.
    pub(crate) fn mixed_into(source: &MethodInfo, target: &str) -> Self {
        let mut copy = source.clone();
        target.clone_into(&mut copy.model);
        copy.from_extend = false;
        for layer in &mut copy.layers {
            layer.mixed_in = true;
        }
        copy
    }

    /// Insert `source`'s layers below this chain's own top band, above older mixin layers.
    pub(crate) fn splice_mixin(&mut self, source: &MethodInfo) {
        let own_top = self
            .layers
            .iter()
            .rev()
            .take_while(|layer| !layer.mixed_in)
            .count();
        let at = self.layers.len() - own_top;
        let injected = source.layers.iter().map(|layer| Layer {
            func: layer.func.clone(),
            mixed_in: true,
        });
        self.layers.splice(at..at, injected);
        self.groups.extend(source.groups.iter().cloned());
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    pub(crate) fn has_mixin_base(&self) -> bool {
        self.layers.first().is_some_and(|layer| layer.mixed_in)
    }

    pub(crate) fn layer(&self, index: usize) -> Option<LayerFn> {
        self.layers.get(index).map(|layer| layer.func.clone())
    }
}

/// The receiver and arguments of one layer invocation.
pub struct Call {
    records: RecordSet,
    method: String,
    layer: usize,
    args: Vec<Value>,
}

impl Call {
    pub fn records(&self) -> &RecordSet {
        &self.records
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Argument at `index`, or null when the caller passed fewer.
    pub fn arg(&self, index: usize) -> Value {
        self.args.get(index).cloned().unwrap_or_default()
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Index of the executing layer in its chain.
    pub fn layer(&self) -> usize {
        self.layer
    }

    /// Invoke the next lower layer of the same chain.
    ///
    /// # Panics
    ///
    /// Panics when called from the bottom layer: there is no further implementation.
    pub fn call_super(&self, args: Vec<Value>) -> LayerFuture {
        if self.layer == 0 {
            panic!(
                "no further implementation for method {}.{}",
                self.records.model_name(),
                self.method
            );
        }
        dispatch(self.records.clone(), &self.method, self.layer - 1, args)
    }
}

/// Enter the chain of `method` on `records` at its top layer.
pub(crate) fn call_top(records: RecordSet, method: &str, args: Vec<Value>) -> LayerFuture {
    let info = match records.model().and_then(|model| {
        model
            .method(method)
            .ok_or_else(|| StrataError::UnknownMethod {
                model: model.name.clone(),
                method: method.to_owned(),
            })
    }) {
        Ok(info) => info,
        Err(err) => return future::ready(Err(err)).boxed(),
    };
    if !records.env().principal().can_execute(&info.groups) {
        return future::ready(Err(StrataError::PermissionDenied {
            model: info.model.clone(),
            target: method.to_owned(),
            permission: crate::security::Permission::EXECUTE,
        }))
        .boxed();
    }
    let top = info.depth() - 1;
    dispatch(records, method, top, args)
}

fn dispatch(records: RecordSet, method: &str, layer: usize, args: Vec<Value>) -> LayerFuture {
    let func = match records.model().and_then(|model| {
        model
            .method(method)
            .and_then(|info| info.layer(layer))
            .ok_or_else(|| StrataError::UnknownMethod {
                model: model.name.clone(),
                method: method.to_owned(),
            })
    }) {
        Ok(func) => func,
        Err(err) => return future::ready(Err(err)).boxed(),
    };
    tracing::trace!(
        model = records.model_name(),
        method = method,
        layer = layer,
        "method dispatch"
    );
    func(Call {
        records,
        method: method.to_owned(),
        layer,
        args,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> LayerFn {
        layer_fn(|_call: Call| async { Ok(Value::Null) })
    }

    fn provenance(info: &MethodInfo) -> Vec<bool> {
        info.layers().iter().map(Layer::is_mixed_in).collect()
    }

    #[test]
    fn mixin_layers_go_below_own_layers() {
        let mut own = MethodInfo::new("User", "Hello", noop());
        own.extend(noop());
        let mixin = MethodInfo::new("Greeter", "Hello", noop());
        own.splice_mixin(&mixin);
        assert_eq!(provenance(&own), vec![true, false, false]);
    }

    #[test]
    fn newer_mixins_stack_above_older_ones() {
        let mut own = MethodInfo::new("User", "Hello", noop());
        let mut older = MethodInfo::new("Older", "Hello", noop());
        older.extend(noop());
        let newer = MethodInfo::new("Newer", "Hello", noop());
        own.splice_mixin(&older);
        own.splice_mixin(&newer);
        assert_eq!(own.depth(), 4);
        assert_eq!(provenance(&own), vec![true, true, true, false]);
        assert!(own.has_mixin_base());
    }

    #[test]
    fn copied_chain_is_marked_mixed_in() {
        let mut source = MethodInfo::new("Greeter", "Hello", noop());
        source.extend(noop());
        source.groups.insert("sales".to_owned());
        let copy = MethodInfo::mixed_into(&source, "User");
        assert_eq!(copy.model, "User");
        assert_eq!(provenance(&copy), vec![true, true]);
        assert!(copy.groups.contains("sales"));
    }
}
