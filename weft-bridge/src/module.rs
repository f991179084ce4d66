//! Native module registration table.
//!
//! Modules are declared once at startup through [`ModuleBuilder`]; the
//! resulting [`ModuleRegistry`] is immutable and shared by reference. Module
//! ids are registration indexes and method ids are declaration indexes, so
//! a call descriptor resolves with two vector lookups.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use weft_api::{CallDescriptor, CallbackId, MethodId, ModuleId, PropMap, ScriptCall, ScriptEvent, type_name};

use crate::{BridgeError, CallbackTracker, Callback, CancellationRegistry, Promise, ScriptSink};

/// Fire-and-forget method.
pub type MethodHandler = Arc<dyn Fn(&CallContext<'_>, &[Value]) -> anyhow::Result<()> + Send + Sync>;

/// Promise-returning method. An `Err` rejects the promise if still unsettled.
pub type PromiseHandler =
    Arc<dyn Fn(&CallContext<'_>, &[Value], Promise) -> anyhow::Result<()> + Send + Sync>;

/// Synchronous method returning a value directly to the caller.
pub type SyncHandler = Arc<dyn Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync>;

/// Hook run on the native-module queue after every dispatched batch.
pub type BatchCompleteHook = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Bool,
    Number,
    String,
    Array,
    Object,
    /// Script callback id.
    Callback,
    Any,
}

/// Declared type of one method parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    pub kind: ParamKind,
    pub nullable: bool,
}

impl Param {
    const fn of(kind: ParamKind) -> Self {
        Self {
            kind,
            nullable: false,
        }
    }

    pub const fn bool() -> Self {
        Self::of(ParamKind::Bool)
    }

    pub const fn number() -> Self {
        Self::of(ParamKind::Number)
    }

    pub const fn string() -> Self {
        Self::of(ParamKind::String)
    }

    pub const fn array() -> Self {
        Self::of(ParamKind::Array)
    }

    pub const fn object() -> Self {
        Self::of(ParamKind::Object)
    }

    pub const fn callback() -> Self {
        Self::of(ParamKind::Callback)
    }

    pub const fn any() -> Self {
        Self::of(ParamKind::Any)
    }

    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    fn check(&self, value: &Value) -> Result<(), String> {
        if value.is_null() {
            return if self.nullable {
                Ok(())
            } else {
                Err("expected a value, got null".to_string())
            };
        }
        let ok = match self.kind {
            ParamKind::Bool => value.is_boolean(),
            ParamKind::Number => value.is_number(),
            ParamKind::String => value.is_string(),
            ParamKind::Array => value.is_array(),
            ParamKind::Object => value.is_object(),
            ParamKind::Callback => value.is_u64(),
            ParamKind::Any => true,
        };
        if ok {
            Ok(())
        } else {
            Err(format!("expected {:?}, got {}", self.kind, type_name(value)))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Async,
    Promise,
    Sync,
}

#[derive(Clone)]
pub(crate) enum Handler {
    Async(MethodHandler),
    Promise(PromiseHandler),
    Sync(SyncHandler),
}

pub struct Method {
    name: String,
    params: Vec<Param>,
    pub(crate) handler: Handler,
}

impl Method {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn kind(&self) -> MethodKind {
        match self.handler {
            Handler::Async(_) => MethodKind::Async,
            Handler::Promise(_) => MethodKind::Promise,
            Handler::Sync(_) => MethodKind::Sync,
        }
    }

    /// Number of arguments the script side sends, including the
    /// resolve/reject ids of promise methods.
    pub fn wire_arity(&self) -> usize {
        match self.kind() {
            MethodKind::Promise => self.params.len() + 2,
            MethodKind::Async | MethodKind::Sync => self.params.len(),
        }
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

pub struct NativeModule {
    name: String,
    constants: PropMap,
    methods: Vec<Method>,
    batch_hooks: Vec<BatchCompleteHook>,
}

impl NativeModule {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn constants(&self) -> &PropMap {
        &self.constants
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn method_id(&self, name: &str) -> Option<MethodId> {
        self.methods
            .iter()
            .position(|m| m.name == name)
            .map(|index| MethodId(index as u32))
    }
}

impl fmt::Debug for NativeModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeModule")
            .field("name", &self.name)
            .field("constants", &self.constants)
            .field("methods", &self.methods)
            .field("batch_hooks", &self.batch_hooks.len())
            .finish()
    }
}

/// Declares one native module.
pub struct ModuleBuilder {
    module: NativeModule,
}

impl ModuleBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            module: NativeModule {
                name: name.into(),
                constants: PropMap::new(),
                methods: Vec::new(),
                batch_hooks: Vec::new(),
            },
        }
    }

    pub fn constant(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.module.constants.insert(key.into(), value.into());
        self
    }

    pub fn method<F>(self, name: &str, params: &[Param], handler: F) -> Self
    where
        F: Fn(&CallContext<'_>, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.push(name, params, Handler::Async(Arc::new(handler)))
    }

    pub fn promise_method<F>(self, name: &str, params: &[Param], handler: F) -> Self
    where
        F: Fn(&CallContext<'_>, &[Value], Promise) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.push(name, params, Handler::Promise(Arc::new(handler)))
    }

    pub fn sync_method<F>(self, name: &str, params: &[Param], handler: F) -> Self
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.push(name, params, Handler::Sync(Arc::new(handler)))
    }

    pub fn on_batch_complete<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.module.batch_hooks.push(Arc::new(hook));
        self
    }

    fn push(mut self, name: &str, params: &[Param], handler: Handler) -> Self {
        self.module.methods.push(Method {
            name: name.to_string(),
            params: params.to_vec(),
            handler,
        });
        self
    }

    /// Finish the declaration, rejecting duplicate method names.
    pub fn build(self) -> Result<NativeModule, BridgeError> {
        let mut seen = HashSet::new();
        for method in &self.module.methods {
            if !seen.insert(method.name.as_str()) {
                return Err(BridgeError::DuplicateMethod {
                    module: self.module.name.clone(),
                    method: method.name.clone(),
                });
            }
        }
        Ok(self.module)
    }
}

/// Immutable table of every registered module.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<NativeModule>,
    by_name: HashMap<String, ModuleId>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: NativeModule) -> Result<ModuleId, BridgeError> {
        if self.by_name.contains_key(module.name()) {
            return Err(BridgeError::DuplicateModule(module.name().to_string()));
        }
        let id = ModuleId(self.modules.len() as u32);
        tracing::debug!(module = %module.name(), %id, methods = module.methods.len(), "registered native module");
        self.by_name.insert(module.name().to_string(), id);
        self.modules.push(module);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn module_id(&self, name: &str) -> Option<ModuleId> {
        self.by_name.get(name).copied()
    }

    pub fn module(&self, id: ModuleId) -> Result<&NativeModule, BridgeError> {
        self.modules
            .get(id.0 as usize)
            .ok_or(BridgeError::UnknownModule(id))
    }

    pub fn method(&self, module_id: ModuleId, method_id: MethodId) -> Result<(&NativeModule, &Method), BridgeError> {
        let module = self.module(module_id)?;
        let method = module
            .methods
            .get(method_id.0 as usize)
            .ok_or_else(|| BridgeError::UnknownMethod {
                module: module.name.clone(),
                method: method_id,
            })?;
        Ok((module, method))
    }

    /// Resolve a descriptor and check its arguments against the declaration.
    pub fn validate(&self, call: &CallDescriptor) -> Result<(&NativeModule, &Method), BridgeError> {
        let (module, method) = self.method(call.module_id, call.method_id)?;
        check_args(module, method, &call.args)?;
        Ok((module, method))
    }

    /// Startup configuration surfaced to the script side:
    /// `[[name, constants, [methods], [promise ids], [sync ids]], ...]`.
    pub fn module_descriptions(&self) -> Value {
        let described = self
            .modules
            .iter()
            .map(|module| {
                let names = module.methods.iter().map(|m| Value::from(m.name.as_str())).collect();
                let ids_of = |kind| {
                    module
                        .methods
                        .iter()
                        .enumerate()
                        .filter(|(_, m)| m.kind() == kind)
                        .map(|(index, _)| Value::from(index))
                        .collect::<Vec<_>>()
                };
                let constants = module
                    .constants
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<serde_json::Map<_, _>>();
                Value::Array(vec![
                    Value::from(module.name.as_str()),
                    Value::Object(constants),
                    Value::Array(names),
                    Value::Array(ids_of(MethodKind::Promise)),
                    Value::Array(ids_of(MethodKind::Sync)),
                ])
            })
            .collect();
        Value::Array(described)
    }

    /// Run every module's batch-complete hooks. Failures are returned with
    /// the module name so the caller can report them.
    pub fn run_batch_complete(&self) -> Vec<(&str, anyhow::Error)> {
        let mut failures = Vec::new();
        for module in &self.modules {
            for hook in &module.batch_hooks {
                if let Err(err) = hook() {
                    failures.push((module.name(), err));
                }
            }
        }
        failures
    }
}

pub(crate) fn check_args(module: &NativeModule, method: &Method, args: &[Value]) -> Result<(), BridgeError> {
    let expected = method.wire_arity();
    if args.len() != expected {
        return Err(BridgeError::ArityMismatch {
            module: module.name.clone(),
            method: method.name.clone(),
            expected,
            actual: args.len(),
        });
    }
    let trailing = [Param::callback(), Param::callback()];
    let extra: &[Param] = match method.kind() {
        MethodKind::Promise => &trailing,
        MethodKind::Async | MethodKind::Sync => &[],
    };
    let declared = method.params.iter().chain(extra);
    for (index, (param, value)) in declared.zip(args).enumerate() {
        param.check(value).map_err(|reason| BridgeError::InvalidArgument {
            module: module.name.clone(),
            method: method.name.clone(),
            index,
            reason,
        })?;
    }
    Ok(())
}

/// What a native handler can reach while it runs.
pub struct CallContext<'a> {
    pub module: &'a str,
    pub method: &'a str,
    sink: &'a Arc<dyn ScriptSink>,
    callbacks: &'a Arc<CallbackTracker>,
    cancellations: &'a Arc<CancellationRegistry<String>>,
}

impl<'a> CallContext<'a> {
    pub(crate) fn new(
        module: &'a str,
        method: &'a str,
        sink: &'a Arc<dyn ScriptSink>,
        callbacks: &'a Arc<CallbackTracker>,
        cancellations: &'a Arc<CancellationRegistry<String>>,
    ) -> Self {
        Self {
            module,
            method,
            sink,
            callbacks,
            cancellations,
        }
    }

    /// Bind a callback-typed argument.
    pub fn callback(&self, arg: &Value) -> Result<Callback, BridgeError> {
        let id = arg.as_u64().ok_or_else(|| BridgeError::InvalidArgument {
            module: self.module.to_string(),
            method: self.method.to_string(),
            index: 0,
            reason: format!("expected a callback id, got {}", type_name(arg)),
        })?;
        self.callbacks.callback(self.sink.clone(), CallbackId(id))
    }

    /// Queue a call to a script module function.
    pub fn call_script(&self, module: &str, method: &str, args: Vec<Value>) {
        self.sink.push(ScriptCall::CallFunction {
            module: module.to_string(),
            method: method.to_string(),
            args,
        });
    }

    /// Queue an event for the script-side event emitter.
    pub fn emit(&self, event: ScriptEvent) {
        self.sink.push(event.into_script_call());
    }

    /// Registry for cancelling long-running work started by this bridge.
    pub fn cancellations(&self) -> &Arc<CancellationRegistry<String>> {
        self.cancellations
    }

    pub fn sink(&self) -> Arc<dyn ScriptSink> {
        self.sink.clone()
    }
}
