//! Trace data model produced by the tracer and consumed by the generator.
//!
//! Every runtime value and every traced module lives in an arena owned by the
//! [`Trace`]; the rest of the crate addresses them through [`ValueId`] and
//! [`ModuleId`] handles. Deduplication and constant resolution compare
//! handles, never values, so two structurally equal values with distinct ids
//! stay distinct.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{bail, ensure, Result};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::module::ModuleInfo;

/// Stable identifier for a runtime value recorded during tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Stable identifier for a module instance registered during tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub u32);

/// Dense numeric payload captured for a traced tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorValue {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl TensorValue {
    pub fn scalar(value: f64) -> Self {
        TensorValue {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Self {
        TensorValue { shape, data }
    }

    pub fn elem_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Returns the single element of a scalar tensor, `None` otherwise.
    pub fn item(&self) -> Option<f64> {
        if self.elem_count() == 1 {
            self.data.first().copied()
        } else {
            None
        }
    }
}

/// Runtime value captured by the tracer for one [`ValueId`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Tensor produced or consumed during the traced forward pass.
    Tensor(TensorValue),
    /// Learnable parameter tensor owned by some traced module.
    Parameter(TensorValue),
    Float(f64),
    Int(i64),
    Bool(bool),
    Str(String),
}

impl Value {
    pub fn is_parameter(&self) -> bool {
        matches!(self, Value::Parameter(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Tensor(t) => write!(f, "tensor<{:?}>", t.shape),
            Value::Parameter(t) => write!(f, "param<{:?}>", t.shape),
            Value::Float(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v:?}"),
        }
    }
}

/// How a traced entity was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallKind {
    /// A module invoked through its forward entry point.
    Module,
    /// A free function.
    Function,
    /// A method called on a tensor.
    TensorMethod,
    /// An attribute read off a tensor.
    TensorAttribute,
    /// An opaque, self-contained scripted module.
    ScriptModule,
}

/// The entity a trace element or instruction invokes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallTarget {
    /// A traced module addressed by arena handle.
    Module(ModuleId),
    /// A function, method, or attribute addressed by symbol.
    Op(String),
}

impl fmt::Display for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallTarget::Module(id) => write!(f, "module#{}", id.0),
            CallTarget::Op(symbol) => write!(f, "{symbol}"),
        }
    }
}

/// One argument slot of a traced call.
///
/// The tracer records [`Arg::Ref`] leaves; constant resolution rewrites leaves
/// to [`Arg::Const`] or [`Arg::Param`] while preserving container shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Arg {
    /// Reference to a traced value.
    Ref(ValueId),
    /// Materialized constant.
    Const(Value),
    /// Resolved learnable parameter, kept as an arena handle.
    Param(ValueId),
    List(Vec<Arg>),
    Tuple(Vec<Arg>),
    Map(BTreeMap<String, Arg>),
}

impl Arg {
    /// Visits every reference leaf in the argument tree.
    pub fn for_each_ref(&self, visit: &mut impl FnMut(ValueId)) {
        match self {
            Arg::Ref(id) => visit(*id),
            Arg::Const(_) | Arg::Param(_) => {}
            Arg::List(items) | Arg::Tuple(items) => {
                for item in items {
                    item.for_each_ref(visit);
                }
            }
            Arg::Map(entries) => {
                for item in entries.values() {
                    item.for_each_ref(visit);
                }
            }
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Ref(id) => write!(f, "{id}"),
            Arg::Const(value) => write!(f, "{value}"),
            Arg::Param(id) => write!(f, "param({id})"),
            Arg::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Arg::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Arg::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, item)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {item}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// One enclosing-module invocation on a trace element's context chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleCtx {
    pub module: ModuleId,
    /// Inputs consumed by this module invocation, in declaration order.
    pub inputs: SmallVec<[ValueId; 4]>,
    /// Output produced by this module invocation.
    pub output: ValueId,
}

impl ModuleCtx {
    pub fn new(
        module: ModuleId,
        inputs: impl IntoIterator<Item = ValueId>,
        output: ValueId,
    ) -> Self {
        ModuleCtx {
            module,
            inputs: inputs.into_iter().collect(),
            output,
        }
    }

    /// True when both contexts denote the same invocation: same module handle,
    /// element-wise identical input handles, same output handle.
    pub fn same_invocation(&self, other: &ModuleCtx) -> bool {
        self.module == other.module && self.output == other.output && self.inputs == other.inputs
    }
}

/// One traced operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceElem {
    /// Enclosing module invocations, outermost first, innermost last.
    pub context: SmallVec<[ModuleCtx; 4]>,
    /// Name path locating the operation in the source hierarchy; the last
    /// segment names the innermost module.
    pub path: Vec<String>,
    pub target: CallTarget,
    pub kind: CallKind,
    pub args: Vec<Arg>,
    pub kwargs: BTreeMap<String, Arg>,
    /// Output of the traced call itself.
    pub output: ValueId,
    /// Name under which a module invoked through a function wrapper attaches
    /// into the generated tree.
    pub module_fn_name: Option<String>,
}

impl TraceElem {
    /// Innermost enclosing module invocation.
    pub fn innermost(&self) -> Option<&ModuleCtx> {
        self.context.last()
    }

    /// Proper ancestors of the innermost context, outermost first.
    pub fn ancestors(&self) -> &[ModuleCtx] {
        let len = self.context.len();
        &self.context[..len.saturating_sub(1)]
    }

    pub fn dotted_path(&self) -> String {
        self.path.join(".")
    }

    /// Visits every reference leaf across positional and keyword arguments.
    pub fn for_each_arg_ref(&self, visit: &mut impl FnMut(ValueId)) {
        for arg in &self.args {
            arg.for_each_ref(visit);
        }
        for arg in self.kwargs.values() {
            arg.for_each_ref(visit);
        }
    }
}

/// Ordered recording of one forward execution: trace elements plus the value
/// and module arenas they refer into, and the top-level model boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trace {
    elems: Vec<TraceElem>,
    values: Vec<Option<Value>>,
    modules: Vec<ModuleInfo>,
    inputs: Vec<ValueId>,
    outputs: Vec<ValueId>,
}

impl Trace {
    pub fn elems(&self) -> &[TraceElem] {
        &self.elems
    }

    /// Underlying runtime value for a reference, when the tracer captured one.
    pub fn value(&self, id: ValueId) -> Option<&Value> {
        self.values.get(id.0 as usize).and_then(|slot| slot.as_ref())
    }

    pub fn module(&self, id: ModuleId) -> Option<&ModuleInfo> {
        self.modules.get(id.0 as usize)
    }

    /// Top-level model input references.
    pub fn inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    /// Top-level model output references.
    pub fn outputs(&self) -> &[ValueId] {
        &self.outputs
    }
}

/// Staging API for assembling a [`Trace`].
///
/// Values and modules are interned first, then elements referring to them are
/// pushed in execution order. Pushing validates handle ranges and the
/// structural invariants the generator relies on.
#[derive(Debug, Default)]
pub struct TraceBuilder {
    trace: Trace,
}

impl TraceBuilder {
    pub fn new() -> Self {
        TraceBuilder::default()
    }

    /// Interns a captured runtime value, returning its handle.
    pub fn value(&mut self, value: Value) -> ValueId {
        let id = ValueId(self.trace.values.len() as u32);
        self.trace.values.push(Some(value));
        id
    }

    /// Allocates a reference the tracer could not capture a value for.
    pub fn opaque_value(&mut self) -> ValueId {
        let id = ValueId(self.trace.values.len() as u32);
        self.trace.values.push(None);
        id
    }

    /// Registers a traced module instance, returning its handle.
    pub fn module(&mut self, info: ModuleInfo) -> ModuleId {
        let id = ModuleId(self.trace.modules.len() as u32);
        self.trace.modules.push(info);
        id
    }

    pub fn mark_input(&mut self, id: ValueId) {
        self.trace.inputs.push(id);
    }

    pub fn mark_output(&mut self, id: ValueId) {
        self.trace.outputs.push(id);
    }

    /// Appends a trace element after validating its handles and shape.
    pub fn push_elem(&mut self, elem: TraceElem) -> Result<()> {
        ensure!(
            !elem.context.is_empty(),
            "trace element needs at least one enclosing module context"
        );
        ensure!(
            !elem.path.is_empty(),
            "trace element needs a non-empty name path"
        );
        for ctx in &elem.context {
            self.check_module(ctx.module)?;
            for input in &ctx.inputs {
                self.check_value(*input)?;
            }
            self.check_value(ctx.output)?;
        }
        match (elem.kind, &elem.target) {
            (CallKind::Module | CallKind::ScriptModule, CallTarget::Module(module)) => {
                self.check_module(*module)?;
            }
            (CallKind::Module | CallKind::ScriptModule, CallTarget::Op(symbol)) => {
                bail!("{:?} call must target a module, got op `{symbol}`", elem.kind);
            }
            (_, CallTarget::Module(module)) => {
                self.check_module(*module)?;
            }
            (_, CallTarget::Op(_)) => {}
        }
        let mut arg_check = Ok(());
        elem.for_each_arg_ref(&mut |id| {
            if arg_check.is_ok() {
                arg_check = self.check_value(id);
            }
        });
        arg_check?;
        self.check_value(elem.output)?;
        self.trace.elems.push(elem);
        Ok(())
    }

    pub fn finish(self) -> Trace {
        self.trace
    }

    fn check_value(&self, id: ValueId) -> Result<()> {
        ensure!(
            (id.0 as usize) < self.trace.values.len(),
            "value handle %{} is out of range",
            id.0
        );
        Ok(())
    }

    fn check_module(&self, id: ModuleId) -> Result<()> {
        ensure!(
            (id.0 as usize) < self.trace.modules.len(),
            "module handle #{} is out of range",
            id.0
        );
        Ok(())
    }
}
