//! Schedule generation: rewrites a linear trace into a flattened module tree
//! plus an ordered instruction schedule.
//!
//! For every trace element the generator chooses exactly one disposition:
//! collapse into an already-eligible ancestor module, preserve the enclosing
//! module as-is, skip because the invocation was already captured, or
//! synthesize a primitive call. A post-pass then resolves free references
//! into constants and parameters.

mod consts;
mod filter;

pub use filter::{default_allowlist, default_blocklist, ListEntry};

use thiserror::Error;

use crate::instruction::Instruction;
use crate::module::{GeneratedModel, ModuleNode};
use crate::trace::{Arg, CallKind, CallTarget, ModuleCtx, Trace, TraceElem, ValueId};

use filter::ModuleFilter;

/// Fatal generation failures. Everything else (no eligible ancestor, no such
/// submodule) flows through `Option` and normal control flow.
#[derive(Debug, Error, PartialEq)]
pub enum GenError {
    /// A free reference has no recorded runtime value; the trace is
    /// malformed or incompletely captured.
    #[error("value {0} is consumed as a constant but has no recorded runtime value")]
    UnresolvedConstant(ValueId),
    /// A free reference resolved to a tensor with more than one element.
    #[error("value {value} is consumed as a constant but holds a tensor with {elems} elements; only scalar tensors materialize")]
    NonScalarConstant { value: ValueId, elems: usize },
    /// A disposition branch could not produce an instruction; this is a
    /// defect in the trace or the generator, never user input.
    #[error("internal dispatch failure: {0}")]
    InternalDispatch(String),
}

/// Rewrites traces into generated models according to configured allow and
/// block lists.
///
/// Generation state is created fresh inside every [`gen_model`] call, so a
/// single generator can serve repeated invocations independently.
///
/// [`gen_model`]: ModuleGenerator::gen_model
#[derive(Debug, Clone)]
pub struct ModuleGenerator {
    filter: ModuleFilter,
}

impl Default for ModuleGenerator {
    fn default() -> Self {
        ModuleGenerator::new(default_allowlist(), default_blocklist())
    }
}

impl ModuleGenerator {
    pub fn new(allowlist: Vec<ListEntry>, blocklist: Vec<ListEntry>) -> Self {
        ModuleGenerator {
            filter: ModuleFilter::new(allowlist, blocklist),
        }
    }

    /// Runs the full generation pass over `trace`.
    pub fn gen_model(&self, trace: &Trace) -> Result<GeneratedModel, GenError> {
        let mut state = GenState::default();
        let mut root = ModuleNode::default();
        let mut schedule = self.build_schedule(trace, &mut state, &mut root)?;
        let resolved = consts::collect(&schedule, trace)?;
        consts::apply(&mut schedule, &resolved);
        Ok(GeneratedModel {
            root,
            schedule,
            inputs: trace.inputs().to_vec(),
            outputs: trace.outputs().to_vec(),
        })
    }

    fn build_schedule(
        &self,
        trace: &Trace,
        state: &mut GenState,
        root: &mut ModuleNode,
    ) -> Result<Vec<Instruction>, GenError> {
        let mut schedule = Vec::with_capacity(trace.elems().len());
        for elem in trace.elems() {
            let innermost = elem.innermost().ok_or_else(|| {
                GenError::InternalDispatch(format!(
                    "trace element at `{}` has no enclosing module context",
                    elem.dotted_path()
                ))
            })?;
            let ancestor = self.filter.eligible_ancestor(trace, elem);
            let direct = trace
                .module(innermost.module)
                .map(|info| self.filter.preserve_as_is(info))
                .unwrap_or(false);
            let duplicate = state.already_generated(innermost, elem);

            match (ancestor, duplicate) {
                // The whole ancestor subtree collapses into one instruction.
                (Some(ancestor), false) => {
                    state.record(ancestor);
                    schedule.push(module_instruction(ancestor, elem, root)?);
                }
                (None, false) if direct => {
                    state.record(innermost);
                    schedule.push(module_instruction(innermost, elem, root)?);
                }
                // Already captured by an earlier ancestor or direct emission.
                _ if direct => {}
                _ => schedule.push(self.primitive_instruction(elem, innermost, root)?),
            }
        }
        Ok(schedule)
    }

    fn primitive_instruction(
        &self,
        elem: &TraceElem,
        innermost: &ModuleCtx,
        root: &mut ModuleNode,
    ) -> Result<Instruction, GenError> {
        match elem.kind {
            CallKind::Module => module_fn_instruction(elem, root),
            CallKind::Function | CallKind::TensorMethod | CallKind::TensorAttribute => {
                Ok(call_instruction(elem))
            }
            // Script modules are opaque units; preserve them whole.
            CallKind::ScriptModule => {
                let CallTarget::Module(module) = &elem.target else {
                    return Err(GenError::InternalDispatch(format!(
                        "script-module element at `{}` targets `{}`",
                        elem.dotted_path(),
                        elem.target
                    )));
                };
                let ctx = ModuleCtx {
                    module: *module,
                    inputs: innermost.inputs.clone(),
                    output: innermost.output,
                };
                module_instruction(&ctx, elem, root)
            }
        }
    }
}

/// Preserves `ctx`'s module as-is: attaches it into the output tree at the
/// element's name path and emits a module call over the module's declared
/// inputs and output.
fn module_instruction(
    ctx: &ModuleCtx,
    elem: &TraceElem,
    root: &mut ModuleNode,
) -> Result<Instruction, GenError> {
    let (name, prefixes) = elem.path.split_last().ok_or_else(|| {
        GenError::InternalDispatch(format!(
            "module element targeting `module#{}` has an empty name path",
            ctx.module.0
        ))
    })?;
    root.attach(prefixes, name, ctx.module);
    Ok(Instruction {
        output: ctx.output,
        target: CallTarget::Module(ctx.module),
        kind: CallKind::Module,
        args: ctx.inputs.iter().copied().map(Arg::Ref).collect(),
        kwargs: Default::default(),
        path: elem.dotted_path(),
    })
}

/// A module invoked through a function wrapper: attach it under its own name,
/// then emit a plain call, since the wrapping call defines the argument list.
fn module_fn_instruction(elem: &TraceElem, root: &mut ModuleNode) -> Result<Instruction, GenError> {
    let CallTarget::Module(module) = &elem.target else {
        return Err(GenError::InternalDispatch(format!(
            "module-call element at `{}` targets `{}`",
            elem.dotted_path(),
            elem.target
        )));
    };
    let name = elem.module_fn_name.as_deref().ok_or_else(|| {
        GenError::InternalDispatch(format!(
            "module-call element at `{}` carries no attachment name",
            elem.dotted_path()
        ))
    })?;
    root.attach(&elem.path, name, *module);
    Ok(call_instruction(elem))
}

/// Pass-through call: args and kwargs are copied verbatim from the trace and
/// only touched later by constant resolution.
fn call_instruction(elem: &TraceElem) -> Instruction {
    Instruction {
        output: elem.output,
        target: elem.target.clone(),
        kind: elem.kind,
        args: elem.args.clone(),
        kwargs: elem.kwargs.clone(),
        path: elem.dotted_path(),
    }
}

/// Contexts already preserved as-is during the current generation pass.
#[derive(Debug, Default)]
struct GenState {
    generated: Vec<ModuleCtx>,
}

impl GenState {
    fn record(&mut self, ctx: &ModuleCtx) {
        self.generated.push(ctx.clone());
    }

    /// True when this exact invocation was already emitted, or when any
    /// proper ancestor invocation on the element's chain was preserved as-is.
    /// Comparison is by handle, never by value: a second invocation of the
    /// same module with different wiring is an independent context.
    fn already_generated(&self, innermost: &ModuleCtx, elem: &TraceElem) -> bool {
        let same_invocation = self
            .generated
            .iter()
            .any(|done| done.same_invocation(innermost));
        let ancestor_preserved = elem.ancestors().iter().any(|ctx| {
            self.generated
                .iter()
                .any(|done| done.same_invocation(ctx))
        });
        same_invocation || ancestor_preserved
    }
}
