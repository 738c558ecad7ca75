//! Flattens a traced model execution into a generated module tree and an
//! ordered instruction schedule.
//!
//! The tracer (external to this crate) records a linear [`Trace`] of
//! operations. [`ModuleGenerator::gen_model`] walks it once, deciding per
//! element whether to re-emit the enclosing module as-is or to synthesize a
//! direct call, then resolves every free reference into a constant or a
//! parameter. The resulting [`GeneratedModel`] is handed to an external
//! executor.

pub mod generator;
pub mod instruction;
pub mod module;
pub mod trace;

pub use generator::{default_allowlist, default_blocklist, GenError, ListEntry, ModuleGenerator};
pub use instruction::Instruction;
pub use module::{GeneratedModel, ModuleInfo, ModuleNode};
pub use trace::{
    Arg, CallKind, CallTarget, ModuleCtx, ModuleId, TensorValue, Trace, TraceBuilder, TraceElem,
    Value, ValueId,
};
