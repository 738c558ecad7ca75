//! Scheduled instructions emitted by the generator.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::trace::{Arg, CallKind, CallTarget, ValueId};

/// One operation of the generated schedule.
///
/// Arguments start out as reference leaves copied from the trace; constant
/// resolution rewrites them once, after which the instruction is frozen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// Output slot this instruction fills.
    pub output: ValueId,
    pub target: CallTarget,
    pub kind: CallKind,
    pub args: Vec<Arg>,
    pub kwargs: BTreeMap<String, Arg>,
    /// Dotted origin path in the source hierarchy, kept for diagnostics.
    pub path: String,
}

impl Instruction {
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

fn kind_mnemonic(kind: CallKind) -> &'static str {
    match kind {
        CallKind::Module => "call-module",
        CallKind::Function => "call-fn",
        CallKind::TensorMethod => "tensor-method",
        CallKind::TensorAttribute => "tensor-attr",
        CallKind::ScriptModule => "call-script",
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} = {} {}(",
            self.output,
            kind_mnemonic(self.kind),
            self.target
        )?;
        let mut first = true;
        for arg in &self.args {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
            first = false;
        }
        for (name, arg) in &self.kwargs {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{name}={arg}")?;
            first = false;
        }
        write!(f, ")")?;
        if !self.path.is_empty() {
            write!(f, " @ {}", self.path)?;
        }
        Ok(())
    }
}
