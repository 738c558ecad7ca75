//! Constant and parameter resolution over a completed raw schedule.
//!
//! A reference consumed somewhere in the schedule but never produced by an
//! instruction and never declared as a top-level model input is a free
//! reference: either a learnable parameter or a closed-over constant. This
//! pass partitions the free references, materializes scalar constants, and
//! rewrites every instruction's argument trees in place.

use std::collections::{BTreeMap, BTreeSet};

use crate::instruction::Instruction;
use crate::trace::{Arg, Trace, Value, ValueId};

use super::GenError;

/// Resolution maps built from the raw schedule; consumed by [`apply`] and
/// discarded afterwards.
pub(super) struct Resolved {
    consts: BTreeMap<ValueId, Value>,
    params: BTreeSet<ValueId>,
}

pub(super) fn collect(schedule: &[Instruction], trace: &Trace) -> Result<Resolved, GenError> {
    let mut produced = BTreeSet::new();
    for inst in schedule {
        produced.insert(inst.output);
    }
    let mut consumed = BTreeSet::new();
    for inst in schedule {
        inst.for_each_arg_ref(&mut |id| {
            consumed.insert(id);
        });
    }
    let model_inputs: BTreeSet<ValueId> = trace.inputs().iter().copied().collect();

    let mut consts = BTreeMap::new();
    let mut params = BTreeSet::new();
    for id in consumed {
        if model_inputs.contains(&id) || produced.contains(&id) {
            continue;
        }
        let value = trace.value(id).ok_or(GenError::UnresolvedConstant(id))?;
        match value {
            Value::Parameter(_) => {
                params.insert(id);
            }
            Value::Tensor(tensor) => {
                let scalar = tensor.item().ok_or(GenError::NonScalarConstant {
                    value: id,
                    elems: tensor.elem_count(),
                })?;
                consts.insert(id, Value::Float(scalar));
            }
            other => {
                consts.insert(id, other.clone());
            }
        }
    }
    Ok(Resolved { consts, params })
}

/// Rewrites every instruction's arguments, substituting resolved leaves.
/// References matching neither map are genuine wiring and stay untouched.
pub(super) fn apply(schedule: &mut [Instruction], resolved: &Resolved) {
    for inst in schedule {
        let args = inst.args.iter().map(|arg| solve(arg, resolved)).collect();
        let kwargs = inst
            .kwargs
            .iter()
            .map(|(name, arg)| (name.clone(), solve(arg, resolved)))
            .collect();
        inst.args = args;
        inst.kwargs = kwargs;
    }
}

fn solve(arg: &Arg, resolved: &Resolved) -> Arg {
    match arg {
        Arg::List(items) => Arg::List(items.iter().map(|item| solve(item, resolved)).collect()),
        Arg::Tuple(items) => Arg::Tuple(items.iter().map(|item| solve(item, resolved)).collect()),
        Arg::Map(entries) => Arg::Map(
            entries
                .iter()
                .map(|(key, item)| (key.clone(), solve(item, resolved)))
                .collect(),
        ),
        Arg::Ref(id) => {
            if let Some(value) = resolved.consts.get(id) {
                Arg::Const(value.clone())
            } else if resolved.params.contains(id) {
                Arg::Param(*id)
            } else {
                Arg::Ref(*id)
            }
        }
        other => other.clone(),
    }
}
