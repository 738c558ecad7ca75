use std::collections::BTreeMap;

use anyhow::Result;
use tracegen::{
    Arg, CallKind, CallTarget, ModuleCtx, ModuleGenerator, TensorValue, TraceBuilder, TraceElem,
    Value, ValueId,
};

fn tensor(len: usize) -> Value {
    Value::Tensor(TensorValue::new(vec![len], vec![0.0; len]))
}

fn elem(
    context: Vec<ModuleCtx>,
    path: &[&str],
    target: CallTarget,
    kind: CallKind,
    args: Vec<Arg>,
    output: ValueId,
) -> TraceElem {
    TraceElem {
        context: context.into_iter().collect(),
        path: path.iter().map(|s| s.to_string()).collect(),
        target,
        kind,
        args,
        kwargs: BTreeMap::new(),
        output,
        module_fn_name: None,
    }
}

#[test]
fn preserved_module_then_primitive_call() -> Result<()> {
    let mut tb = TraceBuilder::new();
    let x = tb.value(tensor(4));
    let y = tb.value(tensor(4));
    let z = tb.value(tensor(4));
    let net = tb.module(tracegen::ModuleInfo::new("model.Net"));
    let a = tb.module(tracegen::ModuleInfo::new("nn.linear.Linear"));
    let b = tb.module(tracegen::ModuleInfo::new("custom.Gate"));
    tb.mark_input(x);
    tb.mark_output(z);

    let net_ctx = ModuleCtx::new(net, [x], z);
    let mut fc = elem(
        vec![net_ctx.clone(), ModuleCtx::new(a, [x], y)],
        &["fc"],
        CallTarget::Module(a),
        CallKind::Module,
        vec![Arg::Ref(x)],
        y,
    );
    fc.module_fn_name = Some("fc_fn".to_string());
    tb.push_elem(fc)?;
    let mut gate = elem(
        vec![net_ctx, ModuleCtx::new(b, [y], z)],
        &["gate"],
        CallTarget::Module(b),
        CallKind::Module,
        vec![Arg::Ref(y)],
        z,
    );
    gate.module_fn_name = Some("inner".to_string());
    tb.push_elem(gate)?;
    let trace = tb.finish();

    let model = ModuleGenerator::default().gen_model(&trace)?;
    assert_eq!(model.schedule.len(), 2);

    let first = &model.schedule[0];
    assert_eq!(first.kind, CallKind::Module);
    assert_eq!(first.target, CallTarget::Module(a));
    assert_eq!(first.args, vec![Arg::Ref(x)]);
    assert_eq!(first.output, y);

    let second = &model.schedule[1];
    assert_eq!(second.target, CallTarget::Module(b));
    assert_eq!(second.args, vec![Arg::Ref(y)]);
    assert_eq!(second.output, z);

    assert_eq!(model.inputs, vec![x]);
    assert_eq!(model.outputs, vec![z]);

    // The preserved module lands at its own path; the decomposed one attaches
    // under its call-site name.
    assert_eq!(model.root.submodule("fc").and_then(|n| n.module()), Some(a));
    assert_eq!(
        model.root.submodule("gate.inner").and_then(|n| n.module()),
        Some(b)
    );
    Ok(())
}

#[test]
fn identical_invocation_is_emitted_once() -> Result<()> {
    let mut tb = TraceBuilder::new();
    let x = tb.value(tensor(4));
    let y = tb.value(tensor(4));
    let net = tb.module(tracegen::ModuleInfo::new("model.Net"));
    let a = tb.module(tracegen::ModuleInfo::new("nn.linear.Linear"));
    tb.mark_input(x);
    tb.mark_output(y);

    let net_ctx = ModuleCtx::new(net, [x], y);
    for path in [&["fc"], &["fc2"]] {
        tb.push_elem(elem(
            vec![net_ctx.clone(), ModuleCtx::new(a, [x], y)],
            path.as_slice(),
            CallTarget::Module(a),
            CallKind::Module,
            vec![Arg::Ref(x)],
            y,
        ))?;
    }
    let trace = tb.finish();

    let model = ModuleGenerator::default().gen_model(&trace)?;
    assert_eq!(model.schedule.len(), 1);
    assert_eq!(model.schedule[0].target, CallTarget::Module(a));
    Ok(())
}

#[test]
fn second_invocation_with_new_output_is_independent() -> Result<()> {
    let mut tb = TraceBuilder::new();
    let x = tb.value(tensor(4));
    let y1 = tb.value(tensor(4));
    let y2 = tb.value(tensor(4));
    let net = tb.module(tracegen::ModuleInfo::new("model.Net"));
    let a = tb.module(tracegen::ModuleInfo::new("nn.linear.Linear"));
    tb.mark_input(x);
    tb.mark_output(y2);

    let net_ctx = ModuleCtx::new(net, [x], y2);
    tb.push_elem(elem(
        vec![net_ctx.clone(), ModuleCtx::new(a, [x], y1)],
        &["fc"],
        CallTarget::Module(a),
        CallKind::Module,
        vec![Arg::Ref(x)],
        y1,
    ))?;
    tb.push_elem(elem(
        vec![net_ctx, ModuleCtx::new(a, [y1], y2)],
        &["fc"],
        CallTarget::Module(a),
        CallKind::Module,
        vec![Arg::Ref(y1)],
        y2,
    ))?;
    let trace = tb.finish();

    let model = ModuleGenerator::default().gen_model(&trace)?;
    assert_eq!(model.schedule.len(), 2);
    assert_eq!(model.schedule[0].output, y1);
    assert_eq!(model.schedule[1].output, y2);
    assert_eq!(model.schedule[1].args, vec![Arg::Ref(y1)]);
    Ok(())
}

#[test]
fn blocklisted_container_is_decomposed() -> Result<()> {
    let mut tb = TraceBuilder::new();
    let x = tb.value(tensor(4));
    let z = tb.value(tensor(4));
    let net = tb.module(tracegen::ModuleInfo::new("model.Net"));
    // Matches the `nn.` allow prefix and the container blocklist; block wins.
    let seq = tb.module(tracegen::ModuleInfo::new("nn.container.Sequential"));
    tb.mark_input(x);
    tb.mark_output(z);

    tb.push_elem(elem(
        vec![ModuleCtx::new(net, [x], z), ModuleCtx::new(seq, [x], z)],
        &["body", "add"],
        CallTarget::Op("ops.add".to_string()),
        CallKind::Function,
        vec![Arg::Ref(x)],
        z,
    ))?;
    let trace = tb.finish();

    let model = ModuleGenerator::default().gen_model(&trace)?;
    assert_eq!(model.schedule.len(), 1);
    assert_eq!(model.schedule[0].kind, CallKind::Function);
    assert_eq!(
        model.schedule[0].target,
        CallTarget::Op("ops.add".to_string())
    );
    assert!(model.root.named_modules().is_empty());
    Ok(())
}

#[test]
fn outermost_eligible_ancestor_wins() -> Result<()> {
    let mut tb = TraceBuilder::new();
    let x = tb.value(tensor(4));
    let y = tb.value(tensor(4));
    let h = tb.value(tensor(4));
    let h2 = tb.value(tensor(4));
    let net = tb.module(tracegen::ModuleInfo::new("model.Net"));
    let outer = tb.module(tracegen::ModuleInfo::new("nn.block.Encoder"));
    let inner = tb.module(tracegen::ModuleInfo::new("nn.block.Mlp"));
    let leaf = tb.module(tracegen::ModuleInfo::new("custom.Gate"));
    tb.mark_input(x);
    tb.mark_output(y);

    let net_ctx = ModuleCtx::new(net, [x], y);
    let outer_ctx = ModuleCtx::new(outer, [x], y);
    let inner_ctx = ModuleCtx::new(inner, [x], h);
    let chain = vec![
        net_ctx.clone(),
        outer_ctx.clone(),
        inner_ctx.clone(),
        ModuleCtx::new(leaf, [x], h2),
    ];

    tb.push_elem(elem(
        chain.clone(),
        &["enc", "mlp", "gate", "mul"],
        CallTarget::Op("ops.mul".to_string()),
        CallKind::Function,
        vec![Arg::Ref(x)],
        h2,
    ))?;
    // Second op inside the already-preserved subtree, innermost not
    // allow-listed: re-emitted as a primitive, never as a second module call.
    tb.push_elem(elem(
        chain,
        &["enc", "mlp", "gate", "neg"],
        CallTarget::Op("ops.neg".to_string()),
        CallKind::Function,
        vec![Arg::Ref(x)],
        h2,
    ))?;
    // Inner module's own invocation: allow-listed but already captured by the
    // collapsed ancestor, so it is skipped entirely.
    tb.push_elem(elem(
        vec![net_ctx, outer_ctx, inner_ctx],
        &["enc", "mlp"],
        CallTarget::Module(inner),
        CallKind::Module,
        vec![Arg::Ref(x)],
        h,
    ))?;
    let trace = tb.finish();

    let model = ModuleGenerator::default().gen_model(&trace)?;
    assert_eq!(model.schedule.len(), 2);

    // Both `outer` and `inner` qualify; the outermost wins and the emitted
    // instruction carries the ancestor's declared wiring, not the leaf's.
    let first = &model.schedule[0];
    assert_eq!(first.kind, CallKind::Module);
    assert_eq!(first.target, CallTarget::Module(outer));
    assert_eq!(first.args, vec![Arg::Ref(x)]);
    assert_eq!(first.output, y);

    assert_eq!(model.schedule[1].kind, CallKind::Function);
    Ok(())
}

#[test]
fn script_module_is_preserved_whole() -> Result<()> {
    let mut tb = TraceBuilder::new();
    let x = tb.value(tensor(4));
    let z = tb.value(tensor(4));
    let net = tb.module(tracegen::ModuleInfo::new("model.Net"));
    let script = tb.module(tracegen::ModuleInfo::new("script.Blur"));
    tb.mark_input(x);
    tb.mark_output(z);

    tb.push_elem(elem(
        vec![ModuleCtx::new(net, [x], z)],
        &["blur"],
        CallTarget::Module(script),
        CallKind::ScriptModule,
        vec![Arg::Ref(x)],
        z,
    ))?;
    let trace = tb.finish();

    let model = ModuleGenerator::default().gen_model(&trace)?;
    assert_eq!(model.schedule.len(), 1);
    let inst = &model.schedule[0];
    assert_eq!(inst.kind, CallKind::Module);
    assert_eq!(inst.target, CallTarget::Module(script));
    assert_eq!(inst.args, vec![Arg::Ref(x)]);
    assert_eq!(inst.output, z);
    assert_eq!(
        model.root.submodule("blur").and_then(|n| n.module()),
        Some(script)
    );
    Ok(())
}

#[test]
fn schedule_renders_one_line_per_instruction() -> Result<()> {
    let mut tb = TraceBuilder::new();
    let x = tb.value(tensor(4));
    let z = tb.value(tensor(4));
    let net = tb.module(tracegen::ModuleInfo::new("model.Net"));
    tb.mark_input(x);
    tb.mark_output(z);
    tb.push_elem(elem(
        vec![ModuleCtx::new(net, [x], z)],
        &["relu"],
        CallTarget::Op("ops.relu".to_string()),
        CallKind::Function,
        vec![Arg::Ref(x)],
        z,
    ))?;
    let trace = tb.finish();

    let model = ModuleGenerator::default().gen_model(&trace)?;
    let rendered = model.render_schedule();
    assert_eq!(rendered.lines().count(), 1);
    assert!(rendered.contains("call-fn ops.relu"));
    assert!(rendered.contains("@ relu"));
    Ok(())
}
