use loamc_rvsdg::{
    DeltaNode, GammaNode, Graph, LambdaNode, MatchOperation, NodeId, Output, PhiNode, RegionId,
    ThetaNode,
};
use loamc_tac::{
    BranchOperation, Cfg, CfgNodeId, IpNode, Module, SsaPhiOperation, Tac, Variable,
};
use rustc_hash::FxHashMap;

use crate::BridgeError;

type ValueMap = FxHashMap<Output, Variable>;

/// Lower an optimized graph back into a TAC module.
///
/// Every root-region λ (free-standing or φ-bound) becomes a function whose
/// body is a structured, SSA-form CFG: γ nodes lower to a branch with
/// per-arm blocks joined through SSA φs, θ nodes to a tail-controlled loop
/// with header φs and a repeat branch.
pub fn destruct(graph: &Graph) -> Result<Module, BridgeError> {
    let mut module = Module::new();
    // Output of a lambda/phi/delta -> its ipgraph node, for context vars.
    let mut symbols: FxHashMap<Output, IpNode> = FxHashMap::default();

    for node in topological(graph, graph.root()) {
        if let Some(lambda) = LambdaNode::try_from_node(graph, node) {
            let ip = lower_lambda(graph, &mut module, &lambda, &symbols)?;
            symbols.insert(lambda.output(graph), ip);
        } else if let Some(phi) = PhiNode::try_from_node(graph, node) {
            lower_phi_group(graph, &mut module, &phi, &mut symbols)?;
        } else if let Some(delta) = DeltaNode::try_from_node(graph, node) {
            let ip = lower_delta(graph, &mut module, &delta, &symbols)?;
            symbols.insert(delta.output(graph), ip);
        } else {
            return Err(BridgeError::Unsupported(format!(
                "cannot lower root-region node `{}`",
                graph.debug_string(node)
            )));
        }
    }
    Ok(module)
}

fn lower_delta(
    graph: &Graph,
    module: &mut Module,
    delta: &DeltaNode,
    symbols: &FxHashMap<Output, IpNode>,
) -> Result<IpNode, BridgeError> {
    let signature = delta.signature(graph);
    let ip = module.ipgraph_mut().add_data(
        signature.name.clone(),
        signature.ty.clone(),
        signature.linkage,
        signature.constant,
        Vec::new(),
    );
    let body = delta.subregion(graph);
    let mut vmap: ValueMap = ValueMap::default();
    for ctx in delta.context_vars(graph) {
        let origin = graph.origin(ctx.input);
        let ip_dep = symbols.get(&origin).copied().ok_or_else(|| {
            BridgeError::Unsupported(
                "context variable does not reference a lowerable definition".into(),
            )
        })?;
        module.ipgraph_mut().add_dependency(ip, ip_dep);
        vmap.insert(ctx.argument, module.symbol_variable(ip_dep));
    }

    let mut initializer: Vec<Tac> = Vec::new();
    for node in topological(graph, body) {
        if !graph.is_simple(node) {
            return Err(BridgeError::Unsupported(
                "global initializers must be straight-line code".into(),
            ));
        }
        let operation = graph.simple_op(node).expect("simple node without operation").copy();
        let operands: Vec<Variable> = (0..graph.num_inputs(node))
            .map(|index| {
                let origin = graph.origin(graph.input(node, index));
                vmap.get(&origin).copied().ok_or_else(|| {
                    BridgeError::Malformed("operand has no lowered value".into())
                })
            })
            .collect::<Result<_, _>>()?;
        let results: Vec<Variable> = (0..graph.num_outputs(node))
            .map(|index| {
                let variable =
                    module.create_variable(graph.output_type(graph.output(node, index)));
                vmap.insert(graph.output(node, index), variable);
                variable
            })
            .collect();
        initializer.push(Tac::with_results(operation, operands, results));
    }
    // Make sure the last code yields the initial value.
    let origin = graph.origin(graph.result(body, 0));
    let value = *vmap.get(&origin).ok_or_else(|| {
        BridgeError::Malformed("initializer has no lowered value".into())
    })?;
    let yields_value = initializer
        .last()
        .and_then(|tac| tac.results().last())
        .is_some_and(|last| *last == value);
    if !yields_value {
        initializer.push(Tac::new(
            module,
            Box::new(loamc_tac::AssignmentOperation::new(signature.ty.clone())),
            vec![value],
        ));
    }
    module.ipgraph_mut().set_initializer(ip, initializer);
    Ok(ip)
}

fn lower_phi_group(
    graph: &Graph,
    module: &mut Module,
    phi: &PhiNode,
    symbols: &mut FxHashMap<Output, IpNode>,
) -> Result<(), BridgeError> {
    let body = phi.subregion(graph);
    // Declare every member first so mutual references resolve.
    let mut members: Vec<(NodeId, IpNode)> = Vec::new();
    for &node in graph.region_nodes(body) {
        let Some(lambda) = LambdaNode::try_from_node(graph, node) else {
            return Err(BridgeError::Unsupported(
                "phi regions may only bind function definitions".into(),
            ));
        };
        let signature = lambda.signature(graph);
        let ip = module.ipgraph_mut().add_function(
            signature.name.clone(),
            (*signature.ty).clone(),
            signature.linkage,
            None,
        );
        members.push((node, ip));
    }
    let mut inner: FxHashMap<Output, IpNode> = symbols.clone();
    for (index, &(node, ip)) in members.iter().enumerate() {
        let lambda = LambdaNode::try_from_node(graph, node).expect("member vanished");
        inner.insert(phi.recursion_argument(graph, index), ip);
        inner.insert(lambda.output(graph), ip);
    }
    // Context variables of the group resolve through the phi inputs.
    for ctx in phi.context_vars(graph) {
        let origin = graph.origin(ctx.input);
        if let Some(&ip) = symbols.get(&origin) {
            inner.insert(ctx.argument, ip);
        }
    }

    for (index, &(node, ip)) in members.iter().enumerate() {
        let lambda = LambdaNode::try_from_node(graph, node).expect("member vanished");
        let body_ip = lower_lambda_into(graph, module, &lambda, ip, &inner)?;
        debug_assert_eq!(body_ip, ip);
        symbols.insert(phi.output(graph, index), ip);
    }
    Ok(())
}

fn lower_lambda(
    graph: &Graph,
    module: &mut Module,
    lambda: &LambdaNode,
    symbols: &FxHashMap<Output, IpNode>,
) -> Result<IpNode, BridgeError> {
    let signature = lambda.signature(graph);
    let ip = module.ipgraph_mut().add_function(
        signature.name.clone(),
        (*signature.ty).clone(),
        signature.linkage,
        None,
    );
    let mut inner = symbols.clone();
    inner.insert(lambda.output(graph), ip);
    lower_lambda_into(graph, module, lambda, ip, &inner)
}

fn lower_lambda_into(
    graph: &Graph,
    module: &mut Module,
    lambda: &LambdaNode,
    ip: IpNode,
    symbols: &FxHashMap<Output, IpNode>,
) -> Result<IpNode, BridgeError> {
    log::debug!(
        target: "destruct",
        "lowering `{}` back to a control flow graph",
        lambda.signature(graph).name
    );
    let mut cfg = Cfg::new();
    let body = lambda.subregion(graph);
    let mut vmap: ValueMap = ValueMap::default();

    for index in 0..lambda.num_params(graph) {
        let output = lambda.param(graph, index);
        let variable = module.create_variable(graph.output_type(output));
        cfg.append_argument(variable);
        vmap.insert(output, variable);
    }
    for ctx in lambda.context_vars(graph) {
        let origin = graph.origin(ctx.input);
        let ip_dep = symbols.get(&origin).copied().ok_or_else(|| {
            BridgeError::Unsupported(
                "context variable does not reference a lowerable definition".into(),
            )
        })?;
        module.ipgraph_mut().add_dependency(ip, ip_dep);
        vmap.insert(ctx.argument, module.symbol_variable(ip_dep));
    }

    let first = cfg.add_basic_block();
    cfg.divert_inedges(cfg.exit(), first);
    let last = lower_region(graph, module, &mut cfg, body, first, &mut vmap)?;
    cfg.add_outedge(last, cfg.exit());

    for index in 0..graph.num_results(body) {
        let origin = graph.origin(graph.result(body, index));
        let variable = *vmap.get(&origin).ok_or_else(|| {
            BridgeError::Malformed("function result has no lowered value".into())
        })?;
        cfg.append_result(variable);
    }

    debug_assert!(cfg.is_valid());
    module.ipgraph_mut().replace_cfg(ip, cfg);
    Ok(ip)
}

/// Nodes of `region` in an order where every producer precedes its users.
///
/// Passes may append replacement nodes behind their users, so the region
/// list itself is not necessarily topological.
fn topological(graph: &Graph, region: RegionId) -> Vec<NodeId> {
    let nodes = graph.region_nodes(region);
    let mut remaining: FxHashMap<NodeId, usize> = FxHashMap::default();
    for &node in nodes {
        let preds: std::collections::BTreeSet<NodeId> = (0..graph.num_inputs(node))
            .filter_map(|index| graph.origin(graph.input(node, index)).node())
            .filter(|producer| *producer != node)
            .collect();
        remaining.insert(node, preds.len());
    }
    let mut order = Vec::with_capacity(nodes.len());
    let mut ready: Vec<NodeId> =
        nodes.iter().copied().filter(|node| remaining[node] == 0).collect();
    let mut cursor = 0;
    while cursor < ready.len() {
        let node = ready[cursor];
        cursor += 1;
        order.push(node);
        for index in 0..graph.num_outputs(node) {
            for user in graph.users(graph.output(node, index)) {
                if let Some(consumer) = user.node() {
                    if let Some(count) = remaining.get_mut(&consumer) {
                        *count -= 1;
                        if *count == 0 {
                            ready.push(consumer);
                        }
                    }
                }
            }
        }
    }
    debug_assert_eq!(order.len(), nodes.len(), "region contains a dependency cycle");
    order
}

/// Lower the nodes of `region` into `cfg`, starting in `block`; returns
/// the block where control ends up.
fn lower_region(
    graph: &Graph,
    module: &mut Module,
    cfg: &mut Cfg,
    region: RegionId,
    block: CfgNodeId,
    vmap: &mut ValueMap,
) -> Result<CfgNodeId, BridgeError> {
    let mut current = block;
    for node in topological(graph, region) {
        if let Some(gamma) = GammaNode::try_from_node(graph, node) {
            current = lower_gamma(graph, module, cfg, &gamma, current, vmap)?;
        } else if let Some(theta) = ThetaNode::try_from_node(graph, node) {
            current = lower_theta(graph, module, cfg, &theta, current, vmap)?;
        } else if graph.is_simple(node) {
            let operation = graph
                .simple_op(node)
                .expect("simple node without operation")
                .copy();
            let operands: Vec<Variable> = (0..graph.num_inputs(node))
                .map(|index| {
                    let origin = graph.origin(graph.input(node, index));
                    vmap.get(&origin).copied().ok_or_else(|| {
                        BridgeError::Malformed("operand has no lowered value".into())
                    })
                })
                .collect::<Result<_, _>>()?;
            let results: Vec<Variable> = (0..graph.num_outputs(node))
                .map(|index| {
                    let variable =
                        module.create_variable(graph.output_type(graph.output(node, index)));
                    vmap.insert(graph.output(node, index), variable);
                    variable
                })
                .collect();
            cfg.append_last(current, Tac::with_results(operation, operands, results));
        } else {
            return Err(BridgeError::Unsupported(format!(
                "cannot lower nested `{}`",
                graph.debug_string(node)
            )));
        }
    }
    Ok(current)
}

fn lower_gamma(
    graph: &Graph,
    module: &mut Module,
    cfg: &mut Cfg,
    gamma: &GammaNode,
    block: CfgNodeId,
    vmap: &mut ValueMap,
) -> Result<CfgNodeId, BridgeError> {
    let alternatives = gamma.alternatives(graph);
    let predicate = graph.origin(gamma.predicate(graph));
    let predicate_var = *vmap.get(&predicate).ok_or_else(|| {
        BridgeError::Malformed("gamma predicate has no lowered value".into())
    })?;
    cfg.append_last(
        block,
        Tac::with_results(
            Box::new(BranchOperation::new(alternatives)),
            vec![predicate_var],
            vec![],
        ),
    );

    let entry_vars = gamma.entry_vars(graph);
    let mut arm_ends: Vec<CfgNodeId> = Vec::with_capacity(alternatives);
    let mut arm_vmaps: Vec<ValueMap> = Vec::with_capacity(alternatives);
    for index in 0..alternatives {
        let arm = cfg.add_basic_block();
        cfg.add_outedge(block, arm);
        let mut arm_vmap = ValueMap::default();
        for entry in &entry_vars {
            let outer = graph.origin(entry.input);
            let variable = *vmap.get(&outer).ok_or_else(|| {
                BridgeError::Malformed("gamma entry has no lowered value".into())
            })?;
            arm_vmap.insert(entry.arguments[index], variable);
        }
        let end = lower_region(
            graph,
            module,
            cfg,
            gamma.subregion(graph, index),
            arm,
            &mut arm_vmap,
        )?;
        arm_ends.push(end);
        arm_vmaps.push(arm_vmap);
    }

    let join = cfg.add_basic_block();
    for &end in &arm_ends {
        cfg.add_outedge(end, join);
    }
    // One SSA phi per exit variable, selecting the arm's value.
    for exit in gamma.exit_vars(graph) {
        let ty = graph.output_type(exit.output);
        let mut operands = Vec::with_capacity(alternatives);
        for (index, result) in exit.results.iter().enumerate() {
            let origin = graph.origin(*result);
            let variable = *arm_vmaps[index].get(&origin).ok_or_else(|| {
                BridgeError::Malformed("gamma exit has no lowered value".into())
            })?;
            operands.push(variable);
        }
        let phi = Tac::new(
            module,
            Box::new(SsaPhiOperation::new(ty, arm_ends.clone())),
            operands,
        );
        vmap.insert(exit.output, phi.result(0));
        cfg.append_last(join, phi);
    }
    Ok(join)
}

fn lower_theta(
    graph: &Graph,
    module: &mut Module,
    cfg: &mut Cfg,
    theta: &ThetaNode,
    block: CfgNodeId,
    vmap: &mut ValueMap,
) -> Result<CfgNodeId, BridgeError> {
    let body = theta.subregion(graph);
    let loop_vars = theta.loop_vars(graph);
    let header = cfg.add_basic_block();
    let tail = cfg.add_basic_block();
    cfg.add_outedge(block, header);

    // Header phis merge the entry values with the repeat values written in
    // the tail.
    let mut body_vmap = ValueMap::default();
    let mut repeat_vars: Vec<Variable> = Vec::with_capacity(loop_vars.len());
    for loop_var in &loop_vars {
        let ty = graph.output_type(loop_var.argument);
        let entry = *vmap.get(&graph.origin(loop_var.input)).ok_or_else(|| {
            BridgeError::Malformed("theta input has no lowered value".into())
        })?;
        let repeat = module.create_variable(ty.clone());
        let phi = Tac::new(
            module,
            Box::new(SsaPhiOperation::new(ty, vec![block, tail])),
            vec![entry, repeat],
        );
        body_vmap.insert(loop_var.argument, phi.result(0));
        repeat_vars.push(repeat);
        cfg.append_last(header, phi);
    }

    let end = lower_region(graph, module, cfg, body, header, &mut body_vmap)?;
    cfg.add_outedge(end, tail);

    // The tail latches the next-iteration values and tests the predicate.
    for (loop_var, repeat) in loop_vars.iter().zip(&repeat_vars) {
        let origin = graph.origin(loop_var.result);
        let variable = *body_vmap.get(&origin).ok_or_else(|| {
            BridgeError::Malformed("theta result has no lowered value".into())
        })?;
        cfg.append_last(
            tail,
            Tac::with_results(
                Box::new(loamc_tac::AssignmentOperation::new(
                    graph.output_type(loop_var.argument),
                )),
                vec![variable],
                vec![*repeat],
            ),
        );
    }
    let predicate_origin = graph.origin(theta.predicate(graph));
    let predicate_var = *body_vmap.get(&predicate_origin).ok_or_else(|| {
        BridgeError::Malformed("theta predicate has no lowered value".into())
    })?;
    let matched = Tac::new(module, Box::new(MatchOperation::on_bool()), vec![predicate_var]);
    let selector = matched.result(0);
    cfg.append_last(tail, matched);
    cfg.append_last(
        tail,
        Tac::with_results(Box::new(BranchOperation::new(2)), vec![selector], vec![]),
    );

    let after = cfg.add_basic_block();
    cfg.add_outedge(tail, after);
    cfg.add_outedge(tail, header);

    // After the loop, each variable holds the value of the final
    // iteration's result.
    for (loop_var, repeat) in loop_vars.iter().zip(&repeat_vars) {
        vmap.insert(loop_var.output, *repeat);
    }
    Ok(after)
}
