use loamc_rvsdg::{
    BitConstant, BitValue, ControlConstant, DeltaNode, DeltaSignature, GammaNode, Graph,
    LambdaNode, LambdaSignature, Linkage, LoopVar, MatchOperation, Output, PhiBuilder, RegionId,
    ThetaNode,
};
use loamc_tac::{
    AggNode, AssignmentOperation, BranchOperation, DemandTree, IpNode, IpNodeData, Module,
    SsaPhiOperation, Tac, UndefOperation, VarSet, Variable, aggregate, annotate, destruct_ssa,
    restructure,
};
use loamc_types::Type;
use rustc_hash::FxHashMap;

use crate::BridgeError;

type ValueMap = FxHashMap<Variable, Output>;

/// Lower a whole module into a fresh RVSDG.
///
/// Inter-procedural SCCs are processed callees-first: plain definitions
/// become root-region λ/δ nodes, mutual-recursion groups are bound through
/// a φ, external declarations become root-region arguments, and externally
/// linked definitions are exposed as root-region results.
pub fn construct(module: &mut Module) -> Result<Graph, BridgeError> {
    let mut graph = Graph::new();
    let root = graph.root();
    let mut symbols: FxHashMap<IpNode, Output> = FxHashMap::default();

    enum Plan {
        Import(Type),
        Lambda(Linkage),
        Delta(Linkage),
    }

    for scc in module.ipgraph().find_sccs() {
        let recursive = module.ipgraph().is_recursive(scc[0], &scc);
        if !recursive {
            let node = scc[0];
            let plan = match module.ipgraph().node(node) {
                IpNodeData::Function { ty, cfg: None, .. } => {
                    Plan::Import(Type::Function(ty.clone()))
                }
                IpNodeData::Function { linkage, .. } => Plan::Lambda(*linkage),
                IpNodeData::Data { linkage, .. } => Plan::Delta(*linkage),
            };
            match plan {
                Plan::Import(ty) => {
                    // External declaration: imported as a root argument.
                    let import = graph.add_argument(root, ty);
                    symbols.insert(node, import);
                }
                Plan::Lambda(linkage) => {
                    let output = build_lambda(&mut graph, module, node, root, &symbols)?;
                    symbols.insert(node, output);
                    if linkage == Linkage::External {
                        graph.add_result(root, output)?;
                    }
                }
                Plan::Delta(linkage) => {
                    let output = build_delta(&mut graph, module, node, root, &symbols)?;
                    symbols.insert(node, output);
                    if linkage == Linkage::External {
                        graph.add_result(root, output)?;
                    }
                }
            }
        } else {
            build_recursion_group(&mut graph, module, &scc, &mut symbols)?;
        }
    }
    Ok(graph)
}

fn build_recursion_group(
    graph: &mut Graph,
    module: &mut Module,
    scc: &[IpNode],
    symbols: &mut FxHashMap<IpNode, Output>,
) -> Result<(), BridgeError> {
    log::debug!(target: "construct", "binding a recursion group of {} definitions", scc.len());
    let root = graph.root();
    let mut builder = PhiBuilder::new(graph, root)?;

    let mut inner_symbols: FxHashMap<IpNode, Output> = FxHashMap::default();
    for &member in scc {
        let IpNodeData::Function { ty, cfg, .. } = module.ipgraph().node(member) else {
            return Err(BridgeError::Unsupported(
                "global data cannot participate in a recursion group".into(),
            ));
        };
        if cfg.is_none() {
            return Err(BridgeError::Malformed(
                "recursive function without a body".into(),
            ));
        }
        let argument = builder.add_recursion_var(graph, Type::Function(ty.clone()));
        inner_symbols.insert(member, argument);
    }
    for &member in scc {
        for &dep in module.ipgraph().dependencies(member) {
            if scc.contains(&dep) || inner_symbols.contains_key(&dep) {
                continue;
            }
            let origin = *symbols.get(&dep).ok_or_else(|| {
                BridgeError::Malformed("dependency built after its dependent".into())
            })?;
            let ctx = builder.add_context_var(graph, origin)?;
            inner_symbols.insert(dep, ctx.argument);
        }
    }

    let body = builder.subregion(graph);
    for (index, &member) in scc.iter().enumerate() {
        let output = build_lambda(graph, module, member, body, &inner_symbols)?;
        builder.bind(graph, index, output)?;
    }
    let phi = builder.finalize(graph)?;
    for (index, &member) in scc.iter().enumerate() {
        let output = phi.output(graph, index);
        symbols.insert(member, output);
        if module.ipgraph().node(member).linkage() == Linkage::External {
            graph.add_result(root, output)?;
        }
    }
    Ok(())
}

fn build_lambda(
    graph: &mut Graph,
    module: &mut Module,
    node: IpNode,
    target: RegionId,
    symbols: &FxHashMap<IpNode, Output>,
) -> Result<Output, BridgeError> {
    let IpNodeData::Function { name, ty, linkage, .. } = module.ipgraph().node(node) else {
        unreachable!("lambda construction on a data node");
    };
    let signature = LambdaSignature {
        name: name.clone(),
        ty: ty.clone(),
        linkage: *linkage,
    };
    log::debug!(target: "construct", "lowering function `{}`", signature.name);

    let mut cfg = module
        .ipgraph_mut()
        .take_cfg(node)
        .ok_or_else(|| BridgeError::Malformed("function without a body".into()))?;
    destruct_ssa(module, &mut cfg);
    cfg.prune();
    restructure(module, &mut cfg);
    let tree = aggregate(cfg)?;
    let demand = annotate(&tree);

    let lambda = LambdaNode::create(graph, target, signature)?;
    let mut vmap: ValueMap = ValueMap::default();
    for dep in module.ipgraph().dependencies(node).to_vec() {
        let origin = *symbols.get(&dep).ok_or_else(|| {
            BridgeError::Malformed("dependency built after its dependent".into())
        })?;
        let ctx = lambda.add_context_var(graph, origin)?;
        vmap.insert(module.symbol_variable(dep), ctx.argument);
    }

    let mut builder = RegionBuilder {
        graph: &mut *graph,
        module,
        pred_ctl: None,
        pred_bit: None,
        returns: Vec::new(),
    };
    let body = lambda.subregion(builder.graph);
    builder.convert(body, &tree, &demand, &mut vmap)?;
    let returns = builder.returns;
    lambda.finalize(graph, &returns).map_err(Into::into)
}

fn build_delta(
    graph: &mut Graph,
    module: &mut Module,
    node: IpNode,
    target: RegionId,
    symbols: &FxHashMap<IpNode, Output>,
) -> Result<Output, BridgeError> {
    let IpNodeData::Data { name, ty, linkage, constant, .. } = module.ipgraph().node(node)
    else {
        unreachable!("delta construction on a function node");
    };
    let signature = DeltaSignature {
        name: name.clone(),
        ty: ty.clone(),
        linkage: *linkage,
        constant: *constant,
    };
    log::debug!(target: "construct", "lowering global `{}`", signature.name);
    let data_type = signature.ty.clone();
    let initializer = module.ipgraph_mut().take_initializer(node);

    let delta = DeltaNode::create(graph, target, signature);
    let mut vmap: ValueMap = ValueMap::default();
    for dep in module.ipgraph().dependencies(node).to_vec() {
        let origin = *symbols.get(&dep).ok_or_else(|| {
            BridgeError::Malformed("dependency built after its dependent".into())
        })?;
        let ctx = delta.add_context_var(graph, origin)?;
        vmap.insert(module.symbol_variable(dep), ctx.argument);
    }

    let body = delta.subregion(graph);
    let mut builder = RegionBuilder {
        graph: &mut *graph,
        module,
        pred_ctl: None,
        pred_bit: None,
        returns: Vec::new(),
    };
    let mut init = None;
    for tac in &initializer {
        builder.convert_tac(body, tac, &mut vmap)?;
        if let Some(result) = tac.results().last() {
            init = vmap.get(result).copied();
        }
    }
    let init = match init {
        Some(init) => init,
        None => {
            graph.create_normalized(body, Box::new(UndefOperation::new(data_type)), &[])?[0]
        }
    };
    delta.finalize(graph, init).map_err(Into::into)
}

/// Builds the contents of one region family from an aggregation tree,
/// tracking the variable environment and the pending branch predicate.
struct RegionBuilder<'a> {
    graph: &'a mut Graph,
    module: &'a Module,
    /// The control value of the most recent branch terminator.
    pred_ctl: Option<Output>,
    /// The boolean behind that control value, when it came from a match.
    pred_bit: Option<Output>,
    /// The values reaching the function exit.
    returns: Vec<Output>,
}

impl RegionBuilder<'_> {
    fn convert(
        &mut self,
        region: RegionId,
        node: &AggNode,
        demand: &DemandTree,
        vmap: &mut ValueMap,
    ) -> Result<(), BridgeError> {
        match node {
            AggNode::Entry { arguments } => {
                for (index, variable) in arguments.iter().enumerate() {
                    vmap.insert(*variable, self.graph.argument(region, index));
                }
                Ok(())
            }
            AggNode::Exit { results } => {
                for variable in results {
                    let output = self.lookup(region, vmap, *variable)?;
                    self.returns.push(output);
                }
                Ok(())
            }
            AggNode::Block { tacs } => {
                for tac in tacs {
                    self.convert_tac(region, tac, vmap)?;
                }
                Ok(())
            }
            AggNode::Linear { children } => {
                for (child, child_demand) in children.iter().zip(&demand.children) {
                    self.convert(region, child, child_demand, vmap)?;
                }
                Ok(())
            }
            AggNode::Branch { branches } => self.convert_branch(region, branches, demand, vmap),
            AggNode::Loop { body } => self.convert_loop(region, body, demand, vmap),
        }
    }

    fn convert_branch(
        &mut self,
        region: RegionId,
        branches: &[AggNode],
        demand: &DemandTree,
        vmap: &mut ValueMap,
    ) -> Result<(), BridgeError> {
        let predicate = self.pred_ctl.take().ok_or_else(|| {
            BridgeError::Malformed("branch region without a preceding branch terminator".into())
        })?;
        self.pred_bit = None;
        let gamma = GammaNode::create(self.graph, predicate)?;
        if gamma.alternatives(self.graph) != branches.len() {
            return Err(BridgeError::Malformed(
                "branch terminator alternatives do not match the branch arms".into(),
            ));
        }

        let mut entry_set = VarSet::new();
        for child in &demand.children {
            entry_set.extend(child.set.top.iter().copied());
        }
        let mut arm_vmaps: Vec<ValueMap> = vec![ValueMap::default(); branches.len()];
        for &variable in &entry_set {
            let origin = self.lookup(region, vmap, variable)?;
            let entry = gamma.add_entry_var(self.graph, origin)?;
            for (arm_vmap, argument) in arm_vmaps.iter_mut().zip(&entry.arguments) {
                arm_vmap.insert(variable, *argument);
            }
        }

        for (index, (branch, child_demand)) in branches.iter().zip(&demand.children).enumerate() {
            let subregion = gamma.subregion(self.graph, index);
            self.convert(subregion, branch, child_demand, &mut arm_vmaps[index])?;
        }

        let exit_set = demand
            .children
            .first()
            .map(|child| child.set.bottom.clone())
            .unwrap_or_default();
        for &variable in &exit_set {
            let mut origins = Vec::with_capacity(branches.len());
            for (index, arm_vmap) in arm_vmaps.iter_mut().enumerate() {
                let subregion = gamma.subregion(self.graph, index);
                origins.push(lookup_in(self.graph, self.module, subregion, arm_vmap, variable)?);
            }
            let exit = gamma.add_exit_var(self.graph, &origins)?;
            vmap.insert(variable, exit.output);
        }
        Ok(())
    }

    fn convert_loop(
        &mut self,
        region: RegionId,
        body: &AggNode,
        demand: &DemandTree,
        vmap: &mut ValueMap,
    ) -> Result<(), BridgeError> {
        let child_demand = &demand.children[0];
        let loop_set: VarSet = child_demand.set.bottom.clone();
        let theta = ThetaNode::create(self.graph, region)?;
        let subregion = theta.subregion(self.graph);

        let mut body_vmap = ValueMap::default();
        let mut loop_vars: Vec<(Variable, LoopVar)> = Vec::new();
        for &variable in &loop_set {
            let origin = self.lookup(region, vmap, variable)?;
            let loop_var = theta.add_loop_var(self.graph, origin)?;
            body_vmap.insert(variable, loop_var.argument);
            loop_vars.push((variable, loop_var));
        }

        self.convert(subregion, body, child_demand, &mut body_vmap)?;

        let predicate = self.pred_bit.take().ok_or_else(|| {
            BridgeError::Malformed("loop region without a repeat predicate".into())
        })?;
        self.pred_ctl = None;
        theta.set_predicate(self.graph, predicate)?;

        for (variable, loop_var) in &loop_vars {
            let value = lookup_in(self.graph, self.module, subregion, &mut body_vmap, *variable)?;
            self.graph.divert_origin(loop_var.result, value)?;
            vmap.insert(*variable, loop_var.output);
        }
        Ok(())
    }

    fn convert_tac(
        &mut self,
        region: RegionId,
        tac: &Tac,
        vmap: &mut ValueMap,
    ) -> Result<(), BridgeError> {
        let operation = tac.operation();
        if operation.as_any().downcast_ref::<BranchOperation>().is_some() {
            let ctl = self.lookup(region, vmap, tac.operand(0))?;
            self.pred_ctl = Some(ctl);
            self.pred_bit = self.peel_match(region, ctl)?;
            return Ok(());
        }
        if operation.as_any().downcast_ref::<AssignmentOperation>().is_some() {
            let value = self.lookup(region, vmap, tac.operand(0))?;
            vmap.insert(tac.result(0), value);
            return Ok(());
        }
        if operation.as_any().downcast_ref::<SsaPhiOperation>().is_some() {
            return Err(BridgeError::Unsupported(
                "ssa phi reached construction; destruct ssa first".into(),
            ));
        }
        let mut operands = Vec::with_capacity(tac.num_operands());
        for &operand in tac.operands() {
            operands.push(self.lookup(region, vmap, operand)?);
        }
        let outputs = self.graph.create_normalized(region, operation.copy(), &operands)?;
        for (variable, output) in tac.results().iter().zip(outputs) {
            vmap.insert(*variable, output);
        }
        Ok(())
    }

    /// The boolean a control value was matched from, for θ predicates.
    fn peel_match(
        &mut self,
        region: RegionId,
        ctl: Output,
    ) -> Result<Option<Output>, BridgeError> {
        let Some((node, producer)) = self.graph.producer(ctl) else {
            return Ok(None);
        };
        if producer.as_any().downcast_ref::<MatchOperation>().is_some() {
            return Ok(Some(self.graph.origin(self.graph.input(node, 0))));
        }
        if let Some(constant) = producer.as_any().downcast_ref::<ControlConstant>() {
            let flag = constant.alternative == 1;
            let outputs = self.graph.create_normalized(
                region,
                Box::new(BitConstant::new(BitValue::bool(flag))),
                &[],
            )?;
            return Ok(Some(outputs[0]));
        }
        Ok(None)
    }

    fn lookup(
        &mut self,
        region: RegionId,
        vmap: &mut ValueMap,
        variable: Variable,
    ) -> Result<Output, BridgeError> {
        lookup_in(self.graph, self.module, region, vmap, variable)
    }
}

/// The value bound to `variable`, materializing an undef for variables
/// that have no definition on this path.
fn lookup_in(
    graph: &mut Graph,
    module: &Module,
    region: RegionId,
    vmap: &mut ValueMap,
    variable: Variable,
) -> Result<Output, BridgeError> {
    if let Some(output) = vmap.get(&variable) {
        return Ok(*output);
    }
    let ty = module.variable_type(variable).clone();
    let outputs = graph.create_normalized(region, Box::new(UndefOperation::new(ty)), &[])?;
    vmap.insert(variable, outputs[0]);
    Ok(outputs[0])
}
