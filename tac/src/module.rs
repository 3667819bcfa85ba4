use cranelift_entity::{PrimaryMap, entity_impl};
use loamc_types::Type;
use rustc_hash::FxHashMap;

use crate::ipgraph::{IpGraph, IpNode, IpNodeData};

/// A variable of the three-address-code IR.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Variable(u32);
entity_impl!(Variable, "v");

pub(crate) struct VariableData {
    pub ty: Type,
    pub name: String,
}

/// A translation unit: the inter-procedural graph plus the variables of
/// every contained function.
///
/// Variables live in one arena per module so that three-address codes can
/// refer to them by plain id.
#[derive(Default)]
pub struct Module {
    variables: PrimaryMap<Variable, VariableData>,
    symbol_variables: FxHashMap<IpNode, Variable>,
    ipgraph: IpGraph,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ipgraph(&self) -> &IpGraph {
        &self.ipgraph
    }

    pub fn ipgraph_mut(&mut self) -> &mut IpGraph {
        &mut self.ipgraph
    }

    /// Create a named variable of the given type.
    pub fn create_named_variable(&mut self, ty: Type, name: impl Into<String>) -> Variable {
        self.variables.push(VariableData {
            ty,
            name: name.into(),
        })
    }

    /// Create a variable with a generated name.
    pub fn create_variable(&mut self, ty: Type) -> Variable {
        let name = format!("v{}", self.variables.len());
        self.create_named_variable(ty, name)
    }

    /// The variable standing for an inter-procedural definition: a
    /// function value or the address of a global. Calls and global
    /// accesses in three-address code go through these.
    pub fn symbol_variable(&mut self, node: IpNode) -> Variable {
        if let Some(variable) = self.symbol_variables.get(&node) {
            return *variable;
        }
        let (name, ty) = match self.ipgraph.node(node) {
            IpNodeData::Function { name, ty, .. } => {
                (name.clone(), Type::Function(ty.clone()))
            }
            IpNodeData::Data { name, ty, .. } => (name.clone(), Type::pointer(ty.clone())),
        };
        let variable = self.create_named_variable(ty, name);
        self.symbol_variables.insert(node, variable);
        variable
    }

    pub fn variable_type(&self, variable: Variable) -> &Type {
        &self.variables[variable].ty
    }

    pub fn variable_name(&self, variable: Variable) -> &str {
        &self.variables[variable].name
    }
}
