use loamc_rvsdg::SimpleOperation;

use crate::module::{Module, Variable};

/// A three-address code: an operation applied to operand variables,
/// writing result variables.
pub struct Tac {
    operation: Box<dyn SimpleOperation>,
    operands: Vec<Variable>,
    results: Vec<Variable>,
}

impl Tac {
    /// Create a code with freshly allocated result variables, one per
    /// operation result.
    pub fn new(
        module: &mut Module,
        operation: Box<dyn SimpleOperation>,
        operands: Vec<Variable>,
    ) -> Self {
        assert_eq!(
            operands.len(),
            operation.num_operands(),
            "operand count does not match the operation"
        );
        let results = (0..operation.num_results())
            .map(|index| module.create_variable(operation.result_type(index)))
            .collect();
        Self {
            operation,
            operands,
            results,
        }
    }

    /// Create a code writing the given pre-existing variables.
    pub fn with_results(
        operation: Box<dyn SimpleOperation>,
        operands: Vec<Variable>,
        results: Vec<Variable>,
    ) -> Self {
        assert_eq!(operands.len(), operation.num_operands());
        assert_eq!(results.len(), operation.num_results());
        Self {
            operation,
            operands,
            results,
        }
    }

    pub fn operation(&self) -> &dyn SimpleOperation {
        self.operation.as_ref()
    }

    pub fn num_operands(&self) -> usize {
        self.operands.len()
    }

    pub fn operand(&self, index: usize) -> Variable {
        self.operands[index]
    }

    pub fn operands(&self) -> &[Variable] {
        &self.operands
    }

    pub fn num_results(&self) -> usize {
        self.results.len()
    }

    pub fn result(&self, index: usize) -> Variable {
        self.results[index]
    }

    pub fn results(&self) -> &[Variable] {
        &self.results
    }
}

impl std::fmt::Debug for Tac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, result) in self.results.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{result}")?;
        }
        if !self.results.is_empty() {
            f.write_str(" = ")?;
        }
        write!(f, "{}", self.operation.debug_string())?;
        for (i, operand) in self.operands.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, " {operand}")?;
        }
        Ok(())
    }
}
