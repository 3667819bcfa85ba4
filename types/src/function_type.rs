use std::fmt;

use smallvec::SmallVec;

use super::Type;

/// The type of a function: its parameters and results.
///
/// Function types are reference types; a value of function type is always a
/// handle to a function, never the function itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    /// The parameter types of this function
    pub params: SmallVec<[Type; 4]>,
    /// The result types of this function
    pub results: SmallVec<[Type; 1]>,
}

impl FunctionType {
    pub fn new<P: IntoIterator<Item = Type>, R: IntoIterator<Item = Type>>(
        params: P,
        results: R,
    ) -> Self {
        Self {
            params: params.into_iter().collect(),
            results: results.into_iter().collect(),
        }
    }

    /// The number of parameters expected by the function
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// The types of the function parameters as a slice
    pub fn params(&self) -> &[Type] {
        self.params.as_slice()
    }

    /// The types of the function results as a slice
    pub fn results(&self) -> &[Type] {
        self.results.as_slice()
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("fn(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str(") -> (")?;
        for (i, result) in self.results.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{result}")?;
        }
        f.write_str(")")
    }
}
