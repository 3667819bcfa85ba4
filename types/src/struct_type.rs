use std::fmt;

use smallvec::SmallVec;

use super::Type;

/// A compound type with ordered, anonymous fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructType {
    pub fields: SmallVec<[Type; 4]>,
}

impl StructType {
    pub fn new<F: IntoIterator<Item = Type>>(fields: F) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, index: usize) -> &Type {
        &self.fields[index]
    }
}

impl fmt::Display for StructType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("struct{")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{field}")?;
        }
        f.write_str("}")
    }
}

/// A named field of a [BundleType].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BundleField {
    pub name: String,
    pub ty: Type,
}

/// A compound type with named fields.
///
/// Bundles only occur on the hardware-synthesis path, where field names map
/// to port names of the generated circuitry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BundleType {
    pub fields: Vec<BundleField>,
}

impl BundleType {
    pub fn new<F: IntoIterator<Item = (String, Type)>>(fields: F) -> Self {
        Self {
            fields: fields.into_iter().map(|(name, ty)| BundleField { name, ty }).collect(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&Type> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.ty)
    }
}

impl fmt::Display for BundleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("bundle{")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", field.name, field.ty)?;
        }
        f.write_str("}")
    }
}
