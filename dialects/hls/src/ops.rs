//! Operations of the hardware dialect. Value edges here model elastic
//! channels between circuit stages; buffers, forks, and branches are the
//! plumbing the synthesis back-end maps onto handshaked hardware.

use std::any::Any;

use loamc_rvsdg::{SimpleOperation, dyn_eq};
use loamc_types::Type;

/// A FIFO of the given capacity on a channel.
///
/// A pass-through buffer forwards an element the same cycle it arrives;
/// a non-pass-through buffer always registers it first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferOperation {
    pub ty: Type,
    pub capacity: usize,
    pub pass_through: bool,
}

impl BufferOperation {
    pub fn new(ty: Type, capacity: usize, pass_through: bool) -> Self {
        assert!(capacity >= 1);
        Self {
            ty,
            capacity,
            pass_through,
        }
    }
}

impl SimpleOperation for BufferOperation {
    fn num_operands(&self) -> usize {
        1
    }

    fn operand_type(&self, _index: usize) -> Type {
        self.ty.clone()
    }

    fn num_results(&self) -> usize {
        1
    }

    fn result_type(&self, _index: usize) -> Type {
        self.ty.clone()
    }

    fn debug_string(&self) -> String {
        if self.pass_through {
            format!("buf_p {}", self.capacity)
        } else {
            format!("buf {}", self.capacity)
        }
    }

    fn equals(&self, other: &dyn SimpleOperation) -> bool {
        dyn_eq(self, other)
    }

    fn copy(&self) -> Box<dyn SimpleOperation> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Replicates a channel to several consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkOperation {
    pub fanout: usize,
    pub ty: Type,
}

impl ForkOperation {
    pub fn new(fanout: usize, ty: Type) -> Self {
        assert!(fanout >= 1);
        Self { fanout, ty }
    }
}

impl SimpleOperation for ForkOperation {
    fn num_operands(&self) -> usize {
        1
    }

    fn operand_type(&self, _index: usize) -> Type {
        self.ty.clone()
    }

    fn num_results(&self) -> usize {
        self.fanout
    }

    fn result_type(&self, _index: usize) -> Type {
        self.ty.clone()
    }

    fn debug_string(&self) -> String {
        format!("fork {}", self.fanout)
    }

    fn equals(&self, other: &dyn SimpleOperation) -> bool {
        dyn_eq(self, other)
    }

    fn copy(&self) -> Box<dyn SimpleOperation> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Steers a channel onto one of several outputs, selected by a control
/// token. Operand 0 is the control, operand 1 the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HlsBranchOperation {
    pub alternatives: usize,
    pub ty: Type,
}

impl HlsBranchOperation {
    pub fn new(alternatives: usize, ty: Type) -> Self {
        assert!(alternatives >= 2);
        Self { alternatives, ty }
    }
}

impl SimpleOperation for HlsBranchOperation {
    fn num_operands(&self) -> usize {
        2
    }

    fn operand_type(&self, index: usize) -> Type {
        if index == 0 {
            Type::Control(self.alternatives)
        } else {
            self.ty.clone()
        }
    }

    fn num_results(&self) -> usize {
        self.alternatives
    }

    fn result_type(&self, _index: usize) -> Type {
        self.ty.clone()
    }

    fn debug_string(&self) -> String {
        format!("hls_branch {}", self.alternatives)
    }

    fn equals(&self, other: &dyn SimpleOperation) -> bool {
        dyn_eq(self, other)
    }

    fn copy(&self) -> Box<dyn SimpleOperation> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// Loads are (address, states...) -> (value, states...).
macro_rules! load_port_op {
    ($(#[$doc:meta])* $name:ident, $debug:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            pub loaded: Type,
            pub nstates: usize,
        }

        impl $name {
            pub fn new(loaded: Type, nstates: usize) -> Self {
                Self { loaded, nstates }
            }
        }

        impl SimpleOperation for $name {
            fn num_operands(&self) -> usize {
                1 + self.nstates
            }

            fn operand_type(&self, index: usize) -> Type {
                if index == 0 {
                    Type::pointer(self.loaded.clone())
                } else {
                    Type::MemoryState
                }
            }

            fn num_results(&self) -> usize {
                1 + self.nstates
            }

            fn result_type(&self, index: usize) -> Type {
                if index == 0 {
                    self.loaded.clone()
                } else {
                    Type::MemoryState
                }
            }

            fn debug_string(&self) -> String {
                $debug.to_string()
            }

            fn equals(&self, other: &dyn SimpleOperation) -> bool {
                dyn_eq(self, other)
            }

            fn copy(&self) -> Box<dyn SimpleOperation> {
                Box::new(self.clone())
            }

            fn as_any(&self) -> &dyn Any {
                self
            }
        }
    };
}

// Stores are (address, value, states...) -> (states...).
macro_rules! store_port_op {
    ($(#[$doc:meta])* $name:ident, $debug:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            pub stored: Type,
            pub nstates: usize,
        }

        impl $name {
            pub fn new(stored: Type, nstates: usize) -> Self {
                Self { stored, nstates }
            }
        }

        impl SimpleOperation for $name {
            fn num_operands(&self) -> usize {
                2 + self.nstates
            }

            fn operand_type(&self, index: usize) -> Type {
                match index {
                    0 => Type::pointer(self.stored.clone()),
                    1 => self.stored.clone(),
                    _ => Type::MemoryState,
                }
            }

            fn num_results(&self) -> usize {
                self.nstates
            }

            fn result_type(&self, _index: usize) -> Type {
                Type::MemoryState
            }

            fn debug_string(&self) -> String {
                $debug.to_string()
            }

            fn equals(&self, other: &dyn SimpleOperation) -> bool {
                dyn_eq(self, other)
            }

            fn copy(&self) -> Box<dyn SimpleOperation> {
                Box::new(self.clone())
            }

            fn as_any(&self) -> &dyn Any {
                self
            }

            fn has_effects(&self) -> bool {
                true
            }
        }
    };
}

load_port_op! {
    /// A load port against block RAM local to the synthesized unit.
    LocalLoadOperation, "local_load"
}
store_port_op! {
    /// A store port against block RAM local to the synthesized unit.
    LocalStoreOperation, "local_store"
}
load_port_op! {
    /// A load port against external memory.
    HlsLoadOperation, "hls_load"
}
store_port_op! {
    /// A store port against external memory.
    HlsStoreOperation, "hls_store"
}
