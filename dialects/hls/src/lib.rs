//! The hardware-synthesis dialect: elastic-channel operations layered on
//! the RVSDG, plus the passes that prepare a graph for circuit
//! generation.

mod distribute_constants;
pub mod ops;
mod remove_redundant_buf;

pub use self::{
    distribute_constants::{distribute_constant, distribute_constants},
    ops::{
        BufferOperation, ForkOperation, HlsBranchOperation, HlsLoadOperation, HlsStoreOperation,
        LocalLoadOperation, LocalStoreOperation,
    },
    remove_redundant_buf::remove_redundant_buffers,
};
