//! Lowering between the two Loam IRs.
//!
//! [construct] turns a TAC [Module](loamc_tac::Module) into an RVSDG: each
//! inter-procedural SCC becomes a λ (or a φ-bound group of λs), and each
//! function body is SSA-destructed, restructured, aggregated, annotated,
//! and then built region by region. [destruct] is the reverse lowering,
//! producing a structured, SSA-form CFG from an optimized graph.

mod construct;
mod destruct;

pub use self::{construct::construct, destruct::destruct};

/// Errors of either lowering direction.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Graph(#[from] loamc_rvsdg::GraphError),
    #[error(transparent)]
    Cfg(#[from] loamc_tac::CfgError),
    #[error("unsupported construct: {0}")]
    Unsupported(String),
    #[error("malformed input: {0}")]
    Malformed(String),
}
