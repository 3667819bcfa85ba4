//! Optimization passes over the Loam RVSDG.
//!
//! Every pass is a function over a [Graph](loamc_rvsdg::Graph), applied
//! top-down and recursively into structural sub-regions, and total: a pass
//! that cannot apply leaves the graph unchanged rather than partially
//! rewritten.

mod dne;
mod inversion;
mod pull;

pub use self::{
    dne::dead_node_elimination,
    inversion::invert,
    pull::{pull, pull_region, pullin_bottom, pullin_top, pullout},
};
