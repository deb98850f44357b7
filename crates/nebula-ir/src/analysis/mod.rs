//! Graph analyses: dominance, dominance frontiers, natural loops,
//! induction variables, liveness, and escape.
//!
//! Analyses that annotate the graph (dominators, loop info) are methods on
//! [`Graph`](crate::graph::Graph) and are idempotent: each run clears and
//! recomputes its own annotations. Analyses with free-standing results
//! (frontiers, loops, liveness) return owned structures.

pub mod dominators;
pub mod escape;
pub mod liveness;
pub mod loops;

pub use dominators::DominanceFrontiers;
pub use liveness::Liveness;
pub use loops::{all_induction_variables, InductionVariable, IvDirection, LoopForest, NaturalLoop};
