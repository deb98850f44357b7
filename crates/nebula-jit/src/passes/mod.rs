//! Middle-end optimization passes.
//!
//! Every pass is a graph-to-graph transformation behind the [`Pass`]
//! trait: it reports whether it changed anything and records its
//! [`OptFlag`] on the graph when it did. Pass selection by optimization
//! level lives in [`crate::pipeline`].

use nebula_ir::{Graph, OptFlag};

use crate::error::CompileError;

pub mod bounds_check;
pub mod constant_folding;
pub mod cse;
pub mod dce;
pub mod inlining;
pub mod licm;
pub mod type_specialization;
pub mod value_numbering;

pub use bounds_check::BoundsCheckEliminationPass;
pub use constant_folding::ConstantFoldingPass;
pub use cse::CsePass;
pub use dce::DcePass;
pub use inlining::InliningPass;
pub use licm::LicmPass;
pub use type_specialization::TypeSpecializationPass;
pub use value_numbering::ValueNumberingPass;

/// One graph transformation.
pub trait Pass {
    fn name(&self) -> &'static str;
    /// The applied-optimization flag this pass records.
    fn flag(&self) -> OptFlag;
    /// Runs the transformation; returns whether the graph changed.
    fn run(&self, graph: &mut Graph) -> Result<bool, CompileError>;
}

/// Runs a pass and stamps its flag on the graph when it made progress.
pub fn run_pass(pass: &dyn Pass, graph: &mut Graph) -> Result<bool, CompileError> {
    let changed = pass.run(graph)?;
    if changed {
        graph.add_applied_optimization(pass.flag());
    }
    Ok(changed)
}
