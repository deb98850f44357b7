//! The optimization pipeline.
//!
//! Four phases: Frontend (trace or prebuilt graph in), MiddleEnd (the
//! passes of [`crate::passes`], selected by optimization level), Backend
//! (dominator/loop/liveness annotation ahead of emission), and CodeGen
//! (the [`CodeEmitter`] boundary). Levels are monotone: a higher level
//! only ever adds passes. `Omax` additionally re-runs the middle end to a
//! fixed point. A compile job checks its cancellation flag between
//! passes and verifies the graph after each one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use nebula_ir::{BlockId, Graph, Liveness, OptFlag};
use nebula_trace::Trace;
use nebula_value::FunctionId;

use crate::emitter::{CodeEmitter, NativeCode};
use crate::error::CompileError;
use crate::frontend::build_trace_ir;
use crate::passes::{
    run_pass, BoundsCheckEliminationPass, ConstantFoldingPass, CsePass, DcePass, InliningPass,
    LicmPass, Pass, TypeSpecializationPass, ValueNumberingPass,
};

/// Optimization level. Each level enables a strict superset of the
/// passes below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OptLevel {
    O0,
    O1,
    O2,
    O3,
    Omax,
}

impl OptLevel {
    /// The next tier down, for deoptimization-storm demotion.
    pub fn lower(self) -> Option<OptLevel> {
        match self {
            OptLevel::O0 => None,
            OptLevel::O1 => Some(OptLevel::O0),
            OptLevel::O2 => Some(OptLevel::O1),
            OptLevel::O3 => Some(OptLevel::O2),
            OptLevel::Omax => Some(OptLevel::O3),
        }
    }
}

/// Pipeline phase, for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Frontend,
    MiddleEnd,
    Backend,
    CodeGen,
}

/// Progress callback: `(phase, stage name, fraction in [0, 1])`.
pub type Progress = Box<dyn Fn(Phase, &str, f32) + Send + Sync>;

/// Everything a compile job needs besides the graph itself.
pub struct PipelineOptions {
    pub level: OptLevel,
    pub use_type_speculation: bool,
    pub use_inlining: bool,
    /// Callee graphs snapshotted for inlining.
    pub inline_sources: HashMap<FunctionId, Graph>,
    pub max_inline_size: usize,
    pub max_inline_depth: u32,
    /// Checked between passes; set by the orchestrator on shutdown.
    pub cancel: Option<Arc<AtomicBool>>,
    pub progress: Option<Progress>,
}

impl PipelineOptions {
    pub fn for_level(level: OptLevel) -> Self {
        PipelineOptions {
            level,
            use_type_speculation: true,
            use_inlining: true,
            inline_sources: HashMap::new(),
            max_inline_size: 50,
            max_inline_depth: 3,
            cancel: None,
            progress: None,
        }
    }
}

/// The result of a successful compilation.
pub struct CompileOutcome {
    pub code: NativeCode,
    pub graph: Graph,
    pub applied: OptFlag,
    pub compile_time: Duration,
    /// Deopt blocks of a trace compilation, in exit order.
    pub exit_blocks: Vec<BlockId>,
}

/// Drives a graph (or trace) through optimization and emission.
pub struct Pipeline {
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(level: OptLevel) -> Self {
        Pipeline {
            options: PipelineOptions::for_level(level),
        }
    }

    pub fn with_options(options: PipelineOptions) -> Self {
        Pipeline { options }
    }

    pub fn level(&self) -> OptLevel {
        self.options.level
    }

    /// The middle-end passes this pipeline will run, in order.
    fn middle_end_passes(&self) -> Vec<Box<dyn Pass>> {
        let mut passes: Vec<(OptLevel, Box<dyn Pass>)> = Vec::new();
        passes.push((OptLevel::O1, Box::new(ConstantFoldingPass)));
        if self.options.use_inlining {
            let sources: HashMap<FunctionId, Graph> = self
                .options
                .inline_sources
                .iter()
                .map(|(id, graph)| (*id, graph.clone_graph()))
                .collect();
            passes.push((
                OptLevel::O3,
                Box::new(InliningPass::new(
                    sources,
                    self.options.max_inline_size,
                    self.options.max_inline_depth,
                )),
            ));
        }
        passes.push((OptLevel::O2, Box::new(CsePass)));
        passes.push((OptLevel::O2, Box::new(LicmPass)));
        if self.options.use_type_speculation {
            passes.push((OptLevel::O2, Box::new(TypeSpecializationPass)));
        }
        passes.push((OptLevel::O2, Box::new(BoundsCheckEliminationPass)));
        passes.push((OptLevel::O3, Box::new(ValueNumberingPass)));
        passes.push((OptLevel::O1, Box::new(DcePass)));

        passes
            .into_iter()
            .filter(|(min_level, _)| self.options.level >= *min_level)
            .map(|(_, pass)| pass)
            .collect()
    }

    /// Names of the passes the current level enables (for tests and
    /// diagnostics).
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.middle_end_passes().iter().map(|p| p.name()).collect()
    }

    fn check_cancelled(&self) -> Result<(), CompileError> {
        if let Some(cancel) = &self.options.cancel {
            if cancel.load(Ordering::Acquire) {
                return Err(CompileError::Cancelled);
            }
        }
        Ok(())
    }

    fn report(&self, phase: Phase, stage: &str, fraction: f32) {
        if let Some(progress) = &self.options.progress {
            progress(phase, stage, fraction.clamp(0.0, 1.0));
        }
    }

    /// Runs the middle end over a graph in place.
    pub fn optimize(&self, graph: &mut Graph) -> Result<(), CompileError> {
        let passes = self.middle_end_passes();
        if passes.is_empty() {
            return Ok(());
        }
        let total = passes.len() as f32;
        let fixpoint_rounds = if self.options.level == OptLevel::Omax { 3 } else { 1 };

        for round in 0..fixpoint_rounds {
            let mut changed = false;
            for (index, pass) in passes.iter().enumerate() {
                self.check_cancelled()?;
                let pass_changed = run_pass(pass.as_ref(), graph)?;
                changed |= pass_changed;
                if let Err(error) = graph.verify_detailed() {
                    warn!(pass = pass.name(), %error, "graph verification failed");
                    return Err(CompileError::VerifyFailed {
                        stage: pass.name().to_string(),
                        reason: error.to_string(),
                    });
                }
                debug!(pass = pass.name(), changed = pass_changed, round, "pass finished");
                self.report(Phase::MiddleEnd, pass.name(), (index as f32 + 1.0) / total);
            }
            if !changed {
                break;
            }
        }
        Ok(())
    }

    /// Full compilation of a prebuilt graph.
    pub fn compile_graph(
        &self,
        mut graph: Graph,
        emitter: &dyn CodeEmitter,
    ) -> Result<CompileOutcome, CompileError> {
        let start = Instant::now();
        self.report(Phase::Frontend, "graph-input", 1.0);
        if let Err(error) = graph.verify_detailed() {
            return Err(CompileError::VerifyFailed {
                stage: "frontend".to_string(),
                reason: error.to_string(),
            });
        }

        self.optimize(&mut graph)?;
        let liveness = self.backend(&mut graph)?;

        self.check_cancelled()?;
        self.report(Phase::CodeGen, "emit", 1.0);
        let code = emitter.emit(&graph, &liveness)?;
        Ok(CompileOutcome {
            applied: graph.applied_optimizations(),
            code,
            graph,
            compile_time: start.elapsed(),
            exit_blocks: Vec::new(),
        })
    }

    /// Full compilation of a recorded trace.
    pub fn compile_trace(
        &self,
        trace: &Trace,
        emitter: &dyn CodeEmitter,
    ) -> Result<CompileOutcome, CompileError> {
        let start = Instant::now();
        self.check_cancelled()?;
        self.report(Phase::Frontend, "trace-to-ir", 0.5);
        let ir = build_trace_ir(trace)?;
        self.report(Phase::Frontend, "trace-to-ir", 1.0);

        let mut graph = ir.graph;
        self.optimize(&mut graph)?;
        let liveness = self.backend(&mut graph)?;

        self.check_cancelled()?;
        self.report(Phase::CodeGen, "emit", 1.0);
        let code = emitter.emit(&graph, &liveness)?;
        Ok(CompileOutcome {
            applied: graph.applied_optimizations(),
            code,
            graph,
            compile_time: start.elapsed(),
            exit_blocks: ir.exit_blocks,
        })
    }

    /// Backend preparation: dominator and loop annotations on the graph,
    /// plus the liveness result the emitter allocates registers from.
    fn backend(&self, graph: &mut Graph) -> Result<Liveness, CompileError> {
        self.check_cancelled()?;
        if graph.entry_block().is_none() {
            return Ok(Liveness::default());
        }
        self.report(Phase::Backend, "loop-annotate", 0.5);
        graph.detect_natural_loops()?;
        self.report(Phase::Backend, "liveness", 1.0);
        Ok(graph.perform_liveness_analysis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::NullCodeEmitter;
    use nebula_ir::{ArithOp, ConstValue, IrType, MemoryOp, Opcode};
    use parking_lot::Mutex;

    #[test]
    fn levels_are_monotone() {
        let levels = [
            OptLevel::O0,
            OptLevel::O1,
            OptLevel::O2,
            OptLevel::O3,
            OptLevel::Omax,
        ];
        let mut previous: Vec<&'static str> = Vec::new();
        for level in levels {
            let names = Pipeline::new(level).pass_names();
            for name in &previous {
                assert!(
                    names.contains(name),
                    "{level:?} dropped pass {name} enabled at a lower level"
                );
            }
            assert!(names.len() >= previous.len());
            previous = names;
        }
    }

    #[test]
    fn o0_runs_no_passes() {
        assert!(Pipeline::new(OptLevel::O0).pass_names().is_empty());
    }

    #[test]
    fn tier_demotion_order() {
        assert_eq!(OptLevel::Omax.lower(), Some(OptLevel::O3));
        assert_eq!(OptLevel::O1.lower(), Some(OptLevel::O0));
        assert_eq!(OptLevel::O0.lower(), None);
    }

    /// Two identical `add(2, 3)` expressions, both kept alive.
    fn double_add_graph() -> (Graph, nebula_ir::NodeId) {
        let mut graph = Graph::new();
        let entry = graph.create_basic_block("entry");
        graph.set_entry_block(entry);

        let c2a = graph.create_constant(ConstValue::Int32(2));
        let c3a = graph.create_constant(ConstValue::Int32(3));
        let add1 = graph
            .create_binary_op(Opcode::Arith(ArithOp::Add), c2a, c3a, IrType::Any)
            .unwrap();
        graph.append_instruction(entry, add1).unwrap();

        let c2b = graph.create_constant(ConstValue::Int32(2));
        let c3b = graph.create_constant(ConstValue::Int32(3));
        let add2 = graph
            .create_binary_op(Opcode::Arith(ArithOp::Add), c2b, c3b, IrType::Any)
            .unwrap();
        graph.append_instruction(entry, add2).unwrap();
        let store = graph.create_node(Opcode::Memory(MemoryOp::StoreLocal), IrType::Void);
        graph.add_input(store, add2).unwrap();
        graph.append_instruction(entry, store).unwrap();

        let ret = graph.create_return(Some(add1)).unwrap();
        graph.terminate(entry, ret).unwrap();
        (graph, ret)
    }

    #[test]
    fn folding_then_cse_leaves_one_constant() {
        let (graph, ret) = double_add_graph();
        let pipeline = Pipeline::new(OptLevel::O2);
        let outcome = pipeline.compile_graph(graph, &NullCodeEmitter).unwrap();

        let graph = &outcome.graph;
        let constants: Vec<_> = graph.nodes().filter(|n| n.is_constant()).collect();
        assert_eq!(constants.len(), 1, "{graph}");
        assert_eq!(
            constants[0].opcode.constant_value(),
            Some(&ConstValue::Int32(5))
        );
        // The return's input is that constant.
        assert_eq!(graph.node(ret).unwrap().inputs()[0], constants[0].id);

        assert!(outcome.applied.contains(OptFlag::CONSTANT_FOLDING));
        assert!(outcome.applied.contains(OptFlag::COMMON_SUBEXPRESSION));
        assert!(outcome.applied.contains(OptFlag::DEAD_CODE_ELIMINATION));
    }

    #[test]
    fn o0_compiles_without_transforming() {
        let (graph, _) = double_add_graph();
        let before = graph.node_count();
        let outcome = Pipeline::new(OptLevel::O0)
            .compile_graph(graph, &NullCodeEmitter)
            .unwrap();
        assert_eq!(outcome.graph.node_count(), before);
        assert!(outcome.applied.is_empty());
    }

    #[test]
    fn cancellation_between_passes() {
        let (graph, _) = double_add_graph();
        let cancel = Arc::new(AtomicBool::new(true));
        let pipeline = Pipeline::with_options(PipelineOptions {
            cancel: Some(cancel),
            ..PipelineOptions::for_level(OptLevel::O2)
        });

        let result = pipeline.compile_graph(graph, &NullCodeEmitter);
        assert!(matches!(result, Err(CompileError::Cancelled)));
    }

    #[test]
    fn progress_reports_phases_in_bounds() {
        let (graph, _) = double_add_graph();
        let seen: Arc<Mutex<Vec<(Phase, String, f32)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let pipeline = Pipeline::with_options(PipelineOptions {
            progress: Some(Box::new(move |phase, stage, fraction| {
                sink.lock().push((phase, stage.to_string(), fraction));
            })),
            ..PipelineOptions::for_level(OptLevel::O2)
        });

        pipeline.compile_graph(graph, &NullCodeEmitter).unwrap();
        let events = seen.lock();
        assert!(!events.is_empty());
        assert!(events.iter().all(|(_, _, f)| (0.0..=1.0).contains(f)));
        assert!(events.iter().any(|(p, _, _)| *p == Phase::MiddleEnd));
        assert!(events.iter().any(|(p, _, _)| *p == Phase::CodeGen));
        // Emission is reported last.
        assert_eq!(events.last().unwrap().0, Phase::CodeGen);
    }

    #[test]
    fn emitter_receives_backend_liveness_and_escape_verdict() {
        // A value live across a block boundary plus an escaping return:
        // the emitted size must reflect one spill slot and frame setup.
        let mut graph = Graph::new();
        let entry = graph.create_basic_block("entry");
        let exit = graph.create_basic_block("exit");
        graph.set_entry_block(entry);

        let a = graph.create_constant(ConstValue::Int32(1));
        let b = graph.create_constant(ConstValue::Int32(2));
        let add = graph
            .create_binary_op(Opcode::Arith(ArithOp::Add), a, b, IrType::Any)
            .unwrap();
        graph.append_instruction(entry, add).unwrap();
        let jump = graph.create_jump(exit);
        graph.terminate(entry, jump).unwrap();
        let ret = graph.create_return(Some(add)).unwrap();
        graph.terminate(exit, ret).unwrap();

        // O0 leaves the graph untouched, so the size model is exact:
        // nodes, one live-across value, frame bytes for the return.
        let outcome = Pipeline::new(OptLevel::O0)
            .compile_graph(graph, &NullCodeEmitter)
            .unwrap();
        let nodes = outcome.graph.node_count();
        assert_eq!(outcome.code.size, nodes * 16 + 8 + 32);
    }

    #[test]
    fn invalid_graph_fails_verification() {
        // Control flow mid-block.
        let mut graph = Graph::new();
        let entry = graph.create_basic_block("entry");
        graph.set_entry_block(entry);
        let ret = graph.create_return(None).unwrap();
        graph.append_instruction(entry, ret).unwrap();
        let c = graph.create_constant(ConstValue::Int32(1));
        let neg = graph.create_node(Opcode::Arith(ArithOp::Neg), IrType::Any);
        graph.add_input(neg, c).unwrap();
        graph.append_instruction(entry, neg).unwrap();

        let result = Pipeline::new(OptLevel::O1).compile_graph(graph, &NullCodeEmitter);
        assert!(matches!(result, Err(CompileError::VerifyFailed { .. })));
    }
}
