//! The compile orchestrator: tiering, the optimized-function table, and
//! the optional background worker.
//!
//! The interpreter thread sends compile requests and deoptimization
//! reports; the orchestrator consumes requests and publishes immutable
//! [`OptimizedFunction`] records into the shared table. The table and the
//! job queue are the only shared mutable state: the table is a
//! [`DashMap`] of `Arc` records (readers on the dispatch path, one writer
//! publishing results), the queue a bounded crossbeam channel. A compile
//! job owns its graph outright and snapshots everything it needs (profile
//! slice, callee graphs) at creation, so the worker never reaches back
//! into interpreter state.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use crossbeam_channel::{bounded, Sender, TrySendError};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use nebula_ir::{Graph, GraphTypeProfile, OptFlag};
use nebula_profiler::{FunctionTypeSummary, TypeProfiler};
use nebula_trace::{ContextSnapshot, SideExitRecord, Trace};
use nebula_value::{BytecodeAddress, FunctionId};

use crate::config::JitConfig;
use crate::emitter::{CodeEmitter, NativeCode};
use crate::pipeline::{OptLevel, Pipeline, PipelineOptions};

/// Lifecycle of one function's compiled form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionState {
    Queued,
    Compiling,
    Ready,
    Invalidated,
    Failed,
}

/// Why the interpreter requested compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileReason {
    HotLoop,
    HotFunction,
    SideExit,
    Continuation,
    Manual,
}

/// Supplies IR for functions the orchestrator is asked to compile. This
/// is the bytecode-side boundary: the interpreter's own bytecode-to-IR
/// builder lives behind it.
pub trait FunctionSource: Send + Sync {
    /// A fresh graph for the function, or `None` when it cannot be built.
    fn graph_for(&self, function: FunctionId) -> Option<Graph>;

    /// Callee graphs worth considering for inlining into `function`.
    fn inline_candidates(&self, _function: FunctionId) -> HashMap<FunctionId, Graph> {
        HashMap::new()
    }
}

/// One published record in the optimized-function table. Immutable after
/// publication; state changes swap in a new record.
#[derive(Debug, Clone)]
pub struct OptimizedFunction {
    pub id: FunctionId,
    pub state: FunctionState,
    pub level: OptLevel,
    pub code: Option<NativeCode>,
    pub code_size: usize,
    pub applied: OptFlag,
    pub type_summary: Option<FunctionTypeSummary>,
    pub compiled_at: Option<SystemTime>,
    pub compile_time: Option<Duration>,
    /// Deoptimization contract: exit id indexes this list.
    pub side_exits: Vec<SideExitRecord>,
}

impl OptimizedFunction {
    fn placeholder(id: FunctionId, state: FunctionState, level: OptLevel) -> Self {
        OptimizedFunction {
            id,
            state,
            level,
            code: None,
            code_size: 0,
            applied: OptFlag::NONE,
            type_summary: None,
            compiled_at: None,
            compile_time: None,
            side_exits: Vec::new(),
        }
    }
}

enum JobSource {
    Graph(Graph),
    Trace(Box<Trace>),
}

struct CompileJob {
    function: FunctionId,
    reason: CompileReason,
    level: OptLevel,
    source: JobSource,
    inline_sources: HashMap<FunctionId, Graph>,
    type_summary: Option<FunctionTypeSummary>,
}

/// Shared pieces the worker needs.
struct Shared {
    config: JitConfig,
    emitter: Arc<dyn CodeEmitter>,
    table: Arc<DashMap<FunctionId, Arc<OptimizedFunction>>>,
    cancel: Arc<AtomicBool>,
}

/// Manages per-function compilation state and tiering decisions.
pub struct Orchestrator {
    shared: Arc<Shared>,
    source: Arc<dyn FunctionSource>,
    sender: Option<Sender<CompileJob>>,
    worker: Option<JoinHandle<()>>,
    deopt_events: Mutex<HashMap<FunctionId, VecDeque<Instant>>>,
}

impl Orchestrator {
    pub fn new(
        config: JitConfig,
        source: Arc<dyn FunctionSource>,
        emitter: Arc<dyn CodeEmitter>,
    ) -> Self {
        let shared = Arc::new(Shared {
            config: config.clone(),
            emitter,
            table: Arc::new(DashMap::new()),
            cancel: Arc::new(AtomicBool::new(false)),
        });

        let (sender, worker) = if config.enable_background_compilation {
            let (tx, rx) = bounded::<CompileJob>(config.job_queue_capacity.max(1));
            let worker_shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name("nebula-compile".to_string())
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        if worker_shared.cancel.load(Ordering::Acquire) {
                            break;
                        }
                        run_job(&worker_shared, job);
                    }
                })
                .expect("spawning the compile worker cannot fail");
            (Some(tx), Some(handle))
        } else {
            (None, None)
        };

        Orchestrator {
            shared,
            source,
            sender,
            worker,
            deopt_events: Mutex::new(HashMap::new()),
        }
    }

    // -----------------------------------------------------------------------
    // Interpreter-facing API
    // -----------------------------------------------------------------------

    /// Handles a hot-function signal: consults the profiler, picks a tier,
    /// and compiles (inline or on the worker). Returns whether a job was
    /// accepted.
    pub fn request_compile(
        &self,
        function: FunctionId,
        reason: CompileReason,
        profiler: &TypeProfiler,
    ) -> bool {
        if !self.shared.config.enable_jit {
            return false;
        }

        let summary = profiler.function_type_summary(function);
        let level = self.choose_level(summary);

        let Some(mut graph) = self.source.graph_for(function) else {
            debug!(%function, "no IR source; marking failed");
            self.publish(OptimizedFunction::placeholder(
                function,
                FunctionState::Failed,
                level,
            ));
            return false;
        };

        // Snapshot the profile slice the optimizer will read; the worker
        // must never touch the live profiler.
        let params: Vec<_> = (0..u32::MAX)
            .map_while(|index| profiler.param_type_info(function, index).cloned())
            .collect();
        graph.set_type_profile(GraphTypeProfile {
            params,
            summary: Some(summary),
        });

        let inline_sources = if level >= OptLevel::O3 {
            self.source.inline_candidates(function)
        } else {
            HashMap::new()
        };

        self.submit(CompileJob {
            function,
            reason,
            level,
            source: JobSource::Graph(graph),
            inline_sources,
            type_summary: Some(summary),
        })
    }

    /// Compiles a completed trace for the function that recorded it.
    pub fn submit_trace(
        &self,
        function: FunctionId,
        trace: Trace,
        profiler: &TypeProfiler,
    ) -> bool {
        if !self.shared.config.enable_jit {
            return false;
        }
        let summary = profiler.function_type_summary(function);
        let level = self.choose_level(summary);
        self.submit(CompileJob {
            function,
            reason: CompileReason::HotLoop,
            level,
            source: JobSource::Trace(Box::new(trace)),
            inline_sources: HashMap::new(),
            type_summary: Some(summary),
        })
    }

    /// The dispatch-path lookup: only `Ready` records bind callers.
    pub fn lookup_compiled(&self, function: FunctionId) -> Option<Arc<OptimizedFunction>> {
        let record = self.shared.table.get(&function)?;
        if record.state == FunctionState::Ready {
            Some(Arc::clone(record.value()))
        } else {
            None
        }
    }

    pub fn function_state(&self, function: FunctionId) -> Option<FunctionState> {
        self.shared.table.get(&function).map(|r| r.state)
    }

    /// Deoptimization callback: resolves a side exit to the bytecode
    /// address and snapshot the interpreter resumes from, and feeds the
    /// deopt-storm detector.
    pub fn on_side_exit(
        &self,
        function: FunctionId,
        exit_id: u32,
    ) -> Option<(BytecodeAddress, ContextSnapshot)> {
        let (resume, updated) = {
            let record = self.shared.table.get(&function)?;
            let exit = record.side_exits.get(exit_id as usize)?;
            let resume = (exit.location, exit.context.clone());
            // Per-exit execution accounting feeds side-trace heuristics.
            let mut updated = OptimizedFunction::clone(&record);
            updated.side_exits[exit_id as usize].executions += 1;
            (resume, updated)
        };
        self.publish(updated);
        self.note_deoptimization(function);
        Some(resume)
    }

    /// Side exits of a function hot enough to deserve a side trace.
    pub fn hot_side_exits(&self, function: FunctionId, threshold: u32) -> Vec<u32> {
        match self.shared.table.get(&function) {
            Some(record) => record
                .side_exits
                .iter()
                .enumerate()
                .filter(|(_, exit)| exit.needs_side_trace(threshold))
                .map(|(index, _)| index as u32)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Marks one function's compiled form unusable. No new callers bind
    /// to it; in-flight frames finish on their own.
    pub fn invalidate(&self, function: FunctionId) {
        // Clone out of the table first; holding the map guard across the
        // publish would self-deadlock.
        let existing = self
            .shared
            .table
            .get(&function)
            .map(|r| Arc::clone(r.value()));
        if let Some(record) = existing {
            info!(%function, "invalidating compiled code");
            let mut next = OptimizedFunction::placeholder(
                function,
                FunctionState::Invalidated,
                record.level,
            );
            next.type_summary = record.type_summary;
            self.publish(next);
        }
    }

    /// Drains every `Ready` entry.
    pub fn invalidate_all(&self) {
        let ready: Vec<FunctionId> = self
            .shared
            .table
            .iter()
            .filter(|entry| entry.state == FunctionState::Ready)
            .map(|entry| *entry.key())
            .collect();
        for function in ready {
            self.invalidate(function);
        }
    }

    /// Stops the background worker and cancels in-flight jobs.
    pub fn shutdown(&mut self) {
        self.shared.cancel.store(true, Ordering::Release);
        self.sender = None; // closes the channel
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn choose_level(&self, summary: FunctionTypeSummary) -> OptLevel {
        if summary.confidence >= self.shared.config.tier_up_confidence
            && (summary.monomorphic || summary.mostly_int32 || summary.mostly_number)
        {
            OptLevel::O2
        } else {
            OptLevel::O1
        }
    }

    fn submit(&self, job: CompileJob) -> bool {
        let function = job.function;
        match &self.sender {
            Some(sender) => {
                self.publish(OptimizedFunction::placeholder(
                    function,
                    FunctionState::Queued,
                    job.level,
                ));
                match sender.try_send(job) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                        warn!(%function, "compile queue unavailable; dropping request");
                        self.publish(OptimizedFunction::placeholder(
                            function,
                            FunctionState::Failed,
                            OptLevel::O0,
                        ));
                        false
                    }
                }
            }
            None => {
                run_job(&self.shared, job);
                true
            }
        }
    }

    fn publish(&self, record: OptimizedFunction) {
        self.shared.table.insert(record.id, Arc::new(record));
    }

    /// Sliding-window deoptimization accounting. A storm invalidates the
    /// function and requeues it one tier lower; a function that storms at
    /// the lowest optimizing tier stays with the interpreter for good.
    fn note_deoptimization(&self, function: FunctionId) {
        let now = Instant::now();
        let window = Duration::from_millis(self.shared.config.deopt_window_ms);
        let storming = {
            let mut events = self.deopt_events.lock();
            let history = events.entry(function).or_default();
            history.push_back(now);
            while history
                .front()
                .is_some_and(|&t| now.duration_since(t) > window)
            {
                history.pop_front();
            }
            history.len() > self.shared.config.deopt_storm_threshold
        };
        if !storming {
            return;
        }
        self.deopt_events.lock().remove(&function);

        let level = self
            .shared
            .table
            .get(&function)
            .map(|r| r.level)
            .unwrap_or(OptLevel::O1);
        self.invalidate(function);

        match level.lower() {
            Some(lower) if lower >= OptLevel::O1 => {
                info!(%function, ?lower, "deoptimization storm; retiering down");
                if let Some(graph) = self.source.graph_for(function) {
                    self.submit(CompileJob {
                        function,
                        reason: CompileReason::SideExit,
                        level: lower,
                        source: JobSource::Graph(graph),
                        inline_sources: HashMap::new(),
                        type_summary: None,
                    });
                }
            }
            _ => {
                info!(%function, "deoptimization storm at lowest tier; pinning to interpreter");
            }
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs one compile job and publishes the outcome. Shared by the inline
/// path and the worker thread; both are observationally equivalent --
/// compilation reads only the job's own snapshots and publishes a record.
fn run_job(shared: &Shared, job: CompileJob) {
    let function = job.function;
    shared.table.insert(
        function,
        Arc::new(OptimizedFunction::placeholder(
            function,
            FunctionState::Compiling,
            job.level,
        )),
    );

    let options = PipelineOptions {
        level: job.level,
        use_type_speculation: shared.config.use_type_speculation,
        use_inlining: shared.config.use_inlining,
        inline_sources: job.inline_sources,
        max_inline_size: shared.config.max_inline_size,
        max_inline_depth: shared.config.max_inline_depth,
        cancel: Some(Arc::clone(&shared.cancel)),
        progress: None,
    };
    let pipeline = Pipeline::with_options(options);

    let (result, side_exits) = match job.source {
        JobSource::Graph(graph) => (pipeline.compile_graph(graph, shared.emitter.as_ref()), Vec::new()),
        JobSource::Trace(trace) => (
            pipeline.compile_trace(&trace, shared.emitter.as_ref()),
            trace.side_exits.clone(),
        ),
    };

    let record = match result {
        Ok(outcome) => {
            debug!(
                %function,
                reason = ?job.reason,
                level = ?job.level,
                nodes = outcome.graph.node_count(),
                "compilation finished"
            );
            OptimizedFunction {
                id: function,
                state: FunctionState::Ready,
                level: job.level,
                code_size: outcome.code.size,
                code: Some(outcome.code),
                applied: outcome.applied,
                type_summary: job.type_summary,
                compiled_at: Some(SystemTime::now()),
                compile_time: Some(outcome.compile_time),
                side_exits,
            }
        }
        Err(error) => {
            warn!(%function, %error, "compilation failed; function stays interpreted");
            OptimizedFunction::placeholder(function, FunctionState::Failed, job.level)
        }
    };
    shared.table.insert(function, Arc::new(record));
}
