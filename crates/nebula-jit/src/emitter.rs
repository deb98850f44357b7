//! The code-emission boundary.
//!
//! The actual assembler and register allocator live outside the core.
//! [`CodeEmitter`] is the seam: a verified, optimized graph goes in
//! together with its liveness result, an opaque [`NativeCode`] handle
//! comes out. Liveness drives register assignment and spill decisions;
//! the graph's escape check decides frame layout (a fragment with no
//! escaping values can stay a leaf and skip frame setup).
//! [`NullCodeEmitter`] is the stub used by tests and by embedders that
//! only want the analysis side.

use nebula_ir::{Graph, Liveness};

use crate::error::CompileError;

/// Byte cost per emitted node in the stub emitter's size model.
const BYTES_PER_NODE: usize = 16;

/// Byte cost per spill slot in the stub emitter's size model.
const BYTES_PER_SPILL_SLOT: usize = 8;

/// Frame prologue/epilogue bytes charged when values escape the fragment.
const FRAME_SETUP_BYTES: usize = 32;

/// Opaque handle to emitted native code. Release of the underlying memory
/// is the emitter's concern; the core only stores and hands out handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeCode {
    /// Entry address in the emitter's address space.
    pub entry: usize,
    /// Emitted size in bytes.
    pub size: usize,
}

/// Turns graphs into native code.
pub trait CodeEmitter: Send + Sync {
    /// Emits `graph`. `liveness` is the backward-dataflow result the
    /// pipeline computed in its backend phase, ready for register
    /// allocation on the far side of the boundary.
    fn emit(&self, graph: &Graph, liveness: &Liveness) -> Result<NativeCode, CompileError>;
}

/// Emits nothing, but prices the graph the way a real backend would:
/// bytes per node, spill space for the widest live set, and frame setup
/// only when a value can escape the fragment.
#[derive(Debug, Default)]
pub struct NullCodeEmitter;

impl CodeEmitter for NullCodeEmitter {
    fn emit(&self, graph: &Graph, liveness: &Liveness) -> Result<NativeCode, CompileError> {
        let spill_slots = graph
            .blocks()
            .map(|block| liveness.live_out(block.id).len())
            .max()
            .unwrap_or(0);
        let frame = if graph.has_escaping_values() {
            FRAME_SETUP_BYTES
        } else {
            0
        };
        Ok(NativeCode {
            entry: 0,
            size: graph.node_count() * BYTES_PER_NODE + spill_slots * BYTES_PER_SPILL_SLOT + frame,
        })
    }
}
