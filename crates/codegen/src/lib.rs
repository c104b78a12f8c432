//! SSA optimizer and AMD64 code generator for the kefir C17 compiler.
//!
//! The crate owns the middle and back end of the compilation pipeline. The
//! front-end hands over an [`ir::IrModule`] plus per-function SSA bodies
//! ([`opt::OirFunction`]); the optimizer pipeline transforms them, the
//! lowering stage rewrites wide-integer primitives into runtime helper
//! calls, and the back-end turns each function into AMD64 text through a
//! virtual-register assembly stream ([`asmcmp`]), a linear-scan register
//! allocator, an in-place devirtualization rewrite and the textual
//! assembly sink ([`xasmgen`]). DWARF debug sections are emitted once per
//! module, structurally synchronized with the generated code.

pub mod asmcmp;
pub mod codegen;
pub mod dwarf;
pub mod error;
pub mod ir;
pub mod opt;
pub mod xasmgen;

pub use crate::codegen::{generate_module, CodegenConfig};
pub use crate::error::{Error, Result};

/// Compile an optimizer module end to end: optimization pipeline, lowering
/// and code generation into the given sink.
pub fn compile_module(
    module: &mut opt::OptModule,
    sink: &mut dyn xasmgen::AsmSink,
    pipeline_config: &opt::PipelineConfig,
    codegen_config: &CodegenConfig,
) -> Result<()> {
    let pipeline = opt::passes::default_pipeline();
    pipeline.run_module(module, pipeline_config)?;
    codegen::lowering::lower_module(module)?;
    generate_module(module, sink, codegen_config)
}
