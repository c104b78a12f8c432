//! SSA optimizer: code containers, structure index, pass pipeline.

pub mod builder;
pub mod code;
pub mod debug;
pub mod inline;
pub mod ops;
pub mod passes;
pub mod pipeline;
pub mod structure;

use crate::error::{Error, Result};
use crate::ir::{FuncDeclId, IrModule};
use rustc_hash::FxHashMap;

pub use self::code::{BlockId, CallRef, InlineAsmRef, InstrRef, OirFunction, PhiRef};
pub use self::pipeline::{Pass, Pipeline, PipelineConfig};
pub use self::structure::OirCodeStructure;

/// A module under optimization: the IR substrate plus the SSA body of every
/// defined function.
pub struct OptModule {
    pub ir: IrModule,
    functions: FxHashMap<FuncDeclId, OirFunction>,
}

impl OptModule {
    pub fn new(ir: IrModule) -> Self {
        Self {
            ir,
            functions: FxHashMap::default(),
        }
    }

    pub fn insert_function(&mut self, func: OirFunction) {
        self.functions.insert(func.decl, func);
    }

    pub fn get_function(&self, decl: FuncDeclId) -> Option<&OirFunction> {
        self.functions.get(&decl)
    }

    /// Detach a function body for mutation. Passes operate on the detached
    /// body while the rest of the module stays addressable, then return it
    /// with [`OptModule::put_function`].
    pub fn take_function(&mut self, decl: FuncDeclId) -> Result<OirFunction> {
        self.functions
            .remove(&decl)
            .ok_or(Error::NotFound("function body is not registered"))
    }

    pub fn put_function(&mut self, func: OirFunction) {
        self.functions.insert(func.decl, func);
    }

    /// Defined function ids in a stable order.
    pub fn function_ids(&self) -> Vec<FuncDeclId> {
        let mut ids: Vec<_> = self.functions.keys().copied().collect();
        ids.sort();
        ids
    }
}
