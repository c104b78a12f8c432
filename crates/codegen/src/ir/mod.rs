//! Intermediate representation consumed from the front-end.
//!
//! The IR module is the read-only substrate of a compilation job: named
//! types, function declarations, the big-integer literal pool, the symbol
//! pool, and the debug entry tree all live here. During code generation it
//! is append-only (the lowering pass may add runtime helper declarations);
//! everything else mutates per-function state owned elsewhere.

pub mod debug;
pub mod module;
pub mod types;

pub use self::debug::{
    DebugAttr, DebugAttrTag, DebugAttrValue, DebugEntries, DebugEntry, DebugEntryId, DebugEntryTag,
    FunctionSourceMap, SourceLocation,
};
pub use self::module::{BigInt, BigIntId, FuncDeclId, FunctionDecl, IrFunction, IrModule, SymbolId};
pub use self::types::{IrType, TypeEntry, TypeId, TypeRef};
