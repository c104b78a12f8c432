//! The IR module: the front-end's hand-off to the optimizer and back-end.

use crate::error::{Error, Result};
use crate::ir::debug::{DebugEntries, DebugEntryId, FunctionSourceMap};
use crate::ir::types::{IrType, TypeId};
use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::{entity_impl, PrimaryMap};
use rustc_hash::FxHashMap;

/// An interned symbol in the module-wide string pool.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(u32);
entity_impl!(SymbolId, "sym");

/// A big-integer literal in the module pool.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BigIntId(u32);
entity_impl!(BigIntId, "bigint");

/// A function declaration id.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncDeclId(u32);
entity_impl!(FuncDeclId, "fndecl");

/// An arbitrary-bit-width integer constant, stored as little-endian qwords.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BigInt {
    pub bitwidth: u32,
    pub digits: Vec<u64>,
}

impl BigInt {
    pub fn new(bitwidth: u32, digits: Vec<u64>) -> Self {
        Self { bitwidth, digits }
    }

    /// Extract the low 64 bits with sign extension from `bitwidth`.
    pub fn get_signed(&self) -> i64 {
        let raw = self.digits.first().copied().unwrap_or(0);
        if self.bitwidth == 0 {
            return 0;
        }
        if self.bitwidth >= 64 {
            return raw as i64;
        }
        let shift = 64 - self.bitwidth;
        ((raw << shift) as i64) >> shift
    }

    /// Extract the low 64 bits with zero extension from `bitwidth`.
    pub fn get_unsigned(&self) -> u64 {
        let raw = self.digits.first().copied().unwrap_or(0);
        if self.bitwidth == 0 {
            return 0;
        }
        if self.bitwidth >= 64 {
            return raw;
        }
        raw & (u64::MAX >> (64 - self.bitwidth))
    }
}

/// A function declaration: name plus parameter and result type sequences.
#[derive(Clone, Debug)]
pub struct FunctionDecl {
    pub id: FuncDeclId,
    pub name: SymbolId,
    pub params_type_id: TypeId,
    pub result_type_id: TypeId,
    pub vararg: bool,
    /// `returns_twice` semantics (setjmp-like); disables inlining. The
    /// front-end contract around setting this flag is still open, so the
    /// only in-tree writer is this constructor.
    pub returns_twice: bool,
}

/// Per-function metadata carried alongside the function's optimizer body.
#[derive(Clone, Debug)]
pub struct IrFunction {
    pub decl: FuncDeclId,
    /// Set when the function was compiled with the `inline` specifier.
    pub inline_function: bool,
    /// Number of IR instructions in the front-end body; debug code offsets
    /// index into this range.
    pub ir_code_length: usize,
    /// The subprogram debug entry for this function, if debug info is on.
    pub subprogram_id: PackedOption<DebugEntryId>,
    /// IR-code-offset → source location mapping.
    pub source_map: FunctionSourceMap,
}

/// Module-level IR state: types, declarations, literal pools, debug entries.
///
/// Created by the front-end, read-only during optimization and code
/// generation except for the append-only pools.
pub struct IrModule {
    symbols: PrimaryMap<SymbolId, String>,
    symbol_index: FxHashMap<String, SymbolId>,
    types: PrimaryMap<TypeId, IrType>,
    bigints: PrimaryMap<BigIntId, BigInt>,
    declarations: PrimaryMap<FuncDeclId, FunctionDecl>,
    functions: FxHashMap<FuncDeclId, IrFunction>,
    functions_by_name: FxHashMap<SymbolId, FuncDeclId>,
    inline_asm_templates: Vec<String>,
    debug_entries: DebugEntries,
}

impl IrModule {
    pub fn new() -> Self {
        Self {
            symbols: PrimaryMap::new(),
            symbol_index: FxHashMap::default(),
            types: PrimaryMap::new(),
            bigints: PrimaryMap::new(),
            declarations: PrimaryMap::new(),
            functions: FxHashMap::default(),
            functions_by_name: FxHashMap::default(),
            inline_asm_templates: Vec::new(),
            debug_entries: DebugEntries::new(),
        }
    }

    /// Register an inline assembly template; returns its module-level id.
    pub fn new_inline_asm_template(&mut self, template: &str) -> u64 {
        self.inline_asm_templates.push(template.to_string());
        (self.inline_asm_templates.len() - 1) as u64
    }

    pub fn inline_asm_template(&self, id: u64) -> Result<&str> {
        self.inline_asm_templates
            .get(id as usize)
            .map(|s| s.as_str())
            .ok_or(Error::NotFound("unknown inline assembly template id"))
    }

    /// Intern `name`, returning a stable symbol id.
    pub fn intern_symbol(&mut self, name: &str) -> SymbolId {
        if let Some(&sym) = self.symbol_index.get(name) {
            return sym;
        }
        let sym = self.symbols.push(name.to_string());
        self.symbol_index.insert(name.to_string(), sym);
        sym
    }

    /// The string behind a symbol id.
    pub fn symbol(&self, sym: SymbolId) -> &str {
        &self.symbols[sym]
    }

    /// Register a new named type; the handle is stable for the module's life.
    pub fn new_type(&mut self, ty: IrType) -> TypeId {
        self.types.push(ty)
    }

    pub fn get_type(&self, id: TypeId) -> Result<&IrType> {
        self.types.get(id).ok_or(Error::NotFound("unknown IR type id"))
    }

    /// Add a big-integer literal to the pool.
    pub fn new_bigint(&mut self, value: BigInt) -> BigIntId {
        self.bigints.push(value)
    }

    pub fn get_bigint(&self, id: BigIntId) -> Result<&BigInt> {
        self.bigints
            .get(id)
            .ok_or(Error::NotFound("unknown big integer id"))
    }

    /// Declare a function; returns its stable declaration id.
    pub fn declare_function(
        &mut self,
        name: &str,
        params_type_id: TypeId,
        result_type_id: TypeId,
        vararg: bool,
    ) -> FuncDeclId {
        let name = self.intern_symbol(name);
        let id = self.declarations.next_key();
        let decl = FunctionDecl {
            id,
            name,
            params_type_id,
            result_type_id,
            vararg,
            returns_twice: false,
        };
        let id = self.declarations.push(decl);
        self.functions_by_name.insert(name, id);
        id
    }

    /// Attach a definition to a previously declared function.
    pub fn define_function(&mut self, decl: FuncDeclId, function: IrFunction) -> Result<()> {
        if !self.declarations.is_valid(decl) {
            return Err(Error::NotFound("unknown function declaration id"));
        }
        if self.functions.contains_key(&decl) {
            return Err(Error::InvalidRequest("function is already defined"));
        }
        self.functions.insert(decl, function);
        Ok(())
    }

    pub fn get_declaration(&self, id: FuncDeclId) -> Result<&FunctionDecl> {
        self.declarations
            .get(id)
            .ok_or(Error::NotFound("unknown function declaration id"))
    }

    pub fn get_declaration_mut(&mut self, id: FuncDeclId) -> Result<&mut FunctionDecl> {
        self.declarations
            .get_mut(id)
            .ok_or(Error::NotFound("unknown function declaration id"))
    }

    /// Function metadata for a defined function.
    pub fn get_function(&self, decl: FuncDeclId) -> Option<&IrFunction> {
        self.functions.get(&decl)
    }

    pub fn get_function_mut(&mut self, decl: FuncDeclId) -> Option<&mut IrFunction> {
        self.functions.get_mut(&decl)
    }

    pub fn function_by_name(&self, name: SymbolId) -> Option<FuncDeclId> {
        self.functions_by_name.get(&name).copied()
    }

    /// Iterate over defined function declaration ids in a stable order.
    pub fn function_ids(&self) -> Vec<FuncDeclId> {
        let mut ids: Vec<_> = self.functions.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn debug_entries(&self) -> &DebugEntries {
        &self.debug_entries
    }

    pub fn debug_entries_mut(&mut self) -> &mut DebugEntries {
        &mut self.debug_entries
    }
}

impl Default for IrModule {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_interning_is_stable() {
        let mut module = IrModule::new();
        let a = module.intern_symbol("main");
        let b = module.intern_symbol("main");
        let c = module.intern_symbol("other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(module.symbol(a), "main");
    }

    #[test]
    fn bigint_narrow_extraction() {
        let v = BigInt::new(5, vec![0b11111]);
        assert_eq!(v.get_signed(), -1);
        assert_eq!(v.get_unsigned(), 31);

        let v = BigInt::new(200, vec![42, 0, 0, 1]);
        assert_eq!(v.get_unsigned(), 42);
        assert_eq!(v.get_signed(), 42);
    }

    #[test]
    fn double_definition_is_rejected() {
        let mut module = IrModule::new();
        let params = module.new_type(IrType::new());
        let result = module.new_type(IrType::new());
        let decl = module.declare_function("f", params, result, false);
        let func = IrFunction {
            decl,
            inline_function: false,
            ir_code_length: 0,
            subprogram_id: None.into(),
            source_map: FunctionSourceMap::new(),
        };
        module.define_function(decl, func.clone()).unwrap();
        assert!(matches!(
            module.define_function(decl, func),
            Err(Error::InvalidRequest(_))
        ));
    }
}
