//! Debug information carried alongside the SSA code of one function.
//!
//! The location cursor attributes every newly built instruction to an IR
//! code index; local-variable maps connect allocation instructions to the
//! front-end variable ids so the DWARF emitter can produce location lists
//! after register allocation.

use crate::opt::code::InstrRef;
use rustc_hash::{FxHashMap, FxHashSet};

/// Front-end local variable id.
pub type VariableId = u64;

#[derive(Clone, Debug, Default)]
pub struct OirDebugInfo {
    /// When set, every instruction created by the builder is attributed to
    /// this IR code index.
    pub instruction_location_cursor: Option<usize>,
    per_instr_location: FxHashMap<InstrRef, usize>,
    /// Variable id → the set of allocation instructions standing for it.
    variable_allocations: FxHashMap<VariableId, FxHashSet<InstrRef>>,
    /// Allocation instruction → variable id.
    allocation_variable: FxHashMap<InstrRef, VariableId>,
    /// Allocation instruction → value instructions observed to hold the
    /// variable.
    local_variable_refs: FxHashMap<InstrRef, FxHashSet<InstrRef>>,
    /// Total length of the function's IR code, grown when callee code is
    /// appended by inlining.
    pub ir_code_length: usize,
}

impl OirDebugInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_instruction_location(&mut self, instr: InstrRef, location: usize) {
        self.per_instr_location.insert(instr, location);
    }

    pub fn instruction_location(&self, instr: InstrRef) -> Option<usize> {
        self.per_instr_location.get(&instr).copied()
    }

    pub fn register_local_variable_allocation(&mut self, instr: InstrRef, variable: VariableId) {
        self.variable_allocations
            .entry(variable)
            .or_default()
            .insert(instr);
        self.allocation_variable.insert(instr, variable);
    }

    pub fn add_local_variable_ref(&mut self, allocation: InstrRef, value: InstrRef) {
        self.local_variable_refs
            .entry(allocation)
            .or_default()
            .insert(value);
    }

    pub fn allocation_variable(&self, instr: InstrRef) -> Option<VariableId> {
        self.allocation_variable.get(&instr).copied()
    }

    pub fn variable_allocations(&self, variable: VariableId) -> Option<&FxHashSet<InstrRef>> {
        self.variable_allocations.get(&variable)
    }

    pub fn variables(&self) -> impl Iterator<Item = VariableId> + '_ {
        self.variable_allocations.keys().copied()
    }

    pub fn allocations(&self) -> impl Iterator<Item = InstrRef> + '_ {
        self.allocation_variable.keys().copied()
    }

    pub fn local_variable_refs(&self, allocation: InstrRef) -> Option<&FxHashSet<InstrRef>> {
        self.local_variable_refs.get(&allocation)
    }

    /// Re-point local variable tracking from one instruction to another,
    /// used when a pass replaces a value (e.g. an inlined call result with
    /// the join φ).
    pub fn replace_local_variable(&mut self, from: InstrRef, to: InstrRef) {
        if let Some(variable) = self.allocation_variable.remove(&from) {
            self.allocation_variable.insert(to, variable);
            if let Some(set) = self.variable_allocations.get_mut(&variable) {
                set.remove(&from);
                set.insert(to);
            }
        }
        if let Some(refs) = self.local_variable_refs.remove(&from) {
            self.local_variable_refs.entry(to).or_default().extend(refs);
        }
        for set in self.local_variable_refs.values_mut() {
            if set.remove(&from) {
                set.insert(to);
            }
        }
        for set in self.variable_allocations.values_mut() {
            if set.remove(&from) {
                set.insert(to);
            }
        }
    }
}
