//! Block-local store-to-load forwarding for frame allocations.
//!
//! The conservative subset of memory-to-register promotion: when a local
//! allocation's address never escapes, a load observes the value of the
//! latest preceding store in the same block. Cross-block promotion with φ
//! insertion is left to future work; this pass keeps the common
//! spill-reload chatter produced by the front-end out of the back-end.

use crate::error::Result;
use crate::opt::code::{InstrRef, OirFunction};
use crate::opt::ops::{Opcode, OperationData};
use crate::opt::pipeline::{Pass, PipelineConfig};
use crate::opt::OptModule;
use rustc_hash::{FxHashMap, FxHashSet};

pub struct Mem2RegPass;

/// Allocations whose address is used by anything besides a direct load or
/// store location escape and are not forwardable.
fn escaping_allocations(func: &OirFunction) -> Result<FxHashSet<InstrRef>> {
    let mut allocations = FxHashSet::default();
    let mut escaping = FxHashSet::default();
    for block in func.block_ids() {
        for instr in func.block_instrs(block) {
            if func.instr(instr)?.opcode() == Opcode::AllocLocal {
                allocations.insert(instr);
            }
        }
    }
    for block in func.block_ids() {
        for instr in func.block_instrs(block) {
            match func.instr(instr)?.op {
                // A load from or store to the slot itself is not an escape.
                OperationData::Load { .. } => {}
                OperationData::Store { value, .. } => {
                    if allocations.contains(&value) {
                        escaping.insert(value);
                    }
                }
                ref op => {
                    op.for_each_ref(|r| {
                        if allocations.contains(&r) {
                            escaping.insert(r);
                        }
                    });
                }
            }
        }
    }
    for instr in allocations {
        if func.has_side_node_uses(instr) {
            escaping.insert(instr);
        }
    }
    Ok(escaping)
}

impl Pass for Mem2RegPass {
    fn name(&self) -> &'static str {
        "mem2reg"
    }

    fn apply(
        &self,
        _module: &mut OptModule,
        func: &mut OirFunction,
        _config: &PipelineConfig,
    ) -> Result<bool> {
        let escaping = escaping_allocations(func)?;
        let mut changed = false;

        for block in func.block_ids().collect::<Vec<_>>() {
            // Latest stored value per allocation within this block.
            let mut known: FxHashMap<InstrRef, InstrRef> = FxHashMap::default();
            let mut cursor = func.block(block)?.instr_head();
            while let Some(instr) = cursor {
                cursor = func.instr(instr)?.next();
                match func.instr(instr)?.op {
                    OperationData::Store {
                        location,
                        value,
                        flags,
                        ..
                    } => {
                        if flags.volatile {
                            known.clear();
                        } else if func.instr(location)?.opcode() == Opcode::AllocLocal
                            && !escaping.contains(&location)
                        {
                            known.insert(location, value);
                        }
                    }
                    OperationData::Load {
                        location, flags, ..
                    } => {
                        if flags.volatile {
                            continue;
                        }
                        if let Some(&value) = known.get(&location) {
                            if func.has_uses(instr) {
                                func.replace_references(value, instr)?;
                                changed = true;
                            }
                        }
                    }
                    // A call may store through any escaped pointer.
                    OperationData::Call { .. } | OperationData::InlineAsm { .. } => known.clear(),
                    OperationData::TypedMem { .. } => known.clear(),
                    _ => {}
                }
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FuncDeclId, IrModule, IrType, TypeEntry, TypeRef};
    use crate::opt::ops::{MemoryAccessFlags, OpWidth};
    use cranelift_entity::EntityRef;

    #[test]
    fn store_forwarded_to_following_load() {
        let mut ir = IrModule::new();
        let mut ty = IrType::new();
        ty.append(TypeEntry::Int32);
        let type_id = ir.new_type(ty);
        let mut module = OptModule::new(ir);

        let mut func = OirFunction::new(FuncDeclId::new(0));
        let entry = func.new_block();
        let slot = func.alloc_local(entry, TypeRef::new(type_id, 0)).unwrap();
        let value = func.int_const(entry, 42).unwrap();
        func.int_store(entry, OpWidth::W32, slot, value, MemoryAccessFlags::plain())
            .unwrap();
        let load = func
            .int_load(entry, OpWidth::W32, slot, MemoryAccessFlags::plain())
            .unwrap();
        func.finalize_return(entry, Some(load)).unwrap();

        assert!(Mem2RegPass
            .apply(&mut module, &mut func, &PipelineConfig::default())
            .unwrap());
        let ret = func.block_terminator(entry).unwrap();
        match func.instr(ret).unwrap().op {
            OperationData::OptRef1 { arg, .. } => assert_eq!(arg.expand(), Some(value)),
            ref other => panic!("unexpected return shape: {other:?}"),
        }
    }
}
