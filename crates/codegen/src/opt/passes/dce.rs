//! Dead code elimination.
//!
//! Dead means: off the control path and with no remaining uses. Uses are
//! recomputed per sweep; the sweep repeats until nothing is removed.

use crate::error::Result;
use crate::opt::code::OirFunction;
use crate::opt::pipeline::{Pass, PipelineConfig};
use crate::opt::OptModule;

pub struct DeadCodePass;

impl Pass for DeadCodePass {
    fn name(&self) -> &'static str {
        "dead-code"
    }

    fn apply(
        &self,
        _module: &mut OptModule,
        func: &mut OirFunction,
        _config: &PipelineConfig,
    ) -> Result<bool> {
        let mut any_removed = false;
        loop {
            let mut removed = false;
            for block in func.block_ids().collect::<Vec<_>>() {
                let mut cursor = func.block(block)?.instr_head();
                while let Some(instr) = cursor {
                    cursor = func.instr(instr)?.next();
                    let data = func.instr(instr)?;
                    if data.is_control_flow() || data.opcode().has_side_effects() {
                        continue;
                    }
                    if !func.has_uses(instr) {
                        func.drop_instr(instr)?;
                        removed = true;
                    }
                }
            }
            any_removed |= removed;
            if !removed {
                break;
            }
        }
        Ok(any_removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FuncDeclId, IrModule};
    use crate::opt::ops::OpWidth;
    use crate::opt::OptModule;
    use cranelift_entity::EntityRef;

    #[test]
    fn unused_values_are_removed_and_used_ones_stay() {
        let mut module = OptModule::new(IrModule::new());
        let mut func = crate::opt::OirFunction::new(FuncDeclId::new(0));
        let entry = func.new_block();
        let a = func.int_const(entry, 1).unwrap();
        let b = func.int_const(entry, 2).unwrap();
        let dead = func.int_const(entry, 3).unwrap();
        let sum = func.int_add(entry, OpWidth::W64, a, b).unwrap();
        func.finalize_return(entry, Some(sum)).unwrap();

        let changed = DeadCodePass
            .apply(&mut module, &mut func, &PipelineConfig::default())
            .unwrap();
        assert!(changed);
        assert!(func.instr(dead).unwrap().block.is_none());
        assert!(func.instr(a).unwrap().block.is_some());
        func.verify().unwrap();
    }
}
