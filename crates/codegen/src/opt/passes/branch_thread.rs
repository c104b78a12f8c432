//! Branch threading: conditional branches over constant conditions become
//! unconditional jumps, and the dead edge's φ links are detached.

use crate::error::Result;
use crate::opt::code::OirFunction;
use crate::opt::ops::{Immediate, OperationData};
use crate::opt::pipeline::{Pass, PipelineConfig};
use crate::opt::OptModule;

pub struct BranchThreadPass;

impl Pass for BranchThreadPass {
    fn name(&self) -> &'static str {
        "branch-thread"
    }

    fn apply(
        &self,
        _module: &mut OptModule,
        func: &mut OirFunction,
        _config: &PipelineConfig,
    ) -> Result<bool> {
        let mut changed = false;
        for block in func.block_ids().collect::<Vec<_>>() {
            let Some(terminator) = func.block_terminator(block) else {
                continue;
            };
            let (condition, target, alternative) = match func.instr(terminator)?.op {
                OperationData::Branch {
                    condition,
                    target,
                    alternative,
                    ..
                } => (condition, target, alternative),
                _ => continue,
            };
            let taken = match func.instr(condition)?.op {
                OperationData::Imm {
                    imm: Immediate::Int(v),
                    ..
                } => {
                    if v != 0 {
                        target
                    } else {
                        alternative
                    }
                }
                OperationData::Imm {
                    imm: Immediate::Uint(v),
                    ..
                } => {
                    if v != 0 {
                        target
                    } else {
                        alternative
                    }
                }
                _ => continue,
            };
            let dead = if taken == target { alternative } else { target };

            func.drop_control(terminator)?;
            func.drop_instr(terminator)?;
            func.finalize_jump(block, taken)?;
            if dead != taken {
                let phis = func.block(dead)?.phis.clone();
                for phi in phis {
                    if func.phi(phi)?.link(block).is_some() {
                        func.phi_unlink(phi, block)?;
                    }
                }
            }
            changed = true;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FuncDeclId, IrModule};
    use crate::opt::ops::{CondVariant, Opcode};
    use cranelift_entity::EntityRef;

    #[test]
    fn constant_branch_becomes_jump() {
        let mut module = OptModule::new(IrModule::new());
        let mut func = OirFunction::new(FuncDeclId::new(0));
        let entry = func.new_block();
        let then_block = func.new_block();
        let else_block = func.new_block();
        let cond = func.int_const(entry, 1).unwrap();
        func.finalize_branch(entry, CondVariant::W8, cond, then_block, else_block)
            .unwrap();
        let v1 = func.int_const(then_block, 1).unwrap();
        func.finalize_return(then_block, Some(v1)).unwrap();
        let v2 = func.int_const(else_block, 2).unwrap();
        func.finalize_return(else_block, Some(v2)).unwrap();

        assert!(BranchThreadPass
            .apply(&mut module, &mut func, &PipelineConfig::default())
            .unwrap());
        let terminator = func.block_terminator(entry).unwrap();
        match func.instr(terminator).unwrap().op {
            OperationData::Jump { opcode, target } => {
                assert_eq!(opcode, Opcode::Jump);
                assert_eq!(target, then_block);
            }
            ref other => panic!("expected jump, got {other:?}"),
        }
        func.verify().unwrap();
    }
}
