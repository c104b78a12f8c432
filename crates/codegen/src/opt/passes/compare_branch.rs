//! Fuse a scalar comparison feeding a branch into a compare-branch
//! terminator, which the back-end emits as `cmp` + `jcc`.

use crate::error::Result;
use crate::opt::code::OirFunction;
use crate::opt::ops::OperationData;
use crate::opt::pipeline::{Pass, PipelineConfig};
use crate::opt::OptModule;

pub struct CompareBranchPass;

impl Pass for CompareBranchPass {
    fn name(&self) -> &'static str {
        "compare-branch"
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
            let (comparison, args) = match func.instr(condition)?.op {
                OperationData::CompareRef2 {
                    comparison, args, ..
                } if !comparison.kind.is_float() => (comparison, args),
                _ => continue,
            };

            func.drop_control(terminator)?;
            func.drop_instr(terminator)?;
            func.finalize_branch_compare(
                block,
                comparison.kind,
                comparison.width,
                args[0],
                args[1],
                target,
                alternative,
            )?;
            changed = true;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FuncDeclId, IrModule};
    use crate::opt::ops::{CmpKind, CondVariant, Opcode, OpWidth};
    use cranelift_entity::EntityRef;

    #[test]
    fn branch_over_compare_is_fused() {
        let mut module = OptModule::new(IrModule::new());
        let mut func = OirFunction::new(FuncDeclId::new(0));
        let entry = func.new_block();
        let then_block = func.new_block();
        let else_block = func.new_block();
        let a = func.get_argument(entry, 0).unwrap();
        let b = func.get_argument(entry, 1).unwrap();
        let cmp = func
            .scalar_compare(entry, CmpKind::Lesser, OpWidth::W32, a, b)
            .unwrap();
        func.finalize_branch(entry, CondVariant::W8, cmp, then_block, else_block)
            .unwrap();
        let v1 = func.int_const(then_block, 1).unwrap();
        func.finalize_return(then_block, Some(v1)).unwrap();
        let v2 = func.int_const(else_block, 0).unwrap();
        func.finalize_return(else_block, Some(v2)).unwrap();

        assert!(CompareBranchPass
            .apply(&mut module, &mut func, &PipelineConfig::default())
            .unwrap());
        let terminator = func.block_terminator(entry).unwrap();
        assert_eq!(
            func.instr(terminator).unwrap().opcode(),
            Opcode::BranchCompare
        );
        func.verify().unwrap();
    }
}
