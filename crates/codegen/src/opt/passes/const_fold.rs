//! Constant folding.
//!
//! Integer arithmetic, comparisons and boolean tests over constant operands
//! are replaced with fresh constants; uses are redirected and the dead
//! original is left for DCE. Only instructions that still have uses are
//! folded, which makes a second run a no-op.

use crate::error::Result;
use crate::opt::code::{InstrRef, OirFunction};
use crate::opt::ops::{CmpKind, Immediate, Opcode, OperationData, OpWidth};
use crate::opt::pipeline::{Pass, PipelineConfig};
use crate::opt::OptModule;

fn const_value(func: &OirFunction, instr: InstrRef) -> Option<i64> {
    match func.instr(instr).ok()?.op {
        OperationData::Imm {
            imm: Immediate::Int(v),
            ..
        } => Some(v),
        OperationData::Imm {
            imm: Immediate::Uint(v),
            ..
        } => Some(v as i64),
        _ => None,
    }
}

fn truncate(value: i64, width: OpWidth) -> i64 {
    match width {
        OpWidth::W8 => value as i8 as i64,
        OpWidth::W16 => value as i16 as i64,
        OpWidth::W32 => value as i32 as i64,
        OpWidth::W64 => value,
    }
}

fn fold_binary(opcode: Opcode, lhs: i64, rhs: i64) -> Option<i64> {
    let folded = match opcode {
        Opcode::IntAdd(w) => truncate(lhs.wrapping_add(rhs), w),
        Opcode::IntSub(w) => truncate(lhs.wrapping_sub(rhs), w),
        Opcode::IntMul(w) => truncate(lhs.wrapping_mul(rhs), w),
        Opcode::IntAnd(w) => truncate(lhs & rhs, w),
        Opcode::IntOr(w) => truncate(lhs | rhs, w),
        Opcode::IntXor(w) => truncate(lhs ^ rhs, w),
        Opcode::IntShl(w) => truncate(lhs.wrapping_shl(rhs as u32 % w.bits()), w),
        Opcode::IntShr(w) => {
            let mask = if w.bits() == 64 {
                u64::MAX
            } else {
                (1u64 << w.bits()) - 1
            };
            truncate((((lhs as u64) & mask) >> (rhs as u32 % w.bits())) as i64, w)
        }
        Opcode::IntSar(w) => truncate(truncate(lhs, w) >> (rhs as u32 % w.bits()), w),
        Opcode::IntDiv(w) => {
            if rhs == 0 || (lhs == i64::MIN && rhs == -1) {
                return None;
            }
            truncate(truncate(lhs, w) / truncate(rhs, w), w)
        }
        Opcode::IntMod(w) => {
            if rhs == 0 || (lhs == i64::MIN && rhs == -1) {
                return None;
            }
            truncate(truncate(lhs, w) % truncate(rhs, w), w)
        }
        _ => return None,
    };
    Some(folded)
}

fn fold_compare(kind: CmpKind, width: OpWidth, lhs: i64, rhs: i64) -> Option<bool> {
    let (sl, sr) = (truncate(lhs, width), truncate(rhs, width));
    let (ul, ur) = (sl as u64, sr as u64);
    let result = match kind {
        CmpKind::Equal => sl == sr,
        CmpKind::NotEqual => sl != sr,
        CmpKind::Lesser => sl < sr,
        CmpKind::LesserOrEqual => sl <= sr,
        CmpKind::Greater => sl > sr,
        CmpKind::GreaterOrEqual => sl >= sr,
        CmpKind::Below => ul < ur,
        CmpKind::BelowOrEqual => ul <= ur,
        CmpKind::Above => ul > ur,
        CmpKind::AboveOrEqual => ul >= ur,
        _ => return None,
    };
    Some(result)
}

pub struct ConstFoldPass;

impl Pass for ConstFoldPass {
    fn name(&self) -> &'static str {
        "const-fold"
    }

    fn apply(
        &self,
        _module: &mut OptModule,
        func: &mut OirFunction,
        _config: &PipelineConfig,
    ) -> Result<bool> {
        let mut changed = false;
        for block in func.block_ids().collect::<Vec<_>>() {
            let mut cursor = func.block(block)?.instr_head();
            while let Some(instr) = cursor {
                cursor = func.instr(instr)?.next();
                let folded = match func.instr(instr)?.op {
                    OperationData::Ref2 { opcode, args } => {
                        match (const_value(func, args[0]), const_value(func, args[1])) {
                            (Some(lhs), Some(rhs)) => {
                                fold_binary(opcode, lhs, rhs).map(Immediate::Int)
                            }
                            _ => None,
                        }
                    }
                    OperationData::CompareRef2 {
                        comparison, args, ..
                    } => match (const_value(func, args[0]), const_value(func, args[1])) {
                        (Some(lhs), Some(rhs)) => {
                            fold_compare(comparison.kind, comparison.width, lhs, rhs)
                                .map(|b| Immediate::Int(b as i64))
                        }
                        _ => None,
                    },
                    OperationData::Ref1 {
                        opcode: Opcode::IntToBool(w),
                        arg,
                    } => const_value(func, arg).map(|v| Immediate::Int((truncate(v, w) != 0) as i64)),
                    OperationData::Ref1 {
                        opcode: Opcode::BoolNot(w),
                        arg,
                    } => const_value(func, arg).map(|v| Immediate::Int((truncate(v, w) == 0) as i64)),
                    _ => None,
                };
                if let Some(imm) = folded {
                    if func.has_uses(instr) {
                        let replacement = func.new_instruction(
                            block,
                            OperationData::Imm {
                                opcode: Opcode::IntConst,
                                imm,
                            },
                        )?;
                        func.replace_references(replacement, instr)?;
                        changed = true;
                    }
                }
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FuncDeclId, IrModule};
    use cranelift_entity::EntityRef;

    #[test]
    fn folding_is_confluent() {
        let mut module = OptModule::new(IrModule::new());
        let mut func = OirFunction::new(FuncDeclId::new(0));
        let entry = func.new_block();
        let a = func.int_const(entry, 21).unwrap();
        let b = func.int_const(entry, 2).unwrap();
        let product = func.int_mul(entry, OpWidth::W64, a, b).unwrap();
        func.finalize_return(entry, Some(product)).unwrap();

        let config = PipelineConfig::default();
        assert!(ConstFoldPass.apply(&mut module, &mut func, &config).unwrap());
        // The product's uses were redirected; a second run must be a no-op.
        assert!(!ConstFoldPass.apply(&mut module, &mut func, &config).unwrap());

        let ret = func.block_terminator(entry).unwrap();
        let folded = match func.instr(ret).unwrap().op {
            OperationData::OptRef1 { arg, .. } => arg.expand().unwrap(),
            _ => unreachable!(),
        };
        assert_eq!(const_value(&func, folded), Some(42));
    }

    #[test]
    fn division_by_zero_is_not_folded() {
        let mut module = OptModule::new(IrModule::new());
        let mut func = OirFunction::new(FuncDeclId::new(0));
        let entry = func.new_block();
        let a = func.int_const(entry, 1).unwrap();
        let z = func.int_const(entry, 0).unwrap();
        let div = func
            .int_binary(entry, Opcode::IntDiv(OpWidth::W32), a, z)
            .unwrap();
        func.finalize_return(entry, Some(div)).unwrap();
        let config = PipelineConfig::default();
        assert!(!ConstFoldPass.apply(&mut module, &mut func, &config).unwrap());
    }
}
