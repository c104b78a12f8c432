//! Lowering of opcodes the AMD64 back-end cannot express natively.
//!
//! Arbitrary-width integer operations wider than a qword become calls to
//! runtime helper routines over temporary frame objects; narrow ones reduce
//! to bit-field extractions. Each helper declaration is materialized at most
//! once per module.

use crate::error::{Error, Result};
use crate::ir::{IrModule, IrType, TypeEntry, TypeRef};
use crate::opt::code::{BlockId, InstrRef, OirFunction};
use crate::opt::ops::{FloatWidth, Opcode, OperationData, OpWidth};
use crate::opt::OptModule;
use crate::ir::FuncDeclId;
use log::trace;

const QWORD_BITS: u32 = 64;
const QWORD_BYTES: u64 = 8;

pub const BIGINT_SET_SIGNED_FN: &str = "__kefir_bigint_set_signed_integer";
pub const BIGINT_SET_UNSIGNED_FN: &str = "__kefir_bigint_set_unsigned_integer";
pub const BIGINT_CAST_SIGNED_FN: &str = "__kefir_bigint_cast_signed";
pub const BIGINT_CAST_UNSIGNED_FN: &str = "__kefir_bigint_cast_unsigned";
pub const BIGINT_SIGNED_TO_FLOAT_FN: &str = "__kefir_bigint_signed_to_float";
pub const BIGINT_UNSIGNED_TO_FLOAT_FN: &str = "__kefir_bigint_unsigned_to_float";
pub const BIGINT_SIGNED_TO_DOUBLE_FN: &str = "__kefir_bigint_signed_to_double";
pub const BIGINT_UNSIGNED_TO_DOUBLE_FN: &str = "__kefir_bigint_unsigned_to_double";
pub const BIGINT_SIGNED_TO_LONG_DOUBLE_FN: &str = "__kefir_bigint_signed_to_long_double";
pub const BIGINT_UNSIGNED_TO_LONG_DOUBLE_FN: &str = "__kefir_bigint_unsigned_to_long_double";
pub const BIGINT_SIGNED_FROM_FLOAT_FN: &str = "__kefir_bigint_signed_from_float";
pub const BIGINT_UNSIGNED_FROM_FLOAT_FN: &str = "__kefir_bigint_unsigned_from_float";
pub const BIGINT_SIGNED_FROM_DOUBLE_FN: &str = "__kefir_bigint_signed_from_double";
pub const BIGINT_UNSIGNED_FROM_DOUBLE_FN: &str = "__kefir_bigint_unsigned_from_double";
pub const BIGINT_SIGNED_FROM_LONG_DOUBLE_FN: &str = "__kefir_bigint_signed_from_long_double";
pub const BIGINT_UNSIGNED_FROM_LONG_DOUBLE_FN: &str = "__kefir_bigint_unsigned_from_long_double";
pub const BIGINT_IS_ZERO_FN: &str = "__kefir_bigint_is_zero";

/// Lazily declared runtime entry points, shared across the module.
#[derive(Default)]
pub struct RuntimeFns {
    bigint_set_signed: Option<FuncDeclId>,
    bigint_set_unsigned: Option<FuncDeclId>,
    bigint_cast_signed: Option<FuncDeclId>,
    bigint_cast_unsigned: Option<FuncDeclId>,
    bigint_to_float: [Option<FuncDeclId>; 6],
    bigint_from_float: [Option<FuncDeclId>; 6],
    bigint_is_zero: Option<FuncDeclId>,
}

fn declare_helper(
    ir: &mut IrModule,
    name: &str,
    params: &[TypeEntry],
    results: &[TypeEntry],
) -> FuncDeclId {
    let params_type = ir.new_type(IrType::from_entries(params.to_vec()));
    let result_type = ir.new_type(IrType::from_entries(results.to_vec()));
    trace!("declaring bigint runtime helper {name}");
    ir.declare_function(name, params_type, result_type, false)
}

impl RuntimeFns {
    fn set_fn(&mut self, ir: &mut IrModule, signed: bool) -> FuncDeclId {
        let slot = if signed {
            &mut self.bigint_set_signed
        } else {
            &mut self.bigint_set_unsigned
        };
        *slot.get_or_insert_with(|| {
            declare_helper(
                ir,
                if signed {
                    BIGINT_SET_SIGNED_FN
                } else {
                    BIGINT_SET_UNSIGNED_FN
                },
                &[TypeEntry::Word, TypeEntry::Int32, TypeEntry::Int64],
                &[],
            )
        })
    }

    fn cast_fn(&mut self, ir: &mut IrModule, signed: bool) -> FuncDeclId {
        let slot = if signed {
            &mut self.bigint_cast_signed
        } else {
            &mut self.bigint_cast_unsigned
        };
        *slot.get_or_insert_with(|| {
            declare_helper(
                ir,
                if signed {
                    BIGINT_CAST_SIGNED_FN
                } else {
                    BIGINT_CAST_UNSIGNED_FN
                },
                &[TypeEntry::Word, TypeEntry::Int32, TypeEntry::Int32],
                &[],
            )
        })
    }

    fn to_float_fn(&mut self, ir: &mut IrModule, signed: bool, to: FloatWidth) -> FuncDeclId {
        let (index, name, result) = match (signed, to) {
            (true, FloatWidth::Single) => (0, BIGINT_SIGNED_TO_FLOAT_FN, TypeEntry::Float32),
            (false, FloatWidth::Single) => (1, BIGINT_UNSIGNED_TO_FLOAT_FN, TypeEntry::Float32),
            (true, FloatWidth::Double) => (2, BIGINT_SIGNED_TO_DOUBLE_FN, TypeEntry::Float64),
            (false, FloatWidth::Double) => (3, BIGINT_UNSIGNED_TO_DOUBLE_FN, TypeEntry::Float64),
            (true, FloatWidth::LongDouble) => {
                (4, BIGINT_SIGNED_TO_LONG_DOUBLE_FN, TypeEntry::LongDouble)
            }
            (false, FloatWidth::LongDouble) => {
                (5, BIGINT_UNSIGNED_TO_LONG_DOUBLE_FN, TypeEntry::LongDouble)
            }
        };
        *self.bigint_to_float[index].get_or_insert_with(|| {
            declare_helper(
                ir,
                name,
                &[TypeEntry::Word, TypeEntry::Word, TypeEntry::Int32],
                &[result],
            )
        })
    }

    fn from_float_fn(&mut self, ir: &mut IrModule, signed: bool, from: FloatWidth) -> FuncDeclId {
        let (index, name, param) = match (signed, from) {
            (true, FloatWidth::Single) => (0, BIGINT_SIGNED_FROM_FLOAT_FN, TypeEntry::Float32),
            (false, FloatWidth::Single) => (1, BIGINT_UNSIGNED_FROM_FLOAT_FN, TypeEntry::Float32),
            (true, FloatWidth::Double) => (2, BIGINT_SIGNED_FROM_DOUBLE_FN, TypeEntry::Float64),
            (false, FloatWidth::Double) => (3, BIGINT_UNSIGNED_FROM_DOUBLE_FN, TypeEntry::Float64),
            (true, FloatWidth::LongDouble) => {
                (4, BIGINT_SIGNED_FROM_LONG_DOUBLE_FN, TypeEntry::LongDouble)
            }
            (false, FloatWidth::LongDouble) => {
                (5, BIGINT_UNSIGNED_FROM_LONG_DOUBLE_FN, TypeEntry::LongDouble)
            }
        };
        *self.bigint_from_float[index].get_or_insert_with(|| {
            declare_helper(
                ir,
                name,
                &[TypeEntry::Word, param, TypeEntry::Int32],
                &[],
            )
        })
    }

    fn is_zero_fn(&mut self, ir: &mut IrModule) -> FuncDeclId {
        *self.bigint_is_zero.get_or_insert_with(|| {
            declare_helper(
                ir,
                BIGINT_IS_ZERO_FN,
                &[TypeEntry::Word, TypeEntry::Int32],
                &[TypeEntry::Int8],
            )
        })
    }
}

fn qwords_for(bitwidth: u32) -> u64 {
    ((bitwidth as u64) + (QWORD_BITS as u64) - 1) / QWORD_BITS as u64
}

/// Insert `instr` into the control list right before the first control
/// instruction that follows `anchor` in instruction order.
fn insert_control_before_next(
    func: &mut OirFunction,
    block: BlockId,
    anchor: InstrRef,
    instr: InstrRef,
) -> Result<()> {
    let mut cursor = func.instr(anchor)?.next();
    while let Some(candidate) = cursor {
        if func.instr(candidate)?.is_control_flow() {
            let prev = func.instr(candidate)?.prev_control();
            return func.insert_control(block, prev, instr);
        }
        cursor = func.instr(candidate)?.next();
    }
    func.append_control(block, instr)
}

struct LoweredCall {
    output: InstrRef,
}

fn build_helper_call(
    func: &mut OirFunction,
    block: BlockId,
    anchor: InstrRef,
    decl: FuncDeclId,
    args: &[InstrRef],
) -> Result<LoweredCall> {
    let (call, output) = func.new_call(block, decl, args.len(), None)?;
    for (i, arg) in args.iter().enumerate() {
        func.call_set_argument(call, i, *arg)?;
    }
    insert_control_before_next(func, block, anchor, output)?;
    Ok(LoweredCall { output })
}

/// Apply the rewrite rule for one instruction; `Ok(None)` means the opcode
/// needs no lowering.
fn lower_instruction(
    module_ir: &mut IrModule,
    runtime: &mut RuntimeFns,
    func: &mut OirFunction,
    instr_ref: InstrRef,
) -> Result<Option<InstrRef>> {
    let instr = func.instr(instr_ref)?;
    let block = instr
        .block
        .expand()
        .ok_or(Error::InvalidState("lowering a detached instruction"))?;

    let replacement = match instr.op.clone() {
        OperationData::BitintConst { opcode, bigint } => {
            let value = module_ir.get_bigint(bigint)?;
            if value.bitwidth <= QWORD_BITS {
                Some(match opcode {
                    Opcode::BitintSignedConst => func.int_const(block, value.get_signed())?,
                    _ => func.uint_const(block, value.get_unsigned())?,
                })
            } else {
                // Wide literals stay in the constant pool; the back-end
                // emits them as data.
                None
            }
        }

        OperationData::Bitint {
            opcode: Opcode::BitintGetSigned,
            arg,
            bitwidth,
            ..
        } => Some(if bitwidth <= QWORD_BITS {
            func.bits_extract_signed(block, arg, 0, bitwidth)?
        } else {
            func.int64_load_noextend(block, arg)?
        }),

        OperationData::Bitint {
            opcode: Opcode::BitintGetUnsigned,
            arg,
            bitwidth,
            ..
        } => Some(if bitwidth <= QWORD_BITS {
            func.bits_extract_unsigned(block, arg, 0, bitwidth)?
        } else {
            func.int64_load_noextend(block, arg)?
        }),

        OperationData::Bitint {
            opcode: opcode @ (Opcode::BitintFromSigned | Opcode::BitintFromUnsigned),
            arg,
            bitwidth,
            ..
        } => {
            let signed = opcode == Opcode::BitintFromSigned;
            if bitwidth <= QWORD_BITS {
                Some(if signed {
                    func.bits_extract_signed(block, arg, 0, bitwidth)?
                } else {
                    func.bits_extract_unsigned(block, arg, 0, bitwidth)?
                })
            } else {
                let decl = runtime.set_fn(module_ir, signed);
                let temp =
                    func.temporary_object(block, qwords_for(bitwidth) * QWORD_BYTES, QWORD_BYTES)?;
                let width = func.uint_const(block, bitwidth as u64)?;
                let call = build_helper_call(func, block, instr_ref, decl, &[temp, width, arg])?;
                Some(func.pair(block, temp, call.output)?)
            }
        }

        OperationData::Bitint {
            opcode: opcode @ (Opcode::BitintCastSigned | Opcode::BitintCastUnsigned),
            arg,
            bitwidth,
            src_bitwidth,
        } => {
            let signed = opcode == Opcode::BitintCastSigned;
            let narrow = bitwidth.min(src_bitwidth);
            if bitwidth <= QWORD_BITS && src_bitwidth <= QWORD_BITS {
                Some(if signed {
                    func.bits_extract_signed(block, arg, 0, narrow)?
                } else {
                    func.bits_extract_unsigned(block, arg, 0, narrow)?
                })
            } else if bitwidth <= QWORD_BITS {
                let loaded = func.int64_load_noextend(block, arg)?;
                Some(if signed {
                    func.bits_extract_signed(block, loaded, 0, bitwidth)?
                } else {
                    func.bits_extract_unsigned(block, loaded, 0, bitwidth)?
                })
            } else if src_bitwidth <= QWORD_BITS {
                let extracted = if signed {
                    func.bits_extract_signed(block, arg, 0, src_bitwidth)?
                } else {
                    func.bits_extract_unsigned(block, arg, 0, src_bitwidth)?
                };
                let decl = runtime.set_fn(module_ir, signed);
                let temp =
                    func.temporary_object(block, qwords_for(bitwidth) * QWORD_BYTES, QWORD_BYTES)?;
                let width = func.uint_const(block, bitwidth as u64)?;
                let call =
                    build_helper_call(func, block, instr_ref, decl, &[temp, width, extracted])?;
                Some(func.pair(block, temp, call.output)?)
            } else {
                let decl = runtime.cast_fn(module_ir, signed);
                let mut narrow_type = IrType::new();
                narrow_type.append(TypeEntry::BitInt(narrow));
                let narrow_type_id = module_ir.new_type(narrow_type);

                let temp =
                    func.temporary_object(block, qwords_for(bitwidth) * QWORD_BYTES, QWORD_BYTES)?;
                let copy =
                    func.copy_memory(block, temp, arg, TypeRef::new(narrow_type_id, 0))?;
                insert_control_before_next(func, block, instr_ref, copy)?;
                let initialized = func.pair(block, temp, copy)?;
                let width = func.uint_const(block, bitwidth as u64)?;
                let src_width = func.uint_const(block, src_bitwidth as u64)?;
                let call = build_helper_call(
                    func,
                    block,
                    instr_ref,
                    decl,
                    &[initialized, width, src_width],
                )?;
                Some(func.pair(block, temp, call.output)?)
            }
        }

        OperationData::Bitint {
            opcode: Opcode::BitintToFloat { signed, to },
            arg,
            bitwidth,
            ..
        } => {
            if bitwidth <= QWORD_BITS {
                let extracted = if signed {
                    func.bits_extract_signed(block, arg, 0, bitwidth)?
                } else {
                    func.bits_extract_unsigned(block, arg, 0, bitwidth)?
                };
                Some(func.int_to_float(block, signed, to, extracted)?)
            } else {
                let decl = runtime.to_float_fn(module_ir, signed, to);
                let temp =
                    func.temporary_object(block, qwords_for(bitwidth) * QWORD_BYTES, QWORD_BYTES)?;
                let width = func.uint_const(block, bitwidth as u64)?;
                let call = build_helper_call(func, block, instr_ref, decl, &[temp, arg, width])?;
                Some(call.output)
            }
        }

        OperationData::Bitint {
            opcode: Opcode::BitintFromFloat { signed, from },
            arg,
            bitwidth,
            ..
        } => {
            if bitwidth <= QWORD_BITS {
                let converted = func.float_to_int(block, signed, from, arg)?;
                Some(if signed {
                    func.bits_extract_signed(block, converted, 0, bitwidth)?
                } else {
                    func.bits_extract_unsigned(block, converted, 0, bitwidth)?
                })
            } else {
                let decl = runtime.from_float_fn(module_ir, signed, from);
                let temp =
                    func.temporary_object(block, qwords_for(bitwidth) * QWORD_BYTES, QWORD_BYTES)?;
                let width = func.uint_const(block, bitwidth as u64)?;
                let call = build_helper_call(func, block, instr_ref, decl, &[temp, arg, width])?;
                Some(func.pair(block, temp, call.output)?)
            }
        }

        OperationData::Bitint {
            opcode: Opcode::BitintToBool,
            arg,
            bitwidth,
            ..
        } => {
            if bitwidth <= QWORD_BITS {
                let extracted = func.bits_extract_unsigned(block, arg, 0, bitwidth)?;
                Some(func.int_to_bool(block, OpWidth::W64, extracted)?)
            } else {
                let decl = runtime.is_zero_fn(module_ir);
                let width = func.uint_const(block, bitwidth as u64)?;
                let call = build_helper_call(func, block, instr_ref, decl, &[arg, width])?;
                Some(func.bool_not(block, OpWidth::W8, call.output)?)
            }
        }

        _ => None,
    };

    Ok(replacement)
}

/// Lower one function in place.
pub fn lower_function(
    module_ir: &mut IrModule,
    runtime: &mut RuntimeFns,
    func: &mut OirFunction,
) -> Result<()> {
    for block in func.block_ids().collect::<Vec<_>>() {
        // Snapshot: instructions appended by rewrites are already lowered.
        let snapshot: Vec<InstrRef> = func.block_instrs(block).collect();
        for instr_ref in snapshot {
            if func.instr(instr_ref)?.block.is_none() {
                continue;
            }
            let Some(replacement) = lower_instruction(module_ir, runtime, func, instr_ref)? else {
                continue;
            };
            func.replace_references(replacement, instr_ref)?;
            func.debug.replace_local_variable(instr_ref, replacement);
            if func.instr(instr_ref)?.is_control_flow() {
                let prev = func.instr(instr_ref)?.prev_control();
                func.drop_control(instr_ref)?;
                func.insert_control(block, prev, replacement)?;
            }
            func.drop_instr(instr_ref)?;
        }
    }
    Ok(())
}

/// Lower the whole module after optimization.
pub fn lower_module(module: &mut OptModule) -> Result<()> {
    let mut runtime = RuntimeFns::default();
    for decl in module.function_ids() {
        let mut func = module.take_function(decl)?;
        let result = lower_function(&mut module.ir, &mut runtime, &mut func);
        module.put_function(func);
        result?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::BigInt;

    #[test]
    fn narrow_bitint_const_lowering_is_idempotent() {
        let mut ir = IrModule::new();
        let bigint = ir.new_bigint(BigInt::new(5, vec![0b11111]));
        let decl = {
            let params = ir.new_type(IrType::new());
            let result = ir.new_type(IrType::from_entries(vec![TypeEntry::Int]));
            ir.declare_function("n", params, result, false)
        };

        let mut func = OirFunction::new(decl);
        let entry = func.new_block();
        let wide = func.bitint_signed_const(entry, bigint).unwrap();
        func.finalize_return(entry, Some(wide)).unwrap();

        let mut runtime = RuntimeFns::default();
        lower_function(&mut ir, &mut runtime, &mut func).unwrap();
        let count_after_first = func.instr_count();
        // The replacement is a plain integer constant carrying the
        // sign-extracted value.
        let ret = func.block_terminator(entry).unwrap();
        let replacement = match func.instr(ret).unwrap().op {
            crate::opt::ops::OperationData::OptRef1 { arg, .. } => arg.expand().unwrap(),
            _ => unreachable!(),
        };
        match func.instr(replacement).unwrap().op {
            crate::opt::ops::OperationData::Imm {
                imm: crate::opt::ops::Immediate::Int(v),
                ..
            } => assert_eq!(v, -1),
            ref other => panic!("unexpected replacement: {other:?}"),
        }

        // A second sweep sees already-lowered code and changes nothing.
        lower_function(&mut ir, &mut runtime, &mut func).unwrap();
        assert_eq!(func.instr_count(), count_after_first);
    }

    #[test]
    fn helper_declaration_is_reused() {
        let mut ir = IrModule::new();
        let mut runtime = RuntimeFns::default();
        let first = runtime.set_fn(&mut ir, true);
        let second = runtime.set_fn(&mut ir, true);
        assert_eq!(first, second);
        let unsigned = runtime.set_fn(&mut ir, false);
        assert_ne!(first, unsigned);
    }
}
