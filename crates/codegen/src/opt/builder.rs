//! Typed construction helpers over the SSA container.
//!
//! Pure value producers only append to the instruction list; the
//! `finalize_*` builders additionally link the instruction into the control
//! list at the block tail, which is how terminators and other effects reach
//! the control path.

use crate::error::Result;
use crate::ir::{BigIntId, TypeRef};
use crate::opt::code::{BlockId, InstrRef, OirFunction};
use crate::opt::ops::{
    CmpKind, CondVariant, Comparison, FloatWidth, Ieee32, Ieee64, Immediate, LoadExtension,
    MemoryAccessFlags, Opcode, OperationData, OpWidth,
};

impl OirFunction {
    pub fn int_const(&mut self, block: BlockId, value: i64) -> Result<InstrRef> {
        self.new_instruction(
            block,
            OperationData::Imm {
                opcode: Opcode::IntConst,
                imm: Immediate::Int(value),
            },
        )
    }

    pub fn uint_const(&mut self, block: BlockId, value: u64) -> Result<InstrRef> {
        self.new_instruction(
            block,
            OperationData::Imm {
                opcode: Opcode::UintConst,
                imm: Immediate::Uint(value),
            },
        )
    }

    pub fn float32_const(&mut self, block: BlockId, value: f32) -> Result<InstrRef> {
        self.new_instruction(
            block,
            OperationData::Imm {
                opcode: Opcode::Float32Const,
                imm: Immediate::Float32(Ieee32::with_float(value)),
            },
        )
    }

    pub fn float64_const(&mut self, block: BlockId, value: f64) -> Result<InstrRef> {
        self.new_instruction(
            block,
            OperationData::Imm {
                opcode: Opcode::Float64Const,
                imm: Immediate::Float64(Ieee64::with_float(value)),
            },
        )
    }

    pub fn long_double_const(&mut self, block: BlockId, value: f64) -> Result<InstrRef> {
        self.new_instruction(
            block,
            OperationData::Imm {
                opcode: Opcode::LongDoubleConst,
                imm: Immediate::LongDouble(Ieee64::with_float(value)),
            },
        )
    }

    pub fn bitint_signed_const(&mut self, block: BlockId, bigint: BigIntId) -> Result<InstrRef> {
        self.new_instruction(
            block,
            OperationData::BitintConst {
                opcode: Opcode::BitintSignedConst,
                bigint,
            },
        )
    }

    pub fn bitint_unsigned_const(&mut self, block: BlockId, bigint: BigIntId) -> Result<InstrRef> {
        self.new_instruction(
            block,
            OperationData::BitintConst {
                opcode: Opcode::BitintUnsignedConst,
                bigint,
            },
        )
    }

    pub fn int_placeholder(&mut self, block: BlockId) -> Result<InstrRef> {
        self.new_instruction(
            block,
            OperationData::Imm {
                opcode: Opcode::IntPlaceholder,
                imm: Immediate::Int(0),
            },
        )
    }

    pub fn get_argument(&mut self, block: BlockId, index: usize) -> Result<InstrRef> {
        self.new_instruction(
            block,
            OperationData::GetArgument {
                opcode: Opcode::GetArgument,
                index,
            },
        )
    }

    pub fn block_label(&mut self, block: BlockId, target: BlockId) -> Result<InstrRef> {
        self.new_instruction(
            block,
            OperationData::BlockRef {
                opcode: Opcode::BlockLabel,
                block: target,
            },
        )
    }

    pub fn int_binary(
        &mut self,
        block: BlockId,
        opcode: Opcode,
        lhs: InstrRef,
        rhs: InstrRef,
    ) -> Result<InstrRef> {
        self.new_instruction(
            block,
            OperationData::Ref2 {
                opcode,
                args: [lhs, rhs],
            },
        )
    }

    pub fn int_add(&mut self, block: BlockId, w: OpWidth, a: InstrRef, b: InstrRef) -> Result<InstrRef> {
        self.int_binary(block, Opcode::IntAdd(w), a, b)
    }

    pub fn int_sub(&mut self, block: BlockId, w: OpWidth, a: InstrRef, b: InstrRef) -> Result<InstrRef> {
        self.int_binary(block, Opcode::IntSub(w), a, b)
    }

    pub fn int_mul(&mut self, block: BlockId, w: OpWidth, a: InstrRef, b: InstrRef) -> Result<InstrRef> {
        self.int_binary(block, Opcode::IntMul(w), a, b)
    }

    pub fn int_and(&mut self, block: BlockId, w: OpWidth, a: InstrRef, b: InstrRef) -> Result<InstrRef> {
        self.int_binary(block, Opcode::IntAnd(w), a, b)
    }

    pub fn int_or(&mut self, block: BlockId, w: OpWidth, a: InstrRef, b: InstrRef) -> Result<InstrRef> {
        self.int_binary(block, Opcode::IntOr(w), a, b)
    }

    pub fn int_xor(&mut self, block: BlockId, w: OpWidth, a: InstrRef, b: InstrRef) -> Result<InstrRef> {
        self.int_binary(block, Opcode::IntXor(w), a, b)
    }

    pub fn int_unary(&mut self, block: BlockId, opcode: Opcode, arg: InstrRef) -> Result<InstrRef> {
        self.new_instruction(block, OperationData::Ref1 { opcode, arg })
    }

    pub fn int_to_bool(&mut self, block: BlockId, w: OpWidth, arg: InstrRef) -> Result<InstrRef> {
        self.int_unary(block, Opcode::IntToBool(w), arg)
    }

    pub fn bool_not(&mut self, block: BlockId, w: OpWidth, arg: InstrRef) -> Result<InstrRef> {
        self.int_unary(block, Opcode::BoolNot(w), arg)
    }

    pub fn float_binary(
        &mut self,
        block: BlockId,
        opcode: Opcode,
        lhs: InstrRef,
        rhs: InstrRef,
    ) -> Result<InstrRef> {
        self.new_instruction(
            block,
            OperationData::Ref2 {
                opcode,
                args: [lhs, rhs],
            },
        )
    }

    pub fn scalar_compare(
        &mut self,
        block: BlockId,
        kind: CmpKind,
        width: OpWidth,
        lhs: InstrRef,
        rhs: InstrRef,
    ) -> Result<InstrRef> {
        self.new_instruction(
            block,
            OperationData::CompareRef2 {
                opcode: Opcode::ScalarCompare,
                comparison: Comparison { kind, width },
                args: [lhs, rhs],
            },
        )
    }

    pub fn bits_extract_signed(
        &mut self,
        block: BlockId,
        base: InstrRef,
        offset: u32,
        length: u32,
    ) -> Result<InstrRef> {
        self.new_instruction(
            block,
            OperationData::BitsExtract {
                opcode: Opcode::BitsExtractSigned,
                base,
                offset,
                length,
            },
        )
    }

    pub fn bits_extract_unsigned(
        &mut self,
        block: BlockId,
        base: InstrRef,
        offset: u32,
        length: u32,
    ) -> Result<InstrRef> {
        self.new_instruction(
            block,
            OperationData::BitsExtract {
                opcode: Opcode::BitsExtractUnsigned,
                base,
                offset,
                length,
            },
        )
    }

    pub fn int_load(
        &mut self,
        block: BlockId,
        w: OpWidth,
        location: InstrRef,
        flags: MemoryAccessFlags,
    ) -> Result<InstrRef> {
        let instr = self.new_instruction(
            block,
            OperationData::Load {
                opcode: Opcode::IntLoad(w),
                location,
                flags,
            },
        )?;
        if flags.volatile {
            self.append_control(block, instr)?;
        }
        Ok(instr)
    }

    pub fn int64_load_noextend(&mut self, block: BlockId, location: InstrRef) -> Result<InstrRef> {
        self.int_load(
            block,
            OpWidth::W64,
            location,
            MemoryAccessFlags {
                extension: LoadExtension::NoExtend,
                volatile: false,
            },
        )
    }

    pub fn int_store(
        &mut self,
        block: BlockId,
        w: OpWidth,
        location: InstrRef,
        value: InstrRef,
        flags: MemoryAccessFlags,
    ) -> Result<InstrRef> {
        let instr = self.new_instruction(
            block,
            OperationData::Store {
                opcode: Opcode::IntStore(w),
                location,
                value,
                flags,
            },
        )?;
        self.append_control(block, instr)?;
        Ok(instr)
    }

    /// `copy_memory` value builder: the control position is chosen by the
    /// caller via `insert_control`.
    pub fn copy_memory(
        &mut self,
        block: BlockId,
        target: InstrRef,
        source: InstrRef,
        type_ref: TypeRef,
    ) -> Result<InstrRef> {
        self.new_instruction(
            block,
            OperationData::TypedMem {
                opcode: Opcode::CopyMemory,
                target,
                source: Some(source).into(),
                type_ref,
            },
        )
    }

    pub fn zero_memory(&mut self, block: BlockId, target: InstrRef, type_ref: TypeRef) -> Result<InstrRef> {
        self.new_instruction(
            block,
            OperationData::TypedMem {
                opcode: Opcode::ZeroMemory,
                target,
                source: None.into(),
                type_ref,
            },
        )
    }

    pub fn alloc_local(&mut self, block: BlockId, type_ref: TypeRef) -> Result<InstrRef> {
        let instr = self.new_instruction(
            block,
            OperationData::LocalAlloc {
                opcode: Opcode::AllocLocal,
                type_ref,
            },
        )?;
        self.append_control(block, instr)?;
        Ok(instr)
    }

    pub fn temporary_object(&mut self, block: BlockId, size: u64, align: u64) -> Result<InstrRef> {
        let instr = self.new_instruction(
            block,
            OperationData::TemporaryObject {
                opcode: Opcode::TemporaryObject,
                size,
                align,
            },
        )?;
        self.append_control(block, instr)?;
        Ok(instr)
    }

    pub fn pair(&mut self, block: BlockId, value: InstrRef, effect: InstrRef) -> Result<InstrRef> {
        self.new_instruction(
            block,
            OperationData::Ref2 {
                opcode: Opcode::Pair,
                args: [value, effect],
            },
        )
    }

    pub fn select(
        &mut self,
        block: BlockId,
        condition_variant: CondVariant,
        condition: InstrRef,
        then_value: InstrRef,
        else_value: InstrRef,
    ) -> Result<InstrRef> {
        self.new_instruction(
            block,
            OperationData::Ref3Cond {
                opcode: Opcode::Select,
                args: [condition, then_value, else_value],
                condition_variant,
            },
        )
    }

    pub fn int_to_float(
        &mut self,
        block: BlockId,
        signed: bool,
        to: FloatWidth,
        arg: InstrRef,
    ) -> Result<InstrRef> {
        self.int_unary(block, Opcode::IntToFloat { signed, to }, arg)
    }

    pub fn float_to_int(
        &mut self,
        block: BlockId,
        signed: bool,
        from: FloatWidth,
        arg: InstrRef,
    ) -> Result<InstrRef> {
        self.int_unary(block, Opcode::FloatToInt { signed, from }, arg)
    }

    // ---- control-flow builders ---------------------------------------

    /// Terminate `block` with an unconditional jump.
    pub fn finalize_jump(&mut self, block: BlockId, target: BlockId) -> Result<InstrRef> {
        let instr = self.new_instruction(
            block,
            OperationData::Jump {
                opcode: Opcode::Jump,
                target,
            },
        )?;
        self.append_control(block, instr)?;
        Ok(instr)
    }

    /// Terminate `block` with a conditional branch.
    pub fn finalize_branch(
        &mut self,
        block: BlockId,
        condition_variant: CondVariant,
        condition: InstrRef,
        target: BlockId,
        alternative: BlockId,
    ) -> Result<InstrRef> {
        let instr = self.new_instruction(
            block,
            OperationData::Branch {
                opcode: Opcode::Branch,
                condition,
                condition_variant,
                target,
                alternative,
            },
        )?;
        self.append_control(block, instr)?;
        Ok(instr)
    }

    /// Terminate `block` with a fused compare-and-branch.
    pub fn finalize_branch_compare(
        &mut self,
        block: BlockId,
        kind: CmpKind,
        width: OpWidth,
        lhs: InstrRef,
        rhs: InstrRef,
        target: BlockId,
        alternative: BlockId,
    ) -> Result<InstrRef> {
        let instr = self.new_instruction(
            block,
            OperationData::BranchCompare {
                opcode: Opcode::BranchCompare,
                comparison: Comparison { kind, width },
                args: [lhs, rhs],
                target,
                alternative,
            },
        )?;
        self.append_control(block, instr)?;
        Ok(instr)
    }

    /// Terminate `block` with a return.
    pub fn finalize_return(&mut self, block: BlockId, value: Option<InstrRef>) -> Result<InstrRef> {
        let instr = self.new_instruction(
            block,
            OperationData::OptRef1 {
                opcode: Opcode::Return,
                arg: value.into(),
            },
        )?;
        self.append_control(block, instr)?;
        Ok(instr)
    }

    /// Terminate `block` with an indirect jump through a label value.
    pub fn finalize_indirect_jump(&mut self, block: BlockId, target: InstrRef) -> Result<InstrRef> {
        let instr = self.new_instruction(
            block,
            OperationData::Ref1 {
                opcode: Opcode::IndirectJump,
                arg: target,
            },
        )?;
        self.append_control(block, instr)?;
        Ok(instr)
    }
}
