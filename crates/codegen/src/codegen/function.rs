//! Per-function code generation: SSA control flow into the asmcmp stream.
//!
//! The generator walks each block's control list; pure value producers are
//! materialized on demand when first referenced. Every SSA value owns a
//! virtual register; φ-nodes are realized with `virtual_register_link`
//! pseudo-instructions on the incoming edges. Long double values travel as
//! pointers to 80-bit frame temporaries through the x87 unit.

use crate::asmcmp::{
    AsmContext, AsmInstrIdx, AsmOpcode, IndirectBase, LabelIdx, OperandVariant, PairVariant,
    PhysReg, Value, VregIdx, VregKind,
};
use crate::codegen::abi::{Abi, ParamClass, ParamLocation, QWORD};
use crate::codegen::comparison::{emit_branch_compare, emit_scalar_compare};
use crate::codegen::stack_frame::StackFrame;
use crate::error::{Error, Result};
use crate::ir::{IrModule, TypeRef};
use crate::opt::code::{BlockId, InstrRef, OirFunction};
use crate::opt::debug::VariableId;
use crate::opt::ops::{
    CondVariant, FloatWidth, Immediate, LoadExtension, Opcode, OperationData, OpWidth,
};
use log::trace;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// Caller-saved registers the allocator may actually hand out; the ABI
/// scratch registers are excluded because no value ever lives in them.
const STASH_REGS: [PhysReg; 18] = [
    PhysReg::R8,
    PhysReg::R9,
    PhysReg::R10,
    PhysReg::R11,
    PhysReg::Xmm2,
    PhysReg::Xmm3,
    PhysReg::Xmm4,
    PhysReg::Xmm5,
    PhysReg::Xmm6,
    PhysReg::Xmm7,
    PhysReg::Xmm8,
    PhysReg::Xmm9,
    PhysReg::Xmm10,
    PhysReg::Xmm11,
    PhysReg::Xmm12,
    PhysReg::Xmm13,
    PhysReg::Xmm14,
    PhysReg::Xmm15,
];

fn op_variant(width: OpWidth) -> OperandVariant {
    match width {
        OpWidth::W8 => OperandVariant::W8,
        OpWidth::W16 => OperandVariant::W16,
        OpWidth::W32 => OperandVariant::W32,
        OpWidth::W64 => OperandVariant::W64,
    }
}

fn cond_variant(variant: CondVariant) -> OperandVariant {
    match variant {
        CondVariant::W8 => OperandVariant::W8,
        CondVariant::W16 => OperandVariant::W16,
        CondVariant::W32 => OperandVariant::W32,
        CondVariant::W64 => OperandVariant::W64,
    }
}

/// Code generator state for one function.
pub struct FunctionCodegen<'a> {
    ir: &'a IrModule,
    func: &'a OirFunction,
    abi: &'a dyn Abi,
    pub ctx: AsmContext,
    pub frame: StackFrame,
    vregs: FxHashMap<InstrRef, VregIdx>,
    block_labels: FxHashMap<BlockId, LabelIdx>,
    /// IR code index → asm label bound at the first instruction attributed
    /// to it. The DWARF emitter resolves debug code ranges through this.
    ir_index_labels: BTreeMap<usize, LabelIdx>,
    /// Frame local-area offsets of allocation instructions, for debug
    /// location lists.
    local_offsets: FxHashMap<InstrRef, u64>,
    pending_labels: Vec<LabelIdx>,
    param_vregs: Vec<VregIdx>,
    pub begin_label: LabelIdx,
    pub end_label: LabelIdx,
}

impl<'a> FunctionCodegen<'a> {
    pub fn new(ir: &'a IrModule, func: &'a OirFunction, abi: &'a dyn Abi) -> Result<Self> {
        let mut ctx = AsmContext::new();
        let name = {
            let decl = ir.get_declaration(func.decl)?;
            ir.symbol(decl.name).to_string()
        };
        let begin_label = ctx.new_external_label(&name);
        let end_label = ctx.new_label();
        Ok(Self {
            ir,
            func,
            abi,
            ctx,
            frame: StackFrame::new(),
            vregs: FxHashMap::default(),
            block_labels: FxHashMap::default(),
            ir_index_labels: BTreeMap::new(),
            local_offsets: FxHashMap::default(),
            pending_labels: Vec::new(),
            param_vregs: Vec::new(),
            begin_label,
            end_label,
        })
    }

    pub fn ir_index_labels(&self) -> &BTreeMap<usize, LabelIdx> {
        &self.ir_index_labels
    }

    /// Virtual register of a local variable allocation, for debug location
    /// lists.
    pub fn variable_vreg(&self, variable: VariableId) -> Option<VregIdx> {
        let allocs = self.func.debug.variable_allocations(variable)?;
        allocs
            .iter()
            .find_map(|instr| self.vregs.get(instr).copied())
    }

    /// Local-area byte offset of a variable whose allocation landed in the
    /// frame.
    pub fn variable_local_offset(&self, variable: VariableId) -> Option<u64> {
        let allocs = self.func.debug.variable_allocations(variable)?;
        allocs
            .iter()
            .find_map(|instr| self.local_offsets.get(instr).copied())
    }

    fn emit(&mut self, opcode: AsmOpcode, args: [Value; 3]) -> AsmInstrIdx {
        let idx = self.ctx.append_instr(opcode, args);
        for label in self.pending_labels.drain(..) {
            // Binding can only fail for a stale label id, which cannot
            // happen for freshly created ones.
            let _ = self.ctx.bind_label(label, idx);
        }
        idx
    }

    fn note_ir_location(&mut self, instr: InstrRef) {
        if let Some(location) = self.func.debug.instruction_location(instr) {
            if !self.ir_index_labels.contains_key(&location) {
                let label = self.ctx.new_label();
                self.ir_index_labels.insert(location, label);
                self.pending_labels.push(label);
            }
        }
    }

    fn block_label(&mut self, block: BlockId) -> LabelIdx {
        if let Some(&label) = self.block_labels.get(&block) {
            return label;
        }
        let label = self.ctx.new_label();
        self.block_labels.insert(block, label);
        label
    }

    fn new_gp_vreg(&mut self) -> VregIdx {
        self.ctx.new_virtual_register(VregKind::GeneralPurpose)
    }

    fn new_fp_vreg(&mut self) -> VregIdx {
        self.ctx.new_virtual_register(VregKind::FloatingPoint)
    }

    /// Whether the value produced by `instr` lives in the SSE bank.
    fn produces_float(&self, instr: InstrRef) -> bool {
        let Ok(data) = self.func.instr(instr) else {
            return false;
        };
        match data.opcode() {
            Opcode::Float32Const
            | Opcode::Float64Const
            | Opcode::FloatAdd(FloatWidth::Single)
            | Opcode::FloatAdd(FloatWidth::Double)
            | Opcode::FloatSub(FloatWidth::Single)
            | Opcode::FloatSub(FloatWidth::Double)
            | Opcode::FloatMul(FloatWidth::Single)
            | Opcode::FloatMul(FloatWidth::Double)
            | Opcode::FloatDiv(FloatWidth::Single)
            | Opcode::FloatDiv(FloatWidth::Double)
            | Opcode::FloatNeg(FloatWidth::Single)
            | Opcode::FloatNeg(FloatWidth::Double)
            | Opcode::Float32Load
            | Opcode::Float64Load => true,
            Opcode::IntToFloat { to, .. } => to != FloatWidth::LongDouble,
            Opcode::FloatConvert { to, .. } => to != FloatWidth::LongDouble,
            Opcode::Phi => match &data.op {
                // One level only: a φ-of-φ chain at a loop header must not
                // recurse into itself.
                OperationData::Phi { phi, .. } => self
                    .func
                    .phi(*phi)
                    .ok()
                    .and_then(|node| {
                        node.links()
                            .iter()
                            .find(|(_, value)| {
                                self.func
                                    .instr(*value)
                                    .map(|d| d.opcode() != Opcode::Phi)
                                    .unwrap_or(false)
                            })
                            .copied()
                    })
                    .map(|(_, value)| self.produces_float(value))
                    .unwrap_or(false),
                _ => false,
            },
            _ => false,
        }
    }

    /// The virtual register holding the value of `instr`, materializing the
    /// instruction if it has not been emitted yet.
    fn vreg_of(&mut self, instr: InstrRef) -> Result<VregIdx> {
        if let Some(&vreg) = self.vregs.get(&instr) {
            return Ok(vreg);
        }
        let data = self.func.instr(instr)?;
        if data.is_control_flow() && data.opcode() != Opcode::Phi {
            return Err(Error::InvalidState(
                "control instruction referenced before emission",
            ));
        }
        self.emit_value(instr)
    }

    fn set_vreg(&mut self, instr: InstrRef, vreg: VregIdx) {
        self.vregs.insert(instr, vreg);
    }

    /// Allocate an 80-bit frame temporary and return its local-area offset.
    fn new_x87_temp(&mut self) -> u64 {
        self.frame.require_x87_control_word();
        self.frame.allocate_local(16, 16)
    }

    fn local_ptr(&mut self, offset: u64) -> VregIdx {
        let vreg = self.new_gp_vreg();
        self.emit(
            AsmOpcode::Lea,
            [
                Value::vreg(vreg),
                Value::Indirect {
                    base: IndirectBase::LocalVar(offset),
                    offset: 0,
                    variant: OperandVariant::Default,
                    segment: None,
                },
                Value::None,
            ],
        );
        vreg
    }

    fn mov_imm(&mut self, dst: VregIdx, value: i64) {
        if i32::try_from(value).is_ok() {
            self.emit(
                AsmOpcode::Mov,
                [Value::vreg(dst), Value::Int(value), Value::None],
            );
        } else {
            self.emit(
                AsmOpcode::Movabs,
                [Value::vreg(dst), Value::Int(value), Value::None],
            );
        }
    }

    // ---- pure value emission -----------------------------------------

    fn emit_value(&mut self, instr: InstrRef) -> Result<VregIdx> {
        let op = self.func.instr(instr)?.op.clone();
        self.note_ir_location(instr);
        let vreg = match op {
            OperationData::Imm { opcode, imm } => match (opcode, imm) {
                (Opcode::IntConst | Opcode::IntPlaceholder, Immediate::Int(v)) => {
                    let dst = self.new_gp_vreg();
                    self.mov_imm(dst, v);
                    dst
                }
                (Opcode::UintConst, Immediate::Uint(v)) => {
                    let dst = self.new_gp_vreg();
                    self.mov_imm(dst, v as i64);
                    dst
                }
                (Opcode::Float32Const, Immediate::Float32(bits)) => {
                    let scratch = self.new_gp_vreg();
                    self.mov_imm(scratch, bits.0 as i64);
                    let dst = self.new_fp_vreg();
                    self.emit(
                        AsmOpcode::Movd,
                        [
                            Value::vreg(dst),
                            Value::vreg_variant(scratch, OperandVariant::W32),
                            Value::None,
                        ],
                    );
                    dst
                }
                (Opcode::Float64Const, Immediate::Float64(bits)) => {
                    let scratch = self.new_gp_vreg();
                    self.mov_imm(scratch, bits.0 as i64);
                    let dst = self.new_fp_vreg();
                    self.emit(
                        AsmOpcode::Movq,
                        [Value::vreg(dst), Value::vreg(scratch), Value::None],
                    );
                    dst
                }
                (Opcode::LongDoubleConst, Immediate::LongDouble(bits)) => {
                    // Widen a double image through the x87 unit into an
                    // 80-bit temporary; the value is its address.
                    let scratch_off = self.frame.allocate_local(8, 8);
                    let ld_off = self.new_x87_temp();
                    let scratch = self.new_gp_vreg();
                    self.mov_imm(scratch, bits.0 as i64);
                    self.emit(
                        AsmOpcode::Mov,
                        [
                            Value::Indirect {
                                base: IndirectBase::LocalVar(scratch_off),
                                offset: 0,
                                variant: OperandVariant::W64,
                                segment: None,
                            },
                            Value::vreg(scratch),
                            Value::None,
                        ],
                    );
                    self.emit(
                        AsmOpcode::Fld,
                        [
                            Value::Indirect {
                                base: IndirectBase::LocalVar(scratch_off),
                                offset: 0,
                                variant: OperandVariant::FpDouble,
                                segment: None,
                            },
                            Value::None,
                            Value::None,
                        ],
                    );
                    self.emit(
                        AsmOpcode::Fstp,
                        [
                            Value::Indirect {
                                base: IndirectBase::LocalVar(ld_off),
                                offset: 0,
                                variant: OperandVariant::W80,
                                segment: None,
                            },
                            Value::None,
                            Value::None,
                        ],
                    );
                    self.local_ptr(ld_off)
                }
                _ => return Err(Error::InvalidState("malformed constant operation")),
            },

            OperationData::BitintConst { .. } => {
                return Err(Error::InvalidState(
                    "wide bitint constant survived lowering",
                ))
            }

            OperationData::GetArgument { index, .. } => *self
                .param_vregs
                .get(index)
                .ok_or(Error::OutOfBounds("argument index past parameter list"))?,

            OperationData::BlockRef { block, .. } => {
                let label = self.block_label(block);
                let dst = self.new_gp_vreg();
                self.emit(
                    AsmOpcode::Mov,
                    [Value::vreg(dst), Value::InternalLabel(label), Value::None],
                );
                dst
            }

            OperationData::Ref2 { opcode, args } => self.emit_binary(opcode, args)?,

            OperationData::Ref1 { opcode, arg } => self.emit_unary(opcode, arg)?,

            OperationData::OptRef1 { .. }
            | OperationData::Jump { .. }
            | OperationData::Branch { .. }
            | OperationData::BranchCompare { .. }
            | OperationData::InlineAsm { .. } => {
                return Err(Error::InvalidState("terminator emitted as a value"))
            }

            OperationData::CompareRef2 {
                comparison, args, ..
            } => {
                let is_float = comparison.kind.is_float();
                let lhs = self.vreg_of(args[0])?;
                let rhs = self.vreg_of(args[1])?;
                let dst = self.new_gp_vreg();
                let anchor = self
                    .ctx
                    .instr_tail()
                    .ok_or(Error::InvalidState("empty stream at comparison"))?;
                emit_scalar_compare(
                    &mut self.ctx,
                    anchor,
                    comparison,
                    dst,
                    Value::vreg(lhs),
                    Value::vreg(rhs),
                    is_float,
                )?;
                dst
            }

            OperationData::Ref3Cond {
                opcode: Opcode::Select,
                args,
                condition_variant,
            } => {
                let cond = self.vreg_of(args[0])?;
                let then_value = self.vreg_of(args[1])?;
                let else_value = self.vreg_of(args[2])?;
                let dst = self.new_gp_vreg();
                self.emit(
                    AsmOpcode::Mov,
                    [Value::vreg(dst), Value::vreg(else_value), Value::None],
                );
                let variant = cond_variant(condition_variant);
                self.emit(
                    AsmOpcode::Test,
                    [
                        Value::vreg_variant(cond, variant),
                        Value::vreg_variant(cond, variant),
                        Value::None,
                    ],
                );
                self.emit(
                    AsmOpcode::Cmovne,
                    [Value::vreg(dst), Value::vreg(then_value), Value::None],
                );
                dst
            }

            OperationData::Ref3Cond { .. } => {
                return Err(Error::InvalidState("unhandled three-operand operation"))
            }

            OperationData::BitsExtract {
                opcode,
                base,
                offset,
                length,
            } => {
                let src = self.vreg_of(base)?;
                let dst = self.new_gp_vreg();
                self.emit(
                    AsmOpcode::Mov,
                    [Value::vreg(dst), Value::vreg(src), Value::None],
                );
                let left = 64 - (offset + length).min(64);
                let right = 64 - length.min(64);
                if left > 0 {
                    self.emit(
                        AsmOpcode::Shl,
                        [Value::vreg(dst), Value::Int(left as i64), Value::None],
                    );
                }
                if right > 0 {
                    let shift = if opcode == Opcode::BitsExtractSigned {
                        AsmOpcode::Sar
                    } else {
                        AsmOpcode::Shr
                    };
                    self.emit(
                        shift,
                        [Value::vreg(dst), Value::Int(right as i64), Value::None],
                    );
                }
                dst
            }

            OperationData::BitsInsert {
                base,
                value,
                offset,
                length,
                ..
            } => {
                let base = self.vreg_of(base)?;
                let value = self.vreg_of(value)?;
                let mask = if length >= 64 {
                    u64::MAX
                } else {
                    ((1u64 << length) - 1) << offset
                };
                let dst = self.new_gp_vreg();
                let scratch = self.new_gp_vreg();
                self.emit(
                    AsmOpcode::Mov,
                    [Value::vreg(dst), Value::vreg(base), Value::None],
                );
                self.mov_imm(scratch, !mask as i64);
                self.emit(
                    AsmOpcode::And,
                    [Value::vreg(dst), Value::vreg(scratch), Value::None],
                );
                self.emit(
                    AsmOpcode::Mov,
                    [Value::vreg(scratch), Value::vreg(value), Value::None],
                );
                if offset > 0 {
                    self.emit(
                        AsmOpcode::Shl,
                        [Value::vreg(scratch), Value::Int(offset as i64), Value::None],
                    );
                }
                self.emit(
                    AsmOpcode::Or,
                    [Value::vreg(dst), Value::vreg(scratch), Value::None],
                );
                dst
            }

            OperationData::Load {
                opcode,
                location,
                flags,
            } => {
                let ptr = self.vreg_of(location)?;
                self.emit_load(opcode, ptr, flags.extension)?
            }

            OperationData::Phi { .. } => {
                let fp = self.produces_float(instr);
                if fp {
                    self.new_fp_vreg()
                } else {
                    self.new_gp_vreg()
                }
            }

            OperationData::LocalAlloc { type_ref, .. } => {
                let ty = self.ir.get_type(type_ref.type_id)?;
                let layout = self.abi.entry_layout(ty, type_ref.index)?;
                let offset = self.frame.allocate_local(layout.size, layout.alignment);
                self.local_offsets.insert(instr, offset);
                self.local_ptr(offset)
            }

            OperationData::TemporaryObject { size, align, .. } => {
                let offset = self.frame.allocate_local(size, align);
                self.local_offsets.insert(instr, offset);
                self.local_ptr(offset)
            }

            OperationData::StackAlloc {
                size, alignment, ..
            } => {
                let size = self.vreg_of(size)?;
                let _ = self.vreg_of(alignment)?;
                self.frame.set_omit_frame_pointer(false);
                self.emit(
                    AsmOpcode::Sub,
                    [
                        Value::phreg(PhysReg::Rsp),
                        Value::vreg(size),
                        Value::None,
                    ],
                );
                self.emit(
                    AsmOpcode::And,
                    [
                        Value::phreg(PhysReg::Rsp),
                        Value::Int(-16),
                        Value::None,
                    ],
                );
                let dst = self.new_gp_vreg();
                self.emit(
                    AsmOpcode::Mov,
                    [Value::vreg(dst), Value::phreg(PhysReg::Rsp), Value::None],
                );
                dst
            }

            OperationData::Call { .. } => {
                return Err(Error::InvalidState(
                    "call instruction referenced before its control emission",
                ))
            }

            OperationData::TypedMem { .. }
            | OperationData::Store { .. }
            | OperationData::AtomicOp { .. }
            | OperationData::OverflowArith { .. } => {
                return Err(Error::InvalidState("effectful instruction emitted as a value"))
            }

            OperationData::Bitint { .. } => {
                return Err(Error::InvalidState("bitint operation survived lowering"))
            }

            OperationData::None { .. } | OperationData::Ref4Compare { .. } => {
                return Err(Error::InvalidState("unsupported operation reached codegen"))
            }
        };
        self.set_vreg(instr, vreg);
        Ok(vreg)
    }

    fn emit_load(
        &mut self,
        opcode: Opcode,
        ptr: VregIdx,
        extension: LoadExtension,
    ) -> Result<VregIdx> {
        let mem = |variant| Value::indirect_virtual(ptr, 0, variant);
        Ok(match opcode {
            Opcode::IntLoad(w) => {
                let dst = self.new_gp_vreg();
                match (w, extension) {
                    (OpWidth::W64, _) => {
                        self.emit(
                            AsmOpcode::Mov,
                            [Value::vreg(dst), mem(OperandVariant::W64), Value::None],
                        );
                    }
                    (OpWidth::W32, LoadExtension::SignExtend) => {
                        self.emit(
                            AsmOpcode::Movsxd,
                            [Value::vreg(dst), mem(OperandVariant::W32), Value::None],
                        );
                    }
                    (OpWidth::W32, _) => {
                        self.emit(
                            AsmOpcode::Mov,
                            [
                                Value::vreg_variant(dst, OperandVariant::W32),
                                mem(OperandVariant::W32),
                                Value::None,
                            ],
                        );
                    }
                    (w, LoadExtension::SignExtend) => {
                        self.emit(
                            AsmOpcode::Movsx,
                            [Value::vreg(dst), mem(op_variant(w)), Value::None],
                        );
                    }
                    (w, _) => {
                        self.emit(
                            AsmOpcode::Movzx,
                            [Value::vreg(dst), mem(op_variant(w)), Value::None],
                        );
                    }
                }
                dst
            }
            Opcode::Float32Load => {
                let dst = self.new_fp_vreg();
                self.emit(
                    AsmOpcode::Movss,
                    [Value::vreg(dst), mem(OperandVariant::FpSingle), Value::None],
                );
                dst
            }
            Opcode::Float64Load => {
                let dst = self.new_fp_vreg();
                self.emit(
                    AsmOpcode::Movsd,
                    [Value::vreg(dst), mem(OperandVariant::FpDouble), Value::None],
                );
                dst
            }
            Opcode::LongDoubleLoad => {
                // The value representation is already a pointer.
                ptr
            }
            _ => return Err(Error::InvalidState("unhandled load opcode")),
        })
    }

    fn emit_binary(&mut self, opcode: Opcode, args: [InstrRef; 2]) -> Result<VregIdx> {
        use AsmOpcode::*;
        let simple = |op: Opcode| -> Option<(AsmOpcode, OpWidth)> {
            match op {
                Opcode::IntAdd(w) => Some((Add, w)),
                Opcode::IntSub(w) => Some((Sub, w)),
                Opcode::IntAnd(w) => Some((And, w)),
                Opcode::IntOr(w) => Some((Or, w)),
                Opcode::IntXor(w) => Some((Xor, w)),
                Opcode::BoolAnd(w) => Some((And, w)),
                Opcode::BoolOr(w) => Some((Or, w)),
                _ => None,
            }
        };

        if let Some((asm_op, w)) = simple(opcode) {
            let lhs = self.vreg_of(args[0])?;
            let rhs = self.vreg_of(args[1])?;
            let dst = self.new_gp_vreg();
            self.emit(Mov, [Value::vreg(dst), Value::vreg(lhs), Value::None]);
            self.emit(
                asm_op,
                [
                    Value::vreg_variant(dst, op_variant(w)),
                    Value::vreg_variant(rhs, op_variant(w)),
                    Value::None,
                ],
            );
            return Ok(dst);
        }

        Ok(match opcode {
            Opcode::IntMul(w) => {
                let lhs = self.vreg_of(args[0])?;
                let rhs = self.vreg_of(args[1])?;
                let dst = self.new_gp_vreg();
                self.emit(Mov, [Value::vreg(dst), Value::vreg(lhs), Value::None]);
                self.emit(
                    Imul,
                    [
                        Value::vreg_variant(dst, op_variant(w)),
                        Value::vreg_variant(rhs, op_variant(w)),
                        Value::None,
                    ],
                );
                dst
            }
            Opcode::IntDiv(w) | Opcode::IntMod(w) => {
                self.emit_division(args, w, true, opcode == Opcode::IntMod(w))?
            }
            Opcode::UintDiv(w) | Opcode::UintMod(w) => {
                self.emit_division(args, w, false, opcode == Opcode::UintMod(w))?
            }
            Opcode::IntShl(w) | Opcode::IntShr(w) | Opcode::IntSar(w) => {
                let asm_op = match opcode {
                    Opcode::IntShl(_) => Shl,
                    Opcode::IntShr(_) => Shr,
                    _ => Sar,
                };
                let lhs = self.vreg_of(args[0])?;
                let rhs = self.vreg_of(args[1])?;
                let dst = self.new_gp_vreg();
                self.emit(Mov, [Value::vreg(dst), Value::vreg(lhs), Value::None]);
                self.emit(
                    Mov,
                    [Value::phreg(PhysReg::Rcx), Value::vreg(rhs), Value::None],
                );
                self.emit(
                    asm_op,
                    [
                        Value::vreg_variant(dst, op_variant(w)),
                        Value::phreg_variant(PhysReg::Rcx, OperandVariant::W8),
                        Value::None,
                    ],
                );
                dst
            }
            Opcode::FloatAdd(fw) | Opcode::FloatSub(fw) | Opcode::FloatMul(fw)
            | Opcode::FloatDiv(fw) => self.emit_float_binary(opcode, fw, args)?,
            Opcode::Pair => self.vreg_of(args[0])?,
            Opcode::ComplexFrom(_) => {
                let re = self.vreg_of(args[0])?;
                let im = self.vreg_of(args[1])?;
                let (pair, lo, hi) = self.ctx.new_pair(PairVariant::FloatDouble);
                self.emit(Movq, [Value::vreg(lo), Value::vreg(re), Value::None]);
                self.emit(Movq, [Value::vreg(hi), Value::vreg(im), Value::None]);
                pair
            }
            _ => return Err(Error::InvalidState("unhandled binary opcode")),
        })
    }

    fn emit_division(
        &mut self,
        args: [InstrRef; 2],
        w: OpWidth,
        signed: bool,
        modulo: bool,
    ) -> Result<VregIdx> {
        let lhs = self.vreg_of(args[0])?;
        let rhs = self.vreg_of(args[1])?;
        self.emit(
            AsmOpcode::Mov,
            [Value::phreg(PhysReg::Rax), Value::vreg(lhs), Value::None],
        );
        if signed {
            let widen = if w == OpWidth::W32 {
                AsmOpcode::Cdq
            } else {
                AsmOpcode::Cqo
            };
            self.emit(widen, [Value::None, Value::None, Value::None]);
            self.emit(
                AsmOpcode::Idiv,
                [
                    Value::vreg_variant(rhs, op_variant(w)),
                    Value::None,
                    Value::None,
                ],
            );
        } else {
            self.emit(
                AsmOpcode::Xor,
                [
                    Value::phreg_variant(PhysReg::Rdx, OperandVariant::W32),
                    Value::phreg_variant(PhysReg::Rdx, OperandVariant::W32),
                    Value::None,
                ],
            );
            self.emit(
                AsmOpcode::Div,
                [
                    Value::vreg_variant(rhs, op_variant(w)),
                    Value::None,
                    Value::None,
                ],
            );
        }
        let dst = self.new_gp_vreg();
        let src = if modulo { PhysReg::Rdx } else { PhysReg::Rax };
        self.emit(
            AsmOpcode::Mov,
            [Value::vreg(dst), Value::phreg(src), Value::None],
        );
        Ok(dst)
    }

    fn emit_float_binary(
        &mut self,
        opcode: Opcode,
        fw: FloatWidth,
        args: [InstrRef; 2],
    ) -> Result<VregIdx> {
        use AsmOpcode::*;
        if fw == FloatWidth::LongDouble {
            let lhs = self.vreg_of(args[0])?;
            let rhs = self.vreg_of(args[1])?;
            let x87_op = match opcode {
                Opcode::FloatAdd(_) => Faddp,
                Opcode::FloatSub(_) => Fsubp,
                Opcode::FloatMul(_) => Fmulp,
                _ => Fdivp,
            };
            self.emit(
                Fld,
                [
                    Value::indirect_virtual(lhs, 0, OperandVariant::W80),
                    Value::None,
                    Value::None,
                ],
            );
            self.emit(
                Fld,
                [
                    Value::indirect_virtual(rhs, 0, OperandVariant::W80),
                    Value::None,
                    Value::None,
                ],
            );
            self.emit(x87_op, [Value::None, Value::None, Value::None]);
            let out = self.new_x87_temp();
            self.emit(
                Fstp,
                [
                    Value::Indirect {
                        base: IndirectBase::LocalVar(out),
                        offset: 0,
                        variant: OperandVariant::W80,
                        segment: None,
                    },
                    Value::None,
                    Value::None,
                ],
            );
            return Ok(self.local_ptr(out));
        }

        let single = fw == FloatWidth::Single;
        let asm_op = match (opcode, single) {
            (Opcode::FloatAdd(_), true) => Addss,
            (Opcode::FloatAdd(_), false) => Addsd,
            (Opcode::FloatSub(_), true) => Subss,
            (Opcode::FloatSub(_), false) => Subsd,
            (Opcode::FloatMul(_), true) => Mulss,
            (Opcode::FloatMul(_), false) => Mulsd,
            (_, true) => Divss,
            (_, false) => Divsd,
        };
        let lhs = self.vreg_of(args[0])?;
        let rhs = self.vreg_of(args[1])?;
        let dst = self.new_fp_vreg();
        self.emit(Movq, [Value::vreg(dst), Value::vreg(lhs), Value::None]);
        self.emit(asm_op, [Value::vreg(dst), Value::vreg(rhs), Value::None]);
        Ok(dst)
    }

    fn emit_unary(&mut self, opcode: Opcode, arg: InstrRef) -> Result<VregIdx> {
        use AsmOpcode::*;
        Ok(match opcode {
            Opcode::IntNeg(w) | Opcode::IntNot(w) => {
                let src = self.vreg_of(arg)?;
                let dst = self.new_gp_vreg();
                self.emit(Mov, [Value::vreg(dst), Value::vreg(src), Value::None]);
                let asm_op = if matches!(opcode, Opcode::IntNeg(_)) {
                    Neg
                } else {
                    Not
                };
                self.emit(
                    asm_op,
                    [
                        Value::vreg_variant(dst, op_variant(w)),
                        Value::None,
                        Value::None,
                    ],
                );
                dst
            }
            Opcode::IntToBool(w) | Opcode::BoolNot(w) => {
                let src = self.vreg_of(arg)?;
                let dst = self.new_gp_vreg();
                self.emit(
                    Test,
                    [
                        Value::vreg_variant(src, op_variant(w)),
                        Value::vreg_variant(src, op_variant(w)),
                        Value::None,
                    ],
                );
                self.emit(
                    Mov,
                    [
                        Value::vreg_variant(dst, OperandVariant::W32),
                        Value::Int(0),
                        Value::None,
                    ],
                );
                let set = if matches!(opcode, Opcode::IntToBool(_)) {
                    Setne
                } else {
                    Sete
                };
                self.emit(
                    set,
                    [
                        Value::vreg_variant(dst, OperandVariant::W8),
                        Value::None,
                        Value::None,
                    ],
                );
                dst
            }
            Opcode::SignExtend(from) => {
                let src = self.vreg_of(arg)?;
                let dst = self.new_gp_vreg();
                let asm_op = if from == OpWidth::W32 { Movsxd } else { Movsx };
                self.emit(
                    asm_op,
                    [
                        Value::vreg(dst),
                        Value::vreg_variant(src, op_variant(from)),
                        Value::None,
                    ],
                );
                dst
            }
            Opcode::ZeroExtend(from) => {
                let src = self.vreg_of(arg)?;
                let dst = self.new_gp_vreg();
                if from == OpWidth::W32 {
                    self.emit(
                        Mov,
                        [
                            Value::vreg_variant(dst, OperandVariant::W32),
                            Value::vreg_variant(src, OperandVariant::W32),
                            Value::None,
                        ],
                    );
                } else {
                    self.emit(
                        Movzx,
                        [
                            Value::vreg(dst),
                            Value::vreg_variant(src, op_variant(from)),
                            Value::None,
                        ],
                    );
                }
                dst
            }
            Opcode::FloatNeg(fw) => self.emit_float_neg(fw, arg)?,
            Opcode::IntToFloat { signed, to } => self.emit_int_to_float(signed, to, arg)?,
            Opcode::FloatToInt { signed: _, from } => self.emit_float_to_int(from, arg)?,
            Opcode::FloatConvert { from, to } => self.emit_float_convert(from, to, arg)?,
            Opcode::IndirectJump => {
                return Err(Error::InvalidState("terminator emitted as a value"))
            }
            _ => return Err(Error::InvalidState("unhandled unary opcode")),
        })
    }

    fn emit_float_neg(&mut self, fw: FloatWidth, arg: InstrRef) -> Result<VregIdx> {
        if fw == FloatWidth::LongDouble {
            let src = self.vreg_of(arg)?;
            self.emit(
                AsmOpcode::Fld,
                [
                    Value::indirect_virtual(src, 0, OperandVariant::W80),
                    Value::None,
                    Value::None,
                ],
            );
            self.emit(AsmOpcode::Fchs, [Value::None, Value::None, Value::None]);
            let out = self.new_x87_temp();
            self.emit(
                AsmOpcode::Fstp,
                [
                    Value::Indirect {
                        base: IndirectBase::LocalVar(out),
                        offset: 0,
                        variant: OperandVariant::W80,
                        segment: None,
                    },
                    Value::None,
                    Value::None,
                ],
            );
            return Ok(self.local_ptr(out));
        }
        let src = self.vreg_of(arg)?;
        let bits = self.new_gp_vreg();
        let sign = self.new_gp_vreg();
        let dst = self.new_fp_vreg();
        self.emit(
            AsmOpcode::Movq,
            [Value::vreg(bits), Value::vreg(src), Value::None],
        );
        let sign_bit = if fw == FloatWidth::Single {
            0x8000_0000i64
        } else {
            i64::MIN
        };
        self.mov_imm(sign, sign_bit);
        self.emit(
            AsmOpcode::Xor,
            [Value::vreg(bits), Value::vreg(sign), Value::None],
        );
        self.emit(
            AsmOpcode::Movq,
            [Value::vreg(dst), Value::vreg(bits), Value::None],
        );
        Ok(dst)
    }

    fn emit_int_to_float(
        &mut self,
        _signed: bool,
        to: FloatWidth,
        arg: InstrRef,
    ) -> Result<VregIdx> {
        let src = self.vreg_of(arg)?;
        if to == FloatWidth::LongDouble {
            let scratch = self.frame.allocate_local(8, 8);
            let out = self.new_x87_temp();
            self.emit(
                AsmOpcode::Mov,
                [
                    Value::Indirect {
                        base: IndirectBase::LocalVar(scratch),
                        offset: 0,
                        variant: OperandVariant::W64,
                        segment: None,
                    },
                    Value::vreg(src),
                    Value::None,
                ],
            );
            self.emit(
                AsmOpcode::Fild,
                [
                    Value::Indirect {
                        base: IndirectBase::LocalVar(scratch),
                        offset: 0,
                        variant: OperandVariant::W64,
                        segment: None,
                    },
                    Value::None,
                    Value::None,
                ],
            );
            self.emit(
                AsmOpcode::Fstp,
                [
                    Value::Indirect {
                        base: IndirectBase::LocalVar(out),
                        offset: 0,
                        variant: OperandVariant::W80,
                        segment: None,
                    },
                    Value::None,
                    Value::None,
                ],
            );
            return Ok(self.local_ptr(out));
        }
        let dst = self.new_fp_vreg();
        let convert = if to == FloatWidth::Single {
            AsmOpcode::Cvtsi2ss
        } else {
            AsmOpcode::Cvtsi2sd
        };
        self.emit(convert, [Value::vreg(dst), Value::vreg(src), Value::None]);
        Ok(dst)
    }

    fn emit_float_to_int(&mut self, from: FloatWidth, arg: InstrRef) -> Result<VregIdx> {
        let src = self.vreg_of(arg)?;
        if from == FloatWidth::LongDouble {
            let scratch = self.frame.allocate_local(8, 8);
            self.emit(
                AsmOpcode::Fld,
                [
                    Value::indirect_virtual(src, 0, OperandVariant::W80),
                    Value::None,
                    Value::None,
                ],
            );
            self.emit(
                AsmOpcode::Fistp,
                [
                    Value::Indirect {
                        base: IndirectBase::LocalVar(scratch),
                        offset: 0,
                        variant: OperandVariant::W64,
                        segment: None,
                    },
                    Value::None,
                    Value::None,
                ],
            );
            let dst = self.new_gp_vreg();
            self.emit(
                AsmOpcode::Mov,
                [
                    Value::vreg(dst),
                    Value::Indirect {
                        base: IndirectBase::LocalVar(scratch),
                        offset: 0,
                        variant: OperandVariant::W64,
                        segment: None,
                    },
                    Value::None,
                ],
            );
            return Ok(dst);
        }
        let dst = self.new_gp_vreg();
        let convert = if from == FloatWidth::Single {
            AsmOpcode::Cvttss2si
        } else {
            AsmOpcode::Cvttsd2si
        };
        self.emit(convert, [Value::vreg(dst), Value::vreg(src), Value::None]);
        Ok(dst)
    }

    fn emit_float_convert(
        &mut self,
        from: FloatWidth,
        to: FloatWidth,
        arg: InstrRef,
    ) -> Result<VregIdx> {
        let src = self.vreg_of(arg)?;
        Ok(match (from, to) {
            (FloatWidth::Single, FloatWidth::Double) => {
                let dst = self.new_fp_vreg();
                self.emit(
                    AsmOpcode::Cvtss2sd,
                    [Value::vreg(dst), Value::vreg(src), Value::None],
                );
                dst
            }
            (FloatWidth::Double, FloatWidth::Single) => {
                let dst = self.new_fp_vreg();
                self.emit(
                    AsmOpcode::Cvtsd2ss,
                    [Value::vreg(dst), Value::vreg(src), Value::None],
                );
                dst
            }
            (FloatWidth::Single | FloatWidth::Double, FloatWidth::LongDouble) => {
                let scratch = self.frame.allocate_local(8, 8);
                let out = self.new_x87_temp();
                let store = if from == FloatWidth::Single {
                    AsmOpcode::Movss
                } else {
                    AsmOpcode::Movsd
                };
                let load_variant = if from == FloatWidth::Single {
                    OperandVariant::FpSingle
                } else {
                    OperandVariant::FpDouble
                };
                self.emit(
                    store,
                    [
                        Value::Indirect {
                            base: IndirectBase::LocalVar(scratch),
                            offset: 0,
                            variant: load_variant,
                            segment: None,
                        },
                        Value::vreg(src),
                        Value::None,
                    ],
                );
                self.emit(
                    AsmOpcode::Fld,
                    [
                        Value::Indirect {
                            base: IndirectBase::LocalVar(scratch),
                            offset: 0,
                            variant: load_variant,
                            segment: None,
                        },
                        Value::None,
                        Value::None,
                    ],
                );
                self.emit(
                    AsmOpcode::Fstp,
                    [
                        Value::Indirect {
                            base: IndirectBase::LocalVar(out),
                            offset: 0,
                            variant: OperandVariant::W80,
                            segment: None,
                        },
                        Value::None,
                        Value::None,
                    ],
                );
                self.local_ptr(out)
            }
            (FloatWidth::LongDouble, FloatWidth::Single | FloatWidth::Double) => {
                let scratch = self.frame.allocate_local(8, 8);
                self.emit(
                    AsmOpcode::Fld,
                    [
                        Value::indirect_virtual(src, 0, OperandVariant::W80),
                        Value::None,
                        Value::None,
                    ],
                );
                let store_variant = if to == FloatWidth::Single {
                    OperandVariant::FpSingle
                } else {
                    OperandVariant::FpDouble
                };
                self.emit(
                    AsmOpcode::Fstp,
                    [
                        Value::Indirect {
                            base: IndirectBase::LocalVar(scratch),
                            offset: 0,
                            variant: store_variant,
                            segment: None,
                        },
                        Value::None,
                        Value::None,
                    ],
                );
                let dst = self.new_fp_vreg();
                let load = if to == FloatWidth::Single {
                    AsmOpcode::Movss
                } else {
                    AsmOpcode::Movsd
                };
                self.emit(
                    load,
                    [
                        Value::vreg(dst),
                        Value::Indirect {
                            base: IndirectBase::LocalVar(scratch),
                            offset: 0,
                            variant: store_variant,
                            segment: None,
                        },
                        Value::None,
                    ],
                );
                dst
            }
            _ => src,
        })
    }

    // ---- control emission --------------------------------------------

    /// Emit `virtual_register_link`s for φ-nodes of `target` along the edge
    /// from `source`.
    fn emit_phi_links(&mut self, source: BlockId, target: BlockId) -> Result<()> {
        let phis = self.func.block(target)?.phis.clone();
        for phi in phis {
            let node = self.func.phi(phi)?;
            let output = node.output;
            let Some(incoming) = node.link(source) else {
                continue;
            };
            let phi_vreg = self.vreg_of(output)?;
            let value_vreg = self.vreg_of(incoming)?;
            if phi_vreg != value_vreg {
                self.emit(
                    AsmOpcode::VirtualRegisterLink,
                    [Value::vreg(phi_vreg), Value::vreg(value_vreg), Value::None],
                );
            }
        }
        Ok(())
    }

    fn block_has_phi_edge(&self, source: BlockId, target: BlockId) -> bool {
        self.func
            .block(target)
            .map(|data| {
                data.phis.iter().any(|phi| {
                    self.func
                        .phi(*phi)
                        .map(|node| node.link(source).is_some())
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false)
    }

    fn emit_edge_jump(
        &mut self,
        jcc: AsmOpcode,
        source: BlockId,
        target: BlockId,
        alternative: BlockId,
    ) -> Result<()> {
        let target_label = self.block_label(target);
        let alternative_label = self.block_label(alternative);
        if self.block_has_phi_edge(source, target) || self.block_has_phi_edge(source, alternative) {
            let stub = self.ctx.new_label();
            self.emit(jcc, [Value::InternalLabel(stub), Value::None, Value::None]);
            self.emit_phi_links(source, alternative)?;
            self.emit(
                AsmOpcode::Jmp,
                [
                    Value::InternalLabel(alternative_label),
                    Value::None,
                    Value::None,
                ],
            );
            self.pending_labels.push(stub);
            self.emit_phi_links(source, target)?;
            self.emit(
                AsmOpcode::Jmp,
                [Value::InternalLabel(target_label), Value::None, Value::None],
            );
        } else {
            self.emit(
                jcc,
                [Value::InternalLabel(target_label), Value::None, Value::None],
            );
            self.emit(
                AsmOpcode::Jmp,
                [
                    Value::InternalLabel(alternative_label),
                    Value::None,
                    Value::None,
                ],
            );
        }
        Ok(())
    }

    fn emit_control(&mut self, block: BlockId, instr: InstrRef) -> Result<()> {
        let op = self.func.instr(instr)?.op.clone();
        self.note_ir_location(instr);
        match op {
            OperationData::Store {
                opcode,
                location,
                value,
                ..
            } => {
                let ptr = self.vreg_of(location)?;
                let value = self.vreg_of(value)?;
                match opcode {
                    Opcode::IntStore(w) => {
                        self.emit(
                            AsmOpcode::Mov,
                            [
                                Value::indirect_virtual(ptr, 0, op_variant(w)),
                                Value::vreg_variant(value, op_variant(w)),
                                Value::None,
                            ],
                        );
                    }
                    Opcode::Float32Store => {
                        self.emit(
                            AsmOpcode::Movss,
                            [
                                Value::indirect_virtual(ptr, 0, OperandVariant::FpSingle),
                                Value::vreg(value),
                                Value::None,
                            ],
                        );
                    }
                    Opcode::Float64Store => {
                        self.emit(
                            AsmOpcode::Movsd,
                            [
                                Value::indirect_virtual(ptr, 0, OperandVariant::FpDouble),
                                Value::vreg(value),
                                Value::None,
                            ],
                        );
                    }
                    Opcode::LongDoubleStore => {
                        self.emit(
                            AsmOpcode::Fld,
                            [
                                Value::indirect_virtual(value, 0, OperandVariant::W80),
                                Value::None,
                                Value::None,
                            ],
                        );
                        self.emit(
                            AsmOpcode::Fstp,
                            [
                                Value::indirect_virtual(ptr, 0, OperandVariant::W80),
                                Value::None,
                                Value::None,
                            ],
                        );
                    }
                    _ => return Err(Error::InvalidState("unhandled store opcode")),
                }
            }

            OperationData::Load { .. } => {
                // A volatile load on the control path still only produces a
                // value.
                self.vreg_of(instr)?;
            }

            OperationData::LocalAlloc { .. }
            | OperationData::TemporaryObject { .. }
            | OperationData::StackAlloc { .. } => {
                self.vreg_of(instr)?;
            }

            OperationData::TypedMem {
                opcode,
                target,
                source,
                type_ref,
            } => match opcode {
                Opcode::CopyMemory => {
                    let size = self.type_size(type_ref)?;
                    let target = self.vreg_of(target)?;
                    let source = self
                        .vreg_of(source.expand().ok_or(Error::InvalidState("copy without source"))?)?;
                    self.emit(
                        AsmOpcode::Mov,
                        [Value::phreg(PhysReg::Rdi), Value::vreg(target), Value::None],
                    );
                    self.emit(
                        AsmOpcode::Mov,
                        [Value::phreg(PhysReg::Rsi), Value::vreg(source), Value::None],
                    );
                    self.emit(
                        AsmOpcode::Mov,
                        [
                            Value::phreg(PhysReg::Rcx),
                            Value::Int(size as i64),
                            Value::None,
                        ],
                    );
                    self.emit(AsmOpcode::RepMovsb, [Value::None, Value::None, Value::None]);
                }
                Opcode::ZeroMemory => {
                    let size = self.type_size(type_ref)?;
                    let target = self.vreg_of(target)?;
                    self.emit(
                        AsmOpcode::Mov,
                        [Value::phreg(PhysReg::Rdi), Value::vreg(target), Value::None],
                    );
                    self.emit(
                        AsmOpcode::Xor,
                        [
                            Value::phreg_variant(PhysReg::Rax, OperandVariant::W32),
                            Value::phreg_variant(PhysReg::Rax, OperandVariant::W32),
                            Value::None,
                        ],
                    );
                    self.emit(
                        AsmOpcode::Mov,
                        [
                            Value::phreg(PhysReg::Rcx),
                            Value::Int(size as i64),
                            Value::None,
                        ],
                    );
                    self.emit(AsmOpcode::RepStosb, [Value::None, Value::None, Value::None]);
                }
                Opcode::VarargGet => self.emit_vararg_get(instr, target, type_ref)?,
                _ => return Err(Error::InvalidState("unhandled typed memory opcode")),
            },

            OperationData::AtomicOp {
                opcode,
                location,
                value,
                ..
            } => {
                let ptr = self.vreg_of(location)?;
                match opcode {
                    Opcode::AtomicLoad(w) => {
                        let dst = self.new_gp_vreg();
                        self.emit(
                            AsmOpcode::Mov,
                            [
                                Value::vreg_variant(dst, op_variant(w)),
                                Value::indirect_virtual(ptr, 0, op_variant(w)),
                                Value::None,
                            ],
                        );
                        self.set_vreg(instr, dst);
                    }
                    Opcode::AtomicStore(w) => {
                        let value = self
                            .vreg_of(value.expand().ok_or(Error::InvalidState("store without value"))?)?;
                        self.emit(
                            AsmOpcode::Mov,
                            [
                                Value::indirect_virtual(ptr, 0, op_variant(w)),
                                Value::vreg_variant(value, op_variant(w)),
                                Value::None,
                            ],
                        );
                        self.emit(AsmOpcode::Mfence, [Value::None, Value::None, Value::None]);
                    }
                    _ => return Err(Error::InvalidState("unhandled atomic opcode")),
                }
            }

            OperationData::OverflowArith {
                opcode,
                args,
                ..
            } => {
                let lhs = self.vreg_of(args[0])?;
                let rhs = self.vreg_of(args[1])?;
                let flag_ptr = self.vreg_of(args[2])?;
                let dst = self.new_gp_vreg();
                let flag = self.new_gp_vreg();
                self.emit(
                    AsmOpcode::Mov,
                    [Value::vreg(dst), Value::vreg(lhs), Value::None],
                );
                let asm_op = match opcode {
                    Opcode::OverflowAdd => AsmOpcode::Add,
                    Opcode::OverflowSub => AsmOpcode::Sub,
                    _ => AsmOpcode::Imul,
                };
                self.emit(
                    asm_op,
                    [Value::vreg(dst), Value::vreg(rhs), Value::None],
                );
                self.emit(
                    AsmOpcode::Mov,
                    [
                        Value::vreg_variant(flag, OperandVariant::W32),
                        Value::Int(0),
                        Value::None,
                    ],
                );
                self.emit(
                    AsmOpcode::Seto,
                    [
                        Value::vreg_variant(flag, OperandVariant::W8),
                        Value::None,
                        Value::None,
                    ],
                );
                self.emit(
                    AsmOpcode::Mov,
                    [
                        Value::indirect_virtual(flag_ptr, 0, OperandVariant::W8),
                        Value::vreg_variant(flag, OperandVariant::W8),
                        Value::None,
                    ],
                );
                self.set_vreg(instr, dst);
            }

            OperationData::Jump { target, .. } => {
                self.emit_phi_links(block, target)?;
                let label = self.block_label(target);
                self.emit(
                    AsmOpcode::Jmp,
                    [Value::InternalLabel(label), Value::None, Value::None],
                );
            }

            OperationData::Branch {
                condition,
                condition_variant,
                target,
                alternative,
                ..
            } => {
                let cond = self.vreg_of(condition)?;
                let variant = cond_variant(condition_variant);
                self.emit(
                    AsmOpcode::Test,
                    [
                        Value::vreg_variant(cond, variant),
                        Value::vreg_variant(cond, variant),
                        Value::None,
                    ],
                );
                self.emit_edge_jump(AsmOpcode::Jne, block, target, alternative)?;
            }

            OperationData::BranchCompare {
                comparison,
                args,
                target,
                alternative,
                ..
            } => {
                let lhs = self.vreg_of(args[0])?;
                let rhs = self.vreg_of(args[1])?;
                let anchor = self
                    .ctx
                    .instr_tail()
                    .ok_or(Error::InvalidState("empty stream at branch"))?;
                let (jcc, _) = emit_branch_compare(
                    &mut self.ctx,
                    anchor,
                    comparison,
                    Value::vreg(lhs),
                    Value::vreg(rhs),
                    comparison.kind.is_float(),
                )?;
                self.emit_edge_jump(jcc, block, target, alternative)?;
            }

            OperationData::Ref1 {
                opcode: Opcode::IndirectJump,
                arg,
            } => {
                let target = self.vreg_of(arg)?;
                self.emit(
                    AsmOpcode::Jmp,
                    [Value::vreg(target), Value::None, Value::None],
                );
            }

            OperationData::OptRef1 {
                opcode: Opcode::Return,
                arg,
            } => {
                self.emit_return(arg.expand())?;
            }

            OperationData::Call { opcode, call } => {
                self.emit_call(instr, call, opcode)?;
            }

            OperationData::InlineAsm { inline_asm, .. } => {
                let node = self.func.inline_asm(inline_asm)?.clone();
                for param in node.params() {
                    if let Some(read) = param.read.expand() {
                        self.vreg_of(read)?;
                    }
                }
                self.emit(
                    AsmOpcode::InlineAssembly,
                    [Value::Uint(node.asm_id), Value::None, Value::None],
                );
                if let Some(default) = node.default_target.expand() {
                    self.emit_phi_links(block, default)?;
                    let label = self.block_label(default);
                    self.emit(
                        AsmOpcode::Jmp,
                        [Value::InternalLabel(label), Value::None, Value::None],
                    );
                }
            }

            _ => {
                // A pure instruction inserted into the control list (e.g. a
                // volatile-load shaped op) just materializes its value.
                self.vreg_of(instr)?;
            }
        }
        Ok(())
    }

    fn type_size(&self, type_ref: TypeRef) -> Result<u64> {
        let ty = self.ir.get_type(type_ref.type_id)?;
        Ok(self.abi.entry_layout(ty, type_ref.index)?.size)
    }

    fn emit_return(&mut self, value: Option<InstrRef>) -> Result<()> {
        if let Some(value) = value {
            let decl = self.ir.get_declaration(self.func.decl)?;
            let result_ty = self.ir.get_type(decl.result_type_id)?.clone();
            if !result_ty.is_empty() {
                let class = self.abi.classify_entry(&result_ty, 0)?;
                let vreg = self.vreg_of(value)?;
                match class {
                    ParamClass::Sse => {
                        // Complex values return their halves in xmm0/xmm1.
                        if let VregKind::Pair { lo, hi, .. } = *self.ctx.vreg(vreg)? {
                            self.emit(
                                AsmOpcode::Movq,
                                [Value::phreg(PhysReg::Xmm0), Value::vreg(lo), Value::None],
                            );
                            self.emit(
                                AsmOpcode::Movq,
                                [Value::phreg(PhysReg::Xmm1), Value::vreg(hi), Value::None],
                            );
                        } else {
                            self.emit(
                                AsmOpcode::Movq,
                                [Value::phreg(PhysReg::Xmm0), Value::vreg(vreg), Value::None],
                            );
                        }
                    }
                    ParamClass::X87 => {
                        self.emit(
                            AsmOpcode::Fld,
                            [
                                Value::indirect_virtual(vreg, 0, OperandVariant::W80),
                                Value::None,
                                Value::None,
                            ],
                        );
                    }
                    _ => {
                        self.emit(
                            AsmOpcode::Mov,
                            [Value::phreg(PhysReg::Rax), Value::vreg(vreg), Value::None],
                        );
                    }
                }
            }
        }
        self.emit(
            AsmOpcode::FunctionEpilogue,
            [Value::None, Value::None, Value::None],
        );
        self.emit(AsmOpcode::Ret, [Value::None, Value::None, Value::None]);
        Ok(())
    }

    fn emit_call(
        &mut self,
        instr: InstrRef,
        call: crate::opt::code::CallRef,
        opcode: Opcode,
    ) -> Result<()> {
        let node = self.func.call(call)?.clone();
        let decl = self.ir.get_declaration(node.decl)?.clone();
        let mut params_ty = self.ir.get_type(decl.params_type_id)?.clone();
        // Variadic arguments past the declared parameters classify as
        // machine words.
        let mut declared = 0usize;
        let mut index = 0usize;
        while index < params_ty.len() {
            declared += 1;
            index += params_ty.entry_span(index)?;
        }
        for _ in declared..node.argument_count() {
            params_ty.append(crate::ir::TypeEntry::Word);
        }
        let locations = self.abi.classify_parameters(&params_ty)?;
        let tail_call = matches!(opcode, Opcode::TailInvoke | Opcode::TailInvokeVirtual);

        // Arguments materialize before the stash activates so their
        // producing code does not interleave with the save sequence.
        let mut arg_vregs = Vec::with_capacity(node.argument_count());
        for i in 0..node.argument_count() {
            arg_vregs.push(self.vreg_of(node.argument(i)?)?);
        }
        let indirect_vreg = match node.indirect.expand() {
            Some(indirect) => Some(self.vreg_of(indirect)?),
            None => None,
        };

        let stash = if tail_call {
            None
        } else {
            let stash = self.ctx.new_stash(STASH_REGS.to_vec(), None);
            self.emit(
                AsmOpcode::StashActivate,
                [Value::Stash(stash), Value::None, Value::None],
            );
            Some(stash)
        };

        // Stack arguments first, then register arguments.
        let mut stack_bytes = 0u64;
        for location in &locations {
            if let ParamLocation::Stack(offset) = location {
                stack_bytes = stack_bytes.max(offset + QWORD);
            }
        }
        let stack_bytes = (stack_bytes + 15) & !15;
        if stack_bytes > 0 {
            self.emit(
                AsmOpcode::Sub,
                [
                    Value::phreg(PhysReg::Rsp),
                    Value::Int(stack_bytes as i64),
                    Value::None,
                ],
            );
        }
        let mut sse_args = 0u8;
        for (i, location) in locations.iter().enumerate() {
            let Some(&vreg) = arg_vregs.get(i) else {
                continue;
            };
            match location {
                ParamLocation::Register(reg) => {
                    self.emit(
                        AsmOpcode::Mov,
                        [Value::phreg(*reg), Value::vreg(vreg), Value::None],
                    );
                }
                ParamLocation::SseRegister(reg) => {
                    sse_args += 1;
                    self.emit(
                        AsmOpcode::Movq,
                        [Value::phreg(*reg), Value::vreg(vreg), Value::None],
                    );
                }
                ParamLocation::Stack(offset) => {
                    self.emit(
                        AsmOpcode::Mov,
                        [
                            Value::indirect_physical(
                                PhysReg::Rsp,
                                *offset as i64,
                                OperandVariant::W64,
                            ),
                            Value::vreg(vreg),
                            Value::None,
                        ],
                    );
                }
            }
        }
        // Variadic arguments beyond the declared ones follow the same
        // classification; extra integers ride the remaining registers or
        // the stack, which `classify_parameters` already decided.
        if decl.vararg {
            self.emit(
                AsmOpcode::Mov,
                [
                    Value::phreg_variant(PhysReg::Rax, OperandVariant::W32),
                    Value::Int(sse_args as i64),
                    Value::None,
                ],
            );
        }

        if tail_call {
            self.emit(
                AsmOpcode::FunctionEpilogue,
                [Value::None, Value::None, Value::None],
            );
        }

        let target = match indirect_vreg {
            Some(vreg) => Value::vreg(vreg),
            None => Value::ExternalLabel {
                kind: crate::asmcmp::ExternalKind::Plt,
                name: self.ir.symbol(decl.name).to_string(),
                offset: 0,
                variant: OperandVariant::Default,
            },
        };
        let call_idx = if tail_call {
            self.emit(AsmOpcode::Jmp, [target, Value::None, Value::None])
        } else {
            self.emit(AsmOpcode::Call, [target, Value::None, Value::None])
        };
        if let Some(stash) = stash {
            self.ctx.stash_set_liveness(stash, call_idx)?;
        }

        if stack_bytes > 0 && !tail_call {
            self.emit(
                AsmOpcode::Add,
                [
                    Value::phreg(PhysReg::Rsp),
                    Value::Int(stack_bytes as i64),
                    Value::None,
                ],
            );
        }

        if !tail_call {
            let result_ty = self.ir.get_type(decl.result_type_id)?.clone();
            if !result_ty.is_empty() {
                let class = self.abi.classify_entry(&result_ty, 0)?;
                let dst = match class {
                    ParamClass::Sse => {
                        let dst = self.new_fp_vreg();
                        self.emit(
                            AsmOpcode::Movq,
                            [Value::vreg(dst), Value::phreg(PhysReg::Xmm0), Value::None],
                        );
                        dst
                    }
                    ParamClass::X87 => {
                        let out = self.new_x87_temp();
                        self.emit(
                            AsmOpcode::Fstp,
                            [
                                Value::Indirect {
                                    base: IndirectBase::LocalVar(out),
                                    offset: 0,
                                    variant: OperandVariant::W80,
                                    segment: None,
                                },
                                Value::None,
                                Value::None,
                            ],
                        );
                        self.local_ptr(out)
                    }
                    _ => {
                        let dst = self.new_gp_vreg();
                        self.emit(
                            AsmOpcode::Mov,
                            [Value::vreg(dst), Value::phreg(PhysReg::Rax), Value::None],
                        );
                        dst
                    }
                };
                self.set_vreg(instr, dst);
            }
            if let Some(stash) = stash {
                self.emit(
                    AsmOpcode::StashDeactivate,
                    [Value::Stash(stash), Value::None, Value::None],
                );
            }
        }
        Ok(())
    }

    fn emit_vararg_get(
        &mut self,
        instr: InstrRef,
        list_ptr: InstrRef,
        type_ref: TypeRef,
    ) -> Result<()> {
        let ty = self.ir.get_type(type_ref.type_id)?;
        let entry = *ty.at(type_ref.index)?;
        if entry.is_aggregate() {
            return Err(Error::NotSupported(
                "non-integer vararg aggregate members",
            ));
        }
        let class = self.abi.classify_entry(ty, type_ref.index)?;
        if class == ParamClass::X87 {
            return Err(Error::NotSupported("long double varargs"));
        }

        let list = self.vreg_of(list_ptr)?;
        let dst = self.new_gp_vreg();
        let reg_path = self.ctx.new_label();
        let done = self.ctx.new_label();

        let (offset_field, save_limit, step): (i64, i64, i64) = match class {
            ParamClass::Sse => (4, 48 + 8 * 16, 16),
            _ => (0, 48, 8),
        };

        // gp/fp offset below the limit: read from the register save area.
        self.emit(
            AsmOpcode::Cmp,
            [
                Value::indirect_virtual(list, offset_field, OperandVariant::W32),
                Value::Int(save_limit),
                Value::None,
            ],
        );
        self.emit(
            AsmOpcode::Jb,
            [Value::InternalLabel(reg_path), Value::None, Value::None],
        );

        // Overflow path.
        self.emit(
            AsmOpcode::Mov,
            [
                Value::phreg(PhysReg::Rax),
                Value::indirect_virtual(list, 8, OperandVariant::W64),
                Value::None,
            ],
        );
        self.emit(
            AsmOpcode::Mov,
            [
                Value::vreg(dst),
                Value::indirect_physical(PhysReg::Rax, 0, OperandVariant::W64),
                Value::None,
            ],
        );
        self.emit(
            AsmOpcode::Add,
            [
                Value::indirect_virtual(list, 8, OperandVariant::W64),
                Value::Int(8),
                Value::None,
            ],
        );
        self.emit(
            AsmOpcode::Jmp,
            [Value::InternalLabel(done), Value::None, Value::None],
        );

        // Register save area path.
        self.pending_labels.push(reg_path);
        self.emit(
            AsmOpcode::Mov,
            [
                Value::phreg(PhysReg::Rax),
                Value::indirect_virtual(list, 16, OperandVariant::W64),
                Value::None,
            ],
        );
        self.emit(
            AsmOpcode::Mov,
            [
                Value::phreg_variant(PhysReg::Rdx, OperandVariant::W32),
                Value::indirect_virtual(list, offset_field, OperandVariant::W32),
                Value::None,
            ],
        );
        self.emit(
            AsmOpcode::Add,
            [
                Value::phreg(PhysReg::Rax),
                Value::phreg(PhysReg::Rdx),
                Value::None,
            ],
        );
        self.emit(
            AsmOpcode::Mov,
            [
                Value::vreg(dst),
                Value::indirect_physical(PhysReg::Rax, 0, OperandVariant::W64),
                Value::None,
            ],
        );
        self.emit(
            AsmOpcode::Add,
            [
                Value::indirect_virtual(list, offset_field, OperandVariant::W32),
                Value::Int(step),
                Value::None,
            ],
        );
        self.pending_labels.push(done);
        self.emit(AsmOpcode::Noop, [Value::None, Value::None, Value::None]);
        self.set_vreg(instr, dst);
        Ok(())
    }

    fn emit_vararg_start(&mut self, list_ptr: InstrRef) -> Result<()> {
        self.frame.enable_vararg_save_area();
        let decl = self.ir.get_declaration(self.func.decl)?;
        let params_ty = self.ir.get_type(decl.params_type_id)?.clone();
        let locations = self.abi.classify_parameters(&params_ty)?;
        let named_gp = locations
            .iter()
            .filter(|l| matches!(l, ParamLocation::Register(_)))
            .count() as i64;
        let named_sse = locations
            .iter()
            .filter(|l| matches!(l, ParamLocation::SseRegister(_)))
            .count() as i64;

        let list = self.vreg_of(list_ptr)?;
        self.emit(
            AsmOpcode::Mov,
            [
                Value::indirect_virtual(list, 0, OperandVariant::W32),
                Value::Int(named_gp * 8),
                Value::None,
            ],
        );
        self.emit(
            AsmOpcode::Mov,
            [
                Value::indirect_virtual(list, 4, OperandVariant::W32),
                Value::Int(48 + named_sse * 16),
                Value::None,
            ],
        );
        // Overflow area: the caller's stack arguments start right above the
        // return address.
        self.emit(
            AsmOpcode::Lea,
            [
                Value::phreg(PhysReg::Rax),
                Value::indirect_physical(PhysReg::Rbp, 16, OperandVariant::Default),
                Value::None,
            ],
        );
        self.emit(
            AsmOpcode::Mov,
            [
                Value::indirect_virtual(list, 8, OperandVariant::W64),
                Value::phreg(PhysReg::Rax),
                Value::None,
            ],
        );
        self.emit(
            AsmOpcode::Lea,
            [
                Value::phreg(PhysReg::Rax),
                Value::Indirect {
                    base: IndirectBase::VarargSave(0),
                    offset: 0,
                    variant: OperandVariant::Default,
                    segment: None,
                },
                Value::None,
            ],
        );
        self.emit(
            AsmOpcode::Mov,
            [
                Value::indirect_virtual(list, 16, OperandVariant::W64),
                Value::phreg(PhysReg::Rax),
                Value::None,
            ],
        );
        Ok(())
    }

    // ---- driver ------------------------------------------------------

    fn emit_parameters(&mut self) -> Result<()> {
        let decl = self.ir.get_declaration(self.func.decl)?.clone();
        let params_ty = self.ir.get_type(decl.params_type_id)?.clone();
        let locations = self.abi.classify_parameters(&params_ty)?;
        for location in locations {
            let vreg = match location {
                ParamLocation::Register(reg) => {
                    let vreg = self.new_gp_vreg();
                    self.emit(
                        AsmOpcode::Mov,
                        [Value::vreg(vreg), Value::phreg(reg), Value::None],
                    );
                    vreg
                }
                ParamLocation::SseRegister(reg) => {
                    let vreg = self.new_fp_vreg();
                    self.emit(
                        AsmOpcode::Movq,
                        [Value::vreg(vreg), Value::phreg(reg), Value::None],
                    );
                    vreg
                }
                ParamLocation::Stack(offset) => {
                    let vreg = self.new_gp_vreg();
                    // Stack parameters sit above the saved base pointer and
                    // return address.
                    self.emit(
                        AsmOpcode::Mov,
                        [
                            Value::vreg(vreg),
                            Value::indirect_physical(
                                PhysReg::Rbp,
                                16 + offset as i64,
                                OperandVariant::W64,
                            ),
                            Value::None,
                        ],
                    );
                    vreg
                }
            };
            self.param_vregs.push(vreg);
        }
        if decl.vararg {
            self.frame.enable_vararg_save_area();
        }
        Ok(())
    }

    /// Generate the whole function body into the asmcmp context.
    pub fn run(&mut self) -> Result<()> {
        trace!("generating code for function {:?}", self.func.decl);
        self.pending_labels.push(self.begin_label);
        self.emit(
            AsmOpcode::FunctionPrologue,
            [Value::None, Value::None, Value::None],
        );
        self.emit_parameters()?;

        let entry = self
            .func
            .entry_block
            .expand()
            .ok_or(Error::InvalidState("function without an entry block"))?;
        let mut blocks: Vec<BlockId> = vec![entry];
        blocks.extend(self.func.block_ids().filter(|b| *b != entry));

        for block in blocks {
            if self.func.block(block)?.control_head().is_none() {
                continue;
            }
            let label = self.block_label(block);
            self.pending_labels.push(label);
            // Walk the whole instruction list in program order so that
            // every value is materialized inside its own block; a value
            // defined in a dominator must not be first emitted on one
            // branch and reused on another.
            let instrs: Vec<InstrRef> = self.func.block_instrs(block).collect();
            for instr in instrs {
                let data = self.func.instr(instr)?;
                if data.is_control_flow() {
                    match data.opcode() {
                        Opcode::VarargStart => {
                            let target = match data.op {
                                OperationData::Ref1 { arg, .. } => arg,
                                _ => return Err(Error::InvalidState("malformed vararg start")),
                            };
                            self.emit_vararg_start(target)?;
                        }
                        Opcode::VarargEnd | Opcode::VarargCopy => {}
                        _ => self.emit_control(block, instr)?,
                    }
                } else if !self.vregs.contains_key(&instr) {
                    self.emit_value(instr)?;
                }
            }
        }

        let end = self.emit(AsmOpcode::Noop, [Value::None, Value::None, Value::None]);
        let _ = self.ctx.bind_label(self.end_label, end);
        Ok(())
    }
}
