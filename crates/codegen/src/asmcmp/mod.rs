//! Pre-register-allocation assembly: the asmcmp virtual machine.
//!
//! An asmcmp program is an append-only doubly-linked instruction stream over
//! physical registers, virtual registers, spill indirections, labels and
//! stashes. Each opcode carries an operand class consumed by the
//! devirtualizer to enforce the target's operand-form constraints.

pub mod regs;

pub use self::regs::{PhysReg, Segment};

use crate::error::{Error, Result};
use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::{entity_impl, PrimaryMap};
use smallvec::SmallVec;

/// Index of an asmcmp instruction.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AsmInstrIdx(u32);
entity_impl!(AsmInstrIdx, "asminstr");

/// A label in the asmcmp stream.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelIdx(u32);
entity_impl!(LabelIdx, "label");

/// A virtual register.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VregIdx(u32);
entity_impl!(VregIdx, "vreg");

/// A register stash.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StashIdx(u32);
entity_impl!(StashIdx, "stash");

/// Operand width / encoding variant.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum OperandVariant {
    #[default]
    Default,
    W8,
    W16,
    W32,
    W64,
    W80,
    W128,
    FpSingle,
    FpDouble,
}

/// Base of an indirect operand.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum IndirectBase {
    Physical(PhysReg),
    Virtual(VregIdx),
    Label(LabelIdx),
    /// Offset into the function's local variable area.
    LocalVar(u64),
    /// Spill area slot (in qwords).
    Spill(usize),
    /// Offset into the temporary area of the frame.
    TemporaryArea(u64),
    /// Offset into the vararg register save area.
    VarargSave(u64),
}

/// Kind of an external label reference.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExternalKind {
    Absolute,
    Plt,
    GotPcRel,
}

/// An instruction operand.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    #[default]
    None,
    PhysReg(PhysReg, OperandVariant),
    VirtualReg {
        vreg: VregIdx,
        variant: OperandVariant,
    },
    Int(i64),
    Uint(u64),
    Indirect {
        base: IndirectBase,
        offset: i64,
        variant: OperandVariant,
        segment: Option<Segment>,
    },
    RipIndirect {
        kind: ExternalKind,
        name: String,
        variant: OperandVariant,
    },
    ExternalLabel {
        kind: ExternalKind,
        name: String,
        offset: i64,
        variant: OperandVariant,
    },
    /// x87 stack slot.
    X87(usize),
    InternalLabel(LabelIdx),
    Stash(StashIdx),
}

impl Value {
    pub fn phreg(reg: PhysReg) -> Self {
        Value::PhysReg(reg, OperandVariant::Default)
    }

    pub fn phreg_variant(reg: PhysReg, variant: OperandVariant) -> Self {
        Value::PhysReg(reg, variant)
    }

    pub fn vreg(vreg: VregIdx) -> Self {
        Value::VirtualReg {
            vreg,
            variant: OperandVariant::Default,
        }
    }

    pub fn vreg_variant(vreg: VregIdx, variant: OperandVariant) -> Self {
        Value::VirtualReg { vreg, variant }
    }

    pub fn indirect_physical(base: PhysReg, offset: i64, variant: OperandVariant) -> Self {
        Value::Indirect {
            base: IndirectBase::Physical(base),
            offset,
            variant,
            segment: None,
        }
    }

    pub fn indirect_virtual(base: VregIdx, offset: i64, variant: OperandVariant) -> Self {
        Value::Indirect {
            base: IndirectBase::Virtual(base),
            offset,
            variant,
            segment: None,
        }
    }

    pub fn indirect_spill(slot: usize, offset: i64, variant: OperandVariant) -> Self {
        Value::Indirect {
            base: IndirectBase::Spill(slot),
            offset,
            variant,
            segment: None,
        }
    }

    pub fn is_indirect(&self) -> bool {
        matches!(self, Value::Indirect { .. })
    }
}

/// Operand class of an opcode, driving devirtualization.
///
/// Names follow the target's operand-form notation: destination first,
/// underscore-separated.
#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArgClass {
    /// No operands.
    None,
    /// Pseudo-opcode; skipped by generic devirtualization.
    Virtual,
    /// Single label operand.
    Jump,
    /// Single read operand that may be register or memory.
    MemR,
    /// Single register operand, read / written.
    RegR,
    RegW,
    /// Single register-or-memory operand.
    RegMemR,
    RegMemW,
    RegMemRW,
    /// Two operands, second always read.
    RegMemW_RegMemR,
    RegMemRW_RegMemR,
    RegW_RegMemR,
    RegRW_RegMemR,
    RegW_Mem,
    RegMemRW_RegR,
    RegMemR_RegR,
    /// SSE destination variants.
    XmmdW_RegMemR,
    XmmqW_RegMemR,
    XmmRW_XmmMemR,
    /// x87 memory operand.
    X87MemR,
    X87MemW,
}

macro_rules! amd64_opcodes {
    ($mac:ident) => {
        $mac! {
            (Mov, mov, "mov", 2, RegMemW_RegMemR),
            (Movabs, movabs, "movabs", 2, RegW_RegMemR),
            (Movsx, movsx, "movsx", 2, RegW_RegMemR),
            (Movsxd, movsxd, "movsxd", 2, RegW_RegMemR),
            (Movzx, movzx, "movzx", 2, RegW_RegMemR),
            (Cmovne, cmovne, "cmovne", 2, RegRW_RegMemR),
            (Lea, lea, "lea", 2, RegW_Mem),
            (Add, add, "add", 2, RegMemRW_RegMemR),
            (Sub, sub, "sub", 2, RegMemRW_RegMemR),
            (Imul, imul, "imul", 2, RegRW_RegMemR),
            (Idiv, idiv, "idiv", 1, RegMemR),
            (Div, div, "div", 1, RegMemR),
            (And, and, "and", 2, RegMemRW_RegMemR),
            (Or, or, "or", 2, RegMemRW_RegMemR),
            (Xor, xor, "xor", 2, RegMemRW_RegMemR),
            (Shl, shl, "shl", 2, RegMemRW_RegR),
            (Shr, shr, "shr", 2, RegMemRW_RegR),
            (Sar, sar, "sar", 2, RegMemRW_RegR),
            (Neg, neg, "neg", 1, RegMemRW),
            (Not, not, "not", 1, RegMemRW),
            (Cmp, cmp, "cmp", 2, RegMemR_RegR),
            (Test, test, "test", 2, RegMemR_RegR),
            (Cqo, cqo, "cqo", 0, None),
            (Cdq, cdq, "cdq", 0, None),
            (Sete, sete, "sete", 1, RegMemW),
            (Setne, setne, "setne", 1, RegMemW),
            (Setg, setg, "setg", 1, RegMemW),
            (Setge, setge, "setge", 1, RegMemW),
            (Setl, setl, "setl", 1, RegMemW),
            (Setle, setle, "setle", 1, RegMemW),
            (Seta, seta, "seta", 1, RegMemW),
            (Setae, setae, "setae", 1, RegMemW),
            (Setb, setb, "setb", 1, RegMemW),
            (Setbe, setbe, "setbe", 1, RegMemW),
            (Setp, setp, "setp", 1, RegMemW),
            (Setnp, setnp, "setnp", 1, RegMemW),
            (Seto, seto, "seto", 1, RegMemW),
            (Jmp, jmp, "jmp", 1, Jump),
            (Je, je, "je", 1, Jump),
            (Jne, jne, "jne", 1, Jump),
            (Jg, jg, "jg", 1, Jump),
            (Jge, jge, "jge", 1, Jump),
            (Jl, jl, "jl", 1, Jump),
            (Jle, jle, "jle", 1, Jump),
            (Ja, ja, "ja", 1, Jump),
            (Jae, jae, "jae", 1, Jump),
            (Jb, jb, "jb", 1, Jump),
            (Jbe, jbe, "jbe", 1, Jump),
            (Jp, jp, "jp", 1, Jump),
            (Jnp, jnp, "jnp", 1, Jump),
            (Call, call, "call", 1, MemR),
            (Ret, ret, "ret", 0, None),
            (Push, push, "push", 1, MemR),
            (Pop, pop, "pop", 1, RegMemW),
            (Movd, movd, "movd", 2, XmmdW_RegMemR),
            (Movq, movq, "movq", 2, XmmqW_RegMemR),
            (Movdqu, movdqu, "movdqu", 2, RegMemW_RegMemR),
            (Movss, movss, "movss", 2, XmmdW_RegMemR),
            (Movsd, movsd, "movsd", 2, XmmqW_RegMemR),
            (Addss, addss, "addss", 2, XmmRW_XmmMemR),
            (Addsd, addsd, "addsd", 2, XmmRW_XmmMemR),
            (Subss, subss, "subss", 2, XmmRW_XmmMemR),
            (Subsd, subsd, "subsd", 2, XmmRW_XmmMemR),
            (Mulss, mulss, "mulss", 2, XmmRW_XmmMemR),
            (Mulsd, mulsd, "mulsd", 2, XmmRW_XmmMemR),
            (Divss, divss, "divss", 2, XmmRW_XmmMemR),
            (Divsd, divsd, "divsd", 2, XmmRW_XmmMemR),
            (Xorps, xorps, "xorps", 2, XmmRW_XmmMemR),
            (Xorpd, xorpd, "xorpd", 2, XmmRW_XmmMemR),
            (Ucomiss, ucomiss, "ucomiss", 2, XmmRW_XmmMemR),
            (Ucomisd, ucomisd, "ucomisd", 2, XmmRW_XmmMemR),
            (Cvtsi2ss, cvtsi2ss, "cvtsi2ss", 2, XmmdW_RegMemR),
            (Cvtsi2sd, cvtsi2sd, "cvtsi2sd", 2, XmmqW_RegMemR),
            (Cvttss2si, cvttss2si, "cvttss2si", 2, RegW_RegMemR),
            (Cvttsd2si, cvttsd2si, "cvttsd2si", 2, RegW_RegMemR),
            (Cvtss2sd, cvtss2sd, "cvtss2sd", 2, XmmqW_RegMemR),
            (Cvtsd2ss, cvtsd2ss, "cvtsd2ss", 2, XmmdW_RegMemR),
            (Fld, fld, "fld", 1, X87MemR),
            (Fild, fild, "fild", 1, X87MemR),
            (Fstp, fstp, "fstp", 1, X87MemW),
            (Fistp, fistp, "fistp", 1, X87MemW),
            (Faddp, faddp, "faddp", 0, None),
            (Fsubp, fsubp, "fsubp", 0, None),
            (Fmulp, fmulp, "fmulp", 0, None),
            (Fdivp, fdivp, "fdivp", 0, None),
            (Fchs, fchs, "fchs", 0, None),
            (Mfence, mfence, "mfence", 0, None),
            (RepMovsb, rep_movsb, "rep movsb", 0, None),
            (RepStosb, rep_stosb, "rep stosb", 0, None),
        }
    };
}

macro_rules! define_opcode_enum {
    ($(($name:ident, $fn:ident, $mnemonic:literal, $arity:literal, $class:ident)),* $(,)?) => {
        /// Asmcmp opcodes: real AMD64 mnemonics plus pseudo-opcodes consumed
        /// before emission.
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        pub enum AsmOpcode {
            $($name,)*
            VirtualRegisterLink,
            TouchVirtualRegister,
            StashActivate,
            StashDeactivate,
            FunctionPrologue,
            FunctionEpilogue,
            Noop,
            DataWord,
            /// Raw user template; the operand is the module inline-asm id.
            InlineAssembly,
        }

        impl AsmOpcode {
            /// Operand class for devirtualization.
            pub fn arg_class(self) -> ArgClass {
                match self {
                    $(AsmOpcode::$name => ArgClass::$class,)*
                    AsmOpcode::VirtualRegisterLink => ArgClass::RegMemW_RegMemR,
                    AsmOpcode::TouchVirtualRegister
                    | AsmOpcode::StashActivate
                    | AsmOpcode::StashDeactivate
                    | AsmOpcode::FunctionPrologue
                    | AsmOpcode::FunctionEpilogue
                    | AsmOpcode::Noop
                    | AsmOpcode::DataWord
                    | AsmOpcode::InlineAssembly => ArgClass::Virtual,
                }
            }

            /// Assembler mnemonic for real opcodes.
            pub fn mnemonic(self) -> Option<&'static str> {
                match self {
                    $(AsmOpcode::$name => Some($mnemonic),)*
                    _ => Option::None,
                }
            }
        }
    };
}

amd64_opcodes!(define_opcode_enum);

/// One asmcmp instruction.
#[derive(Clone, Debug)]
pub struct AsmInstr {
    pub opcode: AsmOpcode,
    pub args: [Value; 3],
    prev: PackedOption<AsmInstrIdx>,
    next: PackedOption<AsmInstrIdx>,
    labels: SmallVec<[LabelIdx; 2]>,
}

impl AsmInstr {
    pub fn labels(&self) -> &[LabelIdx] {
        &self.labels
    }
}

/// Virtual register kinds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VregKind {
    GeneralPurpose,
    FloatingPoint,
    /// Directly addressed spill storage of `qwords` length.
    SpillSpace { qwords: u32, alignment: u32 },
    /// No allocation needed; resolves to `[base + offset]`.
    MemoryPointer { base: PhysReg, offset: i64 },
    /// Two independently allocated halves (e.g. a complex value).
    Pair {
        variant: PairVariant,
        lo: VregIdx,
        hi: VregIdx,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PairVariant {
    FloatSingle,
    FloatDouble,
}

/// A register stash: saves a register set across a code range.
#[derive(Clone, Debug)]
pub struct Stash {
    regs: Vec<PhysReg>,
    liveness: PackedOption<AsmInstrIdx>,
    vreg: VregIdx,
}

/// Per-function asmcmp program and context.
pub struct AsmContext {
    instrs: PrimaryMap<AsmInstrIdx, AsmInstr>,
    head: PackedOption<AsmInstrIdx>,
    tail: PackedOption<AsmInstrIdx>,
    labels: PrimaryMap<LabelIdx, LabelData>,
    vregs: PrimaryMap<VregIdx, VregKind>,
    stashes: PrimaryMap<StashIdx, Stash>,
}

#[derive(Clone, Debug, Default)]
struct LabelData {
    bound: PackedOption<AsmInstrIdx>,
    /// Symbolic name for externally visible labels.
    name: Option<String>,
}

impl AsmContext {
    pub fn new() -> Self {
        Self {
            instrs: PrimaryMap::new(),
            head: None.into(),
            tail: None.into(),
            labels: PrimaryMap::new(),
            vregs: PrimaryMap::new(),
            stashes: PrimaryMap::new(),
        }
    }

    // ---- instruction stream ------------------------------------------

    /// Insert a new instruction after `after` (`None` inserts at the head).
    pub fn new_instr(
        &mut self,
        after: Option<AsmInstrIdx>,
        opcode: AsmOpcode,
        args: [Value; 3],
    ) -> AsmInstrIdx {
        let next = match after {
            Some(after) => self.instrs[after].next,
            None => self.head,
        };
        let idx = self.instrs.push(AsmInstr {
            opcode,
            args,
            prev: after.into(),
            next,
            labels: SmallVec::new(),
        });
        match after {
            Some(after) => self.instrs[after].next = Some(idx).into(),
            None => self.head = Some(idx).into(),
        }
        match next.expand() {
            Some(next) => self.instrs[next].prev = Some(idx).into(),
            None => self.tail = Some(idx).into(),
        }
        idx
    }

    /// Append at the stream tail.
    pub fn append_instr(&mut self, opcode: AsmOpcode, args: [Value; 3]) -> AsmInstrIdx {
        let tail = self.tail.expand();
        self.new_instr(tail, opcode, args)
    }

    pub fn instr(&self, idx: AsmInstrIdx) -> Result<&AsmInstr> {
        self.instrs
            .get(idx)
            .ok_or(Error::NotFound("unknown asmcmp instruction index"))
    }

    pub fn instr_mut(&mut self, idx: AsmInstrIdx) -> Result<&mut AsmInstr> {
        self.instrs
            .get_mut(idx)
            .ok_or(Error::NotFound("unknown asmcmp instruction index"))
    }

    pub fn replace_instr(&mut self, idx: AsmInstrIdx, opcode: AsmOpcode, args: [Value; 3]) -> Result<()> {
        let instr = self.instr_mut(idx)?;
        instr.opcode = opcode;
        instr.args = args;
        Ok(())
    }

    pub fn instr_head(&self) -> Option<AsmInstrIdx> {
        self.head.expand()
    }

    pub fn instr_tail(&self) -> Option<AsmInstrIdx> {
        self.tail.expand()
    }

    pub fn instr_next(&self, idx: AsmInstrIdx) -> Option<AsmInstrIdx> {
        self.instrs[idx].next.expand()
    }

    pub fn instr_prev(&self, idx: AsmInstrIdx) -> Option<AsmInstrIdx> {
        self.instrs[idx].prev.expand()
    }

    /// Iterate the instruction stream in program order.
    pub fn instr_iter(&self) -> impl Iterator<Item = AsmInstrIdx> + '_ {
        let mut cursor = self.head.expand();
        core::iter::from_fn(move || {
            let idx = cursor?;
            cursor = self.instrs[idx].next.expand();
            Some(idx)
        })
    }

    pub fn instr_count(&self) -> usize {
        self.instrs.len()
    }

    // ---- labels ------------------------------------------------------

    pub fn new_label(&mut self) -> LabelIdx {
        self.labels.push(LabelData::default())
    }

    pub fn new_external_label(&mut self, name: &str) -> LabelIdx {
        self.labels.push(LabelData {
            bound: None.into(),
            name: Some(name.to_string()),
        })
    }

    /// Bind a label to an instruction; pending references resolve through
    /// the binding.
    pub fn bind_label(&mut self, label: LabelIdx, instr: AsmInstrIdx) -> Result<()> {
        let data = self
            .labels
            .get_mut(label)
            .ok_or(Error::NotFound("unknown label index"))?;
        if data.bound.is_some() {
            return Err(Error::InvalidRequest("label is already bound"));
        }
        data.bound = Some(instr).into();
        self.instrs[instr].labels.push(label);
        Ok(())
    }

    pub fn label_binding(&self, label: LabelIdx) -> Result<Option<AsmInstrIdx>> {
        Ok(self
            .labels
            .get(label)
            .ok_or(Error::NotFound("unknown label index"))?
            .bound
            .expand())
    }

    pub fn label_name(&self, label: LabelIdx) -> Option<&str> {
        self.labels.get(label).and_then(|l| l.name.as_deref())
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// Move all labels bound to `from` onto `to`. Used when an instruction
    /// sequence is prepended in front of a labeled instruction.
    pub fn move_labels(&mut self, to: AsmInstrIdx, from: AsmInstrIdx) -> Result<()> {
        if to == from {
            return Ok(());
        }
        let moved: SmallVec<[LabelIdx; 2]> = core::mem::take(&mut self.instrs[from].labels);
        for label in moved {
            self.labels[label].bound = Some(to).into();
            self.instrs[to].labels.push(label);
        }
        Ok(())
    }

    // ---- virtual registers -------------------------------------------

    pub fn new_virtual_register(&mut self, kind: VregKind) -> VregIdx {
        self.vregs.push(kind)
    }

    pub fn new_spill_space(&mut self, qwords: u32, alignment: u32) -> VregIdx {
        self.vregs.push(VregKind::SpillSpace { qwords, alignment })
    }

    pub fn new_memory_pointer(&mut self, base: PhysReg, offset: i64) -> VregIdx {
        self.vregs.push(VregKind::MemoryPointer { base, offset })
    }

    pub fn new_pair(&mut self, variant: PairVariant) -> (VregIdx, VregIdx, VregIdx) {
        let lo = self.vregs.push(VregKind::FloatingPoint);
        let hi = self.vregs.push(VregKind::FloatingPoint);
        let pair = self.vregs.push(VregKind::Pair { variant, lo, hi });
        (pair, lo, hi)
    }

    pub fn vreg(&self, vreg: VregIdx) -> Result<&VregKind> {
        self.vregs
            .get(vreg)
            .ok_or(Error::NotFound("unknown virtual register index"))
    }

    pub fn vreg_count(&self) -> usize {
        self.vregs.len()
    }

    pub fn vreg_iter(&self) -> impl Iterator<Item = VregIdx> {
        self.vregs.keys()
    }

    // ---- stashes -----------------------------------------------------

    /// Create a stash saving `regs` across a range; the backing storage is a
    /// spill-space vreg sized for the worst case.
    pub fn new_stash(&mut self, regs: Vec<PhysReg>, liveness: Option<AsmInstrIdx>) -> StashIdx {
        let qwords: u32 = regs
            .iter()
            .map(|r| if r.is_floating_point() { 2 } else { 1 })
            .sum();
        let alignment = if regs.iter().any(|r| r.is_floating_point()) {
            2
        } else {
            1
        };
        let vreg = self.new_spill_space(qwords.max(1), alignment);
        self.stashes.push(Stash {
            regs,
            liveness: liveness.into(),
            vreg,
        })
    }

    pub fn stash_vreg(&self, stash: StashIdx) -> Result<VregIdx> {
        Ok(self
            .stashes
            .get(stash)
            .ok_or(Error::NotFound("unknown stash index"))?
            .vreg)
    }

    pub fn stash_liveness(&self, stash: StashIdx) -> Result<Option<AsmInstrIdx>> {
        Ok(self
            .stashes
            .get(stash)
            .ok_or(Error::NotFound("unknown stash index"))?
            .liveness
            .expand())
    }

    pub fn stash_set_liveness(&mut self, stash: StashIdx, instr: AsmInstrIdx) -> Result<()> {
        self.stashes
            .get_mut(stash)
            .ok_or(Error::NotFound("unknown stash index"))?
            .liveness = Some(instr).into();
        Ok(())
    }

    pub fn stash_has(&self, stash: StashIdx, reg: PhysReg) -> Result<bool> {
        Ok(self
            .stashes
            .get(stash)
            .ok_or(Error::NotFound("unknown stash index"))?
            .regs
            .contains(&reg))
    }
}

impl Default for AsmContext {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! define_builders {
    ($(($name:ident, $fn:ident, $mnemonic:literal, $arity:tt, $class:ident)),* $(,)?) => {
        impl AsmContext {
            $(define_builders!(@one $name, $fn, $arity);)*
        }
    };
    (@one $name:ident, $fn:ident, 0) => {
        pub fn $fn(&mut self, after: Option<AsmInstrIdx>) -> AsmInstrIdx {
            self.new_instr(after, AsmOpcode::$name, [Value::None, Value::None, Value::None])
        }
    };
    (@one $name:ident, $fn:ident, 1) => {
        pub fn $fn(&mut self, after: Option<AsmInstrIdx>, arg: Value) -> AsmInstrIdx {
            self.new_instr(after, AsmOpcode::$name, [arg, Value::None, Value::None])
        }
    };
    (@one $name:ident, $fn:ident, 2) => {
        pub fn $fn(&mut self, after: Option<AsmInstrIdx>, a: Value, b: Value) -> AsmInstrIdx {
            self.new_instr(after, AsmOpcode::$name, [a, b, Value::None])
        }
    };
}

amd64_opcodes!(define_builders);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_insertion_order() {
        let mut ctx = AsmContext::new();
        let a = ctx.append_instr(AsmOpcode::Noop, Default::default());
        let c = ctx.append_instr(AsmOpcode::Ret, Default::default());
        let b = ctx.new_instr(
            Some(a),
            AsmOpcode::Mov,
            [
                Value::phreg(PhysReg::Rax),
                Value::Int(42),
                Value::None,
            ],
        );
        let order: Vec<_> = ctx.instr_iter().collect();
        assert_eq!(order, vec![a, b, c]);
        assert_eq!(ctx.instr_prev(c), Some(b));
    }

    #[test]
    fn labels_bind_and_move() {
        let mut ctx = AsmContext::new();
        let first = ctx.append_instr(AsmOpcode::Noop, Default::default());
        let label = ctx.new_label();
        ctx.bind_label(label, first).unwrap();
        assert_eq!(ctx.label_binding(label).unwrap(), Some(first));

        let prepended = ctx.new_instr(None, AsmOpcode::Noop, Default::default());
        ctx.move_labels(prepended, first).unwrap();
        assert_eq!(ctx.label_binding(label).unwrap(), Some(prepended));
        assert!(ctx.instr(first).unwrap().labels().is_empty());
    }

    #[test]
    fn stash_backing_space_is_worst_case() {
        let mut ctx = AsmContext::new();
        let stash = ctx.new_stash(vec![PhysReg::Rax, PhysReg::Xmm0], None);
        let vreg = ctx.stash_vreg(stash).unwrap();
        match ctx.vreg(vreg).unwrap() {
            VregKind::SpillSpace { qwords, alignment } => {
                assert_eq!(*qwords, 3);
                assert_eq!(*alignment, 2);
            }
            other => panic!("unexpected stash backing: {other:?}"),
        }
    }
}
