//! Optimizer instruction opcodes and operation data.
//!
//! An instruction couples an opcode with an opcode-dependent parameter
//! variant, in the same way the IR data-flow graph couples them in the
//! front-end. Every inter-instruction edge is an `InstrRef`; rewriting a
//! function never chases pointers, only ids.

use crate::ir::{BigIntId, TypeRef};
use crate::opt::code::{BlockId, CallRef, InlineAsmRef, InstrRef, PhiRef};
use cranelift_entity::packed_option::PackedOption;

/// Operand width of an integer operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OpWidth {
    W8,
    W16,
    W32,
    W64,
}

impl OpWidth {
    pub fn bits(self) -> u32 {
        match self {
            OpWidth::W8 => 8,
            OpWidth::W16 => 16,
            OpWidth::W32 => 32,
            OpWidth::W64 => 64,
        }
    }

    pub fn bytes(self) -> u32 {
        self.bits() / 8
    }
}

/// Floating-point flavor of a conversion or arithmetic operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FloatWidth {
    Single,
    Double,
    LongDouble,
}

/// Width variant used when testing a branch condition value.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CondVariant {
    W8,
    W16,
    W32,
    W64,
}

/// Comparison predicate.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CmpKind {
    Equal,
    NotEqual,
    /// Signed less-than.
    Lesser,
    LesserOrEqual,
    /// Signed greater-than.
    Greater,
    GreaterOrEqual,
    /// Unsigned below.
    Below,
    BelowOrEqual,
    /// Unsigned above.
    Above,
    AboveOrEqual,
    FloatEqual,
    FloatNotEqual,
    FloatLesser,
    FloatLesserOrEqual,
    FloatGreater,
    FloatGreaterOrEqual,
}

impl CmpKind {
    pub fn is_float(self) -> bool {
        matches!(
            self,
            CmpKind::FloatEqual
                | CmpKind::FloatNotEqual
                | CmpKind::FloatLesser
                | CmpKind::FloatLesserOrEqual
                | CmpKind::FloatGreater
                | CmpKind::FloatGreaterOrEqual
        )
    }
}

/// A full comparison descriptor: predicate plus operand width.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Comparison {
    pub kind: CmpKind,
    pub width: OpWidth,
}

/// Load extension behavior.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LoadExtension {
    NoExtend,
    SignExtend,
    ZeroExtend,
}

/// Memory access flags carried by loads and stores.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MemoryAccessFlags {
    pub extension: LoadExtension,
    pub volatile: bool,
}

impl MemoryAccessFlags {
    pub const fn plain() -> Self {
        Self {
            extension: LoadExtension::NoExtend,
            volatile: false,
        }
    }
}

/// Atomic memory ordering model.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AtomicModel {
    SeqCst,
}

/// An IEEE 32-bit immediate stored as bits so instructions stay `Eq`/`Hash`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ieee32(pub u32);

impl Ieee32 {
    pub fn with_float(v: f32) -> Self {
        Self(v.to_bits())
    }
    pub fn as_float(self) -> f32 {
        f32::from_bits(self.0)
    }
}

/// An IEEE 64-bit immediate stored as bits.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ieee64(pub u64);

impl Ieee64 {
    pub fn with_float(v: f64) -> Self {
        Self(v.to_bits())
    }
    pub fn as_float(self) -> f64 {
        f64::from_bits(self.0)
    }
}

/// Immediate payloads.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Immediate {
    Int(i64),
    Uint(u64),
    Float32(Ieee32),
    Float64(Ieee64),
    /// Long doubles are materialized from a 64-bit double image; the x87
    /// load widens it.
    LongDouble(Ieee64),
}

/// Instruction opcodes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    // Constants and placeholders.
    IntConst,
    UintConst,
    Float32Const,
    Float64Const,
    LongDoubleConst,
    BitintSignedConst,
    BitintUnsignedConst,
    /// Placeholder value materialized for debug references to code that was
    /// never cloned.
    IntPlaceholder,
    /// The address of a block's public label.
    BlockLabel,
    /// The i-th formal argument of the function.
    GetArgument,

    // Integer arithmetic; width applies to both operands and the result.
    IntAdd(OpWidth),
    IntSub(OpWidth),
    IntMul(OpWidth),
    IntDiv(OpWidth),
    IntMod(OpWidth),
    UintDiv(OpWidth),
    UintMod(OpWidth),
    IntAnd(OpWidth),
    IntOr(OpWidth),
    IntXor(OpWidth),
    IntShl(OpWidth),
    IntShr(OpWidth),
    IntSar(OpWidth),
    IntNeg(OpWidth),
    IntNot(OpWidth),
    IntToBool(OpWidth),
    BoolNot(OpWidth),
    BoolAnd(OpWidth),
    BoolOr(OpWidth),
    SignExtend(OpWidth),
    ZeroExtend(OpWidth),

    // Floating point.
    FloatAdd(FloatWidth),
    FloatSub(FloatWidth),
    FloatMul(FloatWidth),
    FloatDiv(FloatWidth),
    FloatNeg(FloatWidth),
    IntToFloat { signed: bool, to: FloatWidth },
    FloatToInt { signed: bool, from: FloatWidth },
    FloatConvert { from: FloatWidth, to: FloatWidth },
    /// Combine real and imaginary parts into a complex value.
    ComplexFrom(FloatWidth),

    // Comparison producing a boolean word.
    ScalarCompare,
    /// Conditional value selection.
    Select,

    // Bit field manipulation.
    BitsExtractSigned,
    BitsExtractUnsigned,
    BitsInsert,

    // Arbitrary-width integers (lowered before code generation).
    BitintGetSigned,
    BitintGetUnsigned,
    BitintFromSigned,
    BitintFromUnsigned,
    BitintCastSigned,
    BitintCastUnsigned,
    BitintToFloat { signed: bool, to: FloatWidth },
    BitintFromFloat { signed: bool, from: FloatWidth },
    BitintToBool,

    // Memory.
    IntLoad(OpWidth),
    IntStore(OpWidth),
    Float32Load,
    Float32Store,
    Float64Load,
    Float64Store,
    LongDoubleLoad,
    LongDoubleStore,
    CopyMemory,
    ZeroMemory,
    /// Allocate a local variable of a named type in the frame.
    AllocLocal,
    /// Allocate an anonymous temporary of a raw size and alignment.
    TemporaryObject,
    /// Runtime-sized stack allocation.
    StackAlloc,
    /// Value/effect pair; the value is the first operand.
    Pair,

    // Atomics.
    AtomicLoad(OpWidth),
    AtomicStore(OpWidth),

    // Checked arithmetic.
    OverflowAdd,
    OverflowSub,
    OverflowMul,

    // Varargs.
    VarargStart,
    VarargEnd,
    VarargCopy,
    VarargGet,

    // Control flow.
    Jump,
    IndirectJump,
    Branch,
    BranchCompare,
    Return,
    Invoke,
    InvokeVirtual,
    TailInvoke,
    TailInvokeVirtual,
    InlineAsm,

    // Phi join.
    Phi,
}

impl Opcode {
    /// Whether the opcode terminates a block.
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::Jump
                | Opcode::IndirectJump
                | Opcode::Branch
                | Opcode::BranchCompare
                | Opcode::Return
                | Opcode::TailInvoke
                | Opcode::TailInvokeVirtual
                | Opcode::InlineAsm
        )
    }

    /// Whether the opcode has observable side effects and therefore must be
    /// linked into the control list.
    pub fn has_side_effects(self) -> bool {
        matches!(
            self,
            Opcode::IntStore(_)
                | Opcode::Float32Store
                | Opcode::Float64Store
                | Opcode::LongDoubleStore
                | Opcode::CopyMemory
                | Opcode::ZeroMemory
                | Opcode::AllocLocal
                | Opcode::TemporaryObject
                | Opcode::StackAlloc
                | Opcode::AtomicLoad(_)
                | Opcode::AtomicStore(_)
                | Opcode::OverflowAdd
                | Opcode::OverflowSub
                | Opcode::OverflowMul
                | Opcode::VarargStart
                | Opcode::VarargEnd
                | Opcode::VarargCopy
                | Opcode::VarargGet
                | Opcode::Invoke
                | Opcode::InvokeVirtual
        ) || self.is_terminator()
    }
}

/// Opcode-dependent operation parameters.
///
/// The variants mirror the parameter classes of the front-end encoding:
/// every remappable id (instruction, block, phi, call, inline-asm) is
/// reachable through [`OperationData::map`].
#[derive(Clone, Debug, PartialEq)]
pub enum OperationData {
    None {
        opcode: Opcode,
    },
    Imm {
        opcode: Opcode,
        imm: Immediate,
    },
    BitintConst {
        opcode: Opcode,
        bigint: BigIntId,
    },
    /// The address of a block carrying a public label.
    BlockRef {
        opcode: Opcode,
        block: BlockId,
    },
    GetArgument {
        opcode: Opcode,
        index: usize,
    },
    Ref1 {
        opcode: Opcode,
        arg: InstrRef,
    },
    /// Single optional operand (e.g. `return`).
    OptRef1 {
        opcode: Opcode,
        arg: PackedOption<InstrRef>,
    },
    Ref2 {
        opcode: Opcode,
        args: [InstrRef; 2],
    },
    Ref3Cond {
        opcode: Opcode,
        args: [InstrRef; 3],
        condition_variant: CondVariant,
    },
    CompareRef2 {
        opcode: Opcode,
        comparison: Comparison,
        args: [InstrRef; 2],
    },
    Ref4Compare {
        opcode: Opcode,
        comparison: Comparison,
        args: [InstrRef; 4],
    },
    Jump {
        opcode: Opcode,
        target: BlockId,
    },
    Branch {
        opcode: Opcode,
        condition: InstrRef,
        condition_variant: CondVariant,
        target: BlockId,
        alternative: BlockId,
    },
    BranchCompare {
        opcode: Opcode,
        comparison: Comparison,
        args: [InstrRef; 2],
        target: BlockId,
        alternative: BlockId,
    },
    Call {
        opcode: Opcode,
        call: CallRef,
    },
    InlineAsm {
        opcode: Opcode,
        inline_asm: InlineAsmRef,
    },
    Load {
        opcode: Opcode,
        location: InstrRef,
        flags: MemoryAccessFlags,
    },
    Store {
        opcode: Opcode,
        location: InstrRef,
        value: InstrRef,
        flags: MemoryAccessFlags,
    },
    BitsExtract {
        opcode: Opcode,
        base: InstrRef,
        offset: u32,
        length: u32,
    },
    BitsInsert {
        opcode: Opcode,
        base: InstrRef,
        value: InstrRef,
        offset: u32,
        length: u32,
    },
    /// Typed memory operation: `copy_memory`, `zero_memory`, `vararg_get`.
    TypedMem {
        opcode: Opcode,
        target: InstrRef,
        source: PackedOption<InstrRef>,
        type_ref: TypeRef,
    },
    LocalAlloc {
        opcode: Opcode,
        type_ref: TypeRef,
    },
    TemporaryObject {
        opcode: Opcode,
        size: u64,
        align: u64,
    },
    StackAlloc {
        opcode: Opcode,
        size: InstrRef,
        alignment: InstrRef,
    },
    AtomicOp {
        opcode: Opcode,
        location: InstrRef,
        value: PackedOption<InstrRef>,
        model: AtomicModel,
    },
    OverflowArith {
        opcode: Opcode,
        args: [InstrRef; 3],
        type_ref: TypeRef,
        signedness: u8,
    },
    Phi {
        opcode: Opcode,
        phi: PhiRef,
    },
    Bitint {
        opcode: Opcode,
        arg: InstrRef,
        bitwidth: u32,
        src_bitwidth: u32,
    },
}

/// Entity remapper used when cloning operations between functions.
pub trait InstrRemapper {
    fn map_ref(&mut self, arg: InstrRef) -> crate::error::Result<InstrRef>;
    fn map_block(&mut self, block: BlockId) -> crate::error::Result<BlockId>;
}

impl OperationData {
    pub fn opcode(&self) -> Opcode {
        match *self {
            OperationData::None { opcode }
            | OperationData::Imm { opcode, .. }
            | OperationData::BitintConst { opcode, .. }
            | OperationData::BlockRef { opcode, .. }
            | OperationData::GetArgument { opcode, .. }
            | OperationData::Ref1 { opcode, .. }
            | OperationData::OptRef1 { opcode, .. }
            | OperationData::Ref2 { opcode, .. }
            | OperationData::Ref3Cond { opcode, .. }
            | OperationData::CompareRef2 { opcode, .. }
            | OperationData::Ref4Compare { opcode, .. }
            | OperationData::Jump { opcode, .. }
            | OperationData::Branch { opcode, .. }
            | OperationData::BranchCompare { opcode, .. }
            | OperationData::Call { opcode, .. }
            | OperationData::InlineAsm { opcode, .. }
            | OperationData::Load { opcode, .. }
            | OperationData::Store { opcode, .. }
            | OperationData::BitsExtract { opcode, .. }
            | OperationData::BitsInsert { opcode, .. }
            | OperationData::TypedMem { opcode, .. }
            | OperationData::LocalAlloc { opcode, .. }
            | OperationData::TemporaryObject { opcode, .. }
            | OperationData::StackAlloc { opcode, .. }
            | OperationData::AtomicOp { opcode, .. }
            | OperationData::OverflowArith { opcode, .. }
            | OperationData::Phi { opcode, .. }
            | OperationData::Bitint { opcode, .. } => opcode,
        }
    }

    /// Invoke `f` for every instruction operand of this operation.
    ///
    /// Call arguments and inline-asm parameters live in their side nodes and
    /// are visited by the container, not here.
    pub fn for_each_ref(&self, mut f: impl FnMut(InstrRef)) {
        match self {
            OperationData::None { .. }
            | OperationData::Imm { .. }
            | OperationData::BitintConst { .. }
            | OperationData::BlockRef { .. }
            | OperationData::GetArgument { .. }
            | OperationData::Jump { .. }
            | OperationData::LocalAlloc { .. }
            | OperationData::TemporaryObject { .. }
            | OperationData::Call { .. }
            | OperationData::InlineAsm { .. }
            | OperationData::Phi { .. } => {}
            OperationData::Ref1 { arg, .. } | OperationData::Bitint { arg, .. } => f(*arg),
            OperationData::OptRef1 { arg, .. } => {
                if let Some(arg) = arg.expand() {
                    f(arg);
                }
            }
            OperationData::Ref2 { args, .. } | OperationData::CompareRef2 { args, .. } => {
                args.iter().copied().for_each(&mut f)
            }
            OperationData::Ref3Cond { args, .. } | OperationData::OverflowArith { args, .. } => {
                args.iter().copied().for_each(&mut f)
            }
            OperationData::Ref4Compare { args, .. } => args.iter().copied().for_each(&mut f),
            OperationData::Branch { condition, .. } => f(*condition),
            OperationData::BranchCompare { args, .. } => args.iter().copied().for_each(&mut f),
            OperationData::Load { location, .. } => f(*location),
            OperationData::Store {
                location, value, ..
            } => {
                f(*location);
                f(*value);
            }
            OperationData::BitsExtract { base, .. } => f(*base),
            OperationData::BitsInsert { base, value, .. } => {
                f(*base);
                f(*value);
            }
            OperationData::TypedMem { target, source, .. } => {
                f(*target);
                if let Some(source) = source.expand() {
                    f(source);
                }
            }
            OperationData::StackAlloc {
                size, alignment, ..
            } => {
                f(*size);
                f(*alignment);
            }
            OperationData::AtomicOp {
                location, value, ..
            } => {
                f(*location);
                if let Some(value) = value.expand() {
                    f(value);
                }
            }
        }
    }

    /// Rewrite a single operand everywhere it appears.
    pub fn replace_ref(&mut self, from: InstrRef, to: InstrRef) {
        let subst = |r: &mut InstrRef| {
            if *r == from {
                *r = to;
            }
        };
        match self {
            OperationData::None { .. }
            | OperationData::Imm { .. }
            | OperationData::BitintConst { .. }
            | OperationData::BlockRef { .. }
            | OperationData::GetArgument { .. }
            | OperationData::Jump { .. }
            | OperationData::LocalAlloc { .. }
            | OperationData::TemporaryObject { .. }
            | OperationData::Call { .. }
            | OperationData::InlineAsm { .. }
            | OperationData::Phi { .. } => {}
            OperationData::Ref1 { arg, .. } | OperationData::Bitint { arg, .. } => subst(arg),
            OperationData::OptRef1 { arg, .. } => {
                if arg.expand() == Some(from) {
                    *arg = Some(to).into();
                }
            }
            OperationData::Ref2 { args, .. } | OperationData::CompareRef2 { args, .. } => {
                args.iter_mut().for_each(subst)
            }
            OperationData::Ref3Cond { args, .. } | OperationData::OverflowArith { args, .. } => {
                args.iter_mut().for_each(subst)
            }
            OperationData::Ref4Compare { args, .. } => args.iter_mut().for_each(subst),
            OperationData::Branch { condition, .. } => subst(condition),
            OperationData::BranchCompare { args, .. } => args.iter_mut().for_each(subst),
            OperationData::Load { location, .. } => subst(location),
            OperationData::Store {
                location, value, ..
            } => {
                subst(location);
                subst(value);
            }
            OperationData::BitsExtract { base, .. } => subst(base),
            OperationData::BitsInsert { base, value, .. } => {
                subst(base);
                subst(value);
            }
            OperationData::TypedMem { target, source, .. } => {
                subst(target);
                if source.expand() == Some(from) {
                    *source = Some(to).into();
                }
            }
            OperationData::StackAlloc {
                size, alignment, ..
            } => {
                subst(size);
                subst(alignment);
            }
            OperationData::AtomicOp {
                location, value, ..
            } => {
                subst(location);
                if value.expand() == Some(from) {
                    *value = Some(to).into();
                }
            }
        }
    }

    /// Clone the operation through an entity remapper.
    ///
    /// `Phi`, `Call` and `InlineAsm` side nodes are recreated by the caller;
    /// this method fails on them so misuse surfaces immediately.
    pub fn map<R: InstrRemapper>(&self, rm: &mut R) -> crate::error::Result<OperationData> {
        use crate::error::Error;
        let mapped = match self {
            OperationData::None { opcode } => OperationData::None { opcode: *opcode },
            OperationData::Imm { opcode, imm } => OperationData::Imm {
                opcode: *opcode,
                imm: *imm,
            },
            OperationData::BitintConst { opcode, bigint } => OperationData::BitintConst {
                opcode: *opcode,
                bigint: *bigint,
            },
            OperationData::BlockRef { opcode, block } => OperationData::BlockRef {
                opcode: *opcode,
                block: rm.map_block(*block)?,
            },
            OperationData::GetArgument { opcode, index } => OperationData::GetArgument {
                opcode: *opcode,
                index: *index,
            },
            OperationData::Ref1 { opcode, arg } => OperationData::Ref1 {
                opcode: *opcode,
                arg: rm.map_ref(*arg)?,
            },
            OperationData::OptRef1 { opcode, arg } => OperationData::OptRef1 {
                opcode: *opcode,
                arg: match arg.expand() {
                    Some(arg) => Some(rm.map_ref(arg)?).into(),
                    None => None.into(),
                },
            },
            OperationData::Ref2 { opcode, args } => OperationData::Ref2 {
                opcode: *opcode,
                args: [rm.map_ref(args[0])?, rm.map_ref(args[1])?],
            },
            OperationData::Ref3Cond {
                opcode,
                args,
                condition_variant,
            } => OperationData::Ref3Cond {
                opcode: *opcode,
                args: [
                    rm.map_ref(args[0])?,
                    rm.map_ref(args[1])?,
                    rm.map_ref(args[2])?,
                ],
                condition_variant: *condition_variant,
            },
            OperationData::CompareRef2 {
                opcode,
                comparison,
                args,
            } => OperationData::CompareRef2 {
                opcode: *opcode,
                comparison: *comparison,
                args: [rm.map_ref(args[0])?, rm.map_ref(args[1])?],
            },
            OperationData::Ref4Compare {
                opcode,
                comparison,
                args,
            } => OperationData::Ref4Compare {
                opcode: *opcode,
                comparison: *comparison,
                args: [
                    rm.map_ref(args[0])?,
                    rm.map_ref(args[1])?,
                    rm.map_ref(args[2])?,
                    rm.map_ref(args[3])?,
                ],
            },
            OperationData::Jump { opcode, target } => OperationData::Jump {
                opcode: *opcode,
                target: rm.map_block(*target)?,
            },
            OperationData::Branch {
                opcode,
                condition,
                condition_variant,
                target,
                alternative,
            } => OperationData::Branch {
                opcode: *opcode,
                condition: rm.map_ref(*condition)?,
                condition_variant: *condition_variant,
                target: rm.map_block(*target)?,
                alternative: rm.map_block(*alternative)?,
            },
            OperationData::BranchCompare {
                opcode,
                comparison,
                args,
                target,
                alternative,
            } => OperationData::BranchCompare {
                opcode: *opcode,
                comparison: *comparison,
                args: [rm.map_ref(args[0])?, rm.map_ref(args[1])?],
                target: rm.map_block(*target)?,
                alternative: rm.map_block(*alternative)?,
            },
            OperationData::Load {
                opcode,
                location,
                flags,
            } => OperationData::Load {
                opcode: *opcode,
                location: rm.map_ref(*location)?,
                flags: *flags,
            },
            OperationData::Store {
                opcode,
                location,
                value,
                flags,
            } => OperationData::Store {
                opcode: *opcode,
                location: rm.map_ref(*location)?,
                value: rm.map_ref(*value)?,
                flags: *flags,
            },
            OperationData::BitsExtract {
                opcode,
                base,
                offset,
                length,
            } => OperationData::BitsExtract {
                opcode: *opcode,
                base: rm.map_ref(*base)?,
                offset: *offset,
                length: *length,
            },
            OperationData::BitsInsert {
                opcode,
                base,
                value,
                offset,
                length,
            } => OperationData::BitsInsert {
                opcode: *opcode,
                base: rm.map_ref(*base)?,
                value: rm.map_ref(*value)?,
                offset: *offset,
                length: *length,
            },
            OperationData::TypedMem {
                opcode,
                target,
                source,
                type_ref,
            } => OperationData::TypedMem {
                opcode: *opcode,
                target: rm.map_ref(*target)?,
                source: match source.expand() {
                    Some(source) => Some(rm.map_ref(source)?).into(),
                    None => None.into(),
                },
                type_ref: *type_ref,
            },
            OperationData::LocalAlloc { opcode, type_ref } => OperationData::LocalAlloc {
                opcode: *opcode,
                type_ref: *type_ref,
            },
            OperationData::TemporaryObject {
                opcode,
                size,
                align,
            } => OperationData::TemporaryObject {
                opcode: *opcode,
                size: *size,
                align: *align,
            },
            OperationData::StackAlloc {
                opcode,
                size,
                alignment,
            } => OperationData::StackAlloc {
                opcode: *opcode,
                size: rm.map_ref(*size)?,
                alignment: rm.map_ref(*alignment)?,
            },
            OperationData::AtomicOp {
                opcode,
                location,
                value,
                model,
            } => OperationData::AtomicOp {
                opcode: *opcode,
                location: rm.map_ref(*location)?,
                value: match value.expand() {
                    Some(value) => Some(rm.map_ref(value)?).into(),
                    None => None.into(),
                },
                model: *model,
            },
            OperationData::OverflowArith {
                opcode,
                args,
                type_ref,
                signedness,
            } => OperationData::OverflowArith {
                opcode: *opcode,
                args: [
                    rm.map_ref(args[0])?,
                    rm.map_ref(args[1])?,
                    rm.map_ref(args[2])?,
                ],
                type_ref: *type_ref,
                signedness: *signedness,
            },
            OperationData::Bitint {
                opcode,
                arg,
                bitwidth,
                src_bitwidth,
            } => OperationData::Bitint {
                opcode: *opcode,
                arg: rm.map_ref(*arg)?,
                bitwidth: *bitwidth,
                src_bitwidth: *src_bitwidth,
            },
            OperationData::Phi { .. } | OperationData::Call { .. } | OperationData::InlineAsm { .. } => {
                return Err(Error::InvalidRequest(
                    "phi/call/inline-asm operations are cloned through their side nodes",
                ))
            }
        };
        Ok(mapped)
    }
}
