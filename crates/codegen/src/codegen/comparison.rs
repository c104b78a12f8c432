//! Scalar comparison emitters.
//!
//! One table maps `(predicate, operand width)` to the instruction sequence
//! realizing it: integer comparisons are `cmp` + `setcc`, SSE comparisons
//! are `ucomiss`/`ucomisd` + `setcc` with a parity fixup for (in)equality,
//! since unordered operands raise PF. Branch forms reuse the same table to
//! pick the jump mnemonic.

use crate::asmcmp::{AsmContext, AsmInstrIdx, AsmOpcode, OperandVariant, Value, VregIdx};
use crate::error::{Error, Result};
use crate::opt::ops::{CmpKind, Comparison, OpWidth};

/// Parity behavior of an SSE comparison.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ParityFix {
    None,
    /// Result is valid only when PF=0 (`and` with `setnp`).
    AndNotParity,
    /// Result must also be set when PF=1 (`or` with `setp`).
    OrParity,
}

/// One emitter table row.
struct CompareEmitter {
    set: AsmOpcode,
    jump: AsmOpcode,
    parity: ParityFix,
    /// Swap operands before comparing (SSE has no `below` forms over
    /// unordered inputs that we use directly).
    commute: bool,
}

fn emitter_for(kind: CmpKind) -> CompareEmitter {
    use AsmOpcode::*;
    match kind {
        CmpKind::Equal => CompareEmitter {
            set: Sete,
            jump: Je,
            parity: ParityFix::None,
            commute: false,
        },
        CmpKind::NotEqual => CompareEmitter {
            set: Setne,
            jump: Jne,
            parity: ParityFix::None,
            commute: false,
        },
        CmpKind::Greater => CompareEmitter {
            set: Setg,
            jump: Jg,
            parity: ParityFix::None,
            commute: false,
        },
        CmpKind::GreaterOrEqual => CompareEmitter {
            set: Setge,
            jump: Jge,
            parity: ParityFix::None,
            commute: false,
        },
        CmpKind::Lesser => CompareEmitter {
            set: Setl,
            jump: Jl,
            parity: ParityFix::None,
            commute: false,
        },
        CmpKind::LesserOrEqual => CompareEmitter {
            set: Setle,
            jump: Jle,
            parity: ParityFix::None,
            commute: false,
        },
        CmpKind::Above => CompareEmitter {
            set: Seta,
            jump: Ja,
            parity: ParityFix::None,
            commute: false,
        },
        CmpKind::AboveOrEqual => CompareEmitter {
            set: Setae,
            jump: Jae,
            parity: ParityFix::None,
            commute: false,
        },
        CmpKind::Below => CompareEmitter {
            set: Setb,
            jump: Jb,
            parity: ParityFix::None,
            commute: false,
        },
        CmpKind::BelowOrEqual => CompareEmitter {
            set: Setbe,
            jump: Jbe,
            parity: ParityFix::None,
            commute: false,
        },
        CmpKind::FloatEqual => CompareEmitter {
            set: Sete,
            jump: Je,
            parity: ParityFix::AndNotParity,
            commute: false,
        },
        CmpKind::FloatNotEqual => CompareEmitter {
            set: Setne,
            jump: Jne,
            parity: ParityFix::OrParity,
            commute: false,
        },
        CmpKind::FloatGreater => CompareEmitter {
            set: Seta,
            jump: Ja,
            parity: ParityFix::None,
            commute: false,
        },
        CmpKind::FloatGreaterOrEqual => CompareEmitter {
            set: Setae,
            jump: Jae,
            parity: ParityFix::None,
            commute: false,
        },
        CmpKind::FloatLesser => CompareEmitter {
            set: Seta,
            jump: Ja,
            parity: ParityFix::None,
            commute: true,
        },
        CmpKind::FloatLesserOrEqual => CompareEmitter {
            set: Setae,
            jump: Jae,
            parity: ParityFix::None,
            commute: true,
        },
    }
}

fn width_variant(width: OpWidth) -> OperandVariant {
    match width {
        OpWidth::W8 => OperandVariant::W8,
        OpWidth::W16 => OperandVariant::W16,
        OpWidth::W32 => OperandVariant::W32,
        OpWidth::W64 => OperandVariant::W64,
    }
}

/// Emit a value-producing comparison into `dst`, appending after `anchor`.
/// Returns the last emitted instruction index.
pub fn emit_scalar_compare(
    ctx: &mut AsmContext,
    anchor: AsmInstrIdx,
    comparison: Comparison,
    dst: VregIdx,
    lhs: Value,
    rhs: Value,
    is_float: bool,
) -> Result<AsmInstrIdx> {
    let emitter = emitter_for(comparison.kind);
    if comparison.kind.is_float() != is_float {
        return Err(Error::InvalidParameter(
            "comparison operand bank mismatch",
        ));
    }
    let (lhs, rhs) = if emitter.commute { (rhs, lhs) } else { (lhs, rhs) };

    let mut tail = if is_float {
        let compare = match comparison.width {
            OpWidth::W32 => AsmOpcode::Ucomiss,
            _ => AsmOpcode::Ucomisd,
        };
        ctx.new_instr(Some(anchor), compare, [lhs, rhs, Value::None])
    } else {
        ctx.new_instr(
            Some(anchor),
            AsmOpcode::Cmp,
            [
                with_variant(lhs, width_variant(comparison.width)),
                with_variant(rhs, width_variant(comparison.width)),
                Value::None,
            ],
        )
    };

    // Zero the destination without disturbing the flags, then set the low
    // byte from the condition.
    tail = ctx.mov(
        Some(tail),
        Value::vreg_variant(dst, OperandVariant::W32),
        Value::Int(0),
    );
    tail = ctx.new_instr(
        Some(tail),
        emitter.set,
        [
            Value::vreg_variant(dst, OperandVariant::W8),
            Value::None,
            Value::None,
        ],
    );

    match emitter.parity {
        ParityFix::None => {}
        ParityFix::AndNotParity => {
            // setnp into a second byte and combine.
            let parity = ctx.new_virtual_register(crate::asmcmp::VregKind::GeneralPurpose);
            tail = ctx.mov(
                Some(tail),
                Value::vreg_variant(parity, OperandVariant::W32),
                Value::Int(0),
            );
            tail = ctx.new_instr(
                Some(tail),
                AsmOpcode::Setnp,
                [
                    Value::vreg_variant(parity, OperandVariant::W8),
                    Value::None,
                    Value::None,
                ],
            );
            tail = ctx.and(
                Some(tail),
                Value::vreg_variant(dst, OperandVariant::W8),
                Value::vreg_variant(parity, OperandVariant::W8),
            );
        }
        ParityFix::OrParity => {
            let parity = ctx.new_virtual_register(crate::asmcmp::VregKind::GeneralPurpose);
            tail = ctx.mov(
                Some(tail),
                Value::vreg_variant(parity, OperandVariant::W32),
                Value::Int(0),
            );
            tail = ctx.new_instr(
                Some(tail),
                AsmOpcode::Setp,
                [
                    Value::vreg_variant(parity, OperandVariant::W8),
                    Value::None,
                    Value::None,
                ],
            );
            tail = ctx.or(
                Some(tail),
                Value::vreg_variant(dst, OperandVariant::W8),
                Value::vreg_variant(parity, OperandVariant::W8),
            );
        }
    }
    Ok(tail)
}

fn with_variant(value: Value, variant: OperandVariant) -> Value {
    match value {
        Value::VirtualReg { vreg, .. } => Value::VirtualReg { vreg, variant },
        Value::PhysReg(reg, _) => Value::PhysReg(reg, variant),
        Value::Indirect {
            base,
            offset,
            segment,
            ..
        } => Value::Indirect {
            base,
            offset,
            variant,
            segment,
        },
        other => other,
    }
}

/// Emit the compare half of a fused compare-and-branch; returns the jump
/// opcode to use towards the taken target plus the new tail.
pub fn emit_branch_compare(
    ctx: &mut AsmContext,
    anchor: AsmInstrIdx,
    comparison: Comparison,
    lhs: Value,
    rhs: Value,
    is_float: bool,
) -> Result<(AsmOpcode, AsmInstrIdx)> {
    let emitter = emitter_for(comparison.kind);
    let (lhs, rhs) = if emitter.commute { (rhs, lhs) } else { (lhs, rhs) };
    let tail = if is_float {
        let compare = match comparison.width {
            OpWidth::W32 => AsmOpcode::Ucomiss,
            _ => AsmOpcode::Ucomisd,
        };
        ctx.new_instr(Some(anchor), compare, [lhs, rhs, Value::None])
    } else {
        ctx.new_instr(
            Some(anchor),
            AsmOpcode::Cmp,
            [
                with_variant(lhs, width_variant(comparison.width)),
                with_variant(rhs, width_variant(comparison.width)),
                Value::None,
            ],
        )
    };
    Ok((emitter.jump, tail))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asmcmp::VregKind;

    #[test]
    fn integer_compare_is_cmp_then_setcc() {
        let mut ctx = AsmContext::new();
        let anchor = ctx.append_instr(AsmOpcode::Noop, Default::default());
        let dst = ctx.new_virtual_register(VregKind::GeneralPurpose);
        let a = ctx.new_virtual_register(VregKind::GeneralPurpose);
        let b = ctx.new_virtual_register(VregKind::GeneralPurpose);
        emit_scalar_compare(
            &mut ctx,
            anchor,
            Comparison {
                kind: CmpKind::Lesser,
                width: OpWidth::W32,
            },
            dst,
            Value::vreg(a),
            Value::vreg(b),
            false,
        )
        .unwrap();
        let opcodes: Vec<_> = ctx
            .instr_iter()
            .map(|i| ctx.instr(i).unwrap().opcode)
            .collect();
        assert_eq!(
            opcodes,
            vec![AsmOpcode::Noop, AsmOpcode::Cmp, AsmOpcode::Mov, AsmOpcode::Setl]
        );
    }

    #[test]
    fn float_equality_gets_a_parity_fixup() {
        let mut ctx = AsmContext::new();
        let anchor = ctx.append_instr(AsmOpcode::Noop, Default::default());
        let dst = ctx.new_virtual_register(VregKind::GeneralPurpose);
        let a = ctx.new_virtual_register(VregKind::FloatingPoint);
        let b = ctx.new_virtual_register(VregKind::FloatingPoint);
        emit_scalar_compare(
            &mut ctx,
            anchor,
            Comparison {
                kind: CmpKind::FloatEqual,
                width: OpWidth::W64,
            },
            dst,
            Value::vreg(a),
            Value::vreg(b),
            true,
        )
        .unwrap();
        let opcodes: Vec<_> = ctx
            .instr_iter()
            .map(|i| ctx.instr(i).unwrap().opcode)
            .collect();
        assert!(opcodes.contains(&AsmOpcode::Ucomisd));
        assert!(opcodes.contains(&AsmOpcode::Setnp));
        assert!(opcodes.contains(&AsmOpcode::And));
    }
}
