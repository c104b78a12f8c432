//! Tail call marking: an invoke whose result immediately returns becomes a
//! tail-invoke terminator.

use crate::error::Result;
use crate::opt::code::OirFunction;
use crate::opt::ops::{Opcode, OperationData};
use crate::opt::pipeline::{Pass, PipelineConfig};
use crate::opt::OptModule;

pub struct TailCallPass;

impl Pass for TailCallPass {
    fn name(&self) -> &'static str {
        "tail-calls"
    }

    fn apply(
        &self,
        module: &mut OptModule,
        func: &mut OirFunction,
        _config: &PipelineConfig,
    ) -> Result<bool> {
        let mut changed = false;
        for block in func.block_ids().collect::<Vec<_>>() {
            let Some(ret) = func.block_terminator(block) else {
                continue;
            };
            let ret_value = match func.instr(ret)?.op {
                OperationData::OptRef1 {
                    opcode: Opcode::Return,
                    arg,
                } => arg.expand(),
                _ => continue,
            };
            let Some(invoke) = func.instr(ret)?.prev_control() else {
                continue;
            };
            let (call, opcode) = match func.instr(invoke)?.op {
                OperationData::Call { call, opcode } if !opcode.is_terminator() => (call, opcode),
                _ => continue,
            };
            // Only a directly forwarded result (or a discarded one in a
            // void return) can be marked.
            match ret_value {
                Some(value) if value != invoke => continue,
                _ => {}
            }
            // The result must not be observed anywhere else.
            let mut other_uses = false;
            for b in func.block_ids() {
                for user in func.block_instrs(b) {
                    if user == ret {
                        continue;
                    }
                    func.instr(user)?.op.for_each_ref(|r| other_uses |= r == invoke);
                }
            }
            if other_uses {
                continue;
            }
            // A callee with a return space writes caller memory; keep the
            // frame alive.
            if func.call(call)?.return_space.is_some() {
                continue;
            }
            let decl = func.call(call)?.decl;
            if module.ir.get_declaration(decl)?.returns_twice {
                continue;
            }

            func.drop_control(ret)?;
            func.drop_instr(ret)?;
            let tail_opcode = match opcode {
                Opcode::Invoke => Opcode::TailInvoke,
                Opcode::InvokeVirtual => Opcode::TailInvokeVirtual,
                _ => continue,
            };
            match &mut func.instr_mut(invoke)?.op {
                OperationData::Call { opcode, .. } => *opcode = tail_opcode,
                _ => unreachable!(),
            }
            changed = true;
        }
        Ok(changed)
    }
}
