//! AMD64 code generation: per-function pipeline and final text emission.
//!
//! For each function: OIR blocks are emitted into an asmcmp program,
//! registers are allocated, the program is devirtualized in place, and the
//! resulting physical instruction stream is textualized through the
//! assembly sink. The DWARF emitter runs once per module afterwards,
//! cross-referencing the per-function label maps.

pub mod abi;
pub mod comparison;
pub mod devirtualize;
pub mod function;
pub mod lowering;
pub mod regalloc;
pub mod stack_frame;

use crate::asmcmp::{
    AsmContext, AsmOpcode, IndirectBase, LabelIdx, OperandVariant, PhysReg, Value,
};
use crate::codegen::abi::{Abi, SysVAmd64Abi, QWORD};
use crate::codegen::function::FunctionCodegen;
use crate::codegen::regalloc::{allocate_registers, RegAllocation};
use crate::codegen::stack_frame::{FrameLayout, StackFrame};
use crate::dwarf::{dwarf_regno, DwarfEmitter, FunctionDebugArtifacts, VarLocation};
use crate::error::{Error, Result};
use crate::ir::IrModule;
use crate::opt::OptModule;
use crate::xasmgen::{AsmSink, DataKind, IndirectTarget, Operand, PtrWidth};
use cranelift_entity::EntityRef;
use log::debug;

/// Code generation options.
#[derive(Clone, Debug)]
pub struct CodegenConfig {
    pub debug_info: bool,
    pub producer: String,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            debug_info: true,
            producer: format!("kefir {}", env!("CARGO_PKG_VERSION")),
        }
    }
}

fn reg_operand(reg: PhysReg, variant: OperandVariant) -> Operand {
    let name = if reg.is_floating_point() {
        reg.name64()
    } else {
        match variant {
            OperandVariant::W8 => reg.name8(),
            OperandVariant::W16 => reg.name16(),
            OperandVariant::W32 | OperandVariant::FpSingle => reg.name32(),
            _ => reg.name64(),
        }
    };
    Operand::Reg(name)
}

fn variant_width(variant: OperandVariant) -> Option<PtrWidth> {
    match variant {
        OperandVariant::W8 => Some(PtrWidth::Byte),
        OperandVariant::W16 => Some(PtrWidth::Word),
        OperandVariant::W32 | OperandVariant::FpSingle => Some(PtrWidth::Dword),
        OperandVariant::W64 | OperandVariant::FpDouble => Some(PtrWidth::Qword),
        OperandVariant::W80 => Some(PtrWidth::Tbyte),
        OperandVariant::W128 => Some(PtrWidth::Xmmword),
        OperandVariant::Default => None,
    }
}

struct TextEmitter<'a> {
    ctx: &'a AsmContext,
    layout: FrameLayout,
    function_name: &'a str,
}

impl<'a> TextEmitter<'a> {
    fn label_name(&self, label: LabelIdx) -> String {
        match self.ctx.label_name(label) {
            Some(name) => name.to_string(),
            None => format!(
                "__kefir_func_{}_label{}",
                self.function_name,
                label.index()
            ),
        }
    }

    fn value_operand(&self, value: &Value) -> Result<Option<Operand>> {
        Ok(match value {
            Value::None => None,
            Value::PhysReg(reg, variant) => Some(reg_operand(*reg, *variant)),
            Value::Int(v) => Some(Operand::Imm(*v)),
            Value::Uint(v) => Some(Operand::ImmU(*v)),
            Value::Indirect {
                base,
                offset,
                variant,
                segment,
            } => {
                let segment = segment.map(|s| s.name());
                let (target, resolved_offset) = match base {
                    IndirectBase::Physical(reg) => {
                        (IndirectTarget::Register(reg.name64()), *offset)
                    }
                    IndirectBase::Spill(slot) => (
                        IndirectTarget::Register("rbp"),
                        self.layout.spill_offset + (*slot as i64) * QWORD as i64 + offset,
                    ),
                    IndirectBase::LocalVar(local) => (
                        IndirectTarget::Register("rbp"),
                        self.layout.local_offset + *local as i64 + offset,
                    ),
                    IndirectBase::TemporaryArea(temp) => (
                        IndirectTarget::Register("rbp"),
                        self.layout.local_offset + *temp as i64 + offset,
                    ),
                    IndirectBase::VarargSave(save) => (
                        IndirectTarget::Register("rbp"),
                        self.layout.vararg_offset + *save as i64 + offset,
                    ),
                    IndirectBase::Label(label) => {
                        (IndirectTarget::Label(self.label_name(*label)), *offset)
                    }
                    IndirectBase::Virtual(_) => {
                        return Err(Error::InvalidState(
                            "virtual operand survived devirtualization",
                        ))
                    }
                };
                Some(Operand::Indirect {
                    width: variant_width(*variant),
                    base: target,
                    offset: resolved_offset,
                    segment,
                })
            }
            Value::RipIndirect { name, .. } => Some(Operand::Rip(name.clone())),
            Value::ExternalLabel { kind, name, offset, .. } => {
                let _ = kind;
                if *offset != 0 {
                    Some(Operand::Symbol(format!("{name}+{offset}")))
                } else {
                    Some(Operand::Symbol(name.clone()))
                }
            }
            Value::X87(index) => Some(Operand::X87(*index)),
            Value::InternalLabel(label) => Some(Operand::Symbol(self.label_name(*label))),
            Value::VirtualReg { .. } => {
                return Err(Error::InvalidState(
                    "virtual operand survived devirtualization",
                ))
            }
            Value::Stash(_) => {
                return Err(Error::InvalidState("unrealized stash operand"))
            }
        })
    }

    fn emit_prologue(&self, sink: &mut dyn AsmSink, frame: &StackFrame) -> Result<()> {
        sink.instr("push", &[Operand::Reg("rbp")])?;
        sink.instr("mov", &[Operand::Reg("rbp"), Operand::Reg("rsp")])?;
        for reg in frame.preserved_regs() {
            if *reg == PhysReg::Rbp {
                continue;
            }
            sink.instr("push", &[Operand::Reg(reg.name64())])?;
        }
        if self.layout.allocation_size > 0 {
            sink.instr(
                "sub",
                &[
                    Operand::Reg("rsp"),
                    Operand::Imm(self.layout.allocation_size as i64),
                ],
            )?;
        }
        if let Some(offset) = self.layout.x87cw_offset {
            sink.instr(
                "fnstcw",
                &[Operand::Indirect {
                    width: Some(PtrWidth::Word),
                    base: IndirectTarget::Register("rbp"),
                    offset,
                    segment: None,
                }],
            )?;
        }
        if let Some(offset) = self.layout.mxcsr_offset {
            sink.instr(
                "stmxcsr",
                &[Operand::Indirect {
                    width: Some(PtrWidth::Dword),
                    base: IndirectTarget::Register("rbp"),
                    offset,
                    segment: None,
                }],
            )?;
        }
        if frame.vararg_save_area_enabled() {
            let base = self.layout.vararg_offset;
            for (i, reg) in abi::INTEGER_PARAM_REGS.iter().enumerate() {
                sink.instr(
                    "mov",
                    &[
                        Operand::Indirect {
                            width: Some(PtrWidth::Qword),
                            base: IndirectTarget::Register("rbp"),
                            offset: base + (i as i64) * 8,
                            segment: None,
                        },
                        Operand::Reg(reg.name64()),
                    ],
                )?;
            }
            for (i, reg) in abi::SSE_PARAM_REGS.iter().enumerate() {
                sink.instr(
                    "movdqu",
                    &[
                        Operand::Indirect {
                            width: None,
                            base: IndirectTarget::Register("rbp"),
                            offset: base + 48 + (i as i64) * 16,
                            segment: None,
                        },
                        Operand::Reg(reg.name64()),
                    ],
                )?;
            }
        }
        Ok(())
    }

    fn emit_epilogue(&self, sink: &mut dyn AsmSink, frame: &StackFrame) -> Result<()> {
        if let Some(offset) = self.layout.x87cw_offset {
            sink.instr(
                "fldcw",
                &[Operand::Indirect {
                    width: Some(PtrWidth::Word),
                    base: IndirectTarget::Register("rbp"),
                    offset,
                    segment: None,
                }],
            )?;
        }
        if let Some(offset) = self.layout.mxcsr_offset {
            sink.instr(
                "ldmxcsr",
                &[Operand::Indirect {
                    width: Some(PtrWidth::Dword),
                    base: IndirectTarget::Register("rbp"),
                    offset,
                    segment: None,
                }],
            )?;
        }
        let preserved: Vec<PhysReg> = frame
            .preserved_regs()
            .iter()
            .copied()
            .filter(|r| *r != PhysReg::Rbp)
            .collect();
        if preserved.is_empty() {
            sink.instr("mov", &[Operand::Reg("rsp"), Operand::Reg("rbp")])?;
        } else {
            sink.instr(
                "lea",
                &[
                    Operand::Reg("rsp"),
                    Operand::Indirect {
                        width: None,
                        base: IndirectTarget::Register("rbp"),
                        offset: -((preserved.len() as i64) * 8),
                        segment: None,
                    },
                ],
            )?;
            for reg in preserved.iter().rev() {
                sink.instr("pop", &[Operand::Reg(reg.name64())])?;
            }
        }
        sink.instr("pop", &[Operand::Reg("rbp")])?;
        Ok(())
    }

    fn emit_link(&self, sink: &mut dyn AsmSink, args: &[Value; 3]) -> Result<()> {
        let dst = self.value_operand(&args[0])?;
        let src = self.value_operand(&args[1])?;
        let (Some(dst), Some(src)) = (dst, src) else {
            return Ok(());
        };
        if args[0] == args[1] {
            return Ok(());
        }
        let xmm_involved = matches!(args[0], Value::PhysReg(reg, _) if reg.is_floating_point())
            || matches!(args[1], Value::PhysReg(reg, _) if reg.is_floating_point());
        let mnemonic = if xmm_involved { "movq" } else { "mov" };
        sink.instr(mnemonic, &[dst, src])
    }

    fn run(&self, sink: &mut dyn AsmSink, ir: &IrModule, frame: &StackFrame) -> Result<()> {
        for idx in self.ctx.instr_iter() {
            let instr = self.ctx.instr(idx)?;
            for label in instr.labels() {
                sink.label(&self.label_name(*label))?;
            }
            match instr.opcode {
                AsmOpcode::Noop
                | AsmOpcode::TouchVirtualRegister
                | AsmOpcode::StashActivate
                | AsmOpcode::StashDeactivate => {}
                AsmOpcode::FunctionPrologue => self.emit_prologue(sink, frame)?,
                AsmOpcode::FunctionEpilogue => self.emit_epilogue(sink, frame)?,
                AsmOpcode::VirtualRegisterLink => self.emit_link(sink, &instr.args)?,
                AsmOpcode::DataWord => {
                    if let Value::Uint(v) = instr.args[0] {
                        sink.data(DataKind::Word, &[Operand::ImmU(v)])?;
                    }
                }
                AsmOpcode::InlineAssembly => {
                    if let Value::Uint(id) = instr.args[0] {
                        sink.inline_assembly(ir.inline_asm_template(id)?)?;
                    }
                }
                opcode => {
                    let mnemonic = opcode
                        .mnemonic()
                        .ok_or(Error::InvalidState("pseudo opcode reached text emission"))?;
                    let mut operands = Vec::new();
                    for value in &instr.args {
                        if let Some(operand) = self.value_operand(value)? {
                            operands.push(operand);
                        }
                    }
                    sink.instr(mnemonic, &operands)?;
                }
            }
        }
        Ok(())
    }
}

/// Generate one function; returns its debug artifacts.
fn generate_function(
    ir: &IrModule,
    func: &crate::opt::OirFunction,
    abi: &dyn Abi,
    sink: &mut dyn AsmSink,
) -> Result<FunctionDebugArtifacts> {
    let name = ir.symbol(ir.get_declaration(func.decl)?.name).to_string();
    debug!("generating function {name}");

    let mut codegen = FunctionCodegen::new(ir, func, abi)?;
    codegen.run()?;

    let ra = allocate_registers(&codegen.ctx, abi, &mut codegen.frame)?;
    for reg in abi.callee_saved() {
        if ra.is_register_used(*reg) {
            codegen.frame.preserve_register(*reg);
        }
    }
    devirtualize::devirtualize(&mut codegen.ctx, &ra, abi, &mut codegen.frame)?;
    let layout = codegen.frame.layout();

    sink.newline(1)?;
    sink.global(&name)?;
    let emitter = TextEmitter {
        ctx: &codegen.ctx,
        layout,
        function_name: &name,
    };
    emitter.run(sink, ir, &codegen.frame)?;

    // Debug artifacts: label names for IR offsets plus variable locations.
    let mut artifacts = FunctionDebugArtifacts {
        name: name.clone(),
        begin_label: name.clone(),
        end_label: emitter.label_name(codegen.end_label),
        ..Default::default()
    };
    for (ir_index, label) in codegen.ir_index_labels() {
        artifacts
            .ir_labels
            .insert(*ir_index, emitter.label_name(*label));
    }
    for variable in func.debug.variables() {
        if let Some(offset) = codegen.variable_local_offset(variable) {
            artifacts.variables.insert(
                variable,
                VarLocation::FrameOffset(layout.local_offset + offset as i64),
            );
            continue;
        }
        let Some(vreg) = codegen.variable_vreg(variable) else {
            continue;
        };
        match ra.allocation_of(vreg)? {
            RegAllocation::Register(reg) => {
                artifacts
                    .variables
                    .insert(variable, VarLocation::Register(dwarf_regno(*reg)));
            }
            RegAllocation::SpillAreaDirect { index, .. }
            | RegAllocation::SpillAreaIndirect { index, .. } => {
                artifacts.variables.insert(
                    variable,
                    VarLocation::FrameOffset(
                        layout.spill_offset + (*index as i64) * QWORD as i64,
                    ),
                );
            }
            RegAllocation::MemoryPointer { base, offset } => {
                if *base == PhysReg::Rbp {
                    artifacts
                        .variables
                        .insert(variable, VarLocation::FrameOffset(*offset));
                }
            }
            RegAllocation::Unallocated => {}
        }
    }
    artifacts.subprogram = ir
        .get_function(func.decl)
        .and_then(|f| f.subprogram_id.expand());
    Ok(artifacts)
}

/// Generate assembly for the whole module: text section plus, when enabled,
/// the DWARF debug sections.
pub fn generate_module(
    module: &mut OptModule,
    sink: &mut dyn AsmSink,
    config: &CodegenConfig,
) -> Result<()> {
    let abi = SysVAmd64Abi;
    sink.prologue()?;
    sink.newline(1)?;
    sink.section(".text")?;
    sink.label(crate::dwarf::TEXT_BEGIN)?;

    let mut artifacts = Vec::new();
    for decl in module.function_ids() {
        let mut func = module.take_function(decl)?;
        // Code generation only reads the SSA form.
        func.freeze();
        let result = generate_function(&module.ir, &func, &abi, sink);
        module.put_function(func);
        artifacts.push(result?);
    }

    sink.newline(1)?;
    sink.label(crate::dwarf::TEXT_END)?;

    if config.debug_info {
        DwarfEmitter::new(sink, &module.ir, &artifacts, &config.producer).run()?;
    }
    sink.newline(1)?;
    Ok(())
}
