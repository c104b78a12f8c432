//! Devirtualization: replacing every virtual operand with an allocated
//! resource.
//!
//! The rewriter walks the asmcmp stream in linear order, tracking which
//! virtual registers are alive, which physical registers and spill slots
//! they occupy, and what each instruction's operand class permits. Virtual
//! operands become physical registers, spill indirections or memory
//! pointers; operand-form violations are patched with short-lived temporary
//! registers that are evicted and restored around the instruction.

use crate::asmcmp::{
    ArgClass, AsmContext, AsmInstrIdx, AsmOpcode, IndirectBase, OperandVariant, PhysReg, StashIdx,
    Value, VregIdx, VregKind,
};
use crate::codegen::abi::Abi;
use crate::codegen::regalloc::{RegAllocation, RegisterAllocator};
use crate::codegen::stack_frame::StackFrame;
use crate::error::{Error, Result};
use rustc_hash::{FxHashMap, FxHashSet};

const DEVIRT_ARG1: u64 = 1;
const DEVIRT_ARG2: u64 = 1 << 1;
const DEVIRT_ARG_READ: u64 = 1 << 2;
const DEVIRT_ARG_WRITE: u64 = 1 << 3;
const DEVIRT_ARG_ALWAYS_DIRECT: u64 = 1 << 4;
const DEVIRT_ARG_XMM_QUAD: u64 = 1 << 5;
const DEVIRT_ARG_XMM_FULL: u64 = 1 << 6;

fn class_flags(class: ArgClass) -> u64 {
    match class {
        ArgClass::None
        | ArgClass::Virtual
        | ArgClass::Jump
        | ArgClass::MemR
        | ArgClass::RegMemR
        | ArgClass::RegMemW
        | ArgClass::RegMemRW
        | ArgClass::X87MemR
        | ArgClass::X87MemW => 0,
        ArgClass::RegR => DEVIRT_ARG1 | DEVIRT_ARG_ALWAYS_DIRECT | DEVIRT_ARG_READ,
        ArgClass::RegW => DEVIRT_ARG1 | DEVIRT_ARG_ALWAYS_DIRECT | DEVIRT_ARG_WRITE,
        ArgClass::RegMemW_RegMemR => DEVIRT_ARG1 | DEVIRT_ARG_WRITE,
        ArgClass::RegMemRW_RegMemR => DEVIRT_ARG1 | DEVIRT_ARG_READ | DEVIRT_ARG_WRITE,
        ArgClass::RegW_RegMemR => DEVIRT_ARG1 | DEVIRT_ARG_ALWAYS_DIRECT | DEVIRT_ARG_WRITE,
        ArgClass::RegRW_RegMemR => {
            DEVIRT_ARG1 | DEVIRT_ARG_ALWAYS_DIRECT | DEVIRT_ARG_READ | DEVIRT_ARG_WRITE
        }
        ArgClass::RegW_Mem => DEVIRT_ARG1 | DEVIRT_ARG_ALWAYS_DIRECT | DEVIRT_ARG_WRITE,
        ArgClass::RegMemRW_RegR => DEVIRT_ARG2 | DEVIRT_ARG_ALWAYS_DIRECT | DEVIRT_ARG_READ,
        ArgClass::RegMemR_RegR => DEVIRT_ARG2 | DEVIRT_ARG_ALWAYS_DIRECT | DEVIRT_ARG_READ,
        ArgClass::XmmdW_RegMemR | ArgClass::XmmqW_RegMemR => {
            DEVIRT_ARG1 | DEVIRT_ARG_ALWAYS_DIRECT | DEVIRT_ARG_WRITE | DEVIRT_ARG_XMM_QUAD
        }
        ArgClass::XmmRW_XmmMemR => {
            DEVIRT_ARG1
                | DEVIRT_ARG_ALWAYS_DIRECT
                | DEVIRT_ARG_READ
                | DEVIRT_ARG_WRITE
                | DEVIRT_ARG_XMM_FULL
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum TempKind {
    GeneralPurpose,
    Sse,
}

struct DevirtualizeState<'a> {
    ctx: &'a mut AsmContext,
    ra: &'a RegisterAllocator,
    frame: &'a mut StackFrame,
    gp_order: Vec<PhysReg>,
    sse_order: Vec<PhysReg>,
    alive_vregs: FxHashSet<VregIdx>,
    alive_physical: FxHashSet<PhysReg>,
    alive_spill: Vec<bool>,
    current_instr_physical: FxHashSet<PhysReg>,
    /// Registers evicted for the current instruction; `None` means the
    /// register was free and needs no restore.
    evicted: FxHashMap<PhysReg, Option<usize>>,
    stash_active: Option<StashIdx>,
    stash_saved: FxHashMap<VregIdx, usize>,
}

impl<'a> DevirtualizeState<'a> {
    fn remove_dead_vregs(&mut self, position: usize) -> Result<()> {
        self.current_instr_physical.clear();
        let dead: Vec<VregIdx> = self
            .alive_vregs
            .iter()
            .copied()
            .filter(|vreg| {
                self.ra
                    .lifetime_of(*vreg)
                    .map(|l| l.end < position)
                    .unwrap_or(true)
            })
            .collect();
        for vreg in dead {
            self.alive_vregs.remove(&vreg);
        }
        Ok(())
    }

    fn note_alive_vreg(&mut self, position: usize, vreg: VregIdx) -> Result<()> {
        let lifetime = self.ra.lifetime_of(vreg)?;
        if lifetime.begin > position || lifetime.end < position {
            return Err(Error::InvalidState("unexpected virtual register lifetime"));
        }
        self.alive_vregs.insert(vreg);
        match self.ra.allocation_of(vreg)? {
            RegAllocation::Unallocated => {
                // Pair vregs carry no storage of their own.
                if !matches!(self.ctx.vreg(vreg)?, VregKind::Pair { .. }) {
                    return Err(Error::InvalidState("unallocated virtual register"));
                }
            }
            RegAllocation::Register(reg) => {
                self.current_instr_physical.insert(*reg);
            }
            _ => {}
        }
        Ok(())
    }

    fn update_live_vregs(&mut self, position: usize, value: &Value) -> Result<()> {
        match value {
            Value::VirtualReg { vreg, .. } => self.note_alive_vreg(position, *vreg)?,
            Value::Indirect {
                base: IndirectBase::Virtual(vreg),
                ..
            } => self.note_alive_vreg(position, *vreg)?,
            Value::Stash(stash) => {
                let vreg = self.ctx.stash_vreg(*stash)?;
                self.note_alive_vreg(position, vreg)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn rebuild_alive_physical(&mut self) -> Result<()> {
        self.alive_physical.clear();
        for slot in self.alive_spill.iter_mut() {
            *slot = false;
        }
        for vreg in self.alive_vregs.iter().copied().collect::<Vec<_>>() {
            match *self.ra.allocation_of(vreg)? {
                RegAllocation::Register(reg) => {
                    self.alive_physical.insert(reg);
                }
                RegAllocation::SpillAreaDirect { index, length }
                | RegAllocation::SpillAreaIndirect { index, length } => {
                    if index + length > self.alive_spill.len() {
                        self.alive_spill.resize(index + length, false);
                    }
                    for slot in &mut self.alive_spill[index..index + length] {
                        *slot = true;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn allocate_spill_space(&mut self, qwords: usize, alignment: usize) -> usize {
        let alignment = alignment.max(1);
        let mut index = 0;
        loop {
            index = (index + alignment - 1) / alignment * alignment;
            if index + qwords > self.alive_spill.len() {
                self.alive_spill.resize(index + qwords, false);
            }
            if self.alive_spill[index..index + qwords].iter().all(|used| !used) {
                self.frame.ensure_spill_area(self.alive_spill.len() as u64);
                return index;
            }
            index += alignment;
        }
    }

    /// Acquire a physical register for the current instruction, evicting a
    /// live one into a fresh spill slot if the whole bank is occupied.
    fn obtain_temporary(&mut self, position: AsmInstrIdx, kind: TempKind) -> Result<PhysReg> {
        let (order, spill_qwords) = match kind {
            TempKind::GeneralPurpose => (self.gp_order.clone(), 1usize),
            TempKind::Sse => (self.sse_order.clone(), 2usize),
        };

        for candidate in order.iter().copied() {
            if !self.current_instr_physical.contains(&candidate)
                && !self.alive_physical.contains(&candidate)
                && !self.evicted.contains_key(&candidate)
                && self.ra.is_register_used(candidate)
            {
                self.evicted.insert(candidate, None);
                return Ok(candidate);
            }
        }
        for candidate in order.iter().copied() {
            if !self.current_instr_physical.contains(&candidate)
                && !self.evicted.contains_key(&candidate)
            {
                let slot = self.allocate_spill_space(spill_qwords, spill_qwords);
                for s in &mut self.alive_spill[slot..slot + spill_qwords] {
                    *s = true;
                }
                self.evicted.insert(candidate, Some(slot));

                let prev = self.ctx.instr_prev(position);
                let save = match kind {
                    TempKind::GeneralPurpose => self.ctx.mov(
                        prev,
                        Value::indirect_spill(slot, 0, OperandVariant::W64),
                        Value::phreg(candidate),
                    ),
                    TempKind::Sse => self.ctx.movdqu(
                        prev,
                        Value::indirect_spill(slot, 0, OperandVariant::Default),
                        Value::phreg(candidate),
                    ),
                };
                self.ctx.move_labels(save, position)?;
                return Ok(candidate);
            }
        }
        Err(Error::InvalidState(
            "unable to find a temporary register for eviction",
        ))
    }

    /// Translate a single operand to its post-allocation form.
    fn devirtualize_value(&mut self, position: AsmInstrIdx, value: &Value) -> Result<Value> {
        let translated = match value {
            Value::VirtualReg { vreg, variant } => match *self.ra.allocation_of(*vreg)? {
                RegAllocation::Unallocated => {
                    return Err(Error::InvalidState("unallocated virtual register"))
                }
                RegAllocation::Register(reg) => {
                    if *variant == OperandVariant::W80 {
                        return Err(Error::InvalidState("unexpected register variant"));
                    }
                    if *variant == OperandVariant::W128 && !reg.is_floating_point() {
                        return Err(Error::InvalidState("expected floating-point register"));
                    }
                    Value::PhysReg(reg, *variant)
                }
                RegAllocation::SpillAreaDirect { index, .. } => {
                    Value::indirect_spill(index, 0, *variant)
                }
                RegAllocation::SpillAreaIndirect { index, .. } => {
                    let reg = self.obtain_temporary(position, TempKind::GeneralPurpose)?;
                    let prev = self.ctx.instr_prev(position);
                    let lea = self.ctx.lea(
                        prev,
                        Value::phreg(reg),
                        Value::indirect_spill(index, 0, OperandVariant::W64),
                    );
                    self.ctx.move_labels(lea, position)?;
                    Value::PhysReg(reg, OperandVariant::Default)
                }
                RegAllocation::MemoryPointer { base, offset } => {
                    Value::indirect_physical(base, offset, OperandVariant::Default)
                }
            },
            Value::Indirect {
                base: IndirectBase::Virtual(vreg),
                offset,
                variant,
                segment,
            } => {
                let translated = match *self.ra.allocation_of(*vreg)? {
                    RegAllocation::Unallocated => {
                        return Err(Error::InvalidState("unallocated virtual register"))
                    }
                    RegAllocation::Register(reg) => {
                        Value::indirect_physical(reg, *offset, *variant)
                    }
                    RegAllocation::SpillAreaDirect { index, .. } => {
                        let reg = self.obtain_temporary(position, TempKind::GeneralPurpose)?;
                        let prev = self.ctx.instr_prev(position);
                        let load = self.ctx.mov(
                            prev,
                            Value::phreg(reg),
                            Value::indirect_spill(index, 0, OperandVariant::W64),
                        );
                        self.ctx.move_labels(load, position)?;
                        Value::indirect_physical(reg, *offset, *variant)
                    }
                    RegAllocation::SpillAreaIndirect { index, .. } => {
                        Value::indirect_spill(index, *offset, *variant)
                    }
                    RegAllocation::MemoryPointer { base, offset: base_offset } => {
                        let reg = self.obtain_temporary(position, TempKind::GeneralPurpose)?;
                        let prev = self.ctx.instr_prev(position);
                        let load = self.ctx.mov(
                            prev,
                            Value::phreg(reg),
                            Value::indirect_physical(base, base_offset, OperandVariant::W64),
                        );
                        self.ctx.move_labels(load, position)?;
                        Value::indirect_physical(reg, *offset, *variant)
                    }
                };
                match (translated, segment) {
                    (
                        Value::Indirect {
                            base,
                            offset,
                            variant,
                            ..
                        },
                        Some(segment),
                    ) => Value::Indirect {
                        base,
                        offset,
                        variant,
                        segment: Some(*segment),
                    },
                    (translated, _) => translated,
                }
            }
            other => other.clone(),
        };
        Ok(translated)
    }

    /// Enforce the operand-form constraints of the instruction's class.
    fn devirtualize_instr(
        &mut self,
        idx: AsmInstrIdx,
        instr: &mut (AsmOpcode, [Value; 3]),
        tail: &mut AsmInstrIdx,
        flags: u64,
    ) -> Result<()> {
        instr.1[0] = self.devirtualize_value(idx, &instr.1[0].clone())?;
        instr.1[1] = self.devirtualize_value(idx, &instr.1[1].clone())?;
        instr.1[2] = self.devirtualize_value(idx, &instr.1[2].clone())?;

        if flags & (DEVIRT_ARG1 | DEVIRT_ARG2) == 0 {
            return Ok(());
        }
        let primary = if flags & DEVIRT_ARG1 != 0 { 0 } else { 1 };
        let secondary = 1 - primary;

        let temp_kind = if flags & (DEVIRT_ARG_XMM_QUAD | DEVIRT_ARG_XMM_FULL) != 0 {
            TempKind::Sse
        } else {
            TempKind::GeneralPurpose
        };

        let needs_temp = instr.1[primary].is_indirect()
            && (flags & DEVIRT_ARG_ALWAYS_DIRECT != 0 || instr.1[secondary].is_indirect());
        if !needs_temp {
            return Ok(());
        }

        let original = instr.1[primary].clone();
        let reg = self.obtain_temporary(idx, temp_kind)?;
        let variant = match &original {
            Value::Indirect { variant, .. } => *variant,
            _ => OperandVariant::Default,
        };

        if flags & DEVIRT_ARG_READ != 0 {
            let prev = self.ctx.instr_prev(idx);
            let head = if temp_kind == TempKind::GeneralPurpose {
                self.ctx
                    .mov(prev, Value::PhysReg(reg, variant), original.clone())
            } else if flags & DEVIRT_ARG_XMM_QUAD != 0 {
                self.ctx
                    .movq(prev, Value::phreg(reg), original.clone())
            } else {
                self.ctx
                    .movdqu(prev, Value::phreg(reg), original.clone())
            };
            self.ctx.move_labels(head, idx)?;
        }
        instr.1[primary] = Value::PhysReg(reg, variant);
        if flags & DEVIRT_ARG_WRITE != 0 {
            *tail = if temp_kind == TempKind::GeneralPurpose {
                self.ctx
                    .mov(Some(idx), original, Value::PhysReg(reg, variant))
            } else if flags & DEVIRT_ARG_XMM_QUAD != 0 {
                self.ctx.movq(Some(idx), original, Value::phreg(reg))
            } else {
                self.ctx.movdqu(Some(idx), original, Value::phreg(reg))
            };
        }
        Ok(())
    }

    /// Realize a stash activation: save every live register in the stash's
    /// set into its backing spill slots.
    fn activate_stash(
        &mut self,
        idx: AsmInstrIdx,
        instr: &mut (AsmOpcode, [Value; 3]),
    ) -> Result<()> {
        if self.stash_active.is_some() {
            return Err(Error::InvalidState("another stash is already active"));
        }
        let stash = match instr.1[0] {
            Value::Stash(stash) => stash,
            _ => return Err(Error::InvalidParameter("stash activation without a stash operand")),
        };
        let stash_vreg = self.ctx.stash_vreg(stash)?;
        let liveness = self.ctx.stash_liveness(stash)?;
        let (area_index, area_length) = match *self.ra.allocation_of(stash_vreg)? {
            RegAllocation::SpillAreaIndirect { index, length } => (index, length),
            _ => {
                return Err(Error::InvalidState(
                    "expected spill area space allocation for stash",
                ))
            }
        };

        let liveness_position = match liveness {
            Some(l) => Some(self.ra.linear_position_of(l)?),
            None => None,
        };

        let mut area_slot = 0usize;
        let mut alive: Vec<VregIdx> = self.alive_vregs.iter().copied().collect();
        alive.sort();
        for vreg in alive {
            let reg = match *self.ra.allocation_of(vreg)? {
                RegAllocation::Register(reg) => reg,
                _ => continue,
            };
            if !self.ctx.stash_has(stash, reg)? {
                continue;
            }
            if let Some(cursor) = liveness_position {
                let lifetime = self.ra.lifetime_of(vreg)?;
                if !(lifetime.begin <= cursor && lifetime.end > cursor) {
                    continue;
                }
            }
            if area_slot >= area_length {
                return Err(Error::OutOfBounds(
                    "stash spill area slot is out of backing storage space",
                ));
            }
            let prev = self.ctx.instr_prev(idx);
            let increment = if reg.is_floating_point() {
                let save = self.ctx.movdqu(
                    prev,
                    Value::indirect_spill(area_index + area_slot, 0, OperandVariant::Default),
                    Value::phreg(reg),
                );
                self.ctx.move_labels(save, idx)?;
                2
            } else {
                let save = self.ctx.mov(
                    prev,
                    Value::indirect_spill(area_index + area_slot, 0, OperandVariant::W64),
                    Value::phreg(reg),
                );
                self.ctx.move_labels(save, idx)?;
                1
            };
            self.stash_saved.insert(vreg, area_slot);
            area_slot += increment;
        }

        self.stash_active = Some(stash);
        instr.0 = AsmOpcode::Noop;
        instr.1 = [Value::None, Value::None, Value::None];
        Ok(())
    }

    fn deactivate_stash(
        &mut self,
        idx: AsmInstrIdx,
        instr: &mut (AsmOpcode, [Value; 3]),
    ) -> Result<()> {
        let stash = match instr.1[0] {
            Value::Stash(stash) => stash,
            _ => return Err(Error::InvalidParameter("stash deactivation without a stash operand")),
        };
        if self.stash_active != Some(stash) {
            return Err(Error::InvalidState("stash activation mismatch"));
        }
        let stash_vreg = self.ctx.stash_vreg(stash)?;
        let area_index = match *self.ra.allocation_of(stash_vreg)? {
            RegAllocation::SpillAreaIndirect { index, .. } => index,
            _ => {
                return Err(Error::InvalidState(
                    "expected spill area space allocation for stash",
                ))
            }
        };

        let mut saved: Vec<(VregIdx, usize)> = self
            .stash_saved
            .iter()
            .map(|(v, s)| (*v, *s))
            .collect();
        saved.sort();
        for (vreg, slot) in saved {
            if !self.alive_vregs.contains(&vreg) {
                continue;
            }
            let reg = match *self.ra.allocation_of(vreg)? {
                RegAllocation::Register(reg) => reg,
                _ => continue,
            };
            let prev = self.ctx.instr_prev(idx);
            let restore = if reg.is_floating_point() {
                self.ctx.movdqu(
                    prev,
                    Value::phreg(reg),
                    Value::indirect_spill(area_index + slot, 0, OperandVariant::Default),
                )
            } else {
                self.ctx.mov(
                    prev,
                    Value::phreg(reg),
                    Value::indirect_spill(area_index + slot, 0, OperandVariant::W64),
                )
            };
            self.ctx.move_labels(restore, idx)?;
        }

        self.stash_saved.clear();
        self.stash_active = None;
        instr.0 = AsmOpcode::Noop;
        instr.1 = [Value::None, Value::None, Value::None];
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        self.alive_spill = vec![false; self.ra.spill_slot_count()];

        let mut cursor = self.ctx.instr_head();
        while let Some(idx) = cursor {
            cursor = self.ctx.instr_next(idx);

            let position = match self.ra.linear_position_of(idx) {
                Ok(position) => position,
                // Instructions materialized during devirtualization have no
                // linear position and are already physical.
                Err(_) => continue,
            };

            self.remove_dead_vregs(position)?;
            let args = self.ctx.instr(idx)?.args.clone();
            for value in &args {
                self.update_live_vregs(position, value)?;
            }
            self.rebuild_alive_physical()?;

            let opcode = self.ctx.instr(idx)?.opcode;
            let mut rewritten = (opcode, args);
            let mut tail = idx;

            match opcode {
                AsmOpcode::StashActivate => self.activate_stash(idx, &mut rewritten)?,
                AsmOpcode::StashDeactivate => self.deactivate_stash(idx, &mut rewritten)?,
                AsmOpcode::TouchVirtualRegister
                | AsmOpcode::FunctionPrologue
                | AsmOpcode::FunctionEpilogue
                | AsmOpcode::Noop
                | AsmOpcode::DataWord => {}
                AsmOpcode::VirtualRegisterLink => {
                    self.devirtualize_instr(
                        idx,
                        &mut rewritten,
                        &mut tail,
                        class_flags(ArgClass::RegMemW_RegMemR),
                    )?;
                }
                _ => {
                    let flags = class_flags(opcode.arg_class());
                    self.devirtualize_instr(idx, &mut rewritten, &mut tail, flags)?;
                }
            }

            self.ctx.replace_instr(idx, rewritten.0, rewritten.1)?;

            // Restore evicted registers after the instruction.
            let evicted: Vec<(PhysReg, Option<usize>)> =
                self.evicted.iter().map(|(r, s)| (*r, *s)).collect();
            for (reg, slot) in evicted {
                if let Some(slot) = slot {
                    if reg.is_floating_point() {
                        self.ctx.movdqu(
                            Some(tail),
                            Value::phreg(reg),
                            Value::indirect_spill(slot, 0, OperandVariant::Default),
                        );
                        self.alive_spill[slot] = false;
                        self.alive_spill[slot + 1] = false;
                    } else {
                        self.ctx.mov(
                            Some(tail),
                            Value::phreg(reg),
                            Value::indirect_spill(slot, 0, OperandVariant::W64),
                        );
                        self.alive_spill[slot] = false;
                    }
                }
            }
            self.evicted.clear();
        }
        Ok(())
    }
}

/// Devirtualize the whole program in place.
pub fn devirtualize(
    ctx: &mut AsmContext,
    ra: &RegisterAllocator,
    abi: &dyn Abi,
    frame: &mut StackFrame,
) -> Result<()> {
    let mut state = DevirtualizeState {
        ctx,
        ra,
        frame,
        gp_order: abi.register_allocation_order().to_vec(),
        sse_order: abi.sse_allocation_order().to_vec(),
        alive_vregs: FxHashSet::default(),
        alive_physical: FxHashSet::default(),
        alive_spill: Vec::new(),
        current_instr_physical: FxHashSet::default(),
        evicted: FxHashMap::default(),
        stash_active: None,
        stash_saved: FxHashMap::default(),
    };
    state.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::abi::SysVAmd64Abi;
    use crate::codegen::regalloc::allocate_registers;

    fn devirtualized(ctx: &mut AsmContext) -> RegisterAllocator {
        let mut frame = StackFrame::new();
        let ra = allocate_registers(ctx, &SysVAmd64Abi, &mut frame).unwrap();
        devirtualize(ctx, &ra, &SysVAmd64Abi, &mut frame).unwrap();
        ra
    }

    fn assert_no_virtual_operands(ctx: &AsmContext) {
        for idx in ctx.instr_iter().collect::<Vec<_>>() {
            for value in &ctx.instr(idx).unwrap().args {
                match value {
                    Value::VirtualReg { .. } => panic!("virtual register survived devirtualization"),
                    Value::Indirect {
                        base: IndirectBase::Virtual(_),
                        ..
                    } => panic!("virtual base survived devirtualization"),
                    _ => {}
                }
            }
        }
    }

    #[test]
    fn all_virtual_operands_are_replaced() {
        let mut ctx = AsmContext::new();
        let a = ctx.new_virtual_register(VregKind::GeneralPurpose);
        let b = ctx.new_virtual_register(VregKind::GeneralPurpose);
        ctx.append_instr(
            AsmOpcode::Mov,
            [Value::vreg(a), Value::Int(7), Value::None],
        );
        ctx.append_instr(
            AsmOpcode::Mov,
            [Value::vreg(b), Value::vreg(a), Value::None],
        );
        ctx.append_instr(
            AsmOpcode::Add,
            [Value::vreg(b), Value::vreg(a), Value::None],
        );
        devirtualized(&mut ctx);
        assert_no_virtual_operands(&ctx);
    }

    #[test]
    fn two_memory_operands_get_a_temporary() {
        let mut ctx = AsmContext::new();
        // Two spill-space vregs guarantee memory-resident operands.
        let a = ctx.new_spill_space(1, 1);
        let b = ctx.new_spill_space(1, 1);
        ctx.append_instr(
            AsmOpcode::Mov,
            [
                Value::indirect_virtual(a, 0, OperandVariant::W64),
                Value::indirect_virtual(b, 0, OperandVariant::W64),
                Value::None,
            ],
        );
        devirtualized(&mut ctx);
        assert_no_virtual_operands(&ctx);
        // A temporary load must have been inserted before the mov.
        assert!(ctx.instr_iter().count() > 1);
    }
}
