//! Linear-scan register allocation over the asmcmp stream.
//!
//! Every instruction gets a linear position; every virtual register gets a
//! contiguous liveness interval from its first definition to its last use.
//! Registers are handed out in the ABI's preference order, one bank for
//! general-purpose and one for SSE; when a bank runs dry the active interval
//! with the furthest end is spilled. Spill-space vregs bypass registers and
//! claim area slots directly.

use crate::asmcmp::{
    AsmContext, AsmInstrIdx, IndirectBase, PhysReg, Value, VregIdx, VregKind,
};
use crate::codegen::abi::Abi;
use crate::codegen::stack_frame::StackFrame;
use crate::error::{Error, Result};
use cranelift_entity::EntityRef;
use rustc_hash::{FxHashMap, FxHashSet};

/// Final placement of one virtual register.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegAllocation {
    Unallocated,
    Register(PhysReg),
    /// The value itself lives in the spill area.
    SpillAreaDirect { index: usize, length: usize },
    /// The vreg denotes spill-area storage; its value is the storage
    /// address.
    SpillAreaIndirect { index: usize, length: usize },
    /// No allocation needed; the vreg names `[base + offset]`.
    MemoryPointer { base: PhysReg, offset: i64 },
}

#[derive(Copy, Clone, Debug, Default)]
pub struct Lifetime {
    pub begin: usize,
    pub end: usize,
}

pub struct RegisterAllocator {
    allocations: Vec<RegAllocation>,
    lifetimes: Vec<Option<Lifetime>>,
    linear_positions: FxHashMap<AsmInstrIdx, usize>,
    used_registers: FxHashSet<PhysReg>,
    spill_area: Vec<bool>,
}

/// Registers the code generator keeps for itself (ABI scratch and fixed
/// operands); the allocator never hands them out.
pub const RESERVED_GP: [PhysReg; 7] = [
    PhysReg::Rax,
    PhysReg::Rcx,
    PhysReg::Rdx,
    PhysReg::Rsi,
    PhysReg::Rdi,
    PhysReg::Rsp,
    PhysReg::Rbp,
];

pub const RESERVED_SSE: [PhysReg; 2] = [PhysReg::Xmm0, PhysReg::Xmm1];

impl RegisterAllocator {
    pub fn allocation_of(&self, vreg: VregIdx) -> Result<&RegAllocation> {
        self.allocations
            .get(vreg.index())
            .ok_or(Error::OutOfBounds("virtual register index past the allocation table"))
    }

    pub fn lifetime_of(&self, vreg: VregIdx) -> Result<Lifetime> {
        self.lifetimes
            .get(vreg.index())
            .copied()
            .flatten()
            .ok_or(Error::NotFound("virtual register has no liveness interval"))
    }

    pub fn linear_position_of(&self, idx: AsmInstrIdx) -> Result<usize> {
        self.linear_positions
            .get(&idx)
            .copied()
            .ok_or(Error::NotFound("instruction has no linear position"))
    }

    pub fn used_registers(&self) -> &FxHashSet<PhysReg> {
        &self.used_registers
    }

    pub fn is_register_used(&self, reg: PhysReg) -> bool {
        self.used_registers.contains(&reg)
    }

    pub fn spill_slot_count(&self) -> usize {
        self.spill_area.len()
    }
}

fn note_vreg(
    ctx: &AsmContext,
    lifetimes: &mut Vec<Option<Lifetime>>,
    vreg: VregIdx,
    position: usize,
) -> Result<()> {
    let slot = &mut lifetimes[vreg.index()];
    match slot {
        Some(lifetime) => lifetime.end = lifetime.end.max(position),
        None => {
            *slot = Some(Lifetime {
                begin: position,
                end: position,
            })
        }
    }
    if let VregKind::Pair { lo, hi, .. } = *ctx.vreg(vreg)? {
        note_vreg(ctx, lifetimes, lo, position)?;
        note_vreg(ctx, lifetimes, hi, position)?;
    }
    Ok(())
}

fn collect_value_vregs(
    ctx: &AsmContext,
    lifetimes: &mut Vec<Option<Lifetime>>,
    value: &Value,
    position: usize,
) -> Result<()> {
    match value {
        Value::VirtualReg { vreg, .. } => note_vreg(ctx, lifetimes, *vreg, position)?,
        Value::Indirect {
            base: IndirectBase::Virtual(vreg),
            ..
        } => note_vreg(ctx, lifetimes, *vreg, position)?,
        Value::Stash(stash) => {
            let vreg = ctx.stash_vreg(*stash)?;
            note_vreg(ctx, lifetimes, vreg, position)?;
        }
        _ => {}
    }
    Ok(())
}

fn find_spill_slots(area: &mut Vec<bool>, qwords: usize, alignment: usize) -> usize {
    let alignment = alignment.max(1);
    let mut index = 0;
    loop {
        index = (index + alignment - 1) / alignment * alignment;
        if index + qwords > area.len() {
            area.resize(index + qwords, false);
        }
        if area[index..index + qwords].iter().all(|used| !used) {
            for slot in &mut area[index..index + qwords] {
                *slot = true;
            }
            return index;
        }
        index += alignment;
    }
}

struct Active {
    vreg: VregIdx,
    reg: PhysReg,
    end: usize,
}

/// Run allocation over the whole asmcmp program.
pub fn allocate_registers(
    ctx: &AsmContext,
    abi: &dyn Abi,
    frame: &mut StackFrame,
) -> Result<RegisterAllocator> {
    let mut linear_positions = FxHashMap::default();
    let mut order = Vec::new();
    for (position, idx) in ctx.instr_iter().enumerate() {
        linear_positions.insert(idx, position);
        order.push(idx);
    }

    let mut lifetimes: Vec<Option<Lifetime>> = vec![None; ctx.vreg_count()];
    for (position, idx) in order.iter().enumerate() {
        let instr = ctx.instr(*idx)?;
        for value in &instr.args {
            collect_value_vregs(ctx, &mut lifetimes, value, position)?;
        }
    }

    let mut allocations = vec![RegAllocation::Unallocated; ctx.vreg_count()];
    let mut used_registers = FxHashSet::default();
    let mut spill_area: Vec<bool> = Vec::new();
    let mut active: Vec<Active> = Vec::new();
    // Spill-slot regions owned by individual vregs, freed when the owning
    // interval expires.
    let mut owned_slots: FxHashMap<VregIdx, (usize, usize)> = FxHashMap::default();

    // Memory-pointer vregs never allocate.
    for vreg in ctx.vreg_iter() {
        if let VregKind::MemoryPointer { base, offset } = *ctx.vreg(vreg)? {
            allocations[vreg.index()] = RegAllocation::MemoryPointer { base, offset };
            used_registers.insert(base);
        }
    }

    // Defs ordered by interval begin, then vreg index.
    let mut defs: Vec<VregIdx> = ctx
        .vreg_iter()
        .filter(|v| lifetimes[v.index()].is_some())
        .collect();
    defs.sort_by_key(|v| (lifetimes[v.index()].unwrap().begin, v.index()));

    fn release(
        position: usize,
        active: &mut Vec<Active>,
        spill_area: &mut [bool],
        owned_slots: &mut FxHashMap<VregIdx, (usize, usize)>,
        lifetimes: &[Option<Lifetime>],
    ) {
        active.retain(|entry| entry.end >= position);
        let expired: Vec<VregIdx> = owned_slots
            .keys()
            .copied()
            .filter(|v| lifetimes[v.index()].map(|l| l.end < position).unwrap_or(true))
            .collect();
        for vreg in expired {
            if let Some((index, length)) = owned_slots.remove(&vreg) {
                for slot in &mut spill_area[index..index + length] {
                    *slot = false;
                }
            }
        }
    }

    for vreg in defs {
        let lifetime = lifetimes[vreg.index()].unwrap();
        release(
            lifetime.begin,
            &mut active,
            &mut spill_area,
            &mut owned_slots,
            &lifetimes,
        );

        match *ctx.vreg(vreg)? {
            VregKind::MemoryPointer { .. } => continue,
            VregKind::Pair { .. } => {
                // The halves allocate independently; the pair itself carries
                // no storage.
                continue;
            }
            VregKind::SpillSpace { qwords, alignment } => {
                let index = find_spill_slots(&mut spill_area, qwords as usize, alignment as usize);
                allocations[vreg.index()] = RegAllocation::SpillAreaIndirect {
                    index,
                    length: qwords as usize,
                };
                owned_slots.insert(vreg, (index, qwords as usize));
                continue;
            }
            VregKind::GeneralPurpose | VregKind::FloatingPoint => {}
        }

        let is_fp = matches!(*ctx.vreg(vreg)?, VregKind::FloatingPoint);
        let order: &[PhysReg] = if is_fp {
            abi.sse_allocation_order()
        } else {
            abi.register_allocation_order()
        };
        let reserved: &[PhysReg] = if is_fp { &RESERVED_SSE } else { &RESERVED_GP };

        let occupied: FxHashSet<PhysReg> = active.iter().map(|a| a.reg).collect();
        let candidate = order
            .iter()
            .copied()
            .find(|reg| !reserved.contains(reg) && !occupied.contains(reg));

        match candidate {
            Some(reg) => {
                allocations[vreg.index()] = RegAllocation::Register(reg);
                used_registers.insert(reg);
                active.push(Active {
                    vreg,
                    reg,
                    end: lifetime.end,
                });
            }
            None => {
                // Spill the interval that ends last, in the same bank.
                let victim_pos = active
                    .iter()
                    .enumerate()
                    .filter(|(_, a)| a.reg.is_floating_point() == is_fp)
                    .max_by_key(|(_, a)| a.end)
                    .map(|(i, _)| i);
                let (spilled, reg) = match victim_pos {
                    Some(pos) if active[pos].end > lifetime.end => {
                        let victim = active.remove(pos);
                        (victim.vreg, Some(victim.reg))
                    }
                    _ => (vreg, None),
                };
                let length = if is_fp { 2 } else { 1 };
                let index = find_spill_slots(&mut spill_area, length, length);
                allocations[spilled.index()] = RegAllocation::SpillAreaDirect { index, length };
                owned_slots.insert(spilled, (index, length));
                match reg {
                    Some(reg) => {
                        allocations[vreg.index()] = RegAllocation::Register(reg);
                        active.push(Active {
                            vreg,
                            reg,
                            end: lifetime.end,
                        });
                    }
                    None => {
                        // The new interval itself was spilled.
                    }
                }
            }
        }
    }

    frame.ensure_spill_area(spill_area.len() as u64);

    Ok(RegisterAllocator {
        allocations,
        lifetimes,
        linear_positions,
        used_registers,
        spill_area,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asmcmp::{AsmOpcode, OperandVariant};
    use crate::codegen::abi::SysVAmd64Abi;

    #[test]
    fn contiguous_intervals_and_register_reuse() {
        let mut ctx = AsmContext::new();
        let a = ctx.new_virtual_register(VregKind::GeneralPurpose);
        let b = ctx.new_virtual_register(VregKind::GeneralPurpose);
        ctx.append_instr(
            AsmOpcode::Mov,
            [Value::vreg(a), Value::Int(1), Value::None],
        );
        ctx.append_instr(
            AsmOpcode::Mov,
            [Value::vreg(b), Value::vreg(a), Value::None],
        );
        ctx.append_instr(
            AsmOpcode::Add,
            [Value::vreg(b), Value::Int(5), Value::None],
        );

        let mut frame = StackFrame::new();
        let ra = allocate_registers(&ctx, &SysVAmd64Abi, &mut frame).unwrap();
        let la = ra.lifetime_of(a).unwrap();
        let lb = ra.lifetime_of(b).unwrap();
        assert_eq!((la.begin, la.end), (0, 1));
        assert_eq!((lb.begin, lb.end), (1, 2));
        assert!(matches!(ra.allocation_of(a).unwrap(), RegAllocation::Register(_)));
        assert!(matches!(ra.allocation_of(b).unwrap(), RegAllocation::Register(_)));
    }

    #[test]
    fn pressure_forces_a_spill() {
        let mut ctx = AsmContext::new();
        let order_len = SysVAmd64Abi.register_allocation_order().len() - RESERVED_GP.len() + 2;
        let mut vregs = Vec::new();
        for i in 0..order_len {
            let v = ctx.new_virtual_register(VregKind::GeneralPurpose);
            ctx.append_instr(
                AsmOpcode::Mov,
                [Value::vreg(v), Value::Int(i as i64), Value::None],
            );
            vregs.push(v);
        }
        // One terminal use keeps every interval alive to the end.
        for v in &vregs {
            ctx.append_instr(
                AsmOpcode::Add,
                [
                    Value::vreg_variant(vregs[0], OperandVariant::W64),
                    Value::vreg(*v),
                    Value::None,
                ],
            );
        }

        let mut frame = StackFrame::new();
        let ra = allocate_registers(&ctx, &SysVAmd64Abi, &mut frame).unwrap();
        let spilled = vregs
            .iter()
            .filter(|v| {
                matches!(
                    ra.allocation_of(**v).unwrap(),
                    RegAllocation::SpillAreaDirect { .. }
                )
            })
            .count();
        assert!(spilled >= 1);
        assert!(frame.spill_area_qwords() >= 1);
    }

    #[test]
    fn spill_space_claims_area_directly() {
        let mut ctx = AsmContext::new();
        let space = ctx.new_spill_space(4, 2);
        ctx.append_instr(
            AsmOpcode::Lea,
            [
                Value::phreg(PhysReg::Rax),
                Value::vreg(space),
                Value::None,
            ],
        );
        let mut frame = StackFrame::new();
        let ra = allocate_registers(&ctx, &SysVAmd64Abi, &mut frame).unwrap();
        match ra.allocation_of(space).unwrap() {
            RegAllocation::SpillAreaIndirect { index, length } => {
                assert_eq!(*index % 2, 0);
                assert_eq!(*length, 4);
            }
            other => panic!("unexpected allocation: {other:?}"),
        }
        assert!(frame.spill_area_qwords() >= 4);
    }
}
