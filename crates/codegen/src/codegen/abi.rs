//! Target ABI description.
//!
//! The ABI is a trait so the back-end core stays target-shaped; only the
//! System V AMD64 variant is realized. It answers three questions: how a
//! type is laid out, where parameters and results live, and which registers
//! the allocator may use in which order.

use crate::asmcmp::PhysReg;
use crate::error::{Error, Result};
use crate::ir::{IrType, TypeEntry};

pub const QWORD: u64 = 8;

/// Parameter classification of a single type entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParamClass {
    Integer,
    Sse,
    X87,
    Memory,
}

/// Resolved location of one parameter.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParamLocation {
    Register(PhysReg),
    SseRegister(PhysReg),
    /// Byte offset into the caller's argument area (relative to the frame
    /// base after the return address).
    Stack(u64),
}

/// Size and alignment of one type entry, plus member offsets for
/// aggregates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeEntryLayout {
    pub size: u64,
    pub alignment: u64,
    /// Byte offsets of direct members, for struct/union/array heads.
    pub member_offsets: Vec<u64>,
}

/// Abstract target ABI.
pub trait Abi {
    fn entry_layout(&self, ty: &IrType, index: usize) -> Result<TypeEntryLayout>;
    fn classify_entry(&self, ty: &IrType, index: usize) -> Result<ParamClass>;
    fn classify_parameters(&self, params: &IrType) -> Result<Vec<ParamLocation>>;
    fn return_register(&self, result: &IrType) -> Result<Option<ParamLocation>>;
    fn register_allocation_order(&self) -> &'static [PhysReg];
    fn sse_allocation_order(&self) -> &'static [PhysReg];
    fn callee_saved(&self) -> &'static [PhysReg];
    fn caller_saved(&self) -> &'static [PhysReg];
}

/// The System V AMD64 psABI.
pub struct SysVAmd64Abi;

const GP_ALLOCATION_ORDER: [PhysReg; 14] = [
    PhysReg::Rax,
    PhysReg::Rcx,
    PhysReg::Rdx,
    PhysReg::Rsi,
    PhysReg::Rdi,
    PhysReg::R8,
    PhysReg::R9,
    PhysReg::R10,
    PhysReg::R11,
    PhysReg::Rbx,
    PhysReg::R12,
    PhysReg::R13,
    PhysReg::R14,
    PhysReg::R15,
];

const SSE_ALLOCATION_ORDER: [PhysReg; 16] = PhysReg::FLOATING_POINT;

const CALLEE_SAVED: [PhysReg; 6] = [
    PhysReg::Rbx,
    PhysReg::R12,
    PhysReg::R13,
    PhysReg::R14,
    PhysReg::R15,
    PhysReg::Rbp,
];

const CALLER_SAVED: [PhysReg; 25] = [
    PhysReg::Rax,
    PhysReg::Rcx,
    PhysReg::Rdx,
    PhysReg::Rsi,
    PhysReg::Rdi,
    PhysReg::R8,
    PhysReg::R9,
    PhysReg::R10,
    PhysReg::R11,
    PhysReg::Xmm0,
    PhysReg::Xmm1,
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

pub const INTEGER_PARAM_REGS: [PhysReg; 6] = [
    PhysReg::Rdi,
    PhysReg::Rsi,
    PhysReg::Rdx,
    PhysReg::Rcx,
    PhysReg::R8,
    PhysReg::R9,
];

pub const SSE_PARAM_REGS: [PhysReg; 8] = [
    PhysReg::Xmm0,
    PhysReg::Xmm1,
    PhysReg::Xmm2,
    PhysReg::Xmm3,
    PhysReg::Xmm4,
    PhysReg::Xmm5,
    PhysReg::Xmm6,
    PhysReg::Xmm7,
];

fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two() || alignment == 0);
    if alignment == 0 {
        return value;
    }
    (value + alignment - 1) & !(alignment - 1)
}

impl SysVAmd64Abi {
    fn scalar_layout(entry: &TypeEntry) -> Option<(u64, u64)> {
        let (size, alignment) = match entry {
            TypeEntry::Int8 | TypeEntry::Bool | TypeEntry::Char => (1, 1),
            TypeEntry::Int16 | TypeEntry::Short => (2, 2),
            TypeEntry::Int32 | TypeEntry::Int => (4, 4),
            TypeEntry::Int64 | TypeEntry::Long | TypeEntry::Word => (8, 8),
            TypeEntry::BitInt(width) => {
                let bits = *width as u64;
                if bits <= 8 {
                    (1, 1)
                } else if bits <= 16 {
                    (2, 2)
                } else if bits <= 32 {
                    (4, 4)
                } else if bits <= 64 {
                    (8, 8)
                } else {
                    (align_up(bits, 64) / 8, 8)
                }
            }
            TypeEntry::Float32 => (4, 4),
            TypeEntry::Float64 => (8, 8),
            TypeEntry::LongDouble => (16, 16),
            TypeEntry::ComplexFloat32 => (8, 4),
            TypeEntry::ComplexFloat64 => (16, 8),
            TypeEntry::ComplexLongDouble => (32, 16),
            TypeEntry::Builtin => (24, 8),
            _ => return None,
        };
        Some((size, alignment))
    }
}

impl Abi for SysVAmd64Abi {
    fn entry_layout(&self, ty: &IrType, index: usize) -> Result<TypeEntryLayout> {
        let entry = ty.at(index)?;
        if let Some((size, alignment)) = Self::scalar_layout(entry) {
            return Ok(TypeEntryLayout {
                size,
                alignment,
                member_offsets: Vec::new(),
            });
        }
        match *entry {
            TypeEntry::Struct { fields } => {
                let mut offset = 0u64;
                let mut alignment = 1u64;
                let mut member_offsets = Vec::with_capacity(fields as usize);
                let mut member = index + 1;
                for _ in 0..fields {
                    let layout = self.entry_layout(ty, member)?;
                    offset = align_up(offset, layout.alignment);
                    member_offsets.push(offset);
                    offset += layout.size;
                    alignment = alignment.max(layout.alignment);
                    member += ty.entry_span(member)?;
                }
                Ok(TypeEntryLayout {
                    size: align_up(offset, alignment),
                    alignment,
                    member_offsets,
                })
            }
            TypeEntry::Union { fields } => {
                let mut size = 0u64;
                let mut alignment = 1u64;
                let mut member_offsets = Vec::with_capacity(fields as usize);
                let mut member = index + 1;
                for _ in 0..fields {
                    let layout = self.entry_layout(ty, member)?;
                    member_offsets.push(0);
                    size = size.max(layout.size);
                    alignment = alignment.max(layout.alignment);
                    member += ty.entry_span(member)?;
                }
                Ok(TypeEntryLayout {
                    size: align_up(size, alignment),
                    alignment,
                    member_offsets,
                })
            }
            TypeEntry::Array { length } => {
                let element = self.entry_layout(ty, index + 1)?;
                Ok(TypeEntryLayout {
                    size: element.size * length,
                    alignment: element.alignment,
                    member_offsets: (0..length).map(|i| i * element.size).collect(),
                })
            }
            _ => Err(Error::InvalidState("unhandled type entry layout")),
        }
    }

    fn classify_entry(&self, ty: &IrType, index: usize) -> Result<ParamClass> {
        let entry = ty.at(index)?;
        Ok(match entry {
            TypeEntry::Float32 | TypeEntry::Float64 => ParamClass::Sse,
            TypeEntry::LongDouble => ParamClass::X87,
            TypeEntry::ComplexFloat32 | TypeEntry::ComplexFloat64 => ParamClass::Sse,
            TypeEntry::ComplexLongDouble => ParamClass::Memory,
            TypeEntry::Struct { .. } | TypeEntry::Union { .. } | TypeEntry::Array { .. } => {
                let layout = self.entry_layout(ty, index)?;
                if layout.size <= 2 * QWORD {
                    // Small aggregates of integer members travel in
                    // registers; mixed SSE classification is refined by the
                    // caller when all members are floating point.
                    ParamClass::Integer
                } else {
                    ParamClass::Memory
                }
            }
            TypeEntry::BitInt(width) if *width > 64 => ParamClass::Memory,
            _ => ParamClass::Integer,
        })
    }

    fn classify_parameters(&self, params: &IrType) -> Result<Vec<ParamLocation>> {
        let mut locations = Vec::new();
        let mut next_int = 0usize;
        let mut next_sse = 0usize;
        let mut stack_offset = 0u64;
        let mut index = 0usize;
        while index < params.len() {
            let class = self.classify_entry(params, index)?;
            let layout = self.entry_layout(params, index)?;
            let location = match class {
                ParamClass::Integer if next_int < INTEGER_PARAM_REGS.len() => {
                    let reg = INTEGER_PARAM_REGS[next_int];
                    next_int += 1;
                    ParamLocation::Register(reg)
                }
                ParamClass::Sse if next_sse < SSE_PARAM_REGS.len() => {
                    let reg = SSE_PARAM_REGS[next_sse];
                    next_sse += 1;
                    ParamLocation::SseRegister(reg)
                }
                _ => {
                    stack_offset = align_up(stack_offset, layout.alignment.max(QWORD));
                    let location = ParamLocation::Stack(stack_offset);
                    stack_offset += align_up(layout.size, QWORD);
                    location
                }
            };
            locations.push(location);
            index += params.entry_span(index)?;
        }
        Ok(locations)
    }

    fn return_register(&self, result: &IrType) -> Result<Option<ParamLocation>> {
        if result.is_empty() {
            return Ok(None);
        }
        Ok(Some(match self.classify_entry(result, 0)? {
            ParamClass::Sse => ParamLocation::SseRegister(PhysReg::Xmm0),
            ParamClass::X87 => ParamLocation::Register(PhysReg::Rax),
            ParamClass::Memory => ParamLocation::Register(PhysReg::Rax),
            ParamClass::Integer => ParamLocation::Register(PhysReg::Rax),
        }))
    }

    fn register_allocation_order(&self) -> &'static [PhysReg] {
        &GP_ALLOCATION_ORDER
    }

    fn sse_allocation_order(&self) -> &'static [PhysReg] {
        &SSE_ALLOCATION_ORDER
    }

    fn callee_saved(&self) -> &'static [PhysReg] {
        &CALLEE_SAVED
    }

    fn caller_saved(&self) -> &'static [PhysReg] {
        &CALLER_SAVED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_layout_and_offsets() {
        let abi = SysVAmd64Abi;
        let mut ty = IrType::new();
        ty.append(TypeEntry::Struct { fields: 3 });
        ty.append(TypeEntry::Char);
        ty.append(TypeEntry::Int);
        ty.append(TypeEntry::Long);
        let layout = abi.entry_layout(&ty, 0).unwrap();
        assert_eq!(layout.member_offsets, vec![0, 4, 8]);
        assert_eq!(layout.size, 16);
        assert_eq!(layout.alignment, 8);
    }

    #[test]
    fn parameter_registers_run_out_onto_the_stack() {
        let abi = SysVAmd64Abi;
        let mut params = IrType::new();
        for _ in 0..8 {
            params.append(TypeEntry::Long);
        }
        let locations = abi.classify_parameters(&params).unwrap();
        assert_eq!(locations.len(), 8);
        assert_eq!(locations[0], ParamLocation::Register(PhysReg::Rdi));
        assert_eq!(locations[5], ParamLocation::Register(PhysReg::R9));
        assert_eq!(locations[6], ParamLocation::Stack(0));
        assert_eq!(locations[7], ParamLocation::Stack(8));
    }

    #[test]
    fn wide_bitint_is_memory_class() {
        let abi = SysVAmd64Abi;
        let mut ty = IrType::new();
        ty.append(TypeEntry::BitInt(200));
        assert_eq!(abi.classify_entry(&ty, 0).unwrap(), ParamClass::Memory);
        assert_eq!(abi.entry_layout(&ty, 0).unwrap().size, 32);
    }
}
