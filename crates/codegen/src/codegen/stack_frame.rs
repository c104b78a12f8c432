//! Per-function stack frame bookkeeping.
//!
//! The frame grows monotonically while code is generated; the final layout
//! is computed once after devirtualization when every requirement is known.

use crate::asmcmp::PhysReg;
use crate::codegen::abi::QWORD;

fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    (value + alignment - 1) & !(alignment - 1)
}

/// Register save area sizes of the System V vararg convention.
pub const VARARG_GP_SAVE: u64 = 6 * QWORD;
pub const VARARG_SSE_SAVE: u64 = 8 * 16;

#[derive(Default)]
pub struct StackFrame {
    preserved_regs: Vec<PhysReg>,
    spill_area_qwords: u64,
    local_area_size: u64,
    local_area_alignment: u64,
    vararg_save_area: bool,
    x87_control_word_saved: bool,
    mxcsr_saved: bool,
    omit_frame_pointer: bool,
}

/// Offsets relative to the frame base pointer (negative grows downward).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameLayout {
    pub preserved_size: u64,
    pub x87cw_offset: Option<i64>,
    pub mxcsr_offset: Option<i64>,
    pub spill_offset: i64,
    pub local_offset: i64,
    pub vararg_offset: i64,
    /// Total stack adjustment below the saved registers.
    pub allocation_size: u64,
}

impl StackFrame {
    pub fn new() -> Self {
        Self {
            local_area_alignment: 1,
            ..Self::default()
        }
    }

    /// Mark a callee-saved register as used; it is pushed in the prologue.
    pub fn preserve_register(&mut self, reg: PhysReg) {
        if !self.preserved_regs.contains(&reg) {
            self.preserved_regs.push(reg);
        }
    }

    pub fn preserved_regs(&self) -> &[PhysReg] {
        &self.preserved_regs
    }

    /// Grow the spill area to hold at least `qwords` slots.
    pub fn ensure_spill_area(&mut self, qwords: u64) {
        self.spill_area_qwords = self.spill_area_qwords.max(qwords);
    }

    pub fn spill_area_qwords(&self) -> u64 {
        self.spill_area_qwords
    }

    /// Allocate a local variable; returns its byte offset within the local
    /// area.
    pub fn allocate_local(&mut self, size: u64, alignment: u64) -> u64 {
        self.local_area_size = align_up(self.local_area_size, alignment.max(1));
        let offset = self.local_area_size;
        self.local_area_size += size;
        self.local_area_alignment = self.local_area_alignment.max(alignment.max(1));
        offset
    }

    pub fn enable_vararg_save_area(&mut self) {
        self.vararg_save_area = true;
    }

    pub fn vararg_save_area_enabled(&self) -> bool {
        self.vararg_save_area
    }

    pub fn require_x87_control_word(&mut self) {
        self.x87_control_word_saved = true;
    }

    pub fn x87_control_word_saved(&self) -> bool {
        self.x87_control_word_saved
    }

    pub fn require_mxcsr(&mut self) {
        self.mxcsr_saved = true;
    }

    pub fn mxcsr_saved(&self) -> bool {
        self.mxcsr_saved
    }

    pub fn set_omit_frame_pointer(&mut self, omit: bool) {
        self.omit_frame_pointer = omit;
    }

    pub fn omit_frame_pointer(&self) -> bool {
        self.omit_frame_pointer
    }

    /// Final layout. Regions below the frame pointer, top down: preserved
    /// registers, x87/mxcsr save slots, spill area, local variables, vararg
    /// register save area.
    pub fn layout(&self) -> FrameLayout {
        let preserved_size = self.preserved_regs.len() as u64 * QWORD;
        let mut offset: i64 = -(preserved_size as i64);

        let x87cw_offset = if self.x87_control_word_saved {
            offset -= QWORD as i64;
            Some(offset)
        } else {
            None
        };
        let mxcsr_offset = if self.mxcsr_saved {
            offset -= QWORD as i64;
            Some(offset)
        } else {
            None
        };

        offset -= (self.spill_area_qwords * QWORD) as i64;
        offset = -(align_up((-offset) as u64, 2 * QWORD) as i64);
        let spill_offset = offset;

        offset -= align_up(self.local_area_size, self.local_area_alignment) as i64;
        offset = -(align_up((-offset) as u64, self.local_area_alignment.max(QWORD)) as i64);
        let local_offset = offset;

        let vararg_offset = if self.vararg_save_area {
            offset -= (VARARG_GP_SAVE + VARARG_SSE_SAVE) as i64;
            offset = -(align_up((-offset) as u64, 2 * QWORD) as i64);
            offset
        } else {
            offset
        };

        let total = align_up((-offset) as u64, 2 * QWORD);
        FrameLayout {
            preserved_size,
            x87cw_offset,
            mxcsr_offset,
            spill_offset,
            local_offset,
            vararg_offset,
            allocation_size: total - preserved_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_grows_monotonically() {
        let mut frame = StackFrame::new();
        frame.preserve_register(PhysReg::Rbx);
        frame.preserve_register(PhysReg::Rbx);
        assert_eq!(frame.preserved_regs().len(), 1);

        frame.ensure_spill_area(4);
        frame.ensure_spill_area(2);
        assert_eq!(frame.spill_area_qwords(), 4);

        let a = frame.allocate_local(12, 4);
        let b = frame.allocate_local(8, 8);
        assert_eq!(a, 0);
        assert_eq!(b, 16);

        let layout = frame.layout();
        assert!(layout.allocation_size >= 4 * QWORD + 24);
        assert!(layout.spill_offset < 0);
        assert!(layout.local_offset < layout.spill_offset);
    }
}
