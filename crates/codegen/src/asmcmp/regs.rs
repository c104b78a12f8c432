//! AMD64 physical registers.

/// A physical register: the sixteen general-purpose registers plus the
/// sixteen SSE registers. Width selection happens at formatting time via
/// the operand variant.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PhysReg {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rsp,
    Rbp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    Xmm0,
    Xmm1,
    Xmm2,
    Xmm3,
    Xmm4,
    Xmm5,
    Xmm6,
    Xmm7,
    Xmm8,
    Xmm9,
    Xmm10,
    Xmm11,
    Xmm12,
    Xmm13,
    Xmm14,
    Xmm15,
}

impl PhysReg {
    pub fn is_floating_point(self) -> bool {
        matches!(
            self,
            PhysReg::Xmm0
                | PhysReg::Xmm1
                | PhysReg::Xmm2
                | PhysReg::Xmm3
                | PhysReg::Xmm4
                | PhysReg::Xmm5
                | PhysReg::Xmm6
                | PhysReg::Xmm7
                | PhysReg::Xmm8
                | PhysReg::Xmm9
                | PhysReg::Xmm10
                | PhysReg::Xmm11
                | PhysReg::Xmm12
                | PhysReg::Xmm13
                | PhysReg::Xmm14
                | PhysReg::Xmm15
        )
    }

    /// 64-bit (or xmm) register name.
    pub fn name64(self) -> &'static str {
        match self {
            PhysReg::Rax => "rax",
            PhysReg::Rbx => "rbx",
            PhysReg::Rcx => "rcx",
            PhysReg::Rdx => "rdx",
            PhysReg::Rsi => "rsi",
            PhysReg::Rdi => "rdi",
            PhysReg::Rsp => "rsp",
            PhysReg::Rbp => "rbp",
            PhysReg::R8 => "r8",
            PhysReg::R9 => "r9",
            PhysReg::R10 => "r10",
            PhysReg::R11 => "r11",
            PhysReg::R12 => "r12",
            PhysReg::R13 => "r13",
            PhysReg::R14 => "r14",
            PhysReg::R15 => "r15",
            PhysReg::Xmm0 => "xmm0",
            PhysReg::Xmm1 => "xmm1",
            PhysReg::Xmm2 => "xmm2",
            PhysReg::Xmm3 => "xmm3",
            PhysReg::Xmm4 => "xmm4",
            PhysReg::Xmm5 => "xmm5",
            PhysReg::Xmm6 => "xmm6",
            PhysReg::Xmm7 => "xmm7",
            PhysReg::Xmm8 => "xmm8",
            PhysReg::Xmm9 => "xmm9",
            PhysReg::Xmm10 => "xmm10",
            PhysReg::Xmm11 => "xmm11",
            PhysReg::Xmm12 => "xmm12",
            PhysReg::Xmm13 => "xmm13",
            PhysReg::Xmm14 => "xmm14",
            PhysReg::Xmm15 => "xmm15",
        }
    }

    pub fn name32(self) -> &'static str {
        match self {
            PhysReg::Rax => "eax",
            PhysReg::Rbx => "ebx",
            PhysReg::Rcx => "ecx",
            PhysReg::Rdx => "edx",
            PhysReg::Rsi => "esi",
            PhysReg::Rdi => "edi",
            PhysReg::Rsp => "esp",
            PhysReg::Rbp => "ebp",
            PhysReg::R8 => "r8d",
            PhysReg::R9 => "r9d",
            PhysReg::R10 => "r10d",
            PhysReg::R11 => "r11d",
            PhysReg::R12 => "r12d",
            PhysReg::R13 => "r13d",
            PhysReg::R14 => "r14d",
            PhysReg::R15 => "r15d",
            _ => self.name64(),
        }
    }

    pub fn name16(self) -> &'static str {
        match self {
            PhysReg::Rax => "ax",
            PhysReg::Rbx => "bx",
            PhysReg::Rcx => "cx",
            PhysReg::Rdx => "dx",
            PhysReg::Rsi => "si",
            PhysReg::Rdi => "di",
            PhysReg::Rsp => "sp",
            PhysReg::Rbp => "bp",
            PhysReg::R8 => "r8w",
            PhysReg::R9 => "r9w",
            PhysReg::R10 => "r10w",
            PhysReg::R11 => "r11w",
            PhysReg::R12 => "r12w",
            PhysReg::R13 => "r13w",
            PhysReg::R14 => "r14w",
            PhysReg::R15 => "r15w",
            _ => self.name64(),
        }
    }

    pub fn name8(self) -> &'static str {
        match self {
            PhysReg::Rax => "al",
            PhysReg::Rbx => "bl",
            PhysReg::Rcx => "cl",
            PhysReg::Rdx => "dl",
            PhysReg::Rsi => "sil",
            PhysReg::Rdi => "dil",
            PhysReg::Rsp => "spl",
            PhysReg::Rbp => "bpl",
            PhysReg::R8 => "r8b",
            PhysReg::R9 => "r9b",
            PhysReg::R10 => "r10b",
            PhysReg::R11 => "r11b",
            PhysReg::R12 => "r12b",
            PhysReg::R13 => "r13b",
            PhysReg::R14 => "r14b",
            PhysReg::R15 => "r15b",
            _ => self.name64(),
        }
    }

    pub const GENERAL_PURPOSE: [PhysReg; 16] = [
        PhysReg::Rax,
        PhysReg::Rbx,
        PhysReg::Rcx,
        PhysReg::Rdx,
        PhysReg::Rsi,
        PhysReg::Rdi,
        PhysReg::Rsp,
        PhysReg::Rbp,
        PhysReg::R8,
        PhysReg::R9,
        PhysReg::R10,
        PhysReg::R11,
        PhysReg::R12,
        PhysReg::R13,
        PhysReg::R14,
        PhysReg::R15,
    ];

    pub const FLOATING_POINT: [PhysReg; 16] = [
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
}

/// Segment override prefix.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Segment {
    Fs,
    Gs,
}

impl Segment {
    pub fn name(self) -> &'static str {
        match self {
            Segment::Fs => "fs",
            Segment::Gs => "gs",
        }
    }
}
