//! Textual assembly sink.
//!
//! The final stage of the back-end: instructions, labels, sections and data
//! directives become GNU assembler text. Intel syntax is the default; AT&T
//! output swaps operand order and prefixes registers and immediates.

use crate::error::{Error, Result};
use std::io::Write;

/// Assembly dialect.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum AsmSyntax {
    #[default]
    IntelNoprefix,
    Att,
}

/// Memory operand width keyword.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PtrWidth {
    Byte,
    Word,
    Dword,
    Qword,
    Tbyte,
    Xmmword,
}

impl PtrWidth {
    fn keyword(self) -> &'static str {
        match self {
            PtrWidth::Byte => "BYTE PTR",
            PtrWidth::Word => "WORD PTR",
            PtrWidth::Dword => "DWORD PTR",
            PtrWidth::Qword => "QWORD PTR",
            PtrWidth::Tbyte => "TBYTE PTR",
            PtrWidth::Xmmword => "XMMWORD PTR",
        }
    }
}

/// Data directive kinds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataKind {
    Byte,
    Word,
    Long,
    Quad,
    Ascii,
}

impl DataKind {
    fn directive(self) -> &'static str {
        match self {
            DataKind::Byte => ".byte",
            DataKind::Word => ".word",
            DataKind::Long => ".long",
            DataKind::Quad => ".quad",
            DataKind::Ascii => ".ascii",
        }
    }
}

/// A formatted instruction or data operand.
#[derive(Clone, Debug)]
pub enum Operand {
    Imm(i64),
    ImmU(u64),
    Reg(&'static str),
    /// An assembler label or symbol, quoted when it collides with a
    /// reserved word.
    Symbol(String),
    /// `lhs - rhs` label arithmetic for section length computations.
    LabelDiff { lhs: String, rhs: String },
    Indirect {
        width: Option<PtrWidth>,
        base: IndirectTarget,
        offset: i64,
        segment: Option<&'static str>,
    },
    Rip(String),
    X87(usize),
    StringLiteral(Vec<u8>),
}

#[derive(Clone, Debug)]
pub enum IndirectTarget {
    Register(&'static str),
    Label(String),
}

/// Words the target assembler claims for itself; symbols matching one are
/// quoted on output.
const RESERVED_IDENTIFIERS: &[&str] = &[
    "mod", "div", "and", "or", "xor", "not", "shl", "shr", "byte", "word", "dword", "qword",
    "tbyte", "ptr", "offset", "rip", "st",
];

fn quote_identifier(name: &str) -> String {
    if RESERVED_IDENTIFIERS.contains(&name.to_ascii_lowercase().as_str()) {
        format!("\"{name}\"")
    } else {
        name.to_string()
    }
}

/// Abstract sink consumed by the code generator and the DWARF emitter.
pub trait AsmSink {
    fn prologue(&mut self) -> Result<()>;
    fn newline(&mut self, count: usize) -> Result<()>;
    fn section(&mut self, name: &str) -> Result<()>;
    fn label(&mut self, name: &str) -> Result<()>;
    fn global(&mut self, name: &str) -> Result<()>;
    fn external(&mut self, name: &str) -> Result<()>;
    fn align(&mut self, alignment: u64) -> Result<()>;
    fn data(&mut self, kind: DataKind, operands: &[Operand]) -> Result<()>;
    fn zerodata(&mut self, length: u64) -> Result<()>;
    fn bindata(&mut self, kind: DataKind, bytes: &[u8]) -> Result<()>;
    fn instr(&mut self, mnemonic: &str, operands: &[Operand]) -> Result<()>;
    /// Raw user-provided inline assembly text.
    fn inline_assembly(&mut self, text: &str) -> Result<()>;
}

/// The GNU assembler text generator.
pub struct XasmGen<W: Write> {
    out: W,
    syntax: AsmSyntax,
}

impl<W: Write> XasmGen<W> {
    pub fn new(out: W, syntax: AsmSyntax) -> Self {
        Self { out, syntax }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn io(result: std::io::Result<()>) -> Result<()> {
        result.map_err(|err| Error::OsError(err.to_string()))
    }

    fn format_operand(&self, operand: &Operand) -> String {
        let att = self.syntax == AsmSyntax::Att;
        match operand {
            Operand::Imm(value) => {
                if att {
                    format!("${value}")
                } else {
                    format!("{value}")
                }
            }
            Operand::ImmU(value) => {
                if att {
                    format!("${value}")
                } else {
                    format!("{value}")
                }
            }
            Operand::Reg(name) => {
                if att {
                    format!("%{name}")
                } else {
                    (*name).to_string()
                }
            }
            Operand::Symbol(name) => quote_identifier(name),
            Operand::LabelDiff { lhs, rhs } => format!("{} - {}", quote_identifier(lhs), quote_identifier(rhs)),
            Operand::Indirect {
                width,
                base,
                offset,
                segment,
            } => {
                let base_text = match base {
                    IndirectTarget::Register(reg) => {
                        if att {
                            format!("%{reg}")
                        } else {
                            (*reg).to_string()
                        }
                    }
                    IndirectTarget::Label(name) => quote_identifier(name),
                };
                let segment_prefix = segment
                    .map(|s| if att { format!("%{s}:") } else { format!("{s}:") })
                    .unwrap_or_default();
                if att {
                    if *offset != 0 {
                        format!("{segment_prefix}{offset}({base_text})")
                    } else {
                        format!("{segment_prefix}({base_text})")
                    }
                } else {
                    let width_prefix = width.map(|w| format!("{} ", w.keyword())).unwrap_or_default();
                    match offset.cmp(&0) {
                        std::cmp::Ordering::Greater => {
                            format!("{width_prefix}{segment_prefix}[{base_text} + {offset}]")
                        }
                        std::cmp::Ordering::Less => {
                            format!("{width_prefix}{segment_prefix}[{base_text} - {}]", -offset)
                        }
                        std::cmp::Ordering::Equal => {
                            format!("{width_prefix}{segment_prefix}[{base_text}]")
                        }
                    }
                }
            }
            Operand::Rip(name) => {
                if att {
                    format!("{}(%rip)", quote_identifier(name))
                } else {
                    format!("{}[rip]", quote_identifier(name))
                }
            }
            Operand::X87(index) => {
                if att {
                    format!("%st({index})")
                } else {
                    format!("st({index})")
                }
            }
            Operand::StringLiteral(bytes) => {
                let mut text = String::from("\"");
                for byte in bytes {
                    match byte {
                        b'"' => text.push_str("\\\""),
                        b'\\' => text.push_str("\\\\"),
                        b'\n' => text.push_str("\\n"),
                        b'\t' => text.push_str("\\t"),
                        0x20..=0x7e => text.push(*byte as char),
                        other => text.push_str(&format!("\\{other:03o}")),
                    }
                }
                text.push('"');
                text
            }
        }
    }
}

impl<W: Write> AsmSink for XasmGen<W> {
    fn prologue(&mut self) -> Result<()> {
        match self.syntax {
            AsmSyntax::IntelNoprefix => {
                Self::io(writeln!(self.out, ".intel_syntax noprefix"))?;
            }
            AsmSyntax::Att => {
                Self::io(writeln!(self.out, ".att_syntax"))?;
            }
        }
        Ok(())
    }

    fn newline(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            Self::io(writeln!(self.out))?;
        }
        Ok(())
    }

    fn section(&mut self, name: &str) -> Result<()> {
        Self::io(writeln!(self.out, ".section {name}"))
    }

    fn label(&mut self, name: &str) -> Result<()> {
        Self::io(writeln!(self.out, "{}:", quote_identifier(name)))
    }

    fn global(&mut self, name: &str) -> Result<()> {
        Self::io(writeln!(self.out, ".global {}", quote_identifier(name)))
    }

    fn external(&mut self, name: &str) -> Result<()> {
        Self::io(writeln!(self.out, ".extern {}", quote_identifier(name)))
    }

    fn align(&mut self, alignment: u64) -> Result<()> {
        Self::io(writeln!(self.out, ".align {alignment}"))
    }

    fn data(&mut self, kind: DataKind, operands: &[Operand]) -> Result<()> {
        let rendered: Vec<String> = operands.iter().map(|op| self.format_operand(op)).collect();
        Self::io(writeln!(
            self.out,
            "{} {}",
            kind.directive(),
            rendered.join(", ")
        ))
    }

    fn zerodata(&mut self, length: u64) -> Result<()> {
        Self::io(writeln!(self.out, ".zero {length}"))
    }

    fn bindata(&mut self, kind: DataKind, bytes: &[u8]) -> Result<()> {
        let rendered: Vec<String> = bytes.iter().map(|b| b.to_string()).collect();
        Self::io(writeln!(
            self.out,
            "{} {}",
            kind.directive(),
            rendered.join(", ")
        ))
    }

    fn instr(&mut self, mnemonic: &str, operands: &[Operand]) -> Result<()> {
        if operands.is_empty() {
            return Self::io(writeln!(self.out, "    {mnemonic}"));
        }
        let rendered: Vec<String> = match self.syntax {
            AsmSyntax::IntelNoprefix => {
                operands.iter().map(|op| self.format_operand(op)).collect()
            }
            AsmSyntax::Att => operands
                .iter()
                .rev()
                .map(|op| self.format_operand(op))
                .collect(),
        };
        Self::io(writeln!(
            self.out,
            "    {} {}",
            mnemonic,
            rendered.join(", ")
        ))
    }

    fn inline_assembly(&mut self, text: &str) -> Result<()> {
        Self::io(writeln!(self.out, "{text}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(f: impl FnOnce(&mut XasmGen<Vec<u8>>)) -> String {
        let mut sink = XasmGen::new(Vec::new(), AsmSyntax::IntelNoprefix);
        f(&mut sink);
        String::from_utf8(sink.into_inner()).unwrap()
    }

    #[test]
    fn intel_memory_operand_widths() {
        let text = render(|sink| {
            sink.instr(
                "mov",
                &[
                    Operand::Indirect {
                        width: Some(PtrWidth::Qword),
                        base: IndirectTarget::Register("rbp"),
                        offset: -16,
                        segment: None,
                    },
                    Operand::Reg("rax"),
                ],
            )
            .unwrap();
        });
        assert_eq!(text.trim(), "mov QWORD PTR [rbp - 16], rax");
    }

    #[test]
    fn reserved_identifiers_are_quoted() {
        let text = render(|sink| {
            sink.label("mod").unwrap();
            sink.global("mod").unwrap();
        });
        assert!(text.contains("\"mod\":"));
        assert!(text.contains(".global \"mod\""));
    }

    #[test]
    fn att_swaps_operands_and_prefixes() {
        let mut sink = XasmGen::new(Vec::new(), AsmSyntax::Att);
        sink.instr("mov", &[Operand::Reg("rax"), Operand::Imm(42)])
            .unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(text.trim(), "mov $42, %rax");
    }

    #[test]
    fn string_literals_are_escaped() {
        let text = render(|sink| {
            sink.data(
                DataKind::Ascii,
                &[Operand::StringLiteral(b"a\"b\n\0".to_vec())],
            )
            .unwrap();
        });
        assert_eq!(text.trim(), ".ascii \"a\\\"b\\n\\000\"");
    }
}
