//! DWARF debug information emission.
//!
//! Four sections are generated in order: `.debug_abbrev`, `.debug_info`,
//! `.debug_line` and `.debug_loclists`, each bracketed by begin/end labels
//! so the assembler computes lengths. Entry kinds get one abbreviation
//! each; info entries reference them by index. IR code offsets recorded in
//! the debug entry tree resolve to assembly labels through the per-function
//! maps produced by the code generator.

pub mod leb128;

use crate::error::{Error, Result};
use crate::ir::{
    DebugAttrTag, DebugAttrValue, DebugEntryId, DebugEntryTag, IrModule,
};
use crate::opt::debug::VariableId;
use crate::xasmgen::{AsmSink, DataKind, Operand};
use gimli::constants as dw;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

pub const DEBUG_ABBREV_BEGIN: &str = "__kefir_debug_abbrev_section_begin";
pub const DEBUG_INFO_SECTION: &str = "__kefir_debug_info_section";
pub const DEBUG_INFO_BEGIN: &str = "__kefir_debug_info_section_begin";
pub const DEBUG_INFO_END: &str = "__kefir_debug_info_section_end";
pub const DEBUG_LINES_BEGIN: &str = "__kefir_debug_lines_section_begin";
pub const DEBUG_LOCLISTS_BEGIN: &str = "__kefir_debug_loclists_section_begin";
pub const DEBUG_LOCLISTS_END: &str = "__kefir_debug_loclists_section_end";
pub const TEXT_BEGIN: &str = "__kefir_text_section_begin";
pub const TEXT_END: &str = "__kefir_text_section_end";

const DWARF_VERSION: u16 = 5;
const ADDRESS_SIZE: u8 = 8;

/// Post-codegen location of a local variable.
#[derive(Clone, Debug)]
pub enum VarLocation {
    /// Frame-pointer-relative storage.
    FrameOffset(i64),
    /// DWARF register number.
    Register(u16),
}

/// Per-function artifacts the emitter cross-references: label names for IR
/// code offsets and variable allocation results.
#[derive(Clone, Debug, Default)]
pub struct FunctionDebugArtifacts {
    pub name: String,
    pub begin_label: String,
    pub end_label: String,
    /// IR code index → bound assembly label, ascending.
    pub ir_labels: BTreeMap<usize, String>,
    pub variables: FxHashMap<VariableId, VarLocation>,
    pub subprogram: Option<DebugEntryId>,
}

impl FunctionDebugArtifacts {
    /// Assembly label for an IR code offset: the first label at or past the
    /// offset, else the function end.
    pub fn resolve_ir_index(&self, index: usize) -> &str {
        self.ir_labels
            .range(index..)
            .next()
            .map(|(_, label)| label.as_str())
            .unwrap_or(&self.end_label)
    }
}

/// DWARF register numbers of the System V AMD64 mapping.
pub fn dwarf_regno(reg: crate::asmcmp::PhysReg) -> u16 {
    use crate::asmcmp::PhysReg::*;
    match reg {
        Rax => 0,
        Rdx => 1,
        Rcx => 2,
        Rbx => 3,
        Rsi => 4,
        Rdi => 5,
        Rbp => 6,
        Rsp => 7,
        R8 => 8,
        R9 => 9,
        R10 => 10,
        R11 => 11,
        R12 => 12,
        R13 => 13,
        R14 => 14,
        R15 => 15,
        Xmm0 => 17,
        Xmm1 => 18,
        Xmm2 => 19,
        Xmm3 => 20,
        Xmm4 => 21,
        Xmm5 => 22,
        Xmm6 => 23,
        Xmm7 => 24,
        Xmm8 => 25,
        Xmm9 => 26,
        Xmm10 => 27,
        Xmm11 => 28,
        Xmm12 => 29,
        Xmm13 => 30,
        Xmm14 => 31,
        Xmm15 => 32,
    }
}

/// Abbreviation table indices, one per entry kind.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Abbrev {
    CompileUnit = 1,
    Subprogram = 2,
    LexicalBlock = 3,
    FormalParameter = 4,
    LocalVariable = 5,
    BaseType = 6,
    PointerType = 7,
    Typedef = 8,
    StructureType = 9,
    UnionType = 10,
    Member = 11,
    ArrayType = 12,
    Subrange = 13,
    EnumerationType = 14,
    Enumerator = 15,
    SubroutineType = 16,
    GlobalVariable = 17,
}

pub struct DwarfEmitter<'a> {
    sink: &'a mut dyn AsmSink,
    ir: &'a IrModule,
    functions: &'a [FunctionDebugArtifacts],
    producer: &'a str,
    next_info_entry: u64,
    /// Lazily emitted type entries, memoized by debug entry id.
    type_entries: FxHashMap<DebugEntryId, u64>,
    pending_types: Vec<(DebugEntryId, u64)>,
    next_loclist_entry: u64,
    /// Variable entry → loclist label id, filled by the info pass and
    /// consumed by the loclists pass.
    loclists: Vec<(DebugEntryId, u64, FunctionDebugArtifacts)>,
}

fn info_entry_label(id: u64) -> String {
    format!("__kefir_debug_info_section_entry_{id}")
}

fn loclist_entry_label(id: u64) -> String {
    format!("__kefir_debug_loclist_section_entry_{id}")
}

impl<'a> DwarfEmitter<'a> {
    pub fn new(
        sink: &'a mut dyn AsmSink,
        ir: &'a IrModule,
        functions: &'a [FunctionDebugArtifacts],
        producer: &'a str,
    ) -> Self {
        Self {
            sink,
            ir,
            functions,
            producer,
            next_info_entry: 0,
            type_entries: FxHashMap::default(),
            pending_types: Vec::new(),
            next_loclist_entry: 0,
            loclists: Vec::new(),
        }
    }

    // ---- primitive encodings -----------------------------------------

    fn byte(&mut self, value: u8) -> Result<()> {
        self.sink.data(DataKind::Byte, &[Operand::ImmU(value as u64)])
    }

    fn word(&mut self, value: u16) -> Result<()> {
        self.sink.data(DataKind::Word, &[Operand::ImmU(value as u64)])
    }

    fn long_diff(&mut self, lhs: &str, rhs: &str) -> Result<()> {
        self.sink.data(
            DataKind::Long,
            &[Operand::LabelDiff {
                lhs: lhs.to_string(),
                rhs: rhs.to_string(),
            }],
        )
    }

    fn quad_label(&mut self, label: &str) -> Result<()> {
        self.sink
            .data(DataKind::Quad, &[Operand::Symbol(label.to_string())])
    }

    fn quad_diff(&mut self, lhs: &str, rhs: &str) -> Result<()> {
        self.sink.data(
            DataKind::Quad,
            &[Operand::LabelDiff {
                lhs: lhs.to_string(),
                rhs: rhs.to_string(),
            }],
        )
    }

    fn uleb128(&mut self, value: u64) -> Result<()> {
        let mut bytes = Vec::new();
        leb128::encode_uleb128(value, &mut bytes);
        self.sink.bindata(DataKind::Byte, &bytes)
    }

    fn string(&mut self, value: &str) -> Result<()> {
        let mut bytes = value.as_bytes().to_vec();
        bytes.push(0);
        self.sink.data(DataKind::Ascii, &[Operand::StringLiteral(bytes)])
    }

    // ---- abbreviations -----------------------------------------------

    fn abbrev_attr(&mut self, attr: dw::DwAt, form: dw::DwForm) -> Result<()> {
        self.uleb128(attr.0 as u64)?;
        self.uleb128(form.0 as u64)
    }

    fn abbrev_entry(
        &mut self,
        abbrev: Abbrev,
        tag: dw::DwTag,
        children: bool,
        attrs: &[(dw::DwAt, dw::DwForm)],
    ) -> Result<()> {
        self.uleb128(abbrev as u64)?;
        self.uleb128(tag.0 as u64)?;
        self.byte(if children {
            dw::DW_CHILDREN_yes.0
        } else {
            dw::DW_CHILDREN_no.0
        })?;
        for (attr, form) in attrs {
            self.abbrev_attr(*attr, *form)?;
        }
        // Attribute list terminator.
        self.uleb128(0)?;
        self.uleb128(0)
    }

    fn emit_abbrev_section(&mut self) -> Result<()> {
        self.sink.section(".debug_abbrev")?;
        self.sink.label(DEBUG_ABBREV_BEGIN)?;

        self.abbrev_entry(
            Abbrev::CompileUnit,
            dw::DW_TAG_compile_unit,
            true,
            &[
                (dw::DW_AT_language, dw::DW_FORM_data2),
                (dw::DW_AT_producer, dw::DW_FORM_string),
                (dw::DW_AT_low_pc, dw::DW_FORM_addr),
                (dw::DW_AT_high_pc, dw::DW_FORM_data8),
                (dw::DW_AT_stmt_list, dw::DW_FORM_sec_offset),
            ],
        )?;
        self.abbrev_entry(
            Abbrev::Subprogram,
            dw::DW_TAG_subprogram,
            true,
            &[
                (dw::DW_AT_name, dw::DW_FORM_string),
                (dw::DW_AT_low_pc, dw::DW_FORM_addr),
                (dw::DW_AT_high_pc, dw::DW_FORM_data8),
                (dw::DW_AT_frame_base, dw::DW_FORM_exprloc),
            ],
        )?;
        self.abbrev_entry(
            Abbrev::LexicalBlock,
            dw::DW_TAG_lexical_block,
            true,
            &[
                (dw::DW_AT_low_pc, dw::DW_FORM_addr),
                (dw::DW_AT_high_pc, dw::DW_FORM_data8),
            ],
        )?;
        self.abbrev_entry(
            Abbrev::FormalParameter,
            dw::DW_TAG_formal_parameter,
            false,
            &[
                (dw::DW_AT_name, dw::DW_FORM_string),
                (dw::DW_AT_type, dw::DW_FORM_ref4),
                (dw::DW_AT_location, dw::DW_FORM_sec_offset),
            ],
        )?;
        self.abbrev_entry(
            Abbrev::LocalVariable,
            dw::DW_TAG_variable,
            false,
            &[
                (dw::DW_AT_name, dw::DW_FORM_string),
                (dw::DW_AT_type, dw::DW_FORM_ref4),
                (dw::DW_AT_location, dw::DW_FORM_sec_offset),
            ],
        )?;
        self.abbrev_entry(
            Abbrev::BaseType,
            dw::DW_TAG_base_type,
            false,
            &[
                (dw::DW_AT_name, dw::DW_FORM_string),
                (dw::DW_AT_byte_size, dw::DW_FORM_data1),
                (dw::DW_AT_encoding, dw::DW_FORM_data1),
            ],
        )?;
        self.abbrev_entry(
            Abbrev::PointerType,
            dw::DW_TAG_pointer_type,
            false,
            &[(dw::DW_AT_type, dw::DW_FORM_ref4)],
        )?;
        self.abbrev_entry(
            Abbrev::Typedef,
            dw::DW_TAG_typedef,
            false,
            &[
                (dw::DW_AT_name, dw::DW_FORM_string),
                (dw::DW_AT_type, dw::DW_FORM_ref4),
            ],
        )?;
        self.abbrev_entry(
            Abbrev::StructureType,
            dw::DW_TAG_structure_type,
            true,
            &[
                (dw::DW_AT_name, dw::DW_FORM_string),
                (dw::DW_AT_byte_size, dw::DW_FORM_data8),
                (dw::DW_AT_alignment, dw::DW_FORM_data8),
            ],
        )?;
        self.abbrev_entry(
            Abbrev::UnionType,
            dw::DW_TAG_union_type,
            true,
            &[
                (dw::DW_AT_name, dw::DW_FORM_string),
                (dw::DW_AT_byte_size, dw::DW_FORM_data8),
                (dw::DW_AT_alignment, dw::DW_FORM_data8),
            ],
        )?;
        self.abbrev_entry(
            Abbrev::Member,
            dw::DW_TAG_member,
            false,
            &[
                (dw::DW_AT_name, dw::DW_FORM_string),
                (dw::DW_AT_type, dw::DW_FORM_ref4),
                (dw::DW_AT_data_member_location, dw::DW_FORM_data8),
            ],
        )?;
        self.abbrev_entry(
            Abbrev::ArrayType,
            dw::DW_TAG_array_type,
            true,
            &[(dw::DW_AT_type, dw::DW_FORM_ref4)],
        )?;
        self.abbrev_entry(
            Abbrev::Subrange,
            dw::DW_TAG_subrange_type,
            false,
            &[(dw::DW_AT_count, dw::DW_FORM_data8)],
        )?;
        self.abbrev_entry(
            Abbrev::EnumerationType,
            dw::DW_TAG_enumeration_type,
            true,
            &[
                (dw::DW_AT_name, dw::DW_FORM_string),
                (dw::DW_AT_byte_size, dw::DW_FORM_data8),
            ],
        )?;
        self.abbrev_entry(
            Abbrev::Enumerator,
            dw::DW_TAG_enumerator,
            false,
            &[
                (dw::DW_AT_name, dw::DW_FORM_string),
                (dw::DW_AT_const_value, dw::DW_FORM_data8),
            ],
        )?;
        self.abbrev_entry(
            Abbrev::SubroutineType,
            dw::DW_TAG_subroutine_type,
            false,
            &[(dw::DW_AT_type, dw::DW_FORM_ref4)],
        )?;
        self.abbrev_entry(
            Abbrev::GlobalVariable,
            dw::DW_TAG_variable,
            false,
            &[
                (dw::DW_AT_name, dw::DW_FORM_string),
                (dw::DW_AT_type, dw::DW_FORM_ref4),
                (dw::DW_AT_external, dw::DW_FORM_flag_present),
            ],
        )?;

        // Abbreviation table terminator.
        self.uleb128(0)
    }

    // ---- info entries ------------------------------------------------

    fn next_entry(&mut self) -> u64 {
        self.next_info_entry += 1;
        self.next_info_entry
    }

    fn entry_begin(&mut self, abbrev: Abbrev) -> Result<u64> {
        let id = self.next_entry();
        self.sink.label(&info_entry_label(id))?;
        self.uleb128(abbrev as u64)?;
        Ok(id)
    }

    fn type_ref(&mut self, entry: DebugEntryId) -> Result<u64> {
        if let Some(&id) = self.type_entries.get(&entry) {
            return Ok(id);
        }
        // Reserve an id now; the entry body is emitted after the current
        // sibling chain closes.
        let id = self.next_entry();
        self.type_entries.insert(entry, id);
        self.pending_types.push((entry, id));
        Ok(id)
    }

    fn emit_type_ref_attr(&mut self, entry: DebugEntryId) -> Result<()> {
        let id = self.type_ref(entry)?;
        self.long_diff(&info_entry_label(id), DEBUG_INFO_BEGIN)
    }

    fn entry_name(&self, entry: DebugEntryId) -> String {
        match self.ir.debug_entries().get(entry).attr(DebugAttrTag::Name) {
            Some(DebugAttrValue::String(sym)) => self.ir.symbol(*sym).to_string(),
            _ => String::new(),
        }
    }

    fn entry_int_attr(&self, entry: DebugEntryId, tag: DebugAttrTag) -> i64 {
        match self.ir.debug_entries().get(entry).attr(tag) {
            Some(DebugAttrValue::Integer(v)) => *v,
            _ => 0,
        }
    }

    fn entry_type_attr(&self, entry: DebugEntryId) -> Option<DebugEntryId> {
        match self.ir.debug_entries().get(entry).attr(DebugAttrTag::Type) {
            Some(DebugAttrValue::EntryRef(id)) => Some(*id),
            _ => None,
        }
    }

    /// Emit one reserved type entry (and, transitively, its dependencies).
    fn emit_type_entry(&mut self, entry: DebugEntryId, id: u64) -> Result<()> {
        let tag = self.ir.debug_entries().get(entry).tag;
        let name = self.entry_name(entry);
        match tag {
            DebugEntryTag::BaseType => {
                self.sink.label(&info_entry_label(id))?;
                self.uleb128(Abbrev::BaseType as u64)?;
                self.string(&name)?;
                self.byte(self.entry_int_attr(entry, DebugAttrTag::Size) as u8)?;
                let encoding = match name.as_str() {
                    "float" | "double" | "long double" => dw::DW_ATE_float,
                    "unsigned" | "unsigned int" | "unsigned long" | "unsigned char"
                    | "unsigned short" | "unsigned long long" | "_Bool" => dw::DW_ATE_unsigned,
                    _ => dw::DW_ATE_signed,
                };
                self.byte(encoding.0 as u8)?;
            }
            DebugEntryTag::PointerType => {
                self.sink.label(&info_entry_label(id))?;
                self.uleb128(Abbrev::PointerType as u64)?;
                match self.entry_type_attr(entry) {
                    Some(pointee) => self.emit_type_ref_attr(pointee)?,
                    None => self.long_diff(DEBUG_INFO_BEGIN, DEBUG_INFO_BEGIN)?,
                }
            }
            DebugEntryTag::Typedef => {
                self.sink.label(&info_entry_label(id))?;
                self.uleb128(Abbrev::Typedef as u64)?;
                self.string(&name)?;
                match self.entry_type_attr(entry) {
                    Some(aliased) => self.emit_type_ref_attr(aliased)?,
                    None => self.long_diff(DEBUG_INFO_BEGIN, DEBUG_INFO_BEGIN)?,
                }
            }
            DebugEntryTag::StructureType | DebugEntryTag::UnionType => {
                self.sink.label(&info_entry_label(id))?;
                let abbrev = if tag == DebugEntryTag::StructureType {
                    Abbrev::StructureType
                } else {
                    Abbrev::UnionType
                };
                self.uleb128(abbrev as u64)?;
                self.string(&name)?;
                self.sink.data(
                    DataKind::Quad,
                    &[Operand::ImmU(
                        self.entry_int_attr(entry, DebugAttrTag::Size) as u64
                    )],
                )?;
                self.sink.data(
                    DataKind::Quad,
                    &[Operand::ImmU(
                        self.entry_int_attr(entry, DebugAttrTag::Alignment) as u64,
                    )],
                )?;
                for child in self.ir.debug_entries().get(entry).children().to_vec() {
                    let child_tag = self.ir.debug_entries().get(child).tag;
                    if !matches!(child_tag, DebugEntryTag::Member | DebugEntryTag::BitfieldMember) {
                        continue;
                    }
                    let member_id = self.next_entry();
                    self.sink.label(&info_entry_label(member_id))?;
                    self.uleb128(Abbrev::Member as u64)?;
                    let member_name = self.entry_name(child);
                    self.string(&member_name)?;
                    match self.entry_type_attr(child) {
                        Some(ty) => self.emit_type_ref_attr(ty)?,
                        None => self.long_diff(DEBUG_INFO_BEGIN, DEBUG_INFO_BEGIN)?,
                    }
                    self.sink.data(
                        DataKind::Quad,
                        &[Operand::ImmU(
                            self.entry_int_attr(child, DebugAttrTag::Offset) as u64,
                        )],
                    )?;
                }
                // Children terminator.
                self.uleb128(0)?;
            }
            DebugEntryTag::ArrayType => {
                self.sink.label(&info_entry_label(id))?;
                self.uleb128(Abbrev::ArrayType as u64)?;
                match self.entry_type_attr(entry) {
                    Some(element) => self.emit_type_ref_attr(element)?,
                    None => self.long_diff(DEBUG_INFO_BEGIN, DEBUG_INFO_BEGIN)?,
                }
                for child in self.ir.debug_entries().get(entry).children().to_vec() {
                    if self.ir.debug_entries().get(child).tag == DebugEntryTag::Subrange {
                        let subrange_id = self.next_entry();
                        self.sink.label(&info_entry_label(subrange_id))?;
                        self.uleb128(Abbrev::Subrange as u64)?;
                        self.sink.data(
                            DataKind::Quad,
                            &[Operand::ImmU(
                                self.entry_int_attr(child, DebugAttrTag::Count) as u64,
                            )],
                        )?;
                    }
                }
                self.uleb128(0)?;
            }
            DebugEntryTag::EnumerationType => {
                self.sink.label(&info_entry_label(id))?;
                self.uleb128(Abbrev::EnumerationType as u64)?;
                self.string(&name)?;
                self.sink.data(
                    DataKind::Quad,
                    &[Operand::ImmU(
                        self.entry_int_attr(entry, DebugAttrTag::Size) as u64
                    )],
                )?;
                for child in self.ir.debug_entries().get(entry).children().to_vec() {
                    if self.ir.debug_entries().get(child).tag == DebugEntryTag::Enumerator {
                        let enumerator_id = self.next_entry();
                        self.sink.label(&info_entry_label(enumerator_id))?;
                        self.uleb128(Abbrev::Enumerator as u64)?;
                        let enumerator_name = self.entry_name(child);
                        self.string(&enumerator_name)?;
                        self.sink.data(
                            DataKind::Quad,
                            &[Operand::ImmU(
                                self.entry_int_attr(child, DebugAttrTag::ConstValue) as u64,
                            )],
                        )?;
                    }
                }
                self.uleb128(0)?;
            }
            DebugEntryTag::SubroutineType => {
                self.sink.label(&info_entry_label(id))?;
                self.uleb128(Abbrev::SubroutineType as u64)?;
                match self.entry_type_attr(entry) {
                    Some(result) => self.emit_type_ref_attr(result)?,
                    None => self.long_diff(DEBUG_INFO_BEGIN, DEBUG_INFO_BEGIN)?,
                }
            }
            _ => {
                return Err(Error::InvalidState("non-type entry in the type queue"));
            }
        }
        Ok(())
    }

    fn flush_pending_types(&mut self) -> Result<()> {
        while let Some((entry, id)) = self.pending_types.pop() {
            self.emit_type_entry(entry, id)?;
        }
        Ok(())
    }

    fn emit_variable_like(
        &mut self,
        entry: DebugEntryId,
        abbrev: Abbrev,
        artifacts: &FunctionDebugArtifacts,
    ) -> Result<()> {
        self.entry_begin(abbrev)?;
        let name = self.entry_name(entry);
        self.string(&name)?;
        match self.entry_type_attr(entry) {
            Some(ty) => self.emit_type_ref_attr(ty)?,
            None => self.long_diff(DEBUG_INFO_BEGIN, DEBUG_INFO_BEGIN)?,
        }
        // Location: an offset into the loclists section, emitted later.
        self.next_loclist_entry += 1;
        let loclist = self.next_loclist_entry;
        self.long_diff(&loclist_entry_label(loclist), DEBUG_LOCLISTS_BEGIN)?;
        self.loclists.push((entry, loclist, artifacts.clone()));
        Ok(())
    }

    fn emit_lexical_block(
        &mut self,
        entry: DebugEntryId,
        artifacts: &FunctionDebugArtifacts,
    ) -> Result<()> {
        let node = self.ir.debug_entries().get(entry);
        let begin = node.code_begin().unwrap_or(0);
        let end = node.code_end().unwrap_or(begin);
        debug_assert!(begin <= end);
        let begin_label = artifacts.resolve_ir_index(begin).to_string();
        let end_label = artifacts.resolve_ir_index(end).to_string();

        self.entry_begin(Abbrev::LexicalBlock)?;
        self.quad_label(&begin_label)?;
        self.quad_diff(&end_label, &begin_label)?;
        for child in self.ir.debug_entries().get(entry).children().to_vec() {
            self.emit_scope_child(child, artifacts)?;
        }
        self.uleb128(0)
    }

    fn emit_scope_child(
        &mut self,
        entry: DebugEntryId,
        artifacts: &FunctionDebugArtifacts,
    ) -> Result<()> {
        match self.ir.debug_entries().get(entry).tag {
            DebugEntryTag::LexicalBlock => self.emit_lexical_block(entry, artifacts)?,
            DebugEntryTag::FormalParameter => {
                self.emit_variable_like(entry, Abbrev::FormalParameter, artifacts)?
            }
            DebugEntryTag::LocalVariable => {
                self.emit_variable_like(entry, Abbrev::LocalVariable, artifacts)?
            }
            // Type children are emitted lazily from references.
            _ => {}
        }
        Ok(())
    }

    fn emit_subprogram(&mut self, artifacts: &FunctionDebugArtifacts) -> Result<()> {
        self.entry_begin(Abbrev::Subprogram)?;
        self.string(&artifacts.name)?;
        self.quad_label(&artifacts.begin_label)?;
        self.quad_diff(&artifacts.end_label, &artifacts.begin_label)?;
        // Frame base: DW_OP_reg6 (rbp).
        self.uleb128(1)?;
        self.byte(dw::DW_OP_reg6.0)?;

        if let Some(subprogram) = artifacts.subprogram {
            for child in self.ir.debug_entries().get(subprogram).children().to_vec() {
                self.emit_scope_child(child, artifacts)?;
            }
        }
        // Children terminator.
        self.uleb128(0)
    }

    fn emit_info_section(&mut self) -> Result<()> {
        self.sink.newline(1)?;
        self.sink.section(".debug_info")?;
        self.sink.label(DEBUG_INFO_SECTION)?;
        self.long_diff(DEBUG_INFO_END, DEBUG_INFO_BEGIN)?;
        self.sink.label(DEBUG_INFO_BEGIN)?;
        self.word(DWARF_VERSION)?;
        self.byte(dw::DW_UT_compile.0)?;
        self.byte(ADDRESS_SIZE)?;
        self.sink.data(
            DataKind::Long,
            &[Operand::Symbol(DEBUG_ABBREV_BEGIN.to_string())],
        )?;

        // Compile unit.
        self.entry_begin(Abbrev::CompileUnit)?;
        self.word(dw::DW_LANG_C11.0)?;
        self.string(self.producer)?;
        self.quad_label(TEXT_BEGIN)?;
        self.quad_diff(TEXT_END, TEXT_BEGIN)?;
        self.sink.data(
            DataKind::Long,
            &[Operand::Symbol(DEBUG_LINES_BEGIN.to_string())],
        )?;

        for artifacts in self.functions.to_vec() {
            self.emit_subprogram(&artifacts)?;
        }
        self.flush_pending_types()?;

        // Compile unit children terminator plus the unit terminator.
        self.uleb128(0)?;
        self.uleb128(0)?;
        self.sink.label(DEBUG_INFO_END)
    }

    fn emit_lines_section(&mut self) -> Result<()> {
        self.sink.newline(1)?;
        self.sink.section(".debug_line")?;
        self.sink.label(DEBUG_LINES_BEGIN)
    }

    fn emit_loclists_section(&mut self) -> Result<()> {
        self.sink.newline(1)?;
        self.sink.section(".debug_loclists")?;
        self.long_diff(DEBUG_LOCLISTS_END, DEBUG_LOCLISTS_BEGIN)?;
        self.sink.label(DEBUG_LOCLISTS_BEGIN)?;
        self.word(DWARF_VERSION)?;
        self.byte(ADDRESS_SIZE)?;
        // Segment selector size and offset entry count.
        self.byte(0)?;
        self.sink.data(DataKind::Long, &[Operand::ImmU(0)])?;

        for (entry, loclist, artifacts) in std::mem::take(&mut self.loclists) {
            self.sink.label(&loclist_entry_label(loclist))?;

            let variable = match self.ir.debug_entries().get(entry).attr(DebugAttrTag::Variable) {
                Some(DebugAttrValue::Integer(v)) => Some(*v as u64),
                _ => None,
            };
            let location = variable.and_then(|v| artifacts.variables.get(&v).cloned());
            if let Some(location) = location {
                let node = self.ir.debug_entries().get(entry);
                let begin = node.code_begin().unwrap_or(0);
                let end = node.code_end().unwrap_or(begin);
                let begin_label = artifacts.resolve_ir_index(begin).to_string();
                let end_label = artifacts.resolve_ir_index(end).to_string();

                self.byte(dw::DW_LLE_start_end.0)?;
                self.quad_label(&begin_label)?;
                self.quad_label(&end_label)?;
                let mut expr = Vec::new();
                match location {
                    VarLocation::FrameOffset(offset) => {
                        expr.push(dw::DW_OP_fbreg.0);
                        leb128::encode_sleb128(offset, &mut expr);
                    }
                    VarLocation::Register(regno) => {
                        expr.push(dw::DW_OP_regx.0);
                        leb128::encode_uleb128(regno as u64, &mut expr);
                    }
                }
                self.uleb128(expr.len() as u64)?;
                self.sink.bindata(DataKind::Byte, &expr)?;
            }
            // List terminator.
            self.byte(dw::DW_LLE_end_of_list.0)?;
        }
        self.sink.label(DEBUG_LOCLISTS_END)
    }

    /// Emit all four debug sections.
    pub fn run(&mut self) -> Result<()> {
        self.sink.newline(1)?;
        self.emit_abbrev_section()?;
        self.emit_info_section()?;
        self.emit_lines_section()?;
        self.emit_loclists_section()
    }
}
