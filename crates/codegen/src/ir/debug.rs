//! Debug entry tree and source maps.
//!
//! Debug entries form a tree whose nodes carry a tag and an ordered
//! attribute list. The `CodeBegin`/`CodeEnd` attributes hold IR instruction
//! indices that the DWARF emitter later translates to assembly labels.

use crate::ir::module::SymbolId;
use crate::ir::types::TypeRef;
use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::{entity_impl, PrimaryMap};

/// A node of the debug entry tree.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DebugEntryId(u32);
entity_impl!(DebugEntryId, "dbgentry");

/// The kind of a debug entry node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DebugEntryTag {
    CompileUnit,
    Subprogram,
    LexicalBlock,
    FormalParameter,
    VarargParameter,
    LocalVariable,
    GlobalVariable,
    Typedef,
    BaseType,
    PointerType,
    EnumerationType,
    Enumerator,
    ArrayType,
    Subrange,
    StructureType,
    UnionType,
    Member,
    BitfieldMember,
    SubroutineType,
}

/// Attribute name.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DebugAttrTag {
    Name,
    Size,
    Alignment,
    Offset,
    Type,
    /// IR instruction index where the entry's code range begins.
    CodeBegin,
    /// IR instruction index one past the entry's code range.
    CodeEnd,
    ConstValue,
    BitWidth,
    BitOffset,
    Count,
    SourceFile,
    SourceLine,
    SourceColumn,
    ExternalName,
    /// Local variable id linking the entry to optimizer allocation info.
    Variable,
}

/// Attribute value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DebugAttrValue {
    Integer(i64),
    String(SymbolId),
    TypeRef(TypeRef),
    /// An IR code offset; translated to an assembly label at emit time.
    CodeIndex(usize),
    EntryRef(DebugEntryId),
}

/// A single name/value attribute pair.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DebugAttr {
    pub tag: DebugAttrTag,
    pub value: DebugAttrValue,
}

/// One debug entry: tag, ordered attributes, ordered children.
#[derive(Clone, Debug)]
pub struct DebugEntry {
    pub tag: DebugEntryTag,
    pub parent: PackedOption<DebugEntryId>,
    attrs: Vec<DebugAttr>,
    children: Vec<DebugEntryId>,
}

impl DebugEntry {
    pub fn attrs(&self) -> &[DebugAttr] {
        &self.attrs
    }

    pub fn children(&self) -> &[DebugEntryId] {
        &self.children
    }

    /// First attribute with the given tag.
    pub fn attr(&self, tag: DebugAttrTag) -> Option<&DebugAttrValue> {
        self.attrs.iter().find(|a| a.tag == tag).map(|a| &a.value)
    }

    pub fn code_begin(&self) -> Option<usize> {
        match self.attr(DebugAttrTag::CodeBegin) {
            Some(DebugAttrValue::CodeIndex(idx)) => Some(*idx),
            _ => None,
        }
    }

    pub fn code_end(&self) -> Option<usize> {
        match self.attr(DebugAttrTag::CodeEnd) {
            Some(DebugAttrValue::CodeIndex(idx)) => Some(*idx),
            _ => None,
        }
    }
}

/// The module's debug entry tree.
#[derive(Clone, Default)]
pub struct DebugEntries {
    entries: PrimaryMap<DebugEntryId, DebugEntry>,
    roots: Vec<DebugEntryId>,
}

impl DebugEntries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new root entry (typically the compile unit).
    pub fn new_root(&mut self, tag: DebugEntryTag) -> DebugEntryId {
        let id = self.entries.push(DebugEntry {
            tag,
            parent: None.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        });
        self.roots.push(id);
        id
    }

    /// Create a new child of `parent`.
    pub fn new_child(&mut self, parent: DebugEntryId, tag: DebugEntryTag) -> DebugEntryId {
        let id = self.entries.push(DebugEntry {
            tag,
            parent: Some(parent).into(),
            attrs: Vec::new(),
            children: Vec::new(),
        });
        self.entries[parent].children.push(id);
        id
    }

    pub fn add_attribute(&mut self, entry: DebugEntryId, attr: DebugAttr) {
        self.entries[entry].attrs.push(attr);
    }

    pub fn get(&self, entry: DebugEntryId) -> &DebugEntry {
        &self.entries[entry]
    }

    pub fn roots(&self) -> &[DebugEntryId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() == 0
    }
}

/// A resolved source location.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: SymbolId,
    pub line: u32,
    pub column: u32,
}

/// One IR code range attributed to a source location.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SourceMapEntry {
    pub location: SourceLocation,
    pub begin: usize,
    pub end: usize,
}

/// Per-function map from IR code ranges to source locations.
#[derive(Clone, Debug, Default)]
pub struct FunctionSourceMap {
    entries: Vec<SourceMapEntry>,
}

impl FunctionSourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, location: SourceLocation, begin: usize, end: usize) {
        self.entries.push(SourceMapEntry {
            location,
            begin,
            end,
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceMapEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_structure_and_attributes() {
        let mut entries = DebugEntries::new();
        let unit = entries.new_root(DebugEntryTag::CompileUnit);
        let subprogram = entries.new_child(unit, DebugEntryTag::Subprogram);
        entries.add_attribute(
            subprogram,
            DebugAttr {
                tag: DebugAttrTag::CodeBegin,
                value: DebugAttrValue::CodeIndex(0),
            },
        );
        entries.add_attribute(
            subprogram,
            DebugAttr {
                tag: DebugAttrTag::CodeEnd,
                value: DebugAttrValue::CodeIndex(12),
            },
        );

        assert_eq!(entries.get(unit).children(), &[subprogram]);
        assert_eq!(entries.get(subprogram).parent.expand(), Some(unit));
        assert_eq!(entries.get(subprogram).code_begin(), Some(0));
        assert_eq!(entries.get(subprogram).code_end(), Some(12));
    }
}
