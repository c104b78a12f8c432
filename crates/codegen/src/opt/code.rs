//! SSA code container for a single function.
//!
//! Blocks, instructions, φ-nodes, call nodes and inline-asm nodes live in
//! entity pools; program order within a block is kept by intrusive links on
//! the instructions themselves, and the ordered sublist of instructions with
//! observable effects (the control list) is threaded through a second set of
//! links. The last control entry of every block is its terminator.

use crate::error::{Error, Result};
use crate::ir::{FuncDeclId, SymbolId};
use crate::opt::debug::OirDebugInfo;
use crate::opt::ops::{Opcode, OperationData};
use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::{entity_impl, EntityRef, PrimaryMap};
use smallvec::SmallVec;

/// An opaque reference to an instruction.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrRef(u32);
entity_impl!(InstrRef, "instr");

/// A basic block id.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);
entity_impl!(BlockId, "block");

/// A φ-node id.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhiRef(u32);
entity_impl!(PhiRef, "phi");

/// A call node id.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallRef(u32);
entity_impl!(CallRef, "call");

/// An inline-assembly node id.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InlineAsmRef(u32);
entity_impl!(InlineAsmRef, "iasm");

/// One instruction: operation data plus list links.
#[derive(Clone, Debug)]
pub struct Instruction {
    pub op: OperationData,
    pub block: PackedOption<BlockId>,
    prev: PackedOption<InstrRef>,
    next: PackedOption<InstrRef>,
    prev_control: PackedOption<InstrRef>,
    next_control: PackedOption<InstrRef>,
    in_control: bool,
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        self.op.opcode()
    }

    /// Whether the instruction is currently linked into its block's control
    /// list.
    pub fn is_control_flow(&self) -> bool {
        self.in_control
    }

    pub fn prev_control(&self) -> Option<InstrRef> {
        self.prev_control.expand()
    }

    pub fn next_control(&self) -> Option<InstrRef> {
        self.next_control.expand()
    }

    pub fn prev(&self) -> Option<InstrRef> {
        self.prev.expand()
    }

    pub fn next(&self) -> Option<InstrRef> {
        self.next.expand()
    }
}

/// Per-block state.
#[derive(Clone, Debug, Default)]
pub struct BlockData {
    /// Symbolic labels exported from this block. A public label pins the
    /// block: the inliner and several restructuring passes refuse to touch
    /// functions containing one.
    pub public_labels: Vec<SymbolId>,
    head: PackedOption<InstrRef>,
    tail: PackedOption<InstrRef>,
    control_head: PackedOption<InstrRef>,
    control_tail: PackedOption<InstrRef>,
    /// Ordered φ-nodes of this block.
    pub phis: Vec<PhiRef>,
    /// The call-site block this block was cloned under, if it was produced
    /// by inlining. Chain length gives the inline depth.
    pub inlined_from: PackedOption<BlockId>,
}

impl BlockData {
    pub fn control_head(&self) -> Option<InstrRef> {
        self.control_head.expand()
    }

    pub fn control_tail(&self) -> Option<InstrRef> {
        self.control_tail.expand()
    }

    pub fn instr_head(&self) -> Option<InstrRef> {
        self.head.expand()
    }

    pub fn instr_tail(&self) -> Option<InstrRef> {
        self.tail.expand()
    }
}

/// A φ-node: its output instruction plus predecessor links.
#[derive(Clone, Debug)]
pub struct PhiNode {
    pub block: BlockId,
    pub output: InstrRef,
    /// Predecessor block → incoming value. Kept as a small ordered vector;
    /// predecessor counts are small and deterministic order matters.
    links: Vec<(BlockId, InstrRef)>,
}

impl PhiNode {
    pub fn links(&self) -> &[(BlockId, InstrRef)] {
        &self.links
    }

    pub fn link(&self, block: BlockId) -> Option<InstrRef> {
        self.links
            .iter()
            .find(|(b, _)| *b == block)
            .map(|(_, r)| *r)
    }
}

/// A call node: the out-of-line operand storage of an invoke instruction.
#[derive(Clone, Debug)]
pub struct CallNode {
    pub block: BlockId,
    pub output: InstrRef,
    pub decl: FuncDeclId,
    args: Vec<PackedOption<InstrRef>>,
    pub indirect: PackedOption<InstrRef>,
    pub return_space: PackedOption<InstrRef>,
}

impl CallNode {
    pub fn argument_count(&self) -> usize {
        self.args.len()
    }

    pub fn argument(&self, index: usize) -> Result<InstrRef> {
        self.args
            .get(index)
            .and_then(|a| a.expand())
            .ok_or(Error::NotFound("call argument is not set"))
    }

    pub fn arguments(&self) -> impl Iterator<Item = Option<InstrRef>> + '_ {
        self.args.iter().map(|a| a.expand())
    }
}

/// One inline-assembly parameter: a value read plus an optional load/store
/// location.
#[derive(Copy, Clone, Debug, Default)]
pub struct InlineAsmParam {
    pub read: PackedOption<InstrRef>,
    pub load_store: PackedOption<InstrRef>,
}

/// An inline-assembly node.
#[derive(Clone, Debug)]
pub struct InlineAsmNode {
    pub block: BlockId,
    pub output: InstrRef,
    /// Module-level inline assembly template id.
    pub asm_id: u64,
    params: Vec<InlineAsmParam>,
    pub default_target: PackedOption<BlockId>,
    /// Jump targets sorted by target id; lookups are linear but ids are few.
    targets: Vec<(u64, BlockId)>,
}

impl InlineAsmNode {
    pub fn params(&self) -> &[InlineAsmParam] {
        &self.params
    }

    pub fn targets(&self) -> &[(u64, BlockId)] {
        &self.targets
    }
}

/// SSA function container.
pub struct OirFunction {
    pub decl: FuncDeclId,
    pub entry_block: PackedOption<BlockId>,
    blocks: PrimaryMap<BlockId, BlockData>,
    instrs: PrimaryMap<InstrRef, Instruction>,
    phis: PrimaryMap<PhiRef, PhiNode>,
    calls: PrimaryMap<CallRef, CallNode>,
    inline_asms: PrimaryMap<InlineAsmRef, InlineAsmNode>,
    pub debug: OirDebugInfo,
    /// Number of call sites inlined into this function so far.
    pub num_of_inlines: usize,
    frozen: bool,
}

impl OirFunction {
    pub fn new(decl: FuncDeclId) -> Self {
        Self {
            decl,
            entry_block: None.into(),
            blocks: PrimaryMap::new(),
            instrs: PrimaryMap::new(),
            phis: PrimaryMap::new(),
            calls: PrimaryMap::new(),
            inline_asms: PrimaryMap::new(),
            debug: OirDebugInfo::new(),
            num_of_inlines: 0,
            frozen: false,
        }
    }

    /// Freeze the function; any further mutation is a contract violation.
    /// Code generation only reads.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    fn check_mutable(&self) -> Result<()> {
        if self.frozen {
            Err(Error::InvalidRequest("function is frozen"))
        } else {
            Ok(())
        }
    }

    // ---- blocks ------------------------------------------------------

    pub fn new_block(&mut self) -> BlockId {
        let block = self.blocks.push(BlockData::default());
        if self.entry_block.is_none() {
            self.entry_block = Some(block).into();
        }
        block
    }

    pub fn block(&self, block: BlockId) -> Result<&BlockData> {
        self.blocks.get(block).ok_or(Error::NotFound("unknown block id"))
    }

    pub fn block_mut(&mut self, block: BlockId) -> Result<&mut BlockData> {
        self.blocks
            .get_mut(block)
            .ok_or(Error::NotFound("unknown block id"))
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        self.blocks.keys()
    }

    pub fn add_public_label(&mut self, block: BlockId, label: SymbolId) -> Result<()> {
        self.check_mutable()?;
        self.block_mut(block)?.public_labels.push(label);
        Ok(())
    }

    /// Inline depth of a block: the length of its `inlined_from` chain.
    pub fn block_inline_depth(&self, block: BlockId) -> usize {
        let mut depth = 0;
        let mut cursor = self.blocks[block].inlined_from;
        while let Some(origin) = cursor.expand() {
            depth += 1;
            cursor = self.blocks[origin].inlined_from;
        }
        depth
    }

    pub fn set_block_inlined_from(&mut self, block: BlockId, origin: BlockId) -> Result<()> {
        self.check_mutable()?;
        self.block_mut(block)?.inlined_from = Some(origin).into();
        Ok(())
    }

    // ---- instructions ------------------------------------------------

    /// Create an instruction and append it to `block`'s instruction list.
    ///
    /// If the debug location cursor is set, the new instruction is attributed
    /// to it.
    pub fn new_instruction(&mut self, block: BlockId, op: OperationData) -> Result<InstrRef> {
        self.check_mutable()?;
        if !self.blocks.is_valid(block) {
            return Err(Error::NotFound("unknown block id"));
        }
        let instr = self.instrs.push(Instruction {
            op,
            block: Some(block).into(),
            prev: self.blocks[block].tail,
            next: None.into(),
            prev_control: None.into(),
            next_control: None.into(),
            in_control: false,
        });
        match self.blocks[block].tail.expand() {
            Some(tail) => self.instrs[tail].next = Some(instr).into(),
            None => self.blocks[block].head = Some(instr).into(),
        }
        self.blocks[block].tail = Some(instr).into();
        if let Some(cursor) = self.debug.instruction_location_cursor {
            self.debug.set_instruction_location(instr, cursor);
        }
        Ok(instr)
    }

    pub fn instr(&self, instr: InstrRef) -> Result<&Instruction> {
        self.instrs
            .get(instr)
            .ok_or(Error::NotFound("unknown instruction ref"))
    }

    pub fn instr_mut(&mut self, instr: InstrRef) -> Result<&mut Instruction> {
        self.instrs
            .get_mut(instr)
            .ok_or(Error::NotFound("unknown instruction ref"))
    }

    pub fn instr_count(&self) -> usize {
        self.instrs.len()
    }

    pub fn instr_is_valid(&self, instr: InstrRef) -> bool {
        self.instrs.is_valid(instr)
    }

    /// Iterate the instruction list of a block in program order.
    pub fn block_instrs(&self, block: BlockId) -> InstrIter<'_> {
        InstrIter {
            func: self,
            cursor: self.blocks[block].head,
            control: false,
        }
    }

    /// Iterate the control list of a block in program order.
    pub fn block_control(&self, block: BlockId) -> InstrIter<'_> {
        InstrIter {
            func: self,
            cursor: self.blocks[block].control_head,
            control: true,
        }
    }

    // ---- control list ------------------------------------------------

    /// Link `instr` into `block`'s control list after `after`, or at the head
    /// when `after` is `None`. This is the only way an instruction reaches
    /// the control path.
    pub fn insert_control(
        &mut self,
        block: BlockId,
        after: Option<InstrRef>,
        instr: InstrRef,
    ) -> Result<()> {
        self.check_mutable()?;
        {
            let data = self.instr(instr)?;
            if data.in_control {
                return Err(Error::InvalidRequest("instruction is already on the control list"));
            }
            if data.block.expand() != Some(block) {
                return Err(Error::InvalidParameter(
                    "control insertion into a foreign block",
                ));
            }
        }
        if let Some(after) = after {
            let data = self.instr(after)?;
            if !data.in_control || data.block.expand() != Some(block) {
                return Err(Error::InvalidParameter(
                    "control insertion anchor is not on the block's control list",
                ));
            }
        }

        let next = match after {
            Some(after) => self.instrs[after].next_control,
            None => self.blocks[block].control_head,
        };
        self.instrs[instr].prev_control = after.into();
        self.instrs[instr].next_control = next;
        self.instrs[instr].in_control = true;
        match after {
            Some(after) => self.instrs[after].next_control = Some(instr).into(),
            None => self.blocks[block].control_head = Some(instr).into(),
        }
        match next.expand() {
            Some(next) => self.instrs[next].prev_control = Some(instr).into(),
            None => self.blocks[block].control_tail = Some(instr).into(),
        }
        Ok(())
    }

    /// Link `instr` at the control list tail of `block`.
    pub fn append_control(&mut self, block: BlockId, instr: InstrRef) -> Result<()> {
        let tail = self.blocks[block].control_tail.expand();
        self.insert_control(block, tail, instr)
    }

    /// Unlink `instr` from its block's control list.
    pub fn drop_control(&mut self, instr: InstrRef) -> Result<()> {
        self.check_mutable()?;
        let data = self.instr(instr)?;
        if !data.in_control {
            return Err(Error::InvalidRequest("instruction is not on the control list"));
        }
        let block = data.block.unwrap();
        let prev = data.prev_control;
        let next = data.next_control;
        match prev.expand() {
            Some(prev) => self.instrs[prev].next_control = next,
            None => self.blocks[block].control_head = next,
        }
        match next.expand() {
            Some(next) => self.instrs[next].prev_control = prev,
            None => self.blocks[block].control_tail = prev,
        }
        let data = &mut self.instrs[instr];
        data.prev_control = None.into();
        data.next_control = None.into();
        data.in_control = false;
        Ok(())
    }

    /// Remove a dead instruction from its block. Fails while any use of the
    /// instruction remains anywhere in the function.
    pub fn drop_instr(&mut self, instr: InstrRef) -> Result<()> {
        self.check_mutable()?;
        let data = self.instr(instr)?;
        if data.in_control {
            return Err(Error::InvalidRequest(
                "instruction must leave the control list before removal",
            ));
        }
        let block = match data.block.expand() {
            Some(block) => block,
            None => return Ok(()),
        };
        if self.has_uses(instr) {
            return Err(Error::InvalidRequest("instruction still has uses"));
        }

        let prev = self.instrs[instr].prev;
        let next = self.instrs[instr].next;
        match prev.expand() {
            Some(prev) => self.instrs[prev].next = next,
            None => self.blocks[block].head = next,
        }
        match next.expand() {
            Some(next) => self.instrs[next].prev = prev,
            None => self.blocks[block].tail = prev,
        }
        // Side nodes of a removed instruction keep no operand references, so
        // they cannot pin other instructions alive.
        match self.instrs[instr].op {
            OperationData::Call { call, .. } => {
                let node = &mut self.calls[call];
                node.args.clear();
                node.indirect = None.into();
                node.return_space = None.into();
            }
            OperationData::InlineAsm { inline_asm, .. } => {
                self.inline_asms[inline_asm].params.clear();
            }
            OperationData::Phi { phi, .. } => {
                self.phis[phi].links.clear();
                self.blocks[block].phis.retain(|p| *p != phi);
            }
            _ => {}
        }
        let data = &mut self.instrs[instr];
        data.block = None.into();
        data.prev = None.into();
        data.next = None.into();
        Ok(())
    }

    /// Whether any instruction, φ link, call node or inline-asm node refers
    /// to `instr`.
    pub fn has_uses(&self, instr: InstrRef) -> bool {
        for (_, data) in self.instrs.iter() {
            if data.block.is_none() {
                continue;
            }
            let mut used = false;
            data.op.for_each_ref(|r| used |= r == instr);
            if used {
                return true;
            }
        }
        for (_, phi) in self.phis.iter() {
            if phi.links.iter().any(|(_, r)| *r == instr) {
                return true;
            }
        }
        for (_, call) in self.calls.iter() {
            if call.args.iter().any(|a| a.expand() == Some(instr))
                || call.indirect.expand() == Some(instr)
                || call.return_space.expand() == Some(instr)
            {
                return true;
            }
        }
        for (_, asm) in self.inline_asms.iter() {
            if asm.params.iter().any(|p| {
                p.read.expand() == Some(instr) || p.load_store.expand() == Some(instr)
            }) {
                return true;
            }
        }
        false
    }

    /// Whether `instr` is referenced from a φ link, call node or inline-asm
    /// node (as opposed to a plain instruction operand).
    pub fn has_side_node_uses(&self, instr: InstrRef) -> bool {
        for (_, phi) in self.phis.iter() {
            if phi.links.iter().any(|(_, r)| *r == instr) {
                return true;
            }
        }
        for (_, call) in self.calls.iter() {
            if call.args.iter().any(|a| a.expand() == Some(instr))
                || call.indirect.expand() == Some(instr)
                || call.return_space.expand() == Some(instr)
            {
                return true;
            }
        }
        for (_, asm) in self.inline_asms.iter() {
            if asm.params.iter().any(|p| {
                p.read.expand() == Some(instr) || p.load_store.expand() == Some(instr)
            }) {
                return true;
            }
        }
        false
    }

    /// Rewrite every use of `from` anywhere in the function to `to`. The
    /// defining instruction of `from` is left in place.
    pub fn replace_references(&mut self, to: InstrRef, from: InstrRef) -> Result<()> {
        self.check_mutable()?;
        if !self.instrs.is_valid(to) || !self.instrs.is_valid(from) {
            return Err(Error::NotFound("unknown instruction ref"));
        }
        for (_, data) in self.instrs.iter_mut() {
            data.op.replace_ref(from, to);
        }
        for (_, phi) in self.phis.iter_mut() {
            for (_, r) in phi.links.iter_mut() {
                if *r == from {
                    *r = to;
                }
            }
        }
        for (_, call) in self.calls.iter_mut() {
            for a in call.args.iter_mut() {
                if a.expand() == Some(from) {
                    *a = Some(to).into();
                }
            }
            if call.indirect.expand() == Some(from) {
                call.indirect = Some(to).into();
            }
            if call.return_space.expand() == Some(from) {
                call.return_space = Some(to).into();
            }
        }
        for (_, asm) in self.inline_asms.iter_mut() {
            for p in asm.params.iter_mut() {
                if p.read.expand() == Some(from) {
                    p.read = Some(to).into();
                }
                if p.load_store.expand() == Some(from) {
                    p.load_store = Some(to).into();
                }
            }
        }
        Ok(())
    }

    // ---- φ nodes -----------------------------------------------------

    /// Create a φ-node in `block`, returning the node id and its output
    /// instruction.
    pub fn new_phi(&mut self, block: BlockId) -> Result<(PhiRef, InstrRef)> {
        self.check_mutable()?;
        let phi = self.phis.next_key();
        let output = self.new_instruction(
            block,
            OperationData::Phi {
                opcode: Opcode::Phi,
                phi,
            },
        )?;
        let phi = self.phis.push(PhiNode {
            block,
            output,
            links: Vec::new(),
        });
        self.blocks[block].phis.push(phi);
        Ok((phi, output))
    }

    pub fn phi(&self, phi: PhiRef) -> Result<&PhiNode> {
        self.phis.get(phi).ok_or(Error::NotFound("unknown phi id"))
    }

    /// Attach an incoming edge to a φ-node. Each predecessor block may be
    /// attached at most once.
    pub fn phi_attach(&mut self, phi: PhiRef, block: BlockId, value: InstrRef) -> Result<()> {
        self.check_mutable()?;
        let node = self
            .phis
            .get_mut(phi)
            .ok_or(Error::NotFound("unknown phi id"))?;
        if node.links.iter().any(|(b, _)| *b == block) {
            return Err(Error::InvalidRequest("phi already has a link for the block"));
        }
        node.links.push((block, value));
        Ok(())
    }

    /// Remove a φ link for a predecessor edge that no longer exists.
    pub fn phi_unlink(&mut self, phi: PhiRef, block: BlockId) -> Result<()> {
        self.check_mutable()?;
        let node = self
            .phis
            .get_mut(phi)
            .ok_or(Error::NotFound("unknown phi id"))?;
        let before = node.links.len();
        node.links.retain(|(b, _)| *b != block);
        if node.links.len() == before {
            return Err(Error::NotFound("phi has no link for the block"));
        }
        Ok(())
    }

    /// Re-key a φ link from one predecessor block to another.
    pub fn phi_relink(&mut self, phi: PhiRef, from: BlockId, to: BlockId) -> Result<()> {
        self.check_mutable()?;
        let node = self
            .phis
            .get_mut(phi)
            .ok_or(Error::NotFound("unknown phi id"))?;
        for (b, _) in node.links.iter_mut() {
            if *b == from {
                *b = to;
                return Ok(());
            }
        }
        Err(Error::NotFound("phi has no link for the block"))
    }

    // ---- call nodes --------------------------------------------------

    /// Create a call node plus its invoke instruction.
    pub fn new_call(
        &mut self,
        block: BlockId,
        decl: FuncDeclId,
        argument_count: usize,
        indirect: Option<InstrRef>,
    ) -> Result<(CallRef, InstrRef)> {
        self.check_mutable()?;
        let call = self.calls.next_key();
        let opcode = if indirect.is_some() {
            Opcode::InvokeVirtual
        } else {
            Opcode::Invoke
        };
        let output = self.new_instruction(block, OperationData::Call { opcode, call })?;
        let call = self.calls.push(CallNode {
            block,
            output,
            decl,
            args: vec![None.into(); argument_count],
            indirect: indirect.into(),
            return_space: None.into(),
        });
        Ok((call, output))
    }

    pub fn call(&self, call: CallRef) -> Result<&CallNode> {
        self.calls.get(call).ok_or(Error::NotFound("unknown call id"))
    }

    pub fn call_set_argument(
        &mut self,
        call: CallRef,
        index: usize,
        value: InstrRef,
    ) -> Result<()> {
        self.check_mutable()?;
        let node = self
            .calls
            .get_mut(call)
            .ok_or(Error::NotFound("unknown call id"))?;
        let slot = node
            .args
            .get_mut(index)
            .ok_or(Error::OutOfBounds("call argument index"))?;
        *slot = Some(value).into();
        Ok(())
    }

    pub fn call_set_return_space(&mut self, call: CallRef, value: InstrRef) -> Result<()> {
        self.check_mutable()?;
        let node = self
            .calls
            .get_mut(call)
            .ok_or(Error::NotFound("unknown call id"))?;
        node.return_space = Some(value).into();
        Ok(())
    }

    // ---- inline assembly ---------------------------------------------

    pub fn new_inline_asm(
        &mut self,
        block: BlockId,
        asm_id: u64,
        parameter_count: usize,
    ) -> Result<(InlineAsmRef, InstrRef)> {
        self.check_mutable()?;
        let asm = self.inline_asms.next_key();
        let output = self.new_instruction(
            block,
            OperationData::InlineAsm {
                opcode: Opcode::InlineAsm,
                inline_asm: asm,
            },
        )?;
        let asm = self.inline_asms.push(InlineAsmNode {
            block,
            output,
            asm_id,
            params: vec![InlineAsmParam::default(); parameter_count],
            default_target: None.into(),
            targets: Vec::new(),
        });
        Ok((asm, output))
    }

    pub fn inline_asm(&self, asm: InlineAsmRef) -> Result<&InlineAsmNode> {
        self.inline_asms
            .get(asm)
            .ok_or(Error::NotFound("unknown inline assembly id"))
    }

    pub fn inline_asm_set_parameter(
        &mut self,
        asm: InlineAsmRef,
        index: usize,
        param: InlineAsmParam,
    ) -> Result<()> {
        self.check_mutable()?;
        let node = self
            .inline_asms
            .get_mut(asm)
            .ok_or(Error::NotFound("unknown inline assembly id"))?;
        let slot = node
            .params
            .get_mut(index)
            .ok_or(Error::OutOfBounds("inline assembly parameter index"))?;
        *slot = param;
        Ok(())
    }

    pub fn inline_asm_set_default_target(
        &mut self,
        asm: InlineAsmRef,
        target: BlockId,
    ) -> Result<()> {
        self.check_mutable()?;
        let node = self
            .inline_asms
            .get_mut(asm)
            .ok_or(Error::NotFound("unknown inline assembly id"))?;
        node.default_target = Some(target).into();
        Ok(())
    }

    pub fn inline_asm_add_target(
        &mut self,
        asm: InlineAsmRef,
        target_id: u64,
        target: BlockId,
    ) -> Result<()> {
        self.check_mutable()?;
        let node = self
            .inline_asms
            .get_mut(asm)
            .ok_or(Error::NotFound("unknown inline assembly id"))?;
        match node.targets.binary_search_by_key(&target_id, |(id, _)| *id) {
            Ok(_) => Err(Error::InvalidRequest("duplicate inline assembly jump target")),
            Err(pos) => {
                node.targets.insert(pos, (target_id, target));
                Ok(())
            }
        }
    }

    // ---- control-flow shape ------------------------------------------

    /// Successor blocks of a terminator instruction.
    pub fn terminator_targets(&self, instr: InstrRef) -> Result<SmallVec<[BlockId; 2]>> {
        let data = self.instr(instr)?;
        let mut targets = SmallVec::new();
        match &data.op {
            OperationData::Jump { target, .. } => targets.push(*target),
            OperationData::Branch {
                target,
                alternative,
                ..
            }
            | OperationData::BranchCompare {
                target,
                alternative,
                ..
            } => {
                targets.push(*target);
                targets.push(*alternative);
            }
            OperationData::InlineAsm { inline_asm, .. } => {
                let node = self.inline_asm(*inline_asm)?;
                if let Some(default) = node.default_target.expand() {
                    targets.push(default);
                }
                for (_, block) in node.targets.iter() {
                    targets.push(*block);
                }
            }
            OperationData::Ref1 { opcode, .. } if *opcode == Opcode::IndirectJump => {
                // An indirect jump may land on any block whose label escapes.
                for (block, data) in self.blocks.iter() {
                    if !data.public_labels.is_empty() {
                        targets.push(block);
                    }
                }
                for (_, instr) in self.instrs.iter() {
                    if let OperationData::BlockRef { block, .. } = instr.op {
                        if !targets.contains(&block) {
                            targets.push(block);
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(targets)
    }

    /// The terminator of a block, when its control list is non-empty and
    /// well-formed.
    pub fn block_terminator(&self, block: BlockId) -> Option<InstrRef> {
        let tail = self.blocks[block].control_tail.expand()?;
        if self.instrs[tail].opcode().is_terminator() {
            Some(tail)
        } else {
            None
        }
    }

    // ---- block splitting ---------------------------------------------

    /// Split the block containing the control instruction `anchor` right
    /// after it. All instructions following `anchor` in the instruction list
    /// move to a fresh block which inherits the terminator; the original
    /// block receives an unconditional jump to the new block. φ-nodes in
    /// successor blocks are re-keyed atomically.
    pub fn split_block_after(&mut self, anchor: InstrRef) -> Result<BlockId> {
        self.check_mutable()?;
        let anchor_data = self.instr(anchor)?;
        if !anchor_data.in_control {
            return Err(Error::InvalidRequest("split anchor must be a control instruction"));
        }
        let block = anchor_data.block.unwrap();
        let anchor_location = self.debug.instruction_location(anchor);

        let new_block = self.blocks.push(BlockData {
            inlined_from: self.blocks[block].inlined_from,
            ..BlockData::default()
        });

        // Move the instruction-list suffix.
        let mut moved_controls: SmallVec<[InstrRef; 8]> = SmallVec::new();
        let mut cursor = self.instrs[anchor].next.expand();
        self.instrs[anchor].next = None.into();
        self.blocks[block].tail = Some(anchor).into();
        let mut prev: Option<InstrRef> = None;
        while let Some(instr) = cursor {
            cursor = self.instrs[instr].next.expand();
            let data = &mut self.instrs[instr];
            data.block = Some(new_block).into();
            data.prev = prev.into();
            data.next = None.into();
            match prev {
                Some(prev) => self.instrs[prev].next = Some(instr).into(),
                None => self.blocks[new_block].head = Some(instr).into(),
            }
            self.blocks[new_block].tail = Some(instr).into();
            if self.instrs[instr].in_control {
                moved_controls.push(instr);
            }
            // Side nodes track their owning block; keep them in sync.
            match self.instrs[instr].op {
                OperationData::Phi { phi, .. } => {
                    self.phis[phi].block = new_block;
                    self.blocks[block].phis.retain(|p| *p != phi);
                    self.blocks[new_block].phis.push(phi);
                }
                OperationData::Call { call, .. } => {
                    self.calls[call].block = new_block;
                }
                OperationData::InlineAsm { inline_asm, .. } => {
                    self.inline_asms[inline_asm].block = new_block;
                }
                _ => {}
            }
            prev = Some(instr);
        }

        // The moved control entries must form the control-list suffix that
        // followed the anchor.
        let mut expected = self.instrs[anchor].next_control.expand();
        for &instr in moved_controls.iter() {
            if expected != Some(instr) {
                return Err(Error::InvalidState(
                    "control list diverges from instruction order at the split point",
                ));
            }
            expected = self.instrs[instr].next_control.expand();
        }
        if expected.is_some() {
            return Err(Error::InvalidState(
                "control instruction precedes the split anchor in instruction order",
            ));
        }

        // Sever the control list.
        self.instrs[anchor].next_control = None.into();
        self.blocks[block].control_tail = Some(anchor).into();
        self.blocks[new_block].control_head = moved_controls.first().copied().into();
        self.blocks[new_block].control_tail = moved_controls.last().copied().into();
        if let Some(&first) = moved_controls.first() {
            self.instrs[first].prev_control = None.into();
        }

        // Re-key φ links of successor blocks from the old block to the new
        // one: the terminator now lives in the new block.
        if let Some(terminator) = self.blocks[new_block].control_tail.expand() {
            let targets = self.terminator_targets(terminator)?;
            for target in targets {
                let phis: SmallVec<[PhiRef; 4]> = self.blocks[target].phis.iter().copied().collect();
                for phi in phis {
                    if self.phis[phi].links.iter().any(|(b, _)| *b == block) {
                        self.phi_relink(phi, block, new_block)?;
                    }
                }
            }
        }

        // Fresh jump from the original block to the split-off block, carrying
        // the anchor's IR location.
        let saved_cursor = self.debug.instruction_location_cursor;
        self.debug.instruction_location_cursor = anchor_location;
        let jump = self.new_instruction(
            block,
            OperationData::Jump {
                opcode: Opcode::Jump,
                target: new_block,
            },
        )?;
        self.debug.instruction_location_cursor = saved_cursor;
        self.append_control(block, jump)?;

        Ok(new_block)
    }

    // ---- tracing -----------------------------------------------------

    /// Breadth-first walk over all instructions reachable from the control
    /// graph. `visit` is invoked exactly once per control instruction, in
    /// block BFS order; callbacks materialize operand dependencies on
    /// demand through their own bookkeeping.
    pub fn trace(&self, mut visit: impl FnMut(InstrRef) -> Result<()>) -> Result<()> {
        let entry = match self.entry_block.expand() {
            Some(entry) => entry,
            None => return Ok(()),
        };
        let mut queued = vec![false; self.blocks.len()];
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(entry);
        queued[entry.index()] = true;
        while let Some(block) = queue.pop_front() {
            let mut cursor = self.blocks[block].control_head.expand();
            while let Some(instr) = cursor {
                visit(instr)?;
                cursor = self.instrs[instr].next_control.expand();
            }
            if let Some(terminator) = self.blocks[block].control_tail.expand() {
                for target in self.terminator_targets(terminator)? {
                    if !queued[target.index()] {
                        queued[target.index()] = true;
                        queue.push_back(target);
                    }
                }
            }
        }
        Ok(())
    }

    // ---- verification ------------------------------------------------

    /// Check the container invariants: control-list well-formedness, φ link
    /// uniqueness and reference validity. Used after passes and in tests.
    pub fn verify(&self) -> Result<()> {
        for (block, data) in self.blocks.iter() {
            let mut cursor = data.control_head.expand();
            let mut last = None;
            while let Some(instr) = cursor {
                let idata = &self.instrs[instr];
                if idata.block.expand() != Some(block) {
                    return Err(Error::InvalidState("control list crosses block boundary"));
                }
                if !idata.in_control {
                    return Err(Error::InvalidState("control link to a non-control instruction"));
                }
                if idata.opcode().is_terminator() && idata.next_control.is_some() {
                    return Err(Error::InvalidState("terminator in the middle of a control list"));
                }
                last = Some(instr);
                cursor = idata.next_control.expand();
            }
            if data.control_tail.expand() != last {
                return Err(Error::InvalidState("control tail link is stale"));
            }
            if let Some(last) = last {
                if !self.instrs[last].opcode().is_terminator() {
                    return Err(Error::InvalidState("control list does not end in a terminator"));
                }
            }
            // Every side-effecting instruction in the block must be on the
            // control list.
            let mut cursor = data.head.expand();
            while let Some(instr) = cursor {
                let idata = &self.instrs[instr];
                if idata.opcode().has_side_effects() && !idata.in_control {
                    return Err(Error::InvalidState(
                        "side-effecting instruction is off the control path",
                    ));
                }
                let mut bad = false;
                idata.op.for_each_ref(|r| bad |= !self.instrs.is_valid(r));
                if bad {
                    return Err(Error::InvalidState("operand refers outside the function"));
                }
                cursor = idata.next.expand();
            }
        }
        for (_, phi) in self.phis.iter() {
            for i in 0..phi.links.len() {
                for j in i + 1..phi.links.len() {
                    if phi.links[i].0 == phi.links[j].0 {
                        return Err(Error::InvalidState("duplicate phi predecessor link"));
                    }
                }
            }
        }
        for (call, node) in self.calls.iter() {
            let instr = &self.instrs[node.output];
            match instr.op {
                OperationData::Call { call: c, .. } if c == call => {}
                _ => {
                    if instr.block.is_some() {
                        return Err(Error::InvalidState("call node detached from its instruction"));
                    }
                }
            }
            if instr.block.is_some() && instr.block.expand() != Some(node.block) {
                return Err(Error::InvalidState("call node block mismatch"));
            }
        }
        Ok(())
    }
}

/// Iterator over a block's instruction or control list.
pub struct InstrIter<'a> {
    func: &'a OirFunction,
    cursor: PackedOption<InstrRef>,
    control: bool,
}

impl<'a> Iterator for InstrIter<'a> {
    type Item = InstrRef;

    fn next(&mut self) -> Option<InstrRef> {
        let instr = self.cursor.expand()?;
        let data = &self.func.instrs[instr];
        self.cursor = if self.control {
            data.next_control
        } else {
            data.next
        };
        Some(instr)
    }
}
