//! Function call inlining.
//!
//! The call site's block is split right after the invoke instruction; the
//! callee is cloned on demand by tracing its control graph, with
//! `GetArgument` instructions replaced by the call site's argument values
//! and returns rewritten into jumps towards the split-off successor block.
//! The callee's debug metadata (source map, subprogram children, local
//! variable links) is appended to the caller's under a fresh lexical block.

use crate::error::{Error, Result};
use crate::ir::{
    DebugAttr, DebugAttrTag, DebugAttrValue, DebugEntryId, DebugEntryTag, IrModule, TypeEntry,
    TypeRef,
};
use crate::opt::code::{BlockId, CallRef, InlineAsmParam, InstrRef, OirFunction, PhiRef};
use crate::opt::ops::{FloatWidth, Opcode, OperationData};
use crate::opt::pipeline::{Pass, PipelineConfig};
use crate::opt::structure::OirCodeStructure;
use crate::opt::OptModule;
use log::{trace, warn};
use rustc_hash::FxHashMap;

/// Per-call-site inlining limits.
#[derive(Clone, Copy, Debug)]
pub struct InlineParams {
    pub max_inline_depth: usize,
    pub max_inlines_per_function: usize,
}

impl From<&PipelineConfig> for InlineParams {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_inline_depth: config.max_inline_depth,
            max_inlines_per_function: config.max_inlines_per_function,
        }
    }
}

struct DoInline<'a> {
    ir: &'a mut IrModule,
    src: &'a OirFunction,
    dst: &'a mut OirFunction,
    pred_block: BlockId,
    succ_block: BlockId,
    call_ref: CallRef,
    result_phi: Option<(PhiRef, InstrRef)>,
    block_mapping: FxHashMap<BlockId, BlockId>,
    instr_mapping: FxHashMap<InstrRef, InstrRef>,
}

impl<'a> DoInline<'a> {
    fn map_block(&mut self, block: BlockId) -> Result<BlockId> {
        if let Some(&mapped) = self.block_mapping.get(&block) {
            return Ok(mapped);
        }
        let mapped = self.dst.new_block();
        self.dst.set_block_inlined_from(mapped, self.pred_block)?;
        self.block_mapping.insert(block, mapped);
        Ok(mapped)
    }

    /// Mapped counterpart of a callee instruction, materialized on demand.
    fn map_instr(&mut self, instr: InstrRef) -> Result<InstrRef> {
        if !self.instr_mapping.contains_key(&instr) {
            self.clone_instr(instr)?;
        }
        self.instr_mapping
            .get(&instr)
            .copied()
            .ok_or(Error::InvalidState("callee instruction was not cloned"))
    }

    fn map_instr_opt(&mut self, instr: Option<InstrRef>) -> Result<Option<InstrRef>> {
        match instr {
            Some(instr) => Ok(Some(self.map_instr(instr)?)),
            None => Ok(None),
        }
    }

    fn clone_instr(&mut self, instr_ref: InstrRef) -> Result<()> {
        if self.instr_mapping.contains_key(&instr_ref) {
            return Ok(());
        }
        let src_instr = self.src.instr(instr_ref)?;
        let src_block = src_instr
            .block
            .expand()
            .ok_or(Error::InvalidState("callee instruction is detached"))?;
        let mapped_block = self.map_block(src_block)?;

        // Attribute cloned instructions to the appended IR range.
        let base = self.dst.debug.ir_code_length;
        self.dst.debug.instruction_location_cursor = self
            .src
            .debug
            .instruction_location(instr_ref)
            .map(|loc| base + loc);

        let opcode = src_instr.opcode();
        let mapped = match (&src_instr.op, opcode) {
            (_, Opcode::Return) => self.clone_return(instr_ref)?,
            (_, Opcode::TailInvoke) | (_, Opcode::TailInvokeVirtual) => {
                return Err(Error::InvalidState("unable to inline function with tail calls"))
            }
            (OperationData::GetArgument { index, .. }, _) => {
                let call = self.dst.call(self.call_ref)?;
                if *index >= call.argument_count() {
                    return Err(Error::InvalidState(
                        "mismatch between inlined function argument count and call site arguments",
                    ));
                }
                call.argument(*index)?
            }
            (OperationData::Phi { .. }, _) => {
                // Links are attached after all blocks are traced.
                let (_, output) = self.dst.new_phi(mapped_block)?;
                output
            }
            (OperationData::Call { call, .. }, _) => {
                let src_call = self.src.call(*call)?.clone();
                let indirect = self.map_instr_opt(src_call.indirect.expand())?;
                let (dst_call, output) = self.dst.new_call(
                    mapped_block,
                    src_call.decl,
                    src_call.argument_count(),
                    indirect,
                )?;
                let args: Vec<_> = src_call.arguments().collect();
                for (i, arg) in args.into_iter().enumerate() {
                    if let Some(arg) = arg {
                        let mapped_arg = self.map_instr(arg)?;
                        self.dst.call_set_argument(dst_call, i, mapped_arg)?;
                    }
                }
                if let Some(space) = src_call.return_space.expand() {
                    let mapped_space = self.map_instr(space)?;
                    self.dst.call_set_return_space(dst_call, mapped_space)?;
                }
                output
            }
            (OperationData::InlineAsm { inline_asm, .. }, _) => {
                let src_asm = self.src.inline_asm(*inline_asm)?.clone();
                let (dst_asm, output) =
                    self.dst
                        .new_inline_asm(mapped_block, src_asm.asm_id, src_asm.params().len())?;
                for (i, param) in src_asm.params().to_vec().into_iter().enumerate() {
                    let read = self.map_instr_opt(param.read.expand())?;
                    let load_store = self.map_instr_opt(param.load_store.expand())?;
                    self.dst.inline_asm_set_parameter(
                        dst_asm,
                        i,
                        InlineAsmParam {
                            read: read.into(),
                            load_store: load_store.into(),
                        },
                    )?;
                }
                if let Some(default) = src_asm.default_target.expand() {
                    let mapped = self.map_block(default)?;
                    self.dst.inline_asm_set_default_target(dst_asm, mapped)?;
                }
                for (target_id, target) in src_asm.targets().to_vec() {
                    let mapped = self.map_block(target)?;
                    self.dst.inline_asm_add_target(dst_asm, target_id, mapped)?;
                }
                output
            }
            (op, _) => {
                let op = op.clone();
                let mapped_op = op.map(self)?;
                self.dst.new_instruction(mapped_block, mapped_op)?
            }
        };

        if opcode != Opcode::Return && self.src.instr(instr_ref)?.is_control_flow() {
            let src_prev = self.src.instr(instr_ref)?.prev_control();
            let mapped_prev = self.map_instr_opt(src_prev)?;
            self.dst.insert_control(mapped_block, mapped_prev, mapped)?;
        }

        self.instr_mapping.insert(instr_ref, mapped);
        Ok(())
    }

    /// Rewrite a callee `return` into a jump to the successor block,
    /// feeding the join φ with the returned value (or a placeholder).
    fn clone_return(&mut self, instr_ref: InstrRef) -> Result<InstrRef> {
        let src_instr = self.src.instr(instr_ref)?;
        let src_block = src_instr.block.expand().unwrap();
        let mapped_block = self.map_block(src_block)?;
        let value = match &src_instr.op {
            OperationData::OptRef1 { arg, .. } => arg.expand(),
            _ => return Err(Error::InvalidState("malformed return instruction")),
        };

        let src_decl = self.ir.get_declaration(self.src.decl)?;
        let result_type_id = src_decl.result_type_id;
        let returns_value = !self.ir.get_type(result_type_id)?.is_empty();

        if returns_value {
            if self.result_phi.is_none() {
                let (phi, output) = self.dst.new_phi(self.succ_block)?;
                self.result_phi = Some((phi, output));
            }
            let (phi, _) = self.result_phi.unwrap();

            let mapped_value = match value {
                Some(value) => {
                    let mut mapped = self.map_instr(value)?;
                    let return_space = self.dst.call(self.call_ref)?.return_space.expand();
                    if let Some(space) = return_space {
                        let copy = self.dst.copy_memory(
                            mapped_block,
                            space,
                            mapped,
                            TypeRef::new(result_type_id, 0),
                        )?;
                        let tail = self.dst.block(mapped_block)?.control_tail();
                        self.dst.insert_control(mapped_block, tail, copy)?;
                        mapped = space;
                    }
                    mapped
                }
                None => self.generate_placeholder(mapped_block, result_type_id)?,
            };
            self.dst.phi_attach(phi, mapped_block, mapped_value)?;
        }

        self.dst.finalize_jump(mapped_block, self.succ_block)
    }

    /// A `return;` inside a value-returning callee is undefined behavior in
    /// the source program; a zero of the declared type is materialized for
    /// bug-compatibility.
    fn generate_placeholder(
        &mut self,
        block: BlockId,
        result_type_id: crate::ir::TypeId,
    ) -> Result<InstrRef> {
        warn!("inlined return without a value; materializing a zero placeholder");
        let entry = *self.ir.get_type(result_type_id)?.at(0)?;
        let instr = match entry {
            TypeEntry::Int8
            | TypeEntry::Int16
            | TypeEntry::Int32
            | TypeEntry::Int64
            | TypeEntry::Bool
            | TypeEntry::Char
            | TypeEntry::Short
            | TypeEntry::Int
            | TypeEntry::Long
            | TypeEntry::Word => self.dst.int_const(block, 0)?,
            TypeEntry::Float32 => self.dst.float32_const(block, 0.0)?,
            TypeEntry::Float64 => self.dst.float64_const(block, 0.0)?,
            TypeEntry::LongDouble => self.dst.long_double_const(block, 0.0)?,
            TypeEntry::ComplexFloat32 => {
                let zero = self.dst.float32_const(block, 0.0)?;
                self.dst.new_instruction(
                    block,
                    OperationData::Ref2 {
                        opcode: Opcode::ComplexFrom(FloatWidth::Single),
                        args: [zero, zero],
                    },
                )?
            }
            TypeEntry::ComplexFloat64 => {
                let zero = self.dst.float64_const(block, 0.0)?;
                self.dst.new_instruction(
                    block,
                    OperationData::Ref2 {
                        opcode: Opcode::ComplexFrom(FloatWidth::Double),
                        args: [zero, zero],
                    },
                )?
            }
            TypeEntry::ComplexLongDouble => {
                let zero = self.dst.long_double_const(block, 0.0)?;
                self.dst.new_instruction(
                    block,
                    OperationData::Ref2 {
                        opcode: Opcode::ComplexFrom(FloatWidth::LongDouble),
                        args: [zero, zero],
                    },
                )?
            }
            _ => {
                let space = self
                    .dst
                    .call(self.call_ref)?
                    .return_space
                    .expand()
                    .ok_or(Error::InvalidState(
                        "expected valid return space for inlined call site",
                    ))?;
                let zero = self
                    .dst
                    .zero_memory(block, space, TypeRef::new(result_type_id, 0))?;
                let tail = self.dst.block(block)?.control_tail();
                self.dst.insert_control(block, tail, zero)?;
                space
            }
        };
        Ok(instr)
    }

    /// Trace all reachable callee instructions into the caller.
    fn inline_blocks(&mut self) -> Result<()> {
        let mut worklist = Vec::new();
        self.src.trace(|instr| {
            worklist.push(instr);
            Ok(())
        })?;
        for instr in worklist {
            self.clone_instr(instr)?;
        }
        Ok(())
    }

    /// Attach incoming edges of every cloned φ-node.
    fn map_inlined_phis(&mut self) -> Result<()> {
        for src_block in self.src.block_ids() {
            let phis: Vec<PhiRef> = self.src.block(src_block)?.phis.clone();
            for src_phi in phis {
                let src_node = self.src.phi(src_phi)?;
                let Some(&dst_output) = self.instr_mapping.get(&src_node.output) else {
                    continue;
                };
                let dst_phi = match self.dst.instr(dst_output)?.op {
                    OperationData::Phi { phi, .. } => phi,
                    _ => return Err(Error::InvalidState("mapped phi output is not a phi")),
                };
                for (link_block, link_value) in src_node.links().to_vec() {
                    if let Some(&mapped_block) = self.block_mapping.get(&link_block) {
                        let mapped_value = self.map_instr(link_value)?;
                        self.dst.phi_attach(dst_phi, mapped_block, mapped_value)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Replace the call site's jump-and-invoke pair with a jump into the
    /// inlined entry block, rewriting uses of the invoke's result.
    fn link_inlined_entry_block(&mut self) -> Result<()> {
        let src_entry = self
            .src
            .entry_block
            .expand()
            .ok_or(Error::InvalidState("callee has no entry block"))?;
        let inlined_entry = self.map_block(src_entry)?;

        // The split left the predecessor ending in `invoke; jump succ`.
        let jump = self
            .dst
            .block(self.pred_block)?
            .control_tail()
            .ok_or(Error::InvalidState("split predecessor lost its terminator"))?;
        self.dst.drop_control(jump)?;
        self.dst.drop_instr(jump)?;

        let invoke = self
            .dst
            .block(self.pred_block)?
            .control_tail()
            .ok_or(Error::InvalidState("split predecessor lost the invoke"))?;
        if let Some((_, phi_instr)) = self.result_phi {
            self.dst.replace_references(phi_instr, invoke)?;
            self.dst.debug.replace_local_variable(invoke, phi_instr);
        }
        self.dst.drop_control(invoke)?;
        self.dst.drop_instr(invoke)?;

        self.dst.finalize_jump(self.pred_block, inlined_entry)?;
        Ok(())
    }

    fn clone_debug_entry_into(
        &mut self,
        src_entry: DebugEntryId,
        dst_parent: DebugEntryId,
        base: usize,
    ) -> Result<()> {
        let entries = self.ir.debug_entries();
        let tag = entries.get(src_entry).tag;
        let attrs: Vec<DebugAttr> = entries.get(src_entry).attrs().to_vec();
        let children: Vec<DebugEntryId> = entries.get(src_entry).children().to_vec();

        let entries = self.ir.debug_entries_mut();
        let dst_entry = entries.new_child(dst_parent, tag);
        for attr in attrs {
            let attr = match (attr.tag, attr.value) {
                (DebugAttrTag::CodeBegin, DebugAttrValue::CodeIndex(idx)) => DebugAttr {
                    tag: DebugAttrTag::CodeBegin,
                    value: DebugAttrValue::CodeIndex(idx + base),
                },
                (DebugAttrTag::CodeEnd, DebugAttrValue::CodeIndex(idx)) => DebugAttr {
                    tag: DebugAttrTag::CodeEnd,
                    value: DebugAttrValue::CodeIndex(idx + base),
                },
                _ => attr,
            };
            entries.add_attribute(dst_entry, attr);
        }
        for child in children {
            self.clone_debug_entry_into(child, dst_entry, base)?;
        }
        Ok(())
    }

    /// Append the callee's source map to the caller's, shifted past the
    /// caller's current IR extent.
    fn inline_debug_source_map(&mut self) -> Result<()> {
        let base = self.dst.debug.ir_code_length;
        let src_entries: Vec<_> = match self.ir.get_function(self.src.decl) {
            Some(src_meta) => src_meta.source_map.iter().copied().collect(),
            None => return Ok(()),
        };
        if let Some(dst_meta) = self.ir.get_function_mut(self.dst.decl) {
            for entry in src_entries {
                dst_meta
                    .source_map
                    .insert(entry.location, entry.begin + base, entry.end + base);
            }
        }
        Ok(())
    }

    /// Clone the callee's subprogram children (minus parameters) under a new
    /// lexical block spanning the appended IR range.
    fn inline_debug_entries(&mut self) -> Result<()> {
        let base = self.dst.debug.ir_code_length;
        let src_length = self.src.debug.ir_code_length;

        let dst_subprogram = match self.ir.get_function(self.dst.decl).and_then(|f| f.subprogram_id.expand()) {
            Some(id) => id,
            None => return Ok(()),
        };
        let src_subprogram = match self.ir.get_function(self.src.decl).and_then(|f| f.subprogram_id.expand()) {
            Some(id) => id,
            None => return Ok(()),
        };

        let entries = self.ir.debug_entries_mut();
        let lexical_block = entries.new_child(dst_subprogram, DebugEntryTag::LexicalBlock);
        entries.add_attribute(
            lexical_block,
            DebugAttr {
                tag: DebugAttrTag::CodeBegin,
                value: DebugAttrValue::CodeIndex(base),
            },
        );
        entries.add_attribute(
            lexical_block,
            DebugAttr {
                tag: DebugAttrTag::CodeEnd,
                value: DebugAttrValue::CodeIndex(base + src_length),
            },
        );

        let children: Vec<DebugEntryId> = self
            .ir
            .debug_entries()
            .get(src_subprogram)
            .children()
            .to_vec();
        for child in children {
            let tag = self.ir.debug_entries().get(child).tag;
            if tag != DebugEntryTag::FormalParameter && tag != DebugEntryTag::VarargParameter {
                self.clone_debug_entry_into(child, lexical_block, base)?;
            }
        }
        Ok(())
    }

    /// Copy local-variable allocation links under the mapped refs. Refs to
    /// instructions that were never cloned get a fresh placeholder.
    fn inline_debug_allocation_info(&mut self) -> Result<()> {
        let src_entry_block = self
            .src
            .entry_block
            .expand()
            .ok_or(Error::InvalidState("callee has no entry block"))?;

        let variables: Vec<_> = self.src.debug.variables().collect();
        for variable in variables {
            let allocs: Vec<InstrRef> = self
                .src
                .debug
                .variable_allocations(variable)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default();
            for alloc in allocs {
                let mapped_alloc = match self.instr_mapping.get(&alloc) {
                    Some(&mapped) => mapped,
                    None => {
                        let mapped_block = self.map_block(src_entry_block)?;
                        let placeholder = self.dst.int_placeholder(mapped_block)?;
                        self.instr_mapping.insert(alloc, placeholder);
                        placeholder
                    }
                };
                self.dst
                    .debug
                    .register_local_variable_allocation(mapped_alloc, variable);
            }
        }

        let allocations: Vec<_> = self.src.debug.allocations().collect();
        for alloc in allocations {
            let mapped_alloc = match self.instr_mapping.get(&alloc) {
                Some(&mapped) => mapped,
                None => {
                    let mapped_block = self.map_block(src_entry_block)?;
                    let placeholder = self.dst.int_placeholder(mapped_block)?;
                    self.instr_mapping.insert(alloc, placeholder);
                    placeholder
                }
            };
            let refs: Vec<InstrRef> = self
                .src
                .debug
                .local_variable_refs(alloc)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default();
            for value in refs {
                if let Some(&mapped_value) = self.instr_mapping.get(&value) {
                    self.dst.debug.add_local_variable_ref(mapped_alloc, mapped_value);
                }
            }
        }
        Ok(())
    }

    fn run(mut self) -> Result<()> {
        self.inline_blocks()?;
        self.map_inlined_phis()?;
        self.link_inlined_entry_block()?;

        self.inline_debug_source_map()?;
        self.inline_debug_entries()?;
        self.inline_debug_allocation_info()?;
        self.dst.debug.ir_code_length += self.src.debug.ir_code_length;
        self.dst.debug.instruction_location_cursor = None;
        Ok(())
    }
}

impl<'a> crate::opt::ops::InstrRemapper for DoInline<'a> {
    fn map_ref(&mut self, arg: InstrRef) -> Result<InstrRef> {
        self.map_instr(arg)
    }

    fn map_block(&mut self, block: BlockId) -> Result<BlockId> {
        DoInline::map_block(self, block)
    }
}

/// Eligibility check for inlining `src` into `func` at `call_site`.
fn can_inline_function(
    module: &OptModule,
    func: &OirFunction,
    src: &OirFunction,
    call_block: BlockId,
    argument_count: usize,
    params: InlineParams,
) -> Result<bool> {
    let src_decl = module.ir.get_declaration(src.decl)?;
    let src_meta = match module.ir.get_function(src.decl) {
        Some(meta) => meta,
        None => return Ok(false),
    };

    if !src_meta.inline_function
        || src_decl.vararg
        || src_decl.returns_twice
        || src.decl == func.decl
        || func.num_of_inlines >= params.max_inlines_per_function
        || func.block_inline_depth(call_block) >= params.max_inline_depth
    {
        return Ok(false);
    }

    let declared_params = module.ir.get_type(src_decl.params_type_id)?.len();
    if declared_params != argument_count {
        return Ok(false);
    }

    for block in src.block_ids() {
        if !src.block(block)?.public_labels.is_empty() {
            return Ok(false);
        }
        for instr in src.block_instrs(block) {
            match src.instr(instr)?.op {
                OperationData::GetArgument { index, .. } if index >= argument_count => {
                    return Ok(false)
                }
                _ => {}
            }
            match src.instr(instr)?.opcode() {
                Opcode::TailInvoke | Opcode::TailInvokeVirtual => return Ok(false),
                _ => {}
            }
        }
    }

    Ok(true)
}

/// Try to inline the invoke at `instr_ref`. Returns whether inlining
/// happened; the structure index is rebuilt on success.
pub fn try_inline_function_call(
    module: &mut OptModule,
    func: &mut OirFunction,
    structure: &mut OirCodeStructure,
    params: InlineParams,
    instr_ref: InstrRef,
) -> Result<bool> {
    let instr = func.instr(instr_ref)?;
    let call_ref = match instr.op {
        OperationData::Call {
            opcode: Opcode::Invoke,
            call,
        } => call,
        _ => {
            return Err(Error::InvalidRequest(
                "unable to inline non-function-call instruction",
            ))
        }
    };
    let call_block = instr.block.expand().unwrap();
    let call_node = func.call(call_ref)?;
    let decl = call_node.decl;
    let argument_count = call_node.argument_count();

    if module.get_function(decl).is_none() {
        // External function or the caller itself; keep the call.
        return Ok(false);
    }

    let eligible = {
        let src = module.get_function(decl).unwrap();
        can_inline_function(module, func, src, call_block, argument_count, params)?
    };
    if !eligible {
        return Ok(false);
    }

    trace!(
        "inlining call {:?} in function {:?}",
        instr_ref,
        func.decl
    );

    let succ_block = func.split_block_after(instr_ref)?;
    let src = module.take_function(decl)?;
    let result = DoInline {
        ir: &mut module.ir,
        src: &src,
        dst: func,
        pred_block: call_block,
        succ_block,
        call_ref,
        result_phi: None,
        block_mapping: FxHashMap::default(),
        instr_mapping: FxHashMap::default(),
    }
    .run();
    module.put_function(src);
    result?;

    func.num_of_inlines += 1;
    structure.build(func)?;
    // Defensive: cloning must not have broken the SSA container or the
    // φ/CFG correspondence.
    func.verify()?;
    structure.verify_phis(func)?;
    Ok(true)
}

/// Pipeline pass: inline eligible calls until a fixed point.
pub struct InlineFuncPass;

impl Pass for InlineFuncPass {
    fn name(&self) -> &'static str {
        "inline-func"
    }

    fn apply(
        &self,
        module: &mut OptModule,
        func: &mut OirFunction,
        config: &PipelineConfig,
    ) -> Result<bool> {
        let params = InlineParams::from(config);
        let mut structure = OirCodeStructure::new();
        structure.build(func)?;

        let mut any_inlined = false;
        let mut fixpoint = false;
        while !fixpoint {
            fixpoint = true;
            let mut block_index = 0;
            while block_index < structure.num_of_blocks() {
                let block = BlockId::from_u32(block_index as u32);
                if !structure.is_reachable_from_entry(block)? {
                    block_index += 1;
                    continue;
                }
                let mut cursor = func.block(block)?.instr_head();
                while let Some(instr) = cursor {
                    let is_invoke = matches!(
                        func.instr(instr)?.op,
                        OperationData::Call {
                            opcode: Opcode::Invoke,
                            ..
                        }
                    );
                    let inlined = if is_invoke {
                        try_inline_function_call(module, func, &mut structure, params, instr)?
                    } else {
                        false
                    };
                    if inlined {
                        any_inlined = true;
                        fixpoint = false;
                        cursor = func.block(block)?.instr_head();
                    } else {
                        cursor = func.instr(instr)?.next();
                    }
                }
                block_index += 1;
            }
        }
        Ok(any_inlined)
    }
}
