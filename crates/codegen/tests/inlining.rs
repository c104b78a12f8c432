//! Inliner behavior over whole modules.

use kefir_codegen::ir::{
    DebugAttr, DebugAttrTag, DebugAttrValue, DebugEntryTag, FunctionSourceMap, IrFunction,
    IrModule, IrType, SourceLocation, TypeEntry,
};
use kefir_codegen::opt::inline::InlineFuncPass;
use kefir_codegen::opt::ops::{Opcode, OperationData, OpWidth};
use kefir_codegen::opt::{OirFunction, OptModule, Pass, PipelineConfig};

struct Fixture {
    module: OptModule,
    caller: kefir_codegen::ir::FuncDeclId,
    callee: kefir_codegen::ir::FuncDeclId,
}

/// `static inline int sq(int x) { return x * x; }` plus
/// `int g(int a) { return sq(a) + 1; }`, with debug entries attached.
fn build_fixture(callee_vararg: bool, callee_inline: bool) -> Fixture {
    let mut ir = IrModule::new();
    let int_params = ir.new_type(IrType::from_entries(vec![TypeEntry::Int]));
    let int_result = ir.new_type(IrType::from_entries(vec![TypeEntry::Int]));
    let callee_decl = ir.declare_function("sq", int_params, int_result, callee_vararg);
    let caller_decl = ir.declare_function("g", int_params, int_result, false);

    let unit = ir.debug_entries_mut().new_root(DebugEntryTag::CompileUnit);
    let callee_subprogram = ir
        .debug_entries_mut()
        .new_child(unit, DebugEntryTag::Subprogram);
    let local = ir
        .debug_entries_mut()
        .new_child(callee_subprogram, DebugEntryTag::LocalVariable);
    ir.debug_entries_mut().add_attribute(
        local,
        DebugAttr {
            tag: DebugAttrTag::CodeBegin,
            value: DebugAttrValue::CodeIndex(0),
        },
    );
    ir.debug_entries_mut().add_attribute(
        local,
        DebugAttr {
            tag: DebugAttrTag::CodeEnd,
            value: DebugAttrValue::CodeIndex(3),
        },
    );
    let caller_subprogram = ir
        .debug_entries_mut()
        .new_child(unit, DebugEntryTag::Subprogram);

    let file = ir.intern_symbol("sq.c");
    let mut callee_map = FunctionSourceMap::new();
    callee_map.insert(
        SourceLocation {
            file,
            line: 1,
            column: 1,
        },
        0,
        3,
    );

    ir.define_function(
        callee_decl,
        IrFunction {
            decl: callee_decl,
            inline_function: callee_inline,
            ir_code_length: 3,
            subprogram_id: Some(callee_subprogram).into(),
            source_map: callee_map,
        },
    )
    .unwrap();
    ir.define_function(
        caller_decl,
        IrFunction {
            decl: caller_decl,
            inline_function: false,
            ir_code_length: 4,
            subprogram_id: Some(caller_subprogram).into(),
            source_map: FunctionSourceMap::new(),
        },
    )
    .unwrap();

    let mut callee = OirFunction::new(callee_decl);
    let entry = callee.new_block();
    callee.debug.instruction_location_cursor = Some(0);
    let x = callee.get_argument(entry, 0).unwrap();
    callee.debug.instruction_location_cursor = Some(1);
    let squared = callee.int_mul(entry, OpWidth::W32, x, x).unwrap();
    callee.debug.instruction_location_cursor = Some(2);
    callee.finalize_return(entry, Some(squared)).unwrap();
    callee.debug.ir_code_length = 3;
    callee.verify().unwrap();

    let mut caller = OirFunction::new(caller_decl);
    let entry = caller.new_block();
    let a = caller.get_argument(entry, 0).unwrap();
    let (call, invoke) = caller.new_call(entry, callee_decl, 1, None).unwrap();
    caller.call_set_argument(call, 0, a).unwrap();
    caller.append_control(entry, invoke).unwrap();
    let one = caller.int_const(entry, 1).unwrap();
    let sum = caller.int_add(entry, OpWidth::W32, invoke, one).unwrap();
    caller.finalize_return(entry, Some(sum)).unwrap();
    caller.debug.ir_code_length = 4;
    caller.verify().unwrap();

    let mut module = OptModule::new(ir);
    module.insert_function(callee);
    module.insert_function(caller);
    Fixture {
        module,
        caller: caller_decl,
        callee: callee_decl,
    }
}

fn run_inline_pass(fixture: &mut Fixture) -> bool {
    let mut caller = fixture.module.take_function(fixture.caller).unwrap();
    let changed = InlineFuncPass
        .apply(
            &mut fixture.module,
            &mut caller,
            &PipelineConfig::default(),
        )
        .unwrap();
    caller.verify().unwrap();
    fixture.module.put_function(caller);
    changed
}

fn count_invokes(func: &OirFunction) -> usize {
    func.block_ids()
        .flat_map(|b| func.block_instrs(b).collect::<Vec<_>>())
        .filter(|i| {
            func.instr(*i)
                .map(|d| {
                    d.block.is_some()
                        && matches!(
                            d.op,
                            OperationData::Call {
                                opcode: Opcode::Invoke,
                                ..
                            }
                        )
                })
                .unwrap_or(false)
        })
        .count()
}

#[test]
fn eligible_leaf_is_inlined() {
    let mut fixture = build_fixture(false, true);
    assert!(run_inline_pass(&mut fixture));

    let caller = fixture.module.get_function(fixture.caller).unwrap();
    assert_eq!(count_invokes(caller), 0, "invoke must be gone");
    assert_eq!(caller.num_of_inlines, 1);

    // The join φ carries the inlined return value.
    let has_phi = caller.block_ids().any(|b| !caller.block(b).unwrap().phis.is_empty());
    assert!(has_phi, "expected a join phi for the inlined return");

    // Debug: the caller's subprogram gained a lexical block covering the
    // appended IR range, and the source map grew.
    let ir = &fixture.module.ir;
    let caller_meta = ir.get_function(fixture.caller).unwrap();
    let subprogram = caller_meta.subprogram_id.expand().unwrap();
    let lexical_blocks: Vec<_> = ir
        .debug_entries()
        .get(subprogram)
        .children()
        .iter()
        .filter(|c| ir.debug_entries().get(**c).tag == DebugEntryTag::LexicalBlock)
        .copied()
        .collect();
    assert_eq!(lexical_blocks.len(), 1);
    let block = ir.debug_entries().get(lexical_blocks[0]);
    assert_eq!(block.code_begin(), Some(4));
    assert_eq!(block.code_end(), Some(4 + 3));
    assert_eq!(caller_meta.source_map.len(), 1);

    assert_eq!(caller.debug.ir_code_length, 7);
}

#[test]
fn variadic_callee_is_not_inlined() {
    let mut fixture = build_fixture(true, true);
    assert!(!run_inline_pass(&mut fixture));
    let caller = fixture.module.get_function(fixture.caller).unwrap();
    assert_eq!(count_invokes(caller), 1, "call must be preserved");
    assert_eq!(caller.num_of_inlines, 0);
}

#[test]
fn non_inline_function_is_not_inlined() {
    let mut fixture = build_fixture(false, false);
    assert!(!run_inline_pass(&mut fixture));
    let caller = fixture.module.get_function(fixture.caller).unwrap();
    assert_eq!(count_invokes(caller), 1);
}

#[test]
fn inline_budget_is_respected() {
    let mut fixture = build_fixture(false, true);
    let mut caller = fixture.module.take_function(fixture.caller).unwrap();
    let config = PipelineConfig {
        max_inlines_per_function: 0,
        ..PipelineConfig::default()
    };
    let changed = InlineFuncPass
        .apply(&mut fixture.module, &mut caller, &config)
        .unwrap();
    assert!(!changed);
    assert_eq!(caller.num_of_inlines, 0);
    let _ = fixture.callee;
}

#[test]
fn callee_with_public_labels_is_not_inlined() {
    let mut fixture = build_fixture(false, true);
    // Pin the callee's entry block with a public label.
    let mut callee = fixture.module.take_function(fixture.callee).unwrap();
    let label = fixture.module.ir.intern_symbol("entry_label");
    let entry = callee.entry_block.expand().unwrap();
    callee.add_public_label(entry, label).unwrap();
    fixture.module.put_function(callee);

    assert!(!run_inline_pass(&mut fixture));
}

#[test]
fn split_block_preserves_semantics() {
    // Splitting after a control instruction and re-running verification
    // must keep the control/data structure intact, with φs re-keyed.
    let mut ir = IrModule::new();
    let params = ir.new_type(IrType::from_entries(vec![TypeEntry::Int]));
    let result = ir.new_type(IrType::from_entries(vec![TypeEntry::Int]));
    let decl = ir.declare_function("s", params, result, false);

    let mut func = OirFunction::new(decl);
    let entry = func.new_block();
    let join = func.new_block();
    let a = func.get_argument(entry, 0).unwrap();
    let slot_ty = kefir_codegen::ir::TypeRef::new(params, 0);
    let slot = func.alloc_local(entry, slot_ty).unwrap();
    func.int_store(
        entry,
        OpWidth::W32,
        slot,
        a,
        kefir_codegen::opt::ops::MemoryAccessFlags::plain(),
    )
    .unwrap();
    func.finalize_jump(entry, join).unwrap();
    let (phi, phi_out) = func.new_phi(join).unwrap();
    func.phi_attach(phi, entry, a).unwrap();
    func.finalize_return(join, Some(phi_out)).unwrap();
    func.verify().unwrap();

    // Split right after the store: the jump moves to the new block, and
    // the φ link must follow it.
    // Control list: allocation, store, jump.
    let store = func
        .block_control(entry)
        .nth(1)
        .expect("store is the second control entry");
    let split = func.split_block_after(store).unwrap();
    func.verify().unwrap();

    assert_eq!(func.phi(phi).unwrap().link(split), Some(a));
    assert!(func.phi(phi).unwrap().link(entry).is_none());
    // The original block now terminates with a jump to the split block.
    let terminator = func.block_terminator(entry).unwrap();
    match func.instr(terminator).unwrap().op {
        OperationData::Jump { target, .. } => assert_eq!(target, split),
        ref other => panic!("expected jump, got {other:?}"),
    }
}
