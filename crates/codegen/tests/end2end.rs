//! End-to-end scenarios: SSA fixtures through the full pipeline to
//! assembly text. Checks are structural, not byte-exact.

use kefir_codegen::ir::{IrFunction, IrModule, IrType, TypeEntry};
use kefir_codegen::opt::ops::{CmpKind, Opcode, OpWidth};
use kefir_codegen::opt::{OirFunction, OptModule, PipelineConfig};
use kefir_codegen::xasmgen::{AsmSyntax, XasmGen};
use kefir_codegen::CodegenConfig;

fn compile(mut module: OptModule) -> String {
    let mut sink = XasmGen::new(Vec::new(), AsmSyntax::IntelNoprefix);
    kefir_codegen::compile_module(
        &mut module,
        &mut sink,
        &PipelineConfig::default(),
        &CodegenConfig::default(),
    )
    .unwrap();
    String::from_utf8(sink.into_inner()).unwrap()
}

fn int_type(ir: &mut IrModule, entries: &[TypeEntry]) -> kefir_codegen::ir::TypeId {
    ir.new_type(IrType::from_entries(entries.to_vec()))
}

fn define(ir: &mut IrModule, decl: kefir_codegen::ir::FuncDeclId, length: usize) {
    ir.define_function(
        decl,
        IrFunction {
            decl,
            inline_function: false,
            ir_code_length: length,
            subprogram_id: None.into(),
            source_map: kefir_codegen::ir::FunctionSourceMap::new(),
        },
    )
    .unwrap();
}

#[test]
fn trivial_return_forty_two() {
    let mut ir = IrModule::new();
    let params = int_type(&mut ir, &[]);
    let result = int_type(&mut ir, &[TypeEntry::Int]);
    let decl = ir.declare_function("f", params, result, false);
    define(&mut ir, decl, 2);

    let mut func = OirFunction::new(decl);
    let entry = func.new_block();
    let value = func.int_const(entry, 42).unwrap();
    func.finalize_return(entry, Some(value)).unwrap();
    func.verify().unwrap();

    let mut module = OptModule::new(ir);
    module.insert_function(func);
    let asm = compile(module);

    assert!(asm.contains("f:"), "function label missing:\n{asm}");
    assert!(asm.contains("42"), "constant missing:\n{asm}");
    assert!(asm.contains("mov rax"), "return register move missing:\n{asm}");
    assert!(asm.contains("ret"), "return missing:\n{asm}");
    assert!(asm.contains(".debug_info"), "debug info section missing");
    assert!(asm.contains(".debug_abbrev"), "abbrev section missing");
}

#[test]
fn register_pressure_forces_spill_traffic() {
    let mut ir = IrModule::new();
    let params = int_type(&mut ir, &[TypeEntry::Int64; 8]);
    let result = int_type(&mut ir, &[TypeEntry::Int64]);
    let decl = ir.declare_function("pressure", params, result, false);
    define(&mut ir, decl, 16);

    let mut func = OirFunction::new(decl);
    let entry = func.new_block();
    let args: Vec<_> = (0..8)
        .map(|i| func.get_argument(entry, i).unwrap())
        .collect();
    let w = OpWidth::W64;
    let sum = func.int_add(entry, w, args[0], args[1]).unwrap();
    let diff = func.int_sub(entry, w, args[2], args[3]).unwrap();
    let product = func.int_mul(entry, w, sum, diff).unwrap();
    let xor = func.int_xor(entry, w, args[4], args[5]).unwrap();
    let or = func.int_or(entry, w, args[6], args[7]).unwrap();
    let partial = func.int_add(entry, w, product, xor).unwrap();
    let total = func.int_add(entry, w, partial, or).unwrap();
    func.finalize_return(entry, Some(total)).unwrap();
    func.verify().unwrap();

    let mut module = OptModule::new(ir);
    module.insert_function(func);
    let asm = compile(module);

    // Eight live arguments plus intermediates exceed the allocatable bank;
    // at least one value must live in the frame.
    assert!(
        asm.contains("QWORD PTR [rbp - "),
        "expected spill traffic:\n{asm}"
    );
    assert!(asm.contains("sub rsp"), "expected frame allocation:\n{asm}");
}

#[test]
fn comparison_lowers_to_cmp_and_branch() {
    let mut ir = IrModule::new();
    let params = int_type(&mut ir, &[TypeEntry::Int, TypeEntry::Int]);
    let result = int_type(&mut ir, &[TypeEntry::Int]);
    let decl = ir.declare_function("min", params, result, false);
    define(&mut ir, decl, 8);

    let mut func = OirFunction::new(decl);
    let entry = func.new_block();
    let less_block = func.new_block();
    let other_block = func.new_block();
    let a = func.get_argument(entry, 0).unwrap();
    let b = func.get_argument(entry, 1).unwrap();
    let cmp = func
        .scalar_compare(entry, CmpKind::Lesser, OpWidth::W32, a, b)
        .unwrap();
    func.finalize_branch(
        entry,
        kefir_codegen::opt::ops::CondVariant::W8,
        cmp,
        less_block,
        other_block,
    )
    .unwrap();
    func.finalize_return(less_block, Some(a)).unwrap();
    func.finalize_return(other_block, Some(b)).unwrap();
    func.verify().unwrap();

    let mut module = OptModule::new(ir);
    module.insert_function(func);
    let asm = compile(module);

    // The compare-branch pass fuses the comparison into the terminator.
    assert!(asm.contains("cmp"), "comparison missing:\n{asm}");
    assert!(asm.contains("jl"), "fused conditional jump missing:\n{asm}");
}

#[test]
fn wide_bitint_lowers_to_runtime_helper() {
    use kefir_codegen::codegen::lowering::BIGINT_SET_SIGNED_FN;
    use kefir_codegen::opt::ops::OperationData;

    let mut ir = IrModule::new();
    let params = int_type(&mut ir, &[TypeEntry::Int64]);
    let result = int_type(&mut ir, &[TypeEntry::Word]);
    let decl = ir.declare_function("widen", params, result, false);
    define(&mut ir, decl, 4);

    let mut func = OirFunction::new(decl);
    let entry = func.new_block();
    let arg = func.get_argument(entry, 0).unwrap();
    let wide = func
        .new_instruction(
            entry,
            OperationData::Bitint {
                opcode: Opcode::BitintFromSigned,
                arg,
                bitwidth: 200,
                src_bitwidth: 0,
            },
        )
        .unwrap();
    func.finalize_return(entry, Some(wide)).unwrap();

    let mut module = OptModule::new(ir);
    module.insert_function(func);
    kefir_codegen::codegen::lowering::lower_module(&mut module).unwrap();

    // The helper declaration is materialized in the module.
    let sym = module.ir.intern_symbol(BIGINT_SET_SIGNED_FN);
    assert!(
        module.ir.function_by_name(sym).is_some(),
        "bigint helper declaration missing after lowering"
    );

    // A 200-bit temporary spans four qwords.
    let func = module.get_function(decl).unwrap();
    let mut found_temp = false;
    let mut found_call = false;
    for block in func.block_ids() {
        for instr in func.block_instrs(block) {
            match func.instr(instr).unwrap().op {
                OperationData::TemporaryObject { size, .. } if size == 32 => found_temp = true,
                OperationData::Call { .. } => found_call = true,
                _ => {}
            }
        }
    }
    assert!(found_temp, "expected a four-qword temporary object");
    assert!(found_call, "expected a helper invocation");
}

#[test]
fn stash_saves_live_registers_across_calls() {
    let mut ir = IrModule::new();
    let empty = int_type(&mut ir, &[]);
    let result = int_type(&mut ir, &[TypeEntry::Int64]);
    let callee_decl = ir.declare_function("clobber", empty, result, false);
    let params = int_type(&mut ir, &[TypeEntry::Int64, TypeEntry::Float64]);
    let decl = ir.declare_function("keeper", params, result, false);
    define(&mut ir, decl, 8);

    let mut func = OirFunction::new(decl);
    let entry = func.new_block();
    let live_int = func.get_argument(entry, 0).unwrap();
    let live_float = func.get_argument(entry, 1).unwrap();
    let float_sum = func
        .float_binary(
            entry,
            Opcode::FloatAdd(kefir_codegen::opt::ops::FloatWidth::Double),
            live_float,
            live_float,
        )
        .unwrap();
    let (call, invoke) = func.new_call(entry, callee_decl, 0, None).unwrap();
    let _ = call;
    func.append_control(entry, invoke).unwrap();
    // Both values stay live across the call.
    let int_use = func.int_add(entry, OpWidth::W64, live_int, invoke).unwrap();
    let float_bits = func
        .new_instruction(
            entry,
            kefir_codegen::opt::ops::OperationData::Ref1 {
                opcode: Opcode::FloatToInt {
                    signed: true,
                    from: kefir_codegen::opt::ops::FloatWidth::Double,
                },
                arg: float_sum,
            },
        )
        .unwrap();
    let total = func.int_add(entry, OpWidth::W64, int_use, float_bits).unwrap();
    func.finalize_return(entry, Some(total)).unwrap();
    func.verify().unwrap();

    let mut module = OptModule::new(ir);
    module.insert_function(func);
    let asm = compile(module);

    let call_pos = asm.find("call").expect("call missing");
    let before = &asm[..call_pos];
    let after = &asm[call_pos..];
    assert!(
        before.contains("movdqu"),
        "expected an SSE register save before the call:\n{asm}"
    );
    assert!(
        after.contains("movdqu"),
        "expected an SSE register restore after the call:\n{asm}"
    );
    let gp_saved = ["r8", "r9", "r10", "r11"]
        .iter()
        .any(|reg| before.contains(&format!("], {reg}")));
    assert!(
        gp_saved,
        "expected a general-purpose register save before the call:\n{asm}"
    );
}
