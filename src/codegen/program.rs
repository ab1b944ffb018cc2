//! Top-level C emission (spec.md §4.7): the fixed runtime header, the
//! constant-pool `stack[]` initializer, `init_all()`, one C statement
//! per IL instruction, and a `main()`.

use std::fmt::Write as _;

use crate::ast::Program;
use crate::config::CompilerConfig;
use crate::error::CompileError;
use crate::instr::InstrBuilder;
use crate::labels::LabelTable;
use crate::machine::Machine;

use super::globals;
use super::runtime;
use super::state::CEmitter;
use super::types;

/// Assembles the complete emitted C translation unit for one compile.
pub fn emit_c(
    instrs: &InstrBuilder,
    labels: &LabelTable,
    machine: &Machine,
    config: &CompilerConfig,
    program: &Program,
) -> Result<String, CompileError> {
    let mut emitter = CEmitter::new(instrs, labels, machine, config);

    runtime::emit_runtime_header(&mut emitter.out)?;
    globals::emit_stack_initializer(&mut emitter.out, program, config.stack_size)?;

    // spec.md §3 "Record super-type table": `type_table[r] = super_id + 1`,
    // `0` reserved for "no base" — without the offset a base record id of
    // `0` would be indistinguishable from having no base at all.
    let record_supers: Vec<(u16, u16)> = program
        .record_protos
        .iter()
        .filter_map(|proto| proto.base_record_id.map(|base| (proto.record_id, base + 1)))
        .collect();
    types::emit_type_table(&mut emitter.out, machine, &record_supers)?;

    writeln!(emitter.out, "static void run(void) {{")?;
    for (ip, ins) in instrs.iter() {
        emitter.emit_instruction(ip, ins)?;
    }
    writeln!(emitter.out, "program_exit:;")?;
    writeln!(emitter.out, "    return;")?;
    writeln!(emitter.out, "panic:;")?;
    writeln!(emitter.out, "    return;")?;
    writeln!(emitter.out, "}}")?;
    writeln!(emitter.out)?;

    emit_main(&mut emitter.out, config)?;

    Ok(emitter.out)
}

fn emit_main(out: &mut String, config: &CompilerConfig) -> Result<(), CompileError> {
    if config.robot_platform {
        // A PROS-style robot entry point (spec.md §6.3): the platform's
        // own startup calls `autonomous`/`opcontrol`, not `main` directly.
        writeln!(out, "void autonomous(void) {{")?;
        writeln!(out, "    init_all();")?;
        emit_backtrace_call(out, config)?;
        writeln!(out, "}}")?;
        writeln!(out)?;
        writeln!(out, "void opcontrol(void) {{}}")?;
    } else {
        writeln!(out, "int main(void) {{")?;
        writeln!(out, "    init_all();")?;
        emit_backtrace_call(out, config)?;
        writeln!(out, "    if (last_err != 0) {{")?;
        writeln!(out, "        return 1;")?;
        writeln!(out, "    }}")?;
        writeln!(out, "    return 0;")?;
        writeln!(out, "}}")?;
    }
    writeln!(out)?;
    Ok(())
}

fn emit_backtrace_call(out: &mut String, config: &CompilerConfig) -> Result<(), CompileError> {
    if config.emit_debug_backtrace {
        writeln!(out, "    run();")?;
        writeln!(out, "    if (last_err != 0) {{")?;
        writeln!(
            out,
            "        fprintf(stderr, \"panic: %d at ip %u\\n\", last_err, last_src_loc);"
        )?;
        writeln!(out, "    }}")?;
    } else {
        writeln!(out, "    run();")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::RegAllocator;
    use crate::ast::{CodeBlock, Statement};
    use crate::labels;
    use crate::lower::Lowerer;

    fn tiny_program() -> Program {
        Program {
            record_protos: vec![],
            procs: vec![],
            exec_block: CodeBlock {
                statements: vec![Statement::Abort {
                    kind: crate::error::RuntimeErrorKind::Abort,
                }],
            },
            value_count: 0,
            var_decl_count: 0,
            proc_call_count: 0,
            proc_count: 0,
            record_count: 0,
            constant_count: 0,
        }
    }

    #[test]
    fn emits_a_compilable_looking_translation_unit_with_main() {
        let program = tiny_program();
        let config = CompilerConfig::new();
        let mut alloc = RegAllocator::new(program.constant_count);
        alloc.allocate_program(&program);
        let mut lowerer = Lowerer::new(&alloc, &config);
        lowerer.lower_program(&program).unwrap();
        let labels = labels::run(&lowerer.instrs);

        let out = emit_c(&lowerer.instrs, &labels, &lowerer.machine, &config, &program).unwrap();
        assert!(out.contains("static void run(void) {"));
        assert!(out.contains("int main(void) {"));
        assert!(out.contains("init_all();"));
    }

    #[test]
    fn robot_platform_emits_autonomous_instead_of_main() {
        let program = tiny_program();
        let config = CompilerConfig::new().with_robot_platform(true);
        let mut alloc = RegAllocator::new(program.constant_count);
        alloc.allocate_program(&program);
        let mut lowerer = Lowerer::new(&alloc, &config);
        lowerer.lower_program(&program).unwrap();
        let labels = labels::run(&lowerer.instrs);

        let out = emit_c(&lowerer.instrs, &labels, &lowerer.machine, &config, &program).unwrap();
        assert!(out.contains("void autonomous(void) {"));
        assert!(!out.contains("int main(void) {"));
    }
}
