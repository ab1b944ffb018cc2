//! Top-level pipeline wiring (SPEC_FULL.md §4.12): register allocation,
//! lowering, the label pass, and emission, threaded through one call in
//! the style of the teacher's `compile_file_with_config`/
//! `compile_to_ir_with_config` (`lib.rs`).
//!
//! `compile_to_c` (despite the name, it dispatches on
//! [`Target`](crate::config::Target)) is the crate's real API surface;
//! the CLI in `main.rs` is a thin wrapper around it.

use serde::Serialize;

use crate::alloc::RegAllocator;
use crate::ast::Program;
use crate::codegen::{asm, program as codegen_program};
use crate::config::CompilerConfig;
use crate::config::Target;
use crate::error::CompileError;
use crate::labels::{self, LabelTable};
use crate::lower::Lowerer;

/// One resolved instruction, as rendered for the `--keep-il` sidecar
/// (SPEC_FULL.md §4.11). The IL has no on-disk format of its own
/// (spec.md §6.4), so this is a debug rendering, not a stable contract.
#[derive(Debug, Serialize)]
pub struct IlInstruction {
    pub ip: u32,
    pub label: Option<u32>,
    pub text: String,
}

/// Everything one compile produces: the emitted backend text plus the
/// resolved IL, for callers (and `--keep-il`) that want to inspect the
/// intermediate form without re-running the pipeline.
#[derive(Debug)]
pub struct CompileOutput {
    /// The emitted C translation unit, or pseudo-assembly, depending on
    /// `config.target`.
    pub code: String,
    pub il: Vec<IlInstruction>,
}

/// Runs the full pipeline against one parsed AST: allocate registers,
/// lower to the register IL, resolve labels, then emit.
///
/// Mirrors the teacher's `compile_to_ir_with_config` shape (`lib.rs`):
/// one function taking the parsed program and a config, returning
/// either the finished artifact or a typed error.
pub fn compile_to_c(program: &Program, config: &CompilerConfig) -> Result<CompileOutput, CompileError> {
    tracing::debug!(value_count = program.value_count, "allocate: starting register allocation");
    let mut alloc = RegAllocator::new(program.constant_count);
    alloc.allocate_program(program);
    tracing::trace!("allocate: done");

    tracing::debug!("lower: starting IL lowering");
    let mut lowerer = Lowerer::new(&alloc, config);
    lowerer.lower_program(program)?;
    tracing::trace!(instr_count = lowerer.instrs.len(), "lower: done");

    tracing::debug!("labels: resolving branch targets");
    let labels = labels::run(&lowerer.instrs);
    if labels.total_labels() as u32 >= config.max_break_jumps as u32 * 4 {
        tracing::warn!(
            total_labels = labels.total_labels(),
            "labels: resolved label count is unusually large for this program"
        );
    }
    tracing::trace!(total_labels = labels.total_labels(), "labels: done");

    if lowerer.machine.len() as u32 >= config.signature_budget() {
        tracing::warn!(
            interned = lowerer.machine.len(),
            budget = config.signature_budget(),
            "machine: interned signature count is approaching the soft budget"
        );
    }

    tracing::debug!(target = ?config.target, "emit: starting code emission");
    let code = match config.target {
        Target::C => codegen_program::emit_c(&lowerer.instrs, &labels, &lowerer.machine, config, program)?,
        Target::Asm => asm::emit_asm(&lowerer.instrs, &labels)?,
    };
    tracing::trace!("emit: done");

    let il = render_il(&lowerer.instrs, &labels);
    Ok(CompileOutput { code, il })
}

fn render_il(instrs: &crate::instr::InstrBuilder, labels: &LabelTable) -> Vec<IlInstruction> {
    instrs
        .iter()
        .map(|(ip, ins)| IlInstruction {
            ip: ip.0,
            label: labels.label_of(ip),
            text: format!("{ins:?}"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{CodeBlock, Program, Statement};
    use crate::error::RuntimeErrorKind;

    fn tiny_program() -> Program {
        Program {
            record_protos: vec![],
            procs: vec![],
            exec_block: CodeBlock {
                statements: vec![Statement::Abort { kind: RuntimeErrorKind::Abort }],
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
    fn compiles_a_tiny_program_to_c_by_default() {
        let program = tiny_program();
        let config = CompilerConfig::new();
        let out = compile_to_c(&program, &config).unwrap();
        assert!(out.code.contains("static void run(void) {"));
        assert!(!out.il.is_empty());
    }

    #[test]
    fn compiles_to_asm_when_target_is_asm() {
        let program = tiny_program();
        let config = CompilerConfig::new().with_target(Target::Asm);
        let out = compile_to_c(&program, &config).unwrap();
        assert!(out.code.contains("partial asm emission"));
    }
}
