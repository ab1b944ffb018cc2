//! The partial assembly emitter (spec.md §4.7 "a partial prototype
//! implementing the same contract for a subset of opcodes; unsupported
//! opcodes return failure"). Its only purpose is to keep the IL honest:
//! any change to [`crate::instr::Instruction`] must still let this
//! backend compile the opcodes it claims to support, so the IL can't
//! quietly grow a C-only shortcut.
//!
//! Register operands render the same way as the C backend (spec.md
//! §4.7): `g{idx}` for a global, `l{idx}` for a local, matched here to
//! a two-register pseudo-assembly with an explicit frame-base register
//! (`fb`) standing in for `global_offset`.

use std::fmt::Write as _;

use crate::error::{CompileError, ErrorKind};
use crate::instr::{BinOp, IPRef, InstrBuilder, Instruction, UnOp};
use crate::labels::LabelTable;
use crate::register::{Bank, Register};

fn render_operand(reg: Register) -> String {
    match reg.bank {
        Bank::Global => format!("[g+{}]", reg.index),
        Bank::Local => format!("[fb+{}]", reg.index),
    }
}

fn bin_op_mnemonic(op: BinOp) -> Option<&'static str> {
    match op {
        BinOp::LongAdd => Some("addq"),
        BinOp::LongSub => Some("subq"),
        BinOp::LongMul => Some("imulq"),
        BinOp::LongEq => Some("cmpeqq"),
        BinOp::LongGt => Some("cmpgtq"),
        BinOp::LongLt => Some("cmpltq"),
        BinOp::LongGe => Some("cmpgeq"),
        BinOp::LongLe => Some("cmpleq"),
        BinOp::PtrEq => Some("cmpeqq"),
        // Division traps and every float op needs a software helper this
        // prototype doesn't carry — unsupported, same as the original's
        // partial backend (spec.md Design Notes: "the C backend is
        // canonical").
        BinOp::LongDiv
        | BinOp::FloatAdd
        | BinOp::FloatSub
        | BinOp::FloatMul
        | BinOp::FloatDiv
        | BinOp::FloatEq
        | BinOp::FloatGt
        | BinOp::FloatLt
        | BinOp::FloatGe
        | BinOp::FloatLe => None,
    }
}

fn unsupported(ip: IPRef, ins: &Instruction) -> CompileError {
    CompileError::logic(
        ErrorKind::TypeNotAllowed,
        format!("asm backend has no lowering for {ins:?} at ip {}", ip.0),
    )
}

/// Emits pseudo-assembly for `instrs`, failing on the first opcode
/// outside this backend's supported subset.
pub fn emit_asm(instrs: &InstrBuilder, labels: &LabelTable) -> Result<String, CompileError> {
    let mut out = String::new();
    writeln!(out, "; partial asm emission (spec.md §4.7)")?;
    for (ip, ins) in instrs.iter() {
        if let Some(id) = labels.label_of(ip) {
            writeln!(out, "label_{id}:")?;
        }
        emit_one(&mut out, ip, ins)?;
    }
    Ok(out)
}

fn emit_one(out: &mut String, ip: IPRef, ins: &Instruction) -> Result<(), CompileError> {
    match ins {
        Instruction::Move { dest, src } => {
            writeln!(out, "    mov {}, {}", render_operand(*dest), render_operand(*src))?;
        }
        Instruction::BinOp { op, dest, lhs, rhs } => {
            let mnemonic = bin_op_mnemonic(*op).ok_or_else(|| unsupported(ip, ins))?;
            writeln!(
                out,
                "    {mnemonic} {}, {}, {}",
                render_operand(*dest),
                render_operand(*lhs),
                render_operand(*rhs)
            )?;
        }
        Instruction::UnOp { op: UnOp::Neg, dest, src } => {
            writeln!(out, "    negq {}, {}", render_operand(*dest), render_operand(*src))?;
        }
        Instruction::UnOp { op: UnOp::Not, dest, src } => {
            writeln!(out, "    notq {}, {}", render_operand(*dest), render_operand(*src))?;
        }
        Instruction::Jump { target } => {
            let id = labels.label_of_or_err(*target)?;
            writeln!(out, "    jmp label_{id}")?;
        }
        Instruction::JumpCheck { cond, target } => {
            let id = labels.label_of_or_err(*target)?;
            writeln!(out, "    jz {}, label_{id}", render_operand(*cond))?;
        }
        Instruction::GcClean => {
            writeln!(out, "    call gc_clean")?;
        }
        Instruction::Abort { kind: None } => {
            writeln!(out, "    jmp program_exit")?;
        }
        _ => return Err(unsupported(ip, ins)),
    }
    Ok(())
}

/// Small helper trait so `emit_one` can report a missing label as a
/// proper `CompileError` instead of panicking, unlike the C backend's
/// `CEmitter::goto` (which treats a missing label as an internal-
/// consistency bug since every jump target there was label-assigned by
/// construction).
trait LabelLookup {
    fn label_of_or_err(&self, ip: IPRef) -> Result<u32, CompileError>;
}

impl LabelLookup for LabelTable {
    fn label_of_or_err(&self, ip: IPRef) -> Result<u32, CompileError> {
        self.label_of(ip)
            .ok_or_else(|| CompileError::logic(ErrorKind::Internal, format!("no label assigned to ip {}", ip.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels;

    #[test]
    fn move_and_jump_render_as_supported_pseudo_asm() {
        let mut instrs = InstrBuilder::new();
        instrs.append(Instruction::Move { dest: Register::local(0), src: Register::global(1) });
        let jump_ip = instrs.append(Instruction::Jump { target: IPRef(0) });
        instrs.patch_branch_target(jump_ip, IPRef(0));
        let labels = labels::run(&instrs);

        let out = emit_asm(&instrs, &labels).unwrap();
        assert!(out.contains("mov [fb+0], [g+1]"));
        assert!(out.contains("jmp label_1"));
    }

    #[test]
    fn float_division_is_unsupported() {
        let mut instrs = InstrBuilder::new();
        instrs.append(Instruction::BinOp {
            op: BinOp::FloatDiv,
            dest: Register::local(0),
            lhs: Register::local(1),
            rhs: Register::local(2),
        });
        let labels = labels::run(&instrs);
        assert!(emit_asm(&instrs, &labels).is_err());
    }

    #[test]
    fn alloc_is_unsupported() {
        let mut instrs = InstrBuilder::new();
        instrs.append(Instruction::AllocI {
            dest: Register::local(0),
            size: 4,
            trace_mode: crate::instr::TraceMode::None,
        });
        let labels = labels::run(&instrs);
        assert!(emit_asm(&instrs, &labels).is_err());
    }
}
