//! `if`/`else if`/`else` and `while` lowering (spec.md §4.5), plus
//! variable declarations, `return`, `break`, and `continue` — the
//! statement-level half of [`super::Lowerer`], split into its own file
//! the way the teacher splits `codegen/control_flow.rs` out of
//! `codegen/mod.rs`.

use crate::ast::{CodeBlock, Conditional, Proc, Statement};
use crate::error::CompileError;
use crate::instr::{IPRef, Instruction};
use crate::register::Register;

use super::Lowerer;

/// Tracks the enclosing loop's continue target and the buffer of
/// pending `break` jumps to patch once the loop's exit ip is known
/// (spec.md §8 "Maximum break-jump buffer capacity", default 64 —
/// see [`crate::config::CompilerConfig::max_break_jumps`]).
struct LoopCtx {
    continue_ip: IPRef,
    break_jumps: Vec<IPRef>,
    max_break_jumps: usize,
}

pub fn lower_code_block(
    lowerer: &mut Lowerer<'_>,
    block: &CodeBlock,
    proc: Option<&Proc>,
    mut loop_ctx: Option<&mut LoopCtxHandle>,
) -> Result<(), CompileError> {
    for stmt in &block.statements {
        lower_statement(lowerer, stmt, proc, loop_ctx.as_deref_mut())?;
    }
    Ok(())
}

/// A thin indirection so [`lower_code_block`] can be called both from
/// the top of a loop (with a live [`LoopCtx`]) and from anywhere else
/// (with none), without duplicating the recursion.
pub struct LoopCtxHandle(LoopCtx);

impl std::ops::Deref for LoopCtxHandle {
    type Target = LoopCtx;
    fn deref(&self) -> &LoopCtx {
        &self.0
    }
}
impl std::ops::DerefMut for LoopCtxHandle {
    fn deref_mut(&mut self) -> &mut LoopCtx {
        &mut self.0
    }
}

fn lower_statement(
    lowerer: &mut Lowerer<'_>,
    stmt: &Statement,
    proc: Option<&Proc>,
    loop_ctx: Option<&mut LoopCtxHandle>,
) -> Result<(), CompileError> {
    match stmt {
        Statement::DeclVar(decl) => {
            if decl.var_info.is_used {
                lowerer.lower_value(&decl.set_value, proc)?;
                if lowerer_should_move(lowerer, decl.set_value.id) {
                    let var_reg = lowerer_var_reg(lowerer, decl.var_info.id);
                    lowerer.instrs.append(Instruction::Move {
                        dest: var_reg,
                        src: lowerer_eval_reg(lowerer, decl.set_value.id),
                    });
                }
            } else if decl.set_value.affects_state {
                lowerer.lower_value(&decl.set_value, proc)?;
            }
        }
        Statement::Cond(cond) => lower_conditional(lowerer, cond, proc, loop_ctx)?,
        Statement::While(while_loop) => lower_while(lowerer, while_loop, proc)?,
        Statement::Value { value, .. } => {
            lowerer.lower_value(value, proc)?;
            lowerer.emit_value_free(value, proc)?;
        }
        Statement::ReturnValue { value, gc_status } => {
            lowerer.lower_value(value, proc)?;
            let src_reg = lowerer_eval_reg(lowerer, value.id);
            let return_slot = Register::local(0);
            if lowerer_should_move(lowerer, value.id) && src_reg != return_slot {
                lowerer.instrs.append(Instruction::Move { dest: return_slot, src: src_reg });
            }
            match gc_status {
                crate::ast::GcStatus::LocalAlloc => {
                    lowerer.instrs.append(Instruction::GcTrace {
                        target: return_slot,
                        mode: crate::instr::StaticTraceMode::TraceChildren,
                    });
                }
                crate::ast::GcStatus::LocalDynamic => {
                    if let crate::types::TypecheckType::TypeArg(id) = value.ty {
                        let typearg_reg = proc
                            .map(|p| Register::local(p.params.len() as u16 + 1 + u16::from(id)))
                            .ok_or_else(super::internal)?;
                        lowerer.instrs.append(Instruction::DynamicTrace {
                            target: return_slot,
                            typearg_slot: typearg_reg,
                        });
                    }
                }
                crate::ast::GcStatus::None => {}
            }
            emit_return(lowerer, proc);
        }
        Statement::Return => emit_return(lowerer, proc),
        Statement::Break => {
            let ctx = loop_ctx.ok_or_else(|| {
                CompileError::logic(crate::error::ErrorKind::CannotBreak, "break outside a loop")
            })?;
            if ctx.break_jumps.len() == ctx.max_break_jumps {
                return Err(CompileError::logic(
                    crate::error::ErrorKind::Internal,
                    format!("loop exceeds the {}-entry break-jump buffer", ctx.max_break_jumps),
                ));
            }
            let ip = lowerer.instrs.append(Instruction::Jump { target: IPRef(0) });
            ctx.break_jumps.push(ip);
        }
        Statement::Continue => {
            let ctx = loop_ctx.ok_or_else(|| {
                CompileError::logic(crate::error::ErrorKind::CannotContinue, "continue outside a loop")
            })?;
            lowerer.instrs.append(Instruction::Jump { target: ctx.continue_ip });
        }
        Statement::Abort { kind } => {
            lowerer.instrs.append(Instruction::Abort { kind: Some(*kind) });
        }
    }
    Ok(())
}

fn emit_return(lowerer: &mut Lowerer<'_>, proc: Option<&Proc>) {
    if proc.is_some_and(|p| p.do_gc) {
        lowerer.instrs.append(Instruction::GcClean);
    }
    lowerer.instrs.append(Instruction::Return { value: Register::local(0) });
}

/// `if`/`else if`/`else`: a chain of [`Conditional`] nodes linked by
/// `next_if_false`, each condition's `JUMP_CHECK` skipping to the next
/// link, each non-final arm's body ending in an escape `JUMP` past the
/// whole chain (spec.md §4.5 "If/else-if/else").
fn lower_conditional(
    lowerer: &mut Lowerer<'_>,
    cond: &Conditional,
    proc: Option<&Proc>,
    mut loop_ctx: Option<&mut LoopCtxHandle>,
) -> Result<(), CompileError> {
    let mut escape_jumps = Vec::new();
    let mut current = Some(cond);
    while let Some(c) = current {
        if let Some(condition) = &c.condition {
            lowerer.lower_value(condition, proc)?;
            let check_ip = lowerer.instrs.append(Instruction::JumpCheck {
                cond: lowerer_eval_reg(lowerer, condition.id),
                target: IPRef(0),
            });
            lowerer.emit_value_free(condition, proc)?;
            lower_code_block(lowerer, &c.exec_block, proc, loop_ctx.as_deref_mut())?;
            if c.next_if_false.is_some() {
                escape_jumps.push(lowerer.instrs.append(Instruction::Jump { target: IPRef(0) }));
            }
            lowerer.instrs.patch_branch_target(check_ip, lowerer.instrs.next_ip());
        } else {
            lower_code_block(lowerer, &c.exec_block, proc, loop_ctx.as_deref_mut())?;
        }
        current = c.next_if_false.as_deref();
    }
    let end_ip = lowerer.instrs.next_ip();
    for ip in escape_jumps {
        lowerer.instrs.patch_branch_target(ip, end_ip);
    }
    Ok(())
}

/// `while`: the condition is re-evaluated every iteration
/// (`continue_ip` points at the condition, not the body), `break`
/// collects into a fresh buffer patched to the instruction right after
/// the loop once its size is known (spec.md §4.5 "While loop").
fn lower_while(lowerer: &mut Lowerer<'_>, while_loop: &crate::ast::WhileLoop, proc: Option<&Proc>) -> Result<(), CompileError> {
    let continue_ip = lowerer.instrs.next_ip();
    lowerer.lower_value(&while_loop.condition, proc)?;
    let check_ip = lowerer.instrs.append(Instruction::JumpCheck {
        cond: lowerer_eval_reg(lowerer, while_loop.condition.id),
        target: IPRef(0),
    });
    lowerer.emit_value_free(&while_loop.condition, proc)?;

    let mut ctx = LoopCtxHandle(LoopCtx {
        continue_ip,
        break_jumps: Vec::new(),
        max_break_jumps: lowerer.config.max_break_jumps,
    });
    lower_code_block(lowerer, &while_loop.exec_block, proc, Some(&mut ctx))?;
    lowerer.instrs.append(Instruction::Jump { target: continue_ip });
    lowerer.instrs.patch_branch_target(check_ip, lowerer.instrs.next_ip());
    lowerer.emit_value_free(&while_loop.condition, proc)?;

    let end_ip = lowerer.instrs.next_ip();
    for ip in ctx.break_jumps {
        lowerer.instrs.patch_branch_target(ip, end_ip);
    }
    Ok(())
}

fn lowerer_eval_reg(lowerer: &Lowerer<'_>, value_id: u32) -> Register {
    lowerer.alloc.eval_reg(value_id)
}

fn lowerer_should_move(lowerer: &Lowerer<'_>, value_id: u32) -> bool {
    lowerer.alloc.should_move(value_id)
}

fn lowerer_var_reg(lowerer: &Lowerer<'_>, var_id: u32) -> Register {
    lowerer.alloc.var_reg(var_id)
}
