//! The register allocator (spec.md §4.3), grounded in
//! `original_source/compiler.c`'s `allocate_value_regs`/
//! `allocate_code_block_regs`.
//!
//! Allocation is a single top-down pass over the AST that decides, for
//! every [`Value`], which register its result lives in and whether the
//! lowerer needs to emit a `MOVE` to get it there (`move_eval`) or can
//! alias the producer's register directly. The pass never emits IL
//! itself — [`crate::lower`] reads these maps back out while lowering.

use std::collections::HashMap;

use crate::ast::{CodeBlock, Proc, Program, Statement, Value, ValueKind};
use crate::register::Register;

/// Per-procedure and per-value allocation results, looked up by the
/// lowerer during IL generation.
#[derive(Debug, Default)]
pub struct RegAllocator {
    /// `value.id -> register holding its result`.
    eval_regs: HashMap<u32, Register>,
    /// `value.id -> does the lowerer need to MOVE into eval_regs, or can
    /// it trust the producer already left the result there`.
    move_eval: HashMap<u32, bool>,
    /// `var_info.id -> the register that variable lives in`.
    var_regs: HashMap<u32, Register>,
    /// `proc_call.id -> the local slot its call frame starts at`, used by
    /// the lowerer to emit `STACK_DEOFFSET` after the call returns.
    proc_call_offsets: HashMap<u32, u16>,
    /// `proc.id -> highwater mark of local slots used by calls within
    /// that procedure's body`, the operand to that procedure's
    /// `STACK_VALIDATE`.
    proc_call_max_locals: HashMap<u32, u16>,
    /// Global slot counter; globals are addressed starting right after
    /// the constant pool (`program.constant_count`).
    current_global: u16,
}

impl RegAllocator {
    pub fn new(constant_count: u32) -> Self {
        RegAllocator {
            current_global: constant_count as u16,
            ..Default::default()
        }
    }

    pub fn eval_reg(&self, value_id: u32) -> Register {
        self.eval_regs[&value_id]
    }

    pub fn should_move(&self, value_id: u32) -> bool {
        self.move_eval.get(&value_id).copied().unwrap_or(false)
    }

    pub fn var_reg(&self, var_id: u32) -> Register {
        self.var_regs[&var_id]
    }

    pub fn proc_call_offset(&self, proc_call_id: u32) -> u16 {
        self.proc_call_offsets[&proc_call_id]
    }

    pub fn proc_max_locals(&self, proc_id: u32) -> u16 {
        self.proc_call_max_locals.get(&proc_id).copied().unwrap_or(0)
    }

    /// Allocates the whole program: globals start at register 0 in the
    /// top-level (`proc = None`) frame.
    pub fn allocate_program(&mut self, program: &Program) {
        self.allocate_code_block(&program.exec_block, 0, None);
    }

    /// `ALLOC_LOC`: allocates local slot `index` within `proc`'s frame,
    /// bumping that procedure's highwater mark if this is the deepest
    /// local seen yet. At the top level (`proc = None`) there is no
    /// highwater mark to track — the top-level frame has no
    /// `STACK_VALIDATE` of its own.
    fn alloc_loc(&mut self, index: u16, proc: Option<&Proc>) -> Register {
        if let Some(proc) = proc {
            let entry = self.proc_call_max_locals.entry(proc.id).or_insert(0);
            if index > *entry {
                *entry = index;
            }
        }
        Register::local(index)
    }

    fn alloc_global(&mut self) -> Register {
        let reg = Register::global(self.current_global);
        self.current_global += 1;
        reg
    }

    /// Allocates registers for one expression, returning the next free
    /// local slot. Mirrors `allocate_value_regs`: a pure, unused value
    /// short-circuits to `current_reg` unchanged.
    fn allocate_value(
        &mut self,
        value: &Value,
        current_reg: u16,
        target_reg: Option<Register>,
        proc: Option<&Proc>,
    ) -> u16 {
        if !value.affects_state {
            return current_reg;
        }

        let mut extra_regs = current_reg;
        match &value.kind {
            ValueKind::Primitive { constant_id, .. } => {
                self.eval_regs.insert(value.id, Register::global(*constant_id as u16));
                self.move_eval.insert(value.id, true);
                return current_reg;
            }
            ValueKind::AllocArray { size, .. } => {
                self.allocate_value(size, current_reg, None, proc);
            }
            ValueKind::ArrayLiteral { elements, .. } => {
                for elem in elements {
                    self.allocate_value(elem, current_reg + 1, None, proc);
                }
            }
            ValueKind::AllocRecord { init_values, .. } => {
                for init in init_values {
                    self.allocate_value(&init.value, current_reg + 1, None, proc);
                }
            }
            ValueKind::Proc(inner) => {
                self.allocate_proc_literal(value, inner);
                return current_reg;
            }
            ValueKind::Var { var_id } => {
                let reg = self.var_regs[var_id];
                self.eval_regs.insert(value.id, reg);
                self.move_eval.insert(value.id, true);
                return current_reg;
            }
            ValueKind::SetVar { var_info, set_value } => {
                if var_info.is_used {
                    let reg = self.var_regs[&var_info.id];
                    self.allocate_value(set_value, current_reg, Some(reg), proc);
                } else if set_value.affects_state {
                    self.allocate_value(set_value, current_reg, None, proc);
                }
                let reg = self.eval_regs[&set_value.id];
                let moved = self.should_move(set_value.id);
                self.eval_regs.insert(value.id, reg);
                self.move_eval.insert(value.id, moved);
                return current_reg;
            }
            ValueKind::SetIndex { array, index, value: set_value } => {
                if array.affects_state {
                    extra_regs = self.allocate_value(array, extra_regs, None, proc);
                    if !matches!(index.kind, ValueKind::Primitive { .. }) {
                        extra_regs = self.allocate_value(index, extra_regs, None, proc);
                    }
                    self.allocate_value(set_value, extra_regs, None, proc);
                } else if set_value.affects_state {
                    self.allocate_value(set_value, current_reg, None, proc);
                }
                let reg = self.eval_regs[&set_value.id];
                let moved = self.should_move(set_value.id);
                self.eval_regs.insert(value.id, reg);
                self.move_eval.insert(value.id, moved);
                return current_reg;
            }
            ValueKind::SetProp { record, value: set_value, .. } => {
                if record.affects_state {
                    extra_regs = self.allocate_value(record, extra_regs, None, proc);
                    self.allocate_value(set_value, extra_regs, None, proc);
                } else if set_value.affects_state {
                    self.allocate_value(set_value, current_reg, None, proc);
                }
                let reg = self.eval_regs[&set_value.id];
                let moved = self.should_move(set_value.id);
                self.eval_regs.insert(value.id, reg);
                self.move_eval.insert(value.id, moved);
                return current_reg;
            }
            ValueKind::GetIndex { array, index } => {
                extra_regs = self.allocate_value(array, extra_regs, None, proc);
                if !matches!(index.kind, ValueKind::Primitive { .. }) {
                    self.allocate_value(index, extra_regs, None, proc);
                }
            }
            ValueKind::GetProp { record, .. } => {
                self.allocate_value(record, extra_regs, None, proc);
            }
            ValueKind::BinaryOp { lhs, rhs, .. } => {
                extra_regs = self.allocate_value(lhs, extra_regs, None, proc);
                self.allocate_value(rhs, extra_regs, None, proc);
            }
            ValueKind::UnaryOp { operand, op, is_postfix } => {
                self.allocate_value(operand, current_reg, None, proc);
                let is_prefix_incdec = matches!(
                    op,
                    crate::ast::UnaryOperator::Increment | crate::ast::UnaryOperator::Decrement
                ) && !is_postfix;
                if is_prefix_incdec {
                    let reg = self.eval_regs[&operand.id];
                    let moved = self.should_move(operand.id);
                    self.eval_regs.insert(value.id, reg);
                    self.move_eval.insert(value.id, moved);
                    return current_reg;
                }
                let reg = target_reg.unwrap_or_else(|| self.alloc_loc(current_reg, proc));
                self.eval_regs.insert(value.id, reg);
                self.move_eval.insert(value.id, false);
                return current_reg + 1;
            }
            ValueKind::TypeOp { operand, .. } => {
                self.allocate_value(operand, current_reg, None, proc);
            }
            ValueKind::ProcCall(call) => {
                let reg = self.alloc_loc(extra_regs, proc);
                self.eval_regs.insert(value.id, reg);
                self.proc_call_offsets.insert(call.id, extra_regs);
                extra_regs += 1;

                let is_nothing = matches!(value.ty, crate::types::TypecheckType::Nothing);
                let lands_exactly_on_target = target_reg
                    .map(|t| t.is_local() && t.index == current_reg)
                    .unwrap_or(false);
                self.move_eval
                    .insert(value.id, !(is_nothing || target_reg.is_none() || lands_exactly_on_target));

                for arg in &call.arguments {
                    let arg_reg = self.alloc_loc(extra_regs, proc);
                    self.allocate_value(arg, extra_regs, Some(arg_reg), proc);
                    extra_regs += 1;
                }
                // `lower_proc_call` writes one local slot per generic
                // type-argument starting right after the argument slots
                // (`base + arguments.len() + 1`); the highwater mark here
                // must account for those too (spec.md §3 invariant 2).
                for i in 0..call.typeargs.len() as u16 {
                    self.alloc_loc(extra_regs + i, proc);
                }
                self.allocate_value(&call.procedure, extra_regs, None, proc);
                return current_reg + 1;
            }
            ValueKind::Foreign(foreign) => {
                extra_regs = self.allocate_value(&foreign.op_id, extra_regs, None, proc);
                if let Some(input) = &foreign.input {
                    extra_regs = self.allocate_value(input, extra_regs, None, proc);
                }
            }
        }

        let mut next = current_reg;
        if let Some(target) = target_reg {
            self.eval_regs.insert(value.id, target);
            self.move_eval.insert(value.id, false);
        } else {
            let reg = self.alloc_loc(current_reg, proc);
            self.eval_regs.insert(value.id, reg);
            self.move_eval.insert(value.id, true);
            next += 1;
        }
        next
    }

    /// A procedure literal allocates a global slot for its own address,
    /// local slots 1..=param_count for its parameters, and hands the
    /// rest of its frame to its body starting right after the
    /// type-argument info slots (spec.md §4.3 "Procedure literal").
    fn allocate_proc_literal(&mut self, value: &Value, proc: &Proc) {
        let addr_reg = self.alloc_global();
        self.eval_regs.insert(value.id, addr_reg);
        self.move_eval.insert(value.id, true);
        self.var_regs.insert(proc.id, addr_reg);

        let mut current_arg_reg: u16 = 1;
        for param in &proc.params {
            let reg = self.alloc_loc(current_arg_reg, Some(proc));
            self.var_regs.insert(param.var.id, reg);
            current_arg_reg += 1;
        }

        let body_start = current_arg_reg + u16::from(proc.typeargs);
        self.allocate_code_block(&proc.exec_block, body_start, Some(proc));
    }

    /// Mirrors `allocate_code_block_regs`: a declaration that binds a
    /// pure, never-mutated value (a primitive, a procedure, or another
    /// never-mutated variable of matching globality) reuses its
    /// producer's register instead of copying into a fresh slot
    /// (spec.md §4.3 "Variable declaration").
    fn allocate_code_block(&mut self, block: &CodeBlock, mut current_reg: u16, proc: Option<&Proc>) {
        for stmt in &block.statements {
            match stmt {
                Statement::DeclVar(decl) => {
                    let aliasable = !decl.var_info.has_mutated && is_aliasable(&decl.set_value, &decl.var_info);
                    if aliasable {
                        current_reg = self.allocate_value(&decl.set_value, current_reg, None, proc);
                        if decl.var_info.is_used {
                            let reg = self.eval_regs[&decl.set_value.id];
                            self.var_regs.insert(decl.var_info.id, reg);
                            self.move_eval.insert(decl.set_value.id, false);
                        }
                    } else if decl.var_info.is_global {
                        if decl.var_info.is_used {
                            let reg = self.alloc_global();
                            self.var_regs.insert(decl.var_info.id, reg);
                            self.allocate_value(&decl.set_value, current_reg, Some(reg), proc);
                        } else if decl.set_value.affects_state {
                            self.allocate_value(&decl.set_value, current_reg, None, proc);
                        }
                    } else if decl.var_info.is_used {
                        let reg = self.alloc_loc(current_reg, proc);
                        self.var_regs.insert(decl.var_info.id, reg);
                        self.allocate_value(&decl.set_value, current_reg, Some(reg), proc);
                        current_reg += 1;
                    } else if decl.set_value.affects_state {
                        self.allocate_value(&decl.set_value, current_reg, None, proc);
                    }
                }
                Statement::Cond(cond) => self.allocate_conditional(cond, current_reg, proc),
                Statement::While(loop_) => {
                    self.allocate_value(&loop_.condition, current_reg, None, proc);
                    self.allocate_code_block(&loop_.exec_block, current_reg, proc);
                }
                Statement::Value { value, .. } => {
                    let scratchpad = self.alloc_loc(0, proc);
                    self.allocate_value(value, current_reg, Some(scratchpad), proc);
                }
                Statement::ReturnValue { value, .. } => {
                    let return_reg = self.alloc_loc(0, proc);
                    self.allocate_value(value, current_reg, Some(return_reg), proc);
                }
                Statement::Return | Statement::Break | Statement::Continue | Statement::Abort { .. } => {}
            }
        }
    }

    fn allocate_conditional(&mut self, cond: &crate::ast::Conditional, current_reg: u16, proc: Option<&Proc>) {
        let mut current = Some(cond);
        while let Some(c) = current {
            if let Some(condition) = &c.condition {
                self.allocate_value(condition, current_reg, None, proc);
            }
            self.allocate_code_block(&c.exec_block, current_reg, proc);
            current = c.next_if_false.as_deref();
        }
    }
}

/// A variable declaration's value can alias its producer's register
/// when the producer already lives somewhere stable: a primitive or a
/// procedure literal (always addressed through a global slot). Aliasing
/// a bare variable read additionally requires knowing whether the
/// source variable itself was ever mutated and whether it crosses the
/// local/global boundary (`original_source/compiler.c`'s
/// `allocate_code_block_regs` DECL_VAR case) — information this AST's
/// `ValueKind::Var` doesn't carry, so that case conservatively copies
/// instead of aliasing rather than risk aliasing a mutable slot.
fn is_aliasable(set_value: &Value, _var_info: &crate::ast::VarInfo) -> bool {
    matches!(set_value.kind, ValueKind::Primitive { .. } | ValueKind::Proc(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FreeStatus, TraceStatus};
    use crate::types::TypecheckType;

    fn primitive(id: u32) -> Value {
        Value {
            id,
            ty: TypecheckType::Long,
            affects_state: true,
            free_status: FreeStatus::None,
            trace_status: TraceStatus::None,
            kind: ValueKind::Primitive { constant_id: 0, data: 0 },
        }
    }

    #[test]
    fn primitive_aliases_global_zero_and_never_moves_through_a_local() {
        let mut alloc = RegAllocator::new(1);
        let program = Program {
            record_protos: vec![],
            procs: vec![],
            exec_block: CodeBlock {
                statements: vec![Statement::ReturnValue {
                    value: primitive(0),
                    gc_status: crate::ast::GcStatus::None,
                }],
            },
            value_count: 1,
            var_decl_count: 0,
            proc_call_count: 0,
            proc_count: 0,
            record_count: 0,
            constant_count: 1,
        };
        alloc.allocate_program(&program);
        assert_eq!(alloc.eval_reg(0), Register::global(0));
    }

    #[test]
    fn proc_call_records_its_frame_offset() {
        let mut alloc = RegAllocator::new(0);
        let call = crate::ast::ProcCall {
            id: 7,
            procedure: Box::new(primitive(1)),
            arguments: vec![primitive(2)],
            typeargs: vec![],
        };
        let call_value = Value {
            id: 3,
            ty: TypecheckType::Long,
            affects_state: true,
            free_status: FreeStatus::None,
            trace_status: TraceStatus::None,
            kind: ValueKind::ProcCall(Box::new(call)),
        };
        alloc.allocate_value(&call_value, 0, None, None);
        assert_eq!(alloc.proc_call_offset(7), 0);
        assert_eq!(alloc.eval_reg(3), Register::local(0));
    }

    #[test]
    fn generic_proc_call_reserves_a_local_slot_per_typearg() {
        let mut alloc = RegAllocator::new(0);
        let proc = crate::ast::Proc {
            id: 9,
            typeargs: 0,
            params: vec![],
            return_type: TypecheckType::Long,
            exec_block: CodeBlock::default(),
            do_gc: false,
        };
        let call = crate::ast::ProcCall {
            id: 7,
            procedure: Box::new(primitive(1)),
            arguments: vec![primitive(2)],
            typeargs: vec![TypecheckType::Long, TypecheckType::Bool],
        };
        let call_value = Value {
            id: 3,
            ty: TypecheckType::Long,
            affects_state: true,
            free_status: FreeStatus::None,
            trace_status: TraceStatus::None,
            kind: ValueKind::ProcCall(Box::new(call)),
        };
        alloc.allocate_value(&call_value, 0, None, Some(&proc));
        // slot 0 = call result, slot 1 = the one argument, slots 2-3 = the
        // two typearg info registers `lower_proc_call` writes after the
        // argument slots (spec.md §3 invariant 2).
        assert_eq!(alloc.proc_max_locals(9), 3);
    }
}
