//! The constant pool initializer (spec.md §3 invariant 4: "the runtime
//! stack's first `constant_count` slots hold [the primitive constants]").
//!
//! The AST contract (spec.md §6.1) scatters primitive constants across
//! every [`Value::Primitive`](crate::ast::ValueKind::Primitive) node
//! rather than handing the emitter one flat array — each node just
//! carries the `constant_id`/`data` pair the (out-of-scope) typechecker
//! already assigned. Mirrors the teacher's `emit_string_and_symbol_globals`
//! (`codegen/globals.rs`) in spirit: a dedicated pass collects every
//! literal the program references into one buffer before the emitter
//! writes a single initializer for it.

use std::fmt::Write as _;

use crate::ast::{CodeBlock, Conditional, Program, Statement, Value, ValueKind};
use crate::error::CompileError;

/// Walks every value in `program` and returns the constant pool as a
/// dense `Vec` indexed by `constant_id`, sized to `program.constant_count`.
pub(super) fn collect_constants(program: &Program) -> Vec<u64> {
    let mut pool = vec![0u64; program.constant_count as usize];
    walk_block(&program.exec_block, &mut pool);
    for proc in &program.procs {
        walk_block(&proc.exec_block, &mut pool);
    }
    pool
}

fn walk_block(block: &CodeBlock, pool: &mut Vec<u64>) {
    for stmt in &block.statements {
        match stmt {
            Statement::DeclVar(decl) => walk_value(&decl.set_value, pool),
            Statement::Cond(cond) => walk_conditional(cond, pool),
            Statement::While(w) => {
                walk_value(&w.condition, pool);
                walk_block(&w.exec_block, pool);
            }
            Statement::Value { value, .. } | Statement::ReturnValue { value, .. } => {
                walk_value(value, pool)
            }
            Statement::Return | Statement::Break | Statement::Continue | Statement::Abort { .. } => {}
        }
    }
}

fn walk_conditional(cond: &Conditional, pool: &mut Vec<u64>) {
    let mut current = Some(cond);
    while let Some(c) = current {
        if let Some(condition) = &c.condition {
            walk_value(condition, pool);
        }
        walk_block(&c.exec_block, pool);
        current = c.next_if_false.as_deref();
    }
}

fn walk_value(value: &Value, pool: &mut Vec<u64>) {
    if let ValueKind::Primitive { constant_id, data } = &value.kind {
        if let Some(slot) = pool.get_mut(*constant_id as usize) {
            *slot = *data;
        }
    }
    match &value.kind {
        ValueKind::Primitive { .. } | ValueKind::Var { .. } => {}
        ValueKind::Proc(proc) => walk_block(&proc.exec_block, pool),
        ValueKind::AllocArray { size, .. } => walk_value(size, pool),
        ValueKind::ArrayLiteral { elements, .. } => elements.iter().for_each(|e| walk_value(e, pool)),
        ValueKind::AllocRecord { init_values, .. } => {
            init_values.iter().for_each(|init| walk_value(&init.value, pool))
        }
        ValueKind::SetVar { set_value, .. } => walk_value(set_value, pool),
        ValueKind::SetIndex { array, index, value } => {
            walk_value(array, pool);
            walk_value(index, pool);
            walk_value(value, pool);
        }
        ValueKind::SetProp { record, value, .. } => {
            walk_value(record, pool);
            walk_value(value, pool);
        }
        ValueKind::GetIndex { array, index } => {
            walk_value(array, pool);
            walk_value(index, pool);
        }
        ValueKind::GetProp { record, .. } => walk_value(record, pool),
        ValueKind::BinaryOp { lhs, rhs, .. } => {
            walk_value(lhs, pool);
            walk_value(rhs, pool);
        }
        ValueKind::UnaryOp { operand, .. } => walk_value(operand, pool),
        ValueKind::TypeOp { operand, .. } => walk_value(operand, pool),
        ValueKind::ProcCall(call) => {
            walk_value(&call.procedure, pool);
            call.arguments.iter().for_each(|a| walk_value(a, pool));
        }
        ValueKind::Foreign(f) => {
            walk_value(&f.op_id, pool);
            if let Some(input) = &f.input {
                walk_value(input, pool);
            }
        }
    }
}

/// Emits `int64_t stack[STACK_SIZE] = { ...constants..., 0, ... };`
/// (spec.md §6.2 `stack[]`): the first `constant_count` slots are the
/// collected literals, the rest zero-initialized by C's array-literal
/// padding rule.
pub(super) fn emit_stack_initializer(
    out: &mut String,
    program: &Program,
    stack_size: u32,
) -> Result<(), CompileError> {
    let pool = collect_constants(program);
    writeln!(out, "int64_t stack[{stack_size}] = {{")?;
    for (i, value) in pool.iter().enumerate() {
        writeln!(out, "    /* g{i} */ (int64_t){value}ULL,")?;
    }
    writeln!(out, "}};")?;
    writeln!(out, "uint32_t global_offset = {};", program.constant_count)?;
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{CodeBlock, FreeStatus, GcStatus, TraceStatus};
    use crate::types::TypecheckType;

    #[test]
    fn collects_constants_scattered_across_the_program() {
        let program = Program {
            record_protos: vec![],
            procs: vec![],
            exec_block: CodeBlock {
                statements: vec![Statement::ReturnValue {
                    value: Value {
                        id: 0,
                        ty: TypecheckType::Long,
                        affects_state: true,
                        free_status: FreeStatus::None,
                        trace_status: TraceStatus::None,
                        kind: ValueKind::Primitive { constant_id: 1, data: 42 },
                    },
                    gc_status: GcStatus::None,
                }],
            },
            value_count: 1,
            var_decl_count: 0,
            proc_call_count: 0,
            proc_count: 0,
            record_count: 0,
            constant_count: 2,
        };
        let pool = collect_constants(&program);
        assert_eq!(pool, vec![0, 42]);
    }
}
