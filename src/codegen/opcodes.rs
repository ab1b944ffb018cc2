//! Per-instruction C text (spec.md §4.7 "per-instruction C text").
//!
//! Every procedure body and the top-level exec block share one flat
//! instruction stream (spec.md §4.2), and a procedure value is a
//! computed-goto label address (`Instruction::Label`) rather than a
//! named C function — first-class procedures need an indirect call
//! target, and a label address is the only portable way C gives you one
//! without a function-pointer table per arity/signature. `CALL` and
//! `RETURN` thread the return address through the callee's own reserved
//! slot 0 (the call's `base`, spec.md §4.3 "slot base is the return
//! value slot"): `CALL` stashes `&&label_N` for the return site there
//! before jumping; `RETURN` reads it back out and overwrites the same
//! slot with the actual result before jumping home. `STACK_DEOFFSET`
//! then restores `global_offset`, after which that slot reads back as
//! the caller's own `local(base)` — the call's result register.

use std::fmt::Write as _;

use crate::error::CompileError;
use crate::instr::{BinOp, IPRef, IncDec, Instruction, TraceMode, TypecheckShape, TypecheckSig, TypeguardKind, UnOp};

use super::runtime::runtime_error_c_name;
use super::state::CEmitter;

fn trace_mode_tag(mode: TraceMode) -> &'static str {
    match mode {
        TraceMode::None => "TRACE_MODE_NONE",
        TraceMode::All => "TRACE_MODE_ALL",
        TraceMode::Some => "TRACE_MODE_SOME",
    }
}

fn bin_op_expr(op: BinOp, lhs: &str, rhs: &str) -> String {
    match op {
        BinOp::LongAdd => format!("{lhs} + {rhs}"),
        BinOp::LongSub => format!("{lhs} - {rhs}"),
        BinOp::LongMul => format!("{lhs} * {rhs}"),
        BinOp::LongDiv => format!("{lhs} / {rhs}"),
        BinOp::FloatAdd => format!("AS_LONG(AS_FLOAT({lhs}) + AS_FLOAT({rhs}))"),
        BinOp::FloatSub => format!("AS_LONG(AS_FLOAT({lhs}) - AS_FLOAT({rhs}))"),
        BinOp::FloatMul => format!("AS_LONG(AS_FLOAT({lhs}) * AS_FLOAT({rhs}))"),
        BinOp::FloatDiv => format!("AS_LONG(AS_FLOAT({lhs}) / AS_FLOAT({rhs}))"),
        BinOp::LongEq => format!("{lhs} == {rhs}"),
        BinOp::FloatEq => format!("AS_FLOAT({lhs}) == AS_FLOAT({rhs})"),
        BinOp::PtrEq => format!("{lhs} == {rhs}"),
        BinOp::LongGt => format!("{lhs} > {rhs}"),
        BinOp::LongLt => format!("{lhs} < {rhs}"),
        BinOp::LongGe => format!("{lhs} >= {rhs}"),
        BinOp::LongLe => format!("{lhs} <= {rhs}"),
        BinOp::FloatGt => format!("AS_FLOAT({lhs}) > AS_FLOAT({rhs})"),
        BinOp::FloatLt => format!("AS_FLOAT({lhs}) < AS_FLOAT({rhs})"),
        BinOp::FloatGe => format!("AS_FLOAT({lhs}) >= AS_FLOAT({rhs})"),
        BinOp::FloatLe => format!("AS_FLOAT({lhs}) <= AS_FLOAT({rhs})"),
    }
}

fn is_div(op: BinOp) -> bool {
    matches!(op, BinOp::LongDiv | BinOp::FloatDiv)
}

impl<'a> CEmitter<'a> {
    /// Renders the runtime-dispatch call for one `is`/`as` shape. The two
    /// dynamic-operand shapes pass the raw register value through (the
    /// runtime inspects it to find its live signature); the two
    /// concrete-operand shapes dereference the operand's own `type_sig`
    /// first, since there is no other way to learn it. `sig` is rendered
    /// as a `defined_signatures[]` lookup when it's a compile-time
    /// index, or as a dereferenced local slot when it's a type-argument's
    /// runtime-resolved signature pointer (spec.md §4.4 "Type op").
    fn typecheck_call(&self, shape: TypecheckShape, src: &str, sig: TypecheckSig) -> String {
        let sig = match sig {
            TypecheckSig::Static(idx) => format!("&defined_signatures[{idx}]"),
            TypecheckSig::Dynamic(reg) => format!("(type_sig_t *)(intptr_t){}", self.render_reg(reg)),
        };
        match shape {
            TypecheckShape::DynamicDynamic => format!("dynamic_typecheck_dd({src}, {sig})"),
            TypecheckShape::ReferenceToDynamic => format!("dynamic_typecheck_rd({src}, {sig})"),
            TypecheckShape::DynamicToReference => format!("dynamic_typecheck_dr({src}, {sig})"),
            TypecheckShape::Static => {
                format!("type_signature_match(((heap_alloc_t *)(intptr_t){src})->type_sig, {sig})")
            }
        }
    }

    /// Writes the C statement(s) for one instruction, preceded by its
    /// label if the label pass assigned the ip one. `ip` is also used as
    /// the `PANIC` source-location argument for opcodes that can trap.
    pub(super) fn emit_instruction(&mut self, ip: IPRef, ins: &Instruction) -> Result<(), CompileError> {
        self.emit_label_if_any(ip)?;
        match ins {
            Instruction::Alloc { dest, size, trace_mode } => {
                let (dest, size) = (self.render_reg(*dest), self.render_reg(*size));
                writeln!(
                    self.out,
                    "{dest} = (int64_t)(intptr_t)alloc((uint64_t){size}, {});",
                    trace_mode_tag(*trace_mode)
                )?;
            }
            Instruction::AllocI { dest, size, trace_mode } => {
                let dest = self.render_reg(*dest);
                writeln!(
                    self.out,
                    "{dest} = (int64_t)(intptr_t)alloc({size}, {});",
                    trace_mode_tag(*trace_mode)
                )?;
            }
            Instruction::ConfigTypesig { dest, sig_idx, atomize } => {
                let dest = self.render_reg(*dest);
                let sig = format!("&defined_signatures[{sig_idx}]");
                let rhs = if *atomize { format!("atomize_heap_type_sig({sig})") } else { sig };
                writeln!(self.out, "((heap_alloc_t *)(intptr_t){dest})->type_sig = {rhs};")?;
            }
            Instruction::StoreAlloc { dest, value, index } => {
                let (dest, value, index) = (self.render_reg(*dest), self.render_reg(*value), self.render_reg(*index));
                self.panic_on_fail(
                    &format!("(uint64_t){index} < ((heap_alloc_t *)(intptr_t){dest})->limit"),
                    "ERROR_INDEX_OUT_OF_RANGE",
                    ip,
                )?;
                writeln!(
                    self.out,
                    "((int64_t *)((heap_alloc_t *)(intptr_t){dest})->registers)[{index}] = {value};"
                )?;
            }
            Instruction::StoreAllocI { dest, value, index } => {
                let (dest, value) = (self.render_reg(*dest), self.render_reg(*value));
                writeln!(
                    self.out,
                    "((int64_t *)((heap_alloc_t *)(intptr_t){dest})->registers)[{index}] = {value};"
                )?;
            }
            Instruction::StoreAllocIBound { dest, value, index } => {
                let (dest, value) = (self.render_reg(*dest), self.render_reg(*value));
                self.panic_on_fail(
                    &format!("{index} < ((heap_alloc_t *)(intptr_t){dest})->limit"),
                    "ERROR_INDEX_OUT_OF_RANGE",
                    ip,
                )?;
                writeln!(
                    self.out,
                    "((int64_t *)((heap_alloc_t *)(intptr_t){dest})->registers)[{index}] = {value};"
                )?;
            }
            Instruction::LoadAlloc { dest, src, index } => {
                let (dest, src, index) = (self.render_reg(*dest), self.render_reg(*src), self.render_reg(*index));
                self.panic_on_fail(
                    &format!("(uint64_t){index} < ((heap_alloc_t *)(intptr_t){src})->limit"),
                    "ERROR_INDEX_OUT_OF_RANGE",
                    ip,
                )?;
                writeln!(
                    self.out,
                    "{dest} = ((int64_t *)((heap_alloc_t *)(intptr_t){src})->registers)[{index}];"
                )?;
            }
            Instruction::LoadAllocI { dest, src, index } => {
                let (dest, src) = (self.render_reg(*dest), self.render_reg(*src));
                writeln!(
                    self.out,
                    "{dest} = ((int64_t *)((heap_alloc_t *)(intptr_t){src})->registers)[{index}];"
                )?;
            }
            Instruction::LoadAllocIBound { dest, src, index } => {
                let (dest, src) = (self.render_reg(*dest), self.render_reg(*src));
                self.panic_on_fail(
                    &format!("{index} < ((heap_alloc_t *)(intptr_t){src})->limit"),
                    "ERROR_INDEX_OUT_OF_RANGE",
                    ip,
                )?;
                writeln!(
                    self.out,
                    "{dest} = ((int64_t *)((heap_alloc_t *)(intptr_t){src})->registers)[{index}];"
                )?;
            }
            Instruction::ConfTrace { target, prop_id, trace_mode } => {
                let target = self.render_reg(*target);
                writeln!(
                    self.out,
                    "/* prop {prop_id} */ ((heap_alloc_t *)(intptr_t){target})->trace_mode = {};",
                    trace_mode_tag(*trace_mode)
                )?;
            }
            Instruction::DynamicConf { target, prop_id, typearg_slot } => {
                let (target, typearg) = (self.render_reg(*target), self.render_reg(*typearg_slot));
                writeln!(
                    self.out,
                    "dynamic_conf((heap_alloc_t *)(intptr_t){target}, {prop_id}, (type_sig_t *)(intptr_t){typearg});"
                )?;
            }
            Instruction::DynamicConfAll { target, typearg_slot } => {
                let (target, typearg) = (self.render_reg(*target), self.render_reg(*typearg_slot));
                writeln!(
                    self.out,
                    "dynamic_conf_all((heap_alloc_t *)(intptr_t){target}, (type_sig_t *)(intptr_t){typearg});"
                )?;
            }
            Instruction::Label { dest, body_start } => {
                let dest = self.render_reg(*dest);
                let addr = self.label_address(*body_start);
                writeln!(self.out, "{dest} = (int64_t)(intptr_t){addr};")?;
            }
            Instruction::Jump { target } => {
                writeln!(self.out, "{}", self.goto(*target))?;
            }
            Instruction::JumpCheck { cond, target } => {
                let cond = self.render_reg(*cond);
                writeln!(self.out, "if (!{cond}) {}", self.goto(*target))?;
            }
            Instruction::StackValidate { max_locals } => {
                // spec.md §8 "Maximum nesting depth of the call frame =
                // 1000 (reflected in emitted STACK_VALIDATE)": bounded by
                // `frame_limit`, not the physical `stack[]` capacity.
                self.panic_on_fail(
                    &format!("global_offset + {max_locals} < {}", self.config.frame_limit),
                    "ERROR_STACK_OVERFLOW",
                    ip,
                )?;
            }
            Instruction::GcNewFrame => {
                writeln!(self.out, "gc_new_frame();")?;
            }
            Instruction::Move { dest, src } => {
                let (dest, src) = (self.render_reg(*dest), self.render_reg(*src));
                writeln!(self.out, "{dest} = {src};")?;
            }
            Instruction::Free { target } => {
                let target = self.render_reg(*target);
                writeln!(self.out, "free_alloc((heap_alloc_t *)(intptr_t){target});")?;
            }
            Instruction::DynamicFree { target, typearg_slot } => {
                let (target, typearg) = (self.render_reg(*target), self.render_reg(*typearg_slot));
                writeln!(
                    self.out,
                    "dynamic_free((heap_alloc_t *)(intptr_t){target}, (type_sig_t *)(intptr_t){typearg});"
                )?;
            }
            Instruction::TypeguardProtectArray { array, value, sig_idx, dynamic_slot } => {
                let (array, value) = (self.render_reg(*array), self.render_reg(*value));
                let sig = match dynamic_slot {
                    Some(slot) => format!("(type_sig_t *)(intptr_t){}", self.render_reg(*slot)),
                    None => format!("&defined_signatures[{sig_idx}]"),
                };
                // No RuntimeErrorKind names a type-variance failure
                // specifically (spec.md §6.2's error list is exhaustive);
                // ERROR_ABORT is the closest fit for an invariant violation.
                self.panic_on_fail(
                    &format!(
                        "type_signature_match(((heap_alloc_t *)(intptr_t){value})->type_sig, {sig})"
                    ),
                    "ERROR_ABORT",
                    ip,
                )?;
                let _ = array;
            }
            Instruction::SetExtraArgs { a, b, c } => {
                // Stashed for the C backend's bit-compatible two-instruction
                // dance (spec.md Design Notes); emits no C text itself.
                self.extra.a = Some(*a);
                self.extra.b = Some(*b);
                self.extra.c = Some(*c);
            }
            Instruction::TypeguardProp { kind, record, value, sig_idx, downcast_depth } => {
                let (record, value) = (self.render_reg(*record), self.render_reg(*value));
                let sig = match kind {
                    TypeguardKind::StaticDirect | TypeguardKind::StaticDowncast => {
                        format!("&defined_signatures[{sig_idx}]")
                    }
                    TypeguardKind::DynamicDirect | TypeguardKind::DynamicDowncast => {
                        format!("((heap_alloc_t *)(intptr_t){record})->type_sig")
                    }
                };
                let sig = match kind {
                    TypeguardKind::StaticDowncast | TypeguardKind::DynamicDowncast => {
                        format!("downcast_type_signature({sig}, {downcast_depth})")
                    }
                    _ => sig,
                };
                self.panic_on_fail(
                    &format!("type_signature_match(((heap_alloc_t *)(intptr_t){value})->type_sig, {sig})"),
                    "ERROR_ABORT",
                    ip,
                )?;
            }
            Instruction::BinOp { op, dest, lhs, rhs } => {
                let dest = self.render_reg(*dest);
                let (lhs, rhs) = (self.render_reg(*lhs), self.render_reg(*rhs));
                if is_div(*op) {
                    self.panic_on_fail(&format!("{rhs} != 0"), "ERROR_DIVIDE_BY_ZERO", ip)?;
                }
                writeln!(self.out, "{dest} = {};", bin_op_expr(*op, &lhs, &rhs))?;
            }
            Instruction::UnOp { op, dest, src } => {
                let (dest, src) = (self.render_reg(*dest), self.render_reg(*src));
                let expr = match op {
                    UnOp::Neg => format!("-{src}"),
                    UnOp::Not => format!("!{src}"),
                    UnOp::Len => format!("((heap_alloc_t *)(intptr_t){src})->limit"),
                };
                writeln!(self.out, "{dest} = {expr};")?;
            }
            Instruction::IncDec { op, target } => {
                let target = self.render_reg(*target);
                let op = match op {
                    IncDec::Inc => "+=",
                    IncDec::Dec => "-=",
                };
                writeln!(self.out, "{target} {op} 1;")?;
            }
            Instruction::Typecheck { shape, dest, src, sig } => {
                let (dest, src) = (self.render_reg(*dest), self.render_reg(*src));
                let call = self.typecheck_call(*shape, &src, *sig);
                writeln!(self.out, "{dest} = {call};")?;
            }
            Instruction::Typecast { shape, dest, src, sig } => {
                let (dest, src) = (self.render_reg(*dest), self.render_reg(*src));
                let call = self.typecheck_call(*shape, &src, *sig);
                self.panic_on_fail(&call, "ERROR_ABORT", ip)?;
                writeln!(self.out, "{dest} = {src};")?;
            }
            Instruction::Call { callee, base } => {
                let callee = self.render_reg(*callee);
                let ret_addr = self.label_address(IPRef(ip.0 + 1));
                writeln!(self.out, "global_offset += {base};")?;
                self.panic_on_fail(&format!("global_offset < {}", self.config.frame_limit), "ERROR_STACK_OVERFLOW", ip)?;
                writeln!(self.out, "stack[global_offset] = (int64_t)(intptr_t){ret_addr};")?;
                writeln!(self.out, "goto *(void *)(intptr_t){callee};")?;
            }
            Instruction::SetSig { slot, sig_idx, atomize } => {
                let slot = self.render_reg(*slot);
                if *atomize {
                    writeln!(self.out, "{slot} = (int64_t)(intptr_t)atomize_heap_type_sig(&defined_signatures[{sig_idx}]);")?;
                } else {
                    writeln!(self.out, "{slot} = (int64_t)(intptr_t)&defined_signatures[{sig_idx}];")?;
                }
            }
            Instruction::PopAtomTypesigs { count } => {
                writeln!(self.out, "pop_atom_typesigs({count});")?;
            }
            Instruction::StackDeoffset { base } => {
                writeln!(self.out, "global_offset -= {base};")?;
            }
            Instruction::Foreign { op_id, input, output } => {
                let (op_id, output) = (self.render_reg(*op_id), self.render_reg(*output));
                let input = match input {
                    Some(r) => self.render_reg(*r),
                    None => "0".to_string(),
                };
                writeln!(self.out, "{output} = ffi_invoke((uint64_t){op_id}, {input});")?;
                self.panic_on_fail("last_err == 0", "ERROR_FOREIGN", ip)?;
            }
            Instruction::GcTrace { target, mode } => {
                let target = self.render_reg(*target);
                let tag = match mode {
                    crate::instr::StaticTraceMode::TraceChildren => "TRACE_MODE_ALL",
                    crate::instr::StaticTraceMode::SuperTraceChildren => "TRACE_MODE_SOME",
                };
                writeln!(self.out, "((heap_alloc_t *)(intptr_t){target})->trace_mode = {tag};")?;
            }
            Instruction::DynamicTrace { target, typearg_slot } => {
                let (target, typearg) = (self.render_reg(*target), self.render_reg(*typearg_slot));
                writeln!(
                    self.out,
                    "dynamic_trace((heap_alloc_t *)(intptr_t){target}, (type_sig_t *)(intptr_t){typearg});"
                )?;
            }
            Instruction::GcClean => {
                writeln!(self.out, "gc_clean();")?;
            }
            Instruction::Abort { kind } => match kind {
                Some(kind) => {
                    writeln!(self.out, "PANIC({}, {});", runtime_error_c_name(*kind), ip.0)?;
                }
                None => {
                    writeln!(self.out, "goto program_exit;")?;
                }
            },
            Instruction::Return { value } => {
                let value = self.render_reg(*value);
                writeln!(self.out, "{{")?;
                writeln!(self.out, "    void *__return_to = (void *)(intptr_t)stack[global_offset];")?;
                writeln!(self.out, "    stack[global_offset] = {value};")?;
                writeln!(self.out, "    goto *__return_to;")?;
                writeln!(self.out, "}}")?;
            }
        }
        Ok(())
    }

    /// `PANIC_ON_FAIL(cond, err, ip)`, with `err` already a C identifier.
    pub(super) fn panic_on_fail(&mut self, cond: &str, err: &str, ip: IPRef) -> Result<(), CompileError> {
        writeln!(self.out, "PANIC_ON_FAIL({cond}, {err}, {});", ip.0)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::instr::InstrBuilder;
    use crate::labels;
    use crate::machine::Machine;
    use crate::register::Register;

    #[test]
    fn move_renders_as_a_plain_assignment() {
        let mut instrs = InstrBuilder::new();
        instrs.append(Instruction::Move { dest: Register::local(0), src: Register::global(1) });
        let labels = labels::run(&instrs);
        let machine = Machine::new();
        let config = CompilerConfig::new();
        let mut emitter = CEmitter::new(&instrs, &labels, &machine, &config);
        emitter.emit_instruction(IPRef(0), instrs.get(IPRef(0))).unwrap();
        assert_eq!(emitter.out.trim(), "stack[0 + global_offset] = stack[1];");
    }

    #[test]
    fn long_div_guards_against_zero_before_dividing() {
        let mut instrs = InstrBuilder::new();
        instrs.append(Instruction::BinOp {
            op: BinOp::LongDiv,
            dest: Register::local(0),
            lhs: Register::local(1),
            rhs: Register::local(2),
        });
        let labels = labels::run(&instrs);
        let machine = Machine::new();
        let config = CompilerConfig::new();
        let mut emitter = CEmitter::new(&instrs, &labels, &machine, &config);
        emitter.emit_instruction(IPRef(0), instrs.get(IPRef(0))).unwrap();
        assert!(emitter.out.contains("PANIC_ON_FAIL"));
        assert!(emitter.out.contains("ERROR_DIVIDE_BY_ZERO"));
    }

    #[test]
    fn call_stashes_the_return_site_address_before_jumping() {
        let mut instrs = InstrBuilder::new();
        instrs.append(Instruction::Call { callee: Register::global(0), base: 3 });
        instrs.append(Instruction::StackDeoffset { base: 3 });
        let labels = labels::run(&instrs);
        let machine = Machine::new();
        let config = CompilerConfig::new();
        let mut emitter = CEmitter::new(&instrs, &labels, &machine, &config);
        emitter.emit_instruction(IPRef(0), instrs.get(IPRef(0))).unwrap();
        assert!(emitter.out.contains("global_offset += 3;"));
        assert!(emitter.out.contains("goto *(void *)(intptr_t)stack[0];"));
    }

    /// spec.md §8 "Maximum nesting depth of the call frame = 1000
    /// (reflected in emitted `STACK_VALIDATE`)": the overflow check is
    /// bounded by `frame_limit`, independent of the much larger physical
    /// `stack[]` capacity.
    #[test]
    fn stack_validate_guards_against_the_configured_frame_limit_not_stack_size() {
        let mut instrs = InstrBuilder::new();
        instrs.append(Instruction::StackValidate { max_locals: 4 });
        let labels = labels::run(&instrs);
        let machine = Machine::new();
        let config = CompilerConfig::new().with_frame_limit(17).with_stack_size(65536);
        let mut emitter = CEmitter::new(&instrs, &labels, &machine, &config);
        emitter.emit_instruction(IPRef(0), instrs.get(IPRef(0))).unwrap();
        assert!(emitter.out.contains("global_offset + 4 < 17"));
        assert!(!emitter.out.contains("65536"));
    }

    /// A generic operand's signature lives in a runtime-resolved local
    /// slot, not the `defined_signatures[]` table (spec.md §4.4 "Type
    /// op") — `typecheck_call` must dereference the register's value
    /// rather than rendering it as a table index.
    #[test]
    fn typecheck_against_a_dynamic_sig_dereferences_the_register() {
        let instrs = InstrBuilder::new();
        let labels = labels::run(&instrs);
        let machine = Machine::new();
        let config = CompilerConfig::new();
        let emitter = CEmitter::new(&instrs, &labels, &machine, &config);
        let call = emitter.typecheck_call(TypecheckShape::DynamicDynamic, "stack[0]", TypecheckSig::Dynamic(Register::local(2)));
        assert!(call.contains("(type_sig_t *)(intptr_t)stack[2 + global_offset]"));
        assert!(!call.contains("defined_signatures"));
    }

    #[test]
    fn typecheck_against_a_static_sig_indexes_the_signature_table() {
        let instrs = InstrBuilder::new();
        let labels = labels::run(&instrs);
        let machine = Machine::new();
        let config = CompilerConfig::new();
        let emitter = CEmitter::new(&instrs, &labels, &machine, &config);
        let call = emitter.typecheck_call(TypecheckShape::Static, "stack[0]", TypecheckSig::Static(5));
        assert!(call.contains("&defined_signatures[5]"));
    }
}
