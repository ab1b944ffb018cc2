//! The IL Lowerer (spec.md §4.4): walks the allocated AST and emits IL
//! instructions into an [`InstrBuilder`], consulting [`RegAllocator`]
//! for where each value's result already lives. Control-flow statements
//! (`if`/`while`/`break`/`continue`) live in [`control_flow`], in the
//! teacher's style of splitting codegen concerns across sibling modules
//! (`codegen/control_flow.rs`, `codegen/statements.rs`) rather than one
//! monolithic file.

pub mod control_flow;

use std::collections::HashMap;

use crate::alloc::RegAllocator;
use crate::ast::{BinaryOperator, Proc, Program, RecordProto, UnaryOperator, Value, ValueKind};
use crate::config::CompilerConfig;
use crate::error::CompileError;
use crate::instr::{BinOp, Instruction, InstrBuilder, StaticTraceMode, TraceMode, TypecheckShape, TypecheckSig, TypeguardKind, UnOp};
use crate::machine::Machine;
use crate::register::Register;
use crate::types::TypecheckType;

/// Owns the instruction stream and signature table for one compile.
/// Borrows the already-computed [`RegAllocator`] rather than owning it,
/// since allocation is a fully separate, prior pass (spec.md §2
/// "Dependency order").
pub struct Lowerer<'a> {
    pub instrs: InstrBuilder,
    pub machine: Machine,
    alloc: &'a RegAllocator,
    config: &'a CompilerConfig,
    /// `record_id -> prototype`, populated from `Program.record_protos`
    /// at the start of `lower_program`; used to look up a property's
    /// declared type for the "Set property" typeguard (spec.md §4.4).
    record_protos: HashMap<u16, RecordProto>,
}

impl<'a> Lowerer<'a> {
    pub fn new(alloc: &'a RegAllocator, config: &'a CompilerConfig) -> Self {
        Lowerer {
            instrs: InstrBuilder::new(),
            machine: Machine::new(),
            alloc,
            config,
            record_protos: HashMap::new(),
        }
    }

    /// Lowers the whole program: the top-level exec block, then its
    /// implicit normal exit (spec.md §8 scenario 1: "followed by
    /// `GC_CLEAN`, `ABORT(NONE)`").
    pub fn lower_program(&mut self, program: &Program) -> Result<(), CompileError> {
        self.record_protos = program.record_protos.iter().map(|proto| (proto.record_id, proto.clone())).collect();
        control_flow::lower_code_block(self, &program.exec_block, None, None)?;
        self.instrs.append(Instruction::GcClean);
        self.instrs.append(Instruction::Abort { kind: None });
        Ok(())
    }

    /// The local slot holding the resolved signature for type-argument
    /// `type_id` within `proc`'s frame (`TYPEARG_INFO_REG`,
    /// `original_source/compiler.c`): one past the parameter slots.
    fn typearg_info_reg(proc: &Proc, type_id: u8) -> Register {
        Register::local(proc.params.len() as u16 + 1 + u16::from(type_id))
    }

    /// Interns `ty`'s structural signature, tracking the
    /// signature-count boundary (SPEC_FULL.md §4.10/§4.9
    /// `signature_budget`). `proc` resolves any free type-argument `ty`
    /// transitively mentions to its local info-slot index (spec.md §3).
    fn define_typesig(&mut self, ty: &TypecheckType, proc: Option<&Proc>) -> Result<u16, CompileError> {
        let resolve = |id: u8| -> Option<u16> { proc.map(|p| Self::typearg_info_reg(p, id).index) };
        self.machine.intern_type(ty, &resolve).ok_or_else(|| {
            CompileError::logic(
                crate::error::ErrorKind::Internal,
                format!("cannot intern a signature for {ty}"),
            )
        })
        .inspect(|_| {
            if self.machine.len() as u32 >= self.config.signature_budget() {
                tracing::warn!(
                    interned = self.machine.len(),
                    budget = self.config.signature_budget(),
                    "interned signature count is approaching its budget"
                );
            }
        })
    }

    /// Emits the "Set property" typeguard when the property's declared
    /// type is a type-argument of its containing record (spec.md §4.4
    /// "Set property"). Only the direct shapes are emitted
    /// (`StaticDirect`/`DynamicDirect`) — this crate's AST contract
    /// carries no downcast marker at the `SetProp` call site, so the
    /// downcast variants and their preceding `SetExtraArgs` are out of
    /// reach here; see DESIGN.md.
    fn typeguard_for_set_prop(
        &mut self,
        record_ty: &TypecheckType,
        property_id: u32,
        record_reg: Register,
        value_reg: Register,
        proc: Option<&Proc>,
    ) -> Result<Option<Instruction>, CompileError> {
        let TypecheckType::Record { record_id, sub_types } = record_ty else {
            return Ok(None);
        };
        let Some(proto) = self.record_protos.get(record_id) else {
            return Ok(None);
        };
        let Some(declared) = proto.properties.iter().find(|p| p.id == property_id).map(|p| p.ty.clone()) else {
            return Ok(None);
        };
        let TypecheckType::TypeArg(param_id) = declared else {
            return Ok(None);
        };
        let resolved = sub_types.get(param_id as usize).cloned().unwrap_or(TypecheckType::TypeArg(param_id));
        let (kind, sig_idx) = if resolved.is_type_arg() {
            (TypeguardKind::DynamicDirect, 0)
        } else {
            (TypeguardKind::StaticDirect, self.define_typesig(&resolved, proc)?)
        };
        Ok(Some(Instruction::TypeguardProp {
            kind,
            record: record_reg,
            value: value_reg,
            sig_idx,
            downcast_depth: 0,
        }))
    }

    /// Emits IL for a single expression's side effects; the register
    /// holding its result is already fixed by [`RegAllocator`]. Mirrors
    /// `compile_value`: a pure, unused value emits nothing.
    pub fn lower_value(&mut self, value: &Value, proc: Option<&Proc>) -> Result<(), CompileError> {
        if !value.affects_state {
            return Ok(());
        }

        let dest = self.alloc.eval_reg(value.id);
        match &value.kind {
            ValueKind::Primitive { .. } => {}
            ValueKind::AllocArray { elem_type, size } => {
                self.lower_value(size, proc)?;
                let size_reg = self.alloc.eval_reg(size.id);
                if elem_type.is_type_arg() {
                    self.instrs.append(Instruction::Alloc {
                        dest,
                        size: size_reg,
                        trace_mode: TraceMode::None,
                    });
                    let TypecheckType::TypeArg(id) = **elem_type else { unreachable!() };
                    let typearg_reg = proc.map(|p| Self::typearg_info_reg(p, id)).ok_or_else(internal)?;
                    self.instrs.append(Instruction::DynamicConfAll {
                        target: dest,
                        typearg_slot: typearg_reg,
                    });
                } else {
                    self.instrs.append(Instruction::Alloc {
                        dest,
                        size: size_reg,
                        trace_mode: if elem_type.is_ref_type() { TraceMode::All } else { TraceMode::None },
                    });
                }
                let sig = self.define_typesig(&value.ty, proc)?;
                self.instrs.append(Instruction::ConfigTypesig {
                    dest,
                    sig_idx: sig,
                    atomize: value.ty.contains_free_type_arg(),
                });
            }
            ValueKind::ArrayLiteral { elem_type, elements } => {
                if elem_type.is_type_arg() {
                    self.instrs.append(Instruction::AllocI {
                        dest,
                        size: elements.len() as u16,
                        trace_mode: TraceMode::None,
                    });
                    let TypecheckType::TypeArg(id) = **elem_type else { unreachable!() };
                    let typearg_reg = proc.map(|p| Self::typearg_info_reg(p, id)).ok_or_else(internal)?;
                    self.instrs.append(Instruction::DynamicConfAll {
                        target: dest,
                        typearg_slot: typearg_reg,
                    });
                } else {
                    self.instrs.append(Instruction::AllocI {
                        dest,
                        size: elements.len() as u16,
                        trace_mode: if elem_type.is_ref_type() { TraceMode::All } else { TraceMode::None },
                    });
                }
                let sig = self.define_typesig(&value.ty, proc)?;
                self.instrs.append(Instruction::ConfigTypesig {
                    dest,
                    sig_idx: sig,
                    atomize: value.ty.contains_free_type_arg(),
                });
                for (i, elem) in elements.iter().enumerate() {
                    self.lower_value(elem, proc)?;
                    self.instrs.append(Instruction::StoreAllocI {
                        dest,
                        value: self.alloc.eval_reg(elem.id),
                        index: i as u16,
                    });
                }
            }
            ValueKind::AllocRecord { proto, init_values } => {
                self.instrs.append(Instruction::AllocI {
                    dest,
                    size: proto.properties.len() as u16,
                    trace_mode: if proto.do_gc { TraceMode::Some } else { TraceMode::None },
                });
                let sig = self.define_typesig(&value.ty, proc)?;
                self.instrs.append(Instruction::ConfigTypesig {
                    dest,
                    sig_idx: sig,
                    atomize: value.ty.contains_free_type_arg(),
                });
                for init in init_values {
                    self.lower_value(&init.value, proc)?;
                    self.instrs.append(Instruction::StoreAllocI {
                        dest,
                        value: self.alloc.eval_reg(init.value.id),
                        index: init.property_id as u16,
                    });
                }
                if proto.do_gc {
                    for (prop, trace) in proto.properties.iter().zip(proto.property_traces.iter()) {
                        match trace {
                            crate::ast::TraceStatus::TraceChildren => {
                                self.instrs.append(Instruction::ConfTrace {
                                    target: dest,
                                    prop_id: prop.id as u16,
                                    trace_mode: TraceMode::All,
                                });
                            }
                            crate::ast::TraceStatus::TraceDynamic => {
                                let TypecheckType::TypeArg(id) = prop.ty else { unreachable!() };
                                let typearg_reg = proc.map(|p| Self::typearg_info_reg(p, id)).ok_or_else(internal)?;
                                self.instrs.append(Instruction::DynamicConf {
                                    target: dest,
                                    prop_id: prop.id as u16,
                                    typearg_slot: typearg_reg,
                                });
                            }
                            _ => {
                                self.instrs.append(Instruction::ConfTrace {
                                    target: dest,
                                    prop_id: prop.id as u16,
                                    trace_mode: TraceMode::None,
                                });
                            }
                        }
                    }
                }
            }
            ValueKind::Proc(inner) => self.lower_proc_literal(dest, inner)?,
            ValueKind::Var { .. } => {}
            ValueKind::SetVar { var_info, set_value } => {
                if var_info.is_used {
                    self.lower_value(set_value, proc)?;
                    if self.alloc.should_move(set_value.id) {
                        let var_reg = self.alloc.var_reg(var_info.id);
                        self.emit_force_free(var_reg, &var_info.ty, proc)?;
                        self.instrs.append(Instruction::Move {
                            dest: var_reg,
                            src: self.alloc.eval_reg(set_value.id),
                        });
                    }
                } else if set_value.affects_state {
                    self.lower_value(set_value, proc)?;
                    self.emit_value_free(set_value, proc)?;
                }
            }
            ValueKind::SetIndex { array, index, value: set_value } => {
                if array.affects_state {
                    self.lower_value(array, proc)?;
                    if !matches!(index.kind, ValueKind::Primitive { .. }) {
                        self.lower_value(index, proc)?;
                    }
                    self.lower_value(set_value, proc)?;
                    let array_reg = self.alloc.eval_reg(array.id);
                    let value_reg = self.alloc.eval_reg(set_value.id);
                    if let TypecheckType::Array { elem } = &array.ty {
                        if elem.is_type_arg() {
                            let TypecheckType::TypeArg(id) = **elem else { unreachable!() };
                            let typearg_reg = proc.map(|p| Self::typearg_info_reg(p, id)).ok_or_else(internal)?;
                            self.instrs.append(Instruction::TypeguardProtectArray {
                                array: array_reg,
                                value: value_reg,
                                sig_idx: 0,
                                dynamic_slot: Some(typearg_reg),
                            });
                        } else if elem.is_ref_type() {
                            let sig = self.define_typesig(elem, proc)?;
                            self.instrs.append(Instruction::TypeguardProtectArray {
                                array: array_reg,
                                value: value_reg,
                                sig_idx: sig,
                                dynamic_slot: None,
                            });
                        }
                    }
                    if let ValueKind::Primitive { .. } = index.kind {
                        let literal_index = self.alloc.eval_reg(index.id);
                        self.instrs.append(Instruction::StoreAllocIBound {
                            dest: array_reg,
                            value: value_reg,
                            index: literal_index.index,
                        });
                    } else {
                        self.instrs.append(Instruction::StoreAlloc {
                            dest: array_reg,
                            value: value_reg,
                            index: self.alloc.eval_reg(index.id),
                        });
                    }
                    self.emit_value_free(array, proc)?;
                } else if set_value.affects_state {
                    self.lower_value(set_value, proc)?;
                    self.emit_value_free(set_value, proc)?;
                }
            }
            ValueKind::SetProp { record, property_id, value: set_value } => {
                if record.affects_state {
                    self.lower_value(record, proc)?;
                    self.lower_value(set_value, proc)?;
                    let record_reg = self.alloc.eval_reg(record.id);
                    let value_reg = self.alloc.eval_reg(set_value.id);
                    if let Some(guard) = self.typeguard_for_set_prop(&record.ty, *property_id, record_reg, value_reg, proc)? {
                        self.instrs.append(guard);
                    }
                    self.instrs.append(Instruction::StoreAllocI {
                        dest: record_reg,
                        value: value_reg,
                        index: *property_id as u16,
                    });
                    self.emit_value_free(record, proc)?;
                } else if set_value.affects_state {
                    self.lower_value(set_value, proc)?;
                    self.emit_value_free(set_value, proc)?;
                }
            }
            ValueKind::GetIndex { array, index } => {
                self.lower_value(array, proc)?;
                let array_reg = self.alloc.eval_reg(array.id);
                if let ValueKind::Primitive { .. } = index.kind {
                    let literal_index = self.alloc.eval_reg(index.id);
                    self.instrs.append(Instruction::LoadAllocIBound {
                        dest: array_reg,
                        src: dest,
                        index: literal_index.index,
                    });
                } else {
                    self.lower_value(index, proc)?;
                    self.instrs.append(Instruction::LoadAlloc {
                        dest: array_reg,
                        src: dest,
                        index: self.alloc.eval_reg(index.id),
                    });
                }
                self.emit_value_free(array, proc)?;
            }
            ValueKind::GetProp { record, property_id } => {
                self.lower_value(record, proc)?;
                self.instrs.append(Instruction::LoadAllocI {
                    dest: self.alloc.eval_reg(record.id),
                    src: dest,
                    index: *property_id as u16,
                });
                self.emit_value_free(record, proc)?;
            }
            ValueKind::BinaryOp { op, lhs, rhs } => {
                self.lower_value(lhs, proc)?;
                self.lower_value(rhs, proc)?;
                let lhs_reg = self.alloc.eval_reg(lhs.id);
                let rhs_reg = self.alloc.eval_reg(rhs.id);
                self.emit_binary_op(*op, &lhs.ty, lhs_reg, rhs_reg, dest);
                self.emit_value_free(lhs, proc)?;
                self.emit_value_free(rhs, proc)?;
            }
            ValueKind::UnaryOp { op, operand, is_postfix } => {
                self.lower_value(operand, proc)?;
                let operand_reg = self.alloc.eval_reg(operand.id);
                self.emit_unary_op(*op, *is_postfix, &value.ty, operand_reg, dest);
                self.emit_value_free(operand, proc)?;
            }
            ValueKind::TypeOp { operand, check_type, is_cast } => {
                self.lower_type_op(dest, operand, check_type, *is_cast, proc)?;
            }
            ValueKind::ProcCall(call) => self.lower_proc_call(dest, call, proc)?,
            ValueKind::Foreign(foreign) => {
                self.lower_value(&foreign.op_id, proc)?;
                let op_reg = self.alloc.eval_reg(foreign.op_id.id);
                let input_reg = match &foreign.input {
                    Some(input) => {
                        self.lower_value(input, proc)?;
                        Some(self.alloc.eval_reg(input.id))
                    }
                    None => None,
                };
                self.instrs.append(Instruction::Foreign {
                    op_id: op_reg,
                    input: input_reg,
                    output: dest,
                });
                if let Some(input) = &foreign.input {
                    self.emit_value_free(input, proc)?;
                }
            }
        }

        match value.trace_status {
            crate::ast::TraceStatus::TraceChildren if proc.is_some_and(|p| p.do_gc) => {
                self.instrs.append(Instruction::GcTrace {
                    target: dest,
                    mode: StaticTraceMode::TraceChildren,
                });
            }
            crate::ast::TraceStatus::SuperTraceChildren => {
                self.instrs.append(Instruction::GcTrace {
                    target: dest,
                    mode: StaticTraceMode::SuperTraceChildren,
                });
            }
            crate::ast::TraceStatus::TraceDynamic if proc.is_some_and(|p| p.do_gc) => {
                let TypecheckType::TypeArg(id) = value.ty else {
                    return Err(CompileError::logic(
                        crate::error::ErrorKind::Internal,
                        "TraceDynamic on a non-type-argument value",
                    ));
                };
                let typearg_reg = proc.map(|p| Self::typearg_info_reg(p, id)).ok_or_else(internal)?;
                self.instrs.append(Instruction::DynamicTrace {
                    target: dest,
                    typearg_slot: typearg_reg,
                });
            }
            _ => {}
        }
        Ok(())
    }

    fn lower_proc_literal(&mut self, dest: Register, proc: &Proc) -> Result<(), CompileError> {
        let label_ip = self.instrs.append(Instruction::Label {
            dest,
            body_start: crate::instr::IPRef(0),
        });
        let jump_ip = self.instrs.append(Instruction::Jump {
            target: crate::instr::IPRef(0),
        });
        self.instrs.patch_branch_target(label_ip, self.instrs.next_ip());

        self.instrs.append(Instruction::StackValidate {
            max_locals: self.alloc.proc_max_locals(proc.id),
        });
        if proc.do_gc {
            self.instrs.append(Instruction::GcNewFrame);
        }
        control_flow::lower_code_block(self, &proc.exec_block, Some(proc), None)?;
        self.instrs.patch_branch_target(jump_ip, self.instrs.next_ip());
        Ok(())
    }

    fn lower_type_op(
        &mut self,
        dest: Register,
        operand: &Value,
        check_type: &TypecheckType,
        is_cast: bool,
        proc: Option<&Proc>,
    ) -> Result<(), CompileError> {
        self.lower_value(operand, proc)?;
        let operand_reg = self.alloc.eval_reg(operand.id);

        if let TypecheckType::TypeArg(op_id) = operand.ty {
            let op_typearg_reg = proc.map(|p| Self::typearg_info_reg(p, op_id)).ok_or_else(internal)?;
            self.instrs.append(Instruction::Move { dest, src: operand_reg });
            if let TypecheckType::TypeArg(match_id) = check_type {
                let match_typearg_reg = proc.map(|p| Self::typearg_info_reg(p, *match_id)).ok_or_else(internal)?;
                self.emit_check_or_cast(
                    TypecheckShape::DynamicDynamic,
                    dest,
                    op_typearg_reg,
                    TypecheckSig::Dynamic(match_typearg_reg),
                    is_cast,
                );
            } else {
                let sig = self.define_typesig(check_type, proc)?;
                self.emit_check_or_cast(TypecheckShape::DynamicToReference, dest, op_typearg_reg, TypecheckSig::Static(sig), is_cast);
            }
        } else if let TypecheckType::TypeArg(match_id) = check_type {
            let match_typearg_reg = proc.map(|p| Self::typearg_info_reg(p, *match_id)).ok_or_else(internal)?;
            self.instrs.append(Instruction::Move { dest, src: operand_reg });
            self.emit_check_or_cast(
                TypecheckShape::ReferenceToDynamic,
                dest,
                match_typearg_reg,
                TypecheckSig::Dynamic(match_typearg_reg),
                is_cast,
            );
        } else {
            let sig = self.define_typesig(check_type, proc)?;
            if is_cast {
                self.instrs.append(Instruction::Typecast {
                    shape: TypecheckShape::Static,
                    dest,
                    src: operand_reg,
                    sig: TypecheckSig::Static(sig),
                });
            } else {
                self.instrs.append(Instruction::Typecheck {
                    shape: TypecheckShape::Static,
                    dest,
                    src: operand_reg,
                    sig: TypecheckSig::Static(sig),
                });
            }
        }
        Ok(())
    }

    fn emit_check_or_cast(&mut self, shape: TypecheckShape, dest: Register, lhs: Register, sig: TypecheckSig, is_cast: bool) {
        if is_cast {
            self.instrs.append(Instruction::Typecast { shape, dest: lhs, src: dest, sig });
        } else {
            self.instrs.append(Instruction::Typecheck { shape, dest: lhs, src: dest, sig });
        }
    }

    fn lower_proc_call(&mut self, dest: Register, call: &crate::ast::ProcCall, proc: Option<&Proc>) -> Result<(), CompileError> {
        let base = self.alloc.proc_call_offset(call.id);
        for (i, arg) in call.arguments.iter().enumerate() {
            self.lower_value(arg, proc)?;
            if self.alloc.should_move(arg.id) {
                self.instrs.append(Instruction::Move {
                    dest: Register::local(base + i as u16 + 1),
                    src: self.alloc.eval_reg(arg.id),
                });
            }
        }
        self.lower_value(&call.procedure, proc)?;
        let callee_reg = self.alloc.eval_reg(call.procedure.id);

        let mut type_sigs_to_pop: u16 = 0;
        let mut gen_arg_reg = base + call.arguments.len() as u16 + 1;
        for typearg in &call.typeargs {
            if let TypecheckType::TypeArg(id) = typearg {
                let src = proc.map(|p| Self::typearg_info_reg(p, *id)).ok_or_else(internal)?;
                self.instrs.append(Instruction::Move {
                    dest: Register::local(gen_arg_reg),
                    src,
                });
            } else {
                let sig = self.define_typesig(typearg, proc)?;
                let atomize = typearg.contains_free_type_arg();
                self.instrs.append(Instruction::SetSig {
                    slot: Register::local(gen_arg_reg),
                    sig_idx: sig,
                    atomize,
                });
                if atomize {
                    type_sigs_to_pop += 1;
                }
            }
            gen_arg_reg += 1;
        }

        self.instrs.append(Instruction::Call { callee: callee_reg, base });
        if type_sigs_to_pop > 0 {
            self.instrs.append(Instruction::PopAtomTypesigs { count: type_sigs_to_pop });
        }
        if base > 0 {
            self.instrs.append(Instruction::StackDeoffset { base });
        }
        let _ = dest;
        Ok(())
    }

    fn emit_binary_op(&mut self, op: BinaryOperator, lhs_ty: &TypecheckType, lhs: Register, rhs: Register, dest: Register) {
        let is_float = matches!(lhs_ty, TypecheckType::Float);
        let is_ref = lhs_ty.is_ref_type();
        let bin_op = match (op, is_ref, is_float) {
            (BinaryOperator::Add, _, false) => BinOp::LongAdd,
            (BinaryOperator::Add, _, true) => BinOp::FloatAdd,
            (BinaryOperator::Sub, _, false) => BinOp::LongSub,
            (BinaryOperator::Sub, _, true) => BinOp::FloatSub,
            (BinaryOperator::Mul, _, false) => BinOp::LongMul,
            (BinaryOperator::Mul, _, true) => BinOp::FloatMul,
            (BinaryOperator::Div, _, false) => BinOp::LongDiv,
            (BinaryOperator::Div, _, true) => BinOp::FloatDiv,
            (BinaryOperator::Eq, true, _) => BinOp::PtrEq,
            (BinaryOperator::Eq, false, false) => BinOp::LongEq,
            (BinaryOperator::Eq, false, true) => BinOp::FloatEq,
            (BinaryOperator::NotEq, true, _) => BinOp::PtrEq,
            (BinaryOperator::NotEq, false, false) => BinOp::LongEq,
            (BinaryOperator::NotEq, false, true) => BinOp::FloatEq,
            (BinaryOperator::Gt, _, false) => BinOp::LongGt,
            (BinaryOperator::Gt, _, true) => BinOp::FloatGt,
            (BinaryOperator::Lt, _, false) => BinOp::LongLt,
            (BinaryOperator::Lt, _, true) => BinOp::FloatLt,
            (BinaryOperator::GtEq, _, false) => BinOp::LongGe,
            (BinaryOperator::GtEq, _, true) => BinOp::FloatGe,
            (BinaryOperator::LtEq, _, false) => BinOp::LongLe,
            (BinaryOperator::LtEq, _, true) => BinOp::FloatLe,
        };
        self.instrs.append(Instruction::BinOp { op: bin_op, dest, lhs, rhs });
        if matches!(op, BinaryOperator::NotEq) {
            self.instrs.append(Instruction::UnOp { op: UnOp::Not, dest, src: dest });
        }
    }

    fn emit_unary_op(&mut self, op: UnaryOperator, is_postfix: bool, ty: &TypecheckType, operand: Register, dest: Register) {
        match op {
            UnaryOperator::Neg => {
                self.instrs.append(Instruction::UnOp { op: UnOp::Neg, dest, src: operand });
            }
            UnaryOperator::Not => {
                self.instrs.append(Instruction::UnOp { op: UnOp::Not, dest, src: operand });
            }
            UnaryOperator::Len => {
                self.instrs.append(Instruction::UnOp { op: UnOp::Len, dest, src: operand });
            }
            UnaryOperator::Increment | UnaryOperator::Decrement => {
                let kind = if matches!(op, UnaryOperator::Increment) {
                    crate::instr::IncDec::Inc
                } else {
                    crate::instr::IncDec::Dec
                };
                let _ = ty;
                if is_postfix {
                    self.instrs.append(Instruction::Move { dest, src: operand });
                    self.instrs.append(Instruction::IncDec { op: kind, target: operand });
                } else {
                    self.instrs.append(Instruction::IncDec { op: kind, target: operand });
                }
            }
        }
    }

    /// Mirrors `compile_value_free`/`compile_force_free`: frees a value
    /// right after its last use, dispatching statically or dynamically
    /// by its declared [`crate::ast::FreeStatus`].
    fn emit_value_free(&mut self, value: &Value, proc: Option<&Proc>) -> Result<(), CompileError> {
        if !value.affects_state {
            return Ok(());
        }
        let reg = self.alloc.eval_reg(value.id);
        self.emit_force_free_by_status(reg, value.free_status, &value.ty, proc)
    }

    fn emit_force_free(&mut self, reg: Register, ty: &TypecheckType, proc: Option<&Proc>) -> Result<(), CompileError> {
        let status = if ty.is_type_arg() {
            crate::ast::FreeStatus::Dynamic
        } else if ty.is_ref_type() {
            crate::ast::FreeStatus::Static
        } else {
            crate::ast::FreeStatus::None
        };
        self.emit_force_free_by_status(reg, status, ty, proc)
    }

    fn emit_force_free_by_status(
        &mut self,
        reg: Register,
        status: crate::ast::FreeStatus,
        ty: &TypecheckType,
        proc: Option<&Proc>,
    ) -> Result<(), CompileError> {
        match status {
            crate::ast::FreeStatus::None => {}
            crate::ast::FreeStatus::Static => {
                self.instrs.append(Instruction::Free { target: reg });
            }
            crate::ast::FreeStatus::Dynamic => {
                let TypecheckType::TypeArg(id) = ty else {
                    return Err(CompileError::logic(crate::error::ErrorKind::Internal, "dynamic free on a concrete type"));
                };
                let typearg_reg = proc.map(|p| Self::typearg_info_reg(p, *id)).ok_or_else(internal)?;
                self.instrs.append(Instruction::DynamicFree { target: reg, typearg_slot: typearg_reg });
            }
        }
        Ok(())
    }
}

fn internal() -> CompileError {
    CompileError::logic(crate::error::ErrorKind::Internal, "type-argument reference outside a generic procedure body")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{CodeBlock, FreeStatus, Statement, TraceStatus};

    fn long_primitive(id: u32, constant_id: u32) -> Value {
        Value {
            id,
            ty: TypecheckType::Long,
            affects_state: true,
            free_status: FreeStatus::None,
            trace_status: TraceStatus::None,
            kind: ValueKind::Primitive { constant_id, data: constant_id as u64 },
        }
    }

    #[test]
    fn returning_a_primitive_emits_no_arithmetic_instructions() {
        let program = Program {
            record_protos: vec![],
            procs: vec![],
            exec_block: CodeBlock {
                statements: vec![Statement::ReturnValue {
                    value: long_primitive(0, 5),
                    gc_status: crate::ast::GcStatus::None,
                }],
            },
            value_count: 1,
            var_decl_count: 0,
            proc_call_count: 0,
            proc_count: 0,
            record_count: 0,
            constant_count: 6,
        };
        let mut alloc = RegAllocator::new(program.constant_count);
        alloc.allocate_program(&program);
        let config = CompilerConfig::new();
        let mut lowerer = Lowerer::new(&alloc, &config);
        lowerer.lower_program(&program).expect("lowering should succeed");
        assert!(lowerer
            .instrs
            .iter()
            .all(|(_, ins)| !matches!(ins, Instruction::BinOp { .. } | Instruction::UnOp { .. })));
    }

    #[test]
    fn array_literal_of_longs_stores_every_element_without_typeguard() {
        let elem_a = long_primitive(1, 0);
        let elem_b = long_primitive(2, 1);
        let literal = Value {
            id: 0,
            ty: TypecheckType::Array { elem: Box::new(TypecheckType::Long) },
            affects_state: true,
            free_status: FreeStatus::None,
            trace_status: TraceStatus::None,
            kind: ValueKind::ArrayLiteral {
                elem_type: Box::new(TypecheckType::Long),
                elements: vec![elem_a, elem_b],
            },
        };
        let program = Program {
            record_protos: vec![],
            procs: vec![],
            exec_block: CodeBlock {
                statements: vec![Statement::Value { value: literal, gc_status: crate::ast::GcStatus::None }],
            },
            value_count: 3,
            var_decl_count: 0,
            proc_call_count: 0,
            proc_count: 0,
            record_count: 0,
            constant_count: 2,
        };
        let mut alloc = RegAllocator::new(program.constant_count);
        alloc.allocate_program(&program);
        let config = CompilerConfig::new();
        let mut lowerer = Lowerer::new(&alloc, &config);
        lowerer.lower_program(&program).expect("lowering should succeed");
        let store_count = lowerer
            .instrs
            .iter()
            .filter(|(_, ins)| matches!(ins, Instruction::StoreAllocI { .. }))
            .count();
        assert_eq!(store_count, 2);
        assert!(lowerer
            .instrs
            .iter()
            .all(|(_, ins)| !matches!(ins, Instruction::TypeguardProtectArray { .. })));
    }

    /// `proc` with one generic type-argument whose body is a single
    /// statement, wrapped as the sole top-level value so
    /// `RegAllocator`/`Lowerer` see it exactly the way
    /// `array_literal_of_longs_stores_every_element_without_typeguard`
    /// wraps its non-generic literal.
    fn wrap_generic_proc(body: Value) -> Program {
        let proc = Proc {
            id: 0,
            typeargs: 1,
            params: vec![],
            return_type: TypecheckType::Nothing,
            exec_block: CodeBlock {
                statements: vec![Statement::Value { value: body, gc_status: crate::ast::GcStatus::None }],
            },
            do_gc: false,
        };
        let proc_value = Value {
            id: 100,
            ty: TypecheckType::Proc { typeargs: 1, sub_types: vec![TypecheckType::Nothing] },
            affects_state: true,
            free_status: FreeStatus::None,
            trace_status: TraceStatus::None,
            kind: ValueKind::Proc(Box::new(proc)),
        };
        Program {
            record_protos: vec![],
            procs: vec![],
            exec_block: CodeBlock {
                statements: vec![Statement::Value { value: proc_value, gc_status: crate::ast::GcStatus::None }],
            },
            value_count: 101,
            var_decl_count: 0,
            proc_call_count: 0,
            proc_count: 1,
            record_count: 0,
            constant_count: 1,
        }
    }

    fn has_typearg_signature(machine: &Machine) -> bool {
        (0..machine.len() as u16).any(|i| matches!(machine.get(i), crate::machine::Signature::TypeArg(_)))
    }

    #[test]
    fn alloc_array_of_a_type_argument_interns_a_typearg_signature_and_emits_dynamic_conf() {
        let size = long_primitive(1, 0);
        let array_value = Value {
            id: 0,
            ty: TypecheckType::Array { elem: Box::new(TypecheckType::TypeArg(0)) },
            affects_state: true,
            free_status: FreeStatus::None,
            trace_status: TraceStatus::None,
            kind: ValueKind::AllocArray { elem_type: Box::new(TypecheckType::TypeArg(0)), size: Box::new(size) },
        };
        let program = wrap_generic_proc(array_value);
        let mut alloc = RegAllocator::new(program.constant_count);
        alloc.allocate_program(&program);
        let config = CompilerConfig::new();
        let mut lowerer = Lowerer::new(&alloc, &config);
        lowerer.lower_program(&program).expect("lowering should succeed");

        assert!(lowerer.instrs.iter().any(|(_, ins)| matches!(ins, Instruction::DynamicConfAll { .. })));
        assert!(has_typearg_signature(&lowerer.machine));
    }

    #[test]
    fn set_index_on_a_generic_element_array_protects_with_the_typearg_slot() {
        let array_var = crate::ast::VarInfo {
            id: 0,
            ty: TypecheckType::Array { elem: Box::new(TypecheckType::TypeArg(0)) },
            is_used: true,
            is_global: false,
            has_mutated: false,
        };
        let array_value = Value {
            id: 0,
            ty: array_var.ty.clone(),
            affects_state: true,
            free_status: FreeStatus::None,
            trace_status: TraceStatus::None,
            kind: ValueKind::Var { var_id: array_var.id },
        };
        let idx_var = crate::ast::VarInfo {
            id: 1,
            ty: TypecheckType::Long,
            is_used: true,
            is_global: false,
            has_mutated: false,
        };
        let index_value = Value {
            id: 1,
            ty: TypecheckType::Long,
            affects_state: true,
            free_status: FreeStatus::None,
            trace_status: TraceStatus::None,
            kind: ValueKind::Var { var_id: idx_var.id },
        };
        let set_value = long_primitive(2, 1);
        let set_index = Value {
            id: 3,
            ty: TypecheckType::Nothing,
            affects_state: true,
            free_status: FreeStatus::None,
            trace_status: TraceStatus::None,
            kind: ValueKind::SetIndex {
                array: Box::new(array_value),
                index: Box::new(index_value),
                value: Box::new(set_value),
            },
        };
        let body = CodeBlock {
            statements: vec![
                Statement::DeclVar(crate::ast::VarDecl {
                    var_info: array_var,
                    set_value: Value {
                        id: 4,
                        ty: TypecheckType::Array { elem: Box::new(TypecheckType::TypeArg(0)) },
                        affects_state: true,
                        free_status: FreeStatus::None,
                        trace_status: TraceStatus::None,
                        kind: ValueKind::AllocArray {
                            elem_type: Box::new(TypecheckType::TypeArg(0)),
                            size: Box::new(long_primitive(5, 0)),
                        },
                    },
                }),
                Statement::DeclVar(crate::ast::VarDecl {
                    var_info: idx_var,
                    set_value: long_primitive(6, 0),
                }),
                Statement::Value { value: set_index, gc_status: crate::ast::GcStatus::None },
            ],
        };
        let proc = Proc {
            id: 0,
            typeargs: 1,
            params: vec![],
            return_type: TypecheckType::Nothing,
            exec_block: body,
            do_gc: false,
        };
        let proc_value = Value {
            id: 100,
            ty: TypecheckType::Proc { typeargs: 1, sub_types: vec![TypecheckType::Nothing] },
            affects_state: true,
            free_status: FreeStatus::None,
            trace_status: TraceStatus::None,
            kind: ValueKind::Proc(Box::new(proc)),
        };
        let program = Program {
            record_protos: vec![],
            procs: vec![],
            exec_block: CodeBlock {
                statements: vec![Statement::Value { value: proc_value, gc_status: crate::ast::GcStatus::None }],
            },
            value_count: 101,
            var_decl_count: 2,
            proc_call_count: 0,
            proc_count: 1,
            record_count: 0,
            constant_count: 2,
        };
        let mut alloc = RegAllocator::new(program.constant_count);
        alloc.allocate_program(&program);
        let config = CompilerConfig::new();
        let mut lowerer = Lowerer::new(&alloc, &config);
        lowerer.lower_program(&program).expect("lowering should succeed");

        let guard = lowerer.instrs.iter().find_map(|(_, ins)| match ins {
            Instruction::TypeguardProtectArray { dynamic_slot, .. } => Some(*dynamic_slot),
            _ => None,
        });
        assert_eq!(guard, Some(Some(Register::local(1))));
    }

    #[test]
    fn set_prop_on_a_type_argument_property_emits_a_dynamic_typeguard() {
        let proto = crate::ast::RecordProto {
            record_id: 7,
            base_record_id: None,
            properties: vec![crate::ast::RecordProperty { id: 0, ty: TypecheckType::TypeArg(0) }],
            do_gc: false,
            property_traces: vec![crate::ast::TraceStatus::None],
        };
        let record_ty = TypecheckType::Record { record_id: 7, sub_types: vec![TypecheckType::TypeArg(0)] };
        let record_var = crate::ast::VarInfo {
            id: 0,
            ty: record_ty.clone(),
            is_used: true,
            is_global: false,
            has_mutated: false,
        };
        let record_value = Value {
            id: 0,
            ty: record_ty.clone(),
            affects_state: true,
            free_status: FreeStatus::None,
            trace_status: TraceStatus::None,
            kind: ValueKind::Var { var_id: record_var.id },
        };
        let set_value = long_primitive(1, 0);
        let set_prop = Value {
            id: 2,
            ty: TypecheckType::Nothing,
            affects_state: true,
            free_status: FreeStatus::None,
            trace_status: TraceStatus::None,
            kind: ValueKind::SetProp {
                record: Box::new(record_value),
                property_id: 0,
                value: Box::new(set_value),
            },
        };
        let body = CodeBlock {
            statements: vec![
                Statement::DeclVar(crate::ast::VarDecl {
                    var_info: record_var,
                    set_value: Value {
                        id: 3,
                        ty: record_ty,
                        affects_state: true,
                        free_status: FreeStatus::None,
                        trace_status: TraceStatus::None,
                        kind: ValueKind::AllocRecord { proto: proto.clone(), init_values: vec![] },
                    },
                }),
                Statement::Value { value: set_prop, gc_status: crate::ast::GcStatus::None },
            ],
        };
        let proc = Proc {
            id: 0,
            typeargs: 1,
            params: vec![],
            return_type: TypecheckType::Nothing,
            exec_block: body,
            do_gc: false,
        };
        let proc_value = Value {
            id: 100,
            ty: TypecheckType::Proc { typeargs: 1, sub_types: vec![TypecheckType::Nothing] },
            affects_state: true,
            free_status: FreeStatus::None,
            trace_status: TraceStatus::None,
            kind: ValueKind::Proc(Box::new(proc)),
        };
        let program = Program {
            record_protos: vec![proto],
            procs: vec![],
            exec_block: CodeBlock {
                statements: vec![Statement::Value { value: proc_value, gc_status: crate::ast::GcStatus::None }],
            },
            value_count: 101,
            var_decl_count: 1,
            proc_call_count: 0,
            proc_count: 1,
            record_count: 1,
            constant_count: 1,
        };
        let mut alloc = RegAllocator::new(program.constant_count);
        alloc.allocate_program(&program);
        let config = CompilerConfig::new();
        let mut lowerer = Lowerer::new(&alloc, &config);
        lowerer.lower_program(&program).expect("lowering should succeed");

        assert!(lowerer
            .instrs
            .iter()
            .any(|(_, ins)| matches!(ins, Instruction::TypeguardProp { kind: TypeguardKind::DynamicDirect, .. })));
    }

    #[test]
    fn typecheck_against_a_generic_match_type_uses_a_dynamic_sig() {
        let operand = Value {
            id: 0,
            ty: TypecheckType::TypeArg(0),
            affects_state: true,
            free_status: FreeStatus::None,
            trace_status: TraceStatus::None,
            kind: ValueKind::Primitive { constant_id: 0, data: 0 },
        };
        let type_op = Value {
            id: 1,
            ty: TypecheckType::Bool,
            affects_state: true,
            free_status: FreeStatus::None,
            trace_status: TraceStatus::None,
            kind: ValueKind::TypeOp {
                operand: Box::new(operand),
                check_type: TypecheckType::TypeArg(1),
                is_cast: false,
            },
        };
        let proc = Proc {
            id: 0,
            typeargs: 2,
            params: vec![],
            return_type: TypecheckType::Nothing,
            exec_block: CodeBlock {
                statements: vec![Statement::Value { value: type_op, gc_status: crate::ast::GcStatus::None }],
            },
            do_gc: false,
        };
        let program = wrap_generic_proc_with(proc);
        let mut alloc = RegAllocator::new(program.constant_count);
        alloc.allocate_program(&program);
        let config = CompilerConfig::new();
        let mut lowerer = Lowerer::new(&alloc, &config);
        lowerer.lower_program(&program).expect("lowering should succeed");

        let sig = lowerer.instrs.iter().find_map(|(_, ins)| match ins {
            Instruction::Typecheck { shape: TypecheckShape::DynamicDynamic, sig, .. } => Some(*sig),
            _ => None,
        });
        assert!(matches!(sig, Some(TypecheckSig::Dynamic(_))));
    }

    fn wrap_generic_proc_with(proc: Proc) -> Program {
        let typeargs = proc.typeargs;
        let proc_value = Value {
            id: 200,
            ty: TypecheckType::Proc { typeargs, sub_types: vec![TypecheckType::Nothing] },
            affects_state: true,
            free_status: FreeStatus::None,
            trace_status: TraceStatus::None,
            kind: ValueKind::Proc(Box::new(proc)),
        };
        Program {
            record_protos: vec![],
            procs: vec![],
            exec_block: CodeBlock {
                statements: vec![Statement::Value { value: proc_value, gc_status: crate::ast::GcStatus::None }],
            },
            value_count: 201,
            var_decl_count: 0,
            proc_call_count: 0,
            proc_count: 1,
            record_count: 0,
            constant_count: 1,
        }
    }
}
