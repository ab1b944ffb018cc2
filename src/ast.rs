//! The AST contract this crate consumes (spec.md §6.1 / SPEC_FULL.md §4.12).
//!
//! The lexer, parser, and typechecker are out of scope (spec.md §1); a
//! `Program` arrives fully typechecked, as JSON, over the CLI's `-s`
//! flag. Every node carries the metadata the allocator and lowerer need
//! to make decisions the original typechecker already settled —
//! `affects_state`, `free_status`, `trace_status`, `gc_status` — so
//! nothing downstream re-derives them.

use serde::{Deserialize, Serialize};

use crate::types::TypecheckType;

/// Whether (and how) a value must be freed after its last use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FreeStatus {
    /// Not a reference type, or known to outlive this scope (e.g. moved
    /// into a variable) — no `FREE` instruction.
    None,
    /// Concrete reference type: emit `FREE`.
    Static,
    /// The value's type is an unresolved type-argument: emit
    /// `DYNAMIC_FREE`, dispatched at runtime on the resolved signature.
    Dynamic,
}

/// Whether (and how) the GC must walk a value's children when it is
/// stored into a traced container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceStatus {
    None,
    TraceChildren,
    SuperTraceChildren,
    TraceDynamic,
}

/// Whether a local variable declaration needs the GC to track its slot
/// across this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GcStatus {
    None,
    LocalAlloc,
    LocalDynamic,
}

/// Per-parameter/variable declaration info carried alongside its type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarInfo {
    pub id: u32,
    pub ty: TypecheckType,
    pub is_used: bool,
    pub is_global: bool,
    /// True if anything in the procedure body writes to this variable
    /// after its declaration; drives the allocator's alias-vs-copy
    /// decision (spec.md §4.3 "Variable declaration").
    pub has_mutated: bool,
}

/// One field in a record's declared shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordProperty {
    pub id: u32,
    pub ty: TypecheckType,
}

/// A record type's prototype: its declared fields and (optionally) the
/// `record_id` of the single record it extends (spec.md §4.1 "record
/// super-type table").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordProto {
    pub record_id: u16,
    pub base_record_id: Option<u16>,
    pub properties: Vec<RecordProperty>,
    /// True if any field (transitively) needs GC tracing.
    pub do_gc: bool,
    /// Per-property trace requirement, aligned with `properties`.
    pub property_traces: Vec<TraceStatus>,
}

/// A procedure's formal parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub var: VarInfo,
}

/// A procedure body and its signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proc {
    pub id: u32,
    pub typeargs: u8,
    pub params: Vec<Param>,
    pub return_type: TypecheckType,
    pub exec_block: CodeBlock,
    pub do_gc: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    NotEq,
    Gt,
    Lt,
    GtEq,
    LtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOperator {
    Neg,
    Not,
    Len,
    Increment,
    Decrement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordInit {
    pub property_id: u32,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcCall {
    pub id: u32,
    pub procedure: Box<Value>,
    pub arguments: Vec<Value>,
    /// Resolved type-argument signatures for a generic call; empty for
    /// a non-generic procedure (spec.md §4.4 "Procedure call").
    pub typeargs: Vec<TypecheckType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignCall {
    pub op_id: Box<Value>,
    pub input: Option<Box<Value>>,
}

/// One AST expression node. `id` is a dense index into the allocator's
/// per-value maps (`eval_regs`, `move_eval`); `affects_state` lets the
/// allocator and lowerer skip pure, unused subexpressions entirely
/// (spec.md §4.3/§4.4: "`!value.affects_state` short-circuits").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Value {
    pub id: u32,
    pub ty: TypecheckType,
    pub affects_state: bool,
    pub free_status: FreeStatus,
    pub trace_status: TraceStatus,
    pub kind: ValueKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueKind {
    /// A compile-time constant; compiled into the constant pool rather
    /// than computed (spec.md §4.4 "Primitives"). `data` is the constant's
    /// raw 64-bit bit pattern, already resolved by the (out-of-scope)
    /// typechecker (spec.md §6.1: "a raw 64-bit `data` field").
    Primitive { constant_id: u32, data: u64 },
    AllocArray {
        elem_type: Box<TypecheckType>,
        size: Box<Value>,
    },
    ArrayLiteral {
        elem_type: Box<TypecheckType>,
        elements: Vec<Value>,
    },
    AllocRecord {
        proto: RecordProto,
        init_values: Vec<RecordInit>,
    },
    /// A procedure literal: defines and also evaluates to the
    /// procedure's address (spec.md §4.4 "Procedure literal").
    Proc(Box<Proc>),
    Var {
        var_id: u32,
    },
    SetVar {
        var_info: VarInfo,
        set_value: Box<Value>,
    },
    SetIndex {
        array: Box<Value>,
        index: Box<Value>,
        value: Box<Value>,
    },
    SetProp {
        record: Box<Value>,
        property_id: u32,
        value: Box<Value>,
    },
    GetIndex {
        array: Box<Value>,
        index: Box<Value>,
    },
    GetProp {
        record: Box<Value>,
        property_id: u32,
    },
    BinaryOp {
        op: BinaryOperator,
        lhs: Box<Value>,
        rhs: Box<Value>,
    },
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Value>,
        is_postfix: bool,
    },
    /// `is`/`as`; `is_cast` selects the raising `as` form.
    TypeOp {
        operand: Box<Value>,
        check_type: Box<TypecheckType>,
        is_cast: bool,
    },
    ProcCall(Box<ProcCall>),
    Foreign(Box<ForeignCall>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDecl {
    pub var_info: VarInfo,
    pub set_value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conditional {
    /// `None` for a trailing `else` with no condition of its own.
    pub condition: Option<Value>,
    pub exec_block: CodeBlock,
    pub next_if_false: Option<Box<Conditional>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhileLoop {
    pub condition: Value,
    pub exec_block: CodeBlock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    DeclVar(VarDecl),
    Cond(Conditional),
    While(WhileLoop),
    /// A bare expression statement, evaluated for its side effects.
    Value {
        value: Value,
        gc_status: GcStatus,
    },
    ReturnValue { value: Value, gc_status: GcStatus },
    Return,
    Break,
    Continue,
    Abort {
        kind: crate::error::RuntimeErrorKind,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeBlock {
    pub statements: Vec<Statement>,
}

/// The root AST node the CLI deserializes from `-s` (spec.md §6.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub record_protos: Vec<RecordProto>,
    pub procs: Vec<Proc>,
    pub exec_block: CodeBlock,
    pub value_count: u32,
    pub var_decl_count: u32,
    pub proc_call_count: u32,
    pub proc_count: u32,
    pub record_count: u32,
    pub constant_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_round_trips_through_json() {
        let program = Program {
            record_protos: vec![],
            procs: vec![],
            exec_block: CodeBlock {
                statements: vec![Statement::ReturnValue {
                    value: Value {
                        id: 0,
                        ty: TypecheckType::Long,
                        affects_state: false,
                        free_status: FreeStatus::None,
                        trace_status: TraceStatus::None,
                        kind: ValueKind::Primitive { constant_id: 0, data: 0 },
                    },
                    gc_status: GcStatus::None,
                }],
            },
            value_count: 1,
            var_decl_count: 0,
            proc_call_count: 0,
            proc_count: 0,
            record_count: 0,
            constant_count: 1,
        };
        let json = serde_json::to_string(&program).expect("serialize");
        let back: Program = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(program, back);
    }
}
