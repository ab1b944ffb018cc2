//! The IL instruction set and the growable instruction buffer that holds it.
//!
//! Mirrors spec.md §3/§4.2: a tagged opcode plus up to three register
//! operands, uniformly encoded, held in-memory only (no on-disk format,
//! spec.md §6.4). Branch targets are kept in a dedicated [`IPRef`]
//! rather than overloaded onto [`Register`]'s 16-bit index — the one
//! place this crate folds an encoding convenience of the original
//! (spec.md Design Notes: "fold scratchpad arguments into the consuming
//! opcode's variant payload directly") since nothing downstream needs
//! bit-compatibility with a packed 3-operand struct.

use crate::error::RuntimeErrorKind;
use crate::register::Register;

/// An instruction pointer into the instruction stream. Used only for
/// branch targets so the label pass (spec.md §4.6) can find them by type
/// instead of by operand position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IPRef(pub u32);

/// Per-allocation GC policy (spec.md GLOSSARY "Trace mode").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceMode {
    None,
    All,
    Some,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    LongAdd,
    LongSub,
    LongMul,
    LongDiv,
    FloatAdd,
    FloatSub,
    FloatMul,
    FloatDiv,
    LongEq,
    FloatEq,
    PtrEq,
    LongGt,
    LongLt,
    LongGe,
    LongLe,
    FloatGt,
    FloatLt,
    FloatGe,
    FloatLe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    /// Arithmetic negation (`-`); dispatches on the operand's type.
    Neg,
    /// Boolean negation (`!`), also used to synthesize `!=` from `==`.
    Not,
    /// Array length (`#`).
    Len,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncDec {
    Inc,
    Dec,
}

/// The four shapes of `is`/`as` dispatch (spec.md §4.4 "Type op"), chosen
/// by the cross-product of (operand type is a type-argument? its
/// signature atomized?) x (match type is a type-argument? literal?).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypecheckShape {
    /// `DYNAMIC_TYPECHECK_DD`: both operand and match type are dynamic
    /// (unresolved type-arguments).
    DynamicDynamic,
    /// `DD -> DR`: dynamic operand, reference/concrete match type.
    DynamicToReference,
    /// `RD`: reference/concrete operand, dynamic match type.
    ReferenceToDynamic,
    /// `RUNTIME_TYPECHECK`: both sides are concrete, checked structurally
    /// against an interned signature at runtime.
    Static,
}

/// Which signature a `Typecheck`/`Typecast` compares its operand against.
/// The two concrete-match shapes (`Static`/`DynamicToReference`) know the
/// match signature at compile time, an interned table index. The two
/// dynamic-match shapes (`DynamicDynamic`/`ReferenceToDynamic`) compare
/// against a signature only known at runtime, resolved through a local
/// slot holding a type-argument's live signature pointer — that slot is
/// a [`Register`], never a `Machine` table index, and must render as a
/// pointer dereference rather than a `defined_signatures[]` lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypecheckSig {
    Static(u16),
    Dynamic(Register),
}

/// The four typeguard shapes for `set property` (spec.md §4.4 "Set
/// property"), chosen by `optimize_typeguard_downcast` and whether the
/// containing expression's static type is the record itself or a
/// subtype reached through a downcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeguardKind {
    StaticDirect,
    StaticDowncast,
    DynamicDirect,
    DynamicDowncast,
}

/// Static (non-type-argument-dispatched) GC trace requirement, used by
/// `GC_TRACE` (spec.md `trace_status`/`gc_status`, excluding `None` which
/// emits no instruction and `TraceDynamic` which is `DYNAMIC_TRACE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticTraceMode {
    TraceChildren,
    SuperTraceChildren,
}

/// A single IL instruction. Every variant holds its operands directly
/// rather than in a uniform 3-slot array — see the module doc comment.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// `new T[n]` with a dynamically-computed size.
    Alloc {
        dest: Register,
        size: Register,
        trace_mode: TraceMode,
    },
    /// `new T[n]` / record alloc with an immediate (compile-time known)
    /// element/property count.
    AllocI {
        dest: Register,
        size: u16,
        trace_mode: TraceMode,
    },
    /// Installs `dest`'s interned type signature, `atomize` true iff the
    /// element/record type contains a free type-argument.
    ConfigTypesig {
        dest: Register,
        sig_idx: u16,
        atomize: bool,
    },
    /// Dynamically-indexed, bounds-checked store.
    StoreAlloc {
        dest: Register,
        value: Register,
        index: Register,
    },
    /// Immediate-indexed store with no bounds check (array/record
    /// literal initialization, where the index is always in range).
    StoreAllocI {
        dest: Register,
        value: Register,
        index: u16,
    },
    /// Immediate-indexed store with a bounds check folded in (assignment
    /// through a literal index into an array of dynamic length).
    StoreAllocIBound {
        dest: Register,
        value: Register,
        index: u16,
    },
    LoadAlloc {
        dest: Register,
        src: Register,
        index: Register,
    },
    LoadAllocI {
        dest: Register,
        src: Register,
        index: u16,
    },
    LoadAllocIBound {
        dest: Register,
        src: Register,
        index: u16,
    },
    /// Static per-field GC trace configuration while walking a record's
    /// prototype chain.
    ConfTrace {
        target: Register,
        prop_id: u16,
        trace_mode: TraceMode,
    },
    /// Runtime-dispatched per-field trace configuration (field type is a
    /// type-argument); `typearg_slot` names the local holding the
    /// resolved signature.
    DynamicConf {
        target: Register,
        prop_id: u16,
        typearg_slot: Register,
    },
    /// Runtime-dispatched whole-array trace configuration (generic
    /// element type).
    DynamicConfAll {
        target: Register,
        typearg_slot: Register,
    },
    /// Materializes a procedure value: `dest` receives the procedure's
    /// address label, `body_start` is patched in once the body's start
    /// ip is known.
    Label { dest: Register, body_start: IPRef },
    Jump { target: IPRef },
    /// Branches to `target` when `cond` is false (spec.md §4.5: "`JUMP_CHECK`
    /// to the next arm" / "on failure to the loop-exit").
    JumpCheck { cond: Register, target: IPRef },
    /// Emitted first in a procedure body; the C backend renders this as
    /// a stack-overflow check against `max_locals` (spec.md §8 "Maximum
    /// nesting depth of the call frame").
    StackValidate { max_locals: u16 },
    GcNewFrame,
    Move { dest: Register, src: Register },
    Free { target: Register },
    /// `FREE` dispatched at runtime because the value's type is a free
    /// type-argument (`free_status == Dynamic`).
    DynamicFree {
        target: Register,
        typearg_slot: Register,
    },
    /// Runtime variance check: the value about to be stored into an
    /// array must be a subtype of the array's declared element
    /// signature (spec.md §4.4 "Set index").
    TypeguardProtectArray {
        array: Register,
        value: Register,
        sig_idx: u16,
        dynamic_slot: Option<Register>,
    },
    /// Smuggles a downcast depth through the interpreter's scratchpad for
    /// the instruction that immediately follows (spec.md §4.4 "Set
    /// property"; spec.md Design Notes recommend folding this into the
    /// consumer directly for new backends, which is what
    /// [`Instruction::TypeguardProp`] does — this variant exists only so
    /// the C backend can still emit the two-instruction dance when
    /// bit-compat with the original encoding is desired).
    SetExtraArgs {
        a: Register,
        b: Register,
        c: Register,
    },
    TypeguardProp {
        kind: TypeguardKind,
        record: Register,
        value: Register,
        sig_idx: u16,
        downcast_depth: u16,
    },
    BinOp {
        op: BinOp,
        dest: Register,
        lhs: Register,
        rhs: Register,
    },
    UnOp {
        op: UnOp,
        dest: Register,
        src: Register,
    },
    /// Prefix `++`/`--`: mutates `target` in place.
    IncDec { op: IncDec, target: Register },
    Typecheck {
        shape: TypecheckShape,
        dest: Register,
        src: Register,
        sig: TypecheckSig,
    },
    /// The check form plus an offset; raises `RuntimeErrorKind::UnexpectedType`-like
    /// failure at runtime on mismatch (spec.md §4.4: "the check form plus
    /// an offset and raises on failure").
    Typecast {
        shape: TypecheckShape,
        dest: Register,
        src: Register,
        sig: TypecheckSig,
    },
    Call { callee: Register, base: u16 },
    /// Writes a signature index into a generic type-argument slot;
    /// `atomize` asks the runtime to copy the signature onto its
    /// signature stack (tracked for a later `POP_ATOM_TYPESIGS`).
    SetSig {
        slot: Register,
        sig_idx: u16,
        atomize: bool,
    },
    PopAtomTypesigs { count: u16 },
    /// Restores `global_offset`/frame pointer to its pre-call value.
    StackDeoffset { base: u16 },
    Foreign {
        op_id: Register,
        input: Option<Register>,
        output: Register,
    },
    GcTrace {
        target: Register,
        mode: StaticTraceMode,
    },
    DynamicTrace {
        target: Register,
        typearg_slot: Register,
    },
    GcClean,
    /// Normal program exit (`ABORT(NONE)`, spec.md §8 scenario 1) or an
    /// explicit `abort` statement carrying a runtime error kind.
    Abort { kind: Option<RuntimeErrorKind> },
    Return { value: Register },
}

impl Instruction {
    /// The ip this instruction's branch-target field points at, if any.
    /// Used by the label pass (spec.md §4.6) without needing a match on
    /// every call site.
    pub fn branch_target(&self) -> Option<IPRef> {
        match self {
            Instruction::Jump { target } => Some(*target),
            Instruction::JumpCheck { target, .. } => Some(*target),
            Instruction::Label { body_start, .. } => Some(*body_start),
            _ => None,
        }
    }

    /// Patches this instruction's branch-target field in place. Returns
    /// `false` if this opcode carries no branch target (a builder bug,
    /// not a recoverable condition, so callers should treat that as an
    /// internal error).
    pub fn patch_branch_target(&mut self, new_target: IPRef) -> bool {
        match self {
            Instruction::Jump { target } => {
                *target = new_target;
                true
            }
            Instruction::JumpCheck { target, .. } => {
                *target = new_target;
                true
            }
            Instruction::Label { body_start, .. } => {
                *body_start = new_target;
                true
            }
            _ => false,
        }
    }

    /// True for the closed set of opcodes that can trap at runtime; the
    /// label pass marks their debug source-location as "interesting"
    /// (spec.md §4.6).
    pub fn can_trap(&self) -> bool {
        matches!(
            self,
            Instruction::Alloc { .. }
                | Instruction::AllocI { .. }
                | Instruction::LoadAlloc { .. }
                | Instruction::LoadAllocI { .. }
                | Instruction::LoadAllocIBound { .. }
                | Instruction::StoreAlloc { .. }
                | Instruction::StoreAllocI { .. }
                | Instruction::StoreAllocIBound { .. }
                | Instruction::Free { .. }
                | Instruction::DynamicFree { .. }
                | Instruction::BinOp {
                    op: BinOp::LongDiv | BinOp::FloatDiv,
                    ..
                }
                | Instruction::Typecheck { .. }
                | Instruction::Typecast { .. }
                | Instruction::PopAtomTypesigs { .. }
                | Instruction::Abort { .. }
                | Instruction::Label { .. }
                | Instruction::Call { .. }
        )
    }
}

/// Growable ordered buffer of IL instructions (spec.md §4.2). Doubles
/// capacity on overflow in the teacher's style
/// (`ins_builder_append_ins`/`codegen::CodeGen`'s `output` buffer), though
/// here that's just `Vec::push`'s amortized growth — the point spec.md
/// makes (explicit grow-on-overflow) is a C memory-management detail
/// this crate gets for free from `Vec`.
#[derive(Debug, Default, Clone)]
pub struct InstrBuilder {
    instructions: Vec<Instruction>,
}

impl InstrBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, ins: Instruction) -> IPRef {
        let ip = IPRef(self.instructions.len() as u32);
        self.instructions.push(ins);
        ip
    }

    pub fn next_ip(&self) -> IPRef {
        IPRef(self.instructions.len() as u32)
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Fixes up a forward jump/procedure-body address once the target ip
    /// is known (spec.md §4.2: "the latter is how forward jumps and
    /// procedure-body addresses are fixed up").
    pub fn patch_branch_target(&mut self, ip: IPRef, new_target: IPRef) {
        let ins = &mut self.instructions[ip.0 as usize];
        let patched = ins.patch_branch_target(new_target);
        debug_assert!(patched, "patch_branch_target on an opcode with no branch target");
    }

    pub fn get(&self, ip: IPRef) -> &Instruction {
        &self.instructions[ip.0 as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (IPRef, &Instruction)> {
        self.instructions
            .iter()
            .enumerate()
            .map(|(i, ins)| (IPRef(i as u32), ins))
    }

    pub fn into_vec(self) -> Vec<Instruction> {
        self.instructions
    }

    pub fn as_slice(&self) -> &[Instruction] {
        &self.instructions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_branch_target_fixes_forward_jump() {
        let mut b = InstrBuilder::new();
        let jump_ip = b.append(Instruction::Jump { target: IPRef(0) });
        let landing = b.append(Instruction::GcClean);
        b.patch_branch_target(jump_ip, landing);
        assert_eq!(b.get(jump_ip).branch_target(), Some(landing));
    }

    #[test]
    fn non_branch_opcode_reports_no_target() {
        assert_eq!(Instruction::GcClean.branch_target(), None);
    }

    #[test]
    fn div_opcodes_can_trap_but_add_does_not() {
        let add = Instruction::BinOp {
            op: BinOp::LongAdd,
            dest: Register::local(1),
            lhs: Register::local(2),
            rhs: Register::local(3),
        };
        let div = Instruction::BinOp {
            op: BinOp::LongDiv,
            dest: Register::local(1),
            lhs: Register::local(2),
            rhs: Register::local(3),
        };
        assert!(!add.can_trap());
        assert!(div.can_trap());
    }
}
