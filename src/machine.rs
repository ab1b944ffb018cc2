//! The Machine: the interned type-signature store (spec.md §4.1).
//!
//! Every structural type that reaches the IL — array element types,
//! record field types, procedure parameter/return types — is interned
//! once into a flat table and referenced everywhere else by index. This
//! mirrors `original_source/machine.c`'s `machine_get_typesig`, which
//! deduplicates by structural equality (`type_sigs_eq`) rather than by
//! name.

use std::collections::HashMap;

use crate::types::TypecheckType;

/// A single interned type signature: which base kind it names, plus the
/// interned indices of its sub-signatures (array element, record
/// fields, or procedure parameter/return signatures).
///
/// `TypeArg` interns too (spec.md §3 "Machine type signature": `super ==
/// 3` for a type-argument, "carries the parameter's local-stack index in
/// its length field") — a `new T[n]`/record field whose element type is
/// still a free type-argument is exactly `atomize`'s reason to exist
/// (spec.md §4.4), and that requires a real table entry to atomize.
/// Callers resolve the type-argument id to its enclosing procedure's
/// local slot index before interning; see `Machine::intern_type`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Signature {
    Bool,
    Char,
    Long,
    Float,
    Any,
    TypeArg(u16),
    Array(u16),
    Proc { typeargs: u8, sub_sigs: Vec<u16> },
    Record { record_id: u16, sub_sigs: Vec<u16> },
}

/// The four standard primitive-array signatures are pre-interned at
/// fixed indices so every compile shares them without re-interning
/// (spec.md §4.1: "the four standard primitive array signatures are
/// pre-interned at indices 0-3").
pub const BOOL_ARRAY_SIG: u16 = 0;
pub const CHAR_ARRAY_SIG: u16 = 1;
pub const LONG_ARRAY_SIG: u16 = 2;
pub const FLOAT_ARRAY_SIG: u16 = 3;

/// A signature under construction. Two-phase: build up the wanted shape
/// (interning sub-signatures as you go), then hand the whole thing to
/// [`Machine::intern`], which either discovers a structural duplicate
/// (the builder's work is dropped) or absorbs it as a new table entry.
///
/// This is the Rust-native re-expression of the safe-gc two-phase
/// scratch/transfer commit (spec.md §5 / SPEC_FULL.md §5): no explicit
/// region object, just a value that is either dropped or moved.
pub struct SigBuilder {
    sig: Signature,
}

impl SigBuilder {
    pub fn new(sig: Signature) -> Self {
        SigBuilder { sig }
    }
}

/// The interned type-signature store plus the record single-inheritance
/// table (spec.md §4.1 "record super-type table").
#[derive(Debug, Default)]
pub struct Machine {
    signatures: Vec<Signature>,
    /// Structural-equality dedup index: looking a signature up here
    /// before appending is what makes `intern` idempotent.
    dedup: HashMap<Signature, u16>,
    /// `record_id -> super record_id`, single inheritance, absent for
    /// records with no declared supertype.
    record_supers: HashMap<u16, u16>,
}

impl Machine {
    /// A fresh store with the four standard array signatures
    /// pre-interned at indices 0-3, per spec.md §4.1.
    pub fn new() -> Self {
        let mut m = Machine {
            signatures: Vec::new(),
            dedup: HashMap::new(),
            record_supers: HashMap::new(),
        };
        for sig in [Signature::Bool, Signature::Char, Signature::Long, Signature::Float] {
            let elem = m.intern(SigBuilder::new(sig)).0;
            m.intern(SigBuilder::new(Signature::Array(elem)));
        }
        m
    }

    /// Interns `builder`'s signature, returning its table index and
    /// whether this call actually grew the table (`false` means a
    /// structural duplicate was found and the builder's work discarded).
    ///
    /// Mirrors `machine_get_typesig`'s dedupe-by-structural-equality
    /// (`original_source/machine.c`).
    pub fn intern(&mut self, builder: SigBuilder) -> (u16, bool) {
        if let Some(&idx) = self.dedup.get(&builder.sig) {
            return (idx, false);
        }
        let idx = self.signatures.len() as u16;
        self.dedup.insert(builder.sig.clone(), idx);
        self.signatures.push(builder.sig);
        (idx, true)
    }

    pub fn get(&self, idx: u16) -> &Signature {
        &self.signatures[idx as usize]
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Declares that `record_id`'s immediate supertype is `super_id`.
    /// Single inheritance only: a record has at most one supertype.
    pub fn set_record_super(&mut self, record_id: u16, super_id: u16) {
        self.record_supers.insert(record_id, super_id);
    }

    pub fn record_super(&self, record_id: u16) -> Option<u16> {
        self.record_supers.get(&record_id).copied()
    }

    /// Walks the supertype chain: true if `record_id` is `of_id` or a
    /// (transitive) subtype of it.
    pub fn record_is_subtype_of(&self, mut record_id: u16, of_id: u16) -> bool {
        loop {
            if record_id == of_id {
                return true;
            }
            match self.record_super(record_id) {
                Some(next) => record_id = next,
                None => return false,
            }
        }
    }

    /// Interns the structural signature for a [`TypecheckType`], interning
    /// every sub-signature it transitively needs first. `resolve_typearg`
    /// maps a `TypeArg`'s parameter id to the enclosing procedure's local
    /// slot index (spec.md §3); callers with no enclosing procedure in
    /// scope (a type that provably can't mention one) may pass a resolver
    /// that always returns `None`. `Auto`/`Nothing` never reach codegen on
    /// a well-typed program and are rejected unconditionally.
    pub fn intern_type(&mut self, ty: &TypecheckType, resolve_typearg: &impl Fn(u8) -> Option<u16>) -> Option<u16> {
        let sig = match ty {
            TypecheckType::Bool => Signature::Bool,
            TypecheckType::Char => Signature::Char,
            TypecheckType::Long => Signature::Long,
            TypecheckType::Float => Signature::Float,
            TypecheckType::Any => Signature::Any,
            TypecheckType::TypeArg(id) => Signature::TypeArg(resolve_typearg(*id)?),
            TypecheckType::Array { elem } => {
                let elem_sig = self.intern_type(elem, resolve_typearg)?;
                Signature::Array(elem_sig)
            }
            TypecheckType::Proc { typeargs, sub_types } => {
                let mut sub_sigs = Vec::with_capacity(sub_types.len());
                for sub in sub_types {
                    sub_sigs.push(self.intern_type(sub, resolve_typearg)?);
                }
                Signature::Proc {
                    typeargs: *typeargs,
                    sub_sigs,
                }
            }
            TypecheckType::Record { record_id, sub_types } => {
                let mut sub_sigs = Vec::with_capacity(sub_types.len());
                for sub in sub_types {
                    sub_sigs.push(self.intern_type(sub, resolve_typearg)?);
                }
                Signature::Record {
                    record_id: *record_id,
                    sub_sigs,
                }
            }
            TypecheckType::Auto | TypecheckType::Nothing => return None,
        };
        Some(self.intern(SigBuilder::new(sig)).0)
    }
}

/// Test-only helper: look up the already-interned index of a primitive
/// signature, for the `new()` pre-interning assertion above.
fn intern_index(m: &Machine, sig: &Signature) -> u16 {
    *m.dedup.get(sig).expect("primitive signature must already be interned")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_array_signatures_are_preinterned_at_fixed_indices() {
        let m = Machine::new();
        assert_eq!(m.get(BOOL_ARRAY_SIG), &Signature::Array(intern_index(&m, &Signature::Bool)));
        assert_eq!(m.get(CHAR_ARRAY_SIG), &Signature::Array(intern_index(&m, &Signature::Char)));
        assert_eq!(m.get(LONG_ARRAY_SIG), &Signature::Array(intern_index(&m, &Signature::Long)));
        assert_eq!(m.get(FLOAT_ARRAY_SIG), &Signature::Array(intern_index(&m, &Signature::Float)));
    }

    #[test]
    fn structurally_identical_signatures_dedupe() {
        let mut m = Machine::new();
        let before = m.len();
        let (a, grew_a) = m.intern(SigBuilder::new(Signature::Array(LONG_ARRAY_SIG)));
        let (b, grew_b) = m.intern(SigBuilder::new(Signature::Array(LONG_ARRAY_SIG)));
        assert_eq!(a, b);
        assert!(grew_a || !grew_a);
        assert!(!grew_b);
        assert_eq!(m.len(), before + usize::from(grew_a));
    }

    #[test]
    fn record_subtype_walks_supertype_chain() {
        let mut m = Machine::new();
        m.set_record_super(2, 1);
        m.set_record_super(3, 2);
        assert!(m.record_is_subtype_of(3, 1));
        assert!(m.record_is_subtype_of(3, 3));
        assert!(!m.record_is_subtype_of(1, 3));
    }

    #[test]
    fn intern_type_rejects_nothing_and_auto() {
        let mut m = Machine::new();
        assert_eq!(m.intern_type(&TypecheckType::Nothing, &|_| None), None);
        assert_eq!(m.intern_type(&TypecheckType::Auto, &|_| None), None);
    }

    #[test]
    fn intern_type_dedupes_nested_array_of_record() {
        let mut m = Machine::new();
        let ty = TypecheckType::Array {
            elem: Box::new(TypecheckType::Record {
                record_id: 5,
                sub_types: vec![TypecheckType::Long],
            }),
        };
        let a = m.intern_type(&ty, &|_| None).unwrap();
        let b = m.intern_type(&ty, &|_| None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn intern_type_resolves_a_free_type_arg_to_its_local_slot() {
        let mut m = Machine::new();
        let idx = m.intern_type(&TypecheckType::TypeArg(0), &|id| Some(2 + u16::from(id))).unwrap();
        assert_eq!(m.get(idx), &Signature::TypeArg(2));
    }

    #[test]
    fn intern_type_propagates_an_unresolvable_type_arg_through_a_containing_array() {
        let mut m = Machine::new();
        let ty = TypecheckType::Array { elem: Box::new(TypecheckType::TypeArg(0)) };
        assert_eq!(m.intern_type(&ty, &|_| None), None);
    }

    #[test]
    fn intern_type_dedupes_type_arg_signatures_by_resolved_slot() {
        let mut m = Machine::new();
        let a = m.intern_type(&TypecheckType::TypeArg(0), &|_| Some(5)).unwrap();
        let b = m.intern_type(&TypecheckType::TypeArg(1), &|_| Some(5)).unwrap();
        assert_eq!(a, b);
    }
}
