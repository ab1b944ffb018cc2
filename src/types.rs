//! Typecheck type system for SuperForth
//!
//! This is the type representation the core consumes from the (out of
//! scope) typechecker. It is a closed recursive variant distinguishing
//! abstract kinds, value types, and reference ("heap") types, plus
//! `TypeArg` for a generic parameter of the enclosing procedure.

/// A typechecked SuperForth type, as attached to every AST value node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TypecheckType {
    /// Placeholder used by the typechecker before inference settles; never
    /// reaches codegen on a well-typed program.
    Auto,
    /// The empty/void type: procedures that return nothing.
    Nothing,
    /// The top type: accepts any value, used for `any`-typed generics.
    Any,
    /// Reference to the `id`-th type parameter of the enclosing procedure.
    TypeArg(u8),
    Bool,
    Char,
    Long,
    Float,
    /// A procedure type: `typeargs` generic parameter slots, `sub_types`
    /// is `[param_types..., return_type]`.
    Proc {
        typeargs: u8,
        sub_types: Vec<TypecheckType>,
    },
    /// A homogeneous array; `elem` is boxed since types recurse.
    Array { elem: Box<TypecheckType> },
    /// A record instance; `record_id` indexes the AST's record proto table,
    /// `sub_types` are the record's resolved type arguments.
    Record {
        record_id: u16,
        sub_types: Vec<TypecheckType>,
    },
}

impl TypecheckType {
    /// `Bool..Float`: value types copied by value, never freed or traced.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            TypecheckType::Bool | TypecheckType::Char | TypecheckType::Long | TypecheckType::Float
        )
    }

    /// `Proc/Array/Record`: heap-allocated, GC-traced, reference-counted by
    /// the runtime's free/trace instructions.
    pub fn is_ref_type(&self) -> bool {
        matches!(
            self,
            TypecheckType::Proc { .. } | TypecheckType::Array { .. } | TypecheckType::Record { .. }
        )
    }

    pub fn is_type_arg(&self) -> bool {
        matches!(self, TypecheckType::TypeArg(_))
    }

    /// True if this type (possibly nested) mentions an unresolved type
    /// argument anywhere in its structure. Drives the `atomize` decision
    /// for `CONFIG_TYPESIG` (spec.md §4.4).
    pub fn contains_free_type_arg(&self) -> bool {
        match self {
            TypecheckType::TypeArg(_) => true,
            TypecheckType::Array { elem } => elem.contains_free_type_arg(),
            TypecheckType::Record { sub_types, .. } | TypecheckType::Proc { sub_types, .. } => {
                sub_types.iter().any(TypecheckType::contains_free_type_arg)
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for TypecheckType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypecheckType::Auto => write!(f, "auto"),
            TypecheckType::Nothing => write!(f, "nothing"),
            TypecheckType::Any => write!(f, "any"),
            TypecheckType::TypeArg(id) => write!(f, "T{id}"),
            TypecheckType::Bool => write!(f, "bool"),
            TypecheckType::Char => write!(f, "char"),
            TypecheckType::Long => write!(f, "long"),
            TypecheckType::Float => write!(f, "float"),
            TypecheckType::Proc { sub_types, .. } => {
                let parts: Vec<_> = sub_types.iter().map(|t| t.to_string()).collect();
                write!(f, "proc({})", parts.join(", "))
            }
            TypecheckType::Array { elem } => write!(f, "{elem}[]"),
            TypecheckType::Record { record_id, .. } => write!(f, "record#{record_id}"),
        }
    }
}
