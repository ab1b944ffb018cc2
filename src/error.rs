//! Compile-time and runtime error types (spec.md §7 / SPEC_FULL.md §4.8).
//!
//! The compiler only ever *returns* [`ErrorKind`] — the checked failures
//! a well-formed AST can still trigger (redeclaration, an unresolved
//! type, a `break` outside a loop). [`RuntimeErrorKind`] enumerates the
//! failures the *emitted program* can hit; the compiler never raises
//! these itself, it only writes C text that references them as
//! `PANIC(...)` arguments.

/// Checked, compile-time failures (spec.md §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Memory,
    Internal,
    ReadonlyWrite,
    TypeNotAllowed,
    Undeclared,
    Redeclaration,
    UnexpectedType,
    UnexpectedArgumentSize,
    CannotReturn,
    CannotBreak,
    CannotContinue,
    CannotExtend,
    CannotInit,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            ErrorKind::Memory => "out of memory",
            ErrorKind::Internal => "internal compiler error",
            ErrorKind::ReadonlyWrite => "cannot write to a readonly value",
            ErrorKind::TypeNotAllowed => "type not allowed in this position",
            ErrorKind::Undeclared => "use of an undeclared identifier",
            ErrorKind::Redeclaration => "redeclaration of an existing identifier",
            ErrorKind::UnexpectedType => "unexpected type",
            ErrorKind::UnexpectedArgumentSize => "unexpected argument count",
            ErrorKind::CannotReturn => "return outside a procedure",
            ErrorKind::CannotBreak => "break outside a loop",
            ErrorKind::CannotContinue => "continue outside a loop",
            ErrorKind::CannotExtend => "cannot extend this record",
            ErrorKind::CannotInit => "cannot default-initialize this type",
        };
        f.write_str(msg)
    }
}

/// Failures the emitted C program can hit at runtime. The compiler
/// never constructs these as an `Err` — it emits them as arguments to
/// the runtime's `PANIC` macro (spec.md §6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RuntimeErrorKind {
    IndexOutOfRange,
    DivideByZero,
    StackOverflow,
    ReadUninit,
    UnreturnedFunction,
    Abort,
    Foreign,
    CannotOpenFile,
}

impl std::fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            RuntimeErrorKind::IndexOutOfRange => "ERROR_INDEX_OUT_OF_RANGE",
            RuntimeErrorKind::DivideByZero => "ERROR_DIVIDE_BY_ZERO",
            RuntimeErrorKind::StackOverflow => "ERROR_STACK_OVERFLOW",
            RuntimeErrorKind::ReadUninit => "ERROR_READ_UNINIT",
            RuntimeErrorKind::UnreturnedFunction => "ERROR_UNRETURNED_FUNCTION",
            RuntimeErrorKind::Abort => "ERROR_ABORT",
            RuntimeErrorKind::Foreign => "ERROR_FOREIGN",
            RuntimeErrorKind::CannotOpenFile => "ERROR_CANNOT_OPEN_FILE",
        };
        f.write_str(msg)
    }
}

/// The crate's error type. Carries a logic error with context, or wraps
/// a formatting failure from the emitter's `write!`-based code
/// generation — in the style of the teacher's `CodeGenError`
/// (`codegen/error.rs`), a hand-written `Display`/`Error`/`From` trio
/// rather than a derive-macro error type.
#[derive(Debug)]
pub enum CompileError {
    Logic(ErrorKind, String),
    Format(std::fmt::Error),
}

impl CompileError {
    pub fn logic(kind: ErrorKind, context: impl Into<String>) -> Self {
        CompileError::Logic(kind, context.into())
    }

    pub fn kind(&self) -> Option<&ErrorKind> {
        match self {
            CompileError::Logic(kind, _) => Some(kind),
            CompileError::Format(_) => None,
        }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::Logic(kind, context) => write!(f, "{kind}: {context}"),
            CompileError::Format(e) => write!(f, "emission error: {e}"),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<std::fmt::Error> for CompileError {
    fn from(e: std::fmt::Error) -> Self {
        CompileError::Format(e)
    }
}

impl From<String> for CompileError {
    fn from(message: String) -> Self {
        CompileError::Logic(ErrorKind::Internal, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logic_error_displays_kind_and_context() {
        let err = CompileError::logic(ErrorKind::Undeclared, "variable `x`");
        assert_eq!(err.to_string(), "use of an undeclared identifier: variable `x`");
    }

    #[test]
    fn format_error_is_distinguishable_from_logic() {
        let err = CompileError::from(std::fmt::Error);
        assert!(err.kind().is_none());
    }

    #[test]
    fn string_conversion_classifies_as_an_internal_error() {
        let err: CompileError = String::from("scratch region overflow").into();
        assert_eq!(err.kind(), Some(&ErrorKind::Internal));
        assert_eq!(err.to_string(), "internal compiler error: scratch region overflow");
    }
}
