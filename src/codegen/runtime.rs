//! The fixed runtime header emitted C relies on (spec.md §6.2).
//!
//! Grounded in the teacher's `RUNTIME_DECLARATIONS` data table
//! (`codegen/runtime.rs`): rather than `writeln!`-ing each declaration
//! inline at its call site, every external symbol the emitted C assumes
//! is exists lives in one static list, so the header is easy to audit
//! against spec.md §6.2 and easy to extend without hunting through the
//! emitter for the one place a new declaration belongs.

use std::sync::LazyLock;

/// One line of the ambient runtime header: a C declaration plus an
/// optional section comment, mirroring `RuntimeDecl`
/// (`codegen/runtime.rs`).
pub(super) struct RuntimeDecl {
    pub decl: &'static str,
    pub category: Option<&'static str>,
}

/// Every external declaration spec.md §6.2 says the emitted runtime
/// header provides: the process stack, the constant/type-signature
/// tables, the GC/allocation API, and the `PANIC` machinery.
pub(super) static RUNTIME_DECLARATIONS: LazyLock<Vec<RuntimeDecl>> = LazyLock::new(|| {
    vec![
        // stack[], global_offset, defined_signatures[]/defined_sig_count and
        // type_table[] (spec.md §6.2) are *defined* further down in this same
        // translation unit (globals.rs / types.rs) — they're compiler
        // output, not runtime-owned storage, so they get no `extern` here.
        RuntimeDecl {
            decl: "extern uint32_t positions[];",
            category: Some("/* Debug source-location table, owned by the runtime (spec.md §4.6) */"),
        },
        RuntimeDecl {
            decl: "extern uint32_t position_count;",
            category: None,
        },
        RuntimeDecl {
            decl: "extern heap_alloc_t *alloc(uint64_t size, trace_mode_t trace_mode);",
            category: Some("/* GC / allocation API (spec.md §6.2) */"),
        },
        RuntimeDecl {
            decl: "extern void free_alloc(heap_alloc_t *target);",
            category: None,
        },
        RuntimeDecl {
            decl: "extern void gc_clean(void);",
            category: None,
        },
        RuntimeDecl {
            decl: "extern type_sig_t *atomize_heap_type_sig(type_sig_t *sig);",
            category: None,
        },
        RuntimeDecl {
            decl: "extern int type_signature_match(type_sig_t *a, type_sig_t *b);",
            category: None,
        },
        RuntimeDecl {
            decl: "extern type_sig_t *downcast_type_signature(type_sig_t *sig, uint16_t depth);",
            category: None,
        },
        RuntimeDecl {
            decl: "extern uint16_t get_super_type(uint16_t record_id);",
            category: None,
        },
        RuntimeDecl {
            decl: "extern int64_t ffi_invoke(uint64_t op_id, int64_t input);",
            category: Some("/* Foreign-call / math helpers (spec.md §6.2) */"),
        },
        RuntimeDecl {
            decl: "extern int64_t longpow(int64_t base, int64_t exp);",
            category: None,
        },
        RuntimeDecl {
            decl: "extern void gc_new_frame(void);",
            category: Some("/* Per-call GC frame bookkeeping (spec.md §4.4 \"Procedure call\") */"),
        },
        RuntimeDecl {
            decl: "extern void dynamic_free(heap_alloc_t *target, type_sig_t *typearg_sig);",
            category: Some("/* Type-argument-dispatched FREE/trace helpers (spec.md §4.4) */"),
        },
        RuntimeDecl {
            decl: "extern void dynamic_conf(heap_alloc_t *target, uint16_t prop_id, type_sig_t *typearg_sig);",
            category: None,
        },
        RuntimeDecl {
            decl: "extern void dynamic_conf_all(heap_alloc_t *target, type_sig_t *typearg_sig);",
            category: None,
        },
        RuntimeDecl {
            decl: "extern void dynamic_trace(heap_alloc_t *target, type_sig_t *typearg_sig);",
            category: None,
        },
        RuntimeDecl {
            decl: "extern int dynamic_typecheck_dd(int64_t operand, type_sig_t *match_sig);",
            category: Some("/* Type-op dispatch shapes (spec.md §4.4 \"Type op\") */"),
        },
        RuntimeDecl {
            decl: "extern int dynamic_typecheck_dr(int64_t operand, type_sig_t *match_sig);",
            category: None,
        },
        RuntimeDecl {
            decl: "extern int dynamic_typecheck_rd(int64_t operand, type_sig_t *match_sig);",
            category: None,
        },
        RuntimeDecl {
            decl: "extern void pop_atom_typesigs(uint16_t count);",
            category: Some("/* Atomized-signature bookkeeping (spec.md §4.4 \"Procedure call\") */"),
        },
    ]
});

/// Writes every declaration in [`RUNTIME_DECLARATIONS`], grouped by its
/// section comment, exactly once per compile (spec.md §6.2's header is
/// fixed ambient text, not something the emitter varies per-program).
pub(super) fn emit_runtime_header(out: &mut String) -> Result<(), crate::error::CompileError> {
    use std::fmt::Write as _;
    writeln!(out, "#include <stdint.h>")?;
    writeln!(out, "#include <string.h>")?;
    writeln!(out, "#include <stdio.h>")?;
    writeln!(out)?;
    writeln!(out, "typedef enum {{ TRACE_MODE_NONE, TRACE_MODE_ALL, TRACE_MODE_SOME }} trace_mode_t;")?;
    writeln!(
        out,
        "typedef enum {{ TYPE_BOOL, TYPE_CHAR, TYPE_LONG, TYPE_FLOAT, TYPE_ANY, TYPE_TYPE_ARG, TYPE_ARRAY, TYPE_PROC, TYPE_RECORD }} type_kind_t;"
    )?;
    writeln!(out, "typedef struct type_sig {{")?;
    writeln!(out, "    type_kind_t kind;")?;
    writeln!(out, "    uint8_t typeargs;")?;
    writeln!(out, "    uint16_t record_id;")?;
    writeln!(out, "    uint16_t *sub_sigs;")?;
    writeln!(out, "    uint16_t sub_sig_count;")?;
    writeln!(out, "}} type_sig_t;")?;
    writeln!(out)?;
    writeln!(
        out,
        "typedef enum {{ ERROR_INDEX_OUT_OF_RANGE, ERROR_DIVIDE_BY_ZERO, ERROR_STACK_OVERFLOW, ERROR_READ_UNINIT, ERROR_UNRETURNED_FUNCTION, ERROR_ABORT, ERROR_FOREIGN, ERROR_CANNOT_OPEN_FILE }} runtime_error_t;"
    )?;
    writeln!(out)?;
    writeln!(out, "/* --- ambient runtime header (spec.md §6.2) --- */")?;
    for decl in RUNTIME_DECLARATIONS.iter() {
        if let Some(category) = decl.category {
            writeln!(out, "{category}")?;
        }
        writeln!(out, "{}", decl.decl)?;
    }
    writeln!(out)?;
    writeln!(out, "typedef struct heap_alloc {{")?;
    writeln!(out, "    int64_t *registers;")?;
    writeln!(out, "    uint8_t init_stat;")?;
    writeln!(out, "    uint8_t trace_stat;")?;
    writeln!(out, "    uint32_t limit;")?;
    writeln!(out, "    uint8_t gc_flag;")?;
    writeln!(out, "    uint8_t trace_mode;")?;
    writeln!(out, "    type_sig_t *type_sig;")?;
    writeln!(out, "}} heap_alloc_t;")?;
    writeln!(out)?;
    writeln!(out, "extern int32_t last_err;")?;
    writeln!(out, "extern uint32_t last_src_loc;")?;
    writeln!(out)?;
    writeln!(
        out,
        "#define PANIC(err, src_loc) do {{ last_err = (err); last_src_loc = (src_loc); goto panic; }} while (0)"
    )?;
    writeln!(
        out,
        "#define PANIC_ON_FAIL(cond, err, src_loc) do {{ if (!(cond)) PANIC(err, src_loc); }} while (0)"
    )?;
    writeln!(out)?;
    writeln!(
        out,
        "/* Floats share the int64_t register file bit-for-bit (spec.md §3 \"Register\"). */"
    )?;
    writeln!(out, "static inline double as_float_bits(int64_t bits) {{ double d; memcpy(&d, &bits, sizeof(d)); return d; }}")?;
    writeln!(out, "static inline int64_t as_long_bits(double d) {{ int64_t bits; memcpy(&bits, &d, sizeof(bits)); return bits; }}")?;
    writeln!(out, "#define AS_FLOAT(x) as_float_bits(x)")?;
    writeln!(out, "#define AS_LONG(x) as_long_bits(x)")?;
    writeln!(out)?;
    Ok(())
}

/// Renders a [`crate::error::RuntimeErrorKind`] as the C identifier the
/// header's `PANIC` macro expects (spec.md §6.2/§7: the compiler never
/// raises these, it only writes C text that references them).
pub(super) fn runtime_error_c_name(kind: crate::error::RuntimeErrorKind) -> &'static str {
    use crate::error::RuntimeErrorKind::*;
    match kind {
        IndexOutOfRange => "ERROR_INDEX_OUT_OF_RANGE",
        DivideByZero => "ERROR_DIVIDE_BY_ZERO",
        StackOverflow => "ERROR_STACK_OVERFLOW",
        ReadUninit => "ERROR_READ_UNINIT",
        UnreturnedFunction => "ERROR_UNRETURNED_FUNCTION",
        Abort => "ERROR_ABORT",
        Foreign => "ERROR_FOREIGN",
        CannotOpenFile => "ERROR_CANNOT_OPEN_FILE",
    }
}
