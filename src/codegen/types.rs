//! Emits the interned signature table as C construction code (spec.md
//! §4.1 / §6.2 `defined_signatures[]`).
//!
//! `Machine` only ever stores the *structural* shape of a signature —
//! sub-signatures are table indices, never inline copies — so emission
//! is a flat loop over the already-deduplicated table rather than a
//! recursive walk: every sub-signature a later entry needs was interned
//! (and therefore already constructed) before it.

use std::fmt::Write as _;

use crate::error::CompileError;
use crate::machine::{Machine, Signature};

fn signature_kind_tag(sig: &Signature) -> &'static str {
    match sig {
        Signature::Bool => "TYPE_BOOL",
        Signature::Char => "TYPE_CHAR",
        Signature::Long => "TYPE_LONG",
        Signature::Float => "TYPE_FLOAT",
        Signature::Any => "TYPE_ANY",
        Signature::TypeArg(_) => "TYPE_TYPE_ARG",
        Signature::Array(_) => "TYPE_ARRAY",
        Signature::Proc { .. } => "TYPE_PROC",
        Signature::Record { .. } => "TYPE_RECORD",
    }
}

/// Renders one `Signature` as a `defined_signatures[i] = ...;` statement,
/// emitting its sub-signature-index array inline as a C compound literal.
fn emit_signature_assignment(out: &mut String, idx: u16, sig: &Signature) -> Result<(), CompileError> {
    let tag = signature_kind_tag(sig);
    match sig {
        Signature::Bool | Signature::Char | Signature::Long | Signature::Float | Signature::Any => {
            writeln!(out, "    defined_signatures[{idx}] = (type_sig_t){{ .kind = {tag} }};")?;
        }
        // spec.md §3 "Machine type signature": a type-argument signature
        // carries the parameter's local-stack index in its length field
        // rather than a sub-signature array.
        Signature::TypeArg(local_index) => {
            writeln!(out, "    defined_signatures[{idx}] = (type_sig_t){{ .kind = {tag}, .sub_sig_count = {local_index} }};")?;
        }
        Signature::Array(elem) => {
            writeln!(
                out,
                "    defined_signatures[{idx}] = (type_sig_t){{ .kind = {tag}, .sub_sigs = (static uint16_t[]){{ {elem} }}, .sub_sig_count = 1 }};"
            )?;
        }
        Signature::Proc { typeargs, sub_sigs } => {
            let joined = join_u16s(sub_sigs);
            writeln!(
                out,
                "    defined_signatures[{idx}] = (type_sig_t){{ .kind = {tag}, .typeargs = {typeargs}, .sub_sigs = (static uint16_t[]){{ {joined} }}, .sub_sig_count = {} }};",
                sub_sigs.len()
            )?;
        }
        Signature::Record { record_id, sub_sigs } => {
            let joined = join_u16s(sub_sigs);
            writeln!(
                out,
                "    defined_signatures[{idx}] = (type_sig_t){{ .kind = {tag}, .record_id = {record_id}, .sub_sigs = (static uint16_t[]){{ {joined} }}, .sub_sig_count = {} }};",
                sub_sigs.len()
            )?;
        }
    }
    Ok(())
}

fn join_u16s(values: &[u16]) -> String {
    if values.is_empty() {
        // An empty C compound-literal array isn't legal; a lone sentinel
        // zero with sub_sig_count still 0 keeps the literal well-formed
        // without the runtime reading past it.
        "0".to_string()
    } else {
        values.iter().map(u16::to_string).collect::<Vec<_>>().join(", ")
    }
}

/// Emits `defined_signatures[]`'s backing storage and the `init_all()`
/// function that populates it, plus the record super-type table
/// (spec.md §3 "Record super-type table"). `record_supers` entries are
/// already `+1`-encoded by the caller (`0` reserved for "no base").
pub(super) fn emit_type_table(
    out: &mut String,
    machine: &Machine,
    record_supers: &[(u16, u16)],
) -> Result<(), CompileError> {
    writeln!(out, "type_sig_t defined_signatures[{}];", machine.len().max(1))?;
    writeln!(out, "uint16_t defined_sig_count = {};", machine.len())?;
    writeln!(out)?;

    let max_record = record_supers.iter().map(|(id, _)| *id).max();
    let table_len = max_record.map(|id| id as usize + 1).unwrap_or(0).max(1);
    writeln!(out, "uint16_t type_table[{table_len}];")?;
    writeln!(out)?;

    writeln!(out, "static void init_all(void) {{")?;
    for idx in 0..machine.len() as u16 {
        emit_signature_assignment(out, idx, machine.get(idx))?;
    }
    for (record_id, super_id) in record_supers {
        writeln!(out, "    type_table[{record_id}] = {super_id};")?;
    }
    writeln!(out, "}}")?;
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::SigBuilder;

    #[test]
    fn emits_one_assignment_per_interned_signature() {
        let machine = Machine::new();
        let mut out = String::new();
        emit_type_table(&mut out, &machine, &[]).unwrap();
        assert!(out.contains("static void init_all(void) {"));
        assert!(out.contains(&format!("uint16_t defined_sig_count = {};", machine.len())));
        for idx in 0..machine.len() as u16 {
            assert!(out.contains(&format!("defined_signatures[{idx}]")));
        }
    }

    #[test]
    fn record_super_table_covers_every_declared_record_id() {
        let mut machine = Machine::new();
        machine.intern(SigBuilder::new(Signature::Record {
            record_id: 2,
            sub_sigs: vec![],
        }));
        let mut out = String::new();
        // Record 2 extends record 0; the table stores the `+1`-encoded
        // value so a base of record 0 isn't confused with "no base".
        emit_type_table(&mut out, &machine, &[(2, 1)]).unwrap();
        assert!(out.contains("type_table[2] = 1;"));
        assert!(out.contains("uint16_t type_table[3];"));
    }
}
