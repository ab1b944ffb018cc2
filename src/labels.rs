//! The Label Pass (spec.md §4.6), grounded in `original_source/labels.c`'s
//! `init_label_buf`.
//!
//! A single forward scan over the lowered [`InstrBuilder`] that turns
//! every branch-target ip into a dense label id, plus a separate pass
//! marking which instructions' debug source location is "interesting"
//! (i.e. worth keeping around for a debug backtrace) because they can
//! trap at runtime. This crate has no separate source-location table
//! (spec.md §6.1's AST contract carries no span info), so an
//! instruction's own ip stands in for `labels.c`'s `src_loc_id` —
//! "interesting" is tracked per-ip rather than per-deduplicated-location.

use std::collections::HashMap;

use crate::instr::{IPRef, InstrBuilder, Instruction};

/// The label table and debug-interesting set produced by one run over
/// an instruction stream.
#[derive(Debug, Default)]
pub struct LabelTable {
    /// `ip -> dense label id`, assigned to every ip that is the target of
    /// a `JUMP`/`JUMP_CHECK`/`LABEL`, or the implicit return-site after a
    /// `CALL`.
    ///
    /// `labels.c`'s `LABEL_IP` macro does not check whether an ip already
    /// has a label before assigning a fresh one, so an ip targeted by more
    /// than one branch is reassigned each time it is revisited and
    /// `total_labels` counts every assignment, not every distinct ip. This
    /// pass matches that: only the last assignment survives in the map,
    /// and `total_labels` is still the count of all assignments performed.
    labels: HashMap<IPRef, u32>,
    /// `total_labels` from `labels.c`: a running counter of every label
    /// assignment performed, including reassignments of the same ip.
    total_labels: u32,
    /// The set of instruction ips whose debug source location must be
    /// kept because the instruction can trap at runtime.
    interesting: std::collections::HashSet<IPRef>,
}

impl LabelTable {
    /// The dense label id assigned to `ip`, if anything ever branched to it.
    pub fn label_of(&self, ip: IPRef) -> Option<u32> {
        self.labels.get(&ip).copied()
    }

    /// Total label assignments performed, counting reassignments of the
    /// same ip (matches `labels.c`'s `total_labels`).
    pub fn total_labels(&self) -> u32 {
        self.total_labels
    }

    /// Whether the instruction at `ip` needs its debug source location
    /// preserved for a backtrace.
    pub fn is_interesting(&self, ip: IPRef) -> bool {
        self.interesting.contains(&ip)
    }

    fn assign_label(&mut self, target: IPRef) {
        self.total_labels += 1;
        self.labels.insert(target, self.total_labels);
    }
}

/// Runs the label pass over `instrs` (spec.md §4.6). Infallible: every
/// opcode the lowerer can emit is already accounted for here, so there is
/// no failure mode analogous to `init_label_buf`'s allocation failures
/// (which this crate's `Vec`/`HashMap` never surface as recoverable).
pub fn run(instrs: &InstrBuilder) -> LabelTable {
    let mut table = LabelTable::default();

    for (ip, ins) in instrs.iter() {
        if ins.can_trap() {
            table.interesting.insert(ip);
        }
        match ins {
            Instruction::Jump { target } => table.assign_label(*target),
            Instruction::JumpCheck { target, .. } => table.assign_label(*target),
            Instruction::Label { body_start, .. } => table.assign_label(*body_start),
            Instruction::Call { .. } => {
                table.assign_label(IPRef(ip.0 + 1));
            }
            _ => {}
        }
    }

    table
}
