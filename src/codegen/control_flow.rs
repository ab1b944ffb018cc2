//! Label and branch rendering (spec.md §4.6 label pass → §4.7 emission).
//!
//! The label pass already assigned every branch target a dense id; this
//! module only has to decide how an ip's label (if any) and a branch
//! instruction's target become C text: a `label_N:;` statement before
//! the instruction at a labeled ip, and `goto label_N;` at the jump
//! site. `Instruction::Label` additionally takes the *address* of a
//! label via GCC/Clang's computed-goto extension (`&&label_N`), which
//! is how a procedure literal becomes a callable value on this backend.

use crate::instr::IPRef;

use super::state::CEmitter;

impl<'a> CEmitter<'a> {
    /// The C label name for a branch target, if the label pass ever
    /// assigned `ip` one.
    pub(super) fn label_name(&self, ip: IPRef) -> Option<String> {
        self.labels.label_of(ip).map(|id| format!("label_{id}"))
    }

    /// Writes the `label_N:;` line that must precede the instruction at
    /// `ip`, if any branch targets it. The trailing `;` makes an empty
    /// statement so a label immediately followed by a closing brace
    /// still compiles.
    pub(super) fn emit_label_if_any(&mut self, ip: IPRef) -> Result<(), crate::error::CompileError> {
        if let Some(name) = self.label_name(ip) {
            use std::fmt::Write as _;
            writeln!(self.out, "{name}:;")?;
        }
        Ok(())
    }

    /// `goto label_N;` to an already-labeled ip. Panics if the label
    /// pass never assigned `target` one — every opcode that carries a
    /// branch target to this function came from an instruction the
    /// label pass also visited, so this is an internal-consistency bug,
    /// not a recoverable condition.
    pub(super) fn goto(&self, target: IPRef) -> String {
        format!("goto {};", self.label_name(target).expect("branch target has no assigned label"))
    }

    /// `&&label_N`, the computed-goto address of a label (spec.md §4.4
    /// "Procedure literal").
    pub(super) fn label_address(&self, target: IPRef) -> String {
        format!("&&{}", self.label_name(target).expect("branch target has no assigned label"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::instr::{Instruction, InstrBuilder};
    use crate::labels;
    use crate::machine::Machine;
    use crate::register::Register;

    #[test]
    fn jump_target_renders_as_goto_its_assigned_label() {
        let mut instrs = InstrBuilder::new();
        instrs.append(Instruction::Jump { target: IPRef(1) });
        instrs.append(Instruction::GcClean);
        let labels = labels::run(&instrs);
        let machine = Machine::new();
        let config = CompilerConfig::new();
        let emitter = CEmitter::new(&instrs, &labels, &machine, &config);
        assert_eq!(emitter.goto(IPRef(1)), "goto label_1;");
    }

    #[test]
    fn label_instruction_renders_its_body_start_as_a_computed_goto_address() {
        let mut instrs = InstrBuilder::new();
        instrs.append(Instruction::Label { dest: Register::local(0), body_start: IPRef(1) });
        instrs.append(Instruction::Return { value: Register::local(0) });
        let labels = labels::run(&instrs);
        let machine = Machine::new();
        let config = CompilerConfig::new();
        let emitter = CEmitter::new(&instrs, &labels, &machine, &config);
        assert_eq!(emitter.label_address(IPRef(1)), "&&label_1");
    }
}
