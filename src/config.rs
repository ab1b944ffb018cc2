//! Compiler configuration (spec.md §8 boundaries / SPEC_FULL.md §4.9).
//!
//! spec.md treats several pipeline limits as fixed constants (the
//! break-jump buffer, the call-frame depth cap, the interned-signature
//! budget). Pinning them in source makes the boundary itself untestable
//! without editing the crate, so this module lifts them into a builder
//! in the style of the teacher's `CompilerConfig`/`ExternalBuiltin`
//! (`config.rs`): fluent `with_*` methods returning `Self`, defaults
//! matching the original constants exactly.

use std::path::PathBuf;

/// Which backend [`crate::compiler::compile_to_c`] emits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    #[default]
    C,
    Asm,
}

/// Tunable limits and switches for one compile. Defaults match the
/// constants spec.md's §8 boundary table names.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Size, in 8-byte slots, of the emitted program's global+constant
    /// stack array.
    pub stack_size: u32,
    /// Maximum call-frame nesting depth before the emitted program's
    /// stack-overflow check traps (spec.md §8 "Maximum nesting depth of
    /// the call frame"). Default 1000.
    pub frame_limit: u32,
    /// Capacity of the per-loop break-jump buffer (spec.md §8 "Maximum
    /// break-jump buffer capacity"). Default 64.
    pub max_break_jumps: usize,
    /// Divisor applied to `frame_limit` to get the interned-signature
    /// table's soft budget (spec.md §8 "`FRAME_LIMIT/4`"). Default 4.
    pub sig_frame_divisor: u32,
    pub target: Target,
    /// Emit a PROS-style `main` suitable for the spec's robot-platform
    /// target (spec.md §6.3) instead of a freestanding `int main(void)`.
    pub robot_platform: bool,
    /// Emit a debug backtrace hook in generated `main` (spec.md §6.2).
    pub emit_debug_backtrace: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            stack_size: 1 << 16,
            frame_limit: 1000,
            max_break_jumps: 64,
            sig_frame_divisor: 4,
            target: Target::default(),
            robot_platform: false,
            emit_debug_backtrace: false,
        }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stack_size(mut self, stack_size: u32) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub fn with_frame_limit(mut self, frame_limit: u32) -> Self {
        self.frame_limit = frame_limit;
        self
    }

    pub fn with_max_break_jumps(mut self, max_break_jumps: usize) -> Self {
        self.max_break_jumps = max_break_jumps;
        self
    }

    pub fn with_sig_frame_divisor(mut self, sig_frame_divisor: u32) -> Self {
        self.sig_frame_divisor = sig_frame_divisor;
        self
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    pub fn with_robot_platform(mut self, robot_platform: bool) -> Self {
        self.robot_platform = robot_platform;
        self
    }

    pub fn with_debug_backtrace(mut self, emit_debug_backtrace: bool) -> Self {
        self.emit_debug_backtrace = emit_debug_backtrace;
        self
    }

    /// The soft budget on interned type signatures before the compiler
    /// logs a boundary warning (spec.md §8; SPEC_FULL.md §4.10).
    pub fn signature_budget(&self) -> u32 {
        self.frame_limit / self.sig_frame_divisor
    }
}

/// Where the CLI reads source from and writes output to (SPEC_FULL.md
/// §4.11). Kept separate from `CompilerConfig` since these are paths,
/// not compile-time tunables a library caller would want to set.
#[derive(Debug, Clone)]
pub struct CliPaths {
    pub cwd: PathBuf,
    pub source: PathBuf,
    pub output: PathBuf,
    pub keep_il: bool,
}
