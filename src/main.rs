//! SuperForth-to-C Compiler CLI
//!
//! Command-line interface for compiling a JSON-serialized SuperForth AST
//! (spec.md §6.1) to C (or a partial pseudo-assembly) translation unit.

use clap::Parser as ClapParser;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use superforth_compiler::config::{CliPaths, Target};
use superforth_compiler::{compile_to_c, CompilerConfig, Program};

#[derive(ClapParser)]
#[command(name = "sfc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "SuperForth compiler - compile a JSON AST to C", long_about = None)]
struct Cli {
    /// Working directory the source/output paths are resolved against
    cwd: PathBuf,

    /// JSON-serialized AST input file (spec.md §6.1)
    #[arg(short, long)]
    source: PathBuf,

    /// Output file for the emitted translation unit
    #[arg(short, long)]
    output: PathBuf,

    /// Backend to emit
    #[arg(long, value_enum, default_value = "c")]
    target: TargetArg,

    /// Emit a PROS-style robot entry point instead of a freestanding main
    #[arg(long)]
    robot: bool,

    /// Write the label-resolved IL as a `.il.json` sidecar next to the output
    #[arg(long)]
    keep_il: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum TargetArg {
    C,
    Asm,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("superforth_compiler=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(message) = validate_output_extension(&cli.output) {
        eprintln!("Error: {message}");
        process::exit(1);
    }

    let paths = CliPaths {
        cwd: cli.cwd.clone(),
        source: cli.cwd.join(&cli.source),
        output: cli.cwd.join(&cli.output),
        keep_il: cli.keep_il,
    };

    let config = CompilerConfig::new()
        .with_target(match cli.target {
            TargetArg::C => Target::C,
            TargetArg::Asm => Target::Asm,
        })
        .with_robot_platform(cli.robot);

    run_build(&paths, &config);
}

/// spec.md §6.3: the output path must not collide with the AST's own
/// `.sf`/`.txt` extensions, so a source file is never mistaken for a
/// finished build artifact (or vice versa).
fn validate_output_extension(output: &Path) -> Result<(), String> {
    match output.extension().and_then(|ext| ext.to_str()) {
        Some("sf") | Some("txt") => Err(format!(
            "output path '{}' must not use the '.sf' or '.txt' extension reserved for AST input",
            output.display()
        )),
        _ => Ok(()),
    }
}

fn run_build(paths: &CliPaths, config: &CompilerConfig) {
    let source = match fs::read_to_string(&paths.source) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error: failed to read source file '{}': {e}", paths.source.display());
            process::exit(1);
        }
    };

    let program: Program = match serde_json::from_str(&source) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("Error: failed to parse AST from '{}': {e}", paths.source.display());
            process::exit(1);
        }
    };

    match compile_to_c(&program, config) {
        Ok(output) => {
            if let Err(e) = fs::write(&paths.output, &output.code) {
                eprintln!("Error: failed to write output '{}': {e}", paths.output.display());
                process::exit(1);
            }
            println!("Compiled {} -> {}", paths.source.display(), paths.output.display());

            if paths.keep_il {
                let il_path = paths.output.with_extension("il.json");
                match serde_json::to_string_pretty(&output.il) {
                    Ok(json) => {
                        if let Err(e) = fs::write(&il_path, json) {
                            eprintln!("Warning: failed to write IL sidecar '{}': {e}", il_path.display());
                        } else {
                            println!("IL saved to {}", il_path.display());
                        }
                    }
                    Err(e) => eprintln!("Warning: failed to serialize IL sidecar: {e}"),
                }
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
