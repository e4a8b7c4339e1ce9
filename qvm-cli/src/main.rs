//! QVM CLI: inspect, assemble, verify and run bytecode modules.
//!
//! Exit codes:
//! - 0: Success
//! - 1: Input/load/assembly error
//! - 2: Verification failure
//! - 3: Runtime fault

mod commands;
mod host;

use std::io::IsTerminal;
use std::process;

use tracing_subscriber::EnvFilter;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    init_tracing(args.iter().any(|a| a == "--trace"));

    let result = match args[1].as_str() {
        "info" => commands::info(&args[2..]),
        "assemble" => commands::assemble(&args[2..]),
        "disassemble" => commands::disassemble(&args[2..]),
        "verify" => commands::verify(&args[2..]),
        "run" => commands::run(&args[2..]),
        "--help" | "-h" | "help" => {
            print_usage();
            process::exit(0);
        }
        other => {
            eprintln!("error: unknown command '{other}'");
            eprintln!();
            print_usage();
            process::exit(1);
        }
    };

    if let Err(code) = result {
        process::exit(code);
    }
}

/// Log to stderr, filtered by `RUST_LOG` (default `warn`).
fn init_tracing(trace: bool) {
    let filter = if trace {
        EnvFilter::new("trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();
}

fn print_usage() {
    eprintln!("Usage: qvm <command> [args]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  info <module.qvm>                        Print header fields and checksum");
    eprintln!("  assemble <input.qasm> [-o output.qvm]    Assemble text to binary");
    eprintln!("  disassemble <module.qvm>                 Disassemble binary to text");
    eprintln!("  verify <module.qvm>                      Verify a binary module");
    eprintln!("  run <module.qvm> [options] [args...]     Verify and execute a module");
    eprintln!();
    eprintln!("Run options:");
    eprintln!("  --entry N     Instruction index to call (default 0)");
    eprintln!("  --cycles N    Watchdog budget in instructions");
    eprintln!("  --stack N     Program stack reservation in bytes");
    eprintln!("  --trace       Log every executed instruction to stderr");
}
