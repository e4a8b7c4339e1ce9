//! CLI command implementations.

use std::fs;
use std::io;

use qvm_common::{Header, Module};
use qvm_vm::{Exit, TracingObserver, Vm, VmConfig};

use crate::host::ConsoleHost;

/// Print the header of a binary module and its checksum.
pub fn info(args: &[String]) -> Result<(), i32> {
    if args.is_empty() {
        eprintln!("error: info requires an input file");
        eprintln!("Usage: qvm info <module.qvm>");
        return Err(1);
    }

    let input = &args[0];
    let bytes = read_file(input)?;
    let module = load(&bytes)?;
    let header = Header::parse(&bytes).map_err(|e| {
        eprintln!("error: invalid module: {e}");
        1
    })?;

    println!("magic:        {:#010x}", header.magic);
    println!("instructions: {}", header.instruction_count);
    println!(
        "code:         offset {}, {} bytes",
        header.code_offset, header.code_length
    );
    println!(
        "data:         offset {}, {} bytes",
        header.data_offset, header.data_length
    );
    println!("literals:     {} bytes", header.literal_length);
    println!("bss:          {} bytes", header.bss_length);
    println!("version:      {}", header.format_version);
    println!("checksum:     {}", module.checksum().to_hex());
    Ok(())
}

/// Assemble a text file to a binary module.
pub fn assemble(args: &[String]) -> Result<(), i32> {
    if args.is_empty() {
        eprintln!("error: assemble requires an input file");
        eprintln!("Usage: qvm assemble <input.qasm> [-o output.qvm]");
        return Err(1);
    }

    let input = &args[0];

    let output = if args.len() >= 3 && args[1] == "-o" {
        args[2].clone()
    } else if let Some(stem) = input.strip_suffix(".qasm") {
        format!("{stem}.qvm")
    } else {
        format!("{input}.qvm")
    };

    let text = fs::read_to_string(input).map_err(|e| {
        eprintln!("error: cannot read '{input}': {e}");
        1
    })?;

    let module = qvm_assembler::assemble(&text).map_err(|e| {
        eprintln!("error: {e}");
        1
    })?;

    let bytes = module.encode();
    fs::write(&output, &bytes).map_err(|e| {
        eprintln!("error: cannot write '{output}': {e}");
        1
    })?;

    eprintln!(
        "assembled {} instructions ({} bytes) -> {output}",
        module.len(),
        bytes.len()
    );
    Ok(())
}

/// Disassemble a binary module to text.
pub fn disassemble(args: &[String]) -> Result<(), i32> {
    if args.is_empty() {
        eprintln!("error: disassemble requires an input file");
        eprintln!("Usage: qvm disassemble <module.qvm>");
        return Err(1);
    }

    let module = read_module(&args[0])?;
    print!("{}", qvm_assembler::disassemble(&module));
    Ok(())
}

/// Verify a binary module.
pub fn verify(args: &[String]) -> Result<(), i32> {
    if args.is_empty() {
        eprintln!("error: verify requires an input file");
        eprintln!("Usage: qvm verify <module.qvm>");
        return Err(1);
    }

    let input = &args[0];
    let module = read_module(input)?;
    check(&module)?;
    println!("OK: {input} ({} instructions)", module.len());
    Ok(())
}

/// Options accepted by `run`.
#[derive(Debug, PartialEq)]
struct RunOptions {
    input: String,
    entry: usize,
    config: VmConfig,
    trace: bool,
    args: Vec<i32>,
}

/// Verify and execute a binary module with the console host.
pub fn run(args: &[String]) -> Result<(), i32> {
    let opts = parse_run_args(args)?;
    let module = read_module(&opts.input)?;
    check(&module)?;

    let host = ConsoleHost::new(io::stdout());
    let mut vm = Vm::with_host(&module, opts.config, host).map_err(|e| {
        eprintln!("runtime error: {e}");
        3
    })?;
    if opts.trace {
        vm.set_observer(Box::new(TracingObserver));
    }

    match vm.call(opts.entry, &opts.args) {
        Ok(Exit::Return(value)) | Ok(Exit::HostExit(value)) => {
            println!("{value}");
            Ok(())
        }
        Ok(Exit::CycleLimit) => {
            eprintln!(
                "runtime error: cycle limit of {} instructions reached",
                vm.cycle_limit()
            );
            Err(3)
        }
        Ok(Exit::Breakpoint(at)) => {
            eprintln!("runtime error: stopped at breakpoint {at}");
            Err(3)
        }
        Err(e) => {
            eprintln!("runtime error: {e}");
            Err(3)
        }
    }
}

// --- Helpers ---

fn parse_run_args(args: &[String]) -> Result<RunOptions, i32> {
    let usage = || {
        eprintln!(
            "Usage: qvm run <module.qvm> [--entry N] [--cycles N] [--stack N] [--trace] [args...]"
        );
        1
    };

    let mut input = None;
    let mut entry = 0;
    let mut config = VmConfig::default();
    let mut trace = false;
    let mut call_args = Vec::new();

    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "--entry" | "--cycles" | "--stack" => {
                let value = match args.get(i + 1) {
                    Some(v) => v,
                    None => {
                        eprintln!("error: {arg} requires a value");
                        return Err(usage());
                    }
                };
                let n = parse_int(value).filter(|n| *n >= 0).ok_or_else(|| {
                    eprintln!("error: invalid value '{value}' for {arg}");
                    1
                })?;
                match arg {
                    "--entry" => entry = n as usize,
                    "--cycles" => config = config.with_cycle_limit(n as u64),
                    _ => {
                        let bytes = u32::try_from(n).map_err(|_| {
                            eprintln!("error: invalid value '{value}' for {arg}");
                            1
                        })?;
                        config = config.with_stack_reserve(bytes);
                    }
                }
                i += 2;
                continue;
            }
            "--trace" => trace = true,
            _ if input.is_none() => input = Some(arg.to_string()),
            _ => {
                let n = parse_int(arg)
                    .and_then(|n| i32::try_from(n).ok().or(u32::try_from(n).ok().map(|u| u as i32)))
                    .ok_or_else(|| {
                        eprintln!("error: invalid argument '{arg}'");
                        1
                    })?;
                call_args.push(n);
            }
        }
        i += 1;
    }

    let input = match input {
        Some(input) => input,
        None => {
            eprintln!("error: run requires an input file");
            return Err(usage());
        }
    };

    Ok(RunOptions {
        input,
        entry,
        config,
        trace,
        args: call_args,
    })
}

/// Parse a decimal or `0x` hex integer, optionally negative.
fn parse_int(s: &str) -> Option<i64> {
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let n = match digits.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i64>().ok()?,
    };
    Some(if negative { -n } else { n })
}

fn read_file(path: &str) -> Result<Vec<u8>, i32> {
    fs::read(path).map_err(|e| {
        eprintln!("error: cannot read '{path}': {e}");
        1
    })
}

fn load(bytes: &[u8]) -> Result<Module, i32> {
    qvm_common::load(bytes).map_err(|e| {
        eprintln!("error: invalid module: {e}");
        1
    })
}

/// Read and load a binary module.
fn read_module(path: &str) -> Result<Module, i32> {
    load(&read_file(path)?)
}

fn check(module: &Module) -> Result<(), i32> {
    qvm_verifier::verify(module).map_err(|errors| {
        for e in &errors {
            eprintln!("error: {e}");
        }
        2
    })
}
