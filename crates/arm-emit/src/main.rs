//! CLI entry point for the `arm-emit` binary.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;

use arm_emit::{AssemblerConfig, FrozenCode, MacroAssembler, ProbeConfig, Register};
use log::info;
use thiserror as _;
#[cfg(test)]
use arm_sim as _;
#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
#[cfg(test)]
use tempfile as _;

const USAGE_TEXT: &str = "\
Usage: arm-emit <command> [options]

Commands:
  probe --host <addr> [options]  Emit a debug-probe trampoline

Options:
  -m, --message <text>  Message logged by the probe (default: empty)
  -r, --regs <list>     Three comma-separated argument registers (default: r0,r1,r2)
      --host <addr>     Host logging routine address, decimal or 0x-prefixed hex
      --scratch <reg>   Flags scratch register (default: r4)
  -o, --output <file>   Output file path (default: probe.bin)
  -v, --verbose         Print listing to stderr
  -h, --help            Show this help message

Examples:
  arm-emit probe --host 0xf0000000 -m \"entered block\" -r r4,r5,r6
  RUST_LOG=debug arm-emit probe --host 0xf0000000 -o out.bin -v
";

const DEFAULT_OUTPUT: &str = "probe.bin";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Probe(ProbeArgs),
}

#[derive(Debug, PartialEq, Eq)]
struct ProbeArgs {
    message: String,
    regs: [Register; 3],
    host: u32,
    scratch: Register,
    output: PathBuf,
    verbose: bool,
}

#[derive(Debug)]
enum ParseResult {
    Command(Command),
    Help,
}

fn parse_args(mut args: impl Iterator<Item = OsString>) -> Result<ParseResult, String> {
    let first = args.next().ok_or_else(|| "missing command".to_string())?;

    if first == "--help" || first == "-h" {
        return Ok(ParseResult::Help);
    }

    let command_str = first.to_string_lossy().to_string();

    match command_str.as_str() {
        "probe" => parse_probe_args(args)
            .map(Command::Probe)
            .map(ParseResult::Command),
        other => Err(format!("unknown command: {other}")),
    }
}

fn parse_address(text: &str) -> Result<u32, String> {
    let parsed = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")).map_or_else(
        || text.parse::<u32>(),
        |hex| u32::from_str_radix(hex, 16),
    );
    parsed.map_err(|_| format!("invalid address: {text}"))
}

fn parse_register(text: &str) -> Result<Register, String> {
    text.parse::<Register>()
        .map_err(|e| format!("invalid register '{text}': {e}"))
}

fn parse_register_triple(text: &str) -> Result<[Register; 3], String> {
    let regs = text
        .split(',')
        .map(parse_register)
        .collect::<Result<Vec<_>, _>>()?;
    <[Register; 3]>::try_from(regs)
        .map_err(|regs| format!("expected 3 registers, got {}", regs.len()))
}

#[allow(clippy::while_let_on_iterator)]
fn parse_probe_args(mut args: impl Iterator<Item = OsString>) -> Result<ProbeArgs, String> {
    let mut message = String::new();
    let mut regs = [Register::R0, Register::R1, Register::R2];
    let mut host: Option<u32> = None;
    let mut scratch = Register::R4;
    let mut output = PathBuf::from(DEFAULT_OUTPUT);
    let mut verbose = false;

    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            return Err(USAGE_TEXT.to_string());
        }

        if arg == "--verbose" || arg == "-v" {
            verbose = true;
            continue;
        }

        let flag = arg.to_string_lossy().to_string();
        if !flag.starts_with('-') {
            return Err(format!("unexpected argument: {flag}"));
        }
        let value = args
            .next()
            .map(|v| v.to_string_lossy().to_string())
            .ok_or_else(|| format!("missing value for {flag}"))?;

        match flag.as_str() {
            "-m" | "--message" => message = value,
            "-r" | "--regs" => regs = parse_register_triple(&value)?,
            "--host" => host = Some(parse_address(&value)?),
            "--scratch" => scratch = parse_register(&value)?,
            "-o" | "--output" => output = PathBuf::from(value),
            _ => return Err(format!("unknown option: {flag}")),
        }
    }

    let host = host.ok_or_else(|| "missing --host address".to_string())?;
    Ok(ProbeArgs {
        message,
        regs,
        host,
        scratch,
        output,
        verbose,
    })
}

fn build_probe(args: &ProbeArgs) -> Result<FrozenCode, arm_emit::AsmError> {
    let probe = ProbeConfig {
        host_log_fn: args.host,
        flags_scratch: args.scratch,
    };
    let mut masm = MacroAssembler::new(AssemblerConfig::default(), probe)?;
    masm.debug_probe(args.message.as_bytes(), args.regs)?;
    masm.into_inner().finalize()
}

fn run_probe(args: &ProbeArgs) -> Result<(), i32> {
    let code = match build_probe(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            return Err(1);
        }
    };

    if let Err(e) = fs::write(&args.output, code.bytes()) {
        eprintln!("error: failed to write output: {e}");
        return Err(1);
    }
    info!("wrote {} bytes to {}", code.len(), args.output.display());

    if args.verbose {
        eprint!("{}", code.listing());
    }

    println!(
        "Emitted probe ({} bytes) -> {}",
        code.len(),
        args.output.display()
    );
    Ok(())
}

fn main() {
    env_logger::init();

    let exit_code = match parse_args(env::args_os().skip(1)) {
        Ok(ParseResult::Help) => {
            println!("{USAGE_TEXT}");
            0
        }
        Ok(ParseResult::Command(Command::Probe(args))) => match run_probe(&args) {
            Ok(()) => 0,
            Err(code) => code,
        },
        Err(error) => {
            if error.starts_with("Usage:") {
                println!("{error}");
            } else {
                eprintln!("error: {error}");
                eprintln!("{USAGE_TEXT}");
            }
            1
        }
    };

    std::process::exit(exit_code);
}
