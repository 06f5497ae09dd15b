//! Flat-binary test harness: run a program to its exit environment call and check the expected
//! architectural outcome (exit code, memory words), or run the postmortem invariants for
//! programs that are not expected to exit.

use clap::Parser;
use slate_core::core::{MemModel, Tile};
use slate_core::diagnostics::{self, TrapSightings};
use slate_core::dram::Dram;
use slate_core::loader;
use slate_core::port::DirectPort;
use slate_core::timed::TimedPort;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Flat binary to run.
    bin: String,
    /// Physical load address for the flat binary.
    #[arg(long, default_value = "0", value_parser = parse_u32)]
    load_addr: u32,
    /// Initial pc; a nonzero value is applied after load.
    #[arg(long, default_value = "0", value_parser = parse_u32)]
    start_pc: u32,
    /// Fixed latency, in cycles, of the timed memory port.
    #[arg(long, default_value_t = 2)]
    latency: u32,
    /// Use the ideal (synchronous) memory model instead of the timed port.
    #[arg(long)]
    ideal: bool,
    /// Cycle cap for the run.
    #[arg(long, default_value_t = 10_000_000)]
    max_cycles: u64,
    /// Expected exit code; the run fails if the program exits with anything else.
    #[arg(long, value_parser = parse_u32)]
    expect_exit: Option<u32>,
    /// Expected memory word, as `addr=value` (both accept 0x prefixes). Repeatable.
    #[arg(long = "check-mem", value_parser = parse_mem_check)]
    check_mem: Vec<(u32, u32)>,
    /// The program is not expected to exit: run the postmortem invariants instead.
    #[arg(long)]
    postmortem: bool,
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| e.to_string())
    } else {
        s.parse().map_err(|e: std::num::ParseIntError| e.to_string())
    }
}

fn parse_mem_check(s: &str) -> Result<(u32, u32), String> {
    let (addr, value) = s
        .split_once('=')
        .ok_or_else(|| "expected addr=value".to_string())?;
    Ok((parse_u32(addr)?, parse_u32(value)?))
}

fn main() -> ExitCode {
    let args = Args::parse();

    let dram = Dram::with_capacity(16 * 1024 * 1024, 0);
    let mut tile = Tile::new();
    if args.ideal {
        tile.attach_memory(Box::new(DirectPort::new(dram)));
        tile.set_mem_model(MemModel::Ideal);
    } else {
        let port = TimedPort::new(DirectPort::new(dram), args.latency);
        tile.attach_memory(Box::new(port));
    }

    {
        let mem = tile.memory_mut().expect("memory just attached");
        if let Err(err) = loader::load_flat_bin(&args.bin, mem, args.load_addr) {
            eprintln!("FAIL: {err}");
            return ExitCode::FAILURE;
        }
    }
    if args.start_pc != 0 {
        tile.set_pc(args.start_pc);
    }

    let mut sightings = TrapSightings::default();
    let mut cycle = 0;
    while cycle < args.max_cycles && !tile.has_exited() {
        tile.tick();
        cycle += 1;
        diagnostics::observe_trap(&mut tile, &mut sightings, 0);
    }

    let mut failures = 0;
    if args.postmortem {
        if tile.has_exited() {
            eprintln!(
                "FAIL: program exited with code {} but --postmortem expected no exit",
                tile.exit_code()
            );
            failures += 1;
        } else {
            match diagnostics::verify_postmortem(&mut tile, &sightings, cycle) {
                Ok(report) => println!("{report}"),
                Err(err) => {
                    eprintln!("FAIL: {err}");
                    failures += 1;
                }
            }
        }
    } else if !tile.has_exited() {
        eprintln!(
            "FAIL: program did not exit within {} cycles (pc={:#010x})",
            args.max_cycles,
            tile.pc()
        );
        failures += 1;
    } else if let Some(expected) = args.expect_exit {
        if tile.exit_code() != expected {
            eprintln!(
                "FAIL: exit code {} (expected {expected})",
                tile.exit_code()
            );
            failures += 1;
        }
    }

    for (addr, expected) in &args.check_mem {
        let found = tile
            .memory_mut()
            .map(|mem| mem.read32(*addr))
            .unwrap_or(0);
        if found != *expected {
            eprintln!("FAIL: mem[{addr:#010x}] = {found:#010x} (expected {expected:#010x})");
            failures += 1;
        }
    }

    if failures == 0 {
        if tile.has_exited() {
            println!(
                "PASS: exit code {} after {cycle} cycles ({} instructions)",
                tile.exit_code(),
                tile.counters().inst()
            );
        } else {
            println!("PASS: postmortem checks after {cycle} cycles");
        }
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
