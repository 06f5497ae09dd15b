mod debugger;

use clap::Parser;
use debugger::{parse_u32, Debugger};
use log::info;
use slate_core::accel::ArraySumAccel;
use slate_core::core::{MemModel, Tile};
use slate_core::diagnostics;
use slate_core::dram::Dram;
use slate_core::loader;
use slate_core::port::DirectPort;
use slate_core::timed::TimedPort;
use std::process::ExitCode;

/// DRAM capacity of the SoC bring-up configuration.
const DRAM_SIZE: usize = 256 * 1024 * 1024;

/// Built-in demo when no program is given: sum four words through the custom-0 array-sum
/// accelerator and exit with the result (10).
const DEMO_ARRAY_BASE: u32 = 0x100;
const DEMO_ARRAY: [u32; 4] = [1, 2, 3, 4];
const DEMO_PROGRAM: [u32; 6] = [
    0x1000_0093, // addi x1, x0, 256     ; x1 = array base
    0x0040_0113, // addi x2, x0, 4       ; x2 = length in words
    0x0020_818B, // custom0 x3, x1, x2   ; x3 = sum(arr[0..4])
    0x0001_8533, // add  x10, x3, x0     ; a0 = sum
    0x05D0_0893, // addi x17, x0, 93     ; a7 = exit syscall
    0x0000_0073, // ecall
];

#[derive(Parser, Debug)]
#[command(version, about = "Tile-based SoC simulator", long_about = None)]
struct Args {
    /// Path to a flat binary file (.bin) to load.
    #[arg(long)]
    prog: Option<String>,
    /// Physical load address for the flat binary.
    #[arg(long, default_value = "0", value_parser = parse_u32)]
    load_addr: u32,
    /// Initial pc; a nonzero value is applied after load.
    #[arg(long, default_value = "0", value_parser = parse_u32)]
    start_pc: u32,
    /// Cycles to auto-run; <= 0 enters the interactive debugger.
    #[arg(long, default_value_t = 0)]
    steps: i64,
    /// Software thread contexts to schedule (1 or 2).
    #[arg(long, default_value_t = 1)]
    sw_threads: u32,
    /// Fixed latency, in cycles, of the timed memory port.
    #[arg(long, default_value_t = 2)]
    latency: u32,
    /// Use the ideal (synchronous) memory model instead of the timed port.
    #[arg(long)]
    ideal: bool,
    /// List component instance names (contexts) and exit.
    #[arg(long)]
    showcontexts: bool,
    /// Do not load the .slate_dbg breakpoint file on startup.
    #[arg(long)]
    ignore_bpfile: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    if args.showcontexts {
        for name in ["tile0", "dram0", "memport0", "accel0"] {
            println!("{name}");
        }
        return ExitCode::SUCCESS;
    }

    let dram = Dram::with_capacity(DRAM_SIZE, 0);
    let mut tile = Tile::new();
    if args.ideal {
        tile.attach_memory(Box::new(DirectPort::new(dram)));
        tile.set_mem_model(MemModel::Ideal);
    } else {
        let port = TimedPort::new(DirectPort::new(dram), args.latency);
        tile.attach_memory(Box::new(port));
    }
    tile.attach_accelerator(Box::new(ArraySumAccel::new()));

    {
        let mem = tile.memory_mut().expect("memory just attached");
        if let Some(path) = &args.prog {
            match loader::load_flat_bin(path, mem, args.load_addr) {
                Ok(bytes) => info!("loaded {bytes} bytes at {:#010x}", args.load_addr),
                Err(err) => {
                    eprintln!("error: {err}");
                    return ExitCode::FAILURE;
                }
            }
        } else {
            let mut addr = DEMO_ARRAY_BASE;
            for value in DEMO_ARRAY {
                mem.write32(addr, value);
                addr += 4;
            }
            loader::load_words(mem, args.load_addr, &DEMO_PROGRAM);
            info!("no program given; loaded the accelerator demo");
        }
    }
    if args.start_pc != 0 {
        tile.set_pc(args.start_pc);
    }

    let mut debugger = Debugger::new(tile, args.sw_threads as usize);
    if args.steps > 0 {
        debugger.auto_run(args.steps as u64);
    } else {
        debugger.run_repl(args.ignore_bpfile);
    }

    if debugger.program_exited {
        for context in &debugger.threads {
            assert_eq!(0, context.regs[0], "x0 must remain zero");
        }
        println!(
            "[EXIT] Program exited with code {}",
            debugger.tile.exit_code()
        );
        let counters = debugger.tile.counters();
        println!(
            "[STATS] inst={} alu={} add={} mul={} loads={} stores={} branches={} taken={}",
            counters.inst(),
            counters.arith(),
            counters.add(),
            counters.mul(),
            counters.load(),
            counters.store(),
            counters.branch(),
            counters.branch_taken(),
        );
        return ExitCode::SUCCESS;
    }
    if debugger.user_quit {
        return ExitCode::SUCCESS;
    }

    // The run ended without a clean exit: check the postmortem invariants.
    let cycle = debugger.cycle;
    match diagnostics::verify_postmortem(&mut debugger.tile, &debugger.sightings, cycle) {
        Ok(report) => {
            println!("{report}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("postmortem check failed: {err}");
            ExitCode::FAILURE
        }
    }
}
