//! Interactive debugger and auto-run harness driving a tile core.
//!
//! The debugger is the external collaborator of the core: it ticks the clock, watches trap
//! entries (servicing the exit environment call), rotates software thread contexts on a fixed
//! quantum, and owns breakpoints.

use log::{debug, info};
use slate_core::context::ThreadContext;
use slate_core::core::Tile;
use slate_core::diagnostics::{self, TrapSightings};
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, BufRead, Write};

/// File breakpoints persist to between sessions.
const BREAKPOINT_FILE: &str = ".slate_dbg";

/// Cycles each software thread runs before the scheduler rotates contexts.
const THREAD_QUANTUM: u64 = 64;

/// Cap for `continue` so a runaway program still returns to the prompt.
const CONTINUE_CAP: u64 = 10_000_000;

pub struct Debugger {
    pub tile: Tile,
    pub threads: Vec<ThreadContext>,
    pub current_thread: usize,
    pub cycle: u64,
    pub sightings: TrapSightings,
    pub program_exited: bool,
    pub user_quit: bool,
    breakpoints: BTreeSet<u32>,
    persist_breakpoints: bool,
}

impl Debugger {
    pub fn new(tile: Tile, num_threads: usize) -> Self {
        let num_threads = num_threads.clamp(1, 2);
        let mut debugger = Self {
            tile,
            threads: vec![ThreadContext::default(); num_threads],
            current_thread: 0,
            cycle: 0,
            sightings: TrapSightings::default(),
            program_exited: false,
            user_quit: false,
            breakpoints: BTreeSet::new(),
            persist_breakpoints: false,
        };
        for context in &mut debugger.threads {
            debugger.tile.save_context(context);
        }
        debugger.threads[0].active = true;
        debugger
    }

    /// Advance one cycle: tick the tile, observe any trap it entered, and rotate software
    /// threads when the quantum expires. Rotation waits for the core to be un-stalled, since an
    /// outstanding memory transaction belongs to the stalled instruction.
    pub fn step_cycle(&mut self) {
        self.tile.tick();
        self.cycle += 1;
        if let Some(cause) =
            diagnostics::observe_trap(&mut self.tile, &mut self.sightings, self.current_thread)
        {
            debug!(
                "thread {} took trap cause {}",
                self.current_thread,
                cause.code()
            );
        }
        if self.tile.has_exited() {
            self.program_exited = true;
            return;
        }
        if self.threads.len() > 1 && self.cycle % THREAD_QUANTUM == 0 && !self.tile.stalled() {
            self.rotate_threads();
        }
    }

    fn rotate_threads(&mut self) {
        let current = self.current_thread;
        let next = (current + 1) % self.threads.len();
        self.tile.save_context(&mut self.threads[current]);
        self.threads[current].active = false;
        self.threads[next].active = true;
        self.tile.load_context(&self.threads[next]);
        self.current_thread = next;
        debug!("rotated to thread {next} at cycle {}", self.cycle);
    }

    /// Run `cycles` cycles without stopping at breakpoints (the `steps` flag).
    pub fn auto_run(&mut self, cycles: u64) {
        for _ in 0..cycles {
            if self.program_exited {
                break;
            }
            self.step_cycle();
        }
    }

    /// Run until a breakpoint, program exit, or the safety cap.
    fn continue_run(&mut self) {
        for _ in 0..CONTINUE_CAP {
            self.step_cycle();
            if self.program_exited {
                return;
            }
            if !self.tile.stalled() && self.breakpoints.contains(&self.tile.pc()) {
                println!("breakpoint hit at {:#010x}", self.tile.pc());
                return;
            }
        }
        println!("continue cap reached after {CONTINUE_CAP} cycles");
    }

    /// The interactive debugger loop.
    pub fn run_repl(&mut self, ignore_bpfile: bool) {
        self.persist_breakpoints = !ignore_bpfile;
        if !ignore_bpfile {
            self.load_breakpoint_file();
        }
        println!("slate debugger; 'h' for help");
        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();
        loop {
            print!("slate> ");
            let _ = io::stdout().flush();
            let Some(Ok(line)) = lines.next() else {
                self.user_quit = true;
                return;
            };
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let Some(&command) = tokens.first() else {
                continue;
            };
            match command {
                "s" | "step" => {
                    let n = tokens
                        .get(1)
                        .and_then(|t| parse_u32(t).ok())
                        .unwrap_or(1);
                    for _ in 0..n {
                        if self.program_exited {
                            break;
                        }
                        self.step_cycle();
                    }
                    println!(
                        "cycle {} thread {} pc={:#010x} last_instr={:#010x}",
                        self.cycle,
                        self.current_thread,
                        self.tile.pc(),
                        self.tile.last_instr()
                    );
                }
                "c" | "continue" | "run" => self.continue_run(),
                "r" | "regs" => self.dump_registers(),
                "x" | "mem" => match tokens.get(1).map(|t| parse_u32(t)) {
                    Some(Ok(addr)) => {
                        let count = tokens
                            .get(2)
                            .and_then(|t| parse_u32(t).ok())
                            .unwrap_or(4);
                        self.dump_memory(addr, count);
                    }
                    _ => println!("usage: x <addr> [words]"),
                },
                "b" | "break" => match tokens.get(1).map(|t| parse_u32(t)) {
                    Some(Ok(addr)) => {
                        self.breakpoints.insert(addr);
                        self.save_breakpoint_file();
                        println!("breakpoint set at {addr:#010x}");
                    }
                    _ => println!("usage: b <addr>"),
                },
                "d" | "delete" => match tokens.get(1).map(|t| parse_u32(t)) {
                    Some(Ok(addr)) => {
                        if self.breakpoints.remove(&addr) {
                            self.save_breakpoint_file();
                            println!("breakpoint removed at {addr:#010x}");
                        } else {
                            println!("no breakpoint at {addr:#010x}");
                        }
                    }
                    _ => println!("usage: d <addr>"),
                },
                "bl" | "breaks" => {
                    for addr in &self.breakpoints {
                        println!("  {addr:#010x}");
                    }
                }
                "t" | "threads" => self.dump_threads(),
                "csr" => {
                    println!(
                        "mstatus={:#010x} mtvec={:#010x} mepc={:#010x} mcause={:#x} priv={}",
                        self.tile.mstatus(),
                        self.tile.mtvec(),
                        self.tile.mepc(),
                        self.tile.mcause(),
                        self.tile.privilege_mode()
                    );
                }
                "q" | "quit" => {
                    self.user_quit = true;
                    return;
                }
                _ => {
                    println!("commands:");
                    println!("  s [n]        step n cycles (default 1)");
                    println!("  c            continue until breakpoint or exit");
                    println!("  r            dump registers");
                    println!("  x <addr> [n] dump n memory words");
                    println!("  b/d <addr>   set/delete breakpoint");
                    println!("  bl           list breakpoints");
                    println!("  t            list thread contexts");
                    println!("  csr          dump trap CSRs");
                    println!("  q            quit");
                }
            }
            if self.program_exited {
                return;
            }
        }
    }

    fn dump_registers(&self) {
        for row in 0..8 {
            let mut line = String::new();
            for col in 0..4 {
                let idx = row * 4 + col;
                line.push_str(&format!("x{idx:<2}={:#010x}  ", self.tile.reg(idx)));
            }
            println!("{line}");
        }
        println!("pc ={:#010x}", self.tile.pc());
    }

    fn dump_memory(&mut self, addr: u32, words: u32) {
        let Some(mem) = self.tile.memory_mut() else {
            println!("no memory attached");
            return;
        };
        for i in 0..words {
            let a = addr.wrapping_add(4 * i) & !0x3;
            println!("  {a:#010x}: {:#010x}", mem.read32(a));
        }
    }

    fn dump_threads(&self) {
        for (i, context) in self.threads.iter().enumerate() {
            let marker = if i == self.current_thread { '*' } else { ' ' };
            println!(
                "{marker}T{i} pc={:#010x} active={} a0={:#x}",
                context.pc, context.active, context.regs[10]
            );
        }
    }

    fn load_breakpoint_file(&mut self) {
        let Ok(contents) = fs::read_to_string(BREAKPOINT_FILE) else {
            return;
        };
        for line in contents.lines() {
            if let Ok(addr) = parse_u32(line.trim()) {
                self.breakpoints.insert(addr);
            }
        }
        if !self.breakpoints.is_empty() {
            info!(
                "loaded {} breakpoint(s) from {BREAKPOINT_FILE}",
                self.breakpoints.len()
            );
        }
    }

    fn save_breakpoint_file(&self) {
        if !self.persist_breakpoints {
            return;
        }
        let contents: String = self
            .breakpoints
            .iter()
            .map(|addr| format!("{addr:#010x}\n"))
            .collect();
        if let Err(err) = fs::write(BREAKPOINT_FILE, contents) {
            info!("could not write {BREAKPOINT_FILE}: {err}");
        }
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal u32.
pub fn parse_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| e.to_string())
    } else {
        s.parse().map_err(|e: std::num::ParseIntError| e.to_string())
    }
}
