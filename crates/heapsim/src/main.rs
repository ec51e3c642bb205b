//! Runs a script of allocator operations against a simulated heap.
//!
//! ```text
//! heapsim --capacity 8192 --unit 1024 alloc:3000 alloc:2000 free:0 alloc:3000 state
//! ```

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use std::{io, process};

use ansi_term::{Color, WithFg};
use argh::FromArgs;
use block_heap::{
    AllocationId, DEFAULT_CAPACITY_BYTES, DEFAULT_UNIT_BYTES, Handle, Heap, HeapConfig, LeakReport,
    Strategy,
};
use snafu::ResultExt as _;
use snafu_utils::{GenericError, Report};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _};

use self::{
    command::Command,
    render::{BlockView, StateTable, StatsView},
};

mod command;
mod render;

/// Run a script of allocator operations against a simulated heap.
///
/// Commands: alloc:<bytes> free:<index> find:<index> strategy:<name> defrag
/// compact state stats largest leaks. Indices count successful allocations
/// from 0.
#[derive(Debug, FromArgs)]
struct Args {
    /// arena capacity in bytes
    #[argh(option, default = "DEFAULT_CAPACITY_BYTES")]
    capacity: usize,
    /// size of one unit in bytes
    #[argh(option, default = "DEFAULT_UNIT_BYTES")]
    unit: usize,
    /// placement strategy: first-fit, best-fit or buddy-fit
    #[argh(option, default = "Strategy::default()")]
    strategy: Strategy,
    /// disable colored output
    #[argh(switch)]
    no_color: bool,
    /// log filter directives, e.g. `block_heap=debug`
    #[argh(option, default = "String::from(\"warn\")")]
    log: String,
    /// script commands, executed in order
    #[argh(positional)]
    commands: Vec<Command>,
}

fn main() {
    let args: Args = argh::from_env();
    ansi_term::set_enabled(!args.no_color);

    if let Err(err) = run(&args) {
        let report = Report::new(err);
        eprintln!("{report}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), GenericError> {
    init_tracing(&args.log, !args.no_color)?;

    let config = HeapConfig::new(args.capacity, args.unit).with_strategy(args.strategy);
    let heap = Heap::new(config).whatever_context("invalid heap configuration")?;
    println!(
        "heap of {} bytes in {} units of {} bytes, {}",
        heap.capacity(),
        heap.unit_count(),
        heap.unit_bytes(),
        heap.strategy()
    );

    let mut session = Session::new(heap);
    for command in &args.commands {
        session.execute(*command);
    }

    println!();
    print!("{}", session.finish());
    Ok(())
}

fn init_tracing(filter: &str, ansi: bool) -> Result<(), GenericError> {
    let filter = EnvFilter::try_new(filter).whatever_context("invalid log filter")?;
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(ansi)
                .with_target(false),
        )
        .try_init()
        .whatever_context("failed to initialize tracing subscriber")
}

/// An allocation made by the script.
#[derive(Debug, Clone, Copy)]
struct Entry {
    id: AllocationId,
    handle: Handle,
}

/// A heap together with the handles the script has been given.
#[derive(Debug)]
struct Session {
    heap: Heap,
    entries: Vec<Entry>,
    compactions: u64,
}

impl Session {
    fn new(heap: Heap) -> Self {
        Self {
            heap,
            entries: Vec::new(),
            compactions: 0,
        }
    }

    fn execute(&mut self, command: Command) {
        debug!(?command, "executing");
        match command {
            Command::Alloc(size) => self.alloc(size),
            Command::Free(index) => self.free(index),
            Command::Find(index) => self.find(index),
            Command::Strategy(strategy) => {
                self.heap.set_strategy(strategy);
                println!("strategy set to {strategy}");
            }
            Command::Defrag => {
                let merges = self.heap.defragment();
                println!("defragmented: {merges} merges");
            }
            Command::Compact => {
                let report = self.heap.compact();
                for relocation in &report.relocations {
                    println!(
                        "moved {} from {} to {}",
                        relocation.id, relocation.from, relocation.to
                    );
                }
                println!(
                    "compacted: {} blocks moved, {} bytes free",
                    report.relocations.len(),
                    report.free_bytes
                );
            }
            Command::State => print!("{}", StateTable(&self.heap)),
            Command::Stats => print!("{}", StatsView(&self.heap)),
            Command::Largest => {
                println!("largest free block: {} bytes", self.heap.largest_free_block());
            }
            Command::Leaks => print!("{}", self.heap.leak_report()),
        }
        self.refresh_handles();
    }

    fn alloc(&mut self, size: usize) {
        match self.heap.allocate(size) {
            Ok(Some(handle)) => {
                let block = self.heap.find(handle);
                let Some(meta) = block.and_then(|block| block.allocation) else {
                    failure(&format!("allocation at {handle} vanished"));
                    return;
                };
                println!(
                    "allocated {size} bytes as index {} ({}, {handle})",
                    self.entries.len(),
                    meta.id
                );
                self.entries.push(Entry {
                    id: meta.id,
                    handle,
                });
            }
            Ok(None) => println!("zero-size request ignored"),
            Err(err) => failure(&err),
        }
    }

    fn free(&mut self, index: usize) {
        let Some(entry) = self.entries.get(index) else {
            failure(&format!("no allocation with index {index}"));
            return;
        };
        match self.heap.free(entry.handle) {
            Ok(()) => println!("freed index {index} ({})", entry.id),
            Err(err) => failure(&err),
        }
    }

    fn find(&self, index: usize) {
        let Some(entry) = self.entries.get(index) else {
            failure(&format!("no allocation with index {index}"));
            return;
        };
        match self.heap.find(entry.handle) {
            Some(block) => println!("{}", BlockView(block)),
            None => failure(&format!("index {index} does not refer to a block")),
        }
    }

    fn finish(self) -> LeakReport {
        self.heap.finish()
    }

    /// Replaces handles invalidated by a compaction, explicit or not.
    fn refresh_handles(&mut self) {
        let compactions = self.heap.stats().compactions;
        if compactions == self.compactions {
            return;
        }
        self.compactions = compactions;
        for entry in &mut self.entries {
            if let Some(handle) = self.heap.handle_of(entry.id) {
                entry.handle = handle;
            }
        }
        debug!(compactions, "handles refreshed");
    }
}

fn failure(message: &dyn std::fmt::Display) {
    println!("{} {message}", WithFg::new(Color::Red, "error:"));
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    const UNIT: usize = 64;

    fn session(units: usize) -> Session {
        ansi_term::set_enabled(false);
        Session::new(Heap::init(units * UNIT, UNIT).unwrap())
    }

    fn run_script(session: &mut Session, script: &[Command]) {
        for &command in script {
            session.execute(command);
        }
    }

    #[test]
    fn malformed_log_filter_is_an_error() {
        assert!(init_tracing("block_heap=loud", false).is_err());
    }

    #[test]
    fn implicit_compaction_refreshes_script_handles() {
        let mut session = session(6);
        run_script(
            &mut session,
            &[
                Command::Alloc(2 * UNIT),
                Command::Alloc(2 * UNIT),
                Command::Free(0),
                Command::Alloc(3 * UNIT),
            ],
        );
        assert_eq!(session.heap.stats().compactions, 1);
        assert_eq!(session.entries.len(), 3);
        assert_eq!(session.entries[1].handle.unit_index(), 0);
        assert_eq!(session.entries[2].handle.unit_index(), 2);

        session.execute(Command::Free(1));
        assert_eq!(session.heap.stats().live_allocations, 1);
        assert_eq!(session.heap.handle_of(session.entries[1].id), None);

        let report = session.finish();
        assert_eq!(report.len(), 1);
        assert_eq!(report.entries()[0].offset, 2 * UNIT);
    }

    #[test]
    fn explicit_compaction_refreshes_script_handles() {
        let mut session = session(8);
        run_script(
            &mut session,
            &[
                Command::Alloc(UNIT),
                Command::Alloc(UNIT),
                Command::Free(0),
                Command::Compact,
            ],
        );
        let moved = session.entries[1];
        assert_eq!(moved.handle.unit_index(), 0);
        assert_eq!(session.heap.find(moved.handle).unwrap().allocation.unwrap().id, moved.id);
    }

    #[test]
    fn indices_count_successful_allocations_only() {
        let mut session = session(4);
        run_script(
            &mut session,
            &[
                Command::Alloc(0),
                Command::Alloc(5 * UNIT),
                Command::Alloc(UNIT),
            ],
        );
        assert_eq!(session.entries.len(), 1);
        assert_eq!(session.heap.stats().failed_allocations, 1);
    }

    #[test]
    fn repeated_and_unknown_frees_change_nothing() {
        let mut session = session(4);
        run_script(
            &mut session,
            &[
                Command::Alloc(UNIT),
                Command::Free(0),
                Command::Free(0),
                Command::Free(7),
                Command::Find(7),
            ],
        );
        let stats = session.heap.stats();
        assert_eq!(stats.allocation_count, 1);
        assert_eq!(stats.live_allocations, 0);
        assert!(session.finish().is_empty());
    }
}
