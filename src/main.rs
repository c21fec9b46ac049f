//=============================================
// fiberhost/src/main.rs
//=============================================
// Author: Fiberhost Contributors
// License: MIT
// Goal: Standalone host
// Objective: Drive an embedded runtime from a fixed-rate loop and soak-test
//            the scheduler against the reference collector
//=============================================

use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use fiberhost::collector::mark_sweep::{HeapStats, MarkSweepHeap, clear_dead_stack};
use fiberhost::runtime::{self, DylibLoader};
use fiberhost::ticks::IntervalTicks;
use fiberhost::{Bootstrap, ContextId, FiberConfig, Phase, Scheduler, current_sp, ffi, logging};

#[derive(Parser)]
#[command(author, version, about = "Host an embedded runtime on a private stack", long_about = None)]
struct Cli {
    /// Configuration file (defaults to FIBERHOST_CONFIG or fiberhost.toml beside the binary)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load the embedded runtime library and drive it from a fixed-rate loop
    Run {
        /// Backing library (overrides runtime.library)
        #[arg(long)]
        library: Option<PathBuf>,
        /// Entry symbol (overrides runtime.entry_symbol)
        #[arg(long)]
        entry: Option<String>,
        /// Ticks per second (overrides host.tick_fps)
        #[arg(long)]
        fps: Option<u32>,
        /// Arguments passed to the entry after the image path
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Drive the scheduler under allocation pressure and print JSON statistics
    Soak {
        /// Number of drive ticks
        #[arg(long, default_value_t = 1000)]
        ticks: u64,
        /// Host allocations between ticks
        #[arg(long, default_value_t = 100)]
        allocs_per_tick: usize,
        /// Allocations per automatic collection
        #[arg(long, default_value_t = MarkSweepHeap::DEFAULT_THRESHOLD)]
        threshold: usize,
    },
    /// Print the resolved configuration as TOML
    Config,
    /// Print the C header of the exported symbols
    Header,
}

#[derive(Debug, Serialize)]
struct SoakReport {
    ticks: u64,
    resumptions: u64,
    switches: u64,
    sentinel_survived: bool,
    heap: HeapStats,
}

fn main() {
    // Host frames holding heap pointers all sit below this one.
    let stack_base = current_sp();
    if let Err(error) = run(Cli::parse(), stack_base) {
        eprintln!("fiberhost error: {error:?}");
        std::process::exit(1);
    }
}

fn run(cli: Cli, stack_base: usize) -> Result<()> {
    let config = load_config(cli.config)?;
    match cli.command {
        Command::Run {
            library,
            entry,
            fps,
            args,
        } => {
            let mut config = config;
            if let Some(library) = library {
                config.runtime.library = library;
            }
            if let Some(entry) = entry {
                config.runtime.entry_symbol = entry;
            }
            if let Some(fps) = fps {
                config.host.tick_fps = fps;
            }
            if !args.is_empty() {
                config.runtime.args = args;
            }
            config.validate()?;
            logging::init("fiberhost-cli", &config.host.log_filter);
            host(config, stack_base)
        }
        Command::Soak {
            ticks,
            allocs_per_tick,
            threshold,
        } => {
            logging::init("fiberhost-soak", &config.host.log_filter);
            let report = soak(&config, stack_base, ticks, allocs_per_tick, threshold)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.sentinel_survived {
                bail!("object held by the suspended context was reclaimed");
            }
            Ok(())
        }
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Header => {
            print!("{}", ffi::c_header());
            Ok(())
        }
    }
}

fn load_config(explicit: Option<PathBuf>) -> Result<FiberConfig> {
    match explicit {
        Some(path) => FiberConfig::load_from_file(&path),
        None => {
            let module_dir = runtime::module_dir();
            let (config, _) = FiberConfig::discover(module_dir.as_deref())?;
            Ok(config)
        }
    }
}

fn host(config: FiberConfig, stack_base: usize) -> Result<()> {
    let module_dir = runtime::module_dir()
        .or_else(|| std::env::current_dir().ok())
        .context("unable to determine the module directory")?;
    let loader = DylibLoader::from_config(&config.runtime, &module_dir);
    let mut ticks = IntervalTicks::with_fps(config.host.tick_fps);
    let heap = Arc::new(MarkSweepHeap::new(stack_base));

    let bootstrap = Bootstrap::new(config, heap).publish();
    bootstrap.create_context(Box::new(loader))?;
    bootstrap.install(&mut ticks)?;
    if bootstrap.start()? == Phase::Terminated {
        return Ok(());
    }
    let fired = ticks.run_until(|| bootstrap.phase() == Phase::Terminated);
    info!(fired, "host loop finished");
    Ok(())
}

fn soak(
    config: &FiberConfig,
    stack_base: usize,
    ticks: u64,
    allocs_per_tick: usize,
    threshold: usize,
) -> Result<SoakReport> {
    let heap = Arc::new(MarkSweepHeap::new(stack_base).with_threshold(threshold));
    let resumptions = Rc::new(Cell::new(0u64));
    let survived = Rc::new(Cell::new(false));

    let body_heap = Arc::clone(&heap);
    let counter = Rc::clone(&resumptions);
    let verdict = Rc::clone(&survived);
    let scheduler = Scheduler::new(heap.clone(), config.stack_size, move |yielder| {
        let sentinel = body_heap.alloc(4);
        unsafe { sentinel.as_ptr().write(0xfeed) };
        std::hint::black_box(&sentinel);
        for _ in 0..ticks {
            counter.set(counter.get() + 1);
            yielder.yield_now();
        }
        std::hint::black_box(&sentinel);
        let address = sentinel.as_ptr() as usize;
        verdict.set(body_heap.contains(address) && unsafe { sentinel.as_ptr().read() } == 0xfeed);
    })?;
    scheduler.install_root_scan();

    for _ in 0..ticks {
        scheduler.switch_to(ContextId::Embedded);
        if scheduler.is_finished() {
            bail!("embedded context finished early");
        }
        for _ in 0..allocs_per_tick {
            heap.alloc(2);
        }
        clear_dead_stack();
    }
    heap.collect();
    scheduler.switch_to(ContextId::Embedded);
    if !scheduler.is_finished() {
        bail!("embedded context did not finish");
    }

    Ok(SoakReport {
        ticks,
        resumptions: resumptions.get(),
        switches: scheduler.switches(),
        sentinel_survived: survived.get(),
        heap: heap.stats(),
    })
}
