use std::{
    process,
    ptr::NonNull,
    time::{Duration, Instant},
};

use argh::FromArgs;
use memory_provider::{BudgetProvider, SystemProvider, WideFill};
use pool_slab::{PoolAllocator, SlabAllocator};
use snafu::{ResultExt as _, whatever};

use self::report::{GenericError, Report};

mod report;

/// Measures allocation, free and reset throughput of the pool and slab
/// allocators.
#[derive(Debug, FromArgs)]
struct Args {
    #[argh(subcommand)]
    command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Pool(PoolArgs),
    Slab(SlabArgs),
}

/// Benchmark the growable pool allocator.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "pool")]
struct PoolArgs {
    /// number of allocations (default: 1000000)
    #[argh(option, default = "1_000_000")]
    iterations: usize,
    /// bytes per allocation (default: 256)
    #[argh(option, default = "256")]
    size: usize,
    /// alignment of every allocation (default: 16)
    #[argh(option, default = "16")]
    align: usize,
    /// bytes in the first block, and the minimum for later ones (default: 10 MiB)
    #[argh(option, default = "10 * 1024 * 1024")]
    capacity: usize,
    /// upper bound on the bytes reserved from the system (default: unlimited)
    #[argh(option)]
    budget: Option<usize>,
}

/// Benchmark the fixed-size slab allocator.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "slab")]
struct SlabArgs {
    /// number of allocations, which is also the number of slots (default: 1000000)
    #[argh(option, default = "1_000_000")]
    iterations: usize,
    /// bytes per object (default: 256)
    #[argh(option, default = "256")]
    object_size: usize,
}

fn main() {
    env_logger::init();
    let args: Args = argh::from_env();

    if let Err(err) = run(&args) {
        let report = Report::new(err);
        eprintln!("{report}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), GenericError> {
    match &args.command {
        Command::Pool(args) => bench_pool(args),
        Command::Slab(args) => bench_slab(args),
    }
}

fn bench_pool(args: &PoolArgs) -> Result<(), GenericError> {
    let provider = BudgetProvider::new(SystemProvider::new(), args.budget.unwrap_or(usize::MAX));
    log::debug!("provider budget: {:#x} bytes", provider.budget());
    let pool = PoolAllocator::with_collaborators(&provider, WideFill, args.capacity)
        .whatever_context("memory pool initialization failed")?;
    println!(
        "Memory pool initialized: initial block size = {} bytes",
        pool.initial_capacity()
    );

    let mut ptrs = Vec::with_capacity(args.iterations);
    let elapsed = timed(|| {
        for i in 0..args.iterations {
            let ptr = pool
                .alloc(args.size, args.align)
                .with_whatever_context(|_| format!("allocation failed at iteration {i}"))?;
            ptrs.push(ptr);
        }
        Ok(())
    })?;
    print_rate(
        &format!("{}-byte allocation", args.size),
        args.iterations,
        elapsed,
    );
    log::info!("after alloc: {:?}", pool.stats());

    let elapsed = timed(|| {
        for (i, ptr) in ptrs.drain(..).enumerate() {
            unsafe { pool.free(ptr.as_ptr()) }
                .with_whatever_context(|_| format!("free failed at iteration {i}"))?;
        }
        Ok(())
    })?;
    print_rate("Free operations", args.iterations, elapsed);
    log::info!("after free: {:?}", pool.stats());

    let elapsed = timed(|| pool.reset().whatever_context("pool reset failed"))?;
    println!("Pool reset time: {:.6} seconds", elapsed.as_secs_f64());

    let stats = pool.stats().whatever_context("failed to read pool stats")?;
    println!(
        "Pool holds {} blocks, {} bytes ({} bytes reserved from the system)",
        stats.blocks,
        stats.capacity,
        provider.in_use()
    );

    pool.destroy().whatever_context("pool destroy failed")?;
    if provider.live_regions() != 0 {
        whatever!("{} regions still reserved after destroy", provider.live_regions());
    }
    println!("Memory pool destroyed.");
    Ok(())
}

fn bench_slab(args: &SlabArgs) -> Result<(), GenericError> {
    let slab = SlabAllocator::init(args.iterations, args.object_size)
        .whatever_context("slab initialization failed")?;
    println!(
        "Slab initialized: total objects = {}, object size = {} bytes",
        slab.total(),
        slab.object_size()
    );

    let mut ptrs: Vec<NonNull<u8>> = Vec::with_capacity(args.iterations);
    let elapsed = timed(|| {
        for i in 0..args.iterations {
            let ptr = slab
                .alloc()
                .with_whatever_context(|_| format!("allocation failed at iteration {i}"))?;
            ptrs.push(ptr);
        }
        Ok(())
    })?;
    print_rate(
        &format!("{}-byte slab allocation", args.object_size),
        args.iterations,
        elapsed,
    );

    let elapsed = timed(|| {
        for (i, ptr) in ptrs.drain(..).enumerate() {
            unsafe { slab.free(ptr.as_ptr()) }
                .with_whatever_context(|_| format!("free failed at iteration {i}"))?;
        }
        Ok(())
    })?;
    print_rate("Slab free operations", args.iterations, elapsed);

    let elapsed = timed(|| slab.reset().whatever_context("slab reset failed"))?;
    println!("Slab reset time: {:.6} seconds", elapsed.as_secs_f64());

    let stats = slab.stats().whatever_context("failed to read slab stats")?;
    log::info!("after reset: {stats:?}");

    slab.destroy().whatever_context("slab destroy failed")?;
    println!("Slab destroyed.");
    Ok(())
}

fn timed<F>(f: F) -> Result<Duration, GenericError>
where
    F: FnOnce() -> Result<(), GenericError>,
{
    let start = Instant::now();
    f()?;
    Ok(start.elapsed())
}

#[expect(clippy::cast_precision_loss)]
fn print_rate(what: &str, iterations: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 {
        iterations as f64 / secs
    } else {
        f64::INFINITY
    };
    println!("{what}, {iterations} iterations: {secs:.6} seconds ({rate:.2} ops/sec)");
}
