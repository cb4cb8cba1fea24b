#[macro_use]
extern crate log;

mod workload;

use std::thread;
use std::time::Instant;

use charcoal::prelude::*;

fn main() {
    env_logger::init();

    let matches = clap::App::new("charcoal-cli")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Drives the canonical game-loop frame through the charcoal scheduler")
        .arg(
            clap::Arg::with_name("threads")
                .short("t")
                .long("threads")
                .takes_value(true)
                .help("Number of worker threads"),
        )
        .arg(
            clap::Arg::with_name("parallel")
                .short("p")
                .long("parallel")
                .help("Use the parallel scheduler instead of the serial fallback"),
        )
        .arg(
            clap::Arg::with_name("frames")
                .short("f")
                .long("frames")
                .takes_value(true)
                .help("Number of frames to simulate"),
        )
        .arg(
            clap::Arg::with_name("lockless")
                .short("l")
                .long("lockless")
                .help("Equip the workers with the lock-free deques"),
        )
        .get_matches();

    let frames: u32 = matches
        .value_of("frames")
        .map(|v| v.parse().expect("--frames expects a number"))
        .unwrap_or(16);

    if !matches.is_present("parallel") {
        run_serial(frames);
        return;
    }

    let ceiling = charcoal::pool::max_workers();
    let threads = match matches.value_of("threads") {
        Some(v) => {
            let requested: u32 = v.parse().expect("--threads expects a number");
            if requested > ceiling {
                println!(
                    "Specified number of threads is too much! Defaulting to: {}",
                    ceiling
                );
                ceiling
            } else if requested < 1 {
                println!("Specified number of threads is too low! Defaulting to: 1");
                1
            } else {
                println!("Specified number of threads: {}", requested);
                requested
            }
        }
        None => {
            println!("No number of threads specified. Defaulting to: {}", ceiling);
            ceiling
        }
    };

    let deque = if matches.is_present("lockless") {
        DequeVariant::Lockless
    } else {
        DequeVariant::Locking
    };

    run_parallel(threads, deque, frames);
}

fn run_serial(frames: u32) {
    println!("Running {} serial frames...", frames);
    let start = Instant::now();
    for frame in 0..frames {
        let frame_start = Instant::now();
        workload::update_serial();
        debug!("[frame {}] {:?}", frame, frame_start.elapsed());
    }
    report(frames, start);
}

fn run_parallel(threads: u32, deque: DequeVariant, frames: u32) {
    let params = PoolParams {
        num_workers: Some(threads),
        deque,
        ..PoolParams::default()
    };
    let mut pool = match Pool::new(params) {
        Ok(pool) => pool,
        Err(err) => {
            eprintln!("failed to build the worker pool: {}", err);
            std::process::exit(1);
        }
    };

    println!(
        "Running {} parallel frames on {} workers ({:?} deques)...",
        frames,
        pool.len(),
        deque
    );

    let start = Instant::now();
    for frame in 0..frames {
        let frame_start = Instant::now();
        let jobs = workload::build_frame();
        for job in &jobs {
            pool.submit(job);
        }

        while !pool.all_idle() {
            thread::yield_now();
        }
        debug!("[frame {}] {:?}", frame, frame_start.elapsed());
    }
    report(frames, start);

    pool.shutdown();
}

fn report(frames: u32, start: Instant) {
    let elapsed = start.elapsed();
    println!(
        "{} frames in {:?} ({:?} per frame)",
        frames,
        elapsed,
        elapsed / frames.max(1)
    );
}
