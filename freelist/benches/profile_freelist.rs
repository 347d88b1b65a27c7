//! Latency profile for the freelist alloc/free cycle.
//!
//! Reports cycle histograms for the uncontended path and for the
//! control-word under multi-thread contention.
//!
//! For best results, disable turbo boost and pin to physical cores:
//!   echo 1 | sudo tee /sys/devices/system/cpu/intel_pstate/no_turbo
//!   sudo taskset -c 0,2 ./target/release/deps/profile_freelist-*

use std::thread;
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;

use freelist::{free_list, FreeList};

const WARMUP: usize = 100_000;
const SAMPLES: usize = 1_000_000;
const CONTENDED_THREADS: usize = 4;

type ProfileList = free_list!(u64, 65536);

#[cfg(target_arch = "x86_64")]
#[inline]
fn rdtscp() -> u64 {
    unsafe {
        let mut aux: u32 = 0;
        core::arch::x86_64::__rdtscp(&mut aux)
    }
}

#[cfg(not(target_arch = "x86_64"))]
#[inline]
fn rdtscp() -> u64 {
    Instant::now().elapsed().as_nanos() as u64
}

fn estimate_cpu_freq_ghz() -> f64 {
    let start_cycles = rdtscp();
    let start_time = Instant::now();
    thread::sleep(Duration::from_millis(10));
    let end_cycles = rdtscp();
    let elapsed = start_time.elapsed();
    end_cycles.wrapping_sub(start_cycles) as f64 / elapsed.as_nanos() as f64
}

// ============================================================================
// Uncontended alloc/free cycle
// ============================================================================

fn bench_uncontended() -> Histogram<u64> {
    let list: ProfileList = FreeList::new();

    for i in 0..WARMUP as u64 {
        let ptr = list.alloc(i).unwrap();
        unsafe { list.free(ptr) };
    }

    let mut hist = Histogram::<u64>::new_with_max(1_000_000, 3).unwrap();

    for i in 0..SAMPLES as u64 {
        let start = rdtscp();

        let ptr = list.alloc(i).unwrap();
        unsafe { list.free(ptr) };

        let elapsed = rdtscp().wrapping_sub(start);
        let _ = hist.record(elapsed.min(1_000_000));
    }

    hist
}

// ============================================================================
// Contended alloc/free cycle
// ============================================================================

fn bench_contended() -> Histogram<u64> {
    let list: Box<ProfileList> = Box::new(FreeList::new());
    let mut hist = Histogram::<u64>::new_with_max(1_000_000, 3).unwrap();

    thread::scope(|s| {
        // Background churners keep the control word hot.
        for _ in 0..CONTENDED_THREADS - 1 {
            let list = &*list;
            s.spawn(move || {
                for i in 0..(WARMUP + SAMPLES) as u64 {
                    let ptr = list.alloc(i).unwrap();
                    unsafe { list.free(ptr) };
                }
            });
        }

        for i in 0..WARMUP as u64 {
            let ptr = list.alloc(i).unwrap();
            unsafe { list.free(ptr) };
        }

        for i in 0..SAMPLES as u64 {
            let start = rdtscp();

            let ptr = list.alloc(i).unwrap();
            unsafe { list.free(ptr) };

            let elapsed = rdtscp().wrapping_sub(start);
            let _ = hist.record(elapsed.min(1_000_000));
        }
    });

    hist
}

// ============================================================================
// Main
// ============================================================================

fn print_histogram(name: &str, hist: &Histogram<u64>, cpu_ghz: f64) {
    println!("{}:", name);
    println!("  Cycles:");
    println!("    min:   {:>7}", hist.min());
    println!("    p50:   {:>7}", hist.value_at_quantile(0.50));
    println!("    p99:   {:>7}", hist.value_at_quantile(0.99));
    println!("    p999:  {:>7}", hist.value_at_quantile(0.999));
    println!("    max:   {:>7}", hist.max());
    println!("  Nanoseconds:");
    println!("    min:   {:>7.1} ns", hist.min() as f64 / cpu_ghz);
    println!(
        "    p50:   {:>7.1} ns",
        hist.value_at_quantile(0.50) as f64 / cpu_ghz
    );
    println!(
        "    p99:   {:>7.1} ns",
        hist.value_at_quantile(0.99) as f64 / cpu_ghz
    );
    println!("    max:   {:>7.1} ns", hist.max() as f64 / cpu_ghz);
    println!();
}

fn main() {
    println!("freelist Profile");
    println!("================");
    println!();
    println!("Warmup:  {}", WARMUP);
    println!("Samples: {}", SAMPLES);
    println!();

    let cpu_ghz = estimate_cpu_freq_ghz();
    println!("Estimated CPU freq: {:.2} GHz", cpu_ghz);
    println!();

    println!("=== Alloc/Free Cycle Latency ===");
    println!();

    let uncontended = bench_uncontended();
    print_histogram("uncontended", &uncontended, cpu_ghz);

    let contended = bench_contended();
    print_histogram(
        &format!("contended ({} threads)", CONTENDED_THREADS),
        &contended,
        cpu_ghz,
    );

    println!("=== Summary (p50 cycles) ===");
    println!("  uncontended: {:>5}", uncontended.value_at_quantile(0.50));
    println!(
        "  contended:   {:>5} ({:.1}x)",
        contended.value_at_quantile(0.50),
        contended.value_at_quantile(0.50) as f64 / uncontended.value_at_quantile(0.50) as f64
    );
}
