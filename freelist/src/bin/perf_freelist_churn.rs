//! Profiling binary for churn (alloc/free cycles).
//!
//! Run with:
//!   cargo build --release --bin perf_freelist_churn
//!   perf stat -e cycles,instructions,cache-misses,cache-references \
//!       ./target/release/perf_freelist_churn

use std::hint::black_box;

use freelist::{free_list, FreeList};

const CYCLES: usize = 10_000_000;

fn main() {
    let list: free_list!(u64, 65536) = FreeList::new();

    // Timed section - alloc then immediately free (hot cache)
    for i in 0..CYCLES as u64 {
        let ptr = list.alloc(i).unwrap();
        black_box(unsafe { *ptr.as_ref() });
        unsafe { list.free(ptr) };
    }
}
