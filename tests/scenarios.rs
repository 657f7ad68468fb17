//! End-to-end scenarios and invariants (spec.md §8).
//!
//! Each `S*` test name matches the scenario it covers in the spec; the
//! remaining tests cover the universal invariants, the round-trip law, and
//! the boundary cases.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use pagequeue::{Config, Consistency, ConsumerCardinality, DefaultConfig, ProducerCardinality, ProgressGuarantee, Queue};

/// A 4 KiB-paged configuration, used wherever a test needs to force page
/// overflow or the external-block threshold without pushing megabytes of
/// data (spec.md S2/S4 both specify `page_size = 4096`).
struct TinyPageConfig;

impl Config for TinyPageConfig {
    const PAGE_SIZE: usize = 4096;
    const PRODUCER_CARDINALITY: ProducerCardinality = ProducerCardinality::Multiple;
    const CONSUMER_CARDINALITY: ConsumerCardinality = ConsumerCardinality::Multiple;
    const CONSISTENCY: Consistency = Consistency::Relaxed;
}

// S1. Single-threaded ordering.
#[test]
fn s1_single_threaded_ordering() {
    let queue: Queue<DefaultConfig> = Queue::new();
    let pages_before = queue.pages_in_use();

    queue.push(1i32);
    queue.push("abc".to_string());
    queue.push(3.14f64);

    assert_eq!(queue.try_pop::<i32>(ProgressGuarantee::Blocking), Some(1));
    assert_eq!(queue.try_pop::<String>(ProgressGuarantee::Blocking), Some("abc".to_string()));
    assert_eq!(queue.try_pop::<f64>(ProgressGuarantee::Blocking), Some(3.14));

    assert!(queue.is_empty_hint());
    assert_eq!(queue.pages_in_use(), pages_before + 1);
}

// S2. External block: a queue element whose own size exceeds the in-page
// threshold (not merely a small handle pointing at heap data) must take the
// external-block path and still round-trip byte for byte.
#[test]
fn s2_external_block_round_trips_byte_for_byte() {
    let queue: Queue<TinyPageConfig> = Queue::new();
    let mut payload = [0u8; 5000];
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte = ((i as u32) * 37 % 251) as u8;
    }

    queue.push(payload);
    assert_eq!(queue.stats().external_blocks.current(), 1);

    let popped = queue.try_pop::<[u8; 5000]>(ProgressGuarantee::Blocking).unwrap();
    assert_eq!(popped, payload);
    assert_eq!(queue.stats().external_blocks.current(), 0);
}

// S3. Cancel preserves peers.
#[test]
fn s3_cancel_preserves_peers() {
    let queue: Queue<DefaultConfig> = Queue::new();

    let t1 = queue.start_push::<i32>(ProgressGuarantee::Blocking).unwrap().unwrap();
    queue.push("kept".to_string());
    drop(t1); // cancel without commit

    assert_eq!(queue.try_pop::<String>(ProgressGuarantee::Blocking), Some("kept".to_string()));
    assert!(queue.is_empty_hint());
    assert_eq!(queue.stats().elements.current(), 0);
}

// S4. Page overflow.
#[test]
fn s4_page_overflow_links_multiple_pages_and_drains_cleanly() {
    let queue: Queue<TinyPageConfig> = Queue::new();
    let pages_before = queue.pages_in_use();

    for i in 0..200u32 {
        queue.push([i as u8; 64]);
    }
    assert!(queue.pages_in_use() - pages_before >= 2);

    for i in 0..200u32 {
        assert_eq!(queue.try_pop::<[u8; 64]>(ProgressGuarantee::Blocking), Some([i as u8; 64]));
    }

    assert_eq!(queue.pages_in_use(), pages_before + 1);
}

// S5. Multi-producer FIFO per producer.
#[test]
fn s5_multi_producer_fifo_per_producer() {
    let queue: Arc<Queue<DefaultConfig>> = Arc::new(Queue::new());
    let barrier = Arc::new(Barrier::new(2));
    const N: i64 = 1000;

    let producers: Vec<_> = (0..2i64)
        .map(|p| {
            let queue = queue.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for i in 0..N {
                    queue.push((p, i));
                }
            })
        })
        .collect();
    for handle in producers {
        handle.join().unwrap();
    }

    let mut seen = [Vec::new(), Vec::new()];
    let mut drained = 0;
    while drained < 2 * N {
        if let Some((p, i)) = queue.try_pop::<(i64, i64)>(ProgressGuarantee::Blocking) {
            seen[p as usize].push(i);
            drained += 1;
        }
    }

    for p in 0..2usize {
        assert_eq!(seen[p], (0..N).collect::<Vec<_>>(), "producer {p} out of order");
    }
}

// S6. Lock-free hint respected.
#[test]
fn s6_lock_free_hint_never_reaches_the_os_on_a_virgin_queue() {
    let queue: Queue<DefaultConfig> = Queue::new();
    let pages_before = queue.pages_in_use();

    let result = queue.try_push(1i32, ProgressGuarantee::LockFree);
    assert_eq!(result.unwrap(), false);
    assert_eq!(queue.pages_in_use(), pages_before);
    assert!(queue.is_empty_hint());
}

// Invariant 2 + 3: no duplication, no loss.
#[test]
fn invariant_no_duplication_or_loss_under_concurrent_drain() {
    let queue: Arc<Queue<DefaultConfig>> = Arc::new(Queue::new());
    const TOTAL: usize = 4000;

    for i in 0..TOTAL {
        queue.push(i as u64);
    }

    let consumed = Arc::new(std::sync::Mutex::new(Vec::with_capacity(TOTAL)));
    let consumers: Vec<_> = (0..4)
        .map(|_| {
            let queue = queue.clone();
            let consumed = consumed.clone();
            thread::spawn(move || loop {
                match queue.try_pop::<u64>(ProgressGuarantee::Blocking) {
                    Some(value) => consumed.lock().unwrap().push(value),
                    None => break,
                }
            })
        })
        .collect();
    for handle in consumers {
        handle.join().unwrap();
    }

    let mut values = Arc::try_unwrap(consumed).unwrap().into_inner().unwrap();
    values.sort_unstable();
    assert_eq!(values, (0..TOTAL as u64).collect::<Vec<_>>());
}

// Invariant 4: no leaks.
#[test]
fn invariant_no_leaks_after_full_drain() {
    struct Counted(#[allow(dead_code)] u64, Arc<AtomicUsize>);
    impl Drop for Counted {
        fn drop(&mut self) {
            self.1.fetch_add(1, Ordering::SeqCst);
        }
    }

    let live = Arc::new(AtomicUsize::new(0));
    let queue: Queue<TinyPageConfig> = Queue::new();
    let pages_before = queue.pages_in_use();

    for i in 0..300u64 {
        queue.push(Counted(i, live.clone()));
        live.fetch_add(1, Ordering::SeqCst);
    }

    while queue.try_pop::<Counted>(ProgressGuarantee::Blocking).is_some() {}

    assert_eq!(queue.stats().elements.current(), 0);
    assert_eq!(queue.pages_in_use(), pages_before + 1);
    assert_eq!(live.load(Ordering::SeqCst), 0);
}

// Invariant 6: alignment.
#[test]
fn invariant_alignment_is_honoured_for_overaligned_elements() {
    #[repr(align(64))]
    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    struct Aligned64(u64);

    let queue: Queue<DefaultConfig> = Queue::new();
    for i in 0..16u64 {
        queue.push(Aligned64(i));
    }
    for i in 0..16u64 {
        let popped = queue.try_pop::<Aligned64>(ProgressGuarantee::Blocking).unwrap();
        assert_eq!(popped, Aligned64(i));
        assert_eq!((&popped as *const Aligned64 as usize) % 64, 0);
    }
}

// Invariant 7: cancellation idempotence / drop-without-commit never corrupts state.
#[test]
fn invariant_cancel_at_every_substep_leaves_queue_usable() {
    let queue: Queue<DefaultConfig> = Queue::new();

    for _ in 0..50 {
        let txn = queue.start_push::<u64>(ProgressGuarantee::Blocking).unwrap().unwrap();
        drop(txn); // cancelled before any write
    }
    for _ in 0..50 {
        let mut txn = queue.start_push::<u64>(ProgressGuarantee::Blocking).unwrap().unwrap();
        unsafe { (txn.element_ptr() as *mut u64).write(7) };
        txn.mark_constructed();
        drop(txn); // cancelled after construction, destructor must run (u64 has none, but flow must not panic)
    }

    queue.push(99u64);
    assert_eq!(queue.try_pop::<u64>(ProgressGuarantee::Blocking), Some(99));
    assert!(queue.is_empty_hint());
}

/// A blob attached to an element via raw-allocate: the element carries only
/// the pointer and length, the bytes themselves live in a secondary slot.
struct Blob {
    ptr: *const u8,
    len: usize,
}
unsafe impl Send for Blob {}
unsafe impl Sync for Blob {}

// Round-trip law (spec.md §8): a trivially-copyable buffer pushed via
// raw-allocate, then memcpy'd into, is read back bitwise equal by the
// consumer — even though the secondary slot itself is never delivered as a
// queue element, only as a pointer the producer embeds in the one that is.
#[test]
fn round_trip_law_for_raw_allocated_buffer() {
    let queue: Queue<DefaultConfig> = Queue::new();
    let pattern: Vec<u8> = (0..256u32).map(|i| (i as u8).wrapping_mul(37)).collect();

    let mut txn = queue.start_push::<Blob>(ProgressGuarantee::Blocking).unwrap().unwrap();
    let raw = txn
        .raw_allocate(256, 8, ProgressGuarantee::Blocking)
        .expect("raw_allocate should succeed under a blocking guarantee");
    unsafe { std::ptr::copy_nonoverlapping(pattern.as_ptr(), raw, 256) };

    unsafe { (txn.element_ptr() as *mut Blob).write(Blob { ptr: raw, len: 256 }) };
    txn.mark_constructed();
    txn.commit();

    let popped = queue.try_pop::<Blob>(ProgressGuarantee::Blocking).unwrap();
    // Copy out immediately: a raw-allocated blob's page is free to be
    // recycled (and zeroed) as soon as some other consume sweeps past it,
    // so nothing but this read may happen between the pop above and here.
    let readback: Vec<u8> = unsafe { std::slice::from_raw_parts(popped.ptr, popped.len) }.to_vec();
    assert_eq!(readback, pattern);
}

// Boundary: element size equal to the max in-page size must stay in-page.
#[test]
fn boundary_max_inline_size_stays_in_page() {
    let queue: Queue<TinyPageConfig> = Queue::new();
    const MAX: usize = TinyPageConfig::MAX_INLINE_SIZE;
    queue.push([7u8; MAX]);
    assert_eq!(queue.stats().external_blocks.current(), 0);
    assert_eq!(queue.try_pop::<[u8; MAX]>(ProgressGuarantee::Blocking), Some([7u8; MAX]));
}

// Boundary: one byte over the max in-page size must go external.
#[test]
fn boundary_one_byte_over_max_inline_goes_external() {
    let queue: Queue<TinyPageConfig> = Queue::new();
    const OVER: usize = TinyPageConfig::MAX_INLINE_SIZE + 1;
    queue.push([9u8; OVER]);
    assert_eq!(queue.stats().external_blocks.current(), 1);
    assert_eq!(queue.try_pop::<[u8; OVER]>(ProgressGuarantee::Blocking), Some([9u8; OVER]));
}

// Boundary: alignment equal to page size must be honoured. No in-page slot
// can satisfy it (the page header always occupies the first few bytes of
// every page), so this is the one case where an otherwise tiny element is
// routed external purely on alignment grounds.
#[test]
fn boundary_alignment_equal_to_page_size_is_honoured() {
    #[repr(align(4096))]
    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    struct PageAligned(u64);

    let queue: Queue<TinyPageConfig> = Queue::new();
    queue.push(PageAligned(123));
    assert_eq!(queue.stats().external_blocks.current(), 1);
    let popped = queue.try_pop::<PageAligned>(ProgressGuarantee::Blocking).unwrap();
    assert_eq!(popped, PageAligned(123));
    assert_eq!((&popped as *const PageAligned as usize) % 4096, 0);
}

// Flag exclusivity: a mismatched-type pop never claims/destroys the element,
// so BUSY is always released back to a clean, consumable state.
#[test]
fn invariant_flag_exclusivity_survives_a_mismatched_pop() {
    let queue: Queue<DefaultConfig> = Queue::new();
    queue.push(5i16);
    assert_eq!(queue.try_pop::<u8>(ProgressGuarantee::Blocking), None);
    assert_eq!(queue.try_pop::<i16>(ProgressGuarantee::Blocking), Some(5));
}
