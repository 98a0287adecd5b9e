//! Collector correctness tests
//!
//! These drive the arena directly through allocation, pinning and forced
//! collections, and check that reachable values survive intact while
//! everything else goes back to the free set.

use jcm_lisp::{GcPhase, Heap, HeapConfig, Kind, LispError, Object, Pin, Value};

fn heap(capacity: usize) -> Heap {
    Heap::new(HeapConfig { capacity }).unwrap()
}

/// Small deterministic generator so the mixed workloads are reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: usize) -> usize {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 33) as usize) % bound
    }
}

/// Walk everything reachable from `root` and return it.
fn reachable(heap: &Heap, root: Value) -> Vec<Value> {
    let mut seen = Vec::new();
    let mut worklist = vec![root];
    while let Some(v) = worklist.pop() {
        if seen.contains(&v) {
            continue;
        }
        seen.push(v);
        heap.get(v).for_each_child(|child| worklist.push(child));
    }
    seen
}

#[test]
fn test_conservation_over_mixed_workload() {
    let mut heap = heap(48);
    let mut rng = Lcg(7);
    let mut pins: Vec<Pin> = Vec::new();

    for step in 0..2_000 {
        let outcome = match rng.next(6) {
            0 => heap.make_fixnum(step).map(|_| ()),
            1 => heap.make_str(format!("s{}", step)).map(|_| ()),
            2 if pins.len() >= 2 => {
                let a = heap.pinned(pins[rng.next(pins.len())]).unwrap();
                let b = heap.pinned(pins[rng.next(pins.len())]).unwrap();
                heap.cons(a, b).map(|cell| pins.push(heap.pin(cell)))
            }
            3 => heap.make_fixnum(step).map(|n| pins.push(heap.pin(n))),
            4 if !pins.is_empty() => {
                let pin = pins.swap_remove(rng.next(pins.len()));
                heap.unpin(pin)
            }
            _ => {
                heap.collect();
                Ok(())
            }
        };

        match outcome {
            Ok(()) => {}
            Err(LispError::OutOfMemory { capacity }) => {
                assert_eq!(capacity, 48);
                for pin in pins.drain(..) {
                    heap.unpin(pin).unwrap();
                }
            }
            Err(e) => panic!("unexpected error at step {}: {}", step, e),
        }

        assert!(heap.check_conservation(), "partition broken at step {}", step);
        assert_eq!(heap.active_count() + heap.free_count(), heap.capacity());
        assert_eq!(heap.phase(), GcPhase::Idle);
    }

    assert!(heap.stats().collections > 0);
}

#[test]
fn test_rooted_structure_survives_churn() {
    let mut heap = heap(64);
    let mark = heap.pin_mark();
    let mut items = Vec::new();
    for n in 1..=5 {
        let v = heap.make_fixnum(n * 10).unwrap();
        heap.pin(v);
        items.push(v);
    }
    let list = heap.list(&items).unwrap();
    heap.add_root(list);
    heap.release_pins(mark);
    assert_eq!(heap.pinned_count(), 0);

    for i in 0..1_000 {
        heap.make_fixnum(i).unwrap();
        heap.make_str("garbage").unwrap();
    }
    assert!(heap.stats().collections > 10);

    let values: Vec<i64> = heap
        .list_to_vec(list)
        .unwrap()
        .into_iter()
        .map(|v| heap.fixnum(v).unwrap())
        .collect();
    assert_eq!(values, vec![10, 20, 30, 40, 50]);

    for v in reachable(&heap, list) {
        assert_ne!(heap.kind(v), Kind::Free, "root reaches freed slot {:?}", v);
    }
}

#[test]
fn test_interning_is_stable_across_collections() {
    let mut heap = heap(64);
    let foo = heap.intern("foo").unwrap();
    let bar = heap.intern("bar").unwrap();
    let count = heap.symbol_count();

    for i in 0..500 {
        heap.make_fixnum(i).unwrap();
    }
    heap.collect();

    assert_eq!(heap.intern("foo").unwrap(), foo);
    assert_eq!(heap.intern("bar").unwrap(), bar);
    assert_ne!(foo, bar);
    assert_eq!(heap.symbol_name(foo), Some("foo"));
    assert_eq!(heap.symbol_count(), count);
}

#[test]
fn test_reachability_is_stable_between_collections() {
    let mut heap = heap(32);
    let nil = heap.nil();
    let shared = heap.make_str("shared").unwrap();
    heap.pin(shared);
    let a = heap.cons(shared, nil).unwrap();
    heap.pin(a);
    let b = heap.cons(shared, a).unwrap();
    heap.set_tail(a, b).unwrap();
    heap.add_root(b);
    let garbage = heap.make_fixnum(1).unwrap();

    let first = heap.reachable_slots();
    assert_eq!(first, vec![nil, shared, a, b]);
    assert_eq!(heap.reachable_slots(), first);
    assert!(!first.contains(&garbage));
    assert_eq!(heap.phase(), GcPhase::Idle);

    assert_eq!(heap.collect(), 1);
    assert_eq!(heap.reachable_slots(), first);
    assert_eq!(heap.kind(shared), Kind::Str);
}

#[test]
fn test_pinned_value_survives_forced_collection() {
    let mut heap = heap(16);
    let nil = heap.nil();
    let s = heap.make_str("survivor").unwrap();
    let p = heap.pin(s);
    let cell = heap.cons(s, nil).unwrap();
    let q = heap.pin(cell);

    assert_eq!(heap.collect(), 0);
    assert!(matches!(heap.get(s), Object::Str(text) if text == "survivor"));
    assert_eq!(heap.as_cell(cell), Some((s, nil)));

    // Out of order on purpose.
    heap.unpin(p).unwrap();
    assert_eq!(heap.collect(), 0, "still reachable through the pinned cell");
    heap.unpin(q).unwrap();
    assert_eq!(heap.pinned_count(), 0);
    assert_eq!(heap.collect(), 2);
    assert_eq!(heap.active_count(), 1);
    assert!(heap.check_conservation());
}

#[test]
fn test_unpin_twice_is_reported() {
    let mut heap = heap(8);
    let n = heap.make_fixnum(3).unwrap();
    let pin = heap.pin(n);
    heap.unpin(pin).unwrap();
    assert!(matches!(heap.unpin(pin), Err(LispError::Internal(_))));
}

#[test]
fn test_exhaust_then_release_allows_one_more() {
    let mut heap = heap(8);
    let mark = heap.pin_mark();

    let mut live = 0;
    let err = loop {
        match heap.make_fixnum(live) {
            Ok(v) => {
                heap.pin(v);
                live += 1;
            }
            Err(e) => break e,
        }
    };
    assert_eq!(err, LispError::OutOfMemory { capacity: 8 });
    assert_eq!(live, 7);
    assert_eq!(heap.free_count(), 0);
    assert!(heap.check_conservation());

    heap.release_pins(mark);
    let v = heap.make_fixnum(99).unwrap();
    assert_eq!(heap.fixnum(v), Some(99));
    assert_eq!(heap.stats().last_reclaimed, 7);
    assert!(heap.check_conservation());
}

#[test]
fn test_collection_inside_cons_keeps_both_children() {
    // Fill the arena with garbage plus two unrooted values, then cons them.
    let mut heap = heap(6);
    let a = heap.make_str("head").unwrap();
    let b = heap.make_str("tail").unwrap();
    while heap.free_count() > 0 {
        heap.make_fixnum(0).unwrap();
    }

    let cell = heap.cons(a, b).unwrap();
    assert_eq!(heap.stats().collections, 1);
    assert!(matches!(heap.get(a), Object::Str(t) if t == "head"));
    assert!(matches!(heap.get(b), Object::Str(t) if t == "tail"));
    assert_eq!(heap.as_cell(cell), Some((a, b)));
}
