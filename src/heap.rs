use log::{debug, trace, warn};

use crate::error::{LispError, LispResult};
use crate::roots::{Pin, PinMark, Roots};
use crate::value::{Kind, Object, Primitive, Value};

/// Heap configuration.
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Number of slots in the arena. Fixed for the lifetime of the heap.
    pub capacity: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self { capacity: 64 * 1024 }
    }
}

/// Where the collector is. Only ever observed as `Idle` from outside,
/// since a collection runs to completion inside one call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GcPhase {
    Idle,
    Marking,
    Sweeping,
}

/// Cumulative collector counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub collections: u64,
    pub reclaimed: u64,
    pub last_reclaimed: usize,
}

/// A single arena slot.
struct Slot {
    object: Object,
    mark: bool,
}

/// The value arena. Every `Value` is an index into `slots`.
///
/// Slots are partitioned into the free set (`free_list`, each holding
/// `Object::Free`) and the active set (everything else). Allocation pops
/// the free list; when it is empty the collector runs synchronously and
/// the allocation is retried once.
pub struct Heap {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    roots: Roots,
    phase: GcPhase,
    stats: GcStats,
    nil: Value,
    /// Head of the interned symbol list. Always a root.
    pub(crate) symbols: Value,
}

impl Heap {
    pub fn new(config: HeapConfig) -> LispResult<Self> {
        let capacity = config.capacity;
        if capacity == 0 || capacity > u32::MAX as usize {
            return Err(LispError::OutOfMemory { capacity });
        }
        let slots = (0..capacity)
            .map(|_| Slot {
                object: Object::Free,
                mark: false,
            })
            .collect();
        // Reversed so that slot 0 is handed out first.
        let free_list = (0..capacity as u32).rev().collect();
        let mut heap = Heap {
            slots,
            free_list,
            roots: Roots::new(),
            phase: GcPhase::Idle,
            stats: GcStats::default(),
            nil: Value(0),
            symbols: Value(0),
        };
        heap.nil = heap.alloc(Object::Nil)?;
        heap.symbols = heap.nil;
        Ok(heap)
    }

    // === Allocation ===

    /// Move one slot from the free set to the active set and store `object`
    /// in it. The values `object` references are treated as roots for the
    /// duration of any collection this triggers.
    pub fn alloc(&mut self, object: Object) -> LispResult<Value> {
        if self.free_list.is_empty() {
            self.collect_protecting(&object);
        }
        let Some(index) = self.free_list.pop() else {
            return Err(LispError::OutOfMemory {
                capacity: self.capacity(),
            });
        };
        let slot = &mut self.slots[index as usize];
        debug_assert!(slot.object.is_free(), "free list held an active slot");
        slot.object = object;
        slot.mark = false;
        Ok(Value(index))
    }

    fn collect_protecting(&mut self, object: &Object) -> usize {
        let mark = self.roots.mark();
        let roots = &mut self.roots;
        object.for_each_child(|child| {
            roots.pin(child);
        });
        let reclaimed = self.collect();
        self.roots.release(mark);
        reclaimed
    }

    pub fn cons(&mut self, head: Value, tail: Value) -> LispResult<Value> {
        self.alloc(Object::Cell { head, tail })
    }

    pub fn make_fixnum(&mut self, n: i64) -> LispResult<Value> {
        self.alloc(Object::Fixnum(n))
    }

    pub fn make_str(&mut self, text: impl Into<String>) -> LispResult<Value> {
        self.alloc(Object::Str(text.into()))
    }

    pub fn make_primitive(&mut self, primitive: Primitive) -> LispResult<Value> {
        self.alloc(Object::Primitive(primitive))
    }

    pub fn make_closure(&mut self, params: Value, body: Value, env: Value) -> LispResult<Value> {
        self.alloc(Object::Closure { params, body, env })
    }

    /// Build a proper list from a slice of values.
    pub fn list(&mut self, values: &[Value]) -> LispResult<Value> {
        self.scoped(|heap| {
            for &v in values {
                heap.pin(v);
            }
            let mut result = heap.nil;
            for &v in values.iter().rev() {
                result = heap.cons(v, result)?;
            }
            Ok(result)
        })
    }

    // === Access ===

    /// The canonical empty list.
    #[inline]
    pub fn nil(&self) -> Value {
        self.nil
    }

    #[inline]
    pub fn is_nil(&self, v: Value) -> bool {
        v == self.nil
    }

    /// The object stored in `v`'s slot.
    ///
    /// # Panics
    ///
    /// If `v` was issued by a larger heap and its index is past this one's
    /// capacity.
    #[inline]
    pub fn get(&self, v: Value) -> &Object {
        &self.slots[v.index()].object
    }

    #[inline]
    pub fn kind(&self, v: Value) -> Kind {
        self.get(v).kind()
    }

    pub fn fixnum(&self, v: Value) -> Option<i64> {
        match self.get(v) {
            Object::Fixnum(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_cell(&self, v: Value) -> Option<(Value, Value)> {
        match self.get(v) {
            Object::Cell { head, tail } => Some((*head, *tail)),
            _ => None,
        }
    }

    /// Head of a cell; `nil` for `nil`.
    pub fn car(&self, v: Value) -> LispResult<Value> {
        match self.get(v) {
            Object::Cell { head, .. } => Ok(*head),
            Object::Nil => Ok(self.nil),
            other => Err(LispError::TypeError(format!(
                "car of {}",
                other.kind().name()
            ))),
        }
    }

    /// Tail of a cell; `nil` for `nil`.
    pub fn cdr(&self, v: Value) -> LispResult<Value> {
        match self.get(v) {
            Object::Cell { tail, .. } => Ok(*tail),
            Object::Nil => Ok(self.nil),
            other => Err(LispError::TypeError(format!(
                "cdr of {}",
                other.kind().name()
            ))),
        }
    }

    pub fn set_head(&mut self, cell: Value, value: Value) -> LispResult<()> {
        match &mut self.slots[cell.index()].object {
            Object::Cell { head, .. } => {
                *head = value;
                Ok(())
            }
            other => Err(LispError::TypeError(format!(
                "set head of {}",
                other.kind().name()
            ))),
        }
    }

    pub fn set_tail(&mut self, cell: Value, value: Value) -> LispResult<()> {
        match &mut self.slots[cell.index()].object {
            Object::Cell { tail, .. } => {
                *tail = value;
                Ok(())
            }
            other => Err(LispError::TypeError(format!(
                "set tail of {}",
                other.kind().name()
            ))),
        }
    }

    /// Collect a proper list into a Vec. Returns None if not a proper list.
    /// Gives up after `capacity` cells, so a circular chain is not a proper list.
    pub fn list_to_vec(&self, val: Value) -> Option<Vec<Value>> {
        let mut result = Vec::new();
        let mut current = val;
        loop {
            match self.get(current) {
                Object::Nil => return Some(result),
                Object::Cell { head, tail } => {
                    if result.len() >= self.capacity() {
                        return None;
                    }
                    result.push(*head);
                    current = *tail;
                }
                _ => return None,
            }
        }
    }

    // === Roots ===

    /// Register a value that is live for as long as the heap is.
    pub fn add_root(&mut self, value: Value) {
        self.roots.add_permanent(value);
    }

    /// Protect `value` across allocations until unpinned or released.
    pub fn pin(&mut self, value: Value) -> Pin {
        self.roots.pin(value)
    }

    pub fn unpin(&mut self, pin: Pin) -> LispResult<()> {
        self.roots.unpin(pin)
    }

    pub fn repin(&mut self, pin: Pin, value: Value) -> LispResult<()> {
        self.roots.repin(pin, value)
    }

    pub fn pinned(&self, pin: Pin) -> Option<Value> {
        self.roots.get(pin)
    }

    pub fn pin_mark(&self) -> PinMark {
        self.roots.mark()
    }

    pub fn release_pins(&mut self, mark: PinMark) {
        self.roots.release(mark);
    }

    pub fn pinned_count(&self) -> usize {
        self.roots.pinned_count()
    }

    /// Run `f` with a fresh pin scope: every pin taken inside is dropped
    /// when `f` returns, whether it succeeded or not.
    pub fn scoped<T>(&mut self, f: impl FnOnce(&mut Heap) -> T) -> T {
        let mark = self.roots.mark();
        let out = f(self);
        self.roots.release(mark);
        out
    }

    // === Counters ===

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    pub fn active_count(&self) -> usize {
        self.slots.len() - self.free_list.len()
    }

    pub fn phase(&self) -> GcPhase {
        self.phase
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }

    /// Check the arena partition: free + active == capacity, every free-list
    /// entry is a distinct slot holding the free shell, and no active slot
    /// holds it.
    pub fn check_conservation(&self) -> bool {
        if self.active_count() + self.free_count() != self.capacity() {
            return false;
        }
        let mut on_free_list = vec![false; self.capacity()];
        for &i in &self.free_list {
            let i = i as usize;
            if on_free_list[i] || !self.slots[i].object.is_free() {
                return false;
            }
            on_free_list[i] = true;
        }
        self.slots
            .iter()
            .zip(&on_free_list)
            .all(|(slot, &free)| free == slot.object.is_free())
    }

    // === GC ===

    /// Full stop-the-world collection. Returns the number of slots reclaimed.
    pub fn collect(&mut self) -> usize {
        let marked = self.mark();
        let reclaimed = self.sweep();

        self.stats.collections += 1;
        self.stats.reclaimed += reclaimed as u64;
        self.stats.last_reclaimed = reclaimed;

        debug!(
            "gc #{}: marked {}, reclaimed {}, active {}/{}",
            self.stats.collections,
            marked,
            reclaimed,
            self.active_count(),
            self.capacity()
        );
        if reclaimed == 0 {
            warn!("gc reclaimed nothing; all {} slots are live", self.capacity());
        }
        reclaimed
    }

    /// Every slot reachable from the roots, in slot order. Runs a mark
    /// phase and clears the marks again, so the heap is left as it was.
    pub fn reachable_slots(&mut self) -> Vec<Value> {
        self.mark();
        let reachable = self.marked_slots();
        self.clear_marks();
        self.phase = GcPhase::Idle;
        reachable
    }

    /// Mark phase: flag every slot reachable from nil, the symbol list, the
    /// permanent roots and the pins. Returns the number of slots newly marked.
    /// Only `collect` may leave the heap between this and `sweep`.
    pub(crate) fn mark(&mut self) -> usize {
        self.phase = GcPhase::Marking;
        let mut worklist = vec![self.nil, self.symbols];
        worklist.extend(self.roots.iter());

        let mut marked = 0;
        while let Some(v) = worklist.pop() {
            let slot = &mut self.slots[v.index()];
            if slot.mark {
                continue;
            }
            debug_assert!(!slot.object.is_free(), "root reaches free slot {}", v.0);
            slot.mark = true;
            marked += 1;
            slot.object.for_each_child(|child| worklist.push(child));
        }
        marked
    }

    /// Slots currently carrying the mark flag, in slot order.
    pub(crate) fn marked_slots(&self) -> Vec<Value> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.mark)
            .map(|(i, _)| Value(i as u32))
            .collect()
    }

    pub(crate) fn clear_marks(&mut self) {
        for slot in &mut self.slots {
            slot.mark = false;
        }
    }

    /// Sweep phase: return unmarked active slots to the free set, dropping
    /// their payload (which releases string and symbol buffers), and clear
    /// the mark on survivors. Returns the number of slots reclaimed.
    pub(crate) fn sweep(&mut self) -> usize {
        self.phase = GcPhase::Sweeping;
        let mut reclaimed = 0;
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.object.is_free() {
                continue;
            }
            if slot.mark {
                slot.mark = false;
                continue;
            }
            let old = std::mem::replace(&mut slot.object, Object::Free);
            if let Object::Str(text) | Object::Symbol(text) = &old {
                trace!("gc: slot {} releases {} bytes of text", i, text.len());
            }
            self.free_list.push(i as u32);
            reclaimed += 1;
        }
        self.phase = GcPhase::Idle;
        reclaimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_heap(capacity: usize) -> Heap {
        Heap::new(HeapConfig { capacity }).unwrap()
    }

    #[test]
    fn test_new_heap_holds_only_nil() {
        let heap = small_heap(8);
        assert_eq!(heap.capacity(), 8);
        assert_eq!(heap.active_count(), 1);
        assert_eq!(heap.free_count(), 7);
        assert_eq!(heap.kind(heap.nil()), Kind::Nil);
        assert!(heap.check_conservation());
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(matches!(
            Heap::new(HeapConfig { capacity: 0 }),
            Err(LispError::OutOfMemory { capacity: 0 })
        ));
    }

    #[test]
    fn test_unreachable_values_are_reclaimed() {
        let mut heap = small_heap(8);
        heap.make_fixnum(1).unwrap();
        heap.make_str("garbage").unwrap();
        assert_eq!(heap.active_count(), 3);
        assert_eq!(heap.collect(), 2);
        assert_eq!(heap.active_count(), 1);
        assert_eq!(heap.phase(), GcPhase::Idle);
        assert!(heap.check_conservation());
    }

    #[test]
    fn test_alloc_collects_when_exhausted() {
        let mut heap = small_heap(4);
        for i in 0..20 {
            heap.make_fixnum(i).unwrap();
            assert!(heap.check_conservation());
        }
        assert!(heap.stats().collections > 0);
    }

    #[test]
    fn test_out_of_memory_when_everything_is_live() {
        let mut heap = small_heap(3);
        let a = heap.make_fixnum(1).unwrap();
        heap.add_root(a);
        let b = heap.make_fixnum(2).unwrap();
        heap.pin(b);
        assert_eq!(
            heap.make_fixnum(3),
            Err(LispError::OutOfMemory { capacity: 3 })
        );
        assert!(heap.check_conservation());
    }

    #[test]
    fn test_cons_protects_its_children_during_collection() {
        // The arena is full when the cons is requested, so it collects
        // first; the unrooted fixnum survives only because it is a child.
        let mut heap = small_heap(3);
        let n = heap.make_fixnum(42).unwrap();
        heap.make_fixnum(0).unwrap();
        let nil = heap.nil();
        let cell = heap.cons(n, nil).unwrap();
        assert_eq!(heap.stats().collections, 1);
        assert_eq!(heap.as_cell(cell), Some((n, nil)));
        assert_eq!(heap.fixnum(n), Some(42));
    }

    #[test]
    fn test_mark_is_idempotent() {
        let mut heap = small_heap(16);
        let a = heap.make_fixnum(1).unwrap();
        let l = heap.cons(a, a).unwrap();
        heap.add_root(l);
        heap.make_fixnum(2).unwrap();

        heap.mark();
        let first = heap.marked_slots();
        assert_eq!(heap.mark(), 0);
        assert_eq!(heap.marked_slots(), first);
        heap.clear_marks();
        heap.mark();
        assert_eq!(heap.marked_slots(), first);
    }

    #[test]
    fn test_reachable_slots_leaves_heap_idle() {
        let mut heap = small_heap(16);
        let kept = heap.make_fixnum(1).unwrap();
        heap.add_root(kept);
        heap.make_fixnum(2).unwrap();

        let reachable = heap.reachable_slots();
        assert_eq!(reachable, vec![heap.nil(), kept]);
        assert_eq!(heap.phase(), GcPhase::Idle);
        assert!(heap.marked_slots().is_empty());
        assert_eq!(heap.reachable_slots(), reachable);
        // No stale marks: the garbage fixnum is still reclaimed.
        assert_eq!(heap.collect(), 1);
    }

    #[test]
    #[should_panic]
    fn test_value_from_another_heap_is_out_of_range() {
        let mut big = small_heap(16);
        let mut last = big.nil();
        for i in 0..8 {
            last = big.make_fixnum(i).unwrap();
        }
        let small = small_heap(4);
        small.get(last);
    }

    #[test]
    fn test_cycles_terminate_and_are_collected() {
        let mut heap = small_heap(8);
        let nil = heap.nil();
        let a = heap.cons(nil, nil).unwrap();
        heap.set_tail(a, a).unwrap();
        assert!(heap.list_to_vec(a).is_none());
        assert_eq!(heap.collect(), 1);
    }

    #[test]
    fn test_list_builds_in_order() {
        let mut heap = small_heap(16);
        let a = heap.make_fixnum(1).unwrap();
        let b = heap.make_fixnum(2).unwrap();
        let l = heap.list(&[a, b]).unwrap();
        assert_eq!(heap.list_to_vec(l), Some(vec![a, b]));
        assert_eq!(heap.pinned_count(), 0);
    }

    #[test]
    fn test_car_cdr_of_nil_and_atoms() {
        let mut heap = small_heap(8);
        let nil = heap.nil();
        assert_eq!(heap.car(nil), Ok(nil));
        assert_eq!(heap.cdr(nil), Ok(nil));
        let n = heap.make_fixnum(3).unwrap();
        assert!(matches!(heap.car(n), Err(LispError::TypeError(_))));
    }
}
