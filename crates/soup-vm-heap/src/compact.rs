//! Mark/compact collector over old space.
//!
//! Marking traces both generations from the roots with the same weak and
//! ephemeron discipline as the scavenger. Compaction then makes three
//! passes over old space: build a forwarding table while installing
//! corpses over the dead, rewrite every live reference (roots, old and
//! new space) through the table, and slide the survivors left. Only old
//! objects move; new-space references pass through untouched.

use std::collections::VecDeque;
use std::mem;
use std::ptr;

use rustc_hash::FxHashMap;
use soup_vm_object::*;
use tracing::debug;

use crate::heap::{Heap, install_corpse, set_slot_ref, slot_ref};

struct MarkState {
    worklist: VecDeque<usize>,
    weak_arrays: Vec<usize>,
    ephemerons: Vec<usize>,
    nil: ObjectRef,
}

impl MarkState {
    fn new(nil: ObjectRef) -> MarkState {
        MarkState {
            worklist: VecDeque::new(),
            weak_arrays: Vec::new(),
            ephemerons: Vec::new(),
            nil,
        }
    }

    fn is_reached(&self, reference: ObjectRef) -> bool {
        if !reference.is_heap_object() {
            return true;
        }
        // SAFETY: marking only sees references into the live heap.
        unsafe { HeapObject::from_ref(reference) }.is_marked()
    }

    fn mark_ref(&mut self, reference: ObjectRef) {
        if !reference.is_heap_object() {
            return;
        }
        // SAFETY: as in `is_reached`.
        let object = unsafe { HeapObject::from_ref(reference) };
        if !object.is_marked() {
            object.set_is_marked(true);
            self.worklist.push_back(object.addr());
        }
    }

    fn mark_range(&mut self, range: PointerRange) {
        for slot_addr in range.iter() {
            self.mark_ref(slot_ref(slot_addr));
        }
    }

    fn process(&mut self) {
        while let Some(addr) = self.worklist.pop_front() {
            // SAFETY: worklist entries are marked live objects.
            let object = unsafe { HeapObject::at(addr) };
            match object.class_id() {
                WEAK_ARRAY_CID => self.weak_arrays.push(addr),
                EPHEMERON_CID => {
                    let ephemeron = Ephemeron::unchecked(object);
                    if self.is_reached(ephemeron.key()) {
                        self.mark_range(object.pointers());
                    } else {
                        self.ephemerons.push(addr);
                    }
                }
                _ => self.mark_range(object.pointers()),
            }
        }
    }

    fn ephemeron_fixpoint_round(&mut self) -> bool {
        let pending = mem::take(&mut self.ephemerons);
        let mut progress = false;
        for addr in pending {
            // SAFETY: pending entries are marked live objects.
            let object = unsafe { HeapObject::at(addr) };
            let ephemeron = Ephemeron::unchecked(object);
            if self.is_reached(ephemeron.key()) {
                self.mark_range(object.pointers());
                progress = true;
            } else {
                self.ephemerons.push(addr);
            }
        }
        progress
    }

    fn mourn_ephemerons(&mut self) {
        for addr in mem::take(&mut self.ephemerons) {
            // SAFETY: pending entries are marked live objects.
            let ephemeron = Ephemeron::unchecked(unsafe { HeapObject::at(addr) });
            // Keep the finalizer alive so it can fire once.
            self.mark_ref(ephemeron.finalizer());
            ephemeron.set_key(self.nil);
            ephemeron.set_value(self.nil);
        }
    }

    fn mourn_weak_arrays(&mut self) {
        for addr in mem::take(&mut self.weak_arrays) {
            // SAFETY: pending entries are marked live objects.
            let weak = WeakArray::unchecked(unsafe { HeapObject::at(addr) });
            for index in 0..weak.length() {
                let reference = weak.element(index);
                if reference.is_heap_object() && !self.is_reached(reference) {
                    weak.set_element(index, self.nil);
                }
            }
        }
    }
}

/// Map an old-space reference to its post-slide address. Dead referents
/// (reachable only from dead new-space objects) become nil so a later
/// walk never reads a stale address.
fn rewrite(reference: ObjectRef, forwarding: &FxHashMap<usize, usize>, nil: ObjectRef) -> ObjectRef {
    if !reference.is_heap_object() || reference.is_new_object() {
        return reference;
    }
    match forwarding.get(&reference.addr()) {
        Some(&dst) => ObjectRef::from_addr(dst),
        None => nil,
    }
}

fn rewrite_range(range: PointerRange, forwarding: &FxHashMap<usize, usize>, nil: ObjectRef) {
    for slot_addr in range.iter() {
        let reference = slot_ref(slot_addr);
        let rewritten = rewrite(reference, forwarding, nil);
        if rewritten != reference {
            set_slot_ref(slot_addr, rewritten);
        }
    }
}

impl Heap {
    /// Mark both generations from the roots, then compact old space,
    /// rewriting every live reference to its post-slide address.
    pub fn mark_compact(&mut self) {
        let old_used_before = self.old_space_used();

        // Mark.
        let mut state = MarkState::new(self.nil_ref());
        self.visit_root_slots(&mut |slot| state.mark_ref(*slot));
        loop {
            loop {
                state.process();
                if !state.ephemeron_fixpoint_round() {
                    break;
                }
            }
            if state.ephemerons.is_empty() {
                break;
            }
            state.mourn_ephemerons();
        }
        state.mourn_weak_arrays();

        // Plan the slide; the dead become corpses so the sweeps below can
        // still step over them.
        let mut forwarding = FxHashMap::default();
        let mut new_top = self.old_base;
        let mut addr = self.old_base;
        while addr < self.old_top {
            // SAFETY: stepping object-to-object below the frontier.
            let object = unsafe { HeapObject::at(addr) };
            let size = object.heap_size();
            if object.is_marked() {
                forwarding.insert(addr, new_top);
                new_top += size;
            } else {
                install_corpse(object, size, ObjectRef::small(0));
            }
            addr += size;
        }

        // Rewrite references before anything moves. The fallback nil must
        // itself be a post-slide address.
        let new_nil = rewrite(self.nil_ref(), &forwarding, self.nil_ref());
        self.visit_root_slots(&mut |slot| *slot = rewrite(*slot, &forwarding, new_nil));
        let mut addr = self.old_base;
        while addr < self.old_top {
            // SAFETY: as above; corpses report their recorded size.
            let object = unsafe { HeapObject::at(addr) };
            let size = object.heap_size();
            if object.is_marked() {
                rewrite_range(object.pointers(), &forwarding, new_nil);
            }
            addr += size;
        }
        let mut addr = self.from_space.base;
        while addr < self.top {
            // Dead new objects are rewritten too (their dead referents
            // become nil), keeping the next walk safe.
            // SAFETY: as above.
            let object = unsafe { HeapObject::at(addr) };
            addr += object.heap_size();
            rewrite_range(object.pointers(), &forwarding, new_nil);
        }

        // Slide left. Destinations never overtake sources, so overlapping
        // moves are ordinary memmoves.
        let mut addr = self.old_base;
        while addr < self.old_top {
            // SAFETY: as above.
            let object = unsafe { HeapObject::at(addr) };
            let size = object.heap_size();
            if object.is_marked() {
                let dst = forwarding[&addr];
                if dst != addr {
                    // SAFETY: dst <= addr and both lie in old space.
                    unsafe { ptr::copy(addr as *const u8, dst as *mut u8, size) };
                }
                // SAFETY: dst now holds the moved object.
                unsafe { HeapObject::at(dst) }.set_is_marked(false);
            }
            addr += size;
        }
        self.old_top = new_top;

        // Marks in new space belong to this cycle only.
        let mut addr = self.from_space.base;
        while addr < self.top {
            // SAFETY: as above.
            let object = unsafe { HeapObject::at(addr) };
            object.set_is_marked(false);
            addr += object.heap_size();
        }

        self.stats.compactions += 1;
        self.stats.last_compacted_bytes = old_used_before - self.old_space_used();
        debug!(
            reclaimed = self.stats.last_compacted_bytes,
            old_used = self.old_space_used(),
            compactions = self.stats.compactions,
            "mark/compact complete"
        );
    }
}
