//! Cheney scavenger over new space.
//!
//! Live new objects are copied to the reserve semispace (or promoted to
//! old space when they already survived one scavenge), a forwarding
//! corpse is installed over each original, and copies are scanned with a
//! scan pointer chasing the allocation pointer. Weak arrays and
//! ephemerons are deferred to pending lists and resolved after the
//! strong scan: weak slots are forwarded or cleared, ephemerons iterate
//! to a fixpoint before their keys are declared dead.
//!
//! The remembered-set bit is reserved but unused, so the whole of old
//! space is treated as a root set and scanned for new-space references.

use std::collections::VecDeque;
use std::mem;
use std::ptr;

use soup_vm_object::*;
use tracing::debug;

use crate::heap::{Heap, install_corpse, set_slot_ref, slot_ref};

struct ScavengeState {
    // Condemned range: the active semispace up to the frontier.
    from_base: usize,
    from_top: usize,
    // Objects below this survived the previous scavenge; promote them.
    survivor_end: usize,
    // Copy destination.
    to_top: usize,
    to_end: usize,
    scan: usize,
    // Promotion destination.
    old_top: usize,
    old_end: usize,
    promoted: VecDeque<usize>,
    weak_arrays: Vec<usize>,
    ephemerons: Vec<usize>,
    promoted_bytes: usize,
    nil: ObjectRef,
}

impl ScavengeState {
    fn in_from_space(&self, addr: usize) -> bool {
        self.from_base <= addr && addr < self.from_top
    }

    /// Has this reference already been secured by the scavenge?
    fn is_reached(&self, reference: ObjectRef) -> bool {
        if !reference.is_heap_object() {
            return true;
        }
        let addr = reference.addr();
        if !self.in_from_space(addr) {
            // Old objects do not move in a scavenge.
            return true;
        }
        // SAFETY: addr is in the condemned semispace, which still holds
        // either live objects or corpses.
        unsafe { HeapObject::at(addr) }.class_id() == FORWARDING_CORPSE_CID
    }

    /// Secure one reference: copy its referent out of the condemned
    /// semispace (or read the corpse) and return the new reference.
    fn forward(&mut self, reference: ObjectRef) -> ObjectRef {
        if !reference.is_heap_object() {
            return reference;
        }
        let addr = reference.addr();
        if !self.in_from_space(addr) {
            return reference;
        }
        // SAFETY: addr is in the condemned semispace.
        let object = unsafe { HeapObject::at(addr) };
        if object.class_id() == FORWARDING_CORPSE_CID {
            return ForwardingCorpse::unchecked(object).target();
        }

        let size = object.heap_size();
        let promote = addr < self.survivor_end;
        let (dst, promoted) = match self.try_promote(size, promote) {
            Some(dst) => (dst, true),
            None => {
                let dst = self.to_top;
                debug_assert!(dst + size <= self.to_end);
                self.to_top += size;
                (dst, false)
            }
        };
        // SAFETY: dst is unused space of at least `size` bytes in the
        // destination space.
        unsafe { ptr::copy_nonoverlapping(addr as *const u8, dst as *mut u8, size) };
        let copy = unsafe { HeapObject::at(dst) };
        install_corpse(object, size, copy.as_ref());
        if promoted {
            self.promoted.push_back(dst);
            self.promoted_bytes += size;
        }
        copy.as_ref()
    }

    fn try_promote(&mut self, size: usize, wanted: bool) -> Option<usize> {
        if !wanted || self.old_top + size > self.old_end {
            // Old space full: fall back to the reserve semispace, which
            // always has room for everything condemned.
            return None;
        }
        let dst = self.old_top;
        self.old_top += size;
        Some(dst)
    }

    fn forward_slot(&mut self, slot_addr: usize) {
        let reference = slot_ref(slot_addr);
        let forwarded = self.forward(reference);
        if forwarded != reference {
            set_slot_ref(slot_addr, forwarded);
        }
    }

    fn scan_range(&mut self, range: PointerRange) {
        for slot_addr in range.iter() {
            self.forward_slot(slot_addr);
        }
    }

    fn scan_object(&mut self, object: HeapObject) {
        match object.class_id() {
            WEAK_ARRAY_CID => self.weak_arrays.push(object.addr()),
            EPHEMERON_CID => {
                let ephemeron = Ephemeron::unchecked(object);
                if self.is_reached(ephemeron.key()) {
                    self.scan_range(object.pointers());
                } else {
                    self.ephemerons.push(object.addr());
                }
            }
            _ => self.scan_range(object.pointers()),
        }
    }

    /// Drain the Cheney scan pointer and the promotion worklist.
    fn process_worklists(&mut self) {
        loop {
            if self.scan < self.to_top {
                // SAFETY: [scan, to_top) holds finished copies.
                let object = unsafe { HeapObject::at(self.scan) };
                self.scan += object.heap_size();
                self.scan_object(object);
                continue;
            }
            if let Some(addr) = self.promoted.pop_front() {
                // SAFETY: promotion destinations are finished copies.
                let object = unsafe { HeapObject::at(addr) };
                self.scan_object(object);
                continue;
            }
            break;
        }
    }

    fn scan_old_space(&mut self, base: usize, top: usize) {
        let mut addr = base;
        while addr < top {
            // SAFETY: old space below the pre-scavenge frontier holds
            // live objects only.
            let object = unsafe { HeapObject::at(addr) };
            addr += object.heap_size();
            self.scan_object(object);
        }
    }

    /// One pass over the pending ephemerons; scans those whose keys have
    /// been reached since. Returns whether any were.
    fn ephemeron_fixpoint_round(&mut self) -> bool {
        let pending = mem::take(&mut self.ephemerons);
        let mut progress = false;
        for addr in pending {
            // SAFETY: pending entries are surviving copies.
            let object = unsafe { HeapObject::at(addr) };
            let ephemeron = Ephemeron::unchecked(object);
            if self.is_reached(ephemeron.key()) {
                self.scan_range(object.pointers());
                progress = true;
            } else {
                self.ephemerons.push(addr);
            }
        }
        progress
    }

    /// The fixpoint is dry: every pending key is dead. Clear keys and
    /// values; the finalizer survives as a root so it can fire once.
    fn mourn_ephemerons(&mut self) {
        for addr in mem::take(&mut self.ephemerons) {
            // SAFETY: pending entries are surviving copies.
            let ephemeron = Ephemeron::unchecked(unsafe { HeapObject::at(addr) });
            let finalizer = self.forward(ephemeron.finalizer());
            ephemeron.set_finalizer(finalizer);
            ephemeron.set_key(self.nil);
            ephemeron.set_value(self.nil);
        }
    }

    /// Weak slots: referents that were copied anyway are forwarded,
    /// referents that stayed behind are cleared to nil.
    fn mourn_weak_arrays(&mut self) {
        for addr in mem::take(&mut self.weak_arrays) {
            // SAFETY: pending entries are surviving copies or old objects.
            let weak = WeakArray::unchecked(unsafe { HeapObject::at(addr) });
            for index in 0..weak.length() {
                let reference = weak.element(index);
                if !reference.is_heap_object() || !self.in_from_space(reference.addr()) {
                    continue;
                }
                // SAFETY: the element points into the condemned semispace.
                let referent = unsafe { HeapObject::from_ref(reference) };
                if referent.class_id() == FORWARDING_CORPSE_CID {
                    weak.set_element(index, ForwardingCorpse::unchecked(referent).target());
                } else {
                    weak.set_element(index, self.nil);
                }
            }
        }
    }
}

impl Heap {
    /// Scavenge new space: copy the live part of the active semispace
    /// into the reserve one, promote second-time survivors, update every
    /// root and old-space reference, then flip the semispaces.
    ///
    /// Triggers a mark/compact afterwards when old space crosses the
    /// configured utilization.
    pub fn scavenge(&mut self) {
        let old_top_snapshot = self.old_top;
        let mut state = ScavengeState {
            from_base: self.from_space.base,
            from_top: self.top,
            survivor_end: self.survivor_end,
            to_top: self.to_space.base,
            to_end: self.to_space.end,
            scan: self.to_space.base,
            old_top: self.old_top,
            old_end: self.old_end,
            promoted: VecDeque::new(),
            weak_arrays: Vec::new(),
            ephemerons: Vec::new(),
            promoted_bytes: 0,
            nil: self.nil_ref(),
        };

        self.visit_root_slots(&mut |slot| {
            let forwarded = state.forward(*slot);
            if forwarded != *slot {
                *slot = forwarded;
            }
        });
        state.scan_old_space(self.old_base, old_top_snapshot);

        loop {
            loop {
                state.process_worklists();
                if !state.ephemeron_fixpoint_round() {
                    break;
                }
            }
            if state.ephemerons.is_empty() {
                break;
            }
            // Mourning scavenges finalizers, which creates new work, so
            // loop back through the strong scan.
            state.mourn_ephemerons();
        }
        state.mourn_weak_arrays();

        mem::swap(&mut self.from_space, &mut self.to_space);
        self.top = state.to_top;
        self.end = self.from_space.end;
        self.survivor_end = self.top;
        self.old_top = state.old_top;

        self.stats.scavenges += 1;
        self.stats.last_survived_bytes = self.new_space_used() + state.promoted_bytes;
        self.stats.last_promoted_bytes = state.promoted_bytes;
        debug!(
            survived = self.stats.last_survived_bytes,
            promoted = state.promoted_bytes,
            scavenges = self.stats.scavenges,
            "scavenge complete"
        );

        if self.should_compact() {
            self.mark_compact();
        }
    }
}
