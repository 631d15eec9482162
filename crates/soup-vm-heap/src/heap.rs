//! The managed heap: spaces, allocation, identity hashes, class table and
//! the object walk.
//!
//! New space is a pair of semispaces bump-allocated from the low end; old
//! space is a single region grown by promotion and reshaped by
//! mark/compact. Semispace bases are offset by one word so that every new
//! object's address carries the generation bit, while old space sits at
//! the even offset; generation checks never consult the heap.

use std::ptr;

use soup_vm_object::object::{self, SIZE_TAG_OVERFLOW};
use soup_vm_object::*;
use tracing::error;

use crate::region::Region;
use crate::roots::RootSet;

/// Heap sizing knobs.
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Capacity of each new-space semispace (default 1 MiB).
    pub new_space_size: usize,
    /// Capacity of old space (default 16 MiB).
    pub old_space_size: usize,
    /// Old-space utilization that triggers a mark/compact after a
    /// scavenge (default 0.75).
    pub old_gc_ratio: f64,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            new_space_size: MB,
            old_space_size: 16 * MB,
            old_gc_ratio: 0.75,
        }
    }
}

/// Collection counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapStats {
    /// Completed scavenges.
    pub scavenges: u64,
    /// Completed mark/compact passes.
    pub compactions: u64,
    /// Bytes surviving the last scavenge (both destinations).
    pub last_survived_bytes: usize,
    /// Bytes promoted to old space by the last scavenge.
    pub last_promoted_bytes: usize,
    /// Bytes reclaimed by the last mark/compact.
    pub last_compacted_bytes: usize,
}

pub(crate) struct SemiSpace {
    _region: Region,
    pub base: usize,
    pub end: usize,
}

impl SemiSpace {
    fn reserve(capacity: usize) -> SemiSpace {
        debug_assert_eq!(capacity & OBJECT_ALIGNMENT_MASK, 0);
        let region = Region::reserve(capacity + OBJECT_ALIGNMENT);
        // Offset the base so every object address carries the new-space
        // generation bit.
        let base = region.base() + NEW_OBJECT_ALIGNMENT_OFFSET;
        SemiSpace { base, end: base + capacity, _region: region }
    }
}

/// The object memory: a bump-allocating nursery plus an old generation,
/// with a scavenger and a mark/compact collector.
pub struct Heap {
    config: HeapConfig,
    pub(crate) from_space: SemiSpace,
    pub(crate) to_space: SemiSpace,
    /// New-space allocation frontier.
    pub(crate) top: usize,
    /// New-space allocation limit.
    pub(crate) end: usize,
    /// Objects below this address survived the previous scavenge and are
    /// promoted on their next copy.
    pub(crate) survivor_end: usize,

    _old_region: Region,
    pub(crate) old_base: usize,
    pub(crate) old_top: usize,
    pub(crate) old_end: usize,

    identity_hash_state: usize,
    string_hash_salt: usize,

    class_table: Vec<ObjectRef>,
    object_store: ObjectRef,
    nil: ObjectRef,
    pub(crate) roots: Option<Box<dyn RootSet>>,

    pub(crate) stats: HeapStats,
}

impl Heap {
    /// A heap with default sizing.
    pub fn new() -> Heap {
        Heap::with_config(HeapConfig::default())
    }

    /// A heap with explicit sizing.
    pub fn with_config(config: HeapConfig) -> Heap {
        let new_size = allocation_size(config.new_space_size.max(4 * KB));
        let old_size = allocation_size(config.old_space_size.max(16 * KB));
        let from_space = SemiSpace::reserve(new_size);
        let to_space = SemiSpace::reserve(new_size);
        let old_region = Region::reserve(old_size);
        let old_base = old_region.base();

        let entropy = soup_vm_platform::current_monotonic_micros() as usize ^ old_base;
        let mut heap = Heap {
            top: from_space.base,
            end: from_space.end,
            survivor_end: from_space.base,
            from_space,
            to_space,
            old_base,
            old_top: old_base,
            old_end: old_base + old_size,
            _old_region: old_region,
            identity_hash_state: mix(entropy ^ 0x517C_C1B7),
            string_hash_salt: mix(entropy ^ 0x2545_F491),
            class_table: Vec::new(),
            object_store: ObjectRef::small(0),
            nil: ObjectRef::small(0),
            roots: None,
            stats: HeapStats::default(),
            config,
        };

        // Weak slots are cleared to nil before any snapshot is loaded, so
        // the heap bootstraps a canonical nil: a zero-slot regular object
        // in old space. The deserializer may re-class it.
        let nil = heap.allocate_old(FIRST_REGULAR_OBJECT_CID, RegularObject::footprint(0));
        heap.nil = nil.as_ref();
        heap.object_store = heap.nil;
        heap.class_table = vec![heap.nil; FIRST_REGULAR_OBJECT_CID];
        heap
    }

    // -----------------------------------------------------------------------
    // Allocation
    // -----------------------------------------------------------------------

    /// Allocate an object of class `cid` spanning `size` bytes (header
    /// included, already alignment-rounded by the per-kind footprint).
    ///
    /// The object is zeroed except for its header; every reference slot
    /// initially reads as smi 0. Exhaustion of both generations after a
    /// full collection aborts the process.
    pub fn allocate(&mut self, cid: Cid, size: usize) -> HeapObject {
        debug_assert!(cid != ILLEGAL_CID && cid != FORWARDING_CORPSE_CID);
        debug_assert_eq!(size & OBJECT_ALIGNMENT_MASK, 0);
        debug_assert!(size > 0);

        if size > self.new_space_capacity() {
            return self.allocate_old(cid, size);
        }
        if self.top + size > self.end {
            self.scavenge();
            if self.top + size > self.end {
                // The nursery is still full of survivors; old space is the
                // last resort before giving up.
                return self.allocate_old(cid, size);
            }
        }
        let addr = self.top;
        self.top += size;
        // The semispace may hold stale bytes from before the last flip.
        unsafe {
            ptr::write_bytes(addr as *mut u8, 0, size);
            HeapObject::initialize(addr, cid, size)
        }
    }

    fn allocate_old(&mut self, cid: Cid, size: usize) -> HeapObject {
        if self.old_top + size > self.old_end {
            self.mark_compact();
            if self.old_top + size > self.old_end {
                self.out_of_memory(size);
            }
        }
        let addr = self.old_top;
        self.old_top += size;
        unsafe {
            ptr::write_bytes(addr as *mut u8, 0, size);
            HeapObject::initialize(addr, cid, size)
        }
    }

    fn out_of_memory(&self, size: usize) -> ! {
        error!(
            requested = size,
            new_used = self.new_space_used(),
            old_used = self.old_space_used(),
            "heap exhausted after full collection"
        );
        soup_vm_platform::abort();
    }

    /// Allocate an array of `length` nil-able slots (initially smi 0).
    pub fn new_array(&mut self, length: usize) -> Array {
        let object = self.allocate(ARRAY_CID, Array::footprint(length));
        let array = Array::cast(object);
        array.set_size(ObjectRef::small(length as isize));
        array
    }

    /// Allocate a weak array of `length` slots.
    pub fn new_weak_array(&mut self, length: usize) -> WeakArray {
        let object = self.allocate(WEAK_ARRAY_CID, WeakArray::footprint(length));
        let array = WeakArray::cast(object);
        array.set_size(ObjectRef::small(length as isize));
        array
    }

    /// Allocate an ephemeron with key, value and finalizer set to nil.
    pub fn new_ephemeron(&mut self) -> Ephemeron {
        let object = self.allocate(EPHEMERON_CID, Ephemeron::footprint());
        // Read nil after the allocation: a triggered compaction moves it.
        let nil = self.nil;
        let ephemeron = Ephemeron::cast(object);
        ephemeron.set_key(nil);
        ephemeron.set_value(nil);
        ephemeron.set_finalizer(nil);
        ephemeron
    }

    /// Allocate a byte array of `length` zero bytes.
    pub fn new_byte_array(&mut self, length: usize) -> ByteArray {
        let object = self.allocate(BYTE_ARRAY_CID, ByteArray::footprint(length));
        let array = ByteArray::cast(object);
        array.set_size(ObjectRef::small(length as isize));
        array
    }

    /// Allocate a byte string holding `bytes`.
    pub fn new_byte_string(&mut self, bytes: &[u8]) -> ByteString {
        let object = self.allocate(BYTE_STRING_CID, ByteString::footprint(bytes.len()));
        let string = ByteString::cast(object);
        string.set_size(ObjectRef::small(bytes.len() as isize));
        string.set_hash(ObjectRef::small(0));
        string.copy_from_slice(bytes);
        string
    }

    /// Allocate a wide string holding `units`.
    pub fn new_wide_string(&mut self, units: &[u32]) -> WideString {
        let object = self.allocate(WIDE_STRING_CID, WideString::footprint(units.len()));
        let string = WideString::cast(object);
        string.set_size(ObjectRef::small(units.len() as isize));
        string.set_hash(ObjectRef::small(0));
        for (index, unit) in units.iter().enumerate() {
            string.set_element(index, *unit);
        }
        string
    }

    /// Allocate a boxed 64-bit integer.
    pub fn new_medium_integer(&mut self, value: i64) -> MediumInteger {
        let object = self.allocate(MEDIUM_INTEGER_CID, MediumInteger::footprint());
        let mint = MediumInteger::cast(object);
        mint.set_value(value);
        mint
    }

    /// Allocate a boxed double.
    pub fn new_float64(&mut self, value: f64) -> Float64 {
        let object = self.allocate(FLOAT64_CID, Float64::footprint());
        let float = Float64::cast(object);
        float.set_value(value);
        float
    }

    /// Allocate a large integer from little-endian machine-word digits.
    pub fn new_large_integer(&mut self, negative: bool, digits: &[usize]) -> LargeInteger {
        let object = self.allocate(LARGE_INTEGER_CID, LargeInteger::footprint(digits.len()));
        let big = LargeInteger::cast(object);
        big.set_negative(negative);
        big.set_digit_count(digits.len());
        for (index, digit) in digits.iter().enumerate() {
            big.set_digit(index, *digit);
        }
        big
    }

    /// Allocate an empty activation frame.
    pub fn new_activation(&mut self) -> Activation {
        let object = self.allocate(ACTIVATION_CID, Activation::footprint());
        let activation = Activation::cast(object);
        activation.set_stack_depth(0);
        activation
    }

    /// Allocate a closure with `num_copied` copied-value slots.
    pub fn new_closure(&mut self, num_copied: usize) -> Closure {
        let object = self.allocate(CLOSURE_CID, Closure::footprint(num_copied));
        let closure = Closure::cast(object);
        closure.set_num_copied(num_copied);
        closure
    }

    /// Allocate a regular object of `num_slots` reference slots.
    pub fn new_regular_object(&mut self, cid: Cid, num_slots: usize) -> RegularObject {
        debug_assert!(cid >= FIRST_REGULAR_OBJECT_CID);
        let object = self.allocate(cid, RegularObject::footprint(num_slots));
        RegularObject::cast(object)
    }

    // -----------------------------------------------------------------------
    // Identity and content hashes
    // -----------------------------------------------------------------------

    /// The identity hash of a heap object, assigning it on first query.
    /// Nonzero, stable across collections.
    pub fn identity_hash(&mut self, reference: ObjectRef) -> ObjectRef {
        debug_assert!(reference.is_heap_object());
        // SAFETY: the caller hands in a reference into this heap.
        let object = unsafe { HeapObject::from_ref(reference) };
        if object.identity_hash() == 0 {
            object.set_identity_hash(self.next_identity_hash());
        }
        ObjectRef::small(object.identity_hash() as isize)
    }

    fn next_identity_hash(&mut self) -> usize {
        loop {
            let mut x = self.identity_hash_state;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.identity_hash_state = x;
            let hash = x & 0x3FF_FFFF;
            if hash != 0 {
                return hash;
            }
        }
    }

    /// The salt mixed into string content hashes.
    pub fn string_hash_salt(&self) -> usize {
        self.string_hash_salt
    }

    // -----------------------------------------------------------------------
    // Well-known references and classes
    // -----------------------------------------------------------------------

    /// The canonical nil object.
    pub fn nil_ref(&self) -> ObjectRef {
        self.nil
    }

    /// The object store, or nil before the deserializer installs one.
    pub fn object_store(&self) -> ObjectRef {
        self.object_store
    }

    /// Install the object store.
    pub fn set_object_store(&mut self, store: ObjectRef) {
        self.object_store = store;
    }

    /// The Behavior registered for `cid`, or nil.
    pub fn class_at(&self, cid: Cid) -> ObjectRef {
        self.class_table.get(cid).copied().unwrap_or(self.nil)
    }

    /// Register the Behavior describing instances of `cid`.
    pub fn register_class(&mut self, cid: Cid, behavior: ObjectRef) {
        if self.class_table.len() <= cid {
            self.class_table.resize(cid + 1, self.nil);
        }
        self.class_table[cid] = behavior;
    }

    /// Lowest class identifier with no registered Behavior.
    pub fn next_class_id(&self) -> Cid {
        self.class_table.len().max(FIRST_REGULAR_OBJECT_CID)
    }

    /// The Behavior of the object `reference` points to (the class table
    /// entry for its class identifier).
    pub fn behavior_of(&self, reference: ObjectRef) -> ObjectRef {
        // SAFETY: the caller hands in a reference into this heap.
        self.class_at(unsafe { reference.class_id() })
    }

    /// Install the root provider consulted by both collectors.
    pub fn register_roots(&mut self, roots: Box<dyn RootSet>) {
        self.roots = Some(roots);
    }

    pub(crate) fn visit_root_slots(&mut self, visitor: &mut dyn FnMut(&mut ObjectRef)) {
        visitor(&mut self.nil);
        visitor(&mut self.object_store);
        let mut table = std::mem::take(&mut self.class_table);
        for slot in table.iter_mut() {
            visitor(slot);
        }
        self.class_table = table;
        let mut roots = self.roots.take();
        if let Some(root_set) = roots.as_mut() {
            root_set.visit_roots(visitor);
        }
        self.roots = roots;
    }

    // -----------------------------------------------------------------------
    // Walking and measurement
    // -----------------------------------------------------------------------

    /// Visit every live object, old space first, then new space, stopping
    /// at the allocation frontiers. Safe between collections; forwarding
    /// corpses are never visited.
    pub fn walk(&self, mut visit: impl FnMut(HeapObject)) {
        let mut addr = self.old_base;
        while addr < self.old_top {
            // SAFETY: the walk steps object-to-object below the frontier.
            let object = unsafe { HeapObject::at(addr) };
            debug_assert_ne!(object.class_id(), FORWARDING_CORPSE_CID);
            addr += object.heap_size();
            visit(object);
        }
        let mut addr = self.from_space.base;
        while addr < self.top {
            // SAFETY: as above.
            let object = unsafe { HeapObject::at(addr) };
            debug_assert_ne!(object.class_id(), FORWARDING_CORPSE_CID);
            addr += object.heap_size();
            visit(object);
        }
    }

    /// Bytes in use in new space.
    pub fn new_space_used(&self) -> usize {
        self.top - self.from_space.base
    }

    /// Capacity of one new-space semispace.
    pub fn new_space_capacity(&self) -> usize {
        self.end - self.from_space.base
    }

    /// Bytes in use in old space.
    pub fn old_space_used(&self) -> usize {
        self.old_top - self.old_base
    }

    /// Capacity of old space.
    pub fn old_space_capacity(&self) -> usize {
        self.old_end - self.old_base
    }

    /// Collection counters.
    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    pub(crate) fn should_compact(&self) -> bool {
        self.old_space_used() as f64 > self.config.old_gc_ratio * self.old_space_capacity() as f64
    }
}

impl Default for Heap {
    fn default() -> Heap {
        Heap::new()
    }
}

/// One 64-bit finalizer step, for seeding per-heap hash state.
fn mix(seed: usize) -> usize {
    let mut z = (seed as u64).wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    (z ^ (z >> 31)) as usize
}

/// Install a forwarding corpse over a dead or moved object.
///
/// `size` must be the object's footprint, measured before the header is
/// rewritten. The corpse records it explicitly when the size tag was the
/// overflow sentinel, so space walks can still step over it.
pub(crate) fn install_corpse(object: HeapObject, size: usize, target: ObjectRef) {
    let tag_overflowed = object.size_tag() == SIZE_TAG_OVERFLOW;
    object.set_class_id(FORWARDING_CORPSE_CID);
    let corpse = ForwardingCorpse::unchecked(object);
    corpse.set_target(target);
    if tag_overflowed {
        corpse.set_overflow_size(size);
    }
}

/// Read a reference slot by address.
pub(crate) fn slot_ref(slot_addr: usize) -> ObjectRef {
    // SAFETY: collectors only pass slot addresses produced by pointer
    // enumeration over live objects.
    unsafe { object::load_ref(slot_addr) }
}

/// Write a reference slot by address.
pub(crate) fn set_slot_ref(slot_addr: usize, value: ObjectRef) {
    // SAFETY: as for `slot_ref`.
    unsafe { object::store_ref(slot_addr, value) }
}
