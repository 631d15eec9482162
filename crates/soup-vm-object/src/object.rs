//! Tagged references and heap object layouts.
//!
//! Every runtime value is one machine word. The low bit discriminates:
//! an even word is a small integer (the value shifted left once), an odd
//! word is a heap reference pointing one byte past an aligned object
//! header. [`ObjectRef`] is the tagged word; [`HeapObject`] is the
//! untagged base address of a live object, with accessors for the header
//! bit-fields, the identity hash, and the per-kind field layouts.
//!
//! ## Object framing
//!
//! ```text
//! word 0   header: flag bits | size in alignment units | class id
//! word 1   identity hash (0 until first queried)
//! word 2+  kind-specific fields and inline payload
//! ```
//!
//! The collector never dispatches on kinds directly: [`HeapObject::pointers`]
//! folds every layout into one inclusive range of reference slots.

use core::fmt;

use crate::bitfield;
use crate::globals::*;

/// Class identifier: the layout tag stored in every object header.
pub type Cid = usize;

// ---------------------------------------------------------------------------
// Tagging
// ---------------------------------------------------------------------------

/// Tag value of a small integer.
pub const SMI_TAG: usize = 0;
/// Tag value of a heap reference.
pub const HEAP_OBJECT_TAG: usize = 1;
/// Mask selecting the tag bit.
pub const TAG_MASK: usize = 1;
/// Shift applied to encode a small integer.
pub const TAG_SHIFT: u32 = 1;

// ---------------------------------------------------------------------------
// Header bits
// ---------------------------------------------------------------------------

/// During a collection: has this object been marked or copied?
pub const MARK_BIT: u32 = 0;
/// Added to the remembered set (reserved, currently unused).
pub const REMEMBERED_BIT: u32 = 1;
/// Interned symbol flag.
pub const CANONICAL_BIT: u32 = 2;
/// Reserved.
pub const IN_CLASS_TABLE_BIT: u32 = 3;
/// Is this object an ephemeron key? (reserved)
pub const WATCHED_BIT: u32 = 4;
/// Trap stores into this object (reserved).
pub const SHALLOW_IMMUTABLE_BIT: u32 = 5;
/// Transitively immutable (reserved).
pub const DEEP_IMMUTABLE_BIT: u32 = 6;

/// Bit offset of the size field.
#[cfg(target_pointer_width = "32")]
pub const SIZE_FIELD_OFFSET: u32 = 8;
/// Width of the size field in bits.
#[cfg(target_pointer_width = "32")]
pub const SIZE_FIELD_SIZE: u32 = 8;
/// Bit offset of the class-id field.
#[cfg(target_pointer_width = "32")]
pub const CLASS_ID_FIELD_OFFSET: u32 = 16;
/// Width of the class-id field in bits.
#[cfg(target_pointer_width = "32")]
pub const CLASS_ID_FIELD_SIZE: u32 = 16;

/// Bit offset of the size field.
#[cfg(target_pointer_width = "64")]
pub const SIZE_FIELD_OFFSET: u32 = 16;
/// Width of the size field in bits.
#[cfg(target_pointer_width = "64")]
pub const SIZE_FIELD_SIZE: u32 = 16;
/// Bit offset of the class-id field.
#[cfg(target_pointer_width = "64")]
pub const CLASS_ID_FIELD_OFFSET: u32 = 32;
/// Width of the class-id field in bits.
#[cfg(target_pointer_width = "64")]
pub const CLASS_ID_FIELD_SIZE: u32 = 32;

/// Size-field sentinel: the true size exceeds the field and must be
/// computed from the class layout. Legal only for variable-length
/// built-in kinds.
pub const SIZE_TAG_OVERFLOW: usize = 0;

// ---------------------------------------------------------------------------
// Class identifiers
// ---------------------------------------------------------------------------

/// Never a valid class.
pub const ILLEGAL_CID: Cid = 0;
/// Header class of an object overwritten by a forwarding corpse.
pub const FORWARDING_CORPSE_CID: Cid = 1;
/// First class identifier a live object may carry.
pub const FIRST_LEGAL_CID: Cid = 2;
/// Small integer (immediate; never in an allocated header).
pub const SMI_CID: Cid = 2;
/// 64-bit boxed integer.
pub const MEDIUM_INTEGER_CID: Cid = 3;
/// Arbitrary-precision integer.
pub const LARGE_INTEGER_CID: Cid = 4;
/// IEEE-754 double.
pub const FLOAT64_CID: Cid = 5;
/// Raw byte vector.
pub const BYTE_ARRAY_CID: Cid = 6;
/// Byte-encoded string.
pub const BYTE_STRING_CID: Cid = 7;
/// 32-bit code unit string.
pub const WIDE_STRING_CID: Cid = 8;
/// Pointer array.
pub const ARRAY_CID: Cid = 9;
/// Pointer array with weak elements.
pub const WEAK_ARRAY_CID: Cid = 10;
/// Key/value/finalizer triple with ephemeron liveness.
pub const EPHEMERON_CID: Cid = 11;
/// Suspended method invocation frame.
pub const ACTIVATION_CID: Cid = 12;
/// Block closure.
pub const CLOSURE_CID: Cid = 13;
/// Everything from here up is a regular fixed-slot object.
pub const FIRST_REGULAR_OBJECT_CID: Cid = 14;

// ---------------------------------------------------------------------------
// ObjectRef
// ---------------------------------------------------------------------------

/// A tagged machine word: either an immediate small integer or a heap
/// reference.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef(usize);

impl ObjectRef {
    /// Encode a small integer. Out-of-range values are a programming error.
    pub fn small(value: isize) -> ObjectRef {
        debug_assert!(Self::is_small_value(value as i64));
        ObjectRef((value as usize) << TAG_SHIFT)
    }

    /// Decode a small integer.
    pub fn small_value(self) -> isize {
        debug_assert!(self.is_small_integer());
        (self.0 as isize) >> TAG_SHIFT
    }

    /// Does `value` fit the small-integer range?
    pub const fn is_small_value(value: i64) -> bool {
        value >= SMI_MIN as i64 && value <= SMI_MAX as i64
    }

    /// Is this an immediate small integer?
    pub const fn is_small_integer(self) -> bool {
        self.0 & TAG_MASK == SMI_TAG
    }

    /// Is this a heap reference?
    pub const fn is_heap_object(self) -> bool {
        self.0 & TAG_MASK == HEAP_OBJECT_TAG
    }

    /// Does this heap reference point into new space?
    pub fn is_new_object(self) -> bool {
        debug_assert!(self.is_heap_object());
        self.0 & NEW_OBJECT_ALIGNMENT_OFFSET != OLD_OBJECT_ALIGNMENT_OFFSET
    }

    /// Does this heap reference point into old space?
    pub fn is_old_object(self) -> bool {
        debug_assert!(self.is_heap_object());
        self.0 & NEW_OBJECT_ALIGNMENT_OFFSET == OLD_OBJECT_ALIGNMENT_OFFSET
    }

    /// `!is_heap_object() || is_old_object()`, as a single branch.
    pub const fn is_immediate_or_old(self) -> bool {
        const NEW_OBJECT_BITS: usize = NEW_OBJECT_ALIGNMENT_OFFSET | HEAP_OBJECT_TAG;
        self.0 & NEW_OBJECT_BITS != NEW_OBJECT_BITS
    }

    /// Base address of the referenced object header.
    pub fn addr(self) -> usize {
        debug_assert!(self.is_heap_object());
        self.0 - HEAP_OBJECT_TAG
    }

    /// Tag an aligned header address as a heap reference.
    pub fn from_addr(addr: usize) -> ObjectRef {
        debug_assert!(addr & OBJECT_ALIGNMENT_MASK == 0 || addr & OBJECT_ALIGNMENT_MASK == NEW_OBJECT_ALIGNMENT_OFFSET);
        ObjectRef(addr + HEAP_OBJECT_TAG)
    }

    /// The raw tagged word.
    pub const fn raw(self) -> usize {
        self.0
    }

    /// Reinterpret a raw tagged word.
    pub const fn from_raw(raw: usize) -> ObjectRef {
        ObjectRef(raw)
    }

    /// Class identifier: [`SMI_CID`] for immediates, otherwise read from
    /// the header.
    ///
    /// # Safety
    ///
    /// For heap references, the referenced object must be live.
    pub unsafe fn class_id(self) -> Cid {
        if self.is_small_integer() {
            SMI_CID
        } else {
            unsafe { HeapObject::from_ref(self) }.class_id()
        }
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_small_integer() {
            write!(f, "smi({})", self.small_value())
        } else {
            write!(f, "obj@{:#x}", self.addr())
        }
    }
}

// ---------------------------------------------------------------------------
// PointerRange
// ---------------------------------------------------------------------------

/// Inclusive range of reference-slot addresses inside one heap object.
///
/// An empty range is encoded as `to < from`, so a collector can always
/// loop `from..=to` by word steps with no per-kind code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PointerRange {
    /// Address of the first reference slot.
    pub from: usize,
    /// Address of the last reference slot (inclusive).
    pub to: usize,
}

impl PointerRange {
    /// A range containing no slots.
    pub const fn empty_at(addr: usize) -> PointerRange {
        PointerRange { from: addr, to: addr - WORD_SIZE }
    }

    /// Does the range contain no slots?
    pub const fn is_empty(&self) -> bool {
        self.to < self.from
    }

    /// Number of slots in the range.
    pub const fn len(&self) -> usize {
        if self.is_empty() { 0 } else { (self.to - self.from) / WORD_SIZE + 1 }
    }

    /// Iterate the slot addresses.
    pub fn iter(&self) -> impl Iterator<Item = usize> + use<> {
        (self.from..=self.to).step_by(WORD_SIZE)
    }
}

/// Read the reference stored at a slot address.
///
/// # Safety
///
/// `slot_addr` must be a word-aligned slot inside a live heap object.
pub unsafe fn load_ref(slot_addr: usize) -> ObjectRef {
    ObjectRef::from_raw(unsafe { core::ptr::read(slot_addr as *const usize) })
}

/// Store a reference into a slot address.
///
/// # Safety
///
/// `slot_addr` must be a word-aligned slot inside a live heap object.
pub unsafe fn store_ref(slot_addr: usize, value: ObjectRef) {
    unsafe { core::ptr::write(slot_addr as *mut usize, value.raw()) }
}

// ---------------------------------------------------------------------------
// HeapObject
// ---------------------------------------------------------------------------

/// Untagged base address of a live heap object.
///
/// Construction is the safety boundary: a `HeapObject` may only be built
/// over the header of a live, initialized object, after which the
/// accessors are ordinary (aligned, in-bounds) loads and stores.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapObject(usize);

impl HeapObject {
    /// Wrap the object whose header starts at `addr`.
    ///
    /// # Safety
    ///
    /// `addr` must be the aligned base of a live, initialized heap object
    /// (or one being initialized by the caller).
    pub unsafe fn at(addr: usize) -> HeapObject {
        debug_assert!(
            addr & OBJECT_ALIGNMENT_MASK == OLD_OBJECT_ALIGNMENT_OFFSET
                || addr & OBJECT_ALIGNMENT_MASK == NEW_OBJECT_ALIGNMENT_OFFSET
        );
        HeapObject(addr)
    }

    /// Wrap the object a heap reference points to.
    ///
    /// # Safety
    ///
    /// `r` must reference a live heap object.
    pub unsafe fn from_ref(r: ObjectRef) -> HeapObject {
        unsafe { HeapObject::at(r.addr()) }
    }

    /// Base address of the header.
    pub const fn addr(self) -> usize {
        self.0
    }

    /// The tagged reference to this object.
    pub const fn as_ref(self) -> ObjectRef {
        ObjectRef::from_raw(self.0 + HEAP_OBJECT_TAG)
    }

    /// Is this object in new space?
    pub const fn is_new_object(self) -> bool {
        self.0 & NEW_OBJECT_ALIGNMENT_OFFSET != OLD_OBJECT_ALIGNMENT_OFFSET
    }

    /// Is this object in old space?
    pub const fn is_old_object(self) -> bool {
        !self.is_new_object()
    }

    #[inline]
    pub(crate) fn word(self, offset: usize) -> usize {
        // In-bounds by the construction invariant; offsets are word-aligned.
        unsafe { core::ptr::read((self.0 + offset) as *const usize) }
    }

    #[inline]
    pub(crate) fn set_word(self, offset: usize, value: usize) {
        unsafe { core::ptr::write((self.0 + offset) as *mut usize, value) }
    }

    /// The raw header word.
    pub fn header(self) -> usize {
        self.word(0)
    }

    /// Overwrite the raw header word.
    pub fn set_header(self, header: usize) {
        self.set_word(0, header);
    }

    /// Collector mark bit.
    pub fn is_marked(self) -> bool {
        bitfield::decode_bit(self.header(), MARK_BIT)
    }

    /// Set or clear the collector mark bit.
    pub fn set_is_marked(self, value: bool) {
        self.set_header(bitfield::update_bit(value, self.header(), MARK_BIT));
    }

    /// Interned-symbol bit.
    pub fn is_canonical(self) -> bool {
        bitfield::decode_bit(self.header(), CANONICAL_BIT)
    }

    /// Set or clear the interned-symbol bit.
    pub fn set_is_canonical(self, value: bool) {
        self.set_header(bitfield::update_bit(value, self.header(), CANONICAL_BIT));
    }

    /// Class identifier from the header.
    pub fn class_id(self) -> Cid {
        bitfield::decode(self.header(), CLASS_ID_FIELD_OFFSET, CLASS_ID_FIELD_SIZE)
    }

    /// Rewrite the class identifier, preserving the other header fields.
    pub fn set_class_id(self, cid: Cid) {
        self.set_header(bitfield::update(cid, self.header(), CLASS_ID_FIELD_OFFSET, CLASS_ID_FIELD_SIZE));
    }

    /// The raw size field in alignment units; [`SIZE_TAG_OVERFLOW`] means
    /// the size must be computed from the class layout.
    pub fn size_tag(self) -> usize {
        bitfield::decode(self.header(), SIZE_FIELD_OFFSET, SIZE_FIELD_SIZE)
    }

    /// Identity hash word; zero until assigned.
    pub fn identity_hash(self) -> usize {
        self.word(WORD_SIZE)
    }

    /// Install the identity hash word.
    pub fn set_identity_hash(self, hash: usize) {
        self.set_word(WORD_SIZE, hash);
    }

    /// Total footprint in bytes, header through last inline slot, rounded
    /// to the object alignment.
    pub fn heap_size(self) -> usize {
        let from_tag = self.size_tag();
        if from_tag != SIZE_TAG_OVERFLOW {
            return from_tag << OBJECT_ALIGNMENT_LOG2;
        }
        self.heap_size_from_class()
    }

    fn heap_size_from_class(self) -> usize {
        match self.class_id() {
            FORWARDING_CORPSE_CID => ForwardingCorpse::unchecked(self).overflow_size(),
            MEDIUM_INTEGER_CID => MediumInteger::footprint(),
            FLOAT64_CID => Float64::footprint(),
            LARGE_INTEGER_CID => {
                LargeInteger::footprint(LargeInteger::unchecked(self).digit_count())
            }
            BYTE_ARRAY_CID => ByteArray::footprint(ByteArray::unchecked(self).length()),
            BYTE_STRING_CID => ByteString::footprint(ByteString::unchecked(self).length()),
            WIDE_STRING_CID => WideString::footprint(WideString::unchecked(self).length()),
            ARRAY_CID => Array::footprint(Array::unchecked(self).length()),
            WEAK_ARRAY_CID => WeakArray::footprint(WeakArray::unchecked(self).length()),
            EPHEMERON_CID => Ephemeron::footprint(),
            ACTIVATION_CID => Activation::footprint(),
            CLOSURE_CID => Closure::footprint(Closure::unchecked(self).num_copied()),
            cid => panic!("zero size tag on a regular object (class {cid})"),
        }
    }

    /// The inclusive reference-slot range of this object.
    pub fn pointers(self) -> PointerRange {
        let addr = self.0;
        match self.class_id() {
            ARRAY_CID | WEAK_ARRAY_CID => {
                // The two layouts agree; the weak semantics live in the
                // collector, not in the slot range.
                let n = Array::unchecked(self).length();
                let from = addr + Array::ELEMENTS_OFFSET;
                PointerRange { from, to: from + n * WORD_SIZE - WORD_SIZE }
            }
            EPHEMERON_CID => PointerRange {
                from: addr + Ephemeron::KEY_OFFSET,
                to: addr + Ephemeron::FINALIZER_OFFSET,
            },
            ACTIVATION_CID => {
                // The interleaved smi fields (bci, stack depth) are
                // collector-transparent, so the range starts at the sender.
                let depth = Activation::unchecked(self).stack_depth();
                PointerRange {
                    from: addr + Activation::SENDER_OFFSET,
                    to: addr + Activation::TEMPS_OFFSET + depth * WORD_SIZE - WORD_SIZE,
                }
            }
            CLOSURE_CID => {
                let n = Closure::unchecked(self).num_copied();
                PointerRange {
                    from: addr + Closure::NUM_COPIED_OFFSET,
                    to: addr + Closure::COPIED_OFFSET + n * WORD_SIZE - WORD_SIZE,
                }
            }
            cid if cid >= FIRST_REGULAR_OBJECT_CID => PointerRange {
                from: addr + RegularObject::SLOTS_OFFSET,
                to: addr + self.heap_size() - WORD_SIZE,
            },
            // Byte-ish payloads, boxed numbers and forwarding corpses
            // carry no traced references.
            _ => PointerRange::empty_at(addr + 2 * WORD_SIZE),
        }
    }

    /// Write the header and zero the identity hash of a fresh object.
    ///
    /// The allocator calls this on zeroed memory; everything past the two
    /// header words is the caller's to fill.
    ///
    /// # Safety
    ///
    /// `addr` must be the aligned base of `heap_size` writable bytes owned
    /// by the heap.
    pub unsafe fn initialize(addr: usize, cid: Cid, heap_size: usize) -> HeapObject {
        debug_assert_ne!(cid, ILLEGAL_CID);
        debug_assert_eq!(heap_size & OBJECT_ALIGNMENT_MASK, 0);
        debug_assert!(heap_size > 0);
        let mut size_tag = heap_size >> OBJECT_ALIGNMENT_LOG2;
        if !bitfield::fits(size_tag, SIZE_FIELD_SIZE) {
            size_tag = SIZE_TAG_OVERFLOW;
            assert!(
                cid < FIRST_REGULAR_OBJECT_CID,
                "regular object too large for the size field"
            );
        }
        let mut header = 0;
        header = bitfield::update(size_tag, header, SIZE_FIELD_OFFSET, SIZE_FIELD_SIZE);
        header = bitfield::update(cid, header, CLASS_ID_FIELD_OFFSET, CLASS_ID_FIELD_SIZE);
        let object = unsafe { HeapObject::at(addr) };
        object.set_header(header);
        object.set_identity_hash(0);
        debug_assert_eq!(object.class_id(), cid);
        debug_assert!(!object.is_marked());
        object
    }
}

impl fmt::Debug for HeapObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "heap-object@{:#x}(class {})", self.addr(), self.class_id())
    }
}

// ---------------------------------------------------------------------------
// Kind views
// ---------------------------------------------------------------------------

macro_rules! object_view {
    ($(#[$meta:meta])* $name:ident, cid = $cid:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq)]
        pub struct $name(HeapObject);

        impl $name {
            /// View `obj` under this layout; the class identifier is a
            /// debug-checked precondition.
            pub fn cast(obj: HeapObject) -> $name {
                debug_assert_eq!(obj.class_id(), $cid);
                $name(obj)
            }

            /// View `obj` without checking its class identifier.
            pub fn unchecked(obj: HeapObject) -> $name {
                $name(obj)
            }
        }

        impl core::ops::Deref for $name {
            type Target = HeapObject;
            fn deref(&self) -> &HeapObject {
                &self.0
            }
        }

        impl From<$name> for HeapObject {
            fn from(view: $name) -> HeapObject {
                view.0
            }
        }
    };
}

object_view! {
    /// A dead object overwritten with its post-move address during a
    /// collection. Never observed by the mutator.
    ForwardingCorpse, cid = FORWARDING_CORPSE_CID
}

impl ForwardingCorpse {
    const TARGET_OFFSET: usize = WORD_SIZE;
    const OVERFLOW_SIZE_OFFSET: usize = 2 * WORD_SIZE;

    /// The forwarded address of the object that lived here.
    pub fn target(self) -> ObjectRef {
        ObjectRef::from_raw(self.word(Self::TARGET_OFFSET))
    }

    /// Record the forwarded address.
    pub fn set_target(self, target: ObjectRef) {
        self.set_word(Self::TARGET_OFFSET, target.raw());
    }

    /// Recorded footprint when the dead object's size tag was the
    /// overflow sentinel.
    pub fn overflow_size(self) -> usize {
        self.word(Self::OVERFLOW_SIZE_OFFSET)
    }

    /// Record the footprint of an oversized dead object.
    pub fn set_overflow_size(self, size: usize) {
        self.set_word(Self::OVERFLOW_SIZE_OFFSET, size);
    }
}

object_view! {
    /// Boxed 64-bit integer.
    MediumInteger, cid = MEDIUM_INTEGER_CID
}

impl MediumInteger {
    const VALUE_OFFSET: usize = 2 * WORD_SIZE;

    /// Bytes occupied by a medium integer.
    pub const fn footprint() -> usize {
        allocation_size(Self::VALUE_OFFSET + size_of::<i64>())
    }

    /// The boxed value.
    pub fn value(self) -> i64 {
        unsafe { core::ptr::read((self.addr() + Self::VALUE_OFFSET) as *const i64) }
    }

    /// Store the boxed value.
    pub fn set_value(self, value: i64) {
        unsafe { core::ptr::write((self.addr() + Self::VALUE_OFFSET) as *mut i64, value) }
    }
}

object_view! {
    /// Arbitrary-precision integer: sign, digit count, then machine-word
    /// digits in little-endian order.
    LargeInteger, cid = LARGE_INTEGER_CID
}

impl LargeInteger {
    const NEGATIVE_OFFSET: usize = 2 * WORD_SIZE;
    const DIGIT_COUNT_OFFSET: usize = 3 * WORD_SIZE;
    const DIGITS_OFFSET: usize = 4 * WORD_SIZE;

    /// Bytes occupied by a large integer of `digits` machine words.
    pub const fn footprint(digits: usize) -> usize {
        allocation_size(Self::DIGITS_OFFSET + digits * WORD_SIZE)
    }

    /// Sign flag.
    pub fn negative(self) -> bool {
        self.word(Self::NEGATIVE_OFFSET) != 0
    }

    /// Set the sign flag.
    pub fn set_negative(self, negative: bool) {
        self.set_word(Self::NEGATIVE_OFFSET, negative as usize);
    }

    /// Number of machine-word digits.
    pub fn digit_count(self) -> usize {
        self.word(Self::DIGIT_COUNT_OFFSET)
    }

    /// Set the number of machine-word digits.
    pub fn set_digit_count(self, count: usize) {
        self.set_word(Self::DIGIT_COUNT_OFFSET, count);
    }

    /// Read digit `index` (little-endian).
    pub fn digit(self, index: usize) -> usize {
        debug_assert!(index < self.digit_count());
        self.word(Self::DIGITS_OFFSET + index * WORD_SIZE)
    }

    /// Write digit `index` (little-endian).
    pub fn set_digit(self, index: usize, value: usize) {
        debug_assert!(index < self.digit_count());
        self.set_word(Self::DIGITS_OFFSET + index * WORD_SIZE, value);
    }
}

object_view! {
    /// Boxed IEEE-754 double.
    Float64, cid = FLOAT64_CID
}

impl Float64 {
    const VALUE_OFFSET: usize = 2 * WORD_SIZE;

    /// Bytes occupied by a boxed double.
    pub const fn footprint() -> usize {
        allocation_size(Self::VALUE_OFFSET + size_of::<f64>())
    }

    /// The boxed value.
    pub fn value(self) -> f64 {
        unsafe { core::ptr::read((self.addr() + Self::VALUE_OFFSET) as *const f64) }
    }

    /// Store the boxed value.
    pub fn set_value(self, value: f64) {
        unsafe { core::ptr::write((self.addr() + Self::VALUE_OFFSET) as *mut f64, value) }
    }
}

object_view! {
    /// Raw byte vector: size smi, then inline bytes.
    ByteArray, cid = BYTE_ARRAY_CID
}

impl ByteArray {
    const SIZE_OFFSET: usize = 2 * WORD_SIZE;
    const ELEMENTS_OFFSET: usize = 3 * WORD_SIZE;

    /// Bytes occupied by a byte array of `length` elements.
    pub const fn footprint(length: usize) -> usize {
        allocation_size(Self::ELEMENTS_OFFSET + length)
    }

    /// The size slot (a small integer).
    pub fn size(self) -> ObjectRef {
        ObjectRef::from_raw(self.word(Self::SIZE_OFFSET))
    }

    /// Write the size slot.
    pub fn set_size(self, size: ObjectRef) {
        self.set_word(Self::SIZE_OFFSET, size.raw());
    }

    /// Element count.
    pub fn length(self) -> usize {
        self.size().small_value() as usize
    }

    /// Read byte `index`.
    pub fn element(self, index: usize) -> u8 {
        debug_assert!(index < self.length());
        unsafe { core::ptr::read((self.addr() + Self::ELEMENTS_OFFSET + index) as *const u8) }
    }

    /// Write byte `index`.
    pub fn set_element(self, index: usize, value: u8) {
        debug_assert!(index < self.length());
        unsafe { core::ptr::write((self.addr() + Self::ELEMENTS_OFFSET + index) as *mut u8, value) }
    }

    /// The inline bytes.
    pub fn bytes(&self) -> &[u8] {
        unsafe {
            core::slice::from_raw_parts((self.addr() + Self::ELEMENTS_OFFSET) as *const u8, self.length())
        }
    }

    /// Fill the inline bytes from `source`, which must match the length.
    pub fn copy_from_slice(self, source: &[u8]) {
        debug_assert_eq!(source.len(), self.length());
        unsafe {
            core::ptr::copy_nonoverlapping(
                source.as_ptr(),
                (self.addr() + Self::ELEMENTS_OFFSET) as *mut u8,
                source.len(),
            )
        }
    }
}

/// FNV-1a over a string payload, salted and masked to a nonzero
/// 26-bit small integer.
fn string_hash(units: impl Iterator<Item = usize>, length: usize, salt: usize) -> usize {
    let mut h = length.wrapping_add(1);
    for unit in units {
        h ^= unit;
        h = h.wrapping_mul(16777619);
    }
    h ^= salt;
    h &= 0x3FF_FFFF;
    if h == 0 { 1 } else { h }
}

object_view! {
    /// Byte-encoded string: size smi, cached hash smi, inline bytes.
    ByteString, cid = BYTE_STRING_CID
}

impl ByteString {
    const SIZE_OFFSET: usize = 2 * WORD_SIZE;
    const HASH_OFFSET: usize = 3 * WORD_SIZE;
    const ELEMENTS_OFFSET: usize = 4 * WORD_SIZE;

    /// Bytes occupied by a byte string of `length` bytes.
    pub const fn footprint(length: usize) -> usize {
        allocation_size(Self::ELEMENTS_OFFSET + length)
    }

    /// The size slot (a small integer).
    pub fn size(self) -> ObjectRef {
        ObjectRef::from_raw(self.word(Self::SIZE_OFFSET))
    }

    /// Write the size slot.
    pub fn set_size(self, size: ObjectRef) {
        self.set_word(Self::SIZE_OFFSET, size.raw());
    }

    /// The cached content hash slot; smi 0 until computed.
    pub fn hash(self) -> ObjectRef {
        ObjectRef::from_raw(self.word(Self::HASH_OFFSET))
    }

    /// Write the cached content hash slot.
    pub fn set_hash(self, hash: ObjectRef) {
        self.set_word(Self::HASH_OFFSET, hash.raw());
    }

    /// Element count.
    pub fn length(self) -> usize {
        self.size().small_value() as usize
    }

    /// Read byte `index`.
    pub fn element(self, index: usize) -> u8 {
        debug_assert!(index < self.length());
        unsafe { core::ptr::read((self.addr() + Self::ELEMENTS_OFFSET + index) as *const u8) }
    }

    /// Write byte `index`.
    pub fn set_element(self, index: usize, value: u8) {
        debug_assert!(index < self.length());
        unsafe { core::ptr::write((self.addr() + Self::ELEMENTS_OFFSET + index) as *mut u8, value) }
    }

    /// The inline bytes.
    pub fn bytes(&self) -> &[u8] {
        unsafe {
            core::slice::from_raw_parts((self.addr() + Self::ELEMENTS_OFFSET) as *const u8, self.length())
        }
    }

    /// Fill the inline bytes from `source`, which must match the length.
    pub fn copy_from_slice(self, source: &[u8]) {
        debug_assert_eq!(source.len(), self.length());
        unsafe {
            core::ptr::copy_nonoverlapping(
                source.as_ptr(),
                (self.addr() + Self::ELEMENTS_OFFSET) as *mut u8,
                source.len(),
            )
        }
    }

    /// Return the cached content hash, computing and installing it on the
    /// first call. `salt` is the heap's string-hash salt.
    pub fn ensure_hash(self, salt: usize) -> ObjectRef {
        if self.hash().raw() == 0 {
            let h = string_hash(self.bytes().iter().map(|b| *b as usize), self.length(), salt);
            self.set_hash(ObjectRef::small(h as isize));
        }
        self.hash()
    }
}

object_view! {
    /// String of 32-bit code units: size smi, cached hash smi, inline
    /// units.
    WideString, cid = WIDE_STRING_CID
}

impl WideString {
    const SIZE_OFFSET: usize = 2 * WORD_SIZE;
    const HASH_OFFSET: usize = 3 * WORD_SIZE;
    const ELEMENTS_OFFSET: usize = 4 * WORD_SIZE;

    /// Bytes occupied by a wide string of `length` code units.
    pub const fn footprint(length: usize) -> usize {
        allocation_size(Self::ELEMENTS_OFFSET + length * size_of::<u32>())
    }

    /// The size slot (a small integer).
    pub fn size(self) -> ObjectRef {
        ObjectRef::from_raw(self.word(Self::SIZE_OFFSET))
    }

    /// Write the size slot.
    pub fn set_size(self, size: ObjectRef) {
        self.set_word(Self::SIZE_OFFSET, size.raw());
    }

    /// The cached content hash slot; smi 0 until computed.
    pub fn hash(self) -> ObjectRef {
        ObjectRef::from_raw(self.word(Self::HASH_OFFSET))
    }

    /// Write the cached content hash slot.
    pub fn set_hash(self, hash: ObjectRef) {
        self.set_word(Self::HASH_OFFSET, hash.raw());
    }

    /// Element count.
    pub fn length(self) -> usize {
        self.size().small_value() as usize
    }

    /// Read code unit `index`.
    pub fn element(self, index: usize) -> u32 {
        debug_assert!(index < self.length());
        unsafe {
            core::ptr::read((self.addr() + Self::ELEMENTS_OFFSET + index * size_of::<u32>()) as *const u32)
        }
    }

    /// Write code unit `index`.
    pub fn set_element(self, index: usize, value: u32) {
        debug_assert!(index < self.length());
        unsafe {
            core::ptr::write(
                (self.addr() + Self::ELEMENTS_OFFSET + index * size_of::<u32>()) as *mut u32,
                value,
            )
        }
    }

    /// The inline code units.
    pub fn code_units(&self) -> &[u32] {
        unsafe {
            core::slice::from_raw_parts((self.addr() + Self::ELEMENTS_OFFSET) as *const u32, self.length())
        }
    }

    /// Return the cached content hash, computing and installing it on the
    /// first call. `salt` is the heap's string-hash salt.
    pub fn ensure_hash(self, salt: usize) -> ObjectRef {
        if self.hash().raw() == 0 {
            let h = string_hash(
                self.code_units().iter().map(|u| *u as usize),
                self.length(),
                salt,
            );
            self.set_hash(ObjectRef::small(h as isize));
        }
        self.hash()
    }
}

object_view! {
    /// Pointer array: size smi, then inline reference slots.
    Array, cid = ARRAY_CID
}

object_view! {
    /// Pointer array whose elements are weak: not traced for liveness,
    /// cleared or forwarded by the collector.
    WeakArray, cid = WEAK_ARRAY_CID
}

macro_rules! array_layout {
    ($name:ident) => {
        impl $name {
            pub(crate) const SIZE_OFFSET: usize = 2 * WORD_SIZE;
            pub(crate) const ELEMENTS_OFFSET: usize = 3 * WORD_SIZE;

            /// Bytes occupied by an array of `length` elements.
            pub const fn footprint(length: usize) -> usize {
                allocation_size(Self::ELEMENTS_OFFSET + length * WORD_SIZE)
            }

            /// The size slot (a small integer).
            pub fn size(self) -> ObjectRef {
                ObjectRef::from_raw(self.word(Self::SIZE_OFFSET))
            }

            /// Write the size slot.
            pub fn set_size(self, size: ObjectRef) {
                self.set_word(Self::SIZE_OFFSET, size.raw());
            }

            /// Element count.
            pub fn length(self) -> usize {
                self.size().small_value() as usize
            }

            /// Read element `index`.
            pub fn element(self, index: usize) -> ObjectRef {
                debug_assert!(index < self.length());
                ObjectRef::from_raw(self.word(Self::ELEMENTS_OFFSET + index * WORD_SIZE))
            }

            /// Write element `index`.
            pub fn set_element(self, index: usize, value: ObjectRef) {
                debug_assert!(index < self.length());
                self.set_word(Self::ELEMENTS_OFFSET + index * WORD_SIZE, value.raw());
            }

            /// Address of element `index`, for bulk slot rewriting.
            pub fn element_addr(self, index: usize) -> usize {
                self.addr() + Self::ELEMENTS_OFFSET + index * WORD_SIZE
            }
        }
    };
}

array_layout!(Array);
array_layout!(WeakArray);

object_view! {
    /// Key/value/finalizer triple: the value is live only while the key is
    /// independently reachable.
    Ephemeron, cid = EPHEMERON_CID
}

impl Ephemeron {
    pub(crate) const KEY_OFFSET: usize = 2 * WORD_SIZE;
    pub(crate) const VALUE_OFFSET: usize = 3 * WORD_SIZE;
    pub(crate) const FINALIZER_OFFSET: usize = 4 * WORD_SIZE;

    /// Bytes occupied by an ephemeron.
    pub const fn footprint() -> usize {
        allocation_size(Self::FINALIZER_OFFSET + WORD_SIZE)
    }

    /// The watched key.
    pub fn key(self) -> ObjectRef {
        ObjectRef::from_raw(self.word(Self::KEY_OFFSET))
    }

    /// Write the watched key.
    pub fn set_key(self, key: ObjectRef) {
        self.set_word(Self::KEY_OFFSET, key.raw());
    }

    /// The dependent value.
    pub fn value(self) -> ObjectRef {
        ObjectRef::from_raw(self.word(Self::VALUE_OFFSET))
    }

    /// Write the dependent value.
    pub fn set_value(self, value: ObjectRef) {
        self.set_word(Self::VALUE_OFFSET, value.raw());
    }

    /// The finalizer, fired once when the key dies.
    pub fn finalizer(self) -> ObjectRef {
        ObjectRef::from_raw(self.word(Self::FINALIZER_OFFSET))
    }

    /// Write the finalizer.
    pub fn set_finalizer(self, finalizer: ObjectRef) {
        self.set_word(Self::FINALIZER_OFFSET, finalizer.raw());
    }

    /// Address of the key slot.
    pub fn key_addr(self) -> usize {
        self.addr() + Self::KEY_OFFSET
    }

    /// Address of the value slot.
    pub fn value_addr(self) -> usize {
        self.addr() + Self::VALUE_OFFSET
    }

    /// Address of the finalizer slot.
    pub fn finalizer_addr(self) -> usize {
        self.addr() + Self::FINALIZER_OFFSET
    }
}

object_view! {
    /// Suspended method invocation frame.
    Activation, cid = ACTIVATION_CID
}

impl Activation {
    /// Fixed capacity of the temp/stack area.
    pub const MAX_TEMPS: usize = 35;

    pub(crate) const SENDER_OFFSET: usize = 2 * WORD_SIZE;
    const BCI_OFFSET: usize = 3 * WORD_SIZE;
    const METHOD_OFFSET: usize = 4 * WORD_SIZE;
    const CLOSURE_OFFSET: usize = 5 * WORD_SIZE;
    const RECEIVER_OFFSET: usize = 6 * WORD_SIZE;
    const STACK_DEPTH_OFFSET: usize = 7 * WORD_SIZE;
    pub(crate) const TEMPS_OFFSET: usize = 8 * WORD_SIZE;

    /// Bytes occupied by an activation (always full capacity).
    pub const fn footprint() -> usize {
        allocation_size(Self::TEMPS_OFFSET + Self::MAX_TEMPS * WORD_SIZE)
    }

    /// The calling activation.
    pub fn sender(self) -> ObjectRef {
        ObjectRef::from_raw(self.word(Self::SENDER_OFFSET))
    }

    /// Write the calling activation.
    pub fn set_sender(self, sender: ObjectRef) {
        self.set_word(Self::SENDER_OFFSET, sender.raw());
    }

    /// Bytecode index (a small integer).
    pub fn bci(self) -> ObjectRef {
        ObjectRef::from_raw(self.word(Self::BCI_OFFSET))
    }

    /// Write the bytecode index.
    pub fn set_bci(self, bci: ObjectRef) {
        self.set_word(Self::BCI_OFFSET, bci.raw());
    }

    /// The executing method.
    pub fn method(self) -> ObjectRef {
        ObjectRef::from_raw(self.word(Self::METHOD_OFFSET))
    }

    /// Write the executing method.
    pub fn set_method(self, method: ObjectRef) {
        self.set_word(Self::METHOD_OFFSET, method.raw());
    }

    /// The closure being evaluated, or nil for a plain method frame.
    pub fn closure(self) -> ObjectRef {
        ObjectRef::from_raw(self.word(Self::CLOSURE_OFFSET))
    }

    /// Write the closure.
    pub fn set_closure(self, closure: ObjectRef) {
        self.set_word(Self::CLOSURE_OFFSET, closure.raw());
    }

    /// The receiver.
    pub fn receiver(self) -> ObjectRef {
        ObjectRef::from_raw(self.word(Self::RECEIVER_OFFSET))
    }

    /// Write the receiver.
    pub fn set_receiver(self, receiver: ObjectRef) {
        self.set_word(Self::RECEIVER_OFFSET, receiver.raw());
    }

    /// Number of live temp/stack slots.
    pub fn stack_depth(self) -> usize {
        ObjectRef::from_raw(self.word(Self::STACK_DEPTH_OFFSET)).small_value() as usize
    }

    /// Write the live temp/stack slot count.
    pub fn set_stack_depth(self, depth: usize) {
        debug_assert!(depth <= Self::MAX_TEMPS);
        self.set_word(Self::STACK_DEPTH_OFFSET, ObjectRef::small(depth as isize).raw());
    }

    /// Read temp/stack slot `index`.
    pub fn temp(self, index: usize) -> ObjectRef {
        debug_assert!(index < Self::MAX_TEMPS);
        ObjectRef::from_raw(self.word(Self::TEMPS_OFFSET + index * WORD_SIZE))
    }

    /// Write temp/stack slot `index`.
    pub fn set_temp(self, index: usize, value: ObjectRef) {
        debug_assert!(index < Self::MAX_TEMPS);
        self.set_word(Self::TEMPS_OFFSET + index * WORD_SIZE, value.raw());
    }

    /// Push a value on the frame stack.
    pub fn push(self, value: ObjectRef) {
        let depth = self.stack_depth();
        debug_assert!(depth < Self::MAX_TEMPS);
        self.set_temp(depth, value);
        self.set_stack_depth(depth + 1);
    }

    /// Pop the top of the frame stack.
    pub fn pop(self) -> ObjectRef {
        let depth = self.stack_depth();
        debug_assert!(depth > 0);
        let top = self.temp(depth - 1);
        self.set_stack_depth(depth - 1);
        top
    }

    /// Read the stack slot `depth_from_top` below the top.
    pub fn stack_at(self, depth_from_top: usize) -> ObjectRef {
        debug_assert!(depth_from_top < self.stack_depth());
        self.temp(self.stack_depth() - depth_from_top - 1)
    }

    /// Overwrite the stack slot `depth_from_top` below the top.
    pub fn stack_put(self, depth_from_top: usize, value: ObjectRef) {
        debug_assert!(depth_from_top < self.stack_depth());
        self.set_temp(self.stack_depth() - depth_from_top - 1, value);
    }

    /// Discard `count` values from the top of the stack.
    pub fn drop_values(self, count: usize) {
        let depth = self.stack_depth();
        debug_assert!(count <= depth);
        self.set_stack_depth(depth - count);
    }

    /// Reserve `count` additional stack slots.
    pub fn grow(self, count: usize) {
        let depth = self.stack_depth();
        debug_assert!(depth + count < Self::MAX_TEMPS);
        self.set_stack_depth(depth + count);
    }
}

object_view! {
    /// Block closure: copied-value count, defining activation, initial
    /// bytecode index, argument count, then the copied values.
    Closure, cid = CLOSURE_CID
}

impl Closure {
    pub(crate) const NUM_COPIED_OFFSET: usize = 2 * WORD_SIZE;
    const DEFINING_ACTIVATION_OFFSET: usize = 3 * WORD_SIZE;
    const INITIAL_BCI_OFFSET: usize = 4 * WORD_SIZE;
    const NUM_ARGS_OFFSET: usize = 5 * WORD_SIZE;
    pub(crate) const COPIED_OFFSET: usize = 6 * WORD_SIZE;

    /// Bytes occupied by a closure with `num_copied` copied values.
    pub const fn footprint(num_copied: usize) -> usize {
        allocation_size(Self::COPIED_OFFSET + num_copied * WORD_SIZE)
    }

    /// Number of copied values.
    pub fn num_copied(self) -> usize {
        ObjectRef::from_raw(self.word(Self::NUM_COPIED_OFFSET)).small_value() as usize
    }

    /// Write the copied-value count.
    pub fn set_num_copied(self, count: usize) {
        self.set_word(Self::NUM_COPIED_OFFSET, ObjectRef::small(count as isize).raw());
    }

    /// The activation this closure was created in.
    pub fn defining_activation(self) -> ObjectRef {
        ObjectRef::from_raw(self.word(Self::DEFINING_ACTIVATION_OFFSET))
    }

    /// Write the defining activation.
    pub fn set_defining_activation(self, activation: ObjectRef) {
        self.set_word(Self::DEFINING_ACTIVATION_OFFSET, activation.raw());
    }

    /// Initial bytecode index (a small integer).
    pub fn initial_bci(self) -> ObjectRef {
        ObjectRef::from_raw(self.word(Self::INITIAL_BCI_OFFSET))
    }

    /// Write the initial bytecode index.
    pub fn set_initial_bci(self, bci: ObjectRef) {
        self.set_word(Self::INITIAL_BCI_OFFSET, bci.raw());
    }

    /// Argument count (a small integer).
    pub fn num_args(self) -> ObjectRef {
        ObjectRef::from_raw(self.word(Self::NUM_ARGS_OFFSET))
    }

    /// Write the argument count.
    pub fn set_num_args(self, count: ObjectRef) {
        self.set_word(Self::NUM_ARGS_OFFSET, count.raw());
    }

    /// Read copied value `index`.
    pub fn copied(self, index: usize) -> ObjectRef {
        debug_assert!(index < self.num_copied());
        ObjectRef::from_raw(self.word(Self::COPIED_OFFSET + index * WORD_SIZE))
    }

    /// Write copied value `index`.
    pub fn set_copied(self, index: usize, value: ObjectRef) {
        debug_assert!(index < self.num_copied());
        self.set_word(Self::COPIED_OFFSET + index * WORD_SIZE, value.raw());
    }
}

/// A fixed-slot object: header, identity hash, then reference slots.
///
/// Every class identifier at or above [`FIRST_REGULAR_OBJECT_CID`] uses
/// this layout; the slot count comes from the header size.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RegularObject(HeapObject);

impl RegularObject {
    pub(crate) const SLOTS_OFFSET: usize = 2 * WORD_SIZE;

    /// View `obj` as a regular object; the class identifier is a
    /// debug-checked precondition.
    pub fn cast(obj: HeapObject) -> RegularObject {
        debug_assert!(obj.class_id() >= FIRST_REGULAR_OBJECT_CID);
        RegularObject(obj)
    }

    /// View `obj` without checking its class identifier.
    pub fn unchecked(obj: HeapObject) -> RegularObject {
        RegularObject(obj)
    }

    /// Bytes occupied by a regular object of `num_slots` slots.
    pub const fn footprint(num_slots: usize) -> usize {
        allocation_size(Self::SLOTS_OFFSET + num_slots * WORD_SIZE)
    }

    /// Slot count implied by the header size (alignment padding reads as
    /// smi 0).
    pub fn num_slots(self) -> usize {
        (self.heap_size() - Self::SLOTS_OFFSET) / WORD_SIZE
    }

    /// Read slot `index`.
    pub fn slot(self, index: usize) -> ObjectRef {
        debug_assert!(index < self.num_slots());
        ObjectRef::from_raw(self.word(Self::SLOTS_OFFSET + index * WORD_SIZE))
    }

    /// Write slot `index`.
    pub fn set_slot(self, index: usize, value: ObjectRef) {
        debug_assert!(index < self.num_slots());
        self.set_word(Self::SLOTS_OFFSET + index * WORD_SIZE, value.raw());
    }
}

impl core::ops::Deref for RegularObject {
    type Target = HeapObject;
    fn deref(&self) -> &HeapObject {
        &self.0
    }
}

impl From<RegularObject> for HeapObject {
    fn from(view: RegularObject) -> HeapObject {
        view.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A word arena with a controllable alignment offset, standing in for
    // heap memory.
    fn arena(words: usize) -> (Vec<usize>, usize) {
        let buf = vec![0usize; words + 4];
        let base = buf.as_ptr() as usize;
        let aligned = (base + OBJECT_ALIGNMENT_MASK) & !OBJECT_ALIGNMENT_MASK;
        (buf, aligned)
    }

    #[test]
    fn small_integers_round_trip() {
        for v in [0isize, 1, -1, 42, -42, SMI_MAX, SMI_MIN] {
            let r = ObjectRef::small(v);
            assert!(r.is_small_integer());
            assert!(!r.is_heap_object());
            assert_eq!(r.raw() & TAG_MASK, SMI_TAG);
            assert_eq!(r.small_value(), v);
        }
        assert_eq!(ObjectRef::small(SMI_MAX).raw(), (SMI_MAX as usize) << 1);
    }

    #[test]
    fn small_value_range_predicate() {
        assert!(ObjectRef::is_small_value(0));
        assert!(ObjectRef::is_small_value(SMI_MAX as i64));
        assert!(ObjectRef::is_small_value(SMI_MIN as i64));
        assert!(!ObjectRef::is_small_value(SMI_MAX as i64 + 1));
        assert!(!ObjectRef::is_small_value(SMI_MIN as i64 - 1));
    }

    #[test]
    fn heap_references_recover_their_address() {
        let (_buf, addr) = arena(8);
        let r = ObjectRef::from_addr(addr);
        assert!(r.is_heap_object());
        assert_eq!(r.raw(), addr + HEAP_OBJECT_TAG);
        assert_eq!(r.addr(), addr);
    }

    #[test]
    fn generation_bit_comes_from_the_address() {
        let (_buf, addr) = arena(8);
        let old = ObjectRef::from_addr(addr);
        assert!(old.is_old_object());
        assert!(!old.is_new_object());
        assert!(old.is_immediate_or_old());

        let new = ObjectRef::from_addr(addr + NEW_OBJECT_ALIGNMENT_OFFSET);
        assert!(new.is_new_object());
        assert!(!new.is_immediate_or_old());
        assert!(ObjectRef::small(7).is_immediate_or_old());
    }

    #[test]
    fn initialize_writes_header_and_clears_hash() {
        let (_buf, addr) = arena(8);
        let obj = unsafe { HeapObject::initialize(addr, ARRAY_CID, 2 * OBJECT_ALIGNMENT) };
        assert_eq!(obj.class_id(), ARRAY_CID);
        assert_eq!(obj.heap_size(), 2 * OBJECT_ALIGNMENT);
        assert_eq!(obj.identity_hash(), 0);
        assert!(!obj.is_marked());
        assert!(!obj.is_canonical());
    }

    #[test]
    fn mark_and_canonical_bits_are_independent() {
        let (_buf, addr) = arena(8);
        let obj = unsafe { HeapObject::initialize(addr, ARRAY_CID, OBJECT_ALIGNMENT) };
        obj.set_is_marked(true);
        assert!(obj.is_marked());
        assert!(!obj.is_canonical());
        obj.set_is_canonical(true);
        obj.set_is_marked(false);
        assert!(obj.is_canonical());
        assert_eq!(obj.class_id(), ARRAY_CID);
    }

    #[test]
    fn array_layout_and_pointers() {
        let (_buf, addr) = arena(16);
        let obj = unsafe { HeapObject::initialize(addr, ARRAY_CID, Array::footprint(3)) };
        let array = Array::cast(obj);
        array.set_size(ObjectRef::small(3));
        for i in 0..3 {
            array.set_element(i, ObjectRef::small(i as isize + 1));
        }
        assert_eq!(array.length(), 3);
        assert_eq!(array.element(1).small_value(), 2);

        let range = obj.pointers();
        assert_eq!(range.len(), 3);
        assert_eq!(range.from, array.element_addr(0));
        assert_eq!(range.to, array.element_addr(2));
    }

    #[test]
    fn empty_array_has_empty_pointer_range() {
        let (_buf, addr) = arena(8);
        let obj = unsafe { HeapObject::initialize(addr, ARRAY_CID, Array::footprint(0)) };
        Array::cast(obj).set_size(ObjectRef::small(0));
        let range = obj.pointers();
        assert!(range.is_empty());
        assert_eq!(range.len(), 0);
        assert_eq!(range.iter().count(), 0);
    }

    #[test]
    fn ephemeron_pointer_range_is_three_slots() {
        let (_buf, addr) = arena(8);
        let obj = unsafe { HeapObject::initialize(addr, EPHEMERON_CID, Ephemeron::footprint()) };
        let range = obj.pointers();
        assert_eq!(range.len(), 3);
        assert_eq!(range.from, Ephemeron::cast(obj).key_addr());
        assert_eq!(range.to, Ephemeron::cast(obj).finalizer_addr());
    }

    #[test]
    fn activation_pointer_range_tracks_stack_depth() {
        let (_buf, addr) = arena(64);
        let obj = unsafe { HeapObject::initialize(addr, ACTIVATION_CID, Activation::footprint()) };
        let activation = Activation::cast(obj);
        activation.set_stack_depth(0);
        // Six fixed fields, no live temps.
        assert_eq!(obj.pointers().len(), 6);
        activation.push(ObjectRef::small(10));
        activation.push(ObjectRef::small(20));
        assert_eq!(obj.pointers().len(), 8);
        assert_eq!(activation.stack_at(0).small_value(), 20);
        assert_eq!(activation.pop().small_value(), 20);
        assert_eq!(obj.pointers().len(), 7);
    }

    #[test]
    fn closure_pointer_range_covers_fixed_fields_and_copies() {
        let (_buf, addr) = arena(16);
        let obj = unsafe { HeapObject::initialize(addr, CLOSURE_CID, Closure::footprint(2)) };
        let closure = Closure::cast(obj);
        closure.set_num_copied(2);
        // num_copied, defining activation, initial bci, num args + 2 copies.
        assert_eq!(obj.pointers().len(), 6);
        let empty = unsafe {
            HeapObject::initialize(addr + Closure::footprint(2).max(OBJECT_ALIGNMENT), CLOSURE_CID, Closure::footprint(0))
        };
        Closure::cast(empty).set_num_copied(0);
        assert_eq!(empty.pointers().len(), 4);
    }

    #[test]
    fn byte_kinds_have_no_pointers() {
        let (_buf, addr) = arena(16);
        let obj = unsafe { HeapObject::initialize(addr, BYTE_STRING_CID, ByteString::footprint(5)) };
        let s = ByteString::cast(obj);
        s.set_size(ObjectRef::small(5));
        s.copy_from_slice(b"hello");
        assert!(obj.pointers().is_empty());
        assert_eq!(s.bytes(), b"hello");
    }

    #[test]
    fn string_hash_is_cached_nonzero_and_salted() {
        let (_buf, addr) = arena(16);
        let obj = unsafe { HeapObject::initialize(addr, BYTE_STRING_CID, ByteString::footprint(5)) };
        let s = ByteString::cast(obj);
        s.set_size(ObjectRef::small(5));
        s.copy_from_slice(b"hello");
        assert_eq!(s.hash().raw(), 0);
        let h = s.ensure_hash(0x1234);
        assert_ne!(h.small_value(), 0);
        assert_eq!(s.ensure_hash(0x1234), h);

        let (_buf2, addr2) = arena(16);
        let obj2 = unsafe { HeapObject::initialize(addr2, BYTE_STRING_CID, ByteString::footprint(5)) };
        let s2 = ByteString::cast(obj2);
        s2.set_size(ObjectRef::small(5));
        s2.copy_from_slice(b"hello");
        assert_ne!(s2.ensure_hash(0x99999), h, "different salt, different hash");
    }

    #[test]
    fn wide_string_units_round_trip() {
        let (_buf, addr) = arena(16);
        let obj = unsafe { HeapObject::initialize(addr, WIDE_STRING_CID, WideString::footprint(3)) };
        let s = WideString::cast(obj);
        s.set_size(ObjectRef::small(3));
        s.set_element(0, 0x1F600);
        s.set_element(1, 0x41);
        s.set_element(2, 0x42);
        assert_eq!(s.code_units(), &[0x1F600, 0x41, 0x42]);
        assert_ne!(s.ensure_hash(7).small_value(), 0);
        assert!(obj.pointers().is_empty());
    }

    #[test]
    fn medium_integer_and_float64_payloads() {
        let (_buf, addr) = arena(16);
        let obj = unsafe { HeapObject::initialize(addr, MEDIUM_INTEGER_CID, MediumInteger::footprint()) };
        let mint = MediumInteger::cast(obj);
        mint.set_value(i64::MIN + 3);
        assert_eq!(mint.value(), i64::MIN + 3);
        assert!(obj.pointers().is_empty());

        let (_buf2, addr2) = arena(16);
        let fobj = unsafe { HeapObject::initialize(addr2, FLOAT64_CID, Float64::footprint()) };
        let f = Float64::cast(fobj);
        f.set_value(0.25);
        assert_eq!(f.value(), 0.25);
        assert!(fobj.pointers().is_empty());
    }

    #[test]
    fn large_integer_digits() {
        let (_buf, addr) = arena(16);
        let obj = unsafe { HeapObject::initialize(addr, LARGE_INTEGER_CID, LargeInteger::footprint(2)) };
        let big = LargeInteger::cast(obj);
        big.set_negative(true);
        big.set_digit_count(2);
        big.set_digit(0, usize::MAX);
        big.set_digit(1, 1);
        assert!(big.negative());
        assert_eq!(big.digit(0), usize::MAX);
        assert_eq!(big.digit(1), 1);
        assert_eq!(obj.heap_size(), LargeInteger::footprint(2));
        assert!(obj.pointers().is_empty());
    }

    #[test]
    fn regular_object_slot_count_comes_from_the_header() {
        let (_buf, addr) = arena(16);
        let obj = unsafe { HeapObject::initialize(addr, FIRST_REGULAR_OBJECT_CID, RegularObject::footprint(4)) };
        let regular = RegularObject::cast(obj);
        assert_eq!(regular.num_slots(), 4);
        regular.set_slot(3, ObjectRef::small(-9));
        assert_eq!(regular.slot(3).small_value(), -9);
        assert_eq!(obj.pointers().len(), 4);
    }

    #[test]
    fn forwarding_corpse_records_target_and_overflow() {
        let (_buf, addr) = arena(8);
        let obj = unsafe { HeapObject::initialize(addr, ARRAY_CID, 2 * OBJECT_ALIGNMENT) };
        obj.set_class_id(FORWARDING_CORPSE_CID);
        let corpse = ForwardingCorpse::cast(obj);
        let target = ObjectRef::from_addr(addr);
        corpse.set_target(target);
        corpse.set_overflow_size(4 * OBJECT_ALIGNMENT);
        assert_eq!(corpse.target(), target);
        assert_eq!(corpse.overflow_size(), 4 * OBJECT_ALIGNMENT);
        assert!(obj.pointers().is_empty());
    }

    #[test]
    fn oversized_byte_array_reports_size_from_class() {
        // More alignment units than the size field can encode.
        let length = (bitfield::mask(SIZE_FIELD_SIZE) + 2) << OBJECT_ALIGNMENT_LOG2;
        let footprint = ByteArray::footprint(length);
        let mut buf = vec![0u8; footprint + OBJECT_ALIGNMENT];
        let base = buf.as_mut_ptr() as usize;
        let addr = (base + OBJECT_ALIGNMENT_MASK) & !OBJECT_ALIGNMENT_MASK;
        let obj = unsafe { HeapObject::initialize(addr, BYTE_ARRAY_CID, footprint) };
        ByteArray::cast(obj).set_size(ObjectRef::small(length as isize));
        assert_eq!(obj.size_tag(), SIZE_TAG_OVERFLOW);
        assert_eq!(obj.heap_size(), footprint);
    }
}
